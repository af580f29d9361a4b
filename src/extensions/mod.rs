//! Extension runtime - discovery, hot reload, and event dispatch
//!
//! The watcher sweeps the bundle directory, the hash tracker classifies
//! each file, the host stages and loads bundles, and loaded extensions
//! register commands and event handlers through their context. Unload
//! reverses the chain: registrations are purged first, then the disable
//! hook runs, then the staged copy is removed.

pub mod api;
pub mod context;
pub mod events;
pub mod hash;
pub mod host;
pub mod loader;
pub mod registry;
pub mod watcher;

pub use api::{Extension, ExtensionInitFn, ExtensionMeta, ENTRY_SYMBOL, ENTRY_SYMBOL_NAME};
pub use context::ExtensionContext;
pub use events::{EventBus, EventRegistration, Listener, RegisteredHandler};
pub use hash::{digest_file, BundleHash};
pub use host::{ExtensionHost, ExtensionStatus, PendingUpdate};
pub use loader::{BundleDescriptor, BundleLoader, DylibLoader, LoadedBundle, LoadedExtension};
pub use registry::{CommandBinding, CommandRegistry, HOST_OWNER};
pub use watcher::{BundleWatcher, FailedBundleRecord};
