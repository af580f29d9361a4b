//! Extension API - the contract a bundle implements
//!
//! A bundle is a shared library exporting one entry point,
//! `ember_extension_init`, which hands the host a boxed [`Extension`].
//! Metadata is self-reported by the instance; the host never parses the
//! bundle beyond resolving the entry symbol.

use crate::application::errors::ExtensionError;

use super::context::ExtensionContext;

/// Self-reported bundle metadata.
#[derive(Debug, Clone)]
pub struct ExtensionMeta {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
}

/// The entry point every bundle instantiates.
pub trait Extension: Send + Sync {
    /// Identity and metadata for this extension.
    fn meta(&self) -> ExtensionMeta;

    /// Called once after instantiation, with a context bound to this
    /// extension's name. All command and event registrations happen here;
    /// if the hook fails, everything it registered is rolled back and the
    /// load is aborted.
    fn on_enable(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError>;

    /// Called before unload or disable. Best-effort: a failure is logged
    /// and cleanup proceeds regardless.
    fn on_disable(&self) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Function signature for the bundle entry point.
pub type ExtensionInitFn = unsafe extern "C" fn() -> *mut dyn Extension;

/// Symbol the loader resolves in each bundle.
pub const ENTRY_SYMBOL: &[u8] = b"ember_extension_init";
pub const ENTRY_SYMBOL_NAME: &str = "ember_extension_init";

/// Export the entry point from a bundle crate without writing the unsafe
/// boilerplate by hand:
///
/// ```ignore
/// ember_bot::declare_extension!(MyExtension::new());
/// ```
#[macro_export]
macro_rules! declare_extension {
    ($ctor:expr) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn ember_extension_init() -> *mut dyn $crate::extensions::Extension {
            let boxed: Box<dyn $crate::extensions::Extension> = Box::new($ctor);
            Box::into_raw(boxed)
        }
    };
}
