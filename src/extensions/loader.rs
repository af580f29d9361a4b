//! Bundle loader - instantiates an extension from a staged bundle copy

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use libloading::{Library, Symbol};

use crate::application::errors::ExtensionError;

use super::api::{Extension, ExtensionInitFn, ExtensionMeta, ENTRY_SYMBOL, ENTRY_SYMBOL_NAME};
use super::hash::BundleHash;

/// Identity of a loadable unit, built from self-reported metadata plus the
/// content hash of the bundle file it came from.
#[derive(Debug, Clone)]
pub struct BundleDescriptor {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub entry_symbol: String,
    pub content_hash: BundleHash,
}

impl BundleDescriptor {
    pub fn new(meta: ExtensionMeta, content_hash: BundleHash) -> Self {
        Self {
            name: meta.name,
            version: meta.version,
            author: meta.author,
            description: meta.description,
            entry_symbol: ENTRY_SYMBOL_NAME.to_string(),
            content_hash,
        }
    }
}

/// An instantiated bundle, before the enable hook has run.
pub struct LoadedBundle {
    pub instance: Arc<dyn Extension>,
    /// Kept alive for as long as the instance exists. `None` for loaders
    /// that do not map native code (the test stub).
    pub library: Option<Library>,
}

/// Seam between the runtime and the isolation mechanism. The production
/// loader maps a shared library; tests substitute a stub.
pub trait BundleLoader: Send + Sync {
    /// Instantiate the entry point of the bundle at `staged_path`.
    fn load(&self, staged_path: &Path) -> Result<LoadedBundle, ExtensionError>;
}

/// Loads bundles as dynamic libraries via `libloading`. Each bundle gets its
/// own `Library`, so symbols from one extension never leak into another.
pub struct DylibLoader;

impl BundleLoader for DylibLoader {
    fn load(&self, staged_path: &Path) -> Result<LoadedBundle, ExtensionError> {
        let library = unsafe {
            Library::new(staged_path)
                .map_err(|e| ExtensionError::Load(format!("failed to open library: {}", e)))?
        };

        let init_fn: Symbol<ExtensionInitFn> = unsafe {
            library.get(ENTRY_SYMBOL).map_err(|e| {
                ExtensionError::Load(format!(
                    "entry point '{}' not found: {}",
                    ENTRY_SYMBOL_NAME, e
                ))
            })?
        };

        let instance: Arc<dyn Extension> = unsafe {
            let ptr = init_fn();
            if ptr.is_null() {
                return Err(ExtensionError::Load("entry point returned null".to_string()));
            }
            Arc::from(Box::from_raw(ptr))
        };

        Ok(LoadedBundle {
            instance,
            library: Some(library),
        })
    }
}

/// A live extension instance.
pub struct LoadedExtension {
    descriptor: BundleDescriptor,
    enabled: AtomicBool,
    loaded: AtomicBool,
    last_load_error: Mutex<Option<String>>,
    // Declared before `library`: the instance must drop before its code is
    // unmapped.
    instance: Arc<dyn Extension>,
    library: Option<Library>,
    staged_path: PathBuf,
}

impl LoadedExtension {
    pub fn new(
        descriptor: BundleDescriptor,
        instance: Arc<dyn Extension>,
        library: Option<Library>,
        staged_path: PathBuf,
    ) -> Self {
        Self {
            descriptor,
            enabled: AtomicBool::new(true),
            loaded: AtomicBool::new(true),
            last_load_error: Mutex::new(None),
            instance,
            library,
            staged_path,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &BundleDescriptor {
        &self.descriptor
    }

    pub fn instance(&self) -> &Arc<dyn Extension> {
        &self.instance
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn last_load_error(&self) -> Option<String> {
        self.last_load_error.lock().ok().and_then(|g| g.clone())
    }

    pub fn set_last_load_error(&self, error: Option<String>) {
        if let Ok(mut guard) = self.last_load_error.lock() {
            *guard = error;
        }
    }

    pub fn has_library(&self) -> bool {
        self.library.is_some()
    }
}
