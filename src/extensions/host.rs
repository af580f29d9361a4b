//! Extension host - owns the live extension set and the staging area
//!
//! All loads operate on a staged private copy of the bundle, never the
//! original file, and are all-or-nothing: a failed enable hook rolls back
//! every registration it made and deletes the staged copy. Administrative
//! operations (enable, disable, unload, list, describe) live here; the
//! watcher drives loads and update detection on top of them.

use std::collections::HashMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::application::errors::ExtensionError;
use crate::domain::traits::BotInfo;

use super::api::Extension;
use super::context::ExtensionContext;
use super::events::EventBus;
use super::hash::BundleHash;
use super::loader::{BundleDescriptor, BundleLoader, LoadedExtension};
use super::registry::CommandRegistry;

/// A detected code change that cannot be applied while the extension is
/// enabled. Applied (unload + reload) when the extension is disabled, or
/// superseded by a newer change to the same extension.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub extension_name: String,
    pub staged_path: PathBuf,
    pub new_hash: BundleHash,
    pub detected_at: DateTime<Utc>,
}

/// Summary row for administrative listing.
#[derive(Debug, Clone)]
pub struct ExtensionStatus {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub loaded: bool,
    pub update_pending: bool,
}

pub struct ExtensionHost {
    bus: Arc<EventBus>,
    commands: Arc<CommandRegistry>,
    loader: Arc<dyn BundleLoader>,
    bot_info: BotInfo,
    staging_dir: PathBuf,
    extensions: RwLock<HashMap<String, Arc<LoadedExtension>>>,
    pending: Mutex<HashMap<String, PendingUpdate>>,
}

impl ExtensionHost {
    pub fn new(
        bus: Arc<EventBus>,
        commands: Arc<CommandRegistry>,
        loader: Arc<dyn BundleLoader>,
        bot_info: BotInfo,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bus,
            commands,
            loader,
            bot_info,
            staging_dir: staging_dir.into(),
            extensions: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn command_registry(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Copy a bundle into the staging area under a content-hash-suffixed
    /// name. The original file stays untouched and free to be replaced.
    pub fn stage_bundle(&self, original: &Path, hash: &BundleHash) -> Result<PathBuf, ExtensionError> {
        fs::create_dir_all(&self.staging_dir)?;

        let stem = original
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("bundle");
        let ext = original
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{}", s))
            .unwrap_or_default();
        let staged = self.staging_dir.join(format!("{}-{}{}", stem, hash.short(), ext));

        fs::copy(original, &staged)?;
        Ok(staged)
    }

    /// Load a staged bundle copy: instantiate the entry point, read its
    /// metadata, and run the enable hook. On any failure the staged copy is
    /// deleted and no registration survives. Returns the extension name.
    pub fn load_staged(&self, staged: &Path, hash: BundleHash) -> Result<String, ExtensionError> {
        let bundle = self.loader.load(staged)?;
        let meta = bundle.instance.meta();
        let name = meta.name.clone();

        if self.get(&name).is_some() {
            drop(bundle);
            let _ = fs::remove_file(staged);
            return Err(ExtensionError::AlreadyLoaded(name));
        }

        let ctx = ExtensionContext::new(
            &name,
            self.bus.clone(),
            self.commands.clone(),
            self.bot_info.clone(),
        );

        if let Err(reason) = self.run_enable_hook(&bundle.instance, &ctx) {
            // All-or-nothing: drop whatever the hook registered before failing.
            self.bus.unregister_all(&name);
            self.commands.unregister_all(&name);
            drop(bundle);
            let _ = fs::remove_file(staged);
            return Err(ExtensionError::Enable(reason));
        }

        let descriptor = BundleDescriptor::new(meta, hash);
        let extension = Arc::new(LoadedExtension::new(
            descriptor,
            bundle.instance,
            bundle.library,
            staged.to_path_buf(),
        ));

        let mut extensions = self
            .extensions
            .write()
            .map_err(|_| ExtensionError::Internal("extension table lock poisoned".to_string()))?;
        extensions.insert(name.clone(), extension);

        tracing::info!(extension = %name, hash = %hash.short(), "extension enabled");
        Ok(name)
    }

    /// Invoke the disable hook, purge all registrations, drop the instance
    /// and its library, and remove the staged copy.
    pub fn unload(&self, name: &str) -> Result<(), ExtensionError> {
        let extension = {
            let mut extensions = self
                .extensions
                .write()
                .map_err(|_| ExtensionError::Internal("extension table lock poisoned".to_string()))?;
            extensions
                .remove(name)
                .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?
        };

        // Nothing is dispatched to this extension from here on.
        self.bus.unregister_all(name);
        self.commands.unregister_all(name);

        if extension.is_enabled() {
            self.run_disable_hook(name, extension.instance());
        }

        let staged = extension.staged_path().to_path_buf();
        drop(extension);
        if let Err(e) = fs::remove_file(&staged) {
            tracing::warn!(extension = %name, "could not remove staged copy {}: {}", staged.display(), e);
        }

        tracing::info!(extension = %name, "extension unloaded");
        Ok(())
    }

    /// Re-run the enable hook of a disabled extension. Rolls back partial
    /// registrations if the hook fails.
    pub fn enable(&self, name: &str) -> Result<(), ExtensionError> {
        let extension = self
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        if extension.is_enabled() {
            return Ok(());
        }

        let ctx = ExtensionContext::new(
            name,
            self.bus.clone(),
            self.commands.clone(),
            self.bot_info.clone(),
        );
        match self.run_enable_hook(extension.instance(), &ctx) {
            Ok(()) => {
                extension.set_enabled(true);
                extension.set_last_load_error(None);
                tracing::info!(extension = %name, "extension enabled");
                Ok(())
            }
            Err(reason) => {
                self.bus.unregister_all(name);
                self.commands.unregister_all(name);
                extension.set_last_load_error(Some(reason.clone()));
                Err(ExtensionError::Enable(reason))
            }
        }
    }

    /// Disable an extension: disable hook (best-effort), purge every one of
    /// its registrations, then apply any pending update by reloading the
    /// staged new code.
    pub fn disable(&self, name: &str) -> Result<(), ExtensionError> {
        let extension = self
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;

        if extension.is_enabled() {
            self.run_disable_hook(name, extension.instance());
            self.bus.unregister_all(name);
            self.commands.unregister_all(name);
            extension.set_enabled(false);
            tracing::info!(extension = %name, "extension disabled");
        }
        drop(extension);

        let pending = self
            .pending
            .lock()
            .ok()
            .and_then(|mut p| p.remove(name));
        if let Some(update) = pending {
            tracing::info!(
                extension = %name,
                hash = %update.new_hash.short(),
                "applying pending update"
            );
            self.unload(name)?;
            match self.load_staged(&update.staged_path, update.new_hash) {
                Ok(new_name) => {
                    tracing::info!(extension = %new_name, "pending update applied");
                }
                Err(e) => {
                    tracing::error!(extension = %name, "pending update failed to load: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Record (or supersede) a pending update for an enabled extension,
    /// staging a private copy of the new bundle content. Returns `true` if
    /// this hash was newly queued.
    pub fn record_pending(
        &self,
        name: &str,
        original: &Path,
        new_hash: BundleHash,
    ) -> Result<bool, ExtensionError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ExtensionError::Internal("pending table lock poisoned".to_string()))?;

        if let Some(existing) = pending.get(name) {
            if existing.new_hash == new_hash {
                return Ok(false);
            }
            // Superseded by a newer change; its staged copy is dead weight.
            let _ = fs::remove_file(&existing.staged_path);
        }

        let staged = self.stage_bundle(original, &new_hash)?;
        pending.insert(
            name.to_string(),
            PendingUpdate {
                extension_name: name.to_string(),
                staged_path: staged,
                new_hash,
                detected_at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Drop a stale pending update (e.g. the bundle file reverted to the
    /// running content). Deletes its staged copy.
    pub fn drop_pending(&self, name: &str) -> bool {
        let removed = self.pending.lock().ok().and_then(|mut p| p.remove(name));
        match removed {
            Some(update) => {
                let _ = fs::remove_file(&update.staged_path);
                tracing::debug!(extension = %name, "dropped stale pending update");
                true
            }
            None => false,
        }
    }

    pub fn pending_updates(&self) -> Vec<PendingUpdate> {
        self.pending
            .lock()
            .ok()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedExtension>> {
        self.extensions.read().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.extensions
            .read()
            .ok()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|e| e.is_enabled()).unwrap_or(false)
    }

    /// Content hash of the live instance, if one is loaded under this name.
    pub fn content_hash(&self, name: &str) -> Option<BundleHash> {
        self.get(name).map(|e| e.descriptor().content_hash)
    }

    pub fn list(&self) -> Vec<ExtensionStatus> {
        let pending_names: Vec<String> = self
            .pending
            .lock()
            .ok()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();

        let mut out: Vec<ExtensionStatus> = self
            .extensions
            .read()
            .ok()
            .map(|extensions| {
                extensions
                    .values()
                    .map(|e| ExtensionStatus {
                        name: e.name().to_string(),
                        version: e.descriptor().version.clone(),
                        enabled: e.is_enabled(),
                        loaded: e.is_loaded(),
                        update_pending: pending_names.contains(&e.name().to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Full description of one extension as JSON, for the admin surface.
    pub fn describe(&self, name: &str) -> Result<serde_json::Value, ExtensionError> {
        let extension = self
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        let d = extension.descriptor();
        let pending = self
            .pending
            .lock()
            .ok()
            .and_then(|p| p.get(name).map(|u| u.new_hash.to_string()));

        Ok(serde_json::json!({
            "name": d.name,
            "version": d.version,
            "author": d.author,
            "description": d.description,
            "entry-symbol": d.entry_symbol,
            "content-hash": d.content_hash.to_string(),
            "enabled": extension.is_enabled(),
            "loaded": extension.is_loaded(),
            "last-load-error": extension.last_load_error(),
            "pending-update-hash": pending,
        }))
    }

    /// Shutdown step: disable hooks for every loaded extension, drop all
    /// instances and libraries, and clear the pending queue. Returns the
    /// number of extensions that were torn down.
    pub fn shutdown_extensions(&self) -> usize {
        let drained: Vec<(String, Arc<LoadedExtension>)> = match self.extensions.write() {
            Ok(mut extensions) => extensions.drain().collect(),
            Err(_) => {
                tracing::error!("extension table lock poisoned during shutdown");
                return 0;
            }
        };

        let count = drained.len();
        for (name, extension) in drained {
            self.bus.unregister_all(&name);
            self.commands.unregister_all(&name);
            if extension.is_enabled() {
                self.run_disable_hook(&name, extension.instance());
            }
        }

        if let Ok(mut pending) = self.pending.lock() {
            for update in pending.values() {
                let _ = fs::remove_file(&update.staged_path);
            }
            pending.clear();
        }
        count
    }

    fn run_enable_hook(
        &self,
        instance: &Arc<dyn Extension>,
        ctx: &ExtensionContext,
    ) -> Result<(), String> {
        match catch_unwind(AssertUnwindSafe(|| instance.on_enable(ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("enable hook panicked: {}", panic_message(&panic))),
        }
    }

    fn run_disable_hook(&self, name: &str, instance: &Arc<dyn Extension>) {
        match catch_unwind(AssertUnwindSafe(|| instance.on_disable())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(extension = %name, "disable hook failed: {}", e);
            }
            Err(panic) => {
                tracing::warn!(
                    extension = %name,
                    "disable hook panicked: {}",
                    panic_message(&panic)
                );
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
