//! Hot-reload watcher - keeps loaded extensions consistent with the bundle
//! directory
//!
//! A periodic sweep classifies every bundle file by content hash:
//! new files are staged and loaded, changed files reload immediately when
//! the target extension is disabled or queue a pending update when it is
//! enabled, and files that previously failed are retried only once their
//! hash changes. Removing a file only unbinds it from update tracking; the
//! live instance stays loaded until explicitly unloaded or shutdown.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::application::errors::ExtensionError;

use super::hash::{digest_file, BundleHash};
use super::host::ExtensionHost;

/// A bundle that failed to load, keyed by the content hash of the attempt.
/// Never retried until the hash changes; prevents tight-loop thrashing on a
/// permanently broken bundle.
#[derive(Debug, Clone)]
pub struct FailedBundleRecord {
    pub bundle_path: PathBuf,
    pub content_hash: BundleHash,
    pub last_attempt: DateTime<Utc>,
    pub reason: String,
}

pub struct BundleWatcher {
    bundle_dir: PathBuf,
    host: Arc<ExtensionHost>,
    /// bundle file -> extension name loaded from it
    bound: Mutex<HashMap<PathBuf, String>>,
    failed: Mutex<HashMap<PathBuf, FailedBundleRecord>>,
    shutting_down: AtomicBool,
}

impl BundleWatcher {
    pub fn new(bundle_dir: impl Into<PathBuf>, host: Arc<ExtensionHost>) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            host,
            bound: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &Arc<ExtensionHost> {
        &self.host
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// One pass over the bundle directory. A single bundle's failure never
    /// aborts the sweep.
    pub fn sweep(&self) {
        if self.is_shutting_down() {
            return;
        }

        let entries = match fs::read_dir(&self.bundle_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    "cannot read bundle directory {}: {}",
                    self.bundle_dir.display(),
                    e
                );
                return;
            }
        };

        let mut seen: HashSet<PathBuf> = HashSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("failed to read directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !is_bundle_file(&path) {
                continue;
            }
            seen.insert(path.clone());
            self.sweep_bundle(&path);
        }

        // Files removed from the store: stop tracking updates, but leave the
        // live instance alone. Only explicit unload or shutdown removes it.
        if let Ok(mut bound) = self.bound.lock() {
            bound.retain(|path, name| {
                if seen.contains(path) {
                    true
                } else {
                    tracing::info!(
                        extension = %name,
                        "bundle file {} removed; unbinding (instance stays loaded)",
                        path.display()
                    );
                    false
                }
            });
        }
        if let Ok(mut failed) = self.failed.lock() {
            failed.retain(|path, _| seen.contains(path));
        }

        // Recurring reminder for every update still waiting on a disable.
        for update in self.host.pending_updates() {
            tracing::warn!(
                extension = %update.extension_name,
                new_hash = %update.new_hash.short(),
                "update pending since {}; disable the extension to apply it",
                update.detected_at.format("%H:%M:%S")
            );
        }
    }

    fn sweep_bundle(&self, path: &Path) {
        let hash = match digest_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!("bundle {} unreadable, skipping: {}", path.display(), e);
                return;
            }
        };

        let bound_name = self
            .bound
            .lock()
            .ok()
            .and_then(|bound| bound.get(path).cloned());

        if let Some(name) = bound_name {
            match self.host.content_hash(&name) {
                // Unloaded through the admin surface; the file is unknown again.
                None => {
                    if let Ok(mut bound) = self.bound.lock() {
                        bound.remove(path);
                    }
                    self.try_load(path, hash);
                }
                Some(live) if live == hash => {
                    // Unchanged (or reverted to the running content).
                    self.host.drop_pending(&name);
                }
                Some(_) if self.host.is_enabled(&name) => {
                    match self.host.record_pending(&name, path, hash) {
                        Ok(true) => {
                            tracing::warn!(
                                extension = %name,
                                new_hash = %hash.short(),
                                "bundle changed while enabled; update queued"
                            );
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(extension = %name, "could not stage pending update: {}", e);
                        }
                    }
                }
                Some(_) => {
                    tracing::info!(extension = %name, "bundle changed; reloading disabled extension");
                    if let Err(e) = self.host.unload(&name) {
                        tracing::warn!(extension = %name, "unload before reload failed: {}", e);
                    }
                    if let Ok(mut bound) = self.bound.lock() {
                        bound.remove(path);
                    }
                    self.try_load(path, hash);
                }
            }
            return;
        }

        if let Ok(failed) = self.failed.lock() {
            if let Some(record) = failed.get(path) {
                if record.content_hash == hash {
                    return;
                }
                tracing::info!(
                    "bundle {} changed since failed attempt; retrying",
                    path.display()
                );
            }
        }
        if let Ok(mut failed) = self.failed.lock() {
            failed.remove(path);
        }

        self.try_load(path, hash);
    }

    fn try_load(&self, path: &Path, hash: BundleHash) {
        let staged = match self.host.stage_bundle(path, &hash) {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!("could not stage bundle {}: {}", path.display(), e);
                return;
            }
        };

        match self.host.load_staged(&staged, hash) {
            Ok(name) => {
                if let Ok(mut bound) = self.bound.lock() {
                    bound.insert(path.to_path_buf(), name);
                }
            }
            // The file holds exactly the code already running under this
            // name (e.g. it was removed and dropped back in). Rebind it.
            Err(ExtensionError::AlreadyLoaded(name))
                if self.host.content_hash(&name) == Some(hash) =>
            {
                tracing::info!(extension = %name, "rebound bundle file {}", path.display());
                if let Ok(mut bound) = self.bound.lock() {
                    bound.insert(path.to_path_buf(), name);
                }
            }
            Err(e) => {
                tracing::warn!("bundle {} failed to load: {}", path.display(), e);
                if let Ok(mut failed) = self.failed.lock() {
                    failed.insert(
                        path.to_path_buf(),
                        FailedBundleRecord {
                            bundle_path: path.to_path_buf(),
                            content_hash: hash,
                            last_attempt: Utc::now(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    pub fn failed_bundles(&self) -> Vec<FailedBundleRecord> {
        self.failed
            .lock()
            .ok()
            .map(|failed| failed.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bound_bundles(&self) -> Vec<(PathBuf, String)> {
        self.bound
            .lock()
            .ok()
            .map(|bound| bound.iter().map(|(p, n)| (p.clone(), n.clone())).collect())
            .unwrap_or_default()
    }

    /// Tear everything down. Safe to call from both the explicit shutdown
    /// path and a process-exit hook; the CAS guard makes the second caller a
    /// no-op.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("shutdown already in progress");
            return;
        }

        tracing::info!("shutting down extension runtime");
        let count = self.host.shutdown_extensions();
        tracing::info!(count, "extensions disabled");

        // Give the OS a moment to release handles from unmapped libraries.
        std::thread::sleep(Duration::from_millis(100));

        self.remove_staging_dir();

        if let Ok(mut bound) = self.bound.lock() {
            bound.clear();
        }
        if let Ok(mut failed) = self.failed.lock() {
            failed.clear();
        }
    }

    /// Remove the staging area with retry and exponential backoff. Handles
    /// may still be held transiently; on exhaustion the leftover path is
    /// logged and shutdown continues.
    fn remove_staging_dir(&self) {
        let staging = self.host.staging_dir();
        let mut delay = Duration::from_millis(100);
        for attempt in 1..=4 {
            match fs::remove_dir_all(staging) {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        "could not remove staging dir {}: {}",
                        staging.display(),
                        e
                    );
                }
            }
            std::thread::sleep(delay);
            delay *= 2;
        }
        tracing::warn!(
            "leaving staging dir {} for best-effort cleanup on next start",
            staging.display()
        );
    }

    /// Drive sweeps on a fixed interval. Sweeps never overlap (each one is
    /// awaited), and a panicking sweep does not stop the next tick.
    pub fn run(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.is_shutting_down() {
                    break;
                }
                let watcher = self.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || watcher.sweep()).await {
                    tracing::error!("sweep task panicked: {}", e);
                }
            }
        })
    }
}

fn is_bundle_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("so") | Some("dll") | Some("dylib")
    )
}
