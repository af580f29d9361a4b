//! Shared test fixture: a scripted bundle loader
//!
//! Bundles are plain text files with `key=value` lines; the loader parses
//! the staged copy instead of mapping a shared library. Recognized keys:
//! `name`, `version`, `cmd`, `reply`, and `fail` (`constructor` or
//! `enable`). Per-extension counters record enable/disable/event activity.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use ember_bot::application::errors::ExtensionError;
use ember_bot::domain::entities::{Command, MessageReceivedEvent};
use ember_bot::domain::traits::BotInfo;
use ember_bot::extensions::{
    BundleLoader, BundleWatcher, CommandRegistry, EventBus, Extension, ExtensionContext,
    ExtensionHost, ExtensionMeta, LoadedBundle,
};

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

#[derive(Default)]
pub struct Counters {
    pub enables: AtomicU32,
    pub disables: AtomicU32,
    pub events: AtomicU32,
}

impl Counters {
    pub fn enables(&self) -> u32 {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disables(&self) -> u32 {
        self.disables.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> u32 {
        self.events.load(Ordering::SeqCst)
    }
}

struct ScriptedExtension {
    name: String,
    version: String,
    command: Option<String>,
    reply: String,
    fail_enable: bool,
    counters: Arc<Counters>,
}

impl Extension for ScriptedExtension {
    fn meta(&self) -> ExtensionMeta {
        ExtensionMeta {
            name: self.name.clone(),
            version: self.version.clone(),
            author: "test".to_string(),
            description: "scripted test extension".to_string(),
        }
    }

    fn on_enable(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        if let Some(command) = &self.command {
            let reply = self.reply.clone();
            ctx.register_command(Command::new(command).with_handler(move |_| Ok(reply.clone())))
                .map_err(|e| ExtensionError::Enable(e.to_string()))?;
        }

        let counters = self.counters.clone();
        ctx.register_handler::<MessageReceivedEvent, _>(0, false, move |_| {
            counters.events.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .map_err(|e| ExtensionError::Enable(e.to_string()))?;

        // Fail AFTER registering, so all-or-nothing rollback is observable.
        if self.fail_enable {
            return Err(ExtensionError::Enable("scripted enable failure".to_string()));
        }

        self.counters.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_disable(&self) -> Result<(), ExtensionError> {
        self.counters.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Loads scripted text bundles. Counts every load attempt.
pub struct ScriptedLoader {
    counters: Mutex<HashMap<String, Arc<Counters>>>,
    attempts: AtomicU32,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Counters shared with every instance loaded under `name`.
    pub fn counters_for(&self, name: &str) -> Arc<Counters> {
        self.counters
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl BundleLoader for ScriptedLoader {
    fn load(&self, staged_path: &Path) -> Result<LoadedBundle, ExtensionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let content = fs::read_to_string(staged_path)
            .map_err(|e| ExtensionError::Load(format!("unreadable bundle: {}", e)))?;
        let fields: HashMap<&str, &str> = content
            .lines()
            .filter_map(|line| line.split_once('='))
            .collect();

        if fields.get("fail").copied() == Some("constructor") {
            return Err(ExtensionError::Load("scripted constructor failure".to_string()));
        }

        let name = fields
            .get("name")
            .copied()
            .ok_or_else(|| ExtensionError::Load("bundle missing name".to_string()))?
            .to_string();

        let extension = ScriptedExtension {
            counters: self.counters_for(&name),
            name,
            version: fields.get("version").copied().unwrap_or("1").to_string(),
            command: fields.get("cmd").map(|s| s.to_string()),
            reply: fields.get("reply").copied().unwrap_or("ok").to_string(),
            fail_enable: fields.get("fail").copied() == Some("enable"),
        };

        Ok(LoadedBundle {
            instance: Arc::new(extension),
            library: None,
        })
    }
}

pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub bundle_dir: PathBuf,
    pub bus: Arc<EventBus>,
    pub commands: Arc<CommandRegistry>,
    pub loader: Arc<ScriptedLoader>,
    pub host: Arc<ExtensionHost>,
    pub watcher: Arc<BundleWatcher>,
}

impl Fixture {
    pub fn new() -> Self {
        ensure_init();
        let tmp = tempfile::tempdir().unwrap();
        let bundle_dir = tmp.path().join("bundles");
        fs::create_dir_all(&bundle_dir).unwrap();

        let bus = Arc::new(EventBus::new());
        let commands = Arc::new(CommandRegistry::new());
        let loader = Arc::new(ScriptedLoader::new());
        let host = Arc::new(ExtensionHost::new(
            bus.clone(),
            commands.clone(),
            loader.clone(),
            BotInfo {
                id: "test".to_string(),
                name: "ember-bot".to_string(),
                version: "0.0.0".to_string(),
            },
            tmp.path().join("staging"),
        ));
        let watcher = Arc::new(BundleWatcher::new(bundle_dir.clone(), host.clone()));

        Self {
            tmp,
            bundle_dir,
            bus,
            commands,
            loader,
            host,
            watcher,
        }
    }

    pub fn write_bundle(&self, file: &str, body: &str) {
        fs::write(self.bundle_dir.join(file), body).unwrap();
    }

    pub fn remove_bundle(&self, file: &str) {
        fs::remove_file(self.bundle_dir.join(file)).unwrap();
    }

    pub fn staged_files(&self) -> usize {
        match fs::read_dir(self.host.staging_dir()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}
