//! Command service - prefix parsing plus the host's built-in commands

use std::sync::Arc;

use once_cell::sync::Lazy;
use std::time::Instant;

use crate::application::errors::CommandError;
use crate::domain::entities::{Command, Content, Message};
use crate::extensions::{BundleWatcher, CommandRegistry, ExtensionHost, HOST_OWNER};

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Service for parsing and executing commands against the shared registry.
pub struct CommandService {
    registry: Arc<CommandRegistry>,
    prefix: String,
}

impl CommandService {
    pub fn new(prefix: impl Into<String>, registry: Arc<CommandRegistry>) -> Self {
        // Pin the start time before anything else asks for uptime.
        Lazy::force(&START_TIME);
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse a raw text line into a command invocation and execute it.
    /// Returns `Ok(None)` for lines that are not commands.
    pub fn handle_text(
        &self,
        chat_id: impl Into<String>,
        text: &str,
    ) -> Result<Option<String>, CommandError> {
        let Some(rest) = text.strip_prefix(&self.prefix) else {
            return Ok(None);
        };
        let mut parts = rest.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<String> = parts.map(|s| s.to_string()).collect();

        let message = Message::from_command(chat_id, name, args);
        self.handle(&message)
    }

    pub fn handle(&self, message: &Message) -> Result<Option<String>, CommandError> {
        self.registry.handle(message)
    }

    /// Built-in commands every host carries.
    pub fn register_defaults(&self) -> Result<(), CommandError> {
        let registry = self.registry.clone();
        self.registry.register(
            HOST_OWNER,
            Command::new("help")
                .with_description("Show available commands")
                .with_usage("/help")
                .with_handler(move |_| {
                    let mut help = "Available commands:\n".to_string();
                    for (name, description) in registry.summaries() {
                        help.push_str(&format!("  /{} - {}\n", name, description));
                    }
                    Ok(help)
                }),
        )?;

        self.registry.register(
            HOST_OWNER,
            Command::new("version")
                .with_description("Show bot version")
                .with_handler(|_| Ok(format!("ember-bot v{}", env!("CARGO_PKG_VERSION")))),
        )?;

        Ok(())
    }

    /// The `ext` admin command and the `status` overview, wired to the
    /// extension runtime.
    pub fn register_host_commands(
        &self,
        host: Arc<ExtensionHost>,
        watcher: Arc<BundleWatcher>,
    ) -> Result<(), CommandError> {
        let h = host.clone();
        self.registry.register(
            HOST_OWNER,
            Command::new("status")
                .with_description("Show host status")
                .with_handler(move |_| {
                    let uptime = START_TIME.elapsed().as_secs();
                    Ok(format!(
                        "ember-bot v{}\nUptime: {}s\nExtensions loaded: {}\nEvent handlers: {}",
                        env!("CARGO_PKG_VERSION"),
                        uptime,
                        h.names().len(),
                        h.event_bus().handler_count(),
                    ))
                }),
        )?;

        self.registry.register(
            HOST_OWNER,
            Command::new("ext")
                .with_description("Manage extensions")
                .with_usage("/ext <list|describe|enable|disable|unload|pending|failed> [name]")
                .with_handler(move |msg| ext_command(&host, &watcher, &msg)),
        )?;

        Ok(())
    }
}

fn ext_command(
    host: &Arc<ExtensionHost>,
    watcher: &Arc<BundleWatcher>,
    msg: &Message,
) -> Result<String, CommandError> {
    let Content::Command { args, .. } = &msg.content else {
        return Err(CommandError::InvalidArgs("not a command invocation".to_string()));
    };

    let usage = "Usage: /ext <list|describe|enable|disable|unload|pending|failed> [name]";
    match (args.first().map(|s| s.as_str()), args.get(1)) {
        (Some("list"), _) | (None, _) => {
            let statuses = host.list();
            if statuses.is_empty() {
                return Ok("No extensions loaded.".to_string());
            }
            let mut out = "Extensions:\n".to_string();
            for s in statuses {
                out.push_str(&format!(
                    "  {} v{} [{}]{}\n",
                    s.name,
                    s.version,
                    if s.enabled { "enabled" } else { "disabled" },
                    if s.update_pending { " (update pending)" } else { "" },
                ));
            }
            Ok(out)
        }
        (Some("describe"), Some(name)) => {
            let value = host
                .describe(name)
                .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
            serde_json::to_string_pretty(&value)
                .map_err(|e| CommandError::ExecutionFailed(e.to_string()))
        }
        (Some("enable"), Some(name)) => {
            host.enable(name)
                .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
            Ok(format!("Enabled: {}", name))
        }
        (Some("disable"), Some(name)) => {
            host.disable(name)
                .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
            Ok(format!("Disabled: {}", name))
        }
        (Some("unload"), Some(name)) => {
            host.unload(name)
                .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
            Ok(format!("Unloaded: {}", name))
        }
        (Some("pending"), _) => {
            let pending = host.pending_updates();
            if pending.is_empty() {
                return Ok("No pending updates.".to_string());
            }
            let mut out = "Pending updates:\n".to_string();
            for p in pending {
                out.push_str(&format!(
                    "  {} -> {} (detected {})\n",
                    p.extension_name,
                    p.new_hash.short(),
                    p.detected_at.format("%Y-%m-%d %H:%M:%S"),
                ));
            }
            Ok(out)
        }
        (Some("failed"), _) => {
            let failed = watcher.failed_bundles();
            if failed.is_empty() {
                return Ok("No failed bundles.".to_string());
            }
            let mut out = "Failed bundles:\n".to_string();
            for f in failed {
                out.push_str(&format!(
                    "  {} ({}): {}\n",
                    f.bundle_path.display(),
                    f.content_hash.short(),
                    f.reason,
                ));
            }
            Ok(out)
        }
        _ => Ok(usage.to_string()),
    }
}
