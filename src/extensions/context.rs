//! Extension context - the capability facade handed to each extension
//!
//! Holds nothing but the owning extension's name and handles to the shared
//! dispatch and command tables. Ownership is implicit in every call, so an
//! extension cannot register or unregister on another extension's behalf.

use std::sync::Arc;

use crate::application::errors::{BotError, CommandError};
use crate::domain::entities::{Command, Event};
use crate::domain::traits::BotInfo;

use super::events::{EventBus, Listener};
use super::registry::CommandRegistry;

pub struct ExtensionContext {
    extension_name: String,
    bus: Arc<EventBus>,
    commands: Arc<CommandRegistry>,
    bot_info: BotInfo,
}

impl ExtensionContext {
    pub fn new(
        extension_name: impl Into<String>,
        bus: Arc<EventBus>,
        commands: Arc<CommandRegistry>,
        bot_info: BotInfo,
    ) -> Self {
        Self {
            extension_name: extension_name.into(),
            bus,
            commands,
            bot_info,
        }
    }

    /// Name of the extension this context is bound to.
    pub fn extension_name(&self) -> &str {
        &self.extension_name
    }

    /// Host identity, for presence queries.
    pub fn bot_info(&self) -> &BotInfo {
        &self.bot_info
    }

    /// Register a command owned by this extension.
    pub fn register_command(&self, command: Command) -> Result<(), CommandError> {
        self.commands.register(&self.extension_name, command)
    }

    /// Unregister one of this extension's own commands.
    pub fn unregister_command(&self, name: &str) -> Result<(), CommandError> {
        self.commands.unregister(&self.extension_name, name)
    }

    /// Register a typed event handler owned by this extension.
    pub fn register_handler<E, F>(
        &self,
        priority: i32,
        ignore_cancelled: bool,
        f: F,
    ) -> Result<(), BotError>
    where
        E: Event + 'static,
        F: Fn(&mut E) -> Result<(), BotError> + Send + Sync + 'static,
    {
        self.bus
            .register::<E, F>(&self.extension_name, priority, ignore_cancelled, f)
    }

    /// Register every handler a listener declares, owned by this extension.
    pub fn register_listener(&self, listener: &dyn Listener) -> Result<(), BotError> {
        self.bus.register_listener(&self.extension_name, listener)
    }

    /// Namespaced logging sink.
    pub fn log_info(&self, message: &str) {
        tracing::info!(extension = %self.extension_name, "{}", message);
    }

    pub fn log_warn(&self, message: &str) {
        tracing::warn!(extension = %self.extension_name, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        tracing::error!(extension = %self.extension_name, "{}", message);
    }
}
