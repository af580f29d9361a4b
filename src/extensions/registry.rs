//! Command registry - owner-scoped, case-insensitive command bindings
//!
//! Every binding records the extension that registered it; unloading an
//! extension removes its bindings en masse, and no extension can remove
//! another's.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::application::errors::CommandError;
use crate::domain::entities::{Command, Content, Message};

/// Owner reserved for commands registered by the host itself.
pub const HOST_OWNER: &str = "host";

/// A command bound to its owning extension.
pub struct CommandBinding {
    pub owner: String,
    pub command: Command,
}

/// Registry for command bindings, keyed by lowercased command name.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, CommandBinding>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Register a command under `owner`. Names are case-insensitive unique.
    pub fn register(&self, owner: &str, command: Command) -> Result<(), CommandError> {
        let key = command.name.to_lowercase();
        let mut commands = self
            .commands
            .write()
            .map_err(|_| CommandError::ExecutionFailed("command table lock poisoned".to_string()))?;

        if commands.contains_key(&key) {
            return Err(CommandError::Duplicate(command.name));
        }

        tracing::debug!(extension = owner, command = %command.name, "registered command");
        commands.insert(
            key,
            CommandBinding {
                owner: owner.to_string(),
                command,
            },
        );
        Ok(())
    }

    /// Remove one command, only if `owner` registered it.
    pub fn unregister(&self, owner: &str, name: &str) -> Result<(), CommandError> {
        let key = name.to_lowercase();
        let mut commands = self
            .commands
            .write()
            .map_err(|_| CommandError::ExecutionFailed("command table lock poisoned".to_string()))?;

        match commands.get(&key) {
            None => Err(CommandError::NotFound(name.to_string())),
            Some(binding) if binding.owner != owner => Err(CommandError::PermissionDenied),
            Some(_) => {
                commands.remove(&key);
                Ok(())
            }
        }
    }

    /// Remove every command belonging to `owner`. Returns the number removed.
    pub fn unregister_all(&self, owner: &str) -> usize {
        let mut commands = match self.commands.write() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!("command table lock poisoned during unregister");
                return 0;
            }
        };
        let before = commands.len();
        commands.retain(|_, binding| binding.owner != owner);
        let removed = before - commands.len();
        if removed > 0 {
            tracing::debug!(extension = owner, count = removed, "unregistered commands");
        }
        removed
    }

    /// Execute the command a message invokes, if any.
    pub fn handle(&self, message: &Message) -> Result<Option<String>, CommandError> {
        let Content::Command { name, .. } = &message.content else {
            return Ok(None);
        };

        // Clone the handler out of the lock so it can re-enter the registry.
        let handler = {
            let commands = self.commands.read().map_err(|_| {
                CommandError::ExecutionFailed("command table lock poisoned".to_string())
            })?;
            let binding = commands
                .get(&name.to_lowercase())
                .or_else(|| commands.values().find(|b| b.command.matches(name)))
                .ok_or_else(|| CommandError::NotFound(name.clone()))?;
            match &binding.command.handler {
                Some(h) => h.clone(),
                None => {
                    return Ok(Some(format!("Command {} not implemented", binding.command.name)))
                }
            }
        };

        Ok(Some(handler(message.clone())?))
    }

    /// Owning extension of a command, if registered.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.commands
            .read()
            .ok()?
            .get(&name.to_lowercase())
            .map(|b| b.owner.clone())
    }

    /// (name, description) pairs for every registered command, sorted.
    pub fn summaries(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .commands
            .read()
            .ok()
            .map(|commands| {
                commands
                    .values()
                    .map(|b| {
                        (
                            b.command.name.clone(),
                            b.command.description.clone().unwrap_or_default(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.commands.read().ok().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of commands owned by `owner`.
    pub fn commands_for(&self, owner: &str) -> usize {
        self.commands
            .read()
            .ok()
            .map(|c| c.values().filter(|b| b.owner == owner).count())
            .unwrap_or(0)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
