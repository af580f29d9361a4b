//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Extension runtime errors
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("Load failed: {0}")]
    Load(String),

    #[error("Enable hook failed: {0}")]
    Enable(String),

    #[error("Disable hook failed: {0}")]
    Disable(String),

    #[error("Extension '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Staging error: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Command '{0}' is already registered")]
    Duplicate(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied")]
    PermissionDenied,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
