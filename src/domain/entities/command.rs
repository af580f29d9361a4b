/// Represents a bot command
pub struct Command {
    pub name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub usage: Option<String>,
    pub handler: Option<CommandHandler>,
}

/// Command handler function type. `Arc` so the registry can clone the
/// handler out of its lock before invoking it; a handler is then free to
/// call back into the registry.
pub type CommandHandler = std::sync::Arc<
    dyn Fn(crate::domain::entities::Message) -> Result<String, crate::application::errors::CommandError>
        + Send
        + Sync,
>;

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            aliases: Vec::new(),
            usage: None,
            handler: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(crate::domain::entities::Message) -> Result<String, crate::application::errors::CommandError>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(std::sync::Arc::new(handler));
        self
    }

    /// Case-insensitive match against the name or any alias
    pub fn matches(&self, input: &str) -> bool {
        let input_lower = input.to_lowercase();
        self.name.to_lowercase() == input_lower
            || self.aliases.iter().any(|a| a.to_lowercase() == input_lower)
    }
}
