//! Domain events routed through the extension event bus
//!
//! Events are matched to handlers by their concrete runtime type. Handlers
//! receive `&mut dyn Event` and may downcast through [`Event::as_any_mut`];
//! the typed registration helpers on the bus do this downcast for them.

use std::any::Any;

use super::Message;

/// A typed event routed to extension handlers.
pub trait Event: Any + Send {
    /// Human-readable event name, used in logs.
    fn name(&self) -> &'static str;

    /// Whether an earlier handler in the same dispatch marked this event
    /// cancelled. Cancellation is cooperative: handlers registered with
    /// `ignore_cancelled` are skipped, everyone else still runs.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Mark the event cancelled. No-op for events that do not support it.
    fn set_cancelled(&mut self, _cancelled: bool) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An inbound chat message. Cancellable: a handler may swallow the message
/// before command parsing sees it.
pub struct MessageReceivedEvent {
    pub message: Message,
    cancelled: bool,
}

impl MessageReceivedEvent {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            cancelled: false,
        }
    }
}

impl Event for MessageReceivedEvent {
    fn name(&self) -> &'static str {
        "message-received"
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The bot joined a chat.
pub struct ChatJoinedEvent {
    pub chat_id: String,
}

impl Event for ChatJoinedEvent {
    fn name(&self) -> &'static str {
        "chat-joined"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The bot left a chat.
pub struct ChatLeftEvent {
    pub chat_id: String,
}

impl Event for ChatLeftEvent {
    fn name(&self) -> &'static str {
        "chat-left"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Emitted once after the host finishes starting up.
pub struct BotReadyEvent {
    pub bot_name: String,
}

impl Event for BotReadyEvent {
    fn name(&self) -> &'static str {
        "bot-ready"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
