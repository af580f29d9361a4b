//! Domain entities

mod command;
mod event;
mod message;

pub use command::{Command, CommandHandler};
pub use event::{BotReadyEvent, ChatJoinedEvent, ChatLeftEvent, Event, MessageReceivedEvent};
pub use message::{Content, Message};
