//! Domain traits

mod bot;

pub use bot::{Bot, BotInfo};
