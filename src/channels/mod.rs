//! Chat platform I/O for the counting channel.

pub mod channel;
pub mod discord;

pub use channel::*;
pub use discord::DiscordChannel;
