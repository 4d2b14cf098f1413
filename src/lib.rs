//! Countwarden — moderation engine for a counting channel.

pub mod channels;
pub mod config;
pub mod error;
pub mod expr;
pub mod logging;
pub mod pipeline;
pub mod recognition;
pub mod store;

#[doc(hidden)]
pub mod testing;
