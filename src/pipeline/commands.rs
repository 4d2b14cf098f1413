//! Member commands posted in the counting channel.
//!
//! Commands are answered by direct message and the command message itself is
//! deleted, so it never takes part in the chain.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::{AMOUNT_COUNTED, UserStats};

static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*!(stats|help)\s*$").unwrap());

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stats,
    Help,
}

impl Command {
    /// Parse a whole message as a command. Anything else is `None`.
    pub fn parse(content: &str) -> Option<Self> {
        let caps = COMMAND.captures(content)?;
        match caps[1].to_ascii_lowercase().as_str() {
            "stats" => Some(Self::Stats),
            "help" => Some(Self::Help),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Help => "help",
        }
    }
}

pub const HELP_TEXT: &str = "\
How counting works:
- Post the next number. Plain numbers and expressions like `2*3`, `2^3`, `4!`, `(1+2)*3`, `0x10` all count.
- You can also post an image of the number.
- You can't count twice in a row.
- Wrong numbers are deleted. Editing a counted message to another value gets it removed.
Commands: `!stats` for your counts, `!help` for this message.";

/// Render a member's counters for a DM.
pub fn format_stats(name: &str, stats: &UserStats) -> String {
    let counted = stats.get(AMOUNT_COUNTED).copied().unwrap_or(0);
    let mut out = format!("Stats for {name}:\nNumbers counted: {counted}");
    for (counter, count) in stats.iter().filter(|(k, _)| k.as_str() != AMOUNT_COUNTED) {
        out.push_str(&format!("\n{counter}: {count}"));
    }
    out
}
