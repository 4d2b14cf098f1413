//! `StatsStore` trait — per-user counters persisted across restarts.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::DatabaseError;

/// Counter incremented for every accepted count.
pub const AMOUNT_COUNTED: &str = "amountCounted";

/// counter name → count
pub type UserStats = BTreeMap<String, i64>;

/// Backend-agnostic statistics store.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Increment one counter for a user. Returns the new count.
    async fn increment(&self, user_id: &str, counter: &str) -> Result<i64, DatabaseError>;

    /// All counters for a user (empty if none).
    async fn read(&self, user_id: &str) -> Result<UserStats, DatabaseError>;

    /// Remember that `message_id` was accepted as `value`.
    ///
    /// Returns `false` if the message was already recorded, so callers can
    /// skip a second increment.
    async fn record_accepted(
        &self,
        message_id: &str,
        user_id: &str,
        value: i64,
    ) -> Result<bool, DatabaseError>;

    /// Add counts from a legacy `{ user: { counter: n } }` export.
    /// Returns the number of (user, counter) pairs imported.
    async fn import_legacy(
        &self,
        stats: &BTreeMap<String, UserStats>,
    ) -> Result<usize, DatabaseError>;
}

/// Parse a legacy JSON stats export.
pub fn parse_legacy_stats(json: &str) -> Result<BTreeMap<String, UserStats>, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::Serialization(e.to_string()))
}
