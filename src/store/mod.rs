//! Persistence layer — libSQL-backed per-user counting statistics.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AMOUNT_COUNTED, StatsStore, UserStats, parse_legacy_stats};
