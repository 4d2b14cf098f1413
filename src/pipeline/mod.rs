//! Counting pipeline.
//!
//! Every channel event flows through:
//! 1. `event_loop::run()` — single consumer, arrival order
//! 2. `Moderator::handle_event()` — bots ignored, commands answered
//! 3. `Moderator::decide()` / `Moderator::reconcile()` — the counting rules
//! 4. `audit::record()` — one audit record per outcome

pub mod audit;
pub mod commands;
pub mod event_loop;
pub mod moderator;
pub mod resolver;
pub mod state;
pub mod types;

pub use moderator::{Moderator, ModeratorDeps};
pub use state::{CountingState, StateSnapshot};
pub use types::{Candidate, Decision, ReconcileOutcome, RejectReason};
