//! Single consumer of channel events.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channels::EventStream;
use crate::pipeline::moderator::Moderator;

/// Feed every event to the moderator, one at a time, in arrival order.
///
/// Returns when the stream ends.
pub async fn run(moderator: Arc<Moderator>, mut events: EventStream) {
    info!("Event loop started");
    let mut handled = 0u64;
    while let Some(event) = events.next().await {
        moderator.handle_event(event).await;
        handled += 1;
        debug!(handled, "Event handled");
    }
    info!(handled, "Event stream ended");
}

/// Run the event loop on its own task.
pub fn spawn(moderator: Arc<Moderator>, events: EventStream) -> JoinHandle<()> {
    tokio::spawn(run(moderator, events))
}
