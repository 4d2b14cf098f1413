//! Moderator — judges every message in the counting channel.
//!
//! All decisions run against one `CountingState` guarded by an async mutex
//! that is held across every await of `decide`, `reconcile` and
//! `resynchronize`. A decision for M2 therefore always observes the state
//! left behind by M1, even when callers race.
//!
//! Flow for a new message:
//! 1. Author distinctness
//! 2. Previous value (cached, or resolved from the stored head)
//! 3. Text evaluation
//! 4. Image recognition
//! 5. Accept (advance + stats) or reject (delete + resync)

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::channels::{Author, ChannelEvent, ChatMessage, CountingChannel};
use crate::config::PipelineConfig;
use crate::error::ChannelError;
use crate::expr::evaluate;
use crate::pipeline::audit;
use crate::pipeline::commands::{Command, HELP_TEXT, format_stats};
use crate::pipeline::resolver::Resolver;
use crate::pipeline::state::{CountingState, StateSnapshot};
use crate::pipeline::types::{Candidate, Decision, ReconcileOutcome, RejectReason};
use crate::recognition::TextRecognizer;
use crate::store::{AMOUNT_COUNTED, StatsStore};

/// Collaborators the moderator talks to.
pub struct ModeratorDeps {
    pub channel: Arc<dyn CountingChannel>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub stats: Arc<dyn StatsStore>,
}

pub struct Moderator {
    channel: Arc<dyn CountingChannel>,
    resolver: Resolver,
    stats: Arc<dyn StatsStore>,
    config: PipelineConfig,
    state: Mutex<CountingState>,
    snapshot: watch::Sender<StateSnapshot>,
}

impl Moderator {
    /// Build a moderator around an already known state.
    pub fn with_state(deps: ModeratorDeps, config: PipelineConfig, state: CountingState) -> Self {
        let (snapshot, _) = watch::channel(state.snapshot());
        Self {
            channel: deps.channel,
            resolver: Resolver::new(deps.recognizer, &config),
            stats: deps.stats,
            config,
            state: Mutex::new(state),
            snapshot,
        }
    }

    /// Build a moderator and synchronize it with the channel tail.
    ///
    /// Nothing can be decided before this returns.
    pub async fn start(deps: ModeratorDeps, config: PipelineConfig) -> Result<Self, ChannelError> {
        let moderator = Self::with_state(deps, config, CountingState::empty());
        moderator.resynchronize().await?;
        info!(
            channel = moderator.channel.name(),
            state = ?moderator.snapshot(),
            "Moderator started"
        );
        Ok(moderator)
    }

    /// Watch the counting state. Updates after every state change.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot.subscribe()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Route one channel event.
    ///
    /// Bot messages are never judged; commands are answered and removed.
    pub async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::NewMessage(message) => {
                if message.author.bot {
                    debug!(id = %message.id, author = %message.author.name, "Ignoring bot message");
                    return;
                }
                if let Some(command) = Command::parse(&message.content) {
                    self.run_command(command, &message).await;
                    return;
                }
                self.decide(&message).await;
            }
            ChannelEvent::Edited { old, new } => {
                if new.author.bot {
                    debug!(id = %new.id, "Ignoring bot edit");
                    return;
                }
                self.reconcile(&old, &new).await;
            }
        }
    }

    /// Accept or reject a newly posted message.
    ///
    /// Call at most once per message.
    pub async fn decide(&self, message: &ChatMessage) -> Decision {
        let mut state = self.state.lock().await;
        let decision = self.judge(&mut state, message).await;

        match &decision {
            Decision::Accepted(value) => {
                audit::record(message, decision.label(), &value.to_string());
                state.advance(message, *value);
                self.publish(&state);
                self.count_for(message, *value).await;
            }
            Decision::Rejected(reason) => {
                audit::record(message, decision.label(), &reason.to_string());
                if let RejectReason::ImageMismatch {
                    expected,
                    recognized,
                } = reason
                {
                    let text = image_mismatch_notice(*expected, recognized.as_deref());
                    self.notify(&message.author, &text).await;
                }
                self.remove(&mut state, message).await;
            }
        }
        decision
    }

    /// React to an edit of `old` into `new`.
    pub async fn reconcile(&self, old: &ChatMessage, new: &ChatMessage) -> ReconcileOutcome {
        let mut state = self.state.lock().await;

        let Ok(original) = evaluate(&old.content) else {
            debug!(id = %new.id, "Edited message was never a count");
            return ReconcileOutcome::Ignored;
        };

        let outcome = if evaluate(&new.content) == Ok(original) {
            ReconcileOutcome::Unchanged
        } else if state.last_message_id() == Some(new.id.as_str()) {
            if self.remove(&mut state, new).await {
                ReconcileOutcome::HeadPurged
            } else {
                ReconcileOutcome::DeleteFailed
            }
        } else {
            self.notify(&new.author, &edit_notice(original)).await;
            ReconcileOutcome::AuthorNotified
        };

        audit::record(new, outcome.label(), &format!("originally {original}"));
        outcome
    }

    /// Rebuild the state from the channel tail.
    ///
    /// On error the previous state is kept.
    pub async fn resynchronize(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        self.resync_locked(&mut state, None).await
    }

    async fn judge(&self, state: &mut CountingState, message: &ChatMessage) -> Decision {
        // 1. Author distinctness. A bot head imposes no rule.
        if let Some(last) = state.last_author()
            && !last.bot
            && last.id == message.author.id
        {
            return Decision::Rejected(RejectReason::SameAuthor);
        }

        // 2. Previous value
        let Some(previous) = self.previous_value(state).await else {
            return Decision::Rejected(RejectReason::UnknownBaseline);
        };
        let Some(expected) = previous.checked_add(1) else {
            return Decision::Rejected(RejectReason::UnknownBaseline);
        };

        // 3. Text
        let text = evaluate(&message.content);
        if text == Ok(expected) {
            return Decision::Accepted(expected);
        }

        // 4. Image
        if self.resolver.image_attachment(message).is_some() {
            return match self.resolver.resolve_image(message).await {
                Candidate::Image { value, .. } if value == expected => Decision::Accepted(value),
                Candidate::Image { recognized, .. } => {
                    Decision::Rejected(RejectReason::ImageMismatch {
                        expected,
                        recognized: Some(recognized),
                    })
                }
                Candidate::Unknown { recognized } => {
                    Decision::Rejected(RejectReason::ImageMismatch {
                        expected,
                        recognized,
                    })
                }
                Candidate::Text(_) => Decision::Rejected(RejectReason::ImageMismatch {
                    expected,
                    recognized: None,
                }),
            };
        }

        // 5. Wrong or unreadable
        match text {
            Ok(got) => Decision::Rejected(RejectReason::NotNextNumber { expected, got }),
            Err(e) => Decision::Rejected(RejectReason::Unparseable(e)),
        }
    }

    async fn previous_value(&self, state: &mut CountingState) -> Option<i64> {
        if let Some(value) = state.last_value() {
            return Some(value);
        }
        let head = state.last_message()?.clone();
        match self.resolver.resolve(&head, true).await.value() {
            Some(value) => {
                debug!(id = %head.id, value, "Resolved previous value");
                state.cache_value(value);
                self.publish(state);
                Some(value)
            }
            None => {
                warn!(id = %head.id, content = %audit::display_content(&head), "Previous value unknown");
                None
            }
        }
    }

    /// Delete `message` and, if that worked, resync from the messages before it.
    async fn remove(&self, state: &mut CountingState, message: &ChatMessage) -> bool {
        if let Err(e) = self.channel.delete_message(&message.id).await {
            warn!(id = %message.id, error = %e, "Failed to delete message; state left as-is");
            return false;
        }
        if let Err(e) = self.resync_locked(state, Some(message)).await {
            warn!(error = %e, "Resync after deletion failed; keeping previous state");
        }
        true
    }

    /// Pick the newest eligible tail message as the new head.
    ///
    /// With `removed`, only messages posted before it are eligible: anything
    /// newer is still waiting to be judged.
    async fn resync_locked(
        &self,
        state: &mut CountingState,
        removed: Option<&ChatMessage>,
    ) -> Result<(), ChannelError> {
        let limit = self.config.resync_limit.min(self.channel.max_fetch());
        let recent = self.channel.fetch_recent(limit).await?;
        let fetched = recent.len();

        match recent.into_iter().find(|m| self.is_tail_candidate(m, removed)) {
            Some(tail) => {
                info!(id = %tail.id, author = %tail.author.name, "Resynchronized to tail");
                *state = CountingState::from_tail(tail);
            }
            None if fetched < limit => {
                info!("No counted messages in channel; starting from zero");
                *state = CountingState::empty();
            }
            None => {
                warn!(limit, "No eligible tail within resync window; keeping previous state");
                return Ok(());
            }
        }
        self.publish(state);
        Ok(())
    }

    fn is_tail_candidate(&self, message: &ChatMessage, removed: Option<&ChatMessage>) -> bool {
        if self.config.resync_skip_bots && message.author.bot {
            return false;
        }
        if Command::parse(&message.content).is_some() {
            return false;
        }
        match removed {
            Some(r) => message.id != r.id && message.created_at <= r.created_at,
            None => true,
        }
    }

    async fn count_for(&self, message: &ChatMessage, value: i64) {
        let user_id = message.author.id.as_str();
        match self.stats.record_accepted(&message.id, user_id, value).await {
            Ok(false) => {
                debug!(id = %message.id, "Count already recorded");
                return;
            }
            Ok(true) => {}
            Err(e) => warn!(id = %message.id, error = %e, "Failed to record accepted count"),
        }
        match self.stats.increment(user_id, AMOUNT_COUNTED).await {
            Ok(count) => debug!(user_id, count, "Stats updated"),
            Err(e) => warn!(user_id, error = %e, "Failed to update stats"),
        }
    }

    async fn run_command(&self, command: Command, message: &ChatMessage) {
        let reply = match command {
            Command::Help => HELP_TEXT.to_string(),
            Command::Stats => match self.stats.read(&message.author.id).await {
                Ok(stats) => format_stats(&message.author.name, &stats),
                Err(e) => {
                    warn!(user_id = %message.author.id, error = %e, "Failed to read stats");
                    "Your stats are unavailable right now, try again later.".to_string()
                }
            },
        };
        self.notify(&message.author, &reply).await;
        if let Err(e) = self.channel.delete_message(&message.id).await {
            warn!(id = %message.id, error = %e, "Failed to delete command message");
        }
        audit::record(message, "command", command.label());
    }

    async fn notify(&self, author: &Author, text: &str) {
        if let Err(e) = self.channel.send_direct_message(&author.id, text).await {
            warn!(user_id = %author.id, error = %e, "Failed to send direct message");
        }
    }

    fn publish(&self, state: &CountingState) {
        self.snapshot.send_replace(state.snapshot());
    }
}

fn image_mismatch_notice(expected: i64, recognized: Option<&str>) -> String {
    match recognized.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => format!(
            "Your image in the counting channel was removed: it read as \"{text}\", \
             but the next number is {expected}."
        ),
        None => format!(
            "Your image in the counting channel was removed: no number could be read \
             from it. The next number is {expected}."
        ),
    }
}

fn edit_notice(original: i64) -> String {
    format!(
        "You edited a counted message in the counting channel. It originally counted \
         {original}; please change it back so the count stays consistent."
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::store::LibSqlBackend;
    use crate::testing::{MockChannel, MockRecognizer, message};

    fn alice() -> Author {
        Author::member("a", "alice")
    }

    fn bob() -> Author {
        Author::member("b", "bob")
    }

    fn carol() -> Author {
        Author::member("c", "carol")
    }

    struct Harness {
        channel: Arc<MockChannel>,
        stats: Arc<LibSqlBackend>,
        moderator: Moderator,
    }

    async fn harness(
        channel: MockChannel,
        recognizer: MockRecognizer,
        config: PipelineConfig,
        state: CountingState,
    ) -> Harness {
        let channel = Arc::new(channel);
        let stats = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let moderator = Moderator::with_state(
            ModeratorDeps {
                channel: channel.clone(),
                recognizer: Arc::new(recognizer),
                stats: stats.clone(),
            },
            config,
            state,
        );
        Harness {
            channel,
            stats,
            moderator,
        }
    }

    /// Channel holding one accepted `5` by alice, with state pointing at it.
    async fn at_five() -> Harness {
        at_five_with(MockRecognizer::new()).await
    }

    async fn at_five_with(recognizer: MockRecognizer) -> Harness {
        let head = message(1, alice(), "5");
        let channel = MockChannel::with_history(vec![head.clone()]);
        harness(
            channel,
            recognizer,
            PipelineConfig::default(),
            CountingState::accepted(head, 5),
        )
        .await
    }

    #[tokio::test]
    async fn next_number_from_another_member_is_accepted() {
        let h = at_five().await;
        let msg = h.channel.post(message(2, bob(), "6"));

        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(6));

        let snap = h.moderator.snapshot();
        assert_eq!(snap.last_value, Some(6));
        assert_eq!(snap.last_author_id.as_deref(), Some("b"));
        assert_eq!(snap.last_message_id.as_deref(), Some("2"));
        assert_eq!(h.stats.read("b").await.unwrap()[AMOUNT_COUNTED], 1);
        assert!(h.channel.deleted().is_empty());
    }

    #[tokio::test]
    async fn expressions_count() {
        let h = at_five().await;
        let msg = h.channel.post(message(2, bob(), "3!"));
        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(6));

        let msg = h.channel.post(message(3, carol(), "(6/4)*2^2 + 1"));
        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(7));
    }

    #[tokio::test]
    async fn same_author_twice_is_rejected() {
        let h = at_five().await;
        let msg = h.channel.post(message(2, alice(), "6"));

        assert_eq!(
            h.moderator.decide(&msg).await,
            Decision::Rejected(RejectReason::SameAuthor)
        );
        assert_eq!(h.channel.deleted(), vec!["2".to_string()]);
        assert!(h.stats.read("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn words_without_attachment_are_rejected() {
        let h = at_five().await;
        let msg = h.channel.post(message(2, bob(), "five"));

        assert!(matches!(
            h.moderator.decide(&msg).await,
            Decision::Rejected(RejectReason::Unparseable(_))
        ));
        assert_eq!(h.channel.deleted(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn wrong_number_is_rejected() {
        let h = at_five().await;
        let msg = h.channel.post(message(2, bob(), "8"));

        assert_eq!(
            h.moderator.decide(&msg).await,
            Decision::Rejected(RejectReason::NotNextNumber {
                expected: 6,
                got: 8
            })
        );
    }

    #[tokio::test]
    async fn rejection_resyncs_to_the_message_before_it() {
        let h = at_five().await;
        let bad = h.channel.post(message(2, bob(), "9"));
        // Posted after `bad`, not judged yet.
        let pending = h.channel.post(message(3, carol(), "6"));

        assert!(!h.moderator.decide(&bad).await.is_accepted());
        let snap = h.moderator.snapshot();
        assert_eq!(snap.last_message_id.as_deref(), Some("1"));
        assert_eq!(snap.last_value, None);

        assert_eq!(h.moderator.decide(&pending).await, Decision::Accepted(6));
    }

    #[tokio::test]
    async fn image_is_used_when_text_does_not_match() {
        let h = at_five_with(MockRecognizer::new().with_text("https://cdn/6.png", "6")).await;
        let msg = h
            .channel
            .post(message(2, bob(), "").with_attachment("6.png", "https://cdn/6.png"));

        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(6));
        assert!(h.channel.direct_messages().is_empty());
    }

    #[tokio::test]
    async fn matching_text_skips_recognition() {
        let ocr = MockRecognizer::new().with_text("https://cdn/x.png", "42");
        let calls = ocr.calls();
        let h = at_five_with(ocr).await;
        let msg = h
            .channel
            .post(message(2, bob(), "6").with_attachment("x.png", "https://cdn/x.png"));

        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(6));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn image_mismatch_is_explained_by_dm() {
        let h = at_five_with(MockRecognizer::new().with_text("https://cdn/x.png", "8")).await;
        let msg = h
            .channel
            .post(message(2, bob(), "six").with_attachment("x.png", "https://cdn/x.png"));

        assert_eq!(
            h.moderator.decide(&msg).await,
            Decision::Rejected(RejectReason::ImageMismatch {
                expected: 6,
                recognized: Some("8".into())
            })
        );
        let dms = h.channel.direct_messages();
        assert_eq!(dms.len(), 1);
        assert_eq!(dms[0].0, "b");
        assert!(dms[0].1.contains("\"8\""));
        assert_eq!(h.channel.deleted(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn unreadable_image_is_explained_by_dm() {
        let h = at_five().await;
        let msg = h
            .channel
            .post(message(2, bob(), "").with_attachment("x.jpg", "https://cdn/x.jpg"));

        assert_eq!(
            h.moderator.decide(&msg).await,
            Decision::Rejected(RejectReason::ImageMismatch {
                expected: 6,
                recognized: None
            })
        );
        assert!(h.channel.direct_messages()[0].1.contains("no number could be read"));
    }

    #[tokio::test]
    async fn unknown_baseline_rejects() {
        let head = message(1, alice(), "hello");
        let channel = MockChannel::with_history(vec![head.clone()]);
        let h = harness(
            channel,
            MockRecognizer::new(),
            PipelineConfig::default(),
            CountingState::from_tail(head),
        )
        .await;
        let msg = h.channel.post(message(2, bob(), "1"));

        assert_eq!(
            h.moderator.decide(&msg).await,
            Decision::Rejected(RejectReason::UnknownBaseline)
        );
    }

    #[tokio::test]
    async fn baseline_resolved_from_image_once() {
        let ocr = MockRecognizer::new().with_text("https://cdn/9.png", "9");
        let calls = ocr.calls();
        let head = message(1, alice(), "").with_attachment("9.png", "https://cdn/9.png");
        let channel = MockChannel::with_history(vec![head.clone()]);
        let h = harness(
            channel,
            ocr,
            PipelineConfig::default(),
            CountingState::from_tail(head),
        )
        .await;

        let wrong = h.channel.post(message(2, bob(), "11"));
        assert!(!h.moderator.decide(&wrong).await.is_accepted());
        let msg = h.channel.post(message(3, bob(), "10"));
        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(10));
        // Resolved on the first decision, cached until the resync, then again.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_delete_leaves_state_untouched() {
        let h = at_five().await;
        h.channel.set_fail_deletes(true);
        let bad = h.channel.post(message(2, bob(), "7"));

        assert!(!h.moderator.decide(&bad).await.is_accepted());
        let snap = h.moderator.snapshot();
        assert_eq!(snap.last_value, Some(5));
        assert_eq!(snap.last_message_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn failed_resync_keeps_previous_state() {
        let h = at_five().await;
        h.channel.set_fail_fetches(true);
        let bad = h.channel.post(message(2, bob(), "7"));

        assert!(!h.moderator.decide(&bad).await.is_accepted());
        assert_eq!(h.channel.deleted(), vec!["2".to_string()]);
        assert_eq!(h.moderator.snapshot().last_value, Some(5));
    }

    #[tokio::test]
    async fn a_bot_head_imposes_no_author_rule() {
        let head = message(1, Author::bot("a", "counter-bot"), "5");
        let channel = MockChannel::with_history(vec![head.clone()]);
        let h = harness(
            channel,
            MockRecognizer::new(),
            PipelineConfig::default(),
            CountingState::accepted(head, 5),
        )
        .await;
        let msg = h.channel.post(message(2, alice(), "6"));

        assert_eq!(h.moderator.decide(&msg).await, Decision::Accepted(6));
    }

    // ── Edits ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn editing_the_head_purges_it() {
        let h = at_five().await;
        let six = h.channel.post(message(2, bob(), "6"));
        assert!(h.moderator.decide(&six).await.is_accepted());

        let (old, new) = h.channel.edit("2", "lol").unwrap();
        assert_eq!(
            h.moderator.reconcile(&old, &new).await,
            ReconcileOutcome::HeadPurged
        );
        assert_eq!(h.channel.deleted(), vec!["2".to_string()]);
        assert_eq!(h.moderator.snapshot().last_message_id.as_deref(), Some("1"));
        assert!(h.channel.direct_messages().is_empty());
    }

    #[tokio::test]
    async fn editing_an_older_count_notifies_the_author() {
        let h = at_five().await;
        let six = h.channel.post(message(2, bob(), "6"));
        assert!(h.moderator.decide(&six).await.is_accepted());

        let (old, new) = h.channel.edit("1", "50").unwrap();
        assert_eq!(
            h.moderator.reconcile(&old, &new).await,
            ReconcileOutcome::AuthorNotified
        );
        assert!(h.channel.deleted().is_empty());
        let dms = h.channel.direct_messages();
        assert_eq!(dms[0].0, "a");
        assert!(dms[0].1.contains("originally counted 5"));
    }

    #[tokio::test]
    async fn equivalent_edits_are_unchanged() {
        let h = at_five().await;
        let (old, new) = h.channel.edit("1", "2+3").unwrap();
        assert_eq!(
            h.moderator.reconcile(&old, &new).await,
            ReconcileOutcome::Unchanged
        );
        assert!(h.channel.deleted().is_empty());
    }

    #[tokio::test]
    async fn edits_of_non_counts_are_ignored() {
        let h = at_five().await;
        let chatter = h.channel.post(message(2, bob(), "nice"));
        let (old, new) = h.channel.edit(&chatter.id, "6").unwrap();
        assert_eq!(
            h.moderator.reconcile(&old, &new).await,
            ReconcileOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn failed_head_delete_is_reported() {
        let h = at_five().await;
        h.channel.set_fail_deletes(true);
        let (old, new) = h.channel.edit("1", "x").unwrap();
        assert_eq!(
            h.moderator.reconcile(&old, &new).await,
            ReconcileOutcome::DeleteFailed
        );
        assert_eq!(h.moderator.snapshot().last_value, Some(5));
    }

    // ── Single flight ──────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_decisions_are_serialized() {
        let ocr = MockRecognizer::new()
            .with_text("https://cdn/5.png", "5")
            .with_delay(Duration::from_millis(50));
        let calls = ocr.calls();
        let head = message(1, alice(), "").with_attachment("5.png", "https://cdn/5.png");
        let channel = MockChannel::with_history(vec![head.clone()]);
        let h = harness(
            channel,
            ocr,
            PipelineConfig::default(),
            CountingState::from_tail(head),
        )
        .await;

        let m1 = h.channel.post(message(2, bob(), "6"));
        let m2 = h.channel.post(message(3, carol(), "7"));
        let (d1, d2) = tokio::join!(h.moderator.decide(&m1), h.moderator.decide(&m2));

        assert_eq!(d1, Decision::Accepted(6));
        assert_eq!(d2, Decision::Accepted(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.moderator.snapshot().last_message_id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn slow_recognition_rejects_and_releases_the_lock() {
        let config = PipelineConfig {
            recognition_timeout: Duration::from_millis(50),
            ..PipelineConfig::default()
        };
        let ocr = MockRecognizer::new()
            .with_text("https://cdn/6.png", "6")
            .with_delay(Duration::from_millis(500));
        let head = message(1, alice(), "5");
        let channel = MockChannel::with_history(vec![head.clone()]);
        let h = harness(channel, ocr, config, CountingState::accepted(head, 5)).await;

        let slow = h
            .channel
            .post(message(2, bob(), "").with_attachment("6.png", "https://cdn/6.png"));
        let next = h.channel.post(message(3, carol(), "6"));

        let (first, second) = tokio::time::timeout(Duration::from_secs(2), async {
            let first = h.moderator.decide(&slow).await;
            let second = h.moderator.decide(&next).await;
            (first, second)
        })
        .await
        .expect("decision hung past the recognition timeout");

        assert_eq!(
            first,
            Decision::Rejected(RejectReason::ImageMismatch {
                expected: 6,
                recognized: None
            })
        );
        assert_eq!(second, Decision::Accepted(6));
        assert_eq!(h.channel.deleted(), vec!["2".to_string()]);
    }

    // ── Resynchronization ──────────────────────────────────────────

    async fn started(channel: MockChannel, config: PipelineConfig) -> Moderator {
        Moderator::start(
            ModeratorDeps {
                channel: Arc::new(channel),
                recognizer: Arc::new(MockRecognizer::new()),
                stats: Arc::new(LibSqlBackend::new_memory().await.unwrap()),
            },
            config,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_channel_starts_at_zero() {
        let moderator = started(MockChannel::new(), PipelineConfig::default()).await;
        let first = message(1, alice(), "1");
        assert_eq!(moderator.decide(&first).await, Decision::Accepted(1));
    }

    #[tokio::test]
    async fn start_picks_the_newest_message() {
        let channel = MockChannel::with_history(vec![
            message(1, alice(), "40"),
            message(2, bob(), "41"),
        ]);
        let moderator = started(channel, PipelineConfig::default()).await;

        let snap = moderator.snapshot();
        assert_eq!(snap.last_message_id.as_deref(), Some("2"));
        assert_eq!(snap.last_author_id.as_deref(), Some("b"));
        let next = message(3, alice(), "42");
        assert_eq!(moderator.decide(&next).await, Decision::Accepted(42));
    }

    #[tokio::test]
    async fn start_fails_when_the_tail_cannot_be_read() {
        let channel = MockChannel::new();
        channel.set_fail_fetches(true);
        let result = Moderator::start(
            ModeratorDeps {
                channel: Arc::new(channel),
                recognizer: Arc::new(MockRecognizer::new()),
                stats: Arc::new(LibSqlBackend::new_memory().await.unwrap()),
            },
            PipelineConfig::default(),
        )
        .await;
        assert!(result.is_err());
    }

    fn bot_tail_channel() -> MockChannel {
        MockChannel::with_history(vec![
            message(1, alice(), "7"),
            message(2, Author::bot("x", "helper-bot"), "8"),
        ])
    }

    #[tokio::test]
    async fn resync_skips_bot_tail_by_default() {
        let moderator = started(bot_tail_channel(), PipelineConfig::default()).await;
        assert_eq!(moderator.snapshot().last_message_id.as_deref(), Some("1"));

        let next = message(3, bob(), "8");
        assert_eq!(moderator.decide(&next).await, Decision::Accepted(8));
    }

    #[tokio::test]
    async fn resync_can_adopt_bot_tail() {
        let config = PipelineConfig {
            resync_skip_bots: false,
            ..PipelineConfig::default()
        };
        let moderator = started(bot_tail_channel(), config).await;
        assert_eq!(moderator.snapshot().last_author_id.as_deref(), Some("x"));

        // The bot exemption lets alice follow herself across the bot message.
        let next = message(3, alice(), "9");
        assert_eq!(moderator.decide(&next).await, Decision::Accepted(9));
    }

    #[tokio::test]
    async fn resync_skips_pending_commands() {
        let channel = MockChannel::with_history(vec![
            message(1, alice(), "3"),
            message(2, bob(), "!stats"),
        ]);
        let moderator = started(channel, PipelineConfig::default()).await;
        assert_eq!(moderator.snapshot().last_message_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn full_window_without_tail_keeps_state() {
        let config = PipelineConfig {
            resync_limit: 2,
            ..PipelineConfig::default()
        };
        let channel = MockChannel::with_history(vec![
            message(1, Author::bot("x", "helper-bot"), "1"),
            message(2, Author::bot("x", "helper-bot"), "2"),
        ]);
        let h = harness(
            channel,
            MockRecognizer::new(),
            config,
            CountingState::accepted(message(0, alice(), "99"), 99),
        )
        .await;
        h.moderator.resynchronize().await.unwrap();
        assert_eq!(h.moderator.snapshot().last_value, Some(99));
    }

    #[tokio::test]
    async fn window_larger_than_fetch_cap_keeps_state() {
        let config = PipelineConfig {
            resync_limit: 200,
            ..PipelineConfig::default()
        };
        let head = message(1, alice(), "500");
        let mut history = vec![head.clone()];
        history.extend((2..200).map(|id| message(id, Author::bot("x", "helper-bot"), "spam")));
        let channel = MockChannel::with_history(history).with_fetch_cap(100);
        let h = harness(
            channel,
            MockRecognizer::new(),
            config,
            CountingState::accepted(head, 500),
        )
        .await;

        h.moderator.resynchronize().await.unwrap();
        let snap = h.moderator.snapshot();
        assert_eq!(snap.last_value, Some(500));
        assert_eq!(snap.last_message_id.as_deref(), Some("1"));
    }

    // ── Events ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn bot_messages_are_never_judged() {
        let h = at_five().await;
        let msg = h.channel.post(message(2, Author::bot("x", "bot"), "banana"));
        h.moderator.handle_event(ChannelEvent::NewMessage(msg)).await;

        assert!(h.channel.deleted().is_empty());
        assert_eq!(h.moderator.snapshot().last_value, Some(5));
    }

    #[tokio::test]
    async fn stats_command_replies_and_is_removed() {
        let h = at_five().await;
        let six = h.channel.post(message(2, bob(), "6"));
        h.moderator.handle_event(ChannelEvent::NewMessage(six)).await;

        let cmd = h.channel.post(message(3, bob(), "!stats"));
        h.moderator.handle_event(ChannelEvent::NewMessage(cmd)).await;

        assert_eq!(h.channel.deleted(), vec!["3".to_string()]);
        let dms = h.channel.direct_messages();
        assert_eq!(dms.len(), 1);
        assert!(dms[0].1.contains("Numbers counted: 1"));
        assert_eq!(h.moderator.snapshot().last_value, Some(6));
    }

    #[tokio::test]
    async fn help_command_sends_rules() {
        let h = at_five().await;
        let cmd = h.channel.post(message(2, alice(), "!help"));
        h.moderator.handle_event(ChannelEvent::NewMessage(cmd)).await;

        assert_eq!(h.channel.direct_messages()[0].1, HELP_TEXT);
        assert_eq!(h.moderator.snapshot().last_message_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn subscribers_see_state_changes() {
        let h = at_five().await;
        let mut rx = h.moderator.subscribe();
        let msg = h.channel.post(message(2, bob(), "6"));
        h.moderator.decide(&msg).await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().last_value, Some(6));
    }

    #[test]
    fn notices_mention_the_numbers() {
        assert!(image_mismatch_notice(6, Some(" 8 ")).contains("\"8\""));
        assert!(image_mismatch_notice(6, Some("  ")).contains("no number could be read"));
        assert!(edit_notice(12).contains("12"));
    }
}
