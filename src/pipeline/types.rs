//! Shared types for the counting pipeline.

use std::fmt;

use serde::Serialize;

use crate::expr::EvalError;

// ── Candidate value ─────────────────────────────────────────────────

/// The number a message stands for, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// The message text evaluated to a value.
    Text(i64),
    /// The text did not evaluate; the recognized image text did.
    Image { value: i64, recognized: String },
    /// No value. `recognized` holds image text that failed to evaluate.
    Unknown { recognized: Option<String> },
}

impl Candidate {
    pub fn value(&self) -> Option<i64> {
        match self {
            Self::Text(n) => Some(*n),
            Self::Image { value, .. } => Some(*value),
            Self::Unknown { .. } => None,
        }
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// Why a message was removed from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Same member counted twice in a row.
    SameAuthor,
    /// The previous message has no recoverable value.
    UnknownBaseline,
    /// The image did not read as the expected number.
    ImageMismatch {
        expected: i64,
        recognized: Option<String>,
    },
    /// The text evaluated, but to the wrong number.
    NotNextNumber { expected: i64, got: i64 },
    /// The text did not evaluate at all.
    Unparseable(EvalError),
}

impl RejectReason {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SameAuthor => "same_author",
            Self::UnknownBaseline => "unknown_baseline",
            Self::ImageMismatch { .. } => "image_mismatch",
            Self::NotNextNumber { .. } => "not_next_number",
            Self::Unparseable(_) => "unparseable",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameAuthor => write!(f, "author counted the previous number too"),
            Self::UnknownBaseline => write!(f, "previous value could not be determined"),
            Self::ImageMismatch {
                expected,
                recognized: Some(text),
            } => write!(f, "expected {expected}, image read as {text:?}"),
            Self::ImageMismatch {
                expected,
                recognized: None,
            } => write!(f, "expected {expected}, image unreadable"),
            Self::NotNextNumber { expected, got } => write!(f, "expected {expected}, got {got}"),
            Self::Unparseable(e) => write!(f, "{e}"),
        }
    }
}

/// Terminal outcome of judging one new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accepted(i64),
    Rejected(RejectReason),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Rejected(reason) => reason.label(),
        }
    }
}

// ── Edit reconciliation ─────────────────────────────────────────────

/// What happened in response to an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The original text never evaluated, so it was never part of the chain.
    Ignored,
    /// The edit kept the same value.
    Unchanged,
    /// The edited message was the head; it was deleted and state resynced.
    HeadPurged,
    /// The head could not be deleted; state left as-is.
    DeleteFailed,
    /// An older message changed; its author was asked to restore it.
    AuthorNotified,
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Unchanged => "unchanged",
            Self::HeadPurged => "head_purged",
            Self::DeleteFailed => "delete_failed",
            Self::AuthorNotified => "author_notified",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_values() {
        assert_eq!(Candidate::Text(6).value(), Some(6));
        assert_eq!(
            Candidate::Image {
                value: 7,
                recognized: "7".into()
            }
            .value(),
            Some(7)
        );
        assert_eq!(Candidate::Unknown { recognized: None }.value(), None);
    }

    #[test]
    fn reject_reason_details() {
        let reason = RejectReason::NotNextNumber {
            expected: 6,
            got: 8,
        };
        assert_eq!(reason.to_string(), "expected 6, got 8");
        assert_eq!(Decision::Rejected(reason).label(), "not_next_number");

        let unreadable = RejectReason::ImageMismatch {
            expected: 3,
            recognized: None,
        };
        assert_eq!(unreadable.to_string(), "expected 3, image unreadable");
    }

    #[test]
    fn decision_labels() {
        assert!(Decision::Accepted(1).is_accepted());
        assert_eq!(Decision::Accepted(1).label(), "accepted");
        assert_eq!(
            Decision::Rejected(RejectReason::Unparseable(EvalError::DivisionByZero)).label(),
            "unparseable"
        );
    }

    #[test]
    fn reconcile_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&ReconcileOutcome::HeadPurged).unwrap();
        assert_eq!(json, "\"head_purged\"");
    }
}
