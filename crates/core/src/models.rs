//! Domain model shared by every crate in the workspace.
//!
//! Events and pick buckets are the only authoritative records. Everything the
//! scoring side produces (outcomes, parlay scores) can be rebuilt from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type EventId = String;
pub type OwnerId = String;

/// A `(season, period)` pair identifying one scoring period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub season: i32,
    pub period: u32,
}

impl Scope {
    #[must_use]
    pub const fn new(season: i32, period: u32) -> Self {
        Self { season, period }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-w{}", self.season, self.period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Scheduled,
    InProgress,
    Completed,
    Postponed,
}

impl EventState {
    /// Started or finished events can no longer hide their picks.
    #[must_use]
    pub const fn is_underway(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreline {
    pub home: i32,
    pub away: i32,
}

/// Betting line attached to an event.
///
/// `spread` is quoted from the home side: `-3.5` means the home participant
/// is favoured by three and a half points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Line {
    pub spread: Option<Decimal>,
    pub total: Option<Decimal>,
}

/// A scheduled contest between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub season: i32,
    pub period: u32,
    pub start_time: DateTime<Utc>,
    pub home: String,
    pub away: String,
    pub state: EventState,
    #[serde(default)]
    pub score: Option<Scoreline>,
    #[serde(default)]
    pub line: Option<Line>,
}

impl Event {
    #[must_use]
    pub const fn scope(&self) -> Scope {
        Scope::new(self.season, self.period)
    }

    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        self.line.and_then(|l| l.spread)
    }

    #[must_use]
    pub fn total(&self) -> Option<Decimal> {
        self.line.and_then(|l| l.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickKind {
    Spread,
    Total,
    Moneyline,
}

impl fmt::Display for PickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spread => "spread",
            Self::Total => "total",
            Self::Moneyline => "moneyline",
        };
        f.write_str(s)
    }
}

/// What the owner picked: a participant, or one side of the total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Participant(String),
    Over,
    Under,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Pending,
    Win,
    Loss,
    Push,
}

impl Outcome {
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One wager. Addressed inside its bucket by `(event_id, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pick {
    pub event_id: EventId,
    pub selection: Selection,
    pub kind: PickKind,
    /// Derived by grading; never set by the owner.
    #[serde(default)]
    pub outcome: Outcome,
}

impl Pick {
    #[must_use]
    pub fn new(event_id: impl Into<EventId>, kind: PickKind, selection: Selection) -> Self {
        Self {
            event_id: event_id.into(),
            selection,
            kind,
            outcome: Outcome::Pending,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketError {
    #[error("duplicate {kind} pick on event {event_id}")]
    DuplicatePick { event_id: EventId, kind: PickKind },

    #[error("bucket owner must not be empty")]
    MissingOwner,
}

/// Every pick one owner submitted for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickBucket {
    pub owner: OwnerId,
    pub scope: Scope,
    pub picks: Vec<Pick>,
    pub updated_at: DateTime<Utc>,
}

impl PickBucket {
    #[must_use]
    pub fn new(owner: impl Into<OwnerId>, scope: Scope, picks: Vec<Pick>) -> Self {
        Self {
            owner: owner.into(),
            scope,
            picks,
            updated_at: Utc::now(),
        }
    }

    /// Checks the `(event_id, kind)` uniqueness every store relies on.
    ///
    /// # Errors
    /// Returns `BucketError` for an empty owner or a duplicated pick.
    pub fn validate(&self) -> Result<(), BucketError> {
        if self.owner.trim().is_empty() {
            return Err(BucketError::MissingOwner);
        }
        let mut seen = std::collections::HashSet::new();
        for pick in &self.picks {
            if !seen.insert((pick.event_id.as_str(), pick.kind)) {
                return Err(BucketError::DuplicatePick {
                    event_id: pick.event_id.clone(),
                    kind: pick.kind,
                });
            }
        }
        Ok(())
    }

    pub fn picks_on<'a>(&'a self, event_id: &'a str) -> impl Iterator<Item = &'a Pick> + 'a {
        self.picks.iter().filter(move |p| p.event_id == event_id)
    }

    #[must_use]
    pub fn has_pick_on(&self, event_id: &str) -> bool {
        self.picks.iter().any(|p| p.event_id == event_id)
    }
}

/// Result of grading one pick, as persisted by `PickStore::write_graded_outcomes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedOutcome {
    pub kind: PickKind,
    pub outcome: Outcome,
}

/// Identity used for visibility filtering and delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "owner")]
pub enum Viewer {
    Owner(OwnerId),
    Anonymous,
}

impl Viewer {
    #[must_use]
    pub fn owns(&self, owner: &str) -> bool {
        matches!(self, Self::Owner(id) if id == owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(event: &str, kind: PickKind) -> Pick {
        Pick::new(event, kind, Selection::Participant("KC".to_string()))
    }

    #[test]
    fn validate_rejects_duplicate_event_kind() {
        let bucket = PickBucket::new(
            "alice",
            Scope::new(2024, 3),
            vec![pick("e1", PickKind::Spread), pick("e1", PickKind::Spread)],
        );
        assert_eq!(
            bucket.validate(),
            Err(BucketError::DuplicatePick {
                event_id: "e1".to_string(),
                kind: PickKind::Spread
            })
        );
    }

    #[test]
    fn validate_allows_spread_and_total_on_same_event() {
        let bucket = PickBucket::new(
            "alice",
            Scope::new(2024, 3),
            vec![pick("e1", PickKind::Spread), pick("e1", PickKind::Total)],
        );
        assert!(bucket.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_owner() {
        let bucket = PickBucket::new("  ", Scope::new(2024, 3), Vec::new());
        assert_eq!(bucket.validate(), Err(BucketError::MissingOwner));
    }

    #[test]
    fn selection_serializes_with_sentinels() {
        let over = serde_json::to_string(&Selection::Over).unwrap();
        assert_eq!(over, "\"over\"");
        let team = serde_json::to_string(&Selection::Participant("KC".into())).unwrap();
        assert_eq!(team, r#"{"participant":"KC"}"#);
    }

    #[test]
    fn viewer_owns_only_matching_owner() {
        let viewer = Viewer::Owner("alice".to_string());
        assert!(viewer.owns("alice"));
        assert!(!viewer.owns("bob"));
        assert!(!Viewer::Anonymous.owns("alice"));
    }

    #[test]
    fn underway_states() {
        assert!(EventState::InProgress.is_underway());
        assert!(EventState::Completed.is_underway());
        assert!(!EventState::Scheduled.is_underway());
        assert!(!EventState::Postponed.is_underway());
    }
}
