use chrono::{DateTime, Utc};
use parlay_core::{Event, OwnerId, Pick, Scope};
use parlay_scoring::{EventIndex, ParlayScore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadKind {
    AffectedPicks,
    ScoreUpdate,
    SingleOwnerSection,
    KeepAlive,
    ResyncRequired,
}

/// What a viewer receives. Transport-agnostic; serialised as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub sequence: u64,
    pub kind: PayloadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    /// Client fragment or entity the body replaces.
    pub target_selector: String,
    pub body: serde_json::Value,
}

impl Payload {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(sequence = self.sequence, error = %e, "payload serialisation failed");
            String::from("{}")
        })
    }
}

/// A logical broadcast before it is rendered for each viewer.
#[derive(Debug, Clone)]
pub enum Notice {
    /// Picks on one event, batched across every owner who has one.
    AffectedPicks {
        scope: Scope,
        event: Event,
        picks: BTreeMap<OwnerId, Vec<Pick>>,
    },
    /// Standings for a scope.
    ScoreUpdate {
        scope: Scope,
        standings: Vec<Arc<ParlayScore>>,
    },
    /// One owner's section: score plus picks.
    OwnerSection {
        scope: Scope,
        owner: OwnerId,
        score: Arc<ParlayScore>,
        picks: Vec<Pick>,
        events: Arc<EventIndex>,
    },
    KeepAlive { at: DateTime<Utc> },
}

impl Notice {
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::AffectedPicks { .. } => PayloadKind::AffectedPicks,
            Self::ScoreUpdate { .. } => PayloadKind::ScoreUpdate,
            Self::OwnerSection { .. } => PayloadKind::SingleOwnerSection,
            Self::KeepAlive { .. } => PayloadKind::KeepAlive,
        }
    }

    #[must_use]
    pub const fn scope(&self) -> Option<Scope> {
        match self {
            Self::AffectedPicks { scope, .. }
            | Self::ScoreUpdate { scope, .. }
            | Self::OwnerSection { scope, .. } => Some(*scope),
            Self::KeepAlive { .. } => None,
        }
    }

    #[must_use]
    pub fn target_selector(&self) -> String {
        match self {
            Self::AffectedPicks { scope, event, .. } => format!("scope:{scope}:event:{}", event.id),
            Self::ScoreUpdate { scope, .. } => format!("scope:{scope}:standings"),
            Self::OwnerSection { scope, owner, .. } => format!("scope:{scope}:owner:{owner}"),
            Self::KeepAlive { .. } => "keep-alive".to_string(),
        }
    }
}

#[must_use]
pub fn resync_required(sequence: u64) -> Payload {
    Payload {
        sequence,
        kind: PayloadKind::ResyncRequired,
        scope: None,
        target_selector: "resync".to_string(),
        body: serde_json::json!({ "resume_from": sequence }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialise_kebab_case() {
        let payload = resync_required(7);
        let json: serde_json::Value = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(json["kind"], "resync-required");
        assert_eq!(json["sequence"], 7);
        assert!(json.get("scope").is_none());
        assert_eq!(
            serde_json::to_value(PayloadKind::SingleOwnerSection).unwrap(),
            "single-owner-section"
        );
    }

    #[test]
    fn selectors_name_the_fragment() {
        let scope = Scope::new(2025, 3);
        let notice = Notice::ScoreUpdate {
            scope,
            standings: Vec::new(),
        };
        assert_eq!(notice.target_selector(), "scope:2025-w3:standings");
        assert_eq!(notice.kind(), PayloadKind::ScoreUpdate);
        assert_eq!(notice.scope(), Some(scope));
    }
}
