use crate::models::{EventId, OwnerId, Scope};
use serde::{Deserialize, Serialize};

/// Field name used for pick outcomes in bucket change notifications.
pub const OUTCOME_FIELD: &str = "outcome";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Events,
    PickBuckets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Replace,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChangeKey {
    Event { event_id: EventId },
    Bucket { owner: OwnerId, scope: Scope },
}

/// One storage mutation as delivered by a `MutationFeed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub operation: Operation,
    pub key: ChangeKey,
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

impl ChangeEvent {
    #[must_use]
    pub fn event(operation: Operation, event_id: impl Into<EventId>, fields: &[&str]) -> Self {
        Self {
            collection: Collection::Events,
            operation,
            key: ChangeKey::Event {
                event_id: event_id.into(),
            },
            changed_fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn bucket(
        operation: Operation,
        owner: impl Into<OwnerId>,
        scope: Scope,
        fields: &[&str],
    ) -> Self {
        Self {
            collection: Collection::PickBuckets,
            operation,
            key: ChangeKey::Bucket {
                owner: owner.into(),
                scope,
            },
            changed_fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// True when a field (or a nested path under it, e.g. `picks.2.outcome`)
    /// was touched.
    #[must_use]
    pub fn touches(&self, field: &str) -> bool {
        self.changed_fields
            .iter()
            .any(|f| f == field || f.rsplit('.').next() == Some(field))
    }

    /// True when the only touched fields are pick outcomes.
    #[must_use]
    pub fn only_outcomes(&self) -> bool {
        !self.changed_fields.is_empty()
            && self
                .changed_fields
                .iter()
                .all(|f| f == OUTCOME_FIELD || f.rsplit('.').next() == Some(OUTCOME_FIELD))
    }
}

/// Server-side filter applied by a feed before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub collection: Collection,
    /// Empty means every field.
    pub fields: Vec<String>,
}

impl FeedFilter {
    #[must_use]
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: &[String]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    /// Inserts and deletes always pass; updates must touch a watched field.
    #[must_use]
    pub fn accepts(&self, change: &ChangeEvent) -> bool {
        if change.collection != self.collection {
            return false;
        }
        if self.fields.is_empty() {
            return true;
        }
        match change.operation {
            Operation::Insert | Operation::Delete => true,
            Operation::Update | Operation::Replace => {
                self.fields.iter().any(|f| change.touches(f))
            }
        }
    }
}
