use crate::events::{ChangeEvent, FeedFilter};
use crate::models::{Event, GradedOutcome, OwnerId, PickBucket, Scope};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Graded outcomes for one event, per owner.
pub type GradedOutcomes = HashMap<OwnerId, Vec<GradedOutcome>>;

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn events_by_scope(&self, scope: Scope) -> Result<Vec<Event>>;
    async fn event_by_id(&self, event_id: &str) -> Result<Option<Event>>;
}

#[async_trait]
pub trait PickStore: Send + Sync {
    async fn pick_bucket(&self, owner: &str, scope: Scope) -> Result<Option<PickBucket>>;
    async fn buckets_by_scope(&self, scope: Scope) -> Result<Vec<PickBucket>>;
    async fn write_graded_outcomes(
        &self,
        scope: Scope,
        event_id: &str,
        outcomes: &GradedOutcomes,
    ) -> Result<()>;
    /// Every scope with at least one bucket; drives the cold-start backfill.
    async fn known_scopes(&self) -> Result<Vec<Scope>>;
}

#[async_trait]
pub trait MutationFeed: Send + Sync {
    async fn subscribe(&self, filter: FeedFilter) -> Result<mpsc::Receiver<ChangeEvent>>;
}
