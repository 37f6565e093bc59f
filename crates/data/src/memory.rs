//! In-process store and mutation feed.
//!
//! Backs tests and single-node demos. Every mutation helper emits the same
//! `ChangeEvent` a database trigger would, on a broadcast channel that each
//! `subscribe` call filters into its own bounded receiver.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use parlay_core::{
    BucketError, ChangeEvent, Event, EventId, EventState, EventStore, FeedFilter,
    GradedOutcomes, MutationFeed, Operation, OwnerId, PickBucket, PickStore, Scope, Scoreline,
    OUTCOME_FIELD,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};

const DEFAULT_FEED_CAPACITY: usize = 1024;

pub struct MemoryStore {
    events: RwLock<HashMap<EventId, Event>>,
    buckets: RwLock<HashMap<(OwnerId, Scope), PickBucket>>,
    changes: broadcast::Sender<ChangeEvent>,
    subscriber_capacity: usize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    outcome_writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// `capacity` bounds both the internal broadcast and each subscriber's
    /// receiver.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            events: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
            changes,
            subscriber_capacity: capacity.max(1),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            outcome_writes: AtomicUsize::new(0),
        }
    }

    /// Makes every store read fail until cleared.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes `write_graded_outcomes` fail until cleared.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `write_graded_outcomes` calls.
    #[must_use]
    pub fn outcome_writes(&self) -> usize {
        self.outcome_writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn event(&self, event_id: &str) -> Option<Event> {
        self.events.read().get(event_id).cloned()
    }

    #[must_use]
    pub fn bucket(&self, owner: &str, scope: Scope) -> Option<PickBucket> {
        self.buckets
            .read()
            .get(&(owner.to_string(), scope))
            .cloned()
    }

    /// Inserts or replaces an event, emitting the fields that differ.
    pub async fn upsert_event(&self, event: Event) {
        let change = {
            let mut events = self.events.write();
            let change = match events.get(&event.id) {
                None => Some(ChangeEvent::event(Operation::Insert, event.id.clone(), &[])),
                Some(old) => {
                    let fields = event_diff(old, &event);
                    (!fields.is_empty())
                        .then(|| ChangeEvent::event(Operation::Update, event.id.clone(), &fields))
                }
            };
            events.insert(event.id.clone(), event);
            change
        };
        if let Some(change) = change {
            self.emit(change);
        }
    }

    /// Moves an event to `state`, optionally with a new score.
    ///
    /// # Errors
    /// Returns an error if the event does not exist.
    pub async fn set_event_state(
        &self,
        event_id: &str,
        state: EventState,
        score: Option<Scoreline>,
    ) -> Result<()> {
        let Some(mut event) = self.event(event_id) else {
            bail!("unknown event {event_id}");
        };
        event.state = state;
        if score.is_some() {
            event.score = score;
        }
        self.upsert_event(event).await;
        Ok(())
    }

    /// Removes an event. Picks on it stay in their buckets.
    pub async fn delete_event(&self, event_id: &str) -> bool {
        let removed = self.events.write().remove(event_id).is_some();
        if removed {
            self.emit(ChangeEvent::event(Operation::Delete, event_id, &[]));
        }
        removed
    }

    /// Stores an owner's bucket after validating it.
    ///
    /// # Errors
    /// Returns `BucketError` for duplicate picks or a missing owner; nothing
    /// is stored in that case.
    pub async fn submit_bucket(&self, mut bucket: PickBucket) -> Result<(), BucketError> {
        bucket.validate()?;
        bucket.updated_at = Utc::now();
        let key = (bucket.owner.clone(), bucket.scope);
        let change = {
            let mut buckets = self.buckets.write();
            let operation = if buckets.contains_key(&key) {
                Operation::Update
            } else {
                Operation::Insert
            };
            buckets.insert(key.clone(), bucket);
            ChangeEvent::bucket(operation, key.0, key.1, &["picks"])
        };
        self.emit(change);
        Ok(())
    }

    pub async fn delete_bucket(&self, owner: &str, scope: Scope) -> bool {
        let removed = self
            .buckets
            .write()
            .remove(&(owner.to_string(), scope))
            .is_some();
        if removed {
            self.emit(ChangeEvent::bucket(Operation::Delete, owner, scope, &[]));
        }
        removed
    }

    /// Stores a bucket as-is, skipping validation and the feed. Simulates
    /// rows written by other tooling.
    pub fn force_bucket(&self, bucket: PickBucket) {
        self.buckets
            .write()
            .insert((bucket.owner.clone(), bucket.scope), bucket);
    }

    /// Publishes a raw change, as an external writer would.
    pub fn emit(&self, change: ChangeEvent) {
        if self.changes.send(change).is_err() {
            tracing::trace!("change emitted with no subscribers");
        }
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("memory store: reads disabled");
        }
        Ok(())
    }
}

fn event_diff(old: &Event, new: &Event) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if old.state != new.state {
        fields.push("state");
    }
    if old.score != new.score {
        fields.push("score");
    }
    if old.line != new.line {
        fields.push("line");
    }
    if old.start_time != new.start_time {
        fields.push("start_time");
    }
    if old.home != new.home || old.away != new.away {
        fields.push("participants");
    }
    if old.scope() != new.scope() {
        fields.push("scope");
    }
    fields
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn events_by_scope(&self, scope: Scope) -> Result<Vec<Event>> {
        self.check_reads()?;
        let mut events: Vec<Event> = self
            .events
            .read()
            .values()
            .filter(|e| e.scope() == scope)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn event_by_id(&self, event_id: &str) -> Result<Option<Event>> {
        self.check_reads()?;
        Ok(self.event(event_id))
    }
}

#[async_trait]
impl PickStore for MemoryStore {
    async fn pick_bucket(&self, owner: &str, scope: Scope) -> Result<Option<PickBucket>> {
        self.check_reads()?;
        Ok(self.bucket(owner, scope))
    }

    async fn buckets_by_scope(&self, scope: Scope) -> Result<Vec<PickBucket>> {
        self.check_reads()?;
        let mut buckets: Vec<PickBucket> = self
            .buckets
            .read()
            .values()
            .filter(|b| b.scope == scope)
            .cloned()
            .collect();
        buckets.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(buckets)
    }

    async fn write_graded_outcomes(
        &self,
        scope: Scope,
        event_id: &str,
        outcomes: &GradedOutcomes,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store: writes disabled");
        }

        let mut changes = Vec::new();
        {
            let mut buckets = self.buckets.write();
            for (owner, graded) in outcomes {
                let Some(bucket) = buckets.get_mut(&(owner.clone(), scope)) else {
                    tracing::warn!(%owner, %scope, event_id, "graded outcome for missing bucket");
                    continue;
                };
                let mut fields = Vec::new();
                for (index, pick) in bucket.picks.iter_mut().enumerate() {
                    if pick.event_id != event_id {
                        continue;
                    }
                    let Some(g) = graded.iter().find(|g| g.kind == pick.kind) else {
                        continue;
                    };
                    if pick.outcome != g.outcome {
                        pick.outcome = g.outcome;
                        fields.push(format!("picks.{index}.{OUTCOME_FIELD}"));
                    }
                }
                if !fields.is_empty() {
                    bucket.updated_at = Utc::now();
                    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
                    changes.push(ChangeEvent::bucket(Operation::Update, owner.clone(), scope, &refs));
                }
            }
        }

        self.outcome_writes.fetch_add(1, Ordering::SeqCst);
        for change in changes {
            self.emit(change);
        }
        Ok(())
    }

    async fn known_scopes(&self) -> Result<Vec<Scope>> {
        self.check_reads()?;
        let scopes: BTreeSet<Scope> = self.buckets.read().keys().map(|(_, s)| *s).collect();
        Ok(scopes.into_iter().collect())
    }
}

#[async_trait]
impl MutationFeed for MemoryStore {
    async fn subscribe(&self, filter: FeedFilter) -> Result<mpsc::Receiver<ChangeEvent>> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if !filter.accepts(&change) {
                            continue;
                        }
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, collection = ?filter.collection, "feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parlay_core::{Collection, GradedOutcome, Outcome, Pick, PickKind, Selection};

    const SCOPE: Scope = Scope::new(2025, 1);

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            season: 2025,
            period: 1,
            start_time: Utc.with_ymd_and_hms(2025, 9, 7, 17, 0, 0).unwrap(),
            home: "KC".to_string(),
            away: "BAL".to_string(),
            state: EventState::Scheduled,
            score: None,
            line: None,
        }
    }

    fn kc(event_id: &str) -> Pick {
        Pick::new(event_id, PickKind::Spread, Selection::Participant("KC".into()))
    }

    #[tokio::test]
    async fn feed_filters_by_collection_and_field() {
        let store = MemoryStore::new();
        let mut events = store
            .subscribe(FeedFilter::collection(Collection::Events).with_fields(&["state".to_string()]))
            .await
            .unwrap();

        store.upsert_event(event("e1")).await;
        let mut renamed = event("e1");
        renamed.home = "KCC".to_string();
        store.upsert_event(renamed).await;
        store
            .set_event_state("e1", EventState::InProgress, None)
            .await
            .unwrap();

        let insert = events.recv().await.unwrap();
        assert_eq!(insert.operation, Operation::Insert);
        let update = events.recv().await.unwrap();
        assert_eq!(update.changed_fields, vec!["state".to_string()]);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn graded_outcomes_emit_outcome_paths() {
        let store = MemoryStore::new();
        store.upsert_event(event("e1")).await;
        store
            .submit_bucket(PickBucket::new("alice", SCOPE, vec![kc("e2"), kc("e1")]))
            .await
            .unwrap();
        let mut feed = store
            .subscribe(FeedFilter::collection(Collection::PickBuckets))
            .await
            .unwrap();

        let outcomes = HashMap::from([(
            "alice".to_string(),
            vec![GradedOutcome {
                kind: PickKind::Spread,
                outcome: Outcome::Win,
            }],
        )]);
        store.write_graded_outcomes(SCOPE, "e1", &outcomes).await.unwrap();

        let change = feed.recv().await.unwrap();
        assert_eq!(change.changed_fields, vec!["picks.1.outcome".to_string()]);
        assert!(change.only_outcomes());
        assert_eq!(store.bucket("alice", SCOPE).unwrap().picks[1].outcome, Outcome::Win);

        // Same outcome again: nothing changes, nothing emitted.
        store.write_graded_outcomes(SCOPE, "e1", &outcomes).await.unwrap();
        assert!(feed.try_recv().is_err());
        assert_eq!(store.outcome_writes(), 2);
    }

    #[tokio::test]
    async fn invalid_bucket_is_rejected() {
        let store = MemoryStore::new();
        let result = store
            .submit_bucket(PickBucket::new("alice", SCOPE, vec![kc("e1"), kc("e1")]))
            .await;
        assert!(matches!(result, Err(BucketError::DuplicatePick { .. })));
        assert!(store.bucket("alice", SCOPE).is_none());
    }

    #[tokio::test]
    async fn failure_injection() {
        let store = MemoryStore::new();
        store.fail_reads(true);
        assert!(store.known_scopes().await.is_err());
        store.fail_reads(false);
        assert!(store.known_scopes().await.unwrap().is_empty());

        store.fail_writes(true);
        assert!(store
            .write_graded_outcomes(SCOPE, "e1", &HashMap::new())
            .await
            .is_err());
    }
}
