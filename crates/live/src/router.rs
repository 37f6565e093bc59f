//! Turns storage mutations into recomputations and broadcasts.
//!
//! An event change is graded and recomputed once for its whole scope, and
//! produces at most one `affected-picks` and one `score-update` payload no
//! matter how many owners it touches. A pick-bucket change recomputes only
//! its owner. Outcome writes issued by the router itself come back through
//! the feed and are recognised by a short-lived in-flight marker, so they
//! never start another pass. An event change that fails is retried with
//! exponential backoff until it goes through.

use crate::broadcaster::Broadcaster;
use crate::cache::{ScopeRecompute, ScoreCache};
use crate::payload::{Notice, PayloadKind};
use parking_lot::Mutex;
use parlay_core::{
    ChangeEvent, ChangeKey, Collection, EventId, EventStore, FeedConfig, FeedFilter,
    GradedOutcome, GradedOutcomes, MutationFeed, Operation, OwnerId, Pick, PickStore, Scope,
};
use parlay_scoring::ScoreSummary;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to load {what}")]
    Load {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist graded outcomes for event {event_id} in {scope}")]
    WriteOutcomes {
        scope: Scope,
        event_id: EventId,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to recompute {scope}")]
    Recompute {
        scope: Scope,
        #[source]
        source: anyhow::Error,
    },
}

/// How a mutation is treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeClass {
    /// Any event mutation that can change grading or bucketing, including
    /// deletion.
    EventStateChange { event_id: EventId },
    StructuralPickChange { owner: OwnerId, scope: Scope },
    /// Outcome-only bucket write. `marked` is false when no in-flight marker
    /// covered it.
    SelfOriginatedResultWrite {
        owner: OwnerId,
        scope: Scope,
        marked: bool,
    },
    Ignored,
}

/// What handling a change produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub class: ChangeClass,
    pub sent: Vec<PayloadKind>,
}

impl Routed {
    const fn quiet(class: ChangeClass) -> Self {
        Self {
            class,
            sent: Vec::new(),
        }
    }
}

/// Markers for outcome writes the router has issued, keyed by scope and
/// event, each live for a fixed TTL.
#[derive(Debug)]
pub struct InFlightMarkers {
    ttl: Duration,
    markers: Mutex<HashMap<(Scope, EventId), Instant>>,
}

impl InFlightMarkers {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            markers: Mutex::new(HashMap::new()),
        }
    }

    pub fn mark(&self, scope: Scope, event_id: &str) {
        let expires = Instant::now() + self.ttl;
        self.markers
            .lock()
            .insert((scope, event_id.to_string()), expires);
    }

    /// True if any marker for `scope` is still live. Expired markers are
    /// pruned on the way.
    #[must_use]
    pub fn live_in(&self, scope: Scope) -> bool {
        let now = Instant::now();
        let mut markers = self.markers.lock();
        markers.retain(|_, expires| *expires > now);
        markers.keys().any(|(s, _)| *s == scope)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Retry {
    attempts: u32,
    due: Instant,
}

/// Event ids whose handling failed, each due again after a delay that
/// doubles per attempt up to a ceiling.
#[derive(Debug)]
pub struct RetryQueue {
    base: Duration,
    max: Duration,
    entries: Mutex<HashMap<EventId, Retry>>,
}

impl RetryQueue {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Records a failed attempt and returns the delay before the next one.
    pub fn schedule(&self, event_id: &str) -> Duration {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(event_id.to_string()).or_insert(Retry {
            attempts: 0,
            due: now,
        });
        let delay = self.delay(entry.attempts);
        entry.attempts = entry.attempts.saturating_add(1);
        entry.due = now + delay;
        delay
    }

    /// Forgets `event_id`; true if it was pending.
    pub fn clear(&self, event_id: &str) -> bool {
        self.entries.lock().remove(event_id).is_some()
    }

    /// Event ids whose delay has elapsed.
    #[must_use]
    pub fn due(&self) -> Vec<EventId> {
        let now = Instant::now();
        let mut due: Vec<EventId> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, retry)| retry.due <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.entries.lock().contains_key(event_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn delay(&self, attempts: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << attempts.min(16))
            .min(self.max)
    }
}

pub struct ChangeNotificationRouter {
    events: Arc<dyn EventStore>,
    picks: Arc<dyn PickStore>,
    cache: Arc<ScoreCache>,
    broadcaster: Arc<Broadcaster>,
    markers: InFlightMarkers,
    retries: RetryQueue,
    event_fields: Vec<String>,
    /// Summaries as of the last score-update sent for each scope.
    last_broadcast: Mutex<HashMap<Scope, HashMap<OwnerId, ScoreSummary>>>,
}

impl ChangeNotificationRouter {
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        picks: Arc<dyn PickStore>,
        cache: Arc<ScoreCache>,
        broadcaster: Arc<Broadcaster>,
        feed: &FeedConfig,
        self_write_ttl: Duration,
    ) -> Self {
        Self {
            events,
            picks,
            cache,
            broadcaster,
            markers: InFlightMarkers::new(self_write_ttl),
            retries: RetryQueue::new(
                Duration::from_millis(feed.retry_base_ms),
                Duration::from_millis(feed.retry_max_ms),
            ),
            event_fields: feed.event_fields.clone(),
            last_broadcast: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn markers(&self) -> &InFlightMarkers {
        &self.markers
    }

    #[must_use]
    pub const fn retries(&self) -> &RetryQueue {
        &self.retries
    }

    #[must_use]
    pub fn classify(&self, change: &ChangeEvent) -> ChangeClass {
        match (&change.collection, &change.key) {
            (Collection::Events, ChangeKey::Event { event_id }) => match change.operation {
                Operation::Insert | Operation::Delete => ChangeClass::EventStateChange {
                    event_id: event_id.clone(),
                },
                Operation::Update | Operation::Replace => {
                    if self.event_fields.iter().any(|f| change.touches(f)) {
                        ChangeClass::EventStateChange {
                            event_id: event_id.clone(),
                        }
                    } else {
                        ChangeClass::Ignored
                    }
                }
            },
            (Collection::PickBuckets, ChangeKey::Bucket { owner, scope }) => {
                let structural = matches!(change.operation, Operation::Insert | Operation::Delete)
                    || !change.only_outcomes();
                if structural {
                    ChangeClass::StructuralPickChange {
                        owner: owner.clone(),
                        scope: *scope,
                    }
                } else {
                    ChangeClass::SelfOriginatedResultWrite {
                        owner: owner.clone(),
                        scope: *scope,
                        marked: self.markers.live_in(*scope),
                    }
                }
            }
            _ => ChangeClass::Ignored,
        }
    }

    /// Classifies and handles one mutation.
    ///
    /// # Errors
    /// Returns `RouterError` if a store read fails, if graded outcomes cannot
    /// be persisted, or if the scope cannot be recomputed. In each case the
    /// cache is left as it was, nothing is broadcast, and an event change is
    /// queued for retry.
    pub async fn handle(&self, change: &ChangeEvent) -> Result<Routed, RouterError> {
        let class = self.classify(change);
        match &class {
            ChangeClass::EventStateChange { event_id } => {
                let sent = self.route_event(event_id, change.touches("line")).await?;
                Ok(Routed { class, sent })
            }
            ChangeClass::StructuralPickChange { owner, scope } => {
                let sent = self.on_pick_change(owner, *scope).await?;
                Ok(Routed { class, sent })
            }
            ChangeClass::SelfOriginatedResultWrite {
                owner,
                scope,
                marked,
            } => {
                if *marked {
                    tracing::debug!(%scope, %owner, "own outcome write suppressed");
                } else {
                    tracing::warn!(%scope, %owner, "outcome-only write without in-flight marker suppressed");
                }
                Ok(Routed::quiet(class))
            }
            ChangeClass::Ignored => {
                tracing::trace!(?change, "change ignored");
                Ok(Routed::quiet(class))
            }
        }
    }

    /// Re-runs every queued event change whose delay has elapsed. Returns how
    /// many went through.
    pub async fn retry_due(&self) -> usize {
        let mut recovered = 0;
        for event_id in self.retries.due() {
            match self.route_event(&event_id, false).await {
                Ok(_) => recovered += 1,
                Err(e) => tracing::error!(event_id = %event_id, error = ?e, "retry failed"),
            }
        }
        recovered
    }

    async fn route_event(
        &self,
        event_id: &str,
        line_changed: bool,
    ) -> Result<Vec<PayloadKind>, RouterError> {
        match self.on_event_change(event_id, line_changed).await {
            Ok(sent) => {
                if self.retries.clear(event_id) {
                    tracing::info!(event_id, "queued event change went through");
                }
                Ok(sent)
            }
            Err(e) => {
                let delay = self.retries.schedule(event_id);
                tracing::warn!(event_id, retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "event change queued for retry");
                Err(e)
            }
        }
    }

    async fn on_event_change(
        &self,
        event_id: &str,
        line_changed: bool,
    ) -> Result<Vec<PayloadKind>, RouterError> {
        let previous_scope = self.cache.scope_of_event(event_id);
        let event = self
            .events
            .event_by_id(event_id)
            .await
            .map_err(|source| RouterError::Load {
                what: format!("event {event_id}"),
                source,
            })?;
        let Some(event) = event else {
            return self.on_event_removed(event_id, previous_scope).await;
        };
        let scope = event.scope();

        if line_changed {
            self.cache.engine().grader().forget(event_id);
        }

        let buckets = self
            .picks
            .buckets_by_scope(scope)
            .await
            .map_err(|source| RouterError::Load {
                what: format!("buckets for {scope}"),
                source,
            })?;

        let grader = self.cache.engine().grader();
        let mut outcomes: GradedOutcomes = HashMap::new();
        let mut affected: BTreeMap<OwnerId, Vec<Pick>> = BTreeMap::new();
        for bucket in &buckets {
            for pick in bucket.picks_on(event_id) {
                let Some(outcome) = grader.grade(pick, &event) else {
                    continue;
                };
                outcomes
                    .entry(bucket.owner.clone())
                    .or_default()
                    .push(GradedOutcome {
                        kind: pick.kind,
                        outcome,
                    });
                affected.entry(bucket.owner.clone()).or_default().push(Pick {
                    outcome,
                    ..pick.clone()
                });
            }
        }

        if !outcomes.is_empty() {
            self.markers.mark(scope, event_id);
            self.picks
                .write_graded_outcomes(scope, event_id, &outcomes)
                .await
                .map_err(|source| {
                    tracing::error!(%scope, event_id, error = %source, "graded outcome write failed");
                    RouterError::WriteOutcomes {
                        scope,
                        event_id: event_id.to_string(),
                        source,
                    }
                })?;
        }

        let recomputed = self
            .cache
            .recompute_scope(scope)
            .await
            .map_err(|source| RouterError::Recompute { scope, source })?;

        let mut sent = Vec::new();
        if !affected.is_empty() {
            tracing::info!(%scope, event_id, owners = affected.len(), state = ?event.state, "broadcasting affected picks");
            self.broadcaster.publish(&Notice::AffectedPicks {
                scope,
                event,
                picks: affected,
            });
            sent.push(PayloadKind::AffectedPicks);
        }

        if self.publish_score_update(&recomputed) {
            sent.push(PayloadKind::ScoreUpdate);
        }

        if let Some(old_scope) = previous_scope.filter(|s| *s != scope) {
            tracing::info!(event_id, from = %old_scope, to = %scope, "event moved between scopes");
            let recomputed = self
                .cache
                .recompute_scope(old_scope)
                .await
                .map_err(|source| RouterError::Recompute {
                    scope: old_scope,
                    source,
                })?;
            if self.publish_score_update(&recomputed) {
                sent.push(PayloadKind::ScoreUpdate);
            }
        }

        Ok(sent)
    }

    /// A deleted event drops out of its scope's scores. Its picks keep
    /// their last stored outcome.
    async fn on_event_removed(
        &self,
        event_id: &str,
        scope: Option<Scope>,
    ) -> Result<Vec<PayloadKind>, RouterError> {
        let Some(scope) = scope else {
            tracing::debug!(event_id, "removed event was never scored");
            return Ok(Vec::new());
        };
        tracing::info!(%scope, event_id, "event removed, recomputing scope");
        let recomputed = self
            .cache
            .recompute_scope(scope)
            .await
            .map_err(|source| RouterError::Recompute { scope, source })?;
        if self.publish_score_update(&recomputed) {
            Ok(vec![PayloadKind::ScoreUpdate])
        } else {
            Ok(Vec::new())
        }
    }

    /// Sends one score-update for the scope when some owner's summary moved
    /// since the last one sent (or since the cached summaries, if none was).
    fn publish_score_update(&self, recomputed: &ScopeRecompute) -> bool {
        let scope = recomputed.scope;
        let current = recomputed.current_summaries();
        let changed = {
            let mut last = self.last_broadcast.lock();
            let baseline = last
                .get(&scope)
                .cloned()
                .unwrap_or_else(|| recomputed.previous_summaries());
            let changed = summaries_differ(&baseline, &current);
            if changed {
                last.insert(scope, current);
            }
            changed
        };
        if changed {
            tracing::info!(%scope, "broadcasting score update");
            self.broadcaster.publish(&Notice::ScoreUpdate {
                scope,
                standings: self.cache.scope_scores(scope),
            });
        } else {
            tracing::debug!(%scope, "scores unchanged, update suppressed");
        }
        changed
    }

    async fn on_pick_change(&self, owner: &str, scope: Scope) -> Result<Vec<PayloadKind>, RouterError> {
        let recomputed = self
            .cache
            .recompute(scope, owner)
            .await
            .map_err(|source| RouterError::Recompute { scope, source })?;

        if let Some(last) = self.last_broadcast.lock().get_mut(&scope) {
            last.insert(owner.to_string(), recomputed.current.summary());
        }

        tracing::info!(%scope, owner, picks = recomputed.picks.len(), "broadcasting owner section");
        self.broadcaster.publish(&Notice::OwnerSection {
            scope,
            owner: owner.to_string(),
            score: recomputed.current,
            picks: recomputed.picks,
            events: recomputed.events,
        });
        Ok(vec![PayloadKind::SingleOwnerSection])
    }

    /// Subscribes to the feed and starts one worker per collection. Workers
    /// stop when the feed closes or `shutdown` turns true.
    ///
    /// # Errors
    /// Returns an error if either feed subscription fails.
    pub async fn spawn_workers(
        self: &Arc<Self>,
        feed: &dyn MutationFeed,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let events = feed
            .subscribe(FeedFilter::collection(Collection::Events).with_fields(&self.event_fields))
            .await?;
        let buckets = feed
            .subscribe(FeedFilter::collection(Collection::PickBuckets))
            .await?;

        Ok(vec![
            self.spawn_worker(Collection::Events, events, shutdown.clone()),
            self.spawn_worker(Collection::PickBuckets, buckets, shutdown),
        ])
    }

    fn spawn_worker(
        self: &Arc<Self>,
        collection: Collection,
        mut rx: mpsc::Receiver<ChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let retries_here = collection == Collection::Events;
        tokio::spawn(async move {
            tracing::info!(?collection, "router worker started");
            let mut retry = tokio::time::interval(router.retries.base());
            retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    change = rx.recv() => {
                        let Some(change) = change else { break };
                        if let Err(e) = router.handle(&change).await {
                            tracing::error!(?collection, error = ?e, "change handling failed");
                        }
                    }
                    _ = retry.tick(), if retries_here => {
                        router.retry_due().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(?collection, "router worker stopped");
        })
    }
}

fn summaries_differ(
    baseline: &HashMap<OwnerId, ScoreSummary>,
    current: &HashMap<OwnerId, ScoreSummary>,
) -> bool {
    current
        .iter()
        .any(|(owner, summary)| baseline.get(owner) != Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_expire() {
        let markers = InFlightMarkers::new(Duration::from_millis(0));
        markers.mark(Scope::new(2025, 1), "e1");
        assert!(!markers.live_in(Scope::new(2025, 1)));
        assert!(markers.is_empty());

        let markers = InFlightMarkers::new(Duration::from_secs(60));
        markers.mark(Scope::new(2025, 1), "e1");
        assert!(markers.live_in(Scope::new(2025, 1)));
        assert!(!markers.live_in(Scope::new(2025, 2)));
    }

    #[test]
    fn new_owner_counts_as_a_change() {
        let summary = ScoreSummary {
            total_points: 0,
            unresolved_buckets: 0,
        };
        let baseline = HashMap::new();
        let current = HashMap::from([("alice".to_string(), summary)]);
        assert!(summaries_differ(&baseline, &current));
        assert!(!summaries_differ(&current, &current));
    }

    #[test]
    fn retry_delay_doubles_up_to_ceiling() {
        let retries = RetryQueue::new(Duration::from_millis(100), Duration::from_millis(350));
        let delays: Vec<u128> = (0..4).map(|_| retries.schedule("e1").as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);
        assert!(retries.contains("e1"));
        assert!(retries.due().is_empty());

        assert!(retries.clear("e1"));
        assert!(!retries.clear("e1"));
        assert!(retries.is_empty());
    }

    #[test]
    fn elapsed_retries_come_due_in_id_order() {
        let retries = RetryQueue::new(Duration::ZERO, Duration::ZERO);
        retries.schedule("e2");
        retries.schedule("e1");
        assert_eq!(retries.due(), vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(retries.len(), 2);
    }
}
