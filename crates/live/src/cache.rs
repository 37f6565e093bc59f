//! In-memory projection of parlay scores.
//!
//! Entries are only ever replaced whole, by `recompute` or `recompute_scope`.
//! Store reads and grading happen before any lock is taken; the write lock
//! covers a single scope shard and only for the install. Every recompute
//! draws a generation number before it reads, and an install never replaces
//! an entry stamped with a newer generation.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use parlay_core::{EventId, EventStore, OwnerId, Pick, PickBucket, PickStore, Scope};
use parlay_scoring::{index_events, EventIndex, ParlayScore, ParlayScoringEngine, ScoreSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    generation: u64,
    score: Arc<ParlayScore>,
}

type Shard = RwLock<HashMap<OwnerId, Entry>>;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Backfill has not finished; absence is not yet meaningful.
    Warming,
    /// Never computed.
    Missing,
    Hit(Arc<ParlayScore>),
}

/// One owner's recomputation.
#[derive(Debug, Clone)]
pub struct OwnerRecompute {
    pub owner: OwnerId,
    pub previous: Option<ScoreSummary>,
    pub current: Arc<ParlayScore>,
    /// Picks as graded for this pass, with their events, for rendering.
    pub picks: Vec<Pick>,
    pub events: Arc<EventIndex>,
}

impl OwnerRecompute {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous != Some(self.current.summary())
    }
}

/// Result of a whole-scope recomputation.
#[derive(Debug, Clone)]
pub struct ScopeRecompute {
    pub scope: Scope,
    pub owners: Vec<OwnerRecompute>,
    /// Owners whose entry was left stale.
    pub failed: Vec<OwnerId>,
}

impl ScopeRecompute {
    #[must_use]
    pub fn previous_summaries(&self) -> HashMap<OwnerId, ScoreSummary> {
        self.owners
            .iter()
            .filter_map(|o| o.previous.map(|s| (o.owner.clone(), s)))
            .collect()
    }

    #[must_use]
    pub fn current_summaries(&self) -> HashMap<OwnerId, ScoreSummary> {
        self.owners
            .iter()
            .map(|o| (o.owner.clone(), o.current.summary()))
            .collect()
    }
}

pub struct ScoreCache {
    events: Arc<dyn EventStore>,
    picks: Arc<dyn PickStore>,
    engine: Arc<ParlayScoringEngine>,
    scopes: RwLock<HashMap<Scope, Arc<Shard>>>,
    /// Last scope each event was seen in; survives deletion of the event.
    event_scopes: RwLock<HashMap<EventId, Scope>>,
    generation: AtomicU64,
    ready: AtomicBool,
}

impl ScoreCache {
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        picks: Arc<dyn PickStore>,
        engine: Arc<ParlayScoringEngine>,
    ) -> Self {
        Self {
            events,
            picks,
            engine,
            scopes: RwLock::new(HashMap::new()),
            event_scopes: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &ParlayScoringEngine {
        &self.engine
    }

    /// True once `backfill` has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Last computed score, or `None` if it was never computed.
    #[must_use]
    pub fn get(&self, scope: Scope, owner: &str) -> Option<Arc<ParlayScore>> {
        let shard = self.scopes.read().get(&scope).cloned()?;
        let entry = shard.read().get(owner).map(|e| Arc::clone(&e.score));
        entry
    }

    #[must_use]
    pub fn lookup(&self, scope: Scope, owner: &str) -> CacheLookup {
        if !self.is_ready() {
            return CacheLookup::Warming;
        }
        self.get(scope, owner)
            .map_or(CacheLookup::Missing, CacheLookup::Hit)
    }

    /// Standings for a scope: owners with at least one scored bucket,
    /// highest total first.
    #[must_use]
    pub fn scope_scores(&self, scope: Scope) -> Vec<Arc<ParlayScore>> {
        let Some(shard) = self.scopes.read().get(&scope).cloned() else {
            return Vec::new();
        };
        let mut scores: Vec<Arc<ParlayScore>> = shard
            .read()
            .values()
            .filter(|e| e.score.has_picks())
            .map(|e| Arc::clone(&e.score))
            .collect();
        scores.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.owner.cmp(&b.owner))
        });
        scores
    }

    #[must_use]
    pub fn summaries(&self, scope: Scope) -> HashMap<OwnerId, ScoreSummary> {
        self.scopes
            .read()
            .get(&scope)
            .map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(owner, e)| (owner.clone(), e.score.summary()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recomputes one owner from current store state and installs the result.
    ///
    /// # Errors
    /// Returns an error if the stores cannot be read or the owner's bucket is
    /// malformed. The cached entry is left untouched in that case.
    pub async fn recompute(&self, scope: Scope, owner: &str) -> Result<OwnerRecompute> {
        let generation = self.next_generation();

        let events = self
            .events
            .events_by_scope(scope)
            .await
            .with_context(|| format!("loading events for {scope}"))?;
        let bucket = self
            .picks
            .pick_bucket(owner, scope)
            .await
            .with_context(|| format!("loading bucket for {owner} in {scope}"))?;

        let events = Arc::new(index_events(events));
        self.remember_events(scope, &events);
        let (score, picks) = self.score(owner, scope, bucket.as_ref(), &events)?;

        let shard = self.shard(scope);
        let (previous, current) = install(&mut shard.write(), owner, generation, score);

        tracing::debug!(%scope, owner, points = current.total_points, "owner recomputed");
        Ok(OwnerRecompute {
            owner: owner.to_string(),
            previous,
            current,
            picks,
            events,
        })
    }

    /// Recomputes every owner in a scope from one read of its events and
    /// buckets. Owners cached earlier whose bucket no longer exists are reset
    /// to an empty score. A malformed bucket keeps its owner's stale entry.
    ///
    /// # Errors
    /// Returns an error if the scope cannot be read; nothing is installed.
    pub async fn recompute_scope(&self, scope: Scope) -> Result<ScopeRecompute> {
        let generation = self.next_generation();

        let events = self
            .events
            .events_by_scope(scope)
            .await
            .with_context(|| format!("loading events for {scope}"))?;
        let buckets = self
            .picks
            .buckets_by_scope(scope)
            .await
            .with_context(|| format!("loading buckets for {scope}"))?;

        let events = Arc::new(index_events(events));
        self.remember_events(scope, &events);
        let mut computed = Vec::with_capacity(buckets.len());
        let mut failed = Vec::new();

        for bucket in &buckets {
            match self.score(&bucket.owner, scope, Some(bucket), &events) {
                Ok(scored) => computed.push((bucket.owner.clone(), scored)),
                Err(e) => {
                    tracing::error!(%scope, owner = %bucket.owner, error = %e, "recompute failed, keeping stale score");
                    failed.push(bucket.owner.clone());
                }
            }
        }

        let shard = self.shard(scope);
        let mut owners = Vec::with_capacity(computed.len());
        {
            let mut guard = shard.write();

            let vanished: Vec<OwnerId> = guard
                .keys()
                .filter(|owner| !buckets.iter().any(|b| &b.owner == *owner))
                .cloned()
                .collect();
            for owner in vanished {
                let empty = ParlayScore::empty(owner.clone(), scope);
                computed.push((owner, (empty, Vec::new())));
            }

            for (owner, (score, picks)) in computed {
                let (previous, current) = install(&mut guard, &owner, generation, score);
                owners.push(OwnerRecompute {
                    owner,
                    previous,
                    current,
                    picks,
                    events: Arc::clone(&events),
                });
            }
        }

        tracing::debug!(%scope, owners = owners.len(), failed = failed.len(), "scope recomputed");
        Ok(ScopeRecompute {
            scope,
            owners,
            failed,
        })
    }

    /// Recomputes every known scope, then marks the cache ready. A scope that
    /// fails to load is logged and skipped.
    ///
    /// # Errors
    /// Returns an error if the list of scopes cannot be read.
    pub async fn backfill(&self) -> Result<usize> {
        let scopes = self
            .picks
            .known_scopes()
            .await
            .context("listing scopes for backfill")?;

        let mut loaded = 0;
        for scope in &scopes {
            match self.recompute_scope(*scope).await {
                Ok(result) => loaded += result.owners.len(),
                Err(e) => tracing::error!(%scope, error = %e, "backfill skipped scope"),
            }
        }

        self.ready.store(true, Ordering::Release);
        tracing::info!(scopes = scopes.len(), owners = loaded, "score cache ready");
        Ok(loaded)
    }

    /// Every owner's graded picks and score for `scope`, read from the stores
    /// without installing anything. `previous` holds the cached summary.
    /// Malformed buckets are skipped.
    ///
    /// # Errors
    /// Returns an error if the scope cannot be read.
    pub async fn sections(&self, scope: Scope) -> Result<Vec<OwnerRecompute>> {
        let events = self
            .events
            .events_by_scope(scope)
            .await
            .with_context(|| format!("loading events for {scope}"))?;
        let buckets = self
            .picks
            .buckets_by_scope(scope)
            .await
            .with_context(|| format!("loading buckets for {scope}"))?;

        let events = Arc::new(index_events(events));
        let mut sections = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            match self.score(&bucket.owner, scope, Some(bucket), &events) {
                Ok((score, picks)) => sections.push(OwnerRecompute {
                    owner: bucket.owner.clone(),
                    previous: self.get(scope, &bucket.owner).map(|s| s.summary()),
                    current: Arc::new(score),
                    picks,
                    events: Arc::clone(&events),
                }),
                Err(e) => {
                    tracing::warn!(%scope, owner = %bucket.owner, error = %e, "section skipped");
                }
            }
        }
        Ok(sections)
    }

    /// Scope the event belonged to at the last recomputation that saw it.
    #[must_use]
    pub fn scope_of_event(&self, event_id: &str) -> Option<Scope> {
        self.event_scopes.read().get(event_id).copied()
    }

    fn remember_events(&self, scope: Scope, events: &EventIndex) {
        let mut known = self.event_scopes.write();
        for id in events.keys() {
            known.insert(id.clone(), scope);
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn shard(&self, scope: Scope) -> Arc<Shard> {
        if let Some(shard) = self.scopes.read().get(&scope) {
            return Arc::clone(shard);
        }
        Arc::clone(self.scopes.write().entry(scope).or_default())
    }

    fn score(
        &self,
        owner: &str,
        scope: Scope,
        bucket: Option<&PickBucket>,
        events: &EventIndex,
    ) -> Result<(ParlayScore, Vec<Pick>)> {
        let Some(bucket) = bucket else {
            return Ok((ParlayScore::empty(owner, scope), Vec::new()));
        };
        bucket
            .validate()
            .with_context(|| format!("bucket for {owner} in {scope}"))?;

        let graded = self.engine.grade_bucket(bucket, events);
        let score = self.engine.score(owner, scope, &graded);
        Ok((score, graded.into_iter().map(|g| g.pick).collect()))
    }
}

/// Installs `score` unless a newer generation is already present. Returns the
/// previous summary and whichever entry is current afterwards.
fn install(
    shard: &mut HashMap<OwnerId, Entry>,
    owner: &str,
    generation: u64,
    score: ParlayScore,
) -> (Option<ScoreSummary>, Arc<ParlayScore>) {
    let previous = shard.get(owner).cloned();
    if let Some(existing) = &previous {
        if existing.generation > generation {
            tracing::debug!(owner, generation, newer = existing.generation, "stale recompute discarded");
            return (Some(existing.score.summary()), Arc::clone(&existing.score));
        }
    }

    let score = Arc::new(score);
    shard.insert(
        owner.to_string(),
        Entry {
            generation,
            score: Arc::clone(&score),
        },
    );
    (previous.map(|e| e.score.summary()), score)
}
