//! Per-viewer fan-out of notices.
//!
//! Every notice is rendered separately for each connected viewer through the
//! visibility rules, then offered to that viewer's bounded queue without
//! waiting. A full queue drops the newest payload and flags the viewer so its
//! next delivery is preceded by `resync-required`. All viewers see the same
//! sequence number for the same notice.

use crate::payload::{resync_required, Notice, Payload};
use crate::registry::{Target, ViewerId, ViewerRegistry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parlay_core::{BroadcastConfig, Clock, Viewer};
use parlay_scoring::VisibilityRuleEngine;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sequence: u64,
    pub delivered: usize,
    pub dropped: usize,
}

enum Sent {
    Delivered,
    Dropped,
    Closed,
}

pub struct Broadcaster {
    registry: ViewerRegistry,
    visibility: VisibilityRuleEngine,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
    /// Held across sequence assignment and fan-out so each viewer's queue
    /// sees sequences in order.
    publish_lock: Mutex<()>,
    tokens: AtomicU64,
    queue_capacity: usize,
    keep_alive: Duration,
}

impl Broadcaster {
    #[must_use]
    pub fn new(
        config: &BroadcastConfig,
        visibility: VisibilityRuleEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: ViewerRegistry::new(),
            visibility,
            clock,
            sequence: AtomicU64::new(0),
            publish_lock: Mutex::new(()),
            tokens: AtomicU64::new(0),
            queue_capacity: config.queue_capacity.max(1),
            keep_alive: Duration::from_secs(config.keep_alive_secs.max(1)),
        }
    }

    /// Connects a viewer. Dropping the returned guard disconnects it.
    pub fn subscribe(self: &Arc<Self>, id: impl Into<ViewerId>, viewer: Viewer) -> Subscription {
        let id = id.into();
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let replaced = self.registry.insert(Target {
            id: id.clone(),
            viewer: viewer.clone(),
            tx,
            needs_resync: Arc::new(AtomicBool::new(false)),
            token,
        });
        if replaced {
            tracing::debug!(viewer_id = %id, "viewer re-subscribed, previous connection replaced");
        }
        tracing::info!(viewer_id = %id, ?viewer, viewers = self.registry.len(), "viewer subscribed");

        Subscription {
            id,
            token,
            rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            tracing::info!(viewer_id = %id, "viewer unsubscribed");
        }
        removed
    }

    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.registry.len()
    }

    /// Sequence number of the most recent notice, 0 before the first.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Renders `notice` for every connected viewer and queues it.
    pub fn publish(&self, notice: &Notice) -> Delivery {
        let _order = self.publish_lock.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.clock.now();
        let mut delivery = Delivery {
            sequence,
            ..Delivery::default()
        };

        for target in self.registry.snapshot() {
            let payload = self.render(notice, &target.viewer, now, sequence);
            match deliver(&target, payload) {
                Sent::Delivered => delivery.delivered += 1,
                Sent::Dropped => delivery.dropped += 1,
                Sent::Closed => {
                    if self.registry.remove_if(&target.id, target.token) {
                        tracing::debug!(viewer_id = %target.id, "closed viewer removed during fan-out");
                    }
                }
            }
        }

        tracing::debug!(
            sequence,
            kind = ?notice.kind(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "notice published"
        );
        delivery
    }

    pub fn send_keep_alive(&self) -> Delivery {
        self.publish(&Notice::KeepAlive { at: self.clock.now() })
    }

    /// Sends keep-alives every `keep_alive_secs` until `shutdown` turns true
    /// or its sender is dropped.
    pub fn spawn_keep_alive(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        let period = self.keep_alive;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        broadcaster.send_keep_alive();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("keep-alive task stopped");
        })
    }

    /// Builds the payload `viewer` is allowed to see for `notice`.
    #[must_use]
    pub fn render(&self, notice: &Notice, viewer: &Viewer, now: DateTime<Utc>, sequence: u64) -> Payload {
        let body = match notice {
            Notice::AffectedPicks { event, picks, .. } => {
                let mut owners = Map::new();
                for (owner, owner_picks) in picks {
                    let filtered = self.visibility.filter(
                        now,
                        viewer,
                        owner,
                        owner_picks.iter().map(|p| (p, event)),
                    );
                    owners.insert(
                        owner.clone(),
                        json!({ "picks": filtered.visible, "hidden": filtered.hidden }),
                    );
                }
                json!({
                    "event": {
                        "id": event.id,
                        "state": event.state,
                        "score": event.score,
                    },
                    "owners": Value::Object(owners),
                })
            }
            Notice::ScoreUpdate { standings, .. } => json!({ "standings": standings }),
            Notice::OwnerSection {
                owner,
                score,
                picks,
                events,
                ..
            } => {
                let filtered = self.visibility.filter(
                    now,
                    viewer,
                    owner,
                    picks
                        .iter()
                        .filter_map(|p| events.get(&p.event_id).map(|e| (p, e))),
                );
                json!({
                    "owner": owner,
                    "score": score,
                    "picks": filtered.visible,
                    "hidden": filtered.hidden,
                })
            }
            Notice::KeepAlive { at } => json!({ "at": at }),
        };

        Payload {
            sequence,
            kind: notice.kind(),
            scope: notice.scope(),
            target_selector: notice.target_selector(),
            body,
        }
    }
}

fn deliver(target: &Target, payload: Payload) -> Sent {
    let sequence = payload.sequence;

    if target.take_resync() {
        match target.tx.try_send(resync_required(sequence)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                target.flag_resync();
                tracing::warn!(viewer_id = %target.id, sequence, "viewer queue still full, payload dropped");
                return Sent::Dropped;
            }
            Err(TrySendError::Closed(_)) => return Sent::Closed,
        }
    }

    match target.tx.try_send(payload) {
        Ok(()) => Sent::Delivered,
        Err(TrySendError::Full(_)) => {
            target.flag_resync();
            tracing::warn!(viewer_id = %target.id, sequence, "viewer queue full, payload dropped");
            Sent::Dropped
        }
        Err(TrySendError::Closed(_)) => Sent::Closed,
    }
}

/// A viewer's payload stream. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: ViewerId,
    token: u64,
    rx: mpsc::Receiver<Payload>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            if broadcaster.registry.remove_if(&self.id, self.token) {
                tracing::info!(viewer_id = %self.id, "viewer disconnected");
            }
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("viewers", &self.registry.len())
            .field("sequence", &self.last_sequence())
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}
