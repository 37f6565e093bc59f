//! Mutation feed over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! Table triggers (see `migrations/`) publish each change as a JSON
//! `ChangeEvent` on one channel. Every subscription holds its own listener
//! connection and applies its filter before delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parlay_core::{ChangeEvent, FeedFilter, MutationFeed};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;

pub const CHANGE_CHANNEL: &str = "parlay_changes";

const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct PgFeed {
    pool: PgPool,
    channel: String,
    capacity: usize,
}

impl PgFeed {
    #[must_use]
    pub fn new(pool: PgPool, capacity: usize) -> Self {
        Self {
            pool,
            channel: CHANGE_CHANNEL.to_string(),
            capacity: capacity.max(1),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// Decodes one notification payload.
///
/// # Errors
/// Returns an error if the payload is not a `ChangeEvent`.
pub fn decode_change(payload: &str) -> Result<ChangeEvent> {
    serde_json::from_str(payload).context("decoding change notification")
}

#[async_trait]
impl MutationFeed for PgFeed {
    async fn subscribe(&self, filter: FeedFilter) -> Result<mpsc::Receiver<ChangeEvent>> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .context("opening change listener")?;
        listener
            .listen(&self.channel)
            .await
            .with_context(|| format!("listening on {}", self.channel))?;
        tracing::info!(channel = %self.channel, collection = ?filter.collection, "change feed subscribed");

        let (tx, rx) = mpsc::channel(self.capacity);
        tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(error = %e, "change listener error, retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                };
                let change = match decode_change(notification.payload()) {
                    Ok(change) => change,
                    Err(e) => {
                        tracing::warn!(error = %e, payload = notification.payload(), "skipping malformed notification");
                        continue;
                    }
                };
                if !filter.accepts(&change) {
                    continue;
                }
                if tx.send(change).await.is_err() {
                    break;
                }
            }
            tracing::debug!("change feed subscriber closed");
        });

        Ok(rx)
    }
}
