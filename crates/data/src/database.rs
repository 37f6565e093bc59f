//! PostgreSQL-backed stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parlay_core::{
    DatabaseConfig, Event, EventStore, GradedOutcomes, PickBucket, PickStore, Scope,
};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::repositories::Repositories;

/// Event and pick store over a shared connection pool.
pub struct PgStore {
    pool: PgPool,
    repos: Repositories,
}

impl PgStore {
    /// Connects to the configured database.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .with_context(|| format!("connecting to {}", redact(&config.url)))?;
        Ok(Self::with_pool(pool))
    }

    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            repos: Repositories::new(pool.clone()),
            pool,
        }
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub const fn repositories(&self) -> &Repositories {
        &self.repos
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn events_by_scope(&self, scope: Scope) -> Result<Vec<Event>> {
        self.repos.events.by_scope(scope).await
    }

    async fn event_by_id(&self, event_id: &str) -> Result<Option<Event>> {
        self.repos.events.by_id(event_id).await
    }
}

#[async_trait]
impl PickStore for PgStore {
    async fn pick_bucket(&self, owner: &str, scope: Scope) -> Result<Option<PickBucket>> {
        self.repos.buckets.find(owner, scope).await
    }

    async fn buckets_by_scope(&self, scope: Scope) -> Result<Vec<PickBucket>> {
        self.repos.buckets.by_scope(scope).await
    }

    async fn write_graded_outcomes(
        &self,
        scope: Scope,
        event_id: &str,
        outcomes: &GradedOutcomes,
    ) -> Result<()> {
        self.repos
            .buckets
            .write_outcomes(scope, event_id, outcomes)
            .await
    }

    async fn known_scopes(&self) -> Result<Vec<Scope>> {
        self.repos.buckets.scopes().await
    }
}

/// Masks the password in a connection URL for logs and operator output.
#[must_use]
pub fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let creds = &url[scheme + 3..at];
            let user = creds.split(':').next().unwrap_or_default();
            format!("{}{user}:***{}", &url[..scheme + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}
