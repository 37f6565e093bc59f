//! Event repository.

use anyhow::Result;
use parlay_core::{Event, Scope};
use sqlx::PgPool;

use crate::models::{period_param, EventRow};

const SELECT_EVENT: &str = r"
    SELECT id, season, period, start_time, home, away, state,
           home_score, away_score, spread, total
    FROM events
";

#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Events in a scope, earliest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be converted.
    pub async fn by_scope(&self, scope: Scope) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{SELECT_EVENT} WHERE season = $1 AND period = $2 ORDER BY start_time ASC, id ASC"
        ))
        .bind(scope.season)
        .bind(period_param(scope)?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// # Errors
    /// Returns an error if the query fails or the row cannot be converted.
    pub async fn by_id(&self, event_id: &str) -> Result<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = $1"))
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(EventRow::into_event).transpose()
    }
}
