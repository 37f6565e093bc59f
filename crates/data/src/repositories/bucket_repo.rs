//! Pick bucket repository.
//!
//! Picks are stored as a JSONB array on one row per owner and scope.

use anyhow::{Context, Result};
use parlay_core::{GradedOutcomes, PickBucket, Scope};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::{period_param, BucketRow};

#[derive(Debug, Clone)]
pub struct BucketRepository {
    pool: PgPool,
}

impl BucketRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find(&self, owner: &str, scope: Scope) -> Result<Option<PickBucket>> {
        let row = sqlx::query_as::<_, BucketRow>(
            r"
            SELECT owner, season, period, picks, updated_at
            FROM pick_buckets
            WHERE owner = $1 AND season = $2 AND period = $3
            ",
        )
        .bind(owner)
        .bind(scope.season)
        .bind(period_param(scope)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BucketRow::into_bucket).transpose()
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn by_scope(&self, scope: Scope) -> Result<Vec<PickBucket>> {
        let rows = sqlx::query_as::<_, BucketRow>(
            r"
            SELECT owner, season, period, picks, updated_at
            FROM pick_buckets
            WHERE season = $1 AND period = $2
            ORDER BY owner ASC
            ",
        )
        .bind(scope.season)
        .bind(period_param(scope)?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BucketRow::into_bucket).collect()
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn scopes(&self) -> Result<Vec<Scope>> {
        let rows: Vec<(i32, i32)> = sqlx::query_as(
            "SELECT DISTINCT season, period FROM pick_buckets ORDER BY season, period",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(season, period)| {
                let period = u32::try_from(period)
                    .with_context(|| format!("negative period {period} in season {season}"))?;
                Ok(Scope::new(season, period))
            })
            .collect()
    }

    /// Applies graded outcomes to the picks on one event in a single
    /// transaction. Rows are locked while they are rewritten.
    ///
    /// # Errors
    /// Returns an error if any read or write fails; nothing is committed.
    pub async fn write_outcomes(
        &self,
        scope: Scope,
        event_id: &str,
        outcomes: &GradedOutcomes,
    ) -> Result<()> {
        let period = period_param(scope)?;
        let mut tx = self.pool.begin().await?;

        for (owner, graded) in outcomes {
            let row: Option<(Json<Vec<parlay_core::Pick>>,)> = sqlx::query_as(
                r"
                SELECT picks FROM pick_buckets
                WHERE owner = $1 AND season = $2 AND period = $3
                FOR UPDATE
                ",
            )
            .bind(owner)
            .bind(scope.season)
            .bind(period)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((Json(mut picks),)) = row else {
                tracing::warn!(%owner, %scope, event_id, "graded outcome for missing bucket");
                continue;
            };

            let mut changed = false;
            for pick in picks.iter_mut().filter(|p| p.event_id == event_id) {
                if let Some(g) = graded.iter().find(|g| g.kind == pick.kind) {
                    changed |= pick.outcome != g.outcome;
                    pick.outcome = g.outcome;
                }
            }
            if !changed {
                continue;
            }

            sqlx::query(
                r"
                UPDATE pick_buckets SET picks = $4, updated_at = now()
                WHERE owner = $1 AND season = $2 AND period = $3
                ",
            )
            .bind(owner)
            .bind(scope.season)
            .bind(period)
            .bind(Json(&picks))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
