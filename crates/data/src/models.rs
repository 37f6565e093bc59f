//! Row types for the PostgreSQL schema in `migrations/`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parlay_core::{Event, EventState, Line, Pick, PickBucket, Scope, Scoreline};
use rust_decimal::Decimal;
use sqlx::types::Json;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: String,
    pub season: i32,
    pub period: i32,
    pub start_time: DateTime<Utc>,
    pub home: String,
    pub away: String,
    pub state: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub spread: Option<Decimal>,
    pub total: Option<Decimal>,
}

impl EventRow {
    /// # Errors
    /// Returns an error for an unknown state or a negative period.
    pub fn into_event(self) -> Result<Event> {
        let state = parse_state(&self.state)?;
        let period = u32::try_from(self.period)
            .with_context(|| format!("event {} has negative period {}", self.id, self.period))?;
        let score = match (self.home_score, self.away_score) {
            (Some(home), Some(away)) => Some(Scoreline { home, away }),
            _ => None,
        };
        let line = (self.spread.is_some() || self.total.is_some()).then_some(Line {
            spread: self.spread,
            total: self.total,
        });
        Ok(Event {
            id: self.id,
            season: self.season,
            period,
            start_time: self.start_time,
            home: self.home,
            away: self.away,
            state,
            score,
            line,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BucketRow {
    pub owner: String,
    pub season: i32,
    pub period: i32,
    pub picks: Json<Vec<Pick>>,
    pub updated_at: DateTime<Utc>,
}

impl BucketRow {
    /// # Errors
    /// Returns an error for a negative period.
    pub fn into_bucket(self) -> Result<PickBucket> {
        let period = u32::try_from(self.period)
            .with_context(|| format!("bucket for {} has negative period {}", self.owner, self.period))?;
        Ok(PickBucket {
            owner: self.owner,
            scope: Scope::new(self.season, period),
            picks: self.picks.0,
            updated_at: self.updated_at,
        })
    }
}

#[must_use]
pub const fn state_name(state: EventState) -> &'static str {
    match state {
        EventState::Scheduled => "scheduled",
        EventState::InProgress => "in_progress",
        EventState::Completed => "completed",
        EventState::Postponed => "postponed",
    }
}

/// # Errors
/// Returns an error if `name` is not a known event state.
pub fn parse_state(name: &str) -> Result<EventState> {
    match name {
        "scheduled" => Ok(EventState::Scheduled),
        "in_progress" => Ok(EventState::InProgress),
        "completed" => Ok(EventState::Completed),
        "postponed" => Ok(EventState::Postponed),
        other => Err(anyhow!("unknown event state {other:?}")),
    }
}

/// Postgres `INTEGER` for a period.
///
/// # Errors
/// Returns an error if the period does not fit.
pub fn period_param(scope: Scope) -> Result<i32> {
    i32::try_from(scope.period).with_context(|| format!("period out of range in {scope}"))
}
