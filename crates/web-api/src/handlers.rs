use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use parlay_core::{OwnerId, Scope};
use parlay_live::{CacheLookup, Notice};
use parlay_scoring::ParlayScore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct StandingsResponse {
    pub scope: Scope,
    pub standings: Vec<Arc<ParlayScore>>,
}

/// Every owner section of a scope as the caller would see it live.
/// `sequence` is the last one broadcast before the snapshot was taken, so
/// a client can drop queued payloads at or below it.
#[derive(Debug, Serialize, Deserialize)]
pub struct PicksResponse {
    pub scope: Scope,
    pub sequence: u64,
    pub sections: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub ready: bool,
    pub viewers: usize,
    pub last_sequence: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn standings(
    State(state): State<AppState>,
    Path((season, period)): Path<(i32, u32)>,
) -> Result<Json<StandingsResponse>, StatusCode> {
    if !state.cache.is_ready() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let scope = Scope::new(season, period);
    Ok(Json(StandingsResponse {
        scope,
        standings: state.cache.scope_scores(scope),
    }))
}

pub async fn owner_score(
    State(state): State<AppState>,
    Path((season, period, owner)): Path<(i32, u32, OwnerId)>,
) -> Result<Json<Arc<ParlayScore>>, StatusCode> {
    match state.cache.lookup(Scope::new(season, period), &owner) {
        CacheLookup::Hit(score) => Ok(Json(score)),
        CacheLookup::Missing => Err(StatusCode::NOT_FOUND),
        CacheLookup::Warming => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

pub async fn picks(
    State(state): State<AppState>,
    Path((season, period)): Path<(i32, u32)>,
    headers: HeaderMap,
) -> Result<Json<PicksResponse>, StatusCode> {
    if !state.cache.is_ready() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let scope = Scope::new(season, period);
    let viewer = state.identity.resolve(&headers);
    let sequence = state.broadcaster.last_sequence();
    let sections = state.cache.sections(scope).await.map_err(|e| {
        tracing::error!(%scope, error = ?e, "resync snapshot failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let now = state.broadcaster.now();
    let sections = sections
        .into_iter()
        .map(|section| {
            let notice = Notice::OwnerSection {
                scope,
                owner: section.owner,
                score: section.current,
                picks: section.picks,
                events: section.events,
            };
            state.broadcaster.render(&notice, &viewer, now, sequence).body
        })
        .collect();

    Ok(Json(PicksResponse {
        scope,
        sequence,
        sections,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ready = state.cache.is_ready();
    Json(HealthResponse {
        status: if ready { "ready" } else { "warming" }.to_string(),
        ready,
        viewers: state.broadcaster.viewer_count(),
        last_sequence: state.broadcaster.last_sequence(),
        timestamp: state.broadcaster.now(),
    })
}
