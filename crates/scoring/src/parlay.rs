//! Parlay scoring over graded picks.
//!
//! The all-or-nothing rule lives in [`score_bucket`] and is shared by both
//! bucketing schemes; only the grouping of picks differs between them.

use crate::bucketing::{BucketKey, BucketingScheme};
use crate::grader::ResultGrader;
use parlay_core::{Event, EventId, Outcome, OwnerId, Pick, PickBucket, ScoringConfig, Scope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub type EventIndex = HashMap<EventId, Event>;

#[must_use]
pub fn index_events(events: impl IntoIterator<Item = Event>) -> EventIndex {
    events.into_iter().map(|e| (e.id.clone(), e)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "points")]
pub enum BucketScore {
    Resolved(u32),
    /// At least one leg is still undecided and nothing has lost yet.
    Pending,
}

/// Scores one bucket of outcomes.
///
/// Pushes are dropped first. Fewer than `min_size` remaining legs scores 0,
/// any loss scores 0, any pending leg leaves the bucket unresolved, and a
/// clean sweep pays one point per remaining leg.
#[must_use]
pub fn score_bucket(outcomes: &[Outcome], min_size: usize) -> BucketScore {
    let legs: Vec<Outcome> = outcomes
        .iter()
        .copied()
        .filter(|o| *o != Outcome::Push)
        .collect();

    if legs.len() < min_size {
        return BucketScore::Resolved(0);
    }
    if legs.contains(&Outcome::Loss) {
        return BucketScore::Resolved(0);
    }
    if legs.contains(&Outcome::Pending) {
        return BucketScore::Pending;
    }
    BucketScore::Resolved(u32::try_from(legs.len()).unwrap_or(u32::MAX))
}

/// A pick with the outcome grading assigned it and the bucket it falls in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedPick {
    pub pick: Pick,
    pub outcome: Outcome,
    pub bucket: BucketKey,
}

/// Comparable digest of a score, used to decide whether a change is worth
/// broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_points: u32,
    pub unresolved_buckets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParlayScore {
    pub owner: OwnerId,
    pub scope: Scope,
    pub buckets: BTreeMap<BucketKey, BucketScore>,
    /// Sum of resolved buckets only.
    pub total_points: u32,
    pub unresolved_buckets: usize,
}

impl ParlayScore {
    #[must_use]
    pub fn empty(owner: impl Into<OwnerId>, scope: Scope) -> Self {
        Self {
            owner: owner.into(),
            scope,
            buckets: BTreeMap::new(),
            total_points: 0,
            unresolved_buckets: 0,
        }
    }

    #[must_use]
    pub fn from_buckets(
        owner: impl Into<OwnerId>,
        scope: Scope,
        buckets: BTreeMap<BucketKey, BucketScore>,
    ) -> Self {
        let total_points = buckets
            .values()
            .map(|b| match b {
                BucketScore::Resolved(points) => *points,
                BucketScore::Pending => 0,
            })
            .sum();
        let unresolved_buckets = buckets
            .values()
            .filter(|b| **b == BucketScore::Pending)
            .count();
        Self {
            owner: owner.into(),
            scope,
            buckets,
            total_points,
            unresolved_buckets,
        }
    }

    #[must_use]
    pub fn has_picks(&self) -> bool {
        !self.buckets.is_empty()
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.unresolved_buckets == 0
    }

    #[must_use]
    pub const fn summary(&self) -> ScoreSummary {
        ScoreSummary {
            total_points: self.total_points,
            unresolved_buckets: self.unresolved_buckets,
        }
    }
}

/// Grades and scores pick buckets under the scheme in force for their season.
#[derive(Debug)]
pub struct ParlayScoringEngine {
    config: ScoringConfig,
    grader: ResultGrader,
}

impl ParlayScoringEngine {
    #[must_use]
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            grader: ResultGrader::new(),
        }
    }

    #[must_use]
    pub const fn grader(&self) -> &ResultGrader {
        &self.grader
    }

    #[must_use]
    pub const fn config(&self) -> &ScoringConfig {
        &self.config
    }

    #[must_use]
    pub fn scheme(&self, scope: Scope) -> BucketingScheme {
        BucketingScheme::for_scope(scope, &self.config)
    }

    /// Grades every pick in `bucket`. Picks whose event is unknown or whose
    /// selection cannot be graded are logged and left out.
    #[must_use]
    pub fn grade_bucket(&self, bucket: &PickBucket, events: &EventIndex) -> Vec<GradedPick> {
        let scheme = self.scheme(bucket.scope);
        bucket
            .picks
            .iter()
            .filter_map(|pick| {
                let Some(event) = events.get(&pick.event_id) else {
                    tracing::warn!(
                        owner = %bucket.owner,
                        scope = %bucket.scope,
                        event_id = %pick.event_id,
                        "pick references unknown event, excluded"
                    );
                    return None;
                };
                let outcome = self.grader.grade(pick, event)?;
                Some(GradedPick {
                    pick: Pick {
                        outcome,
                        ..pick.clone()
                    },
                    outcome,
                    bucket: scheme.bucket_for(event.start_time),
                })
            })
            .collect()
    }

    /// Groups graded picks into buckets and scores each one.
    #[must_use]
    pub fn score(&self, owner: &str, scope: Scope, graded: &[GradedPick]) -> ParlayScore {
        let mut grouped: BTreeMap<BucketKey, Vec<Outcome>> = BTreeMap::new();
        for g in graded {
            grouped.entry(g.bucket).or_default().push(g.outcome);
        }

        let buckets = grouped
            .into_iter()
            .map(|(key, outcomes)| (key, score_bucket(&outcomes, self.config.min_parlay_size)))
            .collect();

        ParlayScore::from_buckets(owner, scope, buckets)
    }

    /// Grade-then-score for one bucket.
    #[must_use]
    pub fn score_pick_bucket(&self, bucket: &PickBucket, events: &EventIndex) -> ParlayScore {
        let graded = self.grade_bucket(bucket, events);
        self.score(&bucket.owner, bucket.scope, &graded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc, Weekday};
    use parlay_core::{EventState, LegacyBonusRule, Line, PickKind, Scoreline, Selection};
    use rust_decimal_macros::dec;
    use parlay_core::Outcome::{Loss, Pending, Push, Win};

    #[test]
    fn push_is_excluded_before_counting() {
        assert_eq!(score_bucket(&[Win, Push], 1), BucketScore::Resolved(1));
        assert_eq!(score_bucket(&[Win, Push, Push], 1), BucketScore::Resolved(1));
        assert_eq!(score_bucket(&[Win, Win, Push], 2), BucketScore::Resolved(2));
    }

    #[test]
    fn push_only_bucket_scores_zero() {
        assert_eq!(score_bucket(&[Push, Push], 2), BucketScore::Resolved(0));
    }

    #[test]
    fn minimum_size_applies_after_push_exclusion() {
        assert_eq!(score_bucket(&[Win, Push], 2), BucketScore::Resolved(0));
        assert_eq!(score_bucket(&[Win], 2), BucketScore::Resolved(0));
        assert_eq!(score_bucket(&[Pending], 2), BucketScore::Resolved(0));
    }

    #[test]
    fn any_loss_zeroes_the_bucket() {
        assert_eq!(score_bucket(&[Win, Win, Loss], 2), BucketScore::Resolved(0));
        assert_eq!(score_bucket(&[Loss, Pending], 2), BucketScore::Resolved(0));
    }

    #[test]
    fn pending_leg_leaves_bucket_unresolved() {
        assert_eq!(score_bucket(&[Win, Pending], 2), BucketScore::Pending);
        assert_eq!(score_bucket(&[Pending, Pending, Push], 2), BucketScore::Pending);
    }

    #[test]
    fn clean_sweep_pays_one_point_per_leg() {
        assert_eq!(score_bucket(&[Win, Win], 2), BucketScore::Resolved(2));
        assert_eq!(score_bucket(&[Win, Win, Win, Win], 2), BucketScore::Resolved(4));
    }

    #[test]
    fn totals_exclude_unresolved_buckets() {
        let day = |d| BucketKey::Day(NaiveDate::from_ymd_opt(2025, 9, d).unwrap());
        let buckets = BTreeMap::from([
            (day(4), BucketScore::Resolved(3)),
            (day(7), BucketScore::Pending),
            (day(8), BucketScore::Resolved(0)),
        ]);
        let score = ParlayScore::from_buckets("alice", Scope::new(2025, 1), buckets);
        assert_eq!(score.total_points, 3);
        assert_eq!(score.unresolved_buckets, 1);
        assert!(!score.is_resolved());
        assert!(score.has_picks());
    }

    #[test]
    fn empty_score_is_distinguishable_from_zero() {
        let empty = ParlayScore::empty("alice", Scope::new(2025, 1));
        let zero = ParlayScore::from_buckets(
            "alice",
            Scope::new(2025, 1),
            BTreeMap::from([(BucketKey::Regular, BucketScore::Resolved(0))]),
        );
        assert!(!empty.has_picks());
        assert!(zero.has_picks());
        assert_eq!(empty.summary(), zero.summary());
    }

    fn event(id: &str, start: DateTime<Utc>, state: EventState, score: (i32, i32)) -> Event {
        Event {
            id: id.to_string(),
            season: start.format("%Y").to_string().parse().unwrap(),
            period: 1,
            start_time: start,
            home: format!("{id}-home"),
            away: format!("{id}-away"),
            state,
            score: Some(Scoreline {
                home: score.0,
                away: score.1,
            }),
            line: Some(Line {
                spread: Some(dec!(-3.5)),
                total: Some(dec!(44.5)),
            }),
        }
    }

    fn home_spread(id: &str) -> Pick {
        Pick::new(id, PickKind::Spread, Selection::Participant(format!("{id}-home")))
    }

    fn sunday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 7, hour, 0, 0).unwrap()
    }

    #[test]
    fn modern_scheme_scores_each_day() {
        let engine = ParlayScoringEngine::new(ScoringConfig::default());
        let thursday = Utc.with_ymd_and_hms(2025, 9, 5, 0, 20, 0).unwrap();
        let events = index_events([
            event("thu", thursday, EventState::Completed, (24, 20)),
            event("s1", sunday(17), EventState::Completed, (30, 10)),
            event("s2", sunday(20), EventState::Completed, (21, 14)),
        ]);
        let bucket = PickBucket::new(
            "alice",
            Scope::new(2025, 1),
            vec![home_spread("thu"), home_spread("s1"), home_spread("s2")],
        );

        let score = engine.score_pick_bucket(&bucket, &events);
        // Thursday stands alone and is below the minimum size.
        let thursday_key = BucketKey::Day(NaiveDate::from_ymd_opt(2025, 9, 4).unwrap());
        let sunday_key = BucketKey::Day(NaiveDate::from_ymd_opt(2025, 9, 7).unwrap());
        assert_eq!(score.buckets[&thursday_key], BucketScore::Resolved(0));
        assert_eq!(score.buckets[&sunday_key], BucketScore::Resolved(2));
        assert_eq!(score.total_points, 2);
    }

    #[test]
    fn legacy_scheme_collapses_non_bonus_days() {
        let config = ScoringConfig {
            legacy_bonus: vec![LegacyBonusRule {
                season: 2023,
                periods: vec![],
                days: vec![Weekday::Thu],
            }],
            ..ScoringConfig::default()
        };
        let engine = ParlayScoringEngine::new(config);
        let thu = Utc.with_ymd_and_hms(2023, 9, 7, 23, 0, 0).unwrap();
        let sat = Utc.with_ymd_and_hms(2023, 9, 9, 18, 0, 0).unwrap();
        let sun = Utc.with_ymd_and_hms(2023, 9, 10, 18, 0, 0).unwrap();
        let events = index_events([
            event("t1", thu, EventState::Completed, (20, 10)),
            event("t2", thu, EventState::Completed, (20, 10)),
            event("sa", sat, EventState::Completed, (20, 10)),
            event("su", sun, EventState::Scheduled, (0, 0)),
        ]);
        let bucket = PickBucket::new(
            "bob",
            Scope::new(2023, 1),
            vec![home_spread("t1"), home_spread("t2"), home_spread("sa"), home_spread("su")],
        );

        let score = engine.score_pick_bucket(&bucket, &events);
        assert_eq!(
            score.buckets[&BucketKey::Bonus(Weekday::Thu)],
            BucketScore::Resolved(2)
        );
        assert_eq!(score.buckets[&BucketKey::Regular], BucketScore::Pending);
        assert_eq!(score.total_points, 2);
        assert_eq!(score.unresolved_buckets, 1);
    }

    #[test]
    fn picks_on_unknown_events_are_excluded() {
        let engine = ParlayScoringEngine::new(ScoringConfig::default());
        let events = index_events([
            event("s1", sunday(17), EventState::Completed, (30, 10)),
            event("s2", sunday(20), EventState::Completed, (21, 14)),
        ]);
        let bucket = PickBucket::new(
            "alice",
            Scope::new(2025, 1),
            vec![home_spread("s1"), home_spread("s2"), home_spread("ghost")],
        );
        let graded = engine.grade_bucket(&bucket, &events);
        assert_eq!(graded.len(), 2);
        assert!(graded.iter().all(|g| g.pick.outcome == Outcome::Win));
    }

    #[test]
    fn score_serializes_bucket_keys_as_strings() {
        let score = ParlayScore::from_buckets(
            "alice",
            Scope::new(2025, 1),
            BTreeMap::from([(
                BucketKey::Day(NaiveDate::from_ymd_opt(2025, 9, 7).unwrap()),
                BucketScore::Resolved(2),
            )]),
        );
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json["buckets"]["2025-09-07"]["points"], 2);
        assert_eq!(json["total_points"], 2);
    }
}
