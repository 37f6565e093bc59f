//! Grading of a single pick against its event.
//!
//! [`grade_pick`] is the pure rule set. [`ResultGrader`] wraps it for the
//! scoring pipeline: data-quality problems degrade to `Pending` and are
//! logged once per event, malformed selections are skipped.

use parking_lot::Mutex;
use parlay_core::{Event, EventId, EventState, Outcome, Pick, PickKind, Selection};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GradeError {
    #[error("event {event_id} has no {kind} line")]
    MissingLine { event_id: EventId, kind: PickKind },

    #[error("event {event_id} is completed without a final score")]
    MissingScore { event_id: EventId },

    #[error("selection {selection:?} cannot be graded as a {kind} pick on event {event_id}")]
    UnknownSelection {
        event_id: EventId,
        kind: PickKind,
        selection: Selection,
    },

    #[error("pick references event {pick_event} but was graded against {event_id}")]
    EventMismatch { pick_event: EventId, event_id: EventId },
}

/// Side of the event a participant selection resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Home,
    Away,
}

/// Grades one pick. Only a `completed` event produces a final outcome.
///
/// # Errors
/// Returns `GradeError` when the selection cannot be mapped onto the event,
/// or when a completed event lacks the score or line the pick needs.
pub fn grade_pick(pick: &Pick, event: &Event) -> Result<Outcome, GradeError> {
    if pick.event_id != event.id {
        return Err(GradeError::EventMismatch {
            pick_event: pick.event_id.clone(),
            event_id: event.id.clone(),
        });
    }

    let side = resolve_selection(pick, event)?;

    if event.state != EventState::Completed {
        return Ok(Outcome::Pending);
    }

    let score = event.score.ok_or_else(|| GradeError::MissingScore {
        event_id: event.id.clone(),
    })?;
    let home = Decimal::from(score.home);
    let away = Decimal::from(score.away);

    let outcome = match (pick.kind, side) {
        (PickKind::Spread, Some(side)) => {
            let spread = event.spread().ok_or_else(|| missing_line(event, pick.kind))?;
            let covered = home - away + spread;
            let margin = if side == Side::Home { covered } else { -covered };
            from_ordering(margin.cmp(&Decimal::ZERO))
        }
        (PickKind::Total, None) => {
            let line = event.total().ok_or_else(|| missing_line(event, pick.kind))?;
            let ordering = (home + away).cmp(&line);
            let ordering = if pick.selection == Selection::Under {
                ordering.reverse()
            } else {
                ordering
            };
            from_ordering(ordering)
        }
        (PickKind::Moneyline, Some(side)) => {
            let ordering = score.home.cmp(&score.away);
            let ordering = if side == Side::Home {
                ordering
            } else {
                ordering.reverse()
            };
            from_ordering(ordering)
        }
        _ => return Err(unknown_selection(pick, event)),
    };

    Ok(outcome)
}

/// Participant picks must name one of the two sides; `over`/`under` only
/// make sense on a total.
fn resolve_selection(pick: &Pick, event: &Event) -> Result<Option<Side>, GradeError> {
    match (&pick.selection, pick.kind) {
        (Selection::Participant(id), PickKind::Spread | PickKind::Moneyline) => {
            if *id == event.home {
                Ok(Some(Side::Home))
            } else if *id == event.away {
                Ok(Some(Side::Away))
            } else {
                Err(unknown_selection(pick, event))
            }
        }
        (Selection::Over | Selection::Under, PickKind::Total) => Ok(None),
        _ => Err(unknown_selection(pick, event)),
    }
}

const fn from_ordering(ordering: Ordering) -> Outcome {
    match ordering {
        Ordering::Greater => Outcome::Win,
        Ordering::Equal => Outcome::Push,
        Ordering::Less => Outcome::Loss,
    }
}

fn missing_line(event: &Event, kind: PickKind) -> GradeError {
    GradeError::MissingLine {
        event_id: event.id.clone(),
        kind,
    }
}

fn unknown_selection(pick: &Pick, event: &Event) -> GradeError {
    GradeError::UnknownSelection {
        event_id: event.id.clone(),
        kind: pick.kind,
        selection: pick.selection.clone(),
    }
}

/// Grading front-end used by the scoring pipeline.
#[derive(Debug, Default)]
pub struct ResultGrader {
    /// Events already reported for missing data.
    warned: Mutex<HashSet<EventId>>,
}

impl ResultGrader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outcome to use for `pick`, or `None` when the pick is
    /// malformed and must be left out of its bucket.
    pub fn grade(&self, pick: &Pick, event: &Event) -> Option<Outcome> {
        match grade_pick(pick, event) {
            Ok(outcome) => Some(outcome),
            Err(e @ (GradeError::MissingLine { .. } | GradeError::MissingScore { .. })) => {
                if self.warned.lock().insert(event.id.clone()) {
                    tracing::warn!(event_id = %event.id, error = %e, "data quality: grading left pending");
                }
                Some(Outcome::Pending)
            }
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "skipping ungradeable pick");
                None
            }
        }
    }

    /// Clears the once-per-event warning memory, e.g. after the event's line
    /// arrives.
    pub fn forget(&self, event_id: &str) {
        self.warned.lock().remove(event_id);
    }

    #[must_use]
    pub fn warned_count(&self) -> usize {
        self.warned.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parlay_core::{Line, Scoreline};
    use rust_decimal_macros::dec;

    fn event(state: EventState, home: i32, away: i32, line: Option<Line>) -> Event {
        Event {
            id: "e1".to_string(),
            season: 2024,
            period: 1,
            start_time: Utc.with_ymd_and_hms(2024, 9, 8, 17, 0, 0).unwrap(),
            home: "KC".to_string(),
            away: "BAL".to_string(),
            state,
            score: Some(Scoreline { home, away }),
            line,
        }
    }

    fn line(spread: Decimal, total: Decimal) -> Option<Line> {
        Some(Line {
            spread: Some(spread),
            total: Some(total),
        })
    }

    fn team(kind: PickKind, id: &str) -> Pick {
        Pick::new("e1", kind, Selection::Participant(id.to_string()))
    }

    #[test]
    fn spread_favourite_covers() {
        let ev = event(EventState::Completed, 27, 20, line(dec!(-3.5), dec!(46.5)));
        assert_eq!(grade_pick(&team(PickKind::Spread, "KC"), &ev), Ok(Outcome::Win));
        assert_eq!(grade_pick(&team(PickKind::Spread, "BAL"), &ev), Ok(Outcome::Loss));
    }

    #[test]
    fn spread_underdog_covers_in_loss() {
        let ev = event(EventState::Completed, 23, 20, line(dec!(-3.5), dec!(46.5)));
        assert_eq!(grade_pick(&team(PickKind::Spread, "BAL"), &ev), Ok(Outcome::Win));
    }

    #[test]
    fn spread_exact_margin_pushes() {
        let ev = event(EventState::Completed, 24, 21, line(dec!(-3), dec!(44)));
        assert_eq!(grade_pick(&team(PickKind::Spread, "KC"), &ev), Ok(Outcome::Push));
        assert_eq!(grade_pick(&team(PickKind::Spread, "BAL"), &ev), Ok(Outcome::Push));
    }

    #[test]
    fn totals_over_under_and_push() {
        let ev = event(EventState::Completed, 24, 21, line(dec!(-3), dec!(44.5)));
        let over = Pick::new("e1", PickKind::Total, Selection::Over);
        let under = Pick::new("e1", PickKind::Total, Selection::Under);
        assert_eq!(grade_pick(&over, &ev), Ok(Outcome::Win));
        assert_eq!(grade_pick(&under, &ev), Ok(Outcome::Loss));

        let exact = event(EventState::Completed, 24, 21, line(dec!(-3), dec!(45)));
        assert_eq!(grade_pick(&over, &exact), Ok(Outcome::Push));
        assert_eq!(grade_pick(&under, &exact), Ok(Outcome::Push));
    }

    #[test]
    fn moneyline_winner_and_tie() {
        let ev = event(EventState::Completed, 17, 20, None);
        assert_eq!(grade_pick(&team(PickKind::Moneyline, "BAL"), &ev), Ok(Outcome::Win));
        assert_eq!(grade_pick(&team(PickKind::Moneyline, "KC"), &ev), Ok(Outcome::Loss));

        let tie = event(EventState::Completed, 20, 20, None);
        assert_eq!(grade_pick(&team(PickKind::Moneyline, "KC"), &tie), Ok(Outcome::Push));
    }

    #[test]
    fn in_progress_never_grades() {
        let ev = event(EventState::InProgress, 35, 0, line(dec!(-3.5), dec!(46.5)));
        assert_eq!(grade_pick(&team(PickKind::Spread, "KC"), &ev), Ok(Outcome::Pending));
        let ev = event(EventState::Postponed, 0, 0, None);
        assert_eq!(grade_pick(&team(PickKind::Moneyline, "KC"), &ev), Ok(Outcome::Pending));
    }

    #[test]
    fn missing_line_is_reported() {
        let ev = event(EventState::Completed, 27, 20, None);
        assert_eq!(
            grade_pick(&team(PickKind::Spread, "KC"), &ev),
            Err(GradeError::MissingLine {
                event_id: "e1".to_string(),
                kind: PickKind::Spread
            })
        );
    }

    #[test]
    fn mismatched_selections_are_rejected() {
        let ev = event(EventState::Completed, 27, 20, line(dec!(-3.5), dec!(46.5)));
        let stranger = team(PickKind::Spread, "SF");
        let over_on_spread = Pick::new("e1", PickKind::Spread, Selection::Over);
        let team_on_total = team(PickKind::Total, "KC");
        for pick in [stranger, over_on_spread, team_on_total] {
            assert!(matches!(
                grade_pick(&pick, &ev),
                Err(GradeError::UnknownSelection { .. })
            ));
        }
    }

    #[test]
    fn grading_is_deterministic() {
        let ev = event(EventState::Completed, 27, 20, line(dec!(-7), dec!(47)));
        let pick = team(PickKind::Spread, "KC");
        let first = grade_pick(&pick, &ev);
        for _ in 0..10 {
            assert_eq!(grade_pick(&pick, &ev), first);
        }
        assert_eq!(first, Ok(Outcome::Push));
    }

    #[test]
    fn grader_degrades_missing_line_to_pending_and_warns_once() {
        let grader = ResultGrader::new();
        let ev = event(EventState::Completed, 27, 20, None);
        let pick = team(PickKind::Spread, "KC");
        assert_eq!(grader.grade(&pick, &ev), Some(Outcome::Pending));
        assert_eq!(grader.grade(&pick, &ev), Some(Outcome::Pending));
        assert_eq!(grader.warned_count(), 1);

        grader.forget("e1");
        assert_eq!(grader.warned_count(), 0);
    }

    #[test]
    fn grader_skips_unknown_selection() {
        let grader = ResultGrader::new();
        let ev = event(EventState::Completed, 27, 20, line(dec!(-3.5), dec!(46.5)));
        assert_eq!(grader.grade(&team(PickKind::Spread, "SF"), &ev), None);
    }
}
