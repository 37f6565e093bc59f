//! Who may see which picks, and when.
//!
//! Picks on an event stay hidden from everyone but their owner until the
//! event's slot threshold passes (Pacific time by default) or the event
//! starts. Hidden picks are still counted per day so viewers know how many
//! exist.

use crate::bucketing::local_date;
use chrono::{DateTime, Datelike, Duration, LocalResult, TimeZone, Utc, Weekday};
use parlay_core::{Event, Pick, VisibilityConfig, Viewer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityWindow {
    pub visible_at: DateTime<Utc>,
    /// Set once the event is underway; overrides `visible_at`.
    pub always_visible: bool,
}

impl VisibilityWindow {
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.always_visible || now >= self.visible_at
    }
}

/// Picks split into what a viewer may read and per-day counts of the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredPicks {
    pub visible: Vec<Pick>,
    pub hidden: BTreeMap<String, usize>,
}

impl FilteredPicks {
    #[must_use]
    pub fn hidden_total(&self) -> usize {
        self.hidden.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct VisibilityRuleEngine {
    config: VisibilityConfig,
}

impl VisibilityRuleEngine {
    #[must_use]
    pub const fn new(config: VisibilityConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn window(&self, event: &Event) -> VisibilityWindow {
        VisibilityWindow {
            visible_at: self.visible_at(event),
            always_visible: event.state.is_underway(),
        }
    }

    /// Slot threshold for the event, capped at kickoff.
    ///
    /// Thursday games open Thursday, Friday/Saturday games open on the Friday
    /// of their slot, Sunday/Monday games on the Sunday. Tuesday and
    /// Wednesday games only open at kickoff.
    #[must_use]
    pub fn visible_at(&self, event: &Event) -> DateTime<Utc> {
        let tz = self.config.timezone;
        let date = local_date(event.start_time, tz);

        let (slot_start, threshold) = match date.weekday() {
            Weekday::Thu => (Weekday::Thu, self.config.thursday),
            Weekday::Fri | Weekday::Sat => (Weekday::Fri, self.config.friday_saturday),
            Weekday::Sun | Weekday::Mon => (Weekday::Sun, self.config.sunday_monday),
            Weekday::Tue | Weekday::Wed => return event.start_time,
        };

        let days_back = (7 + date.weekday().num_days_from_monday()
            - slot_start.num_days_from_monday())
            % 7;
        let slot_date = date - Duration::days(i64::from(days_back));

        let threshold = match self.config.holiday_on(slot_date) {
            Some(holiday) if slot_start == Weekday::Thu => {
                tracing::debug!(holiday = %holiday.name, %slot_date, "holiday threshold applied");
                self.config.holiday_thursday
            }
            _ => threshold,
        };

        let opens = match tz.from_local_datetime(&slot_date.and_time(threshold)) {
            LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => at.with_timezone(&Utc),
            LocalResult::None => event.start_time,
        };

        opens.min(event.start_time)
    }

    /// Whether `viewer` may see `owner`'s picks on `event` at `now`.
    #[must_use]
    pub fn is_visible(&self, now: DateTime<Utc>, event: &Event, owner: &str, viewer: &Viewer) -> bool {
        viewer.owns(owner) || self.window(event).is_open(now)
    }

    /// Capitalised weekday of the event in the visibility timezone.
    #[must_use]
    pub fn day_label(&self, event: &Event) -> &'static str {
        label(local_date(event.start_time, self.config.timezone).weekday())
    }

    /// Splits one owner's picks for a viewer. `picks` pairs each pick with
    /// its event; pairs without an event must be dropped by the caller.
    #[must_use]
    pub fn filter<'a, I>(
        &self,
        now: DateTime<Utc>,
        viewer: &Viewer,
        owner: &str,
        picks: I,
    ) -> FilteredPicks
    where
        I: IntoIterator<Item = (&'a Pick, &'a Event)>,
    {
        let mut filtered = FilteredPicks::default();
        for (pick, event) in picks {
            if self.is_visible(now, event, owner, viewer) {
                filtered.visible.push(pick.clone());
            } else {
                *filtered
                    .hidden
                    .entry(self.day_label(event).to_string())
                    .or_insert(0) += 1;
            }
        }
        filtered
    }
}

const fn label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
