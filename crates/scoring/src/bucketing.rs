//! Assignment of picks to parlay buckets.
//!
//! Two schemes coexist. Seasons before the configured cutover use named
//! legacy categories (bonus weekdays plus one `regular` catch-all); later
//! seasons give every calendar day its own bucket. Both resolve the day in
//! the configured reference timezone.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use parlay_core::{ScoringConfig, Scope};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKey {
    /// Legacy catch-all for every non-bonus day.
    Regular,
    /// Legacy standalone bonus weekday.
    Bonus(Weekday),
    /// Modern per-day bucket.
    Day(NaiveDate),
}

impl BucketKey {
    /// Regular first, then bonus days Monday-first, then dates.
    fn sort_key(&self) -> (u8, u32, Option<NaiveDate>) {
        match self {
            Self::Regular => (0, 0, None),
            Self::Bonus(day) => (1, day.num_days_from_monday(), None),
            Self::Day(date) => (2, 0, Some(*date)),
        }
    }
}

impl Ord for BucketKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for BucketKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => f.write_str("regular"),
            Self::Bonus(day) => f.write_str(weekday_name(*day)),
            Self::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised bucket key: {0}")]
pub struct ParseBucketKeyError(String);

impl FromStr for BucketKey {
    type Err = ParseBucketKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "regular" {
            return Ok(Self::Regular);
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::Day(date));
        }
        s.parse::<Weekday>()
            .map(Self::Bonus)
            .map_err(|_| ParseBucketKeyError(s.to_string()))
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BucketKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lower-case weekday names used for bucket keys and day labels.
#[must_use]
pub const fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketingScheme {
    Legacy { bonus_days: Vec<Weekday>, tz: Tz },
    Modern { tz: Tz },
}

impl BucketingScheme {
    /// Picks the scheme in force for `scope`.
    #[must_use]
    pub fn for_scope(scope: Scope, config: &ScoringConfig) -> Self {
        let tz = config.reference_timezone;
        if scope.season >= config.modern_cutover_season {
            Self::Modern { tz }
        } else {
            Self::Legacy {
                bonus_days: config.bonus_days(scope.season, scope.period).to_vec(),
                tz,
            }
        }
    }

    #[must_use]
    pub const fn is_modern(&self) -> bool {
        matches!(self, Self::Modern { .. })
    }

    /// Bucket for an event starting at `start`.
    #[must_use]
    pub fn bucket_for(&self, start: DateTime<Utc>) -> BucketKey {
        match self {
            Self::Modern { tz } => BucketKey::Day(local_date(start, *tz)),
            Self::Legacy { bonus_days, tz } => {
                let day = local_date(start, *tz).weekday();
                if bonus_days.contains(&day) {
                    BucketKey::Bonus(day)
                } else {
                    BucketKey::Regular
                }
            }
        }
    }
}

#[must_use]
pub fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parlay_core::LegacyBonusRule;

    fn config() -> ScoringConfig {
        ScoringConfig {
            modern_cutover_season: 2025,
            legacy_bonus: vec![LegacyBonusRule {
                season: 2023,
                periods: vec![12],
                days: vec![Weekday::Thu, Weekday::Fri],
            }],
            ..ScoringConfig::default()
        }
    }

    #[test]
    fn scheme_follows_cutover() {
        let cfg = config();
        assert!(BucketingScheme::for_scope(Scope::new(2025, 1), &cfg).is_modern());
        assert!(!BucketingScheme::for_scope(Scope::new(2024, 1), &cfg).is_modern());
    }

    #[test]
    fn late_night_event_stays_on_local_day() {
        let scheme = BucketingScheme::for_scope(Scope::new(2025, 1), &config());
        // Monday 20:15 Eastern is already Tuesday in UTC.
        let start = Utc.with_ymd_and_hms(2025, 9, 9, 0, 15, 0).unwrap();
        assert_eq!(
            scheme.bucket_for(start),
            BucketKey::Day(NaiveDate::from_ymd_opt(2025, 9, 8).unwrap())
        );
    }

    #[test]
    fn legacy_bonus_days_split_out() {
        let scheme = BucketingScheme::for_scope(Scope::new(2023, 12), &config());
        let thursday = Utc.with_ymd_and_hms(2023, 11, 23, 18, 0, 0).unwrap();
        let friday = Utc.with_ymd_and_hms(2023, 11, 24, 18, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2023, 11, 26, 18, 0, 0).unwrap();
        assert_eq!(scheme.bucket_for(thursday), BucketKey::Bonus(Weekday::Thu));
        assert_eq!(scheme.bucket_for(friday), BucketKey::Bonus(Weekday::Fri));
        assert_eq!(scheme.bucket_for(sunday), BucketKey::Regular);
    }

    #[test]
    fn legacy_week_without_rule_is_all_regular() {
        let scheme = BucketingScheme::for_scope(Scope::new(2023, 11), &config());
        let thursday = Utc.with_ymd_and_hms(2023, 11, 16, 18, 0, 0).unwrap();
        assert_eq!(scheme.bucket_for(thursday), BucketKey::Regular);
    }

    #[test]
    fn bucket_keys_round_trip_as_strings() {
        for key in [
            BucketKey::Regular,
            BucketKey::Bonus(Weekday::Thu),
            BucketKey::Day(NaiveDate::from_ymd_opt(2025, 9, 7).unwrap()),
        ] {
            let text = key.to_string();
            assert_eq!(text.parse::<BucketKey>(), Ok(key));
        }
        assert_eq!(BucketKey::Bonus(Weekday::Fri).to_string(), "friday");
        assert!("someday".parse::<BucketKey>().is_err());
    }
}
