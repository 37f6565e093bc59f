use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("legacy bonus rule for season {season} overlaps an earlier rule")]
    OverlappingLegacyRule { season: i32 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scoring: ScoringConfig,
    pub visibility: VisibilityConfig,
    pub broadcast: BroadcastConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/parlay".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Marks weekdays as standalone bonus buckets under the legacy scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyBonusRule {
    pub season: i32,
    /// Periods the rule applies to; empty means every period of the season.
    #[serde(default)]
    pub periods: Vec<u32>,
    pub days: Vec<Weekday>,
}

impl LegacyBonusRule {
    #[must_use]
    pub fn applies_to(&self, season: i32, period: u32) -> bool {
        self.season == season && (self.periods.is_empty() || self.periods.contains(&period))
    }

    fn overlaps(&self, other: &Self) -> bool {
        if self.season != other.season {
            return false;
        }
        self.periods.is_empty()
            || other.periods.is_empty()
            || self.periods.iter().any(|p| other.periods.contains(p))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// First season scored with per-day buckets.
    pub modern_cutover_season: i32,
    /// Civil timezone used to assign an event to a calendar day.
    pub reference_timezone: Tz,
    /// Smallest number of non-push picks that can pay out.
    pub min_parlay_size: usize,
    pub legacy_bonus: Vec<LegacyBonusRule>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            modern_cutover_season: 2025,
            reference_timezone: chrono_tz::America::New_York,
            min_parlay_size: 2,
            legacy_bonus: Vec::new(),
        }
    }
}

impl ScoringConfig {
    #[must_use]
    pub fn bonus_days(&self, season: i32, period: u32) -> &[Weekday] {
        self.legacy_bonus
            .iter()
            .find(|r| r.applies_to(season, period))
            .map_or(&[], |r| r.days.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    pub timezone: Tz,
    pub thursday: NaiveTime,
    pub friday_saturday: NaiveTime,
    pub sunday_monday: NaiveTime,
    /// Replaces `thursday` on a configured holiday.
    pub holiday_thursday: NaiveTime,
    pub holidays: Vec<Holiday>,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Los_Angeles,
            thursday: hm(17, 0),
            friday_saturday: hm(9, 0),
            sunday_monday: hm(10, 0),
            holiday_thursday: hm(9, 0),
            holidays: Vec::new(),
        }
    }
}

impl VisibilityConfig {
    #[must_use]
    pub fn holiday_on(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.iter().find(|h| h.date == date)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Outbound queue depth per connected viewer.
    pub queue_capacity: usize,
    pub keep_alive_secs: u64,
    /// Lifetime of the marker that tags the router's own outcome writes.
    pub self_write_ttl_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            keep_alive_secs: 30,
            self_write_ttl_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Event fields whose mutation triggers regrading.
    pub event_fields: Vec<String>,
    pub channel_capacity: usize,
    /// First delay before a failed event change is retried; doubles per
    /// attempt up to `retry_max_ms`.
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            event_fields: [
                "state",
                "score",
                "line",
                "start_time",
                "participants",
                "scope",
            ]
            .map(String::from)
            .to_vec(),
            channel_capacity: 256,
            retry_base_ms: 1_000,
            retry_max_ms: 30_000,
        }
    }
}

impl AppConfig {
    /// Rejects values the runtime cannot operate with.
    ///
    /// # Errors
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast.queue_capacity == 0 {
            return Err(invalid("broadcast.queue_capacity", "must be at least 1"));
        }
        if self.broadcast.keep_alive_secs == 0 {
            return Err(invalid("broadcast.keep_alive_secs", "must be at least 1"));
        }
        if self.feed.channel_capacity == 0 {
            return Err(invalid("feed.channel_capacity", "must be at least 1"));
        }
        if self.feed.retry_base_ms == 0 {
            return Err(invalid("feed.retry_base_ms", "must be at least 1"));
        }
        if self.feed.retry_max_ms < self.feed.retry_base_ms {
            return Err(invalid("feed.retry_max_ms", "must not be below feed.retry_base_ms"));
        }
        if self.feed.event_fields.is_empty() {
            return Err(invalid("feed.event_fields", "must list at least one field"));
        }
        if self.scoring.min_parlay_size == 0 {
            return Err(invalid("scoring.min_parlay_size", "must be at least 1"));
        }

        for (i, rule) in self.scoring.legacy_bonus.iter().enumerate() {
            if rule.days.is_empty() {
                return Err(invalid(
                    "scoring.legacy_bonus.days",
                    format!("rule for season {} lists no days", rule.season),
                ));
            }
            if rule.season >= self.scoring.modern_cutover_season {
                return Err(invalid(
                    "scoring.legacy_bonus.season",
                    format!(
                        "season {} is scored per day (cutover {})",
                        rule.season, self.scoring.modern_cutover_season
                    ),
                ));
            }
            if self.scoring.legacy_bonus[..i].iter().any(|r| r.overlaps(rule)) {
                return Err(ConfigError::OverlappingLegacyRule {
                    season: rule.season,
                });
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(season: i32, periods: Vec<u32>, days: Vec<Weekday>) -> LegacyBonusRule {
        LegacyBonusRule {
            season,
            periods,
            days,
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn default_event_fields_cover_every_scoring_input() {
        let fields = FeedConfig::default().event_fields;
        for field in ["state", "score", "line", "start_time", "participants", "scope"] {
            assert!(fields.iter().any(|f| f == field), "missing {field}");
        }
    }

    #[test]
    fn retry_ceiling_below_base_is_rejected() {
        let mut config = AppConfig::default();
        config.feed.retry_max_ms = config.feed.retry_base_ms - 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "feed.retry_max_ms",
                ..
            })
        ));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = AppConfig::default();
        config.broadcast.queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "broadcast.queue_capacity",
                ..
            })
        ));
    }

    #[test]
    fn overlapping_legacy_rules_are_rejected() {
        let mut config = AppConfig::default();
        config.scoring.legacy_bonus = vec![
            rule(2022, vec![1, 2], vec![Weekday::Thu]),
            rule(2022, vec![2, 3], vec![Weekday::Fri]),
        ];
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlappingLegacyRule { season: 2022 })
        );
    }

    #[test]
    fn legacy_rule_after_cutover_is_rejected() {
        let mut config = AppConfig::default();
        config.scoring.legacy_bonus = vec![rule(2025, vec![], vec![Weekday::Thu])];
        assert!(config.validate().is_err());
    }

    #[test]
    fn bonus_days_pick_matching_rule() {
        let config = ScoringConfig {
            legacy_bonus: vec![
                rule(2021, vec![12], vec![Weekday::Thu, Weekday::Fri]),
                rule(2022, vec![], vec![Weekday::Thu]),
            ],
            ..ScoringConfig::default()
        };
        assert_eq!(config.bonus_days(2021, 12), &[Weekday::Thu, Weekday::Fri]);
        assert!(config.bonus_days(2021, 11).is_empty());
        assert_eq!(config.bonus_days(2022, 7), &[Weekday::Thu]);
    }

    #[test]
    fn server_addr_joins_host_and_port() {
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
        };
        assert_eq!(server.addr(), "127.0.0.1:9000");
    }
}
