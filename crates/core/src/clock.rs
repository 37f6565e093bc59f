use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Source of "now" for every time-dependent rule.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that an operator (or a test) can pin to a fixed instant.
#[derive(Debug, Default)]
pub struct OverrideClock {
    pinned: RwLock<Option<DateTime<Utc>>>,
}

impl OverrideClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pinned_at(at: DateTime<Utc>) -> Self {
        Self {
            pinned: RwLock::new(Some(at)),
        }
    }

    pub fn pin(&self, at: DateTime<Utc>) {
        tracing::info!(%at, "clock override set");
        *self.pinned.write() = Some(at);
    }

    pub fn release(&self) {
        tracing::info!("clock override cleared");
        *self.pinned.write() = None;
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned.read().is_some()
    }
}

impl Clock for OverrideClock {
    fn now(&self) -> DateTime<Utc> {
        (*self.pinned.read()).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pinned_clock_returns_pinned_instant() {
        let at = Utc.with_ymd_and_hms(2024, 9, 8, 17, 0, 0).unwrap();
        let clock = OverrideClock::pinned_at(at);
        assert_eq!(clock.now(), at);
        assert!(clock.is_pinned());
    }

    #[test]
    fn released_clock_follows_wall_time() {
        let at = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let clock = OverrideClock::pinned_at(at);
        clock.release();
        assert!(!clock.is_pinned());
        assert!(clock.now() > at);
    }
}
