//! Clocks and time windows.
//!
//! All timestamps produced by a discovery run come from an injected `Clock`,
//! so a run replayed with a `FixedClock` is bit-for-bit reproducible.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a fixed instant, optionally advanced by hand.
#[derive(Debug)]
pub struct FixedClock {
    micros: AtomicI64,
}

impl FixedClock {
    /// Creates a clock frozen at `at`.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(at.timestamp_micros()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = by.num_microseconds().unwrap_or(i64::MAX);
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// A half-open window of time: `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub from: DateTime<Utc>,

    /// End of the window (exclusive).
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::OutOfRange` if `from >= to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, ConfigurationError> {
        if from >= to {
            #[allow(clippy::cast_precision_loss)]
            return Err(ConfigurationError::OutOfRange {
                field: "time_window".to_string(),
                value: (to - from).num_seconds() as f64,
                min: 1.0,
                max: f64::MAX,
            });
        }
        Ok(Self { from, to })
    }

    /// The window of length `horizon` ending at `now`.
    ///
    /// A non-positive horizon yields a one-microsecond window.
    #[must_use]
    pub fn trailing(now: DateTime<Utc>, horizon: Duration) -> Self {
        let horizon = if horizon > Duration::zero() {
            horizon
        } else {
            Duration::microseconds(1)
        };
        Self {
            from: now
                .checked_sub_signed(horizon)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            to: now,
        }
    }

    /// The window of `days` days ending at `now`.
    ///
    /// Horizons reaching past the representable range start at
    /// `DateTime::<Utc>::MIN_UTC`.
    #[must_use]
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Self {
        if days <= 0 {
            return Self::trailing(now, Duration::zero());
        }
        match Duration::try_days(days) {
            Some(horizon) => Self::trailing(now, horizon),
            None => Self {
                from: DateTime::<Utc>::MIN_UTC,
                to: now,
            },
        }
    }

    /// Check if a timestamp falls within this window.
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.from && time < self.to
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.to - self.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_rejects_inverted_range() {
        let now = Utc::now();
        assert!(TimeWindow::new(now, now).is_err());
        assert!(TimeWindow::new(now, now - Duration::seconds(1)).is_err());
        assert!(TimeWindow::new(now - Duration::seconds(1), now).is_ok());
    }

    #[test]
    fn window_is_half_open() {
        let now = Utc::now();
        let window = TimeWindow::trailing(now, Duration::days(30));
        assert!(window.contains(now - Duration::days(30)));
        assert!(window.contains(now - Duration::days(1)));
        assert!(!window.contains(now));
        assert!(!window.contains(now - Duration::days(31)));
        assert_eq!(window.duration(), Duration::days(30));
    }

    #[test]
    fn trailing_with_zero_horizon_is_not_empty() {
        let now = Utc::now();
        let window = TimeWindow::trailing(now, Duration::zero());
        assert!(window.from < window.to);
    }

    #[test]
    fn oversized_horizon_clamps_to_earliest_instant() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::trailing_days(now, 1_000_000_000);
        assert_eq!(window.from, DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.to, now);

        let window = TimeWindow::trailing_days(now, i64::MAX);
        assert_eq!(window.from, DateTime::<Utc>::MIN_UTC);

        let window = TimeWindow::trailing(now, Duration::days(1_000_000_000));
        assert_eq!(window.from, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn fixed_clock_is_frozen_until_advanced() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), at + Duration::minutes(5));
    }
}
