//! Refresh scheduling.
//!
//! [`compute_next_check`] decides when a feed is polled next. It is a pure
//! function of an explicit [`SchedulerConfig`], the current time, the feed's
//! observed publishing rate and an optional server hint. [`BatchBuilder`]
//! selects the feeds whose next check is due.

mod batch;

pub use batch::{enqueue_batch, BatchBuilder, Job};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::FeedloomError;

const MINUTES_PER_WEEK: f64 = 7.0 * 24.0 * 60.0;

/// Polling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingScheduler {
    /// Every feed is polled at the same fixed interval.
    #[default]
    RoundRobin,
    /// Feeds that publish often are polled more often.
    EntryFrequency,
}

impl fmt::Display for PollingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollingScheduler::RoundRobin => f.write_str("round_robin"),
            PollingScheduler::EntryFrequency => f.write_str("entry_frequency"),
        }
    }
}

impl FromStr for PollingScheduler {
    type Err = FeedloomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(PollingScheduler::RoundRobin),
            "entry_frequency" => Ok(PollingScheduler::EntryFrequency),
            _ => Err(FeedloomError::Config(format!("unknown polling scheduler: {s}"))),
        }
    }
}

/// Scheduler settings. All intervals are in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub strategy: PollingScheduler,
    pub round_robin_min_interval: i64,
    pub round_robin_max_interval: i64,
    pub entry_frequency_min_interval: i64,
    pub entry_frequency_max_interval: i64,
    pub entry_frequency_factor: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: PollingScheduler::RoundRobin,
            round_robin_min_interval: 60,
            round_robin_max_interval: 1440,
            entry_frequency_min_interval: 5,
            entry_frequency_max_interval: 1440,
            entry_frequency_factor: 1,
        }
    }
}

impl SchedulerConfig {
    /// Interval bounds of the active strategy.
    pub fn bounds(&self) -> (i64, i64) {
        match self.strategy {
            PollingScheduler::RoundRobin => {
                (self.round_robin_min_interval, self.round_robin_max_interval)
            }
            PollingScheduler::EntryFrequency => (
                self.entry_frequency_min_interval,
                self.entry_frequency_max_interval,
            ),
        }
    }
}

/// Result of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextCheck {
    pub next_check_at: DateTime<Utc>,
    pub interval_minutes: i64,
}

/// Compute when a feed should be checked next.
///
/// `weekly_entry_count` is only consulted by the entry frequency strategy.
/// A `refresh_hint_minutes` (feed TTL, Retry-After, Cache-Control, Expires)
/// only ever lengthens the interval, and the result never exceeds the
/// strategy's maximum.
pub fn compute_next_check(
    config: &SchedulerConfig,
    now: DateTime<Utc>,
    weekly_entry_count: i64,
    refresh_hint_minutes: Option<i64>,
) -> NextCheck {
    let (min, max) = config.bounds();

    let mut interval = match config.strategy {
        PollingScheduler::RoundRobin => min,
        PollingScheduler::EntryFrequency => {
            if weekly_entry_count <= 0 {
                max
            } else {
                let factor = config.entry_frequency_factor.max(1) as f64;
                (MINUTES_PER_WEEK / (weekly_entry_count as f64 * factor)).round() as i64
            }
        }
    };
    interval = interval.clamp(min, max);

    if let Some(hint) = refresh_hint_minutes {
        if hint > interval {
            interval = hint.min(max);
        }
    }

    NextCheck {
        next_check_at: now + Duration::minutes(interval),
        interval_minutes: interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_frequency() -> SchedulerConfig {
        SchedulerConfig {
            strategy: PollingScheduler::EntryFrequency,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_round_robin_uses_min_interval() {
        let config = SchedulerConfig::default();
        let now = Utc::now();
        let next = compute_next_check(&config, now, 500, None);
        assert_eq!(next.interval_minutes, 60);
        assert_eq!(next.next_check_at, now + Duration::minutes(60));
    }

    #[test]
    fn test_entry_frequency_inactive_feed_uses_max() {
        let next = compute_next_check(&entry_frequency(), Utc::now(), 0, None);
        assert_eq!(next.interval_minutes, 1440);
    }

    #[test]
    fn test_entry_frequency_formula() {
        // 10080 / 7 = 1440, exactly the max.
        assert_eq!(
            compute_next_check(&entry_frequency(), Utc::now(), 7, None).interval_minutes,
            1440
        );
        // 10080 / 100 = 100.8, rounded.
        assert_eq!(
            compute_next_check(&entry_frequency(), Utc::now(), 100, None).interval_minutes,
            101
        );
        // Factor divides further: 10080 / (100 * 2) = 50.4.
        let config = SchedulerConfig {
            entry_frequency_factor: 2,
            ..entry_frequency()
        };
        assert_eq!(
            compute_next_check(&config, Utc::now(), 100, None).interval_minutes,
            50
        );
    }

    #[test]
    fn test_entry_frequency_clamped_to_min() {
        let next = compute_next_check(&entry_frequency(), Utc::now(), 100_000, None);
        assert_eq!(next.interval_minutes, 5);
    }

    #[test]
    fn test_interval_within_bounds_for_any_rate() {
        let config = entry_frequency();
        for weekly in [-3, 0, 1, 2, 5, 50, 1000, 1_000_000] {
            for hint in [None, Some(0), Some(30), Some(3000)] {
                let next = compute_next_check(&config, Utc::now(), weekly, hint);
                assert!(
                    (5..=1440).contains(&next.interval_minutes),
                    "weekly={weekly} hint={hint:?} gave {}",
                    next.interval_minutes
                );
            }
        }
    }

    #[test]
    fn test_smaller_hint_is_ignored() {
        let next = compute_next_check(&SchedulerConfig::default(), Utc::now(), 0, Some(10));
        assert_eq!(next.interval_minutes, 60);
    }

    #[test]
    fn test_larger_hint_replaces_interval() {
        let next = compute_next_check(&SchedulerConfig::default(), Utc::now(), 0, Some(240));
        assert_eq!(next.interval_minutes, 240);
    }

    #[test]
    fn test_hint_capped_at_max() {
        let next = compute_next_check(&SchedulerConfig::default(), Utc::now(), 0, Some(10_000));
        assert_eq!(next.interval_minutes, 1440);
    }

    #[test]
    fn test_polling_scheduler_parse() {
        assert_eq!(
            "entry_frequency".parse::<PollingScheduler>().unwrap(),
            PollingScheduler::EntryFrequency
        );
        assert!("weekly".parse::<PollingScheduler>().is_err());
        assert_eq!(PollingScheduler::RoundRobin.to_string(), "round_robin");
    }
}
