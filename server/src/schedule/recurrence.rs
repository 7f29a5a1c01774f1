//! Fire-time computation in a fixed zone

use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use chrono_tz::Tz;

use super::repeat::{Repeat, TimeOfDay};

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a base instant that advances with the tokio timer, so
/// paused-time tests control both timers and "now"
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.start.elapsed();
        self.base + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

// One more than a week so a single allowed weekday is always reached
const SEARCH_DAYS: u64 = 8;

/// First occurrence of `time` on a day allowed by `repeat` that is strictly
/// after `after`, evaluated in `tz`.
///
/// Local times that do not exist (spring-forward gaps) are skipped; for
/// repeated local times the earlier instant is used.
pub fn next_fire(after: DateTime<Utc>, time: TimeOfDay, repeat: &Repeat, tz: Tz) -> Option<DateTime<Utc>> {
    let days = repeat.weekdays();
    let today = after.with_timezone(&tz).date_naive();

    (0..=SEARCH_DAYS).find_map(|offset| {
        let date = today.checked_add_days(Days::new(offset))?;
        if !days.contains(date.weekday()) {
            return None;
        }
        let local = tz.from_local_datetime(&date.and_time(time.as_naive())).earliest()?;
        let instant = local.with_timezone(&Utc);
        (instant > after).then_some(instant)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn at(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_daily_after_todays_slot_rolls_over() {
        // 2024-05-01 is a Wednesday
        let next = next_fire(utc("2024-05-01T09:05:00Z"), at("09:00"), &Repeat::Daily, Tz::UTC);
        assert_eq!(next, Some(utc("2024-05-02T09:00:00Z")));
    }

    #[test]
    fn test_daily_before_todays_slot() {
        let next = next_fire(utc("2024-05-01T08:59:00Z"), at("09:00"), &Repeat::Daily, Tz::UTC);
        assert_eq!(next, Some(utc("2024-05-01T09:00:00Z")));
    }

    #[test]
    fn test_exact_instant_is_not_future() {
        let next = next_fire(utc("2024-05-01T09:00:00Z"), at("09:00"), &Repeat::Once, Tz::UTC);
        assert_eq!(next, Some(utc("2024-05-02T09:00:00Z")));
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        // Friday evening -> Monday morning
        let next = next_fire(utc("2024-05-03T20:00:00Z"), at("07:30"), &Repeat::Weekdays, Tz::UTC);
        assert_eq!(next, Some(utc("2024-05-06T07:30:00Z")));
    }

    #[test]
    fn test_single_day_a_week_later() {
        let wednesdays = Repeat::Days([Weekday::Wed].into_iter().collect());
        let next = next_fire(utc("2024-05-01T10:00:00Z"), at("09:00"), &wednesdays, Tz::UTC);
        assert_eq!(next, Some(utc("2024-05-08T09:00:00Z")));
    }

    #[test]
    fn test_configured_zone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let next = next_fire(utc("2024-05-01T12:00:00Z"), at("09:00"), &Repeat::Daily, tz);
        assert_eq!(next, Some(utc("2024-05-01T13:00:00Z")));
    }

    #[test]
    fn test_dst_gap_skips_to_next_day() {
        // 02:30 does not exist in New York on 2024-03-10
        let tz: Tz = "America/New_York".parse().unwrap();
        let next = next_fire(utc("2024-03-10T05:00:00Z"), at("02:30"), &Repeat::Daily, tz);
        assert_eq!(next, Some(utc("2024-03-11T06:30:00Z")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchored_clock_follows_tokio_time() {
        let clock = AnchoredClock::new(utc("2024-05-01T09:00:00Z"));
        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), utc("2024-05-01T09:01:30Z"));
    }
}
