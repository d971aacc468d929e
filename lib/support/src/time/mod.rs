mod builder;

use chrono::{DateTime, Local, NaiveTime, Timelike, Utc};
use tokio::task_local;

task_local! {
    /// Fixed clock override for tests. Scoped via `FIXED_NOW.scope(..)`.
    pub static FIXED_NOW: DateTime<Utc>;
}

/// Current instant in UTC, honoring a task-local test override.
pub fn now() -> DateTime<Utc> {
    FIXED_NOW.try_with(|t| *t).unwrap_or_else(|_| Utc::now())
}

/// Current instant in the local timezone. Time triggers and time-range
/// conditions compare against local wall-clock.
pub fn now_local() -> DateTime<Local> {
    now().with_timezone(&Local)
}

/// Parse a `HH:mm` expression as used by time triggers and range conditions.
pub fn parse_hhmm(expr: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(expr.trim(), "%H:%M")
        .map_err(|e| anyhow::anyhow!("Invalid HH:mm expression {:?}: {}", expr, e))
}

/// Whether `at` falls within `[from, to]`. An end before the start is an
/// overnight range crossing midnight.
pub fn in_time_range(at: NaiveTime, from: NaiveTime, to: NaiveTime) -> bool {
    if from <= to {
        at >= from && at <= to
    } else {
        at >= from || at <= to
    }
}

/// Seconds between a wall-clock instant and a `HH:mm` target, wrapping
/// around midnight (23:59:50 is ten seconds away from 00:00).
pub fn seconds_from_time_of_day(at: DateTime<Local>, target: NaiveTime) -> i64 {
    let at_secs = at.time().num_seconds_from_midnight() as i64;
    let target_secs = target.num_seconds_from_midnight() as i64;
    let distance = (at_secs - target_secs).abs();
    distance.min(86_400 - distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hhmm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parses_hhmm_expressions() {
        assert_eq!(parse_hhmm("07:00").unwrap(), hhmm(7, 0));
        assert_eq!(parse_hhmm(" 23:59 ").unwrap(), hhmm(23, 59));
        assert!(parse_hhmm("7am").is_err());
    }

    #[test]
    fn same_day_range_includes_bounds() {
        assert!(in_time_range(hhmm(8, 0), hhmm(8, 0), hhmm(22, 0)));
        assert!(in_time_range(hhmm(22, 0), hhmm(8, 0), hhmm(22, 0)));
        assert!(!in_time_range(hhmm(7, 59), hhmm(8, 0), hhmm(22, 0)));
    }

    #[test]
    fn overnight_range_crosses_midnight() {
        assert!(in_time_range(hhmm(23, 30), hhmm(22, 0), hhmm(6, 0)));
        assert!(in_time_range(hhmm(0, 0), hhmm(22, 0), hhmm(6, 0)));
        assert!(in_time_range(hhmm(5, 59), hhmm(22, 0), hhmm(6, 0)));
        assert!(!in_time_range(hhmm(12, 0), hhmm(22, 0), hhmm(6, 0)));
    }

    #[test]
    fn midnight_trigger_distance_wraps() {
        let just_after = chrono::Local::now()
            .with_time(NaiveTime::from_hms_opt(0, 0, 15).unwrap())
            .unwrap();
        assert_eq!(seconds_from_time_of_day(just_after, hhmm(0, 0)), 15);

        let just_before = chrono::Local::now()
            .with_time(NaiveTime::from_hms_opt(23, 59, 50).unwrap())
            .unwrap();
        assert_eq!(seconds_from_time_of_day(just_before, hhmm(0, 0)), 10);
    }

    #[tokio::test]
    async fn fixed_now_overrides_clock() {
        let pinned = "2026-03-01T10:30:00Z".parse::<DateTime<Utc>>().unwrap();
        FIXED_NOW
            .scope(pinned, async {
                assert_eq!(now(), pinned);
            })
            .await;
    }
}
