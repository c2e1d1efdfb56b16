//! Timestamp utilities

use chrono::{DateTime, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Today's calendar date (UTC)
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Coarse time bucket used for the cache-busting `timestamp` query parameter
///
/// Requests issued within the same bucket carry the same parameter value, so
/// intermediate HTTP caches can still serve them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBucket {
    /// 100-second buckets (resource search API)
    Resources,
    /// One-hour buckets (genomics prevalence endpoints)
    Hourly,
    /// One-day buckets (name lookups, build metadata)
    Daily,
}

impl CacheBucket {
    /// Bucket width in milliseconds
    pub fn width_ms(self) -> f64 {
        match self {
            CacheBucket::Resources => 1e5,
            CacheBucket::Hourly => 3.6e6,
            CacheBucket::Daily => 8.64e7,
        }
    }

    /// Bucket index for a point in time (rounded to nearest)
    pub fn bucket_at(self, at: DateTime<Utc>) -> i64 {
        (at.timestamp_millis() as f64 / self.width_ms()).round() as i64
    }

    /// Bucket index for the current time
    pub fn current(self) -> i64 {
        self.bucket_at(now())
    }
}

/// Number of calendar-day boundaries between `from` and `to`
///
/// Whole-day difference, not elapsed hours: 23:59 yesterday to 00:01 today is one day.
pub fn calendar_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_hourly_bucket_is_stable_within_hour() {
        let a = Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 3, 1, 10, 20, 0).unwrap();
        assert_eq!(CacheBucket::Hourly.bucket_at(a), CacheBucket::Hourly.bucket_at(b));
    }

    #[test]
    fn test_daily_bucket_changes_across_days() {
        let a = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            CacheBucket::Daily.bucket_at(b) - CacheBucket::Daily.bucket_at(a),
            1
        );
    }

    #[test]
    fn test_resources_bucket_width() {
        let at = Utc.timestamp_millis_opt(1_000_000_000).unwrap();
        assert_eq!(CacheBucket::Resources.bucket_at(at), 10_000);
    }

    #[test]
    fn test_calendar_days_between() {
        let from = NaiveDate::from_ymd_opt(2021, 2, 27).unwrap();
        let to = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        assert_eq!(calendar_days_between(from, to), 2);
        assert_eq!(calendar_days_between(to, to), 0);
        assert_eq!(calendar_days_between(to, from), -2);
    }
}
