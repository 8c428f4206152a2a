//! Minute-based recurrence for token refresh.
//!
//! A token that lives `expires_in` seconds is refreshed every
//! `floor(expires_in / 60)` minutes, at the top of each Nth minute of the hour
//! (minutes 0, N, 2N, ... below 60, then again from 0 in the next hour).

use std::num::NonZeroU32;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::{AuthError, AuthResult};

/// Refresh recurrence. Always at least one minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefreshInterval {
    minutes: NonZeroU32,
}

impl RefreshInterval {
    /// Derives the interval from a token lifetime. Sub-minute lifetimes are rejected.
    pub fn from_expiry_secs(expires_in: u64) -> AuthResult<Self> {
        let minutes = u32::try_from(expires_in / 60).unwrap_or(u32::MAX);
        NonZeroU32::new(minutes)
            .map(|minutes| Self { minutes })
            .ok_or(AuthError::InvalidInterval { expires_in })
    }

    pub fn minutes(self) -> u32 {
        self.minutes.get()
    }

    pub fn period(self) -> Duration {
        Duration::from_secs(u64::from(self.minutes()) * 60)
    }

    /// Next firing strictly after `now`.
    pub fn next_fire_after(self, now: OffsetDateTime) -> OffsetDateTime {
        let step = self.minutes();
        let top_of_minute = now
            .replace_second(0)
            .and_then(|t| t.replace_nanosecond(0))
            .unwrap_or(now);
        let top_of_hour = top_of_minute.replace_minute(0).unwrap_or(top_of_minute);

        let current = u32::from(now.minute());
        let next = (current / step + 1) * step;
        if next < 60 {
            top_of_hour + time::Duration::minutes(i64::from(next))
        } else {
            top_of_hour + time::Duration::hours(1)
        }
    }

    /// Time to wait from `now` until the next firing.
    pub fn duration_until_next(self, now: OffsetDateTime) -> Duration {
        let wait = self.next_fire_after(now) - now;
        Duration::try_from(wait).unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0 0/{} * * * ?", self.minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_one_hour_token_gives_sixty_minutes() {
        let interval = RefreshInterval::from_expiry_secs(3600).unwrap();
        assert_eq!(interval.minutes(), 60);
        assert_eq!(interval.period(), Duration::from_secs(3600));
        assert_eq!(interval.to_string(), "0 0/60 * * * ?");
    }

    #[test]
    fn test_sub_minute_expiry_rejected() {
        let err = RefreshInterval::from_expiry_secs(59).unwrap_err();
        assert!(matches!(err, AuthError::InvalidInterval { expires_in: 59 }));
        assert!(RefreshInterval::from_expiry_secs(0).is_err());
    }

    #[test]
    fn test_interval_floors_to_minutes() {
        assert_eq!(RefreshInterval::from_expiry_secs(119).unwrap().minutes(), 1);
        assert_eq!(RefreshInterval::from_expiry_secs(300).unwrap().minutes(), 5);
        assert_eq!(RefreshInterval::from_expiry_secs(899).unwrap().minutes(), 14);
    }

    #[test]
    fn test_next_fire_is_aligned_to_minute_grid() {
        let every_15 = RefreshInterval::from_expiry_secs(900).unwrap();
        assert_eq!(
            every_15.next_fire_after(datetime!(2024-03-01 10:07:30 UTC)),
            datetime!(2024-03-01 10:15:00 UTC)
        );
        assert_eq!(
            every_15.next_fire_after(datetime!(2024-03-01 10:15:00 UTC)),
            datetime!(2024-03-01 10:30:00 UTC)
        );
        assert_eq!(
            every_15.next_fire_after(datetime!(2024-03-01 10:50:00 UTC)),
            datetime!(2024-03-01 11:00:00 UTC)
        );
    }

    #[test]
    fn test_hourly_fires_at_top_of_next_hour() {
        let hourly = RefreshInterval::from_expiry_secs(3600).unwrap();
        assert_eq!(
            hourly.next_fire_after(datetime!(2024-03-01 23:59:59 UTC)),
            datetime!(2024-03-02 00:00:00 UTC)
        );
        assert_eq!(
            hourly.duration_until_next(datetime!(2024-03-01 10:30:00 UTC)),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_long_interval_wraps_each_hour() {
        // Minute step above 59 behaves like a cron step: only minute 0 matches.
        let every_90 = RefreshInterval::from_expiry_secs(5400).unwrap();
        assert_eq!(
            every_90.next_fire_after(datetime!(2024-03-01 10:00:00 UTC)),
            datetime!(2024-03-01 11:00:00 UTC)
        );
    }
}
