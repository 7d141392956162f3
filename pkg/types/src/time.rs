use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::time::Duration;

/// Simulated time, in milliseconds since the simulation started.
///
/// All sim-internal deadlines (backoff, cooldowns, timers) are expressed in
/// `SimTime`; wall-clock-looking timestamps on resources are derived from it
/// with [`SimTime::to_datetime`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms)
    }

    pub fn from_secs(secs: u64) -> Self {
        SimTime(secs.saturating_mul(1000))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is in the future.
    pub fn since(self, earlier: SimTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Map onto the wall-clock timeline anchored at `epoch`.
    pub fn to_datetime(self, epoch: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.0)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delta| epoch.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        SimTime(self.0.saturating_add(millis))
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}s", self.as_secs_f64())
    }
}

/// Fixed wall-clock anchor of simulated time zero (2024-01-01T00:00:00Z).
pub fn sim_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_since() {
        let t = SimTime::from_secs(5) + Duration::from_millis(250);
        assert_eq!(t.as_millis(), 5_250);
        assert_eq!(t.since(SimTime::from_secs(5)), Duration::from_millis(250));
        assert_eq!(SimTime::ZERO.since(t), Duration::ZERO);
        assert_eq!(t + Duration::from_secs(u64::MAX), SimTime::from_millis(u64::MAX));
    }

    #[test]
    fn datetime_is_anchored_to_epoch() {
        let dt = SimTime::from_secs(60).to_datetime(sim_epoch());
        assert_eq!(dt.to_rfc3339(), "2024-01-01T00:01:00+00:00");
        let far = SimTime::from_millis(u64::MAX).to_datetime(sim_epoch());
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
    }
}
