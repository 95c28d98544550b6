use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock timestamp in floating-point seconds since the UNIX epoch.
///
/// Ordering uses [`f64::total_cmp`], so every value (including NaN) has a
/// well-defined position and the type can key sorted collections.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Smallest step used to keep queue timestamps strictly increasing.
    pub const TICK: f64 = 1e-6;

    pub const fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self(secs)
    }

    /// The zero timestamp (UNIX epoch).
    pub const fn zero() -> Self {
        Self(0.0)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// The first timestamp strictly after this one at [`Self::TICK`] resolution.
    pub fn next_tick(&self) -> Self {
        Self(self.0 + Self::TICK)
    }

    /// This timestamp moved `duration` into the past.
    pub fn minus(&self, duration: Duration) -> Self {
        Self(self.0 - duration.as_secs_f64())
    }

    /// This timestamp moved `duration` into the future.
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration.as_secs_f64())
    }

    /// Elapsed time between this timestamp and `now`; zero if `now` is earlier.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        let delta = now.0 - self.0;
        if delta.is_finite() && delta > 0.0 {
            Duration::from_secs_f64(delta)
        } else {
            Duration::ZERO
        }
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self(secs)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({:.6})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}
