use core::cmp::{Ord, Ordering, PartialOrd};
use core::convert::From;
use core::time::Duration as CoreDuration;
use serde::{Deserialize, Serialize};

/// RTPS Duration_t, used for every configurable period and delay
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Duration {
    /// time in seconds
    pub seconds: i32,
    /// time in sec/2^32
    pub fraction: u32,
}

impl Duration {
    pub const INFINITE: Self = Self {
        seconds: 0x7fffffff,
        fraction: 0xffffffff,
    };
    pub const ZERO: Self = Self {
        seconds: 0,
        fraction: 0,
    };

    pub fn from_secs(seconds: i32) -> Self {
        Self {
            seconds,
            fraction: 0,
        }
    }

    pub fn from_millis(milliseconds: i64) -> Self {
        let seconds = milliseconds / 1000;
        let frac_sec = (milliseconds - seconds * 1000) as f64 / 1000.;
        let fraction = frac_sec * (1_u64 << 32) as f64;
        Self {
            seconds: seconds as i32,
            fraction: fraction as u32,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn is_infinite(&self) -> bool {
        *self == Self::INFINITE
    }
}

impl From<Duration> for CoreDuration {
    fn from(item: Duration) -> Self {
        if item.seconds < 0 {
            return CoreDuration::ZERO;
        }
        CoreDuration::new(
            item.seconds as u64,
            (1_000_000_000 * item.fraction as u64 / (1_u64 << 32)) as u32,
        )
    }
}

impl From<CoreDuration> for Duration {
    fn from(item: CoreDuration) -> Self {
        let nanos = item.subsec_nanos();
        let frac_sec = nanos as f64 / 1_000_000_000.;
        let fraction = frac_sec * (1_u64 << 32) as f64;
        Duration {
            seconds: item.as_secs() as i32,
            fraction: fraction.round() as u32,
        }
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Duration {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.seconds, self.fraction).cmp(&(other.seconds, other.fraction))
    }
}
