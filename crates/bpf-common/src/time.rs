//! Kernel timestamps.
//!
//! eBPF programs stamp records with `bpf_ktime_get_ns`, which counts
//! nanoseconds since boot (CLOCK_MONOTONIC).

use std::fmt;

use nix::time::{ClockId, clock_gettime};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current time on the same clock used by eBPF programs.
    pub fn now() -> Self {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(t) => Self(t.tv_sec() as u64 * 1_000_000_000 + t.tv_nsec() as u64),
            Err(err) => {
                log::warn!("reading CLOCK_MONOTONIC: {err}");
                Self(0)
            }
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(ns: u64) -> Self {
        Self(ns)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_seconds_and_nanos() {
        assert_eq!(Timestamp::from(1_500_000_042).to_string(), "1.500000042");
        assert_eq!(Timestamp::from(3).as_nanos(), 3);
    }
}
