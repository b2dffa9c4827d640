use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::format::Rational;

/// Ticks per second of the capture clock (100 ns units).
pub const CAPTURE_CLOCK_RATE: i32 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often blocked waiters re-check cancellation and deadlines.
    pub poll_interval_ms: u64,
    /// Upper bound on any single readiness wait. `None` waits until
    /// signalled, aborted or cancelled.
    pub gate_timeout_ms: Option<u64>,
    pub video_slices: u32,
    pub gop_size: u32,
    pub capture_clock_rate: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            gate_timeout_ms: None,
            video_slices: 16,
            gop_size: 1,
            capture_clock_rate: CAPTURE_CLOCK_RATE,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn gate_timeout(&self) -> Option<Duration> {
        self.gate_timeout_ms.map(Duration::from_millis)
    }

    pub fn capture_time_base(&self) -> Rational {
        Rational::new(1, self.capture_clock_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_pipeline() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.gate_timeout(), None);
        assert_eq!(config.video_slices, 16);
        assert_eq!(config.gop_size, 1);
        assert_eq!(config.capture_time_base(), Rational::new(1, 10_000_000));
    }
}
