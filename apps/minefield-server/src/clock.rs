use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

/// Wall-clock time anchored once and advanced by tokio's monotonic clock.
///
/// Action tokens and session ages come from here, so a test runtime with a
/// paused clock sees time move only when it advances the runtime.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    origin_micros: u64,
}

impl Clock {
    pub fn new() -> Self {
        let origin_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self::starting_at(origin_micros)
    }

    /// Clock reading `micros` since the epoch right now.
    pub fn starting_at(micros: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_micros: micros,
        }
    }

    pub fn now_micros(&self) -> u64 {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.origin_micros + elapsed.as_micros() as u64
    }

    pub fn now(&self) -> DateTime<Utc> {
        to_datetime(self.now_micros())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn to_datetime(micros: u64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros as i64)
        .single()
        .unwrap_or_default()
}

pub fn micros(duration: Duration) -> u64 {
    duration.as_micros() as u64
}
