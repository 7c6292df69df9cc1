use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A value together with the time it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expirable<V> {
    /// Capture time in milliseconds since the unix epoch.
    ts: i64,
    data: V,
}

impl<V> Expirable<V> {
    /// Captures `data` now.
    pub fn new(data: V) -> Self {
        Self::with_timestamp(Utc::now().timestamp_millis(), data)
    }

    /// Wraps `data` captured at `ts` milliseconds since the unix epoch.
    pub fn with_timestamp(ts: i64, data: V) -> Self {
        Self { ts, data }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.ts
    }

    /// Time since the value was captured.
    ///
    /// Values from the future are treated as just captured.
    pub fn age(&self) -> Duration {
        let age_ms = Utc::now().timestamp_millis().saturating_sub(self.ts);
        Duration::from_millis(age_ms.max(0) as u64)
    }

    /// Whether the value is younger than `secs` seconds.
    pub fn is_age_less_than_secs(&self, secs: u64) -> bool {
        self.age() < Duration::from_secs(secs)
    }

    pub fn data(&self) -> &V {
        &self.data
    }

    pub fn into_data(self) -> V {
        self.data
    }
}
