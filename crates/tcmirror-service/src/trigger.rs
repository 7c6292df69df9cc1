use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Remembers when a build was last triggered.
///
/// Triggering a build changes the queue and the list of running builds on the remote server,
/// so caches of these lists are kept short-lived for a while afterwards.
#[derive(Debug)]
pub struct TriggerClock {
    last_trigger_ms: AtomicI64,
}

impl TriggerClock {
    /// Creates a clock that considers the process start as the last trigger.
    pub fn new() -> Self {
        Self {
            last_trigger_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn record_trigger(&self) {
        self.record_trigger_at(Utc::now().timestamp_millis());
    }

    /// Records a trigger at the given unix timestamp in milliseconds.
    pub fn record_trigger_at(&self, timestamp_ms: i64) {
        self.last_trigger_ms.store(timestamp_ms, Ordering::Relaxed);
    }

    /// Whole seconds since the last trigger, never negative.
    pub fn seconds_since_trigger(&self) -> u64 {
        let elapsed = Utc::now().timestamp_millis() - self.last_trigger_ms.load(Ordering::Relaxed);
        (elapsed.max(0) / 1000) as u64
    }

    /// The TTL for caches affected by triggers: the time since the last trigger, capped at
    /// `default_secs`.
    pub fn cache_valid_secs(&self, default_secs: u64) -> u64 {
        self.seconds_since_trigger().min(default_secs)
    }
}

impl Default for TriggerClock {
    fn default() -> Self {
        Self::new()
    }
}
