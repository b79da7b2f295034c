// src/clock.rs

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time.
///
/// The key-set cache uses it to age cached entries and the verifier uses it
/// to check `exp`, so tests can move time forward without sleeping.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}
