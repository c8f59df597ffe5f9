//! Time source abstraction.
//!
//! Cache age math runs against an injected [`Clock`] rather than ambient
//! `SystemTime` calls, so TTL behavior is testable without real sleeps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond-resolution time source, expressed as ms since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        // A pre-epoch system clock is a host misconfiguration; saturate to 0
        // rather than panic on the request path.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
