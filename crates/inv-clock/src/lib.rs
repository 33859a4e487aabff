//! Clock & ID service (C1): timestamps, UUIDs, and backoff jitter shared by
//! every other crate. Time is always obtained through the `Clock` trait so
//! tests can substitute a deterministic fake instead of `Utc::now()`.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Mutex;
use uuid::Uuid;

/// Source of the current time. Injected wherever a component needs `now()`
/// so that drain loops, staleness checks, and backoff scheduling are
/// testable without sleeping real wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests: starts at a fixed instant and only advances
/// when told to.
pub struct FakeClock {
    current: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(instant),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.current.lock().expect("clock mutex poisoned");
        *guard = *guard + duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.current.lock().expect("clock mutex poisoned");
        *guard = instant;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("clock mutex poisoned")
    }
}

/// Fresh UUID v4 for entity/message identifiers.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Uniform random jitter in `[0, max_ms]`, used to spread retry storms.
pub fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_ms)
}

/// Exponential backoff with a cap and additive jitter:
/// `min(2^attempt * base_ms, cap_ms) + uniform(0, jitter_cap_ms)`.
///
/// `attempt` is expected to start at 1 for the first retry.
pub fn backoff_with_jitter(attempt: u32, base_ms: u64, cap_ms: u64, jitter_cap_ms: u64) -> u64 {
    let exp = 2u64.saturating_pow(attempt.min(32));
    let window = exp.saturating_mul(base_ms).min(cap_ms);
    window.saturating_add(jitter_ms(jitter_cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fake_clock_only_moves_when_advanced() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::at(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..100 {
            let j = jitter_ms(5_000);
            assert!(j <= 5_000);
        }
    }

    #[test]
    fn jitter_of_zero_max_is_always_zero() {
        assert_eq!(jitter_ms(0), 0);
    }

    #[test]
    fn backoff_is_capped() {
        let backoff = backoff_with_jitter(10, 1_000, 300_000, 0);
        assert_eq!(backoff, 300_000);
    }

    #[test]
    fn backoff_grows_exponentially_before_cap() {
        let b1 = backoff_with_jitter(1, 1_000, 300_000, 0);
        let b2 = backoff_with_jitter(2, 1_000, 300_000, 0);
        assert_eq!(b1, 2_000);
        assert_eq!(b2, 4_000);
    }

    #[test]
    fn new_id_is_v4() {
        let id = new_id();
        assert_eq!(id.get_version_num(), 4);
    }
}
