//! Rate limit & circuit breaker (C2): a fixed-window token bucket plus a
//! failure-streak circuit breaker, per `(tenantId, provider)`.
//!
//! This crate is deliberately storage-agnostic: `try_acquire` and `report`
//! operate on an in-memory `RateLimitBucket` snapshot the caller loaded and
//! will persist. Acquisition must never hold a database transaction open —
//! callers load the bucket, call `try_acquire`, persist the result, and only
//! then make the outbound call.

use chrono::{DateTime, Utc};
use inv_schemas::RateLimitBucket;

const CIRCUIT_OPEN_THRESHOLD: i32 = 5;
const CIRCUIT_OPEN_CAP_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    Denied { retry_after_ms: u64 },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    TransientFail,
    PermanentFail,
}

/// Roll the bucket's window forward if it has expired, resetting the count.
fn roll_window_if_expired(bucket: &mut RateLimitBucket, now: DateTime<Utc>) {
    let window_end = bucket.window_start
        + chrono::Duration::milliseconds(bucket.window_duration_ms);
    if now >= window_end {
        bucket.window_start = now;
        bucket.request_count = 0;
    }
}

/// Attempt to acquire one token from the bucket. Mutates `bucket` in place
/// on grant (increments `request_count`) — the caller is responsible for
/// persisting the updated bucket atomically with this decision.
pub fn try_acquire(bucket: &mut RateLimitBucket, now: DateTime<Utc>) -> AcquireOutcome {
    if let Some(open_until) = bucket.circuit_open_until {
        if now < open_until {
            let retry_after_ms = (open_until - now).num_milliseconds().max(0) as u64;
            return AcquireOutcome::Denied { retry_after_ms };
        }
    }

    roll_window_if_expired(bucket, now);

    if bucket.request_count < bucket.capacity {
        bucket.request_count += 1;
        AcquireOutcome::Granted
    } else {
        let window_end = bucket.window_start
            + chrono::Duration::milliseconds(bucket.window_duration_ms);
        let retry_after_ms = (window_end - now).num_milliseconds().max(0) as u64;
        AcquireOutcome::Denied { retry_after_ms }
    }
}

/// Record the outcome of an outbound call against the breaker. `Ok` closes
/// the circuit and resets the failure streak; `TransientFail` accumulates
/// toward the open threshold; `PermanentFail` does not touch the breaker —
/// the fault is in the request, not the provider.
pub fn report(bucket: &mut RateLimitBucket, outcome: CallOutcome, now: DateTime<Utc>) {
    match outcome {
        CallOutcome::Ok => {
            bucket.consecutive_failures = 0;
            bucket.circuit_open_until = None;
        }
        CallOutcome::TransientFail => {
            bucket.consecutive_failures += 1;
            if bucket.consecutive_failures >= CIRCUIT_OPEN_THRESHOLD {
                let open_ms = circuit_open_duration_ms(bucket.consecutive_failures);
                bucket.circuit_open_until = Some(now + chrono::Duration::milliseconds(open_ms));
            }
        }
        CallOutcome::PermanentFail => {}
    }
}

fn circuit_open_duration_ms(consecutive_failures: i32) -> i64 {
    let exp = 2i64.saturating_pow(consecutive_failures.max(0) as u32);
    (exp.saturating_mul(1_000)).min(CIRCUIT_OPEN_CAP_MS)
}

pub fn new_bucket(
    tenant_id: uuid::Uuid,
    provider: inv_schemas::Provider,
    capacity: i32,
    window_duration_ms: i64,
    now: DateTime<Utc>,
) -> RateLimitBucket {
    RateLimitBucket {
        tenant_id,
        provider,
        capacity,
        window_duration_ms,
        window_start: now,
        request_count: 0,
        consecutive_failures: 0,
        circuit_open_until: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use inv_schemas::Provider;
    use uuid::Uuid;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn bucket() -> RateLimitBucket {
        new_bucket(Uuid::new_v4(), Provider::A, 2, 10_000, t(0))
    }

    #[test]
    fn grants_up_to_capacity_then_denies() {
        let mut b = bucket();
        assert_eq!(try_acquire(&mut b, t(1)), AcquireOutcome::Granted);
        assert_eq!(try_acquire(&mut b, t(2)), AcquireOutcome::Granted);
        let denied = try_acquire(&mut b, t(3));
        assert!(!denied.is_granted());
    }

    #[test]
    fn window_rollover_resets_count() {
        let mut b = bucket();
        assert_eq!(try_acquire(&mut b, t(1)), AcquireOutcome::Granted);
        assert_eq!(try_acquire(&mut b, t(2)), AcquireOutcome::Granted);
        assert!(!try_acquire(&mut b, t(3)).is_granted());
        // window is 10s; t(11) rolls it over
        assert_eq!(try_acquire(&mut b, t(11)), AcquireOutcome::Granted);
    }

    #[test]
    fn five_consecutive_transient_failures_open_circuit() {
        let mut b = bucket();
        for _ in 0..4 {
            report(&mut b, CallOutcome::TransientFail, t(0));
        }
        assert!(try_acquire(&mut b, t(1)).is_granted());
        report(&mut b, CallOutcome::TransientFail, t(1));
        assert_eq!(b.consecutive_failures, 5);
        let denied = try_acquire(&mut b, t(2));
        assert!(!denied.is_granted());
    }

    #[test]
    fn ok_outcome_closes_circuit_and_resets_streak() {
        let mut b = bucket();
        for _ in 0..5 {
            report(&mut b, CallOutcome::TransientFail, t(0));
        }
        assert!(b.circuit_open_until.is_some());
        report(&mut b, CallOutcome::Ok, t(1));
        assert_eq!(b.consecutive_failures, 0);
        assert!(b.circuit_open_until.is_none());
    }

    #[test]
    fn permanent_fail_does_not_affect_breaker() {
        let mut b = bucket();
        report(&mut b, CallOutcome::TransientFail, t(0));
        report(&mut b, CallOutcome::PermanentFail, t(0));
        assert_eq!(b.consecutive_failures, 1);
    }

    #[test]
    fn circuit_open_duration_is_capped_at_five_minutes() {
        assert_eq!(circuit_open_duration_ms(20), 5 * 60 * 1000);
    }

    #[test]
    fn circuit_closes_again_after_open_duration_elapses() {
        let mut b = bucket();
        for _ in 0..5 {
            report(&mut b, CallOutcome::TransientFail, t(0));
        }
        let open_until = b.circuit_open_until.unwrap();
        let still_open = try_acquire(&mut b, open_until - chrono::Duration::seconds(1));
        assert!(!still_open.is_granted());
        let now_closed = try_acquire(&mut b, open_until + chrono::Duration::seconds(1));
        assert!(now_closed.is_granted());
    }

    #[test]
    fn isolation_across_tenants_and_providers() {
        // Each bucket is independent state — opening tenant T's breaker for
        // provider A must not touch a bucket for tenant T' or provider B.
        let mut bucket_t1_a = bucket();
        let bucket_t2_a = bucket();
        let bucket_t1_b = bucket();
        for _ in 0..5 {
            report(&mut bucket_t1_a, CallOutcome::TransientFail, t(0));
        }
        assert!(bucket_t1_a.circuit_open_until.is_some());
        assert!(bucket_t2_a.circuit_open_until.is_none());
        assert!(bucket_t1_b.circuit_open_until.is_none());
    }
}
