//! Property tests for throttling and backoff
//!
//! These properties drive the rate limiter with a fake clock and check the rolling-window
//! bound for arbitrary arrival patterns, then check the shape of retry backoff.

use std::cell::Cell;
use std::time::Duration;

use governor::clock::FakeRelativeClock;
use proptest::prelude::*;
use tickval_core::{RateLimiter, RetryPolicy};

// =============================================================================
// Rate Limiter: Rolling Window
// =============================================================================

/// Replays `steps` against a fake-clock limiter, returning the instant of every granted
/// permit and every `(instant, wait)` denial.
fn simulate(
    requests: u32,
    window: Duration,
    steps: &[Duration],
) -> (Vec<Duration>, Vec<(Duration, Duration)>) {
    let clock = FakeRelativeClock::default();
    let limiter = RateLimiter::with_clock(requests, window, clock.clone()).expect("limiter");

    let mut now = Duration::ZERO;
    let mut granted = Vec::new();
    let mut denied = Vec::new();
    for step in steps {
        clock.advance(*step);
        now += *step;
        match limiter.try_acquire() {
            Ok(()) => granted.push(now),
            Err(wait) => denied.push((now, wait)),
        }
    }
    (granted, denied)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn no_window_ever_holds_more_than_the_configured_requests(
        requests in 1u32..20,
        window_ms in 1u64..5_000,
        steps_ms in prop::collection::vec(0u64..400, 1..200),
    ) {
        let window = Duration::from_millis(window_ms);
        let steps: Vec<Duration> = steps_ms.into_iter().map(Duration::from_millis).collect();

        let (granted, _) = simulate(requests, window, &steps);

        for (index, start) in granted.iter().enumerate() {
            let in_window = granted[index..]
                .iter()
                .take_while(|at| **at < *start + window)
                .count();
            prop_assert!(
                in_window <= requests as usize,
                "{in_window} permits within {window:?} starting at {start:?}"
            );
        }
    }

    #[test]
    fn a_denied_caller_is_admitted_after_waiting_the_reported_time(
        requests in 1u32..10,
        window_ms in 10u64..2_000,
        burst in 2usize..12,
    ) {
        let clock = FakeRelativeClock::default();
        let window = Duration::from_millis(window_ms);
        let limiter = RateLimiter::with_clock(requests, window, clock.clone()).expect("limiter");

        for _ in 0..burst {
            match limiter.try_acquire() {
                Ok(()) => {}
                Err(wait) => {
                    prop_assert!(wait > Duration::ZERO);
                    prop_assert!(wait <= limiter.spacing());
                    clock.advance(wait);
                    prop_assert!(limiter.try_acquire().is_ok());
                }
            }
        }
    }

    #[test]
    fn idle_callers_are_admitted_immediately(
        requests in 1u32..50,
        window_ms in 1u64..10_000,
        arrivals in 1usize..30,
    ) {
        let window = Duration::from_millis(window_ms);
        let spacing = RateLimiter::new(requests, window).expect("limiter").spacing();
        let steps = vec![spacing; arrivals];

        let (granted, denied) = simulate(requests, window, &steps);

        prop_assert_eq!(granted.len(), arrivals);
        prop_assert!(denied.is_empty());
    }
}

// =============================================================================
// Retry Policy: Backoff Shape
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn backoff_never_shrinks_and_never_exceeds_the_cap(
        base_ms in 1u64..1_000,
        multiplier in 1.0f64..4.0,
        cap_ms in 1u64..30_000,
        attempts in 1u32..16,
    ) {
        let policy = RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(base_ms),
            multiplier,
            max_delay: Duration::from_millis(cap_ms.max(base_ms)),
            jitter_max: Duration::ZERO,
            jitter_seed: None,
        };

        let delays: Vec<Duration> = (1..=attempts)
            .map(|attempt| policy.delay_for_attempt(attempt))
            .collect();

        prop_assert_eq!(delays[0], policy.base_delay);
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1], "{:?} then {:?}", pair[0], pair[1]);
        }
        prop_assert!(delays.iter().all(|delay| *delay <= policy.max_delay));
    }

    #[test]
    fn an_always_failing_operation_runs_exactly_max_attempts_times(
        max_attempts in 1u32..8,
        seed in any::<u64>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("runtime");
        let policy = RetryPolicy::exponential(max_attempts).with_jitter_seed(seed);
        let calls = Cell::new(0u32);

        let outcome = runtime.block_on(policy.execute(
            || {
                calls.set(calls.get() + 1);
                async { Err::<(), &str>("upstream unavailable") }
            },
            |_| true,
        ));

        let error = outcome.expect_err("never succeeds");
        prop_assert_eq!(calls.get(), max_attempts);
        prop_assert_eq!(error.attempts(), max_attempts);
        prop_assert!(error.is_exhausted());
    }
}
