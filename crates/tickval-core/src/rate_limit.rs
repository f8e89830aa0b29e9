//! Shared request throttle for the external analysis service.
//!
//! Built on a direct `governor` limiter with a burst of one: permits are spaced at least
//! `ceil(window / requests)` apart, so no rolling window of length `window` ever sees more
//! than `requests` completions.
//!
//! This is stricter than a capacity-`requests` token bucket: idle time never banks a
//! burst, whereas a full bucket could admit up to `2 * requests - 1` permits in one window.

use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as GovernorLimiter};

use crate::cancel::{CancelToken, Cancelled};
use crate::ConfigError;

type DirectLimiter<C> =
    GovernorLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Throttle shared by every worker of a batch run.
pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: DirectLimiter<C>,
    clock: C,
    requests: u32,
    window: Duration,
    spacing: Duration,
}

impl RateLimiter<DefaultClock> {
    /// At most `requests` permits per rolling `window`, using the monotonic system clock.
    pub fn new(requests: u32, window: Duration) -> Result<Self, ConfigError> {
        Self::with_clock(requests, window, DefaultClock::default())
    }

    pub fn per_minute(requests: u32) -> Result<Self, ConfigError> {
        Self::new(requests, Duration::from_secs(60))
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(requests: u32, window: Duration, clock: C) -> Result<Self, ConfigError> {
        let spacing = permit_spacing(requests, window)?;
        let quota = Quota::with_period(spacing)
            .ok_or(ConfigError::ZeroRateWindow)?
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            limiter: GovernorLimiter::direct_with_clock(quota, &clock),
            clock,
            requests,
            window,
            spacing,
        })
    }

    pub const fn requests(&self) -> u32 {
        self.requests
    }

    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Minimum distance between two consecutive permits.
    pub const fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Takes a permit if one is available now, otherwise returns the wait until the next one.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Waits for a permit. Returns `Err(Cancelled)` if `cancel` fires first or was already
    /// set; a cancelled caller never consumes a permit.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            tracing::trace!(wait_ms = wait.as_millis() as u64, "waiting for rate limit permit");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(Cancelled),
            }
        }
    }
}

impl<C: Clock> Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests", &self.requests)
            .field("window", &self.window)
            .field("spacing", &self.spacing)
            .finish()
    }
}

fn permit_spacing(requests: u32, window: Duration) -> Result<Duration, ConfigError> {
    if requests == 0 {
        return Err(ConfigError::ZeroRequestRate);
    }
    if window.is_zero() {
        return Err(ConfigError::ZeroRateWindow);
    }

    // Round up so `requests * spacing >= window` holds exactly.
    let nanos = window.as_nanos().div_ceil(u128::from(requests));
    let nanos = u64::try_from(nanos).unwrap_or(u64::MAX).max(1);
    Ok(Duration::from_nanos(nanos))
}
