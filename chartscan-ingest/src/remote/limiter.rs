//! Global pacing for remote API calls
//!
//! Calls are serialized (one in flight at a time) and spaced by a minimum
//! interval. Both the semaphore and the governor limiter are safe to share
//! across tasks.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-concurrency limiter with minimum call spacing
#[derive(Clone)]
pub struct CallLimiter {
    rate: Arc<DefaultDirectRateLimiter>,
    slot: Arc<Semaphore>,
    min_spacing: Duration,
}

impl CallLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        let spacing = min_spacing.max(Duration::from_millis(1));
        let quota = Quota::with_period(spacing)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Self {
            rate: Arc::new(RateLimiter::direct(quota)),
            slot: Arc::new(Semaphore::new(1)),
            min_spacing: spacing,
        }
    }

    /// Wait for the call slot and the spacing window.
    ///
    /// The call runs while the returned permit is held. The semaphore is
    /// never closed, so the permit is always present.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.slot).acquire_owned().await.ok();
        self.rate.until_ready().await;
        permit
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }
}
