use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default pacing for the content-distribution source (requests per second).
///
/// The source is a static CDN with no published limit; this keeps a full
/// image sweep polite.
pub const DEFAULT_SOURCE_RPS: u32 = 10;

/// A standalone rate limiter using the governor crate.
///
/// Wiki traffic is paced by [`crate::scheduler::RequestScheduler`], which
/// also orders calls by priority. Reads from the content source have no
/// ordering requirements and only need a plain throughput cap.
///
/// # Example
///
/// ```ignore
/// use wikisync::rate_limit::ApiRateLimiter;
///
/// let limiter = ApiRateLimiter::new(10);
///
/// // Before each request:
/// limiter.wait().await;
/// transport.send(request).await?;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// Create a limiter allowing `requests_per_second` requests (0 is treated as 1).
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            inner: Arc::new(rate_limiter),
        }
    }

    /// Wait until a request is allowed.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_RPS)
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter").finish_non_exhaustive()
    }
}
