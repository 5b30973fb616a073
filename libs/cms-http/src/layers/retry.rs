use crate::config::{JITTER_RATIO, RetryConfig};
use crate::error::HttpError;
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Header name for retry attempt number (1-indexed).
/// Added by the transport to resent requests.
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

/// Tower layer that resends rate-limited requests with exponential backoff
///
/// Only HTTP 429 is retried. Transport failures and every other status are
/// surfaced untouched on the first occurrence.
#[derive(Clone, Debug)]
pub struct RetryLayer {
    config: RetryConfig,
}

impl RetryLayer {
    /// Create a new `RetryLayer` with the specified configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service that implements the rate-limit retry loop
///
/// The attempt counter travels on the request ([`ApiRequest::retry`]), so the
/// service itself holds no per-request state and can be shared freely.
#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
}

impl<S> Service<ApiRequest> for RetryService<S>
where
    S: Service<ApiRequest, Response = ApiResponse, Error = HttpError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = ApiResponse;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<ApiResponse, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();

        Box::pin(async move {
            let mut request = req;
            loop {
                let mut svc = inner.clone();
                svc.ready().await?;

                let err = match svc.call(request.clone()).await {
                    Ok(resp) => return Ok(resp),
                    Err(err) if err.is_rate_limited() => err,
                    Err(err) => return Err(err),
                };

                let attempt = request.retry.attempt();
                let Some(delay) = next_delay(&config, attempt) else {
                    tracing::debug!(
                        attempt,
                        path = %request.path,
                        max_delay_ms = config.max_delay.as_millis(),
                        "Rate limit persists at delay ceiling; giving up"
                    );
                    return Err(err);
                };

                tracing::debug!(
                    retry = attempt + 1,
                    method = %request.method,
                    path = %request.path,
                    backoff_ms = delay.as_millis(),
                    "Retrying rate-limited request"
                );
                request.retry = request.retry.next();
                tokio::time::sleep(delay).await;
            }
        })
    }
}

/// Un-jittered delay for `attempt`: `min(base_delay * 2^attempt, max_delay)`.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    config
        .base_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}

/// Delay to wait before resend number `attempt + 1`, or `None` once the
/// computed delay has reached the ceiling and the loop must give up.
#[must_use]
pub fn next_delay(config: &RetryConfig, attempt: u32) -> Option<Duration> {
    let delay = backoff_delay(config, attempt);
    if delay >= config.max_delay {
        return None;
    }
    if !config.jitter {
        return Some(delay);
    }
    let factor = rand::rng().random_range(0.0..JITTER_RATIO);
    Some(delay + delay.mul_f64(factor))
}
