use crate::client::{ApiClient, BufferedService};
use crate::config::{RetryConfig, TransportConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::RetryLayer;
use crate::pipeline::{Pipeline, RequestMiddleware, ResponseMiddleware};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::transport::HyperTransport;
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};

/// Type-erased service operating on [`ApiRequest`]
pub type ApiService = BoxCloneService<ApiRequest, ApiResponse, HttpError>;

/// Builder for constructing an [`ApiClient`] with custom configuration
///
/// Middleware is registered in execution order. Must be built inside a Tokio
/// runtime: the request buffer spawns its worker task on `build()`.
pub struct ApiClientBuilder {
    config: TransportConfig,
    pipeline: Pipeline,
    service: Option<ApiService>,
}

impl ApiClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config,
            pipeline: Pipeline::new(),
            service: None,
        }
    }

    /// Set the API root every request path is resolved against
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Set the per-attempt request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the User-Agent header value
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the rate-limit retry policy (`None` disables retries)
    #[must_use]
    pub fn retry(mut self, retry: Option<RetryConfig>) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Allow insecure HTTP connections (for testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "cms_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Set the buffer capacity for concurrent requests
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        // tower::Buffer panics with capacity=0
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Append an outbound middleware
    #[must_use]
    pub fn request_middleware(mut self, middleware: Arc<dyn RequestMiddleware>) -> Self {
        self.pipeline.push_request(middleware);
        self
    }

    /// Append an inbound middleware
    #[must_use]
    pub fn response_middleware(mut self, middleware: Arc<dyn ResponseMiddleware>) -> Self {
        self.pipeline.push_response(middleware);
        self
    }

    /// Replace the whole middleware pipeline
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the hyper transport with a custom leaf service.
    ///
    /// The retry layer and buffer still wrap it. Used for tests and for
    /// embedding the pipeline over a different HTTP stack.
    #[must_use]
    pub fn with_service<S>(mut self, service: S) -> Self
    where
        S: Service<ApiRequest, Response = ApiResponse, Error = HttpError> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        self.service = Some(BoxCloneService::new(service));
        self
    }

    /// Build the client
    ///
    /// Tower stack (outer to inner):
    ///   Buffer → RetryLayer → transport (Timeout → Decompression → hyper)
    ///
    /// The middleware pipeline runs outside the stack, so a rate-limit
    /// resend reuses the already transformed request.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be initialized (TLS setup,
    /// base URL or user agent validation).
    pub fn build(self) -> Result<ApiClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let mut service = match self.service {
            Some(service) => service,
            None => HyperTransport::new(&self.config)?.boxed_clone(),
        };

        if let Some(ref retry_config) = self.config.retry {
            service = ServiceBuilder::new()
                .layer(RetryLayer::new(retry_config.clone()))
                .service(service)
                .boxed_clone();
        }

        let (outbound, inbound) = self.pipeline.describe();
        tracing::debug!(
            ?outbound,
            ?inbound,
            retry = self.config.retry.is_some(),
            "api client built"
        );

        let buffer_capacity = self.config.buffer_capacity.max(1);
        let buffered: BufferedService = Buffer::new(service, buffer_capacity);

        Ok(ApiClient {
            service: buffered,
            pipeline: Arc::new(self.pipeline),
        })
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::transport::ApiFuture;
    use serde_json::json;
    use std::sync::Mutex;

    fn rate_limited() -> HttpError {
        HttpError::HttpStatus {
            status: http::StatusCode::TOO_MANY_REQUESTS,
            body_preview: String::new(),
            content_type: None,
            retry_after: None,
        }
    }

    fn always_429(
        calls: Arc<Mutex<usize>>,
    ) -> impl Service<ApiRequest, Response = ApiResponse, Error = HttpError, Future = ApiFuture>
    + Clone
    + Send
    + 'static {
        tower::service_fn(move |_req: ApiRequest| {
            *calls.lock().unwrap() += 1;
            let fut: ApiFuture = Box::pin(async { Err(rate_limited()) });
            fut
        })
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let client = ApiClientBuilder::new().build();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_build_rejects_plain_http_base_by_default() {
        let err = ApiClientBuilder::new()
            .base_url("http://api.example.com/v2/")
            .build()
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_user_agent() {
        let err = ApiClientBuilder::new().user_agent("bad\nagent").build().unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderValue(_)));
    }

    #[tokio::test]
    async fn test_retry_wraps_custom_service() {
        let calls = Arc::new(Mutex::new(0));
        let client = ApiClientBuilder::new()
            .retry(Some(RetryConfig::fast()))
            .with_service(always_429(calls.clone()))
            .build()
            .unwrap();

        let err = client.send(ApiRequest::get("cdn/stories")).await.unwrap_err();
        assert!(err.is_rate_limited());
        // fast(): delays 1, 2, 4 then 8 hits the ceiling
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_retry_disabled_sends_once() {
        let calls = Arc::new(Mutex::new(0));
        let client = ApiClientBuilder::new()
            .retry(None)
            .with_service(always_429(calls.clone()))
            .build()
            .unwrap();

        client.send(ApiRequest::get("cdn/stories")).await.unwrap_err();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_buffer_capacity_zero_clamped() {
        let client = ApiClientBuilder::new()
            .buffer_capacity(0)
            .with_service(tower::service_fn(|_req: ApiRequest| {
                let fut: ApiFuture = Box::pin(async { Ok(ApiResponse::ok(json!(1))) });
                fut
            }))
            .build()
            .unwrap();
        assert_eq!(client.send(ApiRequest::get("x")).await.unwrap().body, json!(1));
    }
}
