use crate::builder::ApiClientBuilder;
use crate::error::HttpError;
use crate::pipeline::Pipeline;
use crate::request::{ApiRequest, Params};
use crate::response::ApiResponse;
use crate::transport::ApiFuture;
use http::{HeaderMap, Method};
use std::sync::Arc;
use tower::buffer::Buffer;
use tower::{Service, ServiceExt};

/// Type alias for the buffered service
/// Buffer<Req, F> in tower 0.5 where Req is the request type and F is the service future type
pub type BufferedService = Buffer<ApiRequest, ApiFuture>;

/// Transport core: the single entry point every content request goes through
///
/// A request passes the outbound middleware in registration order, is sent
/// through the tower stack (rate-limit retry, timeout, decompression,
/// connection pool) and the decoded response passes the inbound middleware
/// in registration order before reaching the caller.
///
/// `ApiClient` is `Clone + Send + Sync`; cloning is cheap and clones share
/// the connection pool and middleware. Use [`ApiClientBuilder`] to construct
/// instances.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) service: BufferedService,
    pub(crate) pipeline: Arc<Pipeline>,
}

impl ApiClient {
    /// Create a new client with default configuration
    ///
    /// # Errors
    /// Returns an error if the default transport cannot be initialized
    pub fn new() -> Result<Self, HttpError> {
        ApiClientBuilder::new().build()
    }

    /// Create a builder for configuring the client
    #[must_use]
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Issue a request described by its parts.
    ///
    /// # Errors
    /// Whatever the transport or the middleware surfaces; rate-limit
    /// failures only after the retry layer gave up.
    pub async fn request(
        &self,
        method: Method,
        path: impl Into<String>,
        params: Params,
        headers: HeaderMap,
    ) -> Result<ApiResponse, HttpError> {
        let mut request = ApiRequest::new(method, path).with_params(params);
        request.headers = headers;
        self.send(request).await
    }

    /// GET `path` with query `params`.
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn get(
        &self,
        path: impl Into<String>,
        params: Params,
    ) -> Result<ApiResponse, HttpError> {
        self.send(ApiRequest::get(path).with_params(params)).await
    }

    /// Run a prepared request through the whole pipeline.
    ///
    /// # Errors
    /// See [`ApiClient::request`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        let request = self.pipeline.apply_request(request);
        tracing::debug!(method = %request.method, path = %request.route(), "dispatching request");

        let mut service = self.service.clone();
        let response = service
            .ready()
            .await
            .map_err(map_buffer_error)?
            .call(request.clone())
            .await
            .map_err(map_buffer_error)?;

        Ok(self.pipeline.apply_response(&request, response))
    }

    /// Middleware registered on this client.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Map buffer errors back to `HttpError`.
///
/// Errors from the inner service come back boxed; anything that is not an
/// `HttpError` means the buffer worker is gone.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}
