//! Leaf transport: turns an [`ApiRequest`] into an HTTP exchange
//!
//! Underneath sits a hyper client wrapped in the per-attempt timeout and
//! response decompression layers. This service resolves the request against
//! the base URL, sets the default headers, sends it and decodes the JSON body.

use crate::config::{TransportConfig, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::layers::RETRY_ATTEMPT_HEADER;
use crate::request::ApiRequest;
use crate::response::{ApiResponse, ResponseBody, decode_json_response};
use bytes::Bytes;
use http::header::{ACCEPT, USER_AGENT};
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use url::Url;

/// Boxed HTTP-level service the transport delegates to.
pub type HttpService = BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

/// Future returned by services operating on [`ApiRequest`].
pub type ApiFuture = Pin<Box<dyn Future<Output = Result<ApiResponse, HttpError>> + Send>>;

/// Leaf service of the transport stack.
#[derive(Clone)]
pub struct HyperTransport {
    inner: HttpService,
    base_url: Arc<Url>,
    user_agent: HeaderValue,
    max_body_size: usize,
}

impl HyperTransport {
    /// Build the hyper client and wrap it.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` or `HttpError::InvalidScheme` for an
    /// unusable base URL, `HttpError::Tls` if the TLS connector cannot be set
    /// up and `HttpError::InvalidHeaderValue` for a malformed user agent.
    pub fn new(config: &TransportConfig) -> Result<Self, HttpError> {
        let timeout = config.request_timeout;
        let https = build_https_connector(config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout only takes effect with a pool timer
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(map_decompression_response)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        Self::with_http_service(config, service.boxed_clone())
    }

    /// Wrap an arbitrary HTTP-level service.
    ///
    /// # Errors
    /// Same base URL and user agent validation as [`HyperTransport::new`].
    pub fn with_http_service(
        config: &TransportConfig,
        inner: HttpService,
    ) -> Result<Self, HttpError> {
        let base_url = parse_base_url(&config.base_url, config.transport)?;
        let user_agent = HeaderValue::from_str(&config.user_agent)?;
        Ok(Self {
            inner,
            base_url: Arc::new(base_url),
            user_agent,
            max_body_size: config.max_body_size,
        })
    }

    /// Base URL every request path is resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn to_http_request(&self, req: &ApiRequest) -> Result<Request<Full<Bytes>>, HttpError> {
        let url = req.to_url(&self.base_url)?;
        if url.origin() != self.base_url.origin() {
            return Err(HttpError::InvalidUri {
                url: req.path.clone(),
                kind: InvalidUriKind::ParseError,
                reason: "request path must stay on the configured API host".to_owned(),
            });
        }

        let mut builder = Request::builder().method(req.method.clone()).uri(url.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(req.headers.clone());
            if !headers.contains_key(USER_AGENT) {
                headers.insert(USER_AGENT, self.user_agent.clone());
            }
            if !headers.contains_key(ACCEPT) {
                headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
            }
            if req.retry.attempt() > 0 {
                headers.insert(RETRY_ATTEMPT_HEADER, HeaderValue::from(req.retry.attempt()));
            }
        }
        Ok(builder.body(Full::new(Bytes::new()))?)
    }
}

impl Service<ApiRequest> for HyperTransport {
    type Response = ApiResponse;
    type Error = HttpError;
    type Future = ApiFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let http_request = self.to_http_request(&req);
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let max_body_size = self.max_body_size;

        Box::pin(async move {
            let http_request = http_request?;
            tracing::trace!(
                method = %req.method,
                path = %req.route(),
                attempt = req.retry.attempt(),
                "sending request"
            );
            let response = inner.call(http_request).await?;
            decode_json_response(response, max_body_size).await
        })
    }
}

/// Parse the base URL, check its scheme and make sure it ends in `/` so
/// relative paths are appended rather than replacing the last segment.
fn parse_base_url(raw: &str, security: TransportSecurity) -> Result<Url, HttpError> {
    let mut url = Url::parse(raw).map_err(|e| HttpError::InvalidUri {
        url: raw.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if security == TransportSecurity::TlsOnly {
                return Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                });
            }
        }
        other => {
            return Err(HttpError::InvalidScheme {
                scheme: other.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            });
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(HttpError::InvalidUri {
            url: raw.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    Ok(url)
}

/// Map tower errors to `HttpError`, keeping typed errors raised further down.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

/// Box the decompressed body into [`ResponseBody`].
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Crypto provider for TLS: the process-wide default if one is installed,
/// otherwise a fresh aws-lc-rs provider (never installed globally).
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// HTTPS connector trusting the bundled webpki roots, advertising h2 and
/// http/1.1 via ALPN.
fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| HttpError::Tls(Box::new(e)))?;
    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
