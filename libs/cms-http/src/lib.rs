#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport core for the content delivery pipeline
//!
//! Every content request goes through one [`ApiClient`]:
//!
//! 1. outbound [`RequestMiddleware`] run in registration order
//! 2. the tower stack sends the request: rate-limit retry ([`RetryLayer`]),
//!    per-attempt timeout, transparent decompression, pooled hyper client
//!    with rustls (HTTPS only by default)
//! 3. the JSON body is decoded; non-2xx statuses become [`HttpError::HttpStatus`]
//! 4. inbound [`ResponseMiddleware`] run in registration order
//!
//! # Example
//!
//! ```ignore
//! use cms_http::{ApiClient, AuthMiddleware, Params};
//! use std::sync::Arc;
//!
//! let client = ApiClient::builder()
//!     .request_middleware(Arc::new(AuthMiddleware::query(token)))
//!     .build()?;
//!
//! let resp = client.get("cdn/stories/home", Params::new()).await?;
//! println!("{}", resp.body["story"]["name"]);
//! ```

mod auth;
mod builder;
mod client;
mod config;
mod error;
pub mod layers;
mod pipeline;
mod request;
mod response;
mod transport;

pub use auth::{AuthMiddleware, TOKEN_PARAM};
pub use builder::{ApiClientBuilder, ApiService};
pub use client::{ApiClient, BufferedService, map_buffer_error};
pub use config::{
    DEFAULT_BASE_URL, DEFAULT_USER_AGENT, JITTER_RATIO, RetryConfig, TransportConfig,
    TransportSecurity,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{RETRY_ATTEMPT_HEADER, RetryLayer, RetryService};
pub use pipeline::{Pipeline, RequestMiddleware, ResponseMiddleware};
pub use request::{ApiRequest, Params, RetryContext};
pub use response::{
    ApiResponse, ERROR_BODY_PREVIEW_LIMIT, ResponseBody, TOTAL_HEADER, decode_json_response,
    parse_retry_after, read_body_limited,
};
pub use transport::{ApiFuture, HttpService, HyperTransport};

// Re-exported so middleware crates need no direct dependency on these
pub use http::{HeaderMap, HeaderValue, Method, StatusCode};
pub use secrecy::{ExposeSecret, SecretString};
