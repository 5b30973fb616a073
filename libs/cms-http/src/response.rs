use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::{Duration, SystemTime};

/// Response header carrying the collection size on list endpoints.
pub const TOTAL_HEADER: &str = "total";

/// Maximum body preview size for error messages (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body that supports decompression.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Decoded JSON response handed to inbound middleware and callers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    /// Build a 200 response around a JSON body (mostly useful in tests and mocks)
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Total item count advertised by the `total` header, if present and numeric.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.headers
            .get(TOTAL_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Take the JSON body, leaving `Value::Null` behind.
    pub fn take_body(&mut self) -> Value {
        self.body.take()
    }
}

/// Parse `Retry-After` header value into a `Duration`.
///
/// Supports delta-seconds and HTTP-date. Negative or past values yield `None`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// Read the body of `response` and decode it as JSON.
///
/// Non-2xx statuses become [`HttpError::HttpStatus`] carrying a bounded body
/// preview. Empty 2xx bodies decode to `Value::Null`.
///
/// # Errors
/// Returns `HttpError::HttpStatus` for non-2xx, `HttpError::BodyTooLarge` when
/// the body exceeds `max_body_size`, and `HttpError::Json` on malformed JSON.
pub async fn decode_json_response(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<ApiResponse, HttpError> {
    let status = response.status();
    let headers = response.headers().clone();

    if !status.is_success() {
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let retry_after = parse_retry_after(&headers);

        // Handle BodyTooLarge gracefully - don't let it hide the HTTP status error
        let preview_limit = max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = match read_body_limited(response, preview_limit).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
            Err(e) => return Err(e),
        };

        return Err(HttpError::HttpStatus {
            status,
            body_preview,
            content_type,
            retry_after,
        });
    }

    let bytes = read_body_limited(response, max_body_size).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok(ApiResponse {
        status,
        headers,
        body,
    })
}

/// Collect the (decompressed) body, failing once `limit` bytes are exceeded.
///
/// # Errors
/// Returns `HttpError::BodyTooLarge` past the limit and `HttpError::Transport`
/// if reading a frame fails.
pub async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let (_parts, body) = response.into_parts();

    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
