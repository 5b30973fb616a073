use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Transport error types
///
/// Every failure the pipeline can surface to a caller. Rate-limit responses
/// arrive here as [`HttpError::HttpStatus`] with status 429 once the retry
/// layer has given up.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
        /// Parsed `Retry-After` header value, if present and valid
        retry_after: Option<Duration>,
    },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Query string encoding error
    #[error("Query encoding failed: {0}")]
    QueryEncode(#[from] serde_urlencoded::ser::Error),

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// Invalid URL (failed to parse)
    ///
    /// The `reason` field is a diagnostic message for logging only; match on `kind`.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// HTTP status of a non-2xx failure, `None` for every other kind.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this failure is the API's rate-limit signal (HTTP 429).
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(http::StatusCode::TOO_MANY_REQUESTS)
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.unwrap().0, "connection refused");
    }

    #[test]
    fn test_rate_limited_only_for_429() {
        let limited = HttpError::HttpStatus {
            status: http::StatusCode::TOO_MANY_REQUESTS,
            body_preview: String::new(),
            content_type: None,
            retry_after: None,
        };
        assert!(limited.is_rate_limited());

        let not_found = HttpError::HttpStatus {
            status: http::StatusCode::NOT_FOUND,
            body_preview: String::new(),
            content_type: None,
            retry_after: None,
        };
        assert!(!not_found.is_rate_limited());
        assert!(!HttpError::Timeout(Duration::from_secs(1)).is_rate_limited());
        assert_eq!(not_found.status(), Some(http::StatusCode::NOT_FOUND));
    }
}
