use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("cms-http/", env!("CARGO_PKG_VERSION"));

/// Upper bound of the random jitter added to a backoff, as a fraction of the delay.
pub const JITTER_RATIO: f64 = 0.10;

/// Rate-limit retry policy
///
/// Computes the delay for attempt `n` as `min(base_delay * 2^n, max_delay)`.
/// The retry loop gives up as soon as the computed delay reaches `max_delay`,
/// so `max_delay` doubles as the ceiling on the number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first resend (default: 50ms)
    pub base_delay: Duration,

    /// Delay ceiling; reaching it ends the retry loop (default: 2000ms)
    pub max_delay: Duration,

    /// Add up to 10% random jitter to each delay (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(2000),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create config with custom base and max delays, jitter enabled
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Create fast config for testing (1ms base, 8ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter: false,
        }
    }
}

/// Transport security configuration
///
/// Controls whether the client enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    AllowInsecureHttp,
}

/// Overall transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Absolute API root every request path is resolved against
    /// (default: `https://api.storyblok.com/v2/`)
    pub base_url: String,

    /// Per-attempt timeout (default: 30 seconds)
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value
    pub user_agent: String,

    /// Rate-limit retry policy; `None` disables retries
    pub retry: Option<RetryConfig>,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// Buffer capacity for concurrent request handling (default: 256)
    pub buffer_capacity: usize,

    /// Timeout for idle pooled connections (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 16)
    pub pool_max_idle_per_host: usize,
}

/// Default content delivery API root
pub const DEFAULT_BASE_URL: &str = "https://api.storyblok.com/v2/";

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10 MB
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: Some(RetryConfig::default()),
            transport: TransportSecurity::TlsOnly,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 16,
        }
    }
}

impl TransportConfig {
    /// Create configuration for testing with mock servers (allows insecure HTTP)
    ///
    /// **WARNING**: This configuration allows plain HTTP connections.
    /// Use only for local testing with mock servers, never in production.
    #[must_use]
    pub fn for_testing(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024, // 1 MB
            retry: Some(RetryConfig::fast()),
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}
