use cms_http::HttpError;
use thiserror::Error;

/// Errors surfaced by the delivery client.
///
/// Unresolved relation or link references are not errors; they follow the
/// configured resolution policy.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeliveryError {
    /// Transport failure, rate limit after retries or non-2xx status
    #[error(transparent)]
    Http(#[from] HttpError),

    /// A configuration value failed validation
    #[error("invalid configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Layered configuration could not be loaded or deserialized
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    /// The response body did not have the expected envelope shape
    #[error("unexpected payload from `{endpoint}`: {reason}")]
    UnexpectedPayload { endpoint: String, reason: String },

    /// Fetching one page of a paginated walk failed
    #[error("failed to fetch page {page}: {source}")]
    Page {
        page: u32,
        #[source]
        source: Box<DeliveryError>,
    },
}

impl DeliveryError {
    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// The underlying transport error, looking through page wrappers.
    #[must_use]
    pub fn http(&self) -> Option<&HttpError> {
        match self {
            Self::Http(err) => Some(err),
            Self::Page { source, .. } => source.http(),
            _ => None,
        }
    }
}

impl From<figment::Error> for DeliveryError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}
