//! Delivery client configuration
//!
//! Layered with figment: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `CMS__` (`__` separates nesting
//! levels, e.g. `CMS__RETRY__MAX_DELAY_MS=4000`).

use crate::error::DeliveryError;
use crate::path::BasePath;
use crate::relations::RelationPatterns;
use crate::walk::DEFAULT_MAX_WALK_DEPTH;
use cms_http::{DEFAULT_BASE_URL, ExposeSecret, RetryConfig, SecretString};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CMS__";

/// How the API embeds link targets server-side.
///
/// Client-side resolution is the same for every mode: matching multilink
/// fields get the full entity attached under `story`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkResolution {
    Url,
    Story,
    Link,
}

impl LinkResolution {
    /// Value sent as the `resolve_links` query parameter.
    #[must_use]
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Story => "story",
            Self::Link => "link",
        }
    }
}

/// Rate-limit backoff settings in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Content delivery access token (required)
    #[serde(serialize_with = "serialize_redacted")]
    pub access_token: SecretString,

    /// API root (default: the public v2 endpoint)
    pub base_url: String,

    /// Scope every request under this folder; must end with `/`
    pub base_path: Option<String>,

    /// Strip `base_path` back out of slugs and paths in responses
    pub rewrite_links: bool,

    /// Absolute URL replacing the asset host in every asset URL
    pub asset_domain: Option<String>,

    /// Asset space ids allowed through the asset rewrite; empty allows all
    #[serde(deserialize_with = "deserialize_space_ids")]
    pub allowed_space_ids: Vec<String>,

    /// `component.field` patterns naming relation fields
    pub resolve_relations: Vec<String>,

    /// Null out unresolved scalar relations and drop unresolved array entries
    pub remove_unresolved_relations: bool,

    /// Link resolution mode; `None` disables link resolution
    pub resolve_links: Option<LinkResolution>,

    pub retry: RetrySettings,

    /// Nesting depth past which content tree walks stop descending
    pub max_walk_depth: usize,

    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,

    pub user_agent: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            access_token: SecretString::from(String::new()),
            base_url: DEFAULT_BASE_URL.to_owned(),
            base_path: None,
            rewrite_links: false,
            asset_domain: None,
            allowed_space_ids: Vec::new(),
            resolve_relations: Vec::new(),
            remove_unresolved_relations: false,
            resolve_links: None,
            retry: RetrySettings::default(),
            max_walk_depth: DEFAULT_MAX_WALK_DEPTH,
            timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl DeliveryConfig {
    /// Configuration with the given token and defaults everywhere else.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(token.into()),
            ..Self::default()
        }
    }

    /// Layered provider: defaults, then `path` (if any), then `CMS__*` env.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the layered configuration.
    ///
    /// # Errors
    /// Returns `DeliveryError::ConfigLoad` when a layer cannot be parsed and
    /// `DeliveryError::InvalidConfig` when a value fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, DeliveryError> {
        Self::from_figment(&Self::figment(path))
    }

    /// Extract and validate from an arbitrary provider.
    ///
    /// # Errors
    /// See [`DeliveryConfig::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self, DeliveryError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        tracing::debug!(
            base_url = %config.base_url,
            base_path = ?config.base_path,
            relations = config.resolve_relations.len(),
            "delivery configuration loaded"
        );
        Ok(config)
    }

    /// Check every value that cannot be expressed in the type.
    ///
    /// # Errors
    /// Returns `DeliveryError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.access_token.expose_secret().trim().is_empty() {
            return Err(DeliveryError::invalid_config("access_token", "must not be empty"));
        }

        Url::parse(&self.base_url)
            .map_err(|e| DeliveryError::invalid_config("base_url", e.to_string()))?;

        self.base_path()?;

        if let Some(domain) = &self.asset_domain {
            let url = Url::parse(domain).map_err(|e| {
                DeliveryError::invalid_config("asset_domain", format!("not an absolute URL: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(DeliveryError::invalid_config(
                    "asset_domain",
                    "must be an absolute http(s) URL",
                ));
            }
        }

        if let Some(bad) = self
            .allowed_space_ids
            .iter()
            .find(|id| id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(DeliveryError::invalid_config(
                "allowed_space_ids",
                format!("`{bad}` is not a numeric space id"),
            ));
        }

        RelationPatterns::parse(&self.resolve_relations)?;

        if self.retry.base_delay_ms == 0 || self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(DeliveryError::invalid_config(
                "retry",
                "base_delay_ms must be positive and not exceed max_delay_ms",
            ));
        }

        if self.max_walk_depth == 0 {
            return Err(DeliveryError::invalid_config("max_walk_depth", "must be at least 1"));
        }

        Ok(())
    }

    /// Parsed base path, if one is configured.
    ///
    /// # Errors
    /// Returns `DeliveryError::InvalidConfig` for a malformed base path.
    pub fn base_path(&self) -> Result<Option<BasePath>, DeliveryError> {
        self.base_path.as_deref().map(BasePath::new).transpose()
    }

    /// Rate-limit policy for the transport.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }

    /// Per-attempt request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn serialize_redacted<S: Serializer>(
    secret: &SecretString,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if secret.expose_secret().is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("[REDACTED]")
    }
}

/// Space ids may be written as numbers or strings.
fn deserialize_space_ids<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SpaceId {
        Number(u64),
        Text(String),
    }

    let ids = Vec::<SpaceId>::deserialize(deserializer)?;
    Ok(ids
        .into_iter()
        .map(|id| match id {
            SpaceId::Number(n) => n.to_string(),
            SpaceId::Text(s) => s.trim().to_owned(),
        })
        .collect())
}
