use crate::error::{HttpError, InvalidUriKind};
use std::collections::BTreeMap;
use url::Url;

/// Query parameters of a request, kept sorted so encoded URLs are stable.
pub type Params = BTreeMap<String, String>;

/// Per-request retry bookkeeping.
///
/// Lives on the [`ApiRequest`] itself, never on a shared middleware instance,
/// so concurrent requests cannot observe each other's attempt counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryContext {
    attempt: u32,
}

impl RetryContext {
    /// Number of resends already performed (0 for the original send).
    #[must_use]
    pub fn attempt(self) -> u32 {
        self.attempt
    }

    /// Context for the next resend.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
        }
    }
}

/// Outbound request as seen by the middleware pipeline
///
/// `path` is relative to the transport's base URL (e.g. `cdn/stories/home`)
/// and may carry its own query string; `params` are appended after it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: http::Method,
    pub path: String,
    pub params: Params,
    pub headers: http::HeaderMap,
    pub retry: RetryContext,
}

impl ApiRequest {
    /// Create a request with no parameters or headers
    pub fn new(method: http::Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            headers: http::HeaderMap::new(),
            retry: RetryContext::default(),
        }
    }

    /// Create a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(http::Method::GET, path)
    }

    /// Add or replace a query parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replace all query parameters
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Look up a query parameter
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Whether `key` is set, either in `params` or in the inline query
    /// string of `path`.
    #[must_use]
    pub fn has_param(&self, key: &str) -> bool {
        if self.params.contains_key(key) {
            return true;
        }
        let Some((_, query)) = self.path.split_once('?') else {
            return false;
        };
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .is_ok_and(|pairs| pairs.iter().any(|(k, _)| k == key))
    }

    /// Insert `value` under `key` unless the caller already supplied one,
    /// as a parameter or inline in `path`.
    ///
    /// Returns `true` when the parameter was inserted.
    pub fn set_param_if_absent(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.has_param(key) {
            return false;
        }
        self.params.insert(key.to_owned(), value.into());
        true
    }

    /// Path with any inline query string and leading separators removed.
    #[must_use]
    pub fn route(&self) -> &str {
        let path = self.path.split_once('?').map_or(self.path.as_str(), |(p, _)| p);
        path.trim_start_matches('/')
    }

    /// Resolve the request against the transport base URL, merging the
    /// inline query string of `path` with the encoded `params`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the joined URL is malformed and
    /// `HttpError::QueryEncode` if the parameters cannot be encoded.
    pub fn to_url(&self, base: &Url) -> Result<Url, HttpError> {
        let (path, inline_query) = match self.path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (self.path.as_str(), None),
        };

        // A leading '/' would make `join` discard the base path (e.g. `/v2/`)
        let mut url = base
            .join(path.trim_start_matches('/'))
            .map_err(|e| HttpError::InvalidUri {
                url: format!("{base}{path}"),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        let encoded = serde_urlencoded::to_string(&self.params)?;
        let query = match (inline_query.filter(|q| !q.is_empty()), encoded.is_empty()) {
            (Some(q), true) => Some(q.to_owned()),
            (Some(q), false) => Some(format!("{q}&{encoded}")),
            (None, false) => Some(encoded),
            (None, true) => None,
        };
        url.set_query(query.as_deref());
        Ok(url)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.example.com/v2/").unwrap()
    }

    #[test]
    fn test_to_url_keeps_base_path() {
        let req = ApiRequest::get("/cdn/stories").with_param("token", "abc");
        let url = req.to_url(&base()).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/cdn/stories?token=abc");
    }

    #[test]
    fn test_to_url_merges_inline_query() {
        let req = ApiRequest::get("cdn/stories/blog/post?version=draft")
            .with_param("token", "abc");
        let url = req.to_url(&base()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/cdn/stories/blog/post?version=draft&token=abc"
        );
    }

    #[test]
    fn test_params_are_sorted_and_encoded() {
        let req = ApiRequest::get("cdn/stories")
            .with_param("starts_with", "blog/")
            .with_param("resolve_relations", "post.author,post.tags");
        let url = req.to_url(&base()).unwrap();
        assert_eq!(
            url.query(),
            Some("resolve_relations=post.author%2Cpost.tags&starts_with=blog%2F")
        );
    }

    #[test]
    fn test_set_param_if_absent_never_overwrites() {
        let mut req = ApiRequest::get("cdn/stories").with_param("token", "caller");
        assert!(!req.set_param_if_absent("token", "config"));
        assert_eq!(req.param("token"), Some("caller"));
        assert!(req.set_param_if_absent("version", "published"));
        assert_eq!(req.param("version"), Some("published"));
    }

    #[test]
    fn test_inline_query_counts_as_supplied() {
        let mut req = ApiRequest::get("cdn/stories/home?token=caller&cv=1");
        assert!(req.has_param("token"));
        assert!(req.has_param("cv"));
        assert!(!req.has_param("tok"));
        assert!(!req.set_param_if_absent("token", "config"));
        assert!(req.params.is_empty());

        let url = req.to_url(&base()).unwrap();
        assert_eq!(url.query(), Some("token=caller&cv=1"));
    }

    #[test]
    fn test_inline_query_keys_are_decoded() {
        let req = ApiRequest::get("cdn/stories?starts%5Fwith=blog%2Fnews%2F");
        assert!(req.has_param("starts_with"));
        assert!(!ApiRequest::get("cdn/stories?").has_param("starts_with"));
    }

    #[test]
    fn test_route_strips_query_and_leading_slash() {
        let req = ApiRequest::get("/cdn/stories/home?cv=1");
        assert_eq!(req.route(), "cdn/stories/home");
    }

    #[test]
    fn test_retry_context_counts_up() {
        let ctx = RetryContext::default();
        assert_eq!(ctx.attempt(), 0);
        assert_eq!(ctx.next().next().attempt(), 2);
    }
}
