use crate::error::HttpError;
use crate::pipeline::RequestMiddleware;
use crate::request::ApiRequest;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Query parameter the content delivery API reads the access token from.
pub const TOKEN_PARAM: &str = "token";

/// Where the credential travels.
#[derive(Clone)]
enum Placement {
    /// `?<param>=<token>`
    Query { param: String },
    /// `Authorization: Bearer <token>`, pre-built and marked sensitive
    Bearer { header: HeaderValue },
}

/// Injects the configured credential into every outbound request.
///
/// A credential the caller already put on the request always wins, which also
/// makes installing the middleware twice harmless.
#[derive(Clone)]
pub struct AuthMiddleware {
    token: SecretString,
    placement: Placement,
}

impl AuthMiddleware {
    /// Credential as the `token` query parameter.
    #[must_use]
    pub fn query(token: SecretString) -> Self {
        Self::query_param(token, TOKEN_PARAM)
    }

    /// Credential as a custom query parameter.
    #[must_use]
    pub fn query_param(token: SecretString, param: impl Into<String>) -> Self {
        Self {
            token,
            placement: Placement::Query {
                param: param.into(),
            },
        }
    }

    /// Credential as an `Authorization: Bearer` header.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the token cannot be carried in a header.
    pub fn bearer(token: SecretString) -> Result<Self, HttpError> {
        let mut header = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))?;
        header.set_sensitive(true);
        Ok(Self {
            token,
            placement: Placement::Bearer { header },
        })
    }
}

impl RequestMiddleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        match &self.placement {
            Placement::Query { param } => {
                request.set_param_if_absent(param, self.token.expose_secret());
            }
            Placement::Bearer { header } => {
                if !request.headers.contains_key(AUTHORIZATION) {
                    request.headers.insert(AUTHORIZATION, header.clone());
                }
            }
        }
        request
    }
}

impl fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let placement = match &self.placement {
            Placement::Query { param } => format!("query({param})"),
            Placement::Bearer { .. } => "bearer".to_owned(),
        };
        f.debug_struct("AuthMiddleware")
            .field("token", &"[REDACTED]")
            .field("placement", &placement)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[test]
    fn test_query_token_added_when_missing() {
        let auth = AuthMiddleware::query(secret("public-token"));
        let req = auth.on_request(ApiRequest::get("cdn/stories"));
        assert_eq!(req.param(TOKEN_PARAM), Some("public-token"));
    }

    #[test]
    fn test_query_token_not_overwritten() {
        let auth = AuthMiddleware::query(secret("config-token"));
        let req = auth.on_request(ApiRequest::get("cdn/stories").with_param("token", "caller"));
        assert_eq!(req.param(TOKEN_PARAM), Some("caller"));
    }

    #[test]
    fn test_inline_query_token_not_duplicated() {
        let auth = AuthMiddleware::query(secret("config-token"));
        let req = auth.on_request(ApiRequest::get("cdn/stories/home?token=caller"));
        assert_eq!(req.param(TOKEN_PARAM), None);

        let base = url::Url::parse("https://api.example.com/v2/").unwrap();
        assert_eq!(
            req.to_url(&base).unwrap().as_str(),
            "https://api.example.com/v2/cdn/stories/home?token=caller"
        );
    }

    #[test]
    fn test_installing_twice_is_idempotent() {
        let auth = AuthMiddleware::query(secret("t"));
        let once = auth.on_request(ApiRequest::get("cdn/tags"));
        let twice = auth.on_request(once.clone());
        assert_eq!(once.params, twice.params);
        assert_eq!(twice.params.len(), 1);
    }

    #[test]
    fn test_bearer_header_sensitive_and_not_overwritten() {
        let auth = AuthMiddleware::bearer(secret("mgmt")).unwrap();
        let req = auth.on_request(ApiRequest::get("spaces/1/stories"));
        let value = req.headers.get(AUTHORIZATION).unwrap();
        assert_eq!(value, "Bearer mgmt");
        assert!(value.is_sensitive());

        let mut preset = ApiRequest::get("spaces/1/stories");
        preset
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer mine"));
        let req = auth.on_request(preset);
        assert_eq!(req.headers.get(AUTHORIZATION).unwrap(), "Bearer mine");
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_bearer_rejects_control_characters() {
        assert!(AuthMiddleware::bearer(secret("bad\ntoken")).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let auth = AuthMiddleware::query(secret("very-secret"));
        let dbg = format!("{auth:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(dbg.contains("REDACTED"));
    }
}
