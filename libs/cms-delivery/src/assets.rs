//! Asset host rewriting
//!
//! Asset URLs served from the CMS asset hosts are moved onto a custom domain
//! (usually a CDN or proxy in front of them). An optional allow-list of
//! space ids blanks out assets that belong to other spaces.

use crate::endpoint::Endpoint;
use crate::walk::{Visit, WalkLimit, walk_pre};
use cms_http::{ApiRequest, ApiResponse, ResponseMiddleware};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Asset host, with or without scheme: `https://a.storyblok.com/...`,
/// `//a-us.storyblok.com/...`, `a.storyblok.com/...`. Group 1 is the path.
#[allow(clippy::expect_used)] // good regex, it doesn't panic
static ASSET_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:https?:)?//)?a(?:-[a-z0-9]+)?\.storyblok\.com(/.*)?$")
        .expect("static regex should not panic")
});

/// Space id embedded in an asset path: `/f/{space_id}/...`.
#[allow(clippy::expect_used)] // good regex, it doesn't panic
static SPACE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/f/(\d+)(?:/|$)").expect("static regex should not panic"));

/// Outcome of rewriting one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetUrl {
    /// Not an asset URL; left alone
    Foreign,
    Rewritten(String),
    /// Asset from a space outside the allow-list
    Blocked,
}

/// Shape an asset field takes when its asset is blocked.
#[must_use]
pub fn empty_asset() -> Value {
    json!({
        "id": null,
        "alt": null,
        "name": "",
        "focus": null,
        "title": null,
        "source": null,
        "filename": "",
        "copyright": null,
        "fieldtype": "asset",
        "meta_data": {},
        "is_external_url": false,
    })
}

fn is_asset_object(map: &Map<String, Value>) -> bool {
    map.get("fieldtype").and_then(Value::as_str) == Some("asset") && map.contains_key("filename")
}

#[derive(Debug, Clone)]
pub struct AssetDomain {
    domain: String,
    allowed_space_ids: HashSet<String>,
    limit: WalkLimit,
}

impl AssetDomain {
    /// `domain` must be an absolute URL; a trailing `/` is ignored. An empty
    /// `allowed_space_ids` lets every space through.
    #[must_use]
    pub fn new(
        domain: &str,
        allowed_space_ids: impl IntoIterator<Item = String>,
        limit: WalkLimit,
    ) -> Self {
        Self {
            domain: domain.trim_end_matches('/').to_owned(),
            allowed_space_ids: allowed_space_ids.into_iter().collect(),
            limit,
        }
    }

    #[must_use]
    pub fn rewrite_url(&self, url: &str) -> AssetUrl {
        let Some(captures) = ASSET_URL.captures(url) else {
            return AssetUrl::Foreign;
        };
        let path = captures.get(1).map_or("", |m| m.as_str());

        if !self.allowed_space_ids.is_empty() {
            let space_id = SPACE_ID
                .captures(path)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str());
            if !space_id.is_some_and(|id| self.allowed_space_ids.contains(id)) {
                return AssetUrl::Blocked;
            }
        }

        AssetUrl::Rewritten(format!("{}{path}", self.domain))
    }

    /// Rewrite every asset URL in `body`. Returns the number of subtrees
    /// skipped because of the depth bound.
    pub fn rewrite_body(&self, body: &mut Value) -> usize {
        walk_pre(body, self.limit, "asset_domain", &mut |value: &mut Value| self.visit(value))
    }

    fn visit(&self, value: &mut Value) -> Visit {
        if let Value::String(url) = value {
            match self.rewrite_url(url) {
                AssetUrl::Rewritten(rewritten) => *url = rewritten,
                AssetUrl::Blocked => url.clear(),
                AssetUrl::Foreign => {}
            }
            return Visit::Descend;
        }

        let Some(map) = value.as_object_mut() else {
            return Visit::Descend;
        };
        if !is_asset_object(map) {
            return Visit::Descend;
        }

        // Only the filename of an asset object is a URL; alt, title etc. stay as they are
        let outcome = map
            .get("filename")
            .and_then(Value::as_str)
            .map(|filename| self.rewrite_url(filename));
        match outcome {
            Some(AssetUrl::Rewritten(url)) => {
                map.insert("filename".to_owned(), Value::String(url));
            }
            Some(AssetUrl::Blocked) => *value = empty_asset(),
            Some(AssetUrl::Foreign) | None => {}
        }
        Visit::SkipChildren
    }
}

impl ResponseMiddleware for AssetDomain {
    fn name(&self) -> &'static str {
        "asset_domain"
    }

    fn on_response(&self, request: &ApiRequest, mut response: ApiResponse) -> ApiResponse {
        if Endpoint::parse(request.route()).is_content() {
            self.rewrite_body(&mut response.body);
        }
        response
    }
}
