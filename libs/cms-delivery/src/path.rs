//! Base path scoping
//!
//! Outbound, requests are confined to a folder of the content tree: scoped
//! collections get a `starts_with` filter and single-story lookups get the
//! folder prefixed onto their slug. Inbound (opt-in), the folder prefix is
//! stripped back out of every slug and path so callers see site-relative
//! paths (`blog/x` becomes `/x`).

use crate::endpoint::Endpoint;
use crate::error::DeliveryError;
use crate::walk::{WalkLimit, report_truncation};
use cms_http::{ApiRequest, ApiResponse, RequestMiddleware, ResponseMiddleware};
use serde_json::{Map, Value};

/// Folder filter parameter of the scoped collections.
pub const STARTS_WITH_PARAM: &str = "starts_with";

/// Lookup-mode parameter of the single-story endpoint (`find_by=uuid`).
pub const FIND_BY_PARAM: &str = "find_by";

/// Envelope keys whose values carry slugs and paths.
const ENVELOPE_KEYS: [&str; 4] = ["story", "stories", "rels", "links"];

const STORY_PATH_FIELDS: [&str; 3] = ["full_slug", "default_full_slug", "path"];
const RECORD_PATH_FIELDS: [&str; 5] = ["slug", "real_path", "path", "cached_url", "url"];

/// Folder prefix every request is scoped under.
///
/// Always ends with exactly one `/` and never starts with one (`blog/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePath(String);

impl BasePath {
    /// # Errors
    /// Returns `DeliveryError::InvalidConfig` unless `raw` names a folder and
    /// ends with `/`.
    pub fn new(raw: &str) -> Result<Self, DeliveryError> {
        if !raw.ends_with('/') {
            return Err(DeliveryError::invalid_config("base_path", "must end with '/'"));
        }
        let normalized = collapse_separators(raw.trim_start_matches('/'));
        if normalized.is_empty() {
            return Err(DeliveryError::invalid_config("base_path", "must name a folder"));
        }
        Ok(Self(normalized))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix `identifier` with the base path. Duplicate separators collapse
    /// and an empty identifier yields the base path itself.
    #[must_use]
    pub fn join(&self, identifier: &str) -> String {
        collapse_separators(&format!("{}{identifier}", self.0))
    }

    /// Whether `path` already lives under the base path (a leading `/` is tolerated).
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        path.strip_prefix('/').unwrap_or(path).starts_with(&self.0)
    }

    /// Remove the base path from `path`, leaving exactly one leading `/`.
    ///
    /// The folder itself (`blog` or `blog/`) becomes `/`. `None` when `path`
    /// is not under the base path; the match respects the segment boundary,
    /// so `blogger/x` is not under `blog/`.
    #[must_use]
    pub fn strip(&self, path: &str) -> Option<String> {
        let folder = self.0.trim_end_matches('/');
        let rest = path.strip_prefix('/').unwrap_or(path).strip_prefix(folder)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(format!("/{}", rest.trim_start_matches('/')))
    }
}

fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        let slash = c == '/';
        if !(slash && previous_slash) {
            out.push(c);
        }
        previous_slash = slash;
    }
    out
}

/// The shapes a slug-bearing value can take in a response.
enum LinkShape<'a> {
    /// A bare path or URL string
    Url(&'a mut String),
    /// A links-endpoint entry or a multilink field
    Record(&'a mut Map<String, Value>),
    /// A full content item
    Story(&'a mut Map<String, Value>),
    /// Any other object; its members are classified in turn
    Object(&'a mut Map<String, Value>),
    Array(&'a mut Vec<Value>),
    Scalar,
}

impl<'a> LinkShape<'a> {
    fn classify(value: &'a mut Value) -> Self {
        match value {
            Value::String(s) => Self::Url(s),
            Value::Object(map) => {
                if map.contains_key("full_slug") {
                    Self::Story(map)
                } else if map.contains_key("cached_url")
                    || map.contains_key("real_path")
                    || map.get("fieldtype").and_then(Value::as_str) == Some("multilink")
                {
                    Self::Record(map)
                } else {
                    Self::Object(map)
                }
            }
            Value::Array(items) => Self::Array(items),
            Value::Null | Value::Bool(_) | Value::Number(_) => Self::Scalar,
        }
    }
}

/// Scopes outbound requests under a [`BasePath`] and, when `rewrite_links`
/// is on, strips it from inbound slugs and paths.
#[derive(Debug, Clone)]
pub struct PathScope {
    base: BasePath,
    rewrite_links: bool,
    limit: WalkLimit,
}

impl PathScope {
    #[must_use]
    pub fn new(base: BasePath, rewrite_links: bool, limit: WalkLimit) -> Self {
        Self {
            base,
            rewrite_links,
            limit,
        }
    }

    #[must_use]
    pub fn base(&self) -> &BasePath {
        &self.base
    }

    /// Strip the base path from every slug-bearing part of a response body.
    ///
    /// Returns the number of subtrees skipped because of the depth bound.
    pub fn strip_body(&self, body: &mut Value) -> usize {
        let Some(envelope) = body.as_object_mut() else {
            return 0;
        };
        let mut truncated = 0;
        for (key, value) in envelope.iter_mut() {
            if ENVELOPE_KEYS.contains(&key.as_str()) {
                truncated += self.rewrite(value, 0);
            }
        }
        report_truncation("base_path", self.limit, truncated);
        truncated
    }

    /// Single dispatch over [`LinkShape`].
    fn rewrite(&self, value: &mut Value, depth: usize) -> usize {
        if depth > self.limit.max_depth() {
            return 1;
        }
        match LinkShape::classify(value) {
            LinkShape::Url(path) => {
                self.strip_in_place(path);
                0
            }
            LinkShape::Story(story) => {
                self.strip_fields(story, &STORY_PATH_FIELDS);
                self.strip_each(story.get_mut("alternates"), &["full_slug", "path"]);
                self.strip_each(story.get_mut("translated_slugs"), &["path"]);
                story
                    .get_mut("content")
                    .map_or(0, |content| self.rewrite(content, depth + 1))
            }
            LinkShape::Record(record) => {
                self.strip_fields(record, &RECORD_PATH_FIELDS);
                self.strip_each(record.get_mut("alternates"), &["path"]);
                record
                    .get_mut("story")
                    .map_or(0, |story| self.rewrite(story, depth + 1))
            }
            LinkShape::Object(map) => map.values_mut().map(|v| self.rewrite(v, depth + 1)).sum(),
            LinkShape::Array(items) => items.iter_mut().map(|v| self.rewrite(v, depth + 1)).sum(),
            LinkShape::Scalar => 0,
        }
    }

    fn strip_in_place(&self, path: &mut String) {
        if let Some(stripped) = self.base.strip(path) {
            *path = stripped;
        }
    }

    fn strip_fields(&self, map: &mut Map<String, Value>, fields: &[&str]) {
        for field in fields {
            if let Some(Value::String(path)) = map.get_mut(*field) {
                self.strip_in_place(path);
            }
        }
    }

    fn strip_each(&self, list: Option<&mut Value>, fields: &[&str]) {
        let Some(Value::Array(entries)) = list else {
            return;
        };
        for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
            self.strip_fields(entry, fields);
        }
    }
}

/// Path portion of `path` with `identifier` (its suffix) replaced, keeping
/// any query string.
fn replace_identifier(path: &str, identifier: &str, replacement: &str) -> String {
    let (route, query) = match path.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (path, None),
    };
    let head = route.strip_suffix(identifier).unwrap_or(route);
    match query {
        Some(query) => format!("{head}{replacement}?{query}"),
        None => format!("{head}{replacement}"),
    }
}

impl RequestMiddleware for PathScope {
    fn name(&self) -> &'static str {
        "base_path"
    }

    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        match Endpoint::parse(request.route()) {
            endpoint if endpoint.is_scoped_collection() => {
                request.set_param_if_absent(STARTS_WITH_PARAM, self.base.as_str());
            }
            Endpoint::Story(identifier) => {
                if !request.has_param(FIND_BY_PARAM) && !self.base.contains(&identifier) {
                    let scoped = self.base.join(&identifier);
                    tracing::trace!(from = %identifier, to = %scoped, "scoping story lookup");
                    request.path = replace_identifier(&request.path, &identifier, &scoped);
                }
            }
            _ => {}
        }
        request
    }
}

impl ResponseMiddleware for PathScope {
    fn name(&self) -> &'static str {
        "base_path"
    }

    fn on_response(&self, _request: &ApiRequest, mut response: ApiResponse) -> ApiResponse {
        if self.rewrite_links {
            self.strip_body(&mut response.body);
        }
        response
    }
}
