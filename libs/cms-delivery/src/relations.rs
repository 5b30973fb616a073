//! Relation resolution
//!
//! Relation fields hold bare UUIDs (or arrays of them). The API returns the
//! referenced stories in the `rels` side channel when asked through the
//! `resolve_relations` parameter; this middleware swaps them into the tree.

use crate::endpoint::Endpoint;
use crate::error::DeliveryError;
use crate::pool::EntityPool;
use crate::walk::{WalkLimit, walk_post};
use cms_http::{ApiRequest, ApiResponse, RequestMiddleware, ResponseMiddleware};
use serde_json::Value;
use std::collections::HashMap;

pub const RESOLVE_RELATIONS_PARAM: &str = "resolve_relations";

/// Side channel carrying the referenced stories.
pub const RELS_KEY: &str = "rels";

/// Parsed `component.field` patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationPatterns {
    fields_by_component: HashMap<String, Vec<String>>,
    param: String,
}

impl RelationPatterns {
    /// # Errors
    /// Returns `DeliveryError::InvalidConfig` for an entry that is not a
    /// `component.field` pair.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DeliveryError> {
        let mut fields_by_component: HashMap<String, Vec<String>> = HashMap::new();
        let mut normalized = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            let (component, field) = pattern
                .split_once('.')
                .filter(|(c, f)| !c.is_empty() && !f.is_empty() && !f.contains('.'))
                .ok_or_else(|| {
                    DeliveryError::invalid_config(
                        "resolve_relations",
                        format!("`{pattern}` is not a component.field pattern"),
                    )
                })?;
            let fields = fields_by_component.entry(component.to_owned()).or_default();
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_owned());
            }
            if !normalized.contains(&pattern) {
                normalized.push(pattern);
            }
        }

        Ok(Self {
            fields_by_component,
            param: normalized.join(","),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields_by_component.is_empty()
    }

    /// Relation fields configured for `component`.
    #[must_use]
    pub fn fields_for(&self, component: &str) -> &[String] {
        self.fields_by_component
            .get(component)
            .map_or(&[], Vec::as_slice)
    }

    /// Comma-joined patterns as sent in `resolve_relations`.
    #[must_use]
    pub fn as_param(&self) -> &str {
        &self.param
    }
}

#[derive(Debug, Clone)]
pub struct RelationResolver {
    patterns: RelationPatterns,
    remove_unresolved: bool,
    limit: WalkLimit,
}

impl RelationResolver {
    #[must_use]
    pub fn new(patterns: RelationPatterns, remove_unresolved: bool, limit: WalkLimit) -> Self {
        Self {
            patterns,
            remove_unresolved,
            limit,
        }
    }

    /// Resolve every configured relation field in `tree` against `pool`.
    ///
    /// Substituted entities are not walked again. Returns the number of
    /// subtrees skipped because of the depth bound.
    pub fn resolve(&self, tree: &mut Value, pool: &EntityPool<'_>) -> usize {
        walk_post(tree, self.limit, "relations", &mut |node: &mut Value| {
            self.resolve_node(node, pool);
        })
    }

    fn resolve_node(&self, node: &mut Value, pool: &EntityPool<'_>) {
        let Some(map) = node.as_object_mut() else {
            return;
        };
        let Some(component) = map.get("component").and_then(Value::as_str) else {
            return;
        };
        for field in self.patterns.fields_for(component) {
            if let Some(value) = map.get_mut(field) {
                self.resolve_field(value, pool);
            }
        }
    }

    fn resolve_field(&self, value: &mut Value, pool: &EntityPool<'_>) {
        match value {
            Value::String(uuid) => match pool.get(uuid) {
                Some(entity) => *value = entity.clone(),
                None if self.remove_unresolved => *value = Value::Null,
                None => {}
            },
            Value::Array(items) => {
                let remove_unresolved = self.remove_unresolved;
                let resolved = std::mem::take(items)
                    .into_iter()
                    .filter_map(|item| {
                        let Some(uuid) = item.as_str() else {
                            return Some(item);
                        };
                        match pool.get(uuid) {
                            Some(entity) => Some(entity.clone()),
                            None if remove_unresolved => None,
                            None => Some(item),
                        }
                    })
                    .collect();
                *items = resolved;
            }
            _ => {}
        }
    }

    /// Resolve the `story`/`stories` payload of a response body against its
    /// own `rels`.
    pub fn resolve_body(&self, body: &mut Value) -> usize {
        let rels = body.get_mut(RELS_KEY).map(Value::take);
        let pool = EntityPool::from_side_channel(rels.as_ref());
        tracing::trace!(pooled = pool.len(), "resolving relations");

        let mut truncated = 0;
        for key in ["story", "stories"] {
            if let Some(tree) = body.get_mut(key) {
                truncated += self.resolve(tree, &pool);
            }
        }
        drop(pool);

        if let (Some(slot), Some(rels)) = (body.get_mut(RELS_KEY), rels) {
            *slot = rels;
        }
        truncated
    }
}

impl RequestMiddleware for RelationResolver {
    fn name(&self) -> &'static str {
        "relations"
    }

    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        if !self.patterns.is_empty() && Endpoint::parse(request.route()).is_content() {
            request.set_param_if_absent(RESOLVE_RELATIONS_PARAM, self.patterns.as_param());
        }
        request
    }
}

impl ResponseMiddleware for RelationResolver {
    fn name(&self) -> &'static str {
        "relations"
    }

    fn on_response(&self, request: &ApiRequest, mut response: ApiResponse) -> ApiResponse {
        if !self.patterns.is_empty() && Endpoint::parse(request.route()).is_content() {
            self.resolve_body(&mut response.body);
        }
        response
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(patterns: &[&str], remove_unresolved: bool) -> RelationResolver {
        RelationResolver::new(
            RelationPatterns::parse(patterns).unwrap(),
            remove_unresolved,
            WalkLimit::default(),
        )
    }

    fn rels() -> Value {
        json!([
            {"uuid": "a", "name": "Ann", "content": {"component": "author", "friend": "b"}},
            {"uuid": "t1", "name": "Rust"},
            {"uuid": "t2", "name": "Async"}
        ])
    }

    #[test]
    fn test_pattern_parsing() {
        let patterns =
            RelationPatterns::parse(&["post.author", " post.tags ", "post.author"]).unwrap();
        assert_eq!(patterns.fields_for("post"), ["author", "tags"]);
        assert!(patterns.fields_for("page").is_empty());
        assert_eq!(patterns.as_param(), "post.author,post.tags");

        for bad in ["post", ".author", "post.", "a.b.c"] {
            assert!(RelationPatterns::parse(&[bad]).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn test_scalar_relation_substituted() {
        let rels = rels();
        let pool = EntityPool::from_side_channel(Some(&rels));
        let mut tree = json!({"component": "post", "author": "a", "title": "Hello"});
        resolver(&["post.author"], false).resolve(&mut tree, &pool);
        assert_eq!(tree["author"], rels[0]);
        assert_eq!(tree["title"], "Hello");
    }

    #[test]
    fn test_only_configured_fields_change() {
        let rels = rels();
        let pool = EntityPool::from_side_channel(Some(&rels));
        let original = json!({
            "component": "page",
            "author": "a",
            "body": [
                {"component": "post", "author": "a", "editor": "a", "tags": ["t1"]},
                {"component": "quote", "author": "a"}
            ]
        });
        let mut tree = original.clone();
        resolver(&["post.author"], false).resolve(&mut tree, &pool);

        assert_eq!(tree["body"][0]["author"], rels[0]);
        let mut expected = original;
        expected["body"][0]["author"] = rels[0].clone();
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_nested_matches_resolved() {
        let rels = rels();
        let pool = EntityPool::from_side_channel(Some(&rels));
        let mut tree = json!({
            "component": "page",
            "sections": [{"component": "grid", "columns": [{"component": "post", "author": "a"}]}]
        });
        resolver(&["post.author"], false).resolve(&mut tree, &pool);
        assert_eq!(tree["sections"][0]["columns"][0]["author"]["name"], "Ann");
    }

    #[test]
    fn test_unresolved_kept_by_default() {
        let rels = json!([{"uuid": "t1"}]);
        let pool = EntityPool::from_side_channel(Some(&rels));
        let mut tree = json!({"component": "post", "author": "x", "tags": ["t1", "x"]});
        resolver(&["post.author", "post.tags"], false).resolve(&mut tree, &pool);
        assert_eq!(tree["author"], "x");
        assert_eq!(tree["tags"], json!([{"uuid": "t1"}, "x"]));
    }

    #[test]
    fn test_unresolved_removed_when_configured() {
        let rels = rels();
        let pool = EntityPool::from_side_channel(Some(&rels));
        let mut tree = json!({"component": "post", "author": "x", "tags": ["t1", "x", "t2"]});
        resolver(&["post.author", "post.tags"], true).resolve(&mut tree, &pool);
        assert!(tree["author"].is_null());
        assert_eq!(tree["tags"], json!([rels[1], rels[2]]));
    }

    #[test]
    fn test_substituted_entities_not_rewalked() {
        let rels = rels();
        let pool = EntityPool::from_side_channel(Some(&rels));
        let mut tree = json!({"component": "post", "author": "a"});
        resolver(&["post.author", "author.friend"], true).resolve(&mut tree, &pool);
        // the embedded author keeps its raw relation even though it matches a pattern
        assert_eq!(tree["author"]["content"]["friend"], "b");
    }

    #[test]
    fn test_outbound_param_only_on_content_endpoints() {
        let r = resolver(&["post.author", "post.tags"], false);
        let req = r.on_request(ApiRequest::get("cdn/stories"));
        assert_eq!(req.param(RESOLVE_RELATIONS_PARAM), Some("post.author,post.tags"));

        let req = r.on_request(
            ApiRequest::get("cdn/stories/home").with_param(RESOLVE_RELATIONS_PARAM, "x.y"),
        );
        assert_eq!(req.param(RESOLVE_RELATIONS_PARAM), Some("x.y"));

        let req = r.on_request(ApiRequest::get("cdn/tags"));
        assert!(req.params.is_empty());

        let req = r.on_request(ApiRequest::get("cdn/stories?resolve_relations=x.y"));
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_response_uses_own_rels_and_keeps_them() {
        let r = resolver(&["post.author"], false);
        let body = json!({
            "stories": [{"uuid": "s", "content": {"component": "post", "author": "a"}}],
            "rels": rels()
        });
        let resp = r.on_response(&ApiRequest::get("cdn/stories"), ApiResponse::ok(body));
        assert_eq!(resp.body["stories"][0]["content"]["author"]["name"], "Ann");
        assert_eq!(resp.body["rels"], rels());
    }
}
