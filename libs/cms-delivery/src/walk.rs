//! Depth-bounded traversal of JSON content trees
//!
//! Content trees come from the API and have no depth guarantee. Every walk
//! stops descending past [`WalkLimit`]; nodes below the bound are left
//! untouched and the walk reports how many subtrees it skipped.

use serde_json::Value;

/// Default nesting bound for content walks.
pub const DEFAULT_MAX_WALK_DEPTH: usize = 64;

/// Maximum nesting depth a walk descends to (the root is depth 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimit(usize);

impl WalkLimit {
    #[must_use]
    pub const fn new(max_depth: usize) -> Self {
        Self(max_depth)
    }

    #[must_use]
    pub const fn max_depth(self) -> usize {
        self.0
    }
}

impl Default for WalkLimit {
    fn default() -> Self {
        Self(DEFAULT_MAX_WALK_DEPTH)
    }
}

/// What a pre-order visitor wants done with the children of the node it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Descend,
    SkipChildren,
}

/// Pre-order walk: `visit` sees a node before its children and may prune them.
///
/// Returns the number of subtrees left untouched because of the depth bound.
pub fn walk_pre<F>(
    value: &mut Value,
    limit: WalkLimit,
    walker: &'static str,
    visit: &mut F,
) -> usize
where
    F: FnMut(&mut Value) -> Visit,
{
    let truncated = pre(value, 0, limit, visit);
    report_truncation(walker, limit, truncated);
    truncated
}

/// Post-order walk: `visit` sees a node after all of its children.
///
/// Values the visitor substitutes into a node are therefore never walked in
/// the same pass. Returns the number of truncated subtrees.
pub fn walk_post<F>(
    value: &mut Value,
    limit: WalkLimit,
    walker: &'static str,
    visit: &mut F,
) -> usize
where
    F: FnMut(&mut Value),
{
    let truncated = post(value, 0, limit, visit);
    report_truncation(walker, limit, truncated);
    truncated
}

fn pre<F>(value: &mut Value, depth: usize, limit: WalkLimit, visit: &mut F) -> usize
where
    F: FnMut(&mut Value) -> Visit,
{
    if depth > limit.0 {
        return 1;
    }
    if visit(value) == Visit::SkipChildren {
        return 0;
    }
    match value {
        Value::Object(map) => map.values_mut().map(|v| pre(v, depth + 1, limit, visit)).sum(),
        Value::Array(items) => items.iter_mut().map(|v| pre(v, depth + 1, limit, visit)).sum(),
        _ => 0,
    }
}

fn post<F>(value: &mut Value, depth: usize, limit: WalkLimit, visit: &mut F) -> usize
where
    F: FnMut(&mut Value),
{
    if depth > limit.0 {
        return 1;
    }
    let truncated = match value {
        Value::Object(map) => map.values_mut().map(|v| post(v, depth + 1, limit, visit)).sum(),
        Value::Array(items) => items.iter_mut().map(|v| post(v, depth + 1, limit, visit)).sum(),
        _ => 0,
    };
    visit(value);
    truncated
}

pub(crate) fn report_truncation(walker: &'static str, limit: WalkLimit, truncated: usize) {
    if truncated > 0 {
        tracing::warn!(
            walker,
            max_depth = limit.0,
            truncated,
            "content nested deeper than walk limit; deeper subtrees left untouched"
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(depth: usize) -> Value {
        (0..depth).fold(Value::String("leaf".to_owned()), |inner, _| {
            let mut map = serde_json::Map::new();
            map.insert("child".to_owned(), inner);
            Value::Object(map)
        })
    }

    fn upper(value: &mut Value) {
        if let Value::String(s) = value {
            *s = s.to_uppercase();
        }
    }

    #[test]
    fn test_post_visits_children_first() {
        let mut order = Vec::new();
        let mut tree = json!({"a": {"b": 1}});
        walk_post(&mut tree, WalkLimit::default(), "test", &mut |v: &mut Value| {
            order.push(v.to_string());
        });
        assert_eq!(order, vec!["1", r#"{"b":1}"#, r#"{"a":{"b":1}}"#]);
    }

    #[test]
    fn test_pre_skip_children_prunes() {
        let mut tree = json!({"keep": {"inner": "x"}, "other": "y"});
        walk_pre(&mut tree, WalkLimit::default(), "test", &mut |v: &mut Value| {
            if v.get("inner").is_some() {
                return Visit::SkipChildren;
            }
            upper(v);
            Visit::Descend
        });
        assert_eq!(tree, json!({"keep": {"inner": "x"}, "other": "Y"}));
    }

    #[test]
    fn test_depth_bound_truncates_instead_of_failing() {
        let mut tree = nested(10);
        let truncated = walk_post(&mut tree, WalkLimit::new(4), "test", &mut upper);
        assert_eq!(truncated, 1);
        // the leaf sits at depth 10, well below the bound, so it is untouched
        let leaf = tree.pointer("/child/child/child/child/child/child/child/child/child/child");
        assert_eq!(leaf, Some(&json!("leaf")));
    }

    #[test]
    fn test_within_bound_reaches_leaf() {
        let mut tree = nested(3);
        let truncated = walk_pre(&mut tree, WalkLimit::new(3), "test", &mut |v: &mut Value| {
            upper(v);
            Visit::Descend
        });
        assert_eq!(truncated, 0);
        assert_eq!(tree, json!({"child": {"child": {"child": "LEAF"}}}));
    }

    #[test]
    fn test_very_deep_tree_does_not_overflow() {
        let mut tree = nested(10_000);
        let truncated = walk_post(&mut tree, WalkLimit::default(), "test", &mut upper);
        assert_eq!(truncated, 1);
        // serde_json drops deep trees recursively; flatten before drop
        let mut cursor = tree;
        while let Some(next) = cursor.get_mut("child").map(Value::take) {
            cursor = next;
        }
    }
}
