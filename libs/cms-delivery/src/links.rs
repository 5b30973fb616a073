use crate::config::LinkResolution;
use crate::endpoint::Endpoint;
use crate::pool::EntityPool;
use crate::walk::{WalkLimit, walk_post};
use cms_http::{ApiRequest, ApiResponse, RequestMiddleware, ResponseMiddleware};
use serde_json::Value;

pub const RESOLVE_LINKS_PARAM: &str = "resolve_links";

/// Side channel carrying link targets on content endpoints.
pub const LINKS_KEY: &str = "links";

/// Property a resolved multilink gets its target under.
pub const LINK_STORY_KEY: &str = "story";

/// Attaches link targets to multilink fields.
///
/// Unlike relations nothing is ever removed: a multilink whose target is not
/// in the pool is left as it is.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    mode: LinkResolution,
    limit: WalkLimit,
}

impl LinkResolver {
    #[must_use]
    pub fn new(mode: LinkResolution, limit: WalkLimit) -> Self {
        Self { mode, limit }
    }

    pub fn resolve(&self, tree: &mut Value, pool: &EntityPool<'_>) -> usize {
        walk_post(tree, self.limit, "links", &mut |node: &mut Value| {
            let Some(map) = node.as_object_mut() else {
                return;
            };
            if map.get("fieldtype").and_then(Value::as_str) != Some("multilink") {
                return;
            }
            let target = map.get("id").and_then(Value::as_str).and_then(|id| pool.get(id));
            if let Some(entity) = target {
                map.insert(LINK_STORY_KEY.to_owned(), entity.clone());
            }
        })
    }

    /// Resolve the `story`/`stories` payload against the response's own
    /// `links`, which may be an array or a UUID-keyed map.
    pub fn resolve_body(&self, body: &mut Value) -> usize {
        let links = body.get_mut(LINKS_KEY).map(Value::take);
        let pool = EntityPool::from_side_channel(links.as_ref());

        let mut truncated = 0;
        for key in ["story", "stories"] {
            if let Some(tree) = body.get_mut(key) {
                truncated += self.resolve(tree, &pool);
            }
        }
        drop(pool);

        if let (Some(slot), Some(links)) = (body.get_mut(LINKS_KEY), links) {
            *slot = links;
        }
        truncated
    }
}

impl RequestMiddleware for LinkResolver {
    fn name(&self) -> &'static str {
        "links"
    }

    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        if Endpoint::parse(request.route()).is_content() {
            request.set_param_if_absent(RESOLVE_LINKS_PARAM, self.mode.as_param());
        }
        request
    }
}

impl ResponseMiddleware for LinkResolver {
    fn name(&self) -> &'static str {
        "links"
    }

    fn on_response(&self, request: &ApiRequest, mut response: ApiResponse) -> ApiResponse {
        if Endpoint::parse(request.route()).is_content() {
            self.resolve_body(&mut response.body);
        }
        response
    }
}
