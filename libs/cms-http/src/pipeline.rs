//! Ordered request/response transform chain
//!
//! Middleware are plain synchronous transforms: outbound ones map an
//! [`ApiRequest`] to the request actually sent, inbound ones map the decoded
//! [`ApiResponse`] to what the caller receives. The [`Pipeline`] keeps both
//! lists explicitly and runs each in registration order, so the ordering is
//! data that can be inspected and tested rather than a side effect of setup.
//!
//! Anything asynchronous (retries, timeouts) lives below the pipeline as a
//! tower layer on the transport service.

use crate::request::ApiRequest;
use crate::response::ApiResponse;
use std::fmt;
use std::sync::Arc;

/// Outbound transform applied before the request is sent.
pub trait RequestMiddleware: Send + Sync {
    /// Short identifier used in logs and [`Pipeline::describe`].
    fn name(&self) -> &'static str;

    /// Map the request to the request that will be sent.
    fn on_request(&self, request: ApiRequest) -> ApiRequest;
}

/// Inbound transform applied to a successful, decoded response.
pub trait ResponseMiddleware: Send + Sync {
    /// Short identifier used in logs and [`Pipeline::describe`].
    fn name(&self) -> &'static str;

    /// Map the response. `request` is the request as it was sent, after every
    /// outbound transform ran.
    fn on_response(&self, request: &ApiRequest, response: ApiResponse) -> ApiResponse;
}

/// Ordered outbound and inbound middleware lists.
#[derive(Clone, Default)]
pub struct Pipeline {
    outbound: Vec<Arc<dyn RequestMiddleware>>,
    inbound: Vec<Arc<dyn ResponseMiddleware>>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outbound transform; it runs after every one registered before it.
    pub fn push_request(&mut self, middleware: Arc<dyn RequestMiddleware>) {
        self.outbound.push(middleware);
    }

    /// Append an inbound transform; it runs after every one registered before it.
    pub fn push_response(&mut self, middleware: Arc<dyn ResponseMiddleware>) {
        self.inbound.push(middleware);
    }

    /// Builder-style [`push_request`](Self::push_request).
    #[must_use]
    pub fn with_request(mut self, middleware: Arc<dyn RequestMiddleware>) -> Self {
        self.push_request(middleware);
        self
    }

    /// Builder-style [`push_response`](Self::push_response).
    #[must_use]
    pub fn with_response(mut self, middleware: Arc<dyn ResponseMiddleware>) -> Self {
        self.push_response(middleware);
        self
    }

    /// Run every outbound transform in registration order.
    #[must_use]
    pub fn apply_request(&self, request: ApiRequest) -> ApiRequest {
        self.outbound.iter().fold(request, |req, mw| {
            tracing::trace!(middleware = mw.name(), path = %req.path, "outbound transform");
            mw.on_request(req)
        })
    }

    /// Run every inbound transform in registration order.
    #[must_use]
    pub fn apply_response(&self, request: &ApiRequest, response: ApiResponse) -> ApiResponse {
        self.inbound.iter().fold(response, |resp, mw| {
            tracing::trace!(middleware = mw.name(), path = %request.path, "inbound transform");
            mw.on_response(request, resp)
        })
    }

    /// Names of the registered middleware, `(outbound, inbound)`, in execution order.
    #[must_use]
    pub fn describe(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        (
            self.outbound.iter().map(|m| m.name()).collect(),
            self.inbound.iter().map(|m| m.name()).collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.inbound.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (outbound, inbound) = self.describe();
        f.debug_struct("Pipeline")
            .field("outbound", &outbound)
            .field("inbound", &inbound)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    struct AppendParam(&'static str);

    impl RequestMiddleware for AppendParam {
        fn name(&self) -> &'static str {
            self.0
        }

        fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
            let trail = request.param("trail").unwrap_or_default().to_owned();
            request.params.insert("trail".into(), format!("{trail}{}", self.0));
            request
        }
    }

    struct AppendBody(&'static str);

    impl ResponseMiddleware for AppendBody {
        fn name(&self) -> &'static str {
            self.0
        }

        fn on_response(&self, _request: &ApiRequest, mut response: ApiResponse) -> ApiResponse {
            if let Some(items) = response.body.as_array_mut() {
                items.push(json!(self.0));
            }
            response
        }
    }

    #[test]
    fn test_outbound_runs_in_registration_order() {
        let pipeline = Pipeline::new()
            .with_request(Arc::new(AppendParam("a")))
            .with_request(Arc::new(AppendParam("b")))
            .with_request(Arc::new(AppendParam("c")));

        let req = pipeline.apply_request(ApiRequest::get("cdn/stories"));
        assert_eq!(req.param("trail"), Some("abc"));
    }

    #[test]
    fn test_inbound_runs_in_registration_order() {
        let pipeline = Pipeline::new()
            .with_response(Arc::new(AppendBody("resolve")))
            .with_response(Arc::new(AppendBody("assets")))
            .with_response(Arc::new(AppendBody("paths")));

        let req = ApiRequest::get("cdn/stories");
        let resp = pipeline.apply_response(&req, ApiResponse::ok(json!([])));
        assert_eq!(resp.body, json!(["resolve", "assets", "paths"]));
    }

    #[test]
    fn test_describe_lists_names() {
        let pipeline = Pipeline::new()
            .with_request(Arc::new(AppendParam("auth")))
            .with_response(Arc::new(AppendBody("paths")));
        assert_eq!(pipeline.describe(), (vec!["auth"], vec!["paths"]));
        assert!(!pipeline.is_empty());
        assert!(Pipeline::new().is_empty());
    }
}
