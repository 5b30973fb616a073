use crate::assets::AssetDomain;
use crate::config::DeliveryConfig;
use crate::endpoint::Endpoint;
use crate::error::DeliveryError;
use crate::links::LinkResolver;
use crate::pager::{Page, Paginator};
use crate::path::PathScope;
use crate::relations::{RelationPatterns, RelationResolver};
use crate::walk::WalkLimit;
use cms_http::{
    ApiClient, ApiClientBuilder, ApiResponse, AuthMiddleware, ExposeSecret, Params, Pipeline,
    SecretString, TransportConfig,
};
use serde_json::Value;
use std::sync::Arc;

pub const PAGE_PARAM: &str = "page";
pub const PER_PAGE_PARAM: &str = "per_page";

/// Content delivery client.
///
/// Wraps an [`ApiClient`] whose pipeline is assembled from a
/// [`DeliveryConfig`]:
///
/// - outbound: auth, base path, relation and link parameters
/// - inbound: relation and link resolution, asset domain, base path stripping
#[derive(Clone)]
pub struct DeliveryClient {
    api: ApiClient,
    paginator: Paginator,
}

impl DeliveryClient {
    /// Validate `config` and build a client talking to `config.base_url`.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns `DeliveryError::InvalidConfig` for an invalid configuration
    /// and `DeliveryError::Http` when the transport cannot be set up.
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        Self::with_transport(config, Self::transport_config(config))
    }

    /// Like [`DeliveryClient::new`] with explicit transport settings; the
    /// pipeline still comes from `config`.
    ///
    /// # Errors
    /// See [`DeliveryClient::new`].
    pub fn with_transport(
        config: &DeliveryConfig,
        transport: TransportConfig,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;
        let api = ApiClientBuilder::with_config(transport)
            .pipeline(Self::pipeline(config)?)
            .build()?;
        Ok(Self::from_api_client(api))
    }

    /// Use an already built client as is.
    #[must_use]
    pub fn from_api_client(api: ApiClient) -> Self {
        Self {
            api,
            paginator: Paginator::new(),
        }
    }

    /// Paging policy for [`DeliveryClient::get_all`].
    #[must_use]
    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = paginator;
        self
    }

    /// Transport settings derived from `config`.
    #[must_use]
    pub fn transport_config(config: &DeliveryConfig) -> TransportConfig {
        let mut transport = TransportConfig {
            base_url: config.base_url.clone(),
            request_timeout: config.timeout(),
            retry: Some(config.retry_config()),
            ..TransportConfig::default()
        };
        if let Some(user_agent) = &config.user_agent {
            transport.user_agent.clone_from(user_agent);
        }
        transport
    }

    /// Middleware pipeline for `config`, in execution order.
    ///
    /// # Errors
    /// Returns `DeliveryError::InvalidConfig` for a malformed base path or
    /// relation pattern.
    pub fn pipeline(config: &DeliveryConfig) -> Result<Pipeline, DeliveryError> {
        let limit = WalkLimit::new(config.max_walk_depth);
        let token = SecretString::from(config.access_token.expose_secret().to_owned());
        let mut pipeline = Pipeline::new();

        pipeline.push_request(Arc::new(AuthMiddleware::query(token)));

        let scope = config
            .base_path()?
            .map(|base| Arc::new(PathScope::new(base, config.rewrite_links, limit)));
        if let Some(scope) = &scope {
            pipeline.push_request(scope.clone());
        }

        let patterns = RelationPatterns::parse(&config.resolve_relations)?;
        if !patterns.is_empty() {
            let relations = Arc::new(RelationResolver::new(
                patterns,
                config.remove_unresolved_relations,
                limit,
            ));
            pipeline.push_request(relations.clone());
            pipeline.push_response(relations);
        }

        if let Some(mode) = config.resolve_links {
            let links = Arc::new(LinkResolver::new(mode, limit));
            pipeline.push_request(links.clone());
            pipeline.push_response(links);
        }

        if let Some(domain) = &config.asset_domain {
            pipeline.push_response(Arc::new(AssetDomain::new(
                domain,
                config.allowed_space_ids.iter().cloned(),
                limit,
            )));
        }

        if let Some(scope) = scope
            && config.rewrite_links
        {
            pipeline.push_response(scope);
        }

        Ok(pipeline)
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Send a GET through the full pipeline.
    ///
    /// # Errors
    /// Returns `DeliveryError::Http` for transport failures, rate limits that
    /// outlasted the retry policy and non-2xx statuses.
    pub async fn get(&self, path: &str, params: Params) -> Result<ApiResponse, DeliveryError> {
        Ok(self.api.get(path, params).await?)
    }

    /// Single story by slug, full slug or (with `find_by=uuid`) UUID.
    ///
    /// # Errors
    /// See [`DeliveryClient::get`]; `DeliveryError::UnexpectedPayload` when the
    /// body has no `story`.
    pub async fn get_story(
        &self,
        identifier: &str,
        params: Params,
    ) -> Result<Value, DeliveryError> {
        let endpoint = Endpoint::Story(identifier.trim_start_matches('/').to_owned());
        let mut response = self.get(&endpoint.route(), params).await?;
        match response.body.get_mut("story").map(Value::take) {
            Some(story) if story.is_object() => Ok(story),
            _ => Err(unexpected(&endpoint, "missing `story` object")),
        }
    }

    /// # Errors
    /// See [`DeliveryClient::get_collection`].
    pub async fn get_stories(&self, params: Params) -> Result<Page<Value>, DeliveryError> {
        self.get_collection(&Endpoint::Stories, params).await
    }

    /// Links collection; the UUID-keyed map is flattened in document order.
    ///
    /// # Errors
    /// See [`DeliveryClient::get_collection`].
    pub async fn get_links(&self, params: Params) -> Result<Page<Value>, DeliveryError> {
        self.get_collection(&Endpoint::Links, params).await
    }

    /// # Errors
    /// See [`DeliveryClient::get_collection`].
    pub async fn get_tags(&self, params: Params) -> Result<Page<Value>, DeliveryError> {
        self.get_collection(&Endpoint::Tags, params).await
    }

    /// # Errors
    /// See [`DeliveryClient::get_collection`].
    pub async fn get_datasource_entries(
        &self,
        params: Params,
    ) -> Result<Page<Value>, DeliveryError> {
        self.get_collection(&Endpoint::DatasourceEntries, params).await
    }

    /// One request against a collection endpoint; `params` may carry `page`
    /// and `per_page`.
    ///
    /// # Errors
    /// See [`DeliveryClient::get`]; `DeliveryError::UnexpectedPayload` when
    /// `endpoint` is not a collection or the items are missing.
    pub async fn get_collection(
        &self,
        endpoint: &Endpoint,
        params: Params,
    ) -> Result<Page<Value>, DeliveryError> {
        let key = endpoint
            .items_key()
            .ok_or_else(|| unexpected(endpoint, "not a collection endpoint"))?;
        let mut response = self.get(&endpoint.route(), params).await?;
        let total = response.total();
        let items = match response.body.get_mut(key).map(Value::take) {
            Some(Value::Array(items)) => items,
            Some(Value::Object(map)) => map.into_iter().map(|(_, item)| item).collect(),
            _ => return Err(unexpected(endpoint, format!("missing `{key}` collection"))),
        };
        Ok(Page::new(items, total))
    }

    /// Every item of a collection, fetched page by page.
    ///
    /// `page` and `per_page` in `params` are overridden by the paginator.
    ///
    /// # Errors
    /// Returns `DeliveryError::Page` wrapping the first failed page.
    pub async fn get_all(
        &self,
        endpoint: &Endpoint,
        params: &Params,
    ) -> Result<Vec<Value>, DeliveryError> {
        if endpoint.items_key().is_none() {
            return Err(unexpected(endpoint, "not a collection endpoint"));
        }

        let items = self
            .paginator
            .collect_all(endpoint, |page, per_page| {
                let mut params = params.clone();
                params.insert(PAGE_PARAM.to_owned(), page.to_string());
                params.insert(PER_PAGE_PARAM.to_owned(), per_page.to_string());
                async move {
                    self.get_collection(endpoint, params)
                        .await
                        .map_err(|source| DeliveryError::Page {
                            page,
                            source: Box::new(source),
                        })
                }
            })
            .await?;

        tracing::debug!(endpoint = %endpoint.route(), items = items.len(), "collection fetched");
        Ok(items)
    }
}

fn unexpected(endpoint: &Endpoint, reason: impl Into<String>) -> DeliveryError {
    DeliveryError::UnexpectedPayload {
        endpoint: endpoint.route(),
        reason: reason.into(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::LinkResolution;

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            base_path: Some("blog/".to_owned()),
            rewrite_links: true,
            asset_domain: Some("https://cdn.example.com".to_owned()),
            resolve_relations: vec!["post.author".to_owned()],
            resolve_links: Some(LinkResolution::Story),
            ..DeliveryConfig::with_token("pub")
        }
    }

    #[test]
    fn test_pipeline_order() {
        let pipeline = DeliveryClient::pipeline(&config()).unwrap();
        let (outbound, inbound) = pipeline.describe();
        assert_eq!(outbound, ["auth", "base_path", "relations", "links"]);
        assert_eq!(inbound, ["relations", "links", "asset_domain", "base_path"]);
    }

    #[test]
    fn test_minimal_pipeline_is_auth_only() {
        let pipeline = DeliveryClient::pipeline(&DeliveryConfig::with_token("pub")).unwrap();
        let (outbound, inbound) = pipeline.describe();
        assert_eq!(outbound, ["auth"]);
        assert!(inbound.is_empty());
    }

    #[test]
    fn test_base_path_without_rewrite_only_scopes_requests() {
        let cfg = DeliveryConfig {
            rewrite_links: false,
            ..config()
        };
        let (_, inbound) = DeliveryClient::pipeline(&cfg).unwrap().describe();
        assert!(!inbound.contains(&"base_path"));
    }

    #[test]
    fn test_transport_config_follows_delivery_config() {
        let cfg = DeliveryConfig {
            timeout_secs: 5,
            user_agent: Some("site-builder/1.0".to_owned()),
            ..config()
        };
        let transport = DeliveryClient::transport_config(&cfg);
        assert_eq!(transport.request_timeout, std::time::Duration::from_secs(5));
        assert_eq!(transport.user_agent, "site-builder/1.0");
        assert_eq!(transport.retry, Some(cfg.retry_config()));
        assert_eq!(transport.base_url, cfg.base_url);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_transport() {
        let cfg = DeliveryConfig::with_token("");
        let err = DeliveryClient::new(&cfg).err().unwrap();
        assert!(matches!(err, DeliveryError::InvalidConfig { field: "access_token", .. }));
    }
}
