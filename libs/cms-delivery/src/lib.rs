#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Content delivery client for a headless CMS
//!
//! Builds the middleware pipeline that [`cms_http::ApiClient`] runs around
//! every request:
//!
//! - [`PathScope`] confines lookups to a base folder and strips it from
//!   returned slugs and links
//! - [`RelationResolver`] swaps relation UUIDs for the stories in `rels`
//! - [`LinkResolver`] attaches `links` targets to multilink fields
//! - [`AssetDomain`] moves asset URLs onto a custom domain
//!
//! and pages through collections with [`Paginator`].
//!
//! # Example
//!
//! ```ignore
//! use cms_delivery::{DeliveryClient, DeliveryConfig, Endpoint};
//!
//! let config = DeliveryConfig::load(Some("cms.yaml".as_ref()))?;
//! let client = DeliveryClient::new(&config)?;
//!
//! let home = client.get_story("home", Default::default()).await?;
//! let posts = client.get_all(&Endpoint::Stories, &Default::default()).await?;
//! ```

pub mod assets;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod links;
pub mod pager;
pub mod path;
pub mod pool;
pub mod relations;
pub mod walk;

pub use assets::{AssetDomain, AssetUrl};
pub use client::DeliveryClient;
pub use config::{DeliveryConfig, LinkResolution, RetrySettings};
pub use endpoint::Endpoint;
pub use error::DeliveryError;
pub use links::LinkResolver;
pub use pager::{Page, PageProgress, Paginator};
pub use path::{BasePath, PathScope};
pub use pool::EntityPool;
pub use relations::{RelationPatterns, RelationResolver};
pub use walk::WalkLimit;

pub use cms_http::Params;
