/// Content delivery endpoint a request targets, derived from its route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `cdn/stories`
    Stories,
    /// `cdn/stories/{identifier}`; the identifier may be empty (root item)
    Story(String),
    /// `cdn/links`
    Links,
    /// `cdn/tags`
    Tags,
    /// `cdn/datasource_entries`
    DatasourceEntries,
    Other,
}

/// Default and maximum page size for most collections.
pub const STANDARD_PAGE_LIMIT: u32 = 100;

/// Maximum page size for the links collection.
pub const LINKS_PAGE_LIMIT: u32 = 1000;

impl Endpoint {
    /// Classify a route such as `cdn/stories/blog/post` (no query string).
    #[must_use]
    pub fn parse(route: &str) -> Self {
        let route = route.trim_start_matches('/');
        let route = route.strip_prefix("cdn/").unwrap_or(route);

        if let Some(identifier) = route.strip_prefix("stories/") {
            return Self::Story(identifier.to_owned());
        }
        match route.trim_end_matches('/') {
            "stories" => Self::Stories,
            "links" => Self::Links,
            "tags" => Self::Tags,
            "datasource_entries" => Self::DatasourceEntries,
            _ => Self::Other,
        }
    }

    /// Endpoints returning story content (and `rels`/`links` side channels).
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Stories | Self::Story(_))
    }

    /// Collections that accept a `starts_with` folder scope.
    #[must_use]
    pub fn is_scoped_collection(&self) -> bool {
        matches!(self, Self::Stories | Self::Links)
    }

    /// Largest `per_page` the endpoint accepts.
    #[must_use]
    pub fn page_limit(&self) -> u32 {
        match self {
            Self::Links => LINKS_PAGE_LIMIT,
            _ => STANDARD_PAGE_LIMIT,
        }
    }

    /// Envelope key holding the collection items.
    #[must_use]
    pub fn items_key(&self) -> Option<&'static str> {
        match self {
            Self::Stories => Some("stories"),
            Self::Links => Some("links"),
            Self::Tags => Some("tags"),
            Self::DatasourceEntries => Some("datasource_entries"),
            Self::Story(_) | Self::Other => None,
        }
    }

    /// Route for this endpoint, relative to the API root.
    #[must_use]
    pub fn route(&self) -> String {
        match self {
            Self::Stories => "cdn/stories".to_owned(),
            Self::Story(identifier) => format!("cdn/stories/{identifier}"),
            Self::Links => "cdn/links".to_owned(),
            Self::Tags => "cdn/tags".to_owned(),
            Self::DatasourceEntries => "cdn/datasource_entries".to_owned(),
            Self::Other => String::new(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Endpoint::parse("cdn/stories"), Endpoint::Stories);
        assert_eq!(Endpoint::parse("/cdn/stories/"), Endpoint::Story(String::new()));
        assert_eq!(
            Endpoint::parse("cdn/stories/blog/my-post"),
            Endpoint::Story("blog/my-post".into())
        );
        assert_eq!(Endpoint::parse("cdn/links/"), Endpoint::Links);
        assert_eq!(Endpoint::parse("cdn/tags"), Endpoint::Tags);
        assert_eq!(Endpoint::parse("cdn/datasource_entries"), Endpoint::DatasourceEntries);
        assert_eq!(Endpoint::parse("cdn/spaces/me"), Endpoint::Other);
    }

    #[test]
    fn test_page_limits() {
        assert_eq!(Endpoint::Links.page_limit(), 1000);
        assert_eq!(Endpoint::Stories.page_limit(), 100);
        assert_eq!(Endpoint::Tags.page_limit(), 100);
    }

    #[test]
    fn test_route_round_trips_through_parse() {
        for endpoint in [
            Endpoint::Stories,
            Endpoint::Story("home".into()),
            Endpoint::Links,
            Endpoint::Tags,
            Endpoint::DatasourceEntries,
        ] {
            assert_eq!(Endpoint::parse(&endpoint.route()), endpoint);
        }
    }

    #[test]
    fn test_classification() {
        assert!(Endpoint::Story("x".into()).is_content());
        assert!(!Endpoint::Links.is_content());
        assert!(Endpoint::Links.is_scoped_collection());
        assert!(!Endpoint::Tags.is_scoped_collection());
        assert_eq!(Endpoint::Story("x".into()).items_key(), None);
    }
}
