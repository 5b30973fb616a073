//! Page-number pagination with a Stream API
//!
//! Collections are fetched page by page (`page` starts at 1) until one of
//! the stop conditions holds:
//!
//! - a page comes back with fewer than `per_page` items
//! - the accumulated item count reached the total hint of the first page
//! - `max_pages` pages were fetched
//!
//! ```rust,ignore
//! let items = Paginator::new()
//!     .max_pages(10)
//!     .on_progress(|p| tracing::info!(page = p.page, fetched = p.fetched, "page"))
//!     .collect_all(&Endpoint::Stories, |page, per_page| client.stories_page(page, per_page))
//!     .await?;
//! ```

use crate::endpoint::{Endpoint, STANDARD_PAGE_LIMIT};
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// One page of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total item count announced by the server, if any
    pub total: Option<u64>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total: Option<u64>) -> Self {
        Self { items, total }
    }
}

/// Reported after every fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub page: u32,
    pub fetched: u64,
    pub total_hint: Option<u64>,
}

type ProgressFn = Arc<dyn Fn(PageProgress) + Send + Sync>;

#[derive(Clone)]
pub struct Paginator {
    page_size: u32,
    max_pages: u32,
    progress: Option<ProgressFn>,
}

impl fmt::Debug for Paginator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            page_size: STANDARD_PAGE_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
            progress: None,
        }
    }
}

impl Paginator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested page size; clamped per endpoint by [`Paginator::per_page`].
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Upper bound on fetched pages. At least one page is always fetched.
    #[must_use]
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    #[must_use]
    pub fn on_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(PageProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Effective `per_page` for `endpoint`.
    #[must_use]
    pub fn per_page(&self, endpoint: &Endpoint) -> u32 {
        self.page_size.clamp(1, endpoint.page_limit())
    }

    /// Stream of pages; `fetch` gets `(page, per_page)`.
    ///
    /// The stream ends after the first error.
    #[must_use]
    pub fn pages<T, E, F, Fut>(&self, endpoint: &Endpoint, fetch: F) -> Pages<T, E, F, Fut>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
    {
        Pages {
            per_page: self.per_page(endpoint),
            max_pages: self.max_pages,
            progress: self.progress.clone(),
            next_page: 1,
            fetched: 0,
            total_hint: None,
            done: false,
            fetch,
            current_fetch: None,
        }
    }

    /// Fetch every page and return the items in fetch order.
    ///
    /// # Errors
    /// Returns the first error `fetch` produced.
    pub async fn collect_all<T, E, F, Fut>(
        &self,
        endpoint: &Endpoint,
        fetch: F,
    ) -> Result<Vec<T>, E>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
    {
        let mut pages = std::pin::pin!(self.pages(endpoint, fetch));
        let mut items = Vec::new();
        while let Some(page) = std::future::poll_fn(|cx| pages.as_mut().poll_next(cx)).await {
            items.extend(page?.items);
        }
        Ok(items)
    }
}

pin_project! {
    /// Stream returned by [`Paginator::pages`].
    pub struct Pages<T, E, F, Fut>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
    {
        per_page: u32,
        max_pages: u32,
        progress: Option<ProgressFn>,
        next_page: u32,
        fetched: u64,
        total_hint: Option<u64>,
        done: bool,
        fetch: F,
        #[pin]
        current_fetch: Option<Fut>,
    }
}

impl<T, E, F, Fut> Stream for Pages<T, E, F, Fut>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    type Item = Result<Page<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            if let Some(fut) = this.current_fetch.as_mut().as_pin_mut() {
                match fut.poll(cx) {
                    Poll::Ready(Ok(page)) => {
                        this.current_fetch.set(None);
                        let number = *this.next_page;
                        let len = page.items.len();

                        *this.fetched += len as u64;
                        if number == 1 {
                            *this.total_hint = page.total;
                        }
                        if let Some(progress) = this.progress.as_ref() {
                            progress(PageProgress {
                                page: number,
                                fetched: *this.fetched,
                                total_hint: *this.total_hint,
                            });
                        }
                        tracing::debug!(
                            page = number,
                            items = len,
                            fetched = *this.fetched,
                            total_hint = ?*this.total_hint,
                            "fetched page"
                        );

                        let full = len == *this.per_page as usize;
                        let below_hint = this.total_hint.is_none_or(|hint| *this.fetched < hint);
                        if !full || !below_hint || number >= *this.max_pages {
                            *this.done = true;
                        }
                        *this.next_page = number.saturating_add(1);

                        return Poll::Ready(Some(Ok(page)));
                    }
                    Poll::Ready(Err(e)) => {
                        this.current_fetch.set(None);
                        *this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let fut = (this.fetch)(*this.next_page, *this.per_page);
            this.current_fetch.set(Some(fut));
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct FakeError(String);

    /// Serves `total` numbered items, optionally announcing `hint`.
    #[derive(Clone)]
    struct FakeCollection {
        total: u32,
        hint: Option<u64>,
        calls: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FakeCollection {
        fn new(total: u32, hint: Option<u64>) -> Self {
            Self {
                total,
                hint,
                calls: Arc::default(),
            }
        }

        fn fetch(&self, page: u32, per_page: u32) -> Result<Page<u32>, FakeError> {
            self.calls.lock().unwrap().push((page, per_page));
            let start = (page - 1) * per_page;
            let end = (start + per_page).min(self.total);
            Ok(Page::new((start..end).collect(), self.hint))
        }

        fn calls(&self) -> Vec<(u32, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_partial_last_page_stops() {
        let source = FakeCollection::new(150, None);
        let items = Paginator::new()
            .collect_all(&Endpoint::Stories, |page, per_page| {
                let source = source.clone();
                async move { source.fetch(page, per_page) }
            })
            .await
            .unwrap();

        assert_eq!(source.calls(), [(1, 100), (2, 100)]);
        assert_eq!(items, (0..150).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_max_pages_bounds_fetches() {
        let source = FakeCollection::new(10_000, None);
        let items = Paginator::new()
            .max_pages(2)
            .collect_all(&Endpoint::Stories, |page, per_page| {
                let source = source.clone();
                async move { source.fetch(page, per_page) }
            })
            .await
            .unwrap();

        assert_eq!(source.calls().len(), 2);
        assert_eq!(items.len(), 200);
    }

    #[tokio::test]
    async fn test_total_hint_stops_on_full_page() {
        // exactly two full pages: without the hint a third, empty page would be requested
        let source = FakeCollection::new(200, Some(200));
        let items = Paginator::new()
            .collect_all(&Endpoint::Stories, |page, per_page| {
                let source = source.clone();
                async move { source.fetch(page, per_page) }
            })
            .await
            .unwrap();

        assert_eq!(source.calls(), [(1, 100), (2, 100)]);
        assert_eq!(items.len(), 200);
    }

    #[tokio::test]
    async fn test_without_hint_full_last_page_needs_empty_page() {
        let source = FakeCollection::new(200, None);
        Paginator::new()
            .collect_all(&Endpoint::Stories, |page, per_page| {
                let source = source.clone();
                async move { source.fetch(page, per_page) }
            })
            .await
            .unwrap();

        assert_eq!(source.calls(), [(1, 100), (2, 100), (3, 100)]);
    }

    #[test]
    fn test_page_size_clamped_per_endpoint() {
        let pager = Paginator::new().page_size(5000);
        assert_eq!(pager.per_page(&Endpoint::Stories), 100);
        assert_eq!(pager.per_page(&Endpoint::Links), 1000);
        assert_eq!(Paginator::new().page_size(0).per_page(&Endpoint::Tags), 1);
        assert_eq!(Paginator::new().per_page(&Endpoint::Links), 100);
    }

    #[tokio::test]
    async fn test_progress_reported_per_page() {
        let source = FakeCollection::new(2500, Some(2500));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        Paginator::new()
            .page_size(1000)
            .on_progress(move |p| sink.lock().unwrap().push(p))
            .collect_all(&Endpoint::Links, |page, per_page| {
                let source = source.clone();
                async move { source.fetch(page, per_page) }
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        let fetched: Vec<_> = seen.iter().map(|p| (p.page, p.fetched)).collect();
        assert_eq!(fetched, [(1, 1000), (2, 2000), (3, 2500)]);
        assert!(seen.iter().all(|p| p.total_hint == Some(2500)));
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let pages: Vec<_> = Paginator::new()
            .pages(&Endpoint::Stories, move |page, per_page| {
                *counter.lock().unwrap() += 1;
                async move {
                    if page == 2 {
                        Err(FakeError("boom".to_owned()))
                    } else {
                        Ok(Page::new(vec![0u8; per_page as usize], None))
                    }
                }
            })
            .collect()
            .await;

        assert_eq!(pages.len(), 2);
        assert!(pages[0].is_ok());
        assert_eq!(pages[1], Err(FakeError("boom".to_owned())));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let source = FakeCollection::new(0, Some(0));
        let items = Paginator::new()
            .collect_all(&Endpoint::Tags, |page, per_page| {
                let source = source.clone();
                async move { source.fetch(page, per_page) }
            })
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(source.calls().len(), 1);
    }
}
