// Page-set resolution: first page plus every discoverable pagination page.
use crate::model::{FetchError, Page};
use crate::parser::SiteAdapter;
use crate::scraper::traits::Fetcher;
use crate::utils::jittered;

use scraper::Html;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

pub struct PageResolver {
    delay: Duration,
    jitter: f64,
}

impl PageResolver {
    pub fn new(delay: Duration, jitter: f64) -> Self {
        Self { delay, jitter }
    }

    /// Fetches `start_url` and every secondary page the adapter finds on it.
    ///
    /// The start page failing is an error. A secondary page failing is logged
    /// and skipped, unless the adapter declares pagination mandatory.
    pub async fn resolve(
        &self,
        fetcher: &dyn Fetcher,
        adapter: &dyn SiteAdapter,
        start_url: &str,
    ) -> Result<Vec<Page>, FetchError> {
        let start = Url::parse(start_url).map_err(|_| FetchError::InvalidUrl(start_url.to_string()))?;
        let first_html = fetcher.fetch(start.as_str()).await?;

        let discovered = {
            let document = Html::parse_document(&first_html);
            adapter.page_links(&start, &document)
        };
        let secondary = dedupe_pages(&start, discovered);
        info!(
            "{}: {} additional page(s) for {}",
            adapter.kind(),
            secondary.len(),
            start
        );

        let mut pages = vec![Page {
            url: start,
            html: first_html,
        }];

        for url in secondary {
            let wait = jittered(self.delay, self.jitter);
            debug!("Waiting {:.1}s before {}", wait.as_secs_f64(), url);
            sleep(wait).await;

            match fetcher.fetch(url.as_str()).await {
                Ok(html) => pages.push(Page { url, html }),
                Err(e) if adapter.pagination_required() => return Err(e),
                Err(e) => warn!("Skipping page {}: {}", url, e),
            }
        }

        Ok(pages)
    }
}

/// Drops fragments, the start page itself and repeats, keeping first-seen order.
pub fn dedupe_pages(start: &Url, discovered: Vec<Url>) -> Vec<Url> {
    let mut seen = HashSet::new();
    seen.insert(page_key(start));

    discovered
        .into_iter()
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .filter(|url| seen.insert(page_key(url)))
        .collect()
}

/// "https://x/a/" and "https://x/a" are the same page.
fn page_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let trimmed = url.path().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&trimmed);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdapterKind, ParseError, RawItem};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves pages from a map and records every URL requested.
    struct MapFetcher {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages.iter().map(|(u, h)| (u.to_string(), h.to_string())).collect(),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().ok_or(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    /// Follows every `a.page` link.
    struct AnchorAdapter {
        required: bool,
    }

    impl SiteAdapter for AnchorAdapter {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Awdit
        }

        fn pagination_required(&self) -> bool {
            self.required
        }

        fn page_links(&self, start_url: &Url, first_page: &Html) -> Vec<Url> {
            let sel = scraper::Selector::parse("a.page").unwrap();
            first_page
                .select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .filter_map(|href| start_url.join(href).ok())
                .collect()
        }

        fn extract_page(&self, _page: &Page, _document: &Html) -> Result<Vec<RawItem>, ParseError> {
            Ok(Vec::new())
        }
    }

    const START: &str = "https://shop.test/gpus?limit=64";

    fn first_page() -> String {
        r##"<div class="pages">
            <a class="page" href="?limit=64">1</a>
            <a class="page" href="/gpus?limit=64&p=2">2</a>
            <a class="page" href="https://shop.test/gpus?limit=64&p=3">3</a>
            <a class="page" href="/gpus?limit=64&p=4#top">4</a>
            <a class="page" href="/gpus?limit=64&p=2">next</a>
        </div>"##
            .to_string()
    }

    #[tokio::test]
    async fn three_distinct_links_and_a_self_link_fetch_three_pages() {
        let first = first_page();
        let fetcher = MapFetcher::new(&[
            (START, &first),
            ("https://shop.test/gpus?limit=64&p=2", "<p>2</p>"),
            ("https://shop.test/gpus?limit=64&p=3", "<p>3</p>"),
            ("https://shop.test/gpus?limit=64&p=4", "<p>4</p>"),
        ]);
        let resolver = PageResolver::new(Duration::ZERO, 0.2);

        let pages = resolver
            .resolve(&fetcher, &AnchorAdapter { required: false }, START)
            .await
            .unwrap();

        assert_eq!(pages.len(), 4);
        assert_eq!(fetcher.requested().len(), 4);
        assert_eq!(pages[0].url.as_str(), START);
        assert_eq!(pages[3].html, "<p>4</p>");
    }

    #[tokio::test]
    async fn missing_secondary_page_is_skipped() {
        let first = first_page();
        let fetcher = MapFetcher::new(&[
            (START, &first),
            ("https://shop.test/gpus?limit=64&p=3", "<p>3</p>"),
        ]);
        let resolver = PageResolver::new(Duration::ZERO, 0.0);

        let pages = resolver
            .resolve(&fetcher, &AnchorAdapter { required: false }, START)
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].html, "<p>3</p>");
    }

    #[tokio::test]
    async fn missing_secondary_page_fails_when_pagination_is_mandatory() {
        let first = first_page();
        let fetcher = MapFetcher::new(&[(START, &first)]);
        let resolver = PageResolver::new(Duration::ZERO, 0.0);

        let result = resolver
            .resolve(&fetcher, &AnchorAdapter { required: true }, START)
            .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn unreachable_start_page_is_an_error() {
        let fetcher = MapFetcher::new(&[]);
        let resolver = PageResolver::new(Duration::ZERO, 0.0);

        let result = resolver
            .resolve(&fetcher, &AnchorAdapter { required: false }, START)
            .await;

        assert!(result.is_err());
        assert_eq!(fetcher.requested(), vec![START.to_string()]);
    }

    #[test]
    fn trailing_slash_and_fragment_do_not_make_new_pages() {
        let start = Url::parse("https://shop.test/gpus/").unwrap();
        let found = vec![
            Url::parse("https://shop.test/gpus").unwrap(),
            Url::parse("https://shop.test/gpus/#reviews").unwrap(),
            Url::parse("https://shop.test/gpus/?page=2").unwrap(),
        ];
        let pages = dedupe_pages(&start, found);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].as_str(), "https://shop.test/gpus/?page=2");
    }
}
