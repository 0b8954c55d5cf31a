// Site adapters: one per retailer, all behind the same page -> items contract.
pub mod awdit;
pub mod cclonline;
pub mod currys;
pub mod overclockers;
pub mod price;
pub mod scan;

use crate::model::{AdapterKind, Page, ParseError, RawItem};
use crate::normalizer::normalize_text;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

pub use awdit::AwditAdapter;
pub use cclonline::CclOnlineAdapter;
pub use currys::CurrysAdapter;
pub use overclockers::OverclockersAdapter;
pub use scan::ScanAdapter;

/// Items pulled from a set of pages, plus the pages that had no product region.
#[derive(Debug, Default)]
pub struct Extraction {
    pub items: Vec<RawItem>,
    pub problems: Vec<ParseError>,
}

pub trait SiteAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Sites behind bot protection need the rendered fetch mode.
    fn needs_rendering(&self) -> bool {
        false
    }

    /// When true, losing any secondary page fails the whole run.
    fn pagination_required(&self) -> bool {
        false
    }

    /// Secondary page URLs visible on the first page. May contain the start
    /// page or repeats; the resolver dedupes.
    fn page_links(&self, start_url: &Url, first_page: &Html) -> Vec<Url>;

    /// Cards on one page. Cards missing any field are skipped; a page with no
    /// cards at all is a `ParseError`.
    fn extract_page(&self, page: &Page, document: &Html) -> Result<Vec<RawItem>, ParseError>;

    fn extract_items(&self, pages: &[Page]) -> Extraction {
        let mut extraction = Extraction::default();
        for page in pages {
            let document = Html::parse_document(&page.html);
            match self.extract_page(page, &document) {
                Ok(items) => {
                    debug!("{}: {} item(s) on {}", self.kind(), items.len(), page.url);
                    extraction.items.extend(items);
                }
                Err(e) => extraction.problems.push(e),
            }
        }
        extraction
    }
}

pub fn adapter_for(kind: AdapterKind) -> Result<Box<dyn SiteAdapter>, ParseError> {
    Ok(match kind {
        AdapterKind::Awdit => Box::new(AwditAdapter::new()?),
        AdapterKind::CclOnline => Box::new(CclOnlineAdapter::new()?),
        AdapterKind::Overclockers => Box::new(OverclockersAdapter::new()?),
        AdapterKind::Scan => Box::new(ScanAdapter::new()?),
        AdapterKind::Currys => Box::new(CurrysAdapter::new()?),
    })
}

pub(crate) fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::Selector(css.to_string()))
}

/// Normalized text of a card, including `title` attributes that some sites
/// use instead of visible text.
pub(crate) fn card_text(card: &ElementRef) -> String {
    let mut raw: Vec<&str> = card.text().collect();
    for el in card.descendants().filter_map(ElementRef::wrap) {
        if let Some(title) = el.value().attr("title") {
            raw.push(title);
        }
    }
    normalize_text(&raw.join(" "))
}

/// Trimmed text of the first match, if it has any.
pub(crate) fn first_text(card: &ElementRef, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn first_attr(card: &ElementRef, sel: &Selector, attr: &str) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolves a possibly site-root-relative link against the page it was found on.
pub(crate) fn absolute_link(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(String::from)
}

/// All hrefs matching `sel`, made absolute.
pub(crate) fn collect_links(base: &Url, document: &Html, sel: &Selector) -> Vec<Url> {
    document
        .select(sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .collect()
}

/// Returns `url` with the given query parameters set, replacing existing ones.
pub(crate) fn with_query(url: &Url, params: &[(&str, String)]) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(p, _)| *p == &**k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut out = url.clone();
    out.set_query(None);
    {
        let mut pairs = out.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    out
}

/// Runs `card_fn` over every card matched by `card_sel`, skipping `None`s.
pub(crate) fn extract_cards<F>(
    page: &Page,
    document: &Html,
    card_sel: &Selector,
    mut card_fn: F,
) -> Result<Vec<RawItem>, ParseError>
where
    F: FnMut(&ElementRef) -> Option<RawItem>,
{
    let mut cards = 0usize;
    let mut items = Vec::new();
    for card in document.select(card_sel) {
        cards += 1;
        match card_fn(&card) {
            Some(item) => items.push(item),
            None => debug!("Skipping incomplete card #{} on {}", cards, page.url),
        }
    }
    if cards == 0 {
        return Err(ParseError::NoProductRegion(page.url.to_string()));
    }
    Ok(items)
}

#[cfg(test)]
pub(crate) fn test_page(url: &str, html: &str) -> Page {
    Page {
        url: Url::parse(url).unwrap(),
        html: html.to_string(),
    }
}
