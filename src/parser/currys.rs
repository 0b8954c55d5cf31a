// Currys. The pager only shows a window of page numbers, so every page URL is
// built from the result count instead.
use crate::model::{AdapterKind, Page, ParseError, RawItem};
use crate::normalizer::clean_title;
use crate::parser::price::parse_price;
use crate::parser::{
    SiteAdapter, absolute_link, card_text, extract_cards, first_attr, first_text, selector, with_query,
};
use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

const IN_STOCK: &str = "add to basket";
const PAGE_SIZE: u64 = 20;
/// Upper bound on synthesized pages; a garbled result count must not queue
/// thousands of fetches.
const MAX_PAGES: u64 = 50;

pub struct CurrysAdapter {
    card: Selector,
    price: Selector,
    link: Selector,
    title: Selector,
    pager: Selector,
    result_count: Selector,
}

impl CurrysAdapter {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("div.plp-list-grid")?,
            price: selector("span.value[content]")?,
            link: selector("a.pdpLink")?,
            title: selector("h2.pdp-grid-product-name")?,
            pager: selector("li.page-item")?,
            result_count: selector("div.page-result-count")?,
        })
    }
}

/// "Showing 1 - 20 of 57 results" -> 57.
fn result_total(text: &str) -> Option<u64> {
    text.split(|c: char| !c.is_ascii_digit() && c != ',')
        .filter_map(|n| n.replace(',', "").parse::<u64>().ok())
        .max()
}

impl SiteAdapter for CurrysAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Currys
    }

    fn page_links(&self, start_url: &Url, first_page: &Html) -> Vec<Url> {
        if first_page.select(&self.pager).next().is_none() {
            return Vec::new();
        }
        let Some(total) = first_page
            .select(&self.result_count)
            .next()
            .and_then(|el| result_total(&el.text().collect::<String>()))
        else {
            return Vec::new();
        };

        let mut pages = total.div_ceil(PAGE_SIZE);
        if pages > MAX_PAGES {
            warn!(
                "Currys reports {} results on {}, only following the first {} pages",
                total, start_url, MAX_PAGES
            );
            pages = MAX_PAGES;
        }
        (2..=pages)
            .map(|page| {
                with_query(
                    start_url,
                    &[
                        ("start", ((page - 1) * PAGE_SIZE).to_string()),
                        ("sz", PAGE_SIZE.to_string()),
                    ],
                )
            })
            .collect()
    }

    fn extract_page(&self, page: &Page, document: &Html) -> Result<Vec<RawItem>, ParseError> {
        extract_cards(page, document, &self.card, |card| {
            let price = first_attr(card, &self.price, "content").and_then(|p| parse_price(&p))?;
            let href = first_attr(card, &self.link, "href")?;
            let title = first_text(card, &self.title)?;
            let text = card_text(card);

            Some(RawItem {
                price,
                url: absolute_link(&page.url, &href)?,
                title: clean_title(&title),
                in_stock: text.contains(IN_STOCK),
                text,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_page;

    const URL: &str = "https://www.currys.co.uk/computing/components-and-upgrades/graphics-cards";

    #[test]
    fn builds_hidden_pages_from_result_count() {
        let html = r#"
            <div class="page-result-count">Showing 1 - 20 of 57 results</div>
            <ul class="pagination"><li class="page-item">1</li><li class="page-item">2</li></ul>
        "#;
        let adapter = CurrysAdapter::new().unwrap();
        let links = adapter.page_links(&Url::parse(URL).unwrap(), &Html::parse_document(html));
        assert_eq!(
            links.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec![
                "https://www.currys.co.uk/computing/components-and-upgrades/graphics-cards?start=20&sz=20",
                "https://www.currys.co.uk/computing/components-and-upgrades/graphics-cards?start=40&sz=20",
            ]
        );
    }

    #[test]
    fn huge_result_count_is_capped() {
        let html = r#"
            <div class="page-result-count">Showing 1 - 20 of 20,000,000 results</div>
            <ul class="pagination"><li class="page-item">1</li></ul>
        "#;
        let adapter = CurrysAdapter::new().unwrap();
        let links = adapter.page_links(&Url::parse(URL).unwrap(), &Html::parse_document(html));
        assert_eq!(links.len() as u64, MAX_PAGES - 1);
        assert_eq!(
            links.last().and_then(|u| u.query()),
            Some(format!("start={}&sz=20", (MAX_PAGES - 1) * PAGE_SIZE).as_str())
        );
    }

    #[test]
    fn no_pager_means_single_page() {
        let html = r#"<div class="page-result-count">12 results</div>"#;
        let adapter = CurrysAdapter::new().unwrap();
        assert!(adapter.page_links(&Url::parse(URL).unwrap(), &Html::parse_document(html)).is_empty());
    }

    #[test]
    fn reads_grid_rows() {
        let html = r#"
        <div class="row plp-list-grid">
          <h2 class="pdp-grid-product-name">MSI Radeon RX 9070 XT GAMING TRIO OC 16 GB</h2>
          <a class="link text-truncate pdpLink" href="/products/msi-rx-9070-xt-10271234.html">View</a>
          <span class="value" content="649.00">£649.00</span>
          <button>Add to basket</button>
        </div>
        <div class="row plp-list-grid">
          <h2 class="pdp-grid-product-name">Gigabyte RX 9070 XT</h2>
          <a class="link text-truncate pdpLink" href="/products/gigabyte-rx-9070-xt.html">View</a>
          <span class="value" content="689.99">£689.99</span>
          <button disabled>Out of stock</button>
        </div>
        "#;
        let adapter = CurrysAdapter::new().unwrap();
        let page = test_page(URL, html);
        let items = adapter.extract_page(&page, &Html::parse_document(html)).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].price, 649.0);
        assert_eq!(items[0].url, "https://www.currys.co.uk/products/msi-rx-9070-xt-10271234.html");
        assert!(items[0].in_stock);
        assert!(!items[1].in_stock);
    }

    #[test]
    fn result_total_takes_largest_number() {
        assert_eq!(result_total("Showing 1 - 20 of 1,057 results"), Some(1057));
        assert_eq!(result_total("no numbers"), None);
    }
}
