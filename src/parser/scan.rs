// Scan. Category pages list everything on one page, so there is no pagination.
use crate::model::{AdapterKind, Page, ParseError, RawItem};
use crate::normalizer::clean_title;
use crate::parser::price::combine_split_price;
use crate::parser::{SiteAdapter, absolute_link, card_text, extract_cards, first_attr, first_text, selector};
use scraper::{ElementRef, Html, Selector};
use url::Url;

const IN_STOCK: &str = "in stock";

pub struct ScanAdapter {
    card: Selector,
    price: Selector,
    small: Selector,
    link: Selector,
}

impl ScanAdapter {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("li.product")?,
            price: selector("span.price")?,
            small: selector("small")?,
            link: selector("span.description a")?,
        })
    }

    /// `<span class="price"><small>£</small>649<small>.99</small></span>`:
    /// pounds are the bare text, pence the last `small`.
    fn split_price(&self, card: &ElementRef) -> Option<f64> {
        let price = card.select(&self.price).next()?;
        let pounds: String = price
            .children()
            .filter_map(|node| node.value().as_text().map(|t| t.to_string()))
            .collect();
        let pence = price
            .select(&self.small)
            .map(|s| s.text().collect::<String>())
            .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
            .last()
            .unwrap_or_default();
        combine_split_price(&pounds, &pence)
    }
}

impl SiteAdapter for ScanAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Scan
    }

    fn page_links(&self, _start_url: &Url, _first_page: &Html) -> Vec<Url> {
        Vec::new()
    }

    fn extract_page(&self, page: &Page, document: &Html) -> Result<Vec<RawItem>, ParseError> {
        extract_cards(page, document, &self.card, |card| {
            let price = self.split_price(card)?;
            let href = first_attr(card, &self.link, "href")?;
            let title = first_text(card, &self.link)?;
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
