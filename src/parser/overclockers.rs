// Overclockers UK
use crate::model::{AdapterKind, Page, ParseError, RawItem};
use crate::normalizer::clean_title;
use crate::parser::price::parse_price;
use crate::parser::{
    SiteAdapter, absolute_link, card_text, collect_links, extract_cards, first_attr, first_text, selector,
};
use scraper::{Html, Selector};
use url::Url;

const IN_STOCK: &str = "in stock";

pub struct OverclockersAdapter {
    card: Selector,
    price: Selector,
    link: Selector,
    pages: Selector,
}

impl OverclockersAdapter {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("ck-product-box")?,
            price: selector("span.price__amount")?,
            link: selector("a.js-gtm-product-link")?,
            pages: selector("a.pagination__step[href]")?,
        })
    }
}

impl SiteAdapter for OverclockersAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Overclockers
    }

    fn page_links(&self, start_url: &Url, first_page: &Html) -> Vec<Url> {
        collect_links(start_url, first_page, &self.pages)
    }

    fn extract_page(&self, page: &Page, document: &Html) -> Result<Vec<RawItem>, ParseError> {
        extract_cards(page, document, &self.card, |card| {
            let price = first_text(card, &self.price).and_then(|p| parse_price(&p))?;
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
