// AWD-IT (Magento storefront)
use crate::model::{AdapterKind, Page, ParseError, RawItem};
use crate::normalizer::clean_title;
use crate::parser::price::parse_price;
use crate::parser::{
    SiteAdapter, absolute_link, card_text, collect_links, extract_cards, first_attr, first_text, selector,
};
use scraper::{Html, Selector};
use url::Url;

const IN_STOCK: &str = "in stock";

pub struct AwditAdapter {
    card: Selector,
    link: Selector,
    price_amount: Selector,
    price_text: Selector,
    pages: Selector,
}

impl AwditAdapter {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("div.product-item-details")?,
            link: selector("a.product-item-link")?,
            price_amount: selector("span.price-including-tax[data-price-amount]")?,
            price_text: selector("span.price")?,
            pages: selector("a.page[href]")?,
        })
    }
}

impl SiteAdapter for AwditAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Awdit
    }

    fn page_links(&self, start_url: &Url, first_page: &Html) -> Vec<Url> {
        collect_links(start_url, first_page, &self.pages)
    }

    fn extract_page(&self, page: &Page, document: &Html) -> Result<Vec<RawItem>, ParseError> {
        extract_cards(page, document, &self.card, |card| {
            // The data attribute carries the VAT-inclusive amount without formatting.
            let price = first_attr(card, &self.price_amount, "data-price-amount")
                .or_else(|| first_text(card, &self.price_text))
                .and_then(|p| parse_price(&p))?;
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
