// CCL Online. Sits behind bot protection, so pages come through the render mode.
use crate::model::{AdapterKind, Page, ParseError, RawItem};
use crate::normalizer::clean_title;
use crate::parser::price::combine_split_price;
use crate::parser::{
    SiteAdapter, absolute_link, card_text, collect_links, extract_cards, first_attr, first_text, selector,
};
use scraper::{Html, Selector};
use url::Url;

/// CCL marks stock as "delivery today" / "collect today".
const IN_STOCK: &str = "today";

pub struct CclOnlineAdapter {
    card: Selector,
    price_spans: Selector,
    link: Selector,
    title: Selector,
    pages: Selector,
}

impl CclOnlineAdapter {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("div.productlistoverlaywrapper")?,
            price_spans: selector("p.order-xs-2 span")?,
            link: selector("a[href]")?,
            title: selector("h3.product-name a")?,
            pages: selector("li.notselected a[href]")?,
        })
    }
}

impl SiteAdapter for CclOnlineAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::CclOnline
    }

    fn needs_rendering(&self) -> bool {
        true
    }

    fn page_links(&self, start_url: &Url, first_page: &Html) -> Vec<Url> {
        collect_links(start_url, first_page, &self.pages)
    }

    fn extract_page(&self, page: &Page, document: &Html) -> Result<Vec<RawItem>, ParseError> {
        extract_cards(page, document, &self.card, |card| {
            // Spans are: currency symbol, pounds, pence.
            let spans: Vec<String> = card
                .select(&self.price_spans)
                .map(|s| s.text().collect::<String>())
                .collect();
            let (pounds, pence) = (spans.get(1)?, spans.get(2)?);
            let price = combine_split_price(pounds, pence)?;

            let href = first_attr(card, &self.link, "href")?;
            let title = first_attr(card, &self.title, "title").or_else(|| first_text(card, &self.title))?;
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
