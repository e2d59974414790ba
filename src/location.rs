//! Location-hint lookup from an entry's linked detail page.
//!
//! Event pages embed a Google Maps link whose `q` parameter holds the venue
//! address. Absence, fetch failures, and unparsable pages all just mean no
//! location on the written event.

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

/// Seam for location enrichment, so reconciliation is testable offline.
#[async_trait]
pub trait LocationSource {
    async fn lookup(&self, link: &str) -> Option<String>;
}

/// Scrapes the first maps.google.com anchor from the linked page.
pub struct LocationScraper {
    http: reqwest::Client,
}

impl LocationScraper {
    pub fn new(http: reqwest::Client) -> Self {
        LocationScraper { http }
    }
}

#[async_trait]
impl LocationSource for LocationScraper {
    async fn lookup(&self, link: &str) -> Option<String> {
        let html = self
            .http
            .get(link)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .text()
            .await
            .ok()?;
        extract_maps_query(&html)
    }
}

/// A source that never finds a hint (dry runs, tests).
pub struct NoLocation;

#[async_trait]
impl LocationSource for NoLocation {
    async fn lookup(&self, _link: &str) -> Option<String> {
        None
    }
}

/// Pull the `q` query parameter out of the first Google Maps anchor.
fn extract_maps_query(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(
        r#"a[href^="http://maps.google.com/"], a[href^="https://maps.google.com/"]"#,
    )
    .ok()?;

    let href = document.select(&selector).next()?.value().attr("href")?;
    let url = Url::parse(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "q")
        .map(|(_, value)| value.into_owned())
}
