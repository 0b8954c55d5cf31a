use crate::model::{CaptchaError, FetchError};
use crate::scraper::traits::Fetcher;

use rand::seq::IndexedRandom;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// Marker text of the interstitial human-verification page.
const CHALLENGE_MARKER: &str = "verify you are human";

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

async fn get_text(client: &Client, request_url: &str, reported_url: &str) -> Result<String, FetchError> {
    let response = client
        .get(request_url)
        .header(reqwest::header::USER_AGENT, random_user_agent())
        .send()
        .await
        .map_err(|e| map_reqwest_error(reported_url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: reported_url.to_string(),
            status: status.as_u16(),
        });
    }

    response
        .text()
        .await
        .map_err(|e| map_reqwest_error(reported_url, e))
}

/// Plain HTTP fetch with a per-request timeout and a rotating user agent.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| map_reqwest_error("<client>", e))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        get_text(&self.client, url, url).await
    }
}

/// Fetches JavaScript-rendered pages through an external render service
/// that answers `GET <endpoint>?url=<target>` with the final page source.
pub struct RenderFetcher {
    client: Client,
    endpoint: Url,
}

impl RenderFetcher {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, FetchError> {
        let endpoint = Url::parse(endpoint).map_err(|_| FetchError::InvalidUrl(endpoint.to_string()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| map_reqwest_error(endpoint.as_str(), e))?;

        Ok(Self { client, endpoint })
    }

    fn build_url(&self, target: &str) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("url", target);
        url.to_string()
    }
}

#[async_trait::async_trait]
impl Fetcher for RenderFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        get_text(&self.client, &self.build_url(url), url).await
    }
}

pub fn looks_like_challenge(html: &str) -> bool {
    html.to_lowercase().contains(CHALLENGE_MARKER)
}

/// Wraps a fetcher: when a human-verification page comes back, waits once
/// and refetches; a second challenge fails with `CaptchaError`.
pub struct ChallengeGuard<F> {
    inner: F,
    retry_wait: Duration,
}

impl<F: Fetcher> ChallengeGuard<F> {
    pub fn new(inner: F, retry_wait: Duration) -> Self {
        Self { inner, retry_wait }
    }
}

#[async_trait::async_trait]
impl<F: Fetcher> Fetcher for ChallengeGuard<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let html = self.inner.fetch(url).await?;
        if !looks_like_challenge(&html) {
            return Ok(html);
        }

        warn!("Human verification page at {}, retrying once", url);
        sleep(self.retry_wait).await;

        let html = self.inner.fetch(url).await?;
        if looks_like_challenge(&html) {
            return Err(CaptchaError(url.to_string()).into());
        }
        info!("Verification passed on retry for {}", url);
        Ok(html)
    }
}
