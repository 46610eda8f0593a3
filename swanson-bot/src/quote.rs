//! Ron Swanson quote API client.

use std::future::Future;

use anyhow::{Context, Result};

pub const SWANSON_API: &str = "https://ron-swanson-quotes.herokuapp.com/v2/quotes";

/// Source of quotes for the `!swanson` command.
pub trait QuoteProvider: Send + Sync + 'static {
    /// One quote. A single attempt, no retry.
    fn fetch_quote(&self) -> impl Future<Output = Result<String>> + Send;
}

/// Quote API client.
pub struct SwansonQuotes {
    url: String,
    http: reqwest::Client,
}

impl SwansonQuotes {
    pub fn new() -> Self {
        Self {
            url: SWANSON_API.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for SwansonQuotes {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteProvider for SwansonQuotes {
    async fn fetch_quote(&self) -> Result<String> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("Failed to call Swanson API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Swanson API error {status}: {body}");
        }

        let body = resp.text().await.context("Failed to read Swanson response")?;
        parse_quotes(&body)
    }
}

/// The API answers with a JSON array of quotes; we want the first.
pub fn parse_quotes(body: &str) -> Result<String> {
    let quotes: Vec<String> =
        serde_json::from_str(body).context("Failed to parse Swanson response")?;
    quotes
        .into_iter()
        .next()
        .context("Swanson API returned no quotes")
}
