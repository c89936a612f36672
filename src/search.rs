use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("failed to send search request: {0}")]
    Request(#[source] reqwest::Error),
    #[error("search API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode search response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// A web search endpoint. Hits come back best first.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

pub struct TavilyClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl TavilyClient {
    pub fn new(http: Client, api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SearchClient for TavilyClient {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let request_payload = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_payload)
            .send()
            .await
            .map_err(SearchError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Search API request failed");
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<SearchResponse>()
            .await
            .map_err(SearchError::Decode)?;

        debug!(hits = parsed.results.len(), "Received search results");
        Ok(parsed.results)
    }
}
