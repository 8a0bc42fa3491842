//! Web search knowledge source.
//!
//! Queries an external JSON search endpoint (`GET {endpoint}?q={query}`)
//! and maps its results to retrieval items. Any transport failure or
//! timeout makes the source unavailable for that query; the fusion
//! pipeline falls through to the next source.

use async_trait::async_trait;
use relaybot_core::error::SourceError;
use relaybot_core::retrieval::{KnowledgeSource, RetrievalResult, RetrievedItem};
use serde::Deserialize;
use tracing::{debug, warn};

/// External search endpoint adapter.
pub struct WebSearchSource {
    endpoint: String,
    api_key: Option<String>,
    top_k: usize,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl WebSearchSource {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        top_k: usize,
        timeout: std::time::Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint: endpoint.into(),
            api_key,
            top_k,
            timeout_secs: timeout.as_secs(),
            client,
        }
    }

    /// Map a search response body to retrieval items.
    fn to_items(results: Vec<SearchHit>, top_k: usize) -> Vec<RetrievedItem> {
        results
            .into_iter()
            .take(top_k)
            .map(|hit| {
                let mut item = RetrievedItem::new(match hit.title {
                    Some(ref title) => format!("{}: {}", title, hit.snippet),
                    None => hit.snippet.clone(),
                });
                if let Some(score) = hit.score {
                    item = item.with_score(score);
                }
                if let Some(url) = hit.url {
                    item = item.with_meta("url", serde_json::json!(url));
                }
                if let Some(title) = hit.title {
                    item = item.with_meta("title", serde_json::json!(title));
                }
                item
            })
            .collect()
    }
}

/// One hit in the search endpoint's response.
#[derive(Debug, Deserialize)]
struct SearchHit {
    snippet: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl KnowledgeSource for WebSearchSource {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn query(&self, text: &str) -> Result<RetrievalResult, SourceError> {
        let mut request = self.client.get(&self.endpoint).query(&[("q", text)]);

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout {
                    source_name: "web_search".into(),
                    timeout_secs: self.timeout_secs,
                }
            } else {
                SourceError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Search endpoint returned error");
            return Err(SourceError::Unavailable(format!(
                "search endpoint returned {status}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::QueryFailed(format!("malformed search response: {e}")))?;

        let items = Self::to_items(body.results, self.top_k);
        debug!(items = items.len(), "Web search query");

        Ok(items.into())
    }
}
