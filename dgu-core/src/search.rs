use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::config::SearchSettings;
use crate::contract::DatasetSearch;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),
    #[error("unexpected search response: {0}")]
    Response(String),
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    success: bool,
    #[serde(default)]
    result: Option<SearchResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    count: u64,
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
}

/// Spatial search through CKAN's `package_search` action.
pub struct CkanSearchClient {
    http: Client,
    action_url: String,
    api_key: Option<String>,
    rows: u32,
}

impl CkanSearchClient {
    pub fn new(settings: &SearchSettings) -> Result<Self, SearchError> {
        let http = Client::builder()
            .build()
            .map_err(|e| SearchError::Request(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            http,
            action_url: format!(
                "{}/api/3/action/package_search",
                settings.ckan_url.trim_end_matches('/')
            ),
            api_key: settings.api_key.clone(),
            rows: settings.rows,
        })
    }
}

#[async_trait]
impl DatasetSearch for CkanSearchClient {
    async fn find_datasets(&self, bbox: &str) -> Result<Vec<String>, SearchError> {
        let body = json!({
            "q": "",
            "fq": "",
            "rows": self.rows,
            "fl": "id",
            "extras": { "ext_bbox": bbox },
        });
        let mut request = self.http.post(&self.action_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, key.as_str());
        }

        let response = request.send().await.map_err(|e| {
            error!(error = ?e, url = %self.action_url, "package_search request failed");
            SearchError::Request(format!("{}: {e}", self.action_url))
        })?;
        let status = response.status();
        if !status.is_success() {
            error!(status = %status, url = %self.action_url, bbox, "package_search returned error status");
            return Err(SearchError::Request(format!(
                "{} returned HTTP {status}",
                self.action_url
            )));
        }

        let parsed: ActionResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Response(format!("invalid package_search body: {e}")))?;
        if !parsed.success {
            return Err(SearchError::Response(format!(
                "package_search failed: {}",
                parsed.error.unwrap_or_default()
            )));
        }
        let result = parsed
            .result
            .ok_or_else(|| SearchError::Response("package_search returned no result".into()))?;

        let ids: Vec<String> = result.results.into_iter().map(|hit| hit.id).collect();
        info!(bbox, matched = result.count, returned = ids.len(), "Searched datasets by bounding box");
        Ok(ids)
    }
}
