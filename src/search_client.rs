// src/search_client.rs
//
// Adapter for the hosted medical knowledge index. Input is free text, output
// is an ordered list of content/source snippets capped at the requested
// count. An empty result set is a normal outcome, not an error.

use crate::errors::AdapterError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const INDEX_NAME: &str = "medical-knowledge";

#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    search: String,
    top: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    value: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    content: String,
    source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub source: String,
}

impl SearchClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }

    /// Runs a ranked search against the knowledge index, returning at most
    /// `top` documents.
    pub async fn search(
        &self,
        query: &str,
        top: usize,
    ) -> Result<Vec<RetrievedDocument>, AdapterError> {
        let request = SearchRequest {
            search: query.to_string(),
            top,
        };

        let response = self
            .client
            .post(format!(
                "{}/indexes/{}/docs/search",
                self.endpoint, INDEX_NAME
            ))
            .header("api-key", &self.api_key)
            .timeout(Duration::from_secs(15))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("Search service returned {}: {}", status, body);
            return Err(AdapterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::Decode(format!("{}: {}", e, body)))?;

        let documents = parsed
            .value
            .into_iter()
            .take(top)
            .map(|hit| RetrievedDocument {
                content: hit.content,
                source: hit.source.unwrap_or_else(|| "medical database".to_string()),
            })
            .collect::<Vec<_>>();

        tracing::debug!("Search for '{}' returned {} documents", query, documents.len());

        Ok(documents)
    }
}
