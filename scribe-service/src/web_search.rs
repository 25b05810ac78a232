use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::{RetrievalError, ServiceError, ServiceResult};
use crate::retrieval::{SearchApi, SearchHit};

/// Serper-compatible search API client; endpoint, key and timeout follow the live settings
pub struct SerperClient {
    client: Client,
    runtime_config: Arc<RuntimeConfig>,
}

impl SerperClient {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        let client = Client::builder().build().map_err(|e| {
            ServiceError::Retrieval(RetrievalError::Connection {
                url: runtime_config.dynamic().web_search.base_url.clone(),
                source: e,
            })
        })?;

        Ok(Self {
            client,
            runtime_config,
        })
    }

    fn search_request(&self, query: &str) -> Result<reqwest::Request, RetrievalError> {
        let dynamic = self.runtime_config.snapshot();
        let config = &dynamic.web_search;
        let url = format!("{}/search", config.base_url.trim_end_matches('/'));

        self.client
            .post(&url)
            .timeout(config.timeout())
            .header("X-API-KEY", &config.api_key)
            .json(&SearchRequest { q: query })
            .build()
            .map_err(|e| RetrievalError::Connection { url, source: e })
    }
}

#[async_trait]
impl SearchApi for SerperClient {
    async fn search(&self, query: &str) -> ServiceResult<Vec<SearchHit>> {
        let request = self.search_request(query)?;
        let url = request.url().to_string();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| RetrievalError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Retrieval(RetrievalError::Upstream {
                status,
                message,
            }));
        }

        let body: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::InvalidResponse {
                    service: "web search".to_string(),
                    message: e.to_string(),
                })?;

        Ok(body.organic)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}
