use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{EmbeddingsConfig, RuntimeConfig};
use crate::error::{RetrievalError, ServiceError, ServiceResult};
use crate::retrieval::Embedder;

/// Embeddings via Ollama's `/api/embeddings`; endpoint and model follow the live settings
pub struct OllamaEmbedder {
    client: Client,
    runtime_config: Arc<RuntimeConfig>,
}

impl OllamaEmbedder {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        {
            let config = &runtime_config.dynamic().embeddings;
            info!(model = %config.model, url = %config.base_url, "Initializing Ollama embedder");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                ServiceError::Retrieval(RetrievalError::Embedding {
                    message: e.to_string(),
                })
            })?;

        Ok(Self {
            client,
            runtime_config,
        })
    }

    /// Try a test embedding; failures are only logged
    pub async fn verify(&self) {
        match self.embed("test").await {
            Ok(_) => info!("Embedding model verified successfully"),
            Err(e) => {
                warn!(error = %e, "Embedding model verification failed - vector search may not work")
            }
        }
    }

    fn embed_request(
        &self,
        config: &EmbeddingsConfig,
        text: &str,
    ) -> Result<reqwest::Request, RetrievalError> {
        let url = format!("{}/api/embeddings", config.base_url.trim_end_matches('/'));

        self.client
            .post(&url)
            .json(&OllamaEmbeddingRequest {
                model: &config.model,
                prompt: text,
            })
            .build()
            .map_err(|e| RetrievalError::Connection { url, source: e })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        let dynamic = self.runtime_config.snapshot();
        let config = &dynamic.embeddings;
        let request = self.embed_request(config, text)?;
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

            if message.contains("model")
                && (message.contains("not found") || message.contains("does not exist"))
            {
                return Err(ServiceError::Retrieval(RetrievalError::Embedding {
                    message: format!("embedding model {} not found", config.model),
                }));
            }

            return Err(ServiceError::Retrieval(RetrievalError::Upstream {
                status,
                message,
            }));
        }

        let embedding_response: OllamaEmbeddingResponse =
            response.json().await.map_err(|e| RetrievalError::Embedding {
                message: e.to_string(),
            })?;

        if embedding_response.embedding.is_empty() {
            return Err(ServiceError::Retrieval(RetrievalError::Embedding {
                message: "empty embedding".to_string(),
            }));
        }

        Ok(embedding_response.embedding)
    }
}

/// Ollama embedding request
#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Ollama embedding response
#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}
