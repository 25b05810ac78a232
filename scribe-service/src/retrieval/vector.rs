//! Embedding search over ingested reference links.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ContextBlock, ContextChunk, RetrievalTier, TierKind, TierResult};
use crate::config::EmbeddingsConfig;
use crate::db::{Database, ReferenceChunk};
use crate::error::{ServiceResult, format_error_chain};

/// Maps text into the embedding space used by the reference collection
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>>;
}

/// Retrieves the readable content of a reference link
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, link: &str) -> ServiceResult<String>;
}

/// A link that could not be ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkFailure {
    pub link: String,
    pub reason: String,
}

/// Per-link outcome of an ingestion batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<LinkFailure>,
}

/// Split text into windows of `chunk_size` words overlapping by `overlap` words
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    if words.len() <= chunk_size {
        return vec![words.join(" ")];
    }

    // Always advance by at least one word
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Reference collection: ingestion and nearest-neighbour search
pub struct VectorSearch {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    fetcher: Arc<dyn ContentFetcher>,
    /// Serializes ingestion batches so two admins cannot interleave replacements
    ingest_lock: tokio::sync::Mutex<()>,
}

impl VectorSearch {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Self {
        Self {
            db,
            embedder,
            fetcher,
            ingest_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Fetch, chunk and embed `links`, then replace the whole collection with the result.
    ///
    /// Every window is embedded before the old collection is deleted. The
    /// delete and the insert are separate steps, so a concurrent query may
    /// see an empty collection, never a mix of the old and new batch.
    pub async fn ingest(
        &self,
        links: &[String],
        config: &EmbeddingsConfig,
    ) -> ServiceResult<IngestReport> {
        let _guard = self.ingest_lock.lock().await;
        let mut report = IngestReport::default();
        let mut batch: Vec<ReferenceChunk> = Vec::new();

        // Links are prepared concurrently; results stay in request order
        let prepared = join_all(links.iter().map(|link| self.prepare_link(link, config))).await;

        for (link, result) in links.iter().zip(prepared) {
            match result {
                Ok(chunks) => {
                    debug!(link = %link, chunks = chunks.len(), "Prepared reference link");
                    batch.extend(chunks);
                    report.succeeded.push(link.clone());
                }
                Err(reason) => {
                    warn!(link = %link, reason = %reason, "Reference link rejected");
                    report.failed.push(LinkFailure {
                        link: link.clone(),
                        reason,
                    });
                }
            }
        }

        let removed = self.db.clear_reference_chunks()?;
        self.db.insert_reference_chunks(&batch)?;
        crate::metrics::record_reference_chunks(batch.len());

        info!(
            removed,
            added = batch.len(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Replaced reference collection"
        );

        Ok(report)
    }

    /// Produce the embedded chunks for one link, or the reason it was rejected
    async fn prepare_link(
        &self,
        link: &str,
        config: &EmbeddingsConfig,
    ) -> Result<Vec<ReferenceChunk>, String> {
        let content = self
            .fetcher
            .fetch(link)
            .await
            .map_err(|e| format_error_chain(&e))?;

        if content.trim().chars().count() < config.min_content_chars {
            return Err("insufficient content".to_string());
        }

        let mut chunks = Vec::new();
        for (i, window) in chunk_text(&content, config.chunk_size, config.chunk_overlap)
            .into_iter()
            .enumerate()
        {
            let embedding = self
                .embedder
                .embed(&window)
                .await
                .map_err(|e| format_error_chain(&e))?;
            chunks.push(ReferenceChunk::new(link, i as u32, window, embedding));
        }
        Ok(chunks)
    }

    /// The `top_k` chunks nearest to `query`, each attributed to its link.
    ///
    /// An empty collection answers `None` without touching the embedder.
    pub async fn search(&self, query: &str, top_k: usize) -> ServiceResult<Option<ContextBlock>> {
        if !self.db.has_reference_chunks()? {
            return Ok(None);
        }

        let query_embedding = self.embedder.embed(query).await?;
        let hits = self.db.search_reference_chunks(&query_embedding, top_k)?;
        if hits.is_empty() {
            return Ok(None);
        }

        let chunks = hits
            .into_iter()
            .map(|(chunk, similarity)| {
                debug!(link = %chunk.source_link, similarity, "Vector hit");
                ContextChunk {
                    text: chunk.text,
                    source: Some(chunk.source_link),
                }
            })
            .collect();
        Ok(Some(ContextBlock::new(chunks)))
    }

    /// Links currently represented in the collection
    pub fn links(&self) -> ServiceResult<Vec<String>> {
        self.db.reference_links()
    }
}

/// Cascade tier over the reference collection
pub struct VectorTier {
    search: Arc<VectorSearch>,
    top_k: usize,
}

impl VectorTier {
    pub fn new(search: Arc<VectorSearch>, top_k: usize) -> Self {
        Self { search, top_k }
    }
}

#[async_trait]
impl RetrievalTier for VectorTier {
    fn kind(&self) -> TierKind {
        TierKind::Vector
    }

    async fn resolve(&self, query: &str) -> ServiceResult<TierResult> {
        Ok(self.search.search(query, self.top_k).await?.into())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::{RetrievalError, ServiceError};
    use std::collections::HashMap;

    /// Bag-of-letters embedding: deterministic and good enough to rank overlaps
    pub struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
            let mut v = vec![0.0f32; 26];
            for c in text.to_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    /// Serves canned page content; unknown links fail to fetch
    pub struct MapFetcher(pub HashMap<String, String>);

    impl MapFetcher {
        pub fn new(pages: &[(&str, &str)]) -> Self {
            Self(
                pages
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl ContentFetcher for MapFetcher {
        async fn fetch(&self, link: &str) -> ServiceResult<String> {
            self.0.get(link).cloned().ok_or_else(|| {
                ServiceError::Retrieval(RetrievalError::Upstream {
                    status: 404,
                    message: format!("no page at {}", link),
                })
            })
        }
    }
}
