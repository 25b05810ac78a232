//! Multi-tier context retrieval.
//!
//! Each tier answers a query with [`TierResult::Found`] or
//! [`TierResult::NotFound`]. [`RetrievalCascade`] tries tiers in a fixed
//! order and returns the first context it gets; tiers are never merged.

mod lexical;
mod vector;
mod web;

pub use lexical::LocalTier;
pub use vector::{ContentFetcher, Embedder, IngestReport, LinkFailure, VectorSearch, VectorTier};
pub use web::{SearchApi, SearchHit, WebSearchFallback, WebTier};

#[cfg(test)]
pub(crate) use vector::test_support as vector_support;
#[cfg(test)]
pub(crate) use web::test_support as web_support;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::{ServiceResult, format_error_chain};

/// One piece of evidence handed to the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextChunk {
    pub text: String,
    /// Link the text came from; `None` for the local corpus
    pub source: Option<String>,
}

/// Ordered, bounded evidence produced by exactly one tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextBlock {
    pub chunks: Vec<ContextChunk>,
}

impl ContextBlock {
    pub fn new(chunks: Vec<ContextChunk>) -> Self {
        Self { chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Distinct source links in first-seen order
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for link in self.chunks.iter().filter_map(|c| c.source.as_ref()) {
            if !sources.contains(link) {
                sources.push(link.clone());
            }
        }
        sources
    }
}

/// Outcome of asking a single tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierResult {
    Found(ContextBlock),
    NotFound,
}

impl From<Option<ContextBlock>> for TierResult {
    fn from(block: Option<ContextBlock>) -> Self {
        match block {
            Some(block) if !block.is_empty() => TierResult::Found(block),
            _ => TierResult::NotFound,
        }
    }
}

/// Retrieval strategies, in the names used by `retrieval.tiers`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Local,
    Vector,
    Web,
}

/// One retrieval strategy behind the common cascade interface
#[async_trait]
pub trait RetrievalTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn resolve(&self, query: &str) -> ServiceResult<TierResult>;
}

/// Context chosen by the cascade, with the tier that produced it
#[derive(Debug, Clone)]
pub struct Resolved {
    pub block: ContextBlock,
    pub tier: TierKind,
    pub sources: Vec<String>,
}

/// Tries tiers in strict priority order
pub struct RetrievalCascade {
    tiers: Vec<Arc<dyn RetrievalTier>>,
}

impl RetrievalCascade {
    pub fn new(tiers: Vec<Arc<dyn RetrievalTier>>) -> Self {
        Self { tiers }
    }

    /// First tier with context wins. `Ok(None)` means every tier came up empty.
    ///
    /// A failing tier is logged and skipped, unless it is the last one, in
    /// which case its error is returned.
    pub async fn resolve(&self, query: &str) -> ServiceResult<Option<Resolved>> {
        let last = self.tiers.len().saturating_sub(1);

        for (position, tier) in self.tiers.iter().enumerate() {
            let kind = tier.kind();
            match tier.resolve(query).await {
                Ok(TierResult::Found(block)) => {
                    info!(tier = %kind, chunks = block.chunks.len(), "Retrieval tier found context");
                    crate::metrics::record_retrieval(Some(&kind.to_string()));
                    let sources = block.sources();
                    return Ok(Some(Resolved {
                        block,
                        tier: kind,
                        sources,
                    }));
                }
                Ok(TierResult::NotFound) => {
                    debug!(tier = %kind, "Retrieval tier found nothing");
                }
                Err(e) if position < last => {
                    warn!(tier = %kind, error = %format_error_chain(&e), "Retrieval tier failed, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        info!("No retrieval tier found context");
        crate::metrics::record_retrieval(None);
        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tier with a fixed answer that counts how often it is asked
    pub struct FixedTier {
        pub kind: TierKind,
        pub result: Option<ContextBlock>,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FixedTier {
        pub fn found(kind: TierKind, text: &str, source: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                result: Some(ContextBlock::new(vec![ContextChunk {
                    text: text.to_string(),
                    source: source.map(str::to_string),
                }])),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn empty(kind: TierKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                result: None,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(kind: TierKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                result: None,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RetrievalTier for FixedTier {
        fn kind(&self) -> TierKind {
            self.kind
        }

        async fn resolve(&self, _query: &str) -> ServiceResult<TierResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::error::RetrievalError::Upstream {
                    status: 500,
                    message: "tier down".to_string(),
                }
                .into());
            }
            Ok(self.result.clone().into())
        }
    }
}
