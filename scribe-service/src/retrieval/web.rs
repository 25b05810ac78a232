//! Live web search, constrained to the allow-listed domains.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ContextBlock, ContextChunk, RetrievalTier, TierKind, TierResult};
use crate::allow_list::AllowList;
use crate::error::{ServiceResult, format_error_chain};

/// One organic result from the search API
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Ranked web search
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, query: &str) -> ServiceResult<Vec<SearchHit>>;
}

/// Append `(site:a OR site:b ...)` when an allow-list is configured
fn scoped_query(query: &str, allow_list: &[String]) -> String {
    if allow_list.is_empty() {
        return query.to_string();
    }
    let sites = allow_list
        .iter()
        .map(|domain| format!("site:{}", domain))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("{} ({})", query, sites)
}

/// Web search tier logic; every failure degrades to "no results"
pub struct WebSearchFallback {
    api: Arc<dyn SearchApi>,
    max_results: usize,
    timeout: Duration,
}

impl WebSearchFallback {
    pub fn new(api: Arc<dyn SearchApi>, max_results: usize, timeout: Duration) -> Self {
        Self {
            api,
            max_results,
            timeout,
        }
    }

    pub async fn search(&self, query: &str, allow_list: &[String]) -> Option<ContextBlock> {
        let scoped = scoped_query(query, allow_list);
        debug!(query = %scoped, "Web search");

        let hits = match tokio::time::timeout(self.timeout, self.api.search(&scoped)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %format_error_chain(&e), "Web search failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Web search timed out");
                return None;
            }
        };

        // The site: operators are only a hint to the API; this filter is authoritative
        let chunks: Vec<ContextChunk> = hits
            .into_iter()
            .filter(|hit| {
                allow_list.is_empty()
                    || allow_list.iter().any(|domain| hit.link.contains(domain.as_str()))
            })
            .filter(|hit| !hit.snippet.trim().is_empty())
            .take(self.max_results)
            .map(|hit| ContextChunk {
                text: format!("{}\n{}", hit.title, hit.snippet).trim().to_string(),
                source: Some(hit.link),
            })
            .collect();

        if chunks.is_empty() {
            None
        } else {
            Some(ContextBlock::new(chunks))
        }
    }
}

/// Cascade tier reading the current allow-list on every query
pub struct WebTier {
    fallback: Arc<WebSearchFallback>,
    allow_list: Arc<AllowList>,
}

impl WebTier {
    pub fn new(fallback: Arc<WebSearchFallback>, allow_list: Arc<AllowList>) -> Self {
        Self {
            fallback,
            allow_list,
        }
    }
}

#[async_trait]
impl RetrievalTier for WebTier {
    fn kind(&self) -> TierKind {
        TierKind::Web
    }

    async fn resolve(&self, query: &str) -> ServiceResult<TierResult> {
        let sites = self.allow_list.sites();
        Ok(self.fallback.search(query, &sites).await.into())
    }
}
