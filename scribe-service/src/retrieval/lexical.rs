//! Keyword search over the OCR corpus.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use super::{ContextBlock, ContextChunk, RetrievalTier, TierKind, TierResult};
use crate::corpus::{Corpus, is_page_marker, render_document};
use crate::error::ServiceResult;
use crate::ocr::Document;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "your", "with", "this", "that", "these",
        "those", "from", "was", "were", "what", "which", "who", "whom", "when", "where", "why",
        "how", "can", "could", "should", "would", "will", "shall", "does", "did", "has", "have",
        "had", "about", "into", "over", "there", "their", "they", "them", "then", "than", "its",
        "our", "out", "all", "any", "some", "tell", "please", "give", "show", "explain", "is",
        "of", "to", "in", "on", "at", "by", "an", "a", "me", "my", "it", "be", "do", "or", "as",
    ]
    .into_iter()
    .collect()
});

/// Lowercased query words that are not stop words and have at least 3 characters
pub fn keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Split corpus text into the chunks between page markers
fn page_chunks(corpus: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in corpus.lines() {
        if is_page_marker(line) {
            push_chunk(&mut chunks, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_chunk(&mut chunks, &current);

    chunks
}

fn push_chunk(chunks: &mut Vec<String>, lines: &[&str]) {
    let chunk = lines.join("\n").trim().to_string();
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
}

/// Substring keyword matching over page chunks
#[derive(Debug, Clone, Copy)]
pub struct LexicalLocalSearch {
    min_matches: usize,
}

impl LexicalLocalSearch {
    pub fn new(min_matches: usize) -> Self {
        Self { min_matches }
    }

    /// Chunks containing any keyword, in corpus order, capped at `max_chunks`.
    ///
    /// Returns `None` when the query has no keywords or fewer than the
    /// configured minimum of chunks match.
    pub fn search(&self, query: &str, corpus: &str, max_chunks: usize) -> Option<ContextBlock> {
        let keywords = keywords(query);
        if keywords.is_empty() {
            return None;
        }

        let matches: Vec<String> = page_chunks(corpus)
            .into_iter()
            .filter(|chunk| {
                let lowered = chunk.to_lowercase();
                keywords.iter().any(|k| lowered.contains(k.as_str()))
            })
            .collect();

        if matches.is_empty() || matches.len() < self.min_matches {
            return None;
        }

        let chunks = matches
            .into_iter()
            .take(max_chunks)
            .map(|text| ContextChunk { text, source: None })
            .collect();
        Some(ContextBlock::new(chunks))
    }
}

/// Where the local tier reads its text from
enum LocalSource {
    Corpus(Arc<Corpus>),
    /// Pages recognized by the current request only
    Document(String),
}

/// Cascade tier backed by the process-wide corpus
pub struct LocalTier {
    source: LocalSource,
    search: LexicalLocalSearch,
    max_chunks: usize,
}

impl LocalTier {
    pub fn new(corpus: Arc<Corpus>, min_matches: usize, max_chunks: usize) -> Self {
        Self {
            source: LocalSource::Corpus(corpus),
            search: LexicalLocalSearch::new(min_matches),
            max_chunks,
        }
    }

    /// Search only the given document, never the corpus
    pub fn over_document(document: &Document, min_matches: usize, max_chunks: usize) -> Self {
        Self {
            source: LocalSource::Document(render_document(document)),
            search: LexicalLocalSearch::new(min_matches),
            max_chunks,
        }
    }
}

#[async_trait]
impl RetrievalTier for LocalTier {
    fn kind(&self) -> TierKind {
        TierKind::Local
    }

    async fn resolve(&self, query: &str) -> ServiceResult<TierResult> {
        let block = match &self.source {
            LocalSource::Corpus(corpus) => {
                self.search.search(query, &corpus.text()?, self.max_chunks)
            }
            LocalSource::Document(text) => self.search.search(query, text, self.max_chunks),
        };
        Ok(block.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = "--- Page 1 ---\nAlpha centauri notes\n\n--- Page 2 ---\nBeta release plan\n\n--- Page 3 ---\nGamma ray bursts\n\n";

    #[test]
    fn test_keywords_drop_stop_words_and_short_tokens() {
        assert_eq!(
            keywords("What is the Gamma-ray of an ox?"),
            vec!["gamma".to_string(), "ray".to_string()]
        );
        assert!(keywords("is it on?").is_empty());
    }

    #[test]
    fn test_no_keywords_means_no_context() {
        let search = LexicalLocalSearch::new(1);
        assert!(search.search("what is it", CORPUS, 3).is_none());
    }

    #[test]
    fn test_threshold_controls_fall_through() {
        assert!(LexicalLocalSearch::new(2).search("gamma", CORPUS, 3).is_none());

        let block = LexicalLocalSearch::new(1).search("gamma", CORPUS, 3).unwrap();
        assert_eq!(block.chunks.len(), 1);
        assert_eq!(block.chunks[0].text, "Gamma ray bursts");
        assert_eq!(block.chunks[0].source, None);
    }

    #[test]
    fn test_substring_matching_keeps_corpus_order() {
        // "eta" is inside "Beta"; "alpha" matches page 1
        let block = LexicalLocalSearch::new(1)
            .search("eta alpha", CORPUS, 5)
            .unwrap();
        let texts: Vec<&str> = block.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha centauri notes", "Beta release plan"]);
    }

    #[test]
    fn test_max_chunks_caps_first_matches() {
        let block = LexicalLocalSearch::new(1)
            .search("alpha beta gamma", CORPUS, 2)
            .unwrap();
        assert_eq!(block.chunks.len(), 2);
        assert_eq!(block.chunks[1].text, "Beta release plan");
    }
}
