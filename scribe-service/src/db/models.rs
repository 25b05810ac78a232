//! Row types stored in the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OCR'd page as stored in the corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusPage {
    pub document_id: String,
    pub page_index: u32,
    pub text: String,
}

/// A window of a fetched reference document together with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceChunk {
    pub id: String,
    pub source_link: String,
    pub chunk_index: u32,
    pub text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl ReferenceChunk {
    pub fn new(source_link: &str, chunk_index: u32, text: String, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_link: source_link.to_string(),
            chunk_index,
            text,
            embedding,
            created_at: Utc::now(),
        }
    }
}
