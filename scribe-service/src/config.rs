use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::ServiceResult;
use crate::ocr::FailurePolicy;
use crate::retrieval::TierKind;

// ==================== Static Configuration (startup-only) ====================

/// Static configuration that cannot be changed at runtime
/// These settings affect server binding or require restart to change
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("scribe.db")
    }

    pub fn allow_list_path(&self) -> PathBuf {
        self.data_dir.join("allowed_sites.json")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploaded_pdfs")
    }
}

// ==================== Dynamic Configuration (hot-reloadable) ====================

/// Dynamic configuration that can be updated at runtime via API
/// DB values override config file/env defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub web_search: WebSearchConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Text generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub base_url: String,

    /// Model identifier reported by /llm/models and in chat envelopes
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Ask for answers of at most five lines
    #[serde(default)]
    pub concise: bool,
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Embeddings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embeddings_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Window size in whitespace-delimited tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Fetched reference content shorter than this is rejected
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

/// OCR pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Fixed size of the OCR worker pool
    #[serde(default = "default_ocr_workers")]
    pub workers: usize,

    #[serde(default = "default_dpi")]
    pub dpi: u32,

    #[serde(default = "default_ocr_language")]
    pub language: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,

    /// A page still being recognized after this long fails
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
}

impl OcrConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

/// Retrieval cascade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Tiers tried in order; the first one with context wins
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierKind>,

    /// Upper bound on context entries handed to the prompt (K)
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Lexical matches required before the local tier answers
    #[serde(default = "default_min_local_matches")]
    pub min_local_matches: usize,

    #[serde(default = "default_vector_top_k")]
    pub vector_top_k: usize,
}

/// Web search API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_web_search_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_web_search_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
}

impl WebSearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,

    #[serde(default = "default_max_reference_links")]
    pub max_reference_links: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_url(),
            model: default_model(),
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            concise: false,
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: default_embeddings_url(),
            model: default_embedding_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_content_chars: default_min_content_chars(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            workers: default_ocr_workers(),
            dpi: default_dpi(),
            language: default_ocr_language(),
            failure_policy: FailurePolicy::default(),
            tesseract_cmd: default_tesseract_cmd(),
            page_timeout_secs: default_page_timeout_secs(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            max_chunks: default_max_chunks(),
            min_local_matches: default_min_local_matches(),
            vector_top_k: default_vector_top_k(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_web_search_url(),
            api_key: String::new(),
            timeout_secs: default_web_search_timeout_secs(),
            max_results: default_web_max_results(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_document_size_bytes: default_max_document_size(),
            max_reference_links: default_max_reference_links(),
        }
    }
}

// ==================== DynamicConfig Settings Keys ====================

/// All valid setting keys for DynamicConfig
pub const VALID_SETTING_KEYS: &[&str] = &[
    "generation.base_url",
    "generation.model",
    "generation.max_new_tokens",
    "generation.temperature",
    "generation.request_timeout_secs",
    "generation.concise",
    "embeddings.base_url",
    "embeddings.model",
    "embeddings.chunk_size",
    "embeddings.chunk_overlap",
    "embeddings.min_content_chars",
    "ocr.workers",
    "ocr.dpi",
    "ocr.language",
    "ocr.failure_policy",
    "ocr.tesseract_cmd",
    "ocr.page_timeout_secs",
    "retrieval.tiers",
    "retrieval.max_chunks",
    "retrieval.min_local_matches",
    "retrieval.vector_top_k",
    "web_search.base_url",
    "web_search.api_key",
    "web_search.timeout_secs",
    "web_search.max_results",
    "limits.max_document_size_bytes",
    "limits.max_reference_links",
];

impl DynamicConfig {
    /// Get all valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        VALID_SETTING_KEYS.iter().copied().collect()
    }

    /// Convert config to key-value map for API response
    pub fn to_key_value_map(&self) -> HashMap<String, serde_json::Value> {
        use serde_json::json;

        let tiers: Vec<String> = self
            .retrieval
            .tiers
            .iter()
            .map(|t| t.to_string())
            .collect();
        // The API key is never echoed back
        let api_key = if self.web_search.api_key.is_empty() {
            ""
        } else {
            "********"
        };

        [
            ("generation.base_url", json!(self.generation.base_url)),
            ("generation.model", json!(self.generation.model)),
            ("generation.max_new_tokens", json!(self.generation.max_new_tokens)),
            ("generation.temperature", json!(self.generation.temperature)),
            (
                "generation.request_timeout_secs",
                json!(self.generation.request_timeout_secs),
            ),
            ("generation.concise", json!(self.generation.concise)),
            ("embeddings.base_url", json!(self.embeddings.base_url)),
            ("embeddings.model", json!(self.embeddings.model)),
            ("embeddings.chunk_size", json!(self.embeddings.chunk_size)),
            ("embeddings.chunk_overlap", json!(self.embeddings.chunk_overlap)),
            (
                "embeddings.min_content_chars",
                json!(self.embeddings.min_content_chars),
            ),
            ("ocr.workers", json!(self.ocr.workers)),
            ("ocr.dpi", json!(self.ocr.dpi)),
            ("ocr.language", json!(self.ocr.language)),
            ("ocr.failure_policy", json!(self.ocr.failure_policy)),
            ("ocr.tesseract_cmd", json!(self.ocr.tesseract_cmd)),
            ("ocr.page_timeout_secs", json!(self.ocr.page_timeout_secs)),
            ("retrieval.tiers", json!(tiers)),
            ("retrieval.max_chunks", json!(self.retrieval.max_chunks)),
            (
                "retrieval.min_local_matches",
                json!(self.retrieval.min_local_matches),
            ),
            ("retrieval.vector_top_k", json!(self.retrieval.vector_top_k)),
            ("web_search.base_url", json!(self.web_search.base_url)),
            ("web_search.api_key", json!(api_key)),
            ("web_search.timeout_secs", json!(self.web_search.timeout_secs)),
            ("web_search.max_results", json!(self.web_search.max_results)),
            (
                "limits.max_document_size_bytes",
                json!(self.limits.max_document_size_bytes),
            ),
            (
                "limits.max_reference_links",
                json!(self.limits.max_reference_links),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Apply DB settings as overrides to this config
    pub fn merge_from_db(&mut self, db_settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in db_settings {
            self.apply_setting(key, value);
        }
    }

    /// Apply a single setting value
    fn apply_setting(&mut self, key: &str, value: &serde_json::Value) {
        match key {
            // Generation settings
            "generation.base_url" => {
                if let Some(v) = value.as_str() {
                    self.generation.base_url = v.to_string();
                }
            }
            "generation.model" => {
                if let Some(v) = value.as_str() {
                    self.generation.model = v.to_string();
                }
            }
            "generation.max_new_tokens" => {
                if let Some(v) = value.as_u64() {
                    self.generation.max_new_tokens = v as u32;
                }
            }
            "generation.temperature" => {
                if let Some(v) = value.as_f64() {
                    self.generation.temperature = v as f32;
                }
            }
            "generation.request_timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.generation.request_timeout_secs = v;
                }
            }
            "generation.concise" => {
                if let Some(v) = value.as_bool() {
                    self.generation.concise = v;
                }
            }

            // Embeddings settings
            "embeddings.base_url" => {
                if let Some(v) = value.as_str() {
                    self.embeddings.base_url = v.to_string();
                }
            }
            "embeddings.model" => {
                if let Some(v) = value.as_str() {
                    self.embeddings.model = v.to_string();
                }
            }
            "embeddings.chunk_size" => {
                if let Some(v) = value.as_u64() {
                    self.embeddings.chunk_size = v as usize;
                }
            }
            "embeddings.chunk_overlap" => {
                if let Some(v) = value.as_u64() {
                    self.embeddings.chunk_overlap = v as usize;
                }
            }
            "embeddings.min_content_chars" => {
                if let Some(v) = value.as_u64() {
                    self.embeddings.min_content_chars = v as usize;
                }
            }

            // OCR settings
            "ocr.workers" => {
                if let Some(v) = value.as_u64() {
                    self.ocr.workers = (v as usize).max(1);
                }
            }
            "ocr.dpi" => {
                if let Some(v) = value.as_u64() {
                    self.ocr.dpi = v as u32;
                }
            }
            "ocr.language" => {
                if let Some(v) = value.as_str() {
                    self.ocr.language = v.to_string();
                }
            }
            "ocr.failure_policy" => match serde_json::from_value(value.clone()) {
                Ok(policy) => self.ocr.failure_policy = policy,
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid ocr.failure_policy"),
            },
            "ocr.tesseract_cmd" => {
                if let Some(v) = value.as_str() {
                    self.ocr.tesseract_cmd = v.to_string();
                }
            }
            "ocr.page_timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.ocr.page_timeout_secs = v.max(1);
                }
            }

            // Retrieval settings
            "retrieval.tiers" => match serde_json::from_value::<Vec<TierKind>>(value.clone()) {
                Ok(tiers) if !tiers.is_empty() => self.retrieval.tiers = tiers,
                Ok(_) => tracing::warn!("Ignoring empty retrieval.tiers"),
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid retrieval.tiers"),
            },
            "retrieval.max_chunks" => {
                if let Some(v) = value.as_u64() {
                    self.retrieval.max_chunks = v as usize;
                }
            }
            "retrieval.min_local_matches" => {
                if let Some(v) = value.as_u64() {
                    self.retrieval.min_local_matches = v as usize;
                }
            }
            "retrieval.vector_top_k" => {
                if let Some(v) = value.as_u64() {
                    self.retrieval.vector_top_k = v as usize;
                }
            }

            // Web search settings
            "web_search.base_url" => {
                if let Some(v) = value.as_str() {
                    self.web_search.base_url = v.to_string();
                }
            }
            "web_search.api_key" => {
                if let Some(v) = value.as_str() {
                    self.web_search.api_key = v.to_string();
                }
            }
            "web_search.timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.web_search.timeout_secs = v;
                }
            }
            "web_search.max_results" => {
                if let Some(v) = value.as_u64() {
                    self.web_search.max_results = v as usize;
                }
            }

            // Limits settings
            "limits.max_document_size_bytes" => {
                if let Some(v) = value.as_u64() {
                    self.limits.max_document_size_bytes = v;
                }
            }
            "limits.max_reference_links" => {
                if let Some(v) = value.as_u64() {
                    self.limits.max_reference_links = v as usize;
                }
            }

            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }
}

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Runtime configuration manager
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap)
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    /// Build a runtime config directly (tests, embedding)
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Owned snapshot, for holding across await points
    pub fn snapshot(&self) -> Arc<DynamicConfig> {
        self.dynamic.load_full()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load config from all sources with DB overrides
    pub fn load(static_config: StaticConfig, db: &Database) -> ServiceResult<Self> {
        // Load dynamic config defaults from env/file, then apply DB overrides
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);

        Ok(Self::new(static_config, dynamic))
    }

    /// Rebuild dynamic config from file/env defaults + DB and swap atomically
    pub fn reload_from_db(&self, db: &Database) -> ServiceResult<()> {
        let mut dynamic = load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);
        self.update_dynamic(dynamic);
        Ok(())
    }
}

// ==================== Config Loading Functions ====================

fn config_sources() -> ServiceResult<Config> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("SCRIBE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| crate::error::ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| crate::error::ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without DB overrides)
fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    config_sources()?
        .try_deserialize()
        .map_err(|e| crate::error::ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_generation_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_model() -> String {
    "microsoft/Phi-3-mini-128k-instruct".to_string()
}

fn default_max_new_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_embeddings_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_min_content_chars() -> usize {
    20
}

fn default_ocr_workers() -> usize {
    4
}

fn default_dpi() -> u32 {
    200
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}

fn default_page_timeout_secs() -> u64 {
    120
}

fn default_tiers() -> Vec<TierKind> {
    vec![TierKind::Local, TierKind::Vector, TierKind::Web]
}

fn default_max_chunks() -> usize {
    3
}

fn default_min_local_matches() -> usize {
    1
}

fn default_vector_top_k() -> usize {
    3
}

fn default_web_search_url() -> String {
    "https://google.serper.dev".to_string()
}

fn default_web_search_timeout_secs() -> u64 {
    5
}

fn default_web_max_results() -> usize {
    3
}

fn default_max_document_size() -> u64 {
    104_857_600 // 100MB
}

fn default_max_reference_links() -> usize {
    3
}
