use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allow_list::AllowList;
use crate::config::RuntimeConfig;
use crate::corpus::Corpus;
use crate::db::Database;
use crate::embeddings::OllamaEmbedder;
use crate::error::{OcrError, ProcessingError, ServiceError, ServiceResult};
use crate::fetch::HttpFetcher;
use crate::generation::{Generator, TextGenerationClient, Tokenizer};
use crate::i18n::I18n;
use crate::ocr::{
    Document, OcrEngine, PageFailure, PageRasterizer, ParallelOcrExecutor, PdfiumRasterizer,
    TesseractEngine,
};
use crate::prompt::{PromptAssembler, Usage};
use crate::retrieval::{
    ContentFetcher, Embedder, IngestReport, LocalTier, RetrievalCascade, RetrievalTier,
    SearchApi, TierKind, VectorSearch, VectorTier, WebSearchFallback, WebTier,
};
use crate::web_search::SerperClient;

/// External collaborators the service delegates to
pub struct Collaborators {
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub ocr_engine: Arc<dyn OcrEngine>,
    pub embedder: Arc<dyn Embedder>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub search_api: Arc<dyn SearchApi>,
    pub generator: Arc<dyn Generator>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

/// OCR result of one PDF, plus the answer to an optional question about it
#[derive(Debug)]
pub struct Extraction {
    pub document_id: String,
    pub document: Document,
    pub failures: Vec<PageFailure>,
    pub answer: Option<String>,
}

/// Result of answering a chat query
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Answered {
        reply: String,
        sources: Vec<String>,
        tier: TierKind,
        usage: Usage,
    },
    /// Every retrieval tier came up empty
    NoContext,
}

/// Main service coordinator
pub struct ScribeService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub corpus: Arc<Corpus>,
    pub allow_list: Arc<AllowList>,
    pub vector: Arc<VectorSearch>,
    pub i18n: Arc<I18n>,
    rasterizer: Arc<dyn PageRasterizer>,
    ocr_engine: Arc<dyn OcrEngine>,
    search_api: Arc<dyn SearchApi>,
    generator: Arc<dyn Generator>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ScribeService {
    /// Create a service wired to the real backends
    /// Accepts a pre-opened database so that RuntimeConfig can load settings from it
    pub async fn new(db: Arc<Database>, runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        info!("Initializing Scribe service");

        let dynamic = runtime_config.snapshot();

        let generation = Arc::new(TextGenerationClient::new(runtime_config.clone())?);
        if generation.health_check().await {
            info!(url = %dynamic.generation.base_url, "Generation backend is available");
        } else {
            warn!(url = %dynamic.generation.base_url, "Generation backend is not available");
        }

        let embedder = Arc::new(OllamaEmbedder::new(runtime_config.clone())?);
        embedder.verify().await;

        let collaborators = Collaborators {
            rasterizer: Arc::new(PdfiumRasterizer::new()),
            ocr_engine: Arc::new(TesseractEngine::new(runtime_config.clone())),
            embedder,
            fetcher: Arc::new(HttpFetcher::new()?),
            search_api: Arc::new(SerperClient::new(runtime_config.clone())?),
            generator: generation.clone(),
            tokenizer: generation,
        };

        Self::with_collaborators(db, runtime_config, collaborators)
    }

    /// Create a service around the given collaborators
    pub fn with_collaborators(
        db: Arc<Database>,
        runtime_config: Arc<RuntimeConfig>,
        collaborators: Collaborators,
    ) -> ServiceResult<Self> {
        let allow_list = Arc::new(AllowList::load(
            &runtime_config.static_config.storage.allow_list_path(),
        )?);

        Ok(Self {
            corpus: Arc::new(Corpus::new(db.clone())),
            vector: Arc::new(VectorSearch::new(
                db.clone(),
                collaborators.embedder,
                collaborators.fetcher,
            )),
            allow_list,
            i18n: Arc::new(I18n::new()),
            rasterizer: collaborators.rasterizer,
            ocr_engine: collaborators.ocr_engine,
            search_api: collaborators.search_api,
            generator: collaborators.generator,
            tokenizer: collaborators.tokenizer,
            runtime_config,
            db,
        })
    }

    /// Update settings and hot-reload affected components
    pub async fn update_settings(&self, updates: HashMap<String, serde_json::Value>) -> ServiceResult<()> {
        self.db.set_settings(updates)?;
        self.runtime_config.reload_from_db(&self.db)?;

        // Per-request components (OCR pool, cascade, prompt) pick up new values immediately.
        // Backend URLs and the OCR engine binary are read once at startup.
        Ok(())
    }

    /// Model identifier reported to chat clients
    pub fn model_id(&self) -> String {
        self.runtime_config.dynamic().generation.model.clone()
    }

    pub async fn generation_available(&self) -> bool {
        self.generator.is_available().await
    }

    // ==================== Document ingestion ====================

    /// Rasterize and OCR a PDF, append its pages to the corpus and optionally answer a question over it
    pub async fn extract_pdf(
        &self,
        pdf: Vec<u8>,
        document_id: &str,
        question: Option<&str>,
    ) -> ServiceResult<Extraction> {
        let dynamic = self.runtime_config.snapshot();
        let max = dynamic.limits.max_document_size_bytes;
        if pdf.len() as u64 > max {
            return Err(ProcessingError::FileTooLarge {
                size: pdf.len() as u64,
                max,
            }
            .into());
        }

        let rasterizer = self.rasterizer.clone();
        let dpi = dynamic.ocr.dpi;
        let pages = tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, dpi))
            .await
            .map_err(|e| OcrError::Worker {
                message: format!("rasterizer task failed: {}", e),
            })??;

        if pages.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: self.i18n.get("en", "error-no-pages", None),
            });
        }
        debug!(document = %document_id, pages = pages.len(), "Rasterized PDF");

        // Dropping this request future cancels pages not yet handed to a worker
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let executor = ParallelOcrExecutor::new(
            self.ocr_engine.clone(),
            dynamic.ocr.workers,
            dynamic.ocr.failure_policy,
        );
        let outcome = tokio::task::spawn_blocking(move || executor.run_with_cancel(pages, &cancel))
            .await
            .map_err(|e| OcrError::Worker {
                message: format!("OCR task failed: {}", e),
            })??;
        guard.disarm();

        if !outcome.document.is_empty() {
            self.corpus.append(document_id, &outcome.document)?;
        }

        let answer = match question.map(str::trim).filter(|q| !q.is_empty()) {
            Some(question) => {
                let tier: Arc<dyn RetrievalTier> = Arc::new(LocalTier::over_document(
                    &outcome.document,
                    dynamic.retrieval.min_local_matches,
                    dynamic.retrieval.max_chunks,
                ));
                match self
                    .answer_with(RetrievalCascade::new(vec![tier]), question, false)
                    .await?
                {
                    ChatOutcome::Answered { reply, .. } => Some(reply),
                    ChatOutcome::NoContext => None,
                }
            }
            None => None,
        };

        Ok(Extraction {
            document_id: document_id.to_string(),
            document: outcome.document,
            failures: outcome.failures,
            answer,
        })
    }

    /// Document id for an inline payload without a filename
    pub fn inline_document_id(pdf: &[u8]) -> String {
        let digest = Sha256::digest(pdf);
        let hex: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
        format!("inline-{}", hex)
    }

    fn uploads_dir(&self) -> PathBuf {
        self.runtime_config.static_config.storage.uploads_dir()
    }

    /// Store an uploaded PDF, returning the name it was saved under
    pub async fn store_upload(&self, filename: &str, pdf: &[u8]) -> ServiceResult<String> {
        let name = pdf_file_name(filename)?;
        let max = self.runtime_config.dynamic().limits.max_document_size_bytes;
        if pdf.len() as u64 > max {
            return Err(ProcessingError::FileTooLarge {
                size: pdf.len() as u64,
                max,
            }
            .into());
        }

        let dir = self.uploads_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(ProcessingError::Io)?;
        tokio::fs::write(dir.join(&name), pdf)
            .await
            .map_err(ProcessingError::Io)?;

        info!(filename = %name, size = pdf.len(), "Stored uploaded PDF");
        Ok(name)
    }

    /// OCR a previously uploaded PDF into the corpus
    pub async fn extract_uploaded(&self, filename: &str) -> ServiceResult<Extraction> {
        let name = pdf_file_name(filename)?;
        let path = self.uploads_dir().join(&name);

        let pdf = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServiceError::DocumentNotFound { filename: name });
            }
            Err(e) => return Err(ProcessingError::Io(e).into()),
        };

        self.extract_pdf(pdf, &name, None).await
    }

    // ==================== Chat ====================

    /// The cascade in the configured tier order
    fn cascade(&self) -> RetrievalCascade {
        let dynamic = self.runtime_config.dynamic();
        let retrieval = &dynamic.retrieval;

        let tiers = retrieval
            .tiers
            .iter()
            .map(|kind| -> Arc<dyn RetrievalTier> {
                match kind {
                    TierKind::Local => Arc::new(LocalTier::new(
                        self.corpus.clone(),
                        retrieval.min_local_matches,
                        retrieval.max_chunks,
                    )),
                    TierKind::Vector => Arc::new(VectorTier::new(
                        self.vector.clone(),
                        retrieval.vector_top_k.min(retrieval.max_chunks),
                    )),
                    TierKind::Web => Arc::new(WebTier::new(
                        Arc::new(WebSearchFallback::new(
                            self.search_api.clone(),
                            dynamic.web_search.max_results.min(retrieval.max_chunks),
                            dynamic.web_search.timeout(),
                        )),
                        self.allow_list.clone(),
                    )),
                }
            })
            .collect();

        RetrievalCascade::new(tiers)
    }

    /// Answer a query from the best available evidence
    pub async fn answer(&self, query: &str, with_usage: bool) -> ServiceResult<ChatOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: self.i18n.get("en", "error-empty-message", None),
            });
        }
        self.answer_with(self.cascade(), query, with_usage).await
    }

    async fn answer_with(
        &self,
        cascade: RetrievalCascade,
        query: &str,
        with_usage: bool,
    ) -> ServiceResult<ChatOutcome> {
        let Some(resolved) = cascade.resolve(query).await? else {
            return Ok(ChatOutcome::NoContext);
        };

        let assembler = PromptAssembler::new(self.runtime_config.dynamic().generation.concise);
        let prompt = assembler.assemble(query, &resolved.block);
        let raw = self.generator.generate(&prompt).await?;
        let reply = PromptAssembler::parse_reply(&raw, &prompt)?;

        let usage = if with_usage {
            PromptAssembler::usage(self.tokenizer.as_ref(), &prompt, &reply).await?
        } else {
            Usage::default()
        };

        info!(
            tier = %resolved.tier,
            sources = resolved.sources.len(),
            reply_chars = reply.len(),
            "Generated reply"
        );

        Ok(ChatOutcome::Answered {
            reply,
            sources: resolved.sources,
            tier: resolved.tier,
            usage,
        })
    }

    // ==================== Admin ====================

    pub fn allowed_sites(&self) -> Vec<String> {
        self.allow_list.sites()
    }

    pub fn add_allowed_site(&self, site: &str) -> ServiceResult<Vec<String>> {
        let site = site.trim();
        if site.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: self.i18n.get("en", "error-empty-site", None),
            });
        }
        self.allow_list.add(site)
    }

    /// Replace the reference collection with the content of 1..=N links
    pub async fn set_reference_links(&self, links: &[String]) -> ServiceResult<IngestReport> {
        let dynamic = self.runtime_config.snapshot();
        let links: Vec<String> = links
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if links.is_empty() || links.len() > dynamic.limits.max_reference_links {
            return Err(ServiceError::InvalidRequest {
                message: self.i18n.get("en", "error-links-count", None),
            });
        }

        self.vector.ingest(&links, &dynamic.embeddings).await
    }
}

/// Sanitize a string for use as a filename
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Final path component of a client-supplied name, sanitized; must be a PDF
pub fn pdf_file_name(filename: &str) -> ServiceResult<String> {
    let base = Path::new(filename.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let name = sanitize_filename(base);

    if !name.to_lowercase().ends_with(".pdf") || name.len() <= ".pdf".len() {
        return Err(ProcessingError::UnsupportedFormat {
            format: Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string(),
        }
        .into());
    }
    Ok(name)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::test_support::runtime_config;
    use crate::generation::test_support::{EchoGenerator, WordTokenizer};
    use crate::ocr::Page;
    use crate::retrieval::vector_support::{LetterEmbedder, MapFetcher};
    use crate::retrieval::web_support::CannedSearch;
    use crate::retrieval::SearchHit;
    use image::DynamicImage;

    /// Rasterizer whose "PDF" is UTF-8 page texts separated by form feeds
    pub struct FormFeedRasterizer;

    impl PageRasterizer for FormFeedRasterizer {
        fn rasterize(&self, pdf: &[u8], _dpi: u32) -> Result<Vec<Page>, OcrError> {
            let text = String::from_utf8_lossy(pdf);
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(text
                .split('\u{c}')
                .enumerate()
                .map(|(i, page)| {
                    // Pixel content is irrelevant; the engine looks pages up by index
                    Page {
                        index: i as u32 + 1,
                        image: DynamicImage::new_luma8(page.len().max(1) as u32, 1),
                    }
                })
                .collect())
        }
    }

    /// Engine that reads back page texts registered by index
    pub struct LookupEngine(pub HashMap<u32, String>);

    impl OcrEngine for LookupEngine {
        fn recognize(&self, page: &Page) -> Result<String, OcrError> {
            self.0.get(&page.index).cloned().ok_or(OcrError::Engine {
                page: page.index,
                message: "no text".to_string(),
            })
        }
    }

    pub struct Harness {
        pub _dir: tempfile::TempDir,
        pub service: Arc<ScribeService>,
        pub generator: Arc<EchoGenerator>,
        pub search: Arc<CannedSearch>,
    }

    /// Service over stub collaborators; `pages` are the OCR texts for page 1, 2, ...
    pub fn harness(pages: &[&str], web_hits: Vec<SearchHit>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("scribe.db")).unwrap());
        let runtime_config = runtime_config(dir.path());

        let generator = Arc::new(EchoGenerator::new("generated answer"));
        let search = Arc::new(CannedSearch::new(web_hits));
        let texts = pages
            .iter()
            .enumerate()
            .map(|(i, t)| (i as u32 + 1, t.to_string()))
            .collect();

        let collaborators = Collaborators {
            rasterizer: Arc::new(FormFeedRasterizer),
            ocr_engine: Arc::new(LookupEngine(texts)),
            embedder: Arc::new(LetterEmbedder),
            fetcher: Arc::new(MapFetcher::new(&[(
                "https://ref.example",
                "Reference material about sailing ships and harbours.",
            )])),
            search_api: search.clone(),
            generator: generator.clone(),
            tokenizer: Arc::new(WordTokenizer),
        };

        let service = Arc::new(
            ScribeService::with_collaborators(db, runtime_config, collaborators).unwrap(),
        );
        Harness {
            _dir: dir,
            service,
            generator,
            search,
        }
    }

    /// A fake PDF with one page per entry
    pub fn pdf(pages: &[&str]) -> Vec<u8> {
        pages.join("\u{c}").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{harness, pdf};
    use super::*;
    use crate::ocr::PageText;
    use crate::retrieval::web_support::hit;

    #[tokio::test]
    async fn test_extract_orders_pages_and_feeds_corpus() {
        let h = harness(&["Alpha", "Beta", "Gamma"], vec![]);

        let extraction = h
            .service
            .extract_pdf(pdf(&["a", "b", "c"]), "greek.pdf", None)
            .await
            .unwrap();

        let texts: Vec<&str> = extraction
            .document
            .pages()
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Alpha", "Beta", "Gamma"]);
        assert!(extraction.answer.is_none());
        assert_eq!(h.service.corpus.page_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_extract_with_question_answers_from_document() {
        let h = harness(&["Alpha", "Beta", "Gamma rays"], vec![]);

        let extraction = h
            .service
            .extract_pdf(pdf(&["a", "b", "c"]), "greek.pdf", Some("what about gamma?"))
            .await
            .unwrap();

        assert_eq!(extraction.answer.as_deref(), Some("generated answer"));
        let prompts = h.generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Gamma rays"));
        assert!(!prompts[0].contains("Beta"));
    }

    #[tokio::test]
    async fn test_question_ignores_earlier_generations_of_same_file() {
        let h = harness(&["Alpha"], vec![]);
        let earlier = Document::from_unordered(vec![PageText {
            index: 1,
            text: "Zebra migration notes".into(),
        }]);
        h.service.corpus.append("report.pdf", &earlier).unwrap();

        let extraction = h
            .service
            .extract_pdf(pdf(&["a"]), "report.pdf", Some("zebra migration"))
            .await
            .unwrap();

        assert!(extraction.answer.is_none());
        assert!(h.generator.prompts.lock().unwrap().is_empty());
        // Both generations stay in the corpus
        assert_eq!(h.service.corpus.page_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_pdf_is_client_error() {
        let h = harness(&[], vec![]);
        let err = h.service.extract_pdf(Vec::new(), "empty.pdf", None).await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Invalid request: No images extracted from PDF.");
    }

    #[tokio::test]
    async fn test_local_tier_wins_over_web() {
        let h = harness(&["The harbour master keeps the logbook"], vec![hit(
            "https://web.example",
            "web snippet",
        )]);
        h.service
            .extract_pdf(pdf(&["x"]), "log.pdf", None)
            .await
            .unwrap();

        let outcome = h.service.answer("Who keeps the logbook?", true).await.unwrap();

        match outcome {
            ChatOutcome::Answered {
                tier,
                sources,
                usage,
                ..
            } => {
                assert_eq!(tier, TierKind::Local);
                assert!(sources.is_empty());
                assert!(usage.total_tokens > 0);
            }
            ChatOutcome::NoContext => panic!("expected an answer"),
        }
        assert!(h.search.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_is_no_context() {
        let h = harness(&[], vec![]);
        let outcome = h.service.answer("anything relevant?", true).await.unwrap();
        assert!(matches!(outcome, ChatOutcome::NoContext));
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_web_answer_carries_sources() {
        let h = harness(&[], vec![hit("https://news.example/a", "fresh news")]);
        let outcome = h.service.answer("latest news", false).await.unwrap();
        match outcome {
            ChatOutcome::Answered { sources, tier, .. } => {
                assert_eq!(tier, TierKind::Web);
                assert_eq!(sources, vec!["https://news.example/a".to_string()]);
            }
            ChatOutcome::NoContext => panic!("expected an answer"),
        }
    }

    #[tokio::test]
    async fn test_upload_then_extract() {
        let h = harness(&["Stored page"], vec![]);
        let name = h
            .service
            .store_upload("../../My Report.PDF", &pdf(&["x"]))
            .await
            .unwrap();
        assert_eq!(name, "My_Report.PDF");

        let extraction = h.service.extract_uploaded(&name).await.unwrap();
        assert_eq!(extraction.document.len(), 1);

        let err = h.service.extract_uploaded("missing.pdf").await.unwrap_err();
        assert_eq!(err.error_code(), "document_not_found");
    }

    #[tokio::test]
    async fn test_non_pdf_upload_rejected() {
        let h = harness(&[], vec![]);
        let err = h.service.store_upload("notes.txt", b"hi").await.unwrap_err();
        assert_eq!(err.error_code(), "unsupported_format");
    }

    #[tokio::test]
    async fn test_reference_link_count_is_bounded() {
        let h = harness(&[], vec![]);
        assert!(h.service.set_reference_links(&[]).await.is_err());

        let too_many: Vec<String> = (0..4).map(|i| format!("https://{}.example", i)).collect();
        let err = h.service.set_reference_links(&too_many).await.unwrap_err();
        assert!(err.is_client_error());

        let report = h
            .service
            .set_reference_links(&["https://ref.example".to_string()])
            .await
            .unwrap();
        assert_eq!(report.succeeded.len(), 1);
    }

    #[test]
    fn test_inline_document_id_is_stable() {
        let a = ScribeService::inline_document_id(b"same bytes");
        assert_eq!(a, ScribeService::inline_document_id(b"same bytes"));
        assert!(a.starts_with("inline-"));
        assert_eq!(a.len(), "inline-".len() + 12);
    }
}
