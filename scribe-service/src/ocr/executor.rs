//! Fixed-size worker pool for per-page OCR.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Document, OcrEngine, Page, PageText};
use crate::error::OcrError;

/// What to do when the engine fails on a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first failure fails the whole batch; unscheduled pages are skipped
    #[default]
    FailFast,
    /// Failed pages are reported on the side and the rest are returned
    BestEffort,
}

/// A page the engine could not recognize
#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub index: u32,
    pub reason: String,
}

/// Result of one executor run
#[derive(Debug, Default)]
pub struct OcrOutcome {
    pub document: Document,
    /// Always empty under [`FailurePolicy::FailFast`]
    pub failures: Vec<PageFailure>,
}

/// How one page went
enum PageRun {
    Done(PageText),
    Failed(u32, OcrError),
    /// Never handed to the engine: cancelled, or an earlier fail-fast failure
    Skipped,
}

/// Runs the OCR engine over pages on a fixed pool of threads
pub struct ParallelOcrExecutor {
    engine: Arc<dyn OcrEngine>,
    workers: usize,
    policy: FailurePolicy,
}

impl ParallelOcrExecutor {
    pub fn new(engine: Arc<dyn OcrEngine>, workers: usize, policy: FailurePolicy) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            policy,
        }
    }

    /// Recognize every page. Blocks the calling thread until all workers finish.
    pub fn run(&self, pages: Vec<Page>) -> Result<OcrOutcome, OcrError> {
        self.run_with_cancel(pages, &CancellationToken::new())
    }

    /// Like [`run`](Self::run), but stops handing out pages once `cancel` fires.
    ///
    /// Pages already being recognized are allowed to finish.
    pub fn run_with_cancel(
        &self,
        pages: Vec<Page>,
        cancel: &CancellationToken,
    ) -> Result<OcrOutcome, OcrError> {
        if pages.is_empty() {
            return Ok(OcrOutcome::default());
        }

        let total = pages.len();
        let worker_count = self.workers.min(total);
        let started = Instant::now();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("scribe-ocr-{}", i))
            .build()
            .map_err(|e| OcrError::Worker {
                message: format!("failed to start OCR pool: {}", e),
            })?;
        let stop = AtomicBool::new(false);

        debug!(pages = total, workers = worker_count, policy = ?self.policy, "Starting OCR run");

        let runs: Vec<PageRun> = pool.install(|| {
            pages
                .par_iter()
                .map(|page| self.recognize_page(page, cancel, &stop))
                .collect()
        });

        let mut texts = Vec::with_capacity(total);
        let mut errors = Vec::new();
        let mut skipped = 0usize;
        for run in runs {
            match run {
                PageRun::Done(text) => texts.push(text),
                PageRun::Failed(index, e) => errors.push((index, e)),
                PageRun::Skipped => skipped += 1,
            }
        }

        crate::metrics::record_ocr(started.elapsed().as_secs_f64(), texts.len(), errors.len());

        if cancel.is_cancelled() && skipped > 0 {
            info!(processed = total - skipped, total, "OCR run cancelled");
            return Err(OcrError::Cancelled);
        }

        let failures = match self.policy {
            FailurePolicy::FailFast => {
                if let Some((_, first)) = errors.into_iter().min_by_key(|(index, _)| *index) {
                    warn!(error = %first, "OCR run failed");
                    return Err(first);
                }
                Vec::new()
            }
            FailurePolicy::BestEffort => {
                let mut failures: Vec<PageFailure> = errors
                    .iter()
                    .map(|(index, e)| PageFailure {
                        index: *index,
                        reason: e.to_string(),
                    })
                    .collect();
                failures.sort_by_key(|f| f.index);
                if !failures.is_empty() {
                    warn!(failed = failures.len(), total, "OCR run completed with page failures");
                }
                failures
            }
        };

        let document = Document::from_unordered(texts);
        info!(
            pages = document.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "OCR run complete"
        );

        Ok(OcrOutcome { document, failures })
    }

    fn recognize_page(
        &self,
        page: &Page,
        cancel: &CancellationToken,
        stop: &AtomicBool,
    ) -> PageRun {
        if cancel.is_cancelled() || stop.load(Ordering::Acquire) {
            return PageRun::Skipped;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.engine.recognize(page)))
            .unwrap_or_else(|_| {
                Err(OcrError::Worker {
                    message: format!("OCR engine panicked on page {}", page.index),
                })
            });

        match result {
            Ok(text) => PageRun::Done(PageText {
                index: page.index,
                text,
            }),
            Err(e) => {
                if self.policy == FailurePolicy::FailFast {
                    stop.store(true, Ordering::Release);
                }
                PageRun::Failed(page.index, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Engine that returns canned text after a per-page delay
    struct ScriptedEngine {
        texts: HashMap<u32, &'static str>,
        delays_ms: HashMap<u32, u64>,
        failing: Vec<u32>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(texts: &[(u32, &'static str)]) -> Self {
            Self {
                texts: texts.iter().copied().collect(),
                delays_ms: HashMap::new(),
                failing: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl OcrEngine for ScriptedEngine {
        fn recognize(&self, page: &Page) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = self.delays_ms.get(&page.index) {
                std::thread::sleep(Duration::from_millis(*ms));
            }
            if self.failing.contains(&page.index) {
                return Err(OcrError::Engine {
                    page: page.index,
                    message: "unreadable".to_string(),
                });
            }
            Ok(self.texts.get(&page.index).copied().unwrap_or("").to_string())
        }
    }

    fn pages(n: u32) -> Vec<Page> {
        (1..=n)
            .map(|index| Page {
                index,
                image: DynamicImage::new_rgb8(1, 1),
            })
            .collect()
    }

    #[test]
    fn test_output_follows_page_order_not_completion_order() {
        // Page 2 finishes first, then 3, then 1
        let mut engine = ScriptedEngine::new(&[(1, "Alpha"), (2, "Beta"), (3, "Gamma")]);
        engine.delays_ms = HashMap::from([(1, 150), (2, 10), (3, 80)]);
        let executor = ParallelOcrExecutor::new(Arc::new(engine), 3, FailurePolicy::FailFast);

        let outcome = executor.run(pages(3)).unwrap();

        let pages: Vec<(u32, &str)> = outcome
            .document
            .pages()
            .iter()
            .map(|p| (p.index, p.text.as_str()))
            .collect();
        assert_eq!(pages, vec![(1, "Alpha"), (2, "Beta"), (3, "Gamma")]);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_many_pages_few_workers() {
        let texts: Vec<(u32, &'static str)> = (1..=25).map(|i| (i, "x")).collect();
        let engine = ScriptedEngine::new(&texts);
        let executor = ParallelOcrExecutor::new(Arc::new(engine), 4, FailurePolicy::FailFast);

        let outcome = executor.run(pages(25)).unwrap();

        let indices: Vec<u32> = outcome.document.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, (1..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_pages_is_empty_document() {
        let engine = ScriptedEngine::new(&[]);
        let executor = ParallelOcrExecutor::new(Arc::new(engine), 4, FailurePolicy::FailFast);

        let outcome = executor.run(Vec::new()).unwrap();
        assert!(outcome.document.is_empty());
    }

    #[test]
    fn test_fail_fast_reports_page_error() {
        let mut engine = ScriptedEngine::new(&[(1, "Alpha"), (2, "Beta"), (3, "Gamma")]);
        engine.failing = vec![2];
        let executor = ParallelOcrExecutor::new(Arc::new(engine), 1, FailurePolicy::FailFast);

        let err = executor.run(pages(3)).unwrap_err();
        assert!(matches!(err, OcrError::Engine { page: 2, .. }));
    }

    #[test]
    fn test_fail_fast_stops_scheduling_after_failure() {
        let mut engine = ScriptedEngine::new(&[]);
        engine.failing = vec![1];
        let engine = Arc::new(engine);
        let executor = ParallelOcrExecutor::new(engine.clone(), 1, FailurePolicy::FailFast);

        assert!(executor.run(pages(5)).is_err());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_best_effort_returns_successful_subset() {
        let mut engine = ScriptedEngine::new(&[(1, "Alpha"), (2, "Beta"), (3, "Gamma")]);
        engine.failing = vec![2];
        let executor = ParallelOcrExecutor::new(Arc::new(engine), 2, FailurePolicy::BestEffort);

        let outcome = executor.run(pages(3)).unwrap();

        let indices: Vec<u32> = outcome.document.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 2);
    }

    #[test]
    fn test_cancelled_before_start_drops_all_pages() {
        let engine = Arc::new(ScriptedEngine::new(&[(1, "Alpha")]));
        let executor = ParallelOcrExecutor::new(engine.clone(), 2, FailurePolicy::FailFast);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor.run_with_cancel(pages(3), &cancel).unwrap_err();
        assert!(matches!(err, OcrError::Cancelled));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_mid_run_finishes_in_flight_and_drops_the_rest() {
        let mut engine = ScriptedEngine::new(&[]);
        engine.delays_ms = (1..=5).map(|i| (i, 150)).collect();
        let engine = Arc::new(engine);
        let executor = ParallelOcrExecutor::new(engine.clone(), 1, FailurePolicy::FailFast);
        let cancel = CancellationToken::new();

        let canceller = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                while engine.calls.load(Ordering::SeqCst) == 0 {
                    std::thread::sleep(Duration::from_millis(5));
                }
                cancel.cancel();
            })
        };

        let err = executor.run_with_cancel(pages(5), &cancel).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, OcrError::Cancelled));
        let calls = engine.calls.load(Ordering::SeqCst);
        assert!(calls >= 1 && calls < 5, "engine ran {} pages", calls);
    }

    #[test]
    fn test_engine_panic_is_worker_error() {
        struct PanickingEngine;

        impl OcrEngine for PanickingEngine {
            fn recognize(&self, page: &Page) -> Result<String, OcrError> {
                if page.index == 2 {
                    panic!("engine crashed");
                }
                Ok("ok".to_string())
            }
        }

        let executor =
            ParallelOcrExecutor::new(Arc::new(PanickingEngine), 2, FailurePolicy::BestEffort);

        let outcome = executor.run(pages(3)).unwrap();

        let indices: Vec<u32> = outcome.document.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(outcome.failures[0].index, 2);
        assert!(outcome.failures[0].reason.contains("panicked"));
    }
}
