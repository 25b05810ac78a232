//! OCR through the `tesseract` command line tool.

use std::fs::File;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use super::{OcrEngine, Page};
use crate::config::RuntimeConfig;
use crate::error::OcrError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs `tesseract <image> <outbase> -l <language>` once per page.
///
/// Command, language and the per-page deadline are read from the live
/// settings for every page.
pub struct TesseractEngine {
    runtime_config: Arc<RuntimeConfig>,
}

impl TesseractEngine {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> Self {
        Self { runtime_config }
    }

    fn engine_error(page: u32, message: impl Into<String>) -> OcrError {
        OcrError::Engine {
            page,
            message: message.into(),
        }
    }
}

/// Wait for `child` until `timeout` elapses; `None` means it was killed
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                warn!(error = %e, "Failed to kill timed-out OCR process");
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, page: &Page) -> Result<String, OcrError> {
        let dynamic = self.runtime_config.snapshot();
        let settings = &dynamic.ocr;

        let dir = tempfile::Builder::new()
            .prefix("scribe-page-")
            .tempdir()
            .map_err(|e| Self::engine_error(page.index, format!("temp dir: {}", e)))?;
        let image_path = dir.path().join("page.png");
        let output_base = dir.path().join("page");
        let stderr_path = dir.path().join("stderr.log");

        page.image
            .save_with_format(&image_path, image::ImageFormat::Png)
            .map_err(|e| Self::engine_error(page.index, format!("encode PNG: {}", e)))?;

        let stderr = File::create(&stderr_path)
            .map_err(|e| Self::engine_error(page.index, format!("stderr log: {}", e)))?;

        let mut child = Command::new(&settings.tesseract_cmd)
            .arg(&image_path)
            .arg(&output_base)
            .args(["-l", &settings.language])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|e| {
                Self::engine_error(
                    page.index,
                    format!("failed to run {}: {}", settings.tesseract_cmd, e),
                )
            })?;

        let status = wait_with_deadline(&mut child, settings.page_timeout())
            .map_err(|e| Self::engine_error(page.index, format!("wait: {}", e)))?
            .ok_or_else(|| {
                Self::engine_error(
                    page.index,
                    format!(
                        "{} timed out after {}s",
                        settings.tesseract_cmd, settings.page_timeout_secs
                    ),
                )
            })?;

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(Self::engine_error(
                page.index,
                format!("{} exited with {}: {}", settings.tesseract_cmd, status, stderr.trim()),
            ));
        }

        let text = std::fs::read_to_string(output_base.with_extension("txt"))
            .map_err(|e| Self::engine_error(page.index, format!("read output: {}", e)))?;

        Ok(text.trim().to_string())
    }
}
