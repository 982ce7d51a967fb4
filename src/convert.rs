//! Conversion entry points and the pipeline coordinator.
//!
//! A run moves through a fixed sequence of states:
//!
//! ```text
//! Idle ─▶ Decoding ─▶ Rendering ─▶ Encoding ─▶ Materializing ─▶ Done
//!            └───────────┴────────────┴─────────────┴──────────▶ Failed
//! ```
//!
//! Every transition is validated, logged, and reported to the progress
//! callback. A page that fails to render or encode is skipped; only decode
//! and write failures end the run in `Failed`.
//!
//! ## Empty output
//!
//! A document with no selected pages, or whose pages all failed, still ends
//! in `Done` with an empty manifest and no output folder. Call
//! [`ConversionOutput::into_result`] to treat that as an error.

use crate::config::{ConversionConfig, OutputFormat};
use crate::embed::extract_link_target;
use crate::error::{PageError, Pdf2ImgError};
use crate::output::{ConversionOutput, ConversionStats, DocumentMetadata, PageResult};
use crate::pipeline::encode::{encode_page, EncodedPage};
use crate::pipeline::engine::{DocumentDecoder, PdfiumDecoder, RenderEngine};
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::materialize::{materialize, MaterializeOptions, OutputBatch};
use crate::pipeline::render::{render_pages, RasterPage, RenderOptions, RenderReport};
use crate::pipeline::storage::{FsStorage, Storage};
use crate::pipeline::surface::{create_backend, BackendKind};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

// ── State machine ────────────────────────────────────────────────────────

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Decoding,
    Rendering,
    Encoding,
    Materializing,
    Done,
    Failed,
}

impl PipelineState {
    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Decoding)
                | (Decoding, Rendering)
                | (Rendering, Encoding)
                | (Encoding, Materializing)
                | (Materializing, Done)
                | (Decoding | Rendering | Encoding | Materializing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// Validated state holder shared between the async side and the render thread.
struct StateTracker {
    state: Mutex<PipelineState>,
    progress: ProgressCallback,
}

impl StateTracker {
    fn new(progress: ProgressCallback) -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            progress,
        }
    }

    fn advance(&self, next: PipelineState) -> Result<(), Pdf2ImgError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.can_transition_to(next) {
                return Err(Pdf2ImgError::Internal(format!(
                    "invalid pipeline transition {:?} → {:?}",
                    *state, next
                )));
            }
            debug!("Pipeline state: {:?} → {:?}", *state, next);
            *state = next;
        }
        self.progress.on_state_change(next);
        Ok(())
    }

    fn fail(&self, error: &Pdf2ImgError) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.can_transition_to(PipelineState::Failed) {
                return;
            }
            warn!("Pipeline failed in {:?}: {}", *state, error);
            *state = PipelineState::Failed;
        }
        self.progress.on_state_change(PipelineState::Failed);
    }

    fn current(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────

/// Decode → render → encode → materialize for one document at a time.
///
/// Holds no state between runs; one `Pipeline` can serve many documents.
pub struct Pipeline {
    decoder: Arc<dyn DocumentDecoder>,
    storage: Arc<dyn Storage>,
    config: ConversionConfig,
}

impl Pipeline {
    /// pdfium rendering into the filesystem under `config.output_root`.
    pub fn new(config: ConversionConfig) -> Self {
        let decoder = Arc::new(PdfiumDecoder::new(config.pdfium_library.clone()));
        let storage = Arc::new(FsStorage::new(config.output_root.clone()));
        Self::with_parts(decoder, storage, config)
    }

    /// Use a custom decoder and storage.
    pub fn with_parts(
        decoder: Arc<dyn DocumentDecoder>,
        storage: Arc<dyn Storage>,
        config: ConversionConfig,
    ) -> Self {
        Self {
            decoder,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Print one document.
    ///
    /// # Errors
    /// Only fatal errors: cancellation, an undecodable document, no free
    /// output folder, or a failed write. Per-page failures are reported in
    /// [`ConversionOutput::pages`].
    pub async fn run(&self, document: SourceDocument) -> Result<ConversionOutput, Pdf2ImgError> {
        if self
            .config
            .cancel
            .as_ref()
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
        {
            info!("Conversion of '{}' cancelled before start", document.name);
            return Err(Pdf2ImgError::Cancelled);
        }

        let progress: ProgressCallback = self
            .config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let tracker = Arc::new(StateTracker::new(progress));

        let result = self.run_stages(&tracker, document).await;
        if let Err(ref e) = result {
            tracker.fail(e);
        }
        result
    }

    async fn run_stages(
        &self,
        tracker: &Arc<StateTracker>,
        document: SourceDocument,
    ) -> Result<ConversionOutput, Pdf2ImgError> {
        let total_start = Instant::now();
        let config = &self.config;
        let progress = Arc::clone(&tracker.progress);
        let base_name = document.name.clone();
        info!(
            "Starting conversion: {} ({} bytes)",
            base_name,
            document.bytes.len()
        );

        // ── Decode + render ──────────────────────────────────────────────
        tracker.advance(PipelineState::Decoding)?;
        let render_start = Instant::now();
        let report = self.render(tracker, document).await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        info!(
            "Rendered {}/{} pages in {}ms",
            report.pages.len(),
            report.selected.len(),
            render_duration_ms
        );

        let total_pages = report.total_pages;
        let selected = report.selected.clone();
        let total = selected.len();
        let mut errors: HashMap<usize, PageError> = report
            .failures
            .iter()
            .map(|e| (e.page(), e.clone()))
            .collect();
        let dims: HashMap<usize, (u32, u32)> = report
            .pages
            .iter()
            .map(|p| (p.page_num, (p.width, p.height)))
            .collect();

        // ── Encode ───────────────────────────────────────────────────────
        tracker.advance(PipelineState::Encoding)?;
        let encode_start = Instant::now();
        let mut encoded = Vec::with_capacity(report.pages.len());
        for result in self.encode(report).await {
            match result {
                Ok(page) => encoded.push(page),
                Err(e) => {
                    warn!("{}", e);
                    progress.on_page_error(e.page(), total, &e.to_string());
                    errors.insert(e.page(), e);
                }
            }
        }
        let encode_duration_ms = encode_start.elapsed().as_millis() as u64;
        let sizes: HashMap<usize, usize> = encoded.iter().map(|p| (p.page_num, p.len())).collect();
        let written_nums: Vec<usize> = encoded.iter().map(|p| p.page_num).collect();

        // ── Materialize ──────────────────────────────────────────────────
        tracker.advance(PipelineState::Materializing)?;
        let write_start = Instant::now();
        let manifest = materialize(
            OutputBatch::new(&base_name, &config.image_folder, encoded),
            self.storage.as_ref(),
            &config.naming,
            MaterializeOptions {
                concurrency: config.concurrency,
                max_namespace_attempts: config.max_namespace_attempts,
            },
            progress.as_ref(),
        )
        .await?;
        let write_duration_ms = write_start.elapsed().as_millis() as u64;

        let files: HashMap<usize, String> = written_nums
            .into_iter()
            .zip(manifest.files.iter().cloned())
            .collect();

        let pages: Vec<PageResult> = selected
            .iter()
            .map(|&page_num| {
                let (width, height) = dims.get(&page_num).copied().unwrap_or((0, 0));
                PageResult {
                    page_num,
                    file: files.get(&page_num).cloned(),
                    width,
                    height,
                    bytes: sizes.get(&page_num).copied().unwrap_or(0),
                    error: errors.remove(&page_num),
                }
            })
            .collect();

        let written = manifest.len();
        let bytes_written: u64 = pages
            .iter()
            .filter(|p| p.is_written())
            .map(|p| p.bytes as u64)
            .sum();
        let stats = ConversionStats {
            total_pages,
            selected_pages: total,
            written_pages: written,
            skipped_pages: total - written,
            bytes_written,
            render_duration_ms,
            encode_duration_ms,
            write_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        tracker.advance(PipelineState::Done)?;
        if written == 0 && total > 0 {
            warn!("All {} selected pages of '{}' failed", total, base_name);
        }
        info!(
            "Conversion complete: {}/{} pages written, {}ms total",
            written, total, stats.total_duration_ms
        );
        progress.on_conversion_complete(total, written);

        Ok(ConversionOutput {
            manifest,
            pages,
            stats,
            state: tracker.current(),
        })
    }

    /// Open the document and render every selected page on a blocking thread.
    async fn render(
        &self,
        tracker: &Arc<StateTracker>,
        document: SourceDocument,
    ) -> Result<RenderReport, Pdf2ImgError> {
        let decoder = Arc::clone(&self.decoder);
        let tracker = Arc::clone(tracker);
        let options = RenderOptions::from_config(&self.config);
        let kind = BackendKind::detect(&self.config);
        let host = self.config.host_surfaces.clone();
        let password = self.config.password.clone();

        tokio::task::spawn_blocking(move || -> Result<RenderReport, Pdf2ImgError> {
            let mut backend = create_backend(kind, host)
                .map_err(|e| Pdf2ImgError::Internal(format!("surface backend unavailable: {e}")))?;
            debug!("Using {:?} surface backend", backend.kind());

            let progress = Arc::clone(&tracker.progress);
            let mut report = None;
            let mut transition = Ok(());
            let mut job = |engine: &dyn RenderEngine| {
                transition = tracker.advance(PipelineState::Rendering);
                if transition.is_err() {
                    return;
                }
                let selected = options.pages.to_page_numbers(engine.page_count()).len();
                progress.on_conversion_start(selected);
                let rendered = render_pages(engine, backend.as_mut(), &options, progress.as_ref());
                report = Some(rendered);
            };
            decoder.with_engine(&document, password.as_deref(), &mut job)?;
            transition?;

            report.ok_or_else(|| Pdf2ImgError::Internal("decoder skipped the render job".into()))
        })
        .await
        .map_err(|e| Pdf2ImgError::Internal(format!("Render task panicked: {}", e)))?
    }

    /// Encode rendered pages concurrently; results come back in page order.
    async fn encode(&self, report: RenderReport) -> Vec<Result<EncodedPage, PageError>> {
        let format = self.config.format;
        let quality = self.config.quality;

        let jobs = report.pages.into_iter().enumerate().map(|(idx, page)| async move {
            (idx, encode_task(page, format, quality).await)
        });

        let mut results: Vec<(usize, Result<EncodedPage, PageError>)> = stream::iter(jobs)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Read document metadata without rendering.
    pub async fn inspect(
        &self,
        document: SourceDocument,
    ) -> Result<DocumentMetadata, Pdf2ImgError> {
        let decoder = Arc::clone(&self.decoder);
        let password = self.config.password.clone();
        tokio::task::spawn_blocking(move || decoder.metadata(&document, password.as_deref()))
            .await
            .map_err(|e| Pdf2ImgError::Internal(format!("Metadata task panicked: {}", e)))?
    }
}

/// Encode one page on a blocking thread.
async fn encode_task(
    page: RasterPage,
    format: OutputFormat,
    quality: f32,
) -> Result<EncodedPage, PageError> {
    let page_num = page.page_num;
    let joined = tokio::task::spawn_blocking(move || encode_page(&page, format, quality)).await;
    match joined {
        Ok(result) => result.map_err(|e| PageError::EncodeFailed {
            page: page_num,
            detail: e.to_string(),
        }),
        Err(e) => Err(PageError::EncodeFailed {
            page: page_num,
            detail: format!("encode task panicked: {}", e),
        }),
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Print a PDF file or URL into page images.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input_str`: Local file path or HTTP/HTTPS URL to a PDF
/// * `config`: Conversion configuration
///
/// # Returns
/// `Ok(ConversionOutput)` once the run reaches `Done`, even if some or all
/// pages were skipped (check `output.stats.skipped_pages`).
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2ImgError> {
    let document = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    Pipeline::new(config.clone()).run(document).await
}

/// Print PDF bytes that are already in memory.
///
/// `name` is the base name used for the output folder and files.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2img::{convert_bytes, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("slides.pdf")?;
/// let config = ConversionConfig::builder().output_root("vault").build()?;
/// let output = convert_bytes("slides", bytes, &config).await?;
/// for file in output.manifest.iter() {
///     println!("{file}");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_bytes(
    name: impl Into<String>,
    bytes: Vec<u8>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2ImgError> {
    Pipeline::new(config.clone())
        .run(SourceDocument::new(name, bytes))
        .await
}

/// Print the PDF a `![[link]]` points at.
///
/// The link is resolved inside `config.output_root`, which is treated as the
/// vault root.
pub async fn convert_link(
    selection: &str,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2ImgError> {
    let target = extract_link_target(selection)?;
    let path = input::resolve_vault_link(&config.output_root, &target)?;
    let document = input::read_local(&path).await?;
    Pipeline::new(config.clone()).run(document).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2ImgError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2ImgError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Extract PDF metadata without rendering any page.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<DocumentMetadata, Pdf2ImgError> {
    let document = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    Pipeline::new(config.clone()).inspect(document).await
}
