//! Pipeline integration tests.
//!
//! A scripted decoder stands in for pdfium and [`MemoryStorage`] stands in
//! for the vault, so these run everywhere without a pdfium library.

use edgequake_pdf2img::pipeline::engine::{DocumentDecoder, RenderEngine, Viewport};
use edgequake_pdf2img::pipeline::surface::DrawingContext;
use edgequake_pdf2img::{
    format_embeds, CancelFlag, ConversionConfig, ConversionProgressCallback, DocumentMetadata,
    EmbedOptions, HostCanvas, HostSurfaceProvider, MemoryStorage, OutputFormat, PageError,
    PageSelection, Pdf2ImgError, Pipeline, PipelineState, RenderError, SourceDocument, Storage,
};
use futures::future::BoxFuture;
use image::{Rgba, RgbaImage};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Decoder that opens every document as `pages` solid-colour pages.
#[derive(Default)]
struct ScriptedDecoder {
    pages: usize,
    failing: Vec<usize>,
    /// Pages laid out as a 6600×1pt strip.
    strips: Vec<usize>,
    corrupt: bool,
}

impl ScriptedDecoder {
    fn pages(pages: usize) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }
}

struct ScriptedEngine<'a> {
    decoder: &'a ScriptedDecoder,
}

impl RenderEngine for ScriptedEngine<'_> {
    fn page_count(&self) -> usize {
        self.decoder.pages
    }

    fn page_size(&self, page_num: usize) -> Result<(f32, f32), RenderError> {
        if self.decoder.strips.contains(&page_num) {
            return Ok((6600.0, 1.0));
        }
        Ok((8.0, 12.0))
    }

    fn render(
        &self,
        page_num: usize,
        viewport: &Viewport,
        ctx: &mut dyn DrawingContext,
    ) -> Result<(), RenderError> {
        if self.decoder.failing.contains(&page_num) {
            return Err(RenderError::Engine(format!("page {page_num} is damaged")));
        }
        let fill = RgbaImage::from_pixel(
            viewport.width,
            viewport.height,
            Rgba([0, page_num as u8 * 40, 200, 255]),
        );
        ctx.draw_image(0, 0, &fill)?;
        Ok(())
    }
}

impl DocumentDecoder for ScriptedDecoder {
    fn with_engine(
        &self,
        document: &SourceDocument,
        _password: Option<&str>,
        job: &mut dyn FnMut(&dyn RenderEngine),
    ) -> Result<(), Pdf2ImgError> {
        if self.corrupt {
            return Err(Pdf2ImgError::CorruptPdf {
                name: document.name.clone(),
                detail: "no xref table".into(),
            });
        }
        job(&ScriptedEngine { decoder: self });
        Ok(())
    }

    fn metadata(
        &self,
        document: &SourceDocument,
        _password: Option<&str>,
    ) -> Result<DocumentMetadata, Pdf2ImgError> {
        Ok(DocumentMetadata {
            name: document.name.clone(),
            page_count: self.pages,
            pdf_version: "1.7".into(),
            byte_size: document.bytes.len(),
            ..Default::default()
        })
    }
}

/// Storage where every namespace candidate is already taken.
struct CrowdedStorage;

impl Storage for CrowdedStorage {
    fn exists<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn create_container<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async { Err(io::Error::new(io::ErrorKind::AlreadyExists, "taken")) })
    }

    fn write_binary<'a>(
        &'a self,
        _path: &'a str,
        _bytes: Vec<u8>,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Storage that accepts the folder but refuses to write page 2.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
}

impl Storage for FlakyStorage {
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<bool>> {
        self.inner.exists(path)
    }

    fn create_container<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<()>> {
        self.inner.create_container(path)
    }

    fn write_binary<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, io::Result<()>> {
        if path.ends_with("-2.png") {
            return Box::pin(async { Err(io::Error::new(io::ErrorKind::Other, "disk full")) });
        }
        self.inner.write_binary(path, bytes)
    }
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<PipelineState>>,
    errors: Mutex<Vec<usize>>,
    written: AtomicUsize,
    completed: Mutex<Option<(usize, usize)>>,
}

impl ConversionProgressCallback for Recorder {
    fn on_state_change(&self, state: PipelineState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
        self.errors.lock().unwrap().push(page_num);
    }

    fn on_page_written(&self, _page_num: usize, _total: usize, _path: &str) {
        self.written.fetch_add(1, Ordering::SeqCst);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        *self.completed.lock().unwrap() = Some((total_pages, success_count));
    }
}

fn document() -> SourceDocument {
    SourceDocument::new("report", b"%PDF-1.7 scripted".to_vec())
}

fn pipeline(
    decoder: ScriptedDecoder,
    storage: Arc<dyn Storage>,
    config: ConversionConfig,
) -> Pipeline {
    Pipeline::with_parts(Arc::new(decoder), storage, config)
}

fn config() -> ConversionConfig {
    ConversionConfig::builder()
        .image_folder("printed")
        .scale(1.0)
        .build()
        .unwrap()
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_page_is_written_in_ascending_order() {
    let storage = Arc::new(MemoryStorage::new());
    let output = pipeline(ScriptedDecoder::pages(5), storage.clone(), config())
        .run(document())
        .await
        .unwrap();

    assert_eq!(output.state, PipelineState::Done);
    assert_eq!(output.manifest.len(), 5);
    let namespace = output.manifest.namespace.clone().unwrap();
    assert!(namespace.starts_with("printed/report-"));

    let expected: Vec<String> = (1..=5)
        .map(|n| format!("{namespace}/report-{n}.png"))
        .collect();
    assert_eq!(output.manifest.files, expected);
    assert_eq!(storage.files(), expected);
    assert_eq!(storage.containers(), vec![namespace]);

    for file in &output.manifest.files {
        let bytes = storage.file(file).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
    assert_eq!(output.stats.written_pages, 5);
    assert_eq!(output.stats.skipped_pages, 0);
    assert!(output.pages.iter().all(|p| p.width == 8 && p.height == 12));
}

#[tokio::test]
async fn two_runs_never_share_a_folder() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = pipeline(ScriptedDecoder::pages(2), storage.clone(), config());

    let first = pipeline.run(document()).await.unwrap();
    let second = pipeline.run(document()).await.unwrap();

    assert_ne!(first.manifest.namespace, second.manifest.namespace);
    assert_eq!(storage.containers().len(), 2);
    assert_eq!(storage.files().len(), 4);
}

#[tokio::test]
async fn jpeg_output_uses_jpeg_files() {
    let storage = Arc::new(MemoryStorage::new());
    let config = ConversionConfig::builder()
        .format(OutputFormat::Jpeg)
        .quality(0.8)
        .build()
        .unwrap();
    let output = pipeline(ScriptedDecoder::pages(1), storage.clone(), config)
        .run(document())
        .await
        .unwrap();

    let file = &output.manifest.files[0];
    assert!(file.ends_with("report-1.jpg"));
    assert_eq!(&storage.file(file).unwrap()[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn page_selection_limits_output() {
    let storage = Arc::new(MemoryStorage::new());
    let config = ConversionConfig::builder()
        .pages(PageSelection::Set(vec![4, 2]))
        .build()
        .unwrap();
    let output = pipeline(ScriptedDecoder::pages(5), storage, config)
        .run(document())
        .await
        .unwrap();

    let pages: Vec<usize> = output.pages.iter().map(|p| p.page_num).collect();
    assert_eq!(pages, vec![2, 4]);
    assert_eq!(output.stats.total_pages, 5);
    assert_eq!(output.stats.selected_pages, 2);
}

// ── Partial and empty output ─────────────────────────────────────────────────

#[tokio::test]
async fn failing_page_is_skipped() {
    let storage = Arc::new(MemoryStorage::new());
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let decoder = ScriptedDecoder {
        pages: 5,
        failing: vec![3],
        ..Default::default()
    };

    let output = pipeline(decoder, storage, config)
        .run(document())
        .await
        .unwrap();

    let written: Vec<usize> = output
        .pages
        .iter()
        .filter(|p| p.is_written())
        .map(|p| p.page_num)
        .collect();
    assert_eq!(written, vec![1, 2, 4, 5]);
    assert_eq!(output.manifest.len(), 4);
    assert_eq!(output.stats.skipped_pages, 1);
    assert!(matches!(
        output.first_error(),
        Some(PageError::RenderFailed { page: 3, .. })
    ));
    assert_eq!(*recorder.errors.lock().unwrap(), vec![3]);
    assert_eq!(recorder.written.load(Ordering::SeqCst), 4);
    assert_eq!(*recorder.completed.lock().unwrap(), Some((5, 4)));

    assert!(matches!(
        output.clone().into_strict_result(),
        Err(Pdf2ImgError::PartialFailure {
            success: 4,
            failed: 1,
            total: 5,
        })
    ));
    assert!(output.into_result().is_ok());
}

#[tokio::test]
async fn page_too_wide_for_jpeg_is_skipped() {
    let storage = Arc::new(MemoryStorage::new());
    let config = ConversionConfig::builder()
        .format(OutputFormat::Jpeg)
        .scale(10.0)
        .max_rendered_pixels(70_000)
        .build()
        .unwrap();
    let decoder = ScriptedDecoder {
        pages: 3,
        strips: vec![2],
        ..Default::default()
    };

    let output = pipeline(decoder, storage.clone(), config)
        .run(document())
        .await
        .unwrap();

    assert_eq!(output.state, PipelineState::Done);
    assert_eq!(output.manifest.len(), 2);
    assert!(output.manifest.files[0].ends_with("report-1.jpg"));
    assert!(output.manifest.files[1].ends_with("report-3.jpg"));
    assert_eq!(output.stats.skipped_pages, 1);
    assert_eq!(output.pages[1].width, 66_000);
    assert!(matches!(
        output.pages[1].error,
        Some(PageError::EncodeFailed { page: 2, .. })
    ));
}

#[tokio::test]
async fn empty_document_creates_no_folder() {
    let storage = Arc::new(MemoryStorage::new());
    let output = pipeline(ScriptedDecoder::pages(0), storage.clone(), config())
        .run(document())
        .await
        .unwrap();

    assert_eq!(output.state, PipelineState::Done);
    assert!(output.manifest.is_empty());
    assert_eq!(output.manifest.namespace, None);
    assert!(storage.containers().is_empty());
    assert!(output.into_result().is_ok());
}

#[tokio::test]
async fn all_pages_failing_is_done_but_empty() {
    let storage = Arc::new(MemoryStorage::new());
    let decoder = ScriptedDecoder {
        pages: 2,
        failing: vec![1, 2],
        ..Default::default()
    };

    let output = pipeline(decoder, storage.clone(), config())
        .run(document())
        .await
        .unwrap();

    assert_eq!(output.state, PipelineState::Done);
    assert!(output.manifest.is_empty());
    assert!(storage.containers().is_empty());
    assert!(matches!(
        output.into_result(),
        Err(Pdf2ImgError::AllPagesFailed { total: 2, .. })
    ));
}

#[test]
fn embeds_follow_manifest_order() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = pipeline(ScriptedDecoder::pages(3), storage, config());
    let output = runtime.block_on(pipeline.run(document())).unwrap();

    let text = format_embeds(&output.manifest, &EmbedOptions::default(), None);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    for (n, line) in lines.iter().enumerate() {
        assert!(line.starts_with("![[printed/report-"));
        assert!(line.ends_with(&format!("/report-{}.png]]", n + 1)));
    }
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_document_fails_the_run() {
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let decoder = ScriptedDecoder {
        corrupt: true,
        ..Default::default()
    };
    let storage = Arc::new(MemoryStorage::new());

    let err = pipeline(decoder, storage.clone(), config)
        .run(document())
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2ImgError::CorruptPdf { .. }));
    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![PipelineState::Decoding, PipelineState::Failed]
    );
    assert!(storage.containers().is_empty());
}

#[tokio::test]
async fn crowded_folder_exhausts_attempts() {
    let config = ConversionConfig::builder()
        .max_namespace_attempts(3)
        .build()
        .unwrap();
    let err = pipeline(ScriptedDecoder::pages(1), Arc::new(CrowdedStorage), config)
        .run(document())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Pdf2ImgError::NamespaceExhausted { attempts: 3, .. }
    ));
}

#[tokio::test]
async fn write_failure_fails_the_run() {
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let err = pipeline(
        ScriptedDecoder::pages(3),
        Arc::new(FlakyStorage::default()),
        config,
    )
    .run(document())
    .await
    .unwrap_err();

    match err {
        Pdf2ImgError::OutputWriteFailed {
            path,
            failed,
            total,
            ..
        } => {
            assert!(path.ends_with("report-2.png"));
            assert_eq!((failed, total), (1, 3));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        recorder.states.lock().unwrap().last(),
        Some(&PipelineState::Failed)
    );
}

#[tokio::test]
async fn cancelled_run_does_nothing() {
    let flag = CancelFlag::new();
    flag.cancel();
    let storage = Arc::new(MemoryStorage::new());
    let config = ConversionConfig::builder()
        .cancel_flag(flag)
        .build()
        .unwrap();

    let err = pipeline(ScriptedDecoder::pages(2), storage.clone(), config)
        .run(document())
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2ImgError::Cancelled));
    assert!(storage.files().is_empty());
}

// ── Progress and backends ────────────────────────────────────────────────────

#[tokio::test]
async fn states_are_reported_in_order() {
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    pipeline(
        ScriptedDecoder::pages(2),
        Arc::new(MemoryStorage::new()),
        config,
    )
    .run(document())
    .await
    .unwrap();

    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![
            PipelineState::Decoding,
            PipelineState::Rendering,
            PipelineState::Encoding,
            PipelineState::Materializing,
            PipelineState::Done,
        ]
    );
}

struct CountingCanvas {
    size: (u32, u32),
    data: Vec<u8>,
    released: Arc<AtomicUsize>,
}

impl HostCanvas for CountingCanvas {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), String> {
        self.size = (width, height);
        self.data = vec![0; (width * height * 4) as usize];
        Ok(())
    }

    fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingProvider {
    allocated: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl HostSurfaceProvider for CountingProvider {
    fn allocate(&self, width: u32, height: u32) -> Result<Box<dyn HostCanvas>, String> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingCanvas {
            size: (width, height),
            data: vec![0; (width * height * 4) as usize],
            released: Arc::clone(&self.released),
        }))
    }
}

#[tokio::test]
async fn host_surfaces_are_released_for_every_page() {
    let provider = Arc::new(CountingProvider::default());
    let config = ConversionConfig::builder()
        .host_surfaces(provider.clone())
        .build()
        .unwrap();
    let decoder = ScriptedDecoder {
        pages: 4,
        failing: vec![2],
        ..Default::default()
    };

    let output = pipeline(decoder, Arc::new(MemoryStorage::new()), config)
        .run(document())
        .await
        .unwrap();

    assert_eq!(output.manifest.len(), 3);
    let allocated = provider.allocated.load(Ordering::SeqCst);
    assert!(allocated >= 1);
    assert_eq!(provider.released.load(Ordering::SeqCst), allocated);
}

#[tokio::test]
async fn inspect_reads_metadata_only() {
    let storage = Arc::new(MemoryStorage::new());
    let meta = pipeline(ScriptedDecoder::pages(7), storage.clone(), config())
        .inspect(document())
        .await
        .unwrap();

    assert_eq!(meta.name, "report");
    assert_eq!(meta.page_count, 7);
    assert!(storage.containers().is_empty());
}
