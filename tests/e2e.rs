//! End-to-end tests against a real pdfium library.
//!
//! These tests use real PDF files in `./test_cases/` and need libpdfium.
//! They are gated behind the `E2E_ENABLED` environment variable so they do
//! not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture

use edgequake_pdf2img::{
    convert, convert_bytes, convert_link, format_embeds, inspect, ConversionConfig, EmbedOptions,
    OutputFormat, PageSelection, Pdf2ImgError, PipelineState,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Copy a test PDF into a fresh vault so links resolve against it.
fn vault_with(pdf: &Path) -> tempfile::TempDir {
    let vault = tempfile::tempdir().expect("tempdir");
    let papers = vault.path().join("papers");
    std::fs::create_dir_all(&papers).expect("papers folder");
    let file_name = pdf.file_name().expect("file name");
    std::fs::copy(pdf, papers.join(file_name)).expect("copy pdf");
    vault
}

fn assert_image_file(vault: &Path, rel: &str, magic: &[u8]) {
    let bytes = std::fs::read(vault.join(rel)).unwrap_or_else(|e| panic!("{rel}: {e}"));
    assert!(bytes.starts_with(magic), "{rel} has unexpected header");
    let img = image::load_from_memory(&bytes).expect("decodable image");
    assert!(img.width() > 0 && img.height() > 0);
}

// ── Inspect ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_arxiv_paper() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = ConversionConfig::default();
    let meta = inspect(path.to_str().unwrap(), &config)
        .await
        .expect("inspect() should succeed");

    assert_eq!(meta.page_count, 15, "Attention paper should have 15 pages");
    assert!(!meta.pdf_version.is_empty());
    println!("Metadata: {:?}", meta);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    let config = ConversionConfig::default();
    let result = inspect("/definitely/not/a/real/file.pdf", &config).await;
    assert!(matches!(result, Err(Pdf2ImgError::FileNotFound { .. })));
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_first_pages_to_png() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));
    let vault = vault_with(&pdf);

    let config = ConversionConfig::builder()
        .output_root(vault.path())
        .image_folder("attachments/printed")
        .pages(PageSelection::Range(1, 3))
        .build()
        .expect("valid config");

    let input = vault.path().join("papers/attention_is_all_you_need.pdf");
    let output = convert(input.to_str().unwrap(), &config)
        .await
        .expect("conversion should succeed");

    assert_eq!(output.state, PipelineState::Done);
    assert_eq!(output.manifest.len(), 3);
    for (n, file) in output.manifest.iter().enumerate() {
        assert!(file.starts_with("attachments/printed/attention_is_all_you_need-"));
        assert!(file.ends_with(&format!("-{}.png", n + 1)));
        assert_image_file(vault.path(), file, b"\x89PNG");
    }

    let embeds = format_embeds(&output.manifest, &EmbedOptions::default(), None);
    assert_eq!(embeds.lines().count(), 3);
    println!("{embeds}");
}

#[tokio::test]
async fn test_convert_link_to_jpeg() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));
    let vault = vault_with(&pdf);

    let config = ConversionConfig::builder()
        .output_root(vault.path())
        .format(OutputFormat::Jpeg)
        .quality(0.6)
        .pages(PageSelection::Single(1))
        .build()
        .expect("valid config");

    let output = convert_link("![[attention_is_all_you_need.pdf]]", &config)
        .await
        .expect("link conversion should succeed");

    assert_eq!(output.manifest.len(), 1);
    assert_image_file(vault.path(), &output.manifest.files[0], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_garbage_bytes_are_rejected() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let vault = tempfile::tempdir().expect("tempdir");
    let config = ConversionConfig::builder()
        .output_root(vault.path())
        .build()
        .expect("valid config");

    let bytes = b"%PDF-1.4 this is not a pdf".to_vec();
    let result = convert_bytes("junk", bytes, &config).await;
    assert!(
        matches!(result, Err(Pdf2ImgError::CorruptPdf { .. })),
        "got {result:?}"
    );
    assert_eq!(std::fs::read_dir(vault.path()).unwrap().count(), 0);
}

// ── Page selection (no pdfium) ───────────────────────────────────────────────

#[test]
fn test_page_selection_out_of_range_is_empty() {
    assert_eq!(
        PageSelection::Single(100).to_page_numbers(4),
        Vec::<usize>::new()
    );
}

#[test]
fn test_page_selection_range_clipping() {
    assert_eq!(PageSelection::Range(3, 10).to_page_numbers(4), vec![3, 4]);
}

#[test]
fn test_page_selection_set_dedup_and_sort() {
    assert_eq!(
        PageSelection::Set(vec![3, 1, 3, 2]).to_page_numbers(5),
        vec![1, 2, 3]
    );
}
