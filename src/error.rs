//! Error types for the edgequake-pdf2img library.
//!
//! Failures come in two weights:
//!
//! * [`Pdf2ImgError`]: **Fatal**, the run cannot produce a manifest at all
//!   (unreadable input, corrupt PDF, no free output namespace, a failed
//!   batch write). Returned as `Err(Pdf2ImgError)` from the `convert*`
//!   functions.
//!
//! * [`PageError`]: **Non-fatal**, one page could not be rendered or
//!   encoded. Stored inside [`crate::output::PageResult`]; the remaining
//!   pages are still written.
//!
//! Two lower-level errors feed into [`PageError`]: [`SurfaceError`] for
//! misuse or exhaustion of a drawing surface, and [`EncodeError`] for codec
//! failures. Both are kept as distinct types so the renderer and encoder can
//! be tested without the rest of the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2img library.
#[derive(Debug, Error)]
pub enum Pdf2ImgError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a file path, a URL, or a resolvable note link.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Decode errors ─────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    // ── Materialization errors ────────────────────────────────────────────
    /// Every generated namespace already existed.
    #[error("No free output folder for '{base_name}' under '{parent}' after {attempts} attempts")]
    NamespaceExhausted {
        parent: String,
        base_name: String,
        attempts: u32,
    },

    /// The output folder could not be created.
    #[error("Failed to create output folder '{path}': {source}")]
    ContainerCreateFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// At least one page image could not be written.
    ///
    /// Pages written before the failure stay on disk; nothing is rolled back.
    #[error("{failed}/{total} page images could not be written; first failure at '{path}': {source}")]
    OutputWriteFailed {
        path: String,
        failed: usize,
        total: usize,
        #[source]
        source: std::io::Error,
    },

    // ── Outcome errors ────────────────────────────────────────────────────
    /// Every selected page failed; nothing was written.
    ///
    /// Returned by [`crate::output::ConversionOutput::into_result`].
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages were written but at least one was skipped.
    ///
    /// Returned by [`crate::output::ConversionOutput::into_strict_result`]
    /// when the caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during conversion")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The settings file exists but could not be read or parsed.
    #[error("Failed to load settings from '{path}': {detail}")]
    SettingsLoadFailed { path: PathBuf, detail: String },

    /// The settings file could not be written.
    #[error("Failed to save settings to '{path}': {detail}")]
    SettingsSaveFailed { path: PathBuf, detail: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Install libpdfium system-wide (e.g. from bblanchon/pdfium-binaries).\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was cancelled before it started.
    #[error("Conversion cancelled before it started")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page is skipped.
/// The message is meant for people; branch on the variant, not the text.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The render engine could not lay out or paint the page.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The drawing surface was unavailable or misused.
    #[error("Page {page}: surface error: {detail}")]
    SurfaceFailed { page: usize, detail: String },

    /// The rendered pixels could not be encoded.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },
}

impl PageError {
    /// The 1-based page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::SurfaceFailed { page, .. }
            | PageError::EncodeFailed { page, .. } => *page,
        }
    }
}

/// Misuse or exhaustion of a drawing surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// The handle was valid once but has been destroyed.
    #[error("surface #{id} has already been destroyed")]
    Destroyed { id: u64 },

    /// The handle was never issued by this backend.
    #[error("surface #{id} was not created by this backend")]
    Unknown { id: u64 },

    /// Zero-sized or otherwise unusable dimensions.
    #[error("invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// The backing store could not be allocated.
    #[error("could not allocate a {width}x{height} surface: {detail}")]
    Allocation {
        width: u32,
        height: u32,
        detail: String,
    },

    /// The embedding host rejected the request.
    #[error("host surface error: {0}")]
    Host(String),
}

/// Failure while laying out or painting a single page.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The page number is outside the document.
    #[error("page {page} does not exist (document has {total} pages)")]
    NoSuchPage { page: usize, total: usize },

    /// The page reported a size that cannot be rasterised.
    #[error("invalid page geometry: {0}")]
    Geometry(String),

    /// The render engine failed.
    #[error("{0}")]
    Engine(String),

    /// The surface was unavailable or misused.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl RenderError {
    /// Convert into the per-page diagnostic stored in the run output.
    pub fn into_page_error(self, page: usize) -> PageError {
        match self {
            RenderError::Surface(e) => PageError::SurfaceFailed {
                page,
                detail: e.to_string(),
            },
            other => PageError::RenderFailed {
                page,
                detail: other.to_string(),
            },
        }
    }
}

/// Failure to turn a raster page into compressed bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The codec succeeded but produced no bytes.
    #[error("encoder produced no output")]
    Empty,

    /// The pixel buffer does not match the declared dimensions.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferMismatch { expected: usize, actual: usize },

    /// The codec itself failed.
    #[error(transparent)]
    Codec(#[from] image::ImageError),
}
