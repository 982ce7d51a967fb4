//! # edgequake-pdf2img
//!
//! Print PDF documents into page images and embed them in notes.
//!
//! Each selected page is rendered with pdfium onto a drawing surface,
//! encoded as PNG or JPEG, and written into a fresh, uniquely named folder.
//! The result is an ordered manifest of image paths that can be turned into
//! `![[image]]` embeds for a Markdown note.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input        resolve local file, URL, or ![[note link]]
//!  ├─ 2. Decode       open the document via pdfium (spawn_blocking)
//!  ├─ 3. Render       paint each page on a scoped surface, read pixels back
//!  ├─ 4. Encode       PNG / JPEG with clamped quality (bounded fan-out)
//!  ├─ 5. Materialize  fresh {folder}/{name}-{random} folder, concurrent writes
//!  └─ 6. Output       ordered manifest + per-page diagnostics
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2img::{convert, ConversionConfig, EmbedOptions, format_embeds};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .output_root("my-vault")
//!         .image_folder("attachments")
//!         .build()?;
//!     let output = convert("my-vault/papers/attention.pdf", &config).await?;
//!     println!("{}", format_embeds(&output.manifest, &EmbedOptions::default(), None));
//!     eprintln!("{} pages written, {} skipped",
//!         output.stats.written_pages,
//!         output.stats.skipped_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2img` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdf2img = { version = "0.1", default-features = false }
//! ```
//!
//! ## Finding pdfium
//!
//! pdfium is loaded at runtime, from `ConversionConfig::pdfium_library`,
//! then `PDFIUM_LIB_PATH`, then the system library search path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod embed;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod settings;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CancelFlag, ConversionConfig, ConversionConfigBuilder, FileNaming, OutputFormat, PageSelection,
};
pub use convert::{
    convert, convert_bytes, convert_link, convert_sync, inspect, Pipeline, PipelineState,
};
pub use embed::{extract_link_target, format_embeds, EmbedOptions};
pub use error::{EncodeError, PageError, Pdf2ImgError, RenderError, SurfaceError};
pub use output::{ConversionOutput, ConversionStats, DocumentMetadata, OutputManifest, PageResult};
pub use pipeline::input::SourceDocument;
pub use pipeline::storage::{FsStorage, MemoryStorage, Storage};
pub use pipeline::surface::{BackendKind, HostCanvas, HostSurfaceProvider};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use settings::Settings;
