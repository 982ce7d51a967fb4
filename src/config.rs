//! Configuration types for PDF-to-image printing.
//!
//! All run behaviour is controlled through [`ConversionConfig`], built via
//! its [`ConversionConfigBuilder`]. Persisted user preferences live in
//! [`crate::settings::Settings`] and are folded into a builder at startup.
//!
//! Setters clamp out-of-range numbers instead of rejecting them so that a
//! stale settings file never blocks a run; `build()` only rejects values that
//! would make the output ambiguous (e.g. a naming template without a page
//! number).

use crate::error::Pdf2ImgError;
use crate::pipeline::encode::clamp_quality;
use crate::pipeline::surface::HostSurfaceProvider;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default render scale: two device pixels per PDF point.
pub const DEFAULT_SCALE: f32 = 2.0;

/// Default lossy quality in `[0, 1]`.
pub const DEFAULT_QUALITY: f32 = 0.5;

/// Default file naming template.
pub const DEFAULT_NAMING_TEMPLATE: &str = "{name}-{page}.{ext}";

/// Configuration for one PDF-to-image run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2img::{ConversionConfig, OutputFormat};
///
/// let config = ConversionConfig::builder()
///     .scale(3.0)
///     .format(OutputFormat::Jpeg)
///     .quality(0.8)
///     .image_folder("attachments/printed")
///     .build()
///     .unwrap();
/// assert_eq!(config.image_folder, "attachments/printed");
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Device pixels per PDF point. Range: 0.1–10. Default: 2.0.
    pub scale: f32,

    /// Longest edge of a rendered page in pixels. Default: 10 000.
    ///
    /// A safety cap independent of `scale`: a 2× render of an A0 poster
    /// would otherwise allocate several hundred megabytes for one surface.
    pub max_rendered_pixels: u32,

    /// Output image format. Default: PNG.
    pub format: OutputFormat,

    /// Lossy quality in `[0, 1]`; ignored by PNG. Default: 0.5.
    pub quality: f32,

    /// Keep page backgrounds transparent instead of white. Default: false.
    pub transparent: bool,

    /// Concurrent encode and write tasks. Default: 8.
    pub concurrency: usize,

    /// How many random output folders to try before giving up. Default: 8.
    pub max_namespace_attempts: u32,

    /// Storage root every output path is relative to (the vault). Default: `.`.
    pub output_root: PathBuf,

    /// Folder below `output_root` that receives the per-run folders.
    /// Empty means the root itself. Default: empty.
    pub image_folder: String,

    /// File naming template for each page image.
    pub naming: FileNaming,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit path to the pdfium shared library.
    /// Falls back to `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,

    /// Surface allocator supplied by an embedding application.
    /// When set, pages are drawn on host surfaces instead of in-process pixmaps.
    pub host_surfaces: Option<Arc<dyn HostSurfaceProvider>>,

    /// Checked once before the run starts.
    pub cancel: Option<CancelFlag>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            max_rendered_pixels: 10_000,
            format: OutputFormat::default(),
            quality: DEFAULT_QUALITY,
            transparent: false,
            concurrency: 8,
            max_namespace_attempts: 8,
            output_root: PathBuf::from("."),
            image_folder: String::new(),
            naming: FileNaming::default(),
            pages: PageSelection::default(),
            password: None,
            pdfium_library: None,
            download_timeout_secs: 120,
            progress_callback: None,
            host_surfaces: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("scale", &self.scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("format", &self.format)
            .field("quality", &self.quality)
            .field("transparent", &self.transparent)
            .field("concurrency", &self.concurrency)
            .field("max_namespace_attempts", &self.max_namespace_attempts)
            .field("output_root", &self.output_root)
            .field("image_folder", &self.image_folder)
            .field("naming", &self.naming)
            .field("pages", &self.pages)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library", &self.pdfium_library)
            .field("host_surfaces", &self.host_surfaces.as_ref().map(|_| "<host provider>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = if scale.is_finite() {
            scale.clamp(0.1, 10.0)
        } else {
            DEFAULT_SCALE
        };
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn quality(mut self, quality: f32) -> Self {
        self.config.quality = clamp_quality(quality);
        self
    }

    pub fn transparent(mut self, v: bool) -> Self {
        self.config.transparent = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_namespace_attempts(mut self, n: u32) -> Self {
        self.config.max_namespace_attempts = n.max(1);
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn image_folder(mut self, folder: impl AsRef<str>) -> Self {
        self.config.image_folder = normalize_folder(folder.as_ref());
        self
    }

    pub fn naming(mut self, naming: FileNaming) -> Self {
        self.config.naming = naming;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn host_surfaces(mut self, provider: Arc<dyn HostSurfaceProvider>) -> Self {
        self.config.host_surfaces = Some(provider);
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.config.cancel = Some(flag);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2ImgError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(Pdf2ImgError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_namespace_attempts == 0 {
            return Err(Pdf2ImgError::InvalidConfig(
                "Namespace attempts must be ≥ 1".into(),
            ));
        }
        c.naming.validate()?;
        if let PageSelection::Range(start, end) = c.pages {
            if start == 0 || start > end {
                return Err(Pdf2ImgError::InvalidConfig(format!(
                    "Invalid page range {start}-{end}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Compressed image format written for each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless; quality is ignored. (default)
    #[default]
    Png,
    /// Lossy; quality maps to JPEG quality 1–100.
    Jpeg,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    /// MIME type of the encoded bytes.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// Whether `quality` has any effect.
    pub fn is_lossy(self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = Pdf2ImgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            other => Err(Pdf2ImgError::InvalidConfig(format!(
                "Unknown image format '{other}' (expected png or jpeg)"
            ))),
        }
    }
}

/// Specifies which pages of the PDF to print.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Print all pages (default).
    #[default]
    All,
    /// Print a single page (1-indexed).
    Single(usize),
    /// Print a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Print specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into sorted, deduplicated 1-based page numbers.
    pub fn to_page_numbers(&self, total_pages: usize) -> Vec<usize> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .copied()
                .filter(|&p| p >= 1 && p <= total_pages)
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-z]*)\}").unwrap());

/// Template for page image file names.
///
/// Placeholders: `{name}` (source base name), `{page}` (1-based page number),
/// `{ext}` (format extension). `{page}` is mandatory so that every page gets
/// a distinct name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileNaming {
    template: String,
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            template: DEFAULT_NAMING_TEMPLATE.to_string(),
        }
    }
}

impl FileNaming {
    /// Create a template, validating placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self, Pdf2ImgError> {
        let naming = Self {
            template: template.into(),
        };
        naming.validate()?;
        Ok(naming)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn validate(&self) -> Result<(), Pdf2ImgError> {
        let t = &self.template;
        if t.contains('/') || t.contains('\\') {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "Naming template '{t}' must not contain path separators"
            )));
        }
        let mut has_page = false;
        for cap in PLACEHOLDER.captures_iter(t) {
            match &cap[1] {
                "page" => has_page = true,
                "name" | "ext" => {}
                other => {
                    return Err(Pdf2ImgError::InvalidConfig(format!(
                        "Unknown placeholder '{{{other}}}' in naming template '{t}'"
                    )))
                }
            }
        }
        if !has_page {
            return Err(Pdf2ImgError::InvalidConfig(format!(
                "Naming template '{t}' must contain {{page}}"
            )));
        }
        Ok(())
    }

    /// Render the file name for one page.
    pub fn render(&self, name: &str, page_num: usize, ext: &str) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |cap: &regex::Captures<'_>| match &cap[1] {
                "name" => name.to_string(),
                "page" => page_num.to_string(),
                "ext" => ext.to_string(),
                _ => cap[0].to_string(),
            })
            .into_owned()
    }
}

impl TryFrom<String> for FileNaming {
    type Error = Pdf2ImgError;

    fn try_from(template: String) -> Result<Self, Self::Error> {
        Self::new(template)
    }
}

impl From<FileNaming> for String {
    fn from(naming: FileNaming) -> Self {
        naming.template
    }
}

/// Normalise a user-entered folder into a storage-relative path.
///
/// Trims whitespace, converts `\` to `/`, collapses repeated slashes, and
/// strips leading/trailing slashes and `.` segments. An empty result means
/// the storage root.
pub fn normalize_folder(folder: &str) -> String {
    folder
        .trim()
        .replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Cooperative cancellation shared between a caller and a run.
///
/// Only honoured before the pipeline starts: once pages are rendering the
/// run always completes so that a half-written folder is never abandoned
/// mid-batch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
