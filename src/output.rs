//! Output types returned by a conversion run.

use crate::convert::PipelineState;
use crate::error::{PageError, Pdf2ImgError};
use serde::{Deserialize, Serialize};

/// The written page images of one run, in ascending page order.
///
/// Entries are storage-relative, `/`-separated paths. `namespace` is the
/// per-run folder that holds them, or `None` when nothing was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub namespace: Option<String>,
    pub files: Vec<String>,
}

impl OutputManifest {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }
}

/// Outcome for one selected page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page number.
    pub page_num: usize,

    /// Written image path, `None` if the page was skipped.
    pub file: Option<String>,

    /// Rendered size in pixels; zero if rendering failed.
    pub width: u32,
    pub height: u32,

    /// Encoded size in bytes; zero if the page was not encoded.
    pub bytes: usize,

    /// Why the page was skipped.
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn is_written(&self) -> bool {
        self.file.is_some()
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Page count of the whole document.
    pub total_pages: usize,
    /// Pages chosen by the page selection.
    pub selected_pages: usize,
    /// Page images written.
    pub written_pages: usize,
    /// Selected pages that failed to render or encode.
    pub skipped_pages: usize,
    /// Sum of encoded image sizes.
    pub bytes_written: u64,
    pub render_duration_ms: u64,
    pub encode_duration_ms: u64,
    pub write_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub manifest: OutputManifest,
    /// One entry per selected page, ascending.
    pub pages: Vec<PageResult>,
    pub stats: ConversionStats,
    /// Always [`PipelineState::Done`] for a returned output.
    pub state: PipelineState,
}

impl ConversionOutput {
    /// The first per-page failure, by page number.
    pub fn first_error(&self) -> Option<&PageError> {
        self.pages.iter().find_map(|p| p.error.as_ref())
    }

    /// Treat "pages were selected but none was written" as an error.
    ///
    /// A document with no selected pages is still `Ok`.
    pub fn into_result(self) -> Result<Self, Pdf2ImgError> {
        if self.stats.selected_pages > 0 && self.stats.written_pages == 0 {
            let first_error = self
                .first_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(Pdf2ImgError::AllPagesFailed {
                total: self.stats.selected_pages,
                first_error,
            });
        }
        Ok(self)
    }

    /// Like [`into_result`](Self::into_result), but any skipped page is an
    /// error too.
    pub fn into_strict_result(self) -> Result<Self, Pdf2ImgError> {
        let output = self.into_result()?;
        if output.stats.skipped_pages > 0 {
            return Err(Pdf2ImgError::PartialFailure {
                success: output.stats.written_pages,
                failed: output.stats.skipped_pages,
                total: output.stats.selected_pages,
            });
        }
        Ok(output)
    }
}

/// Document properties read without rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Source base name.
    pub name: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
    pub byte_size: usize,
}
