//! Progress-callback trait for per-page printing events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2img::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_written(&self, page_num: usize, total_pages: usize, path: &str) {
//!         self.written.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} → {}", page_num, total_pages, path);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { written: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::convert::PipelineState;
use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// Implementations must be `Send + Sync`: rendering happens on a blocking
/// thread and writes complete concurrently, so `on_page_written` may be
/// called from several tasks at once and out of page order. All methods
/// default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is rendered.
    ///
    /// `total_pages` is the number of *selected* pages.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called on every pipeline state transition.
    fn on_state_change(&self, state: PipelineState) {
        let _ = state;
    }

    /// Called just before a page is rendered.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after a page's pixels have been read back.
    fn on_page_rendered(&self, page_num: usize, total_pages: usize, width: u32, height: u32) {
        let _ = (page_num, total_pages, width, height);
    }

    /// Called when a page is skipped because it failed to render or encode.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called when a page image has been written to storage.
    fn on_page_written(&self, page_num: usize, total_pages: usize, path: &str) {
        let _ = (page_num, total_pages, path);
    }

    /// Called once after the run reaches `Done`.
    ///
    /// `success_count` is the number of images written.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
