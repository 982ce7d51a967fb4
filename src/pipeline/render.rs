//! Page rasterisation: paint each selected page onto a surface and read the
//! pixels back.
//!
//! Pages are rendered one at a time. Each page borrows exactly one surface
//! through a [`SurfaceGuard`], so at most one surface is live during the
//! loop and none remain afterwards, whether the page succeeded or not.
//!
//! ## Pixel cap
//!
//! Page sizes vary wildly: an A0 poster at 2× would produce a
//! 6,700 × 9,500 px surface. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.
//!
//! A page that fails to lay out, paint, or read back is recorded as a
//! [`PageError`] and skipped; the loop always continues with the next page.

use crate::config::{ConversionConfig, PageSelection};
use crate::error::{PageError, RenderError};
use crate::pipeline::engine::RenderEngine;
use crate::pipeline::surface::{SurfaceBackend, SurfaceGuard};
use crate::progress::ConversionProgressCallback;
use image::RgbaImage;
use tracing::{debug, warn};

/// Render-stage settings derived from [`ConversionConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub scale: f32,
    pub max_rendered_pixels: u32,
    pub transparent: bool,
    pub pages: PageSelection,
}

impl RenderOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            scale: config.scale,
            max_rendered_pixels: config.max_rendered_pixels,
            transparent: config.transparent,
            pages: config.pages.clone(),
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

/// One rendered page: straight (non-premultiplied) RGBA8, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPage {
    /// 1-based page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterPage {
    pub fn from_image(page_num: usize, image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            page_num,
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}

/// Everything the render stage produced for one document.
#[derive(Debug, Default)]
pub struct RenderReport {
    /// Page count of the whole document.
    pub total_pages: usize,
    /// Selected page numbers, ascending.
    pub selected: Vec<usize>,
    /// Successfully rendered pages, ascending by page number.
    pub pages: Vec<RasterPage>,
    /// Skipped pages, ascending by page number.
    pub failures: Vec<PageError>,
}

/// Render the selected pages of `engine` on surfaces from `backend`.
///
/// Never fails as a whole: per-page failures land in
/// [`RenderReport::failures`].
pub fn render_pages(
    engine: &dyn RenderEngine,
    backend: &mut dyn SurfaceBackend,
    options: &RenderOptions,
    progress: &dyn ConversionProgressCallback,
) -> RenderReport {
    let total_pages = engine.page_count();
    let selected = options.pages.to_page_numbers(total_pages);
    let total = selected.len();

    let mut report = RenderReport {
        total_pages,
        selected: selected.clone(),
        pages: Vec::with_capacity(total),
        failures: Vec::new(),
    };

    for page_num in selected {
        progress.on_page_start(page_num, total);

        match render_one(engine, backend, page_num, options) {
            Ok(page) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    page_num, page.width, page.height
                );
                progress.on_page_rendered(page_num, total, page.width, page.height);
                report.pages.push(page);
            }
            Err(e) => {
                let err = e.into_page_error(page_num);
                warn!("{}", err);
                progress.on_page_error(page_num, total, &err.to_string());
                report.failures.push(err);
            }
        }
    }

    if backend.live_surfaces() != 0 {
        warn!(
            "{} surfaces still live after rendering",
            backend.live_surfaces()
        );
    }

    report
}

fn render_one(
    engine: &dyn RenderEngine,
    backend: &mut dyn SurfaceBackend,
    page_num: usize,
    options: &RenderOptions,
) -> Result<RasterPage, RenderError> {
    let viewport = engine
        .viewport(page_num, options.scale)?
        .capped(options.max_rendered_pixels);

    let mut guard = SurfaceGuard::acquire(
        backend,
        viewport.width,
        viewport.height,
        options.transparent,
    )?;
    engine.render(page_num, &viewport, guard.context()?)?;
    let image = guard.read_pixels()?;
    guard.release()?;

    Ok(RasterPage::from_image(page_num, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SurfaceError;
    use crate::pipeline::engine::Viewport;
    use crate::pipeline::surface::{DrawingContext, SoftwareBackend};
    use crate::progress::NoopProgressCallback;
    use image::Rgba;
    use std::cell::RefCell;

    /// Paints every page a solid colour; configured pages fail.
    struct FakeEngine {
        pages: usize,
        fail_paint: Vec<usize>,
        fail_layout: Vec<usize>,
        painted: RefCell<Vec<usize>>,
    }

    impl FakeEngine {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                fail_paint: vec![],
                fail_layout: vec![],
                painted: RefCell::new(vec![]),
            }
        }
    }

    impl RenderEngine for FakeEngine {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn page_size(&self, page_num: usize) -> Result<(f32, f32), RenderError> {
            if self.fail_layout.contains(&page_num) {
                return Err(RenderError::Geometry("broken mediabox".into()));
            }
            Ok((10.0, 20.0))
        }

        fn render(
            &self,
            page_num: usize,
            viewport: &Viewport,
            ctx: &mut dyn DrawingContext,
        ) -> Result<(), RenderError> {
            if self.fail_paint.contains(&page_num) {
                return Err(RenderError::Engine("bad content stream".into()));
            }
            let fill = RgbaImage::from_pixel(
                viewport.width,
                viewport.height,
                Rgba([page_num as u8, 0, 0, 255]),
            );
            ctx.draw_image(0, 0, &fill)?;
            self.painted.borrow_mut().push(page_num);
            Ok(())
        }
    }

    #[test]
    fn renders_every_page_in_order() {
        let engine = FakeEngine::new(3);
        let mut backend = SoftwareBackend::new();
        let report = render_pages(
            &engine,
            &mut backend,
            &RenderOptions::default(),
            &NoopProgressCallback,
        );

        assert_eq!(report.total_pages, 3);
        assert_eq!(report.selected, vec![1, 2, 3]);
        let nums: Vec<_> = report.pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        // 10x20pt at 2x.
        assert_eq!((report.pages[0].width, report.pages[0].height), (20, 40));
        assert_eq!(report.pages[1].pixels[0], 2);
        assert!(report.failures.is_empty());
        assert_eq!(backend.live_surfaces(), 0);
    }

    #[test]
    fn failed_page_is_skipped_and_loop_continues() {
        let mut engine = FakeEngine::new(5);
        engine.fail_paint = vec![3];
        let mut backend = SoftwareBackend::new();
        let report = render_pages(
            &engine,
            &mut backend,
            &RenderOptions::default(),
            &NoopProgressCallback,
        );

        let nums: Vec<_> = report.pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 4, 5]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].page(), 3);
        assert!(matches!(report.failures[0], PageError::RenderFailed { .. }));
        assert_eq!(backend.live_surfaces(), 0);
    }

    #[test]
    fn layout_failure_never_allocates_a_surface() {
        let mut engine = FakeEngine::new(2);
        engine.fail_layout = vec![1];
        let mut backend = SoftwareBackend::new();
        let report = render_pages(
            &engine,
            &mut backend,
            &RenderOptions::default(),
            &NoopProgressCallback,
        );
        assert_eq!(*engine.painted.borrow(), vec![2]);
        assert_eq!(report.failures[0].page(), 1);
        assert_eq!(backend.live_surfaces(), 0);
    }

    #[test]
    fn zero_pages_yields_empty_report() {
        let engine = FakeEngine::new(0);
        let mut backend = SoftwareBackend::new();
        let report = render_pages(
            &engine,
            &mut backend,
            &RenderOptions::default(),
            &NoopProgressCallback,
        );
        assert_eq!(report.total_pages, 0);
        assert!(report.pages.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn page_selection_limits_rendering() {
        let engine = FakeEngine::new(6);
        let mut backend = SoftwareBackend::new();
        let options = RenderOptions {
            pages: PageSelection::Set(vec![5, 2]),
            ..RenderOptions::default()
        };
        let report = render_pages(&engine, &mut backend, &options, &NoopProgressCallback);
        assert_eq!(report.selected, vec![2, 5]);
        assert_eq!(*engine.painted.borrow(), vec![2, 5]);
    }

    #[test]
    fn oversized_pages_are_capped() {
        let engine = FakeEngine::new(1);
        let mut backend = SoftwareBackend::new();
        let options = RenderOptions {
            scale: 10.0,
            max_rendered_pixels: 100,
            ..RenderOptions::default()
        };
        let report = render_pages(&engine, &mut backend, &options, &NoopProgressCallback);
        // 10x20pt at 10x would be 100x200; longest edge capped to 100.
        assert_eq!((report.pages[0].width, report.pages[0].height), (50, 100));
    }

    #[test]
    fn surface_misuse_is_reported_as_surface_failure() {
        let err = RenderError::from(SurfaceError::Destroyed { id: 4 }).into_page_error(2);
        assert!(matches!(err, PageError::SurfaceFailed { page: 2, .. }));
    }
}
