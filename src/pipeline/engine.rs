//! The render engine seam: page count, page geometry, and painting.
//!
//! The pipeline never interprets PDF content itself. It talks to a
//! [`RenderEngine`] for one opened document, obtained from a
//! [`DocumentDecoder`]. The production decoder is [`PdfiumDecoder`], which
//! binds the pdfium C++ library through `pdfium-render`.
//!
//! ## Engine lifetime
//!
//! A pdfium document borrows the library bindings it was loaded with, so an
//! opened engine cannot outlive the decoder call that created it.
//! [`DocumentDecoder::with_engine`] hands the engine to a closure and drops
//! both when the closure returns.

use crate::error::{Pdf2ImgError, RenderError};
use crate::output::DocumentMetadata;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::surface::DrawingContext;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Pixel size of one page at a given scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl Viewport {
    /// Scale an intrinsic page size (in points) to whole pixels.
    ///
    /// Each edge is rounded and at least one pixel.
    pub fn from_points(width_pt: f32, height_pt: f32, scale: f32) -> Result<Self, RenderError> {
        if !(width_pt.is_finite() && height_pt.is_finite() && scale.is_finite())
            || width_pt <= 0.0
            || height_pt <= 0.0
            || scale <= 0.0
        {
            return Err(RenderError::Geometry(format!(
                "{width_pt}x{height_pt}pt at scale {scale}"
            )));
        }
        Ok(Self {
            width: (width_pt * scale).round().max(1.0) as u32,
            height: (height_pt * scale).round().max(1.0) as u32,
            scale,
        })
    }

    /// Shrink proportionally so that neither edge exceeds `max_edge`.
    pub fn capped(self, max_edge: u32) -> Self {
        let longest = self.width.max(self.height);
        if max_edge == 0 || longest <= max_edge {
            return self;
        }
        let factor = max_edge as f32 / longest as f32;
        Self {
            width: ((self.width as f32 * factor).round() as u32).clamp(1, max_edge),
            height: ((self.height as f32 * factor).round() as u32).clamp(1, max_edge),
            scale: self.scale * factor,
        }
    }
}

/// One opened document.
///
/// Page numbers are 1-based throughout.
pub trait RenderEngine {
    fn page_count(&self) -> usize;

    /// Intrinsic page size in points.
    fn page_size(&self, page_num: usize) -> Result<(f32, f32), RenderError>;

    /// Page geometry at `scale`.
    fn viewport(&self, page_num: usize, scale: f32) -> Result<Viewport, RenderError> {
        let (w, h) = self.page_size(page_num)?;
        Viewport::from_points(w, h, scale)
    }

    /// Paint the page into `ctx`, which is sized to `viewport`.
    fn render(
        &self,
        page_num: usize,
        viewport: &Viewport,
        ctx: &mut dyn DrawingContext,
    ) -> Result<(), RenderError>;
}

/// Opens documents for the render loop.
pub trait DocumentDecoder: Send + Sync {
    /// Decode `document` and run `job` against the opened engine.
    ///
    /// A document that cannot be opened at all is a fatal error; nothing
    /// is rendered.
    fn with_engine(
        &self,
        document: &SourceDocument,
        password: Option<&str>,
        job: &mut dyn FnMut(&dyn RenderEngine),
    ) -> Result<(), Pdf2ImgError>;

    /// Read document metadata without rendering.
    fn metadata(
        &self,
        document: &SourceDocument,
        password: Option<&str>,
    ) -> Result<DocumentMetadata, Pdf2ImgError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`DocumentDecoder`] backed by pdfium.
///
/// The library is located, in order, at the configured path, at
/// `PDFIUM_LIB_PATH`, or through the system loader.
#[derive(Debug, Clone, Default)]
pub struct PdfiumDecoder {
    library: Option<PathBuf>,
}

impl PdfiumDecoder {
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    fn bind(&self) -> Result<Pdfium, Pdf2ImgError> {
        let explicit = self
            .library
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => {
                debug!("Binding pdfium from {}", path.display());
                Pdfium::bind_to_library(&path)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| Pdf2ImgError::PdfiumBindingFailed(e.to_string()))?;

        Ok(Pdfium::new(bindings))
    }
}

/// Map a pdfium load failure to the matching decode error.
fn classify_load_error(name: &str, password: Option<&str>, err: PdfiumError) -> Pdf2ImgError {
    let detail = format!("{:?}", err);
    if detail.contains("Password") || detail.contains("password") {
        if password.is_some() {
            Pdf2ImgError::WrongPassword {
                name: name.to_string(),
            }
        } else {
            Pdf2ImgError::PasswordRequired {
                name: name.to_string(),
            }
        }
    } else {
        Pdf2ImgError::CorruptPdf {
            name: name.to_string(),
            detail,
        }
    }
}

impl DocumentDecoder for PdfiumDecoder {
    fn with_engine(
        &self,
        document: &SourceDocument,
        password: Option<&str>,
        job: &mut dyn FnMut(&dyn RenderEngine),
    ) -> Result<(), Pdf2ImgError> {
        let pdfium = self.bind()?;
        let loaded = pdfium
            .load_pdf_from_byte_slice(&document.bytes, password)
            .map_err(|e| classify_load_error(&document.name, password, e))?;

        let engine = PdfiumEngine { document: loaded };
        info!("PDF loaded: {} pages", engine.page_count());
        job(&engine);
        Ok(())
    }

    fn metadata(
        &self,
        document: &SourceDocument,
        password: Option<&str>,
    ) -> Result<DocumentMetadata, Pdf2ImgError> {
        let pdfium = self.bind()?;
        let loaded = pdfium
            .load_pdf_from_byte_slice(&document.bytes, password)
            .map_err(|e| classify_load_error(&document.name, password, e))?;

        let metadata = loaded.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().trim().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        Ok(DocumentMetadata {
            name: document.name.clone(),
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
            modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
            page_count: loaded.pages().len() as usize,
            pdf_version: format!("{:?}", loaded.version()),
            byte_size: document.bytes.len(),
        })
    }
}

/// [`RenderEngine`] over one pdfium document.
pub struct PdfiumEngine<'a> {
    document: PdfDocument<'a>,
}

impl PdfiumEngine<'_> {
    fn page(&self, page_num: usize) -> Result<PdfPage<'_>, RenderError> {
        let total = self.page_count();
        if page_num == 0 || page_num > total {
            return Err(RenderError::NoSuchPage {
                page: page_num,
                total,
            });
        }
        let index = u16::try_from(page_num - 1).map_err(|_| RenderError::NoSuchPage {
            page: page_num,
            total,
        })?;
        self.document
            .pages()
            .get(index)
            .map_err(|e| RenderError::Engine(format!("{:?}", e)))
    }
}

impl RenderEngine for PdfiumEngine<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, page_num: usize) -> Result<(f32, f32), RenderError> {
        let page = self.page(page_num)?;
        Ok((page.width().value, page.height().value))
    }

    fn render(
        &self,
        page_num: usize,
        viewport: &Viewport,
        ctx: &mut dyn DrawingContext,
    ) -> Result<(), RenderError> {
        let page = self.page(page_num)?;

        let mut config = PdfRenderConfig::new()
            .set_target_width(viewport.width as i32)
            .set_target_height(viewport.height as i32)
            .render_form_data(true);
        if ctx.is_transparent() {
            config = config.set_clear_color(PdfColor::new(255, 255, 255, 0));
        }

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| RenderError::Engine(format!("{:?}", e)))?;
        let image = bitmap.as_image().to_rgba8();
        debug!(
            "Painted page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        ctx.draw_image(0, 0, &image)?;
        Ok(())
    }
}
