//! Image encoding: raster page → compressed PNG or JPEG bytes.
//!
//! PNG keeps the alpha channel and ignores quality. JPEG has no alpha, so
//! pixels are composited onto white first; a transparent page background
//! therefore comes out white rather than black.
//!
//! Quality is a `[0, 1]` fraction everywhere in this crate and is mapped to
//! the codec's own scale only here.

use crate::config::{OutputFormat, DEFAULT_QUALITY};
use crate::error::EncodeError;
use crate::pipeline::render::RasterPage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

/// Clamp a quality value into `[0, 1]`. NaN falls back to the default.
pub fn clamp_quality(quality: f32) -> f32 {
    if quality.is_nan() {
        DEFAULT_QUALITY
    } else {
        quality.clamp(0.0, 1.0)
    }
}

/// Map a `[0, 1]` quality onto JPEG's 1–100 scale.
fn jpeg_quality(quality: f32) -> u8 {
    (clamp_quality(quality) * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Compressed bytes for one page. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPage {
    pub page_num: usize,
    pub format: OutputFormat,
    bytes: Vec<u8>,
}

impl EncodedPage {
    pub fn new(page_num: usize, format: OutputFormat, bytes: Vec<u8>) -> Result<Self, EncodeError> {
        if bytes.is_empty() {
            return Err(EncodeError::Empty);
        }
        Ok(Self {
            page_num,
            format,
            bytes,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode a rendered page in the requested format.
pub fn encode_page(
    page: &RasterPage,
    format: OutputFormat,
    quality: f32,
) -> Result<EncodedPage, EncodeError> {
    let expected = page.width as usize * page.height as usize * 4;
    if expected == 0 || page.pixels.len() != expected {
        return Err(EncodeError::BufferMismatch {
            expected,
            actual: page.pixels.len(),
        });
    }

    let mut buf = Vec::new();
    match format {
        OutputFormat::Png => {
            PngEncoder::new(&mut buf).write_image(
                &page.pixels,
                page.width,
                page.height,
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::Jpeg => {
            let rgb = flatten_onto_white(&page.pixels);
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality)).write_image(
                &rgb,
                page.width,
                page.height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    debug!(
        "Encoded page {} → {} bytes {}",
        page.page_num,
        buf.len(),
        format.mime_type()
    );
    EncodedPage::new(page.page_num, format, buf)
}

/// Composite straight RGBA over an opaque white background, dropping alpha.
fn flatten_onto_white(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        let a = px[3] as u32;
        for &c in &px[..3] {
            out.push(((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8);
        }
    }
    out
}
