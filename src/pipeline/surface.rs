//! Drawing surfaces: where a page is painted before its pixels are read back.
//!
//! Two backends exist because the place a surface comes from depends on how
//! the crate is run:
//!
//! * [`SoftwareBackend`]: an in-process `tiny-skia` pixmap. Used by the CLI
//!   and any headless caller.
//! * [`HostBackend`]: surfaces handed out by an embedding application
//!   through a [`HostSurfaceProvider`] (shared memory, a GPU staging buffer,
//!   a canvas owned by a UI toolkit, …).
//!
//! The backend is chosen once per run by [`BackendKind::detect`]; everything
//! downstream talks to `dyn SurfaceBackend`.
//!
//! ## Handle discipline
//!
//! A [`Surface`] is a handle, not the pixels. It is not `Clone`, so exactly
//! one render step owns it. Every backend call validates the handle: a
//! destroyed handle, or one issued by another backend instance, yields
//! [`SurfaceError`] instead of touching freed storage. [`SurfaceGuard`]
//! destroys the surface on every exit path, so a failed page never leaks its
//! surface into the next iteration.

use crate::config::ConversionConfig;
use crate::error::SurfaceError;
use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiny_skia::{Color, IntSize, Pixmap, PixmapPaint, Transform};
use tracing::{debug, warn};

// ── Drawing context ──────────────────────────────────────────────────────

/// What a render engine sees of a surface: its size and a way to paint.
///
/// Pixels passed to [`draw_image`](DrawingContext::draw_image) are RGBA8
/// with straight (non-premultiplied) alpha and are composited source-over.
pub trait DrawingContext {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn is_transparent(&self) -> bool;
    fn draw_image(&mut self, x: i32, y: i32, image: &RgbaImage) -> Result<(), SurfaceError>;
}

// ── Handles ──────────────────────────────────────────────────────────────

/// Backend instance ids; only used to reject handles from another backend.
static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

/// Exclusive handle to one drawing surface.
#[derive(Debug)]
pub struct Surface {
    id: u64,
    owner: u64,
    width: u32,
    height: u32,
    transparent: bool,
    destroyed: bool,
}

impl Surface {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// Which backend variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process `tiny-skia` pixmaps.
    Software,
    /// Surfaces from the embedding application's [`HostSurfaceProvider`].
    Host,
}

impl BackendKind {
    /// Pick the backend for this execution context: `Host` when the embedding
    /// application supplied a provider, `Software` otherwise.
    pub fn detect(config: &ConversionConfig) -> Self {
        if config.host_surfaces.is_some() {
            BackendKind::Host
        } else {
            BackendKind::Software
        }
    }
}

/// Capability contract shared by both surface backends.
pub trait SurfaceBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Allocate a surface. A transparent surface is explicitly cleared to
    /// fully transparent; an opaque one is explicitly filled white.
    fn create(
        &mut self,
        width: u32,
        height: u32,
        transparent: bool,
    ) -> Result<Surface, SurfaceError>;

    /// Resize a live surface in place, clearing its content again.
    fn reset(&mut self, surface: &mut Surface, width: u32, height: u32) -> Result<(), SurfaceError>;

    /// Release the backing store and mark the handle unusable.
    fn destroy(&mut self, surface: &mut Surface) -> Result<(), SurfaceError>;

    /// The drawing context for a live surface.
    fn context(&mut self, surface: &Surface) -> Result<&mut dyn DrawingContext, SurfaceError>;

    /// Copy the surface's pixels out as straight-alpha RGBA8.
    fn read_pixels(&self, surface: &Surface) -> Result<RgbaImage, SurfaceError>;

    /// Number of surfaces created and not yet destroyed.
    fn live_surfaces(&self) -> usize;
}

/// Instantiate the backend for `kind`.
pub fn create_backend(
    kind: BackendKind,
    host: Option<Arc<dyn HostSurfaceProvider>>,
) -> Result<Box<dyn SurfaceBackend>, SurfaceError> {
    match kind {
        BackendKind::Software => Ok(Box::new(SoftwareBackend::new())),
        BackendKind::Host => {
            let provider = host.ok_or_else(|| {
                SurfaceError::Host("no host surface provider configured".into())
            })?;
            Ok(Box::new(HostBackend::new(provider)))
        }
    }
}

/// Handle bookkeeping shared by both backends.
struct SlotTable<T> {
    owner: u64,
    next_id: u64,
    slots: HashMap<u64, T>,
}

impl<T> SlotTable<T> {
    fn new() -> Self {
        Self {
            owner: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            next_id: 1,
            slots: HashMap::new(),
        }
    }

    fn insert(&mut self, value: T, width: u32, height: u32, transparent: bool) -> Surface {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, value);
        Surface {
            id,
            owner: self.owner,
            width,
            height,
            transparent,
            destroyed: false,
        }
    }

    fn check(&self, surface: &Surface) -> Result<(), SurfaceError> {
        if surface.owner != self.owner {
            return Err(SurfaceError::Unknown { id: surface.id });
        }
        if surface.destroyed {
            return Err(SurfaceError::Destroyed { id: surface.id });
        }
        if !self.slots.contains_key(&surface.id) {
            return Err(SurfaceError::Unknown { id: surface.id });
        }
        Ok(())
    }

    fn get(&self, surface: &Surface) -> Result<&T, SurfaceError> {
        self.check(surface)?;
        self.slots
            .get(&surface.id)
            .ok_or(SurfaceError::Unknown { id: surface.id })
    }

    fn get_mut(&mut self, surface: &Surface) -> Result<&mut T, SurfaceError> {
        self.check(surface)?;
        self.slots
            .get_mut(&surface.id)
            .ok_or(SurfaceError::Unknown { id: surface.id })
    }

    fn remove(&mut self, surface: &mut Surface) -> Result<T, SurfaceError> {
        self.check(surface)?;
        let value = self
            .slots
            .remove(&surface.id)
            .ok_or(SurfaceError::Unknown { id: surface.id })?;
        surface.destroyed = true;
        surface.width = 0;
        surface.height = 0;
        Ok(value)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

fn check_size(width: u32, height: u32) -> Result<(), SurfaceError> {
    if width == 0 || height == 0 {
        return Err(SurfaceError::InvalidSize { width, height });
    }
    Ok(())
}

// ── Software backend ─────────────────────────────────────────────────────

struct SoftwareCanvas {
    pixmap: Pixmap,
    transparent: bool,
}

impl SoftwareCanvas {
    fn allocate(width: u32, height: u32, transparent: bool) -> Result<Self, SurfaceError> {
        check_size(width, height)?;
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| SurfaceError::Allocation {
            width,
            height,
            detail: "pixmap too large".into(),
        })?;
        clear_pixmap(&mut pixmap, transparent);
        Ok(Self {
            pixmap,
            transparent,
        })
    }
}

fn clear_pixmap(pixmap: &mut Pixmap, transparent: bool) {
    if transparent {
        pixmap.fill(Color::TRANSPARENT);
    } else {
        pixmap.fill(Color::WHITE);
    }
}

impl DrawingContext for SoftwareCanvas {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn is_transparent(&self) -> bool {
        self.transparent
    }

    fn draw_image(&mut self, x: i32, y: i32, image: &RgbaImage) -> Result<(), SurfaceError> {
        let (w, h) = image.dimensions();
        let size = IntSize::from_wh(w, h).ok_or(SurfaceError::InvalidSize {
            width: w,
            height: h,
        })?;
        let mut data = image.as_raw().clone();
        premultiply_rgba(&mut data);
        let src = Pixmap::from_vec(data, size).ok_or_else(|| SurfaceError::Allocation {
            width: w,
            height: h,
            detail: "source buffer does not match its size".into(),
        })?;
        self.pixmap.draw_pixmap(
            x,
            y,
            src.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        Ok(())
    }
}

/// Surfaces backed by in-process `tiny-skia` pixmaps.
pub struct SoftwareBackend {
    slots: SlotTable<SoftwareCanvas>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            slots: SlotTable::new(),
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceBackend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn create(
        &mut self,
        width: u32,
        height: u32,
        transparent: bool,
    ) -> Result<Surface, SurfaceError> {
        let canvas = SoftwareCanvas::allocate(width, height, transparent)?;
        let surface = self.slots.insert(canvas, width, height, transparent);
        debug!("software surface #{} {}x{}", surface.id, width, height);
        Ok(surface)
    }

    fn reset(
        &mut self,
        surface: &mut Surface,
        width: u32,
        height: u32,
    ) -> Result<(), SurfaceError> {
        let transparent = surface.transparent;
        let canvas = self.slots.get_mut(surface)?;
        *canvas = SoftwareCanvas::allocate(width, height, transparent)?;
        surface.width = width;
        surface.height = height;
        Ok(())
    }

    fn destroy(&mut self, surface: &mut Surface) -> Result<(), SurfaceError> {
        let id = surface.id;
        drop(self.slots.remove(surface)?);
        debug!("software surface #{} destroyed", id);
        Ok(())
    }

    fn context(&mut self, surface: &Surface) -> Result<&mut dyn DrawingContext, SurfaceError> {
        Ok(self.slots.get_mut(surface)?)
    }

    fn read_pixels(&self, surface: &Surface) -> Result<RgbaImage, SurfaceError> {
        let canvas = self.slots.get(surface)?;
        let (width, height) = (canvas.pixmap.width(), canvas.pixmap.height());
        let mut data = canvas.pixmap.data().to_vec();
        unpremultiply_rgba(&mut data);
        RgbaImage::from_raw(width, height, data).ok_or(SurfaceError::InvalidSize { width, height })
    }

    fn live_surfaces(&self) -> usize {
        self.slots.len()
    }
}

// ── Host backend ─────────────────────────────────────────────────────────

/// Allocates drawing surfaces on behalf of an embedding application.
pub trait HostSurfaceProvider: Send + Sync {
    fn allocate(&self, width: u32, height: u32) -> Result<Box<dyn HostCanvas>, String>;
}

/// A host-owned pixel buffer: tightly packed RGBA8, straight alpha,
/// `width * height * 4` bytes.
///
/// The crate makes no assumption about the initial content; it always
/// clears the buffer itself.
pub trait HostCanvas: Send {
    fn size(&self) -> (u32, u32);
    fn resize(&mut self, width: u32, height: u32) -> Result<(), String>;
    fn pixels(&self) -> &[u8];
    fn pixels_mut(&mut self) -> &mut [u8];
    /// Give the backing store back to the host. Called exactly once.
    fn release(&mut self);
}

struct HostSlot {
    canvas: Box<dyn HostCanvas>,
    transparent: bool,
}

impl HostSlot {
    fn clear(&mut self) -> Result<(), SurfaceError> {
        let (w, h) = self.canvas.size();
        let fill: [u8; 4] = if self.transparent {
            [0, 0, 0, 0]
        } else {
            [255, 255, 255, 255]
        };
        let pixels = self.canvas.pixels_mut();
        let expected = w as usize * h as usize * 4;
        if pixels.len() != expected {
            return Err(SurfaceError::Host(format!(
                "host canvas holds {} bytes, expected {expected} for {w}x{h}",
                pixels.len()
            )));
        }
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&fill);
        }
        Ok(())
    }
}

impl DrawingContext for HostSlot {
    fn width(&self) -> u32 {
        self.canvas.size().0
    }

    fn height(&self) -> u32 {
        self.canvas.size().1
    }

    fn is_transparent(&self) -> bool {
        self.transparent
    }

    fn draw_image(&mut self, x: i32, y: i32, image: &RgbaImage) -> Result<(), SurfaceError> {
        let (w, h) = self.canvas.size();
        let mut target: ImageBuffer<Rgba<u8>, &mut [u8]> =
            ImageBuffer::from_raw(w, h, self.canvas.pixels_mut()).ok_or_else(|| {
                SurfaceError::Host(format!("host canvas buffer does not match {w}x{h}"))
            })?;
        image::imageops::overlay(&mut target, image, i64::from(x), i64::from(y));
        Ok(())
    }
}

/// Surfaces allocated by the embedding application.
pub struct HostBackend {
    provider: Arc<dyn HostSurfaceProvider>,
    slots: SlotTable<HostSlot>,
}

impl HostBackend {
    pub fn new(provider: Arc<dyn HostSurfaceProvider>) -> Self {
        Self {
            provider,
            slots: SlotTable::new(),
        }
    }
}

impl SurfaceBackend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn create(
        &mut self,
        width: u32,
        height: u32,
        transparent: bool,
    ) -> Result<Surface, SurfaceError> {
        check_size(width, height)?;
        let canvas = self
            .provider
            .allocate(width, height)
            .map_err(SurfaceError::Host)?;
        let mut slot = HostSlot {
            canvas,
            transparent,
        };
        let allocated = slot.canvas.size();
        if allocated != (width, height) {
            slot.canvas.release();
            return Err(SurfaceError::Host(format!(
                "host allocated {}x{} for a {width}x{height} surface",
                allocated.0, allocated.1
            )));
        }
        if let Err(e) = slot.clear() {
            slot.canvas.release();
            return Err(e);
        }
        let surface = self.slots.insert(slot, width, height, transparent);
        debug!("host surface #{} {}x{}", surface.id, width, height);
        Ok(surface)
    }

    fn reset(
        &mut self,
        surface: &mut Surface,
        width: u32,
        height: u32,
    ) -> Result<(), SurfaceError> {
        let slot = self.slots.get_mut(surface)?;
        check_size(width, height)?;
        slot.canvas
            .resize(width, height)
            .map_err(SurfaceError::Host)?;
        slot.clear()?;
        surface.width = width;
        surface.height = height;
        Ok(())
    }

    fn destroy(&mut self, surface: &mut Surface) -> Result<(), SurfaceError> {
        let id = surface.id;
        let mut slot = self.slots.remove(surface)?;
        slot.canvas.release();
        debug!("host surface #{} released", id);
        Ok(())
    }

    fn context(&mut self, surface: &Surface) -> Result<&mut dyn DrawingContext, SurfaceError> {
        Ok(self.slots.get_mut(surface)?)
    }

    fn read_pixels(&self, surface: &Surface) -> Result<RgbaImage, SurfaceError> {
        let slot = self.slots.get(surface)?;
        let (width, height) = slot.canvas.size();
        RgbaImage::from_raw(width, height, slot.canvas.pixels().to_vec())
            .ok_or(SurfaceError::InvalidSize { width, height })
    }

    fn live_surfaces(&self) -> usize {
        self.slots.len()
    }
}

// ── Scoped acquisition ───────────────────────────────────────────────────

/// Owns one surface for the duration of a render step and destroys it on
/// drop, whichever way the step ends.
pub struct SurfaceGuard<'a> {
    backend: &'a mut dyn SurfaceBackend,
    surface: Surface,
    released: bool,
}

impl<'a> SurfaceGuard<'a> {
    pub fn acquire(
        backend: &'a mut dyn SurfaceBackend,
        width: u32,
        height: u32,
        transparent: bool,
    ) -> Result<Self, SurfaceError> {
        let surface = backend.create(width, height, transparent)?;
        Ok(Self {
            backend,
            surface,
            released: false,
        })
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn context(&mut self) -> Result<&mut dyn DrawingContext, SurfaceError> {
        self.backend.context(&self.surface)
    }

    pub fn read_pixels(&self) -> Result<RgbaImage, SurfaceError> {
        self.backend.read_pixels(&self.surface)
    }

    /// Destroy the surface now and report the outcome.
    pub fn release(mut self) -> Result<(), SurfaceError> {
        self.released = true;
        self.backend.destroy(&mut self.surface)
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        if self.released || self.surface.is_destroyed() {
            return;
        }
        if let Err(e) = self.backend.destroy(&mut self.surface) {
            warn!("failed to release surface #{}: {}", self.surface.id, e);
        }
    }
}

// ── Pixel helpers ────────────────────────────────────────────────────────

fn premultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        let a = pixel[3] as u32;
        if a == 255 {
            continue;
        }
        pixel[0] = ((pixel[0] as u32 * a + 127) / 255) as u8;
        pixel[1] = ((pixel[1] as u32 * a + 127) / 255) as u8;
        pixel[2] = ((pixel[2] as u32 * a + 127) / 255) as u8;
    }
}

fn unpremultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        let alpha = pixel[3];
        if alpha == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
            continue;
        }
        let a = alpha as u32;
        pixel[0] = ((pixel[0] as u32 * 255 + a / 2) / a).min(255) as u8;
        pixel[1] = ((pixel[1] as u32 * 255 + a / 2) / a).min(255) as u8;
        pixel[2] = ((pixel[2] as u32 * 255 + a / 2) / a).min(255) as u8;
    }
}
