//! Pipeline stages for PDF-to-image printing.
//!
//! Each submodule implements exactly one step, so every stage can be tested
//! without the others. The coordinator in [`crate::convert`] wires them
//! together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ engine ──▶ render ──▶ encode ──▶ materialize ──▶ storage
//! (bytes)   (pdfium)   (surface)  (png/jpg)  (namespace)     (fs)
//! ```
//!
//! 1. [`input`]: read a local path, URL, or vault link into a
//!    [`input::SourceDocument`]
//! 2. [`engine`]: open the document and expose page geometry and painting
//! 3. [`render`]: paint each selected page on a [`surface`] and read the
//!    pixels back; runs in `spawn_blocking` because pdfium is not async-safe
//! 4. [`encode`]: compress each raster page; a bounded blocking fan-out
//! 5. [`materialize`]: pick a fresh folder and write all pages into it
//!    through [`storage`], keeping page order

pub mod encode;
pub mod engine;
pub mod input;
pub mod materialize;
pub mod render;
pub mod storage;
pub mod surface;
