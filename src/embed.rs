//! Note text in and out: parsing `![[link]]` selections and formatting the
//! image embeds that replace them.

use crate::error::Pdf2ImgError;
use crate::output::OutputManifest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default embed line for one image.
pub const DEFAULT_EMBED_TEMPLATE: &str = "![[${filename}]]";

/// Placeholder replaced by each written image path.
pub const FILENAME_PLACEHOLDER: &str = "${filename}";

static EMBED_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\[([^\]]+)\]\]").unwrap());

/// How printed images are written back into a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedOptions {
    /// Line template; every `${filename}` becomes the image path.
    pub template: String,
    /// Keep the original PDF link above the images.
    pub preserve_pdf_link: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            template: DEFAULT_EMBED_TEMPLATE.to_string(),
            preserve_pdf_link: false,
        }
    }
}

/// Pull the link target out of a `![[target]]` selection.
///
/// Only the first embed in the selection is used.
pub fn extract_link_target(selection: &str) -> Result<String, Pdf2ImgError> {
    let trimmed = selection.trim();
    if trimmed.is_empty() {
        return Err(Pdf2ImgError::InvalidInput {
            input: String::new(),
            reason: "select a PDF link such as ![[document.pdf]] first".into(),
        });
    }

    EMBED_LINK
        .captures(trimmed)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|target| !target.is_empty())
        .ok_or_else(|| Pdf2ImgError::InvalidInput {
            input: trimmed.to_string(),
            reason: "not a PDF embed; expected ![[document.pdf]]".into(),
        })
}

/// Render the replacement text for a selection: one embed per image, in
/// manifest order, optionally preceded by `original_link`.
///
/// An empty manifest yields just the preserved link, or an empty string.
pub fn format_embeds(
    manifest: &OutputManifest,
    options: &EmbedOptions,
    original_link: Option<&str>,
) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(manifest.len() + 1);
    if options.preserve_pdf_link {
        if let Some(link) = original_link.map(str::trim).filter(|l| !l.is_empty()) {
            lines.push(link.to_string());
        }
    }
    lines.extend(
        manifest
            .iter()
            .map(|file| options.template.replace(FILENAME_PLACEHOLDER, file)),
    );
    lines.join("\n")
}
