//! Persisted user preferences.
//!
//! Stored as a small camelCase JSON file in the vault, so a settings file
//! written by one run is picked up by the next. Unknown keys are ignored and
//! missing keys take their defaults.

use crate::config::{
    normalize_folder, ConversionConfigBuilder, OutputFormat, DEFAULT_QUALITY, DEFAULT_SCALE,
};
use crate::embed::{EmbedOptions, DEFAULT_EMBED_TEMPLATE};
use crate::error::Pdf2ImgError;
use crate::pipeline::encode::clamp_quality;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the settings file inside a vault.
pub const SETTINGS_FILE_NAME: &str = ".pdf2img.json";

/// User preferences for printing PDFs into notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Vault folder for printed images; empty means the vault root.
    pub image_folder: String,
    /// Lossy quality in `[0, 1]`.
    pub image_quality: f32,
    /// Embed line template with a `${filename}` placeholder.
    pub image_embed_format: String,
    /// Keep the PDF link above the printed images.
    pub preserve_pdf_link: bool,
    /// Device pixels per PDF point.
    pub scale: f32,
    pub image_format: OutputFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_folder: String::new(),
            image_quality: DEFAULT_QUALITY,
            image_embed_format: DEFAULT_EMBED_TEMPLATE.to_string(),
            preserve_pdf_link: false,
            scale: DEFAULT_SCALE,
            image_format: OutputFormat::default(),
        }
    }
}

impl Settings {
    /// Where the settings file lives for a given vault.
    pub fn path_in(vault_root: &Path) -> PathBuf {
        vault_root.join(SETTINGS_FILE_NAME)
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, Pdf2ImgError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Pdf2ImgError::SettingsLoadFailed {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })
            }
        };

        let settings: Settings =
            serde_json::from_str(&text).map_err(|e| Pdf2ImgError::SettingsLoadFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings.normalized())
    }

    /// Write settings to `path`, creating parent folders.
    pub fn save(&self, path: &Path) -> Result<(), Pdf2ImgError> {
        let save_err = |detail: String| Pdf2ImgError::SettingsSaveFailed {
            path: path.to_path_buf(),
            detail,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| save_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(&self.clone().normalized())
            .map_err(|e| save_err(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| save_err(e.to_string()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Clean up hand-edited values: folder path, quality range, and an empty
    /// embed template.
    pub fn normalized(mut self) -> Self {
        self.image_folder = normalize_folder(&self.image_folder);
        self.image_quality = clamp_quality(self.image_quality);
        if !self.scale.is_finite() {
            self.scale = DEFAULT_SCALE;
        }
        if self.image_embed_format.trim().is_empty() {
            self.image_embed_format = DEFAULT_EMBED_TEMPLATE.to_string();
        }
        self
    }

    /// Fold these preferences into a config builder.
    pub fn apply(&self, builder: ConversionConfigBuilder) -> ConversionConfigBuilder {
        builder
            .image_folder(&self.image_folder)
            .quality(self.image_quality)
            .scale(self.scale)
            .format(self.image_format)
    }

    pub fn embed_options(&self) -> EmbedOptions {
        EmbedOptions {
            template: self.image_embed_format.clone(),
            preserve_pdf_link: self.preserve_pdf_link,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.image_embed_format, "![[${filename}]]");
    }

    #[test]
    fn save_then_load_creates_parent_folders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config/.pdf2img.json");
        let settings = Settings {
            image_folder: "attachments/printed".into(),
            image_quality: 0.9,
            preserve_pdf_link: true,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_is_filled_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(
            &path,
            r#"{"imageFolder": "\\folder1//folder2/", "imageQuality": 7, "unknown": 1}"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.image_folder, "folder1/folder2");
        assert_eq!(settings.image_quality, 1.0);
        assert!(!settings.preserve_pdf_link);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(Pdf2ImgError::SettingsLoadFailed { .. })
        ));
    }

    #[test]
    fn apply_sets_builder_fields() {
        let settings = Settings {
            image_folder: "printed".into(),
            image_quality: 0.25,
            image_format: OutputFormat::Jpeg,
            scale: 3.0,
            ..Settings::default()
        };
        let config = settings.apply(ConversionConfig::builder()).build().unwrap();
        assert_eq!(config.image_folder, "printed");
        assert_eq!(config.quality, 0.25);
        assert_eq!(config.format, OutputFormat::Jpeg);
        assert_eq!(config.scale, 3.0);
    }
}
