//! Input resolution: turn a path, URL, or note link into document bytes.
//!
//! pdfium loads from a byte slice, so every input ends up fully in memory as
//! a [`SourceDocument`]. The `%PDF` magic bytes are checked up front so
//! callers get a meaningful error rather than a pdfium parse failure.

use crate::error::Pdf2ImgError;
use crate::pipeline::storage::FsStorage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A document to print: its base name and raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// File stem used to name the output folder and images.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

impl std::fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocument")
            .field("name", &self.name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// File stem of a path, or `document` when there is none.
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Resolve the input string to document bytes.
///
/// URLs are downloaded; anything else is read as a local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<SourceDocument, Pdf2ImgError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Read a local file, validating existence, permission, and PDF magic bytes.
pub async fn read_local(path: &Path) -> Result<SourceDocument, Pdf2ImgError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2ImgError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(Pdf2ImgError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    check_magic(&bytes, path)?;
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(SourceDocument::new(document_name(path), bytes))
}

fn check_magic(bytes: &[u8], path: &Path) -> Result<(), Pdf2ImgError> {
    if bytes.len() >= 4 && &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(Pdf2ImgError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceDocument, Pdf2ImgError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2ImgError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2ImgError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2ImgError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2ImgError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Pdf2ImgError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    check_magic(&bytes, Path::new(&filename))?;
    info!("Downloaded {} bytes as '{}'", bytes.len(), filename);

    Ok(SourceDocument::new(
        document_name(Path::new(&filename)),
        bytes.to_vec(),
    ))
}

/// Extract a reasonable filename from the URL path.
pub fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

// ── Vault links ──────────────────────────────────────────────────────────

/// Find the PDF a note link points at inside a vault.
///
/// `target` is the text inside `![[…]]`; an `|alias` suffix is ignored.
/// An exact vault-relative path wins; otherwise the first file (in sorted
/// walk order) whose vault-relative path contains `target` is used. The
/// match must be a `.pdf` file.
pub fn resolve_vault_link(vault_root: &Path, target: &str) -> Result<PathBuf, Pdf2ImgError> {
    let target = target.split('|').next().unwrap_or_default().trim();
    if target.is_empty() {
        return Err(Pdf2ImgError::InvalidInput {
            input: target.to_string(),
            reason: "empty link target".into(),
        });
    }

    // Links are vault-relative; `..` or an absolute path would leave the vault.
    let exact = FsStorage::new(vault_root)
        .resolve(target)
        .map_err(|e| Pdf2ImgError::InvalidInput {
            input: target.to_string(),
            reason: e.to_string(),
        })?;
    let found = if exact.is_file() {
        Some(exact)
    } else {
        WalkDir::new(vault_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                entry
                    .path()
                    .strip_prefix(vault_root)
                    .map(|rel| vault_path(rel).contains(target))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
    };

    let Some(path) = found else {
        return Err(Pdf2ImgError::FileNotFound {
            path: PathBuf::from(target),
        });
    };

    let is_pdf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return Err(Pdf2ImgError::InvalidInput {
            input: target.to_string(),
            reason: "linked file is not a PDF".into(),
        });
    }

    debug!("Resolved link '{}' → {}", target, path.display());
    Ok(path)
}

/// A relative path with `/` separators, as notes write it.
fn vault_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
