//! Output materialization: pick a fresh folder, then write every page into it.
//!
//! ## Namespace selection
//!
//! Each run writes into `{image_folder}/{base_name}-{16 hex digits}`. The
//! suffix is random, so two runs over the same document never share a
//! folder. A candidate that already exists, or that another writer creates
//! between our check and our create, costs one attempt; after
//! `max_namespace_attempts` the run fails with
//! [`Pdf2ImgError::NamespaceExhausted`].
//!
//! ## Ordering
//!
//! Writes complete in any order, but each result is placed back at its input
//! index, so the manifest always follows ascending page order.

use crate::config::FileNaming;
use crate::error::Pdf2ImgError;
use crate::output::OutputManifest;
use crate::pipeline::encode::EncodedPage;
use crate::pipeline::storage::{join_path, Storage};
use crate::progress::ConversionProgressCallback;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::io;
use tracing::{debug, info, warn};

/// Characters that break file names or note links.
const UNSAFE_NAME_CHARS: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '^', '[', ']',
];

/// Run `attempt` up to `max_attempts` times.
///
/// Each call returns `Ok(Some(v))` to finish, `Ok(None)` to try again, or
/// `Err(e)` to abort immediately. Returns `Ok(None)` once every attempt has
/// been used.
pub async fn retry_bounded<T, E, F, Fut>(max_attempts: u32, mut attempt: F) -> Result<Option<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for n in 1..=max_attempts {
        if let Some(value) = attempt(n).await? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Make a document name safe for use in file names and links.
///
/// Unsafe characters become `-`; an empty result becomes `document`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if UNSAFE_NAME_CHARS.contains(&c) || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

fn candidate_namespace(image_folder: &str, base_name: &str) -> String {
    let suffix: u64 = rand::random();
    join_path(image_folder, &format!("{}-{:016x}", base_name, suffix))
}

/// Find and create a folder that did not exist before this run.
pub async fn create_namespace(
    storage: &dyn Storage,
    image_folder: &str,
    base_name: &str,
    max_attempts: u32,
) -> Result<String, Pdf2ImgError> {
    let claim = |attempt| claim_namespace(storage, image_folder, base_name, attempt);
    let created = retry_bounded(max_attempts, claim).await?;

    created.ok_or_else(|| Pdf2ImgError::NamespaceExhausted {
        parent: image_folder.to_string(),
        base_name: base_name.to_string(),
        attempts: max_attempts,
    })
}

/// One namespace attempt: `Ok(None)` when the candidate is already taken.
async fn claim_namespace(
    storage: &dyn Storage,
    image_folder: &str,
    base_name: &str,
    attempt: u32,
) -> Result<Option<String>, Pdf2ImgError> {
    let candidate = candidate_namespace(image_folder, base_name);

    let taken = storage
        .exists(&candidate)
        .await
        .map_err(|source| Pdf2ImgError::ContainerCreateFailed {
            path: candidate.clone(),
            source,
        })?;
    if taken {
        debug!("Namespace '{}' taken (attempt {})", candidate, attempt);
        return Ok(None);
    }

    match storage.create_container(&candidate).await {
        Ok(()) => Ok(Some(candidate)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            warn!(
                "Namespace '{}' appeared before it could be created (attempt {})",
                candidate, attempt
            );
            Ok(None)
        }
        Err(source) => Err(Pdf2ImgError::ContainerCreateFailed {
            path: candidate,
            source,
        }),
    }
}

/// The encoded pages of one run, ready to be written.
#[derive(Debug, Clone)]
pub struct OutputBatch {
    base_name: String,
    image_folder: String,
    pages: Vec<EncodedPage>,
}

impl OutputBatch {
    /// `pages` must already be in ascending page order.
    pub fn new(base_name: &str, image_folder: &str, pages: Vec<EncodedPage>) -> Self {
        Self {
            base_name: sanitize_name(base_name),
            image_folder: image_folder.to_string(),
            pages,
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Limits for [`materialize`].
#[derive(Debug, Clone, Copy)]
pub struct MaterializeOptions {
    pub concurrency: usize,
    pub max_namespace_attempts: u32,
}

/// Write every page of `batch` into a fresh folder.
///
/// An empty batch writes nothing and creates no folder. On a write failure
/// the pages that did succeed are left in place.
pub async fn materialize(
    batch: OutputBatch,
    storage: &dyn Storage,
    naming: &FileNaming,
    options: MaterializeOptions,
    progress: &dyn ConversionProgressCallback,
) -> Result<OutputManifest, Pdf2ImgError> {
    if batch.is_empty() {
        return Ok(OutputManifest::default());
    }

    let OutputBatch {
        base_name,
        image_folder,
        pages,
    } = batch;
    let total = pages.len();

    let namespace = create_namespace(
        storage,
        &image_folder,
        &base_name,
        options.max_namespace_attempts,
    )
    .await?;
    info!("Writing {} page images to '{}'", total, namespace);

    let jobs: Vec<(usize, usize, String, Vec<u8>)> = pages
        .into_iter()
        .enumerate()
        .map(|(idx, page)| {
            let file = naming.render(&base_name, page.page_num, page.format.extension());
            (idx, page.page_num, join_path(&namespace, &file), page.into_bytes())
        })
        .collect();

    let mut slots: Vec<Option<String>> = vec![None; total];
    let mut failures: Vec<(usize, String, io::Error)> = Vec::new();

    let writes = jobs.into_iter().map(|(idx, page_num, path, bytes)| async move {
        let result = storage.write_binary(&path, bytes).await;
        (idx, page_num, path, result)
    });
    let mut writes = stream::iter(writes).buffer_unordered(options.concurrency.max(1));

    while let Some((idx, page_num, path, result)) = writes.next().await {
        match result {
            Ok(()) => {
                progress.on_page_written(page_num, total, &path);
                slots[idx] = Some(path);
            }
            Err(e) => {
                warn!("Failed to write '{}': {}", path, e);
                failures.push((idx, path, e));
            }
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|(idx, _, _)| *idx);
        let failed = failures.len();
        let (_, path, source) = failures.swap_remove(0);
        return Err(Pdf2ImgError::OutputWriteFailed {
            path,
            failed,
            total,
            source,
        });
    }

    Ok(OutputManifest {
        namespace: Some(namespace),
        files: slots.into_iter().flatten().collect(),
    })
}
