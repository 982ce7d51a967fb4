//! Storage: where encoded pages end up.
//!
//! Paths are storage-relative, `/`-separated strings such as
//! `attachments/report-1a2b…/report-1.png`. The materializer only needs
//! three operations, all async and returning boxed futures so the trait
//! stays object-safe.

use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Path-keyed container and file store.
pub trait Storage: Send + Sync {
    /// Whether a container or file exists at `path`.
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<bool>>;

    /// Create a new container at `path`, including missing parents.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if `path` itself exists.
    fn create_container<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<()>>;

    /// Create a new file at `path` holding `bytes`.
    fn write_binary<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, io::Result<()>>;
}

/// Join storage-relative segments, skipping empty ones.
pub fn join_path(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{}/{}", parent.trim_end_matches('/'), child),
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────

/// [`Storage`] on the local filesystem, rooted at a directory (the vault).
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage path under the root, refusing anything that escapes it.
    pub fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let rel = Path::new(path);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("storage path '{path}' escapes the storage root"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

impl Storage for FsStorage {
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            tokio::fs::try_exists(&full).await
        })
    }

    fn create_container<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::create_dir(&full).await?;
            debug!("Created folder {}", full.display());
            Ok(())
        })
    }

    fn write_binary<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            debug!("Wrote {} bytes to {}", bytes.len(), full.display());
            Ok(())
        })
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// [`Storage`] held in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the file at `path`, if written.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// All written file paths, sorted.
    pub fn files(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// All created container paths, sorted.
    pub fn containers(&self) -> Vec<String> {
        self.lock().containers.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // Every critical section is a single insert or lookup.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(state.containers.contains(path) || state.files.contains_key(path))
        })
    }

    fn create_container<'a>(&'a self, path: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if !state.containers.insert(path.to_string()) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("'{path}' already exists"),
                ));
            }
            Ok(())
        })
    }

    fn write_binary<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.files.contains_key(path) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("'{path}' already exists"),
                ));
            }
            state.files.insert(path.to_string(), bytes);
            Ok(())
        })
    }
}
