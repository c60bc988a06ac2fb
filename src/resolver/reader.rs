//! File access capability consumed by the resolver.
//!
//! The host injects one of these; the resolver never touches the filesystem
//! directly. [`FsReader`] reads through `tokio::fs`, [`MemoryReader`] serves an
//! in-memory project (editors with unsaved buffers, tests).

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::utils::normalize_path;

/// Read a file by absolute path. `None` means "does not exist / unreadable";
/// the resolver treats it as a lookup miss, never as an error.
pub trait FileReader: Send + Sync {
    fn read_file<'a>(&'a self, absolute_path: &'a str) -> BoxFuture<'a, Option<String>>;
}

/// Reads from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl FileReader for FsReader {
    fn read_file<'a>(&'a self, absolute_path: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(absolute_path).await {
                Ok(content) => Some(content),
                Err(e) => {
                    tracing::trace!("read miss {}: {}", absolute_path, e);
                    None
                }
            }
        })
    }
}

/// Thread-safe in-memory file map keyed by normalized absolute path.
#[derive(Debug, Default)]
pub struct MemoryReader {
    files: DashMap<String, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a file. Returns the previous content if any.
    pub fn insert(&self, path: &str, content: impl Into<String>) -> Option<String> {
        self.files.insert(normalize_path(path), content.into())
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.files.remove(&normalize_path(path)).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<P: AsRef<str>, C: Into<String>> FromIterator<(P, C)> for MemoryReader {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        let reader = MemoryReader::new();
        for (path, content) in iter {
            reader.insert(path.as_ref(), content);
        }
        reader
    }
}

impl FileReader for MemoryReader {
    fn read_file<'a>(&'a self, absolute_path: &'a str) -> BoxFuture<'a, Option<String>> {
        let content = self
            .files
            .get(&normalize_path(absolute_path))
            .map(|entry| entry.value().clone());
        Box::pin(async move { content })
    }
}
