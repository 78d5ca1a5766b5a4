use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::errors::GenerationError;
use crate::models::FileMetadata;

pub const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Read-only access to uploaded files. Uploading and persistence belong to
/// the caller; the pipeline only reads.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn file_metadata(&self, file_id: &str) -> Result<FileMetadata, GenerationError>;

    async fn file_bytes(&self, file_id: &str) -> Result<Vec<u8>, GenerationError>;
}

/// Guess a MIME type from a file name's extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("docx") => DOCX_MIME_TYPE,
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Files in a directory on disk; the file id is the path relative to the root.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, file_id: &str) -> Result<PathBuf, GenerationError> {
        let relative = Path::new(file_id);
        let escapes_root = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if file_id.is_empty() || escapes_root {
            return Err(GenerationError::FileAccess(format!(
                "Invalid file id '{}'",
                file_id
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn file_metadata(&self, file_id: &str) -> Result<FileMetadata, GenerationError> {
        let path = self.resolve(file_id)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| GenerationError::FileAccess(format!("{}: {}", file_id, e)))?;

        if !metadata.is_file() {
            return Err(GenerationError::FileAccess(format!(
                "{}: not a regular file",
                file_id
            )));
        }

        Ok(FileMetadata {
            content_type: content_type_for_path(&path).to_string(),
            size: metadata.len(),
        })
    }

    async fn file_bytes(&self, file_id: &str) -> Result<Vec<u8>, GenerationError> {
        let path = self.resolve(file_id)?;
        debug!(file_id = %file_id, path = %path.display(), "Reading file from disk");
        tokio::fs::read(&path)
            .await
            .map_err(|e| GenerationError::FileAccess(format!("{}: {}", file_id, e)))
    }
}

/// In-memory store, handy for tests and for callers that already hold the
/// upload in memory.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        file_id: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) {
        let mut files = self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        files.insert(file_id.into(), (content_type.into(), bytes.into()));
    }

    fn with_file<T>(
        &self,
        file_id: &str,
        f: impl FnOnce(&str, &[u8]) -> T,
    ) -> Result<T, GenerationError> {
        let files = self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        files
            .get(file_id)
            .map(|(content_type, bytes)| f(content_type, bytes))
            .ok_or_else(|| GenerationError::FileAccess(format!("File '{}' not found", file_id)))
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn file_metadata(&self, file_id: &str) -> Result<FileMetadata, GenerationError> {
        self.with_file(file_id, |content_type, bytes| FileMetadata {
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn file_bytes(&self, file_id: &str) -> Result<Vec<u8>, GenerationError> {
        self.with_file(file_id, |_, bytes| bytes.to_vec())
    }
}
