//! Durable byte storage.
//!
//! Keys are relative, `/`-separated paths such as `history/index.json`.
//! [`FileStorage`] maps them onto a directory tree; [`MemoryStorage`] keeps
//! them in a map for tests and ephemeral runs.

mod telemetry;

pub use telemetry::{TelemetrySnapshot, TelemetryStore, METRICS_FILE, TRACES_FILE};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{ColloquyError, ColloquyResult};

pub const WORKSPACE_DIR_NAME: &str = ".colloquy";
const APP_DIR_NAME: &str = "colloquy";

#[async_trait]
pub trait Storage: Send + Sync {
    /// Contents of `key`, or `None` when it does not exist.
    async fn read(&self, key: &str) -> ColloquyResult<Option<Vec<u8>>>;

    async fn write(&self, key: &str, data: &[u8]) -> ColloquyResult<()>;

    /// File names directly under `dir`, sorted.
    async fn list(&self, dir: &str) -> ColloquyResult<Vec<String>>;

    /// Remove `key`. Returns false when it did not exist.
    async fn delete(&self, key: &str) -> ColloquyResult<bool>;

    fn location(&self) -> String;
}

fn validate_key(key: &str) -> ColloquyResult<()> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && !key.starts_with('/')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(ColloquyError::validation(format!(
            "Invalid storage key '{}'",
            key
        )))
    }
}

/// Storage rooted at a directory on the local file system.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> ColloquyResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, s| p.join(s)))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, key: &str) -> ColloquyResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ColloquyError::IoError(format!(
                "Failed to read {:?}: {}",
                path, e
            ))),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> ColloquyResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ColloquyError::IoError(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        // Each writer gets its own temp file so overlapping writes to one key
        // never share a partially written file.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            file_name,
            Uuid::new_v4().simple()
        ));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ColloquyError::IoError(format!(
                "Failed to write {:?}: {}",
                tmp, e
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ColloquyError::IoError(format!(
                "Failed to replace {:?}: {}",
                path, e
            )));
        }

        trace!(path = ?path, bytes = data.len(), "Wrote storage file");
        Ok(())
    }

    async fn list(&self, dir: &str) -> ColloquyResult<Vec<String>> {
        let path = self.path_for(dir)?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ColloquyError::IoError(format!(
                    "Failed to read directory {:?}: {}",
                    path, e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_file() && !is_temp_file(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, key: &str) -> ColloquyResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted storage file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ColloquyError::IoError(format!(
                "Failed to delete {:?}: {}",
                path, e
            ))),
        }
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// In-process storage backed by a map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, key: &str) -> ColloquyResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.files.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, data: &[u8]) -> ColloquyResult<()> {
        validate_key(key)?;
        self.files.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn list(&self, dir: &str) -> ColloquyResult<Vec<String>> {
        validate_key(dir)?;
        let prefix = format!("{}/", dir);
        Ok(self
            .files
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn delete(&self, key: &str) -> ColloquyResult<bool> {
        validate_key(key)?;
        Ok(self.files.lock().remove(key).is_some())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Pick the directory durable state lives under.
///
/// An explicit directory wins, then `<workspace>/.colloquy`, then the
/// platform data directory.
pub fn resolve_storage_root(
    configured: Option<&Path>,
    workspace: Option<&Path>,
) -> ColloquyResult<PathBuf> {
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }

    if let Some(workspace) = workspace {
        return Ok(workspace.join(WORKSPACE_DIR_NAME));
    }

    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or_else(|| {
            ColloquyError::StorageUnavailable(
                "Could not determine the platform data directory".to_string(),
            )
        })
}
