use super::{KeyValueStore, Namespaces};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current state file version
const STATE_VERSION: &str = "1.0";

/// On-disk document
#[derive(Debug, Clone, Deserialize, Serialize)]
struct StateDocument {
    version: String,
    #[serde(default)]
    namespaces: Namespaces,
}

/// JSON file-backed store
///
/// The whole document is kept in memory and rewritten atomically on `flush`.
/// `begin` locks a sidecar `.lock` file next to the document and re-reads the
/// document, so gates in other processes never overwrite each other's
/// updates with a stale copy.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    data: Namespaces,
    dirty: bool,
    lock: Option<File>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_document(&path)?;

        Ok(Self {
            lock_path: path.with_extension("lock"),
            path,
            data,
            dirty: false,
            lock: None,
        })
    }
}

fn load_document(path: &Path) -> Result<Namespaces> {
    if !path.exists() {
        return Ok(Namespaces::new());
    }

    let content = std::fs::read_to_string(path)?;
    let document: StateDocument = serde_json::from_str(&content)?;

    if document.version != STATE_VERSION {
        warn!(
            "State file version mismatch (expected {}, got {}). Starting with empty state.",
            STATE_VERSION, document.version
        );
        return Ok(Namespaces::new());
    }

    Ok(document.namespaces)
}

impl KeyValueStore for FileStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.data.get(namespace)?.get(key).cloned()
    }

    fn put(&mut self, namespace: &str, key: &str, value: Value) {
        self.data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty = true;
    }

    fn remove(&mut self, namespace: &str, key: &str) {
        if let Some(map) = self.data.get_mut(namespace) {
            if map.remove(key).is_some() {
                self.dirty = true;
            }
        }
    }

    fn clear_namespace(&mut self, namespace: &str) {
        if self.data.remove(namespace).is_some() {
            self.dirty = true;
        }
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let document = StateDocument {
            version: STATE_VERSION.to_string(),
            namespaces: self.data.clone(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        crate::platform::atomic_write(&self.path, content.as_bytes())?;
        self.dirty = false;

        debug!("Flushed state to {}", self.path.display());
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        let lock = crate::platform::lock_exclusive(&self.lock_path)?;
        self.data = load_document(&self.path)?;
        self.dirty = false;
        self.lock = Some(lock);
        Ok(())
    }

    fn end(&mut self) {
        // Closing the handle releases the lock
        self.lock = None;
    }
}

/// Get the per-user state file path
pub fn get_state_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "family-guard").ok_or_else(|| {
        Error::InvalidConfig("Could not determine state file location".to_string())
    })?;

    let mut path = dirs.data_local_dir().to_path_buf();
    path.push("state.json");
    Ok(path)
}
