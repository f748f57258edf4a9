//! Durable backends for the ontology snapshot.
//!
//! Every save rewrites the complete graph. [`FileStorage`] replaces the file
//! atomically (temp file + fsync + rename), so a crash mid-write leaves the
//! previous snapshot intact.

use crate::{ntriples, GraphError, Result, TripleStore};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where an [`OntologyGraph`](crate::OntologyGraph) loads and saves its triples.
pub trait Storage: Send + Sync {
    /// Read the full snapshot. Must not return a partially parsed graph.
    fn load(&self) -> Result<TripleStore>;

    /// Replace the durable snapshot with `store`. On error the previous
    /// snapshot must still be intact.
    fn save(&self, store: &TripleStore) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// N-Triples file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling of the target so the final rename stays on one filesystem.
    fn temp_path(&self) -> Result<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                GraphError::Persistence(format!("{} has no file name", self.path.display()))
            })?
            .to_string_lossy();
        let mut nonce = [0u8; 8];
        getrandom::fill(&mut nonce)
            .map_err(|e| GraphError::Persistence(format!("entropy unavailable: {e}")))?;
        let suffix: String = nonce.iter().map(|b| format!("{b:02x}")).collect();
        Ok(self.path.with_file_name(format!(".{file_name}.{suffix}.tmp")))
    }

    fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<TripleStore> {
        let bytes = fs::read(&self.path).map_err(|e| {
            GraphError::Persistence(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let text = String::from_utf8(bytes).map_err(|e| {
            let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
            GraphError::CorruptOntology {
                line: valid.iter().filter(|b| **b == b'\n').count() + 1,
                reason: "invalid UTF-8".into(),
            }
        })?;
        let store = ntriples::parse(&text)?;
        tracing::debug!(path = %self.path.display(), triples = store.len(), "loaded ontology file");
        Ok(store)
    }

    fn save(&self, store: &TripleStore) -> Result<()> {
        let body = ntriples::serialize(store)?;
        let tmp = self.temp_path()?;

        let written =
            Self::write_synced(&tmp, body.as_bytes()).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(GraphError::Persistence(format!(
                "failed to save {}: {e}",
                self.path.display()
            )));
        }

        // The new snapshot is already in place, so a failed directory sync
        // must not be reported as a failed save.
        if let Err(e) = sync_parent_dir(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "directory sync failed");
        }

        tracing::debug!(
            path = %self.path.display(),
            triples = store.len(),
            bytes = body.len(),
            "saved ontology file"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Non-durable backend holding the last saved snapshot as N-Triples text.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshot: Mutex<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing N-Triples document.
    pub fn from_ntriples(text: impl Into<String>) -> Self {
        Self {
            snapshot: Mutex::new(text.into()),
        }
    }

    /// The last saved document.
    pub fn contents(&self) -> Result<String> {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .map_err(|_| GraphError::Internal("memory storage lock poisoned".into()))
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<TripleStore> {
        ntriples::parse(&self.contents()?)
    }

    fn save(&self, store: &TripleStore) -> Result<()> {
        let body = ntriples::serialize(store)?;
        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|_| GraphError::Internal("memory storage lock poisoned".into()))?;
        *snapshot = body;
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".into()
    }
}
