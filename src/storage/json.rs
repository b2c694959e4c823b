//! JSON snapshot file backend
//!
//! The snapshot is a single JSON object holding the entire global-variable
//! namespace; every flush overwrites the whole file. Interpretation of the
//! tree lives in the persistence coordinator; this module only moves bytes.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Handle on the snapshot file location
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    /// Resolve the snapshot location, creating parent directories so the
    /// first flush can't fail on a missing path.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the snapshot. Absent file is `None`; an unparsable
    /// file is a format error, never silently discarded.
    pub fn read(&self) -> Result<Option<serde_json::Value>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let tree = serde_json::from_str(&contents).map_err(|e| {
            Error::Format(format!("unparsable snapshot {}: {}", self.path.display(), e))
        })?;
        Ok(Some(tree))
    }

    /// Overwrite the snapshot with a new tree
    pub fn write(&self, tree: &serde_json::Value) -> Result<()> {
        let contents = serde_json::to_string(tree)
            .map_err(|e| Error::Format(format!("unserializable snapshot: {}", e)))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}
