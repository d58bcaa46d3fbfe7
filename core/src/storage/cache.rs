//! # Local Snapshot Cache
//!
//! A [`SnapshotCache`] that mirrors the last successfully saved document to
//! a single JSON file under a base directory. `load` falls back to this file
//! whenever the remote store is unreachable, restoring the most recently
//! persisted state.

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use shared::UserDocument;
use std::path::{Path, PathBuf};

use super::traits::SnapshotCache;

const SNAPSHOT_FILE: &str = "finboard_snapshot.json";

#[derive(Clone)]
pub struct JsonSnapshotCache {
    base_directory: PathBuf,
}

impl JsonSnapshotCache {
    pub fn new(base_directory: impl AsRef<Path>) -> Result<Self> {
        let base_directory = base_directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_directory)
            .with_context(|| format!("creating cache directory {:?}", base_directory))?;
        Ok(Self { base_directory })
    }

    fn snapshot_path(&self) -> PathBuf {
        self.base_directory.join(SNAPSHOT_FILE)
    }
}

impl SnapshotCache for JsonSnapshotCache {
    fn write_snapshot(&self, document: &UserDocument) -> Result<()> {
        let path = self.snapshot_path();
        let json = serde_json::to_string_pretty(document)?;

        // Atomic write pattern: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &path)?;

        debug!("wrote local snapshot to {:?}", path);
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Value>> {
        let path = self.snapshot_path();
        if !path.exists() {
            debug!("no local snapshot at {:?}", path);
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading local snapshot {:?}", path))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("parsing local snapshot {:?}", path))?;
        Ok(Some(value))
    }
}
