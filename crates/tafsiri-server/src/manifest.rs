//! Checkpoint storage manifest.
//!
//! A models directory holds one subdirectory per checkpoint and a
//! `manifest.json` mapping direction keys to those artifacts, in
//! priority order. The entry order decides which engines start HOT.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tafsiri_core::{Direction, Error, Result};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub directions: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub direction: Direction,
    /// Checkpoint directory, relative to the manifest.
    pub checkpoint: PathBuf,
}

impl Manifest {
    pub fn load(models_dir: &Path) -> Result<Self> {
        let path = models_dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| Error::ModelLoad(format!("{}: {}", path.display(), e)))?;
        if manifest.directions.is_empty() {
            return Err(Error::ModelLoad(format!(
                "{}: no directions configured",
                path.display()
            )));
        }
        Ok(manifest)
    }
}
