// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic persistence of project metadata.
//!
//! `metadata.json` is always written via temp file + fsync + rename, so
//! readers never observe a torn file; the directory fsync makes the
//! rename itself durable.

use pa_core::ProjectMeta;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Name of the metadata file inside a project directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Errors from metadata operations.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write `metadata.json` atomically into `project_dir`.
pub fn write_metadata(project_dir: &Path, meta: &ProjectMeta) -> Result<(), MetadataError> {
    std::fs::create_dir_all(project_dir)?;

    let final_path = project_dir.join(METADATA_FILE);
    let tmp_path = project_dir.join(format!("{METADATA_FILE}.tmp"));

    let data = serde_json::to_vec_pretty(meta)?;
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;

    // Directory fsync is best-effort: rename durability matters for
    // crash recovery, not for correctness of the running process.
    if let Ok(dir) = File::open(project_dir) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Load `metadata.json` from `project_dir`.
pub fn load_metadata(project_dir: &Path) -> Result<ProjectMeta, MetadataError> {
    let data = std::fs::read(project_dir.join(METADATA_FILE))?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
