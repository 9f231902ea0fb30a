//! Transform stage: raw artifacts in, scored records out.
//!
//! Every `*_raw_*.json` artifact is flattened into hourly rows, rows with no
//! pollutant readings at all are dropped, and each surviving row is scored
//! (AQI bucket, severity, risk flag).

pub mod parser;
pub mod scoring;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::record::Record;

/// Raw JSON artifacts in `raw_dir`, sorted by file name. A missing directory has none.
pub fn list_raw_artifacts(raw_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(raw_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("listing {}", raw_dir.display()));
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_artifact = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some("json")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("_raw_"));
        if is_artifact {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Drops rows without any pollutant reading and scores the rest.
pub fn transform_records(rows: impl IntoIterator<Item = Record>) -> Vec<Record> {
    rows.into_iter()
        .filter(|r| !r.all_pollutants_missing())
        .map(|mut r| {
            scoring::score(&mut r);
            r
        })
        .collect()
}

/// Loads, flattens and scores every raw artifact under `raw_dir`.
#[tracing::instrument(skip_all, fields(raw_dir = %raw_dir.display()))]
pub fn transform_all(raw_dir: &Path) -> Result<Vec<Record>> {
    let artifacts = list_raw_artifacts(raw_dir)?;
    info!(artifacts = artifacts.len(), "Transforming raw artifacts");

    let mut combined = Vec::new();
    for path in &artifacts {
        let rows = parser::load_raw_json(path)?;
        debug!(path = %path.display(), rows = rows.len(), "Artifact flattened");
        combined.extend(rows);
    }

    let flattened = combined.len();
    let records = transform_records(combined);
    info!(
        flattened,
        kept = records.len(),
        dropped = flattened - records.len(),
        "Transform complete"
    );
    Ok(records)
}
