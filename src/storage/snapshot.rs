//! Append-only per-product JSON snapshots.
//!
//! Layout: `<data_dir>/<site>/<run-stamp>/<site>_reviews_<product>.json`.
//! One writer per file is assumed: a product is crawled by exactly one
//! session at a time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::core::error::HarvestResult;
use crate::core::types::{review_id, sort_newest_first, ReviewRecord};

/// Run directory name: `YYYY-MM-DD_HH-MM-SS`. Lexical order is chronological.
pub fn run_stamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    site: String,
    site_dir: PathBuf,
    run_dir: PathBuf,
    sort_field: String,
    id_fields: Vec<String>,
}

impl SnapshotStore {
    pub fn new(
        data_dir: impl AsRef<Path>,
        site: &str,
        stamp: &str,
        sort_field: &str,
        id_fields: &[String],
    ) -> Self {
        let site_dir = data_dir.as_ref().join(site);
        let run_dir = site_dir.join(stamp);
        Self {
            site: site.to_string(),
            site_dir,
            run_dir,
            sort_field: sort_field.to_string(),
            id_fields: id_fields.to_vec(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn file_name(&self, product_id: &str) -> String {
        format!("{}_reviews_{}.json", self.site, product_id)
    }

    pub fn snapshot_path(&self, product_id: &str) -> PathBuf {
        self.run_dir.join(self.file_name(product_id))
    }

    /// Most recent prior snapshot for `product_id`: its id set and records.
    ///
    /// Run directories are scanned newest-first and the first readable file
    /// wins; snapshots are never merged. Unreadable files are skipped.
    pub async fn load_existing(
        &self,
        product_id: &str,
    ) -> HarvestResult<(HashSet<String>, Vec<ReviewRecord>)> {
        let mut folders = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.site_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((HashSet::new(), Vec::new()))
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                folders.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        folders.sort_unstable_by(|a, b| b.cmp(a));

        let file_name = self.file_name(product_id);
        for folder in folders {
            let path = self.site_dir.join(&folder).join(&file_name);
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            match serde_json::from_str::<Vec<ReviewRecord>>(&contents) {
                Ok(records) => {
                    let ids: HashSet<String> = records
                        .iter()
                        .filter_map(|r| review_id(r, &self.id_fields))
                        .collect();
                    info!(
                        "📂 Existing snapshot found: {} ({} reviews)",
                        path.display(),
                        ids.len()
                    );
                    return Ok((ids, records));
                }
                Err(e) => {
                    warn!("⚠️  Could not load snapshot {}: {}", path.display(), e);
                }
            }
        }

        Ok((HashSet::new(), Vec::new()))
    }

    /// Write `records` as-is (no sorting), replacing any existing file.
    pub async fn write_snapshot(&self, path: &Path, records: &[ReviewRecord]) -> HarvestResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Append `new_records` to the file at `path`, re-sort newest-first by the
    /// configured timestamp field and write everything back.
    ///
    /// Returns the total number of records now in the file.
    pub async fn flush_batch(&self, path: &Path, new_records: &[ReviewRecord]) -> HarvestResult<usize> {
        let mut all: Vec<ReviewRecord> = match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        all.extend_from_slice(new_records);
        sort_newest_first(&mut all, &self.sort_field);
        self.write_snapshot(path, &all).await?;
        Ok(all.len())
    }
}
