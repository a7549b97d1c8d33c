//! Whole-file JSON state persistence
//!
//! Each table (`orders`, `positions`, `daily_risk`, `market_risk`) lives in
//! its own JSON document. Writes go to a temp file first and then rename
//! over the target, so a crash leaves either the prior or the new valid
//! document, never a truncated one. A corrupt file on load logs and yields
//! an empty store; existing data is never silently overwritten at runtime.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create state dir {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", table))
    }

    /// Load a table. Missing file is a normal fresh start; an unreadable
    /// or corrupt file is reported and treated as empty.
    pub fn load<T: DeserializeOwned>(&self, table: &str) -> Option<T> {
        let path = self.path_for(table);
        if !path.exists() {
            debug!(table, "no persisted state, starting empty");
            return None;
        }

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                error!(table, error = %e, "failed to read state file, starting empty");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => {
                debug!(table, "state loaded");
                Some(value)
            }
            Err(e) => {
                error!(
                    table,
                    error = %e,
                    path = %path.display(),
                    "state file corrupt, starting empty (file left in place)"
                );
                None
            }
        }
    }

    /// Atomically replace a table: write temp, then rename over the target
    pub fn save<T: Serialize>(&self, table: &str, value: &T) {
        let path = self.path_for(table);
        let tmp_path = self.data_dir.join(format!(".{}.json.tmp", table));

        let serialized = match serde_json::to_string_pretty(value) {
            Ok(s) => s,
            Err(e) => {
                error!(table, error = %e, "failed to serialize state");
                return;
            }
        };

        if let Err(e) = fs::write(&tmp_path, serialized) {
            error!(table, error = %e, "failed to write temp state file");
            return;
        }
        if let Err(e) = fs::rename(&tmp_path, &path) {
            error!(table, error = %e, "failed to swap state file into place");
            let _ = fs::remove_file(&tmp_path);
            return;
        }

        debug!(table, path = %path.display(), "state persisted");
    }

    /// Write an arbitrary report document under a sibling directory
    pub fn write_report(&self, reports_dir: impl AsRef<Path>, name: &str, value: &impl Serialize) {
        let dir = reports_dir.as_ref();
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(error = %e, "failed to create reports dir");
            return;
        }
        let path = dir.join(name);
        match serde_json::to_string_pretty(value) {
            Ok(s) => {
                if let Err(e) = fs::write(&path, s) {
                    warn!(error = %e, path = %path.display(), "failed to write report");
                } else {
                    debug!(path = %path.display(), "report written");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize report"),
        }
    }
}
