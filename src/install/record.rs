// src/install/record.rs

//! Installation records
//!
//! A record (receipt) lists every path one install wrote. Receipts live as
//! JSON at `<prefix>/var/formulary/receipts/<name>.json` and are the only
//! source of truth for file ownership under a prefix.

use crate::error::InstallError;
use crate::path::sanitize_filename;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Receipt directory relative to the prefix
pub const RECEIPT_DIR: &str = "var/formulary/receipts";

/// Proof of a completed install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub name: String,
    pub version: String,
    /// Absolute destination paths, in install order
    pub paths: Vec<PathBuf>,
    pub installed_at: DateTime<Utc>,
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
}

impl InstallationRecord {
    pub fn owns(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// `name-version`
    pub fn id(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Reads and writes receipts under one prefix
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    pub fn new(prefix: &Path) -> Self {
        Self {
            dir: prefix.join(RECEIPT_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn receipt_path(&self, name: &str) -> Result<PathBuf, InstallError> {
        let name = sanitize_filename(name).map_err(|e| InstallError::PathTraversal(e.to_string()))?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Load the receipt for `name`, if any
    pub fn load(&self, name: &str) -> Result<Option<InstallationRecord>, InstallError> {
        let path = self.receipt_path(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(record_error(&path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| record_error(&path, e))
    }

    /// Write a receipt atomically (temp file + rename)
    pub fn save(&self, record: &InstallationRecord) -> Result<PathBuf, InstallError> {
        let path = self.receipt_path(&record.name)?;
        fs::create_dir_all(&self.dir).map_err(|e| record_error(&self.dir, e))?;

        let json = serde_json::to_string_pretty(record).map_err(|e| record_error(&path, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| record_error(&path, e))?;
        tmp.write_all(json.as_bytes()).map_err(|e| record_error(&path, e))?;
        tmp.persist(&path).map_err(|e| record_error(&path, e.error))?;

        debug!("Wrote receipt {}", path.display());
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> Result<(), InstallError> {
        let path = self.receipt_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(record_error(&path, e)),
        }
    }

    /// Every receipt, sorted by package name
    ///
    /// Unreadable receipts are skipped with a warning.
    pub fn all(&self) -> Result<Vec<InstallationRecord>, InstallError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(record_error(&self.dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<InstallationRecord>(&c).map_err(|e| e.to_string()))
            {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable receipt {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// The record that owns `path`, if any
    pub fn owner_of(&self, path: &Path) -> Result<Option<InstallationRecord>, InstallError> {
        Ok(self.all()?.into_iter().find(|r| r.owns(path)))
    }
}

fn record_error(path: &Path, e: impl std::fmt::Display) -> InstallError {
    InstallError::Record {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
