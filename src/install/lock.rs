// src/install/lock.rs

//! Per-package install lock
//!
//! Installs of the same package name under the same prefix serialize on an
//! exclusive `flock` at `<prefix>/var/formulary/locks/<name>.lock`.
//! Different packages never contend. The lock is released when the guard
//! is dropped, or by the kernel if the process dies.

use crate::error::InstallError;
use crate::path::sanitize_filename;
use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock directory relative to the prefix
pub const LOCK_DIR: &str = "var/formulary/locks";

/// Exclusive lock on one package name
#[derive(Debug)]
pub struct PackageLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl PackageLock {
    /// Lock file location for `name` under `prefix`
    pub fn lock_path(prefix: &Path, name: &str) -> Result<PathBuf, InstallError> {
        let name = sanitize_filename(name).map_err(|e| InstallError::PathTraversal(e.to_string()))?;
        Ok(prefix.join(LOCK_DIR).join(format!("{name}.lock")))
    }

    /// Acquire the lock, blocking until any other holder releases it
    pub fn acquire(prefix: &Path, name: &str) -> Result<Self, InstallError> {
        let path = Self::lock_path(prefix, name)?;
        let file = Self::open(&path)?;

        debug!("Waiting for lock {}", path.display());
        file.lock_exclusive().map_err(|e| InstallError::Lock {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!("Acquired lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Try to acquire without blocking
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(prefix: &Path, name: &str) -> Result<Option<Self>, InstallError> {
        let path = Self::lock_path(prefix, name)?;
        let file = Self::open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired lock {}", path.display());
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(InstallError::Lock {
                path,
                reason: e.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<File, InstallError> {
        let lock_err = |e: io::Error| InstallError::Lock {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        File::create(path).map_err(lock_err)
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        debug!("Released lock {}", self.path.display());
    }
}
