// src/install/mod.rs

//! Install stage
//!
//! Copies the artifacts named by a manifest's install directives into
//! category directories under a prefix. An install is all-or-nothing: every
//! file written and every directory created is tracked, and any failure
//! (missing artifact, conflict, I/O, receipt write) undoes them and restores
//! replaced files before the error is returned.
//!
//! Ownership comes from receipts. A destination may only be replaced when
//! the receipt for the same name and version lists it. A package installed
//! at another version must be uninstalled first, so every file under the
//! prefix stays owned by exactly one receipt.

mod lock;
mod record;

pub use lock::{LOCK_DIR, PackageLock};
pub use record::{InstallationRecord, RECEIPT_DIR, ReceiptStore};

use crate::error::InstallError;
use crate::fetch::SourceTree;
use crate::manifest::{InstallItem, Manifest};
use crate::path::safe_join;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix for files moved aside while being replaced
const BACKUP_SUFFIX: &str = ".formulary-bak";

/// Installs build artifacts under one prefix
#[derive(Debug, Clone)]
pub struct Installer {
    prefix: PathBuf,
    receipts: ReceiptStore,
}

impl Installer {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let receipts = ReceiptStore::new(&prefix);
        Self { prefix, receipts }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// Where an install item lands
    pub fn destination(&self, manifest: &Manifest, item: &InstallItem) -> Result<PathBuf, InstallError> {
        let file_name = item
            .from
            .file_name()
            .ok_or_else(|| InstallError::PathTraversal(item.from.display().to_string()))?;
        let relative = item.category.subdir(&manifest.name).join(file_name);

        safe_join(&self.prefix, &relative).map_err(|e| InstallError::PathTraversal(e.to_string()))
    }

    /// Install from an extracted, built source tree
    pub fn install(&self, manifest: &Manifest, tree: &SourceTree) -> Result<InstallationRecord, InstallError> {
        self.install_from(manifest, tree.root())
    }

    /// Install from an arbitrary build directory
    pub fn install_from(&self, manifest: &Manifest, source_root: &Path) -> Result<InstallationRecord, InstallError> {
        let plan = manifest.install_plan()?;
        info!(
            "Installing {} ({} files) into {}",
            manifest.id(),
            plan.len(),
            self.prefix.display()
        );

        let previous = self.receipts.load(&manifest.name)?;
        let mut txn = InstallTransaction::default();

        match self.apply(manifest, source_root, &plan, previous.as_ref(), &mut txn) {
            Ok(record) => {
                txn.commit(&self.prefix);
                info!("Installed {}", manifest.id());
                Ok(record)
            }
            Err(e) => {
                warn!("Install of {} failed, rolling back: {}", manifest.id(), e);
                txn.rollback();
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        manifest: &Manifest,
        source_root: &Path,
        plan: &[InstallItem],
        previous: Option<&InstallationRecord>,
        txn: &mut InstallTransaction,
    ) -> Result<InstallationRecord, InstallError> {
        if let Some(record) = previous
            && record.version != manifest.version
        {
            return Err(InstallError::Conflict {
                path: self.receipts.receipt_path(&record.name)?,
                owner: record.id(),
            });
        }

        let mut paths = Vec::with_capacity(plan.len());

        for item in plan {
            let source = safe_join(source_root, &item.from)
                .map_err(|e| InstallError::PathTraversal(e.to_string()))?;
            if !source.is_file() {
                return Err(InstallError::MissingArtifact { path: source });
            }

            let dest = self.destination(manifest, item)?;
            if dest.symlink_metadata().is_ok() {
                self.check_replaceable(manifest, &dest, previous, txn)?;
                txn.back_up(&dest)?;
            }

            if let Some(parent) = dest.parent() {
                txn.create_dirs(parent)?;
            }

            debug!("{} -> {}", source.display(), dest.display());
            txn.copy(&source, &dest, item.category.mode())?;
            paths.push(dest);
        }

        // Files a same-version reinstall no longer lists go with the old receipt
        if let Some(record) = previous {
            for stale in record.paths.iter().filter(|p| !paths.contains(*p)) {
                if stale.symlink_metadata().is_ok() {
                    debug!("Dropping {} (no longer installed)", stale.display());
                    txn.back_up(stale)?;
                }
            }
        }

        let record = InstallationRecord {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            paths,
            installed_at: Utc::now(),
            runtime_dependencies: manifest.runtime_dependencies.clone(),
        };
        self.receipts.save(&record)?;

        Ok(record)
    }

    fn check_replaceable(
        &self,
        manifest: &Manifest,
        dest: &Path,
        previous: Option<&InstallationRecord>,
        txn: &InstallTransaction,
    ) -> Result<(), InstallError> {
        if txn.wrote(dest) {
            return Err(InstallError::Conflict {
                path: dest.to_path_buf(),
                owner: format!("{} (installed twice by this formula)", manifest.id()),
            });
        }

        if let Some(record) = previous
            && record.version == manifest.version
            && record.owns(dest)
        {
            return Ok(());
        }

        let owner = match self.receipts.owner_of(dest)? {
            Some(record) => record.id(),
            None => "unmanaged file".to_string(),
        };
        Err(InstallError::Conflict {
            path: dest.to_path_buf(),
            owner,
        })
    }
}

/// Undo log for one install
#[derive(Debug, Default)]
struct InstallTransaction {
    written: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    /// (original, backup)
    backups: Vec<(PathBuf, PathBuf)>,
}

impl InstallTransaction {
    fn wrote(&self, path: &Path) -> bool {
        self.written.iter().any(|p| p == path)
    }

    fn create_dirs(&mut self, dir: &Path) -> io::Result<()> {
        let missing: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|d| !d.exists())
            .map(Path::to_path_buf)
            .collect();

        fs::create_dir_all(dir)?;
        // Deepest last so rollback can pop children before parents
        self.created_dirs.extend(missing.into_iter().rev());
        Ok(())
    }

    fn back_up(&mut self, path: &Path) -> io::Result<()> {
        let mut backup = path.as_os_str().to_os_string();
        backup.push(BACKUP_SUFFIX);
        let backup = PathBuf::from(backup);

        fs::rename(path, &backup)?;
        self.backups.push((path.to_path_buf(), backup));
        Ok(())
    }

    fn copy(&mut self, source: &Path, dest: &Path, mode: u32) -> io::Result<()> {
        // Recorded first so a partial copy is still removed
        self.written.push(dest.to_path_buf());
        fs::copy(source, dest)?;
        set_mode(dest, mode)
    }

    fn commit(self, prefix: &Path) {
        for (original, backup) in &self.backups {
            if let Err(e) = fs::remove_file(backup) {
                warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
            if original.symlink_metadata().is_err() {
                prune_empty_dirs(prefix, original);
            }
        }
    }

    fn rollback(self) {
        for path in self.written.iter().rev() {
            if let Err(e) = fs::remove_file(path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!("Rollback: failed to remove {}: {}", path.display(), e);
            }
        }
        for (original, backup) in self.backups.iter().rev() {
            if let Err(e) = fs::rename(backup, original) {
                warn!("Rollback: failed to restore {}: {}", original.display(), e);
            }
        }
        for dir in self.created_dirs.iter().rev() {
            let _ = fs::remove_dir(dir);
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Remove every file recorded for `name` and consume its receipt
///
/// Category directories left empty are pruned, up to the prefix.
pub fn uninstall(prefix: &Path, name: &str) -> Result<InstallationRecord, InstallError> {
    let _lock = PackageLock::acquire(prefix, name)?;
    let receipts = ReceiptStore::new(prefix);
    let record = receipts
        .load(name)?
        .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;

    info!("Uninstalling {} from {}", record.id(), prefix.display());
    for path in &record.paths {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{} was already removed", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        prune_empty_dirs(prefix, path);
    }

    receipts.remove(name)?;
    Ok(record)
}

/// Every installed package under `prefix`
pub fn installed(prefix: &Path) -> Result<Vec<InstallationRecord>, InstallError> {
    ReceiptStore::new(prefix).all()
}

fn prune_empty_dirs(prefix: &Path, removed: &Path) {
    for dir in removed.ancestors().skip(1) {
        if dir == prefix || !dir.starts_with(prefix) || fs::remove_dir(dir).is_err() {
            break;
        }
    }
}
