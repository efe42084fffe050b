// src/fetch/archive.rs

//! Source archive extraction
//!
//! Archives come from the network, so every entry is checked before it
//! touches the disk: paths must stay relative and inside the destination,
//! and link targets must resolve inside it too. Device nodes and FIFOs are
//! refused outright.

use crate::error::ArchiveError;
use crate::path::{resolve_link_target, sanitize_path};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;
use xz2::read::XzDecoder;

/// Offset of the `ustar` magic in a tar header
const USTAR_MAGIC_OFFSET: usize = 257;

/// Supported source archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarZst,
}

impl ArchiveFormat {
    /// Detect the format from a file name
    pub fn from_filename(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect the format from the first bytes of the file
    ///
    /// Magic bytes:
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    /// - Tar: `ustar` at offset 257
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Some(Self::TarXz)
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::TarZst)
        } else if data.get(USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5) == Some(b"ustar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect from the name, falling back to the content
    pub fn detect(path: &Path) -> Result<Self, ArchiveError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(format) = Self::from_filename(&name) {
            return Ok(format);
        }

        let mut head = Vec::with_capacity(USTAR_MAGIC_OFFSET + 8);
        File::open(path)?
            .take((USTAR_MAGIC_OFFSET + 8) as u64)
            .read_to_end(&mut head)?;

        Self::from_magic_bytes(&head).ok_or(ArchiveError::UnknownFormat(name))
    }
}

fn open_archive(path: &Path, format: ArchiveFormat) -> Result<Archive<Box<dyn Read>>, ArchiveError> {
    let file = BufReader::new(File::open(path)?);

    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveFormat::TarZst => Box::new(zstd::Decoder::with_buffer(file)?),
    };

    Ok(Archive::new(reader))
}

/// Extract `archive` into `dest` and return the source tree root
///
/// When the archive holds a single top-level directory (the usual
/// `name-version/` layout) that directory is the root; otherwise `dest` is.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
    let format = ArchiveFormat::detect(archive)?;
    debug!("Extracting {} ({:?}) into {}", archive.display(), format, dest.display());

    fs::create_dir_all(dest)?;
    let mut tar = open_archive(archive, format)?;
    tar.set_overwrite(true);

    let mut extracted = 0usize;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        let display = raw.to_string_lossy().into_owned();

        let rel = sanitize_path(&raw).map_err(|_| ArchiveError::PathTraversal {
            entry: display.clone(),
        })?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous | EntryType::Directory => {}
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| ArchiveError::UnsupportedEntry { entry: display.clone() })?;
                let link_dir = rel.parent().unwrap_or_else(|| Path::new(""));
                resolve_link_target(link_dir, &target).map_err(|_| {
                    ArchiveError::PathTraversal {
                        entry: format!("{} -> {}", display, target.display()),
                    }
                })?;
            }
            EntryType::Link => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| ArchiveError::UnsupportedEntry { entry: display.clone() })?;
                sanitize_path(&target).map_err(|_| ArchiveError::PathTraversal {
                    entry: format!("{} => {}", display, target.display()),
                })?;
            }
            // Metadata records are folded into the following entry by `tar`
            EntryType::XGlobalHeader | EntryType::XHeader => continue,
            _ => return Err(ArchiveError::UnsupportedEntry { entry: display }),
        }

        // unpack_in re-checks that the parent directory, after following any
        // symlinks already on disk, is still inside dest
        if !entry.unpack_in(dest)? {
            return Err(ArchiveError::PathTraversal { entry: display });
        }
        extracted += 1;
    }

    if extracted == 0 {
        return Err(ArchiveError::Empty);
    }

    source_root(dest)
}

fn source_root(dest: &Path) -> Result<PathBuf, ArchiveError> {
    let mut entries = fs::read_dir(dest)?.collect::<io::Result<Vec<_>>>()?;

    if entries.len() == 1 {
        let only = entries.remove(0);
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }

    Ok(dest.to_path_buf())
}
