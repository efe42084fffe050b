// src/manifest/category.rs

//! Install destination categories
//!
//! Each install directive names a coarse category. The category fixes the
//! subdirectory of the installation prefix the artifact lands in and the
//! permissions it receives.

use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    /// User executables
    Bin,
    /// System administration executables
    Sbin,
    /// Helper executables not meant for `PATH`
    Libexec,
    Lib,
    Include,
    Man1,
    Man2,
    Man3,
    Man4,
    Man5,
    Man6,
    Man7,
    Man8,
    /// Documentation, namespaced by package
    Doc,
    /// Architecture-independent data, namespaced by package
    Share,
    Etc,
}

impl Category {
    /// Destination directory relative to the installation prefix
    pub fn subdir(&self, package: &str) -> PathBuf {
        match self {
            Self::Bin => PathBuf::from("bin"),
            Self::Sbin => PathBuf::from("sbin"),
            Self::Libexec => PathBuf::from("libexec"),
            Self::Lib => PathBuf::from("lib"),
            Self::Include => PathBuf::from("include"),
            Self::Man1
            | Self::Man2
            | Self::Man3
            | Self::Man4
            | Self::Man5
            | Self::Man6
            | Self::Man7
            | Self::Man8 => PathBuf::from("share/man").join(self.as_ref()),
            Self::Doc => PathBuf::from("share/doc").join(package),
            Self::Share => PathBuf::from("share").join(package),
            Self::Etc => PathBuf::from("etc"),
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Bin | Self::Sbin | Self::Libexec)
    }

    /// Unix permission bits for installed files
    pub fn mode(&self) -> u32 {
        if self.is_executable() { 0o755 } else { 0o644 }
    }
}
