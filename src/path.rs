// src/path.rs

//! Path guards for untrusted paths
//!
//! Archive entries, install directive sources and fixture names all come
//! from data we did not write. Everything that turns such a string into a
//! filesystem location goes through this module so that nothing can be
//! read or written outside the directory it is meant for.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path traversal: {0}")]
    Traversal(String),

    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    #[error("empty path")]
    Empty,
}

/// Normalize an untrusted relative path
///
/// `.` components are dropped. `..` components and absolute paths are
/// rejected outright rather than resolved.
///
/// ```
/// use formulary::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("dist/./v0.1.9/metadata").unwrap(), PathBuf::from("dist/v0.1.9/metadata"));
/// assert!(sanitize_path("../etc/passwd").is_err());
/// assert!(sanitize_path("/etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let path = path.as_ref();
    let display = path.to_string_lossy();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Traversal(display.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(display.to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }

    Ok(normalized)
}

/// Join an untrusted relative path onto `root`
///
/// When both sides exist on disk the canonical result is also checked to
/// be under the canonical root, which catches symlinks inside `root`
/// that point elsewhere.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path.as_ref())?);

    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(PathError::Traversal(format!(
            "{} escapes {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Validate a single path component (no separators, not `.` or `..`)
pub fn sanitize_filename(name: &str) -> Result<&str, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(PathError::Traversal(name.to_string()));
    }
    Ok(name)
}

/// Resolve a link target relative to the directory holding the link
///
/// Both `link_dir` and the result are relative to the same root. `..` is
/// allowed as long as it never climbs above that root.
pub fn resolve_link_target(link_dir: &Path, target: &Path) -> Result<PathBuf, PathError> {
    let display = target.to_string_lossy();
    let mut resolved: Vec<std::ffi::OsString> = Vec::new();

    for component in link_dir.components().chain(target.components()) {
        match component {
            Component::Normal(c) => resolved.push(c.to_os_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    return Err(PathError::Traversal(display.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(display.to_string()));
            }
        }
    }

    Ok(resolved.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path_normal() {
        assert_eq!(sanitize_path("bin/metadata").unwrap(), PathBuf::from("bin/metadata"));
        assert_eq!(sanitize_path("./a/./b").unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn test_sanitize_path_rejects() {
        assert_eq!(sanitize_path(""), Err(PathError::Empty));
        assert_eq!(sanitize_path("./"), Err(PathError::Empty));
        assert!(matches!(sanitize_path(".."), Err(PathError::Traversal(_))));
        assert!(matches!(sanitize_path("a/../../b"), Err(PathError::Traversal(_))));
        assert!(matches!(sanitize_path("a/../b"), Err(PathError::Traversal(_))));
        assert!(matches!(sanitize_path("/usr/bin"), Err(PathError::Absolute(_))));
    }

    #[test]
    fn test_safe_join() {
        let dir = tempfile::tempdir().unwrap();
        let joined = safe_join(dir.path(), "share/man/man1").unwrap();
        assert_eq!(joined, dir.path().join("share/man/man1"));
        assert!(safe_join(dir.path(), "../outside").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_safe_join_rejects_escaping_symlink() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        assert!(matches!(
            safe_join(root.path(), "link/secret"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.mp3").unwrap(), "test.mp3");
        assert!(sanitize_filename("a/b").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_resolve_link_target() {
        assert_eq!(
            resolve_link_target(Path::new("pkg/bin"), Path::new("../lib/libfoo.so")).unwrap(),
            PathBuf::from("pkg/lib/libfoo.so")
        );
        assert!(resolve_link_target(Path::new("pkg"), Path::new("../../etc/passwd")).is_err());
        assert!(resolve_link_target(Path::new("pkg"), Path::new("/etc/passwd")).is_err());
    }
}
