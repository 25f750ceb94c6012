//! # Path Resolution
//!
//! Lexical path handling shared by the adapter and the chain links.
//!
//! Object stores have no symlinks and no real directories, so resolution is
//! purely lexical: `.` components are dropped, `..` pops one component and
//! never climbs above the root.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`normalize`] | Absolute, `.`/`..`-free form of a mount path |
//! | [`parent_of`] | Directory whose listing contains a path |
//! | [`file_name`] | Final component as a `String` |
//! | [`join_under`] | Re-root a mount path below a bucket prefix |
//! | [`strip_root`] | Inverse of [`join_under`] |

use std::path::{Component, Path, PathBuf};

use crate::FsError;

/// Resolve `path` to its absolute lexical form.
///
/// Relative paths are taken relative to the mount root.
///
/// # Example
///
/// ```rust
/// use objmount::path_resolver::normalize;
/// use std::path::Path;
///
/// assert_eq!(normalize(Path::new("a/./b/../c")), Path::new("/a/c"));
/// assert_eq!(normalize(Path::new("/../..")), Path::new("/"));
/// ```
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Final component of `path`, or `None` for the root.
pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Place a mount path below `root` (e.g. a bucket prefix).
///
/// # Example
///
/// ```rust
/// use objmount::path_resolver::join_under;
/// use std::path::Path;
///
/// let inner = join_under(Path::new("/data/run1"), Path::new("/out/log.txt"));
/// assert_eq!(inner, Path::new("/data/run1/out/log.txt"));
/// ```
pub fn join_under(root: &Path, path: &Path) -> PathBuf {
    let mut out = normalize(root);
    let relative = normalize(path);
    for component in relative.components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

/// Remove the `root` prefix from a bucket path, yielding the mount path.
///
/// # Errors
///
/// - [`FsError::NotFound`] if `path` lies outside `root`
pub fn strip_root(root: &Path, path: &Path) -> Result<PathBuf, FsError> {
    let root = normalize(root);
    let path = normalize(path);
    match path.strip_prefix(&root) {
        Ok(rest) => Ok(Path::new("/").join(rest)),
        Err(_) => Err(FsError::NotFound { path }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_dots_and_relatives() {
        assert_eq!(normalize(Path::new("/a/b/./c")), Path::new("/a/b/c"));
        assert_eq!(normalize(Path::new("a/b/../c")), Path::new("/a/c"));
        assert_eq!(normalize(Path::new("")), Path::new("/"));
        assert_eq!(normalize(Path::new("/..")), Path::new("/"));
    }

    #[test]
    fn parent_of_root_is_root() {
        assert_eq!(parent_of(Path::new("/")), Path::new("/"));
        assert_eq!(parent_of(Path::new("/a")), Path::new("/"));
        assert_eq!(parent_of(Path::new("/a/b")), Path::new("/a"));
    }

    #[test]
    fn file_name_of_root_is_none() {
        assert_eq!(file_name(Path::new("/")), None);
        assert_eq!(file_name(Path::new("/a/b.txt")).as_deref(), Some("b.txt"));
    }

    #[test]
    fn join_under_cannot_escape_root() {
        let joined = join_under(Path::new("/prefix"), Path::new("/../../etc"));
        assert_eq!(joined, Path::new("/prefix/etc"));
        assert_eq!(join_under(Path::new("/prefix"), Path::new("/")), Path::new("/prefix"));
    }

    #[test]
    fn strip_root_inverts_join() {
        let root = Path::new("/p/q");
        let inner = join_under(root, Path::new("/x/y"));
        assert_eq!(strip_root(root, &inner).unwrap(), Path::new("/x/y"));
        assert_eq!(strip_root(root, root).unwrap(), Path::new("/"));
        assert!(matches!(
            strip_root(root, Path::new("/other")),
            Err(FsError::NotFound { .. })
        ));
    }
}
