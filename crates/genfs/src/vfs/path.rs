//! Slash-separated virtual paths.
//!
//! Paths are relative to the filesystem root, which is spelled `"."`.
//! A valid path has no leading or trailing `/`, no empty segments and no
//! `.` or `..` segments (apart from the root itself).

use super::{VfsError, VfsResult};

/// The root path.
pub const ROOT: &str = ".";

/// Returns true if `path` is a valid virtual path.
pub fn is_valid(path: &str) -> bool {
    if path == ROOT {
        return true;
    }
    !path.is_empty()
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Clean up common spellings (`/a`, `./a`, `a/`, ``) and validate.
pub fn clean(path: &str) -> VfsResult<String> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let cleaned = if trimmed.is_empty() { ROOT } else { trimmed };
    if is_valid(cleaned) {
        Ok(cleaned.to_string())
    } else {
        Err(VfsError::invalid_path(path))
    }
}

/// Join a relative path onto a directory.
pub fn join(dir: &str, rel: &str) -> String {
    match (dir, rel) {
        (ROOT, rel) => rel.to_string(),
        (dir, ROOT) | (dir, "") => dir.to_string(),
        (dir, rel) => format!("{dir}/{rel}"),
    }
}

/// Path of `target` relative to `base`, if `target` is `base` or lies under it.
pub fn relative<'a>(base: &str, target: &'a str) -> Option<&'a str> {
    if base == ROOT {
        return Some(target);
    }
    if target == base {
        return Some(ROOT);
    }
    target
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
}

/// Parent directory of `path`; the root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => ROOT,
    }
}

/// Final segment of `path`.
pub fn base(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Path segments; the root has none.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|seg| !seg.is_empty() && *seg != ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid() {
        assert!(is_valid("."));
        assert!(is_valid("a/b/c.txt"));
        assert!(!is_valid(""));
        assert!(!is_valid("/a"));
        assert!(!is_valid("a//b"));
        assert!(!is_valid("a/../b"));
        assert!(!is_valid("./a"));
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("/a/b").unwrap(), "a/b");
        assert_eq!(clean("./a").unwrap(), "a");
        assert_eq!(clean("").unwrap(), ".");
        assert_eq!(clean("/").unwrap(), ".");
        assert!(clean("a/../b").is_err());
    }

    #[test]
    fn test_join_and_relative() {
        assert_eq!(join(".", "a"), "a");
        assert_eq!(join("a", "."), "a");
        assert_eq!(join("a", "b/c"), "a/b/c");

        assert_eq!(relative("duo/view", "duo/view/about/x.svelte"), Some("about/x.svelte"));
        assert_eq!(relative("duo/view", "duo/view"), Some("."));
        assert_eq!(relative("duo/view", "duo/viewer"), None);
        assert_eq!(relative(".", "a/b"), Some("a/b"));
    }

    #[test]
    fn test_parent_and_base() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), ".");
        assert_eq!(base("a/b/c"), "c");
        assert_eq!(base("a"), "a");
        assert_eq!(segments(".").count(), 0);
        assert_eq!(segments("a/b").collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
