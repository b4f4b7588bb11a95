//! Graphviz rendering of a cache snapshot.

use std::fmt::Write;

use super::Snapshot;
use crate::vfs::FileType;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render cached entries as nodes and links as `from -> to` edges.
///
/// Directories draw as folders and watched patterns as dashed edges. Link
/// targets with no cached entry (source files, patterns) still appear
/// through their edges.
pub fn to_dot(snapshot: &Snapshot) -> String {
    let mut out = String::from("digraph genfs {\n");
    for (path, mode) in &snapshot.files {
        let shape = match FileType::from_mode(*mode) {
            FileType::Directory => "folder",
            _ => "box",
        };
        let _ = writeln!(out, "  {} [shape={shape}];", quote(path));
    }
    for link in &snapshot.links {
        let style = if link.pattern { " [style=dashed]" } else { "" };
        let _ = writeln!(out, "  {} -> {}{style};", quote(&link.from), quote(&link.to));
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Link;
    use crate::vfs::{DIR_PERM, FILE_PERM};

    #[test]
    fn test_to_dot() {
        let snapshot = Snapshot {
            files: vec![
                ("bud".into(), FileType::Directory.mode_bits() | DIR_PERM),
                ("bud/main.go".into(), FileType::File.mode_bits() | FILE_PERM),
            ],
            links: vec![
                Link::path("bud/main.go", "say \"hi\".txt"),
                Link::watch("bud/view.go", "view/**/*.svelte"),
            ],
        };
        let dot = to_dot(&snapshot);
        assert!(dot.starts_with("digraph genfs {\n"));
        assert!(dot.contains("  \"bud\" [shape=folder];\n"));
        assert!(dot.contains("  \"bud/main.go\" [shape=box];\n"));
        assert!(dot.contains("  \"bud/main.go\" -> \"say \\\"hi\\\".txt\";\n"));
        assert!(dot.contains("  \"bud/view.go\" -> \"view/**/*.svelte\" [style=dashed];\n"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(to_dot(&Snapshot::default()), "digraph genfs {\n}\n");
    }
}
