//! Path-indexed tree of generator registrations.
//!
//! Nodes live in an arena owned by [`Tree`] and are addressed by
//! [`NodeId`]. Parents are stored as ids, so nothing here holds a
//! reference into the tree. Registering a path creates any missing
//! ancestors as *filler* directories: nodes with no generator that exist
//! only so their descendants are addressable.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::generator::Generator;
use crate::vfs::path::{self, ROOT};
use crate::vfs::{DirEntry, FileType};

bitflags! {
    /// Node mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mode: u8 {
        /// The node is a directory.
        const DIR = 0b01;
        /// The node holds a generator.
        const GEN = 0b10;
    }
}

impl Mode {
    /// A directory with no generator.
    pub fn is_filler(&self) -> bool {
        *self == Mode::DIR
    }

    /// A directory backed by a generator.
    pub fn is_gen_dir(&self) -> bool {
        self.contains(Mode::DIR | Mode::GEN)
    }

    /// The file type this mode presents as.
    pub fn file_type(&self) -> FileType {
        if self.contains(Mode::DIR) {
            FileType::Directory
        } else {
            FileType::File
        }
    }
}

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A registered path.
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    pub path: String,
    pub name: String,
    pub mode: Mode,
    pub generator: Option<Generator>,
    pub parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("generator", &self.generator.as_ref().map(Generator::kind))
            .field("children", &self.children.len())
            .finish()
    }
}

/// The registration tree.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree containing only the root filler directory.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: NodeId(0),
                path: ROOT.to_string(),
                name: ROOT.to_string(),
                mode: Mode::DIR,
                generator: None,
                parent: None,
                children: BTreeMap::new(),
            }],
        }
    }

    /// The root node.
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Look up a node by id.
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Register `generator` at `path` with `mode`.
    ///
    /// Missing ancestors become filler directories; an existing node at
    /// `path` is updated in place, so re-registering replaces the
    /// generator. `path` must already be a valid virtual path.
    pub fn insert(&mut self, path: &str, mode: Mode, generator: Option<Generator>) -> NodeId {
        let mut current = NodeId(0);
        for segment in path::segments(path) {
            let existing = self.nodes[current.0].children.get(segment).copied();
            current = match existing {
                Some(child) => child,
                None => self.push_filler(current, segment),
            };
        }

        let node = &mut self.nodes[current.0];
        node.mode = if generator.is_some() {
            mode | Mode::GEN
        } else {
            mode - Mode::GEN
        };
        node.generator = generator;
        current
    }

    fn push_filler(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        let path = path::join(&self.nodes[parent.0].path, name);
        self.nodes.push(Node {
            id,
            path,
            name: name.to_string(),
            mode: Mode::DIR,
            generator: None,
            parent: Some(parent),
            children: BTreeMap::new(),
        });
        self.nodes[parent.0].children.insert(name.to_string(), id);
        id
    }

    /// Exact lookup; `None` if any segment is missing.
    pub fn find(&self, path: &str) -> Option<&Node> {
        let mut current = &self.nodes[0];
        for segment in path::segments(path) {
            let &child = current.children.get(segment)?;
            current = &self.nodes[child.0];
        }
        Some(current)
    }

    /// Closest node able to generate `path`.
    ///
    /// An exact match always wins, whatever its mode. Otherwise the deepest
    /// existing ancestor is walked upward to the first directory with a
    /// generator. File generators only answer exact matches, so `None`
    /// is returned when no directory generator covers `path`.
    pub fn find_by_prefix(&self, path: &str) -> Option<&Node> {
        let mut current = &self.nodes[0];
        let mut exact = true;
        for segment in path::segments(path) {
            match current.children.get(segment) {
                Some(&child) => current = &self.nodes[child.0],
                None => {
                    exact = false;
                    break;
                }
            }
        }
        if exact {
            return Some(current);
        }

        let mut cursor = Some(current);
        while let Some(node) = cursor {
            if node.mode.is_gen_dir() {
                return Some(node);
            }
            cursor = node.parent.map(|id| &self.nodes[id.0]);
        }
        None
    }

    /// Children of a node, as directory entries sorted by name.
    pub fn children(&self, id: NodeId) -> Vec<DirEntry> {
        self.nodes[id.0]
            .children
            .iter()
            .map(|(name, &child)| DirEntry::new(name.clone(), self.nodes[child.0].mode.file_type()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::testing::{dir_gen, file_gen};

    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.insert("a", Mode::empty(), Some(file_gen()));
        tree.insert("b", Mode::DIR, Some(dir_gen()));
        tree.insert("b/c", Mode::DIR, Some(dir_gen()));
        tree.insert("b/c/e", Mode::empty(), Some(file_gen()));
        tree.insert("b/c/f", Mode::empty(), Some(file_gen()));
        tree
    }

    #[test]
    fn test_insert_creates_fillers() {
        let mut tree = Tree::new();
        tree.insert("x/y/z.txt", Mode::empty(), Some(file_gen()));

        let x = tree.find("x").unwrap();
        assert!(x.mode.is_filler());
        assert!(x.generator.is_none());
        assert_eq!(tree.find("x/y").unwrap().path, "x/y");

        let z = tree.find("x/y/z.txt").unwrap();
        assert_eq!(z.mode, Mode::GEN);
        assert_eq!(z.name, "z.txt");
        assert_eq!(tree.get(z.parent.unwrap()).path, "x/y");
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = Tree::new();
        let first = tree.insert("a/b", Mode::empty(), Some(file_gen()));
        let len = tree.nodes.len();
        let second = tree.insert("a/b", Mode::empty(), Some(file_gen()));
        assert_eq!(first, second);
        assert_eq!(tree.nodes.len(), len);
    }

    #[test]
    fn test_find_exact_only() {
        let tree = sample();
        assert!(tree.find("b/c/e").is_some());
        assert!(tree.find("b/c/h").is_none());
        assert!(tree.find("a/d").is_none());
        assert_eq!(tree.find(".").unwrap().path, ".");
    }

    #[test]
    fn test_find_by_prefix() {
        let tree = sample();
        assert_eq!(tree.find_by_prefix("b/c/h").unwrap().path, "b/c");
        assert_eq!(tree.find_by_prefix("b/x/y").unwrap().path, "b");
        assert!(tree.find_by_prefix("a/d").is_none());
        assert_eq!(tree.find_by_prefix(".").unwrap().path, ".");
        assert_eq!(tree.find_by_prefix("b/c/e").unwrap().path, "b/c/e");
        assert!(tree.find_by_prefix("zzz").is_none());
    }

    #[test]
    fn test_filler_promotion() {
        let mut tree = Tree::new();
        tree.insert("bud/node_modules/runtime/hot", Mode::empty(), Some(file_gen()));
        assert_eq!(tree.find("bud/node_modules/runtime").unwrap().mode, Mode::DIR);

        tree.insert("bud/node_modules/runtime", Mode::empty(), Some(file_gen()));
        let runtime = tree.find("bud/node_modules/runtime").unwrap();
        assert_eq!(runtime.mode, Mode::GEN);
        assert_eq!(runtime.mode.file_type(), FileType::File);
    }

    #[test]
    fn test_children_listing() {
        let tree = sample();
        let root = tree.root().id;
        assert_eq!(
            tree.children(root),
            vec![DirEntry::file("a"), DirEntry::directory("b")]
        );
        let c = tree.find("b/c").unwrap().id;
        let names: Vec<_> = tree.children(c).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["e", "f"]);
    }
}
