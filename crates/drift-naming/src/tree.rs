//! The directory tree of the naming server.
//!
//! Nodes are kept in a path-keyed map: each directory carries the set of
//! its child names, each file carries its replica set and the shared-read
//! counter that drives replication. The parent relation is the path's own
//! parent, so back-references can never dangle. Structural consistency
//! (every node reachable from the root, sibling names unique) is
//! maintained by the insert/remove operations below; concurrent access is
//! serialized by the per-node locks and the owning mutex in the server.

use std::collections::{BTreeSet, HashMap};

use drift_proto::{StorageStub, VPath};

#[derive(Debug, Clone)]
pub enum Node {
    Directory {
        children: BTreeSet<String>,
    },
    File {
        replicas: Vec<StorageStub>,
        shared_reads: u32,
    },
}

impl Node {
    fn empty_dir() -> Self {
        Node::Directory {
            children: BTreeSet::new(),
        }
    }

    fn file(replica: StorageStub) -> Self {
        Node::File {
            replicas: vec![replica],
            shared_reads: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }
}

/// In-memory tree, rooted at `/`. The root always exists.
pub struct NameTree {
    nodes: HashMap<VPath, Node>,
}

impl NameTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(VPath::root(), Node::empty_dir());
        Self { nodes }
    }

    pub fn contains(&self, path: &VPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn node(&self, path: &VPath) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn is_directory(&self, path: &VPath) -> Option<bool> {
        self.nodes.get(path).map(Node::is_directory)
    }

    /// Child names of a directory, or `None` if the path is absent or a
    /// file.
    pub fn children(&self, path: &VPath) -> Option<Vec<String>> {
        match self.nodes.get(path)? {
            Node::Directory { children } => Some(children.iter().cloned().collect()),
            Node::File { .. } => None,
        }
    }

    pub fn replicas(&self, path: &VPath) -> Option<&[StorageStub]> {
        match self.nodes.get(path)? {
            Node::File { replicas, .. } => Some(replicas),
            Node::Directory { .. } => None,
        }
    }

    /// Insert a file node, creating missing ancestor directories. Fails
    /// (returns `false`) if the path already exists or an ancestor exists
    /// as a file.
    pub fn insert_file(&mut self, path: &VPath, replica: StorageStub) -> bool {
        self.insert(path, Node::file(replica))
    }

    /// Insert a directory node, creating missing ancestor directories.
    pub fn insert_directory(&mut self, path: &VPath) -> bool {
        self.insert(path, Node::empty_dir())
    }

    fn insert(&mut self, path: &VPath, node: Node) -> bool {
        if path.is_root() || self.nodes.contains_key(path) {
            return false;
        }
        for ancestor in path.ancestors() {
            match self.nodes.get(&ancestor) {
                None => {
                    self.attach(&ancestor, Node::empty_dir());
                }
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => return false,
            }
        }
        self.attach(path, node);
        true
    }

    /// Insert a node whose ancestors are known to be directories.
    fn attach(&mut self, path: &VPath, node: Node) {
        let parent = path
            .parent()
            .expect("attach is never called with the root");
        let name = path
            .last()
            .expect("attach is never called with the root")
            .to_string();
        if let Some(Node::Directory { children }) = self.nodes.get_mut(&parent) {
            children.insert(name);
        }
        self.nodes.insert(path.clone(), node);
    }

    /// Remove a path and everything beneath it. Returns `false` if the
    /// path was absent; the root cannot be removed.
    pub fn remove_subtree(&mut self, path: &VPath) -> bool {
        if path.is_root() || !self.nodes.contains_key(path) {
            return false;
        }
        self.remove_recursive(path);
        if let Ok(parent) = path.parent() {
            if let Some(Node::Directory { children }) = self.nodes.get_mut(&parent) {
                if let Ok(name) = path.last() {
                    children.remove(name);
                }
            }
        }
        true
    }

    fn remove_recursive(&mut self, path: &VPath) {
        if let Some(Node::Directory { children }) = self.nodes.get(path) {
            let names: Vec<String> = children.iter().cloned().collect();
            for name in names {
                if let Ok(child) = path.child(&name) {
                    self.remove_recursive(&child);
                }
            }
        }
        self.nodes.remove(path);
    }

    /// Every distinct replica holding any file at or beneath the path.
    pub fn collect_replicas(&self, path: &VPath) -> Vec<StorageStub> {
        let mut out: Vec<StorageStub> = Vec::new();
        self.collect_recursive(path, &mut out);
        out
    }

    fn collect_recursive(&self, path: &VPath, out: &mut Vec<StorageStub>) {
        match self.nodes.get(path) {
            Some(Node::File { replicas, .. }) => {
                for replica in replicas {
                    if !out.contains(replica) {
                        out.push(replica.clone());
                    }
                }
            }
            Some(Node::Directory { children }) => {
                let names: Vec<String> = children.iter().cloned().collect();
                for name in names {
                    if let Ok(child) = path.child(&name) {
                        self.collect_recursive(&child, out);
                    }
                }
            }
            None => {}
        }
    }

    /// Record one shared read of a file. Returns `true` when the counter
    /// crosses `threshold`, in which case it is reset. Directories and
    /// absent paths are ignored.
    pub fn bump_shared_read(&mut self, path: &VPath, threshold: u32) -> bool {
        if let Some(Node::File { shared_reads, .. }) = self.nodes.get_mut(path) {
            *shared_reads += 1;
            if *shared_reads >= threshold {
                *shared_reads = 0;
                return true;
            }
        }
        false
    }

    /// Current shared-read counter of a file, if it is one.
    pub fn shared_reads(&self, path: &VPath) -> Option<u32> {
        match self.nodes.get(path)? {
            Node::File { shared_reads, .. } => Some(*shared_reads),
            Node::Directory { .. } => None,
        }
    }

    pub fn add_replica(&mut self, path: &VPath, stub: StorageStub) {
        if let Some(Node::File { replicas, .. }) = self.nodes.get_mut(path) {
            if !replicas.contains(&stub) {
                replicas.push(stub);
            }
        }
    }

    /// Shrink a file's replica set and reset its read counter (used by
    /// write-driven invalidation).
    pub fn retain_single_replica(&mut self, path: &VPath, keep: &StorageStub) {
        if let Some(Node::File {
            replicas,
            shared_reads,
        }) = self.nodes.get_mut(path)
        {
            replicas.retain(|r| r == keep);
            *shared_reads = 0;
        }
    }
}

impl Default for NameTree {
    fn default() -> Self {
        Self::new()
    }
}
