//! Concurrent directory tree used by the reachability sweep.
//!
//! One node per directory segment. Mutation is guarded per node, never by a
//! whole-tree lock, so disjoint subtrees build concurrently; reference
//! counting is a single atomic per node. The tree is built fresh for one
//! consistency run and discarded afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use symvault_core::StoragePath;

/// One directory node. Owning edges run parent to child only; the parent
/// back-reference is weak.
pub struct Node {
    name: String,
    parent: Weak<Node>,
    children: Mutex<HashMap<String, Arc<Node>>>,
    files: Mutex<Vec<StoragePath>>,
    references: AtomicU64,
}

impl Node {
    fn new(name: &str, parent: Weak<Node>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            parent,
            children: Mutex::new(HashMap::new()),
            files: Mutex::new(Vec::new()),
            references: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.upgrade()
    }

    /// Mark this directory as claimed by a tag.
    pub fn add_reference(&self) {
        self.references.fetch_add(1, Ordering::Relaxed);
    }

    pub fn references(&self) -> u64 {
        self.references.load(Ordering::Relaxed)
    }

    fn child(self: &Arc<Self>, name: &str) -> Arc<Node> {
        let mut children = self.children.lock().expect("tree node lock poisoned");
        if let Some(existing) = children.get(name) {
            return Arc::clone(existing);
        }
        let node = Node::new(name, Arc::downgrade(self));
        children.insert(name.to_string(), Arc::clone(&node));
        node
    }

    fn existing_child(&self, name: &str) -> Option<Arc<Node>> {
        self.children
            .lock()
            .expect("tree node lock poisoned")
            .get(name)
            .cloned()
    }

    fn append_file(&self, file: StoragePath) {
        self.files.lock().expect("tree node lock poisoned").push(file);
    }

    fn take_files(&self) -> Vec<StoragePath> {
        std::mem::take(&mut *self.files.lock().expect("tree node lock poisoned"))
    }
}

/// The tree root: an unnamed node with no parent.
pub struct PathTree {
    root: Arc<Node>,
}

impl PathTree {
    pub fn new() -> Self {
        Self {
            root: Node::new("", Weak::new()),
        }
    }

    /// Insert a directory chain, creating missing nodes, and return the leaf
    /// node. Racing inserts of a shared prefix converge on the same nodes.
    pub fn insert_directory(&self, directory: &StoragePath) -> Arc<Node> {
        let mut node = Arc::clone(&self.root);
        for segment in directory.segments() {
            node = node.child(segment);
        }
        node
    }

    /// Record a data file under its parent directory.
    pub fn insert_file(&self, file: StoragePath) {
        let node = match file.parent() {
            Some(directory) => self.insert_directory(&directory),
            None => Arc::clone(&self.root),
        };
        node.append_file(file);
    }

    /// Walk an already-built chain; absent segments yield `None`, never a
    /// new node.
    pub fn lookup(&self, directory: &StoragePath) -> Option<Arc<Node>> {
        let mut node = Arc::clone(&self.root);
        for segment in directory.segments() {
            node = node.existing_child(segment)?;
        }
        Some(node)
    }

    /// Collect the files of every unreferenced directory. Iterative with an
    /// explicit stack so arbitrarily deep hierarchies cannot exhaust the call
    /// stack. The whole tree is visited: a referenced ancestor does not
    /// protect an unreferenced descendant's files, and vice versa.
    pub fn sweep_unreferenced(&self) -> Vec<StoragePath> {
        let mut unreferenced = Vec::new();
        let mut stack = vec![Arc::clone(&self.root)];
        while let Some(node) = stack.pop() {
            {
                let children = node.children.lock().expect("tree node lock poisoned");
                stack.extend(children.values().cloned());
            }
            if node.references() == 0 {
                unreferenced.extend(node.take_files());
            }
        }
        unreferenced
    }
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}
