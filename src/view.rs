//! Observable tree backing the live view
//!
//! Nodes live in a flat arena and refer to each other by index. A path
//! registry maps every discovered directory to its node so that files and
//! size updates can find their parent in O(1).

use crate::path_util::PathStyle;
use crate::scan_events::ScanEvent;
use crate::size::Size;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Index into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewNodeId(usize);

impl ViewNodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewNodeKind {
    File,
    Dir,
    /// A directory that could not be read. Not propagated to ancestors.
    DirWithIssues,
}

#[derive(Debug, Clone)]
pub struct ViewNode {
    pub name: String,
    pub size: Size,
    pub kind: ViewNodeKind,
    pub parent: Option<ViewNodeId>,
    pub children: Vec<ViewNodeId>,
}

impl ViewNode {
    pub fn is_dir(&self) -> bool {
        self.kind != ViewNodeKind::File
    }

    pub fn is_faulted(&self) -> bool {
        self.kind == ViewNodeKind::DirWithIssues
    }
}

impl fmt::Display for ViewNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.size.is_defined() {
            write!(f, "{} {}", self.name, self.size)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Change notification delivered to observers after the tree was updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Added {
        id: ViewNodeId,
        parent: Option<ViewNodeId>,
    },
    SizeChanged {
        id: ViewNodeId,
        size: Size,
    },
    Faulted {
        id: ViewNodeId,
    },
    Cleared,
}

pub type ViewObserver = Box<dyn Fn(&ViewTree, &ViewChange) + Send + 'static>;

pub struct ViewTree {
    style: PathStyle,
    nodes: Vec<ViewNode>,
    roots: Vec<ViewNodeId>,
    registry: HashMap<String, ViewNodeId>,
    observers: Vec<ViewObserver>,
}

impl Default for ViewTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewTree {
    pub fn new() -> Self {
        Self::with_style(PathStyle::native())
    }

    pub fn with_style(style: PathStyle) -> Self {
        Self {
            style,
            nodes: Vec::new(),
            roots: Vec::new(),
            registry: HashMap::new(),
            observers: Vec::new(),
        }
    }

    /// Register an observer. Observers run synchronously on the thread that
    /// mutated the tree.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: Fn(&ViewTree, &ViewChange) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Add a placeholder directory with an undefined size. Attached under its
    /// parent when the parent is known, otherwise added as a root. Adding the
    /// same path again does nothing.
    pub fn add_dir(&mut self, path: &str) -> ViewNodeId {
        if let Some(&id) = self.registry.get(path) {
            return id;
        }
        let id = self.attach(path, Size::UNDEFINED, ViewNodeKind::Dir);
        self.registry.insert(path.to_string(), id);
        id
    }

    pub fn add_file(&mut self, path: &str, size: Size) -> ViewNodeId {
        self.attach(path, size, ViewNodeKind::File)
    }

    /// Update the size of a known directory; unknown paths are ignored.
    pub fn set_size(&mut self, path: &str, size: Size) {
        let Some(&id) = self.registry.get(path) else {
            return;
        };
        self.nodes[id.0].size = size;
        self.notify(ViewChange::SizeChanged { id, size });
    }

    /// Mark a known directory as faulted; unknown paths are ignored.
    pub fn set_error(&mut self, path: &str) {
        let Some(&id) = self.registry.get(path) else {
            return;
        };
        self.nodes[id.0].kind = ViewNodeKind::DirWithIssues;
        self.notify(ViewChange::Faulted { id });
    }

    /// Drop every node. Observers stay registered.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.registry.clear();
        self.notify(ViewChange::Cleared);
    }

    /// Number of top-level nodes.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> &[ViewNodeId] {
        &self.roots
    }

    pub fn node(&self, id: ViewNodeId) -> Option<&ViewNode> {
        self.nodes.get(id.0)
    }

    /// Look up a directory by path.
    pub fn find(&self, path: &str) -> Option<&ViewNode> {
        self.registry.get(path).and_then(|&id| self.node(id))
    }

    pub fn faulted_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_faulted()).count()
    }

    /// Indented text rendering, two spaces per level. Faulted directories
    /// are suffixed with `!`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(ViewNodeId, usize)> =
            self.roots.iter().rev().map(|&id| (id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id.0];
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.to_string());
            if node.is_faulted() {
                out.push_str(" !");
            }
            out.push('\n');
            stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
        }
        out
    }

    fn attach(&mut self, path: &str, size: Size, kind: ViewNodeKind) -> ViewNodeId {
        let id = ViewNodeId(self.nodes.len());
        let parent = self
            .style
            .parent(path)
            .and_then(|parent| self.registry.get(&parent).copied());

        self.nodes.push(ViewNode {
            name: self.style.short_name(path),
            size,
            kind,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent_id) => self.nodes[parent_id.0].children.push(id),
            None => self.roots.push(id),
        }
        self.notify(ViewChange::Added { id, parent });
        id
    }

    fn notify(&self, change: ViewChange) {
        for observer in &self.observers {
            observer(self, &change);
        }
    }
}

/// Applies crawler events to a shared [`ViewTree`].
#[derive(Clone)]
pub struct ViewStateSink {
    tree: Arc<Mutex<ViewTree>>,
}

impl ViewStateSink {
    pub fn new(tree: Arc<Mutex<ViewTree>>) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> Arc<Mutex<ViewTree>> {
        Arc::clone(&self.tree)
    }

    pub fn lock(&self) -> MutexGuard<'_, ViewTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, event: &ScanEvent) {
        let mut tree = self.lock();
        match event {
            ScanEvent::DirectoryDiscovered(path) => {
                tree.add_dir(path);
            }
            ScanEvent::FilesRead(files) => {
                for file in files {
                    tree.add_file(file.path(), file.size());
                }
            }
            ScanEvent::DirectoryRead(dir) => tree.set_size(dir.path(), dir.size()),
            ScanEvent::SecurityError(path) => {
                tree.set_size(path, Size::UNDEFINED);
                tree.set_error(path);
            }
            ScanEvent::Complete | ScanEvent::Terminating => {}
        }
    }

    pub fn add_file(&self, path: &str, size: Size) {
        self.lock().add_file(path, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    const BIN: &str = r"C:\Users\dev\Source\Repos\dirscan\bin";
    const DEBUG: &str = r"C:\Users\dev\Source\Repos\dirscan\bin\Debug";

    fn windows_tree() -> ViewTree {
        ViewTree::with_style(PathStyle::Windows)
    }

    fn first_child(tree: &ViewTree) -> &ViewNode {
        let root = tree.node(tree.roots()[0]).unwrap();
        tree.node(root.children[0]).unwrap()
    }

    #[test]
    fn test_add_directory() {
        let mut tree = windows_tree();
        tree.add_dir(DEBUG);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_same_directory_is_not_added_twice() {
        let mut tree = windows_tree();
        let first = tree.add_dir(DEBUG);
        let second = tree.add_dir(DEBUG);
        assert_eq!(first, second);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_builds_hierarchy() {
        let mut tree = windows_tree();
        tree.add_dir(BIN);
        tree.add_dir(DEBUG);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node(tree.roots()[0]).unwrap().children.len(), 1);
    }

    #[test]
    fn test_set_size_updates_exact_node() {
        let mut tree = windows_tree();
        tree.add_dir(BIN);
        tree.add_dir(DEBUG);
        tree.set_size(DEBUG, Size::new(100));

        assert_eq!(first_child(&tree).to_string(), "Debug 100");
        assert!(!tree.find(BIN).unwrap().size.is_defined());
    }

    #[test]
    fn test_set_error_marks_only_exact_node() {
        let mut tree = windows_tree();
        tree.add_dir(BIN);
        tree.add_dir(DEBUG);
        tree.set_error(DEBUG);

        assert!(first_child(&tree).is_faulted());
        assert!(!tree.find(BIN).unwrap().is_faulted());
    }

    #[test]
    fn test_unknown_paths_are_ignored() {
        let mut tree = windows_tree();
        tree.set_size(DEBUG, Size::new(1));
        tree.set_error(DEBUG);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_files_attach_under_known_parent() {
        let mut tree = ViewTree::with_style(PathStyle::Unix);
        tree.add_dir("/r");
        tree.add_file("/r/a.txt", Size::new(100));
        tree.add_file("/elsewhere/b.txt", Size::new(5));

        assert_eq!(tree.len(), 2);
        let root = tree.find("/r").unwrap();
        let file = tree.node(root.children[0]).unwrap();
        assert_eq!(file.kind, ViewNodeKind::File);
        assert_eq!(file.to_string(), "a.txt 100");
    }

    #[test]
    fn test_observers_see_every_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tree = ViewTree::with_style(PathStyle::Unix);
        let sink = Arc::clone(&seen);
        tree.subscribe(move |tree, change| {
            sink.lock().unwrap().push((*change, tree.node_count()));
        });

        let root = tree.add_dir("/r");
        tree.set_size("/r", Size::new(7));
        tree.clear();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (ViewChange::Added { id: root, parent: None }, 1),
                (ViewChange::SizeChanged { id: root, size: Size::new(7) }, 1),
                (ViewChange::Cleared, 0),
            ]
        );
    }

    #[test]
    fn test_sink_applies_event_stream() {
        let sink = ViewStateSink::new(Arc::new(Mutex::new(ViewTree::with_style(PathStyle::Unix))));
        let events = [
            ScanEvent::DirectoryDiscovered("/r".into()),
            ScanEvent::DirectoryDiscovered("/r/locked".into()),
            ScanEvent::SecurityError("/r/locked".into()),
            ScanEvent::DirectoryDiscovered("/r/sub".into()),
            ScanEvent::FilesRead(vec![Node::new("/r/sub/b.txt", Size::new(50))]),
            ScanEvent::DirectoryRead(Node::new("/r/sub", Size::new(50))),
            ScanEvent::FilesRead(vec![Node::new("/r/a.txt", Size::new(100))]),
            ScanEvent::DirectoryRead(Node::new("/r", Size::new(150))),
            ScanEvent::Complete,
        ];
        for event in &events {
            sink.apply(event);
        }

        let tree = sink.lock();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.faulted_count(), 1);
        assert_eq!(
            tree.render(),
            "r 150\n  locked !\n  sub 50\n    b.txt 50\n  a.txt 100\n"
        );
    }
}
