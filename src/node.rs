//! Snapshot records produced by the crawler

use crate::size::Size;
use serde::Serialize;

/// A named metadata value attached to a node (owner, timestamps, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A file or directory as it looked when it was read.
///
/// Directory nodes are only built after every child has been visited, so
/// their `size` is the aggregate of the whole subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    path: String,
    size: Size,
    properties: Vec<Property>,
}

impl Node {
    pub fn new(path: impl Into<String>, size: Size) -> Self {
        Self::with_properties(path, size, Vec::new())
    }

    pub fn with_properties(path: impl Into<String>, size: Size, properties: Vec<Property>) -> Self {
        Self {
            path: path.into(),
            size,
            properties,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Look up a property value by name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}
