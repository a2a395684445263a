//! Namespace nodes: branches are sub-namespaces, leaves are queryable series backed by a
//! [`Reader`].

use crate::error::Result;
use crate::interval::IntervalSet;
pub use crate::types::{FetchResult, TimeInfo};

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Read access to one stored series, independent of its on-disk format.
pub trait Reader: fmt::Debug + Send + Sync {
    /// Time ranges this source can serve.
    fn get_intervals(&self) -> Result<IntervalSet>;

    /// Reads `[start, end)`. `Ok(None)` means the source has nothing for that window.
    fn fetch(&self, start: i64, end: i64) -> Result<Option<FetchResult>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    path: String,
}

impl BranchNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    path: String,
    reader: Arc<dyn Reader>,
    intervals: OnceLock<IntervalSet>,
}

impl LeafNode {
    pub fn new(path: impl Into<String>, reader: Arc<dyn Reader>) -> Self {
        Self {
            path: path.into(),
            reader,
            intervals: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn reader(&self) -> &Arc<dyn Reader> {
        &self.reader
    }

    /// The reader's intervals, computed on first use and cached.
    pub fn intervals(&self) -> Result<&IntervalSet> {
        if let Some(cached) = self.intervals.get() {
            return Ok(cached);
        }
        let computed = self.reader.get_intervals()?;
        Ok(self.intervals.get_or_init(|| computed))
    }

    pub fn fetch(&self, start: i64, end: i64) -> Result<Option<FetchResult>> {
        self.reader.fetch(start, end)
    }
}

/// A resolved namespace entry.
#[derive(Debug, Clone)]
pub enum Node {
    Branch(BranchNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::Branch(b) => b.path(),
            Node::Leaf(l) => l.path(),
        }
    }

    /// Last dotted segment of the path.
    pub fn name(&self) -> &str {
        let path = self.path();
        path.rsplit('.').next().unwrap_or(path)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(l) => Some(l),
            Node::Branch(_) => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Branch(b) => write!(f, "BranchNode({})", b.path()),
            Node::Leaf(l) => write!(f, "LeafNode({})", l.path()),
        }
    }
}
