//! Search cache over a newline-delimited index of metric paths.
//!
//! The index file is rewritten atomically by [`build_index`] (or any external process
//! doing temp-file-then-rename); [`IndexSearcher`] reloads it whenever its modification
//! time advances.

use crate::error::Result;
use crate::finder::{COMPRESSED_EXTENSION, SERIES_EXTENSION};
use crate::glob::{split_segments, GlobSegment};
use crate::telemetry::{noop_event_listener, strata_metrics, EventListener, StrataEvent};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub path: String,
    pub is_leaf: bool,
}

#[derive(Debug, Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_leaf: bool,
}

impl TreeNode {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for part in path.split('.') {
            node = node.children.entry(part.to_string()).or_default();
        }
        node.is_leaf = true;
    }
}

#[derive(Debug, Default)]
struct IndexState {
    tree: TreeNode,
    loaded_mtime: Option<SystemTime>,
    entries: usize,
}

/// Prefix-tree search over the metric index.
#[derive(Debug)]
pub struct IndexSearcher {
    index_path: PathBuf,
    state: RwLock<IndexState>,
    listener: Arc<dyn EventListener>,
}

impl IndexSearcher {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            state: RwLock::new(IndexState::default()),
            listener: noop_event_listener(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Number of paths in the loaded tree.
    pub fn len(&self) -> Result<usize> {
        self.reload_if_stale()?;
        Ok(self.state.read()?.entries)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reloads the tree if the index file changed since the last load.
    ///
    /// A missing index leaves the current tree in place.
    pub fn reload_if_stale(&self) -> Result<()> {
        let mtime = match fs::metadata(&self.index_path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.listener.on_event(StrataEvent::IndexReloadFailed {
                    path: self.index_path.clone(),
                    error: e.to_string(),
                });
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if self.state.read()?.loaded_mtime.is_some_and(|loaded| loaded >= mtime) {
            return Ok(());
        }

        let contents = fs::read_to_string(&self.index_path)?;
        let mut tree = TreeNode::default();
        let mut entries = 0;
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            tree.insert(line);
            entries += 1;
        }

        let mut state = self.state.write()?;
        *state = IndexState {
            tree,
            loaded_mtime: Some(mtime),
            entries,
        };
        drop(state);
        strata_metrics::record_index_reload();
        self.listener.on_event(StrataEvent::IndexReloaded {
            path: self.index_path.clone(),
            entries,
        });
        Ok(())
    }

    /// Walks the tree along `query`, returning every matching node on the way down
    /// (so `a.b` yields `a` and `a.b`), up to `max_results` distinct paths.
    pub fn search(&self, query: &str, max_results: Option<usize>) -> Result<Vec<SearchResult>> {
        self.reload_if_stale()?;
        let segments = split_segments(query)
            .into_iter()
            .map(GlobSegment::compile)
            .collect::<Result<Vec<_>>>()?;

        let state = self.state.read()?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let limit = max_results.unwrap_or(usize::MAX);
        let mut prefix = Vec::new();
        subtree_query(&state.tree, &segments, &mut prefix, &mut |result| {
            if out.len() >= limit {
                return false;
            }
            if seen.insert(result.path.clone()) {
                out.push(result);
            }
            out.len() < limit
        });
        Ok(out)
    }
}

/// Depth-first walk; `emit` returns false to stop.
///
/// Paths are emitted bare. A node counts as a leaf only when it was indexed as a
/// metric and has no children, so a name that is both a metric and a prefix of
/// others is reported once, as a branch. Callers add the trailing `.` to branch
/// paths when rendering them.
fn subtree_query(
    root: &TreeNode,
    segments: &[GlobSegment],
    prefix: &mut Vec<String>,
    emit: &mut dyn FnMut(SearchResult) -> bool,
) -> bool {
    let matches: Vec<(&String, &TreeNode)> = match segments.first() {
        Some(segment) => match segment.literal() {
            Some(literal) => root.children.get_key_value(literal).into_iter().collect(),
            None => root
                .children
                .iter()
                .filter(|(name, _)| segment.matches(name))
                .collect(),
        },
        None => root.children.iter().collect(),
    };

    for (name, child) in matches {
        prefix.push(name.clone());
        let result = SearchResult {
            path: prefix.join("."),
            is_leaf: child.is_leaf && child.children.is_empty(),
        };
        let keep_going = emit(result)
            && (segments.is_empty() || subtree_query(child, &segments[1..], prefix, emit));
        prefix.pop();
        if !keep_going {
            return false;
        }
    }
    true
}

/// Collects the metric paths of every series file under `directories`.
pub fn collect_metric_paths(directories: &[PathBuf]) -> Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for root in directories {
        let mut prefix = Vec::new();
        collect_dir(root, &mut prefix, &mut out)?;
    }
    Ok(out)
}

fn collect_dir(dir: &Path, prefix: &mut Vec<String>, out: &mut BTreeSet<String>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            prefix.push(name.to_string());
            collect_dir(&path, prefix, out)?;
            prefix.pop();
        } else if let Some(stem) = name
            .strip_suffix(COMPRESSED_EXTENSION)
            .or_else(|| name.strip_suffix(SERIES_EXTENSION))
        {
            prefix.push(stem.to_string());
            out.insert(prefix.join("."));
            prefix.pop();
        }
    }
    Ok(())
}

/// Rewrites the index at `index_path` from the series files under `directories`.
///
/// The new index is written to a temporary file next to the target and renamed into
/// place. Returns the number of paths written.
pub fn build_index(directories: &[PathBuf], index_path: &Path) -> Result<usize> {
    let paths = collect_metric_paths(directories)?;
    let parent = match index_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    {
        let mut w = std::io::BufWriter::new(tmp.as_file_mut());
        for path in &paths {
            writeln!(w, "{}", path)?;
        }
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(index_path).map_err(|e| e.error)?;
    Ok(paths.len())
}
