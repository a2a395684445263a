//! Namespace resolution: finders walk a backend for glob matches, the [`Store`]
//! reconciles the results of all finders into one node per path.

use crate::error::{Result, StrataError};
use crate::glob::{GlobPattern, GlobSegment};
use crate::interval::{Interval, IntervalSet};
use crate::node::{BranchNode, LeafNode, Node, Reader};
use crate::reader::{CompressedSeriesFileReader, MultiReader, SeriesFileReader};
use crate::telemetry::{noop_event_listener, EventListener, StrataEvent};
use crate::types::AggregationMethod;

use rayon::prelude::*;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension of plain series files.
pub const SERIES_EXTENSION: &str = ".wsp";
/// Extension of zstd-compressed series files.
pub const COMPRESSED_EXTENSION: &str = ".wsp.zst";

/// Configuration for a [`Store`] and the tools built on it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Roots of the series file hierarchy, searched in order.
    pub directories: Vec<PathBuf>,
    /// Newline-delimited metric index read by the search cache.
    pub index_path: PathBuf,
    pub max_search_results: usize,
    pub default_x_files_factor: f32,
    pub default_aggregation_method: AggregationMethod,
    /// Create new series files sparse instead of zero-filled.
    pub sparse_create: bool,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn EventListener>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            directories: vec![PathBuf::from("./storage/whisper")],
            index_path: PathBuf::from("./storage/index"),
            max_search_results: 100,
            default_x_files_factor: 0.5,
            default_aggregation_method: AggregationMethod::Average,
            sparse_create: false,
            event_listener: noop_event_listener(),
        }
    }
}

/// A namespace query with an optional time window.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub pattern: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl FindQuery {
    pub fn new(pattern: impl Into<String>, start_time: Option<i64>, end_time: Option<i64>) -> Self {
        Self {
            pattern: pattern.into(),
            start_time,
            end_time,
        }
    }

    /// The query window; unbounded sides default to infinity.
    pub fn window(&self) -> Result<Interval> {
        Interval::new(
            self.start_time.map_or(f64::NEG_INFINITY, |t| t as f64),
            self.end_time.map_or(f64::INFINITY, |t| t as f64),
        )
    }
}

/// A pluggable namespace backend.
pub trait Finder: fmt::Debug + Send + Sync {
    fn find_nodes(&self, query: &FindQuery) -> Result<Vec<Node>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKind {
    Directory,
    Series,
    Compressed,
}

/// Resolves patterns against directories of series files laid out one segment per
/// directory level, with leaves named `<segment>.wsp` or `<segment>.wsp.zst`.
#[derive(Debug, Clone)]
pub struct StandardFinder {
    directories: Vec<PathBuf>,
}

impl StandardFinder {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    fn walk(
        &self,
        dir: &Path,
        segments: &[GlobSegment],
        prefix: &mut Vec<String>,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        let Some((segment, rest)) = segments.split_first() else {
            return Ok(());
        };
        let last = rest.is_empty();
        for (name, kind) in matching_entries(dir, segment)? {
            prefix.push(name.clone());
            let metric_path = prefix.join(".");
            match kind {
                EntryKind::Directory if last => {
                    out.push(Node::Branch(BranchNode::new(metric_path)));
                }
                EntryKind::Directory => {
                    self.walk(&dir.join(&name), rest, prefix, out)?;
                }
                EntryKind::Series if last => {
                    let fs_path = dir.join(format!("{}{}", name, SERIES_EXTENSION));
                    let reader = SeriesFileReader::new(fs_path, metric_path.clone());
                    out.push(Node::Leaf(LeafNode::new(metric_path, Arc::new(reader))));
                }
                EntryKind::Compressed if last => {
                    let fs_path = dir.join(format!("{}{}", name, COMPRESSED_EXTENSION));
                    let reader = CompressedSeriesFileReader::new(fs_path, metric_path.clone());
                    out.push(Node::Leaf(LeafNode::new(metric_path, Arc::new(reader))));
                }
                _ => {}
            }
            prefix.pop();
        }
        Ok(())
    }
}

impl Finder for StandardFinder {
    fn find_nodes(&self, query: &FindQuery) -> Result<Vec<Node>> {
        let pattern = GlobPattern::compile(&query.pattern)?;
        let mut out = Vec::new();
        for root in &self.directories {
            let mut prefix = Vec::new();
            self.walk(root, pattern.segments(), &mut prefix, &mut out)?;
        }
        Ok(out)
    }
}

/// A literal segment may only name a visible entry directly inside its directory.
fn is_plain_entry_name(literal: &str) -> bool {
    !literal.is_empty()
        && !literal.starts_with('.')
        && !literal.contains('/')
        && !literal.contains(std::path::MAIN_SEPARATOR)
        && !Path::new(literal).is_absolute()
}

/// Entries of `dir` matching one segment, as `(metric name, kind)`. Hidden entries are
/// skipped. A missing directory has no entries.
fn matching_entries(dir: &Path, segment: &GlobSegment) -> Result<Vec<(String, EntryKind)>> {
    if let Some(literal) = segment.literal() {
        let mut out = Vec::new();
        if !is_plain_entry_name(literal) {
            return Ok(out);
        }
        if dir.join(literal).is_dir() {
            out.push((literal.to_string(), EntryKind::Directory));
        }
        if dir.join(format!("{}{}", literal, SERIES_EXTENSION)).is_file() {
            out.push((literal.to_string(), EntryKind::Series));
        }
        if dir.join(format!("{}{}", literal, COMPRESSED_EXTENSION)).is_file() {
            out.push((literal.to_string(), EntryKind::Compressed));
        }
        return Ok(out);
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let (name, kind) = if path.is_dir() {
            (file_name, EntryKind::Directory)
        } else if let Some(stem) = file_name.strip_suffix(COMPRESSED_EXTENSION) {
            (stem, EntryKind::Compressed)
        } else if let Some(stem) = file_name.strip_suffix(SERIES_EXTENSION) {
            (stem, EntryKind::Series)
        } else {
            continue;
        };
        if segment.matches(name) {
            out.push((name.to_string(), kind));
        }
    }
    out.sort();
    Ok(out)
}

/// Reconciles the nodes of several finders into one node per path.
#[derive(Debug, Clone)]
pub struct Store {
    finders: Vec<Arc<dyn Finder>>,
    listener: Arc<dyn EventListener>,
}

impl Store {
    pub fn new(finders: Vec<Arc<dyn Finder>>) -> Self {
        Self {
            finders,
            listener: noop_event_listener(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// A store over a single [`StandardFinder`] rooted at the configured directories.
    pub fn from_config(config: &StoreConfig) -> Self {
        Store::new(vec![Arc::new(StandardFinder::new(config.directories.clone()))])
            .with_listener(config.event_listener.clone())
    }

    pub fn listener(&self) -> &Arc<dyn EventListener> {
        &self.listener
    }

    /// Resolves `pattern` across all finders, sorted by path.
    ///
    /// A path found as a leaf by several finders becomes one leaf over a [`MultiReader`]
    /// of the smallest set of sources covering the query window. A path that is only a
    /// branch is returned once. Individual finder failures are reported to the listener;
    /// if every finder fails the call fails.
    pub fn find(&self, pattern: &str, start_time: Option<i64>, end_time: Option<i64>) -> Result<Vec<Node>> {
        let query = FindQuery::new(pattern, start_time, end_time);
        let window = query.window()?;
        let outcomes: Vec<Result<Vec<Node>>> = self
            .finders
            .par_iter()
            .map(|f| f.find_nodes(&query))
            .collect();

        let mut errors = Vec::new();
        let mut by_path: BTreeMap<String, Vec<Node>> = BTreeMap::new();
        for outcome in outcomes {
            match outcome {
                Ok(nodes) => {
                    for node in nodes {
                        by_path.entry(node.path().to_string()).or_default().push(node);
                    }
                }
                Err(e) if e.is_client_error() => return Err(e),
                Err(e) => {
                    self.listener.on_event(StrataEvent::FinderFailed {
                        error: e.to_string(),
                    });
                    errors.push(e.to_string());
                }
            }
        }
        if !self.finders.is_empty() && errors.len() == self.finders.len() {
            return Err(StrataError::AllSourcesFailed(errors));
        }

        let mut out = Vec::with_capacity(by_path.len());
        for (path, group) in by_path {
            let leaves: Vec<LeafNode> = group.iter().filter_map(Node::as_leaf).cloned().collect();
            match leaves.len() {
                0 => out.extend(group.into_iter().next()),
                1 => out.extend(leaves.into_iter().next().map(Node::Leaf)),
                _ => {
                    let mut chosen = minimal_cover(&leaves, &window);
                    if chosen.len() == 1 {
                        out.extend(chosen.pop().map(Node::Leaf));
                    } else {
                        let readers: Vec<Arc<dyn Reader>> =
                            chosen.iter().map(|l| l.reader().clone()).collect();
                        let multi = MultiReader::new(path.clone(), readers)
                            .with_listener(self.listener.clone());
                        out.push(Node::Leaf(LeafNode::new(path, Arc::new(multi))));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Greedily picks leaves adding the most uncovered time inside `window` until nothing
/// new is covered. Falls back to all leaves if none covers any of the window.
fn minimal_cover(leaves: &[LeafNode], window: &Interval) -> Vec<LeafNode> {
    let mut candidates: Vec<(usize, IntervalSet)> = leaves
        .iter()
        .enumerate()
        .map(|(i, leaf)| {
            let coverage = leaf
                .intervals()
                .map(|set| set.intersect_interval(window))
                .unwrap_or_default();
            (i, coverage)
        })
        .collect();

    let mut covered = IntervalSet::empty();
    let mut chosen = Vec::new();
    loop {
        let best = candidates
            .iter()
            .enumerate()
            .map(|(pos, (_, set))| (pos, set.difference(&covered).size()))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((pos, gain)) if gain > 0.0 => {
                let (index, set) = candidates.remove(pos);
                covered = covered.union(&set);
                chosen.push(leaves[index].clone());
            }
            _ => break,
        }
    }
    if chosen.is_empty() {
        return leaves.to_vec();
    }
    chosen
}
