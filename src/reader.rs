//! [`Reader`] implementations: plain and zstd-compressed series files, and the
//! multi-source reader that reconciles several of them.

use crate::encoding::decode_header;
use crate::error::{Result, StrataError};
use crate::interval::{Interval, IntervalSet};
use crate::node::{FetchResult, Reader};
use crate::storage;
use crate::telemetry::{noop_event_listener, EventListener, StrataEvent};
use crate::types::Header;
use crate::utils::now_secs;

use rayon::prelude::*;

use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Intervals of a series file: from the oldest retained time to its last modification.
fn file_intervals(path: &Path, header: &Header, now: i64) -> Result<IntervalSet> {
    let start = now - header.max_retention as i64;
    let mtime = fs::metadata(path)?
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(start);
    let end = mtime.max(start);
    Ok(IntervalSet::new(vec![Interval::new(start as f64, end as f64)?]))
}

/// Reads an uncompressed series file.
#[derive(Debug, Clone)]
pub struct SeriesFileReader {
    fs_path: PathBuf,
    metric_path: String,
}

impl SeriesFileReader {
    pub fn new(fs_path: impl Into<PathBuf>, metric_path: impl Into<String>) -> Self {
        Self {
            fs_path: fs_path.into(),
            metric_path: metric_path.into(),
        }
    }

    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }
}

impl Reader for SeriesFileReader {
    fn get_intervals(&self) -> Result<IntervalSet> {
        let header = storage::info(&self.fs_path)?;
        file_intervals(&self.fs_path, &header, now_secs())
    }

    fn fetch(&self, start: i64, end: i64) -> Result<Option<FetchResult>> {
        storage::fetch_with(&self.fs_path, start, end, now_secs(), None)
    }
}

/// Reads a zstd-compressed series file. Served read-only from memory.
#[derive(Debug, Clone)]
pub struct CompressedSeriesFileReader {
    fs_path: PathBuf,
    metric_path: String,
}

impl CompressedSeriesFileReader {
    pub fn new(fs_path: impl Into<PathBuf>, metric_path: impl Into<String>) -> Self {
        Self {
            fs_path: fs_path.into(),
            metric_path: metric_path.into(),
        }
    }

    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    fn open(&self) -> Result<(Cursor<Vec<u8>>, Header)> {
        let raw = zstd::stream::decode_all(File::open(&self.fs_path)?).map_err(|e| {
            StrataError::CorruptFile {
                path: self.fs_path.clone(),
                details: format!("zstd decode failed: {}", e),
            }
        })?;
        let len = raw.len() as u64;
        let mut cursor = Cursor::new(raw);
        let header = decode_header(&mut cursor, &self.fs_path, Some(len))?;
        Ok((cursor, header))
    }
}

impl Reader for CompressedSeriesFileReader {
    fn get_intervals(&self) -> Result<IntervalSet> {
        let (_, header) = self.open()?;
        file_intervals(&self.fs_path, &header, now_secs())
    }

    fn fetch(&self, start: i64, end: i64) -> Result<Option<FetchResult>> {
        let (mut cursor, header) = self.open()?;
        storage::fetch_from(&mut cursor, &header, start, end, now_secs(), None)
    }
}

/// Merges several readers that resolve to the same metric path.
///
/// Results are folded pairwise: the finer-stepped result is the timeline and its gaps
/// are filled from the coarser one. Fails only if every source fails.
#[derive(Debug, Clone)]
pub struct MultiReader {
    path: String,
    readers: Vec<Arc<dyn Reader>>,
    listener: Arc<dyn EventListener>,
}

impl MultiReader {
    pub fn new(path: impl Into<String>, readers: Vec<Arc<dyn Reader>>) -> Self {
        Self {
            path: path.into(),
            readers,
            listener: noop_event_listener(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn readers(&self) -> &[Arc<dyn Reader>] {
        &self.readers
    }
}

impl Reader for MultiReader {
    fn get_intervals(&self) -> Result<IntervalSet> {
        let mut out = IntervalSet::empty();
        for reader in &self.readers {
            out = out.union(&reader.get_intervals()?);
        }
        Ok(out)
    }

    fn fetch(&self, start: i64, end: i64) -> Result<Option<FetchResult>> {
        let outcomes: Vec<Result<Option<FetchResult>>> = self
            .readers
            .par_iter()
            .map(|r| r.fetch(start, end))
            .collect();

        let mut errors = Vec::new();
        let mut results = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    self.listener.on_event(StrataEvent::SourceFetchFailed {
                        path: self.path.clone(),
                        error: e.to_string(),
                    });
                    errors.push(e.to_string());
                }
            }
        }
        if !self.readers.is_empty() && errors.len() == self.readers.len() {
            return Err(StrataError::AllSourcesFailed(errors));
        }
        Ok(results.into_iter().reduce(merge_results))
    }
}

/// Fills the gaps of the finer result from the coarser one.
pub fn merge_results(a: FetchResult, b: FetchResult) -> FetchResult {
    let (mut fine, coarse) = if b.time_info.step < a.time_info.step {
        (b, a)
    } else {
        (a, b)
    };
    let (start, step) = (fine.time_info.start, fine.time_info.step);
    let other = coarse.time_info;
    for (i, slot) in fine.values.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        let t = start + i as i64 * step;
        if t < other.start || other.step <= 0 {
            continue;
        }
        let j = ((t - other.start) / other.step) as usize;
        if let Some(Some(v)) = coarse.values.get(j) {
            *slot = Some(*v);
        }
    }
    fine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TimeInfo;

    #[test]
    fn finer_result_is_the_timeline() {
        let fine = FetchResult::new(TimeInfo::new(0, 40, 10), vec![Some(1.0), None, None, Some(4.0)]);
        let coarse = FetchResult::new(TimeInfo::new(0, 40, 20), vec![Some(10.0), Some(20.0)]);
        let merged = merge_results(coarse, fine);
        assert_eq!(merged.time_info.step, 10);
        assert_eq!(merged.values, vec![Some(1.0), Some(10.0), Some(20.0), Some(4.0)]);
    }

    #[derive(Debug)]
    struct Failing;

    impl Reader for Failing {
        fn get_intervals(&self) -> Result<IntervalSet> {
            Ok(IntervalSet::empty())
        }
        fn fetch(&self, _: i64, _: i64) -> Result<Option<FetchResult>> {
            Err(StrataError::Internal("boom".to_string()))
        }
    }

    #[test]
    fn total_failure_is_aggregated() {
        let reader = MultiReader::new("a.b", vec![Arc::new(Failing), Arc::new(Failing)]);
        match reader.fetch(0, 10) {
            Err(StrataError::AllSourcesFailed(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
