//! Fixed-size series files: a header, an archive table and one circular buffer per archive.
//!
//! Each archive is a ring of `points` slots of `seconds_per_point` seconds. The first
//! slot of an archive holds its base timestamp; every other slot is addressed relative
//! to it. A slot whose stored timestamp does not match the expected time was never
//! written (or has since been overwritten by a wrap) and reads back as `None`.
//!
//! Writes take an advisory exclusive lock on the file for the whole read-modify-write.
//! Reads never lock.

use crate::encoding::{
    decode_header, decode_point, decode_points, encode_header, encode_metadata, encode_point,
    header_size, METADATA_SIZE, POINT_SIZE,
};
use crate::error::{Result, StrataError};
use crate::telemetry::strata_metrics;
use crate::types::{
    AggregationMethod, ArchiveInfo, ArchiveSpec, FetchResult, Header, Point, TimeInfo, Timestamp,
    Value,
};
use crate::utils::now_secs;

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

const ZERO_CHUNK: usize = 16 * 1024;

/// Parameters of a new series file besides its archive list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateOptions {
    pub x_files_factor: f32,
    pub aggregation_method: AggregationMethod,
    /// Allocate the data region with `set_len` instead of writing zeroes.
    pub sparse: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            x_files_factor: 0.5,
            aggregation_method: AggregationMethod::Average,
            sparse: false,
        }
    }
}

/// One slot that differs between two files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointDiff {
    pub timestamp: i64,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

/// Differences found in one archive by [`diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveDiff {
    pub archive_index: usize,
    pub diffs: Vec<PointDiff>,
    /// Number of slots compared.
    pub total: usize,
}

/// Current time clamped into the on-disk timestamp range.
pub fn current_time() -> Timestamp {
    now_secs().clamp(0, Timestamp::MAX as i64) as Timestamp
}

/// Checks an archive list in the order given.
///
/// Precisions must strictly increase and each must divide the next; retentions must
/// strictly increase; every archive must hold at least one coarser bucket's worth of
/// points.
pub fn validate_archive_list(archives: &[ArchiveSpec]) -> Result<()> {
    let invalid = |msg: String| Err(StrataError::InvalidConfiguration(msg));
    if archives.is_empty() {
        return invalid("at least one archive is required".to_string());
    }
    for (i, archive) in archives.iter().enumerate() {
        if archive.seconds_per_point == 0 || archive.points == 0 {
            return invalid(format!(
                "archive {} ({}:{}) must have a positive precision and point count",
                i, archive.seconds_per_point, archive.points
            ));
        }
        if archive.retention() > Timestamp::MAX as u64 {
            return invalid(format!("archive {} retention overflows the timestamp range", i));
        }
    }

    for (i, pair) in archives.windows(2).enumerate() {
        let (finer, coarser) = (pair[0], pair[1]);
        if coarser.seconds_per_point <= finer.seconds_per_point {
            return invalid(format!(
                "precisions must strictly increase (archive {}: {}s, archive {}: {}s)",
                i,
                finer.seconds_per_point,
                i + 1,
                coarser.seconds_per_point
            ));
        }
        if coarser.seconds_per_point % finer.seconds_per_point != 0 {
            return invalid(format!(
                "precision {}s of archive {} does not evenly divide precision {}s of archive {}",
                finer.seconds_per_point,
                i,
                coarser.seconds_per_point,
                i + 1
            ));
        }
        if coarser.retention() <= finer.retention() {
            return invalid(format!(
                "archive {} must cover a longer span than archive {} ({}s <= {}s)",
                i + 1,
                i,
                coarser.retention(),
                finer.retention()
            ));
        }
        let per_bucket = coarser.seconds_per_point / finer.seconds_per_point;
        if finer.points < per_bucket {
            return invalid(format!(
                "archive {} holds {} points but {} are needed to consolidate into archive {}",
                i,
                finer.points,
                per_bucket,
                i + 1
            ));
        }
    }
    Ok(())
}

fn build_header(archives: &[ArchiveSpec], options: &CreateOptions) -> Result<Header> {
    let mut offset = header_size(archives.len()) as u64;
    let mut infos = Vec::with_capacity(archives.len());
    for spec in archives {
        let start = u32::try_from(offset).map_err(|_| {
            StrataError::InvalidConfiguration("archives exceed the maximum file size".to_string())
        })?;
        infos.push(ArchiveInfo {
            offset: start,
            seconds_per_point: spec.seconds_per_point,
            points: spec.points,
        });
        offset += spec.points as u64 * POINT_SIZE as u64;
    }
    let max_retention = archives
        .iter()
        .map(|a| a.retention())
        .max()
        .unwrap_or_default() as u32;
    Ok(Header {
        aggregation_method: options.aggregation_method,
        max_retention,
        x_files_factor: options.x_files_factor,
        archives: infos,
    })
}

fn check_x_files_factor(xff: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&xff) {
        return Err(StrataError::InvalidConfiguration(format!(
            "xFilesFactor must be between 0 and 1, got {}",
            xff
        )));
    }
    Ok(())
}

/// Creates a new series file. Fails if `path` already exists.
///
/// On any failure after the file was opened the partial file is removed.
pub fn create<P: AsRef<Path>>(
    path: P,
    archives: &[ArchiveSpec],
    options: &CreateOptions,
) -> Result<Header> {
    let path = path.as_ref();
    validate_archive_list(archives)?;
    check_x_files_factor(options.x_files_factor)?;
    let header = build_header(archives, options)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                StrataError::FileExists(path.to_path_buf())
            } else {
                StrataError::Io(e)
            }
        })?;

    match write_new_file(&mut file, &header, options.sparse) {
        Ok(()) => Ok(header),
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(path);
            Err(e)
        }
    }
}

fn write_new_file(file: &mut File, header: &Header, sparse: bool) -> Result<()> {
    let head = encode_header(header);
    file.write_all(&head)?;
    if sparse {
        file.set_len(header.file_size())?;
    } else {
        let zeroes = vec![0u8; ZERO_CHUNK];
        let mut remaining = header.file_size() - head.len() as u64;
        while remaining > 0 {
            let n = remaining.min(ZERO_CHUNK as u64) as usize;
            file.write_all(&zeroes[..n])?;
            remaining -= n as u64;
        }
    }
    file.sync_all()?;
    Ok(())
}

/// Reads and validates the header of a series file.
pub fn info<P: AsRef<Path>>(path: P) -> Result<Header> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    read_header(&mut file, path)
}

fn read_header(file: &mut File, path: &Path) -> Result<Header> {
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    decode_header(file, path, Some(len))
}

fn open_locked(path: &Path) -> Result<(File, Header)> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.lock()
        .map_err(|e| StrataError::LockError(format!("{}: {}", path.display(), e)))?;
    let header = read_header(&mut file, path)?;
    Ok((file, header))
}

/// Rewrites the aggregation method (and optionally the xFilesFactor) in place.
///
/// Returns the previous method.
pub fn set_aggregation_method<P: AsRef<Path>>(
    path: P,
    method: AggregationMethod,
    x_files_factor: Option<f32>,
) -> Result<AggregationMethod> {
    if let Some(xff) = x_files_factor {
        check_x_files_factor(xff)?;
    }
    let (mut file, header) = open_locked(path.as_ref())?;
    let mut buf = Vec::with_capacity(METADATA_SIZE);
    encode_metadata(
        &mut buf,
        method,
        header.max_retention,
        x_files_factor.unwrap_or(header.x_files_factor),
        header.archives.len() as u32,
    );
    write_at(&mut file, 0, &buf)?;
    file.sync_data()?;
    Ok(header.aggregation_method)
}

#[inline]
fn align(timestamp: i64, step: u32) -> i64 {
    timestamp - timestamp.rem_euclid(step as i64)
}

/// Byte offset of the slot holding `interval`, relative to the archive's base.
fn slot_offset(archive: &ArchiveInfo, base_interval: i64, interval: i64) -> u64 {
    let step = archive.seconds_per_point as i64;
    let distance = (interval - base_interval).div_euclid(step) * POINT_SIZE as i64;
    archive.offset as u64 + distance.rem_euclid(archive.size() as i64) as u64
}

fn read_at<R: Read + Seek>(r: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.seek(SeekFrom::Start(offset))?;
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    Ok(())
}

/// Base timestamp of an archive; 0 if it was never written.
fn read_base<R: Read + Seek>(r: &mut R, archive: &ArchiveInfo) -> Result<i64> {
    let bytes = read_at(r, archive.offset as u64, POINT_SIZE)?;
    Ok(decode_point(&bytes).timestamp as i64)
}

/// Reads `[from, until)` of an archive ring, splitting the read when it wraps.
/// `from == until` reads the whole ring starting at `from`.
fn read_wrapped<R: Read + Seek>(
    r: &mut R,
    archive: &ArchiveInfo,
    from_offset: u64,
    until_offset: u64,
) -> Result<Vec<u8>> {
    if from_offset < until_offset {
        return read_at(r, from_offset, (until_offset - from_offset) as usize);
    }
    let mut bytes = read_at(r, from_offset, (archive.end_offset() - from_offset) as usize)?;
    let tail = read_at(
        r,
        archive.offset as u64,
        (until_offset - archive.offset as u64) as usize,
    )?;
    bytes.extend_from_slice(&tail);
    Ok(bytes)
}

fn write_point(file: &mut File, archive: &ArchiveInfo, interval: i64, value: Value) -> Result<()> {
    let base = read_base(file, archive)?;
    let offset = if base == 0 {
        archive.offset as u64
    } else {
        slot_offset(archive, base, interval)
    };
    let mut buf = Vec::with_capacity(POINT_SIZE);
    encode_point(&mut buf, interval as Timestamp, value);
    write_at(file, offset, &buf)
}

/// Aggregates the finer points under `timestamp`'s coarser bucket into `lower`.
///
/// Returns false when too few finer points are known, in which case nothing is written.
fn propagate(
    file: &mut File,
    header: &Header,
    timestamp: i64,
    higher: &ArchiveInfo,
    lower: &ArchiveInfo,
) -> Result<bool> {
    let lower_interval = align(timestamp, lower.seconds_per_point);
    let base = read_base(file, higher)?;
    if base == 0 {
        strata_metrics::record_propagation(false);
        return Ok(false);
    }

    let slots = (lower.seconds_per_point / higher.seconds_per_point) as usize;
    let first = slot_offset(higher, base, lower_interval);
    let relative_last = (first - higher.offset as u64 + (slots * POINT_SIZE) as u64) % higher.size();
    let last = higher.offset as u64 + relative_last;
    let bytes = read_wrapped(file, higher, first, last)?;

    let step = higher.seconds_per_point as i64;
    let known: Vec<Value> = decode_points(&bytes)
        .enumerate()
        .filter(|(i, p)| p.timestamp as i64 == lower_interval + *i as i64 * step)
        .map(|(_, p)| p.value)
        .collect();

    let known_fraction = known.len() as f64 / slots as f64;
    if known.is_empty() || known_fraction < header.x_files_factor as f64 {
        strata_metrics::record_propagation(false);
        return Ok(false);
    }

    let aggregate = header.aggregation_method.aggregate(&known, slots);
    write_point(file, lower, lower_interval, aggregate)?;
    strata_metrics::record_propagation(true);
    Ok(true)
}

/// Writes one point at `timestamp` (default now).
pub fn update<P: AsRef<Path>>(path: P, value: Value, timestamp: Option<Timestamp>) -> Result<()> {
    let now = current_time();
    update_at(path, value, timestamp.unwrap_or(now), now)
}

/// [`update`] with an explicit notion of "now".
pub fn update_at<P: AsRef<Path>>(
    path: P,
    value: Value,
    timestamp: Timestamp,
    now: Timestamp,
) -> Result<()> {
    let (mut file, header) = open_locked(path.as_ref())?;
    let not_covered = || StrataError::TimestampNotCovered {
        timestamp: timestamp as u64,
        now: now as u64,
    };
    let age = now as i64 - timestamp as i64;
    if timestamp == 0 || age < 0 || age >= header.max_retention as i64 {
        return Err(not_covered());
    }
    let index = header
        .archives
        .iter()
        .position(|a| a.retention() as i64 >= age)
        .ok_or_else(not_covered)?;

    let archive = header.archives[index];
    let interval = align(timestamp as i64, archive.seconds_per_point);
    write_point(&mut file, &archive, interval, value)?;
    strata_metrics::record_points_written(1);

    let mut higher = archive;
    for lower in &header.archives[index + 1..] {
        if !propagate(&mut file, &header, interval, &higher, lower)? {
            break;
        }
        higher = *lower;
    }
    Ok(())
}

/// Writes a batch of points, each into the finest archive whose retention covers it.
///
/// Points outside every archive (too old, in the future, or at epoch 0) are dropped.
/// When several points fall in the same slot the later one in `points` wins.
/// Returns the number of points accepted.
pub fn update_many<P: AsRef<Path>>(path: P, points: &[Point]) -> Result<usize> {
    update_many_at(path, points, current_time())
}

/// [`update_many`] with an explicit notion of "now".
pub fn update_many_at<P: AsRef<Path>>(path: P, points: &[Point], now: Timestamp) -> Result<usize> {
    if points.is_empty() {
        return Ok(0);
    }
    let (mut file, header) = open_locked(path.as_ref())?;

    let mut sorted: Vec<Point> = points
        .iter()
        .copied()
        .filter(|p| p.timestamp != 0 && p.timestamp <= now)
        .collect();
    sorted.sort_by_key(|p| p.timestamp);

    let mut buckets: Vec<Vec<Point>> = vec![Vec::new(); header.archives.len()];
    let mut accepted = 0usize;
    for point in sorted {
        let age = (now - point.timestamp) as u64;
        if let Some(i) = header
            .archives
            .iter()
            .position(|a| a.retention() as u64 >= age && age < header.max_retention as u64)
        {
            buckets[i].push(point);
            accepted += 1;
        }
    }

    for (index, bucket) in buckets.iter().enumerate() {
        if !bucket.is_empty() {
            archive_update_many(&mut file, &header, index, bucket)?;
        }
    }
    strata_metrics::record_points_written(accepted as u64);
    Ok(accepted)
}

/// Writes chronologically sorted points into one archive as contiguous runs, then
/// propagates each touched coarser bucket.
fn archive_update_many(
    file: &mut File,
    header: &Header,
    index: usize,
    points: &[Point],
) -> Result<()> {
    let archive = header.archives[index];
    let step = archive.seconds_per_point as i64;

    let mut aligned: Vec<(i64, Value)> = Vec::with_capacity(points.len());
    for p in points {
        let interval = align(p.timestamp as i64, archive.seconds_per_point);
        match aligned.last_mut() {
            Some(last) if last.0 == interval => last.1 = p.value,
            _ => aligned.push((interval, p.value)),
        }
    }

    let mut runs: Vec<(i64, Vec<u8>)> = Vec::new();
    for &(interval, value) in &aligned {
        match runs.last_mut() {
            Some((start, bytes)) if *start + (bytes.len() / POINT_SIZE) as i64 * step == interval => {
                encode_point(bytes, interval as Timestamp, value);
            }
            _ => {
                let mut bytes = Vec::with_capacity(POINT_SIZE);
                encode_point(&mut bytes, interval as Timestamp, value);
                runs.push((interval, bytes));
            }
        }
    }
    // A run longer than the ring only keeps its newest points.
    let ring = archive.size() as usize;
    for (start, bytes) in runs.iter_mut() {
        if bytes.len() > ring {
            let excess = bytes.len() - ring;
            *start += (excess / POINT_SIZE) as i64 * step;
            bytes.drain(..excess);
        }
    }

    let mut base = read_base(file, &archive)?;
    if base == 0 {
        match runs.first() {
            Some((start, _)) => base = *start,
            None => return Ok(()),
        }
    }
    for (start, bytes) in &runs {
        let offset = slot_offset(&archive, base, *start);
        let room = archive.end_offset() - offset;
        if bytes.len() as u64 > room {
            let split = room as usize;
            write_at(file, offset, &bytes[..split])?;
            write_at(file, archive.offset as u64, &bytes[split..])?;
        } else {
            write_at(file, offset, bytes)?;
        }
    }

    let mut higher = archive;
    for lower in &header.archives[index + 1..] {
        let buckets: BTreeSet<i64> = aligned
            .iter()
            .map(|(t, _)| align(*t, lower.seconds_per_point))
            .collect();
        let mut propagated = false;
        for bucket in buckets {
            if propagate(file, header, bucket, &higher, lower)? {
                propagated = true;
            }
        }
        if !propagated {
            break;
        }
        higher = *lower;
    }
    Ok(())
}

/// Reads `[from, until)` (default until now) from the finest archive covering `from`.
///
/// Returns `Ok(None)` when the window lies entirely in the future or beyond retention.
pub fn fetch<P: AsRef<Path>>(path: P, from: i64, until: Option<i64>) -> Result<Option<FetchResult>> {
    let now = current_time() as i64;
    fetch_with(path, from, until.unwrap_or(now), now, None)
}

/// [`fetch`] with an explicit "now" and optionally a fixed archive index.
pub fn fetch_with<P: AsRef<Path>>(
    path: P,
    from: i64,
    until: i64,
    now: i64,
    archive: Option<usize>,
) -> Result<Option<FetchResult>> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let header = read_header(&mut file, path)?;
    fetch_from(&mut file, &header, from, until, now, archive)
}

/// Fetch over any seekable source whose header has already been decoded.
pub(crate) fn fetch_from<R: Read + Seek>(
    r: &mut R,
    header: &Header,
    from: i64,
    until: i64,
    now: i64,
    archive: Option<usize>,
) -> Result<Option<FetchResult>> {
    let started = Instant::now();
    if from > until {
        return Err(StrataError::InvalidTimeInterval { from, until });
    }
    let oldest = now - header.max_retention as i64;
    if from > now || until < oldest {
        return Ok(None);
    }
    let mut from = from.max(oldest);
    let until = until.min(now);

    let selected = match archive {
        Some(i) => {
            let selected = header.archives.get(i).ok_or_else(|| {
                StrataError::ArgumentShape(format!(
                    "archive {} does not exist (file has {})",
                    i,
                    header.archives.len()
                ))
            })?;
            from = from.max(now - selected.retention() as i64);
            if from > until {
                return Ok(None);
            }
            selected
        }
        None => {
            let age = now - from;
            header
                .archives
                .iter()
                .find(|a| a.retention() as i64 >= age)
                .or_else(|| header.archives.last())
                .ok_or_else(|| StrataError::Internal("header has no archives".to_string()))?
        }
    };

    let result = archive_fetch(r, selected, from, until)?;
    strata_metrics::record_fetch(started.elapsed());
    Ok(Some(result))
}

fn archive_fetch<R: Read + Seek>(
    r: &mut R,
    archive: &ArchiveInfo,
    from: i64,
    until: i64,
) -> Result<FetchResult> {
    let step = archive.seconds_per_point as i64;
    let mut from_interval = align(from, archive.seconds_per_point);
    let mut until_interval = until + (step - until.rem_euclid(step)) % step;
    if until_interval == from_interval {
        until_interval += step;
    }
    let span = step * archive.points as i64;
    if until_interval - from_interval > span {
        from_interval = until_interval - span;
    }
    let count = ((until_interval - from_interval) / step) as usize;
    let time_info = TimeInfo::new(from_interval, until_interval, step);

    let base = read_base(r, archive)?;
    if base == 0 {
        return Ok(FetchResult::new(time_info, vec![None; count]));
    }
    let from_offset = slot_offset(archive, base, from_interval);
    let until_offset = slot_offset(archive, base, until_interval);
    let bytes = read_wrapped(r, archive, from_offset, until_offset)?;

    let mut values = vec![None; count];
    for (i, point) in decode_points(&bytes).take(count).enumerate() {
        if point.timestamp as i64 == from_interval + i as i64 * step {
            values[i] = Some(point.value);
        }
    }
    Ok(FetchResult::new(time_info, values))
}

fn ensure_alike(from: &Header, to: &Header, from_path: &Path, to_path: &Path) -> Result<()> {
    let shape = |h: &Header| h.archives.iter().map(ArchiveInfo::spec).collect::<Vec<_>>();
    if shape(from) != shape(to) {
        return Err(StrataError::IncompatibleArchives {
            from: from_path.to_path_buf(),
            to: to_path.to_path_buf(),
        });
    }
    Ok(())
}

/// Per-archive `[start, until)` windows, finest first. Each archive covers only the span
/// its finer neighbour does not.
fn archive_windows(header: &Header, now: i64) -> Vec<(i64, i64)> {
    let mut until = now;
    header
        .archives
        .iter()
        .map(|a| {
            let start = (now - a.retention() as i64).max(0);
            let window = (start, until);
            until = until.min(start);
            window
        })
        .collect()
}

/// Copies every known point of `from_path` into `to_path`. Both files must share the
/// same archive layout.
pub fn merge<P: AsRef<Path>, Q: AsRef<Path>>(from_path: P, to_path: Q) -> Result<()> {
    merge_at(from_path, to_path, current_time())
}

/// [`merge`] with an explicit notion of "now".
pub fn merge_at<P: AsRef<Path>, Q: AsRef<Path>>(
    from_path: P,
    to_path: Q,
    now: Timestamp,
) -> Result<()> {
    let (from_path, to_path) = (from_path.as_ref(), to_path.as_ref());
    let mut source = File::open(from_path)?;
    let source_header = read_header(&mut source, from_path)?;
    let (mut dest, dest_header) = open_locked(to_path)?;
    ensure_alike(&source_header, &dest_header, from_path, to_path)?;

    let windows = archive_windows(&dest_header, now as i64);
    for (index, &(start, until)) in windows.iter().enumerate().rev() {
        if until <= start {
            continue;
        }
        let fetched = archive_fetch(&mut source, &source_header.archives[index], start, until)?;
        let points: Vec<Point> = fetched
            .timestamps()
            .zip(fetched.values.iter())
            .filter_map(|(t, v)| v.map(|v| Point::new(t as Timestamp, v)))
            .collect();
        if !points.is_empty() {
            archive_update_many(&mut dest, &dest_header, index, &points)?;
        }
    }
    Ok(())
}

/// Compares two files with the same archive layout slot by slot.
///
/// With `ignore_empty` only slots known on both sides are compared; otherwise slots
/// known on either side are.
pub fn diff<P: AsRef<Path>, Q: AsRef<Path>>(
    from_path: P,
    to_path: Q,
    ignore_empty: bool,
) -> Result<Vec<ArchiveDiff>> {
    diff_at(from_path, to_path, ignore_empty, current_time())
}

/// [`diff`] with an explicit notion of "now".
pub fn diff_at<P: AsRef<Path>, Q: AsRef<Path>>(
    from_path: P,
    to_path: Q,
    ignore_empty: bool,
    now: Timestamp,
) -> Result<Vec<ArchiveDiff>> {
    let (from_path, to_path) = (from_path.as_ref(), to_path.as_ref());
    let mut left = File::open(from_path)?;
    let left_header = read_header(&mut left, from_path)?;
    let mut right = File::open(to_path)?;
    let right_header = read_header(&mut right, to_path)?;
    ensure_alike(&left_header, &right_header, from_path, to_path)?;

    let windows = archive_windows(&left_header, now as i64);
    let mut out = Vec::with_capacity(windows.len());
    for (index, &(start, until)) in windows.iter().enumerate() {
        let mut result = ArchiveDiff {
            archive_index: index,
            diffs: Vec::new(),
            total: 0,
        };
        if until > start {
            let a = archive_fetch(&mut left, &left_header.archives[index], start, until)?;
            let b = archive_fetch(&mut right, &right_header.archives[index], start, until)?;
            for ((timestamp, from), to) in a.timestamps().zip(a.values.iter()).zip(b.values.iter()) {
                let compared = if ignore_empty {
                    from.is_some() && to.is_some()
                } else {
                    from.is_some() || to.is_some()
                };
                if !compared {
                    continue;
                }
                result.total += 1;
                if from != to {
                    result.diffs.push(PointDiff {
                        timestamp,
                        from: *from,
                        to: *to,
                    });
                }
            }
        }
        out.push(result);
    }
    Ok(out)
}
