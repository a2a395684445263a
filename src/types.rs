use crate::error::StrataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type (seconds since epoch, as stored on disk).
pub type Timestamp = u32;

/// Value type.
pub type Value = f64;

/// A single `(timestamp, value)` sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl Point {
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// How finer points are reduced when propagated into a coarser archive.
///
/// The discriminants are the on-disk aggregation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum AggregationMethod {
    #[default]
    Average = 1,
    Sum = 2,
    Last = 3,
    Max = 4,
    Min = 5,
    /// Sum of known values divided by the total number of slots.
    AvgZero = 6,
    /// Value with the largest magnitude.
    AbsMax = 7,
    /// Value with the smallest magnitude.
    AbsMin = 8,
}

impl AggregationMethod {
    pub const ALL: [AggregationMethod; 8] = [
        AggregationMethod::Average,
        AggregationMethod::Sum,
        AggregationMethod::Last,
        AggregationMethod::Max,
        AggregationMethod::Min,
        AggregationMethod::AvgZero,
        AggregationMethod::AbsMax,
        AggregationMethod::AbsMin,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregationMethod::Average => "average",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Last => "last",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
            AggregationMethod::AvgZero => "avg_zero",
            AggregationMethod::AbsMax => "absmax",
            AggregationMethod::AbsMin => "absmin",
        }
    }

    /// Aggregates the non-null `known` values of a window of `slots` slots.
    ///
    /// `known` must not be empty.
    pub fn aggregate(self, known: &[Value], slots: usize) -> Value {
        match self {
            AggregationMethod::Average => known.iter().sum::<f64>() / known.len() as f64,
            AggregationMethod::Sum => known.iter().sum(),
            AggregationMethod::Last => known[known.len() - 1],
            AggregationMethod::Max => known.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationMethod::Min => known.iter().copied().fold(f64::INFINITY, f64::min),
            AggregationMethod::AvgZero => known.iter().sum::<f64>() / slots.max(1) as f64,
            AggregationMethod::AbsMax => known
                .iter()
                .copied()
                .fold(known[0], |acc, v| if v.abs() > acc.abs() { v } else { acc }),
            AggregationMethod::AbsMin => known
                .iter()
                .copied()
                .fold(known[0], |acc, v| if v.abs() < acc.abs() { v } else { acc }),
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregationMethod {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let method = match lower.as_str() {
            "average" | "avg" => AggregationMethod::Average,
            "sum" => AggregationMethod::Sum,
            "last" => AggregationMethod::Last,
            "max" => AggregationMethod::Max,
            "min" => AggregationMethod::Min,
            "avg_zero" => AggregationMethod::AvgZero,
            "absmax" => AggregationMethod::AbsMax,
            "absmin" => AggregationMethod::AbsMin,
            _ => return Err(StrataError::InvalidAggregationMethod(s.to_string())),
        };
        Ok(method)
    }
}

/// Requested shape of one retention tier: precision and number of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveSpec {
    pub fn new(seconds_per_point: u32, points: u32) -> Self {
        Self {
            seconds_per_point,
            points,
        }
    }

    /// Time span covered by this tier, in seconds.
    pub fn retention(&self) -> u64 {
        self.seconds_per_point as u64 * self.points as u64
    }
}

/// An archive as laid out inside a series file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Byte offset of the first point slot.
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveInfo {
    pub fn retention(&self) -> u32 {
        self.seconds_per_point.saturating_mul(self.points)
    }

    /// Size of the data region in bytes.
    pub fn size(&self) -> u64 {
        self.points as u64 * crate::encoding::POINT_SIZE as u64
    }

    pub fn end_offset(&self) -> u64 {
        self.offset as u64 + self.size()
    }

    pub fn spec(&self) -> ArchiveSpec {
        ArchiveSpec::new(self.seconds_per_point, self.points)
    }
}

/// Decoded file header: metadata plus archive table.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub aggregation_method: AggregationMethod,
    pub max_retention: u32,
    pub x_files_factor: f32,
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    /// Total file size implied by the archive table.
    pub fn file_size(&self) -> u64 {
        self.archives
            .last()
            .map(|a| a.end_offset())
            .unwrap_or_else(|| crate::encoding::header_size(0) as u64)
    }
}

/// Aligned time window of a fetch: `[start, end)` in steps of `step` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl TimeInfo {
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self { start, end, step }
    }

    /// Number of slots in the window.
    pub fn len(&self) -> usize {
        if self.step <= 0 || self.end <= self.start {
            return 0;
        }
        ((self.end - self.start) / self.step) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense result of a ranged read: one optional value per slot of `time_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub time_info: TimeInfo,
    pub values: Vec<Option<Value>>,
}

impl FetchResult {
    pub fn new(time_info: TimeInfo, values: Vec<Option<Value>>) -> Self {
        Self { time_info, values }
    }

    /// Timestamps of each slot, in order.
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.values.len() as i64).map(move |i| self.time_info.start + i * self.time_info.step)
    }
}
