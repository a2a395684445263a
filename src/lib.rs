#![doc = include_str!("../README.md")]
// Declare modules
pub mod encoding;
pub mod error;
pub mod evaluator;
pub mod finder;
pub mod functions;
pub mod glob;
pub mod index;
pub mod interval;
pub mod node;
pub mod parser;
pub mod reader;
pub mod series;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod utils;

/// Error type for every fallible operation.
pub use crate::error::StrataError;
/// Result alias over [`StrataError`].
pub use crate::error::Result;
/// Expression evaluation entry point and its request-scoped inputs and outputs.
pub use crate::evaluator::{EvalValue, Evaluator, RequestContext};
/// Namespace resolution across one or more finders.
pub use crate::finder::{Finder, StandardFinder, Store, StoreConfig};
/// Table of series functions available to an evaluator.
pub use crate::functions::FunctionRegistry;
/// Prefix-tree completion over a flat metric index.
pub use crate::index::IndexSearcher;
/// Tree nodes and the reader seam behind leaves.
pub use crate::node::{FetchResult, Node, Reader, TimeInfo};
/// Options for creating a series file.
pub use crate::storage::CreateOptions;
/// In-memory series and its consolidation function.
pub use crate::series::{ConsolidationFn, TimeSeries};
/// Structured event hook for observability.
pub use crate::telemetry::{EventListener, StrataEvent};
/// On-disk value types.
pub use crate::types::{AggregationMethod, ArchiveSpec, Header, Point, Timestamp, Value};
