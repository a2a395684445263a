//! The function table and the helpers shared by function implementations.
//!
//! Every function has the signature [`SeriesFunction`]: it receives the request context,
//! a handle to the evaluator for refetching, and its evaluated arguments. Functions never
//! mutate their inputs; they return new series.

pub mod combine;
pub mod filter;
pub mod shift;
pub mod transform;
pub mod window;

use crate::error::{Result, StrataError};
use crate::evaluator::{EvalValue, Evaluator, RequestContext};
use crate::series::TimeSeries;
use crate::utils::lcm;

use std::collections::HashMap;

/// What a function sees while running.
#[derive(Debug, Clone, Copy)]
pub struct FunctionContext<'a> {
    pub request: &'a RequestContext,
    /// Re-entry point for functions that refetch their input over another window.
    pub evaluator: &'a Evaluator,
}

pub type SeriesFunction = fn(&FunctionContext<'_>, &Args) -> Result<EvalValue>;

/// Named table of functions owned by an evaluator.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, SeriesFunction>,
}

impl FunctionRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The full built-in function set.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        combine::register(&mut registry);
        transform::register(&mut registry);
        window::register(&mut registry);
        filter::register(&mut registry);
        shift::register(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &str, func: SeriesFunction) {
        self.functions.insert(name.to_string(), func);
    }

    pub fn remove(&mut self, name: &str) -> Option<SeriesFunction> {
        self.functions.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<SeriesFunction> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Evaluated arguments of one call, addressable by position or keyword.
#[derive(Debug, Clone)]
pub struct Args {
    function: String,
    positional: Vec<EvalValue>,
    keyword: Vec<(String, EvalValue)>,
}

impl Args {
    pub fn new(function: String, positional: Vec<EvalValue>, keyword: Vec<(String, EvalValue)>) -> Self {
        Self {
            function,
            positional,
            keyword,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn positional(&self) -> &[EvalValue] {
        &self.positional
    }

    fn shape_error(&self, message: String) -> StrataError {
        StrataError::ArgumentShape(format!("{}: {}", self.function, message))
    }

    /// The argument named `key`, or else the positional argument at `index`.
    pub fn get(&self, index: usize, key: &str) -> Option<&EvalValue> {
        self.keyword
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(index))
    }

    fn required(&self, index: usize, key: &str) -> Result<&EvalValue> {
        self.get(index, key)
            .ok_or_else(|| self.shape_error(format!("missing argument '{}'", key)))
    }

    pub fn series_list(&self, index: usize, key: &str) -> Result<Vec<TimeSeries>> {
        match self.required(index, key)? {
            EvalValue::SeriesList(list) => Ok(list.clone()),
            other => Err(self.shape_error(format!(
                "'{}' must be a series list, got {}",
                key,
                other.type_name()
            ))),
        }
    }

    /// A series list that must contain exactly one series.
    pub fn single_series(&self, index: usize, key: &str) -> Result<TimeSeries> {
        let mut list = self.series_list(index, key)?;
        if list.len() != 1 {
            return Err(self.shape_error(format!(
                "'{}' must be a single series, got {}",
                key,
                list.len()
            )));
        }
        Ok(list.remove(0))
    }

    /// Concatenation of every positional series list from `from` on.
    pub fn series_lists_from(&self, from: usize) -> Result<Vec<TimeSeries>> {
        let mut out = Vec::new();
        for (i, value) in self.positional.iter().enumerate().skip(from) {
            match value {
                EvalValue::SeriesList(list) => out.extend(list.iter().cloned()),
                other => {
                    return Err(self.shape_error(format!(
                        "argument {} must be a series list, got {}",
                        i,
                        other.type_name()
                    )))
                }
            }
        }
        Ok(out)
    }

    pub fn opt_number(&self, index: usize, key: &str) -> Result<Option<f64>> {
        match self.get(index, key) {
            None => Ok(None),
            Some(EvalValue::Number(n)) => Ok(Some(*n)),
            Some(other) => Err(self.shape_error(format!(
                "'{}' must be a number, got {}",
                key,
                other.type_name()
            ))),
        }
    }

    pub fn number(&self, index: usize, key: &str) -> Result<f64> {
        self.opt_number(index, key)?
            .ok_or_else(|| self.shape_error(format!("missing argument '{}'", key)))
    }

    pub fn number_or(&self, index: usize, key: &str, default: f64) -> Result<f64> {
        Ok(self.opt_number(index, key)?.unwrap_or(default))
    }

    /// A non-negative integer argument.
    pub fn count_or(&self, index: usize, key: &str, default: usize) -> Result<usize> {
        match self.opt_number(index, key)? {
            None => Ok(default),
            Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
            Some(n) => Err(self.shape_error(format!(
                "'{}' must be a non-negative integer, got {}",
                key, n
            ))),
        }
    }

    pub fn opt_string(&self, index: usize, key: &str) -> Result<Option<String>> {
        match self.get(index, key) {
            None => Ok(None),
            Some(EvalValue::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.shape_error(format!(
                "'{}' must be a string, got {}",
                key,
                other.type_name()
            ))),
        }
    }

    pub fn string(&self, index: usize, key: &str) -> Result<String> {
        self.opt_string(index, key)?
            .ok_or_else(|| self.shape_error(format!("missing argument '{}'", key)))
    }

    pub fn string_or(&self, index: usize, key: &str, default: &str) -> Result<String> {
        Ok(self.opt_string(index, key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn bool_or(&self, index: usize, key: &str, default: bool) -> Result<bool> {
        match self.get(index, key) {
            None => Ok(default),
            Some(EvalValue::Bool(b)) => Ok(*b),
            Some(other) => Err(self.shape_error(format!(
                "'{}' must be a boolean, got {}",
                key,
                other.type_name()
            ))),
        }
    }
}

/// Comma-joined unique path expressions, in first-seen order.
pub fn format_path_expressions(list: &[TimeSeries]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for series in list {
        if !seen.contains(&series.path_expression.as_str()) {
            seen.push(&series.path_expression);
        }
    }
    seen.join(",")
}

/// A series list on a common grid: every series consolidated to the LCM of the steps,
/// over the union of their windows.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    /// Consolidated values of each input, re-indexed onto the common grid.
    pub rows: Vec<Vec<Option<f64>>>,
}

impl Normalized {
    pub fn len(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The values of every input at grid position `i`.
    pub fn column(&self, i: usize) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| row[i]).collect()
    }
}

/// Brings `list` onto a common step and window. Returns `None` for an empty list.
pub fn normalize(list: &[TimeSeries]) -> Option<Normalized> {
    let step = list
        .iter()
        .map(|s| s.step.max(1))
        .reduce(lcm)?;
    let start = list.iter().map(|s| s.start).min()?;
    let mut end = list.iter().map(|s| s.end).max()?;
    end -= (end - start).rem_euclid(step);
    let count = ((end - start) / step).max(0) as usize;

    let rows = list
        .iter()
        .map(|series| {
            let mut s = series.clone();
            s.consolidate((step / s.step.max(1)) as usize);
            let values: Vec<Option<f64>> = s.consolidated().collect();
            (0..count)
                .map(|i| {
                    let t = start + i as i64 * step;
                    if t < s.start {
                        return None;
                    }
                    values.get(((t - s.start) / step) as usize).copied().flatten()
                })
                .collect()
        })
        .collect();
    Some(Normalized {
        start,
        end,
        step,
        rows,
    })
}

/// NIST nearest-rank percentile of the known values, optionally interpolated.
pub fn percentile(values: &[Option<f64>], n: f64, interpolate: bool) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let len = sorted.len();
    let fractional_rank = (n / 100.0) * (len as f64 + 1.0);
    let mut rank = fractional_rank.floor().max(0.0) as usize;
    let rank_fraction = fractional_rank - fractional_rank.floor();
    if !interpolate {
        rank += rank_fraction.ceil() as usize;
    }

    let mut result = if rank == 0 {
        sorted[0]
    } else if rank > len {
        sorted[len - 1]
    } else {
        sorted[rank - 1]
    };
    if interpolate && rank > 0 && rank < len {
        result += rank_fraction * (sorted[rank] - result);
    }
    Some(result)
}

pub(crate) fn safe_sum(values: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum())
    }
}

pub(crate) fn safe_avg(values: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    }
}

pub(crate) fn safe_max(values: &[Option<f64>]) -> Option<f64> {
    values.iter().filter_map(|v| *v).reduce(f64::max)
}

pub(crate) fn safe_min(values: &[Option<f64>]) -> Option<f64> {
    values.iter().filter_map(|v| *v).reduce(f64::min)
}

pub(crate) fn safe_last(values: &[Option<f64>]) -> Option<f64> {
    values.iter().rev().find_map(|v| *v)
}

/// Population standard deviation of the known values.
pub(crate) fn safe_stddev(values: &[Option<f64>]) -> Option<f64> {
    let mean = safe_avg(values)?;
    let known: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    let variance = known.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / known.len() as f64;
    Some(variance.sqrt())
}
