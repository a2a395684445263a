//! In-memory series with lazy consolidation.

use crate::error::StrataError;
use crate::node::FetchResult;

use std::fmt;
use std::str::FromStr;

/// How a group of raw samples is reduced to one output sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsolidationFn {
    Sum,
    #[default]
    Average,
    Max,
    Min,
    First,
    Last,
}

impl ConsolidationFn {
    pub fn name(self) -> &'static str {
        match self {
            ConsolidationFn::Sum => "sum",
            ConsolidationFn::Average => "average",
            ConsolidationFn::Max => "max",
            ConsolidationFn::Min => "min",
            ConsolidationFn::First => "first",
            ConsolidationFn::Last => "last",
        }
    }

    /// Reduces the known values of a group. `None` when the group has none.
    pub fn apply(self, known: &[f64]) -> Option<f64> {
        let first = *known.first()?;
        Some(match self {
            ConsolidationFn::Sum => known.iter().sum(),
            ConsolidationFn::Average => known.iter().sum::<f64>() / known.len() as f64,
            ConsolidationFn::Max => known.iter().copied().fold(first, f64::max),
            ConsolidationFn::Min => known.iter().copied().fold(first, f64::min),
            ConsolidationFn::First => first,
            ConsolidationFn::Last => known[known.len() - 1],
        })
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConsolidationFn {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sum" => ConsolidationFn::Sum,
            "average" | "avg" => ConsolidationFn::Average,
            "max" => ConsolidationFn::Max,
            "min" => ConsolidationFn::Min,
            "first" => ConsolidationFn::First,
            "last" => ConsolidationFn::Last,
            other => {
                return Err(StrataError::ArgumentShape(format!(
                    "unknown consolidation function '{}'",
                    other
                )))
            }
        })
    }
}

/// A named, fixed-step sequence of optional samples covering `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub values: Vec<Option<f64>>,
    pub consolidation_fn: ConsolidationFn,
    /// Raw samples per output sample when iterating; at least 1.
    pub values_per_point: usize,
    /// The path expression this series was fetched for; used to refetch it.
    pub path_expression: String,
}

impl TimeSeries {
    pub fn new(
        name: impl Into<String>,
        start: i64,
        end: i64,
        step: i64,
        values: Vec<Option<f64>>,
    ) -> Self {
        let name = name.into();
        Self {
            path_expression: name.clone(),
            name,
            start,
            end,
            step,
            values,
            consolidation_fn: ConsolidationFn::Average,
            values_per_point: 1,
        }
    }

    pub fn from_fetch(name: impl Into<String>, fetched: FetchResult) -> Self {
        let info = fetched.time_info;
        TimeSeries::new(name, info.start, info.end, info.step, fetched.values)
    }

    pub fn with_path_expression(mut self, expr: impl Into<String>) -> Self {
        self.path_expression = expr.into();
        self
    }

    pub fn with_consolidation_fn(mut self, func: ConsolidationFn) -> Self {
        self.consolidation_fn = func;
        self
    }

    /// A series sharing this one's timeline and provenance with new name and values.
    pub fn derive(&self, name: impl Into<String>, values: Vec<Option<f64>>) -> TimeSeries {
        TimeSeries {
            name: name.into(),
            start: self.start,
            end: self.end,
            step: self.step,
            values,
            consolidation_fn: self.consolidation_fn,
            values_per_point: self.values_per_point,
            path_expression: self.path_expression.clone(),
        }
    }

    pub fn renamed(&self, name: impl Into<String>) -> TimeSeries {
        self.derive(name, self.values.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets the grouping factor used by [`TimeSeries::consolidated`]. Stored values are
    /// untouched.
    pub fn consolidate(&mut self, values_per_point: usize) {
        self.values_per_point = values_per_point.max(1);
    }

    /// Lazily consolidated samples. Re-iterating re-runs the consolidation.
    pub fn consolidated(&self) -> Consolidated<'_> {
        Consolidated {
            values: &self.values,
            group: self.values_per_point.max(1),
            func: self.consolidation_fn,
            pos: 0,
        }
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.values.len() as i64).map(move |i| self.start + i * self.step)
    }

    /// `(timestamp, value)` pairs of the raw samples.
    pub fn points(&self) -> impl Iterator<Item = (i64, Option<f64>)> + '_ {
        self.timestamps().zip(self.values.iter().copied())
    }

    /// Non-null raw samples.
    pub fn known(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| *v)
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = Option<f64>;
    type IntoIter = Consolidated<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.consolidated()
    }
}

/// Iterator over groups of `values_per_point` raw samples.
#[derive(Debug, Clone)]
pub struct Consolidated<'a> {
    values: &'a [Option<f64>],
    group: usize,
    func: ConsolidationFn,
    pos: usize,
}

impl Iterator for Consolidated<'_> {
    type Item = Option<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.values.len() {
            return None;
        }
        let end = (self.pos + self.group).min(self.values.len());
        let chunk = &self.values[self.pos..end];
        self.pos = end;
        if self.group == 1 {
            return Some(chunk[0]);
        }
        let known: Vec<f64> = chunk.iter().filter_map(|v| *v).collect();
        Some(self.func.apply(&known))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.values.len() - self.pos).div_ceil(self.group);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Consolidated<'_> {}

/// Raw text form: `name,start,end,step|v1,v2,...` with `None` for gaps.
impl fmt::Display for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}|", self.name, self.start, self.end, self.step)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match v {
                Some(v) => write!(f, "{}", v)?,
                None => f.write_str("None")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: Vec<Option<f64>>) -> TimeSeries {
        let end = values.len() as i64 * 10;
        TimeSeries::new("s", 0, end, 10, values)
    }

    #[test]
    fn factor_one_is_identity() {
        let s = series(vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(s.consolidated().collect::<Vec<_>>(), s.values);
    }

    #[test]
    fn equal_values_survive_consolidation() {
        for func in [
            ConsolidationFn::Average,
            ConsolidationFn::Max,
            ConsolidationFn::Min,
            ConsolidationFn::First,
            ConsolidationFn::Last,
        ] {
            let mut s = series(vec![Some(4.0); 7]).with_consolidation_fn(func);
            s.consolidate(3);
            assert_eq!(s.consolidated().collect::<Vec<_>>(), vec![Some(4.0); 3]);
        }
        let mut s = series(vec![Some(4.0); 7]).with_consolidation_fn(ConsolidationFn::Sum);
        s.consolidate(3);
        assert_eq!(
            s.consolidated().collect::<Vec<_>>(),
            vec![Some(12.0), Some(12.0), Some(4.0)]
        );
    }

    #[test]
    fn nulls_are_dropped_before_aggregating() {
        let mut s = series(vec![Some(1.0), None, Some(3.0), None, None, None]);
        s.consolidate(3);
        assert_eq!(s.consolidated().collect::<Vec<_>>(), vec![Some(2.0), None]);
        // Restartable.
        assert_eq!(s.consolidated().count(), 2);
        assert_eq!(s.values.len(), 6);
    }

    #[test]
    fn raw_display() {
        let s = TimeSeries::new("a.b", 0, 30, 10, vec![Some(1.5), None, Some(2.0)]);
        assert_eq!(s.to_string(), "a.b,0,30,10|1.5,None,2");
    }
}
