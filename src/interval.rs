//! Immutable time intervals and disjoint interval sets.
//!
//! Used to reason about which time ranges a data source can actually serve.

use crate::error::StrataError;
use std::cmp::Ordering;

/// A closed-open span of time `[start, end)`, possibly unbounded on either side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    start: f64,
    end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Result<Self, StrataError> {
        if end < start || start.is_nan() || end.is_nan() {
            return Err(StrataError::InvalidTimeInterval {
                from: start as i64,
                until: end as i64,
            });
        }
        Ok(Self { start, end })
    }

    /// `(-inf, +inf)`.
    pub fn unbounded() -> Self {
        Self {
            start: f64::NEG_INFINITY,
            end: f64::INFINITY,
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn size(&self) -> f64 {
        self.end - self.start
    }

    /// Zero-size intervals are considered empty.
    pub fn is_empty(&self) -> bool {
        self.size() == 0.0
    }

    /// Overlap of the two intervals, or `None` when it has no extent.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            Some(Interval { start, end })
        } else {
            None
        }
    }

    /// True if the intervals overlap or touch.
    pub fn overlaps(&self, other: &Interval) -> bool {
        let (earlier, later) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        earlier.end >= later.start
    }

    /// Smallest interval covering both. Fails when they neither overlap nor touch.
    pub fn union(&self, other: &Interval) -> Result<Interval, StrataError> {
        if !self.overlaps(other) {
            return Err(StrataError::Internal(
                "union of disjoint intervals is not an interval".to_string(),
            ));
        }
        Ok(Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        })
    }
}

impl PartialOrd for Interval {
    /// Ascending by start, then by end.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.start.partial_cmp(&other.start) {
            Some(Ordering::Equal) => self.end.partial_cmp(&other.end),
            ord => ord,
        }
    }
}

/// A sorted list of disjoint intervals with a cached total size.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
    size: f64,
}

impl IntervalSet {
    /// Builds a set from arbitrary intervals, coalescing any that overlap or touch.
    pub fn new(mut intervals: Vec<Interval>) -> Self {
        intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        Self::from_disjoint(union_overlapping(intervals))
    }

    /// Builds a set from intervals the caller guarantees are sorted and disjoint.
    pub fn from_disjoint(intervals: Vec<Interval>) -> Self {
        let size = intervals.iter().map(Interval::size).sum();
        Self { intervals, size }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    /// True when the set covers no time at all.
    pub fn is_empty(&self) -> bool {
        self.size == 0.0
    }

    pub fn complement(&self) -> IntervalSet {
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        let mut cursor = f64::NEG_INFINITY;
        for interval in &self.intervals {
            if cursor < interval.start {
                out.push(Interval {
                    start: cursor,
                    end: interval.start,
                });
            }
            cursor = interval.end;
        }
        if cursor < f64::INFINITY {
            out.push(Interval {
                start: cursor,
                end: f64::INFINITY,
            });
        }
        IntervalSet::from_disjoint(out)
    }

    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if let Some(x) = a.intersect(b) {
                    out.push(x);
                }
            }
        }
        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        IntervalSet::from_disjoint(out)
    }

    pub fn intersect_interval(&self, interval: &Interval) -> IntervalSet {
        IntervalSet::from_disjoint(
            self.intervals
                .iter()
                .filter_map(|i| i.intersect(interval))
                .collect(),
        )
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut all = self.intervals.clone();
        all.extend_from_slice(&other.intervals);
        IntervalSet::new(all)
    }

    /// Set difference `self - other`.
    pub fn difference(&self, other: &IntervalSet) -> IntervalSet {
        self.intersect(&other.complement())
    }
}

impl std::ops::Sub for &IntervalSet {
    type Output = IntervalSet;

    fn sub(self, rhs: &IntervalSet) -> IntervalSet {
        self.difference(rhs)
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

/// Merges neighbours of a start-sorted list that overlap or touch.
fn union_overlapping(intervals: Vec<Interval>) -> Vec<Interval> {
    let mut out: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match out.last_mut() {
            Some(last) if last.overlaps(&interval) => {
                last.start = last.start.min(interval.start);
                last.end = last.end.max(interval.end);
            }
            _ => out.push(interval),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn iv(start: f64, end: f64) -> Interval {
        Interval::new(start, end).unwrap()
    }

    #[test]
    fn rejects_inverted_interval() {
        assert!(Interval::new(10.0, 5.0).is_err());
        assert!(Interval::new(5.0, 5.0).unwrap().is_empty());
    }

    #[test]
    fn orders_by_ascending_start() {
        let mut v = vec![iv(5.0, 6.0), iv(1.0, 2.0), iv(3.0, 4.0)];
        v.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(v, vec![iv(1.0, 2.0), iv(3.0, 4.0), iv(5.0, 6.0)]);
    }

    #[test]
    fn build_coalesces_overlapping_and_adjacent() {
        let set = IntervalSet::new(vec![iv(5.0, 8.0), iv(0.0, 2.0), iv(2.0, 3.0), iv(7.0, 10.0)]);
        assert_eq!(set.intervals(), &[iv(0.0, 3.0), iv(5.0, 10.0)]);
        assert_eq!(set.size(), 8.0);
    }

    #[test]
    fn complement_of_bounded_set() {
        let set = IntervalSet::new(vec![iv(0.0, 1.0), iv(2.0, 3.0)]);
        let c = set.complement();
        assert_eq!(
            c.intervals(),
            &[
                iv(f64::NEG_INFINITY, 0.0),
                iv(1.0, 2.0),
                iv(3.0, f64::INFINITY)
            ]
        );
        assert_eq!(c.complement(), set);
    }

    #[test]
    fn empty_set_complement_is_everything() {
        let c = IntervalSet::empty().complement();
        assert_eq!(c.intervals(), &[Interval::unbounded()]);
        assert!(c.complement().intervals().is_empty());
    }

    #[test]
    fn difference_removes_overlap() {
        let a = IntervalSet::new(vec![iv(0.0, 10.0)]);
        let b = IntervalSet::new(vec![iv(2.0, 4.0), iv(6.0, 7.0)]);
        let d = &a - &b;
        assert_eq!(d.intervals(), &[iv(0.0, 2.0), iv(4.0, 6.0), iv(7.0, 10.0)]);
        assert_eq!(d.size(), 7.0);
    }

    #[test]
    fn disjoint_union_fails() {
        assert!(iv(0.0, 1.0).union(&iv(2.0, 3.0)).is_err());
        assert_eq!(iv(0.0, 2.0).union(&iv(1.0, 3.0)).unwrap(), iv(0.0, 3.0));
    }

    fn arb_set() -> impl Strategy<Value = IntervalSet> {
        prop::collection::vec((-1_000i32..1_000, 0i32..200), 0..12).prop_map(|raw| {
            IntervalSet::new(
                raw.into_iter()
                    .map(|(s, len)| iv(s as f64, (s + len) as f64))
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_union_is_at_least_as_large(a in arb_set(), b in arb_set()) {
            let u = a.union(&b);
            prop_assert!(u.size() >= a.size().max(b.size()));
        }

        #[test]
        fn prop_double_complement_recoalesces(a in arb_set()) {
            let normalized = IntervalSet::new(
                a.iter().filter(|i| !i.is_empty()).copied().collect(),
            );
            prop_assert_eq!(a.complement().complement(), normalized);
        }

        #[test]
        fn prop_difference_disjoint_from_subtrahend(a in arb_set(), b in arb_set()) {
            let d = &a - &b;
            prop_assert!(d.intersect(&b).is_empty());
        }

        #[test]
        fn prop_intervals_stay_disjoint(a in arb_set(), b in arb_set()) {
            let u = a.union(&b);
            for pair in u.intervals().windows(2) {
                prop_assert!(pair[0].end() < pair[1].start());
            }
        }
    }
}
