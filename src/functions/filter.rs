//! Functions that rank, filter or sort a whole series list by a per-series scalar.

use super::{percentile, safe_avg, safe_last, safe_max, safe_min, Args, FunctionContext, FunctionRegistry};
use crate::error::Result;
use crate::evaluator::EvalValue;
use crate::series::TimeSeries;

use std::cmp::Ordering;

pub(crate) fn register(registry: &mut FunctionRegistry) {
    registry.register("highestCurrent", highest_current);
    registry.register("lowestCurrent", lowest_current);
    registry.register("highestAverage", highest_average);
    registry.register("lowestAverage", lowest_average);
    registry.register("highestMax", highest_max);
    registry.register("currentAbove", current_above);
    registry.register("currentBelow", current_below);
    registry.register("averageAbove", average_above);
    registry.register("averageBelow", average_below);
    registry.register("maximumAbove", maximum_above);
    registry.register("minimumBelow", minimum_below);
    registry.register("nPercentile", n_percentile);
    registry.register("removeAbovePercentile", remove_above_percentile);
    registry.register("removeBelowPercentile", remove_below_percentile);
    registry.register("sortByMaxima", sort_by_maxima);
    registry.register("sortByName", sort_by_name);
    registry.register("limit", limit);
}

type Reduction = fn(&[Option<f64>]) -> Option<f64>;

/// Orders by `key`; series without a key always sort last.
fn sort_by_key(list: &mut [TimeSeries], key: Reduction, descending: bool) {
    list.sort_by(|a, b| match (key(&a.values), key(&b.values)) {
        (Some(x), Some(y)) => {
            let ord = x.total_cmp(&y);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

fn top(args: &Args, key: Reduction, descending: bool) -> Result<EvalValue> {
    let mut list = args.series_list(0, "seriesList")?;
    let n = args.count_or(1, "n", 1)?;
    sort_by_key(&mut list, key, descending);
    list.truncate(n);
    Ok(EvalValue::SeriesList(list))
}

fn highest_current(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    top(args, safe_last, true)
}

fn lowest_current(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    top(args, safe_last, false)
}

fn highest_average(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    top(args, safe_avg, true)
}

fn lowest_average(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    top(args, safe_avg, false)
}

fn highest_max(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    top(args, safe_max, true)
}

/// Keeps series whose key satisfies `keep` against the threshold `n`. Series without
/// a key are dropped.
fn threshold(args: &Args, key: Reduction, keep: fn(f64, f64) -> bool) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let n = args.number(1, "n")?;
    Ok(EvalValue::SeriesList(
        list.into_iter()
            .filter(|s| key(&s.values).is_some_and(|k| keep(k, n)))
            .collect(),
    ))
}

fn current_above(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    threshold(args, safe_last, |k, n| k > n)
}

fn current_below(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    threshold(args, safe_last, |k, n| k <= n)
}

fn average_above(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    threshold(args, safe_avg, |k, n| k > n)
}

fn average_below(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    threshold(args, safe_avg, |k, n| k <= n)
}

fn maximum_above(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    threshold(args, safe_max, |k, n| k > n)
}

fn minimum_below(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    threshold(args, safe_min, |k, n| k <= n)
}

/// Replaces each series with a flat line at its `n`th percentile. Empty series are dropped.
fn n_percentile(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let n = args.number(1, "n")?;
    let out = list
        .iter()
        .filter_map(|s| {
            let p = percentile(&s.values, n, false)?;
            let name = format!("nPercentile({},{})", s.name, n);
            Some(s.derive(name.clone(), vec![Some(p); s.len()]).with_path_expression(name))
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn remove_by_percentile(args: &Args, remove: fn(f64, f64) -> bool) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let n = args.number(1, "n")?;
    let out = list
        .iter()
        .map(|s| {
            let cutoff = percentile(&s.values, n, false);
            let values = s
                .values
                .iter()
                .map(|v| match (*v, cutoff) {
                    (Some(v), Some(c)) if remove(v, c) => None,
                    (v, _) => v,
                })
                .collect();
            let name = format!("{}({},{})", args.function(), s.name, n);
            s.derive(name.clone(), values).with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn remove_above_percentile(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    remove_by_percentile(args, |v, cutoff| v > cutoff)
}

fn remove_below_percentile(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    remove_by_percentile(args, |v, cutoff| v < cutoff)
}

fn sort_by_maxima(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let mut list = args.series_list(0, "seriesList")?;
    sort_by_key(&mut list, safe_max, true);
    Ok(EvalValue::SeriesList(list))
}

fn sort_by_name(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let mut list = args.series_list(0, "seriesList")?;
    let reverse = args.bool_or(1, "reverse", false)?;
    list.sort_by(|a, b| a.name.cmp(&b.name));
    if reverse {
        list.reverse();
    }
    Ok(EvalValue::SeriesList(list))
}

fn limit(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let mut list = args.series_list(0, "seriesList")?;
    list.truncate(args.count_or(1, "n", usize::MAX)?);
    Ok(EvalValue::SeriesList(list))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(name: &str, values: Vec<Option<f64>>) -> TimeSeries {
        TimeSeries::new(name, 0, values.len() as i64 * 10, 10, values)
    }

    #[test]
    fn keyless_series_sort_last_either_way() {
        let mut list = vec![
            series("empty", vec![None, None]),
            series("low", vec![Some(1.0)]),
            series("high", vec![Some(5.0)]),
        ];
        sort_by_key(&mut list, safe_last, true);
        let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["high", "low", "empty"]);
        sort_by_key(&mut list, safe_last, false);
        let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["low", "high", "empty"]);
    }
}
