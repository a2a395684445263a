//! Functions that combine many series into one, row by row.

use super::{
    format_path_expressions, normalize, percentile, safe_avg, safe_max, safe_min, safe_stddev,
    safe_sum, Args, FunctionContext, FunctionRegistry,
};
use crate::error::Result;
use crate::evaluator::EvalValue;
use crate::series::TimeSeries;

pub(crate) fn register(registry: &mut FunctionRegistry) {
    registry.register("sumSeries", sum_series);
    registry.register("sum", sum_series);
    registry.register("averageSeries", average_series);
    registry.register("avg", average_series);
    registry.register("minSeries", min_series);
    registry.register("maxSeries", max_series);
    registry.register("rangeSeries", range_series);
    registry.register("stddevSeries", stddev_series);
    registry.register("diffSeries", diff_series);
    registry.register("multiplySeries", multiply_series);
    registry.register("divideSeries", divide_series);
    registry.register("percentileOfSeries", percentile_of_series);
    registry.register("group", group);
}

/// Normalizes `list` and reduces each row with `reduce`. An empty list stays empty.
fn combine(
    function: &str,
    list: &[TimeSeries],
    reduce: impl Fn(&[Option<f64>]) -> Option<f64>,
) -> Vec<TimeSeries> {
    let Some(grid) = normalize(list) else {
        return Vec::new();
    };
    let values = (0..grid.len()).map(|i| reduce(&grid.column(i))).collect();
    let name = format!("{}({})", function, format_path_expressions(list));
    vec![TimeSeries::new(name, grid.start, grid.end, grid.step, values)]
}

fn sum_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    // An all-null row sums to zero.
    Ok(EvalValue::SeriesList(combine("sumSeries", &list, |row| {
        Some(safe_sum(row).unwrap_or(0.0))
    })))
}

fn average_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("averageSeries", &list, safe_avg)))
}

fn min_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("minSeries", &list, safe_min)))
}

fn max_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("maxSeries", &list, safe_max)))
}

fn range_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("rangeSeries", &list, |row| {
        Some(safe_max(row)? - safe_min(row)?)
    })))
}

fn stddev_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("stddevSeries", &list, safe_stddev)))
}

/// First known value minus the sum of the other known values.
fn diff_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("diffSeries", &list, |row| {
        let mut known = row.iter().filter_map(|v| *v);
        let first = known.next()?;
        Some(first - known.sum::<f64>())
    })))
}

fn multiply_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_lists_from(0)?;
    Ok(EvalValue::SeriesList(combine("multiplySeries", &list, |row| {
        row.iter().filter_map(|v| *v).reduce(|a, b| a * b)
    })))
}

/// Divides every dividend by a single divisor series. Division by zero yields `None`.
fn divide_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let dividends = args.series_list(0, "dividendSeriesList")?;
    let divisor = args.single_series(1, "divisorSeries")?;
    let mut out = Vec::with_capacity(dividends.len());
    for dividend in dividends {
        let Some(grid) = normalize(&[dividend.clone(), divisor.clone()]) else {
            continue;
        };
        let values = (0..grid.len())
            .map(|i| match (grid.rows[0][i], grid.rows[1][i]) {
                (Some(a), Some(b)) if b != 0.0 => Some(a / b),
                _ => None,
            })
            .collect();
        let name = format!("divideSeries({},{})", dividend.name, divisor.name);
        out.push(
            TimeSeries::new(name.clone(), grid.start, grid.end, grid.step, values)
                .with_path_expression(name),
        );
    }
    Ok(EvalValue::SeriesList(out))
}

fn percentile_of_series(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let n = args.number(1, "n")?;
    let interpolate = args.bool_or(2, "interpolate", false)?;
    let function = format!("percentileOfSeries({},{})", format_path_expressions(&list), n);
    let mut out = combine("percentileOfSeries", &list, |row| percentile(row, n, interpolate));
    for series in &mut out {
        series.name = function.clone();
        series.path_expression = function.clone();
    }
    Ok(EvalValue::SeriesList(out))
}

fn group(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    Ok(EvalValue::SeriesList(args.series_lists_from(0)?))
}
