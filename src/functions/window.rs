//! Moving-window functions. Each refetches history before the request window so the
//! first requested point sees a full window.

use super::{safe_stddev, Args, FunctionContext, FunctionRegistry};
use crate::error::{Result, StrataError};
use crate::evaluator::EvalValue;
use crate::series::TimeSeries;
use crate::utils::parse_time_offset;

pub(crate) fn register(registry: &mut FunctionRegistry) {
    registry.register("movingAverage", moving_average);
    registry.register("movingMedian", moving_median);
    registry.register("movingSum", moving_sum);
    registry.register("movingMin", moving_min);
    registry.register("movingMax", moving_max);
    registry.register("stdev", stdev);
}

/// A series extended backwards with bootstrap history.
#[derive(Debug, Clone)]
pub(crate) struct Bootstrapped {
    pub series: TimeSeries,
    /// Number of leading samples that precede the requested window.
    pub prefix: usize,
}

impl Bootstrapped {
    /// Drops the bootstrap prefix from `values` and names the result.
    pub fn finish(&self, name: String, values: Vec<Option<f64>>) -> TimeSeries {
        let original = &self.series;
        let start = original.start + self.prefix as i64 * original.step;
        let mut out = original.derive(name.clone(), values[self.prefix.min(values.len())..].to_vec());
        out.start = start;
        out.path_expression = name;
        out
    }
}

/// Ceiling division for a positive divisor.
fn ceil_div(a: i64, b: i64) -> i64 {
    -(-a).div_euclid(b)
}

/// Refetches every distinct path expression of `list` over the `delta` seconds before
/// the request window and prepends what it finds, matched by series name.
///
/// Bootstrap samples on a coarser step fill every finer slot they cover. Series with no
/// bootstrap counterpart get a prefix of gaps.
pub(crate) fn fetch_with_bootstrap(
    fctx: &FunctionContext<'_>,
    list: &[TimeSeries],
    delta: i64,
) -> Result<Vec<Bootstrapped>> {
    let ctx = fctx.request;
    let bootstrap_ctx = ctx.with_window(ctx.start_time - delta, ctx.start_time);
    let mut expressions: Vec<&str> = Vec::new();
    for series in list {
        if !expressions.contains(&series.path_expression.as_str()) {
            expressions.push(&series.path_expression);
        }
    }
    let mut history = Vec::new();
    if delta > 0 {
        for expr in expressions {
            history.extend(fctx.evaluator.evaluate_target(&bootstrap_ctx, expr)?);
        }
    }

    Ok(list
        .iter()
        .map(|series| {
            let step = series.step.max(1);
            let prefix = ceil_div(delta.max(0), step);
            let start = series.start - prefix * step;
            let mut values: Vec<Option<f64>> = vec![None; prefix as usize];
            if let Some(past) = history.iter().find(|h| h.name == series.name) {
                let past_step = past.step.max(1);
                for (t, v) in past.points() {
                    let Some(v) = v else { continue };
                    let first = ceil_div(t - start, step).max(0);
                    let last = ceil_div(t + past_step - start, step).min(prefix);
                    for slot in first..last {
                        values[slot as usize] = Some(v);
                    }
                }
            }
            values.extend(series.values.iter().copied());
            let mut extended = series.clone();
            extended.start = start;
            extended.values = values;
            Bootstrapped {
                series: extended,
                prefix: prefix as usize,
            }
        })
        .collect())
}

/// A window given either as a point count or as a duration string.
#[derive(Debug, Clone, Copy, PartialEq)]
enum WindowSize {
    Points(usize),
    Seconds(i64),
}

impl WindowSize {
    fn from_args(args: &Args, index: usize, key: &str) -> Result<Self> {
        match args.get(index, key) {
            Some(EvalValue::Number(n)) if *n >= 1.0 && n.fract() == 0.0 => {
                Ok(WindowSize::Points(*n as usize))
            }
            Some(EvalValue::Str(s)) => {
                let secs = parse_time_offset(s)?.abs();
                if secs == 0 {
                    return Err(StrataError::ArgumentShape(format!(
                        "{}: window '{}' is empty",
                        args.function(),
                        s
                    )));
                }
                Ok(WindowSize::Seconds(secs))
            }
            Some(other) => Err(StrataError::ArgumentShape(format!(
                "{}: '{}' must be a positive integer or a duration, got {}",
                args.function(),
                key,
                match other {
                    EvalValue::Number(n) => n.to_string(),
                    other => other.type_name().to_string(),
                }
            ))),
            None => Err(StrataError::ArgumentShape(format!(
                "{}: missing argument '{}'",
                args.function(),
                key
            ))),
        }
    }

    /// Window length in points for a series of step `step`; at least one.
    fn points(self, step: i64) -> usize {
        match self {
            WindowSize::Points(n) => n,
            WindowSize::Seconds(secs) => ((secs / step.max(1)) as usize).max(1),
        }
    }

    fn bootstrap_seconds(self, list: &[TimeSeries]) -> i64 {
        match self {
            WindowSize::Points(n) => {
                n as i64 * list.iter().map(|s| s.step).max().unwrap_or(0)
            }
            WindowSize::Seconds(secs) => secs,
        }
    }

    fn label(self, args: &Args, index: usize, key: &str) -> String {
        match (self, args.get(index, key)) {
            (WindowSize::Seconds(_), Some(EvalValue::Str(s))) => format!("'{}'", s),
            (WindowSize::Points(n), _) => n.to_string(),
            (WindowSize::Seconds(secs), _) => format!("'{}s'", secs),
        }
    }
}

/// Slides a window that ends at (and includes) each requested point.
///
/// A window yields `None` when it has no known values or when the known share is below
/// `x_files_factor`.
fn moving(
    fctx: &FunctionContext<'_>,
    args: &Args,
    reduce: fn(&mut [f64]) -> f64,
) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let window = WindowSize::from_args(args, 1, "windowSize")?;
    let x_files_factor = args.number_or(2, "xFilesFactor", 0.0)?;
    let label = window.label(args, 1, "windowSize");
    let extended = fetch_with_bootstrap(fctx, &list, window.bootstrap_seconds(&list))?;

    let out = extended
        .iter()
        .map(|boot| {
            let series = &boot.series;
            let size = window.points(series.step);
            let mut known = Vec::with_capacity(size);
            let values = (0..series.values.len())
                .map(|i| {
                    let from = (i + 1).saturating_sub(size);
                    known.clear();
                    known.extend(series.values[from..=i].iter().filter_map(|v| *v));
                    if known.is_empty() || (known.len() as f64 / size as f64) < x_files_factor {
                        None
                    } else {
                        Some(reduce(&mut known))
                    }
                })
                .collect();
            let name = format!("{}({},{})", args.function(), series.name, label);
            boot.finish(name, values)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn moving_average(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    moving(fctx, args, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Upper median of the window.
fn moving_median(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    moving(fctx, args, |w| {
        w.sort_by(f64::total_cmp);
        w[w.len() / 2]
    })
}

fn moving_sum(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    moving(fctx, args, |w| w.iter().sum())
}

fn moving_min(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    moving(fctx, args, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

fn moving_max(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    moving(fctx, args, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Rolling population standard deviation over `points` samples.
///
/// A window yields `None` when its known share is below `windowTolerance`.
fn stdev(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let points = args.count_or(1, "points", 0)?;
    if points == 0 {
        return Err(StrataError::ArgumentShape(
            "stdev: 'points' must be a positive integer".to_string(),
        ));
    }
    let tolerance = args.number_or(2, "windowTolerance", 0.1)?;
    let window = WindowSize::Points(points);
    let extended = fetch_with_bootstrap(fctx, &list, window.bootstrap_seconds(&list))?;

    let out = extended
        .iter()
        .map(|boot| {
            let series = &boot.series;
            let values = (0..series.values.len())
                .map(|i| {
                    let slice = &series.values[(i + 1).saturating_sub(points)..=i];
                    let known = slice.iter().filter(|v| v.is_some()).count();
                    if known == 0 || (known as f64 / points as f64) < tolerance {
                        None
                    } else {
                        safe_stddev(slice)
                    }
                })
                .collect();
            boot.finish(format!("stdev({},{})", series.name, points), values)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_division_handles_negatives() {
        assert_eq!(ceil_div(7, 2), 4);
        assert_eq!(ceil_div(-7, 2), -3);
        assert_eq!(ceil_div(6, 3), 2);
    }

    #[test]
    fn window_points_from_duration() {
        assert_eq!(WindowSize::Seconds(300).points(60), 5);
        assert_eq!(WindowSize::Seconds(30).points(60), 1);
        assert_eq!(WindowSize::Points(3).points(60), 3);
    }

    #[test]
    fn finish_drops_prefix() {
        let series = TimeSeries::new("a", 0, 50, 10, vec![Some(1.0); 5]);
        let boot = Bootstrapped { series, prefix: 2 };
        let out = boot.finish("m(a)".into(), vec![Some(9.0); 5]);
        assert_eq!(out.start, 20);
        assert_eq!(out.values.len(), 3);
        assert_eq!(out.path_expression, "m(a)");
    }
}
