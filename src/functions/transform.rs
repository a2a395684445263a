//! Pointwise transforms: each output series depends on one input series only.

use super::{Args, FunctionContext, FunctionRegistry};
use crate::error::{Result, StrataError};
use crate::evaluator::EvalValue;
use crate::series::{ConsolidationFn, TimeSeries};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    registry.register("scale", scale);
    registry.register("offset", offset);
    registry.register("absolute", absolute);
    registry.register("log", log);
    registry.register("invert", invert);
    registry.register("derivative", derivative);
    registry.register("nonNegativeDerivative", non_negative_derivative);
    registry.register("perSecond", per_second);
    registry.register("integral", integral);
    registry.register("transformNull", transform_null);
    registry.register("keepLastValue", keep_last_value);
    registry.register("alias", alias);
    registry.register("aliasByNode", alias_by_node);
    registry.register("consolidateBy", consolidate_by);
}

/// Applies `f` to every known value; the name records the transform.
fn map_values(
    list: Vec<TimeSeries>,
    name: impl Fn(&TimeSeries) -> String,
    f: impl Fn(f64) -> Option<f64>,
) -> Vec<TimeSeries> {
    list.iter()
        .map(|s| {
            let values = s.values.iter().map(|v| v.and_then(&f)).collect();
            let name = name(s);
            s.derive(name.clone(), values).with_path_expression(name)
        })
        .collect()
}

fn scale(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let factor = args.number(1, "factor")?;
    Ok(EvalValue::SeriesList(map_values(
        list,
        |s| format!("scale({},{})", s.name, factor),
        |v| Some(v * factor),
    )))
}

fn offset(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let amount = args.number(1, "factor")?;
    Ok(EvalValue::SeriesList(map_values(
        list,
        |s| format!("offset({},{})", s.name, amount),
        |v| Some(v + amount),
    )))
}

fn absolute(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    Ok(EvalValue::SeriesList(map_values(
        list,
        |s| format!("absolute({})", s.name),
        |v| Some(v.abs()),
    )))
}

/// Logarithm in `base` (default 10); non-positive values become `None`.
fn log(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let base = args.number_or(1, "base", 10.0)?;
    if base <= 0.0 || base == 1.0 {
        return Err(StrataError::ArgumentShape(format!(
            "log: base must be positive and not 1, got {}",
            base
        )));
    }
    Ok(EvalValue::SeriesList(map_values(
        list,
        |s| format!("log({},{})", s.name, base),
        |v| (v > 0.0).then(|| v.log(base)),
    )))
}

fn invert(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    Ok(EvalValue::SeriesList(map_values(
        list,
        |s| format!("invert({})", s.name),
        |v| (v != 0.0).then(|| 1.0 / v),
    )))
}

fn derivative(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let out = list
        .iter()
        .map(|s| {
            let mut prev: Option<f64> = None;
            let values = s
                .values
                .iter()
                .map(|v| {
                    let delta = match (*v, prev) {
                        (Some(cur), Some(p)) => Some(cur - p),
                        _ => None,
                    };
                    prev = *v;
                    delta
                })
                .collect();
            let name = format!("derivative({})", s.name);
            s.derive(name.clone(), values).with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

/// Delta between consecutive counter readings.
///
/// Returns `(delta, new previous)`. A decrease is treated as a wrap when `max_value`
/// is given, as a reset to `min_value` when that is given, and is otherwise unknown.
/// Readings outside `[min_value, max_value]` are discarded.
fn non_negative_delta(
    value: Option<f64>,
    prev: Option<f64>,
    max_value: Option<f64>,
    min_value: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    let Some(value) = value else {
        return (None, None);
    };
    if max_value.is_some_and(|max| value > max) || min_value.is_some_and(|min| value < min) {
        return (None, None);
    }
    let Some(prev) = prev else {
        return (None, Some(value));
    };
    if value >= prev {
        return (Some(value - prev), Some(value));
    }
    if let Some(max) = max_value {
        return (Some((max - prev) + value + 1.0), Some(value));
    }
    if let Some(min) = min_value {
        return (Some(value - min), Some(value));
    }
    (None, Some(value))
}

fn counter_deltas(
    s: &TimeSeries,
    max_value: Option<f64>,
    min_value: Option<f64>,
    per_second: bool,
) -> Vec<Option<f64>> {
    let mut prev = None;
    s.values
        .iter()
        .map(|v| {
            let (delta, next_prev) = non_negative_delta(*v, prev, max_value, min_value);
            prev = next_prev;
            if per_second {
                delta.map(|d| d / s.step as f64)
            } else {
                delta
            }
        })
        .collect()
}

fn counter_name(function: &str, s: &TimeSeries, max_value: Option<f64>, min_value: Option<f64>) -> String {
    let mut name = format!("{}({}", function, s.name);
    if let Some(max) = max_value {
        name.push_str(&format!(",{}", max));
    }
    if let Some(min) = min_value {
        name.push_str(&format!(",minValue={}", min));
    }
    name.push(')');
    name
}

fn non_negative_derivative(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let max_value = args.opt_number(1, "maxValue")?;
    let min_value = args.opt_number(2, "minValue")?;
    let out = list
        .iter()
        .map(|s| {
            let name = counter_name("nonNegativeDerivative", s, max_value, min_value);
            s.derive(name.clone(), counter_deltas(s, max_value, min_value, false))
                .with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn per_second(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let max_value = args.opt_number(1, "maxValue")?;
    let min_value = args.opt_number(2, "minValue")?;
    let out = list
        .iter()
        .map(|s| {
            let name = counter_name("perSecond", s, max_value, min_value);
            s.derive(name.clone(), counter_deltas(s, max_value, min_value, true))
                .with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

/// Running total; gaps stay `None` without resetting the total.
fn integral(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let out = list
        .iter()
        .map(|s| {
            let mut total = 0.0;
            let values = s
                .values
                .iter()
                .map(|v| {
                    v.map(|v| {
                        total += v;
                        total
                    })
                })
                .collect();
            let name = format!("integral({})", s.name);
            s.derive(name.clone(), values).with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn transform_null(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let default = args.number_or(1, "default", 0.0)?;
    let out = list
        .iter()
        .map(|s| {
            let values = s.values.iter().map(|v| Some(v.unwrap_or(default))).collect();
            let name = format!("transformNull({},{})", s.name, default);
            s.derive(name.clone(), values).with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

/// Fills runs of at most `limit` gaps with the last known value.
fn keep_last_value(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let limit = args.count_or(1, "limit", usize::MAX)?;
    let out = list
        .iter()
        .map(|s| {
            let mut values = s.values.clone();
            let mut last: Option<f64> = None;
            let mut gap_start: Option<usize> = None;
            for i in 0..values.len() {
                match values[i] {
                    Some(v) => {
                        if let (Some(start), Some(fill)) = (gap_start, last) {
                            if i - start <= limit {
                                values[start..i].iter_mut().for_each(|slot| *slot = Some(fill));
                            }
                        }
                        gap_start = None;
                        last = Some(v);
                    }
                    None => {
                        gap_start.get_or_insert(i);
                    }
                }
            }
            // A trailing gap is filled as well.
            if let (Some(start), Some(fill)) = (gap_start, last) {
                if values.len() - start <= limit {
                    values[start..].iter_mut().for_each(|slot| *slot = Some(fill));
                }
            }
            let name = format!("keepLastValue({})", s.name);
            s.derive(name.clone(), values).with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn alias(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let new_name = args.string(1, "newName")?;
    Ok(EvalValue::SeriesList(
        list.iter().map(|s| s.renamed(new_name.clone())).collect(),
    ))
}

/// The innermost metric path of a (possibly function-wrapped) series name.
fn metric_path(name: &str) -> &str {
    let inner = name.rsplit('(').next().unwrap_or(name);
    inner.split([',', ')']).next().unwrap_or(inner)
}

fn alias_by_node(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let mut nodes = Vec::new();
    for value in args.positional().iter().skip(1) {
        match value {
            EvalValue::Number(n) if n.fract() == 0.0 => nodes.push(*n as i64),
            other => {
                return Err(StrataError::ArgumentShape(format!(
                    "aliasByNode: node indexes must be integers, got {}",
                    other.type_name()
                )))
            }
        }
    }
    let out = list
        .iter()
        .map(|s| {
            let parts: Vec<&str> = metric_path(&s.name).split('.').collect();
            let picked: Vec<&str> = nodes
                .iter()
                .filter_map(|&n| {
                    let idx = if n < 0 { parts.len() as i64 + n } else { n };
                    usize::try_from(idx).ok().and_then(|i| parts.get(i).copied())
                })
                .collect();
            s.renamed(picked.join("."))
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

fn consolidate_by(_: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let func_name = args.string(1, "consolidationFunc")?;
    let func: ConsolidationFn = func_name.parse()?;
    let out = list
        .iter()
        .map(|s| {
            let name = format!("consolidateBy({},'{}')", s.name, func_name);
            s.renamed(name.clone())
                .with_path_expression(name)
                .with_consolidation_fn(func)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}
