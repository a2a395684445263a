//! Functions that re-evaluate their input over a shifted window: time shifts and
//! Holt-Winters forecasting.

use super::window::{fetch_with_bootstrap, Bootstrapped};
use super::{Args, FunctionContext, FunctionRegistry};
use crate::error::{Result, StrataError};
use crate::evaluator::EvalValue;
use crate::series::TimeSeries;
use crate::utils::parse_time_offset;

pub(crate) fn register(registry: &mut FunctionRegistry) {
    registry.register("timeShift", time_shift);
    registry.register("timeStack", time_stack);
    registry.register("holtWintersForecast", holt_winters_forecast);
    registry.register("holtWintersConfidenceBands", holt_winters_confidence_bands);
    registry.register("holtWintersAberration", holt_winters_aberration);
}

const HW_ALPHA: f64 = 0.1;
const HW_BETA: f64 = 0.0035;
const HW_GAMMA: f64 = 0.1;
const HW_SEASON_SECONDS: i64 = 86_400;
const HW_BOOTSTRAP_SECONDS: i64 = 7 * 86_400;

fn unique_expressions(list: &[TimeSeries]) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for series in list {
        if !out.contains(&series.path_expression.as_str()) {
            out.push(&series.path_expression);
        }
    }
    out
}

/// Re-evaluates every path expression of `list` shifted by `delta` seconds and moves the
/// results back onto the request timeline.
fn shifted(
    fctx: &FunctionContext<'_>,
    list: &[TimeSeries],
    delta: i64,
    reset_end: bool,
) -> Result<Vec<TimeSeries>> {
    let ctx = fctx.request;
    let shifted_ctx = ctx.with_window(ctx.start_time + delta, ctx.end_time + delta);
    let mut out = Vec::new();
    for expr in unique_expressions(list) {
        for mut series in fctx.evaluator.evaluate_target(&shifted_ctx, expr)? {
            series.start -= delta;
            series.end -= delta;
            if reset_end && series.end > ctx.end_time && series.step > 0 {
                let keep = ((ctx.end_time - series.start).max(0) + series.step - 1) / series.step;
                series.values.truncate(keep as usize);
                series.end = series.start + series.values.len() as i64 * series.step;
            }
            out.push(series);
        }
    }
    Ok(out)
}

/// Shifts by a relative offset; an unsigned offset means "into the past".
fn time_shift(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let shift = args.string(1, "timeShift")?;
    let reset_end = args.bool_or(2, "resetEnd", true)?;
    let normalized = if shift.starts_with(|c: char| c.is_ascii_digit()) {
        format!("-{}", shift)
    } else {
        shift
    };
    let delta = parse_time_offset(&normalized)?;
    let out = shifted(fctx, &list, delta, reset_end)?
        .into_iter()
        .map(|s| {
            let name = format!("timeShift({},'{}')", s.name, normalized);
            s.renamed(name.clone()).with_path_expression(name)
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

/// One shifted copy per unit in `[timeShiftStart, timeShiftEnd)`.
fn time_stack(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let unit_str = args.string_or(1, "timeShiftUnit", "1d")?;
    let start = args.count_or(2, "timeShiftStart", 0)?;
    let end = args.count_or(3, "timeShiftEnd", 7)?;
    let unit = parse_time_offset(&unit_str)?.abs();
    if unit == 0 {
        return Err(StrataError::ArgumentShape(format!(
            "timeStack: timeShiftUnit '{}' is empty",
            unit_str
        )));
    }
    let mut out = Vec::new();
    for i in start..end {
        for s in shifted(fctx, &list, -(i as i64) * unit, true)? {
            let name = format!("timeStack({},'{}',{})", s.name, unit_str, i);
            out.push(s.renamed(name.clone()).with_path_expression(name));
        }
    }
    Ok(EvalValue::SeriesList(out))
}

/// Per-point output of the Holt-Winters recurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HoltWinters {
    pub predictions: Vec<Option<f64>>,
    pub deviations: Vec<Option<f64>>,
}

/// Additive Holt-Winters with a seasonal period of `season_length` points.
///
/// A gap resets nothing but contributes no state; the prediction after a gap is unknown.
pub(crate) fn holt_winters_analysis(values: &[Option<f64>], season_length: usize) -> HoltWinters {
    let season_length = season_length.max(1);
    let n = values.len();
    let mut intercepts: Vec<Option<f64>> = Vec::with_capacity(n);
    let mut slopes: Vec<f64> = Vec::with_capacity(n);
    let mut seasonals: Vec<f64> = Vec::with_capacity(n);
    let mut deviations: Vec<f64> = Vec::with_capacity(n);
    let mut out = HoltWinters::default();
    let mut next_prediction: Option<f64> = None;

    let lagged = |series: &[f64], i: usize| -> f64 {
        i.checked_sub(season_length)
            .and_then(|j| series.get(j).copied())
            .unwrap_or(0.0)
    };

    for (i, value) in values.iter().enumerate() {
        let Some(actual) = *value else {
            intercepts.push(None);
            slopes.push(0.0);
            seasonals.push(0.0);
            deviations.push(0.0);
            out.predictions.push(next_prediction);
            out.deviations.push(Some(0.0));
            next_prediction = None;
            continue;
        };

        let (last_intercept, last_slope, prediction) = if i == 0 {
            (actual, 0.0, Some(actual))
        } else {
            let last_intercept = intercepts[i - 1].unwrap_or(actual);
            (last_intercept, slopes[i - 1], next_prediction)
        };
        let last_seasonal = lagged(&seasonals, i);
        let next_last_seasonal = lagged(&seasonals, i + 1);
        let last_deviation = lagged(&deviations, i);

        let intercept =
            HW_ALPHA * (actual - last_seasonal) + (1.0 - HW_ALPHA) * (last_intercept + last_slope);
        let slope = HW_BETA * (intercept - last_intercept) + (1.0 - HW_BETA) * last_slope;
        let seasonal = HW_GAMMA * (actual - intercept) + (1.0 - HW_GAMMA) * last_seasonal;
        let deviation = HW_GAMMA * (actual - prediction.unwrap_or(0.0)).abs()
            + (1.0 - HW_GAMMA) * last_deviation;

        intercepts.push(Some(intercept));
        slopes.push(slope);
        seasonals.push(seasonal);
        deviations.push(deviation);
        out.predictions.push(prediction);
        out.deviations.push(Some(deviation));
        next_prediction = Some(intercept + slope + next_last_seasonal);
    }
    out
}

/// Bootstraps a week of history and runs the analysis on each extended series.
fn analyse(fctx: &FunctionContext<'_>, list: &[TimeSeries]) -> Result<Vec<(Bootstrapped, HoltWinters)>> {
    Ok(fetch_with_bootstrap(fctx, list, HW_BOOTSTRAP_SECONDS)?
        .into_iter()
        .map(|boot| {
            let season = (HW_SEASON_SECONDS / boot.series.step.max(1)) as usize;
            let analysis = holt_winters_analysis(&boot.series.values, season);
            (boot, analysis)
        })
        .collect())
}

fn holt_winters_forecast(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let out = analyse(fctx, &list)?
        .into_iter()
        .map(|(boot, hw)| {
            boot.finish(
                format!("holtWintersForecast({})", boot.series.name),
                hw.predictions,
            )
        })
        .collect();
    Ok(EvalValue::SeriesList(out))
}

/// `(lower, upper)` bands at `delta` deviations around the prediction.
fn bands(hw: &HoltWinters, delta: f64) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    hw.predictions
        .iter()
        .zip(&hw.deviations)
        .map(|(p, d)| match (p, d) {
            (Some(p), Some(d)) => (Some(p - delta * d), Some(p + delta * d)),
            _ => (None, None),
        })
        .unzip()
}

fn holt_winters_confidence_bands(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let delta = args.number_or(1, "delta", 3.0)?;
    let mut out = Vec::new();
    for (boot, hw) in analyse(fctx, &list)? {
        let (lower, upper) = bands(&hw, delta);
        out.push(boot.finish(format!("holtWintersConfidenceLower({})", boot.series.name), lower));
        out.push(boot.finish(format!("holtWintersConfidenceUpper({})", boot.series.name), upper));
    }
    Ok(EvalValue::SeriesList(out))
}

/// Distance of each actual value outside the confidence bands; zero inside them.
fn holt_winters_aberration(fctx: &FunctionContext<'_>, args: &Args) -> Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    let delta = args.number_or(1, "delta", 3.0)?;
    let mut out = Vec::new();
    for (boot, hw) in analyse(fctx, &list)? {
        let (lower, upper) = bands(&hw, delta);
        let values = boot
            .series
            .values
            .iter()
            .zip(lower.iter().zip(&upper))
            .map(|(actual, (lo, hi))| {
                Some(match (*actual, lo, hi) {
                    (Some(actual), Some(_), Some(hi)) if actual > *hi => actual - hi,
                    (Some(actual), Some(lo), Some(_)) if actual < *lo => actual - lo,
                    _ => 0.0,
                })
            })
            .collect();
        out.push(boot.finish(format!("holtWintersAberration({})", boot.series.name), values));
    }
    Ok(EvalValue::SeriesList(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_input_predicts_itself() {
        let values = vec![Some(10.0); 50];
        let hw = holt_winters_analysis(&values, 5);
        assert_eq!(hw.predictions.len(), 50);
        for p in hw.predictions.iter().skip(1).take(4) {
            assert!((p.unwrap() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn gap_makes_next_prediction_unknown() {
        let values = vec![Some(1.0), Some(2.0), None, Some(3.0), Some(4.0)];
        let hw = holt_winters_analysis(&values, 24);
        assert!(hw.predictions[2].is_some());
        assert_eq!(hw.predictions[3], None);
        assert!(hw.predictions[4].is_some());
    }

    #[test]
    fn bands_surround_prediction() {
        let hw = HoltWinters {
            predictions: vec![Some(10.0), None],
            deviations: vec![Some(1.0), Some(1.0)],
        };
        let (lower, upper) = bands(&hw, 3.0);
        assert_eq!(lower, vec![Some(7.0), None]);
        assert_eq!(upper, vec![Some(13.0), None]);
    }
}
