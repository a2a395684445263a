use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use strata::evaluator::{EvalValue, Evaluator, RequestContext};
use strata::finder::{FindQuery, Finder, Store};
use strata::functions::{Args, FunctionContext, FunctionRegistry};
use strata::glob::GlobPattern;
use strata::interval::{Interval, IntervalSet};
use strata::node::{FetchResult, LeafNode, Node, Reader, TimeInfo};
use strata::telemetry::{EventListener, StrataEvent};
use strata::{StrataError, TimeSeries};

/// A series held in memory, answered on aligned windows like a file would be.
#[derive(Debug)]
struct MemReader {
    start: i64,
    step: i64,
    values: Vec<Option<f64>>,
}

impl Reader for MemReader {
    fn get_intervals(&self) -> strata::Result<IntervalSet> {
        let end = self.start + self.values.len() as i64 * self.step;
        Ok(IntervalSet::new(vec![Interval::new(self.start as f64, end as f64)?]))
    }

    fn fetch(&self, start: i64, end: i64) -> strata::Result<Option<FetchResult>> {
        let from = start.div_euclid(self.step) * self.step;
        let mut until = -(-end).div_euclid(self.step) * self.step;
        if until == from {
            until += self.step;
        }
        let values = (from..until)
            .step_by(self.step as usize)
            .map(|t| {
                if t < self.start {
                    return None;
                }
                self.values
                    .get(((t - self.start) / self.step) as usize)
                    .copied()
                    .flatten()
            })
            .collect();
        Ok(Some(FetchResult::new(TimeInfo::new(from, until, self.step), values)))
    }
}

#[derive(Debug, Default)]
struct MemFinder {
    series: BTreeMap<String, Arc<MemReader>>,
    lookups: AtomicUsize,
}

impl MemFinder {
    fn with(mut self, path: &str, start: i64, step: i64, values: Vec<Option<f64>>) -> Self {
        self.series
            .insert(path.to_string(), Arc::new(MemReader { start, step, values }));
        self
    }
}

impl Finder for MemFinder {
    fn find_nodes(&self, query: &FindQuery) -> strata::Result<Vec<Node>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let pattern = GlobPattern::compile(&query.pattern)?;
        Ok(self
            .series
            .iter()
            .filter(|(path, _)| pattern.matches(path))
            .map(|(path, reader)| Node::Leaf(LeafNode::new(path.clone(), reader.clone())))
            .collect())
    }
}

#[derive(Debug, Default)]
struct Recorder(Mutex<Vec<StrataEvent>>);

impl EventListener for Recorder {
    fn on_event(&self, event: StrataEvent) {
        self.0.lock().unwrap().push(event);
    }
}

fn ramp(scale: f64) -> Vec<Option<f64>> {
    (1..=12).map(|i| Some(i as f64 * scale)).collect()
}

/// `web.a` is 1..=12 and `web.b` is 10..=120 with a gap at t=1050, both from t=1000 at 10s.
fn finder() -> MemFinder {
    let mut b = ramp(10.0);
    b[5] = None;
    MemFinder::default()
        .with("web.a", 1000, 10, ramp(1.0))
        .with("web.b", 1000, 10, b)
        .with("coarse.x", 1000, 20, vec![Some(2.0); 6])
        .with(
            "counter.x",
            1000,
            10,
            (0..12).map(|i| Some([1.0, 3.0, 6.0, 2.0, 5.0, 9.0][i % 6])).collect(),
        )
}

fn evaluator() -> Evaluator {
    Evaluator::new(Store::new(vec![Arc::new(finder())]), FunctionRegistry::standard())
}

fn window() -> RequestContext {
    RequestContext::new(1040, 1100)
}

fn render(target: &str) -> Vec<TimeSeries> {
    evaluator().evaluate_target(&window(), target).unwrap()
}

fn some(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

#[test]
fn bare_paths_fetch_the_request_window() {
    let out = render("web.*");
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].name, "web.a");
    assert_eq!(out[0].path_expression, "web.*");
    assert_eq!((out[0].start, out[0].end, out[0].step), (1040, 1100, 10));
    assert_eq!(out[0].values, some(&[5.0, 6.0, 7.0, 8.0, 9.0, 10.0]));
    assert_eq!(out[1].values[1], None);
}

#[test]
fn combining_functions_reduce_rows() {
    let out = render("sumSeries(web.*)");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name, "sumSeries(web.*)");
    assert_eq!(out[0].values, some(&[55.0, 6.0, 77.0, 88.0, 99.0, 110.0]));

    let out = render("averageSeries(web.a,web.b)");
    assert_eq!(out[0].name, "averageSeries(web.a,web.b)");
    assert_eq!(out[0].values, some(&[27.5, 6.0, 38.5, 44.0, 49.5, 55.0]));

    let out = render("diffSeries(web.b,web.a)");
    assert_eq!(out[0].values[0], Some(45.0));
    assert_eq!(out[0].values[1], Some(6.0));

    assert!(render("sumSeries(missing.*)").is_empty());
}

#[test]
fn series_with_different_steps_are_aligned() {
    let out = render("sumSeries(web.a,coarse.x)");
    assert_eq!(out[0].step, 20);
    // web.a averaged over 20s buckets plus the coarse constant.
    assert_eq!(out[0].values, some(&[7.5, 9.5, 11.5]));
}

#[test]
fn pointwise_transforms() {
    let out = render("scale(web.a,2)");
    assert_eq!(out[0].name, "scale(web.a,2)");
    assert_eq!(out[0].values, some(&[10.0, 12.0, 14.0, 16.0, 18.0, 20.0]));

    let out = render("alias(offset(web.a,-5),'shifted')");
    assert_eq!(out[0].name, "shifted");
    assert_eq!(out[0].values[0], Some(0.0));

    let out = render("aliasByNode(scale(web.*,1),1)");
    let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);

    let out = render("keepLastValue(web.b)");
    assert_eq!(out[0].values[1], Some(50.0));

    let out = render("transformNull(web.b,-1)");
    assert_eq!(out[0].values[1], Some(-1.0));
}

#[test]
fn counters_handle_resets_and_wraps() {
    // Window covers readings 5, 9, 1, 3, 6, 2.
    let out = render("nonNegativeDerivative(counter.x)");
    assert_eq!(out[0].values, vec![None, Some(4.0), None, Some(2.0), Some(3.0), None]);

    let out = render("nonNegativeDerivative(counter.x,10)");
    assert_eq!(out[0].name, "nonNegativeDerivative(counter.x,10)");
    assert_eq!(out[0].values[2], Some(3.0));

    let out = render("perSecond(counter.x)");
    assert_eq!(out[0].values[1], Some(0.4));
}

#[test]
fn moving_windows_see_history_before_the_window() {
    let out = render("movingAverage(web.a,3)");
    assert_eq!(out[0].name, "movingAverage(web.a,3)");
    assert_eq!((out[0].start, out[0].step), (1040, 10));
    assert_eq!(out[0].values, some(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]));

    let out = render("movingSum(web.a,'20s')");
    assert_eq!(out[0].name, "movingSum(web.a,'20s')");
    assert_eq!(out[0].values[0], Some(9.0));

    let out = render("movingMax(windowSize=2,seriesList=web.b)");
    assert_eq!(out[0].values[1], Some(50.0));
}

#[test]
fn filters_rank_and_threshold() {
    let names = |target: &str| -> Vec<String> {
        render(target).into_iter().map(|s| s.name).collect()
    };
    assert_eq!(names("highestCurrent(web.*,1)"), ["web.b"]);
    assert_eq!(names("lowestAverage(web.*,1)"), ["web.a"]);
    assert_eq!(names("averageAbove(web.*,20)"), ["web.b"]);
    assert_eq!(names("currentBelow(web.*,10)"), ["web.a"]);
    assert_eq!(names("sortByName(web.*,true)"), ["web.b", "web.a"]);
    assert_eq!(names("limit(web.*,1)"), ["web.a"]);
}

#[test]
fn time_shift_reads_an_earlier_window() {
    let out = render("timeShift(web.a,'20s')");
    assert_eq!(out[0].name, "timeShift(web.a,'-20s')");
    assert_eq!(out[0].start, 1040);
    assert_eq!(out[0].values, some(&[3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));

    let out = render("timeStack(web.a,'10s',0,2)");
    let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["timeStack(web.a,'10s',0)", "timeStack(web.a,'10s',1)"]);
    assert_eq!(out[1].values[0], Some(4.0));
}

#[test]
fn holt_winters_bands_cover_the_window() {
    let out = render("holtWintersConfidenceBands(web.a)");
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].name, "holtWintersConfidenceLower(web.a)");
    assert_eq!(out[1].name, "holtWintersConfidenceUpper(web.a)");
    for band in &out {
        assert_eq!((band.start, band.step, band.values.len()), (1040, 10, 6));
    }
}

#[test]
fn unknown_functions_are_rejected_before_fetching() {
    let finder = Arc::new(finder());
    let evaluator = Evaluator::new(Store::new(vec![finder.clone()]), FunctionRegistry::standard());
    let err = evaluator
        .evaluate_target(&window(), "sumSeries(nope(web.*))")
        .unwrap_err();
    assert!(matches!(err, StrataError::InvalidFunctionName(name) if name == "nope"));
    assert_eq!(finder.lookups.load(Ordering::SeqCst), 0);
}

#[test]
fn malformed_targets_fail() {
    let evaluator = evaluator();
    assert!(matches!(
        evaluator.evaluate_target(&window(), "sumSeries(web.a"),
        Err(StrataError::Parse { .. })
    ));
    assert!(matches!(
        evaluator.evaluate_target(&window(), "42"),
        Err(StrataError::ArgumentShape(_))
    ));
    assert!(matches!(
        evaluator.evaluate_target(&window(), "scale(web.a,'x')"),
        Err(StrataError::ArgumentShape(_))
    ));
    assert!(matches!(
        evaluator.evaluate_target(&window(), "log(web.a,1)"),
        Err(StrataError::ArgumentShape(_))
    ));
}

fn double(_: &FunctionContext<'_>, args: &Args) -> strata::Result<EvalValue> {
    let list = args.series_list(0, "seriesList")?;
    Ok(EvalValue::SeriesList(
        list.iter()
            .map(|s| {
                let values = s.values.iter().map(|v| v.map(|v| v * 2.0)).collect();
                s.derive(format!("double({})", s.name), values)
            })
            .collect(),
    ))
}

#[test]
fn registries_can_be_extended_and_events_are_emitted() {
    let mut registry = FunctionRegistry::new();
    registry.register("double", double);
    assert!(!registry.contains("sumSeries"));

    let recorder = Arc::new(Recorder::default());
    let store = Store::new(vec![Arc::new(finder())]).with_listener(recorder.clone());
    let evaluator = Evaluator::new(store, registry);

    let out = evaluator.evaluate_target(&window(), "double(web.a)").unwrap();
    assert_eq!(out[0].values[0], Some(10.0));
    assert!(evaluator
        .evaluate_target(&window(), "sumSeries(web.a)")
        .is_err());

    let events = recorder.0.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        StrataEvent::FunctionEvaluated { name, series } if name == "double" && *series == 1
    )));
}
