use std::path::PathBuf;
use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// The library never prints. Callers provide an implementation that forwards these
/// events to their own logging, metrics or custom sinks.
pub trait EventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: StrataEvent);
}

/// Structured events emitted by the resolver, readers and evaluator.
#[derive(Debug, Clone)]
pub enum StrataEvent {
    IndexReloaded { path: PathBuf, entries: usize },
    IndexReloadFailed { path: PathBuf, error: String },

    /// One source of a multi-source read failed while others succeeded.
    SourceFetchFailed { path: String, error: String },
    FinderFailed { error: String },

    FunctionEvaluated { name: String, series: usize },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: StrataEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn EventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation and in-process scraping.
///
/// ## Key properties
/// - Library-safe: emitting metrics is effectively a no-op until a recorder is installed.
/// - Serverless scraping: callers can render Prometheus exposition text in-process.
pub mod strata_metrics {
    use std::time::Duration;

    #[cfg(feature = "prometheus")]
    use std::sync::atomic::{AtomicBool, Ordering};
    #[cfg(feature = "prometheus")]
    use std::sync::{Arc, Mutex};
    #[cfg(feature = "prometheus")]
    use std::thread::JoinHandle;

    #[cfg(feature = "prometheus")]
    use ::metrics::{describe_counter, describe_histogram, Unit};
    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const POINTS_WRITTEN: &str = "strata_points_written";
    pub const PROPAGATIONS: &str = "strata_propagations";
    pub const PROPAGATIONS_SKIPPED: &str = "strata_propagations_skipped";
    pub const FETCH_DURATION_SECONDS: &str = "strata_fetch_duration_seconds";
    pub const EVALUATIONS: &str = "strata_evaluations";
    pub const INDEX_RELOADS: &str = "strata_index_reloads";

    /// Handle to the in-process Prometheus recorder.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep thread.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("strata-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_points_written(points: u64) {
        if points > 0 {
            ::metrics::counter!(POINTS_WRITTEN).increment(points);
        }
    }

    #[inline]
    pub fn record_propagation(written: bool) {
        if written {
            ::metrics::counter!(PROPAGATIONS).increment(1);
        } else {
            ::metrics::counter!(PROPAGATIONS_SKIPPED).increment(1);
        }
    }

    #[inline]
    pub fn record_fetch(duration: Duration) {
        ::metrics::histogram!(FETCH_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_evaluation() {
        ::metrics::counter!(EVALUATIONS).increment(1);
    }

    #[inline]
    pub fn record_index_reload() {
        ::metrics::counter!(INDEX_RELOADS).increment(1);
    }

    #[cfg(feature = "prometheus")]
    fn describe_all() {
        describe_counter!(
            POINTS_WRITTEN,
            Unit::Count,
            "Total number of points written into series files by update and update_many."
        );
        describe_counter!(
            PROPAGATIONS,
            Unit::Count,
            "Aggregates written into a coarser archive after an update."
        );
        describe_counter!(
            PROPAGATIONS_SKIPPED,
            Unit::Count,
            "Propagations abandoned because too few finer points were known."
        );
        describe_counter!(
            EVALUATIONS,
            Unit::Count,
            "Number of target expressions evaluated."
        );
        describe_counter!(
            INDEX_RELOADS,
            Unit::Count,
            "Number of times the search index was (re)loaded from disk."
        );
        describe_histogram!(
            FETCH_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of ranged reads from a series file."
        );
    }
}
