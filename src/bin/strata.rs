//! Command-line front end for strata series files, namespaces and expressions.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment
//! variables (`STRATA_*`), and CLI flags, then runs one subcommand.

use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "prometheus")]
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use strata::storage::{self, CreateOptions};
use strata::telemetry::{EventListener, StrataEvent};
use strata::utils::{now_secs, parse_retention_def, parse_time_offset};
use strata::{
    index, AggregationMethod, Evaluator, FunctionRegistry, IndexSearcher, Point, RequestContext,
    Store, StoreConfig, Timestamp,
};

// ---------- CLI ----------

/// Fixed-size multi-resolution time-series tool.
#[derive(Parser, Debug)]
#[command(name = "strata", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `strata.toml` is loaded when present.
    #[arg(long, env = "STRATA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false, global = true)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print the effective settings, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// Override the series directories (repeatable).
    #[arg(long = "directory", global = true)]
    pub directories: Vec<PathBuf>,

    /// Override the metric index path.
    #[arg(long, global = true)]
    pub index_path: Option<PathBuf>,

    /// Print the Prometheus scrape text to stderr after the command.
    #[cfg(feature = "prometheus")]
    #[arg(long, default_value_t = false, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a series file from retention definitions such as `60s:1d`.
    Create {
        path: PathBuf,
        #[arg(required = true)]
        retentions: Vec<String>,
        #[arg(long)]
        x_files_factor: Option<f32>,
        #[arg(long)]
        aggregation_method: Option<AggregationMethod>,
        #[arg(long)]
        sparse: bool,
    },
    /// Write points given as `value`, `timestamp:value` or `N:value` (now).
    Update {
        path: PathBuf,
        #[arg(required = true, allow_hyphen_values = true)]
        points: Vec<String>,
    },
    /// Print the points of a series file between two times.
    Fetch {
        path: PathBuf,
        #[arg(long, default_value = "-1d", allow_hyphen_values = true)]
        from: String,
        #[arg(long, default_value = "now", allow_hyphen_values = true)]
        until: String,
        /// Read this archive instead of the best-fitting one.
        #[arg(long)]
        archive: Option<usize>,
    },
    /// Print the header of a series file.
    Info { path: PathBuf },
    /// Copy the points of one series file into another with the same archives.
    Merge { from: PathBuf, to: PathBuf },
    /// Compare two series files with the same archives.
    Diff {
        from: PathBuf,
        to: PathBuf,
        /// Skip slots that are empty in either file.
        #[arg(long)]
        ignore_empty: bool,
    },
    /// Change the aggregation method (and optionally xFilesFactor) of a series file.
    SetAggregation {
        path: PathBuf,
        method: AggregationMethod,
        #[arg(long)]
        x_files_factor: Option<f32>,
    },
    /// Resolve a glob pattern against the configured directories.
    Find {
        pattern: String,
        #[arg(long, allow_hyphen_values = true)]
        from: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        until: Option<String>,
    },
    /// Complete a query against the metric index.
    Search {
        query: String,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Rewrite the metric index from the configured directories.
    BuildIndex,
    /// Evaluate target expressions and print the raw series.
    Render {
        #[arg(required = true)]
        targets: Vec<String>,
        #[arg(long, default_value = "-1d", allow_hyphen_values = true)]
        from: String,
        #[arg(long, default_value = "now", allow_hyphen_values = true)]
        until: String,
    },
}

// ---------- File/env config (all optional for partial config) ----------

/// Top-level config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct StrataFileConfig {
    pub directories: Option<Vec<String>>,
    pub index_path: Option<String>,
    pub max_search_results: Option<usize>,
    pub x_files_factor: Option<f32>,
    pub aggregation_method: Option<AggregationMethod>,
    pub sparse_create: Option<bool>,
}

/// Load merged config. CLI overrides file/env.
fn load_config(cli: &Cli) -> Result<StoreConfig, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("strata.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("STRATA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: StrataFileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let mut store_config = StoreConfig {
        event_listener: Arc::new(StderrEventListener),
        ..StoreConfig::default()
    };
    merge_into_store_config(&mut store_config, &partial)?;

    if !cli.directories.is_empty() {
        store_config.directories = cli.directories.clone();
    }
    if let Some(ref p) = cli.index_path {
        store_config.index_path = p.clone();
    }
    Ok(store_config)
}

/// Merge file/env partial config onto `StoreConfig`. Only overwrites fields that are `Some`.
fn merge_into_store_config(base: &mut StoreConfig, partial: &StrataFileConfig) -> Result<(), String> {
    if let Some(dirs) = &partial.directories {
        if dirs.is_empty() {
            return Err("directories must not be empty".to_string());
        }
        base.directories = dirs.iter().map(PathBuf::from).collect();
    }
    if let Some(s) = &partial.index_path {
        base.index_path = PathBuf::from(s);
    }
    if let Some(n) = partial.max_search_results {
        base.max_search_results = n;
    }
    if let Some(xff) = partial.x_files_factor {
        if !(0.0..=1.0).contains(&xff) {
            return Err(format!("x_files_factor must be within [0, 1], got {}", xff));
        }
        base.default_x_files_factor = xff;
    }
    if let Some(m) = partial.aggregation_method {
        base.default_aggregation_method = m;
    }
    if let Some(b) = partial.sparse_create {
        base.sparse_create = b;
    }
    Ok(())
}

// ---------- Events ----------

/// Forwards library events to stderr.
#[derive(Debug)]
struct StderrEventListener;

impl EventListener for StderrEventListener {
    fn on_event(&self, event: StrataEvent) {
        match event {
            StrataEvent::IndexReloaded { path, entries } => {
                eprintln!("index {} reloaded ({} entries)", path.display(), entries)
            }
            StrataEvent::IndexReloadFailed { path, error } => {
                eprintln!("index {} reload failed: {}", path.display(), error)
            }
            StrataEvent::SourceFetchFailed { path, error } => {
                eprintln!("partial fetch failure for {}: {}", path, error)
            }
            StrataEvent::FinderFailed { error } => eprintln!("finder failed: {}", error),
            // Too chatty for a terminal.
            StrataEvent::FunctionEvaluated { .. } => {}
        }
    }
}

// ---------- Commands ----------

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// An absolute epoch time, `now`, or an offset from now such as `-1h`.
fn parse_time(s: &str, now: i64) -> CliResult<i64> {
    if s == "now" {
        return Ok(now);
    }
    if let Ok(t) = s.parse::<i64>() {
        return Ok(t);
    }
    Ok(now + parse_time_offset(s)?)
}

fn parse_point(s: &str, now: Timestamp) -> CliResult<Point> {
    let (ts, value) = match s.split_once(':') {
        Some(("N", v)) => (now, v),
        Some((t, v)) => (t.parse::<Timestamp>()?, v),
        None => (now, s),
    };
    Ok(Point::new(ts, value.parse()?))
}

fn format_value(v: Option<f64>) -> String {
    v.map_or_else(|| "None".to_string(), |v| v.to_string())
}

fn run(config: &StoreConfig, command: &Command) -> CliResult<()> {
    let now = now_secs();
    match command {
        Command::Create {
            path,
            retentions,
            x_files_factor,
            aggregation_method,
            sparse,
        } => {
            let archives = retentions
                .iter()
                .map(|r| parse_retention_def(r))
                .collect::<Result<Vec<_>, _>>()?;
            let options = CreateOptions {
                x_files_factor: x_files_factor.unwrap_or(config.default_x_files_factor),
                aggregation_method: aggregation_method.unwrap_or(config.default_aggregation_method),
                sparse: *sparse || config.sparse_create,
            };
            let header = storage::create(path, &archives, &options)?;
            println!("created {} ({} bytes)", path.display(), header.file_size());
        }
        Command::Update { path, points } => {
            let now = storage::current_time();
            let points = points
                .iter()
                .map(|p| parse_point(p, now))
                .collect::<CliResult<Vec<_>>>()?;
            if let [point] = points.as_slice() {
                storage::update(path, point.value, Some(point.timestamp))?;
            } else {
                let written = storage::update_many(path, &points)?;
                println!("{} of {} points written", written, points.len());
            }
        }
        Command::Fetch {
            path,
            from,
            until,
            archive,
        } => {
            let from = parse_time(from, now)?;
            let until = parse_time(until, now)?;
            match storage::fetch_with(path, from, until, now, *archive)? {
                Some(result) => {
                    for (ts, v) in result.timestamps().zip(result.values.iter()) {
                        println!("{}\t{}", ts, format_value(*v));
                    }
                }
                None => eprintln!("no data in range"),
            }
        }
        Command::Info { path } => {
            let header = storage::info(path)?;
            println!("aggregationMethod: {}", header.aggregation_method);
            println!("maxRetention: {}", header.max_retention);
            println!("xFilesFactor: {}", header.x_files_factor);
            println!("fileSize: {}", header.file_size());
            for (i, a) in header.archives.iter().enumerate() {
                println!();
                println!("Archive {}", i);
                println!("offset: {}", a.offset);
                println!("secondsPerPoint: {}", a.seconds_per_point);
                println!("points: {}", a.points);
                println!("retention: {}", a.retention());
                println!("size: {}", a.size());
            }
        }
        Command::Merge { from, to } => storage::merge(from, to)?,
        Command::Diff {
            from,
            to,
            ignore_empty,
        } => {
            for archive in storage::diff(from, to, *ignore_empty)? {
                println!(
                    "archive {}: {} of {} points differ",
                    archive.archive_index,
                    archive.diffs.len(),
                    archive.total
                );
                for d in &archive.diffs {
                    println!("  {}\t{}\t{}", d.timestamp, format_value(d.from), format_value(d.to));
                }
            }
        }
        Command::SetAggregation {
            path,
            method,
            x_files_factor,
        } => {
            let old = storage::set_aggregation_method(path, *method, *x_files_factor)?;
            println!("{}: {} -> {}", path.display(), old, method);
        }
        Command::Find { pattern, from, until } => {
            let from = from.as_deref().map(|s| parse_time(s, now)).transpose()?;
            let until = until.as_deref().map(|s| parse_time(s, now)).transpose()?;
            let store = Store::from_config(config);
            for node in store.find(pattern, from, until)? {
                if node.is_leaf() {
                    println!("{}", node.path());
                } else {
                    println!("{}.", node.path());
                }
            }
        }
        Command::Search { query, max_results } => {
            let searcher =
                IndexSearcher::new(&config.index_path).with_listener(config.event_listener.clone());
            let limit = max_results.unwrap_or(config.max_search_results);
            for result in searcher.search(query, Some(limit))? {
                if result.is_leaf {
                    println!("{}", result.path);
                } else {
                    println!("{}.", result.path);
                }
            }
        }
        Command::BuildIndex => {
            let count = index::build_index(&config.directories, &config.index_path)?;
            println!("{} paths written to {}", count, config.index_path.display());
        }
        Command::Render { targets, from, until } => {
            let ctx = RequestContext::new(parse_time(from, now)?, parse_time(until, now)?);
            let evaluator = Evaluator::new(Store::from_config(config), FunctionRegistry::standard());
            for target in targets {
                for series in evaluator.evaluate_target(&ctx, target)? {
                    println!("{}", series);
                }
            }
        }
    }
    Ok(())
}

// ---------- Main ----------

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        let dirs: Vec<String> = config
            .directories
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        println!("directories={}", dirs.join(","));
        println!("index_path={}", config.index_path.display());
        println!("max_search_results={}", config.max_search_results);
        println!("x_files_factor={}", config.default_x_files_factor);
        println!("aggregation_method={}", config.default_aggregation_method);
        println!("sparse_create={}", config.sparse_create);
        return Ok(());
    }

    let Some(command) = cli.command.as_ref() else {
        return Err("no command given (see --help)".into());
    };

    #[cfg(feature = "prometheus")]
    let metrics = if cli.print_metrics {
        Some(strata::telemetry::strata_metrics::InProcessPrometheus::install(
            Duration::from_secs(5),
        )?)
    } else {
        None
    };

    let outcome = run(&config, command);

    #[cfg(feature = "prometheus")]
    if let Some(metrics) = metrics {
        eprint!("{}", metrics.render());
    }

    outcome.map_err(|e| {
        eprintln!("error: {}", e);
        e
    })
}
