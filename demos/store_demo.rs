//! Example: create a few series files, write points, resolve them by glob and render an
//! expression over them.

use std::fs;
use std::path::PathBuf;

use strata::storage;
use strata::{
    AggregationMethod, ArchiveSpec, CreateOptions, Evaluator, FunctionRegistry, Point,
    RequestContext, Store, StoreConfig, StrataError,
};

fn main() -> Result<(), StrataError> {
    let config = StoreConfig {
        directories: vec![PathBuf::from("./demo_whisper")],
        ..StoreConfig::default()
    };
    let root = &config.directories[0];

    // Secondly for an hour, minutely for a day.
    let archives = [ArchiveSpec::new(1, 3600), ArchiveSpec::new(60, 1440)];
    let options = CreateOptions {
        aggregation_method: AggregationMethod::Sum,
        ..CreateOptions::default()
    };

    let now = storage::current_time();
    for (host, rate) in [("web01", 2.0), ("web02", 3.0)] {
        let dir = root.join("servers").join(host);
        fs::create_dir_all(&dir)?;
        let path = dir.join("requests.wsp");
        if !path.exists() {
            storage::create(&path, &archives, &options)?;
        }
        let points: Vec<Point> = (1..=30).map(|i| Point::new(now - i, rate)).collect();
        let written = storage::update_many(&path, &points)?;
        println!("{}: wrote {} points", path.display(), written);
    }

    let store = Store::from_config(&config);
    for node in store.find("servers.*.requests", None, None)? {
        println!("found {}", node.path());
    }

    let evaluator = Evaluator::new(store, FunctionRegistry::standard());
    let ctx = RequestContext::new(now as i64 - 60, now as i64);
    for series in evaluator.evaluate_target(&ctx, "sumSeries(servers.*.requests)")? {
        println!("{}", series);
    }
    Ok(())
}
