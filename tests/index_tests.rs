use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tempfile::tempdir;

use strata::index::{build_index, collect_metric_paths, IndexSearcher, SearchResult};
use strata::storage::{self, CreateOptions};
use strata::telemetry::{EventListener, StrataEvent};
use strata::ArchiveSpec;

#[derive(Debug, Default)]
struct Recorder(Mutex<Vec<StrataEvent>>);

impl EventListener for Recorder {
    fn on_event(&self, event: StrataEvent) {
        self.0.lock().unwrap().push(event);
    }
}

fn touch_series(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    storage::create(&path, &[ArchiveSpec::new(60, 10)], &CreateOptions::default()).unwrap();
}

fn bump_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

fn leaf(path: &str) -> SearchResult {
    SearchResult {
        path: path.to_string(),
        is_leaf: true,
    }
}

fn branch(path: &str) -> SearchResult {
    SearchResult {
        path: path.to_string(),
        is_leaf: false,
    }
}

#[test]
fn build_index_lists_every_series_file() {
    let data = tempdir().unwrap();
    let other = tempdir().unwrap();
    touch_series(data.path(), "web/web01/cpu.wsp");
    touch_series(data.path(), "web/web02/cpu.wsp");
    touch_series(data.path(), ".trash/old.wsp");
    touch_series(other.path(), "db/primary/qps.wsp");
    fs::write(data.path().join("web/README"), b"x").unwrap();
    fs::write(data.path().join("web/archived.wsp.zst"), b"x").unwrap();

    let dirs = vec![data.path().to_path_buf(), other.path().to_path_buf()];
    let paths: Vec<String> = collect_metric_paths(&dirs).unwrap().into_iter().collect();
    assert_eq!(
        paths,
        ["db.primary.qps", "web.archived", "web.web01.cpu", "web.web02.cpu"]
    );

    let index = data.path().join("state").join("index");
    assert_eq!(build_index(&dirs, &index).unwrap(), 4);
    let written = fs::read_to_string(&index).unwrap();
    assert_eq!(written.lines().count(), 4);
    assert!(written.ends_with('\n'));
}

#[test]
fn search_walks_matching_prefixes() {
    let dir = tempdir().unwrap();
    let index = dir.path().join("index");
    fs::write(
        &index,
        "web.web01.cpu\nweb.web01.mem\nweb.web02.cpu\ndb.primary.qps\n\n",
    )
    .unwrap();

    let searcher = IndexSearcher::new(&index);
    assert_eq!(searcher.len().unwrap(), 4);
    assert!(!searcher.is_empty().unwrap());

    let hits = searcher.search("web.web01.c*", None).unwrap();
    assert_eq!(
        hits,
        vec![branch("web"), branch("web.web01"), leaf("web.web01.cpu")]
    );

    let hits = searcher.search("web.*", None).unwrap();
    assert_eq!(
        hits,
        vec![
            branch("web"),
            branch("web.web01"),
            leaf("web.web01.cpu"),
            leaf("web.web01.mem"),
            branch("web.web02"),
            leaf("web.web02.cpu"),
        ]
    );

    let hits = searcher.search("web.*", Some(3)).unwrap();
    assert_eq!(hits.len(), 3);

    assert!(searcher.search("nope.*", None).unwrap().is_empty());
}

#[test]
fn a_metric_that_prefixes_others_is_reported_as_a_branch() {
    let dir = tempdir().unwrap();
    let index = dir.path().join("index");
    fs::write(&index, "app.requests
app.requests.errors
app.latency
").unwrap();

    let searcher = IndexSearcher::new(&index);
    let hits = searcher.search("app.*", None).unwrap();
    assert_eq!(
        hits,
        vec![
            branch("app"),
            leaf("app.latency"),
            branch("app.requests"),
            leaf("app.requests.errors"),
        ]
    );
    assert!(hits.iter().all(|hit| !hit.path.ends_with('.')));
}

#[test]
fn searcher_reloads_when_the_index_changes() {
    let dir = tempdir().unwrap();
    let index = dir.path().join("index");
    fs::write(&index, "a.b\n").unwrap();

    let recorder = Arc::new(Recorder::default());
    let searcher = IndexSearcher::new(&index).with_listener(recorder.clone());
    assert_eq!(searcher.len().unwrap(), 1);

    fs::write(&index, "a.b\na.c\n").unwrap();
    bump_mtime(&index, 5);
    assert_eq!(searcher.search("a.c", None).unwrap(), vec![branch("a"), leaf("a.c")]);

    let reloads = recorder
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, StrataEvent::IndexReloaded { .. }))
        .count();
    assert_eq!(reloads, 2);

    // Unchanged mtime: no reload.
    searcher.search("a.*", None).unwrap();
    let reloads_after = recorder
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, StrataEvent::IndexReloaded { .. }))
        .count();
    assert_eq!(reloads_after, 2);
}

#[test]
fn missing_index_keeps_the_previous_tree() {
    let dir = tempdir().unwrap();
    let index = dir.path().join("index");
    fs::write(&index, "x.y\n").unwrap();

    let recorder = Arc::new(Recorder::default());
    let searcher = IndexSearcher::new(&index).with_listener(recorder.clone());
    assert_eq!(searcher.len().unwrap(), 1);

    fs::remove_file(&index).unwrap();
    assert_eq!(searcher.search("x.*", None).unwrap(), vec![branch("x"), leaf("x.y")]);
    assert!(recorder
        .0
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, StrataEvent::IndexReloadFailed { path, .. } if path == &index)));
}

#[test]
fn never_loaded_index_is_empty() {
    let dir = tempdir().unwrap();
    let searcher = IndexSearcher::new(dir.path().join("absent"));
    assert!(searcher.is_empty().unwrap());
    assert!(searcher.search("*", None).unwrap().is_empty());
}
