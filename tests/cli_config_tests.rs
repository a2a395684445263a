//! Integration tests for the strata binary: config layering and the file subcommands.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Run strata in a subprocess from `cwd`. Returns (success, stdout, stderr).
fn run_strata(cwd: &Path, args: &[&str], env_extra: &[(&str, &str)]) -> (bool, String, String) {
    let exe = env!("CARGO_BIN_EXE_strata");
    let mut cmd = Command::new(exe);
    cmd.current_dir(cwd).args(args);
    for (k, v) in env_extra {
        cmd.env(k, v);
    }
    let out = cmd.output().expect("run strata");
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    (out.status.success(), stdout, stderr)
}

fn validate(cwd: &Path, args: &[&str], env_extra: &[(&str, &str)]) -> String {
    let mut all = vec!["--validate-config"];
    all.extend_from_slice(args);
    let (ok, stdout, stderr) = run_strata(cwd, &all, env_extra);
    assert!(ok, "stderr: {}", stderr);
    stdout
}

#[test]
fn validate_config_no_config_prints_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stdout = validate(dir.path(), &["--no-config"], &[]);
    for expected in [
        "directories=./storage/whisper",
        "index_path=./storage/index",
        "max_search_results=100",
        "x_files_factor=0.5",
        "aggregation_method=average",
        "sparse_create=false",
    ] {
        assert!(stdout.contains(expected), "missing {}: {}", expected, stdout);
    }
}

#[test]
fn env_overrides_defaults_and_cli_overrides_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = [
        ("STRATA_INDEX_PATH", "/env/index"),
        ("STRATA_MAX_SEARCH_RESULTS", "7"),
        ("STRATA_AGGREGATION_METHOD", "max"),
    ];
    let stdout = validate(dir.path(), &["--no-config"], &env);
    assert!(stdout.contains("index_path=/env/index"), "stdout: {}", stdout);
    assert!(stdout.contains("max_search_results=7"), "stdout: {}", stdout);
    assert!(stdout.contains("aggregation_method=max"), "stdout: {}", stdout);

    let stdout = validate(dir.path(), &["--no-config", "--index-path", "/cli/index"], &env);
    assert!(stdout.contains("index_path=/cli/index"), "CLI should win: {}", stdout);
}

#[test]
fn config_file_is_layered_under_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = dir.path().join("custom.toml");
    fs::write(
        &cfg,
        r#"
directories = ["/data/a", "/data/b"]
x_files_factor = 0.25
aggregation_method = "sum"
sparse_create = true
"#,
    )
    .expect("write config");

    let cfg_arg = cfg.to_str().unwrap();
    let stdout = validate(dir.path(), &["--config", cfg_arg], &[]);
    assert!(stdout.contains("directories=/data/a,/data/b"), "stdout: {}", stdout);
    assert!(stdout.contains("x_files_factor=0.25"), "stdout: {}", stdout);
    assert!(stdout.contains("aggregation_method=sum"), "stdout: {}", stdout);
    assert!(stdout.contains("sparse_create=true"), "stdout: {}", stdout);

    let stdout = validate(
        dir.path(),
        &["--config", cfg_arg, "--directory", "/cli/dir"],
        &[("STRATA_X_FILES_FACTOR", "0.75")],
    );
    assert!(stdout.contains("x_files_factor=0.75"), "env should win: {}", stdout);
    assert!(stdout.contains("directories=/cli/dir"), "CLI should win: {}", stdout);
}

#[test]
fn default_config_file_is_picked_up_from_cwd() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("strata.toml"), "max_search_results = 3\n").expect("write config");
    let stdout = validate(dir.path(), &[], &[]);
    assert!(stdout.contains("max_search_results=3"), "stdout: {}", stdout);

    let stdout = validate(dir.path(), &["--no-config"], &[]);
    assert!(stdout.contains("max_search_results=100"), "stdout: {}", stdout);
}

#[test]
fn bad_config_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (ok, _, stderr) = run_strata(
        dir.path(),
        &["--validate-config", "--config", "/nonexistent/strata.toml"],
        &[],
    );
    assert!(!ok);
    assert!(stderr.contains("config file not found"), "stderr: {}", stderr);

    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, "x_files_factor = 1.5\n").expect("write config");
    let (ok, _, stderr) = run_strata(
        dir.path(),
        &["--validate-config", "--config", cfg.to_str().unwrap()],
        &[],
    );
    assert!(!ok);
    assert!(stderr.contains("x_files_factor"), "stderr: {}", stderr);

    fs::write(&cfg, "aggregation_method = \"median\"\n").expect("write config");
    let (ok, _, _) = run_strata(
        dir.path(),
        &["--validate-config", "--config", cfg.to_str().unwrap()],
        &[],
    );
    assert!(!ok);
}

#[test]
fn missing_command_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (ok, _, stderr) = run_strata(dir.path(), &["--no-config"], &[]);
    assert!(!ok);
    assert!(stderr.contains("no command"), "stderr: {}", stderr);
}

#[test]
fn create_update_fetch_info_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cwd = dir.path();
    fs::create_dir_all(cwd.join("metrics/web")).expect("mkdir");
    let file = "metrics/web/hits.wsp";

    let (ok, stdout, stderr) = run_strata(
        cwd,
        &["--no-config", "create", file, "1s:10m", "1m:1d", "--aggregation-method", "sum"],
        &[],
    );
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("created"), "stdout: {}", stdout);

    let (ok, _, stderr) = run_strata(cwd, &["--no-config", "create", file, "1s:10m"], &[]);
    assert!(!ok);
    assert!(stderr.contains("exists"), "stderr: {}", stderr);

    let (ok, _, stderr) = run_strata(cwd, &["--no-config", "update", file, "N:5"], &[]);
    assert!(ok, "stderr: {}", stderr);

    let (ok, stdout, stderr) = run_strata(cwd, &["--no-config", "fetch", file, "--from", "-60s"], &[]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.lines().any(|l| l.ends_with("\t5")), "stdout: {}", stdout);
    assert!(stdout.lines().any(|l| l.ends_with("\tNone")), "stdout: {}", stdout);

    let (ok, stdout, stderr) = run_strata(cwd, &["--no-config", "info", file], &[]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("aggregationMethod: sum"), "stdout: {}", stdout);
    assert!(stdout.contains("maxRetention: 86400"), "stdout: {}", stdout);
    assert!(stdout.contains("Archive 1"), "stdout: {}", stdout);

    let (ok, stdout, stderr) =
        run_strata(cwd, &["--no-config", "set-aggregation", file, "max"], &[]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("sum -> max"), "stdout: {}", stdout);

    let (ok, _, _) = run_strata(cwd, &["--no-config", "update", file, "not-a-number"], &[]);
    assert!(!ok);
}

#[test]
fn find_render_and_search_over_a_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cwd = dir.path();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs()
        - 5;
    let point = format!("{}:2", ts);
    for name in ["web/a.wsp", "web/b.wsp", "db/q.wsp"] {
        fs::create_dir_all(cwd.join("metrics").join(name).parent().unwrap()).expect("mkdir");
        let path = format!("metrics/{}", name);
        let (ok, _, stderr) = run_strata(cwd, &["--no-config", "create", &path, "1s:10m"], &[]);
        assert!(ok, "stderr: {}", stderr);
        let (ok, _, stderr) = run_strata(cwd, &["--no-config", "update", &path, &point], &[]);
        assert!(ok, "stderr: {}", stderr);
    }
    let base = ["--no-config", "--directory", "metrics", "--index-path", "state/index"];
    let with = |extra: &[&str]| -> Vec<String> {
        base.iter().chain(extra).map(|s| s.to_string()).collect()
    };
    let run = |args: Vec<String>| {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_strata(cwd, &args, &[])
    };

    let (ok, stdout, stderr) = run(with(&["find", "*"]));
    assert!(ok, "stderr: {}", stderr);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), ["db.", "web."]);

    let (ok, stdout, _) = run(with(&["find", "web.*"]));
    assert!(ok);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), ["web.a", "web.b"]);

    let (ok, stdout, stderr) = run(with(&["render", "sumSeries(web.*)", "--from", "-30s"]));
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.starts_with("sumSeries(web.*),"), "stdout: {}", stdout);
    assert!(stdout.contains(",4"), "stdout: {}", stdout);

    let (ok, _, stderr) = run(with(&["render", "bogus(web.*)"]));
    assert!(!ok);
    assert!(stderr.contains("bogus"), "stderr: {}", stderr);

    let (ok, stdout, stderr) = run(with(&["build-index"]));
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.starts_with("3 paths"), "stdout: {}", stdout);

    let (ok, stdout, stderr) = run(with(&["search", "web.*"]));
    assert!(ok, "stderr: {}", stderr);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), ["web.", "web.a", "web.b"]);

    let (ok, stdout, _) = run(with(&["search", "web.*", "--max-results", "1"]));
    assert!(ok);
    assert_eq!(stdout.lines().count(), 1);
}
