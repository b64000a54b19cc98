use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn run_snapstore(dir: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_snapstore"));
    cmd.current_dir(dir)
        .args(args)
        .env_remove("SNAPSTORE_RAW")
        .env_remove("SNAPSTORE_DERIVED")
        .env_remove("SNAPSTORE_LOG_DIR")
        .env("SNAPSTORE_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().expect("spawn snapstore");
    if let Some(input) = stdin {
        child
            .stdin
            .take()
            .expect("stdin")
            .write_all(input.as_bytes())
            .expect("write stdin");
    } else {
        drop(child.stdin.take());
    }
    child.wait_with_output().expect("wait snapstore")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn assert_ok(out: &Output) {
    assert!(
        out.status.success(),
        "snapstore failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

const FINANCE: &str = r#"{"columns":["timestamp","open","high","low","close","volume"],
  "rows":[["2024-01-01 09:30:00","10.0","10.5","9.8","10.2","1000"]]}"#;

#[test]
fn write_then_latest_round_trips_through_json() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    let out = run_snapstore(dir, &["write", "--topic", "finance"], Some(FINANCE));
    assert_ok(&out);
    let key = stdout(&out).trim().to_string();
    assert_eq!(key.len(), 14, "unexpected key {key:?}");
    assert!(dir.join("data").join("data.db").is_file());

    let out = run_snapstore(dir, &["latest", "--topic", "finance", "--format", "json"], None);
    assert_ok(&out);
    let snapshot: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(snapshot["topic"], "finance");
    assert_eq!(snapshot["key"], key.as_str());
    assert_eq!(snapshot["table"]["columns"][4], "close");
    assert_eq!(snapshot["table"]["rows"][0][5], "1000");

    let out = run_snapstore(dir, &["list", "--topic", "finance"], None);
    assert_ok(&out);
    assert_eq!(stdout(&out).trim(), key);

    let out = run_snapstore(dir, &["topics", "--format", "json"], None);
    let topics: Vec<String> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(topics, vec!["finance"]);

    let out = run_snapstore(dir, &["latest", "--topic", "finance"], None);
    assert_ok(&out);
    let text = stdout(&out);
    assert!(text.contains("timestamp\topen\thigh\tlow\tclose\tvolume"));
    assert!(text.contains("(1 rows x 6 columns)"));
}

#[test]
fn failures_map_to_distinct_exit_codes() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    let out = run_snapstore(dir, &["latest", "--topic", "finance"], None);
    assert_eq!(out.status.code(), Some(3), "missing store");
    assert!(String::from_utf8_lossy(&out.stderr).contains("Store does not exist"));

    assert_ok(&run_snapstore(dir, &["create-topic", "leaderboards"], None));
    let out = run_snapstore(dir, &["latest", "--topic", "leaderboards"], None);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no snapshots"));

    let out = run_snapstore(dir, &["latest", "--topic", "weather"], None);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Topic not found"));

    let ragged = r#"{"columns":["a","b"],"rows":[["1"]]}"#;
    let out = run_snapstore(dir, &["write", "--topic", "web_search"], Some(ragged));
    assert_eq!(out.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Schema mismatch"));

    let out = run_snapstore(dir, &["write", "--topic", "bad topic"], Some(FINANCE));
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn blobs_are_written_and_fetched_by_name() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("fr.png"), [0x89u8, b'P', b'N', b'G']).unwrap();
    let table = r#"{"columns":["rank","player","country","kills","matches_played"],
      "rows":[["1","alpha","https://cdn.example/flags/fr.png","1204","80"]]}"#;

    let blob_arg = "flags/https://cdn.example/flags/fr.png=fr.png";
    let out = run_snapstore(
        dir,
        &["write", "--topic", "leaderboards", "--blob", blob_arg],
        Some(table),
    );
    assert_ok(&out);

    let out = run_snapstore(dir, &["blob", "--topic", "leaderboards"], None);
    assert_ok(&out);
    assert_eq!(stdout(&out).trim(), "flags/https://cdn.example/flags/fr.png");

    let out = run_snapstore(
        dir,
        &[
            "blob",
            "--topic",
            "leaderboards",
            "--name",
            "flags/https://cdn.example/flags/fr.png",
            "--output",
            "out/fr.png",
        ],
        None,
    );
    assert_ok(&out);
    assert_eq!(fs::read(dir.join("out").join("fr.png")).unwrap(), [0x89u8, b'P', b'N', b'G']);

    let out = run_snapstore(
        dir,
        &["blob", "--topic", "leaderboards", "--name", "flags/unknown"],
        None,
    );
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn derive_uses_pipelines_from_the_config_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(
        dir.join("snapstore.toml"),
        r#"
raw_store = "stores/raw.db"
derived_store = "stores/derived.db"

[derive.web_search]
steps = [
    { op = "skip_rows", count = 1 },
    { op = "sum", column = "count", into = "total_searches" },
]
"#,
    )
    .unwrap();
    let export = r#"{"columns":["count"],"rows":[["Category: All categories"],["12"],["30"]]}"#;
    assert_ok(&run_snapstore(dir, &["write", "--topic", "web_search"], Some(export)));

    let out = run_snapstore(dir, &["derive", "--topic", "web_search", "--format", "json"], None);
    assert_ok(&out);
    let outcome: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(outcome["topic"], "web_search");
    assert_eq!(outcome["rows"], 1);

    let out = run_snapstore(
        dir,
        &["latest", "--topic", "web_search", "--role", "derived", "--format", "json"],
        None,
    );
    assert_ok(&out);
    let snapshot: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(snapshot["table"]["columns"][0], "total_searches");
    assert_eq!(snapshot["table"]["rows"][0][0], "42");
    assert!(dir.join("stores").join("derived.db").is_file());

    let out = run_snapstore(
        dir,
        &["derive", "--topic", "web_search", "--select", "count", "--collision", "disambiguate"],
        None,
    );
    assert_ok(&out);
}

#[test]
fn derive_all_runs_every_pipeline_and_reports_failures() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(
        dir.join("snapstore.toml"),
        r#"
[derive.finance]
steps = [{ op = "cast", column = "close", to = "float" }]

[derive.web_search]
steps = [
    { op = "skip_rows", count = 1 },
    { op = "sum", column = "count", into = "total_searches" },
]
"#,
    )
    .unwrap();
    let export = r#"{"columns":["count"],"rows":[["Category: All categories"],["12"],["30"]]}"#;
    assert_ok(&run_snapstore(dir, &["write", "--topic", "web_search"], Some(export)));

    let out = run_snapstore(dir, &["derive", "--all", "--format", "json"], None);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("derive failed"), "{stderr}");
    assert!(stderr.contains("finance"), "{stderr}");
    let outcomes: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(outcomes.as_array().unwrap().len(), 1);
    assert_eq!(outcomes[0]["topic"], "web_search");

    let out = run_snapstore(
        dir,
        &["latest", "--topic", "web_search", "--role", "derived", "--format", "json"],
        None,
    );
    assert_ok(&out);
    let snapshot: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(snapshot["table"]["rows"][0][0], "42");

    assert_ok(&run_snapstore(dir, &["write", "--topic", "finance"], Some(FINANCE)));
    let out = run_snapstore(dir, &["derive", "--all", "--collision", "disambiguate"], None);
    assert_ok(&out);
    let text = stdout(&out);
    assert!(text.contains("finance "), "{text}");
    assert!(text.contains("web_search "), "{text}");
}

#[test]
fn verify_and_events_report_store_health() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    assert_ok(&run_snapstore(dir, &["write", "--topic", "finance"], Some(FINANCE)));

    let out = run_snapstore(dir, &["verify"], None);
    assert_ok(&out);
    assert!(stdout(&out).starts_with("ok"));

    let out = run_snapstore(dir, &["events", "--format", "json"], None);
    assert_ok(&out);
    let events: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(events[0]["op"], "snapshot.write");
    assert_eq!(events[0]["topic"], "finance");
    assert_eq!(events[0]["status"], "success");

    let conn = rusqlite::Connection::open(dir.join("data").join("data.db")).unwrap();
    conn.execute("UPDATE snapshots SET checksum = 'bad'", []).unwrap();
    drop(conn);
    let out = run_snapstore(dir, &["verify", "--format", "json"], None);
    assert_eq!(out.status.code(), Some(5));
    let failures: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(failures[0]["topic"], "finance");
}

#[test]
fn catalog_lists_collector_schemas() {
    let tmp = TempDir::new().unwrap();
    let out = run_snapstore(
        tmp.path(),
        &["catalog", "--subject", "XDefiant", "--format", "json"],
        None,
    );
    assert_ok(&out);
    let topics: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let names: Vec<&str> = topics
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"finance"));
    assert!(names.contains(&"reddit_XDefiant_posts"));
    assert!(names.contains(&"reddit_XDefiant_comments"));
}
