use std::{path::Path, process::Command};

use serde_json::Value;

const DOC: &str = "# Single Candle\n\n## Hammer\nBullish reversal after a downtrend.\n\n## Shooting Star\nBearish reversal after an uptrend.\n";

const SCRIPTS: &[(&str, &str)] = &[
    (
        "volume-profile.md",
        "---\nid: vp\ntitle: Volume Profile\nauthor: alice\ntags: [Volume, Profile]\n---\n# Volume Profile\n",
    ),
    (
        "rsi.md",
        "---\nid: rsi\ntitle: RSI Divergence\nauthor: bob\ntags: [oscillator, volume]\n---\n# RSI Divergence\n",
    ),
];

fn docslice(data_dir: &Path, args: &[&str]) -> (i32, Value) {
    docslice_with_profile(data_dir, "candlestick", args)
}

fn docslice_with_profile(data_dir: &Path, profile: &str, args: &[&str]) -> (i32, Value) {
    let output = Command::new(env!("CARGO_BIN_EXE_docslice"))
        .args(["--profile", profile, "--quiet"])
        .args(args)
        .env("DOCSLICE_DATA_DIR", data_dir)
        .env_remove("DOCSLICE_SOURCE_DIR")
        .env_remove("DOCSLICE_PROFILE")
        .output()
        .expect("run docslice");
    let body: Value =
        serde_json::from_slice(&output.stdout).expect("JSON on stdout");
    (output.status.code().unwrap_or(-1), body)
}

fn fixture() -> tempfile::TempDir {
    fixture_with(&[("single.md", DOC)])
}

fn fixture_with(files: &[(&str, &str)]) -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let sources = tmp.path().join("raw");
    std::fs::create_dir_all(&sources).unwrap();
    for (name, body) in files {
        std::fs::write(sources.join(name), body).unwrap();
    }
    tmp
}

#[test]
fn build_then_extract() {
    let tmp = fixture();

    let (code, body) = docslice(tmp.path(), &["build-index"]);
    assert_eq!(code, 0, "{body}");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["command"], "build-index");
    assert_eq!(body["result"]["stats"]["total_files"], 1);

    let (code, body) = docslice(tmp.path(), &["get", "pattern", "Shooting Star"]);
    assert_eq!(code, 0, "{body}");
    let content = body["result"]["content"].as_str().unwrap();
    assert!(content.starts_with("## Shooting Star"));
    assert!(!content.contains("Hammer"));

    let (code, body) = docslice(tmp.path(), &["check-index"]);
    assert_eq!(code, 0);
    assert_eq!(body["result"]["up_to_date"], true);

    let (_, body) = docslice(tmp.path(), &["token-report"]);
    assert_eq!(body["result"]["total_operations"], 1);
}

#[test]
fn unknown_entity_exits_with_suggestions() {
    let tmp = fixture();

    let (code, body) = docslice(tmp.path(), &["get", "pattern", "hammr"]);
    assert_eq!(code, 1);
    assert_eq!(body["status"], "error");
    let suggestions = body["suggestions"].as_array().expect("suggestions");
    assert!(suggestions.iter().any(|s| s == "pat/hammer"));
}

#[test]
fn missing_sources_exit_with_code_two() {
    let tmp = tempfile::tempdir().unwrap();

    let (code, body) = docslice(tmp.path(), &["search", "hammer"]);
    assert_eq!(code, 2);
    assert_eq!(body["command"], "search");
    assert!(body.get("suggestions").is_none());
}

#[test]
fn batch_reports_each_id() {
    let tmp = fixture();

    let (code, body) =
        docslice(tmp.path(), &["batch", "pat/hammer", "nope/missing", "-j", "2"]);
    assert_eq!(code, 0, "{body}");
    assert_eq!(body["result"]["total"], 2);
    assert_eq!(body["result"]["failed"], 1);
    assert_eq!(body["result"]["results"][0]["id"], "pat/hammer");
}

#[test]
fn tags_and_authors_are_browsable() {
    let tmp = fixture_with(SCRIPTS);
    let run = |args: &[&str]| docslice_with_profile(tmp.path(), "scripts", args);

    let (code, body) = run(&["tags"]);
    assert_eq!(code, 0, "{body}");
    let tags = &body["result"]["tags"];
    assert_eq!(body["result"]["count"], 3);
    assert!(
        tags.as_array()
            .unwrap()
            .iter()
            .any(|t| t["value"] == "volume" && t["count"] == 2)
    );

    let (code, body) = run(&["tagged", "VOLUME", "--kind", "script"]);
    assert_eq!(code, 0, "{body}");
    let ids: Vec<&str> = body["result"]["entities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["script/rsi", "script/vp"]);

    let (code, body) = run(&["authors"]);
    assert_eq!(code, 0, "{body}");
    assert_eq!(body["result"]["count"], 2);
    assert_eq!(body["result"]["authors"][0]["value"], "alice");

    let (code, body) = run(&["find", "script", "author", "bob"]);
    assert_eq!(code, 0, "{body}");
    assert_eq!(body["result"]["entities"][0]["id"], "script/rsi");
}
