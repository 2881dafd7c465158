use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;
use tempfile::tempdir;

const ISSUES: &str = r#"[
  {"number": 1, "title": "Crash when saving large file", "body": "Saving a 2GB file crashes the editor.", "createdAt": "2024-01-01T00:00:00Z"},
  {"number": 2, "title": "Save dialog freezes", "body": "The save dialog hangs, see #1", "createdAt": "2024-01-02T00:00:00Z"},
  {"number": 3, "title": "Autosave corrupts file", "body": "Related to acme/widgets#1", "created_at": "2024-01-03T00:00:00Z"},
  {"number": 4, "title": "Dark mode colours wrong", "body": "Sidebar colours are unreadable in dark mode."},
  {"number": 5, "title": "Theme switch flickers", "body": "Switching theme flickers the sidebar.", "state": "open"},
  {"number": 6, "title": "Add high contrast theme", "body": "Accessibility request for a new theme."},
  {"number": 7, "title": "Docs mention removed flag", "body": "The README still documents --legacy."}
]"#;

#[allow(deprecated)]
fn cli() -> Command {
    let mut cmd = Command::cargo_bin("issue-epics").expect("binary");
    cmd.env("EPIC_EMBEDDING_MODE", "bag-of-words")
        .env_remove("EPIC_LLM_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("EPIC_LOOSE_REFS")
        .env_remove("GITHUB_TOKEN")
        .arg("--quiet");
    cmd
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("command run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn cluster_without_llm_gives_every_cluster_an_epic() {
    let temp = tempdir().expect("tempdir");
    let input = temp.path().join("issues.json");
    fs::write(&input, ISSUES).expect("write issues");

    let result = run_json(
        cli()
            .arg("cluster")
            .arg("--repo")
            .arg("https://github.com/acme/widgets")
            .arg("--input")
            .arg(&input),
    );

    assert_eq!(result["repository"], "acme/widgets");
    assert_eq!(result["diagnostics"]["stage"], "done");
    assert_eq!(result["diagnostics"]["embeddingBackend"], "bag-of-words");
    assert_eq!(result["epics"], Value::Array(vec![]));

    let clusters = result["clusters"].as_object().expect("clusters");
    assert!(!clusters.is_empty());
    let mut members: Vec<u64> = Vec::new();
    for cluster in clusters.values() {
        let epic = &cluster["epicIssue"];
        assert!(epic.is_object(), "{cluster}");
        assert_eq!(epic["source"], "fallback");
        let labels: Vec<&str> = epic["labels"]
            .as_array()
            .expect("labels")
            .iter()
            .filter_map(|l| l["name"].as_str())
            .collect();
        assert!(labels.contains(&"epic"), "{labels:?}");
        members.extend(
            cluster["issues"]
                .as_array()
                .expect("issues")
                .iter()
                .filter_map(Value::as_u64),
        );
    }
    members.sort_unstable();
    assert_eq!(members, vec![1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn cluster_reads_stdin_and_honours_requested_count() {
    let result = run_json(
        cli()
            .args(["cluster", "--repo", "acme/widgets", "--input", "-", "--clusters", "2"])
            .write_stdin(ISSUES),
    );
    assert_eq!(result["diagnostics"]["clustering"]["method"], "k-means");
    assert_eq!(result["diagnostics"]["clustering"]["k"], 2);
}

#[test]
fn small_issue_sets_collapse_into_one_cluster() {
    let result = run_json(
        cli()
            .args(["cluster", "--repo", "acme/widgets", "--input", "-"])
            .write_stdin(r#"{"issues": [{"number": 9, "title": "Only one"}]}"#),
    );
    assert_eq!(result["diagnostics"]["stage"], "small_set");
    assert_eq!(result["clusters"]["0"]["issues"], serde_json::json!([9]));
}

#[test]
fn cluster_reports_missing_input() {
    cli()
        .args([
            "cluster",
            "--repo",
            "acme/widgets",
            "--input",
            "/definitely/not/here.json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("here.json"));
}

#[test]
fn cluster_rejects_bad_repository() {
    cli()
        .args(["cluster", "--repo", "https://gitlab.com/acme/widgets", "--input", "-"])
        .write_stdin("[]")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --repo"));
}

#[test]
fn refs_prints_sorted_numbers() {
    let refs = run_json(cli().args([
        "refs",
        "--repo",
        "acme/widgets",
        "see https://github.com/acme/widgets/issues/42, acme/widgets#7 and - [x] #3",
    ]));
    assert_eq!(refs, serde_json::json!([3, 7, 42]));
}

#[test]
fn refs_strict_mode_ignores_bare_hashes() {
    let refs = run_json(
        cli()
            .args(["refs", "--repo", "acme/widgets", "--strict-refs"])
            .write_stdin("PR #5 fixes [ ] #6"),
    );
    assert_eq!(refs, serde_json::json!([6]));
}

#[test]
fn publish_dry_run_prints_request() {
    let temp = tempdir().expect("tempdir");
    let input = temp.path().join("issues.json");
    let result_path = temp.path().join("result.json");
    fs::write(&input, ISSUES).expect("write issues");

    cli()
        .args(["cluster", "--repo", "acme/widgets", "--clusters", "2"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&result_path)
        .assert()
        .success();

    let request = run_json(
        cli()
            .args(["publish", "--cluster", "0", "--dry-run"])
            .arg("--result")
            .arg(&result_path),
    );
    assert_eq!(request["method"], "POST");
    assert_eq!(
        request["url"],
        "https://api.github.com/repos/acme/widgets/issues"
    );
    let labels = request["body"]["labels"].as_array().expect("labels");
    assert!(labels.iter().any(|l| l == "epic"));
    assert!(request["body"]["body"]
        .as_str()
        .expect("body")
        .contains("Related Issues"));
}

#[test]
fn publish_without_token_fails_before_sending() {
    let temp = tempdir().expect("tempdir");
    let result_path = temp.path().join("result.json");
    let output = cli()
        .args(["cluster", "--repo", "acme/widgets", "--input", "-"])
        .write_stdin(r#"[{"number": 1, "title": "Solo"}]"#)
        .output()
        .expect("cluster");
    fs::write(&result_path, output.stdout).expect("write result");

    cli()
        .args(["publish", "--cluster", "0"])
        .arg("--result")
        .arg(&result_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
}

#[test]
fn publish_rejects_unknown_cluster() {
    let temp = tempdir().expect("tempdir");
    let result_path = temp.path().join("result.json");
    let output = cli()
        .args(["cluster", "--repo", "acme/widgets", "--input", "-"])
        .write_stdin(r#"[{"number": 1, "title": "Solo"}]"#)
        .output()
        .expect("cluster");
    fs::write(&result_path, output.stdout).expect("write result");

    cli()
        .args(["publish", "--cluster", "4", "--dry-run"])
        .arg("--result")
        .arg(&result_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No epic for cluster 4"));
}

fn write_solo_result(path: &Path) {
    let output = cli()
        .args(["cluster", "--repo", "acme/widgets", "--input", "-"])
        .write_stdin(r#"[{"number": 1, "title": "Solo"}]"#)
        .output()
        .expect("cluster");
    assert!(output.status.success());
    fs::write(path, output.stdout).expect("write result");
}

/// Accepts one request and answers it with `201 Created` and `reply`.
fn create_issue_listener(reply: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let api_url = format!("http://{}", listener.local_addr().expect("local addr"));
    let handle = thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).expect("read");
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if body.len() >= length {
                    break;
                }
            }
            assert!(n > 0, "connection closed early");
        }
        let response = format!(
            "HTTP/1.1 201 Created\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
            reply.len()
        );
        socket.write_all(response.as_bytes()).expect("write");
        String::from_utf8_lossy(&request).to_string()
    });
    (api_url, handle)
}

#[test]
fn publish_records_created_issue_in_result_file() {
    let temp = tempdir().expect("tempdir");
    let result_path = temp.path().join("result.json");
    write_solo_result(&result_path);
    let (api_url, server) = create_issue_listener(
        r#"{"number": 42, "html_url": "https://github.com/acme/widgets/issues/42"}"#,
    );

    let published = run_json(
        cli()
            .env("GITHUB_TOKEN", "t0k")
            .args(["publish", "--cluster", "0", "--api-url", &api_url])
            .arg("--result")
            .arg(&result_path),
    );
    assert_eq!(published["number"], 42);

    let request = server.join().expect("server");
    assert!(request.starts_with("POST /repos/acme/widgets/issues HTTP/1.1"));
    assert!(request.to_lowercase().contains("authorization: token t0k"));

    let stored: Value =
        serde_json::from_str(&fs::read_to_string(&result_path).expect("read result"))
            .expect("result json");
    let record = &stored["clusters"]["0"]["epicIssue"]["published"];
    assert_eq!(record["number"], 42);
    assert_eq!(record["url"], "https://github.com/acme/widgets/issues/42");
    assert_eq!(stored["clusters"]["0"]["issues"], serde_json::json!([1]));
}

#[test]
fn publish_refuses_an_already_published_epic() {
    let temp = tempdir().expect("tempdir");
    let result_path = temp.path().join("result.json");
    write_solo_result(&result_path);
    let mut stored: Value =
        serde_json::from_str(&fs::read_to_string(&result_path).expect("read result"))
            .expect("result json");
    stored["clusters"]["0"]["epicIssue"]["published"] =
        serde_json::json!({"number": 7, "url": "https://github.com/acme/widgets/issues/7"});
    fs::write(&result_path, stored.to_string()).expect("write result");

    cli()
        .env("GITHUB_TOKEN", "t0k")
        .args(["publish", "--cluster", "0", "--api-url", "http://127.0.0.1:9"])
        .arg("--result")
        .arg(&result_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already published as #7"));
}

#[test]
fn schema_describes_clustering_result() {
    let schema = run_json(cli().arg("schema"));
    assert!(schema["properties"]["clusters"].is_object(), "{schema}");
}
