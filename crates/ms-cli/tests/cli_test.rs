//! Runs the `mirrorsync` binary against mock trackers.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mirrorsync(args: Vec<String>, dir: &Path) -> Output {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_mirrorsync"))
            .args(&args)
            .current_dir(&dir)
            // Keep the user's ~/.mirrorsync/config.toml out of the picture.
            .env("HOME", &dir)
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

fn mantis_issue(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "summary": format!("issue {id}"),
        "description": "details",
        "status": { "id": 10, "name": "new" },
        "updated_at": "2024-01-02T00:00:00+00:00"
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_store_fails_without_init_db() {
    let dir = tempfile::tempdir().unwrap();
    let out = mirrorsync(
        vec![
            "mantisbt:http://127.0.0.1:9".into(),
            "mantisbt:http://127.0.0.1:9".into(),
        ],
        dir.path(),
    )
    .await;
    assert_eq!(out.status.code(), Some(1));
    assert!(!dir.path().join("sync.db.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_scheme_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = mirrorsync(
        vec![
            "github:https://api.github.com".into(),
            "mantisbt:http://127.0.0.1:9".into(),
            "--init-db".into(),
        ],
        dir.path(),
    )
    .await;
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("github"), "stderr: {stderr}");
}

#[tokio::test(flavor = "multi_thread")]
async fn mirrors_one_issue_between_mantis_instances() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/rest/issues"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [mantis_issue(1)]
        })))
        .mount(&primary)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [mantis_issue(1)]
        })))
        .mount(&primary)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/rest/issues"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "issue": { "id": 500 }
        })))
        .expect(1)
        .mount(&secondary)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rest/issues/500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issues": [mantis_issue(500)]
        })))
        .mount(&secondary)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/rest/issues/500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "issues": [] })))
        .mount(&secondary)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let primary_arg = format!("mantisbt:{}", primary.uri());
    let secondary_arg = format!("mantisbt:{}?project_id=2", secondary.uri());
    let out = mirrorsync(
        vec![
            primary_arg.clone(),
            secondary_arg,
            "--init-db".into(),
            "--json".into(),
        ],
        dir.path(),
    )
    .await;
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(out.status.code(), Some(0), "stderr: {stderr}");

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["outcome"], "completed");
    assert_eq!(report["report"]["issues_created"], 1);

    let db: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("sync.db.json")).unwrap())
            .unwrap();
    let bucket = format!("{}\t{}\tI", primary.uri(), secondary.uri());
    assert_eq!(db[&bucket]["1"], "500");

    // Second pass finds the stored counterpart and creates nothing.
    let again = mirrorsync(
        vec![
            primary_arg,
            format!("mantisbt:{}?project_id=2", secondary.uri()),
            "--json".into(),
        ],
        dir.path(),
    )
    .await;
    assert_eq!(again.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&again.stdout).unwrap();
    assert_eq!(report["report"]["issues_created"], 0);
}
