#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Daemon-client tests against a mocked control plane.

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chunkflow_cli::{CliError, DaemonClient};

#[tokio::test]
async fn get_parses_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "running": true,
            "pid": 4242,
            "work_unit_counts": { "READY": 1 },
        })))
        .mount(&server)
        .await;

    let client = DaemonClient::from_base_url(server.uri());
    let body = client.get("/status").await.unwrap();
    assert_eq!(body["pid"], 4242);
    assert_eq!(body["work_unit_counts"]["READY"], 1);
}

#[tokio::test]
async fn error_body_maps_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/work-units/inject"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "Chunk 'ghost' not found" })),
        )
        .mount(&server)
        .await;

    let client = DaemonClient::from_base_url(server.uri());
    let err = client
        .post("/work-units/inject", &json!({ "chunk": "ghost" }))
        .await
        .unwrap_err();
    match err {
        CliError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Chunk 'ghost' not found");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn conflict_status_is_preserved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/work-units"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({ "error": "Work unit for chunk 'x' already exists" })),
        )
        .mount(&server)
        .await;

    let client = DaemonClient::from_base_url(server.uri());
    let err = client
        .post("/work-units", &json!({ "chunk": "x" }))
        .await
        .unwrap_err();
    match err {
        CliError::Api { status, .. } => assert_eq!(status, 409),
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn patch_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/config"))
        .and(body_json(json!({ "max_agents": 4 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "max_agents": 4 })))
        .mount(&server)
        .await;

    let client = DaemonClient::from_base_url(server.uri());
    let body = client.patch("/config", &json!({ "max_agents": 4 })).await.unwrap();
    assert_eq!(body["max_agents"], 4);
}

#[tokio::test]
async fn delete_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/work-units/doomed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "deleted": true, "chunk": "doomed" })),
        )
        .mount(&server)
        .await;

    let client = DaemonClient::from_base_url(server.uri());
    let body = client.delete("/work-units/doomed").await.unwrap();
    assert_eq!(body["deleted"], true);
}

#[tokio::test]
async fn missing_pid_file_means_not_running() {
    let tmp = tempfile::tempdir().unwrap();
    match DaemonClient::connect(tmp.path()) {
        Err(CliError::DaemonNotRunning) => {}
        other => panic!("expected DaemonNotRunning, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn error_without_body_uses_status_line() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/work-units/x"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = DaemonClient::from_base_url(server.uri());
    let err = client.get("/work-units/x").await.unwrap_err();
    match err {
        CliError::Api { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("500"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}
