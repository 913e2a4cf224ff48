//! HTTP remote client against a mock server.

use quest_tracker::client::{HttpTaskClient, RemoteTaskClient};
use quest_tracker::config::RemoteConfig;
use quest_tracker::{TaskKind, TrackerError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer, token: Option<&str>) -> HttpTaskClient {
    let config = RemoteConfig {
        base_url: format!("{}/api/", server.uri()),
        request_timeout_secs: 5,
        auth_token: token.map(str::to_owned),
    };
    HttpTaskClient::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_enroll_posts_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/quest-7/enroll"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("secret")).await;
    client.enroll("quest-7").await.unwrap();
}

#[tokio::test]
async fn test_progress_report_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/quest-7/progress"))
        .and(body_json(json!({"value": 42.0, "final": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"progress": 42.0})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/quest-8/progress"))
        .and(body_json(json!({"value": null, "final": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"progress": null})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let report = client.report_progress("quest-7", Some(42.0), false).await.unwrap();
    assert_eq!(report.progress, Some(42.0));

    let heartbeat = client.report_progress("quest-8", None, false).await.unwrap();
    assert_eq!(heartbeat.progress, None);
}

#[tokio::test]
async fn test_empty_acknowledgement_is_a_successful_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/v/progress"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/w/progress"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let report = client.report_progress("v", Some(10.0), false).await.unwrap();
    assert_eq!(report.progress, None);
    let report = client.report_progress("w", Some(10.0), true).await.unwrap();
    assert_eq!(report.progress, None);
}

#[tokio::test]
async fn test_get_task_decodes_and_maps_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/quest-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "quest-7",
            "name": "Watch the trailer",
            "kind": "simulated_video",
            "target": {"raw": 120, "adjusted": 130},
            "enrolled_at": "2024-05-01T12:00:00Z"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let task = client.get_task("quest-7").await.unwrap().unwrap();
    assert_eq!(task.kind, TaskKind::SimulatedVideo);
    assert_eq!(task.target.adjusted, 130.0);
    assert!(task.is_enrolled());

    assert!(client.get_task("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_errors_become_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/quest-7/progress"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let err = client
        .report_progress("quest-7", Some(1.0), true)
        .await
        .unwrap_err();
    match err {
        TrackerError::Client(message) => {
            assert!(message.contains("503"));
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected client error, got {other:?}"),
    }
}
