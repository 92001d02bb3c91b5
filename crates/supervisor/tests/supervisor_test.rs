// End-to-end supervisor tests
//
// A `sleep` process stands in for the engine; wiremock serves its health and
// webhook endpoints; a recording runner stands in for the management CLI.

#![cfg(unix)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coldstart_core::{PayloadMode, ProvisioningError, ServiceState, SupervisorConfig};
use coldstart_supervisor::{
    CommandOutput, CommandRunner, ManagementCommand, ManagementOperation, Supervisor,
    INVOCATION_ID_HEADER,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<ManagementOperation>>,
}

impl RecordingRunner {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &ManagementCommand) -> Result<CommandOutput, ProvisioningError> {
        self.calls.lock().unwrap().push(command.operation.clone());
        Ok(CommandOutput::success(""))
    }
}

/// Replies `{"response": <prompt>}` like the echo workflow
struct EchoPrompt;

impl Respond for EchoPrompt {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        ResponseTemplate::new(200).set_body_json(json!({ "response": body["prompt"] }))
    }
}

/// Replies with the received body verbatim
struct EchoBody;

impl Respond for EchoBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        ResponseTemplate::new(200).set_body_json(body)
    }
}

async fn engine_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;
    server
}

fn config(dir: &Path, server: &MockServer) -> SupervisorConfig {
    let workflow_path = dir.join("echo.json");
    std::fs::write(
        &workflow_path,
        r#"{"id":"echo-workflow","name":"Echo","nodes":[{"type":"n8n-nodes-base.webhook","parameters":{"path":"echo"}}]}"#,
    )
    .unwrap();

    let mut config = SupervisorConfig::default();
    config.engine.command = "sleep".to_string();
    config.engine.args = vec!["30".to_string()];
    config.engine.host = "127.0.0.1".to_string();
    config.engine.port = server.address().port();
    config.engine.data_dir = dir.join("engine");
    config.health.interval = Duration::from_millis(20);
    config.health.timeout = Duration::from_secs(5);
    config.lifecycle.restart_settle = Duration::ZERO;
    config.lifecycle.ready_settle = Duration::ZERO;
    config.workflow_path = workflow_path;
    config
}

#[tokio::test]
async fn test_prompt_is_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook/echo"))
        .respond_with(EchoPrompt)
        .mount(&server)
        .await;
    let runner = Arc::new(RecordingRunner::default());
    let supervisor = Supervisor::with_runner(config(dir.path(), &server), runner.clone()).unwrap();

    let response = supervisor
        .invoke(json!({ "body": "{\"prompt\":\"hi\"}" }))
        .await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers["Content-Type"], "application/json");
    let body = response.body_json();
    assert_eq!(body["success"], true);
    assert_eq!(body["route"], "/webhook/echo");
    assert_eq!(body["input"], "hi");
    assert_eq!(body["data"]["response"], "hi");
    assert!(response.body.contains("hi"));

    let forwarded = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    assert!(forwarded.headers.contains_key(INVOCATION_ID_HEADER));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_malformed_body_falls_back_to_default_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook/echo"))
        .respond_with(EchoPrompt)
        .mount(&server)
        .await;
    let supervisor = Supervisor::with_runner(
        config(dir.path(), &server),
        Arc::new(RecordingRunner::default()),
    )
    .unwrap();

    let response = supervisor.invoke(json!({ "body": "{not json" })).await;

    assert_eq!(response.status_code, 200);
    let body = response.body_json();
    assert_eq!(body["success"], true);
    assert_eq!(body["input"], "Hello World");
    assert_eq!(body["data"]["response"], "Hello World");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_second_invocation_reuses_ready_engine() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook/echo"))
        .respond_with(EchoPrompt)
        .mount(&server)
        .await;
    let runner = Arc::new(RecordingRunner::default());
    let supervisor = Supervisor::with_runner(config(dir.path(), &server), runner.clone()).unwrap();

    supervisor.invoke(json!({ "prompt": "first" })).await;
    assert_eq!(supervisor.state(), ServiceState::Ready);
    let calls = runner.count();

    let response = supervisor.invoke(json!({ "prompt": "second" })).await;

    assert_eq!(response.body_json()["data"]["response"], "second");
    assert_eq!(runner.count(), calls);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_invocations_share_one_bring_up() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook/echo"))
        .respond_with(EchoPrompt)
        .mount(&server)
        .await;
    let runner = Arc::new(RecordingRunner::default());
    let supervisor = Supervisor::with_runner(config(dir.path(), &server), runner.clone()).unwrap();

    let (a, b) = tokio::join!(
        supervisor.invoke(json!({ "prompt": "a" })),
        supervisor.invoke(json!({ "prompt": "b" })),
    );

    assert_eq!(a.body_json()["data"]["response"], "a");
    assert_eq!(b.body_json()["data"]["response"], "b");
    // list + import + activate, once
    assert_eq!(runner.count(), 3);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_passthrough_forwards_event_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook/echo"))
        .respond_with(EchoBody)
        .mount(&server)
        .await;
    let mut config = config(dir.path(), &server);
    config.forward.payload_mode = PayloadMode::Passthrough;
    let supervisor =
        Supervisor::with_runner(config, Arc::new(RecordingRunner::default())).unwrap();

    let event = json!({ "body": { "message": "hey" }, "requestContext": { "id": 7 } });
    let response = supervisor.invoke(event.clone()).await;

    let body = response.body_json();
    assert_eq!(body["input"], "hey");
    assert_eq!(body["data"], event);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_passthrough_keeps_null_fields() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook/echo"))
        .respond_with(EchoBody)
        .mount(&server)
        .await;
    let mut config = config(dir.path(), &server);
    config.forward.payload_mode = PayloadMode::Passthrough;
    let supervisor =
        Supervisor::with_runner(config, Arc::new(RecordingRunner::default())).unwrap();

    let event = json!({ "body": null, "httpMethod": "GET", "queryStringParameters": null });
    let body = supervisor.invoke(event.clone()).await.body_json();

    assert_eq!(body["data"], event);
    assert!(body["data"].as_object().unwrap().contains_key("body"));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_falls_back_to_test_route() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    Mock::given(method("POST"))
        .and(path("/webhook-test/echo"))
        .respond_with(EchoPrompt)
        .mount(&server)
        .await;
    let supervisor = Supervisor::with_runner(
        config(dir.path(), &server),
        Arc::new(RecordingRunner::default()),
    )
    .unwrap();

    let body = supervisor.invoke(json!({ "prompt": "hi" })).await.body_json();

    assert_eq!(body["success"], true);
    assert_eq!(body["route"], "/webhook-test/echo");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_all_routes_failing_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let server = engine_server().await;
    let supervisor = Supervisor::with_runner(
        config(dir.path(), &server),
        Arc::new(RecordingRunner::default()),
    )
    .unwrap();

    let response = supervisor.invoke(json!({ "prompt": "hi" })).await;

    assert_eq!(response.status_code, 200);
    let body = response.body_json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error_type"], "forward_error");
    assert!(body["error"].as_str().unwrap().contains("/webhook/echo -> HTTP 404"));
    // Engine stays warm after a forwarding failure
    assert_eq!(supervisor.state(), ServiceState::Ready);

    supervisor.shutdown().await;
}
