use std::{
    sync::{Arc, Mutex, mpsc},
    time::Duration,
};

use axum_test::TestServer;
use serde_json::{Value, json};

use tradeflow_core::{
    PipelineRequest, PipelineSignal, ReasoningPipeline, ScriptedPipeline, pipeline::EmitFn,
};
use tradeflow_server::{config::Settings, routes::create_router, state::AppState};

fn settings(skip_auth: bool, token: Option<&str>) -> Settings {
    Settings {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        internal_api_token: token.map(str::to_string),
        skip_token_auth: skip_auth,
        evict_terminal_after_secs: None,
    }
}

fn open_server(pipeline: ScriptedPipeline) -> TestServer {
    let state = AppState::new(Arc::new(pipeline), settings(true, None));
    TestServer::new(create_router(state)).unwrap()
}

async fn create_run(server: &TestServer, ticker: &str) -> String {
    let response = server
        .post("/runs")
        .json(&json!({ "ticker": ticker, "trade_date": "2024-01-01" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "queued");
    body["id"].as_str().unwrap().to_string()
}

async fn poll_until_terminal(server: &TestServer, id: &str) -> Value {
    for _ in 0..100 {
        let response = server.get(&format!("/runs/{id}")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        let status = body["status"].as_str().unwrap();
        if status == "success" || status == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {id} never reached a terminal state");
}

#[tokio::test]
async fn submit_and_poll_to_success() {
    let server = open_server(ScriptedPipeline::echo());

    let id = create_run(&server, "NVDA").await;
    let body = poll_until_terminal(&server, &id).await;

    assert_eq!(body["status"], "success");
    assert_eq!(body["result"]["ticker"], "NVDA");
    assert!(body.get("error").is_none());

    let events = body["events"].as_array().unwrap();
    assert!(
        events
            .iter()
            .any(|event| event["kind"] == "progress" && event["payload"]["message"] == "stubbed")
    );
    // Ordered: queued status first, completion last.
    assert_eq!(events.first().unwrap()["kind"], "status");
    assert_eq!(events.first().unwrap()["payload"]["state"], "queued");
    assert_eq!(events.last().unwrap()["kind"], "complete");
}

#[tokio::test]
async fn failed_pipeline_surfaces_error_in_record() {
    let server = open_server(ScriptedPipeline::default().failing("vendor outage"));

    let id = create_run(&server, "NVDA").await;
    let body = poll_until_terminal(&server, &id).await;

    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "vendor outage");
    let last = body["events"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["kind"], "error");
    assert_eq!(last["payload"]["message"], "vendor outage");
}

#[tokio::test]
async fn one_run_failing_does_not_block_new_submissions() {
    let server = open_server(ScriptedPipeline::default().failing("vendor outage"));

    let failed = create_run(&server, "NVDA").await;
    poll_until_terminal(&server, &failed).await;

    // The service still accepts and tracks new runs.
    let next = create_run(&server, "AMD").await;
    poll_until_terminal(&server, &next).await;

    let response = server.get("/runs").await;
    response.assert_status_ok();
    let listed: Value = response.json();
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn state_delta_carries_only_changed_sections() {
    let pipeline = ScriptedPipeline::default()
        .with_snapshot(json!({ "market_report": "flat", "news_report": "quiet" }))
        .with_snapshot(json!({ "market_report": "breakout", "news_report": "quiet" }));
    let server = open_server(pipeline);

    let id = create_run(&server, "NVDA").await;
    let body = poll_until_terminal(&server, &id).await;

    let state_events: Vec<&Value> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|event| event["kind"] == "state")
        .collect();
    assert_eq!(state_events.len(), 2);

    let second = &state_events[1]["payload"]["reports"];
    assert_eq!(second["market"], "breakout");
    assert!(second.get("news").is_none());
}

#[tokio::test]
async fn validation_rejects_bad_submissions() {
    let server = open_server(ScriptedPipeline::echo());

    let empty_ticker = server
        .post("/runs")
        .json(&json!({ "ticker": "  ", "trade_date": "2024-01-01" }))
        .await;
    empty_ticker.assert_status_bad_request();

    let short_date = server
        .post("/runs")
        .json(&json!({ "ticker": "NVDA", "trade_date": "2024" }))
        .await;
    short_date.assert_status_bad_request();

    let bad_provider = server
        .post("/runs")
        .json(&json!({
            "ticker": "NVDA",
            "trade_date": "2024-01-01",
            "config": { "llm_provider": "mystery" },
        }))
        .await;
    bad_provider.assert_status_bad_request();
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let server = open_server(ScriptedPipeline::echo());
    let response = server
        .get("/runs/00000000-0000-0000-0000-000000000000")
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn auth_distinguishes_missing_from_wrong_credentials() {
    let state = AppState::new(
        Arc::new(ScriptedPipeline::echo()),
        settings(false, Some("sekrit")),
    );
    let server = TestServer::new(create_router(state)).unwrap();

    // Missing credential: unauthenticated, not forbidden.
    let missing = server.get("/runs").await;
    missing.assert_status_unauthorized();

    // Malformed scheme counts as missing.
    let malformed = server
        .get("/runs")
        .add_header("authorization", "Basic sekrit")
        .await;
    malformed.assert_status_unauthorized();

    // Present but wrong: forbidden.
    let wrong = server.get("/runs").authorization_bearer("nope").await;
    wrong.assert_status_forbidden();

    // Exact match passes.
    let ok = server.get("/runs").authorization_bearer("sekrit").await;
    ok.assert_status_ok();
}

#[tokio::test]
async fn auth_without_configured_secret_fails_closed() {
    let state = AppState::new(Arc::new(ScriptedPipeline::echo()), settings(false, None));
    let server = TestServer::new(create_router(state)).unwrap();

    let response = server.get("/runs").authorization_bearer("anything").await;
    response.assert_status_internal_server_error();
}

#[tokio::test]
async fn health_probe_is_public() {
    let state = AppState::new(
        Arc::new(ScriptedPipeline::echo()),
        settings(false, Some("sekrit")),
    );
    let server = TestServer::new(create_router(state)).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
}

/// Pipeline that emits one progress signal, then parks until released.
struct HoldingPipeline {
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl HoldingPipeline {
    fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                gate: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl ReasoningPipeline for HoldingPipeline {
    fn execute(&self, request: &PipelineRequest, emit: EmitFn<'_>) -> anyhow::Result<Value> {
        emit(PipelineSignal::Progress {
            message: "analysis underway".into(),
            percent: 40,
        });
        let gate = self
            .gate
            .lock()
            .unwrap()
            .take()
            .expect("pipeline executed twice");
        gate.recv().expect("gate sender dropped");
        Ok(json!({ "ticker": request.ticker, "decision": "HOLD" }))
    }

    fn cleanup(&self, _namespace: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stream_attached_mid_run_receives_live_tail() {
    let (pipeline, release) = HoldingPipeline::new();
    let state = AppState::new(Arc::new(pipeline), settings(true, None));
    let server = TestServer::new(create_router(state)).unwrap();

    let id = create_run(&server, "NVDA").await;

    // Wait until the run is live with its first progress event, so the
    // stream attaches strictly before termination.
    let mut live = false;
    for _ in 0..100 {
        let body: Value = server.get(&format!("/runs/{id}")).await.json();
        let has_progress = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .any(|event| event["kind"] == "progress");
        if body["status"] == "running" && has_progress {
            live = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(live, "run never reached its streaming phase");

    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        release.send(()).unwrap();
    });

    // The stream only closes once the run terminates, which can only
    // happen after the release fires: the terminal event arrives over
    // the live tail, not the history replay.
    let response = server.get(&format!("/runs/{id}/stream")).await;
    releaser.await.unwrap();
    response.assert_status_ok();
    let body = response.text();

    let progress_at = body.find("event: run.progress").unwrap();
    let complete_at = body.find("event: run.complete").unwrap();
    assert!(body.contains("\"state\":\"queued\""));
    assert!(body.contains("\"state\":\"running\""));
    assert!(progress_at < complete_at);
    assert!(body.contains("\"decision\":\"HOLD\""));
}

#[tokio::test]
async fn stream_replays_full_history_after_termination() {
    let server = open_server(ScriptedPipeline::echo());

    let id = create_run(&server, "NVDA").await;
    poll_until_terminal(&server, &id).await;

    // Attaching after termination: all events replay, then the stream
    // ends without waiting on the live tail.
    let response = server.get(&format!("/runs/{id}/stream")).await;
    response.assert_status_ok();
    let body = response.text();

    let queued_at = body.find("\"state\":\"queued\"").unwrap();
    let running_at = body.find("\"state\":\"running\"").unwrap();
    let complete_at = body.find("event: run.complete").unwrap();
    assert!(queued_at < running_at && running_at < complete_at);
    assert!(body.contains("event: run.progress"));
}
