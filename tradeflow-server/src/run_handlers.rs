use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::Stream;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use tradeflow_core::{
    RunEvent, RunRegistry, RunStatus, RunSubmission, RunSummary, executor::spawn_run,
};

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RunCreateResponse {
    pub id: Uuid,
    pub status: RunStatus,
}

/// POST /runs
/// Validate the submission, register the run, and schedule its
/// executor. Returns immediately with the queued run's id.
pub async fn create_run_handler(
    State(state): State<AppState>,
    Json(submission): Json<RunSubmission>,
) -> AppResult<Json<RunCreateResponse>> {
    submission.validate()?;

    let handle = state
        .registry
        .create(&submission.ticker, &submission.trade_date)
        .await;
    let run_id = handle.record.id;
    handle.bus.append(RunEvent::status(RunStatus::Queued)).await;

    info!(
        "run {run_id} queued: ticker={} date={}",
        submission.ticker, submission.trade_date
    );

    spawn_run(
        Arc::clone(&state.registry),
        Arc::clone(&state.pipeline),
        run_id,
        submission,
    );

    Ok(Json(RunCreateResponse {
        id: run_id,
        status: RunStatus::Queued,
    }))
}

/// GET /runs/{id}
pub async fn get_run_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RunSummary>> {
    let summary = state.registry.summary(id).await?;
    Ok(Json(summary))
}

/// GET /runs
/// Diagnostic listing of every tracked run.
pub async fn list_runs_handler(State(state): State<AppState>) -> AppResult<Json<Vec<RunSummary>>> {
    let mut summaries = Vec::new();
    for handle in state.registry.list().await {
        let events = handle.bus.snapshot().await;
        summaries.push(RunSummary::from_record(&handle.record, events));
    }
    Ok(Json(summaries))
}

/// GET /runs/{id}/stream
/// SSE stream: full event history first, then the live tail until the
/// run is terminal with nothing left buffered.
pub async fn stream_run_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, anyhow::Error>>>> {
    let handle = state.registry.get(id).await?;
    info!("SSE connection requested for run {id}");

    let (history, mut receiver) = handle.bus.subscribe().await;
    let registry = Arc::clone(&state.registry);

    let stream = async_stream::stream! {
        for event in history {
            yield sse_frame(&event);
        }

        let mut drained = run_is_drained(&registry, id, receiver.is_empty()).await;
        while !drained {
            match tokio::time::timeout(Duration::from_secs(1), receiver.recv()).await {
                Ok(Some(event)) => {
                    let terminal_marker = event.kind.is_terminal();
                    yield sse_frame(&event);
                    if terminal_marker {
                        drained = run_is_drained(&registry, id, receiver.is_empty()).await;
                    }
                }
                // Bus dropped; the run was evicted.
                Ok(None) => drained = true,
                // Idle wake: re-check terminal-plus-empty rather than
                // blocking unboundedly.
                Err(_) => {
                    drained = run_is_drained(&registry, id, receiver.is_empty()).await;
                    if drained {
                        while let Ok(event) = receiver.try_recv() {
                            yield sse_frame(&event);
                        }
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}

/// End-of-stream test: terminal status AND an empty pending queue.
/// Terminal status alone is not enough, since the terminal event and
/// the status flip are not appended atomically. An evicted run counts
/// as drained.
async fn run_is_drained(registry: &Arc<RunRegistry>, id: Uuid, queue_empty: bool) -> bool {
    if !queue_empty {
        return false;
    }
    registry
        .status(id)
        .await
        .map(RunStatus::is_terminal)
        .unwrap_or(true)
}

fn sse_frame(event: &RunEvent) -> Result<Event, anyhow::Error> {
    Event::default()
        .event(event.kind.event_name())
        .json_data(event)
        .map_err(Into::into)
}

/// GET /health
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
