//! Drives one run from queued to a terminal state.
//!
//! The pipeline call is long and blocking, so it runs on the blocking
//! thread pool while an async forwarder task owns the aggregator and
//! the bus appends. Callback invocations cross the thread boundary
//! over an unbounded channel; the forwarder is the only context that
//! appends pipeline-driven events, which keeps the log ordered.

use std::{path::Path, sync::Arc};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregator::StreamAggregator;
use crate::error::{Result, RunError};
use crate::events::RunEvent;
use crate::namespace;
use crate::pipeline::{
    EmitFn, PipelineRequest, PipelineSignal, ReasoningPipeline, inject_run_metadata,
    merge_config_overrides,
};
use crate::registry::RunRegistry;
use crate::run::{RunStatus, RunSubmission};

/// Schedule the executor task for a freshly created run. Returns the
/// task handle; callers normally detach it.
pub fn spawn_run(
    registry: Arc<RunRegistry>,
    pipeline: Arc<dyn ReasoningPipeline>,
    run_id: Uuid,
    submission: RunSubmission,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = execute_run(registry, pipeline, run_id, submission).await {
            // NotFound here means the run was evicted mid-flight;
            // anything else is a bug worth a loud log line.
            error!("executor for run {run_id} aborted: {err}");
        }
    })
}

async fn execute_run(
    registry: Arc<RunRegistry>,
    pipeline: Arc<dyn ReasoningPipeline>,
    run_id: Uuid,
    submission: RunSubmission,
) -> Result<()> {
    let handle = registry.get(run_id).await?;
    let bus = Arc::clone(&handle.bus);

    registry
        .update(run_id, |record| {
            record.advance(RunStatus::Running);
        })
        .await?;
    bus.append(RunEvent::status(RunStatus::Running)).await;

    let request = match build_request(run_id, &submission) {
        Ok(request) => request,
        Err(err) => {
            let message = err.to_string();
            bus.append(RunEvent::error(&message, None)).await;
            registry
                .update(run_id, |record| {
                    record.advance(RunStatus::Failed);
                    record.error = Some(message.clone());
                })
                .await?;
            return Ok(());
        }
    };
    let run_namespace = request.memory_namespace.clone();

    info!(
        "run {run_id} executing: ticker={} date={} namespace={}",
        request.ticker, request.trade_date, run_namespace
    );

    // Pipeline callbacks arrive on blocking-pool threads; the
    // forwarder is the single writer routing them onto the bus.
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<PipelineSignal>();
    let forwarder_bus = Arc::clone(&bus);
    let forwarder_registry = Arc::clone(&registry);
    let forwarder = tokio::spawn(async move {
        let mut aggregator = StreamAggregator::new();
        while let Some(signal) = signal_rx.recv().await {
            let appended = match signal {
                PipelineSignal::Progress { message, percent } => {
                    forwarder_bus
                        .append(RunEvent::progress(&message, percent))
                        .await;
                    true
                }
                PipelineSignal::State { snapshot } => match aggregator.apply(&snapshot) {
                    Some(delta) => {
                        forwarder_bus.append(RunEvent::state(&delta)).await;
                        true
                    }
                    None => false,
                },
            };
            // Event appends are record mutations too; keep updated_at
            // current while the pipeline streams.
            if appended {
                let _ = forwarder_registry.touch(run_id).await;
            }
        }
    });

    let blocking_pipeline = Arc::clone(&pipeline);
    let blocking_request = request.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let emit = move |signal: PipelineSignal| {
            let _ = signal_tx.send(signal);
        };
        blocking_pipeline.execute(&blocking_request, &emit)
    })
    .await;

    // The sender lives in the blocking closure; once that returns the
    // channel closes and the forwarder drains whatever is left.
    let _ = forwarder.await;

    let outcome = match outcome {
        Ok(result) => result,
        Err(join_err) => Err(anyhow::anyhow!("pipeline task panicked: {join_err}")),
    };

    match outcome {
        Ok(result) => {
            if let Some(path) = &submission.result_path {
                persist_result(path, &result).await;
            }
            bus.append(RunEvent::complete(result.clone())).await;
            registry
                .update(run_id, |record| {
                    record.advance(RunStatus::Success);
                    record.result = Some(result);
                })
                .await?;
            info!("run {run_id} completed successfully");
        }
        Err(err) => {
            let message = err.to_string();
            let trace = format!("{err:?}");
            bus.append(RunEvent::error(&message, Some(&trace))).await;
            registry
                .update(run_id, |record| {
                    record.advance(RunStatus::Failed);
                    record.error = Some(message.clone());
                })
                .await?;
            warn!("run {run_id} failed: {message}");
        }
    }

    cleanup_namespace(&pipeline, &run_namespace).await;
    Ok(())
}

/// Assemble the pipeline request: merge config overrides, resolve the
/// provider profile, and derive the isolated memory namespace.
fn build_request(run_id: Uuid, submission: &RunSubmission) -> Result<PipelineRequest> {
    let mut config =
        merge_config_overrides(submission.config_path.as_deref(), submission.config.as_ref())?;

    let provider = crate::providers::resolve_profile(&config)?;

    let requested = config
        .get("memory_namespace")
        .and_then(Value::as_str)
        .map(str::to_string);
    let derived = format!("run_{}", run_id.simple());
    let memory_namespace = namespace::resolve(Some(
        requested.as_deref().unwrap_or(derived.as_str()),
    ));

    inject_run_metadata(&mut config, &run_id.simple().to_string(), &memory_namespace);

    Ok(PipelineRequest {
        ticker: submission.ticker.clone(),
        trade_date: submission.trade_date.clone(),
        memory_namespace,
        config,
        provider,
    })
}

/// Best-effort side write of the final payload. Never fails the run.
async fn persist_result(path: &Path, result: &Value) {
    let rendered = match serde_json::to_vec_pretty(result) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("could not serialize result payload: {err}");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            warn!("could not create result directory {}: {err}", parent.display());
            return;
        }
    }
    if let Err(err) = tokio::fs::write(path, rendered).await {
        warn!("could not persist result to {}: {err}", path.display());
    }
}

/// Tear down the run's memory namespace. Errors are logged and
/// swallowed; cleanup never overrides the recorded outcome.
async fn cleanup_namespace(pipeline: &Arc<dyn ReasoningPipeline>, run_namespace: &str) {
    let pipeline = Arc::clone(pipeline);
    let owned = run_namespace.to_string();
    let result = tokio::task::spawn_blocking(move || pipeline.cleanup(&owned)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("cleanup for namespace {run_namespace} failed: {err}"),
        Err(join_err) => warn!("cleanup task for namespace {run_namespace} panicked: {join_err}"),
    }
}

/// Run the pipeline synchronously on the caller's thread, outside the
/// registry. Used by transport-layer callers (the CLI runner); the
/// error is propagated to the caller after cleanup, since there is no
/// record to capture it into.
pub fn execute_blocking(
    pipeline: &dyn ReasoningPipeline,
    submission: &RunSubmission,
    emit: EmitFn<'_>,
) -> Result<PipelineOutcome> {
    submission.validate()?;
    let request = build_request(Uuid::new_v4(), submission)?;
    let run_namespace = request.memory_namespace.clone();

    let executed = pipeline.execute(&request, emit);

    if let Err(err) = pipeline.cleanup(&run_namespace) {
        warn!("cleanup for namespace {run_namespace} failed: {err}");
    }

    match executed {
        Ok(result) => Ok(PipelineOutcome {
            result,
            memory_namespace: run_namespace,
        }),
        Err(err) => Err(RunError::Pipeline(err.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: Value,
    pub memory_namespace: String,
}
