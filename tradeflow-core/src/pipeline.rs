//! Contract with the external reasoning pipeline.
//!
//! The pipeline is an opaque, long-running, blocking computation. The
//! engine hands it a request and a callback, and receives either a
//! structured result or an error. Everything behind the trait
//! (language models, retrieval memory, data vendors) is out of scope
//! here; the shipped [`ScriptedPipeline`] stands in for it in tests
//! and local development.

use std::path::Path;

use serde_json::{Map, Value, json};

use crate::error::{Result, RunError};
use crate::providers::ProviderProfile;

/// A callback invocation from inside a pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineSignal {
    Progress { message: String, percent: u8 },
    State { snapshot: Value },
}

/// Everything a pipeline needs to execute one run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub ticker: String,
    pub trade_date: String,
    /// Isolates this run's retrieval-memory storage from all others.
    pub memory_namespace: String,
    /// Merged configuration overrides (file overrides, then request
    /// overrides), with run metadata injected.
    pub config: Map<String, Value>,
    pub provider: Option<ProviderProfile>,
}

pub type EmitFn<'a> = &'a (dyn Fn(PipelineSignal) + Send + Sync);

/// The external multi-agent reasoning pipeline.
///
/// `execute` blocks for the duration of the run and may invoke `emit`
/// from any thread. `cleanup` tears down the memory namespace created
/// for the run; the executor calls it exactly once per run and
/// swallows its errors.
pub trait ReasoningPipeline: Send + Sync + 'static {
    fn execute(&self, request: &PipelineRequest, emit: EmitFn<'_>) -> anyhow::Result<Value>;

    fn cleanup(&self, namespace: &str) -> anyhow::Result<()>;
}

/// Merge configuration overrides: file content first (when a path is
/// given), then inline overrides on top.
pub fn merge_config_overrides(
    config_path: Option<&Path>,
    overrides: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>> {
    let mut merged = Map::new();

    if let Some(path) = config_path {
        let raw = std::fs::read_to_string(path)?;
        let parsed: Value = serde_json::from_str(&raw)?;
        let Value::Object(file_overrides) = parsed else {
            return Err(RunError::InvalidRequest(format!(
                "config file {} must contain a JSON object",
                path.display()
            )));
        };
        merged.extend(file_overrides);
    }

    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }

    Ok(merged)
}

/// Inject run identity into the merged config the way the pipeline
/// expects it: top-level `memory_namespace` plus a `metadata` block
/// carrying `run_id` (preserving caller-supplied metadata entries).
pub fn inject_run_metadata(config: &mut Map<String, Value>, run_id: &str, namespace: &str) {
    let mut metadata = match config.get("metadata") {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    metadata
        .entry("run_id".to_string())
        .or_insert_with(|| Value::String(run_id.to_string()));
    metadata.insert(
        "memory_namespace".to_string(),
        Value::String(namespace.to_string()),
    );
    config.insert("metadata".to_string(), Value::Object(metadata));
    config.insert(
        "memory_namespace".to_string(),
        Value::String(namespace.to_string()),
    );
}

/// Deterministic in-process pipeline: emits a scripted signal sequence
/// and echoes the request back as its result. Used by the integration
/// tests and as the wired-in stand-in until a real pipeline backend is
/// attached.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPipeline {
    signals: Vec<ScriptedSignal>,
    fail_with: Option<String>,
    fail_cleanup: bool,
    cleanup_calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[derive(Debug, Clone)]
enum ScriptedSignal {
    Progress(String, u8),
    State(Value),
}

impl ScriptedPipeline {
    /// The default script: one progress update, then success.
    pub fn echo() -> Self {
        Self::default().with_progress("stubbed", 10)
    }

    pub fn with_progress(mut self, message: &str, percent: u8) -> Self {
        self.signals
            .push(ScriptedSignal::Progress(message.into(), percent));
        self
    }

    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.signals.push(ScriptedSignal::State(snapshot));
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn with_failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    /// How many times `cleanup` has been invoked.
    pub fn cleanup_count(&self) -> usize {
        self.cleanup_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl ReasoningPipeline for ScriptedPipeline {
    fn execute(&self, request: &PipelineRequest, emit: EmitFn<'_>) -> anyhow::Result<Value> {
        for signal in &self.signals {
            match signal {
                ScriptedSignal::Progress(message, percent) => emit(PipelineSignal::Progress {
                    message: message.clone(),
                    percent: *percent,
                }),
                ScriptedSignal::State(snapshot) => emit(PipelineSignal::State {
                    snapshot: snapshot.clone(),
                }),
            }
        }

        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }

        Ok(json!({
            "ticker": request.ticker,
            "trade_date": request.trade_date,
            "memory_namespace": request.memory_namespace,
        }))
    }

    fn cleanup(&self, namespace: &str) -> anyhow::Result<()> {
        self.cleanup_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_cleanup {
            anyhow::bail!("cleanup rejected for namespace {namespace}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn request_overrides_win_over_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_debate_rounds": 1, "from_file": true }}"#).unwrap();

        let mut overrides = Map::new();
        overrides.insert("max_debate_rounds".into(), json!(3));

        let merged = merge_config_overrides(Some(file.path()), Some(&overrides)).unwrap();
        assert_eq!(merged["max_debate_rounds"], 3);
        assert_eq!(merged["from_file"], true);
    }

    #[test]
    fn non_object_config_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2, 3]").unwrap();
        assert!(merge_config_overrides(Some(file.path()), None).is_err());
    }

    #[test]
    fn metadata_injection_preserves_caller_entries() {
        let mut config = Map::new();
        config.insert(
            "metadata".into(),
            json!({ "source": "backtest", "run_id": "caller-chosen" }),
        );

        inject_run_metadata(&mut config, "abc123", "run_abc123");

        let metadata = config["metadata"].as_object().unwrap();
        assert_eq!(metadata["source"], "backtest");
        // Caller-supplied run_id survives; the namespace is always ours.
        assert_eq!(metadata["run_id"], "caller-chosen");
        assert_eq!(metadata["memory_namespace"], "run_abc123");
        assert_eq!(config["memory_namespace"], "run_abc123");
    }

    #[test]
    fn scripted_pipeline_replays_signals() {
        let pipeline = ScriptedPipeline::echo().with_snapshot(json!({ "market_report": "up" }));
        let request = PipelineRequest {
            ticker: "NVDA".into(),
            trade_date: "2024-01-01".into(),
            memory_namespace: "run_test".into(),
            config: Map::new(),
            provider: None,
        };

        let seen = std::sync::Mutex::new(Vec::new());
        let result = pipeline
            .execute(&request, &|signal| {
                seen.lock().unwrap().push(format!("{signal:?}"));
            })
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(result["ticker"], "NVDA");
        assert!(pipeline.cleanup("run_test").is_ok());
    }
}
