use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, RunError};
use crate::events::RunEvent;
use crate::providers::ProviderTag;

/// Lifecycle of a run. Transitions only move forward:
/// `Queued -> Running -> {Success, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub const fn can_advance_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical in-memory state for one run. The event log lives on the
/// run's bus; domain fields here are mutated only by the owning
/// executor through the registry.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: Uuid,
    pub ticker: String,
    pub trade_date: String,
    status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(ticker: impl Into<String>, trade_date: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.into(),
            trade_date: trade_date.into(),
            status: RunStatus::Queued,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Advance the status, refusing regressions and transitions out of
    /// a terminal state. Returns whether the transition was applied.
    pub fn advance(&mut self, next: RunStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Wire representation returned by status and list queries.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub ticker: String,
    pub trade_date: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<RunEvent>,
}

impl RunSummary {
    pub fn from_record(record: &RunRecord, events: Vec<RunEvent>) -> Self {
        Self {
            id: record.id,
            ticker: record.ticker.clone(),
            trade_date: record.trade_date.clone(),
            status: record.status(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            result: record.result.clone(),
            error: record.error.clone(),
            events,
        }
    }
}

/// Submission payload for a new run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSubmission {
    pub ticker: String,
    pub trade_date: String,
    #[serde(default)]
    pub config: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub result_path: Option<PathBuf>,
}

impl RunSubmission {
    /// Validate the payload before any run state is created.
    pub fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            return Err(RunError::InvalidRequest("ticker must not be empty".into()));
        }
        let date_len = self.trade_date.len();
        if !(8..=32).contains(&date_len) {
            return Err(RunError::InvalidRequest(
                "trade_date must be between 8 and 32 characters".into(),
            ));
        }
        if let Some(config) = &self.config {
            if let Some(provider) = config.get("llm_provider").and_then(Value::as_str) {
                provider.parse::<ProviderTag>().map_err(|_| {
                    RunError::InvalidRequest(format!("unsupported LLM provider: {provider}"))
                })?;
            }
        }
        Ok(())
    }
}
