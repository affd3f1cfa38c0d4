use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::run::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Status,
    Progress,
    State,
    Complete,
    Error,
}

impl RunEventKind {
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Status => "run.status",
            Self::Progress => "run.progress",
            Self::State => "run.state",
            Self::Complete => "run.complete",
            Self::Error => "run.error",
        }
    }

    /// Kinds that mark the end of a run's event stream.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for RunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// One immutable entry in a run's event log. Events are never mutated
/// or reordered after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: Uuid,
    pub kind: RunEventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl RunEvent {
    pub fn new(kind: RunEventKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn status(status: RunStatus) -> Self {
        Self::new(RunEventKind::Status, json!({ "state": status }))
    }

    pub fn progress(message: &str, percent: u8) -> Self {
        Self::new(
            RunEventKind::Progress,
            json!({ "message": message, "percent": percent }),
        )
    }

    pub fn state(delta: &StateDelta) -> Self {
        Self::new(
            RunEventKind::State,
            serde_json::to_value(delta).unwrap_or(Value::Null),
        )
    }

    pub fn complete(result: Value) -> Self {
        Self::new(
            RunEventKind::Complete,
            json!({ "status": RunStatus::Success, "result": result }),
        )
    }

    pub fn error(message: &str, traceback: Option<&str>) -> Self {
        let mut payload = json!({ "status": RunStatus::Failed, "message": message });
        if let (Some(trace), Some(map)) = (traceback, payload.as_object_mut()) {
            map.insert("traceback".into(), Value::String(trace.to_string()));
        }
        Self::new(RunEventKind::Error, payload)
    }
}

/// The fixed set of report sections tracked by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSection {
    Market,
    Sentiment,
    News,
    Fundamentals,
    InvestmentPlan,
    TraderPlan,
    FinalDecision,
}

impl ReportSection {
    pub const ALL: [ReportSection; 7] = [
        Self::Market,
        Self::Sentiment,
        Self::News,
        Self::Fundamentals,
        Self::InvestmentPlan,
        Self::TraderPlan,
        Self::FinalDecision,
    ];

    /// Field name used by pipeline snapshots for this section.
    pub const fn snapshot_key(self) -> &'static str {
        match self {
            Self::Market => "market_report",
            Self::Sentiment => "sentiment_report",
            Self::News => "news_report",
            Self::Fundamentals => "fundamentals_report",
            Self::InvestmentPlan => "investment_plan",
            Self::TraderPlan => "trader_investment_plan",
            Self::FinalDecision => "final_trade_decision",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Sentiment => "sentiment",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
            Self::InvestmentPlan => "investment_plan",
            Self::TraderPlan => "trader_plan",
            Self::FinalDecision => "final_decision",
        }
    }
}

/// A tool call carried on an emitted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The newest conversational message, normalized to flat text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolInvocation>,
}

/// Incremental changes extracted from one pipeline snapshot. Only
/// fields whose effective value changed since the last emission are
/// present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageDelta>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty", default)]
    pub reports: std::collections::BTreeMap<ReportSection, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investment_debate: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_debate: Option<Value>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.message.is_none()
            && self.reports.is_empty()
            && self.investment_debate.is_none()
            && self.risk_debate.is_none()
    }
}
