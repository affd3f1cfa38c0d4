//! Provider capability lookup.
//!
//! Model-provider differences (which reasoning parameter a backend
//! accepts, how effort labels map, what the defaults are) are
//! configuration, not executor logic. They resolve once at run setup
//! into a [`ProviderProfile`] that rides along on the pipeline
//! request.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::{Result, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    OpenAi,
    Anthropic,
    Google,
    Ollama,
    OpenRouter,
}

impl ProviderTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Only the OpenRouter backend takes an explicit reasoning
    /// payload; the rest configure thinking through the model id.
    pub const fn reasoning_param(self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("reasoning"),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProviderError(String);

impl fmt::Display for UnknownProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported LLM provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProviderError {}

impl FromStr for ProviderTag {
    type Err = UnknownProviderError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" => Ok(Self::Google),
            "ollama" => Ok(Self::Ollama),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(UnknownProviderError(other.to_string())),
        }
    }
}

const EFFORT_ALIASES: &[(&str, &str)] = &[
    ("minimal", "minimal"),
    ("min", "minimal"),
    ("low", "low"),
    ("lite", "low"),
    ("short", "low"),
    ("quick", "low"),
    ("medium", "medium"),
    ("balanced", "medium"),
    ("default", "medium"),
    ("standard", "medium"),
    ("high", "high"),
    ("deep", "high"),
    ("extended", "high"),
    ("max", "high"),
];

/// Canonical effort level for a user-supplied label. Unknown labels
/// fall back to `medium`.
pub fn canonical_effort(label: &str) -> &'static str {
    let lowered = label.trim().to_ascii_lowercase();
    EFFORT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| *canonical)
        .unwrap_or("medium")
}

/// Token budget defaults for models that take explicit budgets
/// instead of effort labels.
fn token_budget(effort: &str) -> u64 {
    match effort {
        "minimal" | "low" => 256,
        "high" => 1200,
        _ => 800,
    }
}

fn model_prefers_token_budget(model_id: &str) -> bool {
    model_id.to_ascii_lowercase().starts_with("anthropic/")
}

/// Build the reasoning payload for one model: `{"effort": ...}` for
/// label-driven backends, `{"max_tokens": ...}` where the model wants
/// an explicit budget or the caller supplied a numeric effort.
pub fn reasoning_payload(model_id: &str, effort: Option<&Value>) -> Value {
    let (effort_label, tokens_override) = match effort {
        None | Some(Value::Null) => ("medium", None),
        Some(Value::Number(number)) => {
            let tokens = number.as_u64().unwrap_or(1).max(1);
            ("medium", Some(tokens))
        }
        Some(Value::String(text)) if text.trim().is_empty() => ("medium", None),
        Some(Value::String(text)) => match text.trim().parse::<u64>() {
            Ok(tokens) => ("medium", Some(tokens.max(1))),
            Err(_) => (canonical_effort(text), None),
        },
        Some(_) => ("medium", None),
    };

    if model_prefers_token_budget(model_id) {
        let tokens = tokens_override.unwrap_or_else(|| token_budget(effort_label));
        return json!({ "max_tokens": tokens });
    }
    if let Some(tokens) = tokens_override {
        return json!({ "max_tokens": tokens });
    }
    json!({ "effort": effort_label })
}

/// Provider settings resolved once at run setup.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderProfile {
    pub tag: ProviderTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_reasoning: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_reasoning: Option<Value>,
}

/// Resolve the provider profile from merged config overrides. Absent
/// provider config resolves to `None`; an unknown tag is an invalid
/// request, surfaced before the run starts.
pub fn resolve_profile(config: &Map<String, Value>) -> Result<Option<ProviderProfile>> {
    let Some(provider) = config.get("llm_provider").and_then(Value::as_str) else {
        return Ok(None);
    };
    let tag = provider
        .parse::<ProviderTag>()
        .map_err(|err| RunError::InvalidRequest(err.to_string()))?;

    if tag.reasoning_param().is_none() {
        return Ok(Some(ProviderProfile {
            tag,
            deep_reasoning: None,
            quick_reasoning: None,
        }));
    }

    let shared_effort = config.get("thinking_effort");
    let deep_effort = config.get("thinking_effort_deep").or(shared_effort);
    let quick_effort = config.get("thinking_effort_quick").or(shared_effort);
    let deep_model = config
        .get("deep_think_llm")
        .and_then(Value::as_str)
        .unwrap_or("");
    let quick_model = config
        .get("quick_think_llm")
        .and_then(Value::as_str)
        .unwrap_or("");

    Ok(Some(ProviderProfile {
        tag,
        deep_reasoning: Some(reasoning_payload(deep_model, deep_effort)),
        quick_reasoning: Some(reasoning_payload(quick_model, quick_effort)),
    }))
}
