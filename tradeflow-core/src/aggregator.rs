//! Converts overlapping pipeline snapshots into deduplicated deltas.
//!
//! The pipeline re-sends full or partial state far more often than the
//! content changes: message lists arrive in full on every agent step,
//! and steps that touch one field re-send the rest unchanged. The
//! aggregator compares each tracked field's normalized value against
//! the last value it emitted and produces a [`StateDelta`] only for
//! real changes.

use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::events::{MessageDelta, ReportSection, StateDelta, ToolInvocation};
use crate::normalize::{normalize_field, stringify_content};

/// Per-run aggregation state. Created with the executor and discarded
/// when the run terminates.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    last_message_signature: Option<(String, String)>,
    last_reports: HashMap<ReportSection, String>,
    last_investment_digest: Option<String>,
    last_risk_digest: Option<String>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one snapshot into the aggregation state. Returns a delta
    /// containing every field whose effective value changed, or `None`
    /// when the snapshot carries no new information.
    pub fn apply(&mut self, snapshot: &Value) -> Option<StateDelta> {
        let mut delta = StateDelta::default();

        delta.message = self.extract_message(snapshot);

        for section in ReportSection::ALL {
            let normalized = normalize_field(snapshot.get(section.snapshot_key()));
            if normalized.is_empty() {
                continue;
            }
            if self.last_reports.get(&section) == Some(&normalized) {
                continue;
            }
            self.last_reports.insert(section, normalized.clone());
            delta.reports.insert(section, normalized);
        }

        delta.investment_debate = Self::changed_block(
            snapshot.get("investment_debate_state"),
            &mut self.last_investment_digest,
        );
        delta.risk_debate = Self::changed_block(
            snapshot.get("risk_debate_state"),
            &mut self.last_risk_digest,
        );

        if delta.is_empty() { None } else { Some(delta) }
    }

    fn extract_message(&mut self, snapshot: &Value) -> Option<MessageDelta> {
        let message = snapshot
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.last())?;

        let role = message
            .get("role")
            .or_else(|| message.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("assistant")
            .to_string();
        let content = normalize_field(message.get("content"));

        let signature = (role.clone(), content.clone());
        if self.last_message_signature.as_ref() == Some(&signature) {
            return None;
        }
        self.last_message_signature = Some(signature);

        let agent = message
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let name = call.get("name").and_then(Value::as_str)?;
                        Some(ToolInvocation {
                            name: name.to_string(),
                            args: call.get("args").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(MessageDelta {
            role,
            content,
            agent,
            tool_calls,
        })
    }

    /// Digest comparison for a debate-state block. The blocks are
    /// small structured records, so a content fingerprint over the
    /// normalized rendering beats a field-level diff.
    fn changed_block(block: Option<&Value>, last_digest: &mut Option<String>) -> Option<Value> {
        let block = block?;
        let normalized = stringify_content(block);
        if normalized.trim().is_empty() {
            return None;
        }

        let digest = format!("{:x}", Sha256::digest(normalized.as_bytes()));
        if last_digest.as_ref() == Some(&digest) {
            return None;
        }
        *last_digest = Some(digest);
        Some(block.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_snapshots_emit_once() {
        let mut aggregator = StreamAggregator::new();
        let snapshot = json!({
            "messages": [{ "role": "assistant", "content": "Buy" }],
            "market_report": "bullish",
        });

        let first = aggregator.apply(&snapshot).expect("first snapshot emits");
        assert_eq!(first.message.as_ref().unwrap().content, "Buy");
        assert_eq!(
            first.reports.get(&ReportSection::Market).map(String::as_str),
            Some("bullish")
        );

        assert!(aggregator.apply(&snapshot).is_none());
    }

    #[test]
    fn duplicate_message_across_snapshot_windows() {
        let mut aggregator = StreamAggregator::new();
        let first = json!({
            "messages": [{ "role": "assistant", "content": "Buy" }],
        });
        let second = json!({
            "messages": [
                { "role": "user", "content": "decide" },
                { "role": "assistant", "content": "Buy" },
            ],
        });

        assert!(aggregator.apply(&first).is_some());
        // The growing list re-sends the same tail message.
        assert!(aggregator.apply(&second).is_none());
    }

    #[test]
    fn only_changed_sections_appear_in_delta() {
        let mut aggregator = StreamAggregator::new();
        aggregator.apply(&json!({
            "market_report": "flat",
            "news_report": "quiet",
        }));

        let delta = aggregator
            .apply(&json!({
                "market_report": "breakout",
                "news_report": "quiet",
            }))
            .expect("market changed");
        assert_eq!(delta.reports.len(), 1);
        assert!(delta.reports.contains_key(&ReportSection::Market));
        assert!(!delta.reports.contains_key(&ReportSection::News));
    }

    #[test]
    fn structured_message_content_normalizes_before_comparison() {
        let mut aggregator = StreamAggregator::new();
        let structured = json!({
            "messages": [{
                "role": "assistant",
                "content": [{ "type": "text", "text": "Buy" }],
            }],
        });
        let flat = json!({
            "messages": [{ "role": "assistant", "content": "Buy" }],
        });

        assert!(aggregator.apply(&structured).is_some());
        // Same effective value once normalized.
        assert!(aggregator.apply(&flat).is_none());
    }

    #[test]
    fn debate_blocks_dedup_by_digest() {
        let mut aggregator = StreamAggregator::new();
        let snapshot = json!({
            "investment_debate_state": {
                "bull_history": "growth thesis",
                "bear_history": "",
            },
        });

        let delta = aggregator.apply(&snapshot).expect("new debate content");
        assert!(delta.investment_debate.is_some());
        assert!(delta.risk_debate.is_none());

        assert!(aggregator.apply(&snapshot).is_none());

        let updated = json!({
            "investment_debate_state": {
                "bull_history": "growth thesis",
                "bear_history": "margin compression",
            },
        });
        let delta = aggregator.apply(&updated).expect("debate advanced");
        assert!(delta.investment_debate.is_some());
    }

    #[test]
    fn tool_calls_are_carried_on_new_messages() {
        let mut aggregator = StreamAggregator::new();
        let snapshot = json!({
            "messages": [{
                "role": "assistant",
                "content": "",
                "name": "market_analyst",
                "tool_calls": [
                    { "name": "get_stock_data", "args": { "symbol": "NVDA" } },
                ],
            }],
        });

        let delta = aggregator.apply(&snapshot).expect("message emits");
        let message = delta.message.unwrap();
        assert_eq!(message.agent.as_deref(), Some("market_analyst"));
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "get_stock_data");
    }

    #[test]
    fn malformed_fields_degrade_to_text() {
        let mut aggregator = StreamAggregator::new();
        // A report section arriving as a number is treated as its
        // string form rather than an error.
        let delta = aggregator
            .apply(&json!({ "market_report": 7 }))
            .expect("numeric section still emits");
        assert_eq!(
            delta.reports.get(&ReportSection::Market).map(String::as_str),
            Some("7")
        );
        assert!(aggregator.apply(&json!({ "market_report": 7 })).is_none());
    }
}
