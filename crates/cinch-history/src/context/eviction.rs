//! Tool result clearing: replace old tool results with a fixed placeholder.
//!
//! Tool results are the single largest context consumer in any agent loop.
//! A `read_file` can inject 30KB; a `grep` can return hundreds of lines.
//! Most of this is irrelevant after the model has processed it. Clearing
//! swaps old result content for a one-line placeholder without any LLM call.
//! The call id and tool name stay intact, so request/result pairing survives.

use super::dangling::CANCELLED_RESULT;
use crate::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Prefix used for cleared tool result placeholders.
///
/// Both the placeholder writer and the "already cleared?" check reference
/// this constant so they can't drift out of sync.
pub const EVICTED_PREFIX: &str = "[Cleared:";

/// Default placeholder for cleared results.
pub const DEFAULT_CLEARED_PLACEHOLDER: &str = "[Cleared: tool result removed to save context]";

/// Configuration for tool result clearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearingConfig {
    /// Most recent results per tool name left untouched.
    pub keep_count: usize,
    /// Tools whose results are never cleared (the agent depends on them).
    pub exclude_tools: HashSet<String>,
    /// Also blank the arguments of tool calls whose result was cleared.
    pub clear_tool_inputs: bool,
    /// Replacement content.
    pub placeholder: String,
}

impl Default for ClearingConfig {
    fn default() -> Self {
        Self {
            keep_count: 5,
            exclude_tools: HashSet::new(),
            clear_tool_inputs: false,
            placeholder: DEFAULT_CLEARED_PLACEHOLDER.to_string(),
        }
    }
}

impl ClearingConfig {
    /// Create a new clearing config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protected tool name (its results will never be cleared).
    pub fn protect_tool(mut self, name: impl Into<String>) -> Self {
        self.exclude_tools.insert(name.into());
        self
    }

    pub fn with_keep_count(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }

    pub fn with_clear_tool_inputs(mut self, clear: bool) -> Self {
        self.clear_tool_inputs = clear;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    fn is_cleared(&self, content: &str) -> bool {
        content == self.placeholder || content.starts_with(EVICTED_PREFIX)
    }
}

/// Statistics from one clearing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearingStats {
    /// Tool results replaced with the placeholder.
    pub cleared: usize,
    /// Tool-call argument payloads blanked.
    pub inputs_cleared: usize,
    /// Characters removed.
    pub freed_chars: usize,
}

/// Replace tool results older than the keep window with the placeholder.
pub fn clear_tool_results(
    messages: &[Message],
    config: &ClearingConfig,
) -> (Vec<Message>, ClearingStats) {
    let mut stats = ClearingStats::default();
    let keep = super::compression::recent_result_indices(messages, config.keep_count);
    let mut cleared_ids: HashSet<&str> = HashSet::new();

    let mut out: Vec<Message> = messages
        .iter()
        .enumerate()
        .map(|(idx, msg)| {
            let Message::ToolResult {
                tool_call_id,
                name,
                content,
            } = msg
            else {
                return msg.clone();
            };
            if keep.contains(&idx)
                || config.exclude_tools.contains(name)
                || content == CANCELLED_RESULT
            {
                return msg.clone();
            }
            cleared_ids.insert(tool_call_id.as_str());
            if config.is_cleared(content) {
                return msg.clone();
            }

            debug!(id = %tool_call_id, tool = %name, chars = content.len(), "cleared tool result");
            stats.cleared += 1;
            stats.freed_chars += content.len().saturating_sub(config.placeholder.len());
            Message::ToolResult {
                tool_call_id: tool_call_id.clone(),
                name: name.clone(),
                content: config.placeholder.clone(),
            }
        })
        .collect();

    if config.clear_tool_inputs && !cleared_ids.is_empty() {
        for msg in &mut out {
            if let Message::Assistant { tool_calls, .. } = msg {
                for call in tool_calls.iter_mut() {
                    if cleared_ids.contains(call.id.as_str()) && !is_blank_args(&call.args) {
                        stats.freed_chars += call.args.to_string().len().saturating_sub(2);
                        call.args = serde_json::Value::Object(serde_json::Map::new());
                        stats.inputs_cleared += 1;
                    }
                }
            }
        }
    }

    (out, stats)
}

fn is_blank_args(args: &serde_json::Value) -> bool {
    match args {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
