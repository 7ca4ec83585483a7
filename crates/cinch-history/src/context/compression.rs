//! Tool result compression: shrink old, oversized tool results in place.
//!
//! Unlike [clearing](super::eviction), compression keeps a useful digest of
//! each result. A [`CompressionRules`] registry maps a tool name to a pure
//! `content -> summary` function; tools without a rule get a truncated head
//! with a length marker. Call ids and tool names are never touched, so pairing
//! survives.

use crate::{Message, truncate_on_char_boundary};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Prefix of every compressed result. Both the writer and the
/// "already compressed?" check use it.
pub const COMPRESSED_PREFIX: &str = "[Compressed: ";

/// A pure summarization function for one tool's output.
pub type CompressionRule = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Registry of per-tool compression rules.
#[derive(Clone, Default)]
pub struct CompressionRules {
    rules: HashMap<String, CompressionRule>,
}

impl fmt::Debug for CompressionRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CompressionRules")
            .field("tools", &names)
            .finish()
    }
}

impl CompressionRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule (builder form).
    pub fn with_rule(
        mut self,
        tool_name: impl Into<String>,
        rule: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.register(tool_name, rule);
        self
    }

    /// Register a rule, replacing any existing rule for the tool.
    pub fn register(
        &mut self,
        tool_name: impl Into<String>,
        rule: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.rules.insert(tool_name.into(), Arc::new(rule));
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.rules.contains_key(tool_name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Summarize `content` with the tool's rule, or truncate it to
    /// `max_length` bytes when no rule is registered.
    pub fn summarize(&self, tool_name: &str, content: &str, max_length: usize) -> String {
        match self.rules.get(tool_name) {
            Some(rule) => rule(content),
            None => truncate_with_marker(content, max_length),
        }
    }
}

/// Generic fallback: keep the first `max_length` bytes and note the original size.
pub fn truncate_with_marker(content: &str, max_length: usize) -> String {
    if content.len() <= max_length {
        return content.to_string();
    }
    format!(
        "{}\n... [truncated: {} chars total]",
        truncate_on_char_boundary(content, max_length),
        content.len()
    )
}

/// Rule that keeps the first `n` lines and counts the rest.
pub fn head_lines(n: usize) -> impl Fn(&str) -> String + Send + Sync + 'static {
    move |content: &str| {
        let total = content.lines().count();
        if total <= n {
            return content.to_string();
        }
        let head: Vec<&str> = content.lines().take(n).collect();
        format!("{}\n... ({} more lines)", head.join("\n"), total - n)
    }
}

/// Rule for JSON payloads: lists the top-level fields with shortened values.
/// Non-JSON content is truncated to 200 bytes.
pub fn json_outline() -> impl Fn(&str) -> String + Send + Sync + 'static {
    |content: &str| match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(obj)) => {
            let fields: Vec<String> = obj
                .iter()
                .map(|(k, v)| format!("{k}={}", shorten_value(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        Ok(serde_json::Value::Array(items)) => match items.first() {
            Some(first) => format!("[{} items; first: {}]", items.len(), shorten_value(first)),
            None => "[]".to_string(),
        },
        _ => truncate_with_marker(content, 200),
    }
}

fn shorten_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => {
            if s.len() > 40 {
                format!("\"{}...\"", truncate_on_char_boundary(s, 37))
            } else {
                format!("\"{s}\"")
            }
        }
        serde_json::Value::Array(items) => format!("[{} items]", items.len()),
        serde_json::Value::Object(obj) => format!("{{{} fields}}", obj.len()),
        other => other.to_string(),
    }
}

/// Configuration for tool result compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Most recent results per tool name left untouched.
    pub keep_count: usize,
    /// Results at or below this many bytes are never compressed.
    pub max_length: usize,
    /// Per-tool rules. Injected in code; not part of serialized config.
    #[serde(skip)]
    pub rules: CompressionRules,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            keep_count: 3,
            max_length: 2_000,
            rules: CompressionRules::default(),
        }
    }
}

impl CompressionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_count(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_rules(mut self, rules: CompressionRules) -> Self {
        self.rules = rules;
        self
    }
}

/// Statistics from one compression run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionStats {
    pub compressed: usize,
    pub freed_chars: usize,
}

/// Indices of tool results that fall inside the per-tool-name keep window:
/// the `keep_count` most recent results of each tool name.
pub(crate) fn recent_result_indices(messages: &[Message], keep_count: usize) -> HashSet<usize> {
    let mut seen_per_tool: HashMap<&str, usize> = HashMap::new();
    let mut keep = HashSet::new();
    for (idx, msg) in messages.iter().enumerate().rev() {
        if let Message::ToolResult { name, .. } = msg {
            let seen = seen_per_tool.entry(name.as_str()).or_insert(0);
            if *seen < keep_count {
                keep.insert(idx);
            }
            *seen += 1;
        }
    }
    keep
}

/// Compress tool results older than the keep window and longer than
/// `max_length`. Already-compressed or cleared results are skipped, and a
/// summary that would not save space leaves the result unchanged.
pub fn compress_tool_results(
    messages: &[Message],
    config: &CompressionConfig,
) -> (Vec<Message>, CompressionStats) {
    let mut stats = CompressionStats::default();
    let keep = recent_result_indices(messages, config.keep_count);

    let out = messages
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
                || content.len() <= config.max_length
                || content.starts_with(COMPRESSED_PREFIX)
                || content.starts_with(super::eviction::EVICTED_PREFIX)
            {
                return msg.clone();
            }

            let summary = config.rules.summarize(name, content, config.max_length);
            let compressed = format!("{COMPRESSED_PREFIX}{name}, {} chars] {summary}", content.len());
            if compressed.len() >= content.len() {
                return msg.clone();
            }

            debug!(id = %tool_call_id, tool = %name, from = content.len(), to = compressed.len(), "compressed tool result");
            stats.compressed += 1;
            stats.freed_chars += content.len() - compressed.len();
            Message::ToolResult {
                tool_call_id: tool_call_id.clone(),
                name: name.clone(),
                content: compressed,
            }
        })
        .collect();

    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use serde_json::json;

    fn pair(id: &str, tool: &str, content: &str) -> Vec<Message> {
        vec![
            Message::assistant_tool_calls(vec![ToolCall::new(id, tool, json!({}))]),
            Message::tool_result(id, tool, content),
        ]
    }

    fn content_of(msg: &Message) -> &str {
        match msg {
            Message::ToolResult { content, .. } => content,
            _ => panic!("not a tool result"),
        }
    }

    #[test]
    fn old_long_results_are_truncated_without_rule() {
        let mut messages = pair("c1", "read_file", &"a".repeat(5_000));
        messages.extend(pair("c2", "read_file", &"b".repeat(5_000)));
        let config = CompressionConfig::new().with_keep_count(1).with_max_length(100);

        let (out, stats) = compress_tool_results(&messages, &config);
        assert_eq!(stats.compressed, 1);
        assert!(content_of(&out[1]).starts_with(COMPRESSED_PREFIX));
        assert!(content_of(&out[1]).contains("[truncated: 5000 chars total]"));
        assert_eq!(content_of(&out[3]), "b".repeat(5_000));
        assert!(stats.freed_chars > 4_000);
    }

    #[test]
    fn registered_rule_is_used() {
        let messages = pair("c1", "grep", &"match\n".repeat(500));
        let rules = CompressionRules::new().with_rule("grep", head_lines(2));
        let config = CompressionConfig::new()
            .with_keep_count(0)
            .with_max_length(10)
            .with_rules(rules);

        let (out, _) = compress_tool_results(&messages, &config);
        let content = content_of(&out[1]);
        assert!(content.contains("(498 more lines)"));
        assert!(content.starts_with("[Compressed: grep, 3000 chars]"));
    }

    #[test]
    fn ids_and_names_survive() {
        let messages = pair("c1", "read_file", &"x".repeat(1_000));
        let config = CompressionConfig::new().with_keep_count(0).with_max_length(10);
        let (out, _) = compress_tool_results(&messages, &config);
        assert!(matches!(
            &out[1],
            Message::ToolResult { tool_call_id, name, .. } if tool_call_id == "c1" && name == "read_file"
        ));
        assert_eq!(out[0], messages[0]);
    }

    #[test]
    fn keep_window_is_per_tool_name() {
        let mut messages = pair("c1", "grep", &"g".repeat(1_000));
        messages.extend(pair("c2", "read_file", &"r".repeat(1_000)));
        messages.extend(pair("c3", "read_file", &"r".repeat(1_000)));
        let config = CompressionConfig::new().with_keep_count(1).with_max_length(10);

        let (out, stats) = compress_tool_results(&messages, &config);
        // grep's only result is its most recent; read_file's older one is compressed.
        assert_eq!(stats.compressed, 1);
        assert!(!content_of(&out[1]).starts_with(COMPRESSED_PREFIX));
        assert!(content_of(&out[3]).starts_with(COMPRESSED_PREFIX));
        assert!(!content_of(&out[5]).starts_with(COMPRESSED_PREFIX));
    }

    #[test]
    fn compression_is_idempotent() {
        let messages = pair("c1", "read_file", &"x".repeat(5_000));
        let config = CompressionConfig::new().with_keep_count(0).with_max_length(50);
        let (once, _) = compress_tool_results(&messages, &config);
        let (twice, stats) = compress_tool_results(&once, &config);
        assert_eq!(once, twice);
        assert_eq!(stats.compressed, 0);
    }

    #[test]
    fn expanding_rule_leaves_result_alone() {
        let messages = pair("c1", "echo", &"x".repeat(50));
        let rules = CompressionRules::new().with_rule("echo", |c: &str| c.repeat(3));
        let config = CompressionConfig::new()
            .with_keep_count(0)
            .with_max_length(10)
            .with_rules(rules);
        let (out, stats) = compress_tool_results(&messages, &config);
        assert_eq!(out, messages);
        assert_eq!(stats.compressed, 0);
    }

    #[test]
    fn json_outline_lists_fields() {
        let rule = json_outline();
        let summary = rule(r#"{"path": "src/main.rs", "lines": 120, "matches": [1, 2, 3]}"#);
        assert!(summary.contains("path=\"src/main.rs\""));
        assert!(summary.contains("lines=120"));
        assert!(summary.contains("matches=[3 items]"));
    }

    #[test]
    fn json_outline_shortens_long_strings() {
        let rule = json_outline();
        let summary = rule(&format!(r#"{{"query": "{}"}}"#, "x".repeat(100)));
        assert!(summary.contains("..."));
        assert!(summary.len() < 100);
    }

    #[test]
    fn json_outline_falls_back_for_plain_text() {
        let rule = json_outline();
        let summary = rule(&"plain ".repeat(100));
        assert!(summary.contains("[truncated: 600 chars total]"));
    }

    #[test]
    fn rules_debug_lists_tool_names() {
        let rules = CompressionRules::new()
            .with_rule("read_file", head_lines(5))
            .with_rule("grep", head_lines(5));
        let debug = format!("{rules:?}");
        assert!(debug.contains("grep"));
        assert!(debug.contains("read_file"));
        assert_eq!(rules.len(), 2);
    }
}
