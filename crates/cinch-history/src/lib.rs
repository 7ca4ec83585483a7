//! Conversation-history sanitization and windowing for tool-using LLM agents.
//!
//! `cinch-history` is the engine that runs before every model invocation in a
//! multi-agent loop. The message log grows without bound (user turns, model
//! turns, tool results echoed back by an external frontend), while the model
//! API enforces a strict structural contract on what it accepts: every tool
//! request must be answered by exactly one tool result, adjacently, with no
//! duplicates and no dangling halves. Every lossy step (trimming, compression,
//! summarization) can break that contract, so the engine repairs both before
//! and after the lossy steps.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_history::prelude::*;
//!
//! let options = ProcessOptions::default()
//!     .with_fallback_message_count(30)
//!     .with_preserve_keywords(["deploy"]);
//!
//! let bounded = process(messages, &options).await;
//! ```
//!
//! Collaborators (a token counter, a summarization model, per-tool compression
//! rules) are injected through [`ProcessOptions`](pipeline::ProcessOptions);
//! observers attach to a [`Pipeline`](pipeline::Pipeline) with
//! [`with_event_handler`](pipeline::Pipeline::with_event_handler).
//!
//! # Where to find things
//!
//! - **The message model:** [`Message`], [`ToolCall`], [`ContentBlock`] and
//!   the wire format ([`WireMessage`]) are defined in this file.
//! - **Invariant repair:** [`context::repair`] (orphans, duplicate echoes,
//!   duplicate results) and [`context::dangling`] (synthetic results for
//!   requests that never got one).
//! - **Budget enforcement:** [`context::trim`] (token or message-count window
//!   with task-critical preservation), [`context::compression`] and
//!   [`context::eviction`] (shrinking old tool results), and
//!   [`context::summarizer`] (replacing the oldest prefix with a digest).
//! - **Running everything:** [`pipeline::Pipeline`] and [`pipeline::process`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | The individual passes and token estimation |
//! | [`pipeline`] | [`ProcessOptions`](pipeline::ProcessOptions), the fixed-order [`Pipeline`](pipeline::Pipeline), events |
//! | [`api`] | OpenRouter-backed summarization model |

pub mod api;
pub mod context;
pub mod pipeline;
pub mod prelude;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Message types ──────────────────────────────────────────────────

/// Discriminant of a [`Message`]. Every pass matches on this instead of
/// probing message shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    System,
    Human,
    Assistant,
    ToolResult,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::System => write!(f, "system"),
            MessageKind::Human => write!(f, "human"),
            MessageKind::Assistant => write!(f, "assistant"),
            MessageKind::ToolResult => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// A stored fragment of assistant content.
///
/// Tool requests are deliberately absent: they live only in the assistant's
/// `tool_calls` list, and are rendered from there on output.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Thinking(String),
}

/// A message in the conversation log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum Message {
    /// Instructions. Always sorted to the front and never trimmed.
    System { text: String },
    /// End-user input.
    Human { text: String },
    /// A model turn: ordered content plus the canonical list of tool requests.
    Assistant {
        blocks: Vec<ContentBlock>,
        tool_calls: Vec<ToolCall>,
    },
    /// The external outcome of one tool request.
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System { text: text.into() }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Message::Human { text: text.into() }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant {
            blocks: vec![ContentBlock::Text(text.into())],
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            blocks: Vec::new(),
            tool_calls: dedup_calls(calls),
        }
    }

    /// Build an assistant message from content blocks and tool calls.
    /// Duplicate call ids keep their first occurrence.
    pub fn assistant(blocks: Vec<ContentBlock>, calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            blocks,
            tool_calls: dedup_calls(calls),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::ToolResult {
            tool_call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::System { .. } => MessageKind::System,
            Message::Human { .. } => MessageKind::Human,
            Message::Assistant { .. } => MessageKind::Assistant,
            Message::ToolResult { .. } => MessageKind::ToolResult,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }

    /// Plain text of the message. Assistant text blocks are joined with
    /// newlines; thinking is excluded.
    pub fn text(&self) -> String {
        match self {
            Message::System { text } | Message::Human { text } => text.clone(),
            Message::Assistant { blocks, .. } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.as_str()),
                    ContentBlock::Thinking(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Message::ToolResult { content, .. } => content.clone(),
        }
    }

    /// Tool calls on an assistant message (empty for every other kind).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Ids of the tool requests on an assistant message, deduplicated in
    /// first-occurrence order.
    pub fn tool_call_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.tool_calls()
            .iter()
            .map(|c| c.id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Whether an assistant message carries anything worth sending: non-blank
    /// text or at least one tool call. Thinking-only messages do not count.
    /// Non-assistant messages are always usable.
    pub fn has_usable_content(&self) -> bool {
        match self {
            Message::Assistant { tool_calls, .. } => {
                !tool_calls.is_empty() || !self.text().trim().is_empty()
            }
            _ => true,
        }
    }

    /// Return a copy with the given tool-call ids removed.
    ///
    /// When no tool calls remain the message collapses to its text blocks.
    /// Non-assistant messages are returned unchanged.
    pub fn strip_tool_requests(&self, ids: &HashSet<String>) -> Message {
        match self {
            Message::Assistant { blocks, tool_calls } => {
                let kept: Vec<ToolCall> = tool_calls
                    .iter()
                    .filter(|c| !ids.contains(&c.id))
                    .cloned()
                    .collect();
                let blocks = if kept.is_empty() {
                    blocks
                        .iter()
                        .filter(|b| matches!(b, ContentBlock::Text(_)))
                        .cloned()
                        .collect()
                } else {
                    blocks.clone()
                };
                Message::Assistant {
                    blocks,
                    tool_calls: kept,
                }
            }
            other => other.clone(),
        }
    }

    /// Approximate character footprint, used for token estimation.
    pub fn char_len(&self) -> usize {
        match self {
            Message::System { text } | Message::Human { text } => text.len(),
            Message::Assistant { blocks, tool_calls } => {
                let block_chars: usize = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text(t) | ContentBlock::Thinking(t) => t.len(),
                    })
                    .sum();
                let call_chars: usize = tool_calls
                    .iter()
                    .map(|c| c.id.len() + c.name.len() + c.args.to_string().len())
                    .sum();
                block_chars + call_chars
            }
            Message::ToolResult { content, .. } => content.len(),
        }
    }
}

fn dedup_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}

// ── Wire format ────────────────────────────────────────────────────

/// Role of a message on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content on the wire: a plain string or a list of typed blocks.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

/// A typed content block on the wire. `tool_use` blocks are accepted on
/// input only and folded into the assistant's `tool_calls`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

/// Serialized form of a [`Message`].
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WireMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn wire_text(content: Option<WireContent>) -> String {
    match content {
        None => String::new(),
        Some(WireContent::Text(s)) => s,
        Some(WireContent::Blocks(blocks)) => blocks
            .into_iter()
            .filter_map(|b| match b {
                WireBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        match wire.role {
            MessageRole::System => Ok(Message::system(wire_text(wire.content))),
            MessageRole::User => Ok(Message::human(wire_text(wire.content))),
            MessageRole::Tool => {
                let tool_call_id = wire
                    .tool_call_id
                    .ok_or_else(|| "tool message is missing tool_call_id".to_string())?;
                Ok(Message::ToolResult {
                    tool_call_id,
                    name: wire.name.unwrap_or_default(),
                    content: wire_text(wire.content),
                })
            }
            MessageRole::Assistant => {
                // The explicit list wins over tool_use blocks with the same id.
                let mut calls = wire.tool_calls.unwrap_or_default();
                let mut blocks = Vec::new();
                match wire.content {
                    None => {}
                    Some(WireContent::Text(s)) => {
                        if !s.is_empty() {
                            blocks.push(ContentBlock::Text(s));
                        }
                    }
                    Some(WireContent::Blocks(wire_blocks)) => {
                        for block in wire_blocks {
                            match block {
                                WireBlock::Text { text } => blocks.push(ContentBlock::Text(text)),
                                WireBlock::Thinking { thinking } => {
                                    blocks.push(ContentBlock::Thinking(thinking))
                                }
                                WireBlock::ToolUse { id, name, input } => {
                                    calls.push(ToolCall::new(id, name, input))
                                }
                            }
                        }
                    }
                }
                Ok(Message::assistant(blocks, calls))
            }
        }
    }
}

impl From<Message> for WireMessage {
    fn from(msg: Message) -> Self {
        match msg {
            Message::System { text } => WireMessage {
                role: MessageRole::System,
                content: Some(WireContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::Human { text } => WireMessage {
                role: MessageRole::User,
                content: Some(WireContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::Assistant { blocks, tool_calls } => {
                let content = match blocks.as_slice() {
                    [] => None,
                    [ContentBlock::Text(t)] => Some(WireContent::Text(t.clone())),
                    _ => Some(WireContent::Blocks(
                        blocks
                            .into_iter()
                            .map(|b| match b {
                                ContentBlock::Text(text) => WireBlock::Text { text },
                                ContentBlock::Thinking(thinking) => WireBlock::Thinking { thinking },
                            })
                            .collect(),
                    )),
                };
                WireMessage {
                    role: MessageRole::Assistant,
                    content,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    name: None,
                }
            }
            Message::ToolResult {
                tool_call_id,
                name,
                content,
            } => WireMessage {
                role: MessageRole::Tool,
                content: Some(WireContent::Text(content)),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
                name: (!name.is_empty()).then_some(name),
            },
        }
    }
}

/// Truncate `s` to at most `max_bytes`, backing off to a char boundary.
pub(crate) fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or_default()
}
