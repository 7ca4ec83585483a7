//! Window trimming: bound the conversation to a token or message budget.
//!
//! System messages are always kept and moved to the front. The rest of the
//! conversation is cut from the oldest end, and the cut point is advanced
//! until it lands on a message that can start a valid history:
//!
//! - **Token path** (when a [`TokenCounter`] and `max_tokens` are supplied):
//!   keep the most recent messages that fit, starting on anything but a tool
//!   result. An assistant message with tool calls is a valid start because its
//!   results follow it.
//! - **Message-count path** (fallback): keep the last `fallback_count`
//!   messages, starting on a human message or an assistant message without
//!   tool calls.
//!
//! Task-critical messages (containing the original request or a configured
//! keyword) that fall before the cut are spliced back in, in order, together
//! with the rest of their tool group: an assistant message and the tool
//! results that immediately follow it move as one unit.
//!
//! Every cut lands on a group start, so trimming an already well-formed
//! history yields a well-formed history and trimming that again changes
//! nothing.

use super::budget::TokenCounter;
use crate::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which messages must survive trimming regardless of age.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreservationConfig {
    /// The user's original request. Any message whose text contains it is kept.
    pub original_request: Option<String>,
    /// Keywords; any message whose text contains one is kept. Case-sensitive.
    pub keywords: Vec<String>,
}

impl PreservationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_original_request(mut self, request: impl Into<String>) -> Self {
        self.original_request = Some(request.into());
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Whether `msg` must survive trimming.
    pub fn is_task_critical(&self, msg: &Message) -> bool {
        if msg.is_system() {
            return false;
        }
        let text = msg.text();
        if text.is_empty() {
            return false;
        }
        let request_match = self
            .original_request
            .as_deref()
            .map(str::trim)
            .is_some_and(|req| !req.is_empty() && text.contains(req));
        request_match
            || self
                .keywords
                .iter()
                .any(|k| !k.is_empty() && text.contains(k.as_str()))
    }
}

/// How the window was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStrategy {
    /// Token budget via the injected counter.
    Tokens,
    /// Message-count fallback with a safe boundary.
    MessageCount,
    /// No safe boundary existed; the raw tail was kept.
    RawTail,
}

impl std::fmt::Display for TrimStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrimStrategy::Tokens => write!(f, "tokens"),
            TrimStrategy::MessageCount => write!(f, "message-count"),
            TrimStrategy::RawTail => write!(f, "raw-tail"),
        }
    }
}

/// Result of a trim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimOutcome {
    pub strategy: TrimStrategy,
    /// Messages removed.
    pub dropped: usize,
    /// Messages before the cut kept because they are task-critical.
    pub preserved: usize,
}

/// Size limits for [`trim_window`].
#[derive(Debug, Clone, Copy)]
pub struct TrimLimits {
    /// Token budget for the whole request, system messages included.
    pub max_tokens: Option<usize>,
    /// Non-system messages kept by the message-count path.
    pub fallback_count: usize,
}

/// Trim `messages` to the budget. Never returns an empty sequence for
/// non-empty input.
pub fn trim_window(
    messages: &[Message],
    limits: TrimLimits,
    counter: Option<&dyn TokenCounter>,
    preservation: &PreservationConfig,
) -> (Vec<Message>, TrimOutcome) {
    let (system, rest): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.is_system());

    let token_cut = match (limits.max_tokens, counter) {
        (Some(max_tokens), Some(counter)) => {
            match token_cut(&system, &rest, max_tokens, counter) {
                Ok(cut) => Some(cut),
                Err(e) => {
                    warn!("token trimming failed ({e}); falling back to message count");
                    None
                }
            }
        }
        _ => None,
    };

    let (cut, strategy) = match token_cut {
        Some(cut) => (cut, TrimStrategy::Tokens),
        None => match count_cut(&rest, limits.fallback_count) {
            Some(cut) => (cut, TrimStrategy::MessageCount),
            None => {
                let keep = limits.fallback_count.max(1).min(rest.len());
                debug!(keep, "no safe cut point; keeping raw tail");
                (raw_tail_cut(&rest, keep), TrimStrategy::RawTail)
            }
        },
    };

    let preserved = preserved_groups(&rest[..cut], preservation);

    let mut out: Vec<Message> = Vec::with_capacity(system.len() + preserved.len() + rest.len() - cut);
    out.extend(system.iter().map(|m| (*m).clone()));
    out.extend(preserved.iter().map(|m| (*m).clone()));
    out.extend(rest[cut..].iter().map(|m| (*m).clone()));

    let outcome = TrimOutcome {
        strategy,
        dropped: cut - preserved.len(),
        preserved: preserved.len(),
    };
    (out, outcome)
}

/// Messages before the cut that must survive, in order. A tool group
/// (a non-tool-result message and the tool results right after it) is kept
/// whole when any of its messages is task-critical.
fn preserved_groups<'a>(
    head: &[&'a Message],
    preservation: &PreservationConfig,
) -> Vec<&'a Message> {
    let mut preserved = Vec::new();
    let mut start = 0;
    while start < head.len() {
        let end = group_end(head, start);
        let group = &head[start..end];
        if group.iter().any(|m| preservation.is_task_critical(m)) {
            preserved.extend(group.iter().copied());
        }
        start = end;
    }
    preserved
}

/// One past the last tool result following `rest[start]`.
fn group_end(rest: &[&Message], start: usize) -> usize {
    let mut end = start + 1;
    while end < rest.len() && rest[end].is_tool_result() {
        end += 1;
    }
    end
}

/// Start of the raw tail holding roughly the last `keep` messages. Moves
/// forward to the next group start, or back to the start of the last group
/// when the tail is a single group, so results stay with their request.
fn raw_tail_cut(rest: &[&Message], keep: usize) -> usize {
    let from = rest.len() - keep;
    if let Some(i) = (from..rest.len()).find(|&i| !rest[i].is_tool_result()) {
        return i;
    }
    (0..from)
        .rev()
        .find(|&i| !rest[i].is_tool_result())
        .unwrap_or(from)
}

/// Index into `rest` where the token-bounded window starts.
fn token_cut(
    system: &[&Message],
    rest: &[&Message],
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Result<usize, String> {
    let mut system_tokens = 0;
    for msg in system {
        system_tokens += counter.count(msg)?;
    }
    let budget = max_tokens
        .checked_sub(system_tokens)
        .ok_or_else(|| format!("system messages use {system_tokens} of {max_tokens} tokens"))?;

    let mut used = 0;
    let mut start = rest.len();
    for (i, msg) in rest.iter().enumerate().rev() {
        let tokens = counter.count(msg)?;
        if used + tokens > budget {
            break;
        }
        used += tokens;
        start = i;
    }

    if start == 0 {
        return Ok(0);
    }
    while start < rest.len() && rest[start].is_tool_result() {
        start += 1;
    }
    if start == rest.len() && !rest.is_empty() {
        return Err(format!(
            "no window starting on a safe boundary fits {budget} tokens"
        ));
    }
    Ok(start)
}

/// Index into `rest` where the message-count window starts, or `None` when
/// no safe boundary exists in the tail.
fn count_cut(rest: &[&Message], fallback_count: usize) -> Option<usize> {
    let mut cut = rest.len().saturating_sub(fallback_count);
    if cut == 0 {
        return Some(0);
    }
    while cut < rest.len() && !is_safe_start(rest[cut]) {
        cut += 1;
    }
    if cut == rest.len() && !rest.is_empty() {
        return None;
    }
    Some(cut)
}

fn is_safe_start(msg: &Message) -> bool {
    match msg {
        Message::Human { .. } => true,
        Message::Assistant { tool_calls, .. } => tool_calls.is_empty(),
        Message::System { .. } | Message::ToolResult { .. } => false,
    }
}
