//! Dangling-call repair: answer tool requests that never received a result.
//!
//! A request loses its result when the user cancels mid-turn, when the
//! frontend crashes, or when an earlier trim kept the assistant message but
//! cut the result. The model API refuses such a history, so each unanswered
//! request gets a synthetic result carrying [`CANCELLED_RESULT`].
//!
//! Expects input that already passed
//! [`resolve_orphans_and_duplicates`](super::repair::resolve_orphans_and_duplicates):
//! no call id declared twice and every result adjacent to its request.

use crate::Message;
use std::collections::HashSet;
use tracing::debug;

/// Content of a synthesized tool result.
pub const CANCELLED_RESULT: &str = "[cancelled — no result available]";

/// Statistics from one repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DanglingStats {
    /// Number of synthetic tool results inserted.
    pub synthesized: usize,
}

/// Insert a placeholder result for every assistant tool call that has no
/// result in the run of tool results directly following it.
///
/// Synthetic results are appended after any real results in that run, so
/// the assistant and all of its results stay adjacent.
pub fn repair_dangling_calls(messages: &[Message]) -> (Vec<Message>, DanglingStats) {
    let mut stats = DanglingStats::default();
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut satisfied: HashSet<&str> = HashSet::new();

    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        out.push(msg.clone());
        i += 1;

        if !matches!(msg, Message::Assistant { .. }) {
            if let Message::ToolResult { tool_call_id, .. } = msg {
                satisfied.insert(tool_call_id.as_str());
            }
            continue;
        }

        while let Some(next) = messages.get(i) {
            let Message::ToolResult { tool_call_id, .. } = next else {
                break;
            };
            satisfied.insert(tool_call_id.as_str());
            out.push(next.clone());
            i += 1;
        }

        for call in msg.tool_calls() {
            if satisfied.insert(call.id.as_str()) {
                debug!(id = %call.id, tool = %call.name, "synthesizing result for dangling call");
                out.push(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    CANCELLED_RESULT,
                ));
                stats.synthesized += 1;
            }
        }
    }

    (out, stats)
}
