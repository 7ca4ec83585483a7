//! Orphan and duplicate resolution.
//!
//! The model API rejects a request outright if a tool result has no matching
//! request, if a request is answered twice, or if two assistant turns declare
//! the same call id. The external frontend produces all three: it re-sends
//! assistant turns (duplicate echoes), it delivers results after a trim has
//! removed their request, and it occasionally replays results.
//!
//! [`resolve_orphans_and_duplicates`] rebuilds the sequence in one forward pass
//! so that every tool result is adjacent to the assistant that requested it,
//! each call id is answered at most once, and no call id is declared by two
//! assistant messages. System and human messages pass through untouched.

use crate::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// What to do with an assistant tool request that has no result anywhere in
/// the sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingPolicy {
    /// Keep the request; the dangling-call repairer answers it with a
    /// placeholder result.
    #[default]
    Synthesize,
    /// Strip the request from the assistant message. An assistant left with
    /// no text and no calls is dropped.
    Strip,
}

/// Statistics from one resolver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairStats {
    /// Assistant messages dropped because every call id was already emitted.
    pub duplicate_echoes_removed: usize,
    /// Individual call ids stripped because an earlier assistant declared them.
    pub echoed_calls_stripped: usize,
    /// Unresolved call ids stripped under [`DanglingPolicy::Strip`].
    pub unresolved_calls_stripped: usize,
    /// Unresolved call ids kept under [`DanglingPolicy::Synthesize`].
    pub unresolved_calls_kept: usize,
    /// Assistant messages dropped for having neither text nor calls.
    pub empty_assistants_removed: usize,
    /// Tool results whose id no emitted assistant declared.
    pub orphaned_results_removed: usize,
    /// Tool results whose requesting assistant is not the nearest preceding
    /// non-result message.
    pub misplaced_results_removed: usize,
    /// Tool results for an id that already has one.
    pub duplicate_results_removed: usize,
}

impl RepairStats {
    /// Number of messages removed from the sequence.
    pub fn messages_removed(&self) -> usize {
        self.duplicate_echoes_removed
            + self.empty_assistants_removed
            + self.orphaned_results_removed
            + self.misplaced_results_removed
            + self.duplicate_results_removed
    }

    /// Whether the run changed anything.
    pub fn is_clean(&self) -> bool {
        self.messages_removed() == 0
            && self.echoed_calls_stripped == 0
            && self.unresolved_calls_stripped == 0
    }
}

/// Drop orphaned and duplicate tool results, collapse duplicate assistant
/// echoes, and remove assistant messages left with nothing to say.
///
/// Ties between duplicate declarations of the same call id go to the first
/// occurrence.
pub fn resolve_orphans_and_duplicates(
    messages: &[Message],
    policy: DanglingPolicy,
) -> (Vec<Message>, RepairStats) {
    let mut stats = RepairStats::default();

    let answered: HashSet<&str> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut emitted_calls: HashSet<String> = HashSet::new();
    let mut satisfied: HashSet<String> = HashSet::new();
    // Call ids of the assistant heading the current run of tool results.
    // `None` once a system or human message intervenes.
    let mut open_group: Option<HashSet<String>> = None;

    for msg in messages {
        match msg {
            Message::System { .. } | Message::Human { .. } => {
                out.push(msg.clone());
                open_group = None;
            }
            Message::Assistant { .. } => {
                let ids = msg.tool_call_ids();
                if !ids.is_empty() && ids.iter().all(|id| emitted_calls.contains(*id)) {
                    debug!(ids = ?ids, "dropping duplicate assistant echo");
                    stats.duplicate_echoes_removed += 1;
                    continue;
                }

                let mut remove: HashSet<String> = HashSet::new();
                let mut unresolved: Vec<&str> = Vec::new();
                for id in &ids {
                    if emitted_calls.contains(*id) {
                        remove.insert((*id).to_string());
                        stats.echoed_calls_stripped += 1;
                    } else if !answered.contains(id) {
                        unresolved.push(*id);
                    }
                }

                if !unresolved.is_empty() {
                    match policy {
                        DanglingPolicy::Strip => {
                            debug!(ids = ?unresolved, "stripping tool calls without results");
                            stats.unresolved_calls_stripped += unresolved.len();
                            remove.extend(unresolved.iter().map(|id| (*id).to_string()));
                        }
                        DanglingPolicy::Synthesize => {
                            debug!(ids = ?unresolved, "keeping tool calls without results");
                            stats.unresolved_calls_kept += unresolved.len();
                        }
                    }
                }

                let candidate = if remove.is_empty() {
                    msg.clone()
                } else {
                    msg.strip_tool_requests(&remove)
                };

                if !candidate.has_usable_content() {
                    stats.empty_assistants_removed += 1;
                    continue;
                }

                let kept: HashSet<String> = candidate
                    .tool_call_ids()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                emitted_calls.extend(kept.iter().cloned());
                open_group = Some(kept);
                out.push(candidate);
            }
            Message::ToolResult { tool_call_id, .. } => {
                if satisfied.contains(tool_call_id) {
                    debug!(id = %tool_call_id, "dropping duplicate tool result");
                    stats.duplicate_results_removed += 1;
                    continue;
                }
                let adjacent = open_group
                    .as_ref()
                    .is_some_and(|group| group.contains(tool_call_id));
                if !adjacent {
                    if emitted_calls.contains(tool_call_id) {
                        debug!(id = %tool_call_id, "dropping misplaced tool result");
                        stats.misplaced_results_removed += 1;
                    } else {
                        debug!(id = %tool_call_id, "dropping orphaned tool result");
                        stats.orphaned_results_removed += 1;
                    }
                    continue;
                }
                satisfied.insert(tool_call_id.clone());
                out.push(msg.clone());
            }
        }
    }

    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentBlock, ToolCall};
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "search", json!({"q": id}))
    }

    fn result(id: &str) -> Message {
        Message::tool_result(id, "search", format!("result for {id}"))
    }

    #[test]
    fn clean_sequence_passes_through() {
        let messages = vec![
            Message::system("s"),
            Message::human("go"),
            Message::assistant_tool_calls(vec![call("a1")]),
            result("a1"),
            Message::assistant_text("done"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out, messages);
        assert!(stats.is_clean());
    }

    #[test]
    fn orphaned_result_is_removed() {
        let messages = vec![
            Message::human("go"),
            result("ghost"),
            Message::assistant_text("ok"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Synthesize);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| !m.is_tool_result()));
        assert_eq!(stats.orphaned_results_removed, 1);
    }

    #[test]
    fn consecutive_duplicate_echo_collapses() {
        let messages = vec![
            Message::human("go"),
            Message::assistant_tool_calls(vec![call("b1")]),
            Message::assistant_tool_calls(vec![call("b1")]),
            result("b1"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].tool_call_ids(), vec!["b1"]);
        assert!(out[2].is_tool_result());
        assert_eq!(stats.duplicate_echoes_removed, 1);
    }

    #[test]
    fn echo_after_result_and_replayed_result_are_removed() {
        let messages = vec![
            Message::assistant_tool_calls(vec![call("b1")]),
            result("b1"),
            Message::assistant_tool_calls(vec![call("b1")]),
            result("b1"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out.len(), 2);
        assert_eq!(stats.duplicate_echoes_removed, 1);
        assert_eq!(stats.duplicate_results_removed, 1);
    }

    #[test]
    fn partial_echo_strips_overlapping_ids() {
        let messages = vec![
            Message::assistant_tool_calls(vec![call("a")]),
            result("a"),
            Message::assistant_tool_calls(vec![call("a"), call("b")]),
            result("b"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out.len(), 4);
        assert_eq!(out[2].tool_call_ids(), vec!["b"]);
        assert_eq!(stats.echoed_calls_stripped, 1);
    }

    #[test]
    fn strip_policy_removes_unresolved_calls() {
        let messages = vec![
            Message::human("go"),
            Message::assistant(
                vec![ContentBlock::Text("trying two tools".into())],
                vec![call("r"), call("u")],
            ),
            result("r"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out[1].tool_call_ids(), vec!["r"]);
        assert_eq!(out[1].text(), "trying two tools");
        assert_eq!(stats.unresolved_calls_stripped, 1);
    }

    #[test]
    fn strip_policy_keeps_text_when_nothing_resolved() {
        let messages = vec![Message::assistant(
            vec![ContentBlock::Text("let me check".into())],
            vec![call("u")],
        )];
        let (out, _) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out, vec![Message::assistant_text("let me check")]);
    }

    #[test]
    fn strip_policy_drops_assistant_with_nothing_left() {
        let messages = vec![
            Message::human("go"),
            Message::assistant_tool_calls(vec![call("u")]),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out, vec![Message::human("go")]);
        assert_eq!(stats.empty_assistants_removed, 1);
    }

    #[test]
    fn synthesize_policy_keeps_unresolved_calls() {
        let messages = vec![Message::assistant_tool_calls(vec![call("u")])];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Synthesize);
        assert_eq!(out[0].tool_call_ids(), vec!["u"]);
        assert_eq!(stats.unresolved_calls_kept, 1);
    }

    #[test]
    fn thinking_only_assistant_is_dropped() {
        let messages = vec![
            Message::human("go"),
            Message::assistant(vec![ContentBlock::Thinking("hmm".into())], vec![]),
            Message::assistant_text("answer"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Synthesize);
        assert_eq!(out.len(), 2);
        assert_eq!(stats.empty_assistants_removed, 1);
    }

    #[test]
    fn result_separated_by_human_message_is_misplaced() {
        let messages = vec![
            Message::assistant_tool_calls(vec![call("x")]),
            Message::human("interrupt"),
            result("x"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tool_call_ids(), vec!["x"]);
        assert_eq!(stats.misplaced_results_removed, 1);
    }

    #[test]
    fn result_for_other_assistant_is_misplaced() {
        let messages = vec![
            Message::assistant_tool_calls(vec![call("x")]),
            Message::assistant_tool_calls(vec![call("y")]),
            result("x"),
            result("y"),
        ];
        let (out, stats) = resolve_orphans_and_duplicates(&messages, DanglingPolicy::Strip);
        assert_eq!(stats.misplaced_results_removed, 1);
        assert_eq!(out.len(), 3);
        assert!(matches!(&out[2], Message::ToolResult { tool_call_id, .. } if tool_call_id == "y"));
    }
}
