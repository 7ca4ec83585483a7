//! Incremental summarization of the oldest conversation span.
//!
//! When the non-system history grows past a token trigger, the oldest
//! messages are rendered as a flat transcript and handed to a
//! [`SummaryModel`]. The result replaces them as a single `System` message
//! marked with [`SUMMARY_PREFIX`]. A summary left by an earlier run is fed
//! back to the model as an existing summary and replaced, so summaries never
//! pile up across turns.
//!
//! Summarization is strictly best-effort: a model failure degrades to plain
//! truncation of the summarized span and is never propagated.

use super::budget::{TokenCounter, estimate_tokens};
use crate::{Message, truncate_on_char_boundary};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Marker at the start of every summary `System` message.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]\n";

/// Fixed instruction sent alongside the transcript.
pub const SUMMARIZATION_PROMPT: &str = "\
Summarize the following conversation between a user, an AI assistant, and the tools it called. \
The summary replaces these messages in the assistant's context. Preserve:
- Decisions made and the reasons given
- Current state: files, identifiers, values, and results the assistant relies on
- Pending actions and what remains to be done
- Failed approaches and why they failed

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve file paths, function names, and error messages verbatim.
- If there is an existing summary, merge the new information into it. The result \
  must be a standalone summary that replaces the existing one entirely.";

/// Tool results longer than this are cut in the transcript.
const TRANSCRIPT_RESULT_MAX_CHARS: usize = 4_000;

/// Boxed future returned by [`SummaryModel::summarize`].
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// External model that condenses a transcript into a summary.
///
/// One attempt per call; the caller handles failure.
pub trait SummaryModel: Send + Sync {
    fn summarize<'a>(&'a self, instructions: &'a str, transcript: &'a str) -> SummaryFuture<'a>;
}

/// Configuration for the summarization stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    /// Estimated non-system tokens above which summarization runs.
    pub trigger_tokens: usize,
    /// Most recent non-system messages kept verbatim.
    pub keep_messages: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            trigger_tokens: 60_000,
            keep_messages: 20,
        }
    }
}

impl SummarizationConfig {
    pub fn with_trigger_tokens(mut self, trigger_tokens: usize) -> Self {
        self.trigger_tokens = trigger_tokens;
        self
    }

    pub fn with_keep_messages(mut self, keep_messages: usize) -> Self {
        self.keep_messages = keep_messages;
        self
    }
}

/// What the summarization stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Below the trigger, or nothing old enough to summarize.
    NotNeeded,
    /// Over the trigger, but no model was configured.
    NoModel,
    /// The oldest `summarized` messages were replaced by a summary.
    Summarized {
        summarized: usize,
        kept: usize,
        summary_chars: usize,
    },
    /// The model call failed; the oldest `dropped` messages were discarded.
    Failed { error: String, dropped: usize },
}

/// Summarize the oldest span of `messages` if the history exceeds the trigger.
pub async fn summarize_if_needed(
    messages: &[Message],
    config: &SummarizationConfig,
    model: Option<&dyn SummaryModel>,
    counter: Option<&dyn TokenCounter>,
) -> (Vec<Message>, SummaryOutcome) {
    let (systems, rest): (Vec<Message>, Vec<Message>) =
        messages.iter().cloned().partition(Message::is_system);

    let tokens = estimate_tokens(&rest, counter);
    if tokens <= config.trigger_tokens || rest.len() <= config.keep_messages {
        return (messages.to_vec(), SummaryOutcome::NotNeeded);
    }
    let Some(model) = model else {
        debug!(tokens, "summarization triggered but no model configured");
        return (messages.to_vec(), SummaryOutcome::NoModel);
    };

    // Never open the kept tail on a tool result: pull its assistant along.
    let mut split = rest.len() - config.keep_messages;
    while split > 0 && rest.get(split).is_some_and(Message::is_tool_result) {
        split -= 1;
    }
    if split == 0 {
        return (messages.to_vec(), SummaryOutcome::NotNeeded);
    }

    let (instructions, previous): (Vec<Message>, Vec<Message>) =
        systems.into_iter().partition(|m| !is_summary(m));
    let transcript = build_transcript(&previous, &rest[..split]);
    debug!(
        tokens,
        summarizing = split,
        keeping = rest.len() - split,
        transcript_chars = transcript.len(),
        "summarizing oldest messages"
    );

    let result = match model.summarize(SUMMARIZATION_PROMPT, &transcript).await {
        Ok(summary) if summary.trim().is_empty() => Err("model returned an empty summary".into()),
        other => other,
    };

    match result {
        Ok(summary) => {
            let summary = summary.trim();
            let mut out = instructions;
            out.push(Message::system(format!("{SUMMARY_PREFIX}{summary}")));
            out.extend_from_slice(&rest[split..]);
            let outcome = SummaryOutcome::Summarized {
                summarized: split,
                kept: rest.len() - split,
                summary_chars: summary.len(),
            };
            (out, outcome)
        }
        Err(error) => {
            warn!(%error, dropped = split, "summarization failed, truncating instead");
            let mut out = instructions;
            out.extend(previous);
            out.extend_from_slice(&rest[split..]);
            (
                out,
                SummaryOutcome::Failed {
                    error,
                    dropped: split,
                },
            )
        }
    }
}

/// Whether a message is a summary written by this stage.
pub fn is_summary(msg: &Message) -> bool {
    matches!(msg, Message::System { text } if text.starts_with(SUMMARY_PREFIX))
}

/// Render earlier summaries and a message span as the model's user prompt.
pub fn build_transcript(previous: &[Message], span: &[Message]) -> String {
    let mut content = String::new();

    if !previous.is_empty() {
        content.push_str("=== EXISTING SUMMARY ===\n");
        for msg in previous {
            let text = msg.text();
            content.push_str(text.strip_prefix(SUMMARY_PREFIX).unwrap_or(&text));
            content.push('\n');
        }
        content.push_str("\n=== NEW MESSAGES TO SUMMARIZE ===\n");
    }

    for msg in span {
        match msg {
            Message::ToolResult { name, content: result, .. } => {
                let shown = truncate_on_char_boundary(result, TRANSCRIPT_RESULT_MAX_CHARS);
                content.push_str(&format!("[tool {name}]: {shown}"));
                if shown.len() < result.len() {
                    content.push_str(&format!(" ... ({} chars total)", result.len()));
                }
                content.push_str("\n\n");
            }
            _ => {
                let text = msg.text();
                let kind = msg.kind();
                if !text.trim().is_empty() {
                    content.push_str(&format!("[{kind}]: {text}\n"));
                }
                for call in msg.tool_calls() {
                    content.push_str(&format!("[{kind} called {}]: {}\n", call.name, call.args));
                }
                content.push('\n');
            }
        }
    }

    content
}
