//! The fixed-order history pipeline.
//!
//! ```text
//! repair → dangling → [compress] → [clear] → [summarize] → trim → repair → dangling
//! ```
//!
//! The closing repair pair always runs: trimming and summarization are the
//! stages most likely to separate a request from its result.

use super::config::ProcessOptions;
use super::events::{EventHandler, LoggingHandler, PipelineEvent, RepairPhase};
use crate::Message;
use crate::context::budget::{ContextUsage, TokenCounter};
use crate::context::compression::{CompressionStats, compress_tool_results};
use crate::context::dangling::{DanglingStats, repair_dangling_calls};
use crate::context::eviction::{ClearingStats, clear_tool_results};
use crate::context::repair::{RepairStats, resolve_orphans_and_duplicates};
use crate::context::summarizer::{SummaryOutcome, summarize_if_needed};
use crate::context::trim::{TrimOutcome, trim_window};
use tracing::{info, warn};

/// Placeholder used when nothing usable survives repair.
pub const UNAVAILABLE_PLACEHOLDER: &str = "[earlier conversation unavailable]";

/// What every stage of one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub initial_repair: RepairStats,
    pub initial_dangling: DanglingStats,
    /// `None` when compression is disabled.
    pub compression: Option<CompressionStats>,
    /// `None` when clearing is disabled.
    pub clearing: Option<ClearingStats>,
    /// `None` when summarization is disabled.
    pub summary: Option<SummaryOutcome>,
    /// `None` only for empty input.
    pub trim: Option<TrimOutcome>,
    pub final_repair: RepairStats,
    pub final_dangling: DanglingStats,
    /// Whether the empty-output fallback was used.
    pub used_fallback: bool,
}

/// A configured pipeline. Holds no state between runs, so one instance can
/// serve any number of sessions concurrently.
pub struct Pipeline {
    options: ProcessOptions,
    handler: Box<dyn EventHandler>,
}

impl Pipeline {
    /// Build a pipeline that logs through a [`LoggingHandler`] tagged with
    /// the options' `log_prefix`.
    pub fn new(options: ProcessOptions) -> Self {
        let handler = LoggingHandler::new(options.log_prefix.clone());
        Self {
            options,
            handler: Box::new(handler),
        }
    }

    /// Replace the event handler.
    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Run every stage and return the bounded, well-formed history.
    pub async fn process(&self, messages: Vec<Message>) -> Vec<Message> {
        self.process_with_report(messages).await.0
    }

    /// Like [`process`](Self::process), also returning per-stage statistics.
    pub async fn process_with_report(&self, messages: Vec<Message>) -> (Vec<Message>, ProcessReport) {
        let mut report = ProcessReport::default();
        if messages.is_empty() {
            return (messages, report);
        }

        let options = &self.options;
        let counter: Option<&dyn TokenCounter> = options.token_counter.as_deref();
        let usage = ContextUsage::measure(&messages, counter);
        self.handler.on_event(&PipelineEvent::Started { usage: &usage });

        // ── Initial repair ──
        let (current, stats) = resolve_orphans_and_duplicates(&messages, options.dangling_policy);
        self.emit_repaired(RepairPhase::Initial, &stats);
        report.initial_repair = stats;
        let (mut current, stats) = repair_dangling_calls(&current);
        self.emit_dangling(RepairPhase::Initial, &stats);
        report.initial_dangling = stats;

        // ── Verbosity reduction ──
        if let Some(config) = options.compression.active() {
            let (next, stats) = compress_tool_results(&current, config);
            self.handler.on_event(&PipelineEvent::Compressed(&stats));
            report.compression = Some(stats);
            current = next;
        }
        if let Some(config) = options.clearing.active() {
            let (next, stats) = clear_tool_results(&current, config);
            self.handler.on_event(&PipelineEvent::Cleared(&stats));
            report.clearing = Some(stats);
            current = next;
        }

        // ── Summarization ──
        if let Some(config) = options.summarization.active() {
            let model = options.summary_model.as_deref();
            let (next, outcome) = summarize_if_needed(&current, config, model, counter).await;
            self.handler.on_event(&PipelineEvent::Summarized(&outcome));
            report.summary = Some(outcome);
            current = next;
        }

        // ── Trim ──
        let (trimmed, outcome) = trim_window(
            &current,
            options.trim_limits(),
            counter,
            &options.preservation,
        );
        self.handler.on_event(&PipelineEvent::Trimmed(&outcome));
        report.trim = Some(outcome);

        // ── Final repair ──
        let (current, stats) = resolve_orphans_and_duplicates(&trimmed, options.dangling_policy);
        self.emit_repaired(RepairPhase::Final, &stats);
        report.final_repair = stats;
        let (mut current, stats) = repair_dangling_calls(&current);
        self.emit_dangling(RepairPhase::Final, &stats);
        report.final_dangling = stats;

        if current.is_empty() {
            warn!(
                prefix = %options.log_prefix,
                input = messages.len(),
                "no messages survived repair"
            );
            current.push(fallback_message(&messages));
            report.used_fallback = true;
            self.handler.on_event(&PipelineEvent::EmptyFallback);
        }

        let usage_after = ContextUsage::measure(&current, counter);
        if usage_after.message_count < usage.message_count {
            info!(
                prefix = %options.log_prefix,
                "history: {} -> {} messages (~{} -> ~{} tokens)",
                usage.message_count,
                usage_after.message_count,
                usage.estimated_tokens,
                usage_after.estimated_tokens,
            );
        }
        self.handler.on_event(&PipelineEvent::Finished {
            input_messages: messages.len(),
            usage: &usage_after,
        });

        (current, report)
    }

    fn emit_repaired(&self, phase: RepairPhase, stats: &RepairStats) {
        self.handler
            .on_event(&PipelineEvent::Repaired { phase, stats });
    }

    fn emit_dangling(&self, phase: RepairPhase, stats: &DanglingStats) {
        self.handler
            .on_event(&PipelineEvent::DanglingRepaired { phase, stats });
    }
}

/// Process `messages` with `options` using a default-logging [`Pipeline`].
pub async fn process(messages: Vec<Message>, options: &ProcessOptions) -> Vec<Message> {
    Pipeline::new(options.clone()).process(messages).await
}

/// The last message with usable text, reduced to a form that needs no
/// pairing partner. Falls back to a placeholder human message.
fn fallback_message(input: &[Message]) -> Message {
    input
        .iter()
        .rev()
        .find_map(|msg| {
            let text = msg.text();
            if text.trim().is_empty() {
                return None;
            }
            match msg {
                Message::System { .. } => Some(Message::system(text)),
                Message::Human { .. } => Some(Message::human(text)),
                Message::Assistant { .. } => Some(Message::assistant_text(text)),
                Message::ToolResult { .. } => None,
            }
        })
        .unwrap_or_else(|| Message::human(UNAVAILABLE_PLACEHOLDER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::context::summarizer::{SummaryFuture, SummaryModel, SummarizationConfig};
    use crate::pipeline::events::FnEventHandler;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "search", json!({"q": id}))
    }

    #[tokio::test]
    async fn empty_input_stays_empty() {
        let out = process(vec![], &ProcessOptions::default()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn orphans_only_falls_back_to_placeholder() {
        let messages = vec![Message::tool_result("ghost", "search", "boo")];
        let (out, report) = Pipeline::new(ProcessOptions::default())
            .process_with_report(messages)
            .await;
        assert_eq!(out, vec![Message::human(UNAVAILABLE_PLACEHOLDER)]);
        assert!(report.used_fallback);
    }

    #[test]
    fn fallback_prefers_last_text() {
        let input = vec![
            Message::human("first"),
            Message::assistant(
                vec![crate::ContentBlock::Text("thinking aloud".into())],
                vec![call("x")],
            ),
            Message::tool_result("x", "search", "result"),
        ];
        assert_eq!(
            fallback_message(&input),
            Message::assistant_text("thinking aloud")
        );
    }

    #[tokio::test]
    async fn stages_emit_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = FnEventHandler::new(move |event| {
            let name = match event {
                PipelineEvent::Started { .. } => "started".to_string(),
                PipelineEvent::Repaired { phase, .. } => format!("repaired:{phase}"),
                PipelineEvent::DanglingRepaired { phase, .. } => format!("dangling:{phase}"),
                PipelineEvent::Compressed(_) => "compressed".to_string(),
                PipelineEvent::Cleared(_) => "cleared".to_string(),
                PipelineEvent::Summarized(_) => "summarized".to_string(),
                PipelineEvent::Trimmed(_) => "trimmed".to_string(),
                PipelineEvent::EmptyFallback => "fallback".to_string(),
                PipelineEvent::Finished { .. } => "finished".to_string(),
            };
            sink.lock().unwrap().push(name);
        });

        let options = ProcessOptions::default().with_clearing(Default::default());
        Pipeline::new(options)
            .with_event_handler(handler)
            .process(vec![Message::human("hi")])
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "started",
                "repaired:initial",
                "dangling:initial",
                "compressed",
                "cleared",
                "summarized",
                "trimmed",
                "repaired:final",
                "dangling:final",
                "finished",
            ]
        );
    }

    #[tokio::test]
    async fn disabled_stages_are_skipped() {
        let options = ProcessOptions::default()
            .without_compression()
            .without_summarization();
        let (_, report) = Pipeline::new(options)
            .process_with_report(vec![Message::human("hi")])
            .await;
        assert!(report.compression.is_none());
        assert!(report.clearing.is_none());
        assert!(report.summary.is_none());
        assert!(report.trim.is_some());
    }

    struct SwallowingModel;

    impl SummaryModel for SwallowingModel {
        fn summarize<'a>(&'a self, _: &'a str, _: &'a str) -> SummaryFuture<'a> {
            Box::pin(async { Ok("searched for a1".to_string()) })
        }
    }

    #[tokio::test]
    async fn summary_that_swallows_a_request_is_repaired() {
        // The kept tail starts right after an assistant whose results were
        // pulled into it by the split; the final repair must keep pairing valid.
        let mut messages = vec![Message::system("s")];
        for i in 0..8 {
            messages.push(Message::human(format!("q{i} {}", "x".repeat(200))));
            messages.push(Message::assistant_text(format!("a{i}")));
        }
        messages.push(Message::assistant_tool_calls(vec![call("a1")]));
        messages.push(Message::tool_result("a1", "search", "r1"));
        messages.push(Message::assistant_text("done"));

        let options = ProcessOptions::default()
            .with_summary_model(SwallowingModel)
            .with_summarization(
                SummarizationConfig::default()
                    .with_trigger_tokens(100)
                    .with_keep_messages(2),
            );
        let (out, report) = Pipeline::new(options).process_with_report(messages).await;

        assert!(matches!(
            report.summary,
            Some(SummaryOutcome::Summarized { .. })
        ));
        assert_eq!(out[0], Message::system("s"));
        assert!(out[1].is_system());
        assert_eq!(out[2].tool_call_ids(), vec!["a1"]);
        assert_eq!(out[3], Message::tool_result("a1", "search", "r1"));
        assert_eq!(out[4], Message::assistant_text("done"));
    }
}
