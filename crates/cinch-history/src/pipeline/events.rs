//! Events and handlers for the [`Pipeline`](super::Pipeline).
//!
//! The pipeline reports what each stage did through [`PipelineEvent`]
//! variants. Callers implement [`EventHandler`] to observe them for logging,
//! metrics, or tests.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or silent runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` (the default) |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control |

use crate::context::budget::ContextUsage;
use crate::context::compression::CompressionStats;
use crate::context::dangling::DanglingStats;
use crate::context::eviction::ClearingStats;
use crate::context::repair::RepairStats;
use crate::context::summarizer::SummaryOutcome;
use crate::context::trim::TrimOutcome;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Which of the two repair rounds an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPhase {
    /// Before the lossy stages.
    Initial,
    /// After trimming and summarization.
    Final,
}

impl std::fmt::Display for RepairPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairPhase::Initial => write!(f, "initial"),
            RepairPhase::Final => write!(f, "final"),
        }
    }
}

/// Events emitted by the pipeline during one run, in stage order.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    /// A run is starting.
    Started { usage: &'a ContextUsage },
    /// Orphans and duplicates were resolved.
    Repaired {
        phase: RepairPhase,
        stats: &'a RepairStats,
    },
    /// Dangling calls were answered with placeholder results.
    DanglingRepaired {
        phase: RepairPhase,
        stats: &'a DanglingStats,
    },
    /// Old tool results were compressed.
    Compressed(&'a CompressionStats),
    /// Old tool results were cleared.
    Cleared(&'a ClearingStats),
    /// The summarization stage ran.
    Summarized(&'a SummaryOutcome),
    /// The window was trimmed.
    Trimmed(&'a TrimOutcome),
    /// Repair removed everything; a fallback message was substituted.
    EmptyFallback,
    /// The run finished.
    Finished {
        input_messages: usize,
        usage: &'a ContextUsage,
    },
}

/// Handler for pipeline events.
///
/// Events are informational. The default implementation ignores them.
///
/// # Example
///
/// ```ignore
/// struct CountTrims(AtomicUsize);
///
/// impl EventHandler for CountTrims {
///     fn on_event(&self, event: &PipelineEvent<'_>) {
///         if let PipelineEvent::Trimmed(outcome) = event {
///             self.0.fetch_add(outcome.dropped, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event during a run.
    fn on_event(&self, event: &PipelineEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let PipelineEvent::Trimmed(outcome) = event {
///         println!("dropped {}", outcome.dropped);
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler::new("planner"))
///     .with_if(collect_metrics, MetricsHandler::default());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs every event through `tracing`, tagged with a prefix identifying the
/// agent or session.
pub struct LoggingHandler {
    prefix: String,
}

impl LoggingHandler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new("history")
    }
}

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        let prefix = self.prefix.as_str();
        match event {
            PipelineEvent::Started { usage } => {
                debug!(prefix, "processing {}", usage.to_log_string());
            }
            PipelineEvent::Repaired { phase, stats } => {
                if !stats.is_clean() {
                    info!(
                        prefix,
                        %phase,
                        duplicate_echoes = stats.duplicate_echoes_removed,
                        echoed_calls = stats.echoed_calls_stripped,
                        unresolved_stripped = stats.unresolved_calls_stripped,
                        unresolved_kept = stats.unresolved_calls_kept,
                        empty_assistants = stats.empty_assistants_removed,
                        orphans = stats.orphaned_results_removed,
                        misplaced = stats.misplaced_results_removed,
                        duplicate_results = stats.duplicate_results_removed,
                        "repaired tool-call pairing"
                    );
                }
            }
            PipelineEvent::DanglingRepaired { phase, stats } => {
                if stats.synthesized > 0 {
                    info!(
                        prefix,
                        %phase,
                        synthesized = stats.synthesized,
                        "answered dangling tool calls"
                    );
                }
            }
            PipelineEvent::Compressed(stats) => {
                if stats.compressed > 0 {
                    debug!(
                        prefix,
                        compressed = stats.compressed,
                        freed_chars = stats.freed_chars,
                        "compressed old tool results"
                    );
                }
            }
            PipelineEvent::Cleared(stats) => {
                if stats.cleared > 0 || stats.inputs_cleared > 0 {
                    debug!(
                        prefix,
                        cleared = stats.cleared,
                        inputs_cleared = stats.inputs_cleared,
                        freed_chars = stats.freed_chars,
                        "cleared old tool results"
                    );
                }
            }
            PipelineEvent::Summarized(outcome) => match outcome {
                SummaryOutcome::Summarized {
                    summarized,
                    kept,
                    summary_chars,
                } => info!(
                    prefix,
                    summarized, kept, summary_chars, "summarized earlier conversation"
                ),
                SummaryOutcome::Failed { error, dropped } => warn!(
                    prefix,
                    %error,
                    dropped,
                    "summarization failed; oldest messages truncated"
                ),
                SummaryOutcome::NoModel => {
                    debug!(prefix, "summarization needed but no model configured")
                }
                SummaryOutcome::NotNeeded => {}
            },
            PipelineEvent::Trimmed(outcome) => {
                if outcome.dropped > 0 {
                    info!(
                        prefix,
                        strategy = %outcome.strategy,
                        dropped = outcome.dropped,
                        preserved = outcome.preserved,
                        "trimmed history window"
                    );
                }
            }
            PipelineEvent::EmptyFallback => {
                warn!(prefix, "repair left no messages; substituted a fallback message");
            }
            PipelineEvent::Finished {
                input_messages,
                usage,
            } => {
                debug!(
                    prefix,
                    input_messages,
                    "processed: {}",
                    usage.to_log_string()
                );
            }
        }
    }
}
