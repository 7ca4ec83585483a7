//! Convenience re-exports for common `cinch-history` types.
//!
//! Meant to be glob-imported by agent loops:
//!
//! ```ignore
//! use cinch_history::prelude::*;
//! ```
//!
//! This pulls in the message model, [`ProcessOptions`] and its stage
//! configs, the [`Pipeline`] with its event handlers, and the collaborator
//! traits. Individual passes and their statistics are left out; import those
//! from [`crate::context`] when calling a pass directly.

// ── Message model ───────────────────────────────────────────────────
pub use crate::{ContentBlock, Message, MessageKind, ToolCall};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::pipeline::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler, Pipeline,
    PipelineEvent, ProcessOptions, ProcessReport, Toggle, process,
};

// ── Stage configuration ─────────────────────────────────────────────
pub use crate::context::{
    ClearingConfig, CompressionConfig, CompressionRules, DanglingPolicy, PreservationConfig,
    SummarizationConfig,
};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::api::OpenRouterSummaryModel;
pub use crate::context::{CharEstimateCounter, SummaryFuture, SummaryModel, TokenCounter};
