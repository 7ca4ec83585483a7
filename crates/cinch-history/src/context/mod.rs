//! The individual history passes, each a pure function over a message slice.
//!
//! Two kinds of pass live here:
//!
//! 1. **Invariant repair.** [`repair`] drops orphaned results, collapses
//!    duplicate request echoes, and removes empty assistant turns.
//!    [`dangling`] answers every request that never got a result. Both run
//!    before and after the lossy passes, because trimming and summarization
//!    are exactly the operations that reintroduce violations.
//!
//! 2. **Budget enforcement.** [`compression`] and [`eviction`] shrink old tool
//!    results (no LLM call needed, and typically the biggest win).
//!    [`summarizer`] replaces the oldest span with a model-written digest.
//!    [`trim`] bounds the window by tokens or message count while keeping
//!    task-critical messages.
//!
//! [`budget`] holds the token-counter seam shared by the passes.
//!
//! Every pass returns its output together with statistics so the
//! [`Pipeline`](crate::pipeline::Pipeline) can log and report what changed.

pub mod budget;
pub mod compression;
pub mod dangling;
pub mod eviction;
pub mod repair;
pub mod summarizer;
pub mod trim;

// Re-export commonly used items at the module level.
pub use budget::{
    CharEstimateCounter, ContextUsage, DEFAULT_CHARS_PER_TOKEN, TokenCounter, estimate_tokens,
};
pub use compression::{
    COMPRESSED_PREFIX, CompressionConfig, CompressionRules, CompressionStats,
    compress_tool_results,
};
pub use dangling::{CANCELLED_RESULT, DanglingStats, repair_dangling_calls};
pub use eviction::{ClearingConfig, ClearingStats, EVICTED_PREFIX, clear_tool_results};
pub use repair::{DanglingPolicy, RepairStats, resolve_orphans_and_duplicates};
pub use summarizer::{
    SUMMARY_PREFIX, SummarizationConfig, SummaryFuture, SummaryModel, SummaryOutcome,
    summarize_if_needed,
};
pub use trim::{PreservationConfig, TrimLimits, TrimOutcome, TrimStrategy, trim_window};
