//! Token accounting shared by the budget-enforcing passes.
//!
//! Exact token counts come from an injected [`TokenCounter`]. When none is
//! available (or it fails) the passes fall back to a character-based
//! estimate, which is conservative enough for deciding when to summarize or
//! compress.

use crate::Message;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Per-message overhead charged on top of content (role markers, separators).
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// External token counter.
///
/// Implementations wrap a real tokenizer. Errors are reported as strings and
/// never escape the pipeline: callers fall back to message-count trimming or
/// to [`CharEstimateCounter`].
pub trait TokenCounter: Send + Sync {
    /// Count the tokens one message will occupy in a request.
    fn count(&self, message: &Message) -> Result<usize, String>;
}

/// Character-ratio estimator. Never fails.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimateCounter {
    pub chars_per_token: f64,
}

impl Default for CharEstimateCounter {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl CharEstimateCounter {
    /// Create an estimator with a calibrated ratio. Non-positive ratios fall
    /// back to the default.
    pub fn with_ratio(chars_per_token: f64) -> Self {
        if chars_per_token > 0.0 {
            Self { chars_per_token }
        } else {
            Self::default()
        }
    }

    pub fn estimate(&self, message: &Message) -> usize {
        (message.char_len() as f64 / self.chars_per_token) as usize + MESSAGE_OVERHEAD_TOKENS
    }
}

impl TokenCounter for CharEstimateCounter {
    fn count(&self, message: &Message) -> Result<usize, String> {
        Ok(self.estimate(message))
    }
}

/// Count tokens for a slice of messages with the given counter.
pub fn count_tokens(messages: &[Message], counter: &dyn TokenCounter) -> Result<usize, String> {
    messages.iter().map(|m| counter.count(m)).sum()
}

/// Estimate tokens for a slice of messages, preferring `counter` and falling
/// back to the character estimate if it is absent or fails.
pub fn estimate_tokens(messages: &[Message], counter: Option<&dyn TokenCounter>) -> usize {
    if let Some(counter) = counter {
        match count_tokens(messages, counter) {
            Ok(n) => return n,
            Err(e) => tracing::debug!("token counter failed ({e}); using character estimate"),
        }
    }
    let fallback = CharEstimateCounter::default();
    messages.iter().map(|m| fallback.estimate(m)).sum()
}

/// Snapshot of a message sequence's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    /// Estimated tokens consumed.
    pub estimated_tokens: usize,
    /// Number of messages.
    pub message_count: usize,
}

impl ContextUsage {
    pub fn measure(messages: &[Message], counter: Option<&dyn TokenCounter>) -> Self {
        Self {
            estimated_tokens: estimate_tokens(messages, counter),
            message_count: messages.len(),
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens in {} messages",
            self.estimated_tokens, self.message_count,
        )
    }
}
