//! Configuration for the [`Pipeline`](super::Pipeline).
//!
//! Compression and summarization are **enabled by default**; clearing is
//! opt-in because it discards content outright. Summarization is a no-op
//! until a [`SummaryModel`] is supplied, and token-based trimming until a
//! [`TokenCounter`] and `max_tokens` are both set.
//!
//! # Examples
//!
//! Minimal configuration, everything at its default:
//!
//! ```ignore
//! let options = ProcessOptions::default();
//! ```
//!
//! Customized configuration with builder methods:
//!
//! ```ignore
//! let options = ProcessOptions::default()
//!     .with_max_tokens(100_000)
//!     .with_token_counter(CharEstimateCounter::default())
//!     .with_summary_model(OpenRouterSummaryModel::from_env("openai/gpt-4o-mini")?)
//!     .with_original_request("Refactor the parser")
//!     .with_preserve_keywords(["DECISION:"]);
//! ```
//!
//! Toggling modules via struct fields:
//!
//! ```ignore
//! let options = ProcessOptions {
//!     compression: Toggle::disabled(),
//!     clearing: Toggle::enabled(ClearingConfig::new().protect_tool("todo")),
//!     ..ProcessOptions::default()
//! };
//! ```
//!
//! Everything except the collaborators can also be read from JSON; missing
//! fields take their defaults. A stage toggle that appears in the JSON needs
//! its `enabled` flag, so `{"clearing": {"config": {...}}}` is rejected
//! rather than silently switching clearing on.

use crate::context::budget::TokenCounter;
use crate::context::compression::{CompressionConfig, CompressionRules};
use crate::context::eviction::ClearingConfig;
use crate::context::repair::DanglingPolicy;
use crate::context::summarizer::{SummarizationConfig, SummaryModel};
use crate::context::trim::{PreservationConfig, TrimLimits};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for stage configurations.
///
/// When `enabled` is `false`, the stage is skipped regardless of the inner
/// config values. In JSON, a toggle that is present must say `enabled`
/// explicitly; only `config` may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toggle<T: Default> {
    /// Whether this stage runs.
    pub enabled: bool,
    /// Stage-specific configuration.
    #[serde(default)]
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// Create an enabled instance with the given config.
    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }

    /// Create a disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// The inner config, if the stage is enabled.
    pub fn active(&self) -> Option<&T> {
        self.enabled.then_some(&self.config)
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Process options ───────────────────────────────────────────────

/// Options for one [`process`](super::process) call.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Token budget for the trimmed window. Needs `token_counter`.
    pub max_tokens: Option<usize>,
    /// Non-system messages kept when trimming by message count.
    pub fallback_message_count: usize,
    /// Token counter collaborator. Absent forces message-count trimming.
    #[serde(skip)]
    pub token_counter: Option<Arc<dyn TokenCounter>>,
    pub summarization: Toggle<SummarizationConfig>,
    /// Summarization model collaborator. Absent makes summarization a no-op.
    #[serde(skip)]
    pub summary_model: Option<Arc<dyn SummaryModel>>,
    pub compression: Toggle<CompressionConfig>,
    /// Off by default.
    pub clearing: Toggle<ClearingConfig>,
    /// Task-critical messages kept across trimming.
    pub preservation: PreservationConfig,
    /// What to do with tool requests that have no result.
    pub dangling_policy: DanglingPolicy,
    /// Label attached to every log line. No behavioral effect.
    pub log_prefix: String,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            fallback_message_count: 40,
            token_counter: None,
            summarization: Toggle::default(),
            summary_model: None,
            compression: Toggle::default(),
            clearing: Toggle::disabled(),
            preservation: PreservationConfig::default(),
            dangling_policy: DanglingPolicy::default(),
            log_prefix: "history".to_string(),
        }
    }
}

impl std::fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("max_tokens", &self.max_tokens)
            .field("fallback_message_count", &self.fallback_message_count)
            .field("token_counter", &self.token_counter.is_some())
            .field("summarization", &self.summarization)
            .field("summary_model", &self.summary_model.is_some())
            .field("compression", &self.compression)
            .field("clearing", &self.clearing)
            .field("preservation", &self.preservation)
            .field("dangling_policy", &self.dangling_policy)
            .field("log_prefix", &self.log_prefix)
            .finish()
    }
}

impl ProcessOptions {
    /// Parse options from JSON. Collaborators must be attached afterwards.
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("invalid options: {e}"))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_fallback_message_count(mut self, count: usize) -> Self {
        self.fallback_message_count = count;
        self
    }

    pub fn with_token_counter(mut self, counter: impl TokenCounter + 'static) -> Self {
        self.token_counter = Some(Arc::new(counter));
        self
    }

    pub fn with_summary_model(mut self, model: impl SummaryModel + 'static) -> Self {
        self.summary_model = Some(Arc::new(model));
        self
    }

    /// Share one summarization model handle across many option sets.
    pub fn with_shared_summary_model(mut self, model: Arc<dyn SummaryModel>) -> Self {
        self.summary_model = Some(model);
        self
    }

    pub fn with_summarization(mut self, config: SummarizationConfig) -> Self {
        self.summarization = Toggle::enabled(config);
        self
    }

    pub fn without_summarization(mut self) -> Self {
        self.summarization.enabled = false;
        self
    }

    pub fn with_compression(mut self, config: CompressionConfig) -> Self {
        self.compression = Toggle::enabled(config);
        self
    }

    /// Replace the per-tool compression rules, keeping the other settings.
    pub fn with_compression_rules(mut self, rules: CompressionRules) -> Self {
        self.compression.config.rules = rules;
        self
    }

    pub fn without_compression(mut self) -> Self {
        self.compression.enabled = false;
        self
    }

    /// Enable clearing with the given config.
    pub fn with_clearing(mut self, config: ClearingConfig) -> Self {
        self.clearing = Toggle::enabled(config);
        self
    }

    pub fn with_original_request(mut self, request: impl Into<String>) -> Self {
        self.preservation.original_request = Some(request.into());
        self
    }

    pub fn with_preserve_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preservation
            .keywords
            .extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_dangling_policy(mut self, policy: DanglingPolicy) -> Self {
        self.dangling_policy = policy;
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// The trimmer's size limits.
    pub fn trim_limits(&self) -> TrimLimits {
        TrimLimits {
            max_tokens: self.max_tokens,
            fallback_count: self.fallback_message_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::budget::CharEstimateCounter;

    #[test]
    fn defaults() {
        let options = ProcessOptions::default();
        assert_eq!(options.fallback_message_count, 40);
        assert!(options.max_tokens.is_none());
        assert!(options.summarization.enabled);
        assert_eq!(options.summarization.config.trigger_tokens, 60_000);
        assert_eq!(options.summarization.config.keep_messages, 20);
        assert!(options.compression.enabled);
        assert_eq!(options.compression.config.keep_count, 3);
        assert!(!options.clearing.enabled);
        assert_eq!(options.clearing.config.keep_count, 5);
        assert_eq!(options.dangling_policy, DanglingPolicy::Synthesize);
        assert_eq!(options.log_prefix, "history");
    }

    #[test]
    fn toggle_disabled_hides_config() {
        let toggle: Toggle<SummarizationConfig> = Toggle::disabled();
        assert!(toggle.active().is_none());
        assert!(Toggle::enabled(SummarizationConfig::default()).active().is_some());
    }

    #[test]
    fn builder_methods() {
        let options = ProcessOptions::default()
            .with_max_tokens(8_000)
            .with_token_counter(CharEstimateCounter::default())
            .with_fallback_message_count(10)
            .with_original_request("fix the build")
            .with_preserve_keywords(["DECISION", "TODO"])
            .without_compression()
            .with_clearing(ClearingConfig::new().protect_tool("todo"))
            .with_log_prefix("agent-7");

        assert_eq!(options.max_tokens, Some(8_000));
        assert!(options.token_counter.is_some());
        assert_eq!(options.trim_limits().fallback_count, 10);
        assert_eq!(
            options.preservation.original_request.as_deref(),
            Some("fix the build")
        );
        assert_eq!(options.preservation.keywords, vec!["DECISION", "TODO"]);
        assert!(!options.compression.enabled);
        assert!(options.clearing.enabled);
        assert!(options.clearing.config.exclude_tools.contains("todo"));
        assert_eq!(options.log_prefix, "agent-7");
    }

    #[test]
    fn from_json_fills_missing_fields_with_defaults() {
        let options = ProcessOptions::from_json(
            r#"{
                "fallback_message_count": 12,
                "clearing": {"enabled": true, "config": {"keep_count": 2}},
                "summarization": {"enabled": false},
                "preservation": {"keywords": ["deploy"]},
                "dangling_policy": "strip"
            }"#,
        )
        .unwrap();

        assert_eq!(options.fallback_message_count, 12);
        assert!(options.clearing.enabled);
        assert_eq!(options.clearing.config.keep_count, 2);
        assert_eq!(
            options.clearing.config.placeholder,
            crate::context::eviction::DEFAULT_CLEARED_PLACEHOLDER
        );
        assert!(!options.summarization.enabled);
        assert_eq!(options.summarization.config.keep_messages, 20);
        assert!(options.compression.enabled);
        assert_eq!(options.preservation.keywords, vec!["deploy"]);
        assert_eq!(options.dangling_policy, DanglingPolicy::Strip);
        assert_eq!(options.log_prefix, "history");
    }

    #[test]
    fn empty_json_keeps_clearing_disabled() {
        let options = ProcessOptions::from_json("{}").unwrap();
        assert!(!options.clearing.enabled);
    }

    #[test]
    fn toggle_without_enabled_is_rejected() {
        let err = ProcessOptions::from_json(r#"{"clearing": {"config": {"keep_count": 2}}}"#)
            .unwrap_err();
        assert!(err.contains("enabled"));

        let options = ProcessOptions::from_json(r#"{"compression": {"enabled": false}}"#).unwrap();
        assert!(!options.compression.enabled);
        assert_eq!(options.compression.config.keep_count, 3);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let err = ProcessOptions::from_json("{\"fallback_message_count\": \"many\"}").unwrap_err();
        assert!(err.starts_with("invalid options:"));
    }

    #[test]
    fn debug_hides_collaborators() {
        let options = ProcessOptions::default().with_token_counter(CharEstimateCounter::default());
        let debug = format!("{options:?}");
        assert!(debug.contains("token_counter: true"));
        assert!(debug.contains("summary_model: false"));
    }
}
