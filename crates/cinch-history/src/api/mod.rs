//! Model API adapters for the injected collaborators.
//!
//! - [`openrouter`] — [`OpenRouterSummaryModel`], a
//!   [`SummaryModel`](crate::context::summarizer::SummaryModel) that calls
//!   the OpenRouter chat completions endpoint once per summarization.

pub mod openrouter;

pub use openrouter::{OPENROUTER_URL, OpenRouterSummaryModel};
