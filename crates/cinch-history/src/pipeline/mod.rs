//! Running the passes: options, events, and the fixed-order [`Pipeline`].
//!
//! - [`config`] — [`ProcessOptions`] with per-stage [`Toggle`]s and the
//!   injected collaborators.
//! - [`events`] — [`PipelineEvent`] and the [`EventHandler`] implementations.
//! - [`orchestrator`] — [`Pipeline`] and the [`process`] entry point.

pub mod config;
pub mod events;
pub mod orchestrator;

pub use config::{ProcessOptions, Toggle};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    PipelineEvent, RepairPhase,
};
pub use orchestrator::{Pipeline, ProcessReport, UNAVAILABLE_PLACEHOLDER, process};
