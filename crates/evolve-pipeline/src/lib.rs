#![warn(missing_docs)]
//! Fluent map/filter/reduce pipeline builder on top of `evolve-swarm`'s
//! composition operators.
//!
//! A [`Pipeline`] chains `map`/`filter` steps (and an optional terminating
//! `reduce`) over one [`evolve_swarm::Swarm`], running each step to
//! completion before starting the next. Every unit scheduled across the
//! whole run shares one `pipeline_run_id`, and every per-unit event the
//! swarm emits is forwarded onto the pipeline's own event bus tagged with
//! the step it belongs to, alongside three step-level events of its own
//! (`StepStart`, `StepComplete`, `StepError`).

pub mod events;
pub mod pipeline;

pub use events::{PipelineEvent, PipelineEventBus, PipelineEventBusStats, PipelineEventSubscription};
pub use pipeline::{Pipeline, TerminalPipeline};
