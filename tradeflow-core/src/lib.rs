//! # Tradeflow Core
//!
//! Run execution and event-streaming engine for long-running
//! multi-agent analysis jobs.
//!
//! ## Overview
//!
//! A submission creates a [`run::RunRecord`] in the
//! [`registry::RunRegistry`] and schedules an [`executor`] task for
//! it. The executor drives the external [`pipeline::ReasoningPipeline`]
//! on the blocking pool, routes its callback stream through the
//! [`aggregator::StreamAggregator`] to strip redundant snapshots, and
//! appends the surviving changes to the run's [`bus::EventBus`]. Any
//! number of subscribers attach to the bus at any time and receive the
//! full history followed by live updates until the run terminates.

pub mod aggregator;
pub mod bus;
pub mod error;
pub mod events;
pub mod executor;
pub mod namespace;
pub mod normalize;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod run;

pub use bus::EventBus;
pub use error::{Result, RunError};
pub use events::{RunEvent, RunEventKind, StateDelta};
pub use pipeline::{PipelineRequest, PipelineSignal, ReasoningPipeline, ScriptedPipeline};
pub use registry::{RunHandle, RunRegistry};
pub use run::{RunRecord, RunStatus, RunSubmission, RunSummary};
