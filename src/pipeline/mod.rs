//! Optimization Pipeline: spec §4.4. Five phases threaded through an
//! immutable [`context::PipelineContext`] — generate, optimize, filter,
//! walk-forward validate, export.

pub mod context;
pub mod phases;
pub mod walk_forward;

pub use context::{MetricField, MetricThreshold, OptimizationResult, PipelineConfig, PipelineContext};
pub use walk_forward::{WalkForwardConfig, WalkForwardMode, WalkForwardSummary, Window, WindowResult};
