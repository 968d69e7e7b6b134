// THEORY:
// This file is the main entry point for the `tile_tracer` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the
// public API that will be exposed to external consumers.
//
// The primary goal is to export the two pipeline drivers
// (`TracingPipeline`, `ParallelTracingPipeline`) and their associated data
// structures (`PipelineConfig`, `RunSummary`, the tile source and hierarchy
// traits) as the clean, high-level interface for the tracing engine. The
// per-stage internals (`core_modules`) remain reachable for callers that
// want to drive labeling or tracing directly.

pub mod core_modules;
pub mod parallel_pipeline;
pub mod pipeline;
