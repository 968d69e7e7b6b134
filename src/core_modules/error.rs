// THEORY:
// Error handling for the tracing pipeline follows a strict isolation policy:
// anything that goes wrong inside a single tile is a `TileError`, which the
// pipeline logs and counts but never propagates as a panic. Only run-level
// conditions (an oversized region, too many failed tiles, a rejected
// insertion, cancellation) surface as a `PipelineError` to the caller.
//
// The taxonomy mirrors the failure modes of the pipeline stages:
// 1.  `RasterError` - the tile source handed us something that is not a
//     single-band integer raster. Fatal for that tile only.
// 2.  `GeometryError` - tracing or union produced something topologically
//     unusable and the repair path could not recover it.
// 3.  `PipelineError` - run-level failures. `HierarchyRejected` carries the
//     objects that were not inserted so the caller can retry or report them.

use crate::core_modules::materializer::MaterializedObject;
use thiserror::Error;

/// A malformed input raster. The pipeline skips the offending tile.
#[derive(Error, Debug)]
pub enum RasterError {
    #[error("float label buffer holds non-integral value {0} at index {1}")]
    NonIntegralLabel(f32, usize),

    #[error("buffer of {len} labels does not match a {width}x{height} raster")]
    SizeMismatch { len: usize, width: u32, height: u32 },
}

/// Invalid geometry, either from bad arguments or an unrecoverable union.
#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("downsample factor must be positive and finite, got {0}")]
    InvalidDownsample(f64),
}

/// Failure reported by a tile source for one tile request.
#[derive(Error, Debug)]
#[error("tile source failed: {0}")]
pub struct SourceError(pub String);

/// Anything that can sink a single tile. Isolated and counted, never fatal
/// to the run on its own.
#[derive(Error, Debug)]
pub enum TileError {
    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("tile abandoned by cancellation")]
    Cancelled,
}

/// Run-level failures returned across the pipeline boundary.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("region of {requested} pixels exceeds the capacity limit of {limit}")]
    Capacity { requested: u64, limit: u64 },

    #[error("{failed} of {total} tiles failed, above the configured failure-rate threshold")]
    TooManyTileFailures { failed: usize, total: usize },

    #[error("hierarchy rejected insertion of {} objects", rejected.len())]
    HierarchyRejected { rejected: Vec<MaterializedObject> },

    #[error("run cancelled before finalization")]
    Cancelled,
}
