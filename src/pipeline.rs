// THEORY:
// The `pipeline` module is the top-level API for the tracing engine. It
// encapsulates the full stack - labeling, contour tracing, coordinate
// transformation, accumulation, materialization - behind a single `run`
// call: give it a region request, a hierarchy and a factory, get back a
// summary or a run-level error.
//
// One run is a small state machine:
// `Idle -> ProcessingTiles -> Finalizing -> Done`, with `ProcessingTiles`
// jumping straight to `Aborted` on cancellation. Materialization never
// starts until every tile of the grid has been answered, and an aborted run
// leaves the hierarchy untouched.

use crate::core_modules::accumulator::RegionAccumulator;
use crate::core_modules::error::{PipelineError, TileError};
use crate::core_modules::hierarchy::ObjectHierarchy;
use crate::core_modules::label_raster::{RegionRequest, TileRegion};
use crate::core_modules::materializer::{self, ObjectFactory};
use crate::core_modules::tile_source::{ClassId, TileSource};
use crate::core_modules::{contour, labeler::labeler, transform};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// Re-export the types callers need to drive a run.
pub use crate::core_modules::contour::NoiseFilter;
pub use crate::core_modules::labeler::Connectivity;
pub use crate::core_modules::materializer::MaterializeOptions;

/// Configuration for a tracing run, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub connectivity: Connectivity,
    /// Label treated as background and ignored, if any.
    pub background_label: Option<i32>,
    /// Degenerate-component policy applied before tracing.
    pub noise_filter: NoiseFilter,
    /// Snap-to-grid tolerance for cross-tile merging, in image-space units.
    /// Non-positive disables snapping.
    pub snap_tolerance: f64,
    /// Fraction of tiles allowed to fail before the whole run is failed.
    pub max_tile_failure_rate: f64,
    /// Upper bound on the raster pixel count of one region request; larger
    /// requests fail up front rather than produce misleading partial output.
    pub max_region_pixels: u64,
    /// Worker count for the parallel pipeline.
    pub worker_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Eight,
            background_label: Some(0),
            noise_filter: NoiseFilter::default(),
            snap_tolerance: 0.01,
            max_tile_failure_rate: 0.25,
            max_region_pixels: 1 << 31,
            worker_count: num_cpus::get().clamp(1, 8),
        }
    }
}

/// Cancellation signal shared with the caller; checked between tiles, never
/// in the middle of a union.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a pipeline currently is in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ProcessingTiles,
    Finalizing,
    Done,
    Aborted,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tiles_processed: usize,
    pub tiles_skipped: usize,
    pub objects_inserted: usize,
    /// Tile contributions dropped by failed geometry repairs.
    pub dropped_contributions: usize,
}

/// Runs one tile through labeling, tracing, transformation and
/// accumulation. This is the worker body for both pipeline drivers.
pub(crate) fn process_tile<S: TileSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
    table: &HashMap<i32, ClassId>,
    accumulator: &RegionAccumulator,
    region: TileRegion,
) -> Result<(), TileError> {
    let raster = source.get_tile(region)?;
    let components = labeler::label(&raster, config.connectivity, config.background_label)?;

    let mut traced = 0usize;
    for (label, list) in components {
        let Some(&class_id) = table.get(&label) else {
            warn!(label, "label missing from classification table, skipping");
            continue;
        };
        for component in list {
            if !config.noise_filter.keeps(&component) {
                continue;
            }
            let outline = contour::trace(&component);
            let pixel_area = outline.pixel_area() as f64 * raster.downsample * raster.downsample;
            let geometry = transform::to_image_space(&outline, raster.origin, raster.downsample)?;
            accumulator.accumulate(class_id, geometry, pixel_area);
            traced += 1;
        }
    }
    debug!(x = region.x, y = region.y, components = traced, "tile absorbed");
    Ok(())
}

/// Materializes accumulated geometry into the hierarchy. Runs on exactly
/// one context, after every tile has been counted.
pub(crate) fn finalize(
    accumulator: &RegionAccumulator,
    hierarchy: &mut dyn ObjectHierarchy,
    factory: &dyn ObjectFactory,
    options: &MaterializeOptions,
    tiles_processed: usize,
    tiles_skipped: usize,
) -> Result<RunSummary, PipelineError> {
    let dropped_contributions = accumulator.dropped_contributions();
    let class_geometries = accumulator.take_all();
    let objects = materializer::materialize(class_geometries, options, factory);

    // The hierarchy is mutated in one step: a rejected run must not have
    // already deleted the objects it was superseding.
    let objects_inserted = objects.len();
    let accepted = if options.delete_existing {
        hierarchy.replace_objects(&options.provenance, &objects)
    } else if objects.is_empty() {
        true
    } else {
        hierarchy.insert_objects(&objects)
    };
    if !accepted {
        return Err(PipelineError::HierarchyRejected { rejected: objects });
    }

    Ok(RunSummary {
        tiles_processed,
        tiles_skipped,
        objects_inserted,
        dropped_contributions,
    })
}

/// The single-context pipeline driver. Processes the tile grid one tile at
/// a time; the parallel driver in `parallel_pipeline` shares all of its
/// stage logic.
pub struct TracingPipeline<S: TileSource> {
    source: Arc<S>,
    config: PipelineConfig,
    state: PipelineState,
}

impl<S: TileSource> TracingPipeline<S> {
    pub fn new(source: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            source,
            config,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn run(
        &mut self,
        request: &RegionRequest,
        hierarchy: &mut dyn ObjectHierarchy,
        factory: &dyn ObjectFactory,
        options: &MaterializeOptions,
        cancel: &CancellationFlag,
    ) -> Result<RunSummary, PipelineError> {
        let requested = request.pixel_count();
        if requested > self.config.max_region_pixels {
            self.state = PipelineState::Idle;
            return Err(PipelineError::Capacity {
                requested,
                limit: self.config.max_region_pixels,
            });
        }

        let tiles = request.tile_grid();
        let accumulator = RegionAccumulator::new(self.config.snap_tolerance);
        let table = self.source.classification_labels();

        self.state = PipelineState::ProcessingTiles;
        let mut tiles_processed = 0usize;
        let mut tiles_skipped = 0usize;

        for &region in &tiles {
            if cancel.is_cancelled() {
                accumulator.clear();
                self.state = PipelineState::Aborted;
                return Err(PipelineError::Cancelled);
            }
            match process_tile(
                self.source.as_ref(),
                &self.config,
                &table,
                &accumulator,
                region,
            ) {
                Ok(()) => tiles_processed += 1,
                Err(err) => {
                    warn!(x = region.x, y = region.y, error = %err, "tile failed, skipping");
                    tiles_skipped += 1;
                }
            }
        }

        if !tiles.is_empty()
            && tiles_skipped as f64 / tiles.len() as f64 > self.config.max_tile_failure_rate
        {
            self.state = PipelineState::Idle;
            return Err(PipelineError::TooManyTileFailures {
                failed: tiles_skipped,
                total: tiles.len(),
            });
        }

        self.state = PipelineState::Finalizing;
        let summary = finalize(
            &accumulator,
            hierarchy,
            factory,
            options,
            tiles_processed,
            tiles_skipped,
        )?;
        self.state = PipelineState::Done;
        info!(
            tiles = summary.tiles_processed,
            skipped = summary.tiles_skipped,
            objects = summary.objects_inserted,
            "tracing run complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::hierarchy::MemoryHierarchy;
    use crate::core_modules::materializer::AnnotationFactory;
    use crate::core_modules::tile_source::MosaicSource;

    fn block_source() -> MosaicSource {
        // 8x8 mosaic with a 4x4 block of label 1 at (2, 2).
        let mut labels = vec![0u16; 64];
        for y in 2..6 {
            for x in 2..6 {
                labels[y * 8 + x] = 1;
            }
        }
        MosaicSource::new(8, 8, labels, MosaicSource::identity_table(1))
    }

    fn request() -> RegionRequest {
        RegionRequest {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
            downsample: 1.0,
            tile_size: 4,
        }
    }

    #[test]
    fn block_split_across_four_tiles_yields_one_object() {
        let mut pipeline =
            TracingPipeline::new(Arc::new(block_source()), PipelineConfig::default());
        let mut hierarchy = MemoryHierarchy::new();

        let summary = pipeline
            .run(
                &request(),
                &mut hierarchy,
                &AnnotationFactory,
                &MaterializeOptions::default(),
                &CancellationFlag::new(),
            )
            .unwrap();

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(summary.tiles_processed, 4);
        assert_eq!(summary.objects_inserted, 1);
        let object = &hierarchy.objects()[0];
        assert_eq!(object.geometry.0.len(), 1);
        assert!((object.area() - 16.0).abs() < 1e-6);
    }

    #[test]
    fn oversized_region_fails_up_front() {
        let config = PipelineConfig {
            max_region_pixels: 16,
            ..Default::default()
        };
        let mut pipeline = TracingPipeline::new(Arc::new(block_source()), config);
        let mut hierarchy = MemoryHierarchy::new();

        let result = pipeline.run(
            &request(),
            &mut hierarchy,
            &AnnotationFactory,
            &MaterializeOptions::default(),
            &CancellationFlag::new(),
        );
        assert!(matches!(result, Err(PipelineError::Capacity { .. })));
        assert!(hierarchy.objects().is_empty());
    }

    #[test]
    fn cancellation_aborts_without_touching_the_hierarchy() {
        let mut pipeline =
            TracingPipeline::new(Arc::new(block_source()), PipelineConfig::default());
        let mut hierarchy = MemoryHierarchy::new();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = pipeline.run(
            &request(),
            &mut hierarchy,
            &AnnotationFactory,
            &MaterializeOptions::default(),
            &cancel,
        );
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(pipeline.state(), PipelineState::Aborted);
        assert!(hierarchy.objects().is_empty());
    }

    #[test]
    fn rejected_rerun_with_delete_existing_keeps_the_prior_objects() {
        use crate::core_modules::materializer::{MaterializedObject, ObjectKind, ProvenanceTag};
        use geo::MultiPolygon;

        let mut hierarchy = MemoryHierarchy::new();
        hierarchy.insert_objects(&[MaterializedObject {
            geometry: MultiPolygon::new(Vec::new()),
            class_id: crate::core_modules::tile_source::ClassId(1),
            kind: ObjectKind::Annotation,
            provenance: ProvenanceTag::default(),
        }]);
        hierarchy.set_read_only(true);

        let mut pipeline =
            TracingPipeline::new(Arc::new(block_source()), PipelineConfig::default());
        let options = MaterializeOptions {
            delete_existing: true,
            ..Default::default()
        };
        let result = pipeline.run(
            &request(),
            &mut hierarchy,
            &AnnotationFactory,
            &options,
            &CancellationFlag::new(),
        );

        assert!(matches!(result, Err(PipelineError::HierarchyRejected { .. })));
        assert_eq!(hierarchy.objects().len(), 1);
    }

    #[test]
    fn read_only_hierarchy_surfaces_rejected_objects() {
        let mut pipeline =
            TracingPipeline::new(Arc::new(block_source()), PipelineConfig::default());
        let mut hierarchy = MemoryHierarchy::new();
        hierarchy.set_read_only(true);

        let result = pipeline.run(
            &request(),
            &mut hierarchy,
            &AnnotationFactory,
            &MaterializeOptions::default(),
            &CancellationFlag::new(),
        );
        match result {
            Err(PipelineError::HierarchyRejected { rejected }) => assert_eq!(rejected.len(), 1),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
