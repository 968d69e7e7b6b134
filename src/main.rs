// Example runner for the `tile_tracer` library: traces a small synthetic
// label mosaic and prints what would be inserted into a hierarchy.

use std::sync::Arc;
use tile_tracer::core_modules::hierarchy::MemoryHierarchy;
use tile_tracer::core_modules::label_raster::RegionRequest;
use tile_tracer::core_modules::materializer::AnnotationFactory;
use tile_tracer::core_modules::tile_source::MosaicSource;
use tile_tracer::pipeline::{
    CancellationFlag, MaterializeOptions, PipelineConfig, TracingPipeline,
};

fn main() {
    // A 64x64 mosaic: a block of class 1 and a ring of class 2.
    let mut labels = vec![0u16; 64 * 64];
    for y in 8..24 {
        for x in 8..40 {
            labels[y * 64 + x] = 1;
        }
    }
    for y in 32..56 {
        for x in 24..56 {
            let edge = y < 36 || y >= 52 || x < 28 || x >= 52;
            if edge {
                labels[y * 64 + x] = 2;
            }
        }
    }
    let source = MosaicSource::new(64, 64, labels, MosaicSource::identity_table(2));

    let mut pipeline = TracingPipeline::new(Arc::new(source), PipelineConfig::default());
    let mut hierarchy = MemoryHierarchy::new();
    let request = RegionRequest {
        x: 0,
        y: 0,
        width: 64,
        height: 64,
        downsample: 1.0,
        tile_size: 32,
    };

    match pipeline.run(
        &request,
        &mut hierarchy,
        &AnnotationFactory,
        &MaterializeOptions::default(),
        &CancellationFlag::new(),
    ) {
        Ok(summary) => {
            println!(
                "traced {} tiles into {} objects",
                summary.tiles_processed, summary.objects_inserted
            );
            for object in hierarchy.objects() {
                println!(
                    "  class {:?}: {} part(s), area {:.1}",
                    object.class_id,
                    object.geometry.0.len(),
                    object.area()
                );
            }
        }
        Err(err) => eprintln!("tracing run failed: {err}"),
    }
}
