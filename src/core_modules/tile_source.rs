// THEORY:
// The tile source is the pipeline's upstream collaborator: some tiled,
// possibly pyramidal provider of label rasters. The pipeline only ever sees
// this trait, so it is equally happy being fed from a whole-slide image
// server, a cached pyramid, or the in-memory mosaic used by the tests.
//
// Two contract points matter:
// 1.  `get_tile` must be safe to call concurrently for disjoint regions,
//     because the worker pool requests tiles in parallel.
// 2.  `classification_labels` is static for the duration of one run; the
//     pipeline fetches it once and shares it across workers.

use crate::core_modules::error::SourceError;
use crate::core_modules::label_raster::{LabelRaster, RasterBuffer, TileRegion};
use std::collections::HashMap;

/// Identifier of one classification class (e.g. "tumor", "stroma").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// A tiled provider of label rasters.
pub trait TileSource: Send + Sync {
    /// Produces the label raster for one tile. Safe to call concurrently
    /// for disjoint regions.
    fn get_tile(&self, region: TileRegion) -> Result<LabelRaster, SourceError>;

    /// Maps raw label values to classes. Static for the duration of a run.
    fn classification_labels(&self) -> HashMap<i32, ClassId>;
}

/// An in-memory source backed by one full-resolution label array.
///
/// Tiles are cut out by nearest-neighbor sampling at the requested
/// downsample; pixels outside the mosaic read as label 0.
pub struct MosaicSource {
    width: u32,
    height: u32,
    labels: Vec<u16>,
    table: HashMap<i32, ClassId>,
}

impl MosaicSource {
    pub fn new(width: u32, height: u32, labels: Vec<u16>, table: HashMap<i32, ClassId>) -> Self {
        assert_eq!(labels.len(), (width as usize) * (height as usize));
        Self {
            width,
            height,
            labels,
            table,
        }
    }

    /// A table mapping every label 1..=max to class `ClassId(label)`.
    pub fn identity_table(max_label: u32) -> HashMap<i32, ClassId> {
        (1..=max_label).map(|v| (v as i32, ClassId(v))).collect()
    }

    fn label_at(&self, x: i64, y: i64) -> u16 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.labels[(y as usize) * (self.width as usize) + x as usize]
    }
}

impl TileSource for MosaicSource {
    fn get_tile(&self, region: TileRegion) -> Result<LabelRaster, SourceError> {
        let mut buf = Vec::with_capacity((region.width as usize) * (region.height as usize));
        for ry in 0..region.height as i64 {
            for rx in 0..region.width as i64 {
                let sx = region.x + (rx as f64 * region.downsample).round() as i64;
                let sy = region.y + (ry as f64 * region.downsample).round() as i64;
                buf.push(self.label_at(sx, sy));
            }
        }
        LabelRaster::new(
            region.width,
            region.height,
            (region.x, region.y),
            region.downsample,
            RasterBuffer::Shorts(buf),
        )
        .map_err(|e| SourceError(e.to_string()))
    }

    fn classification_labels(&self) -> HashMap<i32, ClassId> {
        self.table.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mosaic_cuts_tiles_at_full_resolution() {
        let mut labels = vec![0u16; 16];
        labels[5] = 7; // (1, 1)
        let source = MosaicSource::new(4, 4, labels, MosaicSource::identity_table(7));

        let tile = source
            .get_tile(TileRegion {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
                downsample: 1.0,
            })
            .unwrap();
        assert_eq!(tile.labels().unwrap(), vec![0, 0, 0, 7]);
    }

    #[test]
    fn out_of_range_pixels_read_as_background() {
        let source = MosaicSource::new(2, 2, vec![1; 4], MosaicSource::identity_table(1));
        let tile = source
            .get_tile(TileRegion {
                x: 1,
                y: 1,
                width: 2,
                height: 2,
                downsample: 1.0,
            })
            .unwrap();
        assert_eq!(tile.labels().unwrap(), vec![1, 0, 0, 0]);
    }
}
