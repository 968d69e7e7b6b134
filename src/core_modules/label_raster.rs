// THEORY:
// The `LabelRaster` is the unit of input for the whole pipeline: one tile's
// worth of per-pixel class labels, cut from a large (possibly pyramidal)
// image at some downsample factor. It is a "dumb" data container in the same
// spirit as a frame buffer: it holds the labels plus just enough placement
// metadata (origin, downsample) for later stages to map tile-local pixels
// back into full-image coordinates.
//
// Key architectural principles:
// 1.  **One integer view**: sources hand us labels as bytes, shorts or
//     floats depending on how the classifier wrote them. All of that
//     polymorphism is collapsed here, at the boundary, into a single
//     normalized `Vec<i32>` so every downstream algorithm handles exactly
//     one concrete type.
// 2.  **Fail early**: a buffer whose length does not match width x height,
//     or a float buffer carrying fractional values, is rejected when the
//     labels are read, before any labeling work starts.
// 3.  **Per-tile lifecycle**: a raster is created fresh for one tile request
//     and dropped as soon as its contribution has been absorbed by the
//     region accumulator.

use crate::core_modules::error::RasterError;
use image::GrayImage;

/// Label storage variants, matching the pixel encodings sources produce.
#[derive(Debug, Clone)]
pub enum RasterBuffer {
    Bytes(Vec<u8>),
    Shorts(Vec<u16>),
    Floats(Vec<f32>),
}

impl RasterBuffer {
    pub fn len(&self) -> usize {
        match self {
            RasterBuffer::Bytes(b) => b.len(),
            RasterBuffer::Shorts(s) => s.len(),
            RasterBuffer::Floats(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collapses the variant into one integer view. Float buffers must hold
    /// exact integral values; anything else is a malformed raster.
    fn normalized(&self) -> Result<Vec<i32>, RasterError> {
        match self {
            RasterBuffer::Bytes(b) => Ok(b.iter().map(|&v| v as i32).collect()),
            RasterBuffer::Shorts(s) => Ok(s.iter().map(|&v| v as i32).collect()),
            RasterBuffer::Floats(f) => f
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    if v.is_finite() && v.fract() == 0.0 {
                        Ok(v as i32)
                    } else {
                        Err(RasterError::NonIntegralLabel(v, i))
                    }
                })
                .collect(),
        }
    }
}

/// One tile of integer class labels, row-major.
#[derive(Debug, Clone)]
pub struct LabelRaster {
    /// Width of the tile in raster pixels.
    pub width: u32,
    /// Height of the tile in raster pixels.
    pub height: u32,
    /// Top-left corner of the tile in full-image pixel coordinates.
    pub origin: (i64, i64),
    /// Full-image pixels per raster pixel along each axis.
    pub downsample: f64,
    /// The label values themselves.
    pub buffer: RasterBuffer,
}

impl LabelRaster {
    pub fn new(
        width: u32,
        height: u32,
        origin: (i64, i64),
        downsample: f64,
        buffer: RasterBuffer,
    ) -> Result<Self, RasterError> {
        if buffer.len() != (width as usize) * (height as usize) {
            return Err(RasterError::SizeMismatch {
                len: buffer.len(),
                width,
                height,
            });
        }
        Ok(Self {
            width,
            height,
            origin,
            downsample,
            buffer,
        })
    }

    /// Builds a raster from an 8-bit grayscale image, treating each gray
    /// value as a label. Classifier outputs are commonly saved this way.
    pub fn from_luma8(img: &GrayImage, origin: (i64, i64), downsample: f64) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            origin,
            downsample,
            buffer: RasterBuffer::Bytes(img.as_raw().clone()),
        }
    }

    /// The normalized integer labels, row-major.
    pub fn labels(&self) -> Result<Vec<i32>, RasterError> {
        self.buffer.normalized()
    }
}

/// One tile request: a `width` x `height` raster whose top-left pixel sits at
/// `(x, y)` in full-image coordinates, sampled at `downsample`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRegion {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub downsample: f64,
}

/// The full region one pipeline run covers, in full-image pixel coordinates,
/// together with how it should be tiled.
#[derive(Debug, Clone, Copy)]
pub struct RegionRequest {
    pub x: i64,
    pub y: i64,
    /// Width of the region in full-image pixels.
    pub width: u64,
    /// Height of the region in full-image pixels.
    pub height: u64,
    /// Downsample factor tiles are requested at. Must be positive.
    pub downsample: f64,
    /// Side length of a (square) tile in raster pixels at `downsample`.
    pub tile_size: u32,
}

impl RegionRequest {
    /// Raster pixel count of the whole request, used for capacity checks.
    pub fn pixel_count(&self) -> u64 {
        let w = (self.width as f64 / self.downsample).ceil() as u64;
        let h = (self.height as f64 / self.downsample).ceil() as u64;
        w * h
    }

    /// Cuts the request into the tile grid a run will process. Edge tiles
    /// are clipped to the region, so the grid covers it exactly once.
    pub fn tile_grid(&self) -> Vec<TileRegion> {
        let full_w = (self.width as f64 / self.downsample).ceil() as u64;
        let full_h = (self.height as f64 / self.downsample).ceil() as u64;
        let step = self.tile_size.max(1) as u64;

        let mut tiles = Vec::new();
        let mut ty = 0u64;
        while ty < full_h {
            let tile_h = step.min(full_h - ty) as u32;
            let mut tx = 0u64;
            while tx < full_w {
                let tile_w = step.min(full_w - tx) as u32;
                tiles.push(TileRegion {
                    x: self.x + (tx as f64 * self.downsample).round() as i64,
                    y: self.y + (ty as f64 * self.downsample).round() as i64,
                    width: tile_w,
                    height: tile_h,
                    downsample: self.downsample,
                });
                tx += step;
            }
            ty += step;
        }
        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_and_short_buffers_normalize() {
        let r = LabelRaster::new(2, 2, (0, 0), 1.0, RasterBuffer::Bytes(vec![0, 1, 2, 3])).unwrap();
        assert_eq!(r.labels().unwrap(), vec![0, 1, 2, 3]);

        let r =
            LabelRaster::new(2, 2, (0, 0), 1.0, RasterBuffer::Shorts(vec![300, 0, 1, 2])).unwrap();
        assert_eq!(r.labels().unwrap(), vec![300, 0, 1, 2]);
    }

    #[test]
    fn integral_floats_are_accepted() {
        let r =
            LabelRaster::new(2, 1, (0, 0), 1.0, RasterBuffer::Floats(vec![2.0, 0.0])).unwrap();
        assert_eq!(r.labels().unwrap(), vec![2, 0]);
    }

    #[test]
    fn fractional_floats_are_rejected() {
        let r =
            LabelRaster::new(2, 1, (0, 0), 1.0, RasterBuffer::Floats(vec![1.0, 0.5])).unwrap();
        assert!(matches!(
            r.labels(),
            Err(RasterError::NonIntegralLabel(v, 1)) if v == 0.5
        ));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let err = LabelRaster::new(3, 2, (0, 0), 1.0, RasterBuffer::Bytes(vec![0; 5]));
        assert!(matches!(err, Err(RasterError::SizeMismatch { len: 5, .. })));
    }

    #[test]
    fn tile_grid_covers_region_exactly() {
        let request = RegionRequest {
            x: 10,
            y: 20,
            width: 25,
            height: 10,
            downsample: 1.0,
            tile_size: 10,
        };
        let tiles = request.tile_grid();
        assert_eq!(tiles.len(), 3);
        let total: u64 = tiles.iter().map(|t| t.width as u64 * t.height as u64).sum();
        assert_eq!(total, request.pixel_count());
        assert_eq!(tiles[2].x, 30);
        assert_eq!(tiles[2].width, 5);
    }

    #[test]
    fn tile_grid_accounts_for_downsample() {
        let request = RegionRequest {
            x: 0,
            y: 0,
            width: 40,
            height: 40,
            downsample: 2.0,
            tile_size: 10,
        };
        let tiles = request.tile_grid();
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[1].x, 20);
        assert_eq!(tiles[1].width, 10);
    }
}
