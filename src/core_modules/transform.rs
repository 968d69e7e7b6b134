// THEORY:
// The transformer is the bridge between tile-local pixel coordinates and
// full-image space. It is a pure affine map - scale by the tile's
// downsample factor, then shift by the tile origin - applied to every ring
// of a traced outline. Because later stages only ever see image-space
// geometry, this is the single place placement math can go wrong, which is
// why it stays this small.

use crate::core_modules::contour::{Ring, TracedOutline};
use crate::core_modules::error::GeometryError;
use geo::{LineString, MultiPolygon, Polygon};

/// Maps a traced outline into full-image coordinates:
/// `x' = x * downsample + origin.x`, likewise for y.
pub fn to_image_space(
    outline: &TracedOutline,
    origin: (i64, i64),
    downsample: f64,
) -> Result<MultiPolygon<f64>, GeometryError> {
    if !downsample.is_finite() || downsample <= 0.0 {
        return Err(GeometryError::InvalidDownsample(downsample));
    }

    let polygons = outline
        .polygons
        .iter()
        .map(|(outer, holes)| {
            let exterior = ring_to_line_string(outer, origin, downsample);
            let interiors = holes
                .iter()
                .map(|h| ring_to_line_string(h, origin, downsample))
                .collect();
            Polygon::new(exterior, interiors)
        })
        .collect();

    Ok(MultiPolygon::new(polygons))
}

fn ring_to_line_string(ring: &Ring, origin: (i64, i64), downsample: f64) -> LineString<f64> {
    let coords: Vec<(f64, f64)> = ring
        .points
        .iter()
        .map(|&(x, y)| {
            (
                x as f64 * downsample + origin.0 as f64,
                y as f64 * downsample + origin.1 as f64,
            )
        })
        .collect();
    LineString::from(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::contour::trace;
    use crate::core_modules::label_raster::{LabelRaster, RasterBuffer};
    use crate::core_modules::labeler::{labeler, Connectivity};
    use geo::Area;

    fn unit_outline() -> TracedOutline {
        let raster =
            LabelRaster::new(2, 2, (0, 0), 1.0, RasterBuffer::Bytes(vec![1, 1, 1, 1])).unwrap();
        let components = labeler::label(&raster, Connectivity::Four, Some(0)).unwrap();
        trace(&components[&1][0])
    }

    #[test]
    fn affine_placement_and_scaling() {
        let outline = unit_outline();
        let geom = to_image_space(&outline, (100, 200), 4.0).unwrap();

        // A 2x2 pixel block at downsample 4 covers 8x8 image pixels.
        assert!((geom.unsigned_area() - 64.0).abs() < 1e-9);
        let exterior = geom.0[0].exterior();
        assert!(exterior.0.iter().all(|c| c.x >= 100.0 && c.x <= 108.0));
        assert!(exterior.0.iter().all(|c| c.y >= 200.0 && c.y <= 208.0));
    }

    #[test]
    fn non_positive_downsample_is_rejected() {
        let outline = unit_outline();
        assert!(matches!(
            to_image_space(&outline, (0, 0), 0.0),
            Err(GeometryError::InvalidDownsample(_))
        ));
        assert!(matches!(
            to_image_space(&outline, (0, 0), -2.0),
            Err(GeometryError::InvalidDownsample(_))
        ));
    }
}
