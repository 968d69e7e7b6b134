// THEORY:
// The `labeler` is the first analysis stage: it turns one tile's label
// raster into connected components via flood fill with a visited grid.
//
// Key architectural principles & algorithm steps:
// 1.  **One scan, many seeds**: the raster is scanned row-major; every
//     unvisited non-background pixel seeds a region grow that collects all
//     same-label pixels reachable under the active connectivity rule.
// 2.  **Connectivity is a parameter**: 4-connectivity counts only
//     edge-adjacent neighbors, 8-connectivity also counts corners. The two
//     rules give different components for diagonal shapes, so the choice is
//     made by the caller, not baked in.
// 3.  **Boundary awareness**: while growing, the labeler records which tile
//     edges a component touches. The region accumulator later uses these
//     flags to know which components are candidates for cross-tile merging.
// 4.  **Stateless utility**: like the rest of the per-tile stages, labeling
//     takes one raster and produces one result; it holds no state between
//     tiles.

use crate::core_modules::error::RasterError;
use crate::core_modules::label_raster::LabelRaster;
use std::collections::HashMap;

/// Neighborhood rule for grouping same-label pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    Eight,
}

impl Connectivity {
    fn offsets(self) -> &'static [(i32, i32)] {
        match self {
            Connectivity::Four => &[(0, 1), (0, -1), (1, 0), (-1, 0)],
            Connectivity::Eight => &[
                (0, 1),
                (0, -1),
                (1, 0),
                (-1, 0),
                (1, 1),
                (1, -1),
                (-1, 1),
                (-1, -1),
            ],
        }
    }
}

/// Which edges of the tile a component touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeTouch {
    pub top: bool,
    pub bottom: bool,
    pub left: bool,
    pub right: bool,
}

impl EdgeTouch {
    pub fn any(self) -> bool {
        self.top || self.bottom || self.left || self.right
    }
}

/// A maximal set of same-label, mutually connected pixels within one tile.
#[derive(Debug, Clone)]
pub struct ConnectedComponent {
    /// The raw label value shared by every pixel of the component.
    pub label: i32,
    /// Tile-local coordinates of every pixel in the component.
    pub pixels: Vec<(u32, u32)>,
    /// Tile-local bounding box, as (top-left, bottom-right) inclusive.
    pub bounding_box: ((u32, u32), (u32, u32)),
    /// Which tile edges the component reaches.
    pub edge_touch: EdgeTouch,
}

impl ConnectedComponent {
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Bounding-box extent as (width, height) in pixels.
    pub fn extent(&self) -> (u32, u32) {
        let ((min_x, min_y), (max_x, max_y)) = self.bounding_box;
        (max_x - min_x + 1, max_y - min_y + 1)
    }
}

pub mod labeler {
    use super::*;

    /// Finds every connected component in the raster, grouped by label.
    /// Pixels matching `background` (if any) are skipped entirely.
    pub fn label(
        raster: &LabelRaster,
        connectivity: Connectivity,
        background: Option<i32>,
    ) -> Result<HashMap<i32, Vec<ConnectedComponent>>, RasterError> {
        let labels = raster.labels()?;
        let width = raster.width as usize;
        let height = raster.height as usize;

        let mut visited = vec![false; width * height];
        let mut components: HashMap<i32, Vec<ConnectedComponent>> = HashMap::new();

        for seed in 0..width * height {
            if visited[seed] {
                continue;
            }
            let value = labels[seed];
            if background == Some(value) {
                visited[seed] = true;
                continue;
            }

            // Grow the region from this seed, same idiom as heatmap blob
            // growing: an explicit stack plus the shared visited grid.
            let mut stack = vec![seed];
            visited[seed] = true;

            let mut pixels: Vec<(u32, u32)> = Vec::new();
            let mut min_x = u32::MAX;
            let mut min_y = u32::MAX;
            let mut max_x = 0u32;
            let mut max_y = 0u32;
            let mut edge_touch = EdgeTouch::default();

            while let Some(current) = stack.pop() {
                let x = (current % width) as u32;
                let y = (current / width) as u32;
                pixels.push((x, y));

                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                edge_touch.top |= y == 0;
                edge_touch.bottom |= y == raster.height - 1;
                edge_touch.left |= x == 0;
                edge_touch.right |= x == raster.width - 1;

                for (dx, dy) in connectivity.offsets() {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    let nidx = (ny as usize) * width + nx as usize;
                    if !visited[nidx] && labels[nidx] == value {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }

            components.entry(value).or_default().push(ConnectedComponent {
                label: value,
                pixels,
                bounding_box: ((min_x, min_y), (max_x, max_y)),
                edge_touch,
            });
        }

        Ok(components)
    }
}
