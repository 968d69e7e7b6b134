// THEORY:
// The `RegionAccumulator` is the only shared, mutable state in the
// pipeline: the per-class geometry built up as tiles stream in, in any
// order, from any number of workers.
//
// Key architectural principles:
// 1.  **Topological union, not concatenation**: two partial regions meeting
//     exactly at a tile edge must fuse into one polygon. Every contribution
//     is combined with a boolean union, after snapping coordinates to a
//     tolerance grid so floating-point jitter at shared edges cannot leave
//     micro-gaps or slivers.
// 2.  **One lock per class**: accumulation into a class serializes on that
//     class's own mutex, so tiles of different classes never wait on each
//     other. The registry map itself is locked only long enough to fetch or
//     create a class slot.
// 3.  **Repair, then drop, never crash**: if a union result fails validity
//     it is healed by a self-union, which rebuilds the ring structure and
//     sheds degenerate slivers; failing that, the operands are healed and
//     re-merged one polygon at a time. Only if no step recovers a valid
//     result is the contribution dropped, with a warning and a counter. A
//     bad tile must cost at most its own contribution.
// 4.  **Observable progress**: each class carries a generation counter and
//     the pixel area contributed so far, which is what the conservation
//     tests check materialized geometry against.

use crate::core_modules::tile_source::ClassId;
use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon, Validation};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// The accumulated, possibly multi-part geometry for one class.
#[derive(Debug, Clone)]
pub struct ClassGeometry {
    pub class_id: ClassId,
    pub geometry: MultiPolygon<f64>,
    /// Bumped once per successfully merged contribution.
    pub generation: u64,
    /// Total pixel area merged in, in image-space units (pixel count times
    /// downsample squared per tile).
    pub pixel_area: f64,
}

pub struct RegionAccumulator {
    classes: Mutex<HashMap<ClassId, Arc<Mutex<ClassGeometry>>>>,
    /// Coordinates are rounded to multiples of this before unioning.
    /// Non-positive disables snapping.
    snap_tolerance: f64,
    dropped: AtomicUsize,
}

impl RegionAccumulator {
    pub fn new(snap_tolerance: f64) -> Self {
        Self {
            classes: Mutex::new(HashMap::new()),
            snap_tolerance,
            dropped: AtomicUsize::new(0),
        }
    }

    fn slot(&self, class_id: ClassId) -> Arc<Mutex<ClassGeometry>> {
        let mut classes = self.classes.lock().unwrap();
        classes
            .entry(class_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ClassGeometry {
                    class_id,
                    geometry: MultiPolygon::new(Vec::new()),
                    generation: 0,
                    pixel_area: 0.0,
                }))
            })
            .clone()
    }

    /// Unions one tile's contribution for `class_id` into the running
    /// geometry. `pixel_area` is the contribution's area in image-space
    /// units. Holding only this class's lock, so other classes proceed in
    /// parallel.
    pub fn accumulate(&self, class_id: ClassId, geometry: MultiPolygon<f64>, pixel_area: f64) {
        if geometry.0.is_empty() {
            return;
        }
        let incoming = snap(&geometry, self.snap_tolerance);

        let slot = self.slot(class_id);
        let mut state = slot.lock().unwrap();

        if state.generation == 0 {
            state.geometry = incoming;
        } else {
            let merged = state.geometry.union(&incoming);
            if merged.is_valid() {
                state.geometry = merged;
            } else {
                warn!(class = class_id.0, "union produced invalid geometry, repairing");
                match repair_union(&merged, &state.geometry, &incoming) {
                    Some(repaired) => state.geometry = repaired,
                    None => {
                        warn!(class = class_id.0, "repair failed, dropping tile contribution");
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
        }

        state.generation += 1;
        state.pixel_area += pixel_area;
        debug!(
            class = class_id.0,
            generation = state.generation,
            parts = state.geometry.0.len(),
            "merged tile contribution"
        );
    }

    /// Drains every class's accumulated geometry, ordered by class id.
    /// Called exactly once, at finalization.
    pub fn take_all(&self) -> Vec<ClassGeometry> {
        let mut classes = self.classes.lock().unwrap();
        let mut out: Vec<ClassGeometry> = classes
            .drain()
            .map(|(_, slot)| slot.lock().unwrap().clone())
            .collect();
        out.sort_by_key(|cg| cg.class_id);
        out
    }

    /// Discards all accumulated state; used on cancellation.
    pub fn clear(&self) {
        self.classes.lock().unwrap().clear();
    }

    pub fn class_count(&self) -> usize {
        self.classes.lock().unwrap().len()
    }

    /// Number of tile contributions dropped by failed repairs.
    pub fn dropped_contributions(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Heals a geometry by unioning it with itself. The overlay rebuilds every
/// ring from its raw segments, which discards zero-width spikes, duplicate
/// vertices and self-touching runs while preserving the covered area.
fn heal(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    geometry.union(geometry)
}

/// Fallback merge for a union that came out invalid. First heals the bad
/// result directly; if that is not enough, heals both operands and redoes
/// the merge one incoming polygon at a time, healing after each step.
/// Returns `None` only if no step recovers a valid geometry.
fn repair_union(
    invalid: &MultiPolygon<f64>,
    current: &MultiPolygon<f64>,
    incoming: &MultiPolygon<f64>,
) -> Option<MultiPolygon<f64>> {
    let healed = heal(invalid);
    if healed.is_valid() {
        return Some(healed);
    }

    let mut merged = heal(current);
    for polygon in incoming {
        let part = heal(&MultiPolygon::new(vec![polygon.clone()]));
        let mut step = merged.union(&part);
        if !step.is_valid() {
            step = heal(&step);
        }
        if !step.is_valid() {
            return None;
        }
        merged = step;
    }
    Some(merged)
}

fn snap(geometry: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    if tolerance <= 0.0 {
        return geometry.clone();
    }
    let snap_ring = |ring: &LineString<f64>| -> LineString<f64> {
        LineString::new(
            ring.0
                .iter()
                .map(|c| Coord {
                    x: (c.x / tolerance).round() * tolerance,
                    y: (c.y / tolerance).round() * tolerance,
                })
                .collect(),
        )
    };
    MultiPolygon::new(
        geometry
            .iter()
            .map(|p| {
                Polygon::new(
                    snap_ring(p.exterior()),
                    p.interiors().iter().map(snap_ring).collect(),
                )
            })
            .collect(),
    )
}
