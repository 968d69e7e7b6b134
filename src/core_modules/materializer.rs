// THEORY:
// The materializer is the last stage: it turns accumulated per-class
// geometry into typed objects for the spatial hierarchy. It deliberately
// knows nothing about what an "object" is - a caller-supplied factory owns
// that decision - and nothing about persistence, which belongs to the
// hierarchy. Its whole job is the split policy and the hand-off.
//
// Key architectural principles:
// 1.  **Factory seam**: `ObjectFactory::create` is the only way geometry
//     becomes an object. Annotation vs. detection vs. anything else is the
//     factory's business.
// 2.  **Split policy**: with `split` set, each disjoint part of a class's
//     multi-polygon becomes its own object (keeping its holes); otherwise
//     the class yields one multi-part object. Either way the summed object
//     area equals the class geometry's area.
// 3.  **Provenance**: every object carries the run's provenance tag so a
//     re-run with `delete_existing` can remove its predecessors without
//     touching anything else in the hierarchy.

use crate::core_modules::accumulator::ClassGeometry;
use crate::core_modules::tile_source::ClassId;
use geo::{Area, MultiPolygon};

/// What kind of object a factory produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Annotation,
    Detection,
    Tile,
    Cell,
}

/// Identifies which pipeline run created an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvenanceTag(pub String);

impl Default for ProvenanceTag {
    fn default() -> Self {
        Self("tile_tracer".to_string())
    }
}

/// Final output unit: geometry plus class, kind and provenance.
#[derive(Debug, Clone)]
pub struct MaterializedObject {
    pub geometry: MultiPolygon<f64>,
    pub class_id: ClassId,
    pub kind: ObjectKind,
    pub provenance: ProvenanceTag,
}

impl MaterializedObject {
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Caller-supplied capability that turns geometry into a typed object.
pub trait ObjectFactory: Send + Sync {
    fn create(
        &self,
        geometry: MultiPolygon<f64>,
        class_id: ClassId,
        provenance: &ProvenanceTag,
    ) -> MaterializedObject;
}

/// Produces annotation objects.
pub struct AnnotationFactory;

impl ObjectFactory for AnnotationFactory {
    fn create(
        &self,
        geometry: MultiPolygon<f64>,
        class_id: ClassId,
        provenance: &ProvenanceTag,
    ) -> MaterializedObject {
        MaterializedObject {
            geometry,
            class_id,
            kind: ObjectKind::Annotation,
            provenance: provenance.clone(),
        }
    }
}

/// Produces detection objects.
pub struct DetectionFactory;

impl ObjectFactory for DetectionFactory {
    fn create(
        &self,
        geometry: MultiPolygon<f64>,
        class_id: ClassId,
        provenance: &ProvenanceTag,
    ) -> MaterializedObject {
        MaterializedObject {
            geometry,
            class_id,
            kind: ObjectKind::Detection,
            provenance: provenance.clone(),
        }
    }
}

/// Options recognized at materialization time.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// One object per disjoint part instead of one multi-part object.
    pub split: bool,
    /// Remove earlier objects with the same provenance before inserting.
    pub delete_existing: bool,
    pub provenance: ProvenanceTag,
}

/// Converts accumulated class geometry into objects via the factory.
/// Classes arrive sorted, so output order is deterministic.
pub fn materialize(
    class_geometries: Vec<ClassGeometry>,
    options: &MaterializeOptions,
    factory: &dyn ObjectFactory,
) -> Vec<MaterializedObject> {
    let mut objects = Vec::new();
    for class_geometry in class_geometries {
        if class_geometry.geometry.0.is_empty() {
            continue;
        }
        if options.split {
            for polygon in class_geometry.geometry {
                objects.push(factory.create(
                    MultiPolygon::new(vec![polygon]),
                    class_geometry.class_id,
                    &options.provenance,
                ));
            }
        } else {
            objects.push(factory.create(
                class_geometry.geometry,
                class_geometry.class_id,
                &options.provenance,
            ));
        }
    }
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn two_part_class(class_id: ClassId) -> ClassGeometry {
        let part = |x0: f64| {
            Polygon::new(
                LineString::from(vec![(x0, 0.0), (x0 + 2.0, 0.0), (x0 + 2.0, 2.0), (x0, 2.0)]),
                vec![],
            )
        };
        ClassGeometry {
            class_id,
            geometry: MultiPolygon::new(vec![part(0.0), part(10.0)]),
            generation: 2,
            pixel_area: 8.0,
        }
    }

    #[test]
    fn split_produces_one_object_per_part() {
        let options = MaterializeOptions {
            split: true,
            ..Default::default()
        };
        let objects = materialize(vec![two_part_class(ClassId(1))], &options, &AnnotationFactory);
        assert_eq!(objects.len(), 2);
        assert!(objects.iter().all(|o| o.geometry.0.len() == 1));
        let total: f64 = objects.iter().map(|o| o.area()).sum();
        assert!((total - 8.0).abs() < 1e-9);
    }

    #[test]
    fn unsplit_keeps_one_multi_part_object_per_class() {
        let options = MaterializeOptions::default();
        let objects = materialize(
            vec![two_part_class(ClassId(1)), two_part_class(ClassId(2))],
            &options,
            &DetectionFactory,
        );
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].geometry.0.len(), 2);
        assert_eq!(objects[0].kind, ObjectKind::Detection);
        assert!((objects[0].area() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn empty_class_geometry_yields_nothing() {
        let empty = ClassGeometry {
            class_id: ClassId(3),
            geometry: MultiPolygon::new(Vec::new()),
            generation: 0,
            pixel_area: 0.0,
        };
        let objects = materialize(vec![empty], &MaterializeOptions::default(), &AnnotationFactory);
        assert!(objects.is_empty());
    }
}
