// THEORY:
// The spatial object hierarchy is the pipeline's downstream collaborator.
// The pipeline holds no back-reference into it and mutates it exactly once
// per run, at finalization, through this trait. A `false` from
// `insert_objects` or `replace_objects` (a read-only project, say) is a
// recoverable condition reported upward, never a panic - and a refusal must
// leave the hierarchy exactly as it was, including any objects a previous
// run inserted under the same tag.

use crate::core_modules::materializer::{MaterializedObject, ProvenanceTag};

/// The destination for materialized objects.
pub trait ObjectHierarchy {
    /// Inserts the objects, returning `false` if the hierarchy refuses them
    /// (whether the refusal is all-or-nothing is the hierarchy's contract).
    fn insert_objects(&mut self, objects: &[MaterializedObject]) -> bool;

    /// Removes every object previously inserted under `tag`.
    fn remove_objects_by_provenance(&mut self, tag: &ProvenanceTag);

    /// Atomically swaps every object under `tag` for `objects`. Returns
    /// `false` and leaves the hierarchy untouched if the swap is refused;
    /// the superseded objects must never be removed without the new ones
    /// going in.
    fn replace_objects(&mut self, tag: &ProvenanceTag, objects: &[MaterializedObject]) -> bool;
}

/// A plain in-memory hierarchy, used by the tests and the example runner.
#[derive(Default)]
pub struct MemoryHierarchy {
    objects: Vec<MaterializedObject>,
    read_only: bool,
}

impl MemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn objects(&self) -> &[MaterializedObject] {
        &self.objects
    }
}

impl ObjectHierarchy for MemoryHierarchy {
    fn insert_objects(&mut self, objects: &[MaterializedObject]) -> bool {
        if self.read_only {
            return false;
        }
        self.objects.extend_from_slice(objects);
        true
    }

    fn remove_objects_by_provenance(&mut self, tag: &ProvenanceTag) {
        if self.read_only {
            return;
        }
        self.objects.retain(|o| o.provenance != *tag);
    }

    fn replace_objects(&mut self, tag: &ProvenanceTag, objects: &[MaterializedObject]) -> bool {
        if self.read_only {
            return false;
        }
        self.objects.retain(|o| o.provenance != *tag);
        self.objects.extend_from_slice(objects);
        true
    }
}
