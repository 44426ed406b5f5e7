//! Capability traits implemented by the index structures in this crate.

use crate::core::common::{MkAppResult, ObjectId};

/// An index that answers approximate reverse k-nearest-neighbor queries over
/// a bulk-loaded object set.
///
/// Bulk insertion and querying are two capabilities of the same seam:
/// `insert_all` places a batch and refreshes the stored distance models,
/// `reverse_knn_query` reads them. Implementations may reject single-object
/// insertion entirely.
pub trait ReverseKnnIndex {
    /// Inserts a batch of objects and recomputes the k-NN distance models.
    fn insert_all(&mut self, objects: &[ObjectId]) -> MkAppResult<()>;

    /// Returns every object for which `query` is among its approximate k
    /// nearest neighbors, ascending by true distance to `query`.
    fn reverse_knn_query(
        &self,
        query: ObjectId,
        k: usize,
    ) -> MkAppResult<Vec<(f64, ObjectId)>>;
}
