//! Directory and leaf entries of the MkApp-Tree, and their byte-size math.

use serde::{Deserialize, Serialize};

use crate::core::common::{ObjectId, PageId};

use super::approximation::KnnDistanceApproximation;

/// Bytes of an object id field in the page layout.
pub(crate) const ID_SIZE: usize = 8;
/// Bytes of a page id field in the page layout.
pub(crate) const PAGE_ID_SIZE: usize = 8;
/// Bytes of a distance value in the page layout.
pub(crate) const DISTANCE_SIZE: usize = 8;
/// Bytes of one polynomial coefficient in the page layout.
pub(crate) const COEFFICIENT_SIZE: usize = 8;
/// Per-entry bookkeeping: the stored coefficient count (u16).
pub(crate) const ENTRY_BOOKKEEPING: usize = 2;

/// Routing entry of a directory node, covering one child subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Routing object at the center of the covering ball.
    pub routing_id: ObjectId,
    /// Distance from the routing object to the parent node's routing object.
    pub parent_distance: f64,
    /// Page of the child node.
    pub child_page: PageId,
    /// Upper bound on the distance from the routing object to any object in
    /// the subtree.
    pub covering_radius: f64,
    /// k-NN distance model summarizing the subtree; `None` only between raw
    /// placement and the propagation pass of a batch insertion.
    pub approximation: Option<KnnDistanceApproximation>,
}

/// Entry of a leaf node, representing a single indexed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    /// The object this entry represents; also its own routing object.
    pub object_id: ObjectId,
    /// Distance to the owning node's routing object.
    pub parent_distance: f64,
    /// k-NN distance model for this object.
    pub approximation: Option<KnnDistanceApproximation>,
}

/// Byte size of a serialized directory entry for the given polynomial
/// degree: routing id, child page id, covering radius, parent distance,
/// `degree + 1` coefficients, and the coefficient count.
#[must_use]
pub const fn directory_entry_size(degree: usize) -> usize {
    ID_SIZE
        + PAGE_ID_SIZE
        + DISTANCE_SIZE
        + DISTANCE_SIZE
        + (degree + 1) * COEFFICIENT_SIZE
        + ENTRY_BOOKKEEPING
}

/// Byte size of a serialized leaf entry for the given polynomial degree:
/// object id, parent distance, `degree + 1` coefficients, and the
/// coefficient count.
#[must_use]
pub const fn leaf_entry_size(degree: usize) -> usize {
    ID_SIZE + DISTANCE_SIZE + (degree + 1) * COEFFICIENT_SIZE + ENTRY_BOOKKEEPING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_sizes_grow_with_degree() {
        assert!(directory_entry_size(2) > directory_entry_size(1));
        assert!(leaf_entry_size(2) > leaf_entry_size(1));
        assert_eq!(directory_entry_size(3) - directory_entry_size(2), COEFFICIENT_SIZE);
    }

    #[test]
    fn test_directory_entries_are_larger_than_leaf_entries() {
        // Directory entries additionally carry a child page id and a
        // covering radius.
        for degree in 0..4 {
            assert_eq!(
                directory_entry_size(degree) - leaf_entry_size(degree),
                PAGE_ID_SIZE + DISTANCE_SIZE
            );
        }
    }
}
