#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_precision_loss)]
#![warn(clippy::missing_const_for_fn, clippy::approx_constant, clippy::all)]
#![forbid(unsafe_code)]

//! # mkapp: An Approximate Reverse-kNN Metric Index
//!
//! `mkapp` is a disk-page-oriented metric index (an M-tree variant) that
//! answers approximate reverse k-nearest-neighbor queries for query
//! parameters `k <= k_max`. Instead of storing exact k-NN distances for every
//! k, each node and entry stores a compact polynomial model of how the k-NN
//! distance of the objects below it grows with k. It features:
//! - Bulk insertion into a balanced, capacity-bounded tree whose node layout
//!   fits a fixed page size
//! - A curve-fitting step that compresses a vector of exact k-NN distances
//!   into a handful of polynomial coefficients, optionally in log-log space
//! - Branch-and-bound reverse-kNN search that prunes subtrees with the
//!   fitted models instead of exact distances
//! - Pluggable page storage (in-memory or file-backed) and distance functions
//!
//! The index is approximate by design: query results may contain false
//! positives or miss true reverse neighbors, depending on the fit residual.

pub mod core;

// Re-export key types for easier use by library consumers
pub use crate::core::common::{MkAppError, MkAppResult, ObjectId, PageId};
pub use crate::core::indexing::mkapp::{
    FilePageFile, MemoryPageFile, MkAppSettings, MkAppTree, PageFile,
};
pub use crate::core::indexing::ReverseKnnIndex;
pub use crate::core::vector::{DistanceFunction, DistanceMetric, VectorTable};

/// Core result type for the library
pub type Result<T> = std::result::Result<T, MkAppError>;

#[cfg(test)]
mod tests {
    use crate::{DistanceMetric, MemoryPageFile, MkAppSettings, MkAppTree, VectorTable};

    #[test]
    fn basic_bulk_load_and_query() {
        let mut table = VectorTable::new(DistanceMetric::Euclidean);
        table.insert(1, vec![0.0]);
        table.insert(2, vec![1.0]);
        table.insert(3, vec![3.0]);

        let settings = MkAppSettings::builder()
            .k_max(2)
            .degree(1)
            .build()
            .expect("settings should validate");
        let mut tree = MkAppTree::new(settings, table, MemoryPageFile::new(4096));

        tree.insert_all(&[1, 2, 3]).expect("bulk load should succeed");
        assert_eq!(tree.object_count().expect("tree should be readable"), 3);

        let result = tree.reverse_knn_query(2, 1).expect("query should succeed");
        assert!(result.iter().all(|(dist, _)| *dist >= 0.0));
    }
}
