//! MkApp-Tree: a metrical index supporting approximate reverse
//! k-nearest-neighbor queries for query parameters `k <= k_max`.
//!
//! Instead of exact k-NN distances for every k, each node and entry stores a
//! polynomial model of how the k-NN distance of the objects below it grows
//! with k; reverse-kNN search prunes subtrees by comparing a metric lower
//! bound against the model instead of exact distances. Single-object
//! insertion is deliberately unsupported: the models are only meaningful
//! over a batch.

pub mod aggregate;
pub mod approximation;
pub mod capacity;
pub mod entry;
pub mod neighbors;
pub mod node;
pub mod page_io;
pub mod settings;
pub mod tree;

// Re-export key structures for easier access from parent modules.
pub use approximation::KnnDistanceApproximation;
pub use capacity::NodeCapacities;
pub use entry::{DirectoryEntry, LeafEntry};
pub use node::MkAppNode;
pub use page_io::{FilePageFile, MemoryPageFile, PageFile};
pub use settings::{MkAppSettings, MkAppSettingsBuilder};
pub use tree::MkAppTree;

use crate::core::common::{MkAppResult, ObjectId};
use crate::core::indexing::traits::ReverseKnnIndex;
use crate::core::vector::DistanceFunction;

impl<D: DistanceFunction, P: PageFile> ReverseKnnIndex for MkAppTree<D, P> {
    fn insert_all(&mut self, objects: &[ObjectId]) -> MkAppResult<()> {
        MkAppTree::insert_all(self, objects)
    }

    fn reverse_knn_query(
        &self,
        query: ObjectId,
        k: usize,
    ) -> MkAppResult<Vec<(f64, ObjectId)>> {
        MkAppTree::reverse_knn_query(self, query, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::MkAppError;
    use crate::core::vector::{DistanceMetric, VectorTable};
    use approx::assert_relative_eq;

    fn table_of(points: &[(ObjectId, f64)]) -> VectorTable {
        let mut table = VectorTable::new(DistanceMetric::Euclidean);
        for &(id, position) in points {
            table.insert(id, vec![position]);
        }
        table
    }

    fn settings(k_max: usize, degree: usize, log_space: bool) -> MkAppSettings {
        MkAppSettings::builder()
            .k_max(k_max)
            .degree(degree)
            .log_space(log_space)
            .integrity_checks(true)
            .build()
            .unwrap()
    }

    /// Three objects on a line with pairwise distances 1, 2, and 3. The
    /// true 1-NN/2-NN lists are {1, 3}, {1, 2}, and {2, 3}; the leaf models
    /// interpolate those pairs, and the tree summary interpolates the mean
    /// vector [4/3, 8/3].
    #[test]
    fn test_leaf_and_root_models_after_bulk_load() {
        let table = table_of(&[(1, 0.0), (2, 1.0), (3, 3.0)]);
        let mut tree = MkAppTree::new(settings(2, 1, false), table, MemoryPageFile::new(4096));
        tree.insert_all(&[1, 2, 3]).unwrap();

        // Mean vector [4/3, 8/3] fits the line y = (4/3) k.
        let root_model = tree.root_approximation().unwrap();
        assert_relative_eq!(root_model.value_at(1.0), 4.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(root_model.value_at(2.0), 8.0 / 3.0, epsilon = 1e-9);

        // All three objects share the root leaf; each model interpolates
        // the object's own (k, distance) pairs.
        let root_page = tree.root_page_id().unwrap();
        let MkAppNode::Leaf { entries, .. } = tree.page_file().read_node(root_page).unwrap()
        else {
            panic!("three objects should fit one leaf");
        };
        let expected: &[(ObjectId, [f64; 2])] = &[(1, [1.0, 3.0]), (2, [1.0, 2.0]), (3, [2.0, 3.0])];
        for (id, distances) in expected {
            let entry = entries.iter().find(|e| e.object_id == *id).unwrap();
            let model = entry.approximation.as_ref().unwrap();
            assert_relative_eq!(model.value_at(1.0), distances[0], epsilon = 1e-9);
            assert_relative_eq!(model.value_at(2.0), distances[1], epsilon = 1e-9);
        }
    }

    /// A query far from everything: no model admits it, so the result is
    /// empty rather than an error.
    #[test]
    fn test_distant_query_yields_empty_result() {
        let mut table = table_of(&[(1, 0.0), (2, 1.0)]);
        table.insert(9, vec![100.0]);
        let mut tree = MkAppTree::new(settings(2, 1, false), table, MemoryPageFile::new(4096));
        tree.insert_all(&[1, 2]).unwrap();

        let result = tree.reverse_knn_query(9, 1).unwrap();
        assert!(result.is_empty());
    }

    /// Bulk loading a single object succeeds (its models are all-zero), and
    /// the single-object API stays rejected afterwards.
    #[test]
    fn test_single_object_batch_then_single_insert() {
        let table = table_of(&[(1, 0.0)]);
        let mut tree = MkAppTree::new(settings(2, 1, false), table, MemoryPageFile::new(4096));
        tree.insert_all(&[1]).unwrap();
        assert_eq!(tree.object_count().unwrap(), 1);

        let err = tree.insert(2).unwrap_err();
        assert!(matches!(err, MkAppError::UnsupportedOperation(_)));
    }

    /// The capability trait dispatches to the inherent implementations.
    #[test]
    fn test_reverse_knn_index_trait_object_usage() {
        let table = table_of(&[(1, 0.0), (2, 1.0), (3, 3.0)]);
        let tree = MkAppTree::new(settings(2, 1, false), table, MemoryPageFile::new(4096));
        let mut index: Box<dyn ReverseKnnIndex> = Box::new(tree);

        index.insert_all(&[1, 2, 3]).unwrap();
        let result = index.reverse_knn_query(2, 1).unwrap();
        assert!(result.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    /// Non-decreasing true k-NN distances keep the fitted model from
    /// decreasing in k beyond the fit residual.
    #[test]
    fn test_log_space_models_stay_monotone_on_monotone_data() {
        let table = table_of(&[(1, 0.0), (2, 1.0), (3, 3.0), (4, 7.0), (5, 15.0)]);
        let mut tree = MkAppTree::new(settings(3, 1, true), table, MemoryPageFile::new(4096));
        tree.insert_all(&[1, 2, 3, 4, 5]).unwrap();

        let root_page = tree.root_page_id().unwrap();
        let MkAppNode::Leaf { entries, .. } = tree.page_file().read_node(root_page).unwrap()
        else {
            panic!("five objects should fit one leaf");
        };
        for entry in &entries {
            let model = entry.approximation.as_ref().unwrap();
            let values: Vec<f64> =
                (1..=3).map(|k| model.value_at((k as f64).ln()).exp()).collect();
            assert!(
                values.windows(2).all(|w| w[1] >= w[0] - 1e-6),
                "model regressed for object {}: {values:?}",
                entry.object_id
            );
        }
    }

    /// The index works unchanged on top of the file-backed page store.
    #[test]
    fn test_end_to_end_on_a_file_page_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.mkapp");
        let pages = FilePageFile::open(&path, 256).unwrap();

        let table = table_of(&[(1, 0.0), (2, 0.6), (3, 10.0), (4, 10.5), (5, 21.0), (6, 21.7)]);
        let mut tree = MkAppTree::new(settings(2, 1, false), table, pages);
        tree.insert_all(&[1, 2, 3, 4, 5, 6]).unwrap();

        tree.integrity_check().unwrap();
        assert_eq!(tree.object_count().unwrap(), 6);

        // Object 4 sits 0.5 from the query but its modeled 2-NN distance is
        // about 9.9; the far cluster's modeled distances stay below its
        // 11-ish distance to the query.
        let result = tree.reverse_knn_query(3, 2).unwrap();
        let reported: Vec<ObjectId> = result.iter().map(|&(_, id)| id).collect();
        assert!(reported.contains(&4));
        assert!(!reported.contains(&5));
        assert!(!reported.contains(&6));
    }

    /// A second batch refreshes the models of subtrees the batch never
    /// touched, so the stored summaries reflect the grown universe.
    #[test]
    fn test_repeated_batches_refresh_all_models() {
        let table =
            table_of(&[(1, 0.0), (2, 1.0), (3, 3.0), (4, 100.0), (5, 105.0), (6, 115.0)]);
        let mut tree = MkAppTree::new(settings(2, 1, false), table, MemoryPageFile::new(4096));

        tree.insert_all(&[1, 2, 3]).unwrap();
        let first_root = tree.root_approximation().unwrap();
        assert_relative_eq!(first_root.value_at(1.0), 4.0 / 3.0, epsilon = 1e-9);

        tree.insert_all(&[4, 5, 6]).unwrap();
        assert_eq!(tree.object_count().unwrap(), 6);
        // New mean vector over all six objects: [4, 8].
        let second_root = tree.root_approximation().unwrap();
        assert_relative_eq!(second_root.value_at(1.0), 4.0, epsilon = 1e-9);
        assert_relative_eq!(second_root.value_at(2.0), 8.0, epsilon = 1e-9);
        tree.integrity_check().unwrap();
    }
}
