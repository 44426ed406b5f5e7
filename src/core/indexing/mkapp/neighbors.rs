//! Batch k-nearest-neighbor computation used to seed the approximations.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::common::{MkAppResult, ObjectId};
use crate::core::vector::DistanceFunction;

/// Collaborator producing, in one amortized call, the ascending true k-NN
/// distance list for every requested object. The object itself is excluded
/// from its own neighborhood.
pub trait BatchKnn {
    fn batch_knn(
        &self,
        targets: &[ObjectId],
        k: usize,
    ) -> MkAppResult<HashMap<ObjectId, Vec<f64>>>;
}

/// Brute-force batch k-NN over a fixed object universe.
pub struct SequentialScanKnn<'a, D: DistanceFunction> {
    distance: &'a D,
    universe: &'a [ObjectId],
}

impl<'a, D: DistanceFunction> SequentialScanKnn<'a, D> {
    pub const fn new(distance: &'a D, universe: &'a [ObjectId]) -> Self {
        Self { distance, universe }
    }
}

impl<D: DistanceFunction> BatchKnn for SequentialScanKnn<'_, D> {
    fn batch_knn(
        &self,
        targets: &[ObjectId],
        k: usize,
    ) -> MkAppResult<HashMap<ObjectId, Vec<f64>>> {
        let mut result = HashMap::with_capacity(targets.len());
        for &target in targets {
            let mut distances = Vec::with_capacity(self.universe.len().saturating_sub(1));
            for &other in self.universe {
                if other == target {
                    continue;
                }
                distances.push(self.distance.distance(target, other)?);
            }
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            distances.truncate(k);
            result.insert(target, distances);
        }
        Ok(result)
    }
}
