//! Aggregation of exact k-NN distance lists into per-k means.

use std::collections::HashMap;

use crate::core::common::{MkAppError, MkAppResult, ObjectId};

/// Computes, for every k in `1..=k_max`, the mean k-th nearest-neighbor
/// distance across `ids`.
///
/// An id contributes at depth k only if its recorded list holds at least k
/// distances; a depth no id covers averages to 0.0, matching a universe too
/// small to have that many neighbors. Passing no ids at all is a caller bug
/// and fails with [`MkAppError::EmptyInput`] rather than dividing by zero.
/// A singleton id set is aggregated the same way, the mean being the single
/// recorded list.
pub fn mean_knn_distances(
    ids: &[ObjectId],
    knn_lists: &HashMap<ObjectId, Vec<f64>>,
    k_max: usize,
) -> MkAppResult<Vec<f64>> {
    if ids.is_empty() {
        return Err(MkAppError::EmptyInput);
    }

    let mut sums = vec![0.0; k_max];
    let mut counts = vec![0_usize; k_max];
    for id in ids {
        let Some(distances) = knn_lists.get(id) else {
            continue;
        };
        for (k, &dist) in distances.iter().take(k_max).enumerate() {
            sums[k] += dist;
            counts[k] += 1;
        }
    }

    Ok(sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| if count == 0 { 0.0 } else { sum / count as f64 })
        .collect())
}
