//! Node capacity planning against a fixed page size.

use crate::core::common::{MkAppError, MkAppResult};

/// Capacities below this threshold trigger an advisory warning.
const LOW_CAPACITY_THRESHOLD: usize = 10;

/// Maximum number of entries a directory respectively leaf node may hold.
///
/// The two differ because directory and leaf entries serialize to different
/// byte sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacities {
    pub dir_capacity: usize,
    pub leaf_capacity: usize,
}

impl NodeCapacities {
    /// Computes the entry capacities that fit the page size.
    ///
    /// The capacity for each node kind is the largest `n` with
    /// `overhead + n * entry_size <= page_size`. A capacity of one or less
    /// cannot hold a routing entry plus a sibling and is rejected as
    /// [`MkAppError::PageTooSmall`]; unusually small capacities are allowed
    /// but logged.
    pub fn compute(
        page_size: usize,
        overhead: usize,
        dir_entry_size: usize,
        leaf_entry_size: usize,
    ) -> MkAppResult<Self> {
        debug_assert!(dir_entry_size > 0 && leaf_entry_size > 0);
        if page_size < overhead {
            return Err(MkAppError::PageTooSmall { page_size });
        }

        let dir_capacity = (page_size - overhead) / dir_entry_size;
        if dir_capacity <= 1 {
            return Err(MkAppError::PageTooSmall { page_size });
        }
        if dir_capacity < LOW_CAPACITY_THRESHOLD {
            log::warn!(
                "page size is chosen too small: maximum number of entries in a directory node = {dir_capacity}"
            );
        }

        let leaf_capacity = (page_size - overhead) / leaf_entry_size;
        if leaf_capacity <= 1 {
            return Err(MkAppError::PageTooSmall { page_size });
        }
        if leaf_capacity < LOW_CAPACITY_THRESHOLD {
            log::warn!(
                "page size is chosen too small: maximum number of entries in a leaf node = {leaf_capacity}"
            );
        }

        Ok(Self { dir_capacity, leaf_capacity })
    }
}
