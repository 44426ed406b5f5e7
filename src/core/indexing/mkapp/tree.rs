//! The MkApp-Tree: bulk insertion, approximation propagation, and
//! reverse-kNN search.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::core::common::{MkAppError, MkAppResult, ObjectId, PageId};
use crate::core::math::polynomial;
use crate::core::vector::DistanceFunction;

use super::aggregate::mean_knn_distances;
use super::approximation::KnnDistanceApproximation;
use super::capacity::NodeCapacities;
use super::entry::{directory_entry_size, leaf_entry_size, DirectoryEntry, LeafEntry};
use super::neighbors::{BatchKnn, SequentialScanKnn};
use super::node::MkAppNode;
use super::page_io::PageFile;
use super::settings::MkAppSettings;

/// Fixed per-node overhead of the page layout: node tag, page id, entry count.
pub(crate) const NODE_OVERHEAD: usize = 1 + 8 + 4;

/// Tolerance for the distance consistency checks.
const DISTANCE_EPSILON: f64 = 1e-9;

/// Priority queue item for the branch-and-bound search: a page together with
/// the lower bound on the distance from the query to anything stored below
/// it.
#[derive(Debug, Clone, PartialEq)]
struct SearchCandidate {
    lower_bound: f64,
    page_id: PageId,
}

impl Eq for SearchCandidate {}

impl Ord for SearchCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (smallest lower bound first)
        other
            .lower_bound
            .partial_cmp(&self.lower_bound)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for SearchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One directory level of a descent path: the node's page, its routing
/// object (`None` at the root), and the entry index the descent followed.
struct PathStep {
    page_id: PageId,
    routing_id: Option<ObjectId>,
    entry_index: usize,
}

/// A metrical index structure based on the M-Tree that supports approximate
/// reverse k-nearest-neighbor queries for query parameters `k <= k_max`.
///
/// Objects are placed through the usual M-tree mechanics; afterwards a
/// post-order pass fits one polynomial k-NN distance model per entry.
/// Queries never touch exact k-NN distances, only the models, so results
/// carry the approximation's error in both directions.
#[derive(Debug)]
pub struct MkAppTree<D: DistanceFunction, P: PageFile> {
    settings: MkAppSettings,
    distance: D,
    pages: P,
    root: Option<PageId>,
    root_approximation: Option<KnnDistanceApproximation>,
    capacities: Option<NodeCapacities>,
}

impl<D: DistanceFunction, P: PageFile> MkAppTree<D, P> {
    /// Creates an empty tree over the given distance function and page file.
    ///
    /// Node capacities are derived from the page size on the first
    /// `insert_all` call.
    pub fn new(settings: MkAppSettings, distance: D, pages: P) -> Self {
        Self {
            settings,
            distance,
            pages,
            root: None,
            root_approximation: None,
            capacities: None,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &MkAppSettings {
        &self.settings
    }

    /// The value of the `k_max` parameter.
    #[must_use]
    pub const fn k_max(&self) -> usize {
        self.settings.k_max
    }

    /// The model summarizing the whole tree, fitted by the last batch.
    #[must_use]
    pub const fn root_approximation(&self) -> Option<&KnnDistanceApproximation> {
        self.root_approximation.as_ref()
    }

    /// Node capacities, once initialized by the first batch.
    #[must_use]
    pub const fn capacities(&self) -> Option<NodeCapacities> {
        self.capacities
    }

    /// The page holding the root node, once the tree has one.
    #[must_use]
    pub const fn root_page_id(&self) -> Option<PageId> {
        self.root
    }

    /// Read-only access to the underlying page file.
    #[must_use]
    pub const fn page_file(&self) -> &P {
        &self.pages
    }

    /// Number of objects stored in the tree.
    pub fn object_count(&self) -> MkAppResult<usize> {
        match self.root {
            Some(root) => Ok(self.collect_leaf_ids(root)?.len()),
            None => Ok(0),
        }
    }

    /// Single-object insertion is not supported by this index; distance
    /// models are only meaningful over a batch.
    pub fn insert(&mut self, _object: ObjectId) -> MkAppResult<()> {
        Err(MkAppError::UnsupportedOperation(
            "insertion of single objects is not supported",
        ))
    }

    /// Single-object pre-insertion is not supported by this index.
    pub fn pre_insert(&mut self, _object: ObjectId) -> MkAppResult<()> {
        Err(MkAppError::UnsupportedOperation(
            "insertion of single objects is not supported",
        ))
    }

    /// Inserts a batch of objects and refreshes every stored k-NN distance
    /// model.
    ///
    /// Placement goes through the M-tree mechanics object by object; the
    /// batch k-NN collaborator then supplies true neighbor distances, and a
    /// post-order pass refits the model of every entry bottom-up. An error
    /// during the pass aborts the batch without committing any partial
    /// model updates.
    pub fn insert_all(&mut self, objects: &[ObjectId]) -> MkAppResult<()> {
        if objects.is_empty() {
            return Ok(());
        }
        log::debug!("insert {} objects", objects.len());

        if self.capacities.is_none() {
            self.initialize_capacities()?;
        }

        for &object in objects {
            self.insert_object(object)?;
        }

        let root = self
            .root
            .ok_or_else(|| MkAppError::TreeLogic("no root after placement".into()))?;

        // The scan covers the whole stored universe, not just this batch, so
        // models of untouched subtrees refit correctly on repeated batches.
        let all_ids = self.collect_leaf_ids(root)?;
        let knn_lists = SequentialScanKnn::new(&self.distance, &all_ids)
            .batch_knn(&all_ids, self.settings.k_max + 1)?;

        // Two-phase: stage every refreshed node first, write only on full
        // success.
        let mut staged = Vec::new();
        let root_approximation = self.adjust_approximations(root, &knn_lists, &mut staged)?;
        for node in &staged {
            self.pages.write_node(node)?;
        }
        self.root_approximation = Some(root_approximation);

        if self.settings.integrity_checks {
            self.integrity_check()?;
        }
        Ok(())
    }

    /// Performs a reverse k-nearest-neighbor query for the given object id.
    ///
    /// Returns `(distance, object)` pairs ascending by true distance to the
    /// query object. There is no exact refinement pass: an object is
    /// reported exactly when its distance to the query does not exceed its
    /// modeled k-NN distance.
    pub fn reverse_knn_query(
        &self,
        query: ObjectId,
        k: usize,
    ) -> MkAppResult<Vec<(f64, ObjectId)>> {
        if k < 1 || k > self.settings.k_max {
            return Err(MkAppError::InvalidK { k, k_max: self.settings.k_max });
        }
        let Some(root) = self.root else {
            return Ok(Vec::new());
        };

        let mut result: Vec<(f64, ObjectId)> = Vec::new();
        let mut queue = BinaryHeap::new();
        queue.push(SearchCandidate { lower_bound: 0.0, page_id: root });

        while let Some(candidate) = queue.pop() {
            match self.pages.read_node(candidate.page_id)? {
                MkAppNode::Directory { entries, .. } => {
                    for entry in &entries {
                        let distance = self.distance.distance(entry.routing_id, query)?;
                        let lower_bound = if entry.covering_radius > distance {
                            0.0
                        } else {
                            distance - entry.covering_radius
                        };
                        let approx_value =
                            self.approximated_value_at(entry.approximation.as_ref(), k)?;
                        if lower_bound <= approx_value {
                            queue.push(SearchCandidate { lower_bound, page_id: entry.child_page });
                        }
                    }
                }
                MkAppNode::Leaf { entries, .. } => {
                    for entry in &entries {
                        let distance = self.distance.distance(entry.object_id, query)?;
                        let approx_value =
                            self.approximated_value_at(entry.approximation.as_ref(), k)?;
                        if distance <= approx_value {
                            result.push((distance, entry.object_id));
                        }
                    }
                }
            }
        }

        result.sort_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(&b.1))
        });
        Ok(result)
    }

    /// Full structural consistency check; expensive, gated behind the
    /// `integrity_checks` setting after batches but callable directly.
    pub fn integrity_check(&self) -> MkAppResult<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        let capacities = self
            .capacities
            .ok_or_else(|| MkAppError::TreeLogic("capacities not initialized".into()))?;
        self.check_node(root, None, capacities)
    }

    // --- Capacity initialization ---

    /// Determines directory and leaf capacities from the page size; runs
    /// once, on the first batch.
    fn initialize_capacities(&mut self) -> MkAppResult<()> {
        let capacities = NodeCapacities::compute(
            self.pages.page_size(),
            NODE_OVERHEAD,
            directory_entry_size(self.settings.degree),
            leaf_entry_size(self.settings.degree),
        )?;
        log::debug!(
            "directory capacity: {}, leaf capacity: {}",
            capacities.dir_capacity,
            capacities.leaf_capacity
        );
        self.capacities = Some(capacities);
        Ok(())
    }

    // --- Base M-tree placement ---

    /// Places one object: descend by subtree choice, append a leaf entry,
    /// split on overflow.
    fn insert_object(&mut self, object: ObjectId) -> MkAppResult<()> {
        let capacities = self
            .capacities
            .ok_or_else(|| MkAppError::TreeLogic("capacities not initialized".into()))?;

        let Some(root) = self.root else {
            // First object: the tree starts as a single root leaf.
            let page_id = self.pages.allocate()?;
            let node = MkAppNode::Leaf {
                page_id,
                entries: vec![LeafEntry {
                    object_id: object,
                    parent_distance: 0.0,
                    approximation: None,
                }],
            };
            self.pages.write_node(&node)?;
            self.root = Some(page_id);
            return Ok(());
        };

        let mut path: Vec<PathStep> = Vec::new();
        let mut current = root;
        let mut routing: Option<ObjectId> = None;
        loop {
            match self.pages.read_node(current)? {
                MkAppNode::Leaf { page_id, mut entries } => {
                    let parent_distance = match routing {
                        Some(routing_id) => self.distance.distance(object, routing_id)?,
                        None => 0.0,
                    };
                    entries.push(LeafEntry {
                        object_id: object,
                        parent_distance,
                        approximation: None,
                    });
                    let node = MkAppNode::Leaf { page_id, entries };
                    if node.num_entries() > capacities.leaf_capacity {
                        self.split(node, path)?;
                    } else {
                        self.pages.write_node(&node)?;
                    }
                    return Ok(());
                }
                MkAppNode::Directory { page_id, mut entries } => {
                    let (entry_index, distance) = self.choose_subtree(&entries, object)?;
                    let chosen = &mut entries[entry_index];
                    if distance > chosen.covering_radius {
                        chosen.covering_radius = distance;
                    }
                    let child = chosen.child_page;
                    let child_routing = chosen.routing_id;
                    self.pages.write_node(&MkAppNode::Directory { page_id, entries })?;
                    path.push(PathStep { page_id: current, routing_id: routing, entry_index });
                    routing = Some(child_routing);
                    current = child;
                }
            }
        }
    }

    /// Chooses the directory entry to descend into: the entry already
    /// covering the object at minimal distance, otherwise the one needing
    /// the least radius enlargement.
    fn choose_subtree(
        &self,
        entries: &[DirectoryEntry],
        object: ObjectId,
    ) -> MkAppResult<(usize, f64)> {
        let mut covering: Option<(usize, f64)> = None;
        let mut enlarging: Option<(usize, f64, f64)> = None;
        for (index, entry) in entries.iter().enumerate() {
            let distance = self.distance.distance(object, entry.routing_id)?;
            if distance <= entry.covering_radius {
                if covering.map_or(true, |(_, best)| distance < best) {
                    covering = Some((index, distance));
                }
            } else {
                let enlargement = distance - entry.covering_radius;
                let better = match enlarging {
                    None => true,
                    Some((_, best_distance, best_enlargement)) => {
                        enlargement < best_enlargement
                            || (enlargement == best_enlargement && distance < best_distance)
                    }
                };
                if better {
                    enlarging = Some((index, distance, enlargement));
                }
            }
        }
        covering
            .or_else(|| enlarging.map(|(index, distance, _)| (index, distance)))
            .ok_or_else(|| MkAppError::TreeLogic("directory node without entries".into()))
    }

    /// Splits an overfull node (held in memory, not yet written) and
    /// propagates upward while parents overflow. The root split grows the
    /// tree by one level.
    fn split(&mut self, overfull: MkAppNode, mut path: Vec<PathStep>) -> MkAppResult<()> {
        let capacities = self
            .capacities
            .ok_or_else(|| MkAppError::TreeLogic("capacities not initialized".into()))?;

        let mut node = overfull;
        loop {
            let new_page = self.pages.allocate()?;
            let (first, second) = match node {
                MkAppNode::Leaf { page_id, entries } => {
                    self.split_leaf(page_id, new_page, entries)?
                }
                MkAppNode::Directory { page_id, entries } => {
                    self.split_directory(page_id, new_page, entries)?
                }
            };
            self.pages.write_node(&first.node)?;
            self.pages.write_node(&second.node)?;

            match path.pop() {
                None => {
                    // Root split.
                    let root_page = self.pages.allocate()?;
                    let root = MkAppNode::Directory {
                        page_id: root_page,
                        entries: vec![
                            first.parent_entry(0.0),
                            second.parent_entry(0.0),
                        ],
                    };
                    self.pages.write_node(&root)?;
                    self.root = Some(root_page);
                    return Ok(());
                }
                Some(step) => {
                    let mut parent = self.pages.read_node(step.page_id)?;
                    let MkAppNode::Directory { entries, .. } = &mut parent else {
                        return Err(MkAppError::TreeLogic(
                            "leaf node on the directory path".into(),
                        ));
                    };
                    let first_parent_distance = match step.routing_id {
                        Some(routing_id) => self.distance.distance(first.routing_id, routing_id)?,
                        None => 0.0,
                    };
                    let second_parent_distance = match step.routing_id {
                        Some(routing_id) => {
                            self.distance.distance(second.routing_id, routing_id)?
                        }
                        None => 0.0,
                    };
                    entries[step.entry_index] = first.parent_entry(first_parent_distance);
                    entries.push(second.parent_entry(second_parent_distance));

                    if entries.len() > capacities.dir_capacity {
                        node = parent;
                    } else {
                        self.pages.write_node(&parent)?;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Splits an overfull leaf into two halves around the promoted pair.
    fn split_leaf(
        &self,
        old_page: PageId,
        new_page: PageId,
        entries: Vec<LeafEntry>,
    ) -> MkAppResult<(SplitHalf, SplitHalf)> {
        let ids: Vec<ObjectId> = entries.iter().map(|e| e.object_id).collect();
        let (first_routing, second_routing) = self.promote(&ids)?;

        let mut first_entries = Vec::new();
        let mut second_entries = Vec::new();
        for mut entry in entries {
            let d1 = self.distance.distance(entry.object_id, first_routing)?;
            let d2 = self.distance.distance(entry.object_id, second_routing)?;
            if d1 <= d2 {
                entry.parent_distance = d1;
                first_entries.push(entry);
            } else {
                entry.parent_distance = d2;
                second_entries.push(entry);
            }
        }
        // All-ties degenerate case: keep both halves populated.
        if second_entries.is_empty() {
            if let Some(mut moved) = first_entries.pop() {
                moved.parent_distance = self.distance.distance(moved.object_id, second_routing)?;
                second_entries.push(moved);
            }
        }

        let first_radius = first_entries.iter().map(|e| e.parent_distance).fold(0.0, f64::max);
        let second_radius = second_entries.iter().map(|e| e.parent_distance).fold(0.0, f64::max);
        Ok((
            SplitHalf {
                node: MkAppNode::Leaf { page_id: old_page, entries: first_entries },
                routing_id: first_routing,
                covering_radius: first_radius,
            },
            SplitHalf {
                node: MkAppNode::Leaf { page_id: new_page, entries: second_entries },
                routing_id: second_routing,
                covering_radius: second_radius,
            },
        ))
    }

    /// Splits an overfull directory node into two halves around the
    /// promoted pair.
    fn split_directory(
        &self,
        old_page: PageId,
        new_page: PageId,
        entries: Vec<DirectoryEntry>,
    ) -> MkAppResult<(SplitHalf, SplitHalf)> {
        let ids: Vec<ObjectId> = entries.iter().map(|e| e.routing_id).collect();
        let (first_routing, second_routing) = self.promote(&ids)?;

        let mut first_entries = Vec::new();
        let mut second_entries = Vec::new();
        for mut entry in entries {
            let d1 = self.distance.distance(entry.routing_id, first_routing)?;
            let d2 = self.distance.distance(entry.routing_id, second_routing)?;
            if d1 <= d2 {
                entry.parent_distance = d1;
                first_entries.push(entry);
            } else {
                entry.parent_distance = d2;
                second_entries.push(entry);
            }
        }
        if second_entries.is_empty() {
            if let Some(mut moved) = first_entries.pop() {
                moved.parent_distance =
                    self.distance.distance(moved.routing_id, second_routing)?;
                second_entries.push(moved);
            }
        }

        // An inner node's ball must cover its children's balls.
        let radius = |list: &[DirectoryEntry]| {
            list.iter().map(|e| e.parent_distance + e.covering_radius).fold(0.0, f64::max)
        };
        let first_radius = radius(&first_entries);
        let second_radius = radius(&second_entries);
        Ok((
            SplitHalf {
                node: MkAppNode::Directory { page_id: old_page, entries: first_entries },
                routing_id: first_routing,
                covering_radius: first_radius,
            },
            SplitHalf {
                node: MkAppNode::Directory { page_id: new_page, entries: second_entries },
                routing_id: second_routing,
                covering_radius: second_radius,
            },
        ))
    }

    /// Promotes the two routing objects at maximal pairwise distance. Ties
    /// break toward the earliest pair, keeping splits deterministic so that
    /// identical batches produce identical trees and models.
    fn promote(&self, ids: &[ObjectId]) -> MkAppResult<(ObjectId, ObjectId)> {
        if ids.len() < 2 {
            return Err(MkAppError::TreeLogic(
                "cannot split a node with fewer than two entries".into(),
            ));
        }
        let mut best = (ids[0], ids[1]);
        let mut best_distance = -1.0;
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let distance = self.distance.distance(ids[i], ids[j])?;
                if distance > best_distance {
                    best_distance = distance;
                    best = (ids[i], ids[j]);
                }
            }
        }
        Ok(best)
    }

    // --- Approximation propagation ---

    /// Post-order recomputation of the k-NN distance models below `page_id`.
    ///
    /// Nothing is written back here; refreshed nodes are collected in
    /// `staged` and committed only after the whole pass succeeded, so a
    /// failed fit leaves every stored model untouched. Returns the model
    /// summarizing the entire subtree, for the entry (or root) that owns it.
    fn adjust_approximations(
        &self,
        page_id: PageId,
        knn_lists: &HashMap<ObjectId, Vec<f64>>,
        staged: &mut Vec<MkAppNode>,
    ) -> MkAppResult<KnnDistanceApproximation> {
        let mut node = self.pages.read_node(page_id)?;
        match &mut node {
            MkAppNode::Leaf { entries, .. } => {
                for entry in entries.iter_mut() {
                    let means =
                        mean_knn_distances(&[entry.object_id], knn_lists, self.settings.k_max)?;
                    entry.approximation = Some(self.approximate_knn_distances(&means)?);
                }
            }
            MkAppNode::Directory { entries, .. } => {
                for entry in entries.iter_mut() {
                    entry.approximation =
                        Some(self.adjust_approximations(entry.child_page, knn_lists, staged)?);
                }
            }
        }
        staged.push(node);

        let ids = self.collect_leaf_ids(page_id)?;
        let means = mean_knn_distances(&ids, knn_lists, self.settings.k_max)?;
        self.approximate_knn_distances(&means)
    }

    /// Fits one polynomial to a mean k-NN distance vector, honoring the
    /// log-log setting. Leading zero distances are skipped before taking
    /// logarithms so `ln 0` never enters a fit.
    fn approximate_knn_distances(
        &self,
        mean_distances: &[f64],
    ) -> MkAppResult<KnnDistanceApproximation> {
        debug_assert_eq!(mean_distances.len(), self.settings.k_max);
        let leading_zeros = if self.settings.log_space {
            mean_distances.iter().take_while(|&&d| d == 0.0).count()
        } else {
            0
        };

        let mut xs = Vec::with_capacity(mean_distances.len() - leading_zeros);
        let mut ys = Vec::with_capacity(mean_distances.len() - leading_zeros);
        for (index, &dist) in mean_distances.iter().enumerate().skip(leading_zeros) {
            let k = (index + 1) as f64;
            if self.settings.log_space {
                xs.push(k.ln());
                ys.push(dist.ln());
            } else {
                xs.push(k);
                ys.push(dist);
            }
        }

        let coefficients = polynomial::fit(&xs, &ys, self.settings.degree)?;
        log::debug!("approximation {coefficients:?}");
        Ok(KnnDistanceApproximation::new(coefficients))
    }

    /// Evaluates a stored model at k, undoing the log transform when the
    /// tree fits in log-log space; negative estimates clamp to zero.
    fn approximated_value_at(
        &self,
        approximation: Option<&KnnDistanceApproximation>,
        k: usize,
    ) -> MkAppResult<f64> {
        let approximation = approximation
            .ok_or_else(|| MkAppError::TreeLogic("entry without a k-NN distance model".into()))?;
        let value = if self.settings.log_space {
            approximation.value_at((k as f64).ln()).exp()
        } else {
            approximation.value_at(k as f64)
        };
        Ok(value.max(0.0))
    }

    // --- Traversal helpers ---

    /// Ids of all objects stored in the subtree rooted at `page_id`.
    fn collect_leaf_ids(&self, page_id: PageId) -> MkAppResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        self.collect_leaf_ids_into(page_id, &mut ids)?;
        Ok(ids)
    }

    fn collect_leaf_ids_into(&self, page_id: PageId, out: &mut Vec<ObjectId>) -> MkAppResult<()> {
        match self.pages.read_node(page_id)? {
            MkAppNode::Leaf { entries, .. } => {
                out.extend(entries.iter().map(|e| e.object_id));
            }
            MkAppNode::Directory { entries, .. } => {
                for entry in &entries {
                    self.collect_leaf_ids_into(entry.child_page, out)?;
                }
            }
        }
        Ok(())
    }

    fn check_node(
        &self,
        page_id: PageId,
        parent_routing: Option<ObjectId>,
        capacities: NodeCapacities,
    ) -> MkAppResult<()> {
        match self.pages.read_node(page_id)? {
            MkAppNode::Leaf { entries, .. } => {
                if entries.len() > capacities.leaf_capacity {
                    return Err(MkAppError::TreeLogic(format!(
                        "leaf page {page_id} holds {} entries, capacity is {}",
                        entries.len(),
                        capacities.leaf_capacity
                    )));
                }
                if let Some(routing_id) = parent_routing {
                    for entry in &entries {
                        let distance = self.distance.distance(entry.object_id, routing_id)?;
                        if (distance - entry.parent_distance).abs() > DISTANCE_EPSILON {
                            return Err(MkAppError::TreeLogic(format!(
                                "leaf entry {} stores parent distance {} but is {} away",
                                entry.object_id, entry.parent_distance, distance
                            )));
                        }
                    }
                }
                Ok(())
            }
            MkAppNode::Directory { entries, .. } => {
                if entries.len() > capacities.dir_capacity {
                    return Err(MkAppError::TreeLogic(format!(
                        "directory page {page_id} holds {} entries, capacity is {}",
                        entries.len(),
                        capacities.dir_capacity
                    )));
                }
                for entry in &entries {
                    if let Some(routing_id) = parent_routing {
                        let distance = self.distance.distance(entry.routing_id, routing_id)?;
                        if (distance - entry.parent_distance).abs() > DISTANCE_EPSILON {
                            return Err(MkAppError::TreeLogic(format!(
                                "directory entry {} stores parent distance {} but is {} away",
                                entry.routing_id, entry.parent_distance, distance
                            )));
                        }
                    }
                    let child = self.pages.read_node(entry.child_page)?;
                    let max_parent_distance = match &child {
                        MkAppNode::Leaf { entries, .. } => {
                            entries.iter().map(|e| e.parent_distance).fold(0.0, f64::max)
                        }
                        MkAppNode::Directory { entries, .. } => {
                            entries.iter().map(|e| e.parent_distance).fold(0.0, f64::max)
                        }
                    };
                    if entry.covering_radius + DISTANCE_EPSILON < max_parent_distance {
                        return Err(MkAppError::TreeLogic(format!(
                            "covering radius {} of entry {} does not cover child entries ({})",
                            entry.covering_radius, entry.routing_id, max_parent_distance
                        )));
                    }
                    self.check_node(entry.child_page, Some(entry.routing_id), capacities)?;
                }
                Ok(())
            }
        }
    }
}

/// One half of a split: the rebuilt node plus the routing data its parent
/// entry needs.
struct SplitHalf {
    node: MkAppNode,
    routing_id: ObjectId,
    covering_radius: f64,
}

impl SplitHalf {
    fn parent_entry(&self, parent_distance: f64) -> DirectoryEntry {
        DirectoryEntry {
            routing_id: self.routing_id,
            parent_distance,
            child_page: self.node.page_id(),
            covering_radius: self.covering_radius,
            approximation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indexing::mkapp::page_io::MemoryPageFile;
    use crate::core::vector::{DistanceMetric, VectorTable};
    use approx::assert_relative_eq;

    fn line_points(positions: &[f64]) -> (VectorTable, Vec<ObjectId>) {
        let mut table = VectorTable::new(DistanceMetric::Euclidean);
        let mut ids = Vec::new();
        for (index, &position) in positions.iter().enumerate() {
            let id = index as ObjectId + 1;
            table.insert(id, vec![position]);
            ids.push(id);
        }
        (table, ids)
    }

    fn tree_with(
        k_max: usize,
        degree: usize,
        page_size: usize,
        table: VectorTable,
    ) -> MkAppTree<VectorTable, MemoryPageFile> {
        let settings = MkAppSettings::builder()
            .k_max(k_max)
            .degree(degree)
            .integrity_checks(true)
            .build()
            .unwrap();
        MkAppTree::new(settings, table, MemoryPageFile::new(page_size))
    }

    #[test]
    fn test_single_insert_is_unsupported() {
        let (table, ids) = line_points(&[0.0, 1.0, 3.0]);
        let mut tree = tree_with(2, 1, 4096, table);
        tree.insert_all(&ids).unwrap();

        let err = tree.insert(7).unwrap_err();
        assert!(matches!(err, MkAppError::UnsupportedOperation(_)));
        let err = tree.pre_insert(7).unwrap_err();
        assert!(matches!(err, MkAppError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let (table, _) = line_points(&[0.0]);
        let mut tree = tree_with(2, 1, 4096, table);
        tree.insert_all(&[]).unwrap();
        assert_eq!(tree.object_count().unwrap(), 0);
        assert!(tree.capacities().is_none());
    }

    #[test]
    fn test_capacities_initialize_on_first_batch() {
        let (table, ids) = line_points(&[0.0, 1.0, 3.0]);
        let mut tree = tree_with(2, 1, 4096, table);
        tree.insert_all(&ids).unwrap();

        let capacities = tree.capacities().unwrap();
        assert!(capacities.leaf_capacity > capacities.dir_capacity);
        assert!(capacities.dir_capacity > 1);
    }

    #[test]
    fn test_invalid_k_bounds() {
        let (table, ids) = line_points(&[0.0, 1.0, 3.0]);
        let mut tree = tree_with(2, 1, 4096, table);
        tree.insert_all(&ids).unwrap();

        assert!(matches!(
            tree.reverse_knn_query(1, 0),
            Err(MkAppError::InvalidK { k: 0, k_max: 2 })
        ));
        assert!(matches!(
            tree.reverse_knn_query(1, 3),
            Err(MkAppError::InvalidK { k: 3, k_max: 2 })
        ));
    }

    #[test]
    fn test_query_on_empty_tree_returns_nothing() {
        let (table, _) = line_points(&[0.0]);
        let tree = tree_with(2, 1, 4096, table);
        assert!(tree.reverse_knn_query(1, 1).unwrap().is_empty());
    }

    #[test]
    fn test_splits_produce_a_consistent_multi_level_tree() {
        // A page of 120 bytes holds 3 leaf entries / 2 directory entries at
        // degree 1, so nine points force repeated splits.
        let (table, ids) = line_points(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let mut tree = tree_with(2, 1, 120, table);
        tree.insert_all(&ids).unwrap();

        assert_eq!(tree.object_count().unwrap(), 9);
        tree.integrity_check().unwrap();
        assert!(tree.root_approximation().is_some());
    }

    #[test]
    fn test_bulk_load_is_deterministic() {
        let positions = [0.0, 1.5, 2.0, 3.0, 7.0, 7.5, 9.0];
        let build = || {
            let (table, ids) = line_points(&positions);
            let mut tree = tree_with(3, 1, 160, table);
            tree.insert_all(&ids).unwrap();
            tree
        };
        let first = build();
        let second = build();

        let a = first.root_approximation().unwrap().coefficients();
        let b = second.root_approximation().unwrap().coefficients();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_negative_model_values_clamp_to_zero() {
        let tree = {
            let (table, _) = line_points(&[0.0]);
            tree_with(2, 1, 4096, table)
        };
        // A steeply rising line is negative at k = 1.
        let model = KnnDistanceApproximation::new(vec![-5.0, 2.0]);
        let value = tree.approximated_value_at(Some(&model), 1).unwrap();
        assert_relative_eq!(value, 0.0);
        // Still negative at k = 2 (-5 + 2 * 2), so still clamped.
        let value = tree.approximated_value_at(Some(&model), 2).unwrap();
        assert_relative_eq!(value, 0.0);
    }

    #[test]
    fn test_missing_model_is_a_tree_logic_error() {
        let (table, _) = line_points(&[0.0]);
        let tree = tree_with(2, 1, 4096, table);
        assert!(matches!(
            tree.approximated_value_at(None, 1),
            Err(MkAppError::TreeLogic(_))
        ));
    }

    #[test]
    fn test_reverse_knn_reports_the_tight_pair_only() {
        // Objects 1 and 2 are a tight pair; the rest sit far away with
        // mutual distances around 10. Queried at k = 2 from object 1, the
        // pair's modeled 2-NN distances (about 50) comfortably admit both
        // members, while every far object is much farther from the query
        // than its own modeled 2-NN distance.
        let (table, ids) = line_points(&[0.0, 0.1, 50.0, 60.0, 70.0, 80.0]);
        let mut tree = tree_with(2, 1, 160, table);
        tree.insert_all(&ids).unwrap();

        let result = tree.reverse_knn_query(1, 2).unwrap();
        let reported: Vec<ObjectId> = result.iter().map(|&(_, id)| id).collect();
        assert_eq!(reported, vec![1, 2]);
        // Ascending by true distance: the query object itself leads.
        assert_relative_eq!(result[0].0, 0.0);
        assert_relative_eq!(result[1].0, 0.1);
    }
}
