//! Cluster tree construction and queries.

use std::sync::Arc;
use std::time::Instant;

use movement_map_pin_models::{BoundingBox, CategoryCounts};
use movement_map_spatial::{PointIndex, envelopes, unproject};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{ClusterError, ClusterFeature, ClusterId, ClusterOptions, ClusterSummary, NodeRef};

type NodeEntry = GeomWithData<[f64; 2], usize>;

/// One node of the tree at one zoom level.
#[derive(Debug, Clone)]
struct Node {
    xy: [f64; 2],
    count: u64,
    categories: CategoryCounts,
    children: Vec<NodeRef>,
    parent: Option<ClusterId>,
    /// Pin position when `count == 1`.
    leaf: Option<usize>,
}

struct Level {
    nodes: Vec<Node>,
    tree: RTree<NodeEntry>,
}

impl Level {
    fn new(nodes: Vec<Node>) -> Self {
        let entries = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| NodeEntry::new(node.xy, i))
            .collect();
        Self {
            nodes,
            tree: RTree::bulk_load(entries),
        }
    }
}

/// Running weighted centroid of a cluster being formed.
struct Accumulator {
    weighted: [f64; 2],
    count: u64,
    categories: CategoryCounts,
    children: Vec<NodeRef>,
}

impl Accumulator {
    const fn new() -> Self {
        Self {
            weighted: [0.0, 0.0],
            count: 0,
            categories: CategoryCounts::new(),
            children: Vec::new(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn absorb(&mut self, child: NodeRef, xy: [f64; 2], count: u64, categories: &CategoryCounts) {
        let weight = count as f64;
        self.weighted[0] += xy[0] * weight;
        self.weighted[1] += xy[1] * weight;
        self.count += count;
        self.categories.merge(categories);
        self.children.push(child);
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self, leaf: Option<usize>) -> Node {
        let weight = self.count as f64;
        Node {
            xy: [self.weighted[0] / weight, self.weighted[1] / weight],
            count: self.count,
            categories: self.categories,
            children: self.children,
            parent: None,
            leaf,
        }
    }
}

/// Precomputed clusters for every zoom level of one active pin set.
///
/// Immutable once built. Rebuild when the pin set or the filter changes.
pub struct ClusterHierarchy {
    options: ClusterOptions,
    index: Arc<PointIndex>,
    active: Vec<bool>,
    leaf_count: usize,
    /// `levels[k]` holds zoom `options.min_zoom + k`.
    levels: Vec<Level>,
}

impl ClusterHierarchy {
    /// Clusters every indexed pin for which `is_active` returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::InvalidOptions`] if `options` fail
    /// validation.
    pub fn build<F>(
        index: Arc<PointIndex>,
        options: ClusterOptions,
        is_active: F,
    ) -> Result<Self, ClusterError>
    where
        F: Fn(usize) -> bool,
    {
        options.validate()?;
        let start = Instant::now();

        let active: Vec<bool> = (0..index.positions())
            .map(|p| index.is_indexed(p) && is_active(p))
            .collect();
        let leaf_count = active.iter().filter(|a| **a).count();

        let mut levels: Vec<Level> =
            Vec::with_capacity(usize::from(options.max_zoom - options.min_zoom) + 1);

        // Finest clustered level merges pins straight out of the shared index.
        let mut finer = Level::new(cluster_leaves(&index, &active, &options));

        for zoom in (options.min_zoom..options.max_zoom).rev() {
            let nodes = cluster_level(&finer, zoom, &options);
            for (i, node) in nodes.iter().enumerate() {
                for child in &node.children {
                    if let NodeRef::Cluster(child_id) = child {
                        finer.nodes[child_id.index].parent = Some(ClusterId::new(zoom, i));
                    }
                }
            }
            levels.push(std::mem::replace(&mut finer, Level::new(nodes)));
        }
        levels.push(finer);
        levels.reverse();

        log::debug!(
            "Built cluster hierarchy for {leaf_count} pins over zooms {}..={} in {:.2?}",
            options.min_zoom,
            options.max_zoom,
            start.elapsed(),
        );

        Ok(Self {
            options,
            index,
            active,
            leaf_count,
            levels,
        })
    }

    /// The options this hierarchy was built with.
    #[must_use]
    pub const fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Number of active pins.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.leaf_count
    }

    /// Whether no pins are active.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Whether the pin at `position` took part in clustering.
    #[must_use]
    pub fn is_active(&self, position: usize) -> bool {
        self.active.get(position).copied().unwrap_or(false)
    }

    /// Features at `zoom` whose position lies inside `bbox`, in stable order.
    ///
    /// Zooms above `max_zoom` return every pin individually.
    #[must_use]
    pub fn clusters_at(&self, zoom: u8, bbox: &BoundingBox) -> Vec<ClusterFeature> {
        let zoom = self.options.clamp_zoom(zoom);

        if zoom > self.options.max_zoom {
            return self
                .index
                .within_bbox(bbox)
                .into_iter()
                .filter(|p| self.active[*p])
                .map(|position| ClusterFeature::Point { position })
                .collect();
        }

        let level = self.level(zoom);
        let mut found: Vec<usize> = envelopes(bbox)
            .iter()
            .flat_map(|env| level.tree.locate_in_envelope(env).map(|entry| entry.data))
            .collect();
        found.sort_unstable();
        found.dedup();

        found
            .into_iter()
            .map(|i| feature(ClusterId::new(zoom, i), &level.nodes[i]))
            .collect()
    }

    /// Every feature at `zoom`.
    #[must_use]
    pub fn all_at(&self, zoom: u8) -> Vec<ClusterFeature> {
        self.clusters_at(zoom, &BoundingBox::world())
    }

    /// Summary of one cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if `id` is not in the tree.
    pub fn cluster(&self, id: ClusterId) -> Result<ClusterSummary, ClusterError> {
        let node = self.node(id)?;
        Ok(summary(id, node))
    }

    /// The cluster this one was merged into at the next coarser zoom.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if `id` is not in the tree.
    pub fn parent(&self, id: ClusterId) -> Result<Option<ClusterId>, ClusterError> {
        Ok(self.node(id)?.parent)
    }

    /// Lowest zoom at which the cluster no longer shows as one marker.
    ///
    /// Walks down the tree past zoom levels where the cluster only carried
    /// over unchanged, stopping at the first level where it has two or more
    /// children or resolves into pins.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if `id` is not in the tree,
    /// or [`ClusterError::NotACluster`] if it stands for a single pin.
    pub fn expansion_zoom(&self, id: ClusterId) -> Result<u8, ClusterError> {
        let mut node = self.node(id)?;
        if node.count < 2 {
            return Err(ClusterError::NotACluster { id });
        }

        let mut zoom = id.zoom;
        loop {
            zoom += 1;
            match node.children.as_slice() {
                [NodeRef::Cluster(child)] => node = self.node(*child)?,
                _ => return Ok(zoom),
            }
        }
    }

    /// Direct children of a cluster, one zoom finer.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if `id` is not in the tree.
    pub fn children(&self, id: ClusterId) -> Result<Vec<ClusterFeature>, ClusterError> {
        self.node(id)?
            .children
            .iter()
            .map(|child| match child {
                NodeRef::Leaf(position) => Ok(ClusterFeature::Point {
                    position: *position,
                }),
                NodeRef::Cluster(child_id) => Ok(feature(*child_id, self.node(*child_id)?)),
            })
            .collect()
    }

    /// Pin positions under a cluster, depth-first, paginated.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnknownCluster`] if `id` is not in the tree.
    pub fn leaves(
        &self,
        id: ClusterId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<usize>, ClusterError> {
        let mut out = Vec::new();
        let mut skipped = 0;
        let mut stack = vec![NodeRef::Cluster(id)];

        while let Some(next) = stack.pop() {
            if out.len() >= limit {
                break;
            }
            match next {
                NodeRef::Leaf(position) => {
                    if skipped < offset {
                        skipped += 1;
                    } else {
                        out.push(position);
                    }
                }
                NodeRef::Cluster(child_id) => {
                    let node = self.node(child_id)?;
                    if skipped + usize::try_from(node.count).unwrap_or(usize::MAX) <= offset {
                        skipped += usize::try_from(node.count).unwrap_or(usize::MAX);
                        continue;
                    }
                    stack.extend(node.children.iter().rev().copied());
                }
            }
        }

        Ok(out)
    }

    fn level(&self, zoom: u8) -> &Level {
        &self.levels[usize::from(zoom - self.options.min_zoom)]
    }

    fn node(&self, id: ClusterId) -> Result<&Node, ClusterError> {
        if id.zoom < self.options.min_zoom || id.zoom > self.options.max_zoom {
            return Err(ClusterError::UnknownCluster { id });
        }
        self.level(id.zoom)
            .nodes
            .get(id.index)
            .ok_or(ClusterError::UnknownCluster { id })
    }
}

fn summary(id: ClusterId, node: &Node) -> ClusterSummary {
    ClusterSummary {
        id,
        center: unproject(node.xy),
        count: node.count,
        categories: node.categories,
    }
}

fn feature(id: ClusterId, node: &Node) -> ClusterFeature {
    match node.leaf {
        Some(position) if node.count == 1 => ClusterFeature::Point { position },
        _ => ClusterFeature::Cluster(summary(id, node)),
    }
}

/// Builds the `max_zoom` level from active pins, querying the shared index.
fn cluster_leaves(index: &PointIndex, active: &[bool], options: &ClusterOptions) -> Vec<Node> {
    let radius = options.radius_at(options.max_zoom);
    let mut visited = vec![false; active.len()];
    let mut nodes = Vec::new();

    for seed in (0..active.len()).filter(|p| active[*p]) {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;

        let mut neighbors: Vec<usize> = index
            .within_radius(index.coord(seed), radius)
            .filter(|p| active[*p] && !visited[*p])
            .collect();
        neighbors.sort_unstable();

        let mut acc = Accumulator::new();
        acc.absorb(
            NodeRef::Leaf(seed),
            index.coord(seed),
            1,
            &CategoryCounts::single(index.category(seed)),
        );
        for &p in &neighbors {
            visited[p] = true;
            acc.absorb(
                NodeRef::Leaf(p),
                index.coord(p),
                1,
                &CategoryCounts::single(index.category(p)),
            );
        }

        nodes.push(acc.finish(neighbors.is_empty().then_some(seed)));
    }

    nodes
}

/// Builds level `zoom` by merging the nodes of level `zoom + 1`.
fn cluster_level(finer: &Level, zoom: u8, options: &ClusterOptions) -> Vec<Node> {
    let radius = options.radius_at(zoom);
    let finer_zoom = zoom + 1;
    let mut visited = vec![false; finer.nodes.len()];
    let mut nodes = Vec::new();

    for (seed, seed_node) in finer.nodes.iter().enumerate() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;

        let mut neighbors: Vec<usize> = finer
            .tree
            .locate_within_distance(seed_node.xy, radius * radius)
            .map(|entry| entry.data)
            .filter(|i| !visited[*i])
            .collect();
        neighbors.sort_unstable();

        let mut acc = Accumulator::new();
        acc.absorb(
            NodeRef::Cluster(ClusterId::new(finer_zoom, seed)),
            seed_node.xy,
            seed_node.count,
            &seed_node.categories,
        );
        for &i in &neighbors {
            visited[i] = true;
            let node = &finer.nodes[i];
            acc.absorb(
                NodeRef::Cluster(ClusterId::new(finer_zoom, i)),
                node.xy,
                node.count,
                &node.categories,
            );
        }

        let leaf = if neighbors.is_empty() {
            seed_node.leaf
        } else {
            None
        };
        nodes.push(acc.finish(leaf));
    }

    nodes
}
