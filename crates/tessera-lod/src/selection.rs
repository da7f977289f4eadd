//! Distance-driven LOD selection over the terrain quadtree.

use glam::Vec3;
use tessera_math::Rect;

use crate::quadtree::{NodeFootprint, NodeId, QuadTree};
use crate::view::ViewData;

/// Tunables for [`decide`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodPolicy {
    /// Higher values keep full detail further away.
    pub lod_factor: f32,
    /// Smallest chunk size in cells.
    pub min_chunk_size: f32,
    /// Nodes further away than this (world units) are culled unless they
    /// intersect the always-resident region.
    pub max_view_distance: f32,
    pub cell_world_size: f32,
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self {
            lod_factor: 1.0,
            min_chunk_size: 1.0,
            max_view_distance: f32::MAX,
            cell_world_size: 64.0,
        }
    }
}

/// Outcome of evaluating one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LodDecision {
    /// Neither this node nor its descendants are drawn.
    Cull,
    /// Draw this node as a single chunk.
    Use,
    /// Evaluate the children instead.
    Descend,
}

/// LOD level a node has by virtue of its size: `log2(size / min_chunk_size)`.
pub fn native_lod(size: f32, min_chunk_size: f32) -> u32 {
    (size / min_chunk_size).log2().round().max(0.0) as u32
}

/// Coarsest LOD acceptable at `distance`:
/// `floor(log2(distance / (cell_world_size * min_chunk_size * lod_factor)))`,
/// clamped at 0.
pub fn wanted_lod(distance: f32, policy: &LodPolicy) -> u32 {
    let ratio = distance / (policy.cell_world_size * policy.min_chunk_size * policy.lod_factor);
    if ratio < 1.0 || ratio.is_nan() {
        return 0;
    }
    ratio.log2().floor() as u32
}

/// Decide whether `node` is culled, drawn, or refined.
///
/// `distance` is measured from the viewpoint to the node's world bounds.
/// Nodes cut by the edge of `active_region` are refined down to the minimum
/// chunk size so the region is covered by chunks lying wholly inside it.
pub fn decide(
    node: &NodeFootprint,
    distance: f32,
    policy: &LodPolicy,
    active_region: Option<&Rect>,
) -> LodDecision {
    let rect = node.rect();
    let overlaps_region = active_region.is_some_and(|r| rect.overlaps(r));

    if distance > policy.max_view_distance && !overlaps_region {
        return LodDecision::Cull;
    }

    let straddles = active_region.is_some_and(|r| rect.straddles(r));
    if straddles && node.size > policy.min_chunk_size {
        return LodDecision::Descend;
    }

    if native_lod(node.size, policy.min_chunk_size) <= wanted_lod(distance, policy) {
        LodDecision::Use
    } else {
        LodDecision::Descend
    }
}

/// Parameters of one selection pass.
#[derive(Clone, Copy, Debug)]
pub struct SelectionParams<'a> {
    pub viewpoint: Vec3,
    pub policy: &'a LodPolicy,
    pub active_region: Option<&'a Rect>,
    /// Added to every measured distance (clamped at 0). Positive values
    /// select coarser nodes, negative values finer ones.
    pub distance_modifier: f32,
}

/// Append the nodes selected from `tree` to `view`.
///
/// Dummy nodes are skipped. A node that should be refined but has no
/// children is used as is. The result is an antichain.
pub fn select_nodes<H>(tree: &QuadTree, params: &SelectionParams<'_>, view: &mut ViewData<H>) {
    traverse(tree, tree.root(), params, view);
}

fn traverse<H>(tree: &QuadTree, id: NodeId, params: &SelectionParams<'_>, view: &mut ViewData<H>) {
    let node = tree.node(id);
    if node.is_dummy() {
        return;
    }

    let distance = (node.distance_to(params.viewpoint) + params.distance_modifier).max(0.0);
    match decide(&node.footprint(), distance, params.policy, params.active_region) {
        LodDecision::Cull => {}
        LodDecision::Use => view.add(id),
        LodDecision::Descend => match node.children() {
            Some(children) => {
                for &child in children {
                    traverse(tree, child, params, view);
                }
            }
            None => view.add(id),
        },
    }
}
