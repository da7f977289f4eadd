//! Crack avoidance between chunks of different vertex density.

use crate::quadtree::{Direction, NodeId, QuadTree};
use crate::view::ViewData;

/// Per-edge vertex-LOD deltas packed into 16 bits.
///
/// Bits `4d..4d+4` hold how many LOD levels coarser the neighbour in
/// direction `d` is (N=0, E=1, S=2, W=3). Zero means no stitching on that
/// edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StitchFlags(u16);

impl StitchFlags {
    pub const NONE: StitchFlags = StitchFlags(0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// LOD delta on the edge facing `direction`.
    pub fn delta(self, direction: Direction) -> u8 {
        ((self.0 >> (4 * direction as u16)) & 0xf) as u8
    }

    /// Copy with the delta for `direction` replaced (clamped to 15).
    pub fn with_delta(self, direction: Direction, delta: u8) -> Self {
        let shift = 4 * direction as u16;
        let cleared = self.0 & !(0xf << shift);
        Self(cleared | (u16::from(delta.min(15)) << shift))
    }
}

/// Vertex LOD of a chunk of `size` cells: `log2(max(size, 1)) - vertex_lod_mod`,
/// clamped to `0..=15`.
///
/// Sub-cell chunks share LOD 0. Positive modifiers give denser chunks.
pub fn vertex_lod(size: f32, vertex_lod_mod: i32) -> u8 {
    let base = size.max(1.0).log2().round() as i32;
    (base - vertex_lod_mod).clamp(0, 15) as u8
}

/// Stitch flags for `node` given the rest of `view`'s selection.
///
/// For every edge, the same-depth node across it is followed up through its
/// ancestors until a selected node is found. The walk starts from dummy
/// nodes as well, since a coarser selected ancestor may still cover the
/// edge. Only coarser neighbours produce a non-zero delta; the finer side of
/// an LOD boundary is the one that stitches.
pub fn compute_stitch_flags<H>(
    tree: &QuadTree,
    view: &ViewData<H>,
    node: NodeId,
    vertex_lod_mod: i32,
) -> StitchFlags {
    let current = tree.node(node);
    let own_lod = vertex_lod(current.size(), vertex_lod_mod);
    let mut flags = StitchFlags::NONE;

    for direction in Direction::ALL {
        let mut candidate = current.stitch_neighbour(direction);
        while let Some(id) = candidate {
            if view.contains(id) {
                break;
            }
            candidate = tree.node(id).parent();
        }
        if let Some(id) = candidate {
            let neighbour_lod = vertex_lod(tree.node(id).size(), vertex_lod_mod);
            if neighbour_lod > own_lod {
                flags = flags.with_delta(direction, neighbour_lod - own_lod);
            }
        }
    }
    flags
}
