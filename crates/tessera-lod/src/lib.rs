//! Level-of-detail core: the terrain quadtree, distance-based node
//! selection, per-observer view data, and stitch flags for crack-free
//! boundaries between chunks of different detail.

mod neighbor;
mod quadtree;
mod selection;
mod stitch;
mod view;

pub use neighbor::find_neighbour;
pub use quadtree::{Direction, NodeFootprint, NodeId, QuadTree, QuadTreeNode, Quadrant};
pub use selection::{
    LodDecision, LodPolicy, SelectionParams, decide, native_lod, select_nodes, wanted_lod,
};
pub use stitch::{StitchFlags, compute_stitch_flags, vertex_lod};
pub use view::{ObserverId, ViewData, ViewDataEntry, ViewDataMap};
