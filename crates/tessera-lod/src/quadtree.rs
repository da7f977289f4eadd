//! Terrain quadtree over a [`Storage`] dataset.
//!
//! The tree is built once and never changes afterwards. Nodes live in an
//! arena and refer to each other through [`NodeId`] indices: children through
//! a fixed 4-slot array, parents and neighbours through non-owning links.

use glam::{Vec2, Vec3};
use tessera_math::{Aabb, Rect, next_power_of_two};
use tessera_terrain::Storage;

use crate::neighbor;

/// Index of a node in its [`QuadTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position of a child within its parent. North is +y, east is +x.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quadrant {
    NorthWest = 0,
    NorthEast = 1,
    SouthWest = 2,
    SouthEast = 3,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::NorthWest,
        Quadrant::NorthEast,
        Quadrant::SouthWest,
        Quadrant::SouthEast,
    ];

    /// Direction of the child's center from the parent's center, in quarter sizes.
    pub fn offset(self) -> Vec2 {
        match self {
            Quadrant::NorthWest => Vec2::new(-1.0, 1.0),
            Quadrant::NorthEast => Vec2::new(1.0, 1.0),
            Quadrant::SouthWest => Vec2::new(-1.0, -1.0),
            Quadrant::SouthEast => Vec2::new(1.0, -1.0),
        }
    }
}

/// Cardinal direction in cell space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }
}

/// Size and center of a node, in cell units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeFootprint {
    pub size: f32,
    pub center: Vec2,
}

impl NodeFootprint {
    pub fn rect(&self) -> Rect {
        Rect::from_center_size(self.center, self.size)
    }
}

/// One node of the terrain quadtree.
///
/// A node has either zero or four children. A node is a *dummy* when no
/// data exists under it; dummy nodes have no bounds and are skipped by
/// traversal, but a dummy may still carry four (dummy) children.
#[derive(Clone, Debug)]
pub struct QuadTreeNode {
    size: f32,
    center: Vec2,
    bounds: Option<Aabb>,
    children: Option<[NodeId; 4]>,
    neighbours: [Option<NodeId>; 4],
    stitch_neighbours: [Option<NodeId>; 4],
    parent: Option<NodeId>,
    quadrant: Option<Quadrant>,
    depth: u32,
}

impl QuadTreeNode {
    /// Edge length in cells (a power of two).
    pub fn size(&self) -> f32 {
        self.size
    }

    /// Center in cell units.
    pub fn center(&self) -> Vec2 {
        self.center
    }

    pub fn footprint(&self) -> NodeFootprint {
        NodeFootprint {
            size: self.size,
            center: self.center,
        }
    }

    /// World-space bounds, `None` for dummy nodes.
    pub fn bounds(&self) -> Option<&Aabb> {
        self.bounds.as_ref()
    }

    pub fn is_dummy(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> Option<&[NodeId; 4]> {
        self.children.as_ref()
    }

    pub fn child(&self, quadrant: Quadrant) -> Option<NodeId> {
        self.children.map(|c| c[quadrant as usize])
    }

    pub fn neighbour(&self, direction: Direction) -> Option<NodeId> {
        self.neighbours[direction as usize]
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Position within the parent; `None` for the root.
    pub fn quadrant(&self) -> Option<Quadrant> {
        self.quadrant
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn set_neighbour(&mut self, direction: Direction, neighbour: Option<NodeId>) {
        self.neighbours[direction as usize] = neighbour;
    }

    /// Same-depth node across the edge facing `direction`, dummies included.
    pub(crate) fn stitch_neighbour(&self, direction: Direction) -> Option<NodeId> {
        self.stitch_neighbours[direction as usize]
    }

    pub(crate) fn set_stitch_neighbour(&mut self, direction: Direction, neighbour: Option<NodeId>) {
        self.stitch_neighbours[direction as usize] = neighbour;
    }

    /// Distance from `point` to the node's world bounds, 0 inside.
    /// Dummy nodes are infinitely far away.
    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.bounds.map_or(f32::INFINITY, |b| b.distance_to_point(point))
    }
}

/// Arena of [`QuadTreeNode`]s covering a terrain dataset.
#[derive(Clone, Debug)]
pub struct QuadTree {
    nodes: Vec<QuadTreeNode>,
    min_chunk_size: f32,
    cell_world_size: f32,
}

impl QuadTree {
    /// Build the tree for `storage`, subdividing down to `min_chunk_size` cells.
    ///
    /// The root is the smallest power-of-two square covering the dataset,
    /// sharing the dataset's minimum corner so every node edge lies on the
    /// cell grid.
    pub fn build(storage: &dyn Storage, min_chunk_size: f32) -> Self {
        let bounds = storage.bounds();
        debug_assert!(!bounds.is_empty(), "terrain bounds must have area");
        debug_assert!(
            tessera_math::is_power_of_two(min_chunk_size),
            "min chunk size must be a power of two"
        );

        let extent = bounds.width().max(bounds.height());
        let size = next_power_of_two(extent);
        let min = Vec2::new(bounds.min_x, bounds.min_y);
        let center = min + Vec2::splat(size * 0.5);
        let data_rect = Rect::new(min, Vec2::new(bounds.max_x, bounds.max_y));

        let mut tree = Self {
            nodes: Vec::new(),
            min_chunk_size,
            cell_world_size: storage.cell_world_size(),
        };
        let mut builder = Builder {
            storage,
            data_rect,
            tree: &mut tree,
        };
        builder.build_node(None, None, size, center, 0);
        neighbor::link_neighbours(&mut tree.nodes);

        tracing::info!(
            "Built terrain quadtree: {} nodes, root size {} at ({}, {})",
            tree.nodes.len(),
            size,
            center.x,
            center.y
        );
        tree
    }

    /// The root node. Always present.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &QuadTreeNode {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn min_chunk_size(&self) -> f32 {
        self.min_chunk_size
    }

    pub fn cell_world_size(&self) -> f32 {
        self.cell_world_size
    }

    /// All node ids in arena order (parents before children).
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Non-dummy nodes without children.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids().filter(|&id| {
            let node = self.node(id);
            !node.has_children() && !node.is_dummy()
        })
    }

    /// Find the node whose center is exactly `center`, descending by quadrant.
    pub fn find_node(&self, center: Vec2) -> Option<NodeId> {
        let mut id = self.root();
        loop {
            let node = self.node(id);
            if node.center == center {
                return Some(id);
            }
            let children = node.children?;
            let quadrant = match (center.x >= node.center.x, center.y >= node.center.y) {
                (false, true) => Quadrant::NorthWest,
                (true, true) => Quadrant::NorthEast,
                (false, false) => Quadrant::SouthWest,
                (true, false) => Quadrant::SouthEast,
            };
            id = children[quadrant as usize];
        }
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.node(node).parent;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).parent;
        }
        false
    }
}

struct Builder<'a> {
    storage: &'a dyn Storage,
    data_rect: Rect,
    tree: &'a mut QuadTree,
}

impl Builder<'_> {
    fn build_node(
        &mut self,
        parent: Option<NodeId>,
        quadrant: Option<Quadrant>,
        size: f32,
        center: Vec2,
        depth: u32,
    ) -> NodeId {
        let id = NodeId(self.tree.nodes.len() as u32);
        self.tree.nodes.push(QuadTreeNode {
            size,
            center,
            bounds: None,
            children: None,
            neighbours: [None; 4],
            stitch_neighbours: [None; 4],
            parent,
            quadrant,
            depth,
        });

        if !Rect::from_center_size(center, size).overlaps(&self.data_rect) {
            return id;
        }

        if size == 1.0 {
            let cell = (center - Vec2::splat(0.5)).floor();
            if !self.storage.has_data(cell.x as i32, cell.y as i32) {
                return id;
            }
        }

        if size <= self.tree.min_chunk_size {
            let cws = self.tree.cell_world_size;
            self.tree.nodes[id.index()].bounds =
                self.storage
                    .min_max_height(size, center)
                    .map(|(min_z, max_z)| {
                        let half = size * 0.5;
                        let lo = (center - Vec2::splat(half)) * cws;
                        let hi = (center + Vec2::splat(half)) * cws;
                        Aabb::new(lo.extend(min_z), hi.extend(max_z))
                    });
            return id;
        }

        let half = size * 0.5;
        let quarter = size * 0.25;
        let mut children = [NodeId(0); 4];
        for q in [
            Quadrant::SouthWest,
            Quadrant::SouthEast,
            Quadrant::NorthWest,
            Quadrant::NorthEast,
        ] {
            children[q as usize] =
                self.build_node(Some(id), Some(q), half, center + q.offset() * quarter, depth + 1);
        }

        let bounds = children
            .iter()
            .filter_map(|c| self.tree.nodes[c.index()].bounds)
            .reduce(|a, b| a.union(&b));
        let node = &mut self.tree.nodes[id.index()];
        node.children = Some(children);
        node.bounds = bounds;
        id
    }
}
