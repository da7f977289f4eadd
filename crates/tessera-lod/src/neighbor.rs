//! Same-depth neighbour finding (Samet's recursive quadtree algorithm).
//!
//! Neighbours are looked up once after construction and stored on each
//! node. Links may be asymmetric: a node's neighbour is always at the same
//! depth, so a leaf next to a coarser region has no neighbour there while
//! the coarser node still links to the leaf's ancestor.
//!
//! Each node also keeps the unfiltered link, dummies included, so a seam
//! next to missing data can still be traced up to the coarser node that
//! covers it.

use crate::quadtree::{Direction, NodeId, QuadTreeNode, Quadrant};

/// Quadrant mirrored across the edge facing `direction`, indexed
/// `[direction][quadrant]`.
const REFLECT: [[Quadrant; 4]; 4] = {
    use Quadrant::*;
    [
        [SouthWest, SouthEast, NorthWest, NorthEast], // N
        [NorthEast, NorthWest, SouthEast, SouthWest], // E
        [SouthWest, SouthEast, NorthWest, NorthEast], // S
        [NorthEast, NorthWest, SouthEast, SouthWest], // W
    ]
};

/// Whether a quadrant touches its parent's edge facing `direction`,
/// indexed `[direction][quadrant]`.
const ADJACENT: [[bool; 4]; 4] = [
    [true, true, false, false], // N
    [false, true, false, true], // E
    [false, false, true, true], // S
    [true, false, true, false], // W
];

fn reflect(quadrant: Quadrant, direction: Direction) -> Quadrant {
    REFLECT[direction as usize][quadrant as usize]
}

fn adjacent(quadrant: Quadrant, direction: Direction) -> bool {
    ADJACENT[direction as usize][quadrant as usize]
}

fn search(nodes: &[QuadTreeNode], id: NodeId, direction: Direction) -> Option<NodeId> {
    let node = &nodes[id.index()];
    let (parent, quadrant) = match (node.parent(), node.quadrant()) {
        (Some(parent), Some(quadrant)) => (parent, quadrant),
        // The root has no neighbours.
        _ => return None,
    };

    let next = if adjacent(quadrant, direction) {
        search(nodes, parent, direction)?
    } else {
        parent
    };
    nodes[next.index()].child(reflect(quadrant, direction))
}

/// Neighbour of `id` in `direction`, or `None` off the tree edge or when the
/// same-depth neighbour does not exist or is a dummy.
pub fn find_neighbour(nodes: &[QuadTreeNode], id: NodeId, direction: Direction) -> Option<NodeId> {
    search(nodes, id, direction).filter(|n| !nodes[n.index()].is_dummy())
}

pub(crate) fn link_neighbours(nodes: &mut [QuadTreeNode]) {
    for i in 0..nodes.len() {
        let id = NodeId(i as u32);
        for direction in Direction::ALL {
            let raw = search(nodes, id, direction);
            let neighbour = raw.filter(|n| !nodes[n.index()].is_dummy());
            nodes[i].set_neighbour(direction, neighbour);
            nodes[i].set_stitch_neighbour(direction, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;
    use tessera_terrain::FlatStorage;

    use crate::quadtree::QuadTree;

    use super::*;

    fn tree(cells: i32) -> QuadTree {
        QuadTree::build(&FlatStorage::new(cells, cells).with_cell_vertices(3), 1.0)
    }

    fn step(direction: Direction) -> Vec2 {
        match direction {
            Direction::North => Vec2::Y,
            Direction::East => Vec2::X,
            Direction::South => -Vec2::Y,
            Direction::West => -Vec2::X,
        }
    }

    /// Mirroring a quadrant twice across the same edge is the identity.
    #[test]
    fn test_reflect_is_involution() {
        for d in Direction::ALL {
            for q in Quadrant::ALL {
                assert_eq!(reflect(reflect(q, d), d), q);
                // A quadrant on the edge mirrors to one that is not.
                assert_ne!(adjacent(q, d), adjacent(reflect(q, d), d));
            }
        }
    }

    /// Stored neighbours match geometric adjacency at every depth.
    #[test]
    fn test_neighbours_match_geometry() {
        let tree = tree(8);
        for id in tree.ids() {
            let node = tree.node(id);
            for d in Direction::ALL {
                let expected = node.center() + step(d) * node.size();
                let inside = (0.0..8.0).contains(&expected.x) && (0.0..8.0).contains(&expected.y);
                match node.neighbour(d) {
                    Some(n) => {
                        let n = tree.node(n);
                        assert_eq!(n.center(), expected);
                        assert_eq!(n.size(), node.size());
                    }
                    None => assert!(!inside || id == tree.root(), "missing neighbour"),
                }
            }
        }
    }

    #[test]
    fn test_root_and_edges_have_no_neighbours() {
        let tree = tree(4);
        let root = tree.node(tree.root());
        assert!(Direction::ALL.iter().all(|&d| root.neighbour(d).is_none()));

        let corner = tree.find_node(Vec2::new(0.5, 0.5)).unwrap();
        let corner = tree.node(corner);
        assert!(corner.neighbour(Direction::South).is_none());
        assert!(corner.neighbour(Direction::West).is_none());
        assert!(corner.neighbour(Direction::North).is_some());
        assert!(corner.neighbour(Direction::East).is_some());
    }

    /// Dummy neighbours are reported as absent.
    #[test]
    fn test_dummy_neighbour_is_absent() {
        let storage = FlatStorage::new(4, 4).with_missing_cell(1, 0);
        let tree = QuadTree::build(&storage, 1.0);
        let cell = tree.find_node(Vec2::new(0.5, 0.5)).unwrap();
        assert!(tree.node(cell).neighbour(Direction::East).is_none());
        assert!(tree.node(cell).neighbour(Direction::North).is_some());
    }

    /// The unfiltered link still points at a dummy neighbour.
    #[test]
    fn test_stitch_link_keeps_dummy() {
        let storage = FlatStorage::new(4, 4).with_missing_cell(1, 0);
        let tree = QuadTree::build(&storage, 1.0);
        let cell = tree.node(tree.find_node(Vec2::new(2.5, 0.5)).unwrap());
        assert!(cell.neighbour(Direction::West).is_none());

        let raw = cell.stitch_neighbour(Direction::West).unwrap();
        assert!(tree.node(raw).is_dummy());
        assert_eq!(tree.node(raw).center(), Vec2::new(1.5, 0.5));
        assert_eq!(cell.stitch_neighbour(Direction::East), cell.neighbour(Direction::East));
    }

    /// Neighbour links are symmetric for nodes of equal depth.
    #[test]
    fn test_links_symmetric_at_equal_depth() {
        let tree = tree(8);
        for id in tree.ids() {
            for d in Direction::ALL {
                if let Some(n) = tree.node(id).neighbour(d) {
                    assert_eq!(tree.node(n).neighbour(d.opposite()), Some(id));
                }
            }
        }
    }
}
