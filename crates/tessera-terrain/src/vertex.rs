//! Chunk vertex grid construction shared by the storage implementations.

use glam::{Vec2, Vec3};

use crate::storage::VertexData;

/// Height used for vertices whose cell has no data.
pub const DEFAULT_HEIGHT: f32 = -2048.0;

const MISSING_COLOR: [u8; 4] = [255, 255, 255, 255];

/// One sampled heightfield vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSample {
    pub height: f32,
    pub normal: Vec3,
    pub color: [u8; 4],
}

/// Vertices along one edge of a chunk of `size` cells at vertex LOD `lod`.
///
/// `(cell_vertices - 1) * size / 2^lod + 1`, never less than 2.
pub fn vertex_count(cell_vertices: u32, size: f32, lod: u8) -> u32 {
    debug_assert!(cell_vertices >= 2, "a cell needs at least two vertices per edge");
    let increment = (1u32 << lod.min(31)) as f32;
    let segments = (cell_vertices.saturating_sub(1) as f32 * size / increment).floor() as u32;
    segments.max(1) + 1
}

/// Build the vertex grid of a chunk.
///
/// `sample` receives the cell-space coordinate of each vertex and returns
/// `None` where there is no data; those vertices get [`DEFAULT_HEIGHT`], an
/// up-facing normal and a white color.
pub fn fill_grid<F>(
    cell_vertices: u32,
    cell_world_size: f32,
    lod: u8,
    size: f32,
    center: Vec2,
    mut sample: F,
) -> VertexData
where
    F: FnMut(Vec2) -> Option<GridSample>,
{
    let verts = vertex_count(cell_vertices, size, lod) as usize;
    let count = verts * verts;
    let origin = center - Vec2::splat(size * 0.5);
    let step = 1.0 / (verts - 1) as f32;
    let world_size = size * cell_world_size;

    let mut data = VertexData {
        positions: Vec::with_capacity(count),
        normals: Vec::with_capacity(count),
        colors: Vec::with_capacity(count),
    };

    for vx in 0..verts {
        let fx = vx as f32 * step;
        for vy in 0..verts {
            let fy = vy as f32 * step;
            let cell_pos = origin + Vec2::new(fx, fy) * size;
            let s = sample(cell_pos).unwrap_or(GridSample {
                height: DEFAULT_HEIGHT,
                normal: Vec3::Z,
                color: MISSING_COLOR,
            });
            data.positions
                .push([(fx - 0.5) * world_size, (fy - 0.5) * world_size, s.height]);
            data.normals.push(s.normal.to_array());
            data.colors.push(s.color);
        }
    }

    data
}

/// Whether a vertex at cell-space `point` touches a cell with data.
///
/// Vertices on a cell boundary are shared by up to four cells; any one of
/// them having data is enough.
pub(crate) fn vertex_has_data(point: Vec2, has_data: impl Fn(i32, i32) -> bool) -> bool {
    let cx = point.x.floor() as i32;
    let cy = point.y.floor() as i32;
    let on_x = point.x == point.x.floor();
    let on_y = point.y == point.y.floor();
    let xs = if on_x { [cx - 1, cx] } else { [cx, cx] };
    let ys = if on_y { [cy - 1, cy] } else { [cy, cy] };
    xs.iter().any(|&x| ys.iter().any(|&y| has_data(x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_count_per_lod() {
        assert_eq!(vertex_count(17, 1.0, 0), 17);
        assert_eq!(vertex_count(17, 1.0, 1), 9);
        assert_eq!(vertex_count(17, 4.0, 2), 17);
        assert_eq!(vertex_count(17, 0.5, 0), 9);
        // Never collapses below a single quad.
        assert_eq!(vertex_count(3, 1.0, 4), 2);
    }

    /// Positions are centered on the chunk and laid out with x as the outer index.
    #[test]
    fn test_fill_grid_layout() {
        let data = fill_grid(3, 100.0, 0, 1.0, Vec2::new(0.5, 0.5), |p| {
            Some(GridSample {
                height: p.x * 10.0 + p.y,
                normal: Vec3::Z,
                color: [1, 2, 3, 4],
            })
        });
        assert_eq!(data.len(), 9);
        assert_eq!(data.positions[0], [-50.0, -50.0, 0.0]);
        // index = x * verts + y
        assert_eq!(data.positions[1], [-50.0, 0.0, 0.5]);
        assert_eq!(data.positions[3], [0.0, -50.0, 5.0]);
        assert_eq!(data.positions[8], [50.0, 50.0, 11.0]);
        assert!(data.colors.iter().all(|c| *c == [1, 2, 3, 4]));
    }

    #[test]
    fn test_missing_samples_use_defaults() {
        let data = fill_grid(2, 1.0, 0, 1.0, Vec2::ZERO, |_| None);
        assert!(data.positions.iter().all(|p| p[2] == DEFAULT_HEIGHT));
        assert!(data.normals.iter().all(|n| *n == [0.0, 0.0, 1.0]));
        assert!(data.colors.iter().all(|c| *c == MISSING_COLOR));
    }

    #[test]
    fn test_shared_boundary_vertex_sees_neighbour_cell() {
        let only_origin = |x: i32, y: i32| x == 0 && y == 0;
        assert!(vertex_has_data(Vec2::new(0.5, 0.5), only_origin));
        assert!(vertex_has_data(Vec2::new(1.0, 1.0), only_origin));
        assert!(!vertex_has_data(Vec2::new(1.5, 0.5), only_origin));
        assert!(!vertex_has_data(Vec2::new(2.0, 0.0), only_origin));
    }
}
