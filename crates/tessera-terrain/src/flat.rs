use glam::{Vec2, Vec3};
use rustc_hash::FxHashSet;

use crate::storage::{Bounds, LayerData, LayerInfo, Storage, VertexData};
use crate::vertex::{GridSample, fill_grid, vertex_has_data};

/// A rectangular grid of cells at a constant height.
///
/// Individual cells can be marked missing to model holes in the dataset.
/// Mostly useful for tests and for checking LOD behaviour in isolation from
/// terrain shape.
#[derive(Clone, Debug)]
pub struct FlatStorage {
    min_x: i32,
    min_y: i32,
    cells_x: i32,
    cells_y: i32,
    height: f32,
    cell_world_size: f32,
    cell_vertices: u32,
    missing: FxHashSet<(i32, i32)>,
}

impl FlatStorage {
    /// A `cells_x` by `cells_y` grid starting at cell `(0, 0)`.
    pub fn new(cells_x: i32, cells_y: i32) -> Self {
        Self {
            min_x: 0,
            min_y: 0,
            cells_x,
            cells_y,
            height: 0.0,
            cell_world_size: 64.0,
            cell_vertices: 17,
            missing: FxHashSet::default(),
        }
    }

    pub fn with_origin(mut self, min_x: i32, min_y: i32) -> Self {
        self.min_x = min_x;
        self.min_y = min_y;
        self
    }

    pub fn with_height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    pub fn with_cell_world_size(mut self, cell_world_size: f32) -> Self {
        self.cell_world_size = cell_world_size;
        self
    }

    pub fn with_cell_vertices(mut self, cell_vertices: u32) -> Self {
        self.cell_vertices = cell_vertices;
        self
    }

    /// Mark a cell as having no data.
    pub fn with_missing_cell(mut self, cell_x: i32, cell_y: i32) -> Self {
        self.missing.insert((cell_x, cell_y));
        self
    }

    fn in_bounds(&self, cell_x: i32, cell_y: i32) -> bool {
        cell_x >= self.min_x
            && cell_x < self.min_x + self.cells_x
            && cell_y >= self.min_y
            && cell_y < self.min_y + self.cells_y
    }
}

impl Storage for FlatStorage {
    fn bounds(&self) -> Bounds {
        Bounds::new(
            self.min_x as f32,
            (self.min_x + self.cells_x) as f32,
            self.min_y as f32,
            (self.min_y + self.cells_y) as f32,
        )
    }

    fn has_data(&self, cell_x: i32, cell_y: i32) -> bool {
        self.in_bounds(cell_x, cell_y) && !self.missing.contains(&(cell_x, cell_y))
    }

    fn min_max_height(&self, size: f32, center: Vec2) -> Option<(f32, f32)> {
        let half = size * 0.5;
        let x0 = (center.x - half).floor() as i32;
        let x1 = ((center.x + half).ceil() as i32).max(x0 + 1);
        let y0 = (center.y - half).floor() as i32;
        let y1 = ((center.y + half).ceil() as i32).max(y0 + 1);
        let any = (x0..x1).any(|x| (y0..y1).any(|y| self.has_data(x, y)));
        any.then_some((self.height, self.height))
    }

    fn fill_vertex_data(&self, lod: u8, size: f32, center: Vec2) -> VertexData {
        fill_grid(
            self.cell_vertices,
            self.cell_world_size,
            lod,
            size,
            center,
            |p| {
                vertex_has_data(p, |x, y| self.has_data(x, y)).then_some(GridSample {
                    height: self.height,
                    normal: Vec3::Z,
                    color: [255, 255, 255, 255],
                })
            },
        )
    }

    fn blend_layers(&self, _size: f32, _center: Vec2) -> LayerData {
        LayerData {
            layers: vec![LayerInfo::diffuse("default")],
            blend_maps: Vec::new(),
        }
    }

    fn cell_world_size(&self) -> f32 {
        self.cell_world_size
    }

    fn cell_vertices(&self) -> u32 {
        self.cell_vertices
    }
}
