//! The data-source contract consumed by the LOD engine.

use glam::Vec2;

/// Extent of the terrain dataset in cell units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn new(min_x: f32, max_x: f32, min_y: f32, max_y: f32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Per-vertex chunk data, laid out as a `verts x verts` grid.
///
/// Vertex `(x, y)` lives at index `x * verts + y`, the same layout the shared
/// index and UV buffers assume. Positions are relative to the chunk center in
/// world units, with z holding the height.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 4]>,
}

impl VertexData {
    /// Number of vertices in the grid.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Raw position bytes, ready for a vertex buffer upload.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Raw normal bytes, ready for a vertex buffer upload.
    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }

    /// Raw RGBA8 color bytes, ready for a vertex buffer upload.
    pub fn color_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.colors)
    }
}

/// One texture layer painted onto the terrain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LayerInfo {
    pub diffuse_map: String,
    pub normal_map: Option<String>,
    pub parallax: bool,
    pub specular: bool,
}

impl LayerInfo {
    /// A plain diffuse-only layer.
    pub fn diffuse(name: impl Into<String>) -> Self {
        Self {
            diffuse_map: name.into(),
            normal_map: None,
            parallax: false,
            specular: false,
        }
    }

    /// Whether this layer can only be drawn with shaders.
    pub fn requires_shaders(&self) -> bool {
        self.normal_map.is_some() || self.parallax || self.specular
    }
}

/// Square single-channel blend weights for one layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlendMap {
    pub size: u32,
    pub weights: Vec<u8>,
}

impl BlendMap {
    pub fn weight(&self, x: u32, y: u32) -> u8 {
        self.weights[(y * self.size + x) as usize]
    }
}

/// Texture layers for a footprint and the blend maps mixing them.
///
/// The first layer is the base and has no blend map; every further layer
/// has exactly one, so `blend_maps.len() == layers.len() - 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerData {
    pub layers: Vec<LayerInfo>,
    pub blend_maps: Vec<BlendMap>,
}

/// Terrain data source.
///
/// All methods may be called from worker threads. Sizes and centers are in
/// cell units; a chunk of `size` centered on `center` covers the square
/// `center ± size / 2`.
pub trait Storage: Send + Sync {
    /// Extent of the dataset in cell units. Called once during quadtree construction.
    fn bounds(&self) -> Bounds;

    /// Whether the cell at `(cell_x, cell_y)` has any backing data.
    fn has_data(&self, cell_x: i32, cell_y: i32) -> bool;

    /// Minimum and maximum height inside the footprint, or `None` when the
    /// footprint has no data.
    fn min_max_height(&self, size: f32, center: Vec2) -> Option<(f32, f32)>;

    /// Vertex grid for a chunk at vertex LOD `lod` (every `2^lod`-th
    /// heightfield vertex is kept).
    fn fill_vertex_data(&self, lod: u8, size: f32, center: Vec2) -> VertexData;

    /// Texture layers and blend weights for the footprint.
    fn blend_layers(&self, size: f32, center: Vec2) -> LayerData;

    /// World units spanned by one cell.
    fn cell_world_size(&self) -> f32;

    /// Heightfield vertices along one cell edge (including both ends).
    fn cell_vertices(&self) -> u32;
}
