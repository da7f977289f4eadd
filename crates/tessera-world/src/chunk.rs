//! Renderable terrain chunks and the key they are cached under.

use std::sync::Arc;

use glam::{Vec2, Vec3};
use tessera_lod::StitchFlags;
use tessera_mesh::{IndexBuffer, UvBuffer};
use tessera_terrain::{LayerData, VertexData};

use crate::composite::CompositeMap;

/// Bit pattern of `value` with `-0.0` folded into `0.0`, so keys that
/// compare equal as floats also compare equal as bits.
fn float_key(value: f32) -> u32 {
    if value == 0.0 { 0 } else { value.to_bits() }
}

/// Cache key of a chunk: `(size, center, lod, stitch flags)`.
///
/// Keys order by size, then center, then lod, then flags. All keys that
/// differ only in their flags are therefore adjacent, with
/// [`StitchFlags::NONE`] first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    size: u32,
    center_x: u32,
    center_y: u32,
    lod: u8,
    flags: StitchFlags,
}

impl ChunkKey {
    pub fn new(size: f32, center: Vec2, lod: u8, flags: StitchFlags) -> Self {
        Self {
            size: float_key(size),
            center_x: float_key(center.x),
            center_y: float_key(center.y),
            lod,
            flags,
        }
    }

    pub fn size(&self) -> f32 {
        f32::from_bits(self.size)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(f32::from_bits(self.center_x), f32::from_bits(self.center_y))
    }

    pub fn lod(&self) -> u8 {
        self.lod
    }

    pub fn flags(&self) -> StitchFlags {
        self.flags
    }

    pub fn with_flags(self, flags: StitchFlags) -> Self {
        Self { flags, ..self }
    }

    /// Whether `other` describes the same grid, ignoring stitching.
    pub fn same_grid(&self, other: &ChunkKey) -> bool {
        self.with_flags(StitchFlags::NONE) == other.with_flags(StitchFlags::NONE)
    }
}

/// How a chunk is textured.
#[derive(Clone, Debug)]
pub enum ChunkSurface {
    /// Texture layers blended at draw time.
    Layers(Arc<LayerData>),
    /// A single pre-baked texture.
    Composite(Arc<CompositeMap>),
}

/// A renderable terrain patch.
///
/// Chunks with the same grid but different stitch flags share their vertex
/// data and surface; only the index buffer differs.
#[derive(Debug)]
pub struct TerrainChunk {
    key: ChunkKey,
    world_center: Vec3,
    verts: u32,
    vertices: Arc<VertexData>,
    index_buffer: Arc<IndexBuffer>,
    uv_buffer: UvBuffer,
    uv_sets: u32,
    surface: ChunkSurface,
}

impl TerrainChunk {
    pub(crate) fn new(
        key: ChunkKey,
        world_center: Vec3,
        verts: u32,
        vertices: Arc<VertexData>,
        index_buffer: Arc<IndexBuffer>,
        uv_buffer: UvBuffer,
        surface: ChunkSurface,
    ) -> Self {
        let uv_sets = match surface {
            ChunkSurface::Composite(_) => 1,
            ChunkSurface::Layers(_) => 2,
        };
        Self {
            key,
            world_center,
            verts,
            vertices,
            index_buffer,
            uv_buffer,
            uv_sets,
            surface,
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// World-space translation of the chunk; vertex positions are relative to it.
    pub fn world_center(&self) -> Vec3 {
        self.world_center
    }

    /// Vertices along one edge of the grid.
    pub fn verts(&self) -> u32 {
        self.verts
    }

    pub fn vertices(&self) -> &Arc<VertexData> {
        &self.vertices
    }

    pub fn index_buffer(&self) -> &Arc<IndexBuffer> {
        &self.index_buffer
    }

    pub fn uv_buffer(&self) -> &UvBuffer {
        &self.uv_buffer
    }

    /// Number of texture coordinate sets the chunk is drawn with.
    pub fn uv_sets(&self) -> u32 {
        self.uv_sets
    }

    pub fn surface(&self) -> &ChunkSurface {
        &self.surface
    }

    pub fn composite_map(&self) -> Option<&Arc<CompositeMap>> {
        match &self.surface {
            ChunkSurface::Composite(map) => Some(map),
            ChunkSurface::Layers(_) => None,
        }
    }

    pub fn layers(&self) -> Option<&Arc<LayerData>> {
        match &self.surface {
            ChunkSurface::Layers(layers) => Some(layers),
            ChunkSurface::Composite(_) => None,
        }
    }

    /// Whether both chunks draw from the same vertex data.
    pub fn shares_vertices_with(&self, other: &TerrainChunk) -> bool {
        Arc::ptr_eq(&self.vertices, &other.vertices)
    }
}

#[cfg(test)]
mod tests {
    use tessera_lod::Direction;

    use super::*;

    #[test]
    fn test_key_round_trips_fields() {
        let flags = StitchFlags::NONE.with_delta(Direction::West, 2);
        let key = ChunkKey::new(0.5, Vec2::new(-3.25, 7.75), 0, flags);
        assert_eq!(key.size(), 0.5);
        assert_eq!(key.center(), Vec2::new(-3.25, 7.75));
        assert_eq!(key.lod(), 0);
        assert_eq!(key.flags(), flags);
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let a = ChunkKey::new(1.0, Vec2::new(0.0, 2.0), 0, StitchFlags::NONE);
        let b = ChunkKey::new(1.0, Vec2::new(-0.0, 2.0), 0, StitchFlags::NONE);
        assert_eq!(a, b);
    }

    /// Flag variants of one grid sort directly after its unstitched key.
    #[test]
    fn test_flag_variants_are_adjacent() {
        let center = Vec2::new(4.0, 4.0);
        let base = ChunkKey::new(8.0, center, 3, StitchFlags::NONE);
        let stitched = base.with_flags(StitchFlags::from_bits(0x0101));
        let next_lod = ChunkKey::new(8.0, center, 4, StitchFlags::NONE);
        let next_center = ChunkKey::new(8.0, Vec2::new(4.0, 12.0), 0, StitchFlags::NONE);

        assert!(base < stitched);
        assert!(stitched < next_lod);
        assert!(next_lod < next_center);
        assert!(base.same_grid(&stitched));
        assert!(!base.same_grid(&next_lod));
    }
}
