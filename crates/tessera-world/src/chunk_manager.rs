//! Creation and caching of terrain chunks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec2, Vec3};
use tessera_lod::StitchFlags;
use tessera_math::Rect;
use tessera_mesh::BufferCache;
use tessera_terrain::{Storage, vertex_count};

use crate::chunk::{ChunkKey, ChunkSurface, TerrainChunk};
use crate::composite::{CompositeMap, CompositeMapId, CompositeMapRenderer, CompositeTile};
use crate::object_cache::ObjectCache;
use crate::settings::WorldSettings;

/// Sizes of the caches held by a [`ChunkManager`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub chunks: usize,
    pub index_buffers: usize,
    pub uv_buffers: usize,
    pub pending_composite_maps: usize,
}

/// Builds [`TerrainChunk`]s from a [`Storage`] and caches them by
/// `(size, center, lod, stitch flags)`.
pub struct ChunkManager {
    storage: Arc<dyn Storage>,
    cache: ObjectCache<ChunkKey, TerrainChunk>,
    buffers: BufferCache,
    renderer: CompositeMapRenderer,
    next_composite_id: AtomicU64,
    composite_map_level: f32,
    composite_map_size: u32,
    max_composite_geometry_size: f32,
    expiry_delay: f64,
}

impl ChunkManager {
    pub fn new(storage: Arc<dyn Storage>, settings: &WorldSettings) -> Self {
        Self {
            storage,
            cache: ObjectCache::new(),
            buffers: BufferCache::new(),
            renderer: CompositeMapRenderer::new(settings.composite_maps_per_frame),
            next_composite_id: AtomicU64::new(1),
            composite_map_level: settings.composite_map_level,
            composite_map_size: settings.composite_map_size,
            max_composite_geometry_size: settings.max_composite_geometry_size,
            expiry_delay: settings.chunk_expiry_delay,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn buffer_cache(&self) -> &BufferCache {
        &self.buffers
    }

    pub fn composite_map_renderer(&self) -> &CompositeMapRenderer {
        &self.renderer
    }

    /// The chunk for `(size, center, lod, flags)`, created on first request.
    ///
    /// Equal arguments return the same `Arc`. With `compile_now`, the chunk's
    /// composite map (if any, and still pending) is compiled on the next
    /// frame instead of waiting for its turn.
    #[allow(clippy::too_many_arguments)]
    pub fn get_chunk(
        &self,
        size: f32,
        center: Vec2,
        lod: u8,
        flags: StitchFlags,
        is_always_resident: bool,
        viewpoint: Vec3,
        compile_now: bool,
    ) -> Arc<TerrainChunk> {
        let key = ChunkKey::new(size, center, lod, flags);
        self.resolve(key, is_always_resident, viewpoint, compile_now).0
    }

    /// Like [`get_chunk`](Self::get_chunk), also reporting whether the
    /// chunk was already cached.
    pub(crate) fn resolve(
        &self,
        key: ChunkKey,
        is_always_resident: bool,
        viewpoint: Vec3,
        compile_now: bool,
    ) -> (Arc<TerrainChunk>, bool) {
        if let Some(chunk) = self.cache.get(&key) {
            if compile_now
                && let Some(map) = chunk.composite_map()
            {
                self.renderer.set_immediate(map);
            }
            return (chunk, true);
        }

        let template = self.find_template(&key);
        let chunk = Arc::new(self.create_chunk(key, template.as_deref(), viewpoint));
        let cached = self.cache.insert(key, Arc::clone(&chunk));
        if !Arc::ptr_eq(&cached, &chunk) {
            // Another thread created the same chunk first.
            return (cached, true);
        }

        if let Some(map) = chunk.composite_map() {
            self.renderer
                .add_composite_map(Arc::clone(map), compile_now || is_always_resident);
        }
        (chunk, false)
    }

    /// A cached chunk with the same grid as `key` but any stitch flags.
    fn find_template(&self, key: &ChunkKey) -> Option<Arc<TerrainChunk>> {
        let (found, chunk) = self.cache.lower_bound(&key.with_flags(StitchFlags::NONE))?;
        found.same_grid(key).then_some(chunk)
    }

    fn create_chunk(&self, key: ChunkKey, template: Option<&TerrainChunk>, viewpoint: Vec3) -> TerrainChunk {
        let storage = self.storage.as_ref();
        let (size, center, lod) = (key.size(), key.center(), key.lod());

        let (vertices, surface) = match template {
            Some(template) => (Arc::clone(template.vertices()), template.surface().clone()),
            None => {
                let vertices = Arc::new(storage.fill_vertex_data(lod, size, center));
                let surface = if size > self.composite_map_level {
                    ChunkSurface::Composite(Arc::new(self.create_composite_map(key)))
                } else {
                    ChunkSurface::Layers(Arc::new(storage.blend_layers(size, center)))
                };
                (vertices, surface)
            }
        };

        let verts = vertex_count(storage.cell_vertices(), size, lod);
        debug_assert_eq!(vertices.len(), (verts * verts) as usize, "storage returned a mismatched grid");

        let cell_world_size = storage.cell_world_size();
        let world_center = Vec3::new(center.x * cell_world_size, center.y * cell_world_size, 0.0);
        tracing::debug!(
            "Chunk miss: size {} at ({}, {}) lod {} flags {:#06x}, {} verts, {:.0} units away{}",
            size,
            center.x,
            center.y,
            lod,
            key.flags().bits(),
            verts,
            viewpoint.distance(world_center),
            if template.is_some() { " (template)" } else { "" },
        );

        TerrainChunk::new(
            key,
            world_center,
            verts,
            vertices,
            self.buffers.index_buffer(verts, key.flags()),
            self.buffers.uv_buffer(verts),
            surface,
        )
    }

    fn create_composite_map(&self, key: ChunkKey) -> CompositeMap {
        let mut tiles = Vec::new();
        self.collect_composite_tiles(
            key.size(),
            key.center(),
            Rect::new(Vec2::ZERO, Vec2::ONE),
            &mut tiles,
        );
        let id = CompositeMapId(self.next_composite_id.fetch_add(1, Ordering::Relaxed));
        CompositeMap::new(id, key, self.composite_map_size, tiles)
    }

    /// Split the chunk into quarters until each piece is at most
    /// `max_composite_geometry_size` cells wide.
    ///
    /// Texture v grows southwards, so northern quarters land in the top half.
    fn collect_composite_tiles(&self, size: f32, center: Vec2, target: Rect, tiles: &mut Vec<CompositeTile>) {
        if size > self.max_composite_geometry_size {
            let quarter = size * 0.5;
            let offset = quarter * 0.5;
            let half = (target.max - target.min) * 0.5;
            let quadrants = [
                (Vec2::new(-offset, offset), Vec2::new(0.0, 0.0)),
                (Vec2::new(offset, offset), Vec2::new(half.x, 0.0)),
                (Vec2::new(-offset, -offset), Vec2::new(0.0, half.y)),
                (Vec2::new(offset, -offset), Vec2::new(half.x, half.y)),
            ];
            for (center_offset, target_offset) in quadrants {
                let min = target.min + target_offset;
                self.collect_composite_tiles(quarter, center + center_offset, Rect::new(min, min + half), tiles);
            }
            return;
        }

        tiles.push(CompositeTile {
            size,
            center,
            target,
            layers: self.storage.blend_layers(size, center),
        });
    }

    /// Refresh timestamps of chunks still in use and drop those unused for
    /// longer than the expiry delay. Returns how many were dropped.
    pub fn update_cache(&self, reference_time: f64) -> usize {
        self.cache.update_timestamps(reference_time);
        let removed = self.cache.remove_expired(self.expiry_delay);
        if removed > 0 {
            tracing::trace!("Expired {} terrain chunks, {} cached", removed, self.cache.len());
        }
        removed
    }

    /// Drop every cached chunk and shared buffer. Chunks still held
    /// elsewhere stay valid.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.buffers.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            chunks: self.cache.len(),
            index_buffers: self.buffers.index_buffer_count(),
            uv_buffers: self.buffers.uv_buffer_count(),
            pending_composite_maps: self.renderer.pending_count(),
        }
    }

    /// Visit every cached chunk.
    pub fn for_each_chunk(&self, mut f: impl FnMut(&Arc<TerrainChunk>)) {
        self.cache.for_each(|_, chunk| f(chunk));
    }
}

#[cfg(test)]
mod tests {
    use tessera_lod::Direction;
    use tessera_terrain::FlatStorage;

    use super::*;

    fn manager(cells: i32) -> ChunkManager {
        let settings = WorldSettings {
            composite_map_level: 4.0,
            max_composite_geometry_size: 2.0,
            composite_maps_per_frame: 1,
            chunk_expiry_delay: 5.0,
            ..WorldSettings::default()
        };
        ChunkManager::new(Arc::new(FlatStorage::new(cells, cells)), &settings)
    }

    fn get(manager: &ChunkManager, size: f32, center: Vec2, flags: StitchFlags, compile_now: bool) -> Arc<TerrainChunk> {
        let lod = tessera_lod::vertex_lod(size, 0);
        manager.get_chunk(size, center, lod, flags, false, Vec3::ZERO, compile_now)
    }

    #[test]
    fn test_equal_keys_share_instance() {
        let manager = manager(8);
        let a = get(&manager, 2.0, Vec2::new(1.0, 1.0), StitchFlags::NONE, false);
        let b = get(&manager, 2.0, Vec2::new(1.0, 1.0), StitchFlags::NONE, false);
        assert!(Arc::ptr_eq(&a, &b));

        let other_center = get(&manager, 2.0, Vec2::new(3.0, 1.0), StitchFlags::NONE, false);
        let other_lod = manager.get_chunk(2.0, Vec2::new(1.0, 1.0), 0, StitchFlags::NONE, false, Vec3::ZERO, false);
        assert!(!Arc::ptr_eq(&a, &other_center));
        assert!(!Arc::ptr_eq(&a, &other_lod));
        assert_eq!(manager.cache_stats().chunks, 3);
    }

    /// Chunks differing only in stitching share vertices and surface.
    #[test]
    fn test_flag_variants_reuse_template() {
        let manager = manager(8);
        let center = Vec2::new(1.0, 1.0);
        let plain = get(&manager, 2.0, center, StitchFlags::NONE, false);
        let stitched = get(&manager, 2.0, center, StitchFlags::NONE.with_delta(Direction::North, 1), false);

        assert!(!Arc::ptr_eq(&plain, &stitched));
        assert!(plain.shares_vertices_with(&stitched));
        assert!(Arc::ptr_eq(plain.layers().unwrap(), stitched.layers().unwrap()));
        assert!(!Arc::ptr_eq(plain.index_buffer(), stitched.index_buffer()));
        assert!(Arc::ptr_eq(plain.uv_buffer(), stitched.uv_buffer()));
    }

    #[test]
    fn test_vertex_count_follows_lod() {
        let manager = manager(8);
        // 17 vertices per cell edge, 4 cells, lod 2: 16 * 4 / 4 + 1.
        let chunk = manager.get_chunk(4.0, Vec2::new(2.0, 2.0), 2, StitchFlags::NONE, false, Vec3::ZERO, false);
        assert_eq!(chunk.verts(), 17);
        assert_eq!(chunk.vertices().len(), 17 * 17);
        assert_eq!(chunk.world_center(), Vec3::new(128.0, 128.0, 0.0));
        assert_eq!(chunk.uv_sets(), 2);
    }

    /// Only chunks above the composite level get a composite map, split
    /// into tiles no larger than the geometry limit.
    #[test]
    fn test_composite_threshold_and_tiles() {
        let manager = manager(8);
        let layered = get(&manager, 4.0, Vec2::new(2.0, 2.0), StitchFlags::NONE, false);
        assert!(layered.composite_map().is_none());

        let composite = get(&manager, 8.0, Vec2::new(4.0, 4.0), StitchFlags::NONE, false);
        assert_eq!(composite.uv_sets(), 1);
        let map = composite.composite_map().unwrap();
        assert_eq!(map.tiles().len(), 16);
        assert!(map.tiles().iter().all(|t| t.size == 2.0));
        let area: f32 = map.tiles().iter().map(|t| t.target.area()).sum();
        assert!((area - 1.0).abs() < 1e-6);

        // The north-west tile is drawn in the top-left corner of the texture.
        let north_west = map
            .tiles()
            .iter()
            .find(|t| t.center == Vec2::new(1.0, 7.0))
            .unwrap();
        assert_eq!(north_west.target, Rect::new(Vec2::ZERO, Vec2::splat(0.25)));
    }

    /// A compile-now request for a cached chunk promotes its pending map.
    #[test]
    fn test_compile_now_moves_map_to_immediate_queue() {
        let manager = manager(8);
        let center = Vec2::new(4.0, 4.0);
        let first = get(&manager, 8.0, center, StitchFlags::NONE, false);
        let second = get(&manager, 8.0, center, StitchFlags::NONE, false);
        let renderer = manager.composite_map_renderer();
        assert_eq!(renderer.pending_count(), 1);
        assert_eq!(renderer.immediate_count(), 0);

        let third = get(&manager, 8.0, center, StitchFlags::NONE, true);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(renderer.pending_count(), 1);
        assert_eq!(renderer.immediate_count(), 1);
        assert!(renderer.is_immediate(first.composite_map().unwrap()));
    }

    #[test]
    fn test_always_resident_chunks_queue_immediately() {
        let manager = manager(8);
        let chunk = manager.get_chunk(8.0, Vec2::new(4.0, 4.0), 3, StitchFlags::NONE, true, Vec3::ZERO, false);
        assert!(manager.composite_map_renderer().is_immediate(chunk.composite_map().unwrap()));
    }

    /// Chunks expire once nobody holds them for longer than the delay.
    #[test]
    fn test_update_cache_expires_unused_chunks() {
        let manager = manager(8);
        let held = get(&manager, 1.0, Vec2::new(0.5, 0.5), StitchFlags::NONE, false);
        get(&manager, 1.0, Vec2::new(1.5, 0.5), StitchFlags::NONE, false);

        assert_eq!(manager.update_cache(1.0), 0);
        assert_eq!(manager.update_cache(10.0), 1);
        assert_eq!(manager.cache_stats().chunks, 1);

        let again = get(&manager, 1.0, Vec2::new(0.5, 0.5), StitchFlags::NONE, false);
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn test_clear_cache_and_stats() {
        let manager = manager(8);
        get(&manager, 1.0, Vec2::new(0.5, 0.5), StitchFlags::NONE, false);
        manager.get_chunk(2.0, Vec2::new(1.0, 1.0), 0, StitchFlags::NONE, false, Vec3::ZERO, false);
        let stats = manager.cache_stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.uv_buffers, 2);
        assert_eq!(stats.index_buffers, 2);

        let mut visited = 0;
        manager.for_each_chunk(|_| visited += 1);
        assert_eq!(visited, 2);

        manager.clear_cache();
        let stats = manager.cache_stats();
        assert_eq!((stats.chunks, stats.index_buffers, stats.uv_buffers), (0, 0, 0));
    }
}
