//! The per-frame entry point: selection, stitching, chunk resolution and
//! submission for each observer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use glam::Vec3;
use tessera_lod::{
    LodPolicy, ObserverId, QuadTree, SelectionParams, StitchFlags, ViewData, ViewDataMap,
    compute_stitch_flags, select_nodes, vertex_lod,
};
use tessera_math::{Rect, is_power_of_two};
use tessera_terrain::Storage;

use crate::chunk::{ChunkKey, TerrainChunk};
use crate::chunk_manager::ChunkManager;
use crate::composite::{CompositeMapCompiler, CompositeMapRenderer};
use crate::error::WorldError;
use crate::settings::WorldSettings;

/// A selection whose entries hold resolved chunks.
pub type TerrainView = ViewData<Arc<TerrainChunk>>;

/// Receives the chunks to draw this frame.
pub trait ChunkSink {
    fn submit(&mut self, chunk: &Arc<TerrainChunk>);
}

impl ChunkSink for Vec<Arc<TerrainChunk>> {
    fn submit(&mut self, chunk: &Arc<TerrainChunk>) {
        self.push(Arc::clone(chunk));
    }
}

/// What one [`World::update`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Chunks submitted to the sink.
    pub selected: usize,
    /// Entries that needed a chunk this frame.
    pub resolved: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// The observer's selection was reused instead of recomputed.
    pub reused_view: bool,
    /// The selection differs from the previous pass.
    pub changed: bool,
}

/// Result of [`World::preload`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreloadOutcome {
    /// Chunks resolved over all passes.
    pub resolved: usize,
    pub aborted: bool,
}

#[derive(Default)]
struct Resolution {
    hits: usize,
    misses: usize,
    aborted: bool,
}

/// Progress units of a node: its size in cells, at least one.
fn progress_units(size: f32) -> usize {
    size.max(1.0) as usize
}

/// Terrain LOD state shared by every observer of one [`Storage`].
///
/// `World` is `Sync`: the render thread calls [`update`](Self::update)
/// while background threads run [`preload`](Self::preload).
pub struct World {
    settings: WorldSettings,
    policy: LodPolicy,
    storage: Arc<dyn Storage>,
    tree: OnceLock<QuadTree>,
    views: Mutex<ViewDataMap<Arc<TerrainChunk>>>,
    chunks: ChunkManager,
}

static_assertions::assert_impl_all!(World: Send, Sync);

impl World {
    pub fn new(storage: Arc<dyn Storage>, settings: WorldSettings) -> Result<Self, WorldError> {
        if storage.bounds().is_empty() {
            return Err(WorldError::EmptyBounds);
        }
        if !is_power_of_two(settings.min_chunk_size) {
            return Err(WorldError::InvalidMinChunkSize(settings.min_chunk_size));
        }

        let policy = settings.lod_policy(storage.cell_world_size());
        let views = ViewDataMap::new(settings.view_reuse_distance, settings.view_expiry_delay);
        let chunks = ChunkManager::new(Arc::clone(&storage), &settings);
        Ok(Self {
            settings,
            policy,
            storage,
            tree: OnceLock::new(),
            views: Mutex::new(views),
            chunks,
        })
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The quadtree, built on first use.
    pub fn quad_tree(&self) -> &QuadTree {
        self.tree
            .get_or_init(|| QuadTree::build(self.storage.as_ref(), self.settings.min_chunk_size))
    }

    pub fn chunk_manager(&self) -> &ChunkManager {
        &self.chunks
    }

    pub fn composite_map_renderer(&self) -> &CompositeMapRenderer {
        self.chunks.composite_map_renderer()
    }

    fn lock_views(&self) -> MutexGuard<'_, ViewDataMap<Arc<TerrainChunk>>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select, resolve and submit the chunks `observer` sees from `viewpoint`.
    ///
    /// Every chunk is resolved before the first one reaches `sink`. The view
    /// map is locked only to look the view up and to store it back, so other
    /// observers are not held up while chunks compile. An observer is updated
    /// from one thread at a time.
    pub fn update(
        &self,
        observer: ObserverId,
        viewpoint: Vec3,
        active_region: Option<Rect>,
        reference_time: f64,
        sink: &mut dyn ChunkSink,
    ) -> FrameStats {
        let tree = self.quad_tree();
        let (mut view, needs_update) = self
            .lock_views()
            .checkout_view(observer, viewpoint, active_region, reference_time);

        if needs_update {
            view.reset();
            self.select(tree, &mut view, viewpoint, active_region.as_ref(), 0.0);
        }

        let changed = view.has_changed();
        if changed {
            self.update_stitch_flags(tree, &mut view);
        }

        let never = AtomicBool::new(false);
        let resolution = self.resolve_entries(tree, &mut view, viewpoint, false, &never, None);

        let mut selected = 0;
        for entry in view.entries() {
            if let Some(chunk) = &entry.handle {
                sink.submit(chunk);
                selected += 1;
            }
        }

        view.mark_unchanged();
        self.lock_views().checkin_view(observer, view);

        FrameStats {
            selected,
            resolved: resolution.hits + resolution.misses,
            cache_hits: resolution.hits,
            cache_misses: resolution.misses,
            reused_view: !needs_update,
            changed,
        }
    }

    /// Resolve the chunks an observer at `viewpoint` would need, into `view`.
    ///
    /// Every chunk is requested with `compile_now`. The node sizes of the
    /// first pass are added to `progress_total` up front and to `progress`
    /// as each entry completes. `abort` is checked before each chunk; chunks
    /// resolved before an abort stay cached.
    ///
    /// When a preload distance margin is set, two more passes select with
    /// the margin added and subtracted, warming the cache for small
    /// movements. Their results do not land in `view`.
    pub fn preload(
        &self,
        view: &mut TerrainView,
        viewpoint: Vec3,
        active_region: Option<Rect>,
        abort: &AtomicBool,
        progress: &AtomicUsize,
        progress_total: &AtomicUsize,
    ) -> PreloadOutcome {
        let tree = self.quad_tree();
        view.reset();
        view.set_viewpoint(viewpoint);
        view.set_active_region(active_region);
        self.select(tree, view, viewpoint, active_region.as_ref(), 0.0);

        let total: usize = view
            .entries()
            .iter()
            .map(|e| progress_units(tree.node(e.node).size()))
            .sum();
        progress_total.fetch_add(total, Ordering::Relaxed);

        self.update_stitch_flags(tree, view);
        let first = self.resolve_entries(tree, view, viewpoint, true, abort, Some(progress));
        let mut outcome = PreloadOutcome {
            resolved: first.hits + first.misses,
            aborted: first.aborted,
        };

        let margin = self.settings.preload_distance_margin;
        if !outcome.aborted && margin > 0.0 {
            let mut scratch = self.create_view();
            scratch.set_active_region(active_region);
            for modifier in [margin, -margin] {
                scratch.reset();
                self.select(tree, &mut scratch, viewpoint, active_region.as_ref(), modifier);
                self.update_stitch_flags(tree, &mut scratch);
                let pass = self.resolve_entries(tree, &mut scratch, viewpoint, true, abort, None);
                outcome.resolved += pass.hits + pass.misses;
                if pass.aborted {
                    outcome.aborted = true;
                    break;
                }
            }
        }

        tracing::debug!(
            "Preload at ({:.0}, {:.0}, {:.0}): {} chunks resolved{}",
            viewpoint.x,
            viewpoint.y,
            viewpoint.z,
            outcome.resolved,
            if outcome.aborted { ", aborted" } else { "" },
        );
        outcome
    }

    /// A fresh view for [`preload`](Self::preload).
    pub fn create_view(&self) -> TerrainView {
        self.lock_views().create_view()
    }

    /// Keep a preloaded view so observers near it can reuse it.
    pub fn store_view(&self, view: &TerrainView, timestamp: f64) -> ObserverId {
        self.lock_views().store_view(view, timestamp)
    }

    /// Release views unused for longer than the view expiry delay, then
    /// expire chunks nobody references.
    pub fn update_cache(&self, reference_time: f64) {
        let released = self.lock_views().clear_unused_views(reference_time);
        let expired = self.chunks.update_cache(reference_time);
        if released > 0 || expired > 0 {
            tracing::debug!("Cache update: {} views released, {} chunks expired", released, expired);
        }
    }

    pub fn clear_cache(&self) {
        self.chunks.clear_cache();
    }

    /// Force every observer to re-select on its next update.
    pub fn rebuild_views(&self) {
        self.lock_views().rebuild_views();
    }

    /// Compile pending composite maps within the per-frame budget.
    pub fn render_composite_maps(&self, compiler: &dyn CompositeMapCompiler) -> usize {
        self.chunks.composite_map_renderer().render_frame(compiler)
    }

    fn select(
        &self,
        tree: &QuadTree,
        view: &mut TerrainView,
        viewpoint: Vec3,
        active_region: Option<&Rect>,
        distance_modifier: f32,
    ) {
        let params = SelectionParams {
            viewpoint,
            policy: &self.policy,
            active_region,
            distance_modifier,
        };
        select_nodes(tree, &params, view);
    }

    /// Recompute stitch flags and drop handles whose flags changed.
    fn update_stitch_flags(&self, tree: &QuadTree, view: &mut TerrainView) {
        let lod_mod = self.settings.vertex_lod_mod;
        let current: &TerrainView = view;
        let flags: Vec<StitchFlags> = current
            .entries()
            .iter()
            .map(|e| compute_stitch_flags(tree, current, e.node, lod_mod))
            .collect();
        for (entry, flags) in view.entries_mut().iter_mut().zip(flags) {
            if entry.stitch_flags != flags {
                entry.stitch_flags = flags;
                entry.handle = None;
            }
        }
    }

    fn resolve_entries(
        &self,
        tree: &QuadTree,
        view: &mut TerrainView,
        viewpoint: Vec3,
        compile_now: bool,
        abort: &AtomicBool,
        progress: Option<&AtomicUsize>,
    ) -> Resolution {
        let region = view.active_region().copied();
        let renderer = self.chunks.composite_map_renderer();
        let mut resolution = Resolution::default();

        for entry in view.entries_mut() {
            let footprint = tree.node(entry.node).footprint();
            if entry.handle.is_none() {
                if abort.load(Ordering::Relaxed) {
                    resolution.aborted = true;
                    break;
                }
                let always_resident = region.as_ref().is_some_and(|r| footprint.rect().overlaps(r));
                let lod = vertex_lod(footprint.size, self.settings.vertex_lod_mod);
                let key = ChunkKey::new(footprint.size, footprint.center, lod, entry.stitch_flags);
                let (chunk, hit) = self.chunks.resolve(key, always_resident, viewpoint, compile_now);
                if hit {
                    resolution.hits += 1;
                    if let Some(map) = chunk.composite_map() {
                        renderer.set_immediate(map);
                    }
                } else {
                    resolution.misses += 1;
                }
                tracing::trace!("Resolved {:?} ({})", key, if hit { "hit" } else { "miss" });
                entry.handle = Some(chunk);
            }
            if let Some(progress) = progress {
                progress.fetch_add(progress_units(footprint.size), Ordering::Relaxed);
            }
        }
        resolution
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use glam::Vec2;
    use tessera_lod::Direction;
    use tessera_terrain::FlatStorage;

    use super::*;
    use crate::composite::{CompositeMap, TextureHandle};

    const CWS: f32 = 64.0;

    fn world(cells: i32, settings: WorldSettings) -> World {
        let storage = FlatStorage::new(cells, cells)
            .with_cell_world_size(CWS)
            .with_cell_vertices(3);
        World::new(Arc::new(storage), settings).unwrap()
    }

    fn near_settings() -> WorldSettings {
        WorldSettings {
            lod_factor: 10.0,
            min_chunk_size: 1.0,
            max_view_distance: 1.0e6,
            view_reuse_distance: 100.0,
            preload_distance_margin: 0.0,
            ..WorldSettings::default()
        }
    }

    fn sink() -> Vec<Arc<TerrainChunk>> {
        Vec::new()
    }

    struct NullCompiler;

    impl CompositeMapCompiler for NullCompiler {
        fn compile(&self, _map: &CompositeMap) -> TextureHandle {
            TextureHandle(7)
        }
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let empty = Arc::new(FlatStorage::new(0, 0));
        assert!(matches!(World::new(empty, near_settings()), Err(WorldError::EmptyBounds)));

        let storage = Arc::new(FlatStorage::new(4, 4));
        let settings = WorldSettings {
            min_chunk_size: 3.0,
            ..near_settings()
        };
        assert!(matches!(
            World::new(storage, settings),
            Err(WorldError::InvalidMinChunkSize(s)) if s == 3.0
        ));
    }

    /// A close observer on flat 8x8 data draws all 64 single cells.
    #[test]
    fn test_near_observer_selects_every_cell() {
        let world = world(8, near_settings());
        let mut chunks = sink();
        let stats = world.update(ObserverId(1), Vec3::new(256.0, 256.0, 0.0), None, 0.0, &mut chunks);

        assert_eq!(stats.selected, 64);
        assert_eq!(stats.cache_misses, 64);
        assert!(stats.changed);
        assert!(!stats.reused_view);
        assert!(chunks.iter().all(|c| c.key().size() == 1.0));
        assert!(chunks.iter().all(|c| c.key().flags().is_empty()));
        let distinct: HashSet<_> = chunks.iter().map(|c| c.key()).collect();
        assert_eq!(distinct.len(), 64);
    }

    /// A nearby second observer reuses the first selection and its chunks.
    #[test]
    fn test_second_observer_reuses_view() {
        let world = world(8, near_settings());
        let mut first = sink();
        world.update(ObserverId(1), Vec3::new(256.0, 256.0, 0.0), None, 0.0, &mut first);

        let mut second = sink();
        let stats = world.update(ObserverId(2), Vec3::new(260.0, 250.0, 0.0), None, 0.0, &mut second);
        assert!(stats.reused_view);
        assert_eq!(stats.resolved, 0);
        assert_eq!(first.len(), second.len());
        assert!(first.iter().zip(&second).all(|(a, b)| Arc::ptr_eq(a, b)));
    }

    /// Re-running an unchanged selection reports no change and reuses chunks.
    #[test]
    fn test_repeated_update_is_stable() {
        let settings = WorldSettings {
            view_reuse_distance: 0.0,
            ..near_settings()
        };
        let world = world(8, settings);
        let viewpoint = Vec3::new(256.0, 256.0, 0.0);
        world.update(ObserverId(1), viewpoint, None, 0.0, &mut sink());
        let stats = world.update(ObserverId(1), viewpoint, None, 1.0, &mut sink());

        assert!(!stats.reused_view);
        assert!(!stats.changed);
        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.selected, 64);
    }

    /// An observer standing still keeps its view and reports no change.
    #[test]
    fn test_stationary_observer_reports_no_change() {
        let world = world(8, near_settings());
        let viewpoint = Vec3::new(256.0, 256.0, 0.0);
        let stats = world.update(ObserverId(1), viewpoint, None, 0.0, &mut sink());
        assert!(stats.changed);
        assert!(!stats.reused_view);

        for frame in 1..4 {
            let mut chunks = sink();
            let stats = world.update(ObserverId(1), viewpoint, None, frame as f64, &mut chunks);
            assert!(stats.reused_view);
            assert!(!stats.changed, "frame {frame} reported a change");
            assert_eq!(stats.resolved, 0);
            assert_eq!(stats.selected, 64);
            assert_eq!(chunks.len(), 64);
        }
    }

    /// A view copied from another observer counts as changed on its first frame only.
    #[test]
    fn test_copied_view_changes_once() {
        let world = world(8, near_settings());
        world.update(ObserverId(1), Vec3::new(256.0, 256.0, 0.0), None, 0.0, &mut sink());

        let viewpoint = Vec3::new(260.0, 250.0, 0.0);
        let stats = world.update(ObserverId(2), viewpoint, None, 0.0, &mut sink());
        assert!(stats.reused_view);
        assert!(stats.changed);

        let stats = world.update(ObserverId(2), viewpoint, None, 1.0, &mut sink());
        assert!(stats.reused_view);
        assert!(!stats.changed);
    }

    struct NestedSink<'a> {
        world: &'a World,
        inner: Option<FrameStats>,
        submitted: usize,
    }

    impl ChunkSink for NestedSink<'_> {
        fn submit(&mut self, _chunk: &Arc<TerrainChunk>) {
            self.submitted += 1;
            if self.inner.is_none() {
                let viewpoint = Vec3::new(256.0, 256.0, 0.0);
                self.inner = Some(self.world.update(ObserverId(2), viewpoint, None, 0.0, &mut sink()));
            }
        }
    }

    /// Another observer can be updated while a frame is being submitted.
    #[test]
    fn test_update_during_submission() {
        let world = world(8, near_settings());
        let mut nested = NestedSink {
            world: &world,
            inner: None,
            submitted: 0,
        };
        world.update(ObserverId(1), Vec3::new(256.0, 256.0, 0.0), None, 0.0, &mut nested);

        assert_eq!(nested.submitted, 64);
        let inner = nested.inner.unwrap();
        assert!(!inner.reused_view);
        assert_eq!(inner.selected, 64);
        assert_eq!(inner.cache_hits, 64);

        // Both views are back in the map afterwards.
        let stats = world.update(ObserverId(1), Vec3::new(256.0, 256.0, 0.0), None, 1.0, &mut sink());
        assert!(stats.reused_view);
        assert!(!stats.changed);
        let stats = world.update(ObserverId(2), Vec3::new(256.0, 256.0, 0.0), None, 1.0, &mut sink());
        assert!(stats.reused_view);
        assert!(!stats.changed);
    }

    /// Finer chunks bordering coarser ones are stitched; the coarse side is not.
    #[test]
    fn test_lod_boundaries_are_stitched() {
        let settings = WorldSettings {
            lod_factor: 1.0,
            ..near_settings()
        };
        let world = world(16, settings);
        let mut chunks = sink();
        world.update(ObserverId(1), Vec3::new(32.0, 32.0, 0.0), None, 0.0, &mut chunks);

        let sizes: HashSet<u32> = chunks.iter().map(|c| c.key().size() as u32).collect();
        assert!(sizes.len() > 1, "expected mixed chunk sizes, got {sizes:?}");

        let largest = chunks.iter().map(|c| c.key().size()).fold(0.0, f32::max);
        for chunk in &chunks {
            let key = chunk.key();
            if key.size() == largest {
                assert!(key.flags().is_empty());
            }
            for direction in Direction::ALL {
                assert!(key.flags().delta(direction) <= 4);
            }
        }
        assert!(chunks.iter().any(|c| !c.key().flags().is_empty()));
    }

    #[test]
    fn test_preload_reports_progress() {
        let world = world(8, near_settings());
        let mut view = world.create_view();
        let abort = AtomicBool::new(false);
        let progress = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);
        let viewpoint = Vec3::new(256.0, 256.0, 0.0);

        let outcome = world.preload(&mut view, viewpoint, None, &abort, &progress, &total);
        assert!(!outcome.aborted);
        assert_eq!(outcome.resolved, 64);
        assert_eq!(total.load(Ordering::Relaxed), 64);
        assert_eq!(progress.load(Ordering::Relaxed), 64);
        assert!(view.entries().iter().all(|e| e.handle.is_some()));

        // A stored preload is picked up by a nearby observer.
        world.store_view(&view, 0.0);
        let stats = world.update(ObserverId(9), viewpoint, None, 0.0, &mut sink());
        assert!(stats.reused_view);
        assert_eq!(stats.cache_misses, 0);
    }

    /// An aborted preload stops before resolving anything further.
    #[test]
    fn test_preload_abort() {
        let world = world(8, near_settings());
        let mut view = world.create_view();
        let abort = AtomicBool::new(true);
        let progress = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);

        let outcome = world.preload(&mut view, Vec3::new(256.0, 256.0, 0.0), None, &abort, &progress, &total);
        assert!(outcome.aborted);
        assert_eq!(outcome.resolved, 0);
        assert_eq!(progress.load(Ordering::Relaxed), 0);
        assert_eq!(total.load(Ordering::Relaxed), 64);
        assert_eq!(world.chunk_manager().cache_stats().chunks, 0);
    }

    /// Margin passes warm the cache with chunks beyond the main selection.
    #[test]
    fn test_preload_margin_passes() {
        let settings = WorldSettings {
            lod_factor: 1.0,
            preload_distance_margin: 256.0,
            ..near_settings()
        };
        let world = world(16, settings);
        let mut view = world.create_view();
        let (abort, progress, total) = (AtomicBool::new(false), AtomicUsize::new(0), AtomicUsize::new(0));

        let outcome = world.preload(&mut view, Vec3::new(32.0, 32.0, 0.0), None, &abort, &progress, &total);
        assert!(!outcome.aborted);
        assert!(outcome.resolved > view.len());
        assert!(world.chunk_manager().cache_stats().chunks > view.len());
    }

    /// Cells of the active region are drawn as whole single-cell chunks.
    #[test]
    fn test_active_region_forces_fine_chunks() {
        let settings = WorldSettings {
            lod_factor: 1.0,
            ..near_settings()
        };
        let world = world(8, settings);
        let region = Rect::from_cells(3, 3, 5, 5);
        let mut chunks = sink();
        world.update(ObserverId(1), Vec3::new(256.0, 256.0, 10000.0), Some(region), 0.0, &mut chunks);

        for cell in [(3.5, 3.5), (4.5, 3.5), (3.5, 4.5), (4.5, 4.5)] {
            let center = Vec2::new(cell.0, cell.1);
            assert!(chunks
                .iter()
                .any(|c| c.key().size() == 1.0 && c.key().center() == center));
        }
        assert!(chunks.len() < 64);
    }

    /// Views expire after the delay and release their chunks for expiry.
    #[test]
    fn test_update_cache_releases_views_then_chunks() {
        let settings = WorldSettings {
            view_expiry_delay: 1.0,
            chunk_expiry_delay: 1.0,
            ..near_settings()
        };
        let world = world(4, settings);
        world.update(ObserverId(1), Vec3::new(128.0, 128.0, 0.0), None, 0.0, &mut sink());
        assert_eq!(world.chunk_manager().cache_stats().chunks, 16);

        world.update_cache(0.5);
        assert_eq!(world.chunk_manager().cache_stats().chunks, 16);
        world.update_cache(5.0);
        assert_eq!(world.chunk_manager().cache_stats().chunks, 0);
    }

    /// Chunks above the composite level get maps that compile on demand.
    #[test]
    fn test_composite_maps_render_through_world() {
        let settings = WorldSettings {
            lod_factor: 1.0,
            composite_map_level: 2.0,
            composite_maps_per_frame: 64,
            ..near_settings()
        };
        let world = world(16, settings);
        let mut chunks = sink();
        world.update(ObserverId(1), Vec3::new(32.0, 32.0, 0.0), None, 0.0, &mut chunks);

        let composite: Vec<_> = chunks.iter().filter_map(|c| c.composite_map()).collect();
        assert!(!composite.is_empty());
        assert_eq!(world.composite_map_renderer().pending_count(), composite.len());
        assert_eq!(world.render_composite_maps(&NullCompiler), composite.len());
        assert!(composite.iter().all(|m| m.texture() == Some(TextureHandle(7))));
    }

    #[test]
    fn test_rebuild_views_forces_reselection() {
        let world = world(8, near_settings());
        let viewpoint = Vec3::new(256.0, 256.0, 0.0);
        world.update(ObserverId(1), viewpoint, None, 0.0, &mut sink());
        assert!(world.update(ObserverId(1), viewpoint, None, 0.0, &mut sink()).reused_view);

        world.rebuild_views();
        let stats = world.update(ObserverId(1), viewpoint, None, 0.0, &mut sink());
        assert!(!stats.reused_view);
        assert_eq!(stats.cache_hits, 64);
    }
}
