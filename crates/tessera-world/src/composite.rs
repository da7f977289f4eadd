//! Pre-baked composite textures for distant chunks and the budgeted queue
//! that compiles them.
//!
//! Large chunks would need many texture layers and blend maps. Instead,
//! their layers are flattened once into a single texture, a *composite
//! map*. Compilation happens on the render thread through an external
//! [`CompositeMapCompiler`], a few maps per frame, with urgent maps first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use glam::Vec2;
use rustc_hash::FxHashSet;
use tessera_math::Rect;
use tessera_terrain::LayerData;

use crate::chunk::ChunkKey;

/// Opaque renderer texture handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Identifies a composite map within its chunk manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeMapId(pub u64);

/// One piece of a composite map: the layers of a sub-square of the chunk and
/// where they land in the texture.
#[derive(Clone, Debug)]
pub struct CompositeTile {
    /// Edge length in cells.
    pub size: f32,
    /// Center in cell units.
    pub center: Vec2,
    /// Destination in texture space, `[0, 1]` on both axes with v pointing south.
    pub target: Rect,
    pub layers: LayerData,
}

/// A texture slot to be filled by compiling the owner chunk's layers.
#[derive(Debug)]
pub struct CompositeMap {
    id: CompositeMapId,
    owner: ChunkKey,
    texture_size: u32,
    tiles: Vec<CompositeTile>,
    texture: OnceLock<TextureHandle>,
}

impl CompositeMap {
    pub fn new(id: CompositeMapId, owner: ChunkKey, texture_size: u32, tiles: Vec<CompositeTile>) -> Self {
        Self {
            id,
            owner,
            texture_size,
            tiles,
            texture: OnceLock::new(),
        }
    }

    pub fn id(&self) -> CompositeMapId {
        self.id
    }

    /// Key of the chunk this map was created for.
    pub fn owner(&self) -> ChunkKey {
        self.owner
    }

    /// Edge length of the target texture in texels.
    pub fn texture_size(&self) -> u32 {
        self.texture_size
    }

    pub fn tiles(&self) -> &[CompositeTile] {
        &self.tiles
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture.get().copied()
    }

    pub fn is_compiled(&self) -> bool {
        self.texture.get().is_some()
    }

    /// Compile through `compiler` unless already compiled. Returns whether
    /// this call did the work.
    pub fn compile(&self, compiler: &dyn CompositeMapCompiler) -> bool {
        let mut compiled = false;
        self.texture.get_or_init(|| {
            compiled = true;
            compiler.compile(self)
        });
        compiled
    }
}

/// Renders composite map tiles into a texture.
pub trait CompositeMapCompiler {
    fn compile(&self, map: &CompositeMap) -> TextureHandle;
}

#[derive(Default)]
struct Queues {
    normal: VecDeque<Arc<CompositeMap>>,
    normal_ids: FxHashSet<CompositeMapId>,
    immediate: VecDeque<Arc<CompositeMap>>,
    immediate_ids: FxHashSet<CompositeMapId>,
}

impl Queues {
    fn remove_normal(&mut self, id: CompositeMapId) -> bool {
        if !self.normal_ids.remove(&id) {
            return false;
        }
        self.normal.retain(|m| m.id() != id);
        true
    }

    fn push_immediate(&mut self, map: Arc<CompositeMap>) {
        if self.immediate_ids.insert(map.id()) {
            self.immediate.push_back(map);
        }
    }

    fn pop_immediate(&mut self) -> Option<Arc<CompositeMap>> {
        let map = self.immediate.pop_front()?;
        self.immediate_ids.remove(&map.id());
        Some(map)
    }

    fn pop_normal(&mut self) -> Option<Arc<CompositeMap>> {
        let map = self.normal.pop_front()?;
        self.normal_ids.remove(&map.id());
        Some(map)
    }
}

/// Two deduplicated FIFO queues of composite maps awaiting compilation.
///
/// The lock is not held while a map compiles, so other threads may queue
/// maps during [`render_frame`](Self::render_frame).
pub struct CompositeMapRenderer {
    queues: Mutex<Queues>,
    maps_per_frame: usize,
}

impl CompositeMapRenderer {
    pub fn new(maps_per_frame: usize) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            maps_per_frame,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn maps_per_frame(&self) -> usize {
        self.maps_per_frame
    }

    pub fn set_maps_per_frame(&mut self, maps_per_frame: usize) {
        self.maps_per_frame = maps_per_frame;
    }

    /// Queue `map` for compilation. Compiled maps are ignored.
    ///
    /// Immediate maps are all compiled on the next frame; a map already in the
    /// normal queue is promoted.
    pub fn add_composite_map(&self, map: Arc<CompositeMap>, immediate: bool) {
        if map.is_compiled() {
            return;
        }
        let mut queues = self.lock();
        let id = map.id();
        if immediate {
            queues.remove_normal(id);
            queues.push_immediate(map);
        } else if !queues.immediate_ids.contains(&id) && queues.normal_ids.insert(id) {
            queues.normal.push_back(map);
        }
    }

    /// Move `map` from the normal queue to the immediate queue.
    ///
    /// Returns `false` (and does nothing) when the map is not in the normal queue.
    pub fn set_immediate(&self, map: &Arc<CompositeMap>) -> bool {
        let mut queues = self.lock();
        if !queues.remove_normal(map.id()) {
            return false;
        }
        queues.push_immediate(Arc::clone(map));
        true
    }

    /// Compile every immediate map, then up to `maps_per_frame` normal ones.
    /// Returns the number of maps compiled.
    pub fn render_frame(&self, compiler: &dyn CompositeMapCompiler) -> usize {
        let mut compiled = 0;

        loop {
            let next = self.lock().pop_immediate();
            let Some(map) = next else { break };
            if map.compile(compiler) {
                compiled += 1;
            }
        }

        let mut budget = self.maps_per_frame;
        while budget > 0 {
            let next = self.lock().pop_normal();
            let Some(map) = next else { break };
            if map.compile(compiler) {
                compiled += 1;
                budget -= 1;
            }
        }

        if compiled > 0 {
            tracing::trace!("Compiled {} composite maps, {} pending", compiled, self.pending_count());
        }
        compiled
    }

    /// Maps waiting in either queue.
    pub fn pending_count(&self) -> usize {
        let queues = self.lock();
        queues.normal.len() + queues.immediate.len()
    }

    pub fn immediate_count(&self) -> usize {
        self.lock().immediate.len()
    }

    pub fn is_queued(&self, map: &CompositeMap) -> bool {
        let queues = self.lock();
        queues.normal_ids.contains(&map.id()) || queues.immediate_ids.contains(&map.id())
    }

    pub fn is_immediate(&self, map: &CompositeMap) -> bool {
        self.lock().immediate_ids.contains(&map.id())
    }

    pub fn clear(&self) {
        *self.lock() = Queues::default();
    }
}
