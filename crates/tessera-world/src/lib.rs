//! Terrain chunk management on top of the LOD core: chunk creation and
//! caching, composite map scheduling, the per-frame [`World`] entry point,
//! and background preloading.

mod chunk;
mod chunk_manager;
mod composite;
mod error;
mod object_cache;
mod preloader;
mod settings;
mod world;

pub use chunk::{ChunkKey, ChunkSurface, TerrainChunk};
pub use chunk_manager::{CacheStats, ChunkManager};
pub use composite::{
    CompositeMap, CompositeMapCompiler, CompositeMapId, CompositeMapRenderer, CompositeTile,
    TextureHandle,
};
pub use error::{PreloadError, WorldError};
pub use object_cache::ObjectCache;
pub use preloader::{AsyncPreloader, PreloadRequest, PreloadResult, PreloadTicket};
pub use settings::WorldSettings;
pub use world::{ChunkSink, FrameStats, PreloadOutcome, TerrainView, World};
