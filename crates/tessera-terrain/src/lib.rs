//! Terrain data sources: the [`Storage`] contract consumed by the LOD engine, plus
//! a flat test storage and a procedural fBm heightmap storage.

mod flat;
mod heightmap;
mod storage;
mod vertex;

pub use flat::FlatStorage;
pub use heightmap::{GridLayout, HeightmapParams, HeightmapSampler, HeightmapStorage};
pub use storage::{BlendMap, Bounds, LayerData, LayerInfo, Storage, VertexData};
pub use vertex::{DEFAULT_HEIGHT, GridSample, fill_grid, vertex_count};
