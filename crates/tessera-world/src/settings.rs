use tessera_config::TerrainConfig;
use tessera_lod::LodPolicy;

/// Runtime tunables of a [`World`](crate::World).
#[derive(Clone, Debug, PartialEq)]
pub struct WorldSettings {
    pub lod_factor: f32,
    /// Smallest chunk size in cells. Must be a power of two.
    pub min_chunk_size: f32,
    /// World units beyond which nodes outside the active region are culled.
    pub max_view_distance: f32,
    pub vertex_lod_mod: i32,
    /// Chunks larger than this (in cells) get a composite map.
    pub composite_map_level: f32,
    pub composite_map_size: u32,
    pub max_composite_geometry_size: f32,
    pub composite_maps_per_frame: usize,
    pub view_reuse_distance: f32,
    pub view_expiry_delay: f64,
    pub chunk_expiry_delay: f64,
    /// Distance modifier of the extra preload passes.
    pub preload_distance_margin: f32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self::from(&TerrainConfig::default())
    }
}

impl From<&TerrainConfig> for WorldSettings {
    fn from(config: &TerrainConfig) -> Self {
        Self {
            lod_factor: config.lod_factor,
            min_chunk_size: config.min_chunk_size,
            max_view_distance: config.max_view_distance,
            vertex_lod_mod: config.vertex_lod_mod,
            composite_map_level: config.composite_map_level,
            composite_map_size: config.composite_map_size,
            max_composite_geometry_size: config.max_composite_geometry_size,
            composite_maps_per_frame: config.composite_maps_per_frame,
            view_reuse_distance: config.view_reuse_distance,
            view_expiry_delay: config.view_expiry_delay,
            chunk_expiry_delay: config.chunk_expiry_delay,
            preload_distance_margin: config.preload_distance_margin,
        }
    }
}

impl WorldSettings {
    pub fn lod_policy(&self, cell_world_size: f32) -> LodPolicy {
        LodPolicy {
            lod_factor: self.lod_factor,
            min_chunk_size: self.min_chunk_size,
            max_view_distance: self.max_view_distance,
            cell_world_size,
        }
    }
}
