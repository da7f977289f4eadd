//! Terrain engine settings and their RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub terrain: TerrainConfig,
    pub debug: DebugConfig,
    pub demo: DemoConfig,
}

/// LOD, caching and preloading tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainConfig {
    /// Scales the distance at which chunks switch to coarser detail.
    pub lod_factor: f32,
    /// Smallest chunk edge in cells. A power of two; may be below one.
    pub min_chunk_size: f32,
    /// Distance in world units beyond which terrain is not drawn.
    pub max_view_distance: f32,
    /// Added vertex detail per chunk; negative values remove detail.
    pub vertex_lod_mod: i32,
    /// Chunks wider than this many cells are drawn with a composite map.
    pub composite_map_level: f32,
    /// Composite map texture edge in texels.
    pub composite_map_size: u32,
    /// Largest piece, in cells, a composite map is rendered from.
    pub max_composite_geometry_size: f32,
    /// Normal-priority composite maps compiled per frame.
    pub composite_maps_per_frame: usize,
    /// Observers closer than this to a stored view reuse its selection.
    pub view_reuse_distance: f32,
    /// Seconds an unused view is kept.
    pub view_expiry_delay: f64,
    /// Seconds an unreferenced chunk is kept.
    pub chunk_expiry_delay: f64,
    /// Distance modifier of the extra preload passes (0 disables them).
    pub preload_distance_margin: f32,
    /// Preload worker threads (0 = one per spare CPU core).
    pub preload_workers: usize,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            lod_factor: 1.0,
            min_chunk_size: 1.0,
            max_view_distance: 8192.0,
            vertex_lod_mod: 0,
            composite_map_level: 4.0,
            composite_map_size: 512,
            max_composite_geometry_size: 4.0,
            composite_maps_per_frame: 4,
            view_reuse_distance: 150.0,
            view_expiry_delay: 1.0,
            chunk_expiry_delay: 5.0,
            preload_distance_margin: 1024.0,
            preload_workers: 0,
        }
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter used when `RUST_LOG` is unset (e.g. "debug", "info,tessera_world=trace").
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Settings of the headless demo fly-through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// Heightmap noise seed.
    pub seed: u64,
    /// Dataset edge length in cells.
    pub cells: u32,
    /// Frames to simulate.
    pub frames: u32,
    /// Camera speed in world units per frame.
    pub camera_speed: f32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cells: 64,
            frames: 240,
            camera_speed: 32.0,
        }
    }
}

/// Platform config directory for Tessera, e.g. `~/.config/tessera` on Linux.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
}

impl Config {
    /// Load `config.ron` from `config_dir`, writing the defaults there first
    /// if it does not exist.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Write this config to `config_dir/config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::write(config_dir))?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty)?;

        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, serialized).map_err(ConfigError::write(&path))
    }

    /// Re-read the file: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::read(path))?;
        Ok(ron::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let ron_str = ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new()).unwrap();
        assert!(ron_str.contains("lod_factor: 1.0"));
        assert!(ron_str.contains("composite_map_size: 512"));
        assert!(ron_str.contains("log_level: \"info\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.terrain.min_chunk_size = 0.125;
        config.terrain.vertex_lod_mod = -2;
        config.demo.seed = 7;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    /// Sections and fields absent from the file keep their defaults.
    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = ron::from_str("(terrain: (lod_factor: 2.5), debug: ())").unwrap();
        assert_eq!(config.terrain.lod_factor, 2.5);
        assert_eq!(config.terrain.composite_map_level, 4.0);
        assert_eq!(config.demo, DemoConfig::default());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let result: Result<Config, _> = ron::from_str("(renderer: (msaa: 4), terrain: ())");
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.terrain.max_view_distance = 20_000.0;
        config.terrain.preload_workers = 3;
        config.debug.log_level = "debug,tessera_world=trace".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.terrain.lod_factor = 4.0;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap();
        assert_eq!(reloaded.map(|c| c.terrain.lod_factor), Some(4.0));
    }

    #[test]
    fn test_reload_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::default().reload(dir.path());
        match result {
            Err(ConfigError::ReadError { path, .. }) => assert_eq!(path, dir.path().join("config.ron")),
            other => panic!("expected a read error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_dir_ends_with_tessera() {
        assert!(default_config_dir().ends_with("tessera"));
    }
}
