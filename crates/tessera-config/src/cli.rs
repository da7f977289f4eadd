use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tessera command-line arguments. Values given here override `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tessera", about = "Tessera terrain LOD demo")]
pub struct CliArgs {
    /// LOD factor (higher keeps detail further out).
    #[arg(long)]
    pub lod_factor: Option<f32>,

    /// Maximum view distance in world units.
    #[arg(long)]
    pub view_distance: Option<f32>,

    /// Smallest chunk size in cells (power of two).
    #[arg(long)]
    pub min_chunk_size: Option<f32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of demo frames to run.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(factor) = args.lod_factor {
            self.terrain.lod_factor = factor;
        }
        if let Some(distance) = args.view_distance {
            self.terrain.max_view_distance = distance;
        }
        if let Some(size) = args.min_chunk_size {
            self.terrain.min_chunk_size = size;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(frames) = args.frames {
            self.demo.frames = frames;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            lod_factor: Some(2.0),
            min_chunk_size: Some(0.5),
            frames: Some(10),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.terrain.lod_factor, 2.0);
        assert_eq!(config.terrain.min_chunk_size, 0.5);
        assert_eq!(config.demo.frames, 10);
        // Untouched fields keep their defaults.
        assert_eq!(config.terrain.max_view_distance, 8192.0);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_arguments() {
        let args = CliArgs::try_parse_from([
            "tessera",
            "--view-distance",
            "4096",
            "--log-level",
            "debug",
            "--config",
            "/tmp/tessera",
        ])
        .unwrap();
        assert_eq!(args.view_distance, Some(4096.0));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/tessera")));
        assert!(args.lod_factor.is_none());
    }
}
