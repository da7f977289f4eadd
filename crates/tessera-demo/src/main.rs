//! Headless fly-through over procedural terrain.
//!
//! Builds a heightmap dataset, flies a camera diagonally across it, and
//! runs the LOD pipeline every frame: selection, chunk resolution, composite
//! map compilation, cache expiry and background preloading of the path ahead.
//!
//! Run with `cargo run -p tessera-demo -- --frames 600 --lod-factor 2`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use glam::{IVec2, UVec2, Vec2, Vec3};
use tessera_config::{CliArgs, Config, default_config_dir};
use tessera_lod::ObserverId;
use tessera_math::Rect;
use tessera_terrain::{GridLayout, HeightmapParams, HeightmapStorage, Storage};
use tessera_world::{
    AsyncPreloader, ChunkSink, CompositeMap, CompositeMapCompiler, PreloadRequest, TerrainChunk,
    TextureHandle, World, WorldSettings,
};
use tracing::{debug, error, info, warn};

const FRAME_TIME: f64 = 1.0 / 60.0;
const CAMERA_ALTITUDE: f32 = 600.0;
const STATS_INTERVAL: u32 = 60;

/// Counts what a renderer would draw.
#[derive(Default)]
struct DrawStats {
    chunks: usize,
    triangles: usize,
    vertices: usize,
    composite: usize,
}

impl ChunkSink for DrawStats {
    fn submit(&mut self, chunk: &Arc<TerrainChunk>) {
        self.chunks += 1;
        self.triangles += chunk.index_buffer().triangle_count();
        self.vertices += chunk.vertices().len();
        if chunk.composite_map().is_some() {
            self.composite += 1;
        }
    }
}

/// Stands in for a GPU render-to-texture pass.
#[derive(Default)]
struct HeadlessCompiler {
    next_handle: AtomicU64,
}

impl CompositeMapCompiler for HeadlessCompiler {
    fn compile(&self, map: &CompositeMap) -> TextureHandle {
        let layers: usize = map.tiles().iter().map(|t| t.layers.layers.len()).sum();
        debug!(
            "Compiling composite map {:?}: {} tiles, {} layers, {}px",
            map.id(),
            map.tiles().len(),
            layers,
            map.texture_size()
        );
        TextureHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Camera position at `t` in `[0, 1]` along the diagonal of the dataset.
fn camera_position(storage: &dyn Storage, t: f32) -> Vec3 {
    let bounds = storage.bounds();
    let cell_world_size = storage.cell_world_size();
    let start = Vec2::new(bounds.min_x, bounds.min_y) + Vec2::splat(1.5);
    let end = Vec2::new(bounds.max_x, bounds.max_y) - Vec2::splat(1.5);
    let cell = start.lerp(end, t.clamp(0.0, 1.0));
    (cell * cell_world_size).extend(CAMERA_ALTITUDE)
}

/// The 3x3 cells around the camera, always drawn at full detail.
fn active_region(storage: &dyn Storage, viewpoint: Vec3) -> Rect {
    let cell = (viewpoint.truncate() / storage.cell_world_size()).floor().as_ivec2();
    Rect::from_cells(cell.x - 1, cell.y - 1, cell.x + 2, cell.y + 2)
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    if let Err(e) = tessera_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config)) {
        eprintln!("Failed to initialise logging: {e}");
    }

    let demo = &config.demo;
    let params = HeightmapParams {
        seed: demo.seed,
        ..HeightmapParams::default()
    };
    let layout = GridLayout {
        origin: IVec2::splat(-(demo.cells as i32) / 2),
        cells: UVec2::splat(demo.cells.max(1)),
        ..GridLayout::default()
    };
    info!("Generating {}x{} cell heightmap (seed {})", layout.cells.x, layout.cells.y, demo.seed);
    let storage: Arc<dyn Storage> = Arc::new(HeightmapStorage::generate(params, layout));

    let settings = WorldSettings::from(&config.terrain);
    let world = match World::new(Arc::clone(&storage), settings) {
        Ok(world) => Arc::new(world),
        Err(e) => {
            error!("Cannot build terrain world: {e}");
            std::process::exit(1);
        }
    };
    info!("Quadtree built with {} nodes", world.quad_tree().len());

    let preloader = match AsyncPreloader::with_defaults(Arc::clone(&world), config.terrain.preload_workers) {
        Ok(preloader) => Some(preloader),
        Err(e) => {
            warn!("Preloading disabled: {e}");
            None
        }
    };

    let frames = demo.frames.max(1);
    let path_length = (demo.cells as f32 * storage.cell_world_size()).max(1.0);
    let step = demo.camera_speed / path_length;
    let compiler = HeadlessCompiler::default();
    let observer = ObserverId(0);

    // Preload a few points ahead on the path.
    if let Some(preloader) = &preloader {
        for lookahead in [0.25, 0.5, 0.75] {
            let viewpoint = camera_position(storage.as_ref(), lookahead);
            let request = PreloadRequest {
                viewpoint,
                active_region: Some(active_region(storage.as_ref(), viewpoint)),
                timestamp: 0.0,
            };
            if let Err(e) = preloader.submit(request) {
                warn!("Preload at {:?} rejected: {e}", viewpoint);
            }
        }
    }

    for frame in 0..frames {
        let time = frame as f64 * FRAME_TIME;
        let viewpoint = camera_position(storage.as_ref(), frame as f32 * step);
        let region = active_region(storage.as_ref(), viewpoint);

        let mut draw = DrawStats::default();
        let stats = world.update(observer, viewpoint, Some(region), time, &mut draw);
        let compiled = world.render_composite_maps(&compiler);
        world.update_cache(time);

        if let Some(preloader) = &preloader {
            for result in preloader.drain_results() {
                info!(
                    "Preload {} finished in {:.1} ms: {} chunks{}",
                    result.id,
                    result.elapsed_us as f64 / 1000.0,
                    result.outcome.resolved,
                    if result.outcome.aborted { " (aborted)" } else { "" },
                );
            }
        }

        if stats.changed {
            debug!(
                "Frame {}: selection changed, {} hits, {} misses",
                frame, stats.cache_hits, stats.cache_misses
            );
        }
        if frame % STATS_INTERVAL == 0 || frame + 1 == frames {
            let cache = world.chunk_manager().cache_stats();
            info!(
                "Frame {}: {} chunks ({} composite), {} triangles, {} vertices, {} maps compiled, cache {} chunks / {} index / {} uv, {} maps pending",
                frame,
                draw.chunks,
                draw.composite,
                draw.triangles,
                draw.vertices,
                compiled,
                cache.chunks,
                cache.index_buffers,
                cache.uv_buffers,
                cache.pending_composite_maps,
            );
        }
    }

    if let Some(preloader) = preloader {
        preloader.cancel_all();
        drop(preloader);
    }
    info!("Demo finished after {} frames", frames);
}
