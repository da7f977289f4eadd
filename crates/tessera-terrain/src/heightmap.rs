//! Procedural terrain storage backed by a multi-octave fBm heightmap.
//!
//! Heights are sampled once for the whole dataset at full heightfield
//! resolution; chunk requests at coarser vertex LODs read every `2^lod`-th
//! sample from that grid. Texture layers are height bands (grass, rock, snow)
//! blended with per-footprint weight maps.

use glam::{IVec2, UVec2, Vec2, Vec3};
use noise::{NoiseFn, Simplex};

use crate::storage::{BlendMap, Bounds, LayerData, LayerInfo, Storage, VertexData};
use crate::vertex::{GridSample, fill_grid};

/// Blend map texels per cell edge.
const BLEND_TEXELS_PER_CELL: f32 = 16.0;

/// Configuration for multi-octave fBm noise used in heightmap generation.
#[derive(Clone, Debug)]
pub struct HeightmapParams {
    /// World seed for deterministic generation.
    pub seed: u64,
    /// Number of noise octaves to composite.
    pub octaves: u32,
    /// Frequency multiplier between successive octaves. Default: 2.0.
    pub lacunarity: f64,
    /// Amplitude multiplier between successive octaves. Default: 0.5.
    pub persistence: f64,
    /// Frequency of the first octave, in cycles per world unit.
    pub base_frequency: f64,
    /// Amplitude of the first octave in world units.
    pub amplitude: f64,
}

impl Default for HeightmapParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 0.002,
            amplitude: 400.0,
        }
    }
}

/// Fractal Brownian motion over simplex noise.
pub struct HeightmapSampler {
    noise: Simplex,
    params: HeightmapParams,
}

impl HeightmapSampler {
    pub fn new(params: HeightmapParams) -> Self {
        let noise = Simplex::new(params.seed as u32);
        Self { noise, params }
    }

    /// Height at a world-space coordinate.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;

        for _ in 0..self.params.octaves {
            total += self.noise.get([x * frequency, y * frequency]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }

        total
    }

    /// Theoretical maximum absolute height (geometric series of the octave amplitudes).
    pub fn max_amplitude(&self) -> f64 {
        let mut sum = 0.0;
        let mut amp = self.params.amplitude;
        for _ in 0..self.params.octaves {
            sum += amp;
            amp *= self.params.persistence;
        }
        sum
    }

    pub fn params(&self) -> &HeightmapParams {
        &self.params
    }
}

/// Placement and resolution of a heightmap dataset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    /// First cell of the dataset.
    pub origin: IVec2,
    /// Number of cells along each axis.
    pub cells: UVec2,
    pub cell_world_size: f32,
    pub cell_vertices: u32,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            origin: IVec2::ZERO,
            cells: UVec2::splat(16),
            cell_world_size: 64.0,
            cell_vertices: 17,
        }
    }
}

/// [`Storage`] over a pre-sampled fBm heightfield.
pub struct HeightmapStorage {
    layout: GridLayout,
    /// Heightfield vertices along y; heights are indexed `gx * rows + gy`.
    rows: usize,
    heights: Vec<f32>,
    /// Per-cell `(min, max)` height, indexed `cx * cells.y + cy`.
    cell_ranges: Vec<(f32, f32)>,
    max_amplitude: f32,
}

impl HeightmapStorage {
    /// Sample the whole dataset described by `layout`.
    pub fn generate(params: HeightmapParams, layout: GridLayout) -> Self {
        debug_assert!(layout.cell_vertices >= 2);
        let sampler = HeightmapSampler::new(params);
        let segs = (layout.cell_vertices - 1) as usize;
        let cols = layout.cells.x as usize * segs + 1;
        let rows = layout.cells.y as usize * segs + 1;
        let spacing = layout.cell_world_size as f64 / segs as f64;
        let origin_x = layout.origin.x as f64 * layout.cell_world_size as f64;
        let origin_y = layout.origin.y as f64 * layout.cell_world_size as f64;

        let mut heights = Vec::with_capacity(cols * rows);
        for gx in 0..cols {
            for gy in 0..rows {
                let x = origin_x + gx as f64 * spacing;
                let y = origin_y + gy as f64 * spacing;
                heights.push(sampler.sample(x, y) as f32);
            }
        }

        let mut cell_ranges =
            Vec::with_capacity(layout.cells.x as usize * layout.cells.y as usize);
        for cx in 0..layout.cells.x as usize {
            for cy in 0..layout.cells.y as usize {
                let mut range = (f32::INFINITY, f32::NEG_INFINITY);
                for gx in cx * segs..=(cx + 1) * segs {
                    for gy in cy * segs..=(cy + 1) * segs {
                        let h = heights[gx * rows + gy];
                        range = (range.0.min(h), range.1.max(h));
                    }
                }
                cell_ranges.push(range);
            }
        }

        Self {
            layout,
            rows,
            heights,
            cell_ranges,
            max_amplitude: sampler.max_amplitude() as f32,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    fn segments(&self) -> usize {
        (self.layout.cell_vertices - 1) as usize
    }

    fn cols(&self) -> usize {
        self.heights.len() / self.rows
    }

    /// Nearest heightfield vertex to a cell-space point, if inside the dataset.
    fn grid_index(&self, point: Vec2) -> Option<(usize, usize)> {
        let local = (point - self.layout.origin.as_vec2()) * self.segments() as f32;
        let gx = local.x.round();
        let gy = local.y.round();
        if gx < 0.0 || gy < 0.0 {
            return None;
        }
        let (gx, gy) = (gx as usize, gy as usize);
        (gx < self.cols() && gy < self.rows).then_some((gx, gy))
    }

    fn height(&self, gx: usize, gy: usize) -> f32 {
        self.heights[gx * self.rows + gy]
    }

    fn normal(&self, gx: usize, gy: usize) -> Vec3 {
        let spacing = self.layout.cell_world_size / self.segments() as f32;
        let x0 = gx.saturating_sub(1);
        let x1 = (gx + 1).min(self.cols() - 1);
        let y0 = gy.saturating_sub(1);
        let y1 = (gy + 1).min(self.rows - 1);
        let dzdx = (self.height(x1, gy) - self.height(x0, gy)) / ((x1 - x0).max(1) as f32 * spacing);
        let dzdy = (self.height(gx, y1) - self.height(gx, y0)) / ((y1 - y0).max(1) as f32 * spacing);
        Vec3::new(-dzdx, -dzdy, 1.0).normalize()
    }

    fn height_at(&self, point: Vec2) -> Option<f32> {
        self.grid_index(point).map(|(gx, gy)| self.height(gx, gy))
    }

    /// Band thresholds for the rock and snow layers.
    fn band_thresholds(&self) -> [f32; 2] {
        [0.1 * self.max_amplitude, 0.45 * self.max_amplitude]
    }

    fn band_weight(height: f32, threshold: f32, width: f32) -> u8 {
        let t = ((height - threshold) / width + 0.5).clamp(0.0, 1.0);
        (t * 255.0).round() as u8
    }
}

impl Storage for HeightmapStorage {
    fn bounds(&self) -> Bounds {
        let min = self.layout.origin.as_vec2();
        let max = min + self.layout.cells.as_vec2();
        Bounds::new(min.x, max.x, min.y, max.y)
    }

    fn has_data(&self, cell_x: i32, cell_y: i32) -> bool {
        let local = IVec2::new(cell_x, cell_y) - self.layout.origin;
        local.x >= 0
            && local.y >= 0
            && (local.x as u32) < self.layout.cells.x
            && (local.y as u32) < self.layout.cells.y
    }

    fn min_max_height(&self, size: f32, center: Vec2) -> Option<(f32, f32)> {
        let half = size * 0.5;
        let x0 = (center.x - half).floor() as i32;
        let x1 = ((center.x + half).ceil() as i32).max(x0 + 1);
        let y0 = (center.y - half).floor() as i32;
        let y1 = ((center.y + half).ceil() as i32).max(y0 + 1);

        let mut range: Option<(f32, f32)> = None;
        for x in x0..x1 {
            for y in y0..y1 {
                if !self.has_data(x, y) {
                    continue;
                }
                let local = IVec2::new(x, y) - self.layout.origin;
                let idx = local.x as usize * self.layout.cells.y as usize + local.y as usize;
                let (lo, hi) = self.cell_ranges[idx];
                range = Some(match range {
                    Some((min, max)) => (min.min(lo), max.max(hi)),
                    None => (lo, hi),
                });
            }
        }
        range
    }

    fn fill_vertex_data(&self, lod: u8, size: f32, center: Vec2) -> VertexData {
        fill_grid(
            self.layout.cell_vertices,
            self.layout.cell_world_size,
            lod,
            size,
            center,
            |p| {
                let (gx, gy) = self.grid_index(p)?;
                let normal = self.normal(gx, gy);
                let shade = (155.0 + 100.0 * normal.z).round() as u8;
                Some(GridSample {
                    height: self.height(gx, gy),
                    normal,
                    color: [shade, shade, shade, 255],
                })
            },
        )
    }

    fn blend_layers(&self, size: f32, center: Vec2) -> LayerData {
        let texels = (size * BLEND_TEXELS_PER_CELL).max(1.0) as u32;
        let origin = center - Vec2::splat(size * 0.5);
        let thresholds = self.band_thresholds();
        let width = (0.1 * self.max_amplitude).max(f32::EPSILON);

        let mut maps: Vec<BlendMap> = thresholds
            .iter()
            .map(|_| BlendMap {
                size: texels,
                weights: Vec::with_capacity((texels * texels) as usize),
            })
            .collect();

        for v in 0..texels {
            for u in 0..texels {
                let uv = (Vec2::new(u as f32, v as f32) + 0.5) / texels as f32;
                let height = self.height_at(origin + uv * size);
                for (map, &threshold) in maps.iter_mut().zip(thresholds.iter()) {
                    let w = height.map_or(0, |h| Self::band_weight(h, threshold, width));
                    map.weights.push(w);
                }
            }
        }

        LayerData {
            layers: vec![
                LayerInfo::diffuse("grass"),
                LayerInfo::diffuse("rock"),
                LayerInfo::diffuse("snow"),
            ],
            blend_maps: maps,
        }
    }

    fn cell_world_size(&self) -> f32 {
        self.layout.cell_world_size
    }

    fn cell_vertices(&self) -> u32 {
        self.layout.cell_vertices
    }
}
