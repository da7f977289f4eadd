use std::sync::Arc;

use dashmap::DashMap;
use tessera_lod::StitchFlags;

use crate::index_buffer::{IndexBuffer, generate_indices};
use crate::uv::generate_uvs;

/// Shared UV coordinates for one grid size.
pub type UvBuffer = Arc<Vec<[f32; 2]>>;

/// Thread-safe cache of index and UV buffers shared between chunks.
///
/// Index buffers are keyed by `(verts, stitch flags)`, UV buffers by
/// `verts`. Buffers are generated on first request and live until
/// [`clear`](Self::clear).
#[derive(Default)]
pub struct BufferCache {
    index_buffers: DashMap<(u32, u16), Arc<IndexBuffer>>,
    uv_buffers: DashMap<u32, UvBuffer>,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index buffer for a `verts x verts` grid with the given stitching.
    pub fn index_buffer(&self, verts: u32, flags: StitchFlags) -> Arc<IndexBuffer> {
        self.index_buffers
            .entry((verts, flags.bits()))
            .or_insert_with(|| {
                tracing::debug!("Generating index buffer: {} verts, flags {:#06x}", verts, flags.bits());
                let indices = generate_indices(verts, flags);
                Arc::new(IndexBuffer::from_indices(indices, (verts * verts) as usize))
            })
            .clone()
    }

    /// The UV buffer for a `verts x verts` grid.
    pub fn uv_buffer(&self, verts: u32) -> UvBuffer {
        self.uv_buffers
            .entry(verts)
            .or_insert_with(|| Arc::new(generate_uvs(verts)))
            .clone()
    }

    pub fn index_buffer_count(&self) -> usize {
        self.index_buffers.len()
    }

    pub fn uv_buffer_count(&self) -> usize {
        self.uv_buffers.len()
    }

    pub fn clear(&self) {
        self.index_buffers.clear();
        self.uv_buffers.clear();
    }
}
