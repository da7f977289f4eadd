//! Geometry shared between terrain chunks: stitched index buffers, UV
//! buffers, and the cache that hands them out.

mod buffer_cache;
mod index_buffer;
mod uv;

pub use buffer_cache::{BufferCache, UvBuffer};
pub use index_buffer::{IndexBuffer, generate_indices};
pub use uv::generate_uvs;
