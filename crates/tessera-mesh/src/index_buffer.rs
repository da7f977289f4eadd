//! Shared triangle index buffers for square chunk grids.
//!
//! A chunk with `verts` vertices per edge stores vertex `(col, row)` at index
//! `col * verts + row`, where `col` runs west to east and `row` runs south to
//! north. The interior is tessellated in an alternating diamond pattern.
//! When any edge borders a coarser chunk, the outermost ring is instead
//! covered by triangle fans: stitched edges only reference every
//! `2^delta`-th vertex, matching the coarser neighbour; unstitched edges use
//! every vertex.

use tessera_lod::{Direction, StitchFlags};

/// Triangle list indices, narrowed to 16 bits when the grid allows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexBuffer {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexBuffer {
    /// Pack `indices` for a grid with `vertex_count` vertices.
    pub fn from_indices(indices: Vec<u32>, vertex_count: usize) -> Self {
        if vertex_count <= u16::MAX as usize + 1 {
            IndexBuffer::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            IndexBuffer::U32(indices)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexBuffer::U16(v) => v.len(),
            IndexBuffer::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn triangle_count(&self) -> usize {
        self.len() / 3
    }

    pub fn get(&self, i: usize) -> u32 {
        match self {
            IndexBuffer::U16(v) => u32::from(v[i]),
            IndexBuffer::U32(v) => v[i],
        }
    }

    /// Indices widened to `u32`.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }

    /// Raw bytes for upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexBuffer::U16(v) => bytemuck::cast_slice(v),
            IndexBuffer::U32(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn is_u16(&self) -> bool {
        matches!(self, IndexBuffer::U16(_))
    }
}

/// Generate the triangle list for a `verts x verts` grid with the given
/// edge stitching.
///
/// Stitch flags are ignored for grids without interior vertices (`verts <= 2`).
/// Deltas that would step past the far corner are clamped to the whole edge.
pub fn generate_indices(verts: u32, flags: StitchFlags) -> Vec<u32> {
    debug_assert!(verts >= 2, "a chunk grid needs at least two vertices per edge");
    let v = verts as usize;
    let last = v - 1;
    let stitched = v > 2 && !flags.is_empty();

    let mut out: Vec<usize> = Vec::with_capacity(last * last * 6);

    let (start, end) = if stitched { (1, last - 1) } else { (0, last) };
    for row in start..end {
        for col in start..end {
            let sw = v * col + row;
            let nw = v * col + row + 1;
            let se = v * (col + 1) + row;
            let ne = v * (col + 1) + row + 1;
            if (row + col) % 2 == 1 {
                out.extend_from_slice(&[se, ne, nw, sw, se, nw]);
            } else {
                out.extend_from_slice(&[sw, ne, nw, sw, se, ne]);
            }
        }
    }

    if stitched {
        let outer_step = |d: Direction| (1usize << flags.delta(d)).min(last);
        stitch_south(&mut out, v, outer_step(Direction::South));
        stitch_north(&mut out, v, outer_step(Direction::North));
        stitch_west(&mut out, v, outer_step(Direction::West));
        stitch_east(&mut out, v, outer_step(Direction::East));
    }

    out.into_iter().map(|i| i as u32).collect()
}

fn stitch_south(out: &mut Vec<usize>, v: usize, step: usize) {
    let last = v - 1;
    let row = 0;
    for col in (0..last).step_by(step) {
        out.push(v * col + row);
        out.push(v * (col + step) + row);
        // Keep clear of the east edge.
        if col + step == last {
            out.push(v * (col + step - 1) + row + 1);
        } else {
            out.push(v * (col + step) + row + 1);
        }
        for i in 0..step {
            if col + i == 0 || col + i == last - 1 {
                continue;
            }
            out.extend_from_slice(&[v * col + row, v * (col + i + 1) + row + 1, v * (col + i) + row + 1]);
        }
    }
}

fn stitch_north(out: &mut Vec<usize>, v: usize, step: usize) {
    let last = v - 1;
    let row = last;
    for col in (0..last).step_by(step) {
        out.push(v * (col + step) + row);
        out.push(v * col + row);
        // Keep clear of the west edge.
        if col == 0 {
            out.push(v * (col + 1) + row - 1);
        } else {
            out.push(v * col + row - 1);
        }
        for i in 0..step {
            if col + i == 0 || col + i == last - 1 {
                continue;
            }
            out.extend_from_slice(&[
                v * (col + i) + row - 1,
                v * (col + i + 1) + row - 1,
                v * (col + step) + row,
            ]);
        }
    }
}

fn stitch_west(out: &mut Vec<usize>, v: usize, step: usize) {
    let last = v - 1;
    let col = 0;
    for row in (0..last).step_by(step) {
        out.push(v * col + row + step);
        out.push(v * col + row);
        // Keep clear of the north edge.
        if row + step == last {
            out.push(v * (col + 1) + row + step - 1);
        } else {
            out.push(v * (col + 1) + row + step);
        }
        for i in 0..step {
            if row + i == 0 || row + i == last - 1 {
                continue;
            }
            out.extend_from_slice(&[v * col + row, v * (col + 1) + row + i, v * (col + 1) + row + i + 1]);
        }
    }
}

fn stitch_east(out: &mut Vec<usize>, v: usize, step: usize) {
    let last = v - 1;
    let col = last;
    for row in (0..last).step_by(step) {
        out.push(v * col + row);
        out.push(v * col + row + step);
        // Keep clear of the south edge.
        if row == 0 {
            out.push(v * (col - 1) + row + 1);
        } else {
            out.push(v * (col - 1) + row);
        }
        for i in 0..step {
            if row + i == 0 || row + i == last - 1 {
                continue;
            }
            out.extend_from_slice(&[
                v * col + row + step,
                v * (col - 1) + row + i + 1,
                v * (col - 1) + row + i,
            ]);
        }
    }
}
