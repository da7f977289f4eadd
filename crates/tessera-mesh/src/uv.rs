/// Texture coordinates for a `verts x verts` chunk grid.
///
/// Vertex `(col, row)` at index `col * verts + row` maps to
/// `(col / (verts - 1), 1 - row / (verts - 1))`, so the north edge of the
/// chunk is the top row of the texture.
pub fn generate_uvs(verts: u32) -> Vec<[f32; 2]> {
    debug_assert!(verts >= 2);
    let last = (verts - 1) as f32;
    let mut uvs = Vec::with_capacity((verts * verts) as usize);
    for col in 0..verts {
        for row in 0..verts {
            uvs.push([col as f32 / last, (last - row as f32) / last]);
        }
    }
    uvs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uv_corners() {
        let uvs = generate_uvs(3);
        assert_eq!(uvs.len(), 9);
        assert_eq!(uvs[0], [0.0, 1.0]);
        assert_eq!(uvs[2], [0.0, 0.0]);
        assert_eq!(uvs[6], [1.0, 1.0]);
        assert_eq!(uvs[8], [1.0, 0.0]);
        assert_eq!(uvs[4], [0.5, 0.5]);
    }
}
