//! MikkTSpace tangent generation over the interleaved vertex buffer.

use crate::Error;

/// View over an interleaved `f32` vertex buffer, offsets in `f32` units.
pub(crate) struct TangentGeometry<'a> {
    pub vertices: &'a mut [f32],
    pub stride_f32: usize,
    pub offset_normal: usize,
    pub offset_tangent: usize,
    pub offset_texcoord: usize,
    pub indices: &'a [u32],
}

impl TangentGeometry<'_> {
    fn base(&self, face: usize, vert: usize) -> usize {
        self.indices[face * 3 + vert] as usize * self.stride_f32
    }
}

impl mikktspace::Geometry for TangentGeometry<'_> {
    fn num_faces(&self) -> usize {
        self.indices.len() / 3
    }

    fn num_vertices_of_face(&self, _face: usize) -> usize {
        3
    }

    fn position(&self, face: usize, vert: usize) -> [f32; 3] {
        let base = self.base(face, vert);
        self.vertices[base..base + 3].try_into().unwrap()
    }

    fn normal(&self, face: usize, vert: usize) -> [f32; 3] {
        let base = self.base(face, vert) + self.offset_normal;
        self.vertices[base..base + 3].try_into().unwrap()
    }

    fn tex_coord(&self, face: usize, vert: usize) -> [f32; 2] {
        let base = self.base(face, vert) + self.offset_texcoord;
        self.vertices[base..base + 2].try_into().unwrap()
    }

    fn set_tangent_encoded(&mut self, tangent: [f32; 4], face: usize, vert: usize) {
        let base = self.base(face, vert) + self.offset_tangent;
        self.vertices[base..base + 4].copy_from_slice(&tangent);
    }
}

pub(crate) fn calculate_tangents(geometry: &mut TangentGeometry<'_>) -> Result<(), Error> {
    if mikktspace::generate_tangents(geometry) {
        Ok(())
    } else {
        Err(Error::Tangents)
    }
}

#[cfg(test)]
mod tests {
    use super::{calculate_tangents, TangentGeometry};

    #[test]
    fn flat_triangle_gets_unit_tangents() {
        // pos3 + normal3 + tangent4 + uv2, stride 12.
        let mut vertices = vec![0.0f32; 12 * 3];

        for (i, (pos, uv)) in [
            ([0.0, 0.0, 0.0], [0.0, 0.0]),
            ([1.0, 0.0, 0.0], [1.0, 0.0]),
            ([0.0, 1.0, 0.0], [0.0, 1.0]),
        ]
        .iter()
        .enumerate()
        {
            vertices[i * 12..i * 12 + 3].copy_from_slice(pos);
            vertices[i * 12 + 3..i * 12 + 6].copy_from_slice(&[0.0, 0.0, 1.0]);
            vertices[i * 12 + 10..i * 12 + 12].copy_from_slice(uv);
        }

        let indices = [0u32, 1, 2];
        let mut geometry = TangentGeometry {
            vertices: &mut vertices,
            stride_f32: 12,
            offset_normal: 3,
            offset_tangent: 6,
            offset_texcoord: 10,
            indices: &indices,
        };

        calculate_tangents(&mut geometry).unwrap();

        for i in 0..3 {
            let tangent = &vertices[i * 12 + 6..i * 12 + 10];
            assert!((tangent[0].abs() - 1.0).abs() < 1e-4);
            assert!(tangent[3].abs() == 1.0);
        }
    }
}
