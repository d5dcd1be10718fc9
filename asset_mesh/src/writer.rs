//! `.obj` to `.pkmesh` compilation pipeline.

use std::mem::offset_of;
use std::path::Path;

use hashbrown::HashMap;
use meshopt::VertexDataAdapter;

use asset_format::buffer::AssetBuffer;
use asset_format::freshness;
use asset_format::mesh::{
    IndexType, MeshBlob, Submesh, VertexAttribute, VS_NORMAL, VS_POSITION, VS_TANGENT,
    VS_TEXCOORD0,
};
use asset_format::meta::AssetMeta;
use asset_format::writer::{persist, WriteStatus};
use asset_format::{write_name, AssetType, ElementType};

use crate::meshlet::{create_meshlet_mesh, MeshletBuildInput};
use crate::tangent::{calculate_tangents, TangentGeometry};
use crate::Error;

/// Per-mesh options from the `.pkmeta` sidecar.
#[derive(Copy, Clone, Debug, Default)]
struct MeshOptions {
    split_position_stream: bool,
    half_normals: bool,
    half_tangents: bool,
    half_uvs: bool,
}

impl MeshOptions {
    fn load(source: &Path) -> Self {
        let meta = AssetMeta::for_source(source);

        Self {
            split_position_stream: meta.bool_or("mesh_splitPositionStream", false),
            half_normals: meta.bool_or("mesh_useHalfPrecisionNormals", false),
            half_tangents: meta.bool_or("mesh_useHalfPrecisionTangents", false),
            half_uvs: meta.bool_or("mesh_useHalfPrecisionUVs", false),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Remap -> cache -> overdraw -> fetch optimisation over the interleaved
/// buffer. Returns the deduplicated vertex count.
fn optimize_mesh(
    vertices: &mut Vec<f32>,
    stride_f32: usize,
    indices: &mut [u32],
    submeshes: &[Submesh],
) -> Result<usize, Error> {
    let stride = stride_f32 * std::mem::size_of::<f32>();
    let vertex_count = vertices.len() / stride_f32;

    let mut remap = vec![0u32; vertex_count];
    let unique = unsafe {
        meshopt::ffi::meshopt_generateVertexRemap(
            remap.as_mut_ptr(),
            indices.as_ptr(),
            indices.len(),
            vertices.as_ptr().cast(),
            vertex_count,
            stride,
        )
    };

    unsafe {
        meshopt::ffi::meshopt_remapIndexBuffer(
            indices.as_mut_ptr(),
            indices.as_ptr(),
            indices.len(),
            remap.as_ptr(),
        );
        meshopt::ffi::meshopt_remapVertexBuffer(
            vertices.as_mut_ptr().cast(),
            vertices.as_ptr().cast(),
            vertex_count,
            stride,
            remap.as_ptr(),
        );
    }

    vertices.truncate(unique * stride_f32);

    let adapter = VertexDataAdapter::new(bytemuck::cast_slice(vertices), stride, 0)?;

    for (index, submesh) in submeshes.iter().enumerate() {
        let first = submesh.first_index as usize;
        let sub_indices = &mut indices[first..first + submesh.index_count as usize];

        meshopt::optimize_vertex_cache_in_place(sub_indices, unique);
        // Positions are the first attribute of every vertex.
        meshopt::optimize_overdraw_in_place(sub_indices, &adapter, 1.05);

        let stats = meshopt::analyze_overdraw(sub_indices, &adapter);
        tracing::debug!(
            submesh = index,
            overdraw = stats.overdraw,
            covered = stats.pixels_covered,
            shaded = stats.pixels_shaded,
            "submesh overdraw"
        );
    }

    unsafe {
        meshopt::ffi::meshopt_optimizeVertexFetch(
            vertices.as_mut_ptr().cast(),
            indices.as_mut_ptr(),
            indices.len(),
            vertices.as_ptr().cast(),
            unique,
            stride,
        );
    }

    let fetch = meshopt::analyze_vertex_fetch(indices, unique, stride);
    tracing::debug!(
        overfetch = fetch.overfetch,
        bytes = fetch.bytes_fetched,
        "vertex fetch"
    );

    Ok(unique)
}

/// Rewrites one float attribute as packed halves, padded to a 4-byte
/// boundary. Returns the (negative) stride delta in bytes.
fn convert_attribute_to_half(
    vertices: &mut Vec<u8>,
    stride: usize,
    offset: usize,
    components: usize,
) -> isize {
    let aligned_components = (components + 1) / 2 * 2;
    let full_size = components * 4;
    let half_size = aligned_components * 2;
    let new_stride = stride - (full_size - half_size);
    let vertex_count = vertices.len() / stride;

    let mut out = vec![0u8; new_stride * vertex_count];

    for i in 0..vertex_count {
        let src = &vertices[i * stride..(i + 1) * stride];
        let dst = &mut out[i * new_stride..(i + 1) * new_stride];

        dst[..offset].copy_from_slice(&src[..offset]);
        dst[offset + half_size..].copy_from_slice(&src[offset + full_size..]);

        for c in 0..components {
            let value: f32 = bytemuck::pod_read_unaligned(&src[offset + c * 4..offset + c * 4 + 4]);
            let half = crate::pack::pack_half(value);
            dst[offset + c * 2..offset + c * 2 + 2].copy_from_slice(&half.to_le_bytes());
        }
    }

    *vertices = out;
    new_stride as isize - stride as isize
}

/// Moves positions into a trailing second stream; the remaining attributes
/// close ranks in stream zero.
fn split_position_stream(vertices: &mut Vec<u8>, stride: usize) {
    const POSITION_SIZE: usize = 12;

    let vertex_count = vertices.len() / stride;
    let attribute_stride = stride - POSITION_SIZE;
    let mut out = vec![0u8; vertices.len()];

    let (stream0, stream1) = out.split_at_mut(attribute_stride * vertex_count);

    for i in 0..vertex_count {
        let src = &vertices[i * stride..(i + 1) * stride];
        stream0[i * attribute_stride..(i + 1) * attribute_stride]
            .copy_from_slice(&src[POSITION_SIZE..]);
        stream1[i * POSITION_SIZE..(i + 1) * POSITION_SIZE]
            .copy_from_slice(&src[..POSITION_SIZE]);
    }

    *vertices = out;
}

pub fn write_mesh(src: &Path, dst: &Path) -> Result<WriteStatus, Error> {
    if !freshness::is_file_out_of_date(src, dst) {
        return Ok(WriteStatus::UpToDate);
    }

    let filename = file_stem(src);
    tracing::info!(mesh = %filename, "preprocessing mesh");

    let (models, _materials) = tobj::load_obj(
        src,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: false,
            ignore_points: true,
            ignore_lines: true,
        },
    )?;

    if models.iter().all(|model| model.mesh.positions.is_empty()) {
        return Err(Error::EmptyMesh);
    }

    let options = MeshOptions::load(src);
    let has_normals = models.iter().any(|model| !model.mesh.normals.is_empty());
    let has_uvs = models.iter().any(|model| !model.mesh.texcoords.is_empty());
    let has_tangents = has_normals && has_uvs;

    // Full-precision interleaved layout, offsets in f32 units.
    let offset_normals = 3;
    let offset_tangents = offset_normals + if has_normals { 3 } else { 0 };
    let offset_uvs = offset_tangents + if has_tangents { 4 } else { 0 };
    let stride_f32 = offset_uvs + if has_uvs { 2 } else { 0 };

    // Attribute table with the final (possibly half precision) layout.
    let mut attributes = Vec::new();
    let mut attribute_offset: u16 = if options.split_position_stream { 0 } else { 12 };

    {
        let mut attribute = VertexAttribute {
            name: [0; asset_format::NAME_MAX_LENGTH],
            element_type: ElementType::Float3 as u16,
            size: 12,
            offset: 0,
            stream: u16::from(options.split_position_stream),
        };
        write_name(&mut attribute.name, VS_POSITION);
        attributes.push(attribute);
    }

    if has_normals {
        let mut attribute = VertexAttribute {
            name: [0; asset_format::NAME_MAX_LENGTH],
            element_type: if options.half_normals {
                ElementType::Half4 as u16
            } else {
                ElementType::Float3 as u16
            },
            size: if options.half_normals { 8 } else { 12 },
            offset: attribute_offset,
            stream: 0,
        };
        write_name(&mut attribute.name, VS_NORMAL);
        attribute_offset += attribute.size;
        attributes.push(attribute);
    }

    if has_tangents {
        let mut attribute = VertexAttribute {
            name: [0; asset_format::NAME_MAX_LENGTH],
            element_type: if options.half_tangents {
                ElementType::Half4 as u16
            } else {
                ElementType::Float4 as u16
            },
            size: if options.half_tangents { 8 } else { 16 },
            offset: attribute_offset,
            stream: 0,
        };
        write_name(&mut attribute.name, VS_TANGENT);
        attribute_offset += attribute.size;
        attributes.push(attribute);
    }

    if has_uvs {
        let mut attribute = VertexAttribute {
            name: [0; asset_format::NAME_MAX_LENGTH],
            element_type: if options.half_uvs {
                ElementType::Half2 as u16
            } else {
                ElementType::Float2 as u16
            },
            size: if options.half_uvs { 4 } else { 8 },
            offset: attribute_offset,
            stream: 0,
        };
        write_name(&mut attribute.name, VS_TEXCOORD0);
        attributes.push(attribute);
    }

    // Deduplicate by the (position, normal, texcoord) index tuple while
    // accumulating per-submesh bounds.
    let mut vertices: Vec<f32> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut submeshes: Vec<Submesh> = Vec::new();
    let mut index_map: HashMap<(usize, u32, u32, u32), u32> = HashMap::new();

    for (model_index, model) in models.iter().enumerate() {
        let mesh = &model.mesh;
        let mut submesh = Submesh {
            first_index: indices.len() as u32,
            index_count: mesh.indices.len() as u32,
            bbmin: [f32::MAX; 3],
            bbmax: [f32::MIN; 3],
        };

        for (slot, &position_index) in mesh.indices.iter().enumerate() {
            let normal_index = mesh.normal_indices.get(slot).copied().unwrap_or(0);
            let texcoord_index = mesh.texcoord_indices.get(slot).copied().unwrap_or(0);
            let key = (model_index, position_index, normal_index, texcoord_index);

            if let Some(&existing) = index_map.get(&key) {
                indices.push(existing);
                continue;
            }

            let next = (vertices.len() / stride_f32) as u32;
            index_map.insert(key, next);
            indices.push(next);

            let base = position_index as usize * 3;
            let position = &mesh.positions[base..base + 3];
            vertices.extend_from_slice(position);

            if has_normals {
                if mesh.normals.is_empty() {
                    vertices.extend_from_slice(&[0.0; 3]);
                } else {
                    let base = normal_index as usize * 3;
                    vertices.extend_from_slice(&mesh.normals[base..base + 3]);
                }
            }

            if has_tangents {
                vertices.extend_from_slice(&[0.0; 4]);
            }

            if has_uvs {
                if mesh.texcoords.is_empty() {
                    vertices.extend_from_slice(&[0.0; 2]);
                } else {
                    let base = texcoord_index as usize * 2;
                    vertices.extend_from_slice(&mesh.texcoords[base..base + 2]);
                }
            }

            for axis in 0..3 {
                submesh.bbmin[axis] = submesh.bbmin[axis].min(position[axis]);
                submesh.bbmax[axis] = submesh.bbmax[axis].max(position[axis]);
            }
        }

        submeshes.push(submesh);
    }

    let vertex_count = optimize_mesh(&mut vertices, stride_f32, &mut indices, &submeshes)?;

    let index_type = if vertex_count > usize::from(u16::MAX) {
        IndexType::Uint32
    } else {
        IndexType::Uint16
    };

    if has_tangents {
        let mut geometry = TangentGeometry {
            vertices: &mut vertices,
            stride_f32,
            offset_normal: offset_normals,
            offset_tangent: offset_tangents,
            offset_texcoord: offset_uvs,
            indices: &indices,
        };
        calculate_tangents(&mut geometry)?;
    }

    // Meshlets are always built from the full-precision data, regardless of
    // the precision of the persisted vertex buffer.
    let meshlet_vertices = vertices.clone();
    let meshlet_indices = indices.clone();

    let mut vertex_bytes: Vec<u8> = bytemuck::cast_slice(&vertices).to_vec();
    let mut stride = stride_f32 * 4;
    let mut byte_offset_tangents = offset_tangents * 4;
    let mut byte_offset_uvs = offset_uvs * 4;

    if has_normals && options.half_normals {
        let delta = convert_attribute_to_half(&mut vertex_bytes, stride, offset_normals * 4, 3);
        stride = (stride as isize + delta) as usize;
        byte_offset_tangents = (byte_offset_tangents as isize + delta) as usize;
        byte_offset_uvs = (byte_offset_uvs as isize + delta) as usize;
    }

    if has_tangents && options.half_tangents {
        let delta = convert_attribute_to_half(&mut vertex_bytes, stride, byte_offset_tangents, 4);
        stride = (stride as isize + delta) as usize;
        byte_offset_uvs = (byte_offset_uvs as isize + delta) as usize;
    }

    if has_uvs && options.half_uvs {
        let delta = convert_attribute_to_half(&mut vertex_bytes, stride, byte_offset_uvs, 2);
        stride = (stride as isize + delta) as usize;
    }

    debug_assert_eq!(stride % 4, 0);

    if options.split_position_stream {
        split_position_stream(&mut vertex_bytes, stride);
    }

    let mut buffer = AssetBuffer::new(AssetType::Mesh, &filename);
    let mesh = buffer.alloc::<MeshBlob>(1);

    buffer.update(mesh, |record| {
        record.index_type = index_type as u16;
        record.submesh_count = submeshes.len() as u32;
        record.vertex_attribute_count = attributes.len() as u32;
        record.vertex_count = vertex_count as u32;
        record.index_count = indices.len() as u32;
    });

    let attributes_ptr = buffer.write_slice(&attributes);
    buffer.link(mesh, offset_of!(MeshBlob, vertex_attributes), attributes_ptr);

    let submeshes_ptr = buffer.write_slice(&submeshes);
    buffer.link(mesh, offset_of!(MeshBlob, submeshes), submeshes_ptr);

    let vertex_ptr = buffer.write_slice(&vertex_bytes);
    buffer.link(mesh, offset_of!(MeshBlob, vertex_buffer), vertex_ptr);

    match index_type {
        IndexType::Uint32 => {
            let bytes: &[u8] = bytemuck::cast_slice(&indices);
            let index_ptr = buffer.write_slice(bytes);
            buffer.link(mesh, offset_of!(MeshBlob, index_buffer), index_ptr);
        }
        IndexType::Uint16 => {
            // Pad the 16-bit index array to a 4-byte multiple.
            let mut short_indices: Vec<u16> =
                indices.iter().map(|&index| index as u16).collect();
            if short_indices.len() % 2 != 0 {
                short_indices.push(0);
            }

            let bytes: &[u8] = bytemuck::cast_slice(&short_indices);
            let index_ptr = buffer.write_slice(bytes);
            buffer.link(mesh, offset_of!(MeshBlob, index_buffer), index_ptr);
        }
    }

    // Meshlets go last for better read coherency in the runtime.
    let meshlet_input = MeshletBuildInput {
        vertices: &meshlet_vertices,
        indices: &meshlet_indices,
        stride_f32,
        vertex_count,
        offset_texcoord: has_uvs.then_some(offset_uvs),
        offset_normal: has_normals.then_some(offset_normals),
        offset_tangent: has_tangents.then_some(offset_tangents),
    };

    let meshlet_ptr = create_meshlet_mesh(&mut buffer, &submeshes, &meshlet_input)?;
    buffer.link(mesh, offset_of!(MeshBlob, meshlet_mesh), meshlet_ptr);

    persist(dst, &mut buffer, false)?;

    Ok(WriteStatus::Written)
}

#[cfg(test)]
mod tests {
    use crate::pack::unpack_half;

    use super::{convert_attribute_to_half, split_position_stream};

    #[test]
    fn half_conversion_preserves_four_byte_alignment() {
        // pos3 + normal3 + uv2, two vertices.
        let vertices_f32: Vec<f32> = vec![
            1.0, 2.0, 3.0, 0.0, 1.0, 0.0, 0.25, 0.75, //
            4.0, 5.0, 6.0, 0.0, 0.0, 1.0, 0.5, 0.5,
        ];
        let mut vertices: Vec<u8> = bytemuck::cast_slice(&vertices_f32).to_vec();
        let stride = 8 * 4;

        let delta = convert_attribute_to_half(&mut vertices, stride, 12, 3);

        // Three components pad to four 16-bit slots: 12 bytes shrink to 8.
        assert_eq!(delta, -4);
        let stride = (stride as isize + delta) as usize;
        assert_eq!(stride % 4, 0);
        assert_eq!(vertices.len(), stride * 2);

        // Positions survive untouched, normals are halves, uvs shifted.
        let position: f32 = bytemuck::pod_read_unaligned(&vertices[stride..stride + 4]);
        assert_eq!(position, 4.0);

        let normal_y = u16::from_le_bytes([vertices[12 + 2], vertices[12 + 3]]);
        assert_eq!(unpack_half(normal_y), 1.0);

        let uv: f32 = bytemuck::pod_read_unaligned(&vertices[20..24]);
        assert_eq!(uv, 0.25);
    }

    #[test]
    fn position_split_moves_positions_to_a_tail_stream() {
        let vertices_f32: Vec<f32> = vec![
            1.0, 2.0, 3.0, 9.0, //
            4.0, 5.0, 6.0, 8.0,
        ];
        let mut vertices: Vec<u8> = bytemuck::cast_slice(&vertices_f32).to_vec();

        split_position_stream(&mut vertices, 16);

        let float_at = |index: usize| -> f32 {
            bytemuck::pod_read_unaligned(&vertices[index * 4..index * 4 + 4])
        };

        // Stream 0: the non-position attribute of both vertices.
        assert_eq!(float_at(0), 9.0);
        assert_eq!(float_at(1), 8.0);
        // Stream 1: contiguous positions at the tail.
        let tail: Vec<f32> = (2..8).map(float_at).collect();
        assert_eq!(tail, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
