//! Meshlet DAG construction.
//!
//! An indexed mesh is clustered into bounded meshlets, the meshlets are
//! grouped by shared (spatially remapped) edges via a METIS k-way partition,
//! and each group is simplified into coarser meshlets. Repeating the process
//! yields a multi-level DAG in which every meshlet carries a
//! `(center, error)` pair for itself and for its coarser parent, so the
//! runtime can pick the coarsest meshlet whose projected error is acceptable.

use std::mem::offset_of;

use glam::Vec3;
use hashbrown::{HashMap, HashSet};
use meshopt::ffi::meshopt_Meshlet;
use meshopt::VertexDataAdapter;

use asset_format::buffer::{AssetBuffer, WritePtr};
use asset_format::mesh::{
    Meshlet, MeshletMesh, MeshletSubmesh, MeshletVertex, Submesh, MESHLET_CONE_WEIGHT,
    MESHLET_LOD_MAX_ERROR, MESHLET_MAX_TRIANGLES, MESHLET_MAX_VERTICES,
};

use crate::cluster::{self, edge_key};
use crate::pack::{calculate_bounds, max_extent, octa_encode, pack_half};
use crate::Error;

const DAG_MAX_GROUP_SIZE: usize = 12;
const DAG_TARGET_GROUP_SIZE: usize = 6;
const DAG_MAX_LEVELS: usize = 5;
const DAG_DECIMATE_FACTOR: usize = 2;
const DAG_MIN_SIMPLIFICATION_FACTOR_MESHLET: f32 = 0.9;
const DAG_MIN_SIMPLIFICATION_FACTOR_LEVEL: f32 = 0.9;
const METIS_UFACTOR: i32 = 200;

/// Vertex layout of the cluster input, offsets in `f32` units.
#[derive(Clone, Debug)]
pub struct MeshletBuildInput<'a> {
    pub vertices: &'a [f32],
    pub indices: &'a [u32],
    pub stride_f32: usize,
    pub vertex_count: usize,
    pub offset_texcoord: Option<usize>,
    pub offset_normal: Option<usize>,
    pub offset_tangent: Option<usize>,
}

#[derive(Copy, Clone, Debug)]
struct CenterError {
    center: Vec3,
    error: f32,
}

impl Default for CenterError {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            error: MESHLET_LOD_MAX_ERROR,
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct LodInfo {
    current: CenterError,
    parent: CenterError,
}

/// Per-submesh working state: a growing soup of meshlets across DAG levels.
struct DagContext<'a> {
    meshlets: Vec<meshopt_Meshlet>,
    lod: Vec<LodInfo>,
    meshlet_vertices: Vec<u32>,
    meshlet_triangles: Vec<u8>,

    vertices: &'a [f32],
    stride_f32: usize,
    vertex_count: usize,

    remap: &'a [u32],
    weights: &'a [f32],
    locks: &'a mut [bool],
}

impl<'a> DagContext<'a> {
    fn adapter(&self) -> Result<VertexDataAdapter<'a>, Error> {
        Ok(VertexDataAdapter::new(
            bytemuck::cast_slice(self.vertices),
            self.stride_f32 * std::mem::size_of::<f32>(),
            0,
        )?)
    }

    /// Clusters `indices` into meshlets, runs the intra-cluster optimizer on
    /// each, and appends them to the soup. Returns the number added.
    fn build_and_optimize(&mut self, indices: &[u32]) -> Result<usize, Error> {
        if indices.is_empty() {
            return Ok(0);
        }

        let adapter = self.adapter()?;
        let mut built = meshopt::build_meshlets(
            indices,
            &adapter,
            MESHLET_MAX_VERTICES,
            MESHLET_MAX_TRIANGLES,
            MESHLET_CONE_WEIGHT,
        );

        for meshlet in &built.meshlets {
            unsafe {
                meshopt::ffi::meshopt_optimizeMeshlet(
                    built
                        .vertices
                        .as_mut_ptr()
                        .add(meshlet.vertex_offset as usize),
                    built
                        .triangles
                        .as_mut_ptr()
                        .add(meshlet.triangle_offset as usize),
                    meshlet.triangle_count as usize,
                    meshlet.vertex_count as usize,
                );
            }
        }

        let vertex_base = self.meshlet_vertices.len() as u32;
        let triangle_base = self.meshlet_triangles.len() as u32;

        for meshlet in &built.meshlets {
            let mut meshlet = *meshlet;
            meshlet.vertex_offset += vertex_base;
            meshlet.triangle_offset += triangle_base;
            self.meshlets.push(meshlet);
            self.lod.push(LodInfo::default());
        }

        self.meshlet_vertices.extend_from_slice(&built.vertices);
        self.meshlet_triangles.extend_from_slice(&built.triangles);

        Ok(built.meshlets.len())
    }

    /// Triangle indices of a meshlet group under the meshlet-to-global vertex
    /// indirection.
    fn group_triangle_indices(&self, group: &[u32]) -> Vec<u32> {
        let mut indices = Vec::new();

        for &meshlet_id in group {
            let meshlet = &self.meshlets[meshlet_id as usize];
            let vertex_offset = meshlet.vertex_offset as usize;
            let triangle_offset = meshlet.triangle_offset as usize;

            for j in 0..meshlet.triangle_count as usize * 3 {
                let local = self.meshlet_triangles[triangle_offset + j] as usize;
                indices.push(self.meshlet_vertices[vertex_offset + local]);
            }
        }

        indices
    }

    /// Groups the meshlets in `first..first + count` by shared remapped
    /// edges and partitions the adjacency with METIS.
    fn build_groups(&self, first: usize, count: usize) -> Result<Vec<Vec<u32>>, Error> {
        let mut edge_meshlets: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut pairs: HashSet<(u32, u32)> = HashSet::new();

        for local in 0..count {
            let meshlet = &self.meshlets[first + local];
            let vertex_offset = meshlet.vertex_offset as usize;
            let triangle_offset = meshlet.triangle_offset as usize;

            for j in 0..meshlet.triangle_count as usize * 3 {
                let corner = |slot: usize| {
                    let local_index = self.meshlet_triangles[triangle_offset + slot] as usize;
                    self.remap[self.meshlet_vertices[vertex_offset + local_index] as usize]
                };

                let i0 = corner(j);
                let i1 = corner((j / 3) * 3 + (j + 1) % 3);

                let owners = edge_meshlets.entry(edge_key(i0, i1)).or_default();

                for &owner in owners.iter() {
                    if owner != local as u32 {
                        let pair = (owner.min(local as u32), owner.max(local as u32));
                        pairs.insert(pair);
                    }
                }

                if owners.last() != Some(&(local as u32)) {
                    owners.push(local as u32);
                }
            }
        }

        let target_parts = (count + DAG_TARGET_GROUP_SIZE - 1) / DAG_TARGET_GROUP_SIZE;
        let mut parts = vec![0i32; count];

        // A single partition needs no graph cut.
        if target_parts > 1 {
            let mut adjacency: Vec<Vec<i32>> = vec![Vec::new(); count];

            for &(a, b) in &pairs {
                adjacency[a as usize].push(b as i32);
                adjacency[b as usize].push(a as i32);
            }

            let mut xadj = Vec::with_capacity(count + 1);
            let mut adjncy = Vec::new();
            xadj.push(0i32);

            for list in &adjacency {
                adjncy.extend_from_slice(list);
                xadj.push(adjncy.len() as i32);
            }

            metis::Graph::new(1, target_parts as i32, &xadj, &adjncy)
                .map_err(|err| Error::Partition(err.to_string()))?
                .set_option(metis::option::UFactor(METIS_UFACTOR))
                .part_kway(&mut parts)
                .map_err(|err| Error::Partition(err.to_string()))?;
        }

        let group_count = parts.iter().copied().max().unwrap_or(0) as usize + 1;
        let mut groups: Vec<Vec<u32>> = vec![Vec::new(); group_count];

        for (local, &part) in parts.iter().enumerate() {
            let group = &mut groups[part as usize];

            if group.len() >= DAG_MAX_GROUP_SIZE {
                tracing::warn!(part, "meshlet group exceeds capacity, splitting");
                groups.push(vec![(first + local) as u32]);
                continue;
            }

            group.push((first + local) as u32);
        }

        Ok(groups)
    }

    /// One refinement pass per level: group, simplify each group, emit
    /// coarser meshlets. Stops when a level fails to reduce enough.
    fn refine_levels(&mut self) -> Result<(), Error> {
        let initial_triangles = self.meshlet_triangles.len() / 3;
        let mut level_first = 0usize;
        let mut level_count = self.meshlets.len();
        let mut levels_built = 0u32;

        for _ in 0..DAG_MAX_LEVELS {
            let groups = self.build_groups(level_first, level_count)?;

            let mut total_indices = 0usize;
            let mut total_simplified = 0usize;
            level_first = self.meshlets.len();
            level_count = 0;

            for group in &groups {
                if group.len() <= 1 {
                    continue;
                }

                let mut indices = self.group_triangle_indices(group);
                let original_len = indices.len();
                let target_index_count = 3 * ((original_len / DAG_DECIMATE_FACTOR) / 3);

                let error = cluster::simplify_cluster(
                    &mut indices,
                    self.vertices,
                    self.stride_f32,
                    self.vertex_count,
                    self.remap,
                    self.weights,
                    self.locks,
                    target_index_count,
                    usize::MAX,
                )?;

                let factor = indices.len() as f32 / original_len as f32;

                // Unsimplifiable group: its children stay as leaves.
                if factor > DAG_MIN_SIMPLIFICATION_FACTOR_MESHLET {
                    continue;
                }

                total_indices += original_len;
                total_simplified += indices.len();

                let (center, extents) = calculate_bounds(self.vertices, self.stride_f32, &indices);

                // The error must be monotonically non-decreasing up the DAG:
                // scale to object units, then absorb the worst child error.
                let mut group_error = error * max_extent(extents);
                let max_child_error = group
                    .iter()
                    .map(|&id| self.lod[id as usize].current.error)
                    .fold(0.0f32, f32::max);
                group_error += max_child_error;

                let parent = CenterError {
                    center,
                    error: group_error,
                };

                for &child in group {
                    self.lod[child as usize].parent = parent;
                }

                let added_first = self.meshlets.len();
                let added = self.build_and_optimize(&indices)?;

                for lod in &mut self.lod[added_first..added_first + added] {
                    lod.current = parent;
                    lod.parent = CenterError::default();
                }

                level_count += added;
            }

            levels_built += 1;

            let level_factor = total_simplified as f32 / total_indices.max(1) as f32;

            if level_factor > DAG_MIN_SIMPLIFICATION_FACTOR_LEVEL
                || total_indices == 0
                || level_count <= 1
            {
                break;
            }
        }

        tracing::debug!(
            triangles_in = initial_triangles,
            meshlets = self.meshlets.len(),
            levels = levels_built,
            "built meshlet DAG"
        );

        Ok(())
    }
}

fn encode_vertex_position(position: Vec3, bbmin: Vec3, bbmax: Vec3) -> u32 {
    let size = (bbmax - bbmin).max(Vec3::splat(f32::EPSILON));
    let normalized = (position - bbmin) / size;

    let qx = ((normalized.x * 2047.0) as i32).clamp(0, 2047) as u32;
    let qy = ((normalized.y * 2047.0) as i32).clamp(0, 2047) as u32;
    let _qz = ((normalized.z * 1023.0) as i32).clamp(0, 1023) as u32;

    // Legacy layout: the second component is OR-shifted into bits 10..19 in
    // place of the third. Readers depend on the exact bit pattern, so it is
    // part of the format.
    (qx & 0x7FF) | ((qy & 0x7FF) << 11) | ((qy & 0x3FF) << 10)
}

fn encode_texcoord(uv: [f32; 2]) -> u32 {
    u32::from(pack_half(uv[0])) | (u32::from(pack_half(uv[1])) << 16)
}

fn encode_normal(normal: Vec3) -> u32 {
    let octa = octa_encode(normal);
    let u = ((octa.x * 65535.0) as i32).clamp(0, 65535) as u32;
    let v = ((octa.y * 65535.0) as i32).clamp(0, 65535) as u32;
    u | (v << 16)
}

fn encode_tangent(tangent: Vec3, sign: f32) -> u32 {
    let octa = octa_encode(tangent);
    let u = ((octa.x * 32767.0) as i32).clamp(0, 32767) as u32;
    let v = ((octa.y * 32767.0) as i32).clamp(0, 32767) as u32;
    let sign = if sign < 0.0 { 0u32 } else { 3u32 };
    (u & 0x7FFF) | ((v & 0x7FFF) << 15) | (sign << 30)
}

fn pack_half3(value: Vec3) -> [u16; 3] {
    [pack_half(value.x), pack_half(value.y), pack_half(value.z)]
}

#[derive(Default)]
struct PackedSoup {
    meshlets: Vec<Meshlet>,
    submeshes: Vec<MeshletSubmesh>,
    vertices: Vec<MeshletVertex>,
    indices: Vec<u8>,
}

/// Builds the meshlet mesh for every submesh of an indexed mesh and writes it
/// into `buffer`, returning the handle for the caller to link.
pub fn create_meshlet_mesh(
    buffer: &mut AssetBuffer,
    submeshes: &[Submesh],
    input: &MeshletBuildInput<'_>,
) -> Result<WritePtr<MeshletMesh>, Error> {
    let (remap, weights) =
        cluster::vertex_remap_and_weights(input.vertices, input.stride_f32, input.vertex_count);
    let mut locks = vec![false; input.vertex_count];

    let mut out = PackedSoup::default();

    for submesh in submeshes {
        let first = submesh.first_index as usize;
        let submesh_indices = &input.indices[first..first + submesh.index_count as usize];

        let mut ctx = DagContext {
            meshlets: Vec::new(),
            lod: Vec::new(),
            meshlet_vertices: Vec::new(),
            meshlet_triangles: Vec::new(),
            vertices: input.vertices,
            stride_f32: input.stride_f32,
            vertex_count: input.vertex_count,
            remap: &remap,
            weights: &weights,
            locks: &mut locks,
        };

        let leaf_count = ctx.build_and_optimize(submesh_indices)?;

        if leaf_count == 0 {
            continue;
        }

        // Leaves start with a negative error so LOD selection always accepts
        // them; their centers are filled in during packing.
        for lod in &mut ctx.lod {
            lod.current.error = -1.0;
        }

        ctx.refine_levels()?;

        pack_submesh(&mut ctx, submesh, leaf_count, input, &mut out)?;
    }

    // Pad the triangle byte stream so its length is both a whole number of
    // triangles and 4-byte aligned.
    while out.indices.len() % 12 != 0 {
        out.indices.push(0);
    }

    tracing::debug!(
        meshlets = out.meshlets.len(),
        vertices = out.vertices.len(),
        triangles = out.indices.len() / 3,
        "packed meshlet mesh"
    );

    let mesh = buffer.alloc::<MeshletMesh>(1);
    buffer.update(mesh, |record| {
        record.triangle_count = (out.indices.len() / 3) as u32;
        record.vertex_count = out.vertices.len() as u32;
        record.submesh_count = out.submeshes.len() as u32;
        record.meshlet_count = out.meshlets.len() as u32;
    });

    let meshlets = buffer.write_slice(&out.meshlets);
    buffer.link(mesh, offset_of!(MeshletMesh, meshlets), meshlets);

    let meshlet_submeshes = buffer.write_slice(&out.submeshes);
    buffer.link(mesh, offset_of!(MeshletMesh, submeshes), meshlet_submeshes);

    let vertices = buffer.write_slice(&out.vertices);
    buffer.link(mesh, offset_of!(MeshletMesh, vertices), vertices);

    let indices = buffer.write_slice(&out.indices);
    buffer.link(mesh, offset_of!(MeshletMesh, indices), indices);

    Ok(mesh)
}

fn pack_submesh(
    ctx: &mut DagContext<'_>,
    submesh: &Submesh,
    leaf_count: usize,
    input: &MeshletBuildInput<'_>,
    out: &mut PackedSoup,
) -> Result<(), Error> {
    let adapter = ctx.adapter()?;
    let bbmin = Vec3::from_array(submesh.bbmin);
    let bbmax = Vec3::from_array(submesh.bbmax);

    out.submeshes.push(MeshletSubmesh {
        first_meshlet: out.meshlets.len() as u32,
        meshlet_count: ctx.meshlets.len() as u32,
        bbmin: submesh.bbmin,
        bbmax: submesh.bbmax,
    });

    for i in 0..ctx.meshlets.len() {
        let meshlet = ctx.meshlets[i];
        let vertex_offset = meshlet.vertex_offset as usize;
        let triangle_offset = meshlet.triangle_offset as usize;
        let vertex_count = meshlet.vertex_count as usize;
        let triangle_count = meshlet.triangle_count as usize;

        let meshlet_vertices = &ctx.meshlet_vertices[vertex_offset..vertex_offset + vertex_count];
        let meshlet_triangles =
            &ctx.meshlet_triangles[triangle_offset..triangle_offset + triangle_count * 3];

        let bounds = meshopt::compute_meshlet_bounds(
            meshopt::Meshlet {
                vertices: meshlet_vertices,
                triangles: meshlet_triangles,
            },
            &adapter,
        );

        let (center, extents) =
            calculate_bounds(ctx.vertices, ctx.stride_f32, meshlet_vertices);

        if i < leaf_count {
            ctx.lod[i].current = CenterError {
                center,
                error: -1.0,
            };
        }

        let lod = ctx.lod[i];

        out.meshlets.push(Meshlet {
            first_vertex: out.vertices.len() as u32,
            first_triangle: (out.indices.len() / 3) as u32,
            vertex_count: vertex_count as u16,
            triangle_count: triangle_count as u16,
            cone_axis: bounds.cone_axis_s8,
            cone_cutoff: bounds.cone_cutoff_s8,
            center: pack_half3(center),
            extents: pack_half3(extents),
            cone_apex: pack_half3(Vec3::from_array(bounds.cone_apex)),
            _reserved: 0,
            lod_center_current: pack_half3(lod.current.center),
            lod_error_current: pack_half(lod.current.error),
            lod_center_parent: pack_half3(lod.parent.center),
            lod_error_parent: pack_half(lod.parent.error),
        });

        out.indices.extend_from_slice(meshlet_triangles);

        for &vertex_index in meshlet_vertices {
            let base = vertex_index as usize * input.stride_f32;
            let position = Vec3::from_slice(&input.vertices[base..base + 3]);

            let texcoord = input.offset_texcoord.map_or(0, |offset| {
                encode_texcoord([
                    input.vertices[base + offset],
                    input.vertices[base + offset + 1],
                ])
            });

            let normal = input.offset_normal.map_or(0, |offset| {
                encode_normal(Vec3::from_slice(&input.vertices[base + offset..base + offset + 3]))
            });

            let tangent = input.offset_tangent.map_or(0, |offset| {
                encode_tangent(
                    Vec3::from_slice(&input.vertices[base + offset..base + offset + 3]),
                    input.vertices[base + offset + 3],
                )
            });

            out.vertices.push(MeshletVertex {
                position: encode_vertex_position(position, bbmin, bbmax),
                texcoord,
                normal,
                tangent,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{encode_normal, encode_tangent, encode_vertex_position};

    #[test]
    fn position_encoding_keeps_legacy_bit_layout() {
        let bbmin = Vec3::ZERO;
        let bbmax = Vec3::ONE;

        let encoded = encode_vertex_position(Vec3::new(1.0, 0.0, 1.0), bbmin, bbmax);
        // x saturates to 2047, y is zero; bits above 21 stay clear because
        // the third component never lands in its nominal slot.
        assert_eq!(encoded, 2047);

        let encoded = encode_vertex_position(Vec3::ONE, bbmin, bbmax);
        assert_eq!(encoded & 0x7FF, 2047);
        assert_eq!((encoded >> 11) & 0x7FF, 2047);
        assert_eq!(encoded >> 22, 0);
    }

    #[test]
    fn normal_encoding_packs_two_unorm16() {
        let encoded = encode_normal(Vec3::Y);
        assert_eq!(encoded & 0xFFFF, 32767);
        assert_eq!(encoded >> 16, 32767);
    }

    #[test]
    fn tangent_sign_lives_in_the_top_bits() {
        let positive = encode_tangent(Vec3::X, 1.0);
        let negative = encode_tangent(Vec3::X, -1.0);
        assert_eq!(positive >> 30, 3);
        assert_eq!(negative >> 30, 0);
        assert_eq!(positive & 0x3FFF_FFFF, negative & 0x3FFF_FFFF);
    }
}
