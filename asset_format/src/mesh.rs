//! Persisted mesh records: conventional vertex/index buffers plus the packed
//! meshlet mesh with its LOD DAG fields.

use bytemuck::{Pod, Zeroable};

use crate::buffer::RelPtr;
use crate::NAME_MAX_LENGTH;

pub const MESHLET_MAX_VERTICES: usize = 64;
pub const MESHLET_MAX_TRIANGLES: usize = 124;
pub const MESHLET_CONE_WEIGHT: f32 = 0.5;

/// Parent-error sentinel for meshlets no coarser level has claimed yet.
pub const MESHLET_LOD_MAX_ERROR: f32 = 1e30;

/// Index width of the conventional index buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum IndexType {
    Uint16 = 0,
    Uint32 = 1,
}

impl IndexType {
    pub fn from_raw(raw: u16) -> Self {
        if raw == 1 {
            Self::Uint32
        } else {
            Self::Uint16
        }
    }
}

/// Vertex attribute names as they appear in vertex shader interfaces.
pub const VS_POSITION: &str = "in_POSITION";
pub const VS_NORMAL: &str = "in_NORMAL";
pub const VS_TANGENT: &str = "in_TANGENT";
pub const VS_TEXCOORD0: &str = "in_TEXCOORD0";

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct VertexAttribute {
    pub name: [u8; NAME_MAX_LENGTH],
    pub element_type: u16,
    pub size: u16,
    pub offset: u16,
    pub stream: u16,
}

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
    pub bbmin: [f32; 3],
    pub bbmax: [f32; 3],
}

/// Packed meshlet vertex: 16 bytes regardless of the source layout.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MeshletVertex {
    /// 11/11/10 quantised position relative to the submesh bounds. The
    /// legacy layout ORs the second component into bits 10..19 as well;
    /// readers rely on it, so the quirk is part of the format.
    pub position: u32,
    /// Two packed halves.
    pub texcoord: u32,
    /// Octahedral normal as two unorm16 components.
    pub normal: u32,
    /// Octahedral tangent as two snorm15 components plus a sign in the top
    /// bits.
    pub tangent: u32,
}

/// Packed meshlet with cluster bounds, cone culling data and the two LOD
/// center/error pairs used for runtime screen-space-error selection.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Meshlet {
    pub first_vertex: u32,
    pub first_triangle: u32,
    pub vertex_count: u16,
    pub triangle_count: u16,
    pub cone_axis: [i8; 3],
    pub cone_cutoff: i8,
    /// Cluster center, packed halves.
    pub center: [u16; 3],
    /// Cluster extents, packed halves.
    pub extents: [u16; 3],
    /// Cone apex, packed halves.
    pub cone_apex: [u16; 3],
    pub _reserved: u16,
    pub lod_center_current: [u16; 3],
    pub lod_error_current: u16,
    pub lod_center_parent: [u16; 3],
    pub lod_error_parent: u16,
}

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct MeshletSubmesh {
    pub first_meshlet: u32,
    pub meshlet_count: u32,
    pub bbmin: [f32; 3],
    pub bbmax: [f32; 3],
}

/// Meshlet-mesh table referenced by the root mesh record.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct MeshletMesh {
    pub triangle_count: u32,
    pub vertex_count: u32,
    pub submesh_count: u32,
    pub meshlet_count: u32,
    pub meshlets: RelPtr<Meshlet>,
    pub submeshes: RelPtr<MeshletSubmesh>,
    pub vertices: RelPtr<MeshletVertex>,
    /// Packed triangle index bytes, three per triangle, padded to 4 bytes.
    pub indices: RelPtr<u8>,
}

/// Root record of a `.pkmesh` file.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct MeshBlob {
    pub index_type: u16,
    pub _reserved: u16,
    pub submesh_count: u32,
    pub vertex_attribute_count: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_attributes: RelPtr<VertexAttribute>,
    pub submeshes: RelPtr<Submesh>,
    pub vertex_buffer: RelPtr<u8>,
    pub index_buffer: RelPtr<u8>,
    pub meshlet_mesh: RelPtr<MeshletMesh>,
}

#[cfg(test)]
mod tests {
    use super::{Meshlet, MeshletVertex};

    #[test]
    fn packed_record_sizes_are_stable() {
        assert_eq!(std::mem::size_of::<MeshletVertex>(), 16);
        assert_eq!(std::mem::size_of::<Meshlet>(), 52);
    }
}
