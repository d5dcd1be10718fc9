//! Persisted shader records: fixed-function state, keyword table, material
//! properties and per-variant SPIR-V plus reflection tables.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::buffer::RelPtr;
use crate::NAME_MAX_LENGTH;

pub const MAX_DESCRIPTOR_SETS: usize = 4;
pub const MAX_PUSH_CONSTANTS: usize = 8;
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
/// Descriptor count recorded for runtime-sized arrays.
pub const MAX_UNBOUNDED_SIZE: u32 = 0xFFFF;

/// Pipeline stages in persisted slot order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ShaderStage {
    Vertex = 0,
    TesselationControl,
    TesselationEvaluation,
    Geometry,
    Fragment,
    Compute,
    MeshTask,
    MeshAssembly,
    RayGeneration,
    RayMiss,
    RayClosestHit,
    RayAnyHit,
    RayIntersection,
}

pub const MAX_STAGES: usize = 13;

impl ShaderStage {
    pub const ALL: [Self; MAX_STAGES] = [
        Self::Vertex,
        Self::TesselationControl,
        Self::TesselationEvaluation,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
        Self::MeshTask,
        Self::MeshAssembly,
        Self::RayGeneration,
        Self::RayMiss,
        Self::RayClosestHit,
        Self::RayAnyHit,
        Self::RayIntersection,
    ];

    /// Stage name used in `#pragma PROGRAM_*` directives and stage defines.
    pub fn source_name(self) -> &'static str {
        match self {
            Self::Vertex => "VERTEX",
            Self::TesselationControl => "TESSELATION_CONTROL",
            Self::TesselationEvaluation => "TESSELATION_EVALUATE",
            Self::Geometry => "GEOMETRY",
            Self::Fragment => "FRAGMENT",
            Self::Compute => "COMPUTE",
            Self::MeshTask => "MESH_TASK",
            Self::MeshAssembly => "MESH_ASSEMBLY",
            Self::RayGeneration => "RAY_GENERATION",
            Self::RayMiss => "RAY_MISS",
            Self::RayClosestHit => "RAY_CLOSEST_HIT",
            Self::RayAnyHit => "RAY_ANY_HIT",
            Self::RayIntersection => "RAY_INTERSECTION",
        }
    }

    pub fn from_source_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.source_name() == name)
    }

    pub fn flag(self) -> StageFlags {
        StageFlags::from_bits_truncate(1 << self as u32)
    }

    pub fn is_mesh_shading(self) -> bool {
        matches!(self, Self::MeshTask | Self::MeshAssembly)
    }

    pub fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            Self::RayGeneration
                | Self::RayMiss
                | Self::RayClosestHit
                | Self::RayAnyHit
                | Self::RayIntersection
        )
    }

    pub fn is_ray_tracing_hit(self) -> bool {
        matches!(
            self,
            Self::RayMiss | Self::RayClosestHit | Self::RayAnyHit | Self::RayIntersection
        )
    }
}

bitflags! {
    /// One bit per [`ShaderStage`] slot.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StageFlags: u32 {
        const VERTEX = 1 << 0;
        const TESSELATION_CONTROL = 1 << 1;
        const TESSELATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
        const MESH_TASK = 1 << 6;
        const MESH_ASSEMBLY = 1 << 7;
        const RAY_GENERATION = 1 << 8;
        const RAY_MISS = 1 << 9;
        const RAY_CLOSEST_HIT = 1 << 10;
        const RAY_ANY_HIT = 1 << 11;
        const RAY_INTERSECTION = 1 << 12;
    }
}

/// Descriptor resource kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DescriptorType {
    Invalid = 0,
    Sampler,
    SamplerTexture,
    Texture,
    Image,
    ConstantBuffer,
    StorageBuffer,
    DynamicConstantBuffer,
    DynamicStorageBuffer,
    InputAttachment,
    AccelerationStructure,
}

impl DescriptorType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => Self::Sampler,
            2 => Self::SamplerTexture,
            3 => Self::Texture,
            4 => Self::Image,
            5 => Self::ConstantBuffer,
            6 => Self::StorageBuffer,
            7 => Self::DynamicConstantBuffer,
            8 => Self::DynamicStorageBuffer,
            9 => Self::InputAttachment,
            10 => Self::AccelerationStructure,
            _ => Self::Invalid,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Comparison {
    Off = 0,
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl Comparison {
    pub fn from_source_name(name: &str) -> Self {
        match name {
            "Never" => Self::Never,
            "Less" => Self::Less,
            "Equal" => Self::Equal,
            "LEqual" => Self::LessEqual,
            "Greater" => Self::Greater,
            "NotEqual" => Self::NotEqual,
            "GEqual" => Self::GreaterEqual,
            "Always" => Self::Always,
            _ => Self::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlendFactor {
    None = 0,
    One,
    Zero,
    SrcColor,
    SrcAlpha,
    DstColor,
    DstAlpha,
    OneMinusSrcColor,
    OneMinusSrcAlpha,
    OneMinusDstColor,
    OneMinusDstAlpha,
    ConstColor,
    OneMinusConstColor,
    ConstAlpha,
    OneMinusConstAlpha,
}

impl BlendFactor {
    pub fn from_source_name(name: &str) -> Self {
        match name {
            "One" => Self::One,
            "Zero" => Self::Zero,
            "SrcColor" => Self::SrcColor,
            "SrcAlpha" => Self::SrcAlpha,
            "DstColor" => Self::DstColor,
            "DstAlpha" => Self::DstAlpha,
            "OneMinusSrcColor" => Self::OneMinusSrcColor,
            "OneMinusSrcAlpha" => Self::OneMinusSrcAlpha,
            "OneMinusDstColor" => Self::OneMinusDstColor,
            "OneMinusDstAlpha" => Self::OneMinusDstAlpha,
            "ConstColor" => Self::ConstColor,
            "OneMinusConstColor" => Self::OneMinusConstColor,
            "ConstAlpha" => Self::ConstAlpha,
            "OneMinusConstAlpha" => Self::OneMinusConstAlpha,
            _ => Self::None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlendOp {
    None = 0,
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn from_source_name(name: &str) -> Self {
        match name {
            "Add" => Self::Add,
            "Subtract" => Self::Subtract,
            "ReverseSubtract" => Self::ReverseSubtract,
            "Min" => Self::Min,
            "Max" => Self::Max,
            _ => Self::None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CullMode {
    Off = 0,
    Front,
    Back,
}

impl CullMode {
    pub fn from_source_name(name: &str) -> Self {
        match name {
            "Front" => Self::Front,
            "Back" => Self::Back,
            _ => Self::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RasterMode {
    Default = 0,
    OverEstimate,
    UnderEstimate,
}

impl RasterMode {
    pub fn from_source_name(name: &str) -> Self {
        match name {
            "OverEstimate" => Self::OverEstimate,
            "UnderEstimate" => Self::UnderEstimate,
            _ => Self::Default,
        }
    }
}

/// Parses a color mask like `RGBA`, `RG` or `A` into a 4-bit channel mask.
/// An empty value means all channels.
pub fn color_mask_from_source(value: &str) -> u8 {
    if value.is_empty() {
        return 0xF;
    }

    let mut mask = 0u8;

    for c in value.chars() {
        match c {
            'R' => mask |= 1 << 0,
            'G' => mask |= 1 << 1,
            'B' => mask |= 1 << 2,
            'A' => mask |= 1 << 3,
            _ => (),
        }
    }

    mask
}

/// Fixed-function pipeline state parsed from `#ZWrite`-family directives.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct FixedFunctionState {
    pub ztest: u8,
    pub zwrite: u8,
    pub cull: u8,
    pub color_mask: u8,
    pub blend_op_color: u8,
    pub blend_op_alpha: u8,
    pub blend_src_factor_color: u8,
    pub blend_dst_factor_color: u8,
    pub blend_src_factor_alpha: u8,
    pub blend_dst_factor_alpha: u8,
    pub raster_mode: u8,
    pub over_estimation: u8,
    pub z_offsets: [f32; 3],
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        // Permissive defaults: depth writes on, less-equal test, no blending,
        // all channels, no culling.
        Self {
            ztest: Comparison::LessEqual as u8,
            zwrite: 1,
            cull: CullMode::Off as u8,
            color_mask: 0xF,
            blend_op_color: BlendOp::None as u8,
            blend_op_alpha: BlendOp::None as u8,
            blend_src_factor_color: BlendFactor::None as u8,
            blend_dst_factor_color: BlendFactor::None as u8,
            blend_src_factor_alpha: BlendFactor::None as u8,
            blend_dst_factor_alpha: BlendFactor::None as u8,
            raster_mode: RasterMode::Default as u8,
            over_estimation: 0,
            z_offsets: [0.0; 3],
        }
    }
}

/// One keyword of a `#multi_compile` directive.
///
/// `offsets` encodes `(directive << 28) | (local_index << 24) | stride` where
/// the stride is the product of all previous directive sizes.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ShaderKeyword {
    pub name: [u8; NAME_MAX_LENGTH],
    pub offsets: u32,
}

impl ShaderKeyword {
    pub fn encode_offsets(directive: u32, local_index: u32, stride: u32) -> u32 {
        (directive << 28) | ((local_index & 0xF) << 24) | (stride & 0x00FF_FFFF)
    }
}

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct MaterialProperty {
    pub name: [u8; NAME_MAX_LENGTH],
    pub element_type: u16,
}

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct VertexInputAttribute {
    pub name: [u8; NAME_MAX_LENGTH],
    pub location: u16,
    pub element_type: u16,
}

/// A merged push-constant variable with the stages that reference it.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ConstantVariable {
    pub name: [u8; NAME_MAX_LENGTH],
    pub offset: u16,
    pub size: u16,
    pub stage_flags: u32,
}

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Descriptor {
    pub count: u32,
    pub write_stage_mask: u32,
    pub kind: u16,
    pub _reserved: u16,
    pub name: [u8; NAME_MAX_LENGTH],
}

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct DescriptorSet {
    pub stage_flags: u32,
    pub descriptor_count: u32,
    pub descriptors: RelPtr<Descriptor>,
}

/// One compiled shader variant: SPIR-V per populated stage plus reflection
/// tables shared across the stages.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ShaderVariant {
    pub group_size: [u32; 3],
    pub vertex_attribute_count: u32,
    pub constant_variable_count: u32,
    pub descriptor_set_count: u32,
    pub spirv_sizes: [u32; MAX_STAGES],
    pub spirv_buffers: [RelPtr<u8>; MAX_STAGES],
    pub vertex_attributes: RelPtr<VertexInputAttribute>,
    pub constant_variables: RelPtr<ConstantVariable>,
    pub descriptor_sets: RelPtr<DescriptorSet>,
}

/// Root record of a `.pkshader` file.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ShaderBlob {
    pub attributes: FixedFunctionState,
    pub keyword_count: u32,
    pub material_property_count: u32,
    pub variant_count: u32,
    pub keywords: RelPtr<ShaderKeyword>,
    pub material_properties: RelPtr<MaterialProperty>,
    pub variants: RelPtr<ShaderVariant>,
}

#[cfg(test)]
mod tests {
    use super::{
        color_mask_from_source, FixedFunctionState, ShaderKeyword, ShaderStage, StageFlags,
    };

    #[test]
    fn stage_names_roundtrip() {
        for stage in ShaderStage::ALL {
            assert_eq!(ShaderStage::from_source_name(stage.source_name()), Some(stage));
        }
        assert_eq!(ShaderStage::from_source_name("PIXEL"), None);
    }

    #[test]
    fn stage_flags_are_one_bit_per_slot() {
        assert_eq!(ShaderStage::Fragment.flag(), StageFlags::FRAGMENT);
        assert_eq!(ShaderStage::RayIntersection.flag().bits(), 1 << 12);
    }

    #[test]
    fn keyword_offset_encoding() {
        // Second directive, local index 1, one earlier directive of size 2.
        let encoded = ShaderKeyword::encode_offsets(1, 1, 2);
        assert_eq!(encoded >> 28, 1);
        assert_eq!((encoded >> 24) & 0xF, 1);
        assert_eq!(encoded & 0x00FF_FFFF, 2);
    }

    #[test]
    fn color_mask_letters() {
        assert_eq!(color_mask_from_source(""), 0xF);
        assert_eq!(color_mask_from_source("RGBA"), 0xF);
        assert_eq!(color_mask_from_source("RG"), 0b0011);
        assert_eq!(color_mask_from_source("A"), 0b1000);
    }

    #[test]
    fn default_state_is_permissive() {
        let state = FixedFunctionState::default();
        assert_eq!(state.zwrite, 1);
        assert_eq!(state.color_mask, 0xF);
        assert_eq!(state.cull, 0);
    }
}
