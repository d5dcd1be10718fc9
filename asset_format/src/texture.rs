//! Persisted texture records: sampler defaults, format tag and the raw KTX2
//! level data.

use bytemuck::{Pod, Zeroable};

use crate::buffer::RelPtr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum TextureType {
    Texture2D = 0,
    Texture2DArray,
    Texture3D,
    Cubemap,
    CubemapArray,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterMode {
    Point = 0,
    Bilinear,
    Trilinear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WrapMode {
    Clamp = 0,
    Repeat,
    Mirror,
    Border,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BorderColor {
    FloatClear = 0,
    FloatBlack,
    FloatWhite,
    IntClear,
    IntBlack,
    IntWhite,
}

/// Internal texture format tags, a stable subset of the Vulkan format space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum TextureFormat {
    Invalid = 0,
    R8,
    R8Snorm,
    R8Ui,
    R8I,
    Stencil8,
    R16F,
    R16Ui,
    R16I,
    Rg8,
    Rg8Snorm,
    Rg8Ui,
    Rg8I,
    Rgb565,
    Rgb5A1,
    Rgba4,
    Depth16,
    Rgb8,
    Rgb8Srgb,
    Rgb8Snorm,
    Rgb8Ui,
    Rgb8I,
    R32F,
    R32Ui,
    R32I,
    Rg16F,
    Rg16Ui,
    Rg16I,
    B10G11R11Uf,
    Rgb9E5,
    Rgba8,
    Rgba8Srgb,
    Rgba8Snorm,
    Bgra8,
    Bgra8Srgb,
    Rgb10A2,
    Rgba8Ui,
    Rgba8I,
    Depth32F,
    Depth24Stencil8,
    Depth32FStencil8,
    Rgb16F,
    Rgb16Ui,
    Rgb16I,
    Rg32F,
    Rg32Ui,
    Rg32I,
    Rgba16,
    Rgba16F,
    Rgba16Ui,
    Rgba16I,
    Rgb32F,
    Rgb32Ui,
    Rgb32I,
    Rgba32F,
    Rgba32Ui,
    Rgba32I,
    Rgba64Ui,
    Bc1Rgb,
    Bc1Srgb,
    Bc1Rgba,
    Bc1Srgba,
    Bc2Rgba,
    Bc2Srgba,
    Bc3Rgba,
    Bc3Srgba,
    Bc4,
    Bc6HRgbUf,
    Bc6HRgbF,
    Bc7Unorm,
}

/// Root record of a `.pktexture` file.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct TextureBlob {
    pub resolution: [u16; 3],
    pub layers: u16,
    pub levels: u16,
    pub format: u16,
    pub texture_type: u16,
    pub filter_min: u8,
    pub filter_mag: u8,
    pub wrap: [u8; 3],
    pub border_color: u8,
    pub anisotropy: f32,
    pub data_size: u32,
    /// Tightly packed level data, exactly as stored in the source KTX2.
    pub data: RelPtr<u8>,
    /// One byte offset into `data` per mip level.
    pub level_offsets: RelPtr<u32>,
}
