//! KTX2 to `.pktexture` adapter: level offsets and pixel data are copied
//! verbatim, the Vulkan format code maps to the internal format tag.

use std::io;
use std::mem::offset_of;
use std::path::Path;

use thiserror::Error;

use asset_format::buffer::AssetBuffer;
use asset_format::freshness;
use asset_format::texture::{
    BorderColor, FilterMode, TextureBlob, TextureFormat, TextureType, WrapMode,
};
use asset_format::writer::{persist, WriteStatus};
use asset_format::AssetType;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to parse ktx2: {0}")]
    Ktx2(String),
    #[error(transparent)]
    Persist(#[from] asset_format::writer::Error),
}

const FORMAT_MAP: &[(ktx2::Format, TextureFormat)] = &[
    (ktx2::Format::R8_UNORM, TextureFormat::R8),
    (ktx2::Format::R8_SNORM, TextureFormat::R8Snorm),
    (ktx2::Format::R8_UINT, TextureFormat::R8Ui),
    (ktx2::Format::R8_SINT, TextureFormat::R8I),
    (ktx2::Format::S8_UINT, TextureFormat::Stencil8),
    (ktx2::Format::R16_SFLOAT, TextureFormat::R16F),
    (ktx2::Format::R16_UINT, TextureFormat::R16Ui),
    (ktx2::Format::R16_SINT, TextureFormat::R16I),
    (ktx2::Format::R8G8_UNORM, TextureFormat::Rg8),
    (ktx2::Format::R8G8_SNORM, TextureFormat::Rg8Snorm),
    (ktx2::Format::R8G8_UINT, TextureFormat::Rg8Ui),
    (ktx2::Format::R8G8_SINT, TextureFormat::Rg8I),
    (ktx2::Format::R5G6B5_UNORM_PACK16, TextureFormat::Rgb565),
    (ktx2::Format::R5G5B5A1_UNORM_PACK16, TextureFormat::Rgb5A1),
    (ktx2::Format::R4G4B4A4_UNORM_PACK16, TextureFormat::Rgba4),
    (ktx2::Format::D16_UNORM, TextureFormat::Depth16),
    (ktx2::Format::R8G8B8_UNORM, TextureFormat::Rgb8),
    (ktx2::Format::R8G8B8_SRGB, TextureFormat::Rgb8Srgb),
    (ktx2::Format::R8G8B8_SNORM, TextureFormat::Rgb8Snorm),
    (ktx2::Format::R8G8B8_UINT, TextureFormat::Rgb8Ui),
    (ktx2::Format::R8G8B8_SINT, TextureFormat::Rgb8I),
    (ktx2::Format::R32_SFLOAT, TextureFormat::R32F),
    (ktx2::Format::R32_UINT, TextureFormat::R32Ui),
    (ktx2::Format::R32_SINT, TextureFormat::R32I),
    (ktx2::Format::R16G16_SFLOAT, TextureFormat::Rg16F),
    (ktx2::Format::R16G16_UINT, TextureFormat::Rg16Ui),
    (ktx2::Format::R16G16_SINT, TextureFormat::Rg16I),
    (ktx2::Format::B10G11R11_UFLOAT_PACK32, TextureFormat::B10G11R11Uf),
    (ktx2::Format::E5B9G9R9_UFLOAT_PACK32, TextureFormat::Rgb9E5),
    (ktx2::Format::R8G8B8A8_UNORM, TextureFormat::Rgba8),
    (ktx2::Format::R8G8B8A8_SRGB, TextureFormat::Rgba8Srgb),
    (ktx2::Format::R8G8B8A8_SNORM, TextureFormat::Rgba8Snorm),
    (ktx2::Format::B8G8R8A8_UNORM, TextureFormat::Bgra8),
    (ktx2::Format::B8G8R8A8_SRGB, TextureFormat::Bgra8Srgb),
    (ktx2::Format::A2B10G10R10_UNORM_PACK32, TextureFormat::Rgb10A2),
    (ktx2::Format::R8G8B8A8_UINT, TextureFormat::Rgba8Ui),
    (ktx2::Format::R8G8B8A8_SINT, TextureFormat::Rgba8I),
    (ktx2::Format::D32_SFLOAT, TextureFormat::Depth32F),
    (ktx2::Format::D24_UNORM_S8_UINT, TextureFormat::Depth24Stencil8),
    (ktx2::Format::D32_SFLOAT_S8_UINT, TextureFormat::Depth32FStencil8),
    (ktx2::Format::R16G16B16_SFLOAT, TextureFormat::Rgb16F),
    (ktx2::Format::R16G16B16_UINT, TextureFormat::Rgb16Ui),
    (ktx2::Format::R16G16B16_SINT, TextureFormat::Rgb16I),
    (ktx2::Format::R32G32_SFLOAT, TextureFormat::Rg32F),
    (ktx2::Format::R32G32_UINT, TextureFormat::Rg32Ui),
    (ktx2::Format::R32G32_SINT, TextureFormat::Rg32I),
    (ktx2::Format::R16G16B16A16_UNORM, TextureFormat::Rgba16),
    (ktx2::Format::R16G16B16A16_SFLOAT, TextureFormat::Rgba16F),
    (ktx2::Format::R16G16B16A16_UINT, TextureFormat::Rgba16Ui),
    (ktx2::Format::R16G16B16A16_SINT, TextureFormat::Rgba16I),
    (ktx2::Format::R32G32B32_SFLOAT, TextureFormat::Rgb32F),
    (ktx2::Format::R32G32B32_UINT, TextureFormat::Rgb32Ui),
    (ktx2::Format::R32G32B32_SINT, TextureFormat::Rgb32I),
    (ktx2::Format::R32G32B32A32_SFLOAT, TextureFormat::Rgba32F),
    (ktx2::Format::R32G32B32A32_UINT, TextureFormat::Rgba32Ui),
    (ktx2::Format::R32G32B32A32_SINT, TextureFormat::Rgba32I),
    (ktx2::Format::R64G64B64A64_UINT, TextureFormat::Rgba64Ui),
    (ktx2::Format::BC1_RGB_UNORM_BLOCK, TextureFormat::Bc1Rgb),
    (ktx2::Format::BC1_RGB_SRGB_BLOCK, TextureFormat::Bc1Srgb),
    (ktx2::Format::BC1_RGBA_UNORM_BLOCK, TextureFormat::Bc1Rgba),
    (ktx2::Format::BC1_RGBA_SRGB_BLOCK, TextureFormat::Bc1Srgba),
    (ktx2::Format::BC2_UNORM_BLOCK, TextureFormat::Bc2Rgba),
    (ktx2::Format::BC2_SRGB_BLOCK, TextureFormat::Bc2Srgba),
    (ktx2::Format::BC3_UNORM_BLOCK, TextureFormat::Bc3Rgba),
    (ktx2::Format::BC3_SRGB_BLOCK, TextureFormat::Bc3Srgba),
    (ktx2::Format::BC4_UNORM_BLOCK, TextureFormat::Bc4),
    (ktx2::Format::BC6H_UFLOAT_BLOCK, TextureFormat::Bc6HRgbUf),
    (ktx2::Format::BC6H_SFLOAT_BLOCK, TextureFormat::Bc6HRgbF),
    (ktx2::Format::BC7_UNORM_BLOCK, TextureFormat::Bc7Unorm),
];

fn texture_format(format: Option<ktx2::Format>) -> TextureFormat {
    let Some(format) = format else {
        return TextureFormat::Invalid;
    };

    FORMAT_MAP
        .iter()
        .find(|(vk, _)| *vk == format)
        .map_or(TextureFormat::Invalid, |(_, tag)| *tag)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn write_texture(src: &Path, dst: &Path) -> Result<WriteStatus, Error> {
    if !freshness::is_file_out_of_date(src, dst) {
        return Ok(WriteStatus::UpToDate);
    }

    let filename = file_stem(src);
    tracing::info!(texture = %filename, "preprocessing texture");

    let bytes = std::fs::read(src)?;
    let reader = ktx2::Reader::new(&bytes).map_err(|err| Error::Ktx2(format!("{err:?}")))?;
    let header = reader.header();

    let is_cubemap = header.face_count == 6;
    let is_array = header.layer_count > 1;
    let texture_type = if is_cubemap && is_array {
        TextureType::CubemapArray
    } else if is_cubemap {
        TextureType::Cubemap
    } else if is_array {
        TextureType::Texture2DArray
    } else if header.pixel_depth > 1 {
        TextureType::Texture3D
    } else {
        TextureType::Texture2D
    };

    // Levels are stored tightly packed; record one byte offset per level.
    let mut level_offsets = Vec::with_capacity(header.level_count as usize);
    let mut data = Vec::new();

    for level in reader.levels() {
        level_offsets.push(data.len() as u32);
        data.extend_from_slice(level);
    }

    let filter = if header.level_count > 1 {
        FilterMode::Trilinear
    } else {
        FilterMode::Bilinear
    };

    let mut buffer = AssetBuffer::new(AssetType::Texture, &filename);
    let texture = buffer.alloc::<TextureBlob>(1);

    buffer.update(texture, |record| {
        record.resolution = [
            header.pixel_width as u16,
            header.pixel_height.max(1) as u16,
            header.pixel_depth.max(1) as u16,
        ];
        record.layers = header.layer_count.max(1) as u16;
        record.levels = header.level_count.max(1) as u16;
        record.format = texture_format(header.format) as u16;
        record.texture_type = texture_type as u16;
        record.filter_min = filter as u8;
        record.filter_mag = filter as u8;
        record.wrap = [WrapMode::Repeat as u8; 3];
        record.border_color = BorderColor::FloatClear as u8;
        record.anisotropy = 16.0;
        record.data_size = data.len() as u32;
    });

    let data_ptr = buffer.write_slice(&data);
    buffer.link(texture, offset_of!(TextureBlob, data), data_ptr);

    let levels_ptr = buffer.write_slice(&level_offsets);
    buffer.link(texture, offset_of!(TextureBlob, level_offsets), levels_ptr);

    persist(dst, &mut buffer, true)?;

    Ok(WriteStatus::Written)
}

#[cfg(test)]
mod tests {
    use asset_format::texture::TextureFormat;

    use super::texture_format;

    #[test]
    fn vulkan_formats_map_to_internal_tags() {
        assert_eq!(
            texture_format(Some(ktx2::Format::R8G8B8A8_UNORM)),
            TextureFormat::Rgba8
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::BC7_UNORM_BLOCK)),
            TextureFormat::Bc7Unorm
        );
        assert_eq!(texture_format(None), TextureFormat::Invalid);
    }

    #[test]
    fn packed_and_integer_rgb_formats_are_mapped() {
        assert_eq!(
            texture_format(Some(ktx2::Format::R5G6B5_UNORM_PACK16)),
            TextureFormat::Rgb565
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::R5G5B5A1_UNORM_PACK16)),
            TextureFormat::Rgb5A1
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::R4G4B4A4_UNORM_PACK16)),
            TextureFormat::Rgba4
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::R8G8B8_UINT)),
            TextureFormat::Rgb8Ui
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::R16G16B16_SINT)),
            TextureFormat::Rgb16I
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::R32G32B32_UINT)),
            TextureFormat::Rgb32Ui
        );
        assert_eq!(
            texture_format(Some(ktx2::Format::R64G64B64A64_UINT)),
            TextureFormat::Rgba64Ui
        );
    }
}
