//! Persisted font records: glyph metrics plus the MTSDF atlas image.

use bytemuck::{Pod, Zeroable};

use crate::buffer::RelPtr;

/// MSDF distance-field range in atlas pixels.
pub const FONT_MSDF_UNIT: f64 = 4.0;

#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct FontCharacter {
    pub unicode: u16,
    pub is_whitespace: u16,
    /// Horizontal advance in em units.
    pub advance: f32,
    /// Glyph quad in em units: x, y, width, height.
    pub rect: [f32; 4],
    /// Atlas region in pixels: x, y, width, height.
    pub texrect: [u16; 4],
}

/// Root record of a `.pkfont` file.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct FontBlob {
    pub character_count: u32,
    pub atlas_width: u32,
    pub atlas_height: u32,
    pub atlas_data_size: u32,
    pub characters: RelPtr<FontCharacter>,
    /// RGBA8 atlas pixels, four channels per texel.
    pub atlas_data: RelPtr<u8>,
}
