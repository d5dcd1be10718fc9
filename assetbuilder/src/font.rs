//! TrueType to `.pkfont` adapter: per-glyph MTSDF bitmaps packed into a
//! square RGBA8 atlas plus em-space glyph metrics.

use std::io;
use std::mem::offset_of;
use std::path::Path;

use msdfgen::{Bitmap, FontExt, Range, Rgba};
use thiserror::Error;
use ttf_parser::Face;

use asset_format::buffer::AssetBuffer;
use asset_format::font::{FontBlob, FontCharacter, FONT_MSDF_UNIT};
use asset_format::freshness;
use asset_format::writer::{persist, WriteStatus};
use asset_format::AssetType;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to parse font: {0}")]
    Font(String),
    #[error(transparent)]
    Persist(#[from] asset_format::writer::Error),
}

/// Glyphs are loaded at this em size; metrics are stored back in em units.
const LOAD_EM_SIZE: f64 = 16.0;
const MAX_CORNER_ANGLE: f64 = 3.0;

struct RenderedGlyph {
    unicode: u16,
    advance: f32,
    rect: [f32; 4],
    width: u32,
    height: u32,
    /// RGBA8 texels, row-major, `width * height * 4` bytes.
    pixels: Vec<u8>,
}

fn render_glyph(face: &Face<'_>, code: char, scale: f64) -> Option<RenderedGlyph> {
    let glyph = face.glyph_index(code)?;
    let upem = f64::from(face.units_per_em());
    let advance = f64::from(face.glyph_hor_advance(glyph).unwrap_or(0)) / upem;

    let Some(mut shape) = face.glyph_shape(glyph) else {
        // No outline: whitespace or an empty glyph, metrics only.
        return Some(RenderedGlyph {
            unicode: code as u16,
            advance: advance as f32,
            rect: [0.0; 4],
            width: 0,
            height: 0,
            pixels: Vec::new(),
        });
    };

    let bound = shape.get_bound();
    let padding = FONT_MSDF_UNIT;

    // Glyph cell in atlas pixels, padded by the distance-field range.
    let glyph_width = (bound.right - bound.left) / upem * scale;
    let glyph_height = (bound.top - bound.bottom) / upem * scale;
    let width = (glyph_width.ceil() + padding * 2.0).max(1.0) as u32;
    let height = (glyph_height.ceil() + padding * 2.0).max(1.0) as u32;

    shape.edge_coloring_simple(MAX_CORNER_ANGLE, 0);

    let mut bitmap: Bitmap<Rgba<f32>> = Bitmap::new(width, height);
    let framing = bound
        .autoframe(width, height, Range::Px(FONT_MSDF_UNIT), None)?;

    shape.generate_mtsdf(
        &mut bitmap,
        &framing,
        msdfgen::MsdfGeneratorConfig::default(),
    );

    let mut pixels = Vec::with_capacity((width * height * 4) as usize);

    for texel in bitmap.pixels() {
        for channel in [texel.r, texel.g, texel.b, texel.a] {
            pixels.push((channel.clamp(0.0, 1.0) * 255.0) as u8);
        }
    }

    Some(RenderedGlyph {
        unicode: code as u16,
        advance: advance as f32,
        rect: [
            (bound.left / upem) as f32,
            (bound.bottom / upem) as f32,
            ((bound.right - bound.left) / upem) as f32,
            ((bound.top - bound.bottom) / upem) as f32,
        ],
        width,
        height,
        pixels,
    })
}

/// Shelf-packs the glyph cells into a square atlas. Returns per-glyph
/// `(x, y)` plus the atlas dimension.
fn pack_square(glyphs: &[RenderedGlyph]) -> (Vec<(u32, u32)>, u32) {
    let total_area: u64 = glyphs
        .iter()
        .map(|glyph| u64::from(glyph.width) * u64::from(glyph.height))
        .sum();

    let mut dimension = (total_area as f64).sqrt().ceil() as u32;
    dimension = dimension.next_power_of_two().max(64);

    loop {
        let mut placements = Vec::with_capacity(glyphs.len());
        let mut cursor_x = 0u32;
        let mut cursor_y = 0u32;
        let mut shelf_height = 0u32;
        let mut fits = true;

        for glyph in glyphs {
            if cursor_x + glyph.width > dimension {
                cursor_y += shelf_height;
                cursor_x = 0;
                shelf_height = 0;
            }

            if cursor_y + glyph.height > dimension {
                fits = false;
                break;
            }

            placements.push((cursor_x, cursor_y));
            cursor_x += glyph.width;
            shelf_height = shelf_height.max(glyph.height);
        }

        if fits {
            return (placements, dimension);
        }

        dimension *= 2;
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn write_font(src: &Path, dst: &Path) -> Result<WriteStatus, Error> {
    if !freshness::is_file_out_of_date(src, dst) {
        return Ok(WriteStatus::UpToDate);
    }

    let filename = file_stem(src);
    tracing::info!(font = %filename, "preprocessing font");

    let data = std::fs::read(src)?;
    let face = Face::parse(&data, 0).map_err(|err| Error::Font(err.to_string()))?;

    // The ASCII charset, rendered at the load em size.
    let glyphs: Vec<RenderedGlyph> = (0x20u8..0x7F)
        .filter_map(|code| render_glyph(&face, code as char, LOAD_EM_SIZE))
        .collect();

    let (placements, dimension) = pack_square(&glyphs);

    let mut atlas = vec![0u8; (dimension * dimension * 4) as usize];
    let mut characters = Vec::with_capacity(glyphs.len());

    for (glyph, &(x, y)) in glyphs.iter().zip(&placements) {
        for row in 0..glyph.height {
            let src_base = (row * glyph.width * 4) as usize;
            let dst_base = (((y + row) * dimension + x) * 4) as usize;
            atlas[dst_base..dst_base + (glyph.width * 4) as usize]
                .copy_from_slice(&glyph.pixels[src_base..src_base + (glyph.width * 4) as usize]);
        }

        characters.push(FontCharacter {
            unicode: glyph.unicode,
            is_whitespace: u16::from(glyph.pixels.is_empty()),
            advance: glyph.advance,
            rect: glyph.rect,
            texrect: [x as u16, y as u16, glyph.width as u16, glyph.height as u16],
        });
    }

    tracing::debug!(
        glyphs = characters.len(),
        atlas = dimension,
        "generated font atlas"
    );

    let mut buffer = AssetBuffer::new(AssetType::Font, &filename);
    let font = buffer.alloc::<FontBlob>(1);

    buffer.update(font, |record| {
        record.character_count = characters.len() as u32;
        record.atlas_width = dimension;
        record.atlas_height = dimension;
        record.atlas_data_size = atlas.len() as u32;
    });

    let characters_ptr = buffer.write_slice(&characters);
    buffer.link(font, offset_of!(FontBlob, characters), characters_ptr);

    let atlas_ptr = buffer.write_slice(&atlas);
    buffer.link(font, offset_of!(FontBlob, atlas_data), atlas_ptr);

    persist(dst, &mut buffer, false)?;

    Ok(WriteStatus::Written)
}

#[cfg(test)]
mod tests {
    use super::{pack_square, RenderedGlyph};

    fn glyph(width: u32, height: u32) -> RenderedGlyph {
        RenderedGlyph {
            unicode: 0,
            advance: 0.0,
            rect: [0.0; 4],
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    #[test]
    fn packing_stays_inside_the_square() {
        let glyphs: Vec<RenderedGlyph> = (0..95).map(|_| glyph(24, 24)).collect();
        let (placements, dimension) = pack_square(&glyphs);

        assert_eq!(placements.len(), glyphs.len());

        for (glyph, (x, y)) in glyphs.iter().zip(&placements) {
            assert!(x + glyph.width <= dimension);
            assert!(y + glyph.height <= dimension);
        }
    }
}
