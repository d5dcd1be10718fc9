//! Quantisation helpers shared by the vertex and meshlet packers.

use glam::{Vec2, Vec3};
use half::f16;

/// Half-float conversion via the bit-manipulation fast path, clamped to
/// ±65536.
///
/// Scaling by 2^-112 rebiases the exponent from f32 to f16; the mantissa is
/// shifted out with truncation, not round-to-nearest, so the bits differ
/// from a rounding conversion. Readers depend on the exact pattern.
pub fn pack_half(value: f32) -> u16 {
    let scaled = value.clamp(-65536.0, 65536.0) * 1.925930e-34;
    let bits = scaled.to_bits();
    let sign = ((bits as i32 >> 16) & 0xFFFF_8000u32 as i32) as u32;
    (sign | (bits >> 13)) as u16
}

pub fn unpack_half(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

pub fn pack_unorm8(value: f32) -> u8 {
    ((value * 255.0).round() as i32).clamp(0, 255) as u8
}

pub fn pack_unorm12(value: f32) -> u32 {
    ((value * 4095.0).round() as i32).clamp(0, 4095) as u32
}

/// Octahedral projection of a unit vector into the unit square, folding the
/// lower hemisphere into the corners.
pub fn octa_encode(n: Vec3) -> Vec2 {
    let scale = n.x.abs() + n.y.abs() + n.z.abs();
    let t = n / scale;

    let uv = if t.y >= 0.0 {
        Vec2::new(t.x, t.z)
    } else {
        Vec2::new(
            (1.0 - t.z.abs()) * t.x.signum(),
            (1.0 - t.x.abs()) * t.z.signum(),
        )
    };

    uv * 0.5 + Vec2::splat(0.5)
}

/// Axis-aligned bounds of the vertices referenced by `indices`, as center and
/// extents. Positions sit at the front of each `stride_f32` sized vertex.
pub fn calculate_bounds(
    vertices: &[f32],
    stride_f32: usize,
    indices: &[u32],
) -> (Vec3, Vec3) {
    let mut bbmin = Vec3::MAX;
    let mut bbmax = Vec3::MIN;

    for &index in indices {
        let base = index as usize * stride_f32;
        let position = Vec3::from_slice(&vertices[base..base + 3]);
        bbmin = bbmin.min(position);
        bbmax = bbmax.max(position);
    }

    ((bbmin + bbmax) * 0.5, (bbmax - bbmin) * 0.5)
}

pub fn max_extent(extents: Vec3) -> f32 {
    extents.x.max(extents.y).max(extents.z)
}

/// Number of distinct vertices referenced by `indices`, via a bitset.
pub fn unique_vertex_count(indices: &[u32], vertex_count: usize) -> usize {
    let mut filter = vec![0u8; (vertex_count + 7) / 8];
    let mut unique = 0;

    for &index in indices {
        let index = index as usize;
        debug_assert!(index < vertex_count);

        if filter[index / 8] & (1 << (index % 8)) == 0 {
            unique += 1;
        }

        filter[index / 8] |= 1 << (index % 8);
    }

    unique
}

fn quantize_in_place(
    vertices: &mut [f32],
    stride_f32: usize,
    components: usize,
    min_delta: f32,
) {
    let vertex_count = vertices.len() / stride_f32;
    let mut unique: hashbrown::HashMap<[i64; 3], usize> =
        hashbrown::HashMap::with_capacity(vertex_count);

    for i in 0..vertex_count {
        let base = i * stride_f32;

        let mut key = [0i64; 3];
        for (c, slot) in key.iter_mut().enumerate().take(components) {
            *slot = (vertices[base + c] / min_delta) as i64;
        }

        match unique.entry(key) {
            hashbrown::hash_map::Entry::Occupied(entry) => {
                // Snap to the representative's original value, not the grid.
                let rep = *entry.get() * stride_f32;
                for c in 0..components {
                    vertices[base + c] = vertices[rep + c];
                }
            }
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(i);
            }
        }
    }
}

/// Snaps 3-component attributes onto a `min_delta` grid, collapsing
/// duplicates back to the first representative's exact values.
pub fn quantize_float3(vertices: &mut [f32], stride_f32: usize, min_delta: f32) {
    quantize_in_place(vertices, stride_f32, 3, min_delta);
}

pub fn quantize_float2(vertices: &mut [f32], stride_f32: usize, min_delta: f32) {
    quantize_in_place(vertices, stride_f32, 2, min_delta);
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3};

    use super::{
        calculate_bounds, octa_encode, pack_half, pack_unorm12, pack_unorm8, quantize_float3,
        unique_vertex_count, unpack_half,
    };

    #[test]
    fn half_clamps_to_legacy_range() {
        assert_eq!(unpack_half(pack_half(1.0)), 1.0);
        assert_eq!(unpack_half(pack_half(-2.5)), -2.5);
        assert!(unpack_half(pack_half(1e30)).is_infinite());
        assert!(unpack_half(pack_half(-1e30)).is_infinite());
    }

    #[test]
    fn half_packing_truncates_the_mantissa() {
        // 1.0 plus 13 low mantissa bits: a rounding conversion yields 0x3C01,
        // the truncating fast path drops the tail and yields exactly 1.0.
        let value = f32::from_bits(0x3F80_1FFF);
        assert_eq!(pack_half(value), 0x3C00);
        assert_eq!(half::f16::from_f32(value).to_bits(), 0x3C01);

        // Same at the negative side, sign carried through the high bit.
        assert_eq!(pack_half(-value), 0xBC00);
    }

    #[test]
    fn unorm_saturates() {
        assert_eq!(pack_unorm8(-0.5), 0);
        assert_eq!(pack_unorm8(0.5), 128);
        assert_eq!(pack_unorm8(2.0), 255);
        assert_eq!(pack_unorm12(1.5), 4095);
        assert_eq!(pack_unorm12(0.0), 0);
    }

    #[test]
    fn octa_encode_poles() {
        let up = octa_encode(Vec3::Y);
        assert!((up - Vec2::splat(0.5)).length() < 1e-6);

        // Lower hemisphere folds to the square's border region.
        let down = octa_encode(-Vec3::Y);
        assert!(down.x.abs() <= 1.0 && down.y.abs() <= 1.0);
        assert!((down.x - 1.0).abs() < 1e-6 || (down.y - 1.0).abs() < 1e-6 || down.x.abs() < 1e-6);
    }

    #[test]
    fn bounds_of_unit_triangle() {
        let vertices = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let (center, extents) = calculate_bounds(&vertices, 3, &[0, 1, 2]);
        assert_eq!(center, Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(extents, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn unique_count_ignores_repeats() {
        assert_eq!(unique_vertex_count(&[0, 1, 2, 2, 1, 0], 3), 3);
        assert_eq!(unique_vertex_count(&[5], 6), 1);
        assert_eq!(unique_vertex_count(&[], 4), 0);
    }

    #[test]
    fn quantize_collapses_to_representative() {
        let mut vertices = [
            0.1000, 0.0, 0.0, //
            0.1004, 0.0, 0.0, //
            0.9, 0.0, 0.0,
        ];
        quantize_float3(&mut vertices, 3, 0.01);
        assert_eq!(vertices[3], 0.1000);
        assert_eq!(vertices[6], 0.9);
    }
}
