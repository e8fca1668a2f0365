//! Quantized rotation and range decoding.
//!
//! Both quaternion encodings drop the largest component, store the other
//! three in `[-1/sqrt(2), 1/sqrt(2)]` and recover the dropped one from the
//! unit-length constraint. Results are renormalized so rounding in the
//! stored components never yields a non-unit rotation.

use crate::util::{normalize_or_identity, Quat};

const INV_SQRT2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Decode a flat-clip rotation from three 16-bit words.
///
/// The top bits of the first two words select the dropped component
/// (0 = x .. 3 = w). The remaining bits hold the other three components
/// in order: 15, 15 and 16 bits.
pub fn decode_pose_quaternion(words: [u16; 3]) -> Quat {
    let selector = (((words[0] >> 15) << 1) | (words[1] >> 15)) as usize;

    let a = dequantize_unit(words[0] & 0x7FFF, 0x7FFF);
    let b = dequantize_unit(words[1] & 0x7FFF, 0x7FFF);
    let c = dequantize_unit(words[2], 0xFFFF);
    let dropped = (1.0 - a * a - b * b - c * c).max(0.0).sqrt();

    let mut comps = [0.0f32; 4];
    let mut stored = [a, b, c].into_iter();
    for (i, slot) in comps.iter_mut().enumerate() {
        *slot = if i == selector { dropped } else { stored.next().unwrap_or(0.0) };
    }

    normalize_or_identity(Quat::from_array(comps))
}

#[inline]
fn dequantize_unit(v: u16, max: u16) -> f32 {
    -INV_SQRT2 + (v as f32 / max as f32) * (2.0 * INV_SQRT2)
}

/// Decode a 6-byte legacy segment quaternion.
///
/// Each little-endian word holds a 14-bit magnitude, a bias bit (bit 14)
/// and a flag bit (bit 15). The flags of the first two words rotate the
/// component order; the third flag negates the recovered component.
pub fn decode_segment_quaternion(bytes: [u8; 6]) -> Quat {
    const SCALE: f32 = INV_SQRT2 / 16384.0;

    let component = |lo: u8, hi: u8| {
        let raw = lo as i32 + (((hi & 0x3F) as i32) << 8);
        let biased = if hi & 0x40 == 0 { raw - 16384 } else { raw };
        biased as f32 * SCALE
    };

    let x = component(bytes[0], bytes[1]);
    let y = component(bytes[2], bytes[3]);
    let z = component(bytes[4], bytes[5]);
    let mut w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
    if bytes[5] & 0x80 != 0 {
        w = -w;
    }

    let s1 = bytes[1] & 0x80 != 0;
    let s2 = bytes[3] & 0x80 != 0;
    let q = match (s1, s2) {
        (true, true) => Quat::from_xyzw(y, z, w, x),
        (true, false) => Quat::from_xyzw(z, w, x, y),
        (false, true) => Quat::from_xyzw(w, x, y, z),
        (false, false) => Quat::from_xyzw(x, y, z, w),
    };
    normalize_or_identity(q)
}

/// Map a 16-bit value linearly onto `[start, start + length]`.
#[inline]
pub fn dequantize_range(v: u16, start: f32, length: f32) -> f32 {
    start + (v as f32 / 65535.0) * length
}
