//! Math type re-exports and small unaligned decode helpers.
//!
//! Decoded transforms use `glam` types. Compressed payloads store floats
//! and half floats at arbitrary byte offsets, so the helpers here read
//! them without alignment requirements.

// Re-export glam types
pub use glam::{Quat, Vec2, Vec3, Vec4};

use half::f16;

/// Read a little-endian `f32` from the first four bytes.
#[inline]
pub fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian half float from the first two bytes.
#[inline]
pub fn read_f16(bytes: &[u8]) -> f32 {
    f16::from_bits(u16::from_le_bytes([bytes[0], bytes[1]])).to_f32()
}

/// Read three consecutive `f32` values (12 bytes).
#[inline]
pub fn read_vec3(bytes: &[u8]) -> Vec3 {
    Vec3::new(read_f32(bytes), read_f32(&bytes[4..]), read_f32(&bytes[8..]))
}

/// Read three consecutive half floats (6 bytes).
#[inline]
pub fn read_half3(bytes: &[u8]) -> Vec3 {
    Vec3::new(read_f16(bytes), read_f16(&bytes[2..]), read_f16(&bytes[4..]))
}

/// Read four consecutive `f32` values (16 bytes) as an `x, y, z, w` quaternion.
#[inline]
pub fn read_quat(bytes: &[u8]) -> Quat {
    Quat::from_xyzw(
        read_f32(bytes),
        read_f32(&bytes[4..]),
        read_f32(&bytes[8..]),
        read_f32(&bytes[12..]),
    )
}

/// Normalize a quaternion, falling back to identity for a zero vector.
#[inline]
pub fn normalize_or_identity(q: Quat) -> Quat {
    let len_sq = q.length_squared();
    if len_sq > f32::EPSILON && len_sq.is_finite() {
        q * len_sq.sqrt().recip()
    } else {
        Quat::IDENTITY
    }
}
