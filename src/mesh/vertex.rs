//! Compressed vertex stream decoding.
//!
//! The stream is the meshoptimizer vertex codec: vertices are processed in
//! blocks of up to 256, each byte column of a block is stored as zigzag
//! deltas against the previous vertex, packed in 16-byte groups of 0, 2, 4
//! or 8 bits per value.
//!
//! ```text
//! | header 0xA0 | block 0 | block 1 | ... | tail: padding + seed vertex |
//! ```
//!
//! The tail is `max(32, stride)` bytes and ends with the vertex used to seed
//! the deltas of the first block.

use tracing::instrument;

use crate::core::ByteCursor;
use crate::util::{Error, Result};

/// High nibble of the header byte.
pub const VERTEX_HEADER: u8 = 0xA0;

/// Largest vertex stride the codec accepts.
pub const MAX_VERTEX_STRIDE: usize = 256;

/// Maximum vertices per block.
pub const VERTEX_BLOCK_MAX_SIZE: usize = 256;

/// Scratch budget that bounds the block size for wide strides.
const VERTEX_BLOCK_SIZE_BYTES: usize = 8192;

/// Values per byte group.
const BYTE_GROUP_SIZE: usize = 16;

/// Minimum size of the trailing tail.
const TAIL_MAX_SIZE: usize = 32;

/// Vertices per block for a given stride, a multiple of 16.
#[inline]
pub fn vertex_block_size(stride: usize) -> usize {
    let result = (VERTEX_BLOCK_SIZE_BYTES / stride) & !(BYTE_GROUP_SIZE - 1);
    result.min(VERTEX_BLOCK_MAX_SIZE)
}

/// Size of the trailing tail for a given stride.
#[inline]
pub fn vertex_tail_size(stride: usize) -> usize {
    stride.max(TAIL_MAX_SIZE)
}

/// Decode `vertex_count` vertices of `stride` bytes each.
///
/// The output is the interleaved vertex buffer, `vertex_count * stride`
/// bytes long.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn decode_vertex_buffer(vertex_count: usize, stride: usize, bytes: &[u8]) -> Result<Vec<u8>> {
    if stride == 0 || stride > MAX_VERTEX_STRIDE || stride % 4 != 0 {
        return Err(Error::invalid(format!("invalid vertex stride {}", stride)));
    }
    if bytes.len() < 1 + stride {
        return Err(Error::UnexpectedEof { pos: 0, needed: 1 + stride });
    }

    let header = bytes[0];
    if header & 0xF0 != VERTEX_HEADER {
        return Err(Error::InvalidMagic { what: "vertex stream", found: header as u32 });
    }
    let version = header & 0x0F;
    if version > 0 {
        return Err(Error::UnsupportedVersion { what: "vertex stream", version: version as u32 });
    }

    let total = vertex_count
        .checked_mul(stride)
        .ok_or_else(|| Error::invalid("vertex buffer size overflows"))?;
    let mut output = vec![0u8; total];

    // deltas of the first block are anchored on the vertex stored at the end
    let mut last_vertex = [0u8; MAX_VERTEX_STRIDE];
    last_vertex[..stride].copy_from_slice(&bytes[bytes.len() - stride..]);

    let block_size = vertex_block_size(stride);
    let mut cur = ByteCursor::new(bytes);
    cur.skip(1)?;

    let mut scratch = [0u8; VERTEX_BLOCK_MAX_SIZE];
    for block in output.chunks_mut(block_size * stride) {
        decode_vertex_block(&mut cur, block, stride, &mut last_vertex, &mut scratch)?;
    }

    let tail = vertex_tail_size(stride);
    if cur.remaining() != tail {
        return Err(Error::SizeMismatch {
            what: "vertex stream tail",
            expected: tail,
            actual: cur.remaining(),
        });
    }

    Ok(output)
}

/// Decode one block into `block` (interleaved, `count * stride` bytes).
fn decode_vertex_block(
    cur: &mut ByteCursor<'_>,
    block: &mut [u8],
    stride: usize,
    last_vertex: &mut [u8; MAX_VERTEX_STRIDE],
    scratch: &mut [u8; VERTEX_BLOCK_MAX_SIZE],
) -> Result<()> {
    let count = block.len() / stride;
    let count_aligned = (count + BYTE_GROUP_SIZE - 1) & !(BYTE_GROUP_SIZE - 1);

    for k in 0..stride {
        decode_bytes(cur, &mut scratch[..count_aligned])?;

        let mut p = last_vertex[k];
        for (i, &enc) in scratch[..count].iter().enumerate() {
            let v = unzigzag8(enc).wrapping_add(p);
            block[i * stride + k] = v;
            p = v;
        }
    }

    last_vertex[..stride].copy_from_slice(&block[(count - 1) * stride..]);
    Ok(())
}

/// Decode one byte column made of 16-value groups.
fn decode_bytes(cur: &mut ByteCursor<'_>, buffer: &mut [u8]) -> Result<()> {
    let group_count = buffer.len() / BYTE_GROUP_SIZE;
    // 2-bit selector per group, 4 per header byte
    let header = cur.take(group_count.div_ceil(4))?;

    for (group, out) in buffer.chunks_exact_mut(BYTE_GROUP_SIZE).enumerate() {
        let bitslog2 = (header[group / 4] >> ((group % 4) * 2)) & 3;
        decode_bytes_group(cur, out, bitslog2)?;
    }
    Ok(())
}

/// Decode 16 values packed at 0, 2, 4 or 8 bits each.
///
/// For 2 and 4 bit groups the all-ones code is an escape: the actual value
/// follows the packed bits as a literal byte.
fn decode_bytes_group(cur: &mut ByteCursor<'_>, out: &mut [u8], bitslog2: u8) -> Result<()> {
    match bitslog2 {
        0 => {
            out.fill(0);
            Ok(())
        }
        1 => decode_packed_group(cur, out, 2),
        2 => decode_packed_group(cur, out, 4),
        _ => {
            out.copy_from_slice(cur.take(BYTE_GROUP_SIZE)?);
            Ok(())
        }
    }
}

fn decode_packed_group(cur: &mut ByteCursor<'_>, out: &mut [u8], bits: u32) -> Result<()> {
    let packed = cur.take(BYTE_GROUP_SIZE * bits as usize / 8)?;
    let escape = (1u8 << bits) - 1;
    let per_byte = 8 / bits as usize;

    for (i, slot) in out.iter_mut().enumerate() {
        let byte = packed[i / per_byte];
        // most significant bits first
        let shift = 8 - bits as usize * (i % per_byte + 1);
        let enc = (byte >> shift) & escape;
        *slot = if enc == escape { cur.read_u8()? } else { enc };
    }
    Ok(())
}

#[inline]
fn unzigzag8(v: u8) -> u8 {
    (v >> 1) ^ 0u8.wrapping_sub(v & 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size() {
        assert_eq!(vertex_block_size(4), 256);
        assert_eq!(vertex_block_size(32), 256);
        assert_eq!(vertex_block_size(48), 160);
        assert_eq!(vertex_block_size(256), 32);
    }

    #[test]
    fn test_unzigzag() {
        assert_eq!(unzigzag8(0), 0);
        assert_eq!(unzigzag8(1), 0xFF);
        assert_eq!(unzigzag8(2), 1);
        assert_eq!(unzigzag8(3), 0xFE);
    }

    #[test]
    fn test_packed_group_escape() {
        // 2-bit codes: 0,1,2,3(escape) repeated, escapes read literal bytes
        let mut data = vec![0b0001_1011u8; 4];
        data.extend_from_slice(&[10, 11, 12, 13]);
        let mut cur = ByteCursor::new(&data);
        let mut out = [0u8; 16];
        decode_packed_group(&mut cur, &mut out, 2).unwrap();
        assert_eq!(&out[..4], &[0, 1, 2, 10]);
        assert_eq!(&out[12..], &[0, 1, 2, 13]);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_all_zero_deltas() {
        // one vertex, stride 4: one byte group per column, selector 0
        let mut data = vec![VERTEX_HEADER];
        data.extend_from_slice(&[0u8; 4]);
        // tail: 28 bytes padding + seed vertex
        data.extend_from_slice(&[0u8; 28]);
        data.extend_from_slice(&[1, 2, 3, 4]);
        let out = decode_vertex_buffer(1, 4, &data).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut data = vec![VERTEX_HEADER];
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&[0u8; 32]);
        assert!(decode_vertex_buffer(1, 6, &data).is_err());
        assert!(decode_vertex_buffer(1, 260, &data).is_err());

        let mut bad_version = data.clone();
        bad_version[0] = VERTEX_HEADER | 1;
        assert!(matches!(
            decode_vertex_buffer(1, 4, &bad_version),
            Err(Error::UnsupportedVersion { .. })
        ));

        let mut long_tail = data.clone();
        long_tail.push(0);
        assert!(matches!(
            decode_vertex_buffer(1, 4, &long_tail),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
