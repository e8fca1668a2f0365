//! Buffer decompression for compiled resource data.
//!
//! KV3 payloads are stored raw, as LZ4 blocks, or as ZSTD frames. Every
//! decompressed region must come out at exactly the size declared in its
//! header: a short or long result is a format error, never padded or
//! truncated.

use std::io::Read;

use tracing::trace;

use crate::util::{Error, Result};

/// LZ4 history window reachable by a linked block.
const LZ4_WINDOW: usize = 64 * 1024;

/// Compression method of a stored region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Lz4,
    Zstd,
}

impl CompressionMethod {
    /// Convert the on-disk method id.
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Zstd),
            other => Err(Error::unsupported(format!("compression method {}", other))),
        }
    }
}

/// Decompress one region to exactly `expected_size` bytes.
pub fn decompress_region(
    method: CompressionMethod,
    bytes: &[u8],
    expected_size: usize,
) -> Result<Vec<u8>> {
    if bytes.is_empty() && expected_size == 0 {
        return Ok(Vec::new());
    }
    let out = match method {
        CompressionMethod::None => bytes.to_vec(),
        CompressionMethod::Lz4 => lz4_flex::block::decompress(bytes, expected_size)
            .map_err(|e| Error::Decompress(format!("LZ4: {}", e)))?,
        CompressionMethod::Zstd => decode_zstd_bounded(bytes, expected_size)?,
    };

    if out.len() != expected_size {
        return Err(Error::SizeMismatch {
            what: "decompressed region",
            expected: expected_size,
            actual: out.len(),
        });
    }

    trace!(?method, compressed = bytes.len(), size = out.len(), "decompressed region");
    Ok(out)
}

/// Decode ZSTD frames, producing at most one byte past `expected_size`.
fn decode_zstd_bounded(bytes: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::with_buffer(bytes)
        .map_err(|e| Error::Decompress(format!("ZSTD: {}", e)))?;
    let mut out = Vec::with_capacity(expected_size);
    decoder
        .take(expected_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompress(format!("ZSTD: {}", e)))?;
    Ok(out)
}

/// Decompress a payload that packs two logical regions back to back.
///
/// The caller supplies the split point (`first_size`); the halves are
/// returned separately.
pub fn decompress_split(
    method: CompressionMethod,
    bytes: &[u8],
    first_size: usize,
    second_size: usize,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut first = decompress_region(method, bytes, first_size + second_size)?;
    let second = first.split_off(first_size);
    Ok((first, second))
}

/// Decompress a stream of length-prefixed frames into one contiguous buffer.
///
/// Frame `i` occupies `frame_lengths[i]` bytes of `bytes`. Every frame but
/// the last expands to exactly `frame_size` bytes; the last expands to the
/// remainder of `total_size`. All input must be consumed.
///
/// LZ4 frames are decoded with the previously decoded output as an external
/// dictionary, so streams written with linked blocks decode as well as
/// streams of independent blocks.
pub fn decompress_block_stream(
    method: CompressionMethod,
    frame_lengths: &[u16],
    frame_size: usize,
    total_size: usize,
    bytes: &[u8],
) -> Result<Vec<u8>> {
    if method == CompressionMethod::None {
        return decompress_region(method, bytes, total_size);
    }
    if frame_size == 0 {
        return Err(Error::invalid("block stream frame size is zero"));
    }

    let expected_frames = total_size.div_ceil(frame_size);
    if frame_lengths.len() != expected_frames {
        return Err(Error::SizeMismatch {
            what: "block stream frame table",
            expected: expected_frames,
            actual: frame_lengths.len(),
        });
    }

    let mut out = Vec::with_capacity(total_size);
    let mut offset = 0usize;

    for (index, &compressed_len) in frame_lengths.iter().enumerate() {
        let compressed_len = compressed_len as usize;
        let frame = bytes
            .get(offset..offset + compressed_len)
            .ok_or(Error::UnexpectedEof { pos: offset, needed: compressed_len })?;
        offset += compressed_len;

        let frame_out = frame_size.min(total_size - out.len());
        let decoded = match method {
            CompressionMethod::Lz4 => {
                let dict_start = out.len().saturating_sub(LZ4_WINDOW);
                lz4_flex::block::decompress_with_dict(frame, frame_out, &out[dict_start..])
                    .map_err(|e| Error::Decompress(format!("LZ4 frame {}: {}", index, e)))?
            }
            _ => decompress_region(method, frame, frame_out)?,
        };

        if decoded.len() != frame_out {
            return Err(Error::SizeMismatch {
                what: "block stream frame",
                expected: frame_out,
                actual: decoded.len(),
            });
        }
        out.extend_from_slice(&decoded);
    }

    if offset != bytes.len() {
        return Err(Error::SizeMismatch {
            what: "block stream input",
            expected: offset,
            actual: bytes.len(),
        });
    }

    Ok(out)
}
