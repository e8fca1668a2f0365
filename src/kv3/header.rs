//! Version-dependent KV3 header parsing.

use tracing::debug;

use super::format::*;
use crate::core::{ByteCursor, CompressionMethod};
use crate::util::{Error, Result};

/// Element counts for one set of byte lanes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneCounts {
    pub bytes1: usize,
    pub bytes2: usize,
    pub bytes4: usize,
    pub bytes8: usize,
}

/// Stored and expanded size of one physical buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSize {
    pub uncompressed: usize,
    /// `None` when the buffer runs to the end of the input (version 1).
    pub compressed: Option<usize>,
}

/// Parsed KV3 header.
#[derive(Clone, Debug)]
pub struct Kv3Header {
    pub version: u32,
    pub format: [u8; FORMAT_GUID_SIZE],
    pub method: CompressionMethod,
    pub frame_size: usize,
    /// Primary lane set.
    pub lanes: LaneCounts,
    /// Auxiliary lane set (version 5).
    pub aux_lanes: LaneCounts,
    /// Combined string and type-tag bytes declared by versions 2-4.
    pub strings_and_types_size: Option<usize>,
    /// Type-tag byte count declared by version 5.
    pub types_size: Option<usize>,
    /// Object length-table entries (version 5) or preallocation hint.
    pub object_count: usize,
    /// Array length-table entries (version 5) or preallocation hint.
    pub array_count: usize,
    pub blob_count: usize,
    pub blob_total_size: usize,
    /// Stored size of the blob section (version 4+).
    pub blob_compressed_size: Option<usize>,
    /// Main buffer (buffer 0).
    pub buffer0: BufferSize,
    /// Auxiliary lane buffer (version 5).
    pub buffer1: Option<BufferSize>,
}

impl Kv3Header {
    /// Read and validate the header. The cursor is left at the payload.
    pub fn read(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let magic = cur.read_u32()?;
        if magic & KV3_MAGIC_MASK != KV3_MAGIC_PREFIX {
            return Err(Error::InvalidMagic { what: "KV3", found: magic });
        }
        let version = magic & 0xFF;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion { what: "KV3", version });
        }

        let mut format = [0u8; FORMAT_GUID_SIZE];
        format.copy_from_slice(cur.take(FORMAT_GUID_SIZE)?);

        let method = CompressionMethod::from_u32(cur.read_u32()?)?;
        let header = match version {
            1 => Self::read_v1(cur, version, format, method)?,
            VERSION_DUAL_BUFFER => Self::read_v5(cur, version, format, method)?,
            _ => Self::read_v2(cur, version, format, method)?,
        };

        if header.method == CompressionMethod::Zstd && version < VERSION_ZSTD {
            return Err(Error::invalid(format!("ZSTD compression in KV3 version {}", version)));
        }
        if header.method == CompressionMethod::Lz4 && header.blob_total_size > 0 && header.frame_size == 0 {
            return Err(Error::invalid("KV3 blob section without frame size"));
        }

        debug!(
            version,
            method = ?header.method,
            size = header.buffer0.uncompressed,
            blobs = header.blob_count,
            "KV3 header"
        );
        Ok(header)
    }

    fn read_v1(
        cur: &mut ByteCursor<'_>,
        version: u32,
        format: [u8; FORMAT_GUID_SIZE],
        method: CompressionMethod,
    ) -> Result<Self> {
        if method == CompressionMethod::Zstd {
            return Err(Error::invalid("ZSTD compression in KV3 version 1"));
        }
        let lanes = LaneCounts {
            bytes1: cur.read_len()?,
            bytes2: 0,
            bytes4: cur.read_len()?,
            bytes8: cur.read_len()?,
        };
        let uncompressed = cur.read_len()?;

        Ok(Self {
            version,
            format,
            method,
            frame_size: 0,
            lanes,
            aux_lanes: LaneCounts::default(),
            strings_and_types_size: None,
            types_size: None,
            object_count: 0,
            array_count: 0,
            blob_count: 0,
            blob_total_size: 0,
            blob_compressed_size: None,
            buffer0: BufferSize { uncompressed, compressed: None },
            buffer1: None,
        })
    }

    fn read_v2(
        cur: &mut ByteCursor<'_>,
        version: u32,
        format: [u8; FORMAT_GUID_SIZE],
        method: CompressionMethod,
    ) -> Result<Self> {
        let frame_size = read_compression_params(cur)?;
        let bytes1 = cur.read_len()?;
        let bytes4 = cur.read_len()?;
        let bytes8 = cur.read_len()?;
        let strings_and_types_size = cur.read_len()?;
        let object_count = cur.read_u16()? as usize;
        let array_count = cur.read_u16()? as usize;
        let uncompressed = cur.read_len()?;
        let compressed = cur.read_len()?;
        let blob_count = cur.read_len()?;
        let blob_total_size = cur.read_len()?;

        let (bytes2, blob_compressed_size) = if version >= VERSION_TWO_BYTE_LANE {
            (cur.read_len()?, Some(cur.read_len()?))
        } else {
            (0, None)
        };

        Ok(Self {
            version,
            format,
            method,
            frame_size,
            lanes: LaneCounts { bytes1, bytes2, bytes4, bytes8 },
            aux_lanes: LaneCounts::default(),
            strings_and_types_size: Some(strings_and_types_size),
            types_size: None,
            object_count,
            array_count,
            blob_count,
            blob_total_size,
            blob_compressed_size,
            buffer0: BufferSize { uncompressed, compressed: Some(compressed) },
            buffer1: None,
        })
    }

    fn read_v5(
        cur: &mut ByteCursor<'_>,
        version: u32,
        format: [u8; FORMAT_GUID_SIZE],
        method: CompressionMethod,
    ) -> Result<Self> {
        let frame_size = read_compression_params(cur)?;
        let lanes = read_lane_counts(cur)?;
        let types_size = cur.read_len()?;
        let object_count = cur.read_len()?;
        let array_count = cur.read_len()?;
        let blob_count = cur.read_len()?;
        let blob_total_size = cur.read_len()?;
        let blob_compressed_size = cur.read_len()?;
        let buffer0 = BufferSize {
            uncompressed: cur.read_len()?,
            compressed: Some(cur.read_len()?),
        };
        let aux_lanes = read_lane_counts(cur)?;
        let buffer1 = BufferSize {
            uncompressed: cur.read_len()?,
            compressed: Some(cur.read_len()?),
        };

        Ok(Self {
            version,
            format,
            method,
            frame_size,
            lanes,
            aux_lanes,
            strings_and_types_size: None,
            types_size: Some(types_size),
            object_count,
            array_count,
            blob_count,
            blob_total_size,
            blob_compressed_size: Some(blob_compressed_size),
            buffer0,
            buffer1: Some(buffer1),
        })
    }

    /// True when blob bytes live out of line behind a length table.
    #[inline]
    pub fn has_blob_table(&self) -> bool {
        self.version >= VERSION_BLOB_TABLE
    }

    /// Number of LZ4 frames in the blob section.
    pub fn blob_frame_count(&self) -> usize {
        if self.method == CompressionMethod::Lz4 && self.blob_total_size > 0 && self.frame_size > 0 {
            self.blob_total_size.div_ceil(self.frame_size)
        } else {
            0
        }
    }

    /// Sum of declared uncompressed sizes, used for allocation limits.
    pub fn total_uncompressed(&self) -> usize {
        self.buffer0.uncompressed
            + self.buffer1.map_or(0, |b| b.uncompressed)
            + self.blob_total_size
    }
}

/// Read the dictionary id and frame size that follow the method.
fn read_compression_params(cur: &mut ByteCursor<'_>) -> Result<usize> {
    let dictionary_id = cur.read_u16()?;
    if dictionary_id != 0 {
        return Err(Error::unsupported(format!("KV3 compression dictionary {}", dictionary_id)));
    }
    Ok(cur.read_u16()? as usize)
}

fn read_lane_counts(cur: &mut ByteCursor<'_>) -> Result<LaneCounts> {
    Ok(LaneCounts {
        bytes1: cur.read_len()?,
        bytes2: cur.read_len()?,
        bytes4: cur.read_len()?,
        bytes8: cur.read_len()?,
    })
}
