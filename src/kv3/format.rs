//! KV3 format constants and node type tags.

use crate::util::{Error, Result};

/// Magic prefix shared by all binary KV3 versions ("\x0V3VK" little-endian).
pub const KV3_MAGIC_PREFIX: u32 = 0x4B56_3300;

/// Mask selecting the magic prefix bits.
pub const KV3_MAGIC_MASK: u32 = 0xFFFF_FF00;

/// Oldest supported version.
pub const MIN_VERSION: u32 = 1;

/// Newest supported version.
pub const MAX_VERSION: u32 = 5;

/// First version that stores blob data out of line with a length table.
pub const VERSION_BLOB_TABLE: u32 = 2;

/// First version that accepts ZSTD compression.
pub const VERSION_ZSTD: u32 = 3;

/// First version with a 2-byte lane and an explicit blob split size.
pub const VERSION_TWO_BYTE_LANE: u32 = 4;

/// First version with dual buffers, length tables and auxiliary lanes.
pub const VERSION_DUAL_BUFFER: u32 = 5;

/// Size of the format GUID following the magic.
pub const FORMAT_GUID_SIZE: usize = 16;

/// Marker closing the type-tag region of every buffer.
pub const TRAILER: u32 = 0xFFEE_DD00;

/// Type tag bit announcing a trailing flag byte.
pub const TYPE_FLAG_MARKER: u8 = 0x80;

/// Bits of a type tag that select the node type.
pub const TYPE_MASK: u8 = 0x3F;

/// Build the magic word for a version.
#[inline]
pub const fn magic_for_version(version: u32) -> u32 {
    KV3_MAGIC_PREFIX | (version & 0xFF)
}

/// Node type as stored in the type-tag stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Null = 1,
    Bool = 2,
    Int64 = 3,
    UInt64 = 4,
    Double = 5,
    String = 6,
    Blob = 7,
    Array = 8,
    Object = 9,
    TypedArray = 10,
    Int32 = 11,
    UInt32 = 12,
    True = 13,
    False = 14,
    Int64Zero = 15,
    Int64One = 16,
    DoubleZero = 17,
    DoubleOne = 18,
    Float = 19,
    Int16 = 20,
    UInt16 = 21,
    Int32AsByte = 23,
    TypedArrayByteLength = 24,
    TypedArrayAuxiliary = 25,
}

impl NodeType {
    /// Convert a masked type tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::Null,
            2 => Self::Bool,
            3 => Self::Int64,
            4 => Self::UInt64,
            5 => Self::Double,
            6 => Self::String,
            7 => Self::Blob,
            8 => Self::Array,
            9 => Self::Object,
            10 => Self::TypedArray,
            11 => Self::Int32,
            12 => Self::UInt32,
            13 => Self::True,
            14 => Self::False,
            15 => Self::Int64Zero,
            16 => Self::Int64One,
            17 => Self::DoubleZero,
            18 => Self::DoubleOne,
            19 => Self::Float,
            20 => Self::Int16,
            21 => Self::UInt16,
            22 => return Err(Error::unsupported("KV3 node type 22")),
            23 => Self::Int32AsByte,
            24 => Self::TypedArrayByteLength,
            25 => Self::TypedArrayAuxiliary,
            other => return Err(Error::invalid(format!("unknown KV3 type tag {}", other))),
        })
    }
}
