//! Core layer - byte access and buffer decompression.
//!
//! This module provides:
//! - [`ByteCursor`] - Bounds-checked little-endian reads over a slice
//! - [`CompressionMethod`] and the region / block-stream decompressors

mod compression;
mod reader;

pub use compression::{
    decompress_block_stream, decompress_region, decompress_split, CompressionMethod,
};
pub use reader::{align_up, ByteCursor};
