//! Binary KV3 object-graph decoding.
//!
//! KV3 is the versioned binary serialization used for skeleton, physics and
//! animation metadata inside compiled model resources. It decodes to a
//! generic [`Value`] tree.
//!
//! ## Layout
//!
//! ```text
//! +------------------------+
//! | Magic "\x0V3VK"        |  4 bytes, low byte = version 1..=5
//! +------------------------+
//! | Format GUID            |  16 bytes
//! +------------------------+
//! | Sizes / counts         |  version dependent (see header.rs)
//! +------------------------+
//! | Buffer 0 (compressed)  |  lanes, tables, type tags, trailer
//! +------------------------+
//! | Buffer 1 (v5)          |  auxiliary lanes
//! +------------------------+
//! | Blob section (v2+)     |  raw or LZ4 frames
//! +------------------------+
//! ```
//!
//! Decompressed buffer 0:
//!
//! ```text
//! | 1-byte lane | pad | 2-byte lane | pad | 4-byte lane | pad | 8-byte lane |
//! v1-v4: | type tags | [v2+: blob lengths] |
//! v5:    | object lengths | array lengths | blob lengths | type tags |
//! | 0xFFEEDD00 | [LZ4 blob frame lengths] |
//! ```
//!
//! Padding aligns each lane to its element width and is only present in
//! front of a non-empty lane.
//!
//! The string table is the leading run of null-terminated strings in the
//! 1-byte lane; its count is the first value of the 4-byte lane.

mod format;
mod header;
mod lanes;
mod reader;
mod value;

pub use format::*;
pub use header::{BufferSize, Kv3Header, LaneCounts};
pub use lanes::LaneSet;
pub use reader::{parse, parse_document, Document, ParseOptions};
pub use value::{Object, Value, ValueKind};
