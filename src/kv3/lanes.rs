//! Fixed-width byte lanes.
//!
//! A KV3 buffer begins with four lanes holding every 1, 2, 4 and 8 byte
//! scalar of the document. Each lane is consumed strictly in order as nodes
//! of that width are decoded, so a lane is just an owned cursor over its
//! slice of the buffer.

use super::header::LaneCounts;
use crate::core::ByteCursor;
use crate::util::{Error, Result};

/// One set of four lanes sliced out of a decompressed buffer.
#[derive(Clone, Debug)]
pub struct LaneSet<'a> {
    pub bytes1: ByteCursor<'a>,
    pub bytes2: ByteCursor<'a>,
    pub bytes4: ByteCursor<'a>,
    pub bytes8: ByteCursor<'a>,
}

impl<'a> LaneSet<'a> {
    /// Slice the lanes from the front of `buf`, aligning the start of each
    /// non-empty lane to its element width. Empty lanes take no padding.
    /// `buf` is left positioned after the last lane.
    pub fn slice(buf: &mut ByteCursor<'a>, counts: &LaneCounts) -> Result<Self> {
        let bytes1 = ByteCursor::new(buf.take(counts.bytes1)?);
        let bytes2 = take_lane(buf, counts.bytes2, 2)?;
        let bytes4 = take_lane(buf, counts.bytes4, 4)?;
        let bytes8 = take_lane(buf, counts.bytes8, 8)?;

        Ok(Self { bytes1, bytes2, bytes4, bytes8 })
    }

    /// Total unread bytes across all lanes.
    pub fn remaining(&self) -> usize {
        self.bytes1.remaining()
            + self.bytes2.remaining()
            + self.bytes4.remaining()
            + self.bytes8.remaining()
    }
}

fn take_lane<'a>(buf: &mut ByteCursor<'a>, count: usize, width: usize) -> Result<ByteCursor<'a>> {
    if count == 0 {
        return Ok(ByteCursor::new(&[]));
    }
    let len = count
        .checked_mul(width)
        .ok_or_else(|| Error::invalid(format!("lane count {} overflows", count)))?;
    buf.align(width)?;
    Ok(ByteCursor::new(buf.take(len)?))
}
