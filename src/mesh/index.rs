//! Compressed index stream decoding.
//!
//! The stream is the meshoptimizer index codec. Each triangle is one code
//! byte; vertices are either recalled from a 16-entry vertex FIFO, taken
//! from a running `next` counter, or stored explicitly as zigzag varint
//! deltas from the last explicit index. Edges are recalled from a 16-entry
//! edge FIFO.
//!
//! ```text
//! | header 0xE0 | code bytes (1 per triangle) | explicit data | aux table (16) |
//! ```

use tracing::instrument;

use crate::util::{Error, Result};

/// High nibble of the header byte.
pub const INDEX_HEADER: u8 = 0xE0;

/// Newest supported stream version.
pub const INDEX_MAX_VERSION: u8 = 1;

/// Size of the auxiliary code table stored at the end of the stream.
const CODE_AUX_TABLE_SIZE: usize = 16;

/// Triangle decoder state: vertex and edge FIFOs plus counters.
struct IndexDecoder {
    vertex_fifo: [u32; 16],
    vertex_offset: usize,
    edge_fifo: [[u32; 2]; 16],
    edge_offset: usize,
    next: u32,
    last: u32,
}

impl IndexDecoder {
    fn new() -> Self {
        Self {
            vertex_fifo: [u32::MAX; 16],
            vertex_offset: 0,
            edge_fifo: [[u32::MAX; 2]; 16],
            edge_offset: 0,
            next: 0,
            last: 0,
        }
    }

    #[inline]
    fn push_vertex(&mut self, v: u32, cond: bool) {
        self.vertex_fifo[self.vertex_offset] = v;
        self.vertex_offset = (self.vertex_offset + cond as usize) & 15;
    }

    #[inline]
    fn push_edge(&mut self, a: u32, b: u32) {
        self.edge_fifo[self.edge_offset] = [a, b];
        self.edge_offset = (self.edge_offset + 1) & 15;
    }

    /// Vertex `back` entries behind the FIFO head (1 = most recent).
    #[inline]
    fn recall_vertex(&self, back: usize) -> u32 {
        self.vertex_fifo[self.vertex_offset.wrapping_sub(back) & 15]
    }

    #[inline]
    fn recall_edge(&self, back: usize) -> [u32; 2] {
        self.edge_fifo[self.edge_offset.wrapping_sub(back) & 15]
    }
}

/// Explicit-index data cursor. Reads may run into the aux table, exactly
/// as far as the buffer allows; the final position check rejects that.
struct DataCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DataCursor<'_> {
    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(Error::UnexpectedEof { pos: self.pos, needed: 1 })?;
        self.pos += 1;
        Ok(b)
    }

    /// Little-endian base-128 varint, at most five bytes.
    fn read_vbyte(&mut self) -> Result<u32> {
        let lead = self.read_u8()?;
        if lead < 128 {
            return Ok(lead as u32);
        }
        let mut result = (lead & 127) as u32;
        let mut shift = 7;
        for _ in 0..4 {
            let group = self.read_u8()?;
            result |= ((group & 127) as u32) << shift;
            shift += 7;
            if group < 128 {
                break;
            }
        }
        Ok(result)
    }

    /// Zigzag delta from `last`.
    fn read_index(&mut self, last: u32) -> Result<u32> {
        let v = self.read_vbyte()?;
        let d = (v >> 1) ^ 0u32.wrapping_sub(v & 1);
        Ok(last.wrapping_add(d))
    }
}

/// Decode `index_count` indices (a multiple of 3).
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn decode_index_buffer(index_count: usize, bytes: &[u8]) -> Result<Vec<u32>> {
    if index_count % 3 != 0 {
        return Err(Error::invalid(format!("index count {} is not a multiple of 3", index_count)));
    }
    let triangle_count = index_count / 3;
    let min_size = 1 + triangle_count + CODE_AUX_TABLE_SIZE;
    if bytes.len() < min_size {
        return Err(Error::UnexpectedEof { pos: 0, needed: min_size });
    }

    let header = bytes[0];
    if header & 0xF0 != INDEX_HEADER {
        return Err(Error::InvalidMagic { what: "index stream", found: header as u32 });
    }
    let version = header & 0x0F;
    if version > INDEX_MAX_VERSION {
        return Err(Error::UnsupportedVersion { what: "index stream", version: version as u32 });
    }

    // version 1 spends fec 13/14 on +-1 deltas from the last explicit index
    let fec_max: u8 = if version >= 1 { 13 } else { 15 };

    let codes = &bytes[1..1 + triangle_count];
    let data_end = bytes.len() - CODE_AUX_TABLE_SIZE;
    let aux_table = &bytes[data_end..];
    let mut data = DataCursor { data: bytes, pos: 1 + triangle_count };

    let mut st = IndexDecoder::new();
    let mut out = Vec::with_capacity(index_count);

    for &code in codes {
        if data.pos > data_end {
            return Err(Error::invalid("index stream explicit data overruns aux table"));
        }

        if code < 0xF0 {
            let fe = (code >> 4) as usize;
            let [a, b] = st.recall_edge(1 + fe);
            let fec = code & 15;

            if fec < fec_max {
                let c = if fec == 0 { st.next } else { st.recall_vertex(1 + fec as usize) };
                let fresh = fec == 0;
                st.next += fresh as u32;

                out.extend_from_slice(&[a, b, c]);
                st.push_vertex(c, fresh);
                st.push_edge(c, b);
                st.push_edge(a, c);
            } else {
                let c = if fec != 15 {
                    // 13 -> last - 1, 14 -> last + 1
                    let delta = fec as i32 - (fec ^ 3) as i32;
                    st.last.wrapping_add_signed(delta)
                } else {
                    data.read_index(st.last)?
                };
                st.last = c;

                out.extend_from_slice(&[a, b, c]);
                st.push_vertex(c, true);
                st.push_edge(c, b);
                st.push_edge(a, c);
            }
        } else if code < 0xFE {
            let code_aux = aux_table[(code & 15) as usize];
            let feb = (code_aux >> 4) as usize;
            let fec = (code_aux & 15) as usize;

            let a = st.next;
            st.next += 1;

            let b = if feb == 0 { st.next } else { st.recall_vertex(feb) };
            st.next += (feb == 0) as u32;

            let c = if fec == 0 { st.next } else { st.recall_vertex(fec) };
            st.next += (fec == 0) as u32;

            out.extend_from_slice(&[a, b, c]);
            st.push_vertex(a, true);
            st.push_vertex(b, feb == 0);
            st.push_vertex(c, fec == 0);
            st.push_edge(b, a);
            st.push_edge(c, b);
            st.push_edge(a, c);
        } else {
            let code_aux = data.read_u8()?;
            let fea = if code == 0xFE { 0 } else { 15 };
            let feb = (code_aux >> 4) as usize;
            let fec = (code_aux & 15) as usize;

            // aux byte 0 outside the table is a reset of the next counter
            if code_aux == 0 {
                st.next = 0;
            }

            let mut a = 0;
            if fea == 0 {
                a = st.next;
                st.next += 1;
            }
            let mut b = if feb == 0 {
                st.next += 1;
                st.next - 1
            } else {
                st.recall_vertex(feb)
            };
            let mut c = if fec == 0 {
                st.next += 1;
                st.next - 1
            } else {
                st.recall_vertex(fec)
            };

            if fea == 15 {
                a = data.read_index(st.last)?;
                st.last = a;
            }
            if feb == 15 {
                b = data.read_index(st.last)?;
                st.last = b;
            }
            if fec == 15 {
                c = data.read_index(st.last)?;
                st.last = c;
            }

            out.extend_from_slice(&[a, b, c]);
            st.push_vertex(a, true);
            st.push_vertex(b, feb == 0 || feb == 15);
            st.push_vertex(c, fec == 0 || fec == 15);
            st.push_edge(b, a);
            st.push_edge(c, b);
            st.push_edge(a, c);
        }
    }

    if data.pos != data_end {
        return Err(Error::SizeMismatch {
            what: "index stream explicit data",
            expected: data_end,
            actual: data.pos,
        });
    }

    Ok(out)
}

/// High nibble of the index sequence header byte.
pub const INDEX_SEQUENCE_HEADER: u8 = 0xD0;

/// Size of the padding tail after an index sequence.
const SEQUENCE_TAIL_SIZE: usize = 4;

/// Decode an index sequence (non-triangle index lists).
///
/// Each index is a varint whose low bit selects one of two baselines and
/// whose remaining bits are a zigzag delta from that baseline.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn decode_index_sequence(index_count: usize, bytes: &[u8]) -> Result<Vec<u32>> {
    let min_size = 1 + index_count + SEQUENCE_TAIL_SIZE;
    if bytes.len() < min_size {
        return Err(Error::UnexpectedEof { pos: 0, needed: min_size });
    }

    let header = bytes[0];
    if header & 0xF0 != INDEX_SEQUENCE_HEADER {
        return Err(Error::InvalidMagic { what: "index sequence", found: header as u32 });
    }
    let version = header & 0x0F;
    if version > INDEX_MAX_VERSION {
        return Err(Error::UnsupportedVersion { what: "index sequence", version: version as u32 });
    }

    let data_end = bytes.len() - SEQUENCE_TAIL_SIZE;
    let mut data = DataCursor { data: bytes, pos: 1 };
    let mut last = [0u32; 2];
    let mut out = Vec::with_capacity(index_count);

    for _ in 0..index_count {
        if data.pos >= data_end {
            return Err(Error::UnexpectedEof { pos: data.pos, needed: 1 });
        }
        let v = data.read_vbyte()?;
        let baseline = (v & 1) as usize;
        let v = v >> 1;
        let d = (v >> 1) ^ 0u32.wrapping_sub(v & 1);
        let index = last[baseline].wrapping_add(d);
        last[baseline] = index;
        out.push(index);
    }

    if data.pos != data_end {
        return Err(Error::SizeMismatch {
            what: "index sequence data",
            expected: data_end,
            actual: data.pos,
        });
    }

    Ok(out)
}

/// Decode into 16-bit indices, failing if any index does not fit.
pub fn decode_index_buffer_u16(index_count: usize, bytes: &[u8]) -> Result<Vec<u16>> {
    decode_index_buffer(index_count, bytes)?
        .into_iter()
        .map(|i| u16::try_from(i).map_err(|_| Error::invalid(format!("index {} exceeds 16 bits", i))))
        .collect()
}

/// Decode and serialize as little-endian indices of `index_size` bytes.
pub fn decode_index_bytes(index_count: usize, index_size: usize, bytes: &[u8]) -> Result<Vec<u8>> {
    match index_size {
        2 => Ok(decode_index_buffer_u16(index_count, bytes)?
            .iter()
            .flat_map(|i| i.to_le_bytes())
            .collect()),
        4 => Ok(decode_index_buffer(index_count, bytes)?
            .iter()
            .flat_map(|i| i.to_le_bytes())
            .collect()),
        other => Err(Error::invalid(format!("index size {} is not 2 or 4", other))),
    }
}
