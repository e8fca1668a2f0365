//! Test-only encoders used to build decoder inputs.
//!
//! The library never encodes; these writers exist so tests can produce
//! well-formed streams for every version and compression method.

#![allow(dead_code)]

use std::collections::HashMap;

use s2model::core::CompressionMethod;
use s2model::kv3::{magic_for_version, Object, Value, ValueKind};
use s2model::mesh::{vertex_block_size, vertex_tail_size, INDEX_HEADER, INDEX_SEQUENCE_HEADER, VERTEX_HEADER};

// ============================================================================
// Value builders
// ============================================================================

pub fn obj(entries: &[(&str, Value)]) -> Value {
    let mut map = Object::new();
    for (k, v) in entries {
        map.insert(k.to_string(), v.clone());
    }
    Value::Object(map)
}

pub fn s(v: &str) -> Value {
    Value::String(v.to_string())
}

pub fn strs(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|x| s(x)).collect())
}

pub fn ints(items: &[i32]) -> Value {
    Value::Array(items.iter().map(|&x| Value::Int32(x)).collect())
}

pub fn floats(items: &[f32]) -> Value {
    Value::TypedArray { kind: ValueKind::Float, items: items.iter().map(|&x| Value::Float(x)).collect() }
}

pub fn bools(items: &[bool]) -> Value {
    Value::Array(items.iter().map(|&x| Value::Bool(x)).collect())
}

// ============================================================================
// KV3 writer
// ============================================================================

/// How typed arrays are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypedArrayMode {
    /// Count from the 4-byte lane or the array length table.
    Counted,
    /// Count from the 1-byte lane when it fits.
    ByteLength,
    /// Version 5 auxiliary lanes when the count fits.
    Auxiliary,
}

#[derive(Clone, Debug)]
pub struct Kv3Options {
    pub version: u32,
    pub method: CompressionMethod,
    pub frame_size: usize,
    pub typed_arrays: TypedArrayMode,
    /// Tag string nodes with the flag marker and a flag byte.
    pub flag_strings: bool,
}

impl Kv3Options {
    pub fn new(version: u32, method: CompressionMethod) -> Self {
        Self {
            version,
            method,
            frame_size: 4096,
            typed_arrays: TypedArrayMode::Counted,
            flag_strings: false,
        }
    }
}

#[derive(Default)]
struct Lanes {
    b1: Vec<u8>,
    b2: Vec<u8>,
    b4: Vec<u8>,
    b8: Vec<u8>,
}

impl Lanes {
    fn counts(&self) -> [usize; 4] {
        [self.b1.len(), self.b2.len() / 2, self.b4.len() / 4, self.b8.len() / 8]
    }

    /// Lay out the lanes, padding only before non-empty lanes.
    fn bytes(&self) -> Vec<u8> {
        let mut out = self.b1.clone();
        for (lane, width) in [(&self.b2, 2), (&self.b4, 4), (&self.b8, 8)] {
            if !lane.is_empty() {
                while out.len() % width != 0 {
                    out.push(0);
                }
                out.extend_from_slice(lane);
            }
        }
        out
    }
}

struct Kv3Encoder {
    opts: Kv3Options,
    strings: Vec<String>,
    string_index: HashMap<String, i32>,
    lanes: [Lanes; 2],
    active: usize,
    types: Vec<u8>,
    object_lengths: Vec<u8>,
    array_lengths: Vec<u8>,
    blob_lengths: Vec<u8>,
    blob_count: usize,
    blob_data: Vec<u8>,
}

/// Encode `root` as a KV3 document.
pub fn encode_kv3(root: &Value, opts: &Kv3Options) -> Vec<u8> {
    assert!((1..=5).contains(&opts.version));
    let mut enc = Kv3Encoder {
        opts: opts.clone(),
        strings: Vec::new(),
        string_index: HashMap::new(),
        lanes: [Lanes::default(), Lanes::default()],
        active: 0,
        types: Vec::new(),
        object_lengths: Vec::new(),
        array_lengths: Vec::new(),
        blob_lengths: Vec::new(),
        blob_count: 0,
        blob_data: Vec::new(),
    };
    enc.write_node(root);
    enc.finish()
}

impl Kv3Encoder {
    fn lane(&mut self) -> &mut Lanes {
        &mut self.lanes[self.active]
    }

    fn string(&mut self, text: &str) -> i32 {
        if text.is_empty() {
            return -1;
        }
        if let Some(&i) = self.string_index.get(text) {
            return i;
        }
        let i = self.strings.len() as i32;
        self.strings.push(text.to_string());
        self.string_index.insert(text.to_string(), i);
        i
    }

    fn write_type(&mut self, t: u8) {
        if self.opts.flag_strings && t == 6 {
            self.types.push(t | 0x80);
            self.types.push(1);
        } else {
            self.types.push(t);
        }
    }

    fn node_type(&self, v: &Value) -> u8 {
        match v {
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Int16(_) => 20,
            Value::UInt16(_) => 21,
            Value::Int32(x) if (-128..=127).contains(x) => 23,
            Value::Int32(_) => 11,
            Value::UInt32(_) => 12,
            Value::Int64(0) => 15,
            Value::Int64(1) => 16,
            Value::Int64(_) => 3,
            Value::UInt64(_) => 4,
            Value::Float(_) => 19,
            Value::Double(x) if x.to_bits() == 0f64.to_bits() => 17,
            Value::Double(x) if x.to_bits() == 1f64.to_bits() => 18,
            Value::Double(_) => 5,
            Value::String(_) => 6,
            Value::Blob(_) => 7,
            Value::Array(_) => 8,
            Value::Object(_) => 9,
            Value::TypedArray { items, .. } => {
                let short = items.len() <= 255;
                match self.opts.typed_arrays {
                    TypedArrayMode::Auxiliary if short && self.opts.version == 5 && self.active == 0 => 25,
                    TypedArrayMode::ByteLength | TypedArrayMode::Auxiliary if short => 24,
                    _ => 10,
                }
            }
        }
    }

    fn write_node(&mut self, v: &Value) {
        let t = self.node_type(v);
        self.write_type(t);
        self.write_payload(t, v);
    }

    fn write_array_count(&mut self, n: usize) {
        if self.opts.version == 5 {
            self.array_lengths.extend_from_slice(&(n as i32).to_le_bytes());
        } else {
            self.lane().b4.extend_from_slice(&(n as i32).to_le_bytes());
        }
    }

    fn write_object_count(&mut self, n: usize) {
        if self.opts.version == 5 {
            self.object_lengths.extend_from_slice(&(n as i32).to_le_bytes());
        } else {
            self.lane().b4.extend_from_slice(&(n as i32).to_le_bytes());
        }
    }

    fn write_payload(&mut self, t: u8, v: &Value) {
        let two_byte_lane = self.opts.version >= 4;
        match (t, v) {
            (1, Value::Null) | (13..=18, _) => {}
            (2, Value::Bool(b)) => self.lane().b1.push(*b as u8),
            (3, Value::Int64(x)) => self.lane().b8.extend_from_slice(&x.to_le_bytes()),
            (4, Value::UInt64(x)) => self.lane().b8.extend_from_slice(&x.to_le_bytes()),
            (5, Value::Double(x)) => self.lane().b8.extend_from_slice(&x.to_le_bytes()),
            (11, Value::Int32(x)) => self.lane().b4.extend_from_slice(&x.to_le_bytes()),
            (12, Value::UInt32(x)) => self.lane().b4.extend_from_slice(&x.to_le_bytes()),
            (19, Value::Float(x)) => self.lane().b4.extend_from_slice(&x.to_le_bytes()),
            (20, Value::Int16(x)) if two_byte_lane => self.lane().b2.extend_from_slice(&x.to_le_bytes()),
            (21, Value::UInt16(x)) if two_byte_lane => self.lane().b2.extend_from_slice(&x.to_le_bytes()),
            (23, Value::Int32(x)) => self.lane().b1.push(*x as i8 as u8),
            (6, Value::String(text)) => {
                let i = self.string(text);
                self.lane().b4.extend_from_slice(&i.to_le_bytes());
            }
            (7, Value::Blob(bytes)) => {
                if self.opts.version == 1 {
                    self.lane().b4.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    self.lane().b1.extend_from_slice(bytes);
                } else {
                    self.blob_lengths.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    self.blob_count += 1;
                    self.blob_data.extend_from_slice(bytes);
                }
            }
            (8, Value::Array(items)) => {
                self.write_array_count(items.len());
                for item in items {
                    self.write_node(item);
                }
            }
            (9, Value::Object(map)) => {
                self.write_object_count(map.len());
                for (key, value) in map {
                    let i = self.string(key);
                    self.lane().b4.extend_from_slice(&i.to_le_bytes());
                    self.write_node(value);
                }
            }
            (10, Value::TypedArray { kind, items }) => {
                self.write_array_count(items.len());
                self.write_typed(*kind, items);
            }
            (24, Value::TypedArray { kind, items }) => {
                self.lane().b1.push(items.len() as u8);
                self.write_typed(*kind, items);
            }
            (25, Value::TypedArray { kind, items }) => {
                self.lane().b1.push(items.len() as u8);
                self.active = 1;
                self.write_typed(*kind, items);
                self.active = 0;
            }
            (t, v) => panic!("cannot encode {:?} as node type {} in version {}", v.kind(), t, self.opts.version),
        }
    }

    fn write_typed(&mut self, kind: ValueKind, items: &[Value]) {
        let sub = match kind {
            ValueKind::Null => 1,
            ValueKind::Bool => 2,
            ValueKind::Int16 => 20,
            ValueKind::Int32 => 11,
            ValueKind::Int64 => 3,
            ValueKind::UInt16 => 21,
            ValueKind::UInt32 => 12,
            ValueKind::UInt64 => 4,
            ValueKind::Float => 19,
            ValueKind::Double => 5,
            ValueKind::String => 6,
            ValueKind::Blob => 7,
            ValueKind::Array => 8,
            ValueKind::TypedArray => 10,
            ValueKind::Object => 9,
        };
        self.write_type(sub);
        for item in items {
            self.write_payload(sub, item);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        let version = self.opts.version;
        let method = self.opts.method;
        assert!(version >= 4 || self.lanes[0].b2.is_empty(), "2-byte lane needs version 4");

        // string table leads the 1-byte lane, its count leads the 4-byte lane
        let mut string_bytes = Vec::new();
        for text in &self.strings {
            string_bytes.extend_from_slice(text.as_bytes());
            string_bytes.push(0);
        }
        let main_lanes = std::mem::take(&mut self.lanes[0]);
        let mut b1 = string_bytes.clone();
        b1.extend_from_slice(&main_lanes.b1);
        let mut b4 = (self.strings.len() as i32).to_le_bytes().to_vec();
        b4.extend_from_slice(&main_lanes.b4);
        let lanes = Lanes { b1, b2: main_lanes.b2, b4, b8: main_lanes.b8 };
        let counts = lanes.counts();

        // LZ4 blobs are stored as independent frames
        let lz4_blobs = method == CompressionMethod::Lz4 && !self.blob_data.is_empty();
        let mut frame_table = Vec::new();
        let mut blob_frames = Vec::new();
        if lz4_blobs {
            for chunk in self.blob_data.chunks(self.opts.frame_size) {
                let c = lz4_flex::block::compress(chunk);
                frame_table.extend_from_slice(&(c.len() as u16).to_le_bytes());
                blob_frames.extend_from_slice(&c);
            }
        }

        let mut main = lanes.bytes();
        if version == 5 {
            main.extend_from_slice(&self.object_lengths);
            main.extend_from_slice(&self.array_lengths);
            main.extend_from_slice(&self.blob_lengths);
            main.extend_from_slice(&self.types);
        } else {
            main.extend_from_slice(&self.types);
            main.extend_from_slice(&self.blob_lengths);
        }
        main.extend_from_slice(&0xFFEE_DD00u32.to_le_bytes());
        main.extend_from_slice(&frame_table);

        let zstd_blobs = method == CompressionMethod::Zstd && !self.blob_data.is_empty();
        let blob_section = match method {
            CompressionMethod::None => self.blob_data.clone(),
            CompressionMethod::Lz4 => blob_frames,
            CompressionMethod::Zstd => Vec::new(),
        };

        let mut out = magic_for_version(version).to_le_bytes().to_vec();
        out.extend_from_slice(&[0x5A; 16]);
        let method_id: u32 = match method {
            CompressionMethod::None => 0,
            CompressionMethod::Lz4 => 1,
            CompressionMethod::Zstd => 2,
        };
        out.extend_from_slice(&method_id.to_le_bytes());
        let i32s = |out: &mut Vec<u8>, values: &[usize]| {
            for &v in values {
                out.extend_from_slice(&(v as i32).to_le_bytes());
            }
        };

        match version {
            1 => {
                let compressed = compress(method, &main, &[]);
                i32s(&mut out, &[counts[0], counts[2], counts[3], main.len()]);
                out.extend_from_slice(&compressed);
            }
            2..=4 => {
                let packed_blobs: &[u8] = if zstd_blobs { &self.blob_data } else { &[] };
                let compressed = compress(method, &main, packed_blobs);
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&(self.opts.frame_size as u16).to_le_bytes());
                i32s(&mut out, &[counts[0], counts[2], counts[3], string_bytes.len() + self.types.len()]);
                out.extend_from_slice(&(self.object_lengths.len() as u16).to_le_bytes());
                out.extend_from_slice(&(self.array_lengths.len() as u16).to_le_bytes());
                i32s(&mut out, &[main.len(), compressed.len(), self.blob_count, self.blob_data.len()]);
                if version == 4 {
                    i32s(&mut out, &[counts[1], blob_section.len()]);
                }
                out.extend_from_slice(&compressed);
                out.extend_from_slice(&blob_section);
            }
            _ => {
                let aux = std::mem::take(&mut self.lanes[1]);
                let aux_counts = aux.counts();
                let aux_bytes = aux.bytes();
                let packed_blobs: &[u8] = if zstd_blobs { &self.blob_data } else { &[] };
                let main_compressed = compress(method, &main, &[]);
                let aux_compressed = compress(method, &aux_bytes, packed_blobs);

                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&(self.opts.frame_size as u16).to_le_bytes());
                i32s(&mut out, &counts);
                i32s(
                    &mut out,
                    &[
                        self.types.len(),
                        self.object_lengths.len() / 4,
                        self.array_lengths.len() / 4,
                        self.blob_count,
                        self.blob_data.len(),
                        blob_section.len(),
                        main.len(),
                        main_compressed.len(),
                    ],
                );
                i32s(&mut out, &aux_counts);
                i32s(&mut out, &[aux_bytes.len(), aux_compressed.len()]);
                out.extend_from_slice(&main_compressed);
                out.extend_from_slice(&aux_compressed);
                out.extend_from_slice(&blob_section);
            }
        }
        out
    }
}

/// Compress `data` followed by `trailing` as one region.
fn compress(method: CompressionMethod, data: &[u8], trailing: &[u8]) -> Vec<u8> {
    let mut joined = data.to_vec();
    joined.extend_from_slice(trailing);
    if joined.is_empty() {
        return joined;
    }
    match method {
        CompressionMethod::None => joined,
        CompressionMethod::Lz4 => lz4_flex::block::compress(&joined),
        CompressionMethod::Zstd => zstd::stream::encode_all(&joined[..], 3).expect("zstd encode"),
    }
}

// ============================================================================
// Vertex stream encoder
// ============================================================================

#[inline]
fn zigzag8(v: u8) -> u8 {
    (v << 1) ^ ((v as i8 >> 7) as u8)
}

/// Encode interleaved vertices with the vertex codec.
pub fn encode_vertex_buffer(vertices: &[u8], stride: usize) -> Vec<u8> {
    assert_eq!(vertices.len() % stride, 0);
    let mut out = vec![VERTEX_HEADER];

    let first: Vec<u8> = vertices.get(..stride).map_or(vec![0; stride], <[u8]>::to_vec);
    let mut last_vertex = first.clone();

    let block_size = vertex_block_size(stride);
    for block in vertices.chunks(block_size * stride) {
        encode_vertex_block(&mut out, block, stride, &mut last_vertex);
    }

    // tail: padding, then the seed vertex
    out.extend(std::iter::repeat(0).take(vertex_tail_size(stride) - stride));
    out.extend_from_slice(&first);
    out
}

fn encode_vertex_block(out: &mut Vec<u8>, block: &[u8], stride: usize, last_vertex: &mut [u8]) {
    let count = block.len() / stride;
    let count_aligned = (count + 15) & !15;

    for k in 0..stride {
        let mut column = vec![0u8; count_aligned];
        let mut p = last_vertex[k];
        for i in 0..count {
            let v = block[i * stride + k];
            column[i] = zigzag8(v.wrapping_sub(p));
            p = v;
        }
        encode_bytes(out, &column);
    }

    last_vertex.copy_from_slice(&block[(count - 1) * stride..]);
}

fn encode_bytes(out: &mut Vec<u8>, column: &[u8]) {
    let groups = column.len() / 16;
    let header_at = out.len();
    out.extend(std::iter::repeat(0).take(groups.div_ceil(4)));

    for (g, group) in column.chunks(16).enumerate() {
        let size = |bits: usize| -> Option<usize> {
            match bits {
                0 => group.iter().all(|&v| v == 0).then_some(0),
                8 => Some(16),
                _ => {
                    let escape = (1u8 << bits) - 1;
                    Some(16 * bits / 8 + group.iter().filter(|&&v| v >= escape).count())
                }
            }
        };
        let (selector, bits) = [(0u8, 0usize), (1, 2), (2, 4), (3, 8)]
            .into_iter()
            .filter_map(|(sel, bits)| size(bits).map(|n| (n, sel, bits)))
            .min_by_key(|&(n, sel, _)| (n, sel))
            .map(|(_, sel, bits)| (sel, bits))
            .expect("8-bit groups always fit");

        out[header_at + g / 4] |= selector << ((g % 4) * 2);

        match bits {
            0 => {}
            8 => out.extend_from_slice(group),
            _ => {
                let escape = (1u8 << bits) - 1;
                let per_byte = 8 / bits;
                let mut packed = vec![0u8; 16 * bits / 8];
                let mut literals = Vec::new();
                for (i, &v) in group.iter().enumerate() {
                    let code = if v >= escape {
                        literals.push(v);
                        escape
                    } else {
                        v
                    };
                    let shift = 8 - bits * (i % per_byte + 1);
                    packed[i / per_byte] |= code << shift;
                }
                out.extend_from_slice(&packed);
                out.extend_from_slice(&literals);
            }
        }
    }
}

// ============================================================================
// Index stream encoder
// ============================================================================

pub const CODE_AUX_TABLE: [u8; 16] = [
    0x00, 0x76, 0x87, 0x56, 0x67, 0x78, 0xa9, 0x86, 0x65, 0x89, 0x68, 0x98, 0x01, 0x69, 0, 0,
];

const TRIANGLE_ORDER: [[usize; 3]; 3] = [[0, 1, 2], [1, 2, 0], [2, 0, 1]];

struct IndexEncoder {
    edge_fifo: [[u32; 2]; 16],
    edge_offset: usize,
    vertex_fifo: [u32; 16],
    vertex_offset: usize,
}

impl IndexEncoder {
    fn find_edge(&self, a: u32, b: u32, c: u32) -> Option<(usize, usize)> {
        (0..16).find_map(|i| {
            let [e0, e1] = self.edge_fifo[(self.edge_offset.wrapping_sub(1 + i)) & 15];
            if e0 == a && e1 == b {
                Some((i, 0))
            } else if e0 == b && e1 == c {
                Some((i, 1))
            } else if e0 == c && e1 == a {
                Some((i, 2))
            } else {
                None
            }
        })
    }

    fn find_vertex(&self, v: u32) -> Option<usize> {
        (0..16).find(|&i| self.vertex_fifo[(self.vertex_offset.wrapping_sub(1 + i)) & 15] == v)
    }

    fn push_edge(&mut self, a: u32, b: u32) {
        self.edge_fifo[self.edge_offset] = [a, b];
        self.edge_offset = (self.edge_offset + 1) & 15;
    }

    fn push_vertex(&mut self, v: u32) {
        self.vertex_fifo[self.vertex_offset] = v;
        self.vertex_offset = (self.vertex_offset + 1) & 15;
    }
}

fn encode_vbyte(data: &mut Vec<u8>, mut v: u32) {
    loop {
        data.push((v & 127) as u8 | if v > 127 { 128 } else { 0 });
        v >>= 7;
        if v == 0 {
            break;
        }
    }
}

fn encode_delta(data: &mut Vec<u8>, index: u32, last: u32) {
    let d = index.wrapping_sub(last);
    encode_vbyte(data, (d << 1) ^ ((d as i32 >> 31) as u32));
}

/// Encode a triangle list with the version 1 index codec. Triangles may
/// come back rotated; winding is preserved.
pub fn encode_index_buffer(indices: &[u32]) -> Vec<u8> {
    assert_eq!(indices.len() % 3, 0);
    let mut st = IndexEncoder {
        edge_fifo: [[u32::MAX; 2]; 16],
        edge_offset: 0,
        vertex_fifo: [u32::MAX; 16],
        vertex_offset: 0,
    };
    let mut codes = Vec::new();
    let mut data = Vec::new();
    let mut next = 0u32;
    let mut last = 0u32;
    let fec_max = 13;

    for tri in indices.chunks(3) {
        match st.find_edge(tri[0], tri[1], tri[2]) {
            Some((fe, rot)) if fe < 15 => {
                let order = TRIANGLE_ORDER[rot];
                let (a, b, c) = (tri[order[0]], tri[order[1]], tri[order[2]]);

                let fc = st.find_vertex(c);
                let mut fec = match fc {
                    Some(f) if f >= 1 && f < fec_max => f,
                    _ if c == next => {
                        next += 1;
                        0
                    }
                    _ => 15,
                };
                if fec == 15 {
                    if c.wrapping_add(1) == last {
                        fec = 13;
                        last = c;
                    }
                    if c == last.wrapping_add(1) {
                        fec = 14;
                        last = c;
                    }
                }

                codes.push(((fe << 4) | fec) as u8);
                if fec == 15 {
                    encode_delta(&mut data, c, last);
                    last = c;
                }
                if fec == 0 || fec >= fec_max {
                    st.push_vertex(c);
                }
                st.push_edge(c, b);
                st.push_edge(a, c);
            }
            _ => {
                let rot = if tri[1] == next {
                    1
                } else if tri[2] == next {
                    2
                } else {
                    0
                };
                let order = TRIANGLE_ORDER[rot];
                let (a, b, c) = (tri[order[0]], tri[order[1]], tri[order[2]]);

                let mut reset = false;
                if a == 0 && b == 1 && c == 2 && next > 0 {
                    reset = true;
                    next = 0;
                    st.vertex_fifo = [u32::MAX; 16];
                }

                let fb = st.find_vertex(b);
                let fc = st.find_vertex(c);

                let fea = if a == next {
                    next += 1;
                    0
                } else {
                    15
                };
                let feb = match fb {
                    Some(f) if f < 14 => f + 1,
                    _ if b == next => {
                        next += 1;
                        0
                    }
                    _ => 15,
                };
                let fec = match fc {
                    Some(f) if f < 14 => f + 1,
                    _ if c == next => {
                        next += 1;
                        0
                    }
                    _ => 15,
                };

                let code_aux = ((feb << 4) | fec) as u8;
                let table_index = CODE_AUX_TABLE.iter().position(|&x| x == code_aux);
                match table_index {
                    Some(i) if fea == 0 && i < 14 && !reset => codes.push(0xF0 | i as u8),
                    _ => {
                        codes.push(0xF0 | 14 | fea as u8);
                        data.push(code_aux);
                    }
                }

                if fea == 15 {
                    encode_delta(&mut data, a, last);
                    last = a;
                }
                if feb == 15 {
                    encode_delta(&mut data, b, last);
                    last = b;
                }
                if fec == 15 {
                    encode_delta(&mut data, c, last);
                    last = c;
                }

                if fea == 0 || fea == 15 {
                    st.push_vertex(a);
                }
                if feb == 0 || feb == 15 {
                    st.push_vertex(b);
                }
                if fec == 0 || fec == 15 {
                    st.push_vertex(c);
                }
                st.push_edge(b, a);
                st.push_edge(c, b);
                st.push_edge(a, c);
            }
        }
    }

    let mut out = vec![INDEX_HEADER | 1];
    out.extend_from_slice(&codes);
    out.extend_from_slice(&data);
    out.extend_from_slice(&CODE_AUX_TABLE);
    out
}

/// Encode an index sequence with two delta baselines.
pub fn encode_index_sequence(indices: &[u32]) -> Vec<u8> {
    let mut out = vec![INDEX_SEQUENCE_HEADER | 1];
    let mut last = [0u32; 2];
    let mut current = 0usize;

    for &index in indices {
        let cd = index.wrapping_sub(last[current]) as i32;
        if cd.unsigned_abs() >= 30 {
            current ^= 1;
        }
        let d = index.wrapping_sub(last[current]);
        let v = (d << 1) ^ ((d as i32 >> 31) as u32);
        encode_vbyte(&mut out, (v << 1) | current as u32);
        last[current] = index;
    }

    out.extend_from_slice(&[0; 4]);
    out
}

/// Rotate every triangle so its smallest index comes first.
pub fn canonical_triangles(indices: &[u32]) -> Vec<[u32; 3]> {
    indices
        .chunks(3)
        .map(|t| {
            let m = (0..3).min_by_key(|&i| t[i]).unwrap_or(0);
            [t[m], t[(m + 1) % 3], t[(m + 2) % 3]]
        })
        .collect()
}

// ============================================================================
// Animation payload builders
// ============================================================================

/// A KV3 quantization range object.
pub fn range(start: f32, length: f32) -> Value {
    obj(&[("m_flRangeStart", Value::Float(start)), ("m_flRangeLength", Value::Float(length))])
}

/// Track settings with dynamic translation in [-1, 1] and static unit scale.
pub fn track(rotation_static: bool, constant: [f32; 4]) -> Value {
    obj(&[
        ("m_translationRangeX", range(-1.0, 2.0)),
        ("m_translationRangeY", range(-1.0, 2.0)),
        ("m_translationRangeZ", range(-1.0, 2.0)),
        ("m_scaleRange", range(1.0, 0.0)),
        ("m_constantRotation", floats(&constant)),
        ("m_bIsRotationStatic", Value::Bool(rotation_static)),
        ("m_bIsTranslationStatic", Value::Bool(false)),
        ("m_bIsScaleStatic", Value::Bool(true)),
    ])
}

/// Quantize a unit quaternion into the three pose words, dropping the
/// largest component.
pub fn encode_pose_quaternion(q: [f32; 4]) -> [u16; 3] {
    let inv = std::f32::consts::FRAC_1_SQRT_2;
    let largest = (0..4)
        .max_by(|&a, &b| q[a].abs().total_cmp(&q[b].abs()))
        .unwrap_or(3);
    let sign = if q[largest] < 0.0 { -1.0 } else { 1.0 };
    let rest: Vec<f32> = (0..4).filter(|&i| i != largest).map(|i| q[i] * sign).collect();
    let quant = |v: f32, max: u16| (((v + inv) / (2.0 * inv)).clamp(0.0, 1.0) * max as f32).round() as u16;

    let a = quant(rest[0], 0x7FFF) | (((largest >> 1) as u16) << 15);
    let b = quant(rest[1], 0x7FFF) | (((largest & 1) as u16) << 15);
    let c = quant(rest[2], 0xFFFF);
    [a, b, c]
}

/// Quantize `v` into a 16-bit range word.
pub fn encode_range(v: f32, start: f32, length: f32) -> u16 {
    (((v - start) / length).clamp(0.0, 1.0) * 65535.0).round() as u16
}

pub fn u16_bytes(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Skeleton root with `n` bones in a chain, bone `i` at `(i, 0, 0)`.
pub fn chain_skeleton(n: usize) -> Value {
    let names: Vec<String> = (0..n).map(|i| format!("bone{}", i)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let parents: Vec<i32> = (0..n as i32).map(|i| i - 1).collect();
    let positions = Value::Array((0..n).map(|i| floats(&[i as f32, 0.0, 0.0])).collect());
    obj(&[
        ("m_boneName", strs(&name_refs)),
        ("m_nParent", ints(&parents)),
        ("m_bonePosParent", positions),
    ])
}

/// A legacy segment container.
pub fn segment_container(decoder: i16, elements: &[i16], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&decoder.to_le_bytes());
    out.extend_from_slice(&(elements.len() as i16).to_le_bytes());
    out.extend_from_slice(&((6 + elements.len() * 2 + payload.len()) as i16).to_le_bytes());
    for e in elements {
        out.extend_from_slice(&e.to_le_bytes());
    }
    out.extend_from_slice(payload);
    out
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Install a test log subscriber once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
