//! KV3 document decoding.
//!
//! Decoding happens in two phases: the payload is decompressed into one or
//! two physical buffers plus an optional blob buffer, then a [`NodeReader`]
//! walks the type-tag stream and pulls scalars from the byte lanes.

use tracing::{debug, instrument};

use super::format::*;
use super::header::Kv3Header;
use super::lanes::LaneSet;
use super::value::{Object, Value, ValueKind};
use crate::core::{
    decompress_block_stream, decompress_region, decompress_split, ByteCursor, CompressionMethod,
};
use crate::util::{Error, Result};

/// Limits applied while parsing untrusted input.
#[derive(Clone, Debug)]
pub struct ParseOptions {
    /// Maximum container nesting depth.
    pub max_depth: usize,
    /// Maximum total decompressed size declared by the header.
    pub max_uncompressed_size: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: 512,
            max_uncompressed_size: 256 * 1024 * 1024,
        }
    }
}

/// A parsed KV3 document.
#[derive(Clone, Debug)]
pub struct Document {
    pub version: u32,
    /// Format GUID from the header.
    pub format: [u8; FORMAT_GUID_SIZE],
    pub root: Value,
}

/// Parse a KV3 blob into its root value.
pub fn parse(bytes: &[u8]) -> Result<Value> {
    parse_document(bytes, &ParseOptions::default()).map(|doc| doc.root)
}

/// Parse a KV3 blob with explicit limits.
#[instrument(skip_all, fields(len = bytes.len()))]
pub fn parse_document(bytes: &[u8], options: &ParseOptions) -> Result<Document> {
    let mut cur = ByteCursor::new(bytes);
    let header = Kv3Header::read(&mut cur)?;

    if header.total_uncompressed() > options.max_uncompressed_size {
        return Err(Error::invalid(format!(
            "KV3 declares {} bytes, limit is {}",
            header.total_uncompressed(),
            options.max_uncompressed_size
        )));
    }

    let buffers = Buffers::decompress(&header, cur.rest())?;
    let root = decode_buffers(&header, &buffers, options)?;

    Ok(Document { version: header.version, format: header.format, root })
}

// ============================================================================
// Buffer decompression
// ============================================================================

/// Decompressed physical buffers of one document.
struct Buffers {
    main: Vec<u8>,
    aux: Option<Vec<u8>>,
    /// Compressed blob section, still to be expanded once the frame table
    /// in the main buffer is known.
    blob_source: BlobSource,
}

enum BlobSource {
    None,
    Decoded(Vec<u8>),
    Frames { start: usize, len: usize },
}

impl Buffers {
    fn decompress(header: &Kv3Header, payload: &[u8]) -> Result<Self> {
        let method = header.method;

        let Some(main_compressed) = header.buffer0.compressed else {
            // version 1: the whole remainder is the main buffer
            let main = decompress_region(method, payload, header.buffer0.uncompressed)?;
            return Ok(Self { main, aux: None, blob_source: BlobSource::None });
        };

        let mut input = ByteCursor::new(payload);
        let main_bytes = input.take(main_compressed)?;
        let aux_bytes = match header.buffer1 {
            Some(b) => Some((input.take(b.compressed.unwrap_or(0))?, b.uncompressed)),
            None => None,
        };

        // ZSTD packs the blob bytes into the last physical buffer
        let blob_in_last = method == CompressionMethod::Zstd && header.blob_total_size > 0;
        let blob_total = header.blob_total_size;

        let mut blob_source = BlobSource::None;
        let main;
        let mut aux = None;

        match aux_bytes {
            Some((bytes, size)) => {
                main = decompress_region(method, main_bytes, header.buffer0.uncompressed)?;
                if blob_in_last {
                    let (a, blobs) = decompress_split(method, bytes, size, blob_total)?;
                    aux = Some(a);
                    blob_source = BlobSource::Decoded(blobs);
                } else {
                    aux = Some(decompress_region(method, bytes, size)?);
                }
            }
            None if blob_in_last => {
                let (m, blobs) =
                    decompress_split(method, main_bytes, header.buffer0.uncompressed, blob_total)?;
                main = m;
                blob_source = BlobSource::Decoded(blobs);
            }
            None => {
                main = decompress_region(method, main_bytes, header.buffer0.uncompressed)?;
            }
        }

        if !blob_in_last && blob_total > 0 {
            let len = match (method, header.blob_compressed_size) {
                (CompressionMethod::None, _) => blob_total,
                (_, Some(len)) => len,
                (_, None) => input.remaining(),
            };
            let start = input.position();
            input.skip(len)?;
            blob_source = match method {
                CompressionMethod::None => {
                    BlobSource::Decoded(payload[start..start + len].to_vec())
                }
                _ => BlobSource::Frames { start, len },
            };
        }

        if input.remaining() != 0 {
            return Err(Error::invalid(format!(
                "{} unexpected bytes after KV3 payload",
                input.remaining()
            )));
        }

        let blob_source = match blob_source {
            BlobSource::Frames { start, len } => {
                // frame table sits at the tail of the main buffer
                let table = read_frame_table(header, &main)?;
                BlobSource::Decoded(decompress_block_stream(
                    method,
                    &table,
                    header.frame_size,
                    blob_total,
                    &payload[start..start + len],
                )?)
            }
            other => other,
        };

        Ok(Self { main, aux, blob_source })
    }

    fn blobs(&self) -> &[u8] {
        match &self.blob_source {
            BlobSource::Decoded(b) => b,
            _ => &[],
        }
    }
}

/// Read the u16 frame lengths stored after the trailer of the main buffer.
fn read_frame_table(header: &Kv3Header, main: &[u8]) -> Result<Vec<u16>> {
    let count = header.blob_frame_count();
    let table_len = count * 2;
    if main.len() < table_len {
        return Err(Error::UnexpectedEof { pos: 0, needed: table_len });
    }
    let mut cur = ByteCursor::new(&main[main.len() - table_len..]);
    (0..count).map(|_| cur.read_u16()).collect()
}

// ============================================================================
// Node decoding
// ============================================================================

fn decode_buffers(header: &Kv3Header, buffers: &Buffers, options: &ParseOptions) -> Result<Value> {
    let version = header.version;
    let mut main = ByteCursor::new(&buffers.main);
    let mut lanes = LaneSet::slice(&mut main, &header.lanes)?;

    // string table: count is the first 4-byte scalar, text leads the 1-byte lane
    let string_count = lanes.bytes4.read_len()?;
    let strings_start = lanes.bytes1.position();
    let mut strings = Vec::with_capacity(string_count.min(lanes.bytes1.remaining()));
    for _ in 0..string_count {
        strings.push(lanes.bytes1.read_cstr()?);
    }
    let string_bytes = lanes.bytes1.position() - strings_start;

    let frame_table_len = header.blob_frame_count() * 2;
    let mut tables = LengthTables::default();

    let types = if version >= VERSION_DUAL_BUFFER {
        tables.objects = Some(ByteCursor::new(main.take(header.object_count * 4)?));
        tables.arrays = Some(ByteCursor::new(main.take(header.array_count * 4)?));
        tables.blobs = Some(ByteCursor::new(main.take(header.blob_count * 4)?));
        main.take(header.types_size.unwrap_or(0))?
    } else {
        let blob_table_len = if header.has_blob_table() { header.blob_count * 4 } else { 0 };
        let types_len = main
            .remaining()
            .checked_sub(blob_table_len + 4 + frame_table_len)
            .ok_or(Error::UnexpectedEof { pos: main.position(), needed: blob_table_len + 4 })?;
        if let Some(declared) = header.strings_and_types_size {
            if declared != string_bytes + types_len {
                return Err(Error::SizeMismatch {
                    what: "KV3 strings and types",
                    expected: declared,
                    actual: string_bytes + types_len,
                });
            }
        }
        let types = main.take(types_len)?;
        if header.has_blob_table() {
            tables.blobs = Some(ByteCursor::new(main.take(blob_table_len)?));
        }
        types
    };

    let trailer = main.read_u32()?;
    if trailer != TRAILER {
        return Err(Error::invalid(format!("bad KV3 trailer 0x{:08X}", trailer)));
    }
    if main.remaining() != frame_table_len {
        return Err(Error::SizeMismatch {
            what: "KV3 main buffer tail",
            expected: frame_table_len,
            actual: main.remaining(),
        });
    }

    let aux = match &buffers.aux {
        Some(buf) => {
            let mut cur = ByteCursor::new(buf);
            let set = LaneSet::slice(&mut cur, &header.aux_lanes)?;
            if cur.remaining() != 0 {
                return Err(Error::invalid("trailing bytes in KV3 auxiliary buffer"));
            }
            Some(set)
        }
        None => None,
    };

    let mut reader = NodeReader {
        version,
        types: ByteCursor::new(types),
        lanes,
        aux,
        strings,
        tables,
        blobs: ByteCursor::new(buffers.blobs()),
        max_depth: options.max_depth,
    };

    let root_type = reader.read_type()?;
    let root = reader.read_value(root_type, 0)?;

    if reader.types.remaining() != 0 || reader.lanes.remaining() != 0 {
        debug!(
            types = reader.types.remaining(),
            lanes = reader.lanes.remaining(),
            "KV3 document left unread data"
        );
    }

    Ok(root)
}

/// Length tables of version 5 documents, plus the blob table of version 2+.
#[derive(Default)]
struct LengthTables<'a> {
    objects: Option<ByteCursor<'a>>,
    arrays: Option<ByteCursor<'a>>,
    blobs: Option<ByteCursor<'a>>,
}

/// Recursive-descent decoder over the type-tag stream.
struct NodeReader<'a> {
    version: u32,
    types: ByteCursor<'a>,
    lanes: LaneSet<'a>,
    /// Auxiliary lanes; `None` while they are swapped in.
    aux: Option<LaneSet<'a>>,
    strings: Vec<&'a str>,
    tables: LengthTables<'a>,
    blobs: ByteCursor<'a>,
    max_depth: usize,
}

impl<'a> NodeReader<'a> {
    fn read_type(&mut self) -> Result<NodeType> {
        let tag = self.types.read_u8()?;
        if tag & TYPE_FLAG_MARKER != 0 {
            // flag byte only annotates the value (resource name, entity name, ...)
            self.types.read_u8()?;
        }
        NodeType::from_u8(tag & TYPE_MASK)
    }

    fn read_string(&mut self) -> Result<String> {
        let index = self.lanes.bytes4.read_i32()?;
        if index == -1 {
            return Ok(String::new());
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(|s| s.to_string())
            .ok_or_else(|| Error::invalid(format!("string index {} out of range", index)))
    }

    fn read_object_len(&mut self) -> Result<usize> {
        match self.tables.objects.as_mut() {
            Some(table) => table.read_len(),
            None => self.lanes.bytes4.read_len(),
        }
    }

    fn read_array_len(&mut self) -> Result<usize> {
        match self.tables.arrays.as_mut() {
            Some(table) => table.read_len(),
            None => self.lanes.bytes4.read_len(),
        }
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        match self.tables.blobs.as_mut() {
            Some(table) => {
                let len = table.read_u32()? as usize;
                Ok(self.blobs.take(len)?.to_vec())
            }
            None if self.version < VERSION_BLOB_TABLE => {
                let len = self.lanes.bytes4.read_u32()? as usize;
                Ok(self.lanes.bytes1.take(len)?.to_vec())
            }
            None => Err(Error::invalid("KV3 blob without blob length table")),
        }
    }

    fn read_value(&mut self, node_type: NodeType, depth: usize) -> Result<Value> {
        if depth > self.max_depth {
            return Err(Error::invalid(format!("KV3 nesting deeper than {}", self.max_depth)));
        }

        Ok(match node_type {
            NodeType::Null => Value::Null,
            NodeType::Bool => Value::Bool(self.lanes.bytes1.read_u8()? != 0),
            NodeType::True => Value::Bool(true),
            NodeType::False => Value::Bool(false),
            NodeType::Int64 => Value::Int64(self.lanes.bytes8.read_i64()?),
            NodeType::Int64Zero => Value::Int64(0),
            NodeType::Int64One => Value::Int64(1),
            NodeType::UInt64 => Value::UInt64(self.lanes.bytes8.read_u64()?),
            NodeType::Double => Value::Double(self.lanes.bytes8.read_f64()?),
            NodeType::DoubleZero => Value::Double(0.0),
            NodeType::DoubleOne => Value::Double(1.0),
            NodeType::Float => Value::Float(self.lanes.bytes4.read_f32()?),
            NodeType::Int32 => Value::Int32(self.lanes.bytes4.read_i32()?),
            NodeType::UInt32 => Value::UInt32(self.lanes.bytes4.read_u32()?),
            NodeType::Int16 => Value::Int16(self.lanes.bytes2.read_i16()?),
            NodeType::UInt16 => Value::UInt16(self.lanes.bytes2.read_u16()?),
            NodeType::Int32AsByte => Value::Int32(self.lanes.bytes1.read_i8()? as i32),
            NodeType::String => Value::String(self.read_string()?),
            NodeType::Blob => Value::Blob(self.read_blob()?),
            NodeType::Array => {
                let count = self.read_array_len()?;
                let mut items = Vec::with_capacity(count.min(self.types.remaining()));
                for _ in 0..count {
                    let t = self.read_type()?;
                    items.push(self.read_value(t, depth + 1)?);
                }
                Value::Array(items)
            }
            NodeType::Object => Value::Object(self.read_object(depth)?),
            NodeType::TypedArray => {
                let count = self.read_array_len()?;
                self.read_typed_array(count, depth)?
            }
            NodeType::TypedArrayByteLength => {
                let count = self.lanes.bytes1.read_u8()? as usize;
                self.read_typed_array(count, depth)?
            }
            NodeType::TypedArrayAuxiliary => {
                let count = self.lanes.bytes1.read_u8()? as usize;
                let mut aux = self.aux.take().ok_or_else(|| {
                    Error::invalid("auxiliary typed array without auxiliary lanes")
                })?;
                std::mem::swap(&mut self.lanes, &mut aux);
                let result = self.read_typed_array(count, depth);
                std::mem::swap(&mut self.lanes, &mut aux);
                self.aux = Some(aux);
                result?
            }
        })
    }

    fn read_object(&mut self, depth: usize) -> Result<Object> {
        let count = self.read_object_len()?;
        let mut map = Object::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let t = self.read_type()?;
            let value = self.read_value(t, depth + 1)?;
            if map.insert(key.clone(), value).is_some() {
                return Err(Error::invalid(format!("duplicate KV3 key '{}'", key)));
            }
        }
        Ok(map)
    }

    fn read_typed_array(&mut self, count: usize, depth: usize) -> Result<Value> {
        let sub_type = self.read_type()?;
        let kind = element_kind(sub_type);
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(self.read_value(sub_type, depth + 1)?);
        }
        Ok(Value::TypedArray { kind, items })
    }
}

/// Kind of the values produced by a node type.
fn element_kind(node_type: NodeType) -> ValueKind {
    match node_type {
        NodeType::Null => ValueKind::Null,
        NodeType::Bool | NodeType::True | NodeType::False => ValueKind::Bool,
        NodeType::Int64 | NodeType::Int64Zero | NodeType::Int64One => ValueKind::Int64,
        NodeType::UInt64 => ValueKind::UInt64,
        NodeType::Double | NodeType::DoubleZero | NodeType::DoubleOne => ValueKind::Double,
        NodeType::Float => ValueKind::Float,
        NodeType::Int32 | NodeType::Int32AsByte => ValueKind::Int32,
        NodeType::UInt32 => ValueKind::UInt32,
        NodeType::Int16 => ValueKind::Int16,
        NodeType::UInt16 => ValueKind::UInt16,
        NodeType::String => ValueKind::String,
        NodeType::Blob => ValueKind::Blob,
        NodeType::Array => ValueKind::Array,
        NodeType::Object => ValueKind::Object,
        NodeType::TypedArray
        | NodeType::TypedArrayByteLength
        | NodeType::TypedArrayAuxiliary => ValueKind::TypedArray,
    }
}
