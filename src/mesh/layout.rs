//! Vertex layouts and mesh buffer descriptors.
//!
//! Compiled meshes describe each vertex and index buffer with a KV3 object:
//!
//! ```text
//! {
//!     m_nElementCount: 300,
//!     m_nElementSizeInBytes: 32,
//!     m_inputLayoutFields: [ { m_pSemanticName: "POSITION", m_nSemanticIndex: 0,
//!                              m_Format: 6, m_nOffset: 0 }, ... ],
//!     m_bMeshoptCompressed: true,
//!     m_bMeshoptIndexSequence: false,
//!     m_pData: <blob>,
//! }
//! ```

use bytemuck::pod_read_unaligned;
use half::f16;
use tracing::{debug, instrument};

use super::index::{decode_index_buffer, decode_index_sequence};
use super::vertex::decode_vertex_buffer;
use crate::kv3::Value;
use crate::util::{Error, Result, Vec2, Vec3};

/// Storage format of one vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float32x1,
    Float32x2,
    Float32x3,
    Float32x4,
    Float16x2,
    Float16x4,
    Unorm8x4,
    Uint8x4,
    Snorm16x2,
    Sint16x2,
}

impl AttributeFormat {
    /// Map a DXGI format code.
    pub fn from_dxgi(code: u32) -> Result<Self> {
        match code {
            2 => Ok(Self::Float32x4),
            6 => Ok(Self::Float32x3),
            10 => Ok(Self::Float16x4),
            16 => Ok(Self::Float32x2),
            28 => Ok(Self::Unorm8x4),
            30 => Ok(Self::Uint8x4),
            34 => Ok(Self::Float16x2),
            37 => Ok(Self::Snorm16x2),
            38 => Ok(Self::Sint16x2),
            41 => Ok(Self::Float32x1),
            _ => Err(Error::unsupported(format!("vertex attribute format {}", code))),
        }
    }

    /// Map a DXGI format name, with or without the `DXGI_FORMAT_` prefix.
    pub fn from_name(name: &str) -> Result<Self> {
        let name = name.strip_prefix("DXGI_FORMAT_").unwrap_or(name);
        match name {
            "R32G32B32A32_FLOAT" => Ok(Self::Float32x4),
            "R32G32B32_FLOAT" => Ok(Self::Float32x3),
            "R16G16B16A16_FLOAT" => Ok(Self::Float16x4),
            "R32G32_FLOAT" => Ok(Self::Float32x2),
            "R8G8B8A8_UNORM" => Ok(Self::Unorm8x4),
            "R8G8B8A8_UINT" => Ok(Self::Uint8x4),
            "R16G16_FLOAT" => Ok(Self::Float16x2),
            "R16G16_SNORM" => Ok(Self::Snorm16x2),
            "R16G16_SINT" => Ok(Self::Sint16x2),
            "R32_FLOAT" => Ok(Self::Float32x1),
            _ => Err(Error::unsupported(format!("vertex attribute format {}", name))),
        }
    }

    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::String(s) => Self::from_name(s),
            _ => Self::from_dxgi(v.as_u64()? as u32),
        }
    }

    /// Size of one attribute value in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Float32x1 | Self::Float16x2 | Self::Unorm8x4 | Self::Uint8x4 => 4,
            Self::Snorm16x2 | Self::Sint16x2 => 4,
            Self::Float32x2 | Self::Float16x4 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }

    /// Decode the leading components as floats, missing ones as zero.
    fn read(self, bytes: &[u8]) -> [f32; 4] {
        match self {
            Self::Float32x1 => [pod_read_unaligned::<f32>(bytes), 0.0, 0.0, 0.0],
            Self::Float32x2 => {
                let [x, y] = pod_read_unaligned::<[f32; 2]>(bytes);
                [x, y, 0.0, 0.0]
            }
            Self::Float32x3 => {
                let [x, y, z] = pod_read_unaligned::<[f32; 3]>(bytes);
                [x, y, z, 0.0]
            }
            Self::Float32x4 => pod_read_unaligned::<[f32; 4]>(bytes),
            Self::Float16x2 => {
                let [x, y] = pod_read_unaligned::<[f16; 2]>(bytes);
                [x.to_f32(), y.to_f32(), 0.0, 0.0]
            }
            Self::Float16x4 => pod_read_unaligned::<[f16; 4]>(bytes).map(f16::to_f32),
            Self::Unorm8x4 => pod_read_unaligned::<[u8; 4]>(bytes).map(|b| b as f32 / 255.0),
            Self::Uint8x4 => pod_read_unaligned::<[u8; 4]>(bytes).map(|b| b as f32),
            Self::Snorm16x2 => {
                let [x, y] = pod_read_unaligned::<[i16; 2]>(bytes);
                [(x as f32 / 32767.0).max(-1.0), (y as f32 / 32767.0).max(-1.0), 0.0, 0.0]
            }
            Self::Sint16x2 => {
                let [x, y] = pod_read_unaligned::<[i16; 2]>(bytes);
                [x as f32, y as f32, 0.0, 0.0]
            }
        }
    }
}

/// One attribute inside an interleaved vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexAttribute {
    /// Lowercase semantic name, e.g. `position`, `texcoord`.
    pub semantic: String,
    pub semantic_index: u32,
    pub format: AttributeFormat,
    pub offset: usize,
}

/// Interleaved vertex layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexLayout {
    pub stride: usize,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Parse `m_inputLayoutFields` for a vertex of `stride` bytes.
    ///
    /// Attributes that do not fit inside the stride are rejected.
    pub fn from_value(fields: &Value, stride: usize) -> Result<Self> {
        Self::from_fields(fields.as_array()?, stride)
    }

    fn from_fields(fields: &[Value], stride: usize) -> Result<Self> {
        let mut attributes = Vec::new();
        for field in fields {
            let semantic = field.require("m_pSemanticName")?.as_str()?.to_ascii_lowercase();
            let semantic_index = field
                .get_non_null("m_nSemanticIndex")
                .map(Value::as_u64)
                .transpose()?
                .unwrap_or(0) as u32;
            let format = AttributeFormat::from_value(field.require("m_Format")?)?;
            let offset = field.require("m_nOffset")?.as_usize()?;

            if offset + format.size() > stride {
                return Err(Error::invalid(format!(
                    "attribute {}{} at offset {} overruns stride {}",
                    semantic, semantic_index, offset, stride
                )));
            }
            attributes.push(VertexAttribute { semantic, semantic_index, format, offset });
        }
        Ok(Self { stride, attributes })
    }

    /// Find an attribute by semantic (case-insensitive) and index.
    pub fn attribute(&self, semantic: &str, index: u32) -> Option<&VertexAttribute> {
        self.attributes
            .iter()
            .find(|a| a.semantic.eq_ignore_ascii_case(semantic) && a.semantic_index == index)
    }

    fn read_components(&self, data: &[u8], semantic: &str, index: u32) -> Result<Vec<[f32; 4]>> {
        let attr = self
            .attribute(semantic, index)
            .ok_or_else(|| Error::MissingKey(format!("{}{}", semantic, index)))?;
        if self.stride == 0 || data.len() % self.stride != 0 {
            return Err(Error::SizeMismatch {
                what: "vertex buffer",
                expected: self.stride,
                actual: data.len(),
            });
        }
        let size = attr.format.size();
        Ok(data
            .chunks_exact(self.stride)
            .map(|vertex| attr.format.read(&vertex[attr.offset..attr.offset + size]))
            .collect())
    }

    /// Read an attribute of every vertex as `Vec3`.
    pub fn read_vec3(&self, data: &[u8], semantic: &str, index: u32) -> Result<Vec<Vec3>> {
        Ok(self
            .read_components(data, semantic, index)?
            .into_iter()
            .map(|[x, y, z, _]| Vec3::new(x, y, z))
            .collect())
    }

    /// Read an attribute of every vertex as `Vec2`.
    pub fn read_vec2(&self, data: &[u8], semantic: &str, index: u32) -> Result<Vec<Vec2>> {
        Ok(self
            .read_components(data, semantic, index)?
            .into_iter()
            .map(|[x, y, _, _]| Vec2::new(x, y))
            .collect())
    }
}

/// Decoded contents of one mesh buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum MeshBuffer {
    /// Interleaved vertices.
    Vertices {
        count: usize,
        layout: VertexLayout,
        data: Vec<u8>,
    },
    /// Indices widened to `u32`; `element_size` is the stored width.
    Indices { element_size: usize, indices: Vec<u32> },
}

impl MeshBuffer {
    /// Number of vertices or indices.
    pub fn len(&self) -> usize {
        match self {
            Self::Vertices { count, .. } => *count,
            Self::Indices { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a buffer descriptor.
///
/// A descriptor with a non-empty `m_inputLayoutFields` is a vertex buffer,
/// anything else an index buffer of 2 or 4 byte elements.
#[instrument(skip(desc))]
pub fn decode_mesh_buffer(desc: &Value) -> Result<MeshBuffer> {
    let count = desc.require("m_nElementCount")?.as_usize()?;
    let element_size = desc.require("m_nElementSizeInBytes")?.as_usize()?;
    let compressed = flag(desc, "m_bMeshoptCompressed")?;
    let sequence = flag(desc, "m_bMeshoptIndexSequence")?;
    let data = desc.require("m_pData")?.as_blob()?;

    let fields = desc
        .get_non_null("m_inputLayoutFields")
        .map(Value::as_array)
        .transpose()?
        .unwrap_or(&[]);

    debug!(count, element_size, compressed, sequence, len = data.len(), "mesh buffer");

    if !fields.is_empty() {
        let layout = VertexLayout::from_fields(fields, element_size)?;
        let data = if compressed {
            decode_vertex_buffer(count, element_size, data)?
        } else {
            expect_raw_size(data, count, element_size)?.to_vec()
        };
        return Ok(MeshBuffer::Vertices { count, layout, data });
    }

    if element_size != 2 && element_size != 4 {
        return Err(Error::invalid(format!("index size {} is not 2 or 4", element_size)));
    }
    let indices = if compressed && sequence {
        decode_index_sequence(count, data)?
    } else if compressed {
        decode_index_buffer(count, data)?
    } else {
        let raw = expect_raw_size(data, count, element_size)?;
        if element_size == 2 {
            raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]) as u32).collect()
        } else {
            raw.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
        }
    };

    if element_size == 2 {
        if let Some(&big) = indices.iter().find(|&&i| i > u16::MAX as u32) {
            return Err(Error::invalid(format!("index {} exceeds 16 bits", big)));
        }
    }
    Ok(MeshBuffer::Indices { element_size, indices })
}

fn flag(desc: &Value, key: &str) -> Result<bool> {
    desc.get_non_null(key).map(Value::as_bool).transpose().map(|b| b.unwrap_or(false))
}

fn expect_raw_size(data: &[u8], count: usize, element_size: usize) -> Result<&[u8]> {
    let expected = count
        .checked_mul(element_size)
        .ok_or_else(|| Error::invalid("buffer size overflows"))?;
    if data.len() != expected {
        return Err(Error::SizeMismatch { what: "raw mesh buffer", expected, actual: data.len() });
    }
    Ok(data)
}
