//! Mesh buffer decoding.
//!
//! - [`decode_vertex_buffer`] - meshoptimizer vertex codec (header `0xA0`)
//! - [`decode_index_buffer`] - meshoptimizer triangle index codec (header `0xE0`)
//! - [`decode_index_sequence`] - meshoptimizer index sequence codec (header `0xD0`)
//! - [`VertexLayout`] / [`decode_mesh_buffer`] - KV3 buffer descriptors

mod index;
mod layout;
mod vertex;

pub use index::{
    decode_index_buffer, decode_index_buffer_u16, decode_index_bytes, decode_index_sequence,
    INDEX_HEADER, INDEX_MAX_VERSION, INDEX_SEQUENCE_HEADER,
};
pub use layout::{decode_mesh_buffer, AttributeFormat, MeshBuffer, VertexAttribute, VertexLayout};
pub use vertex::{
    decode_vertex_buffer, vertex_block_size, vertex_tail_size, MAX_VERTEX_STRIDE,
    VERTEX_BLOCK_MAX_SIZE, VERTEX_HEADER,
};
