//! # s2model
//!
//! Decoders for compiled Source 2 model data: the binary KV3 object graph,
//! meshoptimizer-compressed vertex and index streams, and skeletal
//! animation tracks.
//!
//! All decoders are pure functions over in-memory byte slices. Locating the
//! data inside a resource container and building renderable assets from the
//! results is left to the caller.
//!
//! ## Modules
//!
//! - [`util`] - Errors and math helpers
//! - [`core`] - Byte cursor and buffer decompression (LZ4, ZSTD)
//! - [`kv3`] - KV3 versions 1 to 5 decoded to a [`kv3::Value`] tree
//! - [`mesh`] - Vertex and index stream codecs, vertex layouts
//! - [`anim`] - Skeletons, flat pose clips and legacy segmented animation
//!
//! ## Example
//!
//! ```ignore
//! use s2model::prelude::*;
//!
//! let root = kv3::parse(&model_data)?;
//! let skeleton = Skeleton::from_value(root.require("m_modelSkeleton")?)?;
//!
//! let mut context = LoadContext::new();
//! let set = decode_animation_set(&anim_root, &skeleton, &mut context, &DecodeOptions::default())?;
//! for diagnostic in &set.diagnostics {
//!     eprintln!("{}", diagnostic);
//! }
//! ```

pub mod util;
pub mod core;
pub mod kv3;
pub mod mesh;
pub mod anim;

// Re-export commonly used types
pub use util::{Error, ErrorKind, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::anim::{
        decode_animation_set, Animation, BoneTransform, DecodeOptions, Decoded, Diagnostic, Frame,
        LoadContext, Skeleton,
    };
    pub use crate::kv3::{self, ParseOptions, Value};
    pub use crate::mesh::{decode_index_buffer, decode_mesh_buffer, decode_vertex_buffer, VertexLayout};
    pub use crate::util::{Error, ErrorKind, Result};
}
