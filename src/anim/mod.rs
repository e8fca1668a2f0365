//! Skeletal animation decoding.
//!
//! Two payload shapes are supported:
//! - [`FlatClip`] - one compressed pose record per frame, with per-bone
//!   quantization ranges and static flags
//! - legacy segmented data - frame blocks of [`Segment`]s decoded through a
//!   named decoder table and a [`ChannelTable`] that maps elements to bones
//!
//! Both produce [`Animation`]s with one local [`BoneTransform`] per skeleton
//! bone per frame. Anything a clip does not animate keeps the skeleton's bind
//! pose.
//!
//! Problems that do not stop decoding are returned as [`Diagnostic`]s next
//! to the result instead of being raised as errors.

mod channel;
mod clip;
mod legacy;
mod quantize;
mod set;
mod skeleton;

pub use channel::{Attribute, Channel, ChannelRemap, ChannelTable, LoadContext, RemapTier};
pub use clip::{FlatClip, QuantRange, TrackSettings};
pub use legacy::{
    decode_legacy_clip, ChannelBindings, Decoder, DecoderKind, FrameBlock, LegacyClip,
    LegacyTables, Segment,
};
pub use quantize::{decode_pose_quaternion, decode_segment_quaternion, dequantize_range};
pub use set::decode_animation_set;
pub use skeleton::{Bone, Skeleton};

use std::fmt;

use crate::util::{Quat, Vec3};

/// Local transform of one bone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self { position: Vec3::ZERO, rotation: Quat::IDENTITY, scale: 1.0 }
    }
}

/// All bone transforms of one frame, indexed like the skeleton.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub bones: Vec<BoneTransform>,
}

/// A decoded clip.
#[derive(Clone, Debug, PartialEq)]
pub struct Animation {
    pub name: String,
    pub fps: f32,
    pub looping: bool,
    /// Additive clip, applied on top of another pose.
    pub delta: bool,
    pub frames: Vec<Frame>,
}

/// A non-fatal problem found while decoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// The pose offset table was missing or had the wrong length; every
    /// frame was decoded from offset 0.
    MissingPoseOffsets {
        clip: String,
        expected: usize,
        found: Option<usize>,
    },
    /// A channel was mapped to bones by element order alone.
    UnverifiedChannelMapping { channel: String, mapped: usize },
    /// A clip failed to decode and was left out of the result.
    ClipSkipped { clip: String, error: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPoseOffsets { clip, expected, found: Some(found) } => write!(
                f,
                "clip {}: pose offset table has {} entries, expected {}; using offset 0",
                clip, found, expected
            ),
            Self::MissingPoseOffsets { clip, .. } => {
                write!(f, "clip {}: no pose offset table; using offset 0", clip)
            }
            Self::UnverifiedChannelMapping { channel, mapped } => write!(
                f,
                "channel {}: {} elements mapped to bones by declaration order",
                channel, mapped
            ),
            Self::ClipSkipped { clip, error } => write!(f, "clip {} skipped: {}", clip, error),
        }
    }
}

/// A decoded value plus the diagnostics raised while producing it.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Decoded<T> {
    pub fn new(value: T) -> Self {
        Self { value, diagnostics: Vec::new() }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Animation decoding options.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Decode clips on the rayon thread pool.
    pub parallel: bool,
    /// Clips declaring more frames are skipped.
    pub max_frames: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { parallel: false, max_frames: 1 << 20 }
    }
}
