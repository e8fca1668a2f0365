//! Segmented legacy animation data.
//!
//! A legacy animation data block holds a decoder name table, a flat list of
//! segments and the clips. Each clip splits its frame range into frame
//! blocks; a block lists the segments active for its frames. A segment
//! container is laid out as:
//!
//! ```text
//! i16 decoder index
//! i16 element count (n)
//! i16 container size
//! i16 element ids[n]
//! payload
//! ```
//!
//! Animated decoders store `frames x n` values, frame-major; static
//! decoders store `n` values shared by every frame.

use smallvec::SmallVec;
use tracing::{debug, instrument, trace};

use super::channel::{Attribute, ChannelRemap};
use super::quantize::decode_segment_quaternion;
use super::skeleton::Skeleton;
use super::{Animation, BoneTransform, Frame};
use crate::core::ByteCursor;
use crate::kv3::Value;
use crate::util::{
    normalize_or_identity, read_f32, read_half3, read_quat, read_vec3, Error, Result, Vec3,
};

/// Value decoder named in `m_decoderArray`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    AnimQuaternion,
    StaticQuaternion,
    FullQuaternion,
    AnimVector3,
    StaticVector3,
    FullVector3,
    StaticFullVector3,
    DeltaVector3,
    FullFloat,
    StaticFloat,
}

impl DecoderKind {
    /// Classify a decoder name such as `CCompressedAnimQuaternion`.
    pub fn from_name(name: &str) -> Option<Self> {
        let has = |s: &str| name.contains(s);
        if has("Quaternion") {
            if has("Full") {
                Some(Self::FullQuaternion)
            } else if has("Static") {
                Some(Self::StaticQuaternion)
            } else if has("Anim") {
                Some(Self::AnimQuaternion)
            } else {
                None
            }
        } else if has("Vector3") {
            if has("StaticFull") {
                Some(Self::StaticFullVector3)
            } else if has("Delta") {
                Some(Self::DeltaVector3)
            } else if has("Full") {
                Some(Self::FullVector3)
            } else if has("Static") {
                Some(Self::StaticVector3)
            } else if has("Anim") {
                Some(Self::AnimVector3)
            } else {
                None
            }
        } else if has("Float") {
            if has("Full") {
                Some(Self::FullFloat)
            } else if has("Static") {
                Some(Self::StaticFloat)
            } else {
                None
            }
        } else {
            None
        }
    }

    /// Attribute the decoded values apply to.
    pub fn attribute(self) -> Attribute {
        match self {
            Self::AnimQuaternion | Self::StaticQuaternion | Self::FullQuaternion => Attribute::Angle,
            Self::FullFloat | Self::StaticFloat => Attribute::Scale,
            _ => Attribute::Position,
        }
    }

    /// Bytes per element per frame.
    pub fn element_size(self) -> usize {
        match self {
            Self::AnimQuaternion | Self::StaticQuaternion => 6,
            Self::FullQuaternion => 16,
            Self::AnimVector3 | Self::StaticVector3 | Self::DeltaVector3 => 6,
            Self::FullVector3 | Self::StaticFullVector3 => 12,
            Self::FullFloat | Self::StaticFloat => 4,
        }
    }

    /// Static decoders ignore the frame index.
    pub fn is_static(self) -> bool {
        matches!(
            self,
            Self::StaticQuaternion | Self::StaticVector3 | Self::StaticFullVector3 | Self::StaticFloat
        )
    }
}

/// Entry of the decoder table; unknown names fail only the clips using them.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoder {
    pub name: String,
    pub kind: Option<DecoderKind>,
}

/// One parsed segment container.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub local_channel: usize,
    pub decoder: usize,
    pub elements: SmallVec<[u16; 16]>,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Parse the container blob of a segment on `local_channel`.
    pub fn parse(local_channel: usize, container: &[u8]) -> Result<Self> {
        let mut cur = ByteCursor::new(container);
        let decoder = non_negative(cur.read_i16()?, "segment decoder index")?;
        let count = non_negative(cur.read_i16()?, "segment element count")?;
        // container size; the blob length is authoritative
        cur.read_i16()?;

        let mut elements = SmallVec::with_capacity(count);
        for _ in 0..count {
            elements.push(non_negative(cur.read_i16()?, "segment element id")? as u16);
        }

        Ok(Self { local_channel, decoder, elements, payload: cur.rest().to_vec() })
    }

    pub fn from_value(v: &Value) -> Result<Self> {
        let local_channel = v.require("m_nLocalChannel")?.as_usize()?;
        Self::parse(local_channel, v.require("m_container")?.as_blob()?)
    }

    /// Decode this segment's values for `frame` (relative to the frame
    /// block start) into `bones`.
    fn apply(
        &self,
        kind: DecoderKind,
        frame: usize,
        remap: &ChannelRemap,
        bones: &mut [BoneTransform],
    ) -> Result<()> {
        let n = self.elements.len();
        let size = kind.element_size();
        let mut cur = ByteCursor::new(&self.payload);

        // delta decoders lead with one float3 base per element
        let bases = if kind == DecoderKind::DeltaVector3 { Some(cur.take(n * 12)?) } else { None };
        if !kind.is_static() {
            cur.skip(frame * n * size)?;
        }

        for (i, &element) in self.elements.iter().enumerate() {
            let raw = cur.take(size)?;
            let Some(bone) = remap.bone(element as usize).and_then(|b| bones.get_mut(b)) else {
                trace!(element, "segment element not mapped to a bone");
                continue;
            };
            match kind {
                DecoderKind::AnimQuaternion | DecoderKind::StaticQuaternion => {
                    let mut bytes = [0u8; 6];
                    bytes.copy_from_slice(raw);
                    bone.rotation = decode_segment_quaternion(bytes);
                }
                DecoderKind::FullQuaternion => {
                    bone.rotation = normalize_or_identity(read_quat(raw));
                }
                DecoderKind::AnimVector3 | DecoderKind::StaticVector3 => {
                    bone.position = read_half3(raw);
                }
                DecoderKind::FullVector3 | DecoderKind::StaticFullVector3 => {
                    bone.position = read_vec3(raw);
                }
                DecoderKind::DeltaVector3 => {
                    let base = bases.map_or(Vec3::ZERO, |b| read_vec3(&b[i * 12..]));
                    bone.position = base + read_half3(raw);
                }
                DecoderKind::FullFloat | DecoderKind::StaticFloat => {
                    bone.scale = read_f32(raw);
                }
            }
        }
        Ok(())
    }
}

fn non_negative(v: i16, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::invalid(format!("negative {}: {}", what, v)))
}

/// Inclusive frame range with its active segments.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBlock {
    pub start: usize,
    pub end: usize,
    pub segments: Vec<usize>,
}

impl FrameBlock {
    pub fn from_value(v: &Value) -> Result<Self> {
        let start = v.require("m_nStartFrame")?.as_usize()?;
        let end = v.require("m_nEndFrame")?.as_usize()?;
        if end < start {
            return Err(Error::invalid(format!("frame block ends at {} before {}", end, start)));
        }
        let segments = v
            .require("m_segmentIndexArray")?
            .as_array()?
            .iter()
            .map(Value::as_usize)
            .collect::<Result<_>>()?;
        Ok(Self { start, end, segments })
    }

    #[inline]
    pub fn contains(&self, frame: usize) -> bool {
        (self.start..=self.end).contains(&frame)
    }
}

/// One entry of `m_animArray`.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyClip {
    pub name: String,
    pub fps: f32,
    pub looping: bool,
    pub delta: bool,
    pub frame_count: usize,
    pub blocks: Vec<FrameBlock>,
}

impl LegacyClip {
    pub fn from_value(v: &Value) -> Result<Self> {
        let flags = v.get_non_null("m_flags");
        let flag = |key: &str| -> Result<bool> {
            flags
                .and_then(|f| f.get_non_null(key))
                .map(Value::as_bool)
                .transpose()
                .map(|b| b.unwrap_or(false))
        };
        let data = v.require("m_pData")?;
        let blocks = data
            .get_non_null("m_frameblockArray")
            .map(|a| a.as_array()?.iter().map(FrameBlock::from_value).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            name: v.require("m_name")?.as_str()?.to_string(),
            fps: v.require("m_fps")?.as_f32()?,
            looping: flag("m_bLooping")?,
            delta: flag("m_bDelta")?,
            frame_count: data.require("m_nFrames")?.as_usize()?,
            blocks,
        })
    }
}

/// Decoder and segment tables shared by all clips of one data block.
#[derive(Debug, Default)]
pub struct LegacyTables {
    pub decoders: Vec<Decoder>,
    /// Parsed segments; malformed ones fail only the clips that use them.
    pub segments: Vec<Result<Segment>>,
}

impl LegacyTables {
    pub fn from_value(root: &Value) -> Result<Self> {
        let decoders = root
            .require("m_decoderArray")?
            .as_array()?
            .iter()
            .map(|d| {
                let name = d.require("m_szName")?.as_str()?.to_string();
                let kind = DecoderKind::from_name(&name);
                if kind.is_none() {
                    debug!(decoder = %name, "unsupported decoder");
                }
                Ok(Decoder { name, kind })
            })
            .collect::<Result<Vec<_>>>()?;

        let segments = root
            .require("m_segmentArray")?
            .as_array()?
            .iter()
            .map(Segment::from_value)
            .collect();

        Ok(Self { decoders, segments })
    }

    /// Element ids declared by the segments of `channel` whose decoder
    /// animates `attribute`.
    pub fn declared_elements(&self, channel: usize, attribute: Attribute) -> Vec<usize> {
        self.segments
            .iter()
            .filter_map(|s| s.as_ref().ok())
            .filter(|s| s.local_channel == channel)
            .filter(|s| {
                self.decoders
                    .get(s.decoder)
                    .and_then(|d| d.kind)
                    .is_some_and(|k| k.attribute() == attribute)
            })
            .flat_map(|s| s.elements.iter().map(|&e| e as usize))
            .collect()
    }

    fn segment(&self, index: usize) -> Result<&Segment> {
        match self.segments.get(index) {
            Some(Ok(segment)) => Ok(segment),
            Some(Err(e)) => Err(Error::invalid(format!("segment {} is malformed: {}", index, e))),
            None => Err(Error::invalid(format!(
                "segment index {} out of range ({} segments)",
                index,
                self.segments.len()
            ))),
        }
    }

    fn decoder_kind(&self, index: usize) -> Result<DecoderKind> {
        let decoder = self.decoders.get(index).ok_or_else(|| {
            Error::invalid(format!("decoder index {} out of range ({} decoders)", index, self.decoders.len()))
        })?;
        decoder.kind.ok_or_else(|| Error::unsupported(format!("animation decoder {}", decoder.name)))
    }
}

/// Resolved channels for one data block: attribute and remap per local channel.
pub type ChannelBindings = [Option<(Attribute, ChannelRemap)>];

/// Decode one clip. Bones no active segment touches keep the bind pose.
#[instrument(skip_all, fields(clip = %clip.name, frames = clip.frame_count))]
pub fn decode_legacy_clip(
    clip: &LegacyClip,
    tables: &LegacyTables,
    channels: &ChannelBindings,
    skeleton: &Skeleton,
) -> Result<Animation> {
    let bind = skeleton.bind_pose();
    let mut frames = Vec::with_capacity(clip.frame_count);

    for f in 0..clip.frame_count {
        let mut bones = bind.clone();
        for block in clip.blocks.iter().filter(|b| b.contains(f)) {
            let local = f - block.start;
            for &index in &block.segments {
                let segment = tables.segment(index)?;
                let channel = channels.get(segment.local_channel).ok_or_else(|| {
                    Error::invalid(format!("segment {} uses unknown channel {}", index, segment.local_channel))
                })?;
                // non-bone channels are skipped whatever their decoder
                let Some((attribute, remap)) = channel else {
                    continue;
                };
                let kind = tables.decoder_kind(segment.decoder)?;
                if *attribute != kind.attribute() {
                    trace!(segment = index, ?attribute, ?kind, "decoder does not match channel attribute");
                    continue;
                }
                segment.apply(kind, local, remap, &mut bones)?;
            }
        }
        frames.push(Frame { bones });
    }

    Ok(Animation {
        name: clip.name.clone(),
        fps: clip.fps,
        looping: clip.looping,
        delta: clip.delta,
        frames,
    })
}
