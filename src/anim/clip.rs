//! Flat compressed pose clips.
//!
//! Each frame is one record in `m_compressedPoseData`, starting at the
//! frame's entry in `m_compressedPoseOffsets`. For every bone with a track,
//! the record holds only the non-static channels, in this order:
//!
//! ```text
//! rotation    3 x u16   quantized quaternion
//! translation 3 x u16   per-axis range
//! scale       1 x u16   range
//! ```

use tracing::{debug, instrument, warn};

use super::quantize::{decode_pose_quaternion, dequantize_range};
use super::skeleton::Skeleton;
use super::{Animation, BoneTransform, Decoded, Diagnostic, Frame};
use crate::core::ByteCursor;
use crate::kv3::Value;
use crate::util::{normalize_or_identity, Error, Quat, Result, Vec3};

/// Linear quantization range.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QuantRange {
    pub start: f32,
    pub length: f32,
}

impl QuantRange {
    fn from_value(v: &Value) -> Result<Self> {
        Ok(Self {
            start: v.require("m_flRangeStart")?.as_f32()?,
            length: v.require("m_flRangeLength")?.as_f32()?,
        })
    }

    #[inline]
    fn decode(self, v: u16) -> f32 {
        dequantize_range(v, self.start, self.length)
    }
}

/// Per-bone track compression settings.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSettings {
    pub translation_range: [QuantRange; 3],
    pub scale_range: QuantRange,
    pub constant_rotation: Quat,
    pub rotation_static: bool,
    pub translation_static: bool,
    pub scale_static: bool,
}

impl TrackSettings {
    pub fn from_value(v: &Value) -> Result<Self> {
        let flag = |key: &str| -> Result<bool> {
            v.get_non_null(key).map(Value::as_bool).transpose().map(|b| b.unwrap_or(false))
        };
        Ok(Self {
            translation_range: [
                QuantRange::from_value(v.require("m_translationRangeX")?)?,
                QuantRange::from_value(v.require("m_translationRangeY")?)?,
                QuantRange::from_value(v.require("m_translationRangeZ")?)?,
            ],
            scale_range: QuantRange::from_value(v.require("m_scaleRange")?)?,
            constant_rotation: normalize_or_identity(v.require("m_constantRotation")?.quat()?),
            rotation_static: flag("m_bIsRotationStatic")?,
            translation_static: flag("m_bIsTranslationStatic")?,
            scale_static: flag("m_bIsScaleStatic")?,
        })
    }

    /// Bytes this track contributes to each frame record.
    pub fn record_size(&self) -> usize {
        let mut size = 0;
        if !self.rotation_static {
            size += 6;
        }
        if !self.translation_static {
            size += 6;
        }
        if !self.scale_static {
            size += 2;
        }
        size
    }

    fn static_translation(&self) -> Vec3 {
        let [x, y, z] = self.translation_range;
        Vec3::new(x.start, y.start, z.start)
    }

    fn decode(&self, cur: &mut ByteCursor<'_>) -> Result<BoneTransform> {
        let rotation = if self.rotation_static {
            self.constant_rotation
        } else {
            decode_pose_quaternion([cur.read_u16()?, cur.read_u16()?, cur.read_u16()?])
        };

        let position = if self.translation_static {
            self.static_translation()
        } else {
            let [rx, ry, rz] = self.translation_range;
            Vec3::new(
                rx.decode(cur.read_u16()?),
                ry.decode(cur.read_u16()?),
                rz.decode(cur.read_u16()?),
            )
        };

        let scale = if self.scale_static {
            self.scale_range.start
        } else {
            self.scale_range.decode(cur.read_u16()?)
        };

        Ok(BoneTransform { position, rotation, scale })
    }
}

/// A clip stored as per-frame compressed pose records.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatClip {
    pub name: String,
    pub frame_count: usize,
    pub duration: f32,
    pub looping: bool,
    pub tracks: Vec<TrackSettings>,
    pub data: Vec<u8>,
    /// Start of each frame record, if the table was present.
    pub offsets: Option<Vec<usize>>,
}

impl FlatClip {
    pub fn from_value(v: &Value) -> Result<Self> {
        let tracks = v
            .require("m_trackCompressionSettings")?
            .as_array()?
            .iter()
            .map(TrackSettings::from_value)
            .collect::<Result<Vec<_>>>()?;

        let offsets = match v.get_non_null("m_compressedPoseOffsets") {
            Some(o) => Some(
                o.as_array()?
                    .iter()
                    .map(Value::as_usize)
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        Ok(Self {
            name: v.get_non_null("m_name").map(Value::as_str).transpose()?.unwrap_or("").to_string(),
            frame_count: v.require("m_nFrameCount")?.as_usize()?,
            duration: v.require("m_flDuration")?.as_f32()?,
            looping: v.get_non_null("m_bLooping").map(Value::as_bool).transpose()?.unwrap_or(false),
            tracks,
            data: v.require("m_compressedPoseData")?.as_blob()?.to_vec(),
            offsets,
        })
    }

    /// Frames per second, `frame_count / duration`; zero for a zero duration.
    pub fn fps(&self) -> f32 {
        if self.duration > 0.0 {
            self.frame_count as f32 / self.duration
        } else {
            0.0
        }
    }

    /// Decode every frame against `skeleton`.
    ///
    /// Bones without a track keep their bind pose. A missing or
    /// wrongly sized offset table decodes every frame from offset 0 and
    /// reports [`Diagnostic::MissingPoseOffsets`].
    #[instrument(skip_all, fields(clip = %self.name, frames = self.frame_count))]
    pub fn decode(&self, skeleton: &Skeleton) -> Result<Decoded<Animation>> {
        let mut diagnostics = Vec::new();

        let offsets = match &self.offsets {
            Some(o) if o.len() == self.frame_count => Some(o.as_slice()),
            other => {
                let found = other.as_ref().map(Vec::len);
                warn!(clip = %self.name, expected = self.frame_count, ?found, "pose offsets unusable, using offset 0");
                diagnostics.push(Diagnostic::MissingPoseOffsets {
                    clip: self.name.clone(),
                    expected: self.frame_count,
                    found,
                });
                None
            }
        };

        let bind = skeleton.bind_pose();
        let bone_count = skeleton.len().min(self.tracks.len());
        if self.tracks.len() != skeleton.len() {
            debug!(tracks = self.tracks.len(), bones = skeleton.len(), "track count differs from skeleton");
        }

        let mut frames = Vec::with_capacity(self.frame_count);
        for f in 0..self.frame_count {
            let start = offsets.map_or(0, |o| o[f]);
            let mut cur = ByteCursor::new(&self.data);
            cur.seek(start)?;

            let mut bones = bind.clone();
            for (bone, track) in bones.iter_mut().zip(&self.tracks).take(bone_count) {
                *bone = track.decode(&mut cur)?;
            }
            frames.push(Frame { bones });
        }

        let animation = Animation {
            name: self.name.clone(),
            fps: self.fps(),
            looping: self.looping,
            delta: false,
            frames,
        };
        Ok(Decoded { value: animation, diagnostics })
    }
}
