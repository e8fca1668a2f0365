//! Whole-asset animation decoding with per-clip isolation.

use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use super::channel::{ChannelTable, LoadContext};
use super::clip::FlatClip;
use super::legacy::{decode_legacy_clip, LegacyClip, LegacyTables};
use super::skeleton::Skeleton;
use super::{Animation, DecodeOptions, Decoded, Diagnostic};
use crate::kv3::Value;
use crate::util::{Error, Result};

/// Decode every clip of an animation data root.
///
/// Accepted shapes:
/// - a legacy data block with `m_animArray`, `m_decoderArray` and
///   `m_segmentArray`
/// - a single flat clip (an object with `m_compressedPoseData`)
/// - an array of flat clips
///
/// A clip that fails to decode is dropped and reported as
/// [`Diagnostic::ClipSkipped`]; the other clips are unaffected. Errors are
/// returned only when the shared tables themselves are unreadable.
#[instrument(skip_all)]
pub fn decode_animation_set(
    root: &Value,
    skeleton: &Skeleton,
    context: &mut LoadContext,
    options: &DecodeOptions,
) -> Result<Decoded<Vec<Animation>>> {
    if root.get("m_animArray").is_some() {
        decode_legacy_set(root, skeleton, context, options)
    } else if root.get("m_compressedPoseData").is_some() {
        Ok(decode_flat_set(std::slice::from_ref(root), skeleton, options))
    } else {
        match root {
            Value::Array(clips) => Ok(decode_flat_set(clips, skeleton, options)),
            _ => Err(Error::invalid("value is not an animation data block")),
        }
    }
}

fn decode_legacy_set(
    root: &Value,
    skeleton: &Skeleton,
    context: &mut LoadContext,
    options: &DecodeOptions,
) -> Result<Decoded<Vec<Animation>>> {
    let tables = LegacyTables::from_value(root)?;
    let own = ChannelTable::find_in(root)?;
    let table = context
        .resolve_channel_table(own)
        .ok_or_else(|| Error::MissingKey("m_dataChannelArray".into()))?;

    let mut diagnostics = Vec::new();
    let channels: Vec<_> = {
        let remaps = table.resolve_all(
            skeleton,
            |i| match table.get(i).and_then(|c| c.attribute()) {
                Some(attribute) => tables.declared_elements(i, attribute),
                None => Vec::new(),
            },
            &mut diagnostics,
        );
        remaps
            .into_iter()
            .zip(&table.channels)
            .map(|(remap, channel)| Some((channel.attribute()?, remap?)))
            .collect()
    };

    let clips = root.require("m_animArray")?.as_array()?;
    debug!(clips = clips.len(), segments = tables.segments.len(), "legacy animation set");

    let decode = |(i, v): (usize, &Value)| -> (String, Result<Animation>) {
        let name = clip_name(v, i);
        let result = LegacyClip::from_value(v).and_then(|clip| {
            check_frames(clip.frame_count, options)?;
            decode_legacy_clip(&clip, &tables, &channels, skeleton)
        });
        (name, result)
    };
    let results: Vec<_> = if options.parallel {
        clips.par_iter().enumerate().map(decode).collect()
    } else {
        clips.iter().enumerate().map(decode).collect()
    };

    let mut animations = Vec::with_capacity(results.len());
    for (name, result) in results {
        match result {
            Ok(anim) => animations.push(anim),
            Err(e) => diagnostics.push(skipped(name, e)),
        }
    }
    Ok(Decoded { value: animations, diagnostics })
}

fn decode_flat_set(clips: &[Value], skeleton: &Skeleton, options: &DecodeOptions) -> Decoded<Vec<Animation>> {
    let decode = |(i, v): (usize, &Value)| -> (String, Result<Decoded<Animation>>) {
        let name = clip_name(v, i);
        let result = FlatClip::from_value(v).and_then(|clip| {
            check_frames(clip.frame_count, options)?;
            clip.decode(skeleton)
        });
        (name, result)
    };
    let results: Vec<_> = if options.parallel {
        clips.par_iter().enumerate().map(decode).collect()
    } else {
        clips.iter().enumerate().map(decode).collect()
    };

    let mut animations = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();
    for (name, result) in results {
        match result {
            Ok(decoded) => {
                diagnostics.extend(decoded.diagnostics);
                animations.push(decoded.value);
            }
            Err(e) => diagnostics.push(skipped(name, e)),
        }
    }
    Decoded { value: animations, diagnostics }
}

fn check_frames(frame_count: usize, options: &DecodeOptions) -> Result<()> {
    if frame_count > options.max_frames {
        return Err(Error::invalid(format!(
            "clip declares {} frames, limit is {}",
            frame_count, options.max_frames
        )));
    }
    Ok(())
}

fn clip_name(v: &Value, index: usize) -> String {
    v.get("m_name")
        .and_then(|n| n.as_str().ok())
        .map_or_else(|| format!("#{}", index), str::to_string)
}

fn skipped(clip: String, error: Error) -> Diagnostic {
    warn!(clip = %clip, error = %error, "skipping animation clip");
    Diagnostic::ClipSkipped { clip, error: error.to_string() }
}
