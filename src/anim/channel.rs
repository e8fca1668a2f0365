//! Legacy channel tables and element-to-bone remapping.
//!
//! A segment addresses its values by element id within a local channel.
//! The channel table names the animated attribute of each channel and,
//! depending on how the asset was compiled, describes which bone each
//! element drives. Resolution tries three sources in order and records
//! which one produced the mapping.

use std::fmt;

use tracing::{debug, warn};

use super::skeleton::Skeleton;
use super::Diagnostic;
use crate::kv3::Value;
use crate::util::Result;

/// Bone attribute a channel animates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Local rotation (`angle`).
    Angle,
    /// Local translation (`position`).
    Position,
    /// Uniform scale (`scale`).
    Scale,
}

impl Attribute {
    /// Parse a channel variable name, case-insensitively.
    pub fn from_variable(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("angle") {
            Some(Self::Angle)
        } else if name.eq_ignore_ascii_case("position") {
            Some(Self::Position)
        } else if name.eq_ignore_ascii_case("scale") {
            Some(Self::Scale)
        } else {
            None
        }
    }
}

/// Source of an element-to-bone mapping, most to least trustworthy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemapTier {
    /// Element names and indices declared on the channel.
    Explicit,
    /// Sequential ids assigned to bones flagged in the presence masks.
    PresenceMasks,
    /// Declared element ids assigned to bones in order. Unverified.
    Positional,
}

impl fmt::Display for RemapTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of `m_dataChannelArray`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    pub variable: String,
    pub element_names: Option<Vec<String>>,
    pub element_indices: Option<Vec<usize>>,
    pub bones_have_movement: Option<Vec<bool>>,
    pub bones_have_rotation: Option<Vec<bool>>,
}

impl Channel {
    pub fn from_value(v: &Value) -> Result<Self> {
        let strings = |key: &str| -> Result<Option<Vec<String>>> {
            v.get_non_null(key)
                .map(|a| Ok(a.str_array()?.into_iter().map(str::to_string).collect()))
                .transpose()
        };
        let bools = |key: &str| -> Result<Option<Vec<bool>>> {
            v.get_non_null(key).map(presence_array).transpose()
        };
        let indices = v
            .get_non_null("m_nElementIndexArray")
            .map(|a| a.as_array()?.iter().map(Value::as_usize).collect::<Result<Vec<_>>>())
            .transpose()?;

        Ok(Self {
            variable: v.require("m_szVariableName")?.as_str()?.to_string(),
            element_names: strings("m_szElementNameArray")?,
            element_indices: indices,
            bones_have_movement: bools("m_bonesHaveMovement")?,
            bones_have_rotation: bools("m_bonesHaveRotation")?,
        })
    }

    /// Attribute animated by this channel, if it drives bones.
    pub fn attribute(&self) -> Option<Attribute> {
        Attribute::from_variable(&self.variable)
    }

    /// Resolve the element-to-bone mapping.
    ///
    /// `declared` lists the element ids the channel's segments declare and
    /// is only used by the positional tier.
    pub fn resolve(&self, skeleton: &Skeleton, declared: &[usize]) -> Option<ChannelRemap> {
        self.resolve_explicit(skeleton)
            .or_else(|| self.resolve_presence(skeleton))
            .or_else(|| resolve_positional(skeleton, declared))
    }

    fn resolve_explicit(&self, skeleton: &Skeleton) -> Option<ChannelRemap> {
        let names = self.element_names.as_ref()?;
        let mut remap = ChannelRemap::new(RemapTier::Explicit);
        for (i, name) in names.iter().enumerate() {
            let element = match &self.element_indices {
                Some(indices) => *indices.get(i)?,
                None => i,
            };
            match skeleton.find(name) {
                Some(bone) => remap.insert(element, bone),
                None => debug!(channel = %self.variable, bone = %name, "channel element has no bone"),
            }
        }
        Some(remap)
    }

    fn resolve_presence(&self, skeleton: &Skeleton) -> Option<ChannelRemap> {
        let mask = match self.attribute()? {
            Attribute::Position => self.bones_have_movement.as_ref()?,
            Attribute::Angle => self.bones_have_rotation.as_ref()?,
            Attribute::Scale => return None,
        };
        let mut remap = ChannelRemap::new(RemapTier::PresenceMasks);
        let flagged = mask.iter().take(skeleton.len()).enumerate().filter(|&(_, &m)| m);
        for (element, (bone, _)) in flagged.enumerate() {
            remap.insert(element, bone);
        }
        Some(remap)
    }
}

fn resolve_positional(skeleton: &Skeleton, declared: &[usize]) -> Option<ChannelRemap> {
    if declared.is_empty() {
        return None;
    }
    let mut ids = declared.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut remap = ChannelRemap::new(RemapTier::Positional);
    for (bone, element) in ids.into_iter().take(skeleton.len()).enumerate() {
        remap.insert(element, bone);
    }
    Some(remap)
}

/// Presence masks come either as bool arrays or as packed bytes.
fn presence_array(v: &Value) -> Result<Vec<bool>> {
    match v {
        Value::Blob(bytes) => Ok(bytes.iter().map(|&b| b != 0).collect()),
        _ => v
            .as_array()?
            .iter()
            .map(|item| match item {
                Value::Bool(b) => Ok(*b),
                other => other.as_i64().map(|n| n != 0),
            })
            .collect(),
    }
}

/// Element id to bone index mapping for one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelRemap {
    pub tier: RemapTier,
    bones: Vec<Option<usize>>,
}

impl ChannelRemap {
    fn new(tier: RemapTier) -> Self {
        Self { tier, bones: Vec::new() }
    }

    fn insert(&mut self, element: usize, bone: usize) {
        // segment element ids are 16-bit
        if element > u16::MAX as usize {
            debug!(element, "element id out of range");
            return;
        }
        if self.bones.len() <= element {
            self.bones.resize(element + 1, None);
        }
        self.bones[element] = Some(bone);
    }

    /// Bone driven by `element`, if any.
    #[inline]
    pub fn bone(&self, element: usize) -> Option<usize> {
        self.bones.get(element).copied().flatten()
    }

    /// Number of mapped elements.
    pub fn mapped(&self) -> usize {
        self.bones.iter().filter(|b| b.is_some()).count()
    }
}

/// Decoded `m_dataChannelArray`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelTable {
    pub channels: Vec<Channel>,
}

impl ChannelTable {
    pub fn from_value(v: &Value) -> Result<Self> {
        let channels = v.as_array()?.iter().map(Channel::from_value).collect::<Result<_>>()?;
        Ok(Self { channels })
    }

    /// Find the table in an animation data root: `m_decodeKey` first, then
    /// the root itself.
    pub fn find_in(root: &Value) -> Result<Option<Self>> {
        let array = root
            .get_non_null("m_decodeKey")
            .and_then(|k| k.get_non_null("m_dataChannelArray"))
            .or_else(|| root.get_non_null("m_dataChannelArray"));
        array.map(Self::from_value).transpose()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Resolve every bone channel. `declared(i)` yields the element ids the
    /// segments of channel `i` declare.
    ///
    /// Channels that do not animate a bone attribute resolve to `None`.
    /// Positional mappings are reported as diagnostics.
    pub fn resolve_all<F>(
        &self,
        skeleton: &Skeleton,
        mut declared: F,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<Option<ChannelRemap>>
    where
        F: FnMut(usize) -> Vec<usize>,
    {
        self.channels
            .iter()
            .enumerate()
            .map(|(i, channel)| {
                channel.attribute()?;
                let remap = channel.resolve(skeleton, &declared(i))?;
                debug!(channel = %channel.variable, tier = %remap.tier, mapped = remap.mapped(), "channel remap");
                if remap.tier == RemapTier::Positional {
                    warn!(channel = %channel.variable, "channel mapped by element order, unverified");
                    diagnostics.push(Diagnostic::UnverifiedChannelMapping {
                        channel: channel.variable.clone(),
                        mapped: remap.mapped(),
                    });
                }
                Some(remap)
            })
            .collect()
    }
}

/// Per-asset-load state shared across the clips of one asset.
///
/// Some assets declare the channel table once and omit it from later
/// animation data blocks; those reuse the most recently resolved table.
/// Create one context per asset load so concurrent loads stay independent.
#[derive(Clone, Debug, Default)]
pub struct LoadContext {
    last_channels: Option<ChannelTable>,
}

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently resolved channel table.
    pub fn channel_table(&self) -> Option<&ChannelTable> {
        self.last_channels.as_ref()
    }

    /// Use `own` if present, remembering it; otherwise reuse the last table.
    pub fn resolve_channel_table(&mut self, own: Option<ChannelTable>) -> Option<&ChannelTable> {
        if let Some(table) = own {
            self.last_channels = Some(table);
        } else if self.last_channels.is_some() {
            debug!("reusing previous channel table");
        }
        self.last_channels.as_ref()
    }
}
