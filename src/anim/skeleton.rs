//! Skeleton and bind pose.

use std::collections::HashMap;

use tracing::debug;

use super::BoneTransform;
use crate::kv3::Value;
use crate::util::{normalize_or_identity, Error, Quat, Result, Vec3};

/// One bone with its bind-pose transform relative to the parent.
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub position: Vec3,
    pub rotation: Quat,
}

/// Ordered bone list. Parents always precede their children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Skeleton {
    bones: Vec<Bone>,
    by_name: HashMap<String, usize>,
}

impl Skeleton {
    /// Build from a bone list, validating parent indices.
    pub fn new(bones: Vec<Bone>) -> Result<Self> {
        for (i, bone) in bones.iter().enumerate() {
            if let Some(p) = bone.parent {
                if p >= i {
                    return Err(Error::invalid(format!(
                        "bone {} ({}) has parent {} that does not precede it",
                        i, bone.name, p
                    )));
                }
            }
        }
        let by_name = bones.iter().enumerate().map(|(i, b)| (b.name.clone(), i)).collect();
        Ok(Self { bones, by_name })
    }

    /// Read `m_boneName`, `m_nParent`, `m_bonePosParent`, `m_boneRotParent`.
    ///
    /// Missing pose arrays leave the bind pose at identity.
    pub fn from_value(root: &Value) -> Result<Self> {
        let names = root.require("m_boneName")?.str_array()?;
        let parents = root.require("m_nParent")?.i64_array()?;
        if parents.len() != names.len() {
            return Err(Error::SizeMismatch {
                what: "m_nParent",
                expected: names.len(),
                actual: parents.len(),
            });
        }

        let positions = match root.get_non_null("m_bonePosParent") {
            Some(v) => Some(v.as_array()?.iter().map(Value::vec3).collect::<Result<Vec<_>>>()?),
            None => None,
        };
        let rotations = match root.get_non_null("m_boneRotParent") {
            Some(v) => Some(v.as_array()?.iter().map(Value::quat).collect::<Result<Vec<_>>>()?),
            None => None,
        };
        for (what, len) in [
            ("m_bonePosParent", positions.as_ref().map(Vec::len)),
            ("m_boneRotParent", rotations.as_ref().map(Vec::len)),
        ] {
            if let Some(len) = len.filter(|&len| len != names.len()) {
                return Err(Error::SizeMismatch { what, expected: names.len(), actual: len });
            }
        }

        let bones = names
            .iter()
            .enumerate()
            .map(|(i, name)| Bone {
                name: name.to_string(),
                parent: usize::try_from(parents[i]).ok(),
                position: positions.as_ref().map_or(Vec3::ZERO, |p| p[i]),
                rotation: rotations
                    .as_ref()
                    .map_or(Quat::IDENTITY, |r| normalize_or_identity(r[i])),
            })
            .collect();

        let skeleton = Self::new(bones)?;
        debug!(bones = skeleton.len(), "skeleton");
        Ok(skeleton)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Index of a bone by exact name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Bind-pose local transforms with unit scale.
    pub fn bind_pose(&self) -> Vec<BoneTransform> {
        self.bones
            .iter()
            .map(|b| BoneTransform { position: b.position, rotation: b.rotation, scale: 1.0 })
            .collect()
    }
}
