//! Body groups and auxiliary handles.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::body::BodyId;

/// Unique identifier for a joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointId(pub u32);

impl JointId {
    /// Create a joint ID from a raw index.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw index value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` for arena addressing.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a registered material.
///
/// Index 0 is the distinguished default material, used whenever no explicit
/// material was registered for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaterialId(pub u32);

impl MaterialId {
    /// The distinguished default material.
    pub const DEFAULT: Self = Self(0);

    /// Create a material ID from a raw index.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw index value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A caller-chosen subset of bodies and joints - the unit of work passed to
/// a stepper.
///
/// Groups are cheap id lists; they do not own the entities they name and are
/// rebuilt per step or cached by the caller. A group is usually one connected
/// component of the contact graph, but any subset is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyGroup {
    /// Bodies in this group, sorted by id for determinism.
    bodies: Vec<BodyId>,
    /// Joints whose two anchor bodies are both in this group.
    joints: Vec<JointId>,
}

impl BodyGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group from body ids. The ids are sorted and deduplicated.
    #[must_use]
    pub fn from_bodies(mut bodies: Vec<BodyId>) -> Self {
        bodies.sort_unstable();
        bodies.dedup();
        Self {
            bodies,
            joints: Vec::new(),
        }
    }

    /// Add a body to the group, keeping the list sorted.
    pub fn add_body(&mut self, id: BodyId) {
        if let Err(slot) = self.bodies.binary_search(&id) {
            self.bodies.insert(slot, id);
        }
    }

    /// Add a joint to the group.
    pub fn add_joint(&mut self, id: JointId) {
        if !self.joints.contains(&id) {
            self.joints.push(id);
        }
    }

    /// Bodies in this group, ascending by id.
    #[must_use]
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// Joints in this group.
    #[must_use]
    pub fn joints(&self) -> &[JointId] {
        &self.joints
    }

    /// Check whether a body belongs to the group.
    #[must_use]
    pub fn contains_body(&self, id: BodyId) -> bool {
        self.bodies.binary_search(&id).is_ok()
    }

    /// Number of bodies in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Check if the group has no bodies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}
