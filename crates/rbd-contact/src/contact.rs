//! Contact points and their warm-start caches.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single contact between two bodies.
///
/// Attachment points are stored in each body's frame so that a contact
/// remains meaningful while the bodies move between detection and
/// resolution. The normal is a world-space unit vector pointing from body B
/// toward body A; the relative normal velocity is therefore negative while
/// the bodies approach.
///
/// The accumulated impulse fields survive the owning edge's `reset()` - they
/// are matched back onto the refreshed contact by feature pair and used to
/// warm start the solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactPoint {
    /// Attachment point in body A's frame.
    pub local_a: Point3<f64>,
    /// Attachment point in body B's frame.
    pub local_b: Point3<f64>,
    /// World-space unit normal, pointing from B toward A.
    pub normal: Vector3<f64>,
    /// Penetration depth (positive when the bodies overlap).
    pub depth: f64,
    /// Cached relative normal velocity (negative = approaching).
    pub normal_speed: f64,
    /// Accumulated normal impulse from the previous solve.
    pub normal_impulse: f64,
    /// Accumulated friction impulses, one per friction direction.
    pub friction_impulse: Vec<f64>,
}

impl ContactPoint {
    /// Create a contact with empty impulse caches.
    #[must_use]
    pub fn new(local_a: Point3<f64>, local_b: Point3<f64>, normal: Vector3<f64>, depth: f64) -> Self {
        Self {
            local_a,
            local_b,
            normal,
            depth,
            normal_speed: 0.0,
            normal_impulse: 0.0,
            friction_impulse: Vec::new(),
        }
    }

    /// Check whether the cached relative normal velocity is approaching
    /// faster than `epsilon`.
    #[must_use]
    pub fn is_penetrating(&self, epsilon: f64) -> bool {
        self.normal_speed < -epsilon
    }

    /// Clear the accumulated impulse caches.
    pub fn clear_impulses(&mut self) {
        self.normal_impulse = 0.0;
        self.friction_impulse.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_penetration_test_uses_epsilon() {
        let mut contact = ContactPoint::new(
            Point3::origin(),
            Point3::origin(),
            Vector3::z(),
            0.01,
        );

        contact.normal_speed = -0.5;
        assert!(contact.is_penetrating(1e-6));

        contact.normal_speed = -1e-8;
        assert!(!contact.is_penetrating(1e-6));

        contact.normal_speed = 0.5;
        assert!(!contact.is_penetrating(1e-6));
    }

    #[test]
    fn test_clear_impulses() {
        let mut contact = ContactPoint::new(
            Point3::origin(),
            Point3::origin(),
            Vector3::z(),
            0.0,
        );
        contact.normal_impulse = 3.0;
        contact.friction_impulse = vec![0.5, -0.5];

        contact.clear_impulses();
        assert_eq!(contact.normal_impulse, 0.0);
        assert!(contact.friction_impulse.is_empty());
    }
}
