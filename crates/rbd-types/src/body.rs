//! Rigid body state and the body arena.

use nalgebra::{Matrix3, Point3, UnitQuaternion, UnitVector3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::group::MaterialId;
use crate::{RbdError, Result};

/// Unique identifier for a rigid body.
///
/// Ids are assigned in ascending order by [`BodySet::insert`] and double as
/// the canonical ordering used by the contact graph (an edge always stores
/// the lower-id body first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub u32);

impl BodyId {
    /// Create a body ID from a raw index.
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

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({})", self.0)
    }
}

/// Mass, center-of-mass and inertia of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg.
    pub mass: f64,
    /// Inertia tensor about the center of mass, in body coordinates (kg·m²).
    pub inertia: Matrix3<f64>,
}

impl MassProperties {
    /// Create mass properties from explicit values.
    #[must_use]
    pub const fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        Self { mass, inertia }
    }

    /// Mass properties of a solid sphere: I = (2/5) m r².
    #[must_use]
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self {
            mass,
            inertia: Matrix3::from_diagonal(&Vector3::new(i, i, i)),
        }
    }

    /// Mass properties of a solid box with the given half-extents.
    #[must_use]
    pub fn box_shape(mass: f64, half_extents: Vector3<f64>) -> Self {
        let x2 = 4.0 * half_extents.x * half_extents.x;
        let y2 = 4.0 * half_extents.y * half_extents.y;
        let z2 = 4.0 * half_extents.z * half_extents.z;

        Self {
            mass,
            inertia: Matrix3::from_diagonal(&Vector3::new(
                mass * (y2 + z2) / 12.0,
                mass * (x2 + z2) / 12.0,
                mass * (x2 + y2) / 12.0,
            )),
        }
    }

    /// Validate that the mass properties are physically meaningful.
    pub fn validate(&self) -> Result<()> {
        if self.mass < 0.0 || !self.mass.is_finite() {
            return Err(RbdError::invalid_argument(
                "mass must be finite and non-negative",
            ));
        }

        let eigenvalues = self.inertia.symmetric_eigenvalues();
        if eigenvalues.iter().any(|&e| e < -1e-10) {
            return Err(RbdError::invalid_argument(
                "inertia tensor must be positive semi-definite",
            ));
        }

        Ok(())
    }
}

/// How a body's orientation is advanced during position integration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RotationUpdate {
    /// Infinitesimal quaternion increment followed by renormalization.
    ///
    /// Cheap and accurate for slowly rotating bodies.
    #[default]
    Infinitesimal,
    /// Exact finite rotation about the angular velocity direction.
    ///
    /// Preferred for fast-spinning bodies where the infinitesimal update
    /// drifts. If `axis` is set, the exact rotation is taken about that
    /// body-frame axis and the remaining angular velocity component is
    /// applied as an infinitesimal increment.
    Finite {
        /// Optional constrained rotation axis in body coordinates.
        axis: Option<UnitVector3<f64>>,
    },
}

/// A rigid body: mass properties, pose, velocity and simulation flags.
///
/// The inverse mass and inverse inertia are precomputed on construction.
/// A `fixed` body reports zero inverse mass and inverse inertia regardless
/// of its stored values, which is what makes temporary fixation during
/// shock propagation a pure flag flip.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Body {
    /// Handle of this body in its [`BodySet`]. Assigned on insert.
    pub id: BodyId,
    /// Mass in kg.
    pub mass: f64,
    /// Precomputed inverse mass (0 for zero or infinite mass).
    inv_mass: f64,
    /// Inertia tensor in body coordinates.
    pub inertia: Matrix3<f64>,
    /// Precomputed inverse inertia in body coordinates.
    inv_inertia: Matrix3<f64>,
    /// Position of the center of mass in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub orientation: UnitQuaternion<f64>,
    /// Linear velocity in world coordinates (m/s).
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity in world coordinates (rad/s).
    pub angular_velocity: Vector3<f64>,
    /// Accumulated external force (cleared by the caller each step).
    pub force: Vector3<f64>,
    /// Accumulated external torque (cleared by the caller each step).
    pub torque: Vector3<f64>,
    /// Infinite-mass flag. Fixed bodies never move.
    pub fixed: bool,
    /// Low-energy flag maintained by the sleep bookkeeping.
    pub sleepy: bool,
    /// Orientation integration policy for this body.
    pub rotation_update: RotationUpdate,
    /// Material handle used for pairwise material lookup.
    pub material: MaterialId,
}

impl Body {
    /// Create a dynamic body at rest at the given position.
    #[must_use]
    pub fn new(props: MassProperties, position: Point3<f64>) -> Self {
        let inv_mass = if props.mass > 0.0 && props.mass.is_finite() {
            1.0 / props.mass
        } else {
            0.0
        };
        let inv_inertia = props.inertia.try_inverse().unwrap_or_else(Matrix3::zeros);

        Self {
            id: BodyId::new(u32::MAX),
            mass: props.mass,
            inv_mass,
            inertia: props.inertia,
            inv_inertia,
            position,
            orientation: UnitQuaternion::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
            fixed: false,
            sleepy: false,
            rotation_update: RotationUpdate::default(),
            material: MaterialId::DEFAULT,
        }
    }

    /// Create a fixed (infinite mass) body at the given position.
    #[must_use]
    pub fn new_fixed(position: Point3<f64>) -> Self {
        let mut body = Self::new(MassProperties::new(0.0, Matrix3::zeros()), position);
        body.fixed = true;
        body
    }

    /// Set the orientation.
    #[must_use]
    pub fn with_orientation(mut self, orientation: UnitQuaternion<f64>) -> Self {
        self.orientation = orientation;
        self
    }

    /// Set the linear velocity.
    #[must_use]
    pub fn with_linear_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.linear_velocity = velocity;
        self
    }

    /// Set the angular velocity.
    #[must_use]
    pub fn with_angular_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.angular_velocity = velocity;
        self
    }

    /// Set the material handle.
    #[must_use]
    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = material;
        self
    }

    /// Set the orientation integration policy.
    #[must_use]
    pub fn with_rotation_update(mut self, update: RotationUpdate) -> Self {
        self.rotation_update = update;
        self
    }

    /// Effective inverse mass: 0 when the body is fixed.
    #[must_use]
    pub fn inv_mass(&self) -> f64 {
        if self.fixed {
            0.0
        } else {
            self.inv_mass
        }
    }

    /// Effective inverse inertia in world coordinates: R I⁻¹ Rᵀ,
    /// or the zero matrix when the body is fixed.
    #[must_use]
    pub fn inv_inertia_world(&self) -> Matrix3<f64> {
        if self.fixed {
            return Matrix3::zeros();
        }
        let r = self.orientation.to_rotation_matrix();
        r * self.inv_inertia * r.transpose()
    }

    /// Transform a body-frame point into world coordinates.
    #[must_use]
    pub fn point_to_world(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.orientation * local.coords
    }

    /// World-space offset of a body-frame attachment point from the center
    /// of mass.
    #[must_use]
    pub fn arm_to_world(&self, local: &Point3<f64>) -> Vector3<f64> {
        self.orientation * local.coords
    }

    /// Velocity of a world-space point rigidly attached to this body,
    /// given its offset from the center of mass.
    #[must_use]
    pub fn velocity_at(&self, arm: &Vector3<f64>) -> Vector3<f64> {
        self.linear_velocity + self.angular_velocity.cross(arm)
    }

    /// Apply an impulse at a world-space offset from the center of mass.
    ///
    /// No-op for fixed bodies.
    pub fn apply_impulse(&mut self, impulse: &Vector3<f64>, arm: &Vector3<f64>) {
        if self.fixed {
            return;
        }
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia_world() * arm.cross(impulse);
    }

    /// Check if the body state contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.orientation.coords.iter().all(|x| x.is_finite())
            && self.linear_velocity.iter().all(|x| x.is_finite())
            && self.angular_velocity.iter().all(|x| x.is_finite())
    }

    /// Kinetic energy of the body.
    #[must_use]
    pub fn kinetic_energy(&self) -> f64 {
        let r = self.orientation.to_rotation_matrix();
        let inertia_world = r * self.inertia * r.transpose();
        0.5 * self.mass * self.linear_velocity.norm_squared()
            + 0.5
                * self
                    .angular_velocity
                    .dot(&(inertia_world * self.angular_velocity))
    }
}

/// Arena of rigid bodies with stable [`BodyId`] handles.
///
/// Bodies are inserted at scene setup and never removed mid-simulation;
/// removal is a scene-level operation outside this engine's scope.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodySet {
    bodies: Vec<Body>,
}

impl BodySet {
    /// Create an empty body set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a body, assigning it the next ascending id.
    pub fn insert(&mut self, mut body: Body) -> BodyId {
        let id = BodyId::new(self.bodies.len() as u32);
        body.id = id;
        self.bodies.push(body);
        id
    }

    /// Number of bodies in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Look up a body by id.
    pub fn body(&self, id: BodyId) -> Result<&Body> {
        self.bodies
            .get(id.index())
            .ok_or(RbdError::InvalidBodyId(id.raw()))
    }

    /// Look up a body mutably by id.
    pub fn body_mut(&mut self, id: BodyId) -> Result<&mut Body> {
        self.bodies
            .get_mut(id.index())
            .ok_or(RbdError::InvalidBodyId(id.raw()))
    }

    /// Borrow two distinct bodies mutably.
    ///
    /// Returns a [`RbdError::LogicError`] when `a == b`.
    pub fn pair_mut(&mut self, a: BodyId, b: BodyId) -> Result<(&mut Body, &mut Body)> {
        if a == b {
            return Err(RbdError::logic("cannot borrow the same body twice"));
        }
        let (lo, hi, swapped) = if a.index() < b.index() {
            (a.index(), b.index(), false)
        } else {
            (b.index(), a.index(), true)
        };
        if hi >= self.bodies.len() {
            return Err(RbdError::InvalidBodyId(if swapped { a.raw() } else { b.raw() }));
        }
        let (head, tail) = self.bodies.split_at_mut(hi);
        let (first, second) = (&mut head[lo], &mut tail[0]);
        if swapped {
            Ok((second, first))
        } else {
            Ok((first, second))
        }
    }

    /// Iterate over all bodies.
    pub fn iter(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter()
    }

    /// Iterate over all bodies mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Body> {
        self.bodies.iter_mut()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_body_id_ordering() {
        assert!(BodyId::new(1) < BodyId::new(2));
        assert_eq!(BodyId::new(7).to_string(), "Body(7)");
    }

    #[test]
    fn test_mass_properties_sphere() {
        let props = MassProperties::sphere(1.0, 1.0);
        assert_relative_eq!(props.inertia[(0, 0)], 0.4, epsilon = 1e-12);
        assert!(props.validate().is_ok());
    }

    #[test]
    fn test_mass_properties_validation() {
        let negative = MassProperties::new(-1.0, Matrix3::identity());
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_fixed_body_has_zero_inverses() {
        let body = Body::new_fixed(Point3::origin());
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.inv_inertia_world(), Matrix3::zeros());
    }

    #[test]
    fn test_fixation_flag_masks_inverse_mass() {
        let mut body = Body::new(MassProperties::sphere(2.0, 0.5), Point3::origin());
        assert_relative_eq!(body.inv_mass(), 0.5, epsilon = 1e-12);

        body.fixed = true;
        assert_eq!(body.inv_mass(), 0.0);

        body.fixed = false;
        assert_relative_eq!(body.inv_mass(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_apply_impulse() {
        let mut body = Body::new(MassProperties::sphere(2.0, 0.5), Point3::origin());
        body.apply_impulse(&Vector3::new(2.0, 0.0, 0.0), &Vector3::zeros());
        assert_relative_eq!(body.linear_velocity.x, 1.0, epsilon = 1e-12);

        // Impulse at an offset also spins the body.
        body.apply_impulse(&Vector3::new(0.0, 1.0, 0.0), &Vector3::new(1.0, 0.0, 0.0));
        assert!(body.angular_velocity.z > 0.0);
    }

    #[test]
    fn test_apply_impulse_fixed_noop() {
        let mut body = Body::new_fixed(Point3::origin());
        body.apply_impulse(&Vector3::new(5.0, 0.0, 0.0), &Vector3::zeros());
        assert_eq!(body.linear_velocity, Vector3::zeros());
    }

    #[test]
    fn test_velocity_at_point() {
        let body = Body::new(MassProperties::sphere(1.0, 0.5), Point3::origin())
            .with_angular_velocity(Vector3::new(0.0, 0.0, 1.0));
        let v = body.velocity_at(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_body_set_insert_assigns_ascending_ids() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new(MassProperties::sphere(1.0, 0.5), Point3::origin()));
        let b = set.insert(Body::new(MassProperties::sphere(1.0, 0.5), Point3::origin()));
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert_eq!(set.body(b).unwrap().id, b);
    }

    #[test]
    fn test_body_set_invalid_id() {
        let set = BodySet::new();
        assert!(set.body(BodyId::new(3)).is_err());
    }

    #[test]
    fn test_pair_mut() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new(MassProperties::sphere(1.0, 0.5), Point3::origin()));
        let b = set.insert(Body::new(MassProperties::sphere(1.0, 0.5), Point3::origin()));

        let (body_a, body_b) = set.pair_mut(b, a).unwrap();
        assert_eq!(body_a.id, b);
        assert_eq!(body_b.id, a);

        assert!(set.pair_mut(a, a).is_err());
    }
}
