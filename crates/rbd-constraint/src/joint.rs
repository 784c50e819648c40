//! Bilateral joints between body pairs.

use nalgebra::{Point3, UnitVector3, Vector3};

use rbd_types::{BodyId, BodySet, JointId, RbdError, Result};

use crate::assembly::{AssemblySwitches, ConstraintRow, RowSource};
use crate::limits::{JointLimits, LimitState};

/// A bilateral constraint between two bodies, contributing Jacobian rows to
/// the assembled system.
///
/// Joints are stored behind this trait so new kinds can be added without
/// touching the assembler.
pub trait Joint: std::fmt::Debug {
    /// The first anchored body.
    fn parent(&self) -> BodyId;

    /// The second anchored body.
    fn child(&self) -> BodyId;

    /// Emit this joint's constraint rows for the current body states.
    ///
    /// `dt` is the step the assembly is built for; stabilization terms are
    /// only emitted when the switches ask for them.
    fn append_rows(
        &self,
        bodies: &BodySet,
        id: JointId,
        dt: f64,
        switches: &AssemblySwitches,
        rows: &mut Vec<ConstraintRow>,
    ) -> Result<()>;
}

/// Arena of joints addressed by [`JointId`].
#[derive(Debug, Default)]
pub struct JointSet {
    joints: Vec<Box<dyn Joint>>,
}

impl JointSet {
    /// Create an empty joint set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a joint, assigning the next ascending id.
    pub fn insert(&mut self, joint: Box<dyn Joint>) -> JointId {
        let id = JointId::new(self.joints.len() as u32);
        self.joints.push(joint);
        id
    }

    /// Look up a joint by id.
    pub fn joint(&self, id: JointId) -> Result<&dyn Joint> {
        self.joints
            .get(id.index())
            .map(AsRef::as_ref)
            .ok_or(RbdError::InvalidJointId(id.raw()))
    }

    /// Iterate over all joints with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (JointId, &dyn Joint)> {
        self.joints
            .iter()
            .enumerate()
            .map(|(i, j)| (JointId::new(i as u32), j.as_ref()))
    }

    /// Number of joints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

/// Shared anchor-error rows for joints that pin a point on each body
/// together (three rows, one per world axis).
fn append_anchor_rows(
    bodies: &BodySet,
    id: JointId,
    parent: BodyId,
    child: BodyId,
    anchor_parent: &Point3<f64>,
    anchor_child: &Point3<f64>,
    softness: f64,
    error_reduction: f64,
    dt: f64,
    switches: &AssemblySwitches,
    rows: &mut Vec<ConstraintRow>,
) -> Result<()> {
    let body_a = bodies.body(parent)?;
    let body_b = bodies.body(child)?;

    let arm_a = body_a.arm_to_world(anchor_parent);
    let arm_b = body_b.arm_to_world(anchor_child);
    let error = (body_a.position + arm_a) - (body_b.position + arm_b);

    let erp = if switches.erp { error_reduction } else { 1.0 };

    for k in 0..3 {
        let mut axis = Vector3::zeros();
        axis[k] = 1.0;

        let rhs = if switches.stabilization {
            -erp * error[k] / dt
        } else {
            0.0
        };

        rows.push(
            ConstraintRow::bilateral(
                parent,
                child,
                axis,
                arm_a.cross(&axis),
                -axis,
                -arm_b.cross(&axis),
                RowSource::Joint { joint: id },
            )
            .with_rhs(rhs)
            .with_gamma(softness),
        );
    }
    Ok(())
}

/// Ball-and-socket joint: pins one point of each body together, leaving all
/// three rotational degrees of freedom free.
#[derive(Debug, Clone)]
pub struct BallJoint {
    parent: BodyId,
    child: BodyId,
    /// Anchor in the parent body's frame.
    pub anchor_parent: Point3<f64>,
    /// Anchor in the child body's frame.
    pub anchor_child: Point3<f64>,
    /// Regularization added to this joint's rows.
    pub softness: f64,
    /// Error-reduction parameter for positional drift.
    pub error_reduction: f64,
}

impl BallJoint {
    /// Create a ball joint from body-frame anchors.
    #[must_use]
    pub fn new(
        parent: BodyId,
        child: BodyId,
        anchor_parent: Point3<f64>,
        anchor_child: Point3<f64>,
    ) -> Self {
        Self {
            parent,
            child,
            anchor_parent,
            anchor_child,
            softness: 0.0,
            error_reduction: 0.2,
        }
    }

    /// Create a ball joint through a world-space anchor point, deriving the
    /// body-frame anchors from the bodies' current poses.
    pub fn at_world_point(
        bodies: &BodySet,
        parent: BodyId,
        child: BodyId,
        anchor: Point3<f64>,
    ) -> Result<Self> {
        let body_a = bodies.body(parent)?;
        let body_b = bodies.body(child)?;
        Ok(Self::new(
            parent,
            child,
            Point3::from(body_a.orientation.inverse() * (anchor - body_a.position)),
            Point3::from(body_b.orientation.inverse() * (anchor - body_b.position)),
        ))
    }

    /// Set the regularization.
    #[must_use]
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.softness = softness.max(0.0);
        self
    }

    /// Set the error-reduction parameter.
    #[must_use]
    pub fn with_error_reduction(mut self, erp: f64) -> Self {
        self.error_reduction = erp.clamp(0.0, 1.0);
        self
    }
}

impl Joint for BallJoint {
    fn parent(&self) -> BodyId {
        self.parent
    }

    fn child(&self) -> BodyId {
        self.child
    }

    fn append_rows(
        &self,
        bodies: &BodySet,
        id: JointId,
        dt: f64,
        switches: &AssemblySwitches,
        rows: &mut Vec<ConstraintRow>,
    ) -> Result<()> {
        append_anchor_rows(
            bodies,
            id,
            self.parent,
            self.child,
            &self.anchor_parent,
            &self.anchor_child,
            self.softness,
            self.error_reduction,
            dt,
            switches,
            rows,
        )
    }
}

/// Hinge (revolute) joint: pins an anchor point and a rotation axis,
/// leaving one rotational degree of freedom, optionally limited.
///
/// Emits five bilateral rows (three anchor rows plus two rows keeping the
/// hinge axes aligned) and, when the current angle violates its limits,
/// one additional one-sided limit row.
#[derive(Debug, Clone)]
pub struct HingeJoint {
    parent: BodyId,
    child: BodyId,
    /// Anchor in the parent body's frame.
    pub anchor_parent: Point3<f64>,
    /// Anchor in the child body's frame.
    pub anchor_child: Point3<f64>,
    /// Hinge axis in the parent body's frame.
    pub axis_parent: UnitVector3<f64>,
    /// Hinge axis in the child body's frame.
    pub axis_child: UnitVector3<f64>,
    /// Reference direction perpendicular to the axis, parent frame.
    reference_parent: UnitVector3<f64>,
    /// Reference direction perpendicular to the axis, child frame.
    reference_child: UnitVector3<f64>,
    /// Optional angular limits around the hinge axis.
    pub limits: Option<JointLimits>,
    /// Regularization added to this joint's rows.
    pub softness: f64,
    /// Error-reduction parameter for positional drift.
    pub error_reduction: f64,
}

impl HingeJoint {
    /// Create a hinge through a world-space anchor and axis, deriving all
    /// body-frame quantities from the bodies' current poses. The current
    /// configuration becomes the zero angle.
    pub fn at_world_axis(
        bodies: &BodySet,
        parent: BodyId,
        child: BodyId,
        anchor: Point3<f64>,
        axis: UnitVector3<f64>,
    ) -> Result<Self> {
        let body_a = bodies.body(parent)?;
        let body_b = bodies.body(child)?;

        // A world reference perpendicular to the axis fixes angle zero.
        let reference = crate::assembly::tangent_frame(&axis).0;

        let to_parent = body_a.orientation.inverse();
        let to_child = body_b.orientation.inverse();

        Ok(Self {
            parent,
            child,
            anchor_parent: Point3::from(to_parent * (anchor - body_a.position)),
            anchor_child: Point3::from(to_child * (anchor - body_b.position)),
            axis_parent: UnitVector3::new_normalize(to_parent * axis.into_inner()),
            axis_child: UnitVector3::new_normalize(to_child * axis.into_inner()),
            reference_parent: UnitVector3::new_normalize(to_parent * reference),
            reference_child: UnitVector3::new_normalize(to_child * reference),
            limits: None,
            softness: 0.0,
            error_reduction: 0.2,
        })
    }

    /// Set angular limits.
    #[must_use]
    pub fn with_limits(mut self, limits: JointLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Set the regularization.
    #[must_use]
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.softness = softness.max(0.0);
        self
    }

    /// Set the error-reduction parameter.
    #[must_use]
    pub fn with_error_reduction(mut self, erp: f64) -> Self {
        self.error_reduction = erp.clamp(0.0, 1.0);
        self
    }

    /// Current hinge angle, measured between the two reference directions
    /// around the child's world axis.
    pub fn angle(&self, bodies: &BodySet) -> Result<f64> {
        let body_a = bodies.body(self.parent)?;
        let body_b = bodies.body(self.child)?;

        let axis = body_b.orientation * self.axis_child.into_inner();
        let ref_a = body_a.orientation * self.reference_parent.into_inner();
        let ref_b = body_b.orientation * self.reference_child.into_inner();

        Ok(ref_a.cross(&ref_b).dot(&axis).atan2(ref_a.dot(&ref_b)))
    }
}

impl Joint for HingeJoint {
    fn parent(&self) -> BodyId {
        self.parent
    }

    fn child(&self) -> BodyId {
        self.child
    }

    fn append_rows(
        &self,
        bodies: &BodySet,
        id: JointId,
        dt: f64,
        switches: &AssemblySwitches,
        rows: &mut Vec<ConstraintRow>,
    ) -> Result<()> {
        append_anchor_rows(
            bodies,
            id,
            self.parent,
            self.child,
            &self.anchor_parent,
            &self.anchor_child,
            self.softness,
            self.error_reduction,
            dt,
            switches,
            rows,
        )?;

        let body_a = bodies.body(self.parent)?;
        let body_b = bodies.body(self.child)?;
        let erp = if switches.erp {
            self.error_reduction
        } else {
            1.0
        };

        // Keep the two hinge axes aligned: the parent's orthonormal
        // complement of the axis must stay perpendicular to the child's
        // world axis.
        let axis_world = body_b.orientation * self.axis_child.into_inner();
        let axis_parent_world = body_a.orientation * self.axis_parent.into_inner();
        let ref_world = body_a.orientation * self.reference_parent.into_inner();
        let b1 = ref_world - axis_parent_world.dot(&ref_world) * axis_parent_world;
        let b2 = axis_parent_world.cross(&b1);

        for u in [b1, b2] {
            let j = u.cross(&axis_world);
            let error = u.dot(&axis_world);
            let rhs = if switches.stabilization {
                -erp * error / dt
            } else {
                0.0
            };
            rows.push(
                ConstraintRow::bilateral(
                    self.parent,
                    self.child,
                    Vector3::zeros(),
                    j,
                    Vector3::zeros(),
                    -j,
                    RowSource::Joint { joint: id },
                )
                .with_rhs(rhs)
                .with_gamma(self.softness),
            );
        }

        // One-sided limit row when the current angle violates the limits.
        if let Some(limits) = self.limits {
            let angle = self.angle(bodies)?;
            let (bounds, error) = match limits.state(angle) {
                LimitState::Inside => (None, 0.0),
                LimitState::BelowLower(excess) => (Some((0.0, f64::INFINITY)), excess),
                LimitState::AboveUpper(excess) => (Some((f64::NEG_INFINITY, 0.0)), -excess),
            };
            if let Some((lower, upper)) = bounds {
                // d(angle)/dt = axis · (omega_child - omega_parent).
                let rhs = if switches.stabilization {
                    erp * error / dt
                } else {
                    0.0
                };
                rows.push(
                    ConstraintRow::bilateral(
                        self.parent,
                        self.child,
                        Vector3::zeros(),
                        -axis_world,
                        Vector3::zeros(),
                        axis_world,
                        RowSource::Joint { joint: id },
                    )
                    .with_bounds(lower, upper)
                    .with_rhs(rhs)
                    .with_gamma(self.softness),
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rbd_types::{Body, MassProperties};

    fn pair() -> (BodySet, BodyId, BodyId) {
        let mut bodies = BodySet::new();
        let a = bodies.insert(Body::new(
            MassProperties::box_shape(1.0, Vector3::new(0.5, 0.5, 0.5)),
            Point3::new(0.0, 0.0, 0.0),
        ));
        let b = bodies.insert(Body::new(
            MassProperties::box_shape(1.0, Vector3::new(0.5, 0.5, 0.5)),
            Point3::new(2.0, 0.0, 0.0),
        ));
        (bodies, a, b)
    }

    #[test]
    fn test_ball_joint_emits_three_rows() {
        let (bodies, a, b) = pair();
        let joint =
            BallJoint::at_world_point(&bodies, a, b, Point3::new(1.0, 0.0, 0.0)).unwrap();

        let mut rows = Vec::new();
        joint
            .append_rows(
                &bodies,
                JointId::new(0),
                0.01,
                &AssemblySwitches::dynamics(),
                &mut rows,
            )
            .unwrap();

        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.lower, f64::NEG_INFINITY);
            assert_eq!(row.upper, f64::INFINITY);
            // Anchors coincide, so there is nothing to stabilize yet.
            assert_relative_eq!(row.rhs, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_ball_joint_stabilization_counters_drift() {
        let (mut bodies, a, b) = pair();
        let joint =
            BallJoint::at_world_point(&bodies, a, b, Point3::new(1.0, 0.0, 0.0)).unwrap();

        // Drift the child +X; the X row must pull it back (positive rhs
        // means "increase relative velocity of parent minus child").
        bodies.body_mut(b).unwrap().position.x += 0.1;

        let mut rows = Vec::new();
        joint
            .append_rows(
                &bodies,
                JointId::new(0),
                0.01,
                &AssemblySwitches::dynamics(),
                &mut rows,
            )
            .unwrap();

        // The drift moved the child's anchor to x = 1.1; the X row's target
        // velocity points back toward the parent anchor.
        assert!(rows[0].rhs > 0.0);
        assert_relative_eq!(rows[1].rhs, 0.0, epsilon = 1e-12);
        assert_relative_eq!(rows[2].rhs, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hinge_emits_five_rows_inside_limits() {
        let (bodies, a, b) = pair();
        let joint = HingeJoint::at_world_axis(
            &bodies,
            a,
            b,
            Point3::new(1.0, 0.0, 0.0),
            Vector3::z_axis(),
        )
        .unwrap()
        .with_limits(JointLimits::symmetric(1.0));

        let mut rows = Vec::new();
        joint
            .append_rows(
                &bodies,
                JointId::new(0),
                0.01,
                &AssemblySwitches::dynamics(),
                &mut rows,
            )
            .unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn test_hinge_angle_tracks_child_rotation() {
        let (mut bodies, a, b) = pair();
        let joint = HingeJoint::at_world_axis(
            &bodies,
            a,
            b,
            Point3::new(1.0, 0.0, 0.0),
            Vector3::z_axis(),
        )
        .unwrap();

        assert_relative_eq!(joint.angle(&bodies).unwrap(), 0.0, epsilon = 1e-12);

        bodies.body_mut(b).unwrap().orientation =
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4);
        assert_relative_eq!(joint.angle(&bodies).unwrap(), 0.4, epsilon = 1e-10);
    }

    #[test]
    fn test_hinge_limit_row_is_one_sided() {
        let (mut bodies, a, b) = pair();
        let joint = HingeJoint::at_world_axis(
            &bodies,
            a,
            b,
            Point3::new(1.0, 0.0, 0.0),
            Vector3::z_axis(),
        )
        .unwrap()
        .with_limits(JointLimits::symmetric(0.2));

        // Rotate the child past the upper limit.
        bodies.body_mut(b).unwrap().orientation =
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);

        let mut rows = Vec::new();
        joint
            .append_rows(
                &bodies,
                JointId::new(0),
                0.01,
                &AssemblySwitches::dynamics(),
                &mut rows,
            )
            .unwrap();

        assert_eq!(rows.len(), 6);
        let limit = rows.last().unwrap();
        assert_eq!(limit.lower, f64::NEG_INFINITY);
        assert_eq!(limit.upper, 0.0);
        // Stabilization drives the angle back toward the limit.
        assert!(limit.rhs < 0.0);
    }

    #[test]
    fn test_joint_set_handles() {
        let (bodies, a, b) = pair();
        let mut joints = JointSet::new();
        let id = joints.insert(Box::new(
            BallJoint::at_world_point(&bodies, a, b, Point3::new(1.0, 0.0, 0.0)).unwrap(),
        ));

        assert_eq!(joints.len(), 1);
        assert_eq!(joints.joint(id).unwrap().parent(), a);
        assert!(joints.joint(JointId::new(9)).is_err());
    }
}
