//! Velocity and pose integration.
//!
//! The linear part of a pose advances by a plain Euler step. Orientation
//! advances either by an infinitesimal quaternion increment followed by
//! renormalization, or - for bodies that opt in - by an exact finite
//! rotation about the (possibly axis-constrained) angular velocity
//! direction composed with the remaining infinitesimal component. The
//! choice is per body, balancing accuracy against cost for fast-spinning
//! bodies.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use rbd_types::{Body, BodyGroup, BodySet, RbdError, Result, RotationUpdate};

/// Advance an orientation by an angular velocity over `dt`.
///
/// `q += dt/2 * (omega ⊗ q)` followed by renormalization, or the finite
/// rotation path for bodies that requested it.
#[must_use]
pub fn advance_orientation(
    orientation: &UnitQuaternion<f64>,
    angular_velocity: &Vector3<f64>,
    dt: f64,
    update: RotationUpdate,
) -> UnitQuaternion<f64> {
    match update {
        RotationUpdate::Infinitesimal => infinitesimal_step(orientation, angular_velocity, dt),
        RotationUpdate::Finite { axis: None } => {
            UnitQuaternion::from_scaled_axis(angular_velocity * dt) * orientation
        }
        RotationUpdate::Finite { axis: Some(axis) } => {
            // Exact rotation about the constrained axis, infinitesimal for
            // whatever angular velocity remains off-axis.
            let axis_world = orientation * axis.into_inner();
            let parallel = axis_world.dot(angular_velocity) * axis_world;
            let residual = angular_velocity - parallel;
            let rotated = UnitQuaternion::from_scaled_axis(parallel * dt) * orientation;
            infinitesimal_step(&rotated, &residual, dt)
        }
    }
}

fn infinitesimal_step(
    orientation: &UnitQuaternion<f64>,
    angular_velocity: &Vector3<f64>,
    dt: f64,
) -> UnitQuaternion<f64> {
    let omega = Quaternion::from_parts(0.0, *angular_velocity);
    let increment = omega * orientation.into_inner() * (0.5 * dt);
    UnitQuaternion::new_normalize(orientation.into_inner() + increment)
}

/// Integrate external forces and gravity into the group's velocities:
/// `u += dt * invM * f_ext + dt * g`.
pub fn integrate_velocities(
    bodies: &mut BodySet,
    group: &BodyGroup,
    gravity: &Vector3<f64>,
    dt: f64,
) -> Result<()> {
    if dt < 0.0 || !dt.is_finite() {
        return Err(RbdError::InvalidTimestep(dt));
    }
    for &id in group.bodies() {
        let body = bodies.body_mut(id)?;
        if body.fixed {
            continue;
        }
        let delta_linear = (gravity + body.force * body.inv_mass()) * dt;
        let delta_angular = body.inv_inertia_world() * body.torque * dt;
        body.linear_velocity += delta_linear;
        body.angular_velocity += delta_angular;
    }
    Ok(())
}

/// Advance the group's poses by their current velocities.
pub fn integrate_positions(bodies: &mut BodySet, group: &BodyGroup, dt: f64) -> Result<()> {
    if dt < 0.0 || !dt.is_finite() {
        return Err(RbdError::InvalidTimestep(dt));
    }
    for &id in group.bodies() {
        let body = bodies.body_mut(id)?;
        if body.fixed {
            continue;
        }
        body.position += body.linear_velocity * dt;
        body.orientation = advance_orientation(
            &body.orientation,
            &body.angular_velocity,
            dt,
            body.rotation_update,
        );
    }
    Ok(())
}

/// Apply a generalized displacement directly to a body's pose, leaving its
/// velocities untouched. Used by the first-order stepper, which converts
/// solved impulses into position changes.
pub fn displace(body: &mut Body, linear: &Vector3<f64>, angular: &Vector3<f64>) {
    if body.fixed {
        return;
    }
    body.position += *linear;
    body.orientation =
        advance_orientation(&body.orientation, angular, 1.0, body.rotation_update);
}
