//! Pluggable collision laws for the sequential resolver.

use nalgebra::Vector3;

use rbd_types::Body;

use crate::contact::ContactPoint;
use crate::material::Material;

/// Strategy computing the impulse exchanged at a single contact.
///
/// Implementations receive the two bodies in the edge's canonical order and
/// return the world-space impulse applied to body A at the contact point;
/// body B receives the equal-and-opposite impulse. Laws are selected at
/// composition time and passed by reference.
pub trait CollisionLaw {
    /// Compute the impulse applied to body A.
    fn impulse(
        &self,
        body_a: &Body,
        body_b: &Body,
        contact: &ContactPoint,
        material: &Material,
    ) -> Vector3<f64>;
}

/// Newton-style impact law: restitution along the contact normal plus a
/// Coulomb friction impulse opposing the tangential sliding direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewtonImpulseLaw;

impl NewtonImpulseLaw {
    /// Create the law.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CollisionLaw for NewtonImpulseLaw {
    fn impulse(
        &self,
        body_a: &Body,
        body_b: &Body,
        contact: &ContactPoint,
        material: &Material,
    ) -> Vector3<f64> {
        let n = contact.normal;
        let arm_a = body_a.arm_to_world(&contact.local_a);
        let arm_b = body_b.arm_to_world(&contact.local_b);

        let relative = body_a.velocity_at(&arm_a) - body_b.velocity_at(&arm_b);
        let normal_speed = n.dot(&relative);
        if normal_speed >= 0.0 {
            return Vector3::zeros();
        }

        let inv_inertia_a = body_a.inv_inertia_world();
        let inv_inertia_b = body_b.inv_inertia_world();
        let inv_mass_sum = body_a.inv_mass() + body_b.inv_mass();

        let angular_term = |direction: &Vector3<f64>| {
            let ra_cross = arm_a.cross(direction);
            let rb_cross = arm_b.cross(direction);
            direction.dot(
                &((inv_inertia_a * ra_cross).cross(&arm_a)
                    + (inv_inertia_b * rb_cross).cross(&arm_b)),
            )
        };

        let normal_mass = inv_mass_sum + angular_term(&n);
        if normal_mass <= f64::EPSILON {
            // Two fixed bodies have no impulse to exchange.
            tracing::warn!("contact between two immovable bodies has zero effective mass");
            return Vector3::zeros();
        }

        let normal_impulse = -(1.0 + material.restitution) * normal_speed / normal_mass;

        // Friction opposes the sliding direction, bounded by the cone
        // |jt| <= mu * jn.
        let tangential = relative - normal_speed * n;
        let sliding_speed = tangential.norm();
        let mu = material.friction_coefficient(0);
        if mu <= 0.0 || sliding_speed <= f64::EPSILON {
            return normal_impulse * n;
        }

        let tangent = tangential / sliding_speed;
        let tangent_mass = inv_mass_sum + angular_term(&tangent);
        if tangent_mass <= f64::EPSILON {
            return normal_impulse * n;
        }

        let friction_impulse =
            (-sliding_speed / tangent_mass).clamp(-mu * normal_impulse, mu * normal_impulse);

        normal_impulse * n + friction_impulse * tangent
    }
}
