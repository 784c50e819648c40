//! The simulation world: bodies, contact graph, joints and materials.

use nalgebra::Vector3;
use tracing::debug;

use rbd_constraint::{Joint, JointSet};
use rbd_contact::{ContactGraph, ContactPoint, EdgeId, FeaturePair, MaterialTable};
use rbd_types::{Body, BodyGroup, BodyId, BodySet, JointId, Result};

use crate::aabb::Aabb;
use crate::broad_phase::BroadPhase;

/// Narrow-phase contract consumed by the detection pass.
///
/// Concrete collision geometry lives outside the engine; the world only
/// asks a generator for per-body bounds and for the contacts of a candidate
/// pair. Each returned batch is keyed by the pair of geometric features it
/// came from, which the edge cache uses to suppress duplicates within one
/// pass and to warm start across passes.
pub trait ContactGenerator {
    /// Bounding box of a body in world space.
    fn bounds(&self, body: &Body) -> Aabb;

    /// Produce contacts for a candidate pair, grouped by feature pair.
    ///
    /// `a` is always the edge's canonical first body. Implementations must
    /// orient normals from `b` toward `a`.
    fn generate(&mut self, a: &Body, b: &Body) -> Vec<(FeaturePair, Vec<ContactPoint>)>;
}

/// Container for one simulation's entities and shared state.
///
/// The fields are public: the steppers, resolver and stack propagation all
/// borrow different parts of the world at once, and the world does not
/// maintain any invariant between them beyond what the parts themselves
/// enforce.
#[derive(Debug)]
pub struct World {
    /// All rigid bodies.
    pub bodies: BodySet,
    /// The contact cache and its detection generation counter.
    pub graph: ContactGraph,
    /// All joints.
    pub joints: JointSet,
    /// Pairwise material lookup.
    pub materials: MaterialTable,
    /// Gravity applied by the dynamics stepper (m/s²).
    pub gravity: Vector3<f64>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create an empty world with Earth gravity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bodies: BodySet::new(),
            graph: ContactGraph::new(),
            joints: JointSet::new(),
            materials: MaterialTable::default(),
            gravity: Vector3::new(0.0, 0.0, -9.81),
        }
    }

    /// Set the gravity vector.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Add a body.
    pub fn add_body(&mut self, body: Body) -> BodyId {
        self.bodies.insert(body)
    }

    /// Add a joint.
    pub fn add_joint(&mut self, joint: Box<dyn Joint>) -> JointId {
        self.joints.insert(joint)
    }

    /// A group containing every body and joint in the world.
    #[must_use]
    pub fn everything(&self) -> BodyGroup {
        let mut group =
            BodyGroup::from_bodies(self.bodies.iter().map(|b| b.id).collect());
        for (id, _) in self.joints.iter() {
            group.add_joint(id);
        }
        group
    }

    /// Run one full detection pass over a group.
    ///
    /// Bumps the detection generation, lets the broad phase report
    /// overlapping pairs (resetting and stamping their edges), then asks
    /// the narrow-phase generator for contacts on every reported edge.
    /// Returns the edges touched by this pass.
    pub fn detect(
        &mut self,
        group: &BodyGroup,
        broad_phase: &mut dyn BroadPhase,
        generator: &mut dyn ContactGenerator,
    ) -> Result<Vec<EdgeId>> {
        self.graph.begin_pass();

        let mut bounds = Vec::with_capacity(group.len());
        for &id in group.bodies() {
            let body = self.bodies.body(id)?;
            bounds.push((id, generator.bounds(body)));
        }

        let edges = broad_phase.find_pairs(&bounds, &self.bodies, &mut self.graph)?;
        debug!(
            generation = self.graph.generation(),
            edges = edges.len(),
            "broad phase reported overlapping pairs"
        );

        for &edge_id in &edges {
            let (body_a, body_b) = {
                let edge = self.graph.edge(edge_id)?;
                (edge.body_a(), edge.body_b())
            };
            let reports = {
                let a = self.bodies.body(body_a)?;
                let b = self.bodies.body(body_b)?;
                generator.generate(a, b)
            };
            for (feature, points) in reports {
                self.graph.report(edge_id, feature, &points)?;
            }
        }

        Ok(edges)
    }

    /// Clear the per-step external force and torque accumulators.
    pub fn clear_forces(&mut self) {
        for body in self.bodies.iter_mut() {
            body.force = Vector3::zeros();
            body.torque = Vector3::zeros();
        }
    }

    /// Update every body's sleepy flag against a speed threshold.
    pub fn update_sleep_flags(&mut self, threshold: f64) {
        for body in self.bodies.iter_mut() {
            body.sleepy = !body.fixed
                && body.linear_velocity.norm() < threshold
                && body.angular_velocity.norm() < threshold;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::broad_phase::SpatialHashBroadPhase;
    use nalgebra::Point3;
    use rbd_types::MassProperties;

    /// Sphere-only narrow phase used across the core tests.
    pub(crate) struct SphereGenerator {
        pub radii: Vec<f64>,
    }

    impl ContactGenerator for SphereGenerator {
        fn bounds(&self, body: &Body) -> Aabb {
            let r = self.radii[body.id.index()];
            Aabb::from_center(body.position, Vector3::new(r, r, r))
        }

        fn generate(&mut self, a: &Body, b: &Body) -> Vec<(FeaturePair, Vec<ContactPoint>)> {
            let ra = self.radii[a.id.index()];
            let rb = self.radii[b.id.index()];
            let delta = a.position - b.position;
            let distance = delta.norm();
            if distance <= f64::EPSILON || distance >= ra + rb {
                return Vec::new();
            }

            let normal = delta / distance;
            let depth = ra + rb - distance;
            let world = b.position + normal * (rb - depth * 0.5);
            let local_a = a.orientation.inverse() * (world - a.position);
            let local_b = b.orientation.inverse() * (world - b.position);
            vec![(
                (0, 0),
                vec![ContactPoint::new(
                    Point3::from(local_a),
                    Point3::from(local_b),
                    normal,
                    depth,
                )],
            )]
        }
    }

    #[test]
    fn test_detection_pass_creates_contacts() {
        let mut world = World::new();
        let a = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.0, 0.0, 0.0),
        ));
        let b = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.8, 0.0, 0.0),
        ));

        let group = world.everything();
        let mut broad = SpatialHashBroadPhase::new();
        let mut spheres = SphereGenerator {
            radii: vec![0.5, 0.5],
        };

        let edges = world.detect(&group, &mut broad, &mut spheres).unwrap();
        assert_eq!(edges.len(), 1);

        let edge = world.graph.edge(edges[0]).unwrap();
        assert_eq!(edge.contacts().len(), 1);
        let contact = &edge.contacts()[0];
        // Normal points from B toward A, which here is -X.
        assert!(contact.normal.x < 0.0);
        assert!((contact.depth - 0.2).abs() < 1e-10);
        let _ = (a, b);
    }

    #[test]
    fn test_detection_pass_empties_separated_edges() {
        let mut world = World::new();
        world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.0, 0.0, 0.0),
        ));
        let b = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.8, 0.0, 0.0),
        ));

        let group = world.everything();
        let mut broad = SpatialHashBroadPhase::new();
        let mut spheres = SphereGenerator {
            radii: vec![0.5, 0.5],
        };
        let edges = world.detect(&group, &mut broad, &mut spheres).unwrap();
        assert_eq!(edges.len(), 1);

        // Move B away; the edge goes stale on the next pass.
        world.bodies.body_mut(b).unwrap().position = Point3::new(5.0, 0.0, 0.0);
        let edges = world.detect(&group, &mut broad, &mut spheres).unwrap();
        assert!(edges.is_empty());
        assert!(!world.graph.is_up_to_date(EdgeId::new(0)).unwrap());
    }

    #[test]
    fn test_sleep_flags() {
        let mut world = World::new();
        let slow = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::origin(),
        ));
        let fast = world.add_body(
            Body::new(MassProperties::sphere(1.0, 0.5), Point3::new(2.0, 0.0, 0.0))
                .with_linear_velocity(Vector3::new(3.0, 0.0, 0.0)),
        );
        let ground = world.add_body(Body::new_fixed(Point3::new(0.0, 0.0, -1.0)));

        world.update_sleep_flags(0.01);
        assert!(world.bodies.body(slow).unwrap().sleepy);
        assert!(!world.bodies.body(fast).unwrap().sleepy);
        // Fixed bodies are never marked sleepy.
        assert!(!world.bodies.body(ground).unwrap().sleepy);
    }
}
