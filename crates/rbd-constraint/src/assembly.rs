//! Assembly of the mixed complementarity problem for a body group.

use hashbrown::{HashMap, HashSet};
use nalgebra::{DVector, Matrix3, UnitVector3, Vector3};
use tracing::warn;

use rbd_contact::{ContactGraph, EdgeId, FrictionDirections, MaterialTable};
use rbd_types::{BodyGroup, BodyId, BodySet, JointId, RbdError, Result};

use crate::joint::JointSet;

/// Switches selecting which terms the assembler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblySwitches {
    /// Emit the Baumgarte stabilization term on the right-hand side.
    pub stabilization: bool,
    /// Emit friction rows for contacts.
    pub friction: bool,
    /// Emit restitution terms on the right-hand side.
    pub bounce: bool,
    /// Scale stabilization by each material's (or joint's) error-reduction
    /// parameter instead of the full positional error.
    pub erp: bool,
}

impl AssemblySwitches {
    /// Switches for a full dynamics step.
    #[must_use]
    pub fn dynamics() -> Self {
        Self {
            stabilization: true,
            friction: true,
            bounce: true,
            erp: true,
        }
    }

    /// Switches for a pure velocity-impulse resolution (no position terms).
    #[must_use]
    pub fn impact() -> Self {
        Self {
            stabilization: false,
            friction: true,
            bounce: true,
            erp: false,
        }
    }

    /// Switches for a first-order positional correction pass.
    #[must_use]
    pub fn correction() -> Self {
        Self {
            stabilization: true,
            friction: false,
            bounce: false,
            erp: true,
        }
    }
}

/// Where a constraint row came from; used to scatter solved impulses back
/// into the caches they warm start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    /// Non-penetration row of a cached contact.
    ContactNormal {
        /// The contact's edge.
        edge: EdgeId,
        /// Contact slot within the edge.
        contact: usize,
    },
    /// Friction row of a cached contact.
    ContactFriction {
        /// The contact's edge.
        edge: EdgeId,
        /// Contact slot within the edge.
        contact: usize,
        /// Friction direction index.
        direction: usize,
    },
    /// Row emitted by a joint or joint limit.
    Joint {
        /// The owning joint.
        joint: JointId,
    },
}

/// One row of the assembled system: a pair of 6-wide Jacobian blocks, box
/// bounds, regularization and right-hand side.
#[derive(Debug, Clone)]
pub struct ConstraintRow {
    /// First body of the row.
    pub body_a: BodyId,
    /// Second body of the row.
    pub body_b: BodyId,
    /// Linear Jacobian block of body A.
    pub lin_a: Vector3<f64>,
    /// Angular Jacobian block of body A.
    pub ang_a: Vector3<f64>,
    /// Linear Jacobian block of body B.
    pub lin_b: Vector3<f64>,
    /// Angular Jacobian block of body B.
    pub ang_b: Vector3<f64>,
    /// Lower impulse bound. For friction rows this is `-mu`, to be scaled
    /// by the coupled normal impulse.
    pub lower: f64,
    /// Upper impulse bound. For friction rows this is `+mu`.
    pub upper: f64,
    /// Right-hand side (target relative velocity).
    pub rhs: f64,
    /// Regularization (softness) of this row.
    pub gamma: f64,
    /// Friction coupling: `Some(i)` means the bounds scale with row `i`'s
    /// impulse; `None` means the bounds are fixed.
    pub normal_row: Option<usize>,
    /// Warm-start impulse carried over from the previous step.
    pub warm_start: f64,
    /// Origin of this row.
    pub source: RowSource,
    pub(crate) slot_a: usize,
    pub(crate) slot_b: usize,
}

impl ConstraintRow {
    /// A bilateral (equality) row with unbounded impulse.
    #[must_use]
    pub fn bilateral(
        body_a: BodyId,
        body_b: BodyId,
        lin_a: Vector3<f64>,
        ang_a: Vector3<f64>,
        lin_b: Vector3<f64>,
        ang_b: Vector3<f64>,
        source: RowSource,
    ) -> Self {
        Self {
            body_a,
            body_b,
            lin_a,
            ang_a,
            lin_b,
            ang_b,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            rhs: 0.0,
            gamma: 0.0,
            normal_row: None,
            warm_start: 0.0,
            source,
            slot_a: usize::MAX,
            slot_b: usize::MAX,
        }
    }

    /// Set the impulse bounds.
    #[must_use]
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Set the right-hand side.
    #[must_use]
    pub fn with_rhs(mut self, rhs: f64) -> Self {
        self.rhs = rhs;
        self
    }

    /// Set the regularization.
    #[must_use]
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }
}

/// Inverse generalized mass of one body in the problem.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InverseMassBlock {
    pub inv_mass: f64,
    pub inv_inertia: Matrix3<f64>,
}

/// The assembled mixed complementarity problem for one body group.
///
/// Rows reference bodies through compact slots assigned in group order; the
/// block-diagonal inverse mass operator holds one block per slot. Fixed
/// bodies participate with zero blocks, so their rows assemble uniformly
/// and solve to no-ops.
#[derive(Debug)]
pub struct NcpProblem {
    rows: Vec<ConstraintRow>,
    bodies: Vec<BodyId>,
    blocks: Vec<InverseMassBlock>,
    /// Pre-solve J·u per row.
    jv0: Vec<f64>,
}

impl NcpProblem {
    /// Number of constraint rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the problem has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The constraint rows.
    #[must_use]
    pub fn rows(&self) -> &[ConstraintRow] {
        &self.rows
    }

    /// Bodies covered by the problem, in slot order.
    #[must_use]
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// Pre-solve `J u` term of a row.
    #[must_use]
    pub fn velocity_term(&self, row: usize) -> f64 {
        self.jv0[row]
    }

    pub(crate) fn block(&self, slot: usize) -> &InverseMassBlock {
        &self.blocks[slot]
    }

    /// The warm-start impulse vector gathered from the contact caches.
    #[must_use]
    pub fn warm_start_vector(&self) -> DVector<f64> {
        DVector::from_iterator(self.rows.len(), self.rows.iter().map(|r| r.warm_start))
    }

    /// Compute the per-body velocity change `W Jᵀ x`.
    ///
    /// Returns `(body, delta_linear, delta_angular)` for every body slot.
    pub fn velocity_deltas(
        &self,
        x: &DVector<f64>,
    ) -> Result<Vec<(BodyId, Vector3<f64>, Vector3<f64>)>> {
        if x.len() != self.rows.len() {
            return Err(RbdError::DimensionMismatch {
                expected: self.rows.len(),
                actual: x.len(),
            });
        }

        let mut deltas = vec![(Vector3::zeros(), Vector3::zeros()); self.bodies.len()];
        for (row, &impulse) in self.rows.iter().zip(x.iter()) {
            if impulse == 0.0 {
                continue;
            }
            let block_a = &self.blocks[row.slot_a];
            let block_b = &self.blocks[row.slot_b];
            deltas[row.slot_a].0 += row.lin_a * (impulse * block_a.inv_mass);
            deltas[row.slot_a].1 += block_a.inv_inertia * row.ang_a * impulse;
            deltas[row.slot_b].0 += row.lin_b * (impulse * block_b.inv_mass);
            deltas[row.slot_b].1 += block_b.inv_inertia * row.ang_b * impulse;
        }

        Ok(self
            .bodies
            .iter()
            .zip(deltas)
            .map(|(&body, (lin, ang))| (body, lin, ang))
            .collect())
    }

    /// Write solved impulses back into the contact caches for the next
    /// step's warm start.
    pub fn store_impulses(&self, x: &DVector<f64>, graph: &mut ContactGraph) -> Result<()> {
        if x.len() != self.rows.len() {
            return Err(RbdError::DimensionMismatch {
                expected: self.rows.len(),
                actual: x.len(),
            });
        }

        for (row, &impulse) in self.rows.iter().zip(x.iter()) {
            match row.source {
                RowSource::ContactNormal { edge, contact } => {
                    graph.edge_mut(edge)?.contacts_mut()[contact].normal_impulse = impulse;
                }
                RowSource::ContactFriction {
                    edge,
                    contact,
                    direction,
                } => {
                    let point = &mut graph.edge_mut(edge)?.contacts_mut()[contact];
                    if point.friction_impulse.len() <= direction {
                        point.friction_impulse.resize(direction + 1, 0.0);
                    }
                    point.friction_impulse[direction] = impulse;
                }
                RowSource::Joint { .. } => {}
            }
        }
        Ok(())
    }
}

/// A deterministic tangent orthonormal to `n`.
///
/// Used when a contact is not sliding (or a prefixed tangent degenerates)
/// so friction rows still get a well-defined frame.
fn fallback_tangent(n: &Vector3<f64>) -> Vector3<f64> {
    let reference = if n.x.abs() < 0.577 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let tangent = n.cross(&reference);
    let norm = tangent.norm();
    if norm <= f64::EPSILON {
        // Degenerate normal; answered with a defined fallback.
        warn!("degenerate contact normal while building tangent frame");
        return Vector3::x();
    }
    tangent / norm
}

/// First friction tangent for a contact, honoring the material's policy.
fn friction_tangent(
    policy: &FrictionDirections,
    n: &Vector3<f64>,
    relative: &Vector3<f64>,
) -> Vector3<f64> {
    match policy {
        FrictionDirections::FromSliding => {
            let tangential = relative - n.dot(relative) * n;
            let speed = tangential.norm();
            if speed > 1e-9 {
                tangential / speed
            } else {
                fallback_tangent(n)
            }
        }
        FrictionDirections::Prefixed { tangent } => {
            let projected = tangent.into_inner() - n.dot(tangent) * n;
            let norm = projected.norm();
            if norm > 1e-9 {
                projected / norm
            } else {
                warn!("prefixed friction tangent is parallel to the contact normal");
                fallback_tangent(n)
            }
        }
    }
}

/// Assemble the NCP for a body group.
///
/// Walks the group's up-to-date edges and its joints, producing Jacobian
/// rows, the inverse-mass operator, per-row bounds, the friction dependency
/// index, regularization and the right-hand side. Contacts that are already
/// separating are still included; deciding activity is the solver's job.
/// The only assembler-side filter is edge staleness.
///
/// `dt` may be zero for pure impulse passes, in which case stabilization
/// must be switched off.
pub fn assemble(
    bodies: &BodySet,
    graph: &ContactGraph,
    joints: &JointSet,
    materials: &MaterialTable,
    group: &BodyGroup,
    dt: f64,
    switches: &AssemblySwitches,
) -> Result<NcpProblem> {
    if dt < 0.0 || !dt.is_finite() {
        return Err(RbdError::InvalidTimestep(dt));
    }
    if switches.stabilization && dt <= 0.0 {
        return Err(RbdError::invalid_argument(
            "stabilization requires a positive time step",
        ));
    }
    if group.is_empty() {
        return Err(RbdError::invalid_argument("cannot assemble an empty group"));
    }

    // Body slots in group order, with one inverse-mass block each.
    let mut slot_of: HashMap<BodyId, usize> = HashMap::new();
    let mut blocks = Vec::with_capacity(group.len());
    for (slot, &body_id) in group.bodies().iter().enumerate() {
        let body = bodies.body(body_id)?;
        slot_of.insert(body_id, slot);
        blocks.push(InverseMassBlock {
            inv_mass: body.inv_mass(),
            inv_inertia: body.inv_inertia_world(),
        });
    }

    let mut rows: Vec<ConstraintRow> = Vec::new();

    // Contact rows, one normal row per contact plus friction rows.
    let mut visited: HashSet<EdgeId> = HashSet::new();
    for &body_id in group.bodies() {
        for &edge_id in graph.edges_of(body_id) {
            if !visited.insert(edge_id) {
                continue;
            }
            if !graph.is_up_to_date(edge_id)? {
                continue;
            }
            let edge = graph.edge(edge_id)?;
            if !group.contains_body(edge.body_a()) || !group.contains_body(edge.body_b()) {
                continue;
            }

            let body_a = bodies.body(edge.body_a())?;
            let body_b = bodies.body(edge.body_b())?;
            let material = materials.get(edge.material_a(), edge.material_b());
            let erp = if switches.erp {
                material.error_reduction
            } else {
                1.0
            };

            for (slot, contact) in edge.contacts().iter().enumerate() {
                let n = contact.normal;
                let arm_a = body_a.arm_to_world(&contact.local_a);
                let arm_b = body_b.arm_to_world(&contact.local_b);
                let relative =
                    body_a.velocity_at(&arm_a) - body_b.velocity_at(&arm_b);
                let normal_speed = n.dot(&relative);

                let mut rhs = 0.0;
                if switches.bounce && material.restitution > 0.0 && normal_speed < 0.0 {
                    rhs += -material.restitution * normal_speed;
                }
                if switches.stabilization && contact.depth > 0.0 {
                    rhs += erp * contact.depth / dt;
                }

                let normal_index = rows.len();
                rows.push(
                    ConstraintRow::bilateral(
                        edge.body_a(),
                        edge.body_b(),
                        n,
                        arm_a.cross(&n),
                        -n,
                        -arm_b.cross(&n),
                        RowSource::ContactNormal {
                            edge: edge_id,
                            contact: slot,
                        },
                    )
                    .with_bounds(0.0, f64::INFINITY)
                    .with_rhs(rhs)
                    .with_gamma(material.softness),
                );
                rows[normal_index].warm_start = contact.normal_impulse;

                if !switches.friction || material.friction_directions == 0 {
                    continue;
                }

                let t1 = friction_tangent(&material.directions, &n, &relative);
                let t2 = n.cross(&t1);
                let count = material.friction_directions;
                for direction in 0..count {
                    // Directions fan out over the tangent plane; for the
                    // common two-direction case this is exactly (t1, t2).
                    let theta =
                        std::f64::consts::PI * direction as f64 / count.max(2) as f64;
                    let dir = if count <= 2 {
                        if direction == 0 {
                            t1
                        } else {
                            t2
                        }
                    } else {
                        t1 * theta.cos() + t2 * theta.sin()
                    };
                    let mu = material.friction_coefficient(direction);

                    let mut row = ConstraintRow::bilateral(
                        edge.body_a(),
                        edge.body_b(),
                        dir,
                        arm_a.cross(&dir),
                        -dir,
                        -arm_b.cross(&dir),
                        RowSource::ContactFriction {
                            edge: edge_id,
                            contact: slot,
                            direction,
                        },
                    )
                    .with_bounds(-mu, mu)
                    .with_gamma(material.softness);
                    row.normal_row = Some(normal_index);
                    row.warm_start =
                        contact.friction_impulse.get(direction).copied().unwrap_or(0.0);
                    rows.push(row);
                }
            }
        }
    }

    // Joint and limit rows.
    for &joint_id in group.joints() {
        let joint = joints.joint(joint_id)?;
        if !group.contains_body(joint.parent()) || !group.contains_body(joint.child()) {
            return Err(RbdError::invalid_argument(format!(
                "joint {} references a body outside the group",
                joint_id.raw()
            )));
        }
        joint.append_rows(bodies, joint_id, dt, switches, &mut rows)?;
    }

    // Resolve body slots and the pre-solve velocity term.
    let mut jv0 = Vec::with_capacity(rows.len());
    for row in &mut rows {
        row.slot_a = *slot_of
            .get(&row.body_a)
            .ok_or_else(|| RbdError::invalid_argument("row references a body outside the group"))?;
        row.slot_b = *slot_of
            .get(&row.body_b)
            .ok_or_else(|| RbdError::invalid_argument("row references a body outside the group"))?;

        let body_a = bodies.body(row.body_a)?;
        let body_b = bodies.body(row.body_b)?;
        jv0.push(
            row.lin_a.dot(&body_a.linear_velocity)
                + row.ang_a.dot(&body_a.angular_velocity)
                + row.lin_b.dot(&body_b.linear_velocity)
                + row.ang_b.dot(&body_b.angular_velocity),
        );
    }

    Ok(NcpProblem {
        rows,
        bodies: group.bodies().to_vec(),
        blocks,
        jv0,
    })
}

/// Build an orthonormal tangent for callers outside the assembler.
#[must_use]
pub fn tangent_frame(normal: &UnitVector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let t1 = fallback_tangent(normal);
    (t1, normal.cross(&t1))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use rbd_contact::{ContactPoint, Material};
    use rbd_types::{Body, MassProperties, MaterialId};

    fn contact_scene(
        material: Material,
    ) -> (BodySet, ContactGraph, JointSet, MaterialTable, BodyGroup) {
        let mut bodies = BodySet::new();
        let a = bodies.insert(
            Body::new(MassProperties::sphere(1.0, 0.5), Point3::new(-0.5, 0.0, 0.0))
                .with_linear_velocity(Vector3::new(1.0, 0.0, 0.0)),
        );
        let b = bodies.insert(
            Body::new(MassProperties::sphere(1.0, 0.5), Point3::new(0.5, 0.0, 0.0))
                .with_linear_velocity(Vector3::new(-1.0, 0.0, 0.0)),
        );

        let mut graph = ContactGraph::new();
        graph.begin_pass();
        let edge = graph
            .get_or_create(a, b, MaterialId::DEFAULT, MaterialId::DEFAULT)
            .unwrap();
        graph
            .report(
                edge,
                (0, 0),
                &[ContactPoint::new(
                    Point3::new(0.5, 0.0, 0.0),
                    Point3::new(-0.5, 0.0, 0.0),
                    Vector3::new(-1.0, 0.0, 0.0),
                    0.01,
                )],
            )
            .unwrap();

        let materials = MaterialTable::new(material);
        let group = BodyGroup::from_bodies(vec![a, b]);
        (bodies, graph, JointSet::new(), materials, group)
    }

    #[test]
    fn test_contact_rows_and_bounds() {
        let (bodies, graph, joints, materials, group) = contact_scene(Material::default());
        let problem = assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            0.01,
            &AssemblySwitches::dynamics(),
        )
        .unwrap();

        // One normal row + two friction rows.
        assert_eq!(problem.row_count(), 3);

        let normal = &problem.rows()[0];
        assert_eq!(normal.lower, 0.0);
        assert_eq!(normal.upper, f64::INFINITY);
        assert!(normal.normal_row.is_none());

        for friction in &problem.rows()[1..] {
            assert_eq!(friction.normal_row, Some(0));
            assert_relative_eq!(friction.upper, 0.5, epsilon = 1e-12);
            assert_relative_eq!(friction.lower, -0.5, epsilon = 1e-12);
            // Friction directions are orthogonal to the normal.
            assert_relative_eq!(friction.lin_a.dot(&normal.lin_a), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rhs_combines_bounce_and_stabilization() {
        let (bodies, graph, joints, materials, group) =
            contact_scene(Material::default().with_restitution(0.5).with_error_reduction(1.0));

        let dt = 0.01;
        let problem = assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            dt,
            &AssemblySwitches::dynamics(),
        )
        .unwrap();

        // Approach speed 2 => bounce 0.5 * 2 = 1; depth 0.01 over dt = 1.
        assert_relative_eq!(problem.rows()[0].rhs, 2.0, epsilon = 1e-10);

        // Impact switches drop the positional term.
        let impact = assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            0.0,
            &AssemblySwitches::impact(),
        )
        .unwrap();
        assert_relative_eq!(impact.rows()[0].rhs, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_separating_contacts_still_assembled() {
        let (mut bodies, graph, joints, materials, group) = contact_scene(Material::default());
        // Reverse the velocities so the contact is separating.
        for body in bodies.iter_mut() {
            body.linear_velocity = -body.linear_velocity;
        }

        let problem = assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            0.01,
            &AssemblySwitches::dynamics(),
        )
        .unwrap();
        assert_eq!(problem.row_count(), 3);
        assert!(problem.velocity_term(0) > 0.0);
    }

    #[test]
    fn test_stale_edges_excluded() {
        let (bodies, mut graph, joints, materials, group) = contact_scene(Material::default());
        graph.begin_pass();

        let problem = assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            0.01,
            &AssemblySwitches::dynamics(),
        )
        .unwrap();
        assert!(problem.is_empty());
    }

    #[test]
    fn test_preconditions() {
        let (bodies, graph, joints, materials, group) = contact_scene(Material::default());

        assert!(matches!(
            assemble(
                &bodies,
                &graph,
                &joints,
                &materials,
                &group,
                -0.01,
                &AssemblySwitches::dynamics(),
            ),
            Err(RbdError::InvalidTimestep(_))
        ));

        // Stabilization needs a positive step.
        assert!(assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            0.0,
            &AssemblySwitches::dynamics(),
        )
        .is_err());

        let empty = BodyGroup::new();
        assert!(assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &empty,
            0.01,
            &AssemblySwitches::dynamics(),
        )
        .is_err());
    }

    #[test]
    fn test_velocity_deltas_dimension_check() {
        let (bodies, graph, joints, materials, group) = contact_scene(Material::default());
        let problem = assemble(
            &bodies,
            &graph,
            &joints,
            &materials,
            &group,
            0.01,
            &AssemblySwitches::dynamics(),
        )
        .unwrap();

        let wrong = DVector::zeros(problem.row_count() + 1);
        assert!(matches!(
            problem.velocity_deltas(&wrong),
            Err(RbdError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fallback_tangent_is_orthonormal() {
        for n in [Vector3::x(), Vector3::y(), Vector3::z(), Vector3::new(0.6, 0.48, 0.64)] {
            let t = fallback_tangent(&n);
            assert_relative_eq!(t.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(t.dot(&n), 0.0, epsilon = 1e-12);
        }
    }
}
