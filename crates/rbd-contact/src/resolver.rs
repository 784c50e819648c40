//! Sequential resolution of penetrating contacts.
//!
//! The resolver treats collisions one at a time, always picking the contact
//! with the most negative relative normal velocity, applying an impulse from
//! the injected [`CollisionLaw`], and re-evaluating every contact that
//! shares a body with the one just resolved. It terminates once the most
//! approaching contact is within `epsilon` of rest.
//!
//! The contact ordering lives in an index-based binary heap that stores each
//! entry's heap position inline and maintains it across swaps, so re-keying
//! an entry after an impulse is O(log n) with no external position table to
//! invalidate.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use rbd_types::{BodyGroup, BodySet, RbdError, Result, StepSettings};

use crate::graph::{ContactGraph, EdgeId};
use crate::law::CollisionLaw;
use crate::material::MaterialTable;

/// Result of a [`SequentialResolver::resolve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// Number of impulses applied.
    pub impulses: usize,
    /// Whether the heap drained below the penetration threshold. `false`
    /// means the iteration cap was hit first.
    pub converged: bool,
}

/// Min-heap over contacts keyed by relative normal velocity.
///
/// Entries are addressed by a stable index; `order` holds the heap
/// arrangement and every entry records its own position in `order`.
#[derive(Debug, Default)]
struct ContactHeap {
    entries: Vec<HeapEntry>,
    order: Vec<usize>,
}

#[derive(Debug)]
struct HeapEntry {
    edge: EdgeId,
    contact: usize,
    key: f64,
    pos: usize,
}

impl ContactHeap {
    fn push(&mut self, edge: EdgeId, contact: usize, key: f64) -> usize {
        let entry = self.entries.len();
        let pos = self.order.len();
        self.entries.push(HeapEntry {
            edge,
            contact,
            key,
            pos,
        });
        self.order.push(entry);
        self.sift_up(pos);
        entry
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The entry with the smallest key.
    fn peek_min(&self) -> Result<(EdgeId, usize, f64)> {
        let &entry = self
            .order
            .first()
            .ok_or_else(|| RbdError::logic("peek on empty contact heap"))?;
        let entry = &self.entries[entry];
        Ok((entry.edge, entry.contact, entry.key))
    }

    /// Re-key an entry and restore the heap order around it.
    fn update(&mut self, entry: usize, key: f64) -> Result<()> {
        if entry >= self.entries.len() {
            return Err(RbdError::logic(format!(
                "contact heap entry {entry} out of range"
            )));
        }
        let pos = self.entries[entry].pos;
        self.entries[entry].key = key;
        let pos = self.sift_up(pos);
        self.sift_down(pos);
        Ok(())
    }

    fn key_at(&self, pos: usize) -> f64 {
        self.entries[self.order[pos]].key
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.order.swap(a, b);
        self.entries[self.order[a]].pos = a;
        self.entries[self.order[b]].pos = b;
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.key_at(pos) < self.key_at(parent) {
                self.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.order.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.key_at(left) < self.key_at(smallest) {
                smallest = left;
            }
            if right < len && self.key_at(right) < self.key_at(smallest) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }
}

/// Resolves inter-penetrating contacts of a group, most approaching first.
#[derive(Debug, Clone, Copy)]
pub struct SequentialResolver {
    /// Relative normal velocities above `-epsilon` count as resting.
    epsilon: f64,
    /// Hard cap on impulses applied per call.
    max_impulses: usize,
}

impl Default for SequentialResolver {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_impulses: 1024,
        }
    }
}

impl SequentialResolver {
    /// Create a resolver with the given resting threshold and impulse cap.
    pub fn new(epsilon: f64, max_impulses: usize) -> Result<Self> {
        if epsilon < 0.0 {
            return Err(RbdError::invalid_argument("epsilon cannot be negative"));
        }
        if max_impulses == 0 {
            return Err(RbdError::invalid_argument(
                "max_impulses must be at least 1",
            ));
        }
        Ok(Self {
            epsilon,
            max_impulses,
        })
    }

    /// Create a resolver from stepper settings.
    pub fn from_settings(settings: &StepSettings) -> Result<Self> {
        Self::new(settings.resolver_epsilon, settings.resolver_max_impulses)
    }

    /// Resolve all penetrating contacts in `group`.
    ///
    /// Only edges that are up to date for the graph's current generation
    /// participate; the same staleness test guards the neighbour
    /// re-evaluation after each impulse. Hitting the impulse cap is treated
    /// as a numerical degeneracy: it is logged and reported through
    /// [`ResolveOutcome::converged`], not raised as an error.
    pub fn resolve(
        &self,
        bodies: &mut BodySet,
        graph: &mut ContactGraph,
        materials: &MaterialTable,
        group: &BodyGroup,
        law: &dyn CollisionLaw,
    ) -> Result<ResolveOutcome> {
        // Gather the group's live edges once.
        let mut edges: Vec<EdgeId> = Vec::new();
        let mut seen: HashSet<EdgeId> = HashSet::new();
        for &body in group.bodies() {
            for &edge_id in graph.edges_of(body) {
                if !seen.insert(edge_id) {
                    continue;
                }
                if !graph.is_up_to_date(edge_id)? {
                    continue;
                }
                let edge = graph.edge(edge_id)?;
                if group.contains_body(edge.body_a()) && group.contains_body(edge.body_b()) {
                    edges.push(edge_id);
                }
            }
        }

        // Seed the heap with current relative normal velocities.
        let mut heap = ContactHeap::default();
        let mut entry_of: HashMap<(EdgeId, usize), usize> = HashMap::new();
        for &edge_id in &edges {
            let contact_count = graph.edge(edge_id)?.contacts().len();
            for slot in 0..contact_count {
                let speed = Self::normal_speed(bodies, graph, edge_id, slot)?;
                graph.edge_mut(edge_id)?.contacts_mut()[slot].normal_speed = speed;
                let entry = heap.push(edge_id, slot, speed);
                entry_of.insert((edge_id, slot), entry);
            }
        }

        if heap.is_empty() {
            return Ok(ResolveOutcome {
                impulses: 0,
                converged: true,
            });
        }

        let mut impulses = 0;
        while impulses < self.max_impulses {
            let (edge_id, slot, key) = heap.peek_min()?;
            if key >= -self.epsilon {
                debug!(impulses, "sequential resolver drained");
                self.mark_resting(graph, &edges)?;
                return Ok(ResolveOutcome {
                    impulses,
                    converged: true,
                });
            }

            // Compute and apply the impulse pair for the worst contact.
            let (body_a_id, body_b_id, contact) = {
                let edge = graph.edge(edge_id)?;
                (
                    edge.body_a(),
                    edge.body_b(),
                    edge.contacts()[slot].clone(),
                )
            };
            let material = materials.get(
                graph.edge(edge_id)?.material_a(),
                graph.edge(edge_id)?.material_b(),
            );
            let impulse = {
                let body_a = bodies.body(body_a_id)?;
                let body_b = bodies.body(body_b_id)?;
                law.impulse(body_a, body_b, &contact, material)
            };

            {
                let (body_a, body_b) = bodies.pair_mut(body_a_id, body_b_id)?;
                let arm_a = body_a.arm_to_world(&contact.local_a);
                let arm_b = body_b.arm_to_world(&contact.local_b);
                body_a.apply_impulse(&impulse, &arm_a);
                body_b.apply_impulse(&-impulse, &arm_b);
            }

            // Remember the normal component for warm starting.
            let applied_normal = contact.normal.dot(&impulse);
            graph.edge_mut(edge_id)?.contacts_mut()[slot].normal_impulse += applied_normal;
            impulses += 1;

            // Re-evaluate every contact sharing a body with this one.
            for &body in &[body_a_id, body_b_id] {
                let incident: Vec<EdgeId> = graph.edges_of(body).to_vec();
                for other_edge in incident {
                    if !graph.is_up_to_date(other_edge)? {
                        continue;
                    }
                    let contact_count = graph.edge(other_edge)?.contacts().len();
                    for other_slot in 0..contact_count {
                        let Some(&entry) = entry_of.get(&(other_edge, other_slot)) else {
                            continue;
                        };
                        let speed = Self::normal_speed(bodies, graph, other_edge, other_slot)?;
                        graph.edge_mut(other_edge)?.contacts_mut()[other_slot].normal_speed =
                            speed;
                        heap.update(entry, speed)?;
                    }
                }
            }
        }

        warn!(
            cap = self.max_impulses,
            "sequential resolver hit its impulse cap before draining"
        );
        self.mark_resting(graph, &edges)?;
        Ok(ResolveOutcome {
            impulses,
            converged: false,
        })
    }

    /// Relative normal velocity of one cached contact.
    fn normal_speed(
        bodies: &BodySet,
        graph: &ContactGraph,
        edge_id: EdgeId,
        slot: usize,
    ) -> Result<f64> {
        let edge = graph.edge(edge_id)?;
        let contact = &edge.contacts()[slot];
        let body_a = bodies.body(edge.body_a())?;
        let body_b = bodies.body(edge.body_b())?;
        let arm_a = body_a.arm_to_world(&contact.local_a);
        let arm_b = body_b.arm_to_world(&contact.local_b);
        let relative = body_a.velocity_at(&arm_a) - body_b.velocity_at(&arm_b);
        Ok(contact.normal.dot(&relative))
    }

    /// Flag edges whose contacts all ended at relative rest.
    fn mark_resting(&self, graph: &mut ContactGraph, edges: &[EdgeId]) -> Result<()> {
        for &edge_id in edges {
            let resting = {
                let edge = graph.edge(edge_id)?;
                !edge.contacts().is_empty()
                    && edge
                        .contacts()
                        .iter()
                        .all(|c| c.normal_speed.abs() <= self.epsilon.max(1e-6) * 10.0)
            };
            graph.edge_mut(edge_id)?.relative_resting = resting;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::contact::ContactPoint;
    use crate::law::NewtonImpulseLaw;
    use crate::material::Material;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};
    use rbd_types::{Body, BodyId, MassProperties, MaterialId};

    fn two_sphere_scene(restitution: f64) -> (BodySet, ContactGraph, MaterialTable, BodyGroup) {
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
        // Normal points from B toward A; attachments are the touching
        // surface points in each body's frame.
        graph
            .report(
                edge,
                (0, 0),
                &[ContactPoint::new(
                    Point3::new(0.5, 0.0, 0.0),
                    Point3::new(-0.5, 0.0, 0.0),
                    Vector3::new(-1.0, 0.0, 0.0),
                    0.0,
                )],
            )
            .unwrap();

        let materials =
            MaterialTable::new(Material::frictionless().with_restitution(restitution));
        let group = BodyGroup::from_bodies(vec![a, b]);
        (bodies, graph, materials, group)
    }

    #[test]
    fn test_elastic_head_on_exchanges_velocities() {
        let (mut bodies, mut graph, materials, group) = two_sphere_scene(1.0);
        let resolver = SequentialResolver::default();

        let outcome = resolver
            .resolve(
                &mut bodies,
                &mut graph,
                &materials,
                &group,
                &NewtonImpulseLaw::new(),
            )
            .unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.impulses, 1);

        let va = bodies.body(BodyId::new(0)).unwrap().linear_velocity;
        let vb = bodies.body(BodyId::new(1)).unwrap().linear_velocity;
        assert_relative_eq!(va.x, -1.0, epsilon = 1e-10);
        assert_relative_eq!(vb.x, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_post_impulse_contacts_are_separating() {
        let (mut bodies, mut graph, materials, group) = two_sphere_scene(0.5);
        let resolver = SequentialResolver::default();

        resolver
            .resolve(
                &mut bodies,
                &mut graph,
                &materials,
                &group,
                &NewtonImpulseLaw::new(),
            )
            .unwrap();

        for edge in graph.edges() {
            for contact in edge.contacts() {
                assert!(contact.normal_speed >= -1e-6);
            }
        }
    }

    #[test]
    fn test_stale_edges_are_skipped() {
        let (mut bodies, mut graph, materials, group) = two_sphere_scene(1.0);
        // Invalidate everything: a new pass with no narrow-phase reports.
        graph.begin_pass();

        let resolver = SequentialResolver::default();
        let outcome = resolver
            .resolve(
                &mut bodies,
                &mut graph,
                &materials,
                &group,
                &NewtonImpulseLaw::new(),
            )
            .unwrap();

        assert_eq!(outcome.impulses, 0);
        // Velocities untouched.
        assert_relative_eq!(
            bodies.body(BodyId::new(0)).unwrap().linear_velocity.x,
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_resting_contact_terminates_immediately() {
        let (mut bodies, mut graph, materials, group) = two_sphere_scene(1.0);
        // Bring both bodies to rest; the single contact is not penetrating.
        for body in bodies.iter_mut() {
            body.linear_velocity = Vector3::zeros();
        }

        let resolver = SequentialResolver::default();
        let outcome = resolver
            .resolve(
                &mut bodies,
                &mut graph,
                &materials,
                &group,
                &NewtonImpulseLaw::new(),
            )
            .unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.impulses, 0);
        // The edge is now flagged as a resting contact for stack analysis.
        assert!(graph.edges().next().unwrap().relative_resting);
    }

    #[test]
    fn test_heap_update_out_of_range_is_logic_error() {
        let mut heap = ContactHeap::default();
        heap.push(EdgeId::new(0), 0, -1.0);
        assert!(heap.update(5, 0.0).unwrap_err().is_logic_error());
    }

    #[test]
    fn test_heap_ordering_under_updates() {
        let mut heap = ContactHeap::default();
        let a = heap.push(EdgeId::new(0), 0, -1.0);
        let _b = heap.push(EdgeId::new(0), 1, -3.0);
        let _c = heap.push(EdgeId::new(0), 2, -2.0);

        assert_eq!(heap.peek_min().unwrap().1, 1);

        // Re-keying entry `a` below everything promotes it to the top.
        heap.update(a, -5.0).unwrap();
        assert_eq!(heap.peek_min().unwrap().1, 0);

        // And re-keying it above everything demotes it again.
        heap.update(a, 0.0).unwrap();
        assert_eq!(heap.peek_min().unwrap().1, 1);
    }
}
