//! Partitioning a world into independent body groups.

use hashbrown::HashMap;

use rbd_constraint::JointSet;
use rbd_contact::ContactGraph;
use rbd_types::{BodyGroup, BodyId, BodySet, Result};

/// Union-find over body indices with path compression.
#[derive(Debug)]
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Builds the connected components of the contact/joint graph as
/// [`BodyGroup`]s.
///
/// Two dynamic bodies belong to the same component when a live (up-to-date,
/// contact-carrying) edge or a joint connects them. Fixed bodies never merge
/// components - a shared ground does not weld two distant piles together -
/// but each component includes the fixed bodies its members touch, so the
/// resulting groups assemble their supporting constraints completely.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupBuilder;

impl GroupBuilder {
    /// Partition all bodies into connected components.
    ///
    /// Components are returned ordered by their lowest body id, and every
    /// group's body list is ascending, so the output is deterministic for
    /// a given world state.
    pub fn connected_components(
        bodies: &BodySet,
        graph: &ContactGraph,
        joints: &JointSet,
    ) -> Result<Vec<BodyGroup>> {
        let n = bodies.len();
        let mut uf = UnionFind::new(n);

        let fixed: Vec<bool> = bodies.iter().map(|b| b.fixed).collect();

        for edge in graph.edges() {
            if !edge.is_up_to_date(graph.generation()) || edge.contacts().is_empty() {
                continue;
            }
            let (a, b) = (edge.body_a().index(), edge.body_b().index());
            if !fixed[a] && !fixed[b] {
                uf.union(a, b);
            }
        }
        for (_, joint) in joints.iter() {
            let (a, b) = (joint.parent().index(), joint.child().index());
            if !fixed[a] && !fixed[b] {
                uf.union(a, b);
            }
        }

        // Components keyed by root, visiting bodies in id order.
        let mut components: HashMap<usize, BodyGroup> = HashMap::new();
        let mut order: Vec<usize> = Vec::new();
        for index in 0..n {
            if fixed[index] {
                continue;
            }
            let root = uf.find(index);
            let group = components.entry(root).or_insert_with(|| {
                order.push(root);
                BodyGroup::new()
            });
            group.add_body(BodyId::new(index as u32));
        }

        // Attach touched fixed bodies and contained joints.
        for edge in graph.edges() {
            if !edge.is_up_to_date(graph.generation()) || edge.contacts().is_empty() {
                continue;
            }
            let (a, b) = (edge.body_a().index(), edge.body_b().index());
            match (fixed[a], fixed[b]) {
                (true, false) => {
                    if let Some(group) = components.get_mut(&uf.find(b)) {
                        group.add_body(edge.body_a());
                    }
                }
                (false, true) => {
                    if let Some(group) = components.get_mut(&uf.find(a)) {
                        group.add_body(edge.body_b());
                    }
                }
                _ => {}
            }
        }
        for (id, joint) in joints.iter() {
            let (a, b) = (joint.parent().index(), joint.child().index());
            let root = match (fixed[a], fixed[b]) {
                (false, false) => Some(uf.find(a)),
                (true, false) => {
                    if let Some(group) = components.get_mut(&uf.find(b)) {
                        group.add_body(joint.parent());
                    }
                    Some(uf.find(b))
                }
                (false, true) => {
                    if let Some(group) = components.get_mut(&uf.find(a)) {
                        group.add_body(joint.child());
                    }
                    Some(uf.find(a))
                }
                (true, true) => None,
            };
            if let Some(root) = root {
                if let Some(group) = components.get_mut(&root) {
                    group.add_joint(id);
                }
            }
        }

        // Deterministic output: order components by their lowest body id.
        let mut groups: Vec<BodyGroup> = order
            .into_iter()
            .filter_map(|root| components.remove(&root))
            .collect();
        groups.sort_by_key(|g| g.bodies().first().copied());
        Ok(groups)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};
    use rbd_constraint::BallJoint;
    use rbd_contact::ContactPoint;
    use rbd_types::{Body, MassProperties, MaterialId};

    fn dynamic_body(z: f64) -> Body {
        Body::new(MassProperties::sphere(1.0, 0.5), Point3::new(0.0, 0.0, z))
    }

    fn touch(graph: &mut ContactGraph, a: BodyId, b: BodyId) {
        let edge = graph
            .get_or_create(a, b, MaterialId::DEFAULT, MaterialId::DEFAULT)
            .unwrap();
        graph
            .report(
                edge,
                (0, 0),
                &[ContactPoint::new(
                    Point3::origin(),
                    Point3::origin(),
                    Vector3::z(),
                    0.0,
                )],
            )
            .unwrap();
    }

    #[test]
    fn test_contact_chain_forms_one_component() {
        let mut bodies = BodySet::new();
        let a = bodies.insert(dynamic_body(1.0));
        let b = bodies.insert(dynamic_body(2.0));
        let c = bodies.insert(dynamic_body(3.0));
        let lone = bodies.insert(dynamic_body(9.0));

        let mut graph = ContactGraph::new();
        graph.begin_pass();
        touch(&mut graph, a, b);
        touch(&mut graph, b, c);

        let groups =
            GroupBuilder::connected_components(&bodies, &graph, &JointSet::new()).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].bodies(), &[a, b, c]);
        assert_eq!(groups[1].bodies(), &[lone]);
    }

    #[test]
    fn test_fixed_body_does_not_merge_components() {
        let mut bodies = BodySet::new();
        let ground = bodies.insert(Body::new_fixed(Point3::origin()));
        let left = bodies.insert(dynamic_body(1.0));
        let right = bodies.insert(dynamic_body(2.0));

        let mut graph = ContactGraph::new();
        graph.begin_pass();
        touch(&mut graph, ground, left);
        touch(&mut graph, ground, right);

        let groups =
            GroupBuilder::connected_components(&bodies, &graph, &JointSet::new()).unwrap();

        // Two separate piles, each including the shared ground.
        assert_eq!(groups.len(), 2);
        assert!(groups[0].contains_body(ground));
        assert!(groups[1].contains_body(ground));
        assert!(groups[0].contains_body(left));
        assert!(groups[1].contains_body(right));
    }

    #[test]
    fn test_joints_connect_components() {
        let mut bodies = BodySet::new();
        let a = bodies.insert(dynamic_body(1.0));
        let b = bodies.insert(dynamic_body(2.0));

        let mut joints = JointSet::new();
        let joint = joints.insert(Box::new(
            BallJoint::at_world_point(&bodies, a, b, Point3::new(0.0, 0.0, 1.5)).unwrap(),
        ));

        let graph = ContactGraph::new();
        let groups = GroupBuilder::connected_components(&bodies, &graph, &joints).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].bodies(), &[a, b]);
        assert_eq!(groups[0].joints(), &[joint]);
    }

    #[test]
    fn test_stale_edges_do_not_connect() {
        let mut bodies = BodySet::new();
        let a = bodies.insert(dynamic_body(1.0));
        let b = bodies.insert(dynamic_body(2.0));

        let mut graph = ContactGraph::new();
        graph.begin_pass();
        touch(&mut graph, a, b);
        // Invalidate the pass.
        graph.begin_pass();

        let groups =
            GroupBuilder::connected_components(&bodies, &graph, &JointSet::new()).unwrap();
        assert_eq!(groups.len(), 2);
    }
}
