//! The body-pair contact graph with generation-stamped invalidation.

use hashbrown::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rbd_types::{BodyId, MaterialId, RbdError, Result};

use crate::contact::ContactPoint;

/// Unique identifier for an edge in the contact graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EdgeId(pub u32);

impl EdgeId {
    /// Create an edge ID from a raw index.
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

/// Identifies the pair of geometric features a narrow-phase report came
/// from. Used to suppress duplicate reports within one detection pass and
/// to match warm-start impulses across passes.
pub type FeaturePair = (u32, u32);

/// Cached impulses carried across detection passes for warm starting.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct CachedImpulse {
    normal: f64,
    friction: Vec<f64>,
}

/// An edge of the contact graph: a canonically ordered body pair with its
/// cached contact list.
///
/// The lower-id body is always stored as A. The `stamp` records the
/// detection generation that last touched this edge; contacts are only
/// valid while `stamp` equals the owning graph's current generation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Edge {
    id: EdgeId,
    body_a: BodyId,
    body_b: BodyId,
    material_a: MaterialId,
    material_b: MaterialId,
    contacts: Vec<ContactPoint>,
    /// Feature pair each contact was reported under, parallel to `contacts`.
    features: Vec<FeaturePair>,
    /// Feature pairs already reported in the current pass.
    reported: HashSet<FeaturePair>,
    /// Impulses saved from the previous pass, keyed by feature pair.
    impulse_cache: HashMap<FeaturePair, CachedImpulse>,
    stamp: u64,
    /// Set when the bodies were at relative rest the last time this edge
    /// was resolved; consumed by stack analysis.
    pub relative_resting: bool,
}

impl Edge {
    /// This edge's handle.
    #[must_use]
    pub fn id(&self) -> EdgeId {
        self.id
    }

    /// The lower-id body of the pair.
    #[must_use]
    pub fn body_a(&self) -> BodyId {
        self.body_a
    }

    /// The higher-id body of the pair.
    #[must_use]
    pub fn body_b(&self) -> BodyId {
        self.body_b
    }

    /// Material handle of body A.
    #[must_use]
    pub fn material_a(&self) -> MaterialId {
        self.material_a
    }

    /// Material handle of body B.
    #[must_use]
    pub fn material_b(&self) -> MaterialId {
        self.material_b
    }

    /// The cached contacts.
    #[must_use]
    pub fn contacts(&self) -> &[ContactPoint] {
        &self.contacts
    }

    /// The cached contacts, mutably.
    pub fn contacts_mut(&mut self) -> &mut [ContactPoint] {
        &mut self.contacts
    }

    /// Generation that last touched this edge.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Check the stamp against a generation counter.
    #[must_use]
    pub fn is_up_to_date(&self, generation: u64) -> bool {
        self.stamp == generation
    }

    /// Given one body of the pair, return the other.
    pub fn other_body(&self, body: BodyId) -> Result<BodyId> {
        if body == self.body_a {
            Ok(self.body_b)
        } else if body == self.body_b {
            Ok(self.body_a)
        } else {
            Err(RbdError::logic(format!(
                "{body} is not incident to edge ({}, {})",
                self.body_a, self.body_b
            )))
        }
    }

    /// Clear the contact list for a new detection pass.
    ///
    /// Accumulated impulses are moved into the warm-start cache keyed by
    /// feature pair before the contacts are dropped; the per-pass duplicate
    /// bookkeeping is cleared.
    fn reset(&mut self) {
        self.impulse_cache.clear();
        for (contact, feature) in self.contacts.drain(..).zip(self.features.drain(..)) {
            self.impulse_cache.insert(
                feature,
                CachedImpulse {
                    normal: contact.normal_impulse,
                    friction: contact.friction_impulse,
                },
            );
        }
        self.reported.clear();
    }

    /// Append contacts reported by the narrow phase for a feature pair.
    ///
    /// A feature pair already reported in this pass is skipped, which makes
    /// the narrow-phase contract idempotent within one `reset()` window.
    /// Warm-start impulses cached under the same feature pair are restored
    /// onto the fresh contacts.
    fn report(&mut self, feature: FeaturePair, points: &[ContactPoint]) {
        if !self.reported.insert(feature) {
            return;
        }
        let cached = self.impulse_cache.remove(&feature);
        for point in points {
            let mut contact = point.clone();
            if let Some(cache) = &cached {
                contact.normal_impulse = cache.normal;
                contact.friction_impulse = cache.friction.clone();
            }
            self.contacts.push(contact);
            self.features.push(feature);
        }
    }
}

/// The contact-cache graph: one [`Edge`] per unordered body pair, a
/// per-body incidence list, and the detection generation counter.
///
/// The generation counter is owned by the graph instance - staleness is
/// always judged against the engine that produced the stamps, never against
/// ambient global state.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactGraph {
    edges: Vec<Edge>,
    lookup: HashMap<u64, EdgeId>,
    incident: Vec<Vec<EdgeId>>,
    generation: u64,
}

impl Default for ContactGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical lookup key for an unordered body pair (`a < b` on entry).
///
/// Small ids pack into `(a << 16) | b`; wide pairs use the full 32-bit ids
/// with the top bit set, so the two encodings never collide.
fn pair_key(a: u32, b: u32) -> u64 {
    if a < 0x1_0000 && b < 0x1_0000 {
        u64::from((a << 16) | b)
    } else {
        (1 << 63) | (u64::from(a) << 32) | u64::from(b)
    }
}

impl ContactGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            edges: Vec::new(),
            lookup: HashMap::new(),
            incident: Vec::new(),
            // Start at 1 so freshly created edges (stamp 0) are stale.
            generation: 1,
        }
    }

    /// The current detection generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Begin a new detection pass, invalidating every edge's stamp.
    ///
    /// Returns the new generation.
    pub fn begin_pass(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Return the canonical edge for a body pair, creating it if absent.
    ///
    /// The pair is stored with the lower-id body as A regardless of the
    /// argument order. Self pairs are rejected.
    pub fn get_or_create(
        &mut self,
        a: BodyId,
        b: BodyId,
        material_a: MaterialId,
        material_b: MaterialId,
    ) -> Result<EdgeId> {
        if a == b {
            return Err(RbdError::invalid_argument(
                "self pairs have no contact edge",
            ));
        }
        let (a, b, material_a, material_b) = if a < b {
            (a, b, material_a, material_b)
        } else {
            (b, a, material_b, material_a)
        };

        let key = pair_key(a.raw(), b.raw());
        if let Some(&id) = self.lookup.get(&key) {
            return Ok(id);
        }

        let id = EdgeId::new(self.edges.len() as u32);
        self.edges.push(Edge {
            id,
            body_a: a,
            body_b: b,
            material_a,
            material_b,
            contacts: Vec::new(),
            features: Vec::new(),
            reported: HashSet::new(),
            impulse_cache: HashMap::new(),
            stamp: 0,
            relative_resting: false,
        });
        self.lookup.insert(key, id);

        let max_index = b.index();
        if self.incident.len() <= max_index {
            self.incident.resize_with(max_index + 1, Vec::new);
        }
        self.incident[a.index()].push(id);
        self.incident[b.index()].push(id);

        Ok(id)
    }

    /// Look up the edge for a body pair without creating one.
    #[must_use]
    pub fn find(&self, a: BodyId, b: BodyId) -> Option<EdgeId> {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.lookup.get(&pair_key(a.raw(), b.raw())).copied()
    }

    /// Mark an edge as touched by the current pass.
    ///
    /// The first touch in a pass resets the edge (clears contacts into the
    /// warm-start cache and clears the duplicate-report bookkeeping) and
    /// stamps it with the current generation. Returns `true` on the first
    /// touch of the pass, `false` if the edge was already current.
    pub fn refresh(&mut self, id: EdgeId) -> Result<bool> {
        let generation = self.generation;
        let edge = self.edge_mut(id)?;
        if edge.stamp == generation {
            return Ok(false);
        }
        edge.reset();
        edge.stamp = generation;
        Ok(true)
    }

    /// Append narrow-phase contacts to an edge under a feature pair.
    ///
    /// Implies [`refresh`](Self::refresh) when the edge has not been touched
    /// in this pass yet.
    pub fn report(&mut self, id: EdgeId, feature: FeaturePair, points: &[ContactPoint]) -> Result<()> {
        self.refresh(id)?;
        let edge = self.edge_mut(id)?;
        edge.report(feature, points);
        Ok(())
    }

    /// Check whether an edge's contacts are valid for the current pass.
    pub fn is_up_to_date(&self, id: EdgeId) -> Result<bool> {
        Ok(self.edge(id)?.stamp == self.generation)
    }

    /// Look up an edge by handle.
    pub fn edge(&self, id: EdgeId) -> Result<&Edge> {
        self.edges
            .get(id.index())
            .ok_or(RbdError::InvalidEdgeId(id.raw()))
    }

    /// Look up an edge mutably by handle.
    pub fn edge_mut(&mut self, id: EdgeId) -> Result<&mut Edge> {
        self.edges
            .get_mut(id.index())
            .ok_or(RbdError::InvalidEdgeId(id.raw()))
    }

    /// Edges incident to a body, in creation order.
    #[must_use]
    pub fn edges_of(&self, body: BodyId) -> &[EdgeId] {
        self.incident
            .get(body.index())
            .map_or(&[][..], Vec::as_slice)
    }

    /// Iterate over all edges ever created.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Number of edges ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check if the graph has no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
