//! Broad-phase collision detection over a spatial hash grid.
//!
//! The broad phase consumes per-body bounding boxes, reports every
//! overlapping pair as a canonical contact-graph edge, and stamps each
//! reported edge with the pass's generation so that a pair is reported at
//! most once per pass. Edges whose boxes no longer overlap are simply not
//! reported; their stale stamps exclude them from assembly.

use hashbrown::HashMap;

use rbd_contact::{ContactGraph, EdgeId};
use rbd_types::{BodyId, BodySet, Result};

use crate::aabb::Aabb;

/// Strategy interface for broad-phase algorithms.
///
/// Implementations create or reuse edges through the graph and must report
/// each overlapping pair at most once per detection pass (the edge stamp
/// guards this). Self pairs and fixed-fixed pairs are never reported.
pub trait BroadPhase {
    /// Report all overlapping pairs for the given bounds.
    ///
    /// Returns the edges touched by this pass, each freshly reset and
    /// stamped with the graph's current generation.
    fn find_pairs(
        &mut self,
        bounds: &[(BodyId, Aabb)],
        bodies: &BodySet,
        graph: &mut ContactGraph,
    ) -> Result<Vec<EdgeId>>;
}

/// Report one overlapping pair through the graph, honoring the
/// once-per-pass stamp guard. Returns the edge when it was newly touched.
fn report_pair(
    a: BodyId,
    b: BodyId,
    bodies: &BodySet,
    graph: &mut ContactGraph,
) -> Result<Option<EdgeId>> {
    let body_a = bodies.body(a)?;
    let body_b = bodies.body(b)?;
    if body_a.fixed && body_b.fixed {
        return Ok(None);
    }

    let edge = graph.get_or_create(a, b, body_a.material, body_b.material)?;
    if graph.refresh(edge)? {
        Ok(Some(edge))
    } else {
        Ok(None)
    }
}

/// Spatial-hashing broad phase.
///
/// Space is partitioned into a hashed grid whose cell size is re-derived
/// every pass from the average box extent. Each box is rasterized over the
/// cells it touches; candidate pairs sharing a cell are then tested for
/// actual box overlap. Boxes spanning more than [`Self::LARGE_SPAN`] cells
/// on any axis (ground planes, world bounds) skip the grid and are tested
/// against every other body instead, which keeps the cell lists small.
#[derive(Debug, Clone)]
pub struct SpatialHashBroadPhase {
    /// Lower clamp for the derived cell size.
    min_cell_size: f64,
    /// Scratch cell map, reused across passes.
    cells: HashMap<(i64, i64, i64), Vec<usize>>,
}

impl Default for SpatialHashBroadPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialHashBroadPhase {
    /// Boxes spanning more than this many cells on an axis bypass the grid.
    const LARGE_SPAN: i64 = 64;

    /// Create a spatial-hash broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_cell_size: 1e-3,
            cells: HashMap::new(),
        }
    }

    /// Set the lower clamp for the auto-derived cell size.
    #[must_use]
    pub fn with_min_cell_size(mut self, min_cell_size: f64) -> Self {
        self.min_cell_size = min_cell_size.max(f64::EPSILON);
        self
    }

    /// Cell size derived from the average box extent.
    fn cell_size(&self, bounds: &[(BodyId, Aabb)]) -> f64 {
        let mut total = 0.0;
        let mut counted = 0usize;
        for (_, aabb) in bounds {
            let e = aabb.extents();
            let mean = (e.x + e.y + e.z) / 3.0;
            if mean.is_finite() && mean < 1e6 {
                total += mean;
                counted += 1;
            }
        }
        if counted == 0 || total <= 0.0 {
            return 1.0;
        }
        (total / counted as f64).max(self.min_cell_size)
    }

    fn cell_range(aabb: &Aabb, cell: f64) -> ([i64; 3], [i64; 3]) {
        let lo = [
            (aabb.min.x / cell).floor() as i64,
            (aabb.min.y / cell).floor() as i64,
            (aabb.min.z / cell).floor() as i64,
        ];
        let hi = [
            (aabb.max.x / cell).floor() as i64,
            (aabb.max.y / cell).floor() as i64,
            (aabb.max.z / cell).floor() as i64,
        ];
        (lo, hi)
    }
}

impl BroadPhase for SpatialHashBroadPhase {
    fn find_pairs(
        &mut self,
        bounds: &[(BodyId, Aabb)],
        bodies: &BodySet,
        graph: &mut ContactGraph,
    ) -> Result<Vec<EdgeId>> {
        let mut edges = Vec::new();
        if bounds.len() < 2 {
            return Ok(edges);
        }

        let cell = self.cell_size(bounds);
        self.cells.clear();
        let mut oversized: Vec<usize> = Vec::new();

        // Insert every box into the cells it touches.
        for (index, (_, aabb)) in bounds.iter().enumerate() {
            let (lo, hi) = Self::cell_range(aabb, cell);
            if (0..3).any(|k| hi[k] - lo[k] > Self::LARGE_SPAN) {
                oversized.push(index);
                continue;
            }
            for ix in lo[0]..=hi[0] {
                for iy in lo[1]..=hi[1] {
                    for iz in lo[2]..=hi[2] {
                        self.cells.entry((ix, iy, iz)).or_default().push(index);
                    }
                }
            }
        }

        // Candidate pairs within each cell. The edge stamp deduplicates
        // pairs sharing several cells.
        for slots in self.cells.values() {
            for (i, &a) in slots.iter().enumerate() {
                for &b in &slots[i + 1..] {
                    if bounds[a].1.overlaps(&bounds[b].1) {
                        if let Some(edge) =
                            report_pair(bounds[a].0, bounds[b].0, bodies, graph)?
                        {
                            edges.push(edge);
                        }
                    }
                }
            }
        }

        // Oversized boxes are tested against everything.
        for (i, &a) in oversized.iter().enumerate() {
            for (b, _) in bounds.iter().enumerate() {
                let both_large = oversized[..=i].contains(&b);
                if a == b || both_large {
                    continue;
                }
                if bounds[a].1.overlaps(&bounds[b].1) {
                    if let Some(edge) = report_pair(bounds[a].0, bounds[b].0, bodies, graph)? {
                        edges.push(edge);
                    }
                }
            }
        }

        Ok(edges)
    }
}

/// Brute-force all-pairs broad phase.
///
/// The O(n²) baseline; also serves as the differential-test oracle for the
/// spatial hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPairs;

impl AllPairs {
    /// Create the all-pairs broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BroadPhase for AllPairs {
    fn find_pairs(
        &mut self,
        bounds: &[(BodyId, Aabb)],
        bodies: &BodySet,
        graph: &mut ContactGraph,
    ) -> Result<Vec<EdgeId>> {
        let mut edges = Vec::new();
        for (i, (a, aabb_a)) in bounds.iter().enumerate() {
            for (b, aabb_b) in &bounds[i + 1..] {
                if aabb_a.overlaps(aabb_b) {
                    if let Some(edge) = report_pair(*a, *b, bodies, graph)? {
                        edges.push(edge);
                    }
                }
            }
        }
        Ok(edges)
    }
}
