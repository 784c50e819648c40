//! Stack analysis and layered propagation.
//!
//! A resting stack is partitioned into layers by "height": the shortest
//! contact-graph distance to a fixed body. Height 0 bodies touch a fixed
//! body directly, height 1 bodies rest on height 0 bodies, and so on.
//! Bodies unreachable from any fixed body form one final free-floating
//! layer above everything else.
//!
//! Propagation applies a caller-supplied per-layer algorithm bottom-up or
//! top-down. The fixated variant temporarily marks each layer's support
//! (every already-processed body below it) as fixed while the layer is
//! worked on, which is what keeps large contact forces at the bottom of a
//! stack from disturbing layers that are already settled; the flags are
//! always restored afterwards, even when the layer algorithm fails.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use rbd_contact::ContactGraph;
use rbd_types::{BodyGroup, BodyId, BodySet, RbdError, Result};

use crate::world::World;

/// Order in which layers are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending height, supports first.
    Upward,
    /// Descending height, top of the stack first.
    Downward,
}

/// One layer of a stack: a set of bodies at the same height, plus the
/// group handed to the per-layer algorithm (the layer bodies and their
/// supporting neighbours below).
#[derive(Debug, Clone)]
pub struct StackLayer {
    /// Height of this layer (0 = direct contact with a fixed body).
    pub height: u32,
    /// Bodies whose height equals [`height`](Self::height), ascending.
    bodies: Vec<BodyId>,
    /// The layer bodies plus their lower/fixed neighbours; this is what a
    /// per-layer algorithm operates on.
    group: BodyGroup,
}

impl StackLayer {
    /// Bodies at this layer's height.
    #[must_use]
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// The group (layer bodies plus supports) passed to layer algorithms.
    #[must_use]
    pub fn group(&self) -> &BodyGroup {
        &self.group
    }
}

/// The layering of one body group.
#[derive(Debug, Clone)]
pub struct StackLayers {
    layers: Vec<StackLayer>,
    heights: HashMap<BodyId, u32>,
}

impl StackLayers {
    /// Derive the layering of a group from its live contact edges.
    ///
    /// Only up-to-date edges that carry contacts count as support
    /// relations. Heights are breadth-first distances from the group's
    /// fixed bodies, so they are monotone non-decreasing along any chain
    /// of supports.
    pub fn build(bodies: &BodySet, graph: &ContactGraph, group: &BodyGroup) -> Result<Self> {
        if group.is_empty() {
            return Err(RbdError::invalid_argument(
                "cannot layer an empty group",
            ));
        }

        // Adjacency restricted to the group's live contact edges.
        let mut adjacency: HashMap<BodyId, Vec<BodyId>> = HashMap::new();
        for &body in group.bodies() {
            for &edge_id in graph.edges_of(body) {
                if !graph.is_up_to_date(edge_id)? {
                    continue;
                }
                let edge = graph.edge(edge_id)?;
                if edge.contacts().is_empty() {
                    continue;
                }
                let other = edge.other_body(body)?;
                if group.contains_body(other) {
                    adjacency.entry(body).or_default().push(other);
                }
            }
        }

        // Breadth-first heights from the fixed bodies.
        let mut heights: HashMap<BodyId, u32> = HashMap::new();
        let mut queue: VecDeque<BodyId> = VecDeque::new();
        for &body in group.bodies() {
            if bodies.body(body)?.fixed {
                queue.push_back(body);
            }
        }
        let mut max_height = 0;
        let seeds: HashSet<BodyId> = queue.iter().copied().collect();
        while let Some(body) = queue.pop_front() {
            let next_height = if seeds.contains(&body) {
                0
            } else {
                heights[&body] + 1
            };
            for &other in adjacency.get(&body).map_or(&[][..], Vec::as_slice) {
                if seeds.contains(&other) || heights.contains_key(&other) {
                    continue;
                }
                heights.insert(other, next_height);
                max_height = max_height.max(next_height);
                queue.push_back(other);
            }
        }

        // Free-floating bodies go into one final layer on top.
        let mut floating: Vec<BodyId> = Vec::new();
        for &body in group.bodies() {
            if !bodies.body(body)?.fixed && !heights.contains_key(&body) {
                floating.push(body);
            }
        }
        let floating_height = if heights.is_empty() {
            0
        } else {
            max_height + 1
        };
        for &body in &floating {
            heights.insert(body, floating_height);
        }

        // Assemble layers in ascending height order.
        let top = heights.values().copied().max().unwrap_or(0);
        let mut layers = Vec::new();
        for height in 0..=top {
            let mut members: Vec<BodyId> = heights
                .iter()
                .filter(|(_, &h)| h == height)
                .map(|(&b, _)| b)
                .collect();
            if members.is_empty() {
                continue;
            }
            members.sort_unstable();

            // The working group adds every fixed or lower neighbour, so
            // the layer's supporting contacts assemble fully.
            let mut layer_group = BodyGroup::from_bodies(members.clone());
            for &body in &members {
                for &other in adjacency.get(&body).map_or(&[][..], Vec::as_slice) {
                    let lower = heights.get(&other).map_or(true, |&h| h < height);
                    if lower {
                        layer_group.add_body(other);
                    }
                }
            }

            layers.push(StackLayer {
                height,
                bodies: members,
                group: layer_group,
            });
        }

        Ok(Self { layers, heights })
    }

    /// The layers in ascending height order.
    #[must_use]
    pub fn layers(&self) -> &[StackLayer] {
        &self.layers
    }

    /// Height of a body, if it belongs to a layer (fixed bodies do not).
    #[must_use]
    pub fn height_of(&self, body: BodyId) -> Option<u32> {
        self.heights.get(&body).copied()
    }
}

/// Derives and caches a group's layering and drives per-layer algorithms
/// over it.
#[derive(Debug, Default)]
pub struct StackAnalysis {
    cached: Option<(Vec<BodyId>, StackLayers)>,
}

impl StackAnalysis {
    /// Create an analysis with no cached layering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive the layering, then apply `f` to each layer in the given
    /// direction.
    pub fn run<F>(
        &mut self,
        world: &mut World,
        group: &BodyGroup,
        direction: Direction,
        f: F,
    ) -> Result<()>
    where
        F: FnMut(&mut World, &BodyGroup) -> Result<()>,
    {
        let layers = StackLayers::build(&world.bodies, &world.graph, group)?;
        let result = Self::propagate(world, &layers, direction, false, f);
        self.cached = Some((group.bodies().to_vec(), layers));
        result
    }

    /// Re-derive the layering, then apply `f` bottom-up, temporarily
    /// fixating each layer's already-processed support while `f` runs on
    /// it. Every body's fixed flag is restored before returning.
    pub fn run_fixated<F>(&mut self, world: &mut World, group: &BodyGroup, f: F) -> Result<()>
    where
        F: FnMut(&mut World, &BodyGroup) -> Result<()>,
    {
        let layers = StackLayers::build(&world.bodies, &world.graph, group)?;
        let result = Self::propagate(world, &layers, Direction::Upward, true, f);
        self.cached = Some((group.bodies().to_vec(), layers));
        result
    }

    /// Reapply `f` using the layering cached by a prior run on the same
    /// group.
    ///
    /// Valid only when the group's membership is unchanged; anything else
    /// is a logic error, since the cached heights would be meaningless.
    pub fn rerun<F>(
        &mut self,
        world: &mut World,
        group: &BodyGroup,
        direction: Direction,
        fixate: bool,
        f: F,
    ) -> Result<()>
    where
        F: FnMut(&mut World, &BodyGroup) -> Result<()>,
    {
        let layers = match &self.cached {
            Some((bodies, layers)) if bodies.as_slice() == group.bodies() => layers.clone(),
            Some(_) => {
                return Err(RbdError::logic(
                    "rerun called with a different group than the cached layering",
                ))
            }
            None => return Err(RbdError::logic("rerun called before any run")),
        };
        Self::propagate(world, &layers, direction, fixate, f)
    }

    fn propagate<F>(
        world: &mut World,
        layers: &StackLayers,
        direction: Direction,
        fixate: bool,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&mut World, &BodyGroup) -> Result<()>,
    {
        let order: Vec<usize> = match direction {
            Direction::Upward => (0..layers.layers.len()).collect(),
            Direction::Downward => (0..layers.layers.len()).rev().collect(),
        };

        for index in order {
            let layer = &layers.layers[index];

            let mut temporarily_fixed: Vec<BodyId> = Vec::new();
            if fixate {
                // Pin the support: every group member below this layer's
                // height that is not already fixed.
                for &body in layer.group.bodies() {
                    let below = layers
                        .heights
                        .get(&body)
                        .map_or(false, |&h| h < layer.height);
                    if below {
                        let body_ref = world.bodies.body_mut(body)?;
                        if !body_ref.fixed {
                            body_ref.fixed = true;
                            temporarily_fixed.push(body);
                        }
                    }
                }
            }

            let result = f(world, &layer.group);

            // Unpin before propagating any error.
            for &body in &temporarily_fixed {
                world.bodies.body_mut(body)?.fixed = false;
            }
            result?;
        }
        Ok(())
    }
}
