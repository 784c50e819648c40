//! Contact caching and sequential collision resolution.
//!
//! This crate owns the pairwise contact bookkeeping of the engine:
//!
//! - [`Material`] / [`MaterialTable`] - per-pair friction, restitution and
//!   regularization parameters with a distinguished default material
//! - [`ContactPoint`] - a single narrow-phase contact with its warm-start
//!   impulse cache
//! - [`Edge`] / [`ContactGraph`] - the canonical body-pair graph with
//!   generation-stamped staleness tracking
//! - [`CollisionLaw`] / [`NewtonImpulseLaw`] - the pluggable impulse policy
//! - [`SequentialResolver`] - resolves penetrating contacts one at a time,
//!   most-approaching first
//!
//! # The contact cache
//!
//! Edges are created lazily by the broad phase the first time two bodies'
//! bounds overlap, and are keyed so that at most one edge exists per
//! unordered body pair. Each detection pass bumps the graph's generation
//! counter; an edge whose stamp does not match the current generation is
//! *stale* and its contacts must not be consumed until the narrow phase has
//! refreshed them.
//!
//! # Example
//!
//! ```
//! use rbd_contact::ContactGraph;
//! use rbd_types::{BodyId, MaterialId};
//!
//! let mut graph = ContactGraph::new();
//! let gen = graph.begin_pass();
//!
//! // Lookup is canonical: (a, b) and (b, a) name the same edge.
//! let e1 = graph
//!     .get_or_create(BodyId::new(4), BodyId::new(1), MaterialId::DEFAULT, MaterialId::DEFAULT)
//!     .unwrap();
//! let e2 = graph
//!     .get_or_create(BodyId::new(1), BodyId::new(4), MaterialId::DEFAULT, MaterialId::DEFAULT)
//!     .unwrap();
//! assert_eq!(e1, e2);
//!
//! // Freshly created edges are stale until the pass touches them.
//! assert!(!graph.is_up_to_date(e1).unwrap());
//! graph.refresh(e1).unwrap();
//! assert!(graph.is_up_to_date(e1).unwrap());
//! # let _ = gen;
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

mod contact;
mod graph;
mod law;
mod material;
mod resolver;

pub use contact::ContactPoint;
pub use graph::{ContactGraph, Edge, EdgeId, FeaturePair};
pub use law::{CollisionLaw, NewtonImpulseLaw};
pub use material::{FrictionCoefficients, FrictionDirections, Material, MaterialTable};
pub use resolver::{ResolveOutcome, SequentialResolver};

pub use rbd_types::{BodyId, MaterialId, Result};
