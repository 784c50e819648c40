//! Core types for constraint-based rigid body dynamics.
//!
//! This crate provides the foundational types shared by the other `rbd`
//! crates:
//!
//! - [`Body`] - Mass properties, pose, velocity and simulation flags
//! - [`BodySet`] - Arena of bodies with stable integer handles
//! - [`BodyGroup`] - The unit of work handed to a stepper
//! - [`RbdError`] - Error taxonomy for the whole engine
//! - [`SolverSettings`] / [`StepSettings`] - Solver and stepper configuration
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They have no contact caching, no constraint
//! assembly, no integration. They're the common language between:
//!
//! - The contact layer (edge cache, sequential resolver)
//! - The constraint layer (NCP assembly, pluggable solvers)
//! - The orchestration layer (broad phase, steppers, stack propagation)
//!
//! # Handles, not pointers
//!
//! Bodies are referenced by [`BodyId`] - a stable index into a [`BodySet`]
//! arena. Joints and materials are likewise referenced by integer handles.
//! Nothing in the engine holds a direct reference between entities, so
//! entity storage can be grown without invalidating the rest of the graph.
//!
//! # Example
//!
//! ```
//! use rbd_types::{Body, BodySet, MassProperties};
//! use nalgebra::Point3;
//!
//! let mut bodies = BodySet::new();
//! let ball = bodies.insert(Body::new(
//!     MassProperties::sphere(1.0, 0.5),
//!     Point3::new(0.0, 0.0, 1.0),
//! ));
//!
//! assert_eq!(bodies.body(ball).unwrap().position.z, 1.0);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

mod body;
mod config;
mod error;
mod group;

pub use body::{Body, BodyId, BodySet, MassProperties, RotationUpdate};
pub use config::{SolverSettings, StepSettings};
pub use error::RbdError;
pub use group::{BodyGroup, JointId, MaterialId};

// Re-export math types for convenience.
pub use nalgebra::{Matrix3, Point3, UnitQuaternion, UnitVector3, Vector3};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RbdError>;
