//! Orchestration layer of the `rbd` constraint-based dynamics engine.
//!
//! This crate wires the contact and constraint layers into a usable
//! simulation:
//!
//! - [`World`] - bodies, contact graph, joints, materials and gravity
//! - [`BroadPhase`] / [`SpatialHashBroadPhase`] - overlap detection feeding
//!   the contact cache
//! - [`ContactGenerator`] - the narrow-phase contract the caller implements
//! - [`Stepper`] with its three variants - full dynamics, first-order
//!   positional correction, and two-pass shock propagation
//! - [`StackAnalysis`] / [`StackLayers`] - layering of resting stacks
//! - [`GroupBuilder`] - connected-component partitioning of a world
//!
//! # A full step
//!
//! One time step of a typical simulation reads:
//!
//! 1. Update bounds and run [`World::detect`] (broad phase + narrow phase)
//!    to refresh the contact cache.
//! 2. Partition into groups with [`GroupBuilder::connected_components`].
//! 3. For each group, [`Stepper::run`] - assembling the NCP, delegating to
//!    the injected solver, and integrating velocities and poses.
//!
//! # Example
//!
//! ```
//! use rbd_core::{DynamicsStepper, Stepper, World};
//! use rbd_types::{Body, BodyGroup, MassProperties};
//! use nalgebra::Point3;
//!
//! let mut world = World::new();
//! let ball = world.add_body(Body::new(
//!     MassProperties::sphere(1.0, 0.5),
//!     Point3::new(0.0, 0.0, 10.0),
//! ));
//!
//! let mut stepper = DynamicsStepper::default();
//! let group = BodyGroup::from_bodies(vec![ball]);
//! for _ in 0..60 {
//!     stepper.run(&mut world, &group, 1.0 / 60.0).unwrap();
//! }
//!
//! // The ball is in free fall.
//! assert!(world.bodies.body(ball).unwrap().position.z < 10.0);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

mod aabb;
mod broad_phase;
mod group;
pub mod integrate;
mod stack;
mod stepper;
mod world;

pub use aabb::Aabb;
pub use broad_phase::{AllPairs, BroadPhase, SpatialHashBroadPhase};
pub use group::GroupBuilder;
pub use stack::{Direction, StackAnalysis, StackLayer, StackLayers};
pub use stepper::{DynamicsStepper, FirstOrderStepper, ShockStepper, Stepper};
pub use world::{ContactGenerator, World};

pub use rbd_constraint::{
    assemble, AssemblySwitches, BallJoint, HingeJoint, Joint, JointLimits, JointSet,
    NcpProblem, NcpSolver, ProjectedGaussSeidel,
};
pub use rbd_contact::{
    CollisionLaw, ContactGraph, ContactPoint, Edge, EdgeId, FeaturePair, Material,
    MaterialTable, NewtonImpulseLaw, SequentialResolver,
};
pub use rbd_types::{
    Body, BodyGroup, BodyId, BodySet, JointId, MassProperties, MaterialId, RbdError, Result,
    SolverSettings, StepSettings,
};
