//! Constraint assembly and solving for rigid body dynamics.
//!
//! This crate turns a body group's contacts, joints and limits into a mixed
//! complementarity problem and solves it:
//!
//! - [`Joint`] trait with [`BallJoint`] and [`HingeJoint`] implementations
//! - [`JointLimits`] - angular limit bounds producing one-sided rows
//! - [`assemble`] - builds an [`NcpProblem`] (Jacobian rows, inverse-mass
//!   blocks, box bounds, friction dependency index, regularization and
//!   stabilization right-hand side)
//! - [`NcpSolver`] - the pluggable solver strategy
//! - [`ProjectedGaussSeidel`] - the reference solver with warm starting
//!
//! # Constraint formulation
//!
//! Every constraint contributes rows of the velocity-level system
//!
//! ```text
//! lo <= x <= hi
//! J u' + gamma x = b,     u' = u + W Jᵀ x
//! ```
//!
//! where `W` is the block-diagonal inverse generalized mass, `gamma` the
//! per-row regularization, and `b` combines stabilization and restitution
//! terms. Contact normal rows are one-sided (`0 <= x`); friction rows are
//! box-bounded by `mu` times their coupled normal impulse, recorded in the
//! problem's dependency index.
//!
//! The solver is chosen at composition time. Any strategy satisfying
//! [`NcpSolver`] can be swapped in; the engine only assumes "best effort
//! within its own iteration cap".

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

mod assembly;
mod joint;
mod limits;
mod pgs;

pub use assembly::{assemble, AssemblySwitches, ConstraintRow, NcpProblem, RowSource};
pub use joint::{BallJoint, HingeJoint, Joint, JointSet};
pub use limits::{JointLimits, LimitState};
pub use pgs::{NcpSolver, ProjectedGaussSeidel, SolveReport};

pub use rbd_types::{BodyId, JointId, Result};
