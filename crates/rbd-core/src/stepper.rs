//! Steppers: the state machines that advance a body group by one step.
//!
//! Three interchangeable variants cover the engine's update modes:
//!
//! - [`DynamicsStepper`] - assemble, solve, integrate velocities then
//!   poses. Its zero-step form is a pure velocity-impulse resolution.
//! - [`FirstOrderStepper`] - always stabilized, never frictional; applies
//!   the solved impulses as a *position* displacement, leaving velocities
//!   untouched. Its `error_correction` form is a pure geometric
//!   penetration-removal pass.
//! - [`ShockStepper`] - two stack-propagation passes composing the other
//!   two: velocity impulses top-down, then correction-plus-dynamics
//!   bottom-up with the support fixated.
//!
//! A stepper run with a negative time step is a precondition violation and
//! is reported, never coerced. A group that assembles zero constraint rows
//! simply skips the solve.

use nalgebra::Vector3;
use tracing::debug;

use rbd_constraint::{assemble, AssemblySwitches, NcpSolver, ProjectedGaussSeidel};
use rbd_types::{BodyGroup, RbdError, Result, SolverSettings, StepSettings};

use crate::integrate::{displace, integrate_positions, integrate_velocities};
use crate::stack::{Direction, StackAnalysis};
use crate::world::World;

/// A state machine advancing one body group per call.
pub trait Stepper {
    /// Advance the group by `dt` seconds.
    fn run(&mut self, world: &mut World, group: &BodyGroup, dt: f64) -> Result<()>;

    /// Remove accumulated positional error without changing velocities.
    ///
    /// Undefined for variants that cannot express it; those return an
    /// [`RbdError::Unsupported`] error.
    fn error_correction(&mut self, world: &mut World, group: &BodyGroup) -> Result<()>;

    /// Resolve inter-penetrating contacts by velocity impulses only.
    ///
    /// Undefined for variants that cannot express it.
    fn resolve_collisions(&mut self, world: &mut World, group: &BodyGroup) -> Result<()>;
}

fn check_timestep(dt: f64) -> Result<()> {
    if dt < 0.0 || !dt.is_finite() {
        return Err(RbdError::InvalidTimestep(dt));
    }
    Ok(())
}

/// Full dynamics stepper: assemble → solve → integrate velocities →
/// integrate poses.
#[derive(Debug)]
pub struct DynamicsStepper {
    settings: StepSettings,
    solver: Box<dyn NcpSolver>,
}

impl Default for DynamicsStepper {
    fn default() -> Self {
        Self {
            settings: StepSettings::default(),
            solver: Box::new(ProjectedGaussSeidel::default()),
        }
    }
}

impl DynamicsStepper {
    /// Create a stepper with an injected solver strategy.
    pub fn new(solver: Box<dyn NcpSolver>, settings: StepSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, solver })
    }

    /// Create a stepper with the reference projected Gauss-Seidel solver.
    pub fn with_pgs(solver_settings: SolverSettings, settings: StepSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            solver: Box::new(ProjectedGaussSeidel::new(solver_settings)?),
        })
    }

    /// The step settings.
    #[must_use]
    pub fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn step(
        &mut self,
        world: &mut World,
        group: &BodyGroup,
        dt: f64,
        stabilization: bool,
    ) -> Result<()> {
        check_timestep(dt)?;

        let switches = AssemblySwitches {
            stabilization: stabilization && dt > 0.0,
            friction: self.settings.friction,
            bounce: self.settings.bounce,
            erp: self.settings.erp,
        };

        let problem = assemble(
            &world.bodies,
            &world.graph,
            &world.joints,
            &world.materials,
            group,
            dt,
            &switches,
        )?;

        if problem.is_empty() {
            debug!("no constraint rows; skipping solve");
        } else {
            let mut x = problem.warm_start_vector();
            self.solver.solve(&problem, &mut x)?;

            for (body_id, delta_linear, delta_angular) in problem.velocity_deltas(&x)? {
                let body = world.bodies.body_mut(body_id)?;
                body.linear_velocity += delta_linear;
                body.angular_velocity += delta_angular;
            }
            problem.store_impulses(&x, &mut world.graph)?;
        }

        if dt > 0.0 {
            integrate_velocities(&mut world.bodies, group, &world.gravity, dt)?;
            integrate_positions(&mut world.bodies, group, dt)?;
        }
        Ok(())
    }
}

impl Stepper for DynamicsStepper {
    fn run(&mut self, world: &mut World, group: &BodyGroup, dt: f64) -> Result<()> {
        let stabilization = self.settings.stabilization;
        self.step(world, group, dt, stabilization)
    }

    fn error_correction(&mut self, _world: &mut World, _group: &BodyGroup) -> Result<()> {
        Err(RbdError::unsupported("error_correction", "DynamicsStepper"))
    }

    fn resolve_collisions(&mut self, world: &mut World, group: &BodyGroup) -> Result<()> {
        // A zero-step run with stabilization forced off: velocity impulses
        // only, no position change.
        self.step(world, group, 0.0, false)
    }
}

/// First-order stepper: solves a stabilized, frictionless system and
/// converts the impulses into a pure position displacement.
#[derive(Debug)]
pub struct FirstOrderStepper {
    settings: StepSettings,
    solver: Box<dyn NcpSolver>,
}

impl Default for FirstOrderStepper {
    fn default() -> Self {
        Self {
            settings: StepSettings::default(),
            solver: Box::new(ProjectedGaussSeidel::default()),
        }
    }
}

impl FirstOrderStepper {
    /// Create a stepper with an injected solver strategy.
    pub fn new(solver: Box<dyn NcpSolver>, settings: StepSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, solver })
    }

    fn step(
        &mut self,
        world: &mut World,
        group: &BodyGroup,
        dt: f64,
        external_forces: bool,
        erp: bool,
    ) -> Result<()> {
        check_timestep(dt)?;

        let switches = AssemblySwitches {
            stabilization: true,
            friction: false,
            bounce: false,
            erp: erp && self.settings.erp,
        };

        let problem = assemble(
            &world.bodies,
            &world.graph,
            &world.joints,
            &world.materials,
            group,
            dt,
            &switches,
        )?;

        // P = W (Jᵀλ + dt·f_ext), applied as a displacement.
        let mut displacements = vec![(Vector3::zeros(), Vector3::zeros()); group.len()];

        if !problem.is_empty() {
            let mut x = problem.warm_start_vector();
            self.solver.solve(&problem, &mut x)?;
            for (slot, (_, delta_linear, delta_angular)) in
                problem.velocity_deltas(&x)?.into_iter().enumerate()
            {
                displacements[slot].0 += delta_linear;
                displacements[slot].1 += delta_angular;
            }
        }

        if external_forces {
            for (slot, &body_id) in group.bodies().iter().enumerate() {
                let body = world.bodies.body(body_id)?;
                displacements[slot].0 += body.force * (body.inv_mass() * dt);
                displacements[slot].1 += body.inv_inertia_world() * body.torque * dt;
            }
        }

        for (slot, &body_id) in group.bodies().iter().enumerate() {
            let (linear, angular) = displacements[slot];
            displace(world.bodies.body_mut(body_id)?, &linear, &angular);
        }
        Ok(())
    }
}

impl Stepper for FirstOrderStepper {
    fn run(&mut self, world: &mut World, group: &BodyGroup, dt: f64) -> Result<()> {
        self.step(world, group, dt, true, true)
    }

    fn error_correction(&mut self, world: &mut World, group: &BodyGroup) -> Result<()> {
        // A unit pseudo-step with external forces and erp scaling off: the
        // solved displacement removes exactly the geometric penetration.
        self.step(world, group, 1.0, false, false)
    }

    fn resolve_collisions(&mut self, _world: &mut World, _group: &BodyGroup) -> Result<()> {
        Err(RbdError::unsupported(
            "resolve_collisions",
            "FirstOrderStepper",
        ))
    }
}

/// Two-pass shock-propagation stepper.
///
/// Pass 1 runs a zero-step dynamics sub-step over the stack layers top-down
/// (no fixation), distributing velocity-level impulses. Pass 2 runs a
/// correction-then-dynamics sub-step bottom-up with the already-processed
/// support fixated, so forces at the bottom of the stack cannot disturb the
/// layers settled above.
#[derive(Debug, Default)]
pub struct ShockStepper {
    dynamics: DynamicsStepper,
    correction: FirstOrderStepper,
    stack: StackAnalysis,
}

impl ShockStepper {
    /// Create a shock stepper from its two inner steppers.
    #[must_use]
    pub fn new(dynamics: DynamicsStepper, correction: FirstOrderStepper) -> Self {
        Self {
            dynamics,
            correction,
            stack: StackAnalysis::new(),
        }
    }
}

impl Stepper for ShockStepper {
    fn run(&mut self, world: &mut World, group: &BodyGroup, dt: f64) -> Result<()> {
        check_timestep(dt)?;

        let Self {
            dynamics,
            correction,
            stack,
        } = self;

        // Pass 1: distribute impulses down through the stack.
        stack.run(world, group, Direction::Downward, |w, layer| {
            dynamics.step(w, layer, 0.0, false)
        })?;

        // Pass 2: settle bottom-up on the same layering, support pinned.
        stack.rerun(world, group, Direction::Upward, true, |w, layer| {
            correction.error_correction(w, layer)?;
            dynamics.run(w, layer, dt)
        })
    }

    fn error_correction(&mut self, world: &mut World, group: &BodyGroup) -> Result<()> {
        self.correction.error_correction(world, group)
    }

    fn resolve_collisions(&mut self, world: &mut World, group: &BodyGroup) -> Result<()> {
        self.dynamics.resolve_collisions(world, group)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};
    use rbd_contact::{ContactPoint, Material};
    use rbd_types::{Body, MassProperties, MaterialId};

    /// A ball resting on fixed ground, touching with a small penetration.
    fn resting_world(depth: f64) -> (World, BodyGroup) {
        let mut world = World::new();
        let ball = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.0, 0.0, 0.5 - depth),
        ));
        let ground = world.add_body(Body::new_fixed(Point3::new(0.0, 0.0, -0.5)));
        world
            .materials
            .set_default(Material::frictionless().with_restitution(0.0))
            .unwrap();

        world.graph.begin_pass();
        let edge = world
            .graph
            .get_or_create(ball, ground, MaterialId::DEFAULT, MaterialId::DEFAULT)
            .unwrap();
        world
            .graph
            .report(
                edge,
                (0, 0),
                &[ContactPoint::new(
                    Point3::new(0.0, 0.0, -0.5),
                    Point3::new(0.0, 0.0, 0.5),
                    Vector3::z(),
                    depth,
                )],
            )
            .unwrap();

        let group = BodyGroup::from_bodies(vec![ball, ground]);
        (world, group)
    }

    #[test]
    fn test_negative_timestep_is_fatal() {
        let (mut world, group) = resting_world(0.0);

        let mut dynamics = DynamicsStepper::default();
        assert!(matches!(
            dynamics.run(&mut world, &group, -0.01),
            Err(RbdError::InvalidTimestep(_))
        ));

        let mut shock = ShockStepper::default();
        assert!(matches!(
            shock.run(&mut world, &group, f64::NAN),
            Err(RbdError::InvalidTimestep(_))
        ));
    }

    #[test]
    fn test_unsupported_operations() {
        let (mut world, group) = resting_world(0.0);

        let mut dynamics = DynamicsStepper::default();
        assert!(dynamics
            .error_correction(&mut world, &group)
            .unwrap_err()
            .is_unsupported());

        let mut first_order = FirstOrderStepper::default();
        assert!(first_order
            .resolve_collisions(&mut world, &group)
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn test_dynamics_supports_resting_ball_against_gravity() {
        let (mut world, group) = resting_world(0.0);
        let mut dynamics = DynamicsStepper::default();

        let dt = 1.0 / 60.0;
        for _ in 0..20 {
            // The cached contact stays fresh; geometry does not change
            // meaningfully while the ball rests.
            dynamics.run(&mut world, &group, dt).unwrap();
        }

        let ball = world.bodies.body(rbd_types::BodyId::new(0)).unwrap();
        // The contact absorbs each step's gravity: at most one step of
        // free fall is ever pending, and the ball stays put.
        assert!(ball.linear_velocity.z > -2.0 * 9.81 * dt);
        assert!(ball.position.z > 0.4);
    }

    #[test]
    fn test_resolve_collisions_changes_no_positions() {
        let (mut world, group) = resting_world(0.01);
        // Give the ball downward speed so the impulse is non-trivial.
        world
            .bodies
            .body_mut(rbd_types::BodyId::new(0))
            .unwrap()
            .linear_velocity = Vector3::new(0.0, 0.0, -1.0);

        let before = world.bodies.body(rbd_types::BodyId::new(0)).unwrap().position;

        let mut dynamics = DynamicsStepper::default();
        dynamics.resolve_collisions(&mut world, &group).unwrap();

        let ball = world.bodies.body(rbd_types::BodyId::new(0)).unwrap();
        assert_eq!(ball.position, before);
        // Approaching velocity was absorbed.
        assert!(ball.linear_velocity.z >= -1e-9);
    }

    #[test]
    fn test_error_correction_removes_penetration() {
        let (mut world, group) = resting_world(0.05);
        // Give the ball a sideways velocity that must survive untouched.
        world
            .bodies
            .body_mut(rbd_types::BodyId::new(0))
            .unwrap()
            .linear_velocity = Vector3::new(0.7, 0.0, 0.0);

        let mut first_order = FirstOrderStepper::default();
        first_order.error_correction(&mut world, &group).unwrap();

        let ball = world.bodies.body(rbd_types::BodyId::new(0)).unwrap();
        // The displacement removed (most of) the 5 cm penetration.
        assert!(ball.position.z > 0.47);
        // Velocities are untouched by a correction pass.
        assert_relative_eq!(ball.linear_velocity.x, 0.7, epsilon = 1e-12);
        assert_relative_eq!(ball.linear_velocity.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_group_rows_skip_solve() {
        let mut world = World::new();
        let lone = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.0, 0.0, 10.0),
        ));
        let group = BodyGroup::from_bodies(vec![lone]);

        let mut dynamics = DynamicsStepper::default();
        dynamics.run(&mut world, &group, 0.1).unwrap();

        // Free fall: gravity integrated, no solver involved.
        let body = world.bodies.body(lone).unwrap();
        assert_relative_eq!(body.linear_velocity.z, -0.981, epsilon = 1e-10);
    }

    #[test]
    fn test_shock_stepper_keeps_stack_resting() {
        let mut world = World::new();
        let ground = world.add_body(Body::new_fixed(Point3::new(0.0, 0.0, -0.5)));
        let low = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.0, 0.0, 0.5),
        ));
        let high = world.add_body(Body::new(
            MassProperties::sphere(1.0, 0.5),
            Point3::new(0.0, 0.0, 1.5),
        ));
        world
            .materials
            .set_default(Material::frictionless().with_restitution(0.0))
            .unwrap();

        world.graph.begin_pass();
        // Canonical order puts the lower-id body first, so for both edges
        // the upper body is B and the contact normal (B toward A) is -Z.
        let resting = || {
            ContactPoint::new(
                Point3::new(0.0, 0.0, 0.5),
                Point3::new(0.0, 0.0, -0.5),
                Vector3::new(0.0, 0.0, -1.0),
                0.0,
            )
        };
        let e0 = world
            .graph
            .get_or_create(ground, low, MaterialId::DEFAULT, MaterialId::DEFAULT)
            .unwrap();
        world.graph.report(e0, (0, 0), &[resting()]).unwrap();
        let e1 = world
            .graph
            .get_or_create(low, high, MaterialId::DEFAULT, MaterialId::DEFAULT)
            .unwrap();
        world.graph.report(e1, (0, 0), &[resting()]).unwrap();

        let group = BodyGroup::from_bodies(vec![ground, low, high]);
        let mut shock = ShockStepper::default();

        let dt = 1.0 / 60.0;
        for _ in 0..10 {
            shock.run(&mut world, &group, dt).unwrap();
        }

        // The stack neither sinks nor launches, and fixation always
        // unwinds. At most one step of gravity is ever pending.
        for id in [low, high] {
            let body = world.bodies.body(id).unwrap();
            assert!(!body.fixed);
            assert!(body.linear_velocity.z.abs() < 2.0 * 9.81 * dt);
            assert!(body.position.z > 0.3);
        }
    }
}
