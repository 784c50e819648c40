//! Contact materials and the pairwise material table.

use hashbrown::HashMap;
use nalgebra::UnitVector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rbd_types::{MaterialId, RbdError, Result};

/// Friction coefficients for a contact.
///
/// Either a single isotropic coefficient applied to every friction
/// direction, or one explicit coefficient per direction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrictionCoefficients {
    /// One coefficient for all friction directions.
    Isotropic(f64),
    /// One coefficient per friction direction.
    PerDirection(Vec<f64>),
}

impl FrictionCoefficients {
    /// Coefficient for the given friction direction.
    #[must_use]
    pub fn coefficient(&self, direction: usize) -> f64 {
        match self {
            Self::Isotropic(mu) => *mu,
            Self::PerDirection(mus) => mus.get(direction).copied().unwrap_or(0.0),
        }
    }
}

/// How the tangent frame for friction rows is chosen.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrictionDirections {
    /// Derive the first tangent from the sliding direction at assembly time,
    /// falling back to a deterministic frame when the contact is not
    /// sliding.
    #[default]
    FromSliding,
    /// Use a prefixed world-space tangent, projected into the contact plane.
    Prefixed {
        /// The preferred first tangent direction.
        tangent: UnitVector3<f64>,
    },
}

/// Contact parameters for an (ordered) pair of surfaces.
///
/// # Example
///
/// ```
/// use rbd_contact::Material;
///
/// let ice = Material::frictionless().with_restitution(0.1);
/// assert!(ice.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Friction coefficients.
    pub friction: FrictionCoefficients,
    /// Number of tangential friction directions assembled per contact.
    pub friction_directions: usize,
    /// Coefficient of restitution in [0, 1].
    ///
    /// Negative values are rejected by [`validate`](Self::validate): a
    /// negative restitution would let the sequential resolver inject energy
    /// on every impulse and never drain its heap.
    pub restitution: f64,
    /// Regularization (softness) added to this pair's constraint rows.
    pub softness: f64,
    /// Error-reduction parameter scaling the stabilization term.
    pub error_reduction: f64,
    /// Tangent frame policy for friction rows.
    pub directions: FrictionDirections,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: FrictionCoefficients::Isotropic(0.5),
            friction_directions: 2,
            restitution: 0.3,
            softness: 0.0,
            error_reduction: 0.8,
            directions: FrictionDirections::default(),
        }
    }
}

impl Material {
    /// A frictionless material.
    #[must_use]
    pub fn frictionless() -> Self {
        Self {
            friction: FrictionCoefficients::Isotropic(0.0),
            friction_directions: 0,
            ..Default::default()
        }
    }

    /// A perfectly elastic, frictionless material.
    #[must_use]
    pub fn elastic() -> Self {
        Self {
            restitution: 1.0,
            ..Self::frictionless()
        }
    }

    /// Rubber-like material: high friction, little bounce.
    #[must_use]
    pub fn rubber() -> Self {
        Self {
            friction: FrictionCoefficients::Isotropic(0.9),
            restitution: 0.1,
            ..Default::default()
        }
    }

    /// Steel-like material: moderate friction, noticeable bounce.
    #[must_use]
    pub fn steel() -> Self {
        Self {
            friction: FrictionCoefficients::Isotropic(0.4),
            restitution: 0.55,
            ..Default::default()
        }
    }

    /// Set the isotropic friction coefficient.
    #[must_use]
    pub fn with_friction(mut self, mu: f64) -> Self {
        self.friction = FrictionCoefficients::Isotropic(mu.max(0.0));
        self
    }

    /// Set per-direction friction coefficients.
    #[must_use]
    pub fn with_anisotropic_friction(mut self, mus: Vec<f64>) -> Self {
        self.friction_directions = mus.len();
        self.friction = FrictionCoefficients::PerDirection(mus);
        self
    }

    /// Set the restitution coefficient, clamped into [0, 1].
    #[must_use]
    pub fn with_restitution(mut self, restitution: f64) -> Self {
        self.restitution = restitution.clamp(0.0, 1.0);
        self
    }

    /// Set the regularization (softness).
    #[must_use]
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.softness = softness.max(0.0);
        self
    }

    /// Set the error-reduction parameter.
    #[must_use]
    pub fn with_error_reduction(mut self, erp: f64) -> Self {
        self.error_reduction = erp.clamp(0.0, 1.0);
        self
    }

    /// Set a prefixed tangent frame for friction rows.
    #[must_use]
    pub fn with_prefixed_directions(mut self, tangent: UnitVector3<f64>) -> Self {
        self.directions = FrictionDirections::Prefixed { tangent };
        self
    }

    /// Friction coefficient for a given direction.
    #[must_use]
    pub fn friction_coefficient(&self, direction: usize) -> f64 {
        self.friction.coefficient(direction)
    }

    /// Validate the material parameters.
    pub fn validate(&self) -> Result<()> {
        if self.restitution < 0.0 || self.restitution > 1.0 {
            return Err(RbdError::invalid_argument(
                "restitution must be in range [0, 1]",
            ));
        }
        for direction in 0..self.friction_directions {
            if self.friction.coefficient(direction) < 0.0 {
                return Err(RbdError::invalid_argument("friction cannot be negative"));
            }
        }
        if self.softness < 0.0 {
            return Err(RbdError::invalid_argument("softness cannot be negative"));
        }
        if !(0.0..=1.0).contains(&self.error_reduction) {
            return Err(RbdError::invalid_argument(
                "error_reduction must be in range [0, 1]",
            ));
        }
        if let FrictionCoefficients::PerDirection(mus) = &self.friction {
            if mus.len() != self.friction_directions {
                return Err(RbdError::DimensionMismatch {
                    expected: self.friction_directions,
                    actual: mus.len(),
                });
            }
        }
        Ok(())
    }
}

/// Pairwise material lookup with a distinguished default.
///
/// Pairs are stored under a symmetric key, so `get(a, b)` and `get(b, a)`
/// return the same material. When no pair entry was registered the default
/// material (index 0) is returned.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaterialTable {
    default: Material,
    pairs: HashMap<(u32, u32), Material>,
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::new(Material::default())
    }
}

impl MaterialTable {
    /// Create a table with the given default material.
    #[must_use]
    pub fn new(default: Material) -> Self {
        Self {
            default,
            pairs: HashMap::new(),
        }
    }

    fn key(a: MaterialId, b: MaterialId) -> (u32, u32) {
        let (a, b) = (a.raw(), b.raw());
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Register a material for a pair of material indices.
    ///
    /// The material is validated first; an existing entry is replaced.
    pub fn insert(&mut self, a: MaterialId, b: MaterialId, material: Material) -> Result<()> {
        material.validate()?;
        self.pairs.insert(Self::key(a, b), material);
        Ok(())
    }

    /// Look up the material for a pair, falling back to the default.
    #[must_use]
    pub fn get(&self, a: MaterialId, b: MaterialId) -> &Material {
        self.pairs.get(&Self::key(a, b)).unwrap_or(&self.default)
    }

    /// Look up the material registered for a pair, if any.
    #[must_use]
    pub fn get_exact(&self, a: MaterialId, b: MaterialId) -> Option<&Material> {
        self.pairs.get(&Self::key(a, b))
    }

    /// The default material.
    #[must_use]
    pub fn default_material(&self) -> &Material {
        &self.default
    }

    /// Replace the default material.
    pub fn set_default(&mut self, material: Material) -> Result<()> {
        material.validate()?;
        self.default = material;
        Ok(())
    }
}
