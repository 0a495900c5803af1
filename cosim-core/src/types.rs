//! Core data types for the coupling.
//!
//! This module defines fundamental types used throughout the crate:
//! - Nodal 3-vectors
//! - Nodal solution-step variables
//! - The interface equilibrium variable

use crate::error::{Error, Result};
use nalgebra::Vector3;
use std::fmt;
use std::str::FromStr;

/// A 3D vector (displacement, velocity, acceleration, multiplier).
pub type Vec3 = Vector3<f64>;

/// Threshold below which a Newmark beta or a nodal mass counts as zero.
pub const NUMERICAL_LIMIT: f64 = f64::EPSILON;

/// Largest admissible norm of the unbalanced interface kinematics after
/// correction.
pub const EQUILIBRIUM_TOLERANCE: f64 = 1e-12;

/// Vector-valued nodal solution-step variables touched by the coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodalVariable {
    Displacement,
    Velocity,
    Acceleration,
    /// Central-difference half-step velocity.
    MiddleVelocity,
    /// Interface traction written back after the multiplier solve.
    VectorLagrangeMultiplier,
}

impl NodalVariable {
    /// Upper-case variable name.
    pub fn name(self) -> &'static str {
        match self {
            NodalVariable::Displacement => "DISPLACEMENT",
            NodalVariable::Velocity => "VELOCITY",
            NodalVariable::Acceleration => "ACCELERATION",
            NodalVariable::MiddleVelocity => "MIDDLE_VELOCITY",
            NodalVariable::VectorLagrangeMultiplier => "VECTOR_LAGRANGE_MULTIPLIER",
        }
    }
}

impl fmt::Display for NodalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kinematic quantity whose interface mismatch is removed by the coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EquilibriumVariable {
    Displacement,
    Velocity,
    Acceleration,
}

impl EquilibriumVariable {
    /// Nodal field read from the interfaces for this variable.
    pub fn nodal_variable(self) -> NodalVariable {
        match self {
            EquilibriumVariable::Displacement => NodalVariable::Displacement,
            EquilibriumVariable::Velocity => NodalVariable::Velocity,
            EquilibriumVariable::Acceleration => NodalVariable::Acceleration,
        }
    }

    /// Factor relating an acceleration correction to a correction of this
    /// variable under a Newmark scheme with the given `gamma` and `dt`.
    ///
    /// `1` for acceleration, `gamma*dt` for velocity and `(gamma*dt)^2`
    /// for displacement.
    pub fn kinematic_coefficient(self, gamma: f64, dt: f64) -> f64 {
        match self {
            EquilibriumVariable::Acceleration => 1.0,
            EquilibriumVariable::Velocity => gamma * dt,
            EquilibriumVariable::Displacement => gamma * gamma * dt * dt,
        }
    }
}

impl FromStr for EquilibriumVariable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DISPLACEMENT" => Ok(EquilibriumVariable::Displacement),
            "VELOCITY" => Ok(EquilibriumVariable::Velocity),
            "ACCELERATION" => Ok(EquilibriumVariable::Acceleration),
            other => Err(Error::Config(format!(
                "'equilibrium_variable' has invalid value '{}'. It must be either DISPLACEMENT, VELOCITY or ACCELERATION",
                other
            ))),
        }
    }
}

impl fmt::Display for EquilibriumVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nodal_variable().name())
    }
}
