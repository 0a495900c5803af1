//! Coupling settings.
//!
//! Settings arrive as a JSON object with the keys below. Required keys are
//! held as `Option` so that a missing key reports its own name.
//!
//! ```json
//! {
//!     "origin_newmark_beta": 0.25,
//!     "origin_newmark_gamma": 0.5,
//!     "destination_newmark_beta": 0.0,
//!     "destination_newmark_gamma": 0.5,
//!     "timestep_ratio": 4,
//!     "equilibrium_variable": "VELOCITY",
//!     "is_disable_coupling": false,
//!     "is_linear": true,
//!     "linear_solver_settings": { "solver_type": "skyline_lu_factorization" },
//!     "echo_level": 0
//! }
//! ```

use crate::error::{Error, Result};
use crate::scheme::TimeScheme;
use crate::solver::SolverConfig;
use crate::types::{EquilibriumVariable, NUMERICAL_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raw coupling settings as read from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingSettings {
    pub origin_newmark_beta: Option<f64>,
    pub origin_newmark_gamma: Option<f64>,
    pub destination_newmark_beta: Option<f64>,
    pub destination_newmark_gamma: Option<f64>,
    /// Destination sub-steps per origin step. Must be a positive integer.
    pub timestep_ratio: Option<f64>,
    pub equilibrium_variable: Option<String>,
    pub is_disable_coupling: Option<bool>,
    #[serde(default)]
    pub is_linear: bool,
    /// Assert equilibrium after the final sub-step of every macro step.
    #[serde(default)]
    pub is_check_equilibrium: bool,
    #[serde(default)]
    pub linear_solver_settings: SolverConfig,
    #[serde(default)]
    pub echo_level: u32,
}

/// Settings after validation, in typed form.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSettings {
    pub origin_scheme: TimeScheme,
    pub destination_scheme: TimeScheme,
    pub timestep_ratio: usize,
    pub equilibrium_variable: EquilibriumVariable,
    pub is_disable_coupling: bool,
    pub is_linear: bool,
    pub is_check_equilibrium: bool,
    pub linear_solver_settings: SolverConfig,
    pub echo_level: u32,
}

fn required<T: Clone>(value: &Option<T>, key: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| Error::Config(format!("'{}' was not specified in the coupling settings", key)))
}

fn check_unit_range(value: f64, key: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!(
            "'{}' has invalid value {}. It must be between 0 and 1",
            key, value
        )));
    }
    Ok(())
}

impl CouplingSettings {
    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Check presence and ranges of every setting.
    ///
    /// Only the implicit average-acceleration pair (`beta = 0.25`,
    /// `gamma = 0.5`) and the explicit central-difference pair (`beta = 0`,
    /// `gamma = 0.5`) are accepted.
    pub fn validate(&self) -> Result<ValidatedSettings> {
        let origin_beta = required(&self.origin_newmark_beta, "origin_newmark_beta")?;
        let origin_gamma = required(&self.origin_newmark_gamma, "origin_newmark_gamma")?;
        let destination_beta = required(&self.destination_newmark_beta, "destination_newmark_beta")?;
        let destination_gamma =
            required(&self.destination_newmark_gamma, "destination_newmark_gamma")?;
        let timestep_ratio = required(&self.timestep_ratio, "timestep_ratio")?;
        let equilibrium_variable = required(&self.equilibrium_variable, "equilibrium_variable")?;
        let is_disable_coupling = required(&self.is_disable_coupling, "is_disable_coupling")?;

        check_unit_range(origin_beta, "origin_newmark_beta")?;
        check_unit_range(origin_gamma, "origin_newmark_gamma")?;
        check_unit_range(destination_beta, "destination_newmark_beta")?;
        check_unit_range(destination_gamma, "destination_newmark_gamma")?;

        let timestep_ratio = validate_timestep_ratio(timestep_ratio)?;
        let equilibrium_variable: EquilibriumVariable = equilibrium_variable.parse()?;

        let origin_scheme = TimeScheme::from_newmark(origin_beta, origin_gamma)
            .map_err(|e| prefix_config(e, "origin"))?;
        let destination_scheme = TimeScheme::from_newmark(destination_beta, destination_gamma)
            .map_err(|e| prefix_config(e, "destination"))?;

        Ok(ValidatedSettings {
            origin_scheme,
            destination_scheme,
            timestep_ratio,
            equilibrium_variable,
            is_disable_coupling,
            is_linear: self.is_linear,
            is_check_equilibrium: self.is_check_equilibrium,
            linear_solver_settings: self.linear_solver_settings,
            echo_level: self.echo_level,
        })
    }
}

fn prefix_config(error: Error, side: &str) -> Error {
    match error {
        Error::Config(msg) => Error::Config(format!("{} {}", side, msg)),
        other => other,
    }
}

/// Check that a ratio is a positive integer and return it.
pub fn validate_timestep_ratio(ratio: f64) -> Result<usize> {
    let rounded = ratio.round();
    if !ratio.is_finite() || rounded < 1.0 || (ratio - rounded).abs() > NUMERICAL_LIMIT * ratio.abs().max(1.0) {
        return Err(Error::Config(format!(
            "'timestep_ratio' has invalid value {}. It must be a positive integer",
            ratio
        )));
    }
    Ok(rounded as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverType;

    const VALID: &str = r#"{
        "origin_newmark_beta": 0.25,
        "origin_newmark_gamma": 0.5,
        "destination_newmark_beta": 0.0,
        "destination_newmark_gamma": 0.5,
        "timestep_ratio": 4.0,
        "equilibrium_variable": "VELOCITY",
        "is_disable_coupling": false
    }"#;

    fn valid() -> CouplingSettings {
        CouplingSettings::from_json(VALID).unwrap()
    }

    #[test]
    fn test_valid_settings() {
        let settings = valid().validate().unwrap();
        assert!(settings.origin_scheme.is_implicit());
        assert!(!settings.destination_scheme.is_implicit());
        assert_eq!(settings.timestep_ratio, 4);
        assert_eq!(settings.equilibrium_variable, EquilibriumVariable::Velocity);
        assert!(!settings.is_linear);
        assert!(!settings.is_check_equilibrium);
        assert_eq!(settings.linear_solver_settings.solver_type, SolverType::SparseLu);
        assert_eq!(settings.echo_level, 0);
    }

    #[test]
    fn test_missing_key_is_named() {
        let mut settings = valid();
        settings.destination_newmark_gamma = None;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("destination_newmark_gamma"));

        let mut settings = valid();
        settings.is_disable_coupling = None;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_beta_family_restriction() {
        for beta in [0.1, 0.3, 0.5, 1.0] {
            let mut settings = valid();
            settings.origin_newmark_beta = Some(beta);
            assert!(settings.validate().is_err(), "beta = {} accepted", beta);
        }

        let mut settings = valid();
        settings.origin_newmark_beta = Some(-0.25);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_gamma_must_be_half() {
        let mut settings = valid();
        settings.destination_newmark_gamma = Some(0.6);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_both_implicit() {
        let mut settings = valid();
        settings.destination_newmark_beta = Some(0.25);
        let settings = settings.validate().unwrap();
        assert!(settings.origin_scheme.is_implicit());
        assert!(settings.destination_scheme.is_implicit());
    }

    #[test]
    fn test_timestep_ratio_integer() {
        assert_eq!(validate_timestep_ratio(1.0).unwrap(), 1);
        assert_eq!(validate_timestep_ratio(12.0).unwrap(), 12);
        assert!(validate_timestep_ratio(2.5).is_err());
        assert!(validate_timestep_ratio(0.0).is_err());
        assert!(validate_timestep_ratio(-3.0).is_err());
        assert!(validate_timestep_ratio(f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_equilibrium_variable() {
        let mut settings = valid();
        settings.equilibrium_variable = Some("PRESSURE".into());
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_optional_keys_from_json() {
        let json = r#"{
            "origin_newmark_beta": 0.25,
            "origin_newmark_gamma": 0.5,
            "destination_newmark_beta": 0.25,
            "destination_newmark_gamma": 0.5,
            "timestep_ratio": 1,
            "equilibrium_variable": "DISPLACEMENT",
            "is_disable_coupling": true,
            "is_linear": true,
            "is_check_equilibrium": true,
            "linear_solver_settings": { "solver_type": "sparse_cholesky" },
            "echo_level": 3
        }"#;
        let settings = CouplingSettings::from_json(json).unwrap().validate().unwrap();
        assert!(settings.is_disable_coupling);
        assert!(settings.is_linear);
        assert!(settings.is_check_equilibrium);
        assert_eq!(settings.linear_solver_settings.solver_type, SolverType::SparseCholesky);
        assert_eq!(settings.echo_level, 3);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            CouplingSettings::from_json("{ not json"),
            Err(Error::Parse(_))
        ));
    }
}
