//! Error types for coupling operations.
//!
//! Every error is fatal for the coupled run: the engine never retries or
//! continues from a partially applied correction.

use thiserror::Error;

/// Result type alias using the crate Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the coupling.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing coupling settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required collaborator or tagging is missing at call time.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A feature the coupling deliberately does not provide.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Corrected interface kinematics are not in equilibrium.
    #[error(
        "corrected interface kinematics are not in equilibrium: norm = {norm:e}, unbalanced = {residual:?}"
    )]
    Equilibrium {
        /// Euclidean norm of the recomputed unbalanced kinematics.
        norm: f64,
        /// The full unbalanced kinematics vector.
        residual: Vec<f64>,
    },

    /// Solver errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// Settings could not be parsed.
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// I/O errors while reading settings.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
