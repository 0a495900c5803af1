//! COSIM Core - dynamic FETI coupling of time-stepped domains
//!
//! Couples two independently integrated structural domains at a shared
//! interface:
//! - Implicit Newmark average acceleration and explicit central difference
//!   schemes, in any pairing
//! - Destination sub-stepping with interpolated origin kinematics
//! - Dual Schur condensation solved for interface Lagrange multipliers
//! - Parallel unit-response computation using Rayon
//!
//! # Architecture
//!
//! - [`FetiDynamicCoupling`]: The coupling engine and its operator caches
//! - [`Domain`]: Nodes, interface and system matrix of one subsystem
//! - [`TimeScheme`]: Per-domain numbering, unit response and correction
//! - [`Solver`] trait: Linear system solution strategies
//! - [`StaggeredCoupledSolver`]: Macro-step orchestration of two
//!   [`SubdomainSolver`]s

pub mod config;
pub mod coupling;
pub mod domain;
pub mod driver;
pub mod error;
pub mod kinematics;
pub mod parallel;
pub mod projector;
pub mod response;
pub mod scheme;
pub mod solver;
pub mod sparse;
pub mod types;

pub use config::{CouplingSettings, ValidatedSettings};
pub use coupling::{CacheStats, FetiDynamicCoupling};
pub use domain::{Domain, Node, SharedDomain};
pub use driver::{StaggeredCoupledSolver, SubdomainSolver};
pub use error::{Error, Result};
pub use scheme::TimeScheme;
pub use solver::{Solver, SolverConfig, SolverFactory};
pub use sparse::CsrMatrix;
pub use types::{EquilibriumVariable, NodalVariable, Vec3};
