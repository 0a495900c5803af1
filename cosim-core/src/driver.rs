//! Staggered time stepping of two coupled subdomain solvers.
//!
//! Per macro step the origin is solved once over the full origin step. The
//! destination then runs `timestep_ratio` sub-steps, each followed by a call
//! to [`FetiDynamicCoupling::equilibrate_domains`]. Every destination
//! sub-step except the last is finalized inside the loop; the last one is
//! finalized together with the origin.

use crate::config::{validate_timestep_ratio, CouplingSettings};
use crate::coupling::FetiDynamicCoupling;
use crate::domain::SharedDomain;
use crate::error::{Error, Result};
use crate::solver::select_solver;
use crate::sparse::CsrMatrix;
use tracing::{debug, info};

/// A time-stepped solver of one domain.
///
/// Implicit solvers must hand their current system matrix to the domain
/// (see [`crate::domain::Domain::set_system_matrix`]) in
/// `solve_solution_step`.
pub trait SubdomainSolver {
    /// The domain this solver advances.
    fn domain(&self) -> SharedDomain;

    /// Move to the next step and return the new time.
    fn advance_in_time(&mut self, current_time: f64) -> Result<f64>;

    fn initialize_solution_step(&mut self) -> Result<()>;

    fn predict(&mut self) -> Result<()>;

    fn solve_solution_step(&mut self) -> Result<()>;

    fn finalize_solution_step(&mut self) -> Result<()>;
}

/// Drives an origin and a destination solver with FETI interface coupling.
pub struct StaggeredCoupledSolver<O, D> {
    origin: O,
    destination: D,
    settings: CouplingSettings,
    mapping_matrix: CsrMatrix,
    timestep_ratio: usize,
    destination_time: f64,
    coupling: Option<FetiDynamicCoupling>,
}

impl<O: SubdomainSolver, D: SubdomainSolver> StaggeredCoupledSolver<O, D> {
    /// Create the driver. The coupling engine itself is set up lazily on the
    /// first solution step.
    ///
    /// # Errors
    ///
    /// Returns error if `timestep_ratio` is missing or not a positive integer.
    pub fn new(
        origin: O,
        destination: D,
        settings: CouplingSettings,
        mapping_matrix: CsrMatrix,
    ) -> Result<Self> {
        let ratio = settings.timestep_ratio.ok_or_else(|| {
            Error::Config("an integer 'timestep_ratio' must be specified in the coupling settings".into())
        })?;
        let timestep_ratio = validate_timestep_ratio(ratio)?;

        Ok(Self {
            origin,
            destination,
            settings,
            mapping_matrix,
            timestep_ratio,
            destination_time: 0.0,
            coupling: None,
        })
    }

    pub fn origin(&self) -> &O {
        &self.origin
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// The coupling engine, once initialized.
    pub fn coupling(&self) -> Option<&FetiDynamicCoupling> {
        self.coupling.as_ref()
    }

    pub fn timestep_ratio(&self) -> usize {
        self.timestep_ratio
    }

    /// Advance both solvers. Returns the origin time.
    pub fn advance_in_time(&mut self, current_time: f64) -> Result<f64> {
        self.destination_time = self.destination.advance_in_time(current_time)?;
        self.origin.advance_in_time(current_time)
    }

    pub fn initialize_solution_step(&mut self) -> Result<()> {
        self.origin.initialize_solution_step()?;
        self.destination.initialize_solution_step()?;

        if self.coupling.is_none() {
            self.coupling = Some(self.initialize_coupling()?);
        }
        Ok(())
    }

    pub fn predict(&mut self) -> Result<()> {
        self.origin.predict()?;
        self.destination.predict()
    }

    /// Solve the origin once, then every destination sub-step with interface
    /// equilibration.
    pub fn solve_solution_step(&mut self) -> Result<()> {
        let coupling = self.coupling.as_mut().ok_or_else(|| {
            Error::Precondition(
                "the coupling has not been initialized. Call initialize_solution_step first".into(),
            )
        })?;

        self.origin.solve_solution_step()?;

        for sub_step in 1..=self.timestep_ratio {
            if sub_step > 1 {
                self.destination_time = self.destination.advance_in_time(self.destination_time)?;
                self.destination.initialize_solution_step()?;
                self.destination.predict()?;
            }

            self.destination.solve_solution_step()?;
            coupling.equilibrate_domains()?;
            debug!(sub_step, time = self.destination_time, "destination sub-step coupled");

            if sub_step != self.timestep_ratio {
                self.destination.finalize_solution_step()?;
            }
        }
        Ok(())
    }

    pub fn finalize_solution_step(&mut self) -> Result<()> {
        self.origin.finalize_solution_step()?;
        self.destination.finalize_solution_step()
    }

    /// Run one complete macro step and return the new origin time.
    pub fn solve_step(&mut self, current_time: f64) -> Result<f64> {
        let time = self.advance_in_time(current_time)?;
        self.initialize_solution_step()?;
        self.predict()?;
        self.solve_solution_step()?;
        self.finalize_solution_step()?;
        Ok(time)
    }

    fn initialize_coupling(&self) -> Result<FetiDynamicCoupling> {
        let mut coupling = FetiDynamicCoupling::new(&self.settings)?;
        coupling.set_domains(self.origin.domain(), self.destination.domain())?;
        coupling.set_linear_solver(select_solver(&self.settings.linear_solver_settings));
        coupling.set_mapping_matrix(self.mapping_matrix.clone())?;
        coupling.set_origin_initial_kinematics()?;

        info!(timestep_ratio = self.timestep_ratio, "dynamic coupling initialized");
        Ok(coupling)
    }
}
