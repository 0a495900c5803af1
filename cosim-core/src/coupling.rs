//! Dynamic FETI coupling of two time-stepped domains.
//!
//! [`FetiDynamicCoupling`] removes the kinematic mismatch between an origin
//! and a destination interface after both domains have solved their current
//! step. The destination may take `timestep_ratio` sub-steps per origin step;
//! the origin interface kinematics are interpolated linearly to every
//! destination sub-step.
//!
//! One call to [`FetiDynamicCoupling::equilibrate_domains`]:
//!
//! 1. computes the unbalanced interface kinematics,
//! 2. (re)builds projectors, unit responses and the condensation matrix,
//! 3. solves the condensed system for the interface Lagrange multipliers,
//! 4. applies the resulting corrections to the destination, and to the
//!    origin at the final sub-step,
//! 5. optionally asserts equilibrium, writes the multipliers back and
//!    advances the sub-step counter.
//!
//! # Example
//!
//! ```ignore
//! use cosim_core::{CouplingSettings, FetiDynamicCoupling};
//! use cosim_core::solver::select_solver;
//!
//! let settings = CouplingSettings::from_file("coupling.json")?;
//! let mut coupling = FetiDynamicCoupling::new(&settings)?;
//! coupling.set_domains(origin.clone(), destination.clone())?;
//! coupling.set_mapping_matrix(mapping)?;
//! coupling.set_linear_solver(select_solver(&settings.linear_solver_settings));
//! coupling.set_origin_initial_kinematics()?;
//!
//! // after every destination sub-step solve
//! coupling.equilibrate_domains()?;
//! ```

use crate::config::{CouplingSettings, ValidatedSettings};
use crate::domain::{Domain, SharedDomain};
use crate::error::{Error, Result};
use crate::kinematics::{interface_id, interface_quantity};
use crate::projector::{apply_mapping_to_projector, compose_projector, InterfaceSide};
use crate::scheme::{DofNumbering, TimeScheme};
use crate::solver::Solver;
use crate::sparse::{self, CsrMatrix};
use crate::types::{EquilibriumVariable, Vec3, EQUILIBRIUM_TOLERANCE};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters of operator builds, for observing the caching behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Origin unit-response builds.
    pub origin_builds: usize,
    /// Destination unit-response builds.
    pub destination_builds: usize,
    /// Condensation matrix builds.
    pub condensation_builds: usize,
    /// Calls served entirely from the linear setup.
    pub reuses: usize,
}

/// Operators kept across calls.
#[derive(Debug, Default)]
struct OperatorCache {
    origin_numbering: Option<DofNumbering>,
    destination_numbering: Option<DofNumbering>,
    projector_origin: Option<CsrMatrix>,
    projector_destination: Option<CsrMatrix>,
    unit_response_origin: Option<CsrMatrix>,
    unit_response_destination: Option<CsrMatrix>,
    condensation: Option<CsrMatrix>,
    projector_origin_valid: bool,
    unit_response_origin_valid: bool,
    /// Set once the operators of a linear coupling are built. Never reset.
    linear_setup_complete: bool,
}

impl OperatorCache {
    fn invalidate_origin(&mut self) {
        self.projector_origin_valid = false;
        self.unit_response_origin_valid = false;
    }
}

fn cached<'a>(matrix: &'a Option<CsrMatrix>, what: &str) -> Result<&'a CsrMatrix> {
    matrix
        .as_ref()
        .ok_or_else(|| Error::Precondition(format!("{} has not been built", what)))
}

fn cached_numbering<'a>(numbering: &'a Option<DofNumbering>, side: &str) -> Result<&'a DofNumbering> {
    numbering
        .as_ref()
        .ok_or_else(|| Error::Precondition(format!("{} dof numbering has not been built", side)))
}

/// Dynamic FETI coupling engine.
pub struct FetiDynamicCoupling {
    settings: ValidatedSettings,
    domains: Option<(SharedDomain, SharedDomain)>,
    mapping_matrix: Option<CsrMatrix>,
    force_mapping_matrix: Option<CsrMatrix>,
    solver: Option<Box<dyn Solver>>,
    is_check_equilibrium: bool,
    sub_step: usize,
    initial_origin_kinematics: Option<Vec<f64>>,
    final_origin_kinematics: Option<Vec<f64>>,
    lagrange_multipliers: Vec<f64>,
    cache: OperatorCache,
    stats: CacheStats,
}

impl FetiDynamicCoupling {
    /// Create an engine from raw settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid settings and
    /// [`Error::Unsupported`] for displacement coupling with an explicit
    /// domain.
    pub fn new(settings: &CouplingSettings) -> Result<Self> {
        Self::from_validated(settings.validate()?)
    }

    /// Create an engine from already validated settings.
    pub fn from_validated(settings: ValidatedSettings) -> Result<Self> {
        if settings.equilibrium_variable == EquilibriumVariable::Displacement
            && !(settings.origin_scheme.is_implicit() && settings.destination_scheme.is_implicit())
        {
            return Err(Error::Unsupported(
                "DISPLACEMENT coupling requires implicit-implicit domains".into(),
            ));
        }

        debug!(
            origin_implicit = settings.origin_scheme.is_implicit(),
            destination_implicit = settings.destination_scheme.is_implicit(),
            timestep_ratio = settings.timestep_ratio,
            equilibrium_variable = %settings.equilibrium_variable,
            "created dynamic coupling"
        );

        Ok(Self {
            is_check_equilibrium: settings.is_check_equilibrium,
            settings,
            domains: None,
            mapping_matrix: None,
            force_mapping_matrix: None,
            solver: None,
            sub_step: 1,
            initial_origin_kinematics: None,
            final_origin_kinematics: None,
            lagrange_multipliers: Vec::new(),
            cache: OperatorCache::default(),
            stats: CacheStats::default(),
        })
    }

    /// Attach the origin and destination domains.
    ///
    /// Attaching domains starts a new coupling session: every cached operator
    /// is dropped, the sub-step counter restarts at 1 and the captured origin
    /// kinematics, multipliers and build counters are cleared. Call
    /// [`Self::set_origin_initial_kinematics`] again afterwards.
    pub fn set_domains(&mut self, origin: SharedDomain, destination: SharedDomain) -> Result<()> {
        if Arc::ptr_eq(&origin, &destination) {
            return Err(Error::Precondition(
                "origin and destination must be different domains".into(),
            ));
        }
        self.domains = Some((origin, destination));
        self.cache = OperatorCache::default();
        self.sub_step = 1;
        self.initial_origin_kinematics = None;
        self.final_origin_kinematics = None;
        self.lagrange_multipliers.clear();
        self.stats = CacheStats::default();
        Ok(())
    }

    /// Node-to-node mapping from origin to destination interface
    /// (destination nodes x origin nodes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] once a linear coupling has built its
    /// operators; the cached projector would keep the old mapping.
    pub fn set_mapping_matrix(&mut self, mapping: CsrMatrix) -> Result<()> {
        self.check_mapping_mutable("mapping matrix")?;
        self.mapping_matrix = Some(mapping);
        Ok(())
    }

    /// Separate force mapping matrix. Building projectors with it fails as
    /// unsupported.
    pub fn set_force_mapping_matrix(&mut self, mapping: CsrMatrix) -> Result<()> {
        self.check_mapping_mutable("force mapping matrix")?;
        self.force_mapping_matrix = Some(mapping);
        Ok(())
    }

    fn check_mapping_mutable(&self, what: &str) -> Result<()> {
        if self.cache.linear_setup_complete {
            return Err(Error::Precondition(format!(
                "the {} cannot change after the linear coupling setup. Call set_domains to start a new session",
                what
            )));
        }
        Ok(())
    }

    /// Solver for the condensed multiplier system.
    pub fn set_linear_solver(&mut self, solver: Box<dyn Solver>) {
        self.solver = Some(solver);
    }

    pub fn set_check_equilibrium(&mut self, check: bool) {
        self.is_check_equilibrium = check;
    }

    /// Capture the current origin interface kinematics as the state at the
    /// start of the origin step.
    pub fn set_origin_initial_kinematics(&mut self) -> Result<()> {
        let (origin, _) = self.attached_domains()?;
        let origin = origin.read();
        self.capture_initial_kinematics(&origin)
    }

    /// Current sub-step, in `1..=timestep_ratio`.
    pub fn sub_step(&self) -> usize {
        self.sub_step
    }

    pub fn timestep_ratio(&self) -> usize {
        self.settings.timestep_ratio
    }

    pub fn settings(&self) -> &ValidatedSettings {
        &self.settings
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats
    }

    pub fn is_linear_setup_complete(&self) -> bool {
        self.cache.linear_setup_complete
    }

    /// Condensation matrix of the latest build.
    pub fn condensation_matrix(&self) -> Option<&CsrMatrix> {
        self.cache.condensation.as_ref()
    }

    /// Multipliers of the latest call, before negation.
    pub fn lagrange_multipliers(&self) -> &[f64] {
        &self.lagrange_multipliers
    }

    pub fn origin_initial_kinematics(&self) -> Option<&[f64]> {
        self.initial_origin_kinematics.as_deref()
    }

    /// Equilibrate the interface for the current sub-step.
    ///
    /// # Errors
    ///
    /// Fails if collaborators are missing or inconsistent, if a linear solve
    /// fails, or, with the equilibrium check enabled, if the corrected
    /// interface is out of equilibrium. No error is recoverable: the domain
    /// state may be partially corrected.
    pub fn equilibrate_domains(&mut self) -> Result<()> {
        let ratio = self.settings.timestep_ratio;
        if self.sub_step > ratio {
            return Err(Error::Precondition(format!(
                "sub-step {} exceeds the timestep ratio {}",
                self.sub_step, ratio
            )));
        }

        let (origin_handle, destination_handle) = self.attached_domains()?;
        if self.solver.is_none() {
            return Err(Error::Precondition(
                "the linear solver has not been set. Call set_linear_solver before equilibrate_domains"
                    .into(),
            ));
        }

        let mut origin = origin_handle.write();
        let mut destination = destination_handle.write();

        let dim = origin.dimension();
        if destination.dimension() != dim {
            return Err(Error::Precondition(format!(
                "origin and destination working space dimensions do not match ({} vs {})",
                dim,
                destination.dimension()
            )));
        }
        self.check_mapping(&origin, &destination)?;

        let is_final_sub_step = self.sub_step == ratio;
        let variable = self.settings.equilibrium_variable.nodal_variable();
        if self.settings.echo_level > 2 {
            for (side, domain) in [("origin", &*origin), ("destination", &*destination)] {
                let kinematics = interface_quantity(domain, variable)?;
                info!(side, variable = %variable, ?kinematics, "interface kinematics");
            }
        }

        // 1. interface gap
        let unbalanced = self.unbalanced_kinematics(&origin, &destination, false)?;

        // 2-4. operators
        self.update_operators(&origin, &destination)?;

        // 5. multipliers
        let lagrange = self.solve_lagrange_multipliers(&unbalanced)?;

        // 6. corrections
        if is_final_sub_step {
            self.capture_initial_kinematics(&origin)?;
            apply_correction(
                &self.settings.origin_scheme,
                &mut origin,
                cached_numbering(&self.cache.origin_numbering, "origin")?,
                cached(&self.cache.unit_response_origin, "origin unit response")?,
                &lagrange,
            )?;
        }
        apply_correction(
            &self.settings.destination_scheme,
            &mut destination,
            cached_numbering(&self.cache.destination_numbering, "destination")?,
            cached(&self.cache.unit_response_destination, "destination unit response")?,
            &lagrange,
        )?;

        // 7. equilibrium assertion
        if self.is_check_equilibrium && !self.settings.is_disable_coupling && is_final_sub_step {
            let residual = self.unbalanced_kinematics(&origin, &destination, true)?;
            let norm = sparse::norm(&residual);
            if norm > EQUILIBRIUM_TOLERANCE {
                return Err(Error::Equilibrium { norm, residual });
            }
            debug!(norm, "interface equilibrium verified");
        }

        // 8. write-back
        write_lagrange_multipliers(&mut destination, &lagrange)?;

        if is_final_sub_step && self.settings.echo_level > 0 {
            info!(
                timestep_ratio = ratio,
                lagrange_norm = sparse::norm(&lagrange),
                "coupling step complete"
            );
        }
        self.lagrange_multipliers = lagrange;

        // 9. sub-step counter
        self.sub_step = if is_final_sub_step { 1 } else { self.sub_step + 1 };
        Ok(())
    }

    fn attached_domains(&self) -> Result<(SharedDomain, SharedDomain)> {
        self.domains.clone().ok_or_else(|| {
            Error::Precondition(
                "origin and destination domains have not been set. Call set_domains before equilibrate_domains"
                    .into(),
            )
        })
    }

    fn check_mapping(&self, origin: &Domain, destination: &Domain) -> Result<()> {
        let mapping = self.mapping_matrix.as_ref().ok_or_else(|| {
            Error::Precondition(
                "the mapping matrix has not been set. Call set_mapping_matrix before equilibrate_domains"
                    .into(),
            )
        })?;
        if mapping.nrows() != destination.n_interface_nodes()
            || mapping.ncols() != origin.n_interface_nodes()
        {
            return Err(Error::Precondition(format!(
                "mapping matrix is {}x{} but the interfaces have {} destination and {} origin nodes",
                mapping.nrows(),
                mapping.ncols(),
                destination.n_interface_nodes(),
                origin.n_interface_nodes()
            )));
        }
        Ok(())
    }

    fn capture_initial_kinematics(&mut self, origin: &Domain) -> Result<()> {
        let variable = self.settings.equilibrium_variable.nodal_variable();
        self.initial_origin_kinematics = Some(interface_quantity(origin, variable)?);
        Ok(())
    }

    /// Mapped, time-interpolated origin kinematics minus destination
    /// kinematics, in destination interface numbering.
    ///
    /// The final origin kinematics are captured at the first sub-step and on
    /// every equilibrium check. An equilibrium check compares against them
    /// directly.
    fn unbalanced_kinematics(
        &mut self,
        origin: &Domain,
        destination: &Domain,
        is_equilibrium_check: bool,
    ) -> Result<Vec<f64>> {
        let variable = self.settings.equilibrium_variable.nodal_variable();
        let ratio = self.settings.timestep_ratio;

        let mut unbalanced = interface_quantity(destination, variable)?;
        unbalanced.iter_mut().for_each(|v| *v = -*v);

        if self.sub_step == 1 || is_equilibrium_check {
            self.final_origin_kinematics = Some(interface_quantity(origin, variable)?);
        }
        let final_kinematics = self.final_origin_kinematics.as_deref().ok_or_else(|| {
            Error::Precondition("final origin kinematics have not been captured".into())
        })?;

        let origin_kinematics = if is_equilibrium_check || self.sub_step == ratio {
            final_kinematics.to_vec()
        } else {
            let initial = self.initial_origin_kinematics.as_deref().ok_or_else(|| {
                Error::Precondition(
                    "origin initial kinematics have not been set. Call set_origin_initial_kinematics before equilibrate_domains"
                        .into(),
                )
            })?;
            if initial.len() != final_kinematics.len() {
                return Err(Error::Precondition(format!(
                    "origin initial kinematics have {} entries, the origin interface has {}",
                    initial.len(),
                    final_kinematics.len()
                )));
            }
            let fraction = self.sub_step as f64 / ratio as f64;
            final_kinematics
                .iter()
                .zip(initial)
                .map(|(f, i)| fraction * f + (1.0 - fraction) * i)
                .collect()
        };

        let mapping = self.mapping_matrix.as_ref().ok_or_else(|| {
            Error::Precondition("the mapping matrix has not been set".into())
        })?;
        let expanded = sparse::expand_dofs(mapping, origin.dimension())?;
        let mapped = sparse::spmv(&expanded, &origin_kinematics)?;
        if mapped.len() != unbalanced.len() {
            return Err(Error::Precondition(format!(
                "mapped origin kinematics have {} entries, destination interface has {}",
                mapped.len(),
                unbalanced.len()
            )));
        }

        for (u, m) in unbalanced.iter_mut().zip(&mapped) {
            *u += m;
        }
        Ok(unbalanced)
    }

    /// Rebuild whatever operators the current sub-step needs.
    ///
    /// Origin operators are rebuilt at the first sub-step of every origin
    /// step or when the origin topology changed; destination operators and
    /// the condensation matrix on every call. Once a linear coupling has
    /// built its operators they are reused for good.
    fn update_operators(&mut self, origin: &Domain, destination: &Domain) -> Result<()> {
        if self.settings.is_linear && self.cache.linear_setup_complete {
            for (numbering, domain) in [
                (&self.cache.origin_numbering, origin),
                (&self.cache.destination_numbering, destination),
            ] {
                if !numbering.as_ref().is_some_and(|n| n.matches(domain)) {
                    return Err(Error::Precondition(format!(
                        "dofs of domain '{}' changed after the linear coupling setup",
                        domain.name()
                    )));
                }
            }
            self.stats.reuses += 1;
            debug!("reusing linear coupling operators");
            return Ok(());
        }

        let dim = origin.dimension();
        let factory = self.settings.linear_solver_settings;
        let mapping = self.mapping_matrix.as_ref().ok_or_else(|| {
            Error::Precondition("the mapping matrix has not been set".into())
        })?;

        let origin_topology_unchanged = self
            .cache
            .origin_numbering
            .as_ref()
            .is_some_and(|n| n.matches(origin));
        if self.sub_step == 1 || !origin_topology_unchanged {
            self.cache.invalidate_origin();
        }

        if !self.cache.projector_origin_valid {
            let numbering = self.settings.origin_scheme.numbering(origin)?;
            let projector = compose_projector(origin, &numbering, InterfaceSide::Origin)?;
            let projector = apply_mapping_to_projector(
                &projector,
                mapping,
                self.force_mapping_matrix.as_ref(),
                dim,
            )?;
            debug!(
                rows = projector.nrows(),
                cols = projector.ncols(),
                "built origin projector"
            );
            self.cache.origin_numbering = Some(numbering);
            self.cache.projector_origin = Some(projector);
            self.cache.projector_origin_valid = true;
        }

        if !self.cache.unit_response_origin_valid {
            let response = self.settings.origin_scheme.unit_response(
                origin,
                cached_numbering(&self.cache.origin_numbering, "origin")?,
                cached(&self.cache.projector_origin, "origin projector")?,
                &factory,
            )?;
            debug!(nnz = response.nnz(), "built origin unit response");
            self.cache.unit_response_origin = Some(response);
            self.cache.unit_response_origin_valid = true;
            self.stats.origin_builds += 1;
        }

        let numbering = self.settings.destination_scheme.numbering(destination)?;
        let projector = compose_projector(destination, &numbering, InterfaceSide::Destination)?;
        let response =
            self.settings
                .destination_scheme
                .unit_response(destination, &numbering, &projector, &factory)?;
        debug!(
            rows = projector.nrows(),
            cols = projector.ncols(),
            nnz = response.nnz(),
            "built destination projector and unit response"
        );
        self.cache.destination_numbering = Some(numbering);
        self.cache.projector_destination = Some(projector);
        self.cache.unit_response_destination = Some(response);
        self.stats.destination_builds += 1;

        let equilibrium_variable = self.settings.equilibrium_variable;
        let condensation = condensation_matrix(
            cached(&self.cache.projector_origin, "origin projector")?,
            cached(&self.cache.unit_response_origin, "origin unit response")?,
            equilibrium_variable
                .kinematic_coefficient(self.settings.origin_scheme.gamma(), origin.delta_time()),
            cached(&self.cache.projector_destination, "destination projector")?,
            cached(&self.cache.unit_response_destination, "destination unit response")?,
            equilibrium_variable.kinematic_coefficient(
                self.settings.destination_scheme.gamma(),
                destination.delta_time(),
            ),
        )?;
        debug!(size = condensation.nrows(), "built condensation matrix");
        self.cache.condensation = Some(condensation);
        self.stats.condensation_builds += 1;

        if self.settings.is_linear {
            self.cache.linear_setup_complete = true;
            debug!("linear coupling setup complete");
        }
        Ok(())
    }

    fn solve_lagrange_multipliers(&self, unbalanced: &[f64]) -> Result<Vec<f64>> {
        let solver = self
            .solver
            .as_ref()
            .ok_or_else(|| Error::Precondition("the linear solver has not been set".into()))?;
        let condensation = cached(&self.cache.condensation, "condensation matrix")?;

        let mut lagrange = solver.solve(condensation, unbalanced)?;
        if self.settings.is_disable_coupling {
            lagrange.fill(0.0);
            warn!("Lagrange multipliers disabled");
        }
        Ok(lagrange)
    }
}

/// `C = -(c_o P_o U_o + c_d P_d U_d)`.
fn condensation_matrix(
    origin_projector: &CsrMatrix,
    origin_response: &CsrMatrix,
    origin_coefficient: f64,
    destination_projector: &CsrMatrix,
    destination_response: &CsrMatrix,
    destination_coefficient: f64,
) -> Result<CsrMatrix> {
    let mut h_origin = sparse::spmm(origin_projector, origin_response)?;
    sparse::scale(&mut h_origin, origin_coefficient);

    let mut h_destination = sparse::spmm(destination_projector, destination_response)?;
    sparse::scale(&mut h_destination, destination_coefficient);

    let mut condensation = sparse::add(&h_origin, &h_destination)?;
    sparse::scale(&mut condensation, -1.0);
    Ok(condensation)
}

fn apply_correction(
    scheme: &TimeScheme,
    domain: &mut Domain,
    numbering: &DofNumbering,
    unit_response: &CsrMatrix,
    lagrange: &[f64],
) -> Result<()> {
    if !numbering.matches(domain) {
        return Err(Error::Precondition(format!(
            "dofs of domain '{}' changed since its coupling operators were built",
            domain.name()
        )));
    }
    let correction = sparse::spmv(unit_response, lagrange)?;
    scheme.apply_correction(domain, numbering, correction)
}

/// Store `-λ` in the multiplier field of every destination interface node.
fn write_lagrange_multipliers(destination: &mut Domain, lagrange: &[f64]) -> Result<()> {
    let dim = destination.dimension();
    let n_interface = destination.n_interface_nodes();
    if lagrange.len() != n_interface * dim {
        return Err(Error::Precondition(format!(
            "{} multipliers for {} destination interface dofs",
            lagrange.len(),
            n_interface * dim
        )));
    }

    for i in 0..n_interface {
        let idx = destination.interface()[i];
        let node = &mut destination.nodes_mut()[idx];
        let k = interface_id(node, n_interface)?;

        let mut multiplier = Vec3::zeros();
        for d in 0..dim {
            multiplier[d] = -lagrange[dim * k + d];
        }
        node.state.lagrange_multiplier = multiplier;
    }
    Ok(())
}
