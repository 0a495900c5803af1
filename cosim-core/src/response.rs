//! Domain response to unit interface loads.
//!
//! The unit response `U` of a domain has one row per domain DOF and one
//! column per interface DOF: column `i` is the acceleration the domain
//! picks up under a unit load along row `i` of its projector `P`, i.e.
//! `U = M⁻¹ Pᵀ` with `M` the domain's effective mass.
//!
//! Columns are independent and are evaluated in parallel.

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::parallel::SerialSolverGuard;
use crate::scheme::DofNumbering;
use crate::solver::SolverFactory;
use crate::sparse::{self, CsrMatrix, TripletMatrix};
use rayon::prelude::*;
use tracing::debug;

/// Unit response of an implicit domain.
///
/// The effective mass is the system matrix scaled by `dt² beta`, the
/// Newmark relation between a displacement increment and the acceleration
/// increment producing it. Every column is one linear solve with a freshly
/// created solver; nested solver parallelism is disabled while the columns
/// run.
pub fn implicit_unit_response(
    system_matrix: &CsrMatrix,
    beta: f64,
    dt: f64,
    projector: &CsrMatrix,
    solver_factory: &dyn SolverFactory,
) -> Result<CsrMatrix> {
    let interface_dofs = projector.nrows();
    let system_dofs = projector.ncols();

    if system_matrix.nrows() != system_dofs || system_matrix.ncols() != system_dofs {
        return Err(Error::Precondition(format!(
            "system matrix is {}x{} but the projector addresses {} domain dofs",
            system_matrix.nrows(),
            system_matrix.ncols(),
            system_dofs
        )));
    }

    let mut effective_mass = system_matrix.clone();
    sparse::scale(&mut effective_mass, dt * dt * beta);

    let columns = {
        let _serial = SerialSolverGuard::acquire();
        debug!(interface_dofs, system_dofs, "solving implicit unit responses");

        (0..interface_dofs)
            .into_par_iter()
            .map(|i| {
                let rhs = sparse::dense_row(projector, i);
                let solver = solver_factory.create();
                solver.solve(&effective_mass, &rhs)
            })
            .collect::<Result<Vec<Vec<f64>>>>()?
    };

    let mut triplet = TripletMatrix::with_capacity(system_dofs, interface_dofs, system_dofs * interface_dofs);
    for (i, column) in columns.iter().enumerate() {
        for (j, &value) in column.iter().enumerate() {
            triplet.add(j, i, value);
        }
    }
    triplet.to_csr()
}

/// Unit response of an explicit domain.
///
/// With a lumped mass no solve is needed: the response at a DOF is the
/// projector entry divided by the mass of the node owning that DOF.
pub fn explicit_unit_response(
    domain: &Domain,
    numbering: &DofNumbering,
    projector: &CsrMatrix,
) -> Result<CsrMatrix> {
    let DofNumbering::Explicit { ids, n_dofs } = numbering else {
        return Err(Error::Precondition(format!(
            "explicit unit response requested for domain '{}' without explicit numbering",
            domain.name()
        )));
    };
    let n_dofs = *n_dofs;

    if projector.ncols() != n_dofs {
        return Err(Error::Precondition(format!(
            "projector addresses {} domain dofs, explicit numbering has {}",
            projector.ncols(),
            n_dofs
        )));
    }

    let dim = domain.dimension();
    let mut dof_mass = vec![0.0; n_dofs];
    for (node, id) in domain.nodes().iter().zip(ids) {
        if let Some(id) = *id {
            dof_mass[id..id + dim].fill(node.mass);
        }
    }

    let columns: Vec<Vec<(usize, f64)>> = (0..projector.nrows())
        .into_par_iter()
        .map(|i| {
            let row = projector.row(i);
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &p)| (j, p / dof_mass[j]))
                .collect()
        })
        .collect();

    let mut triplet = TripletMatrix::new(n_dofs, projector.nrows());
    for (i, column) in columns.into_iter().enumerate() {
        for (j, value) in column {
            triplet.add(j, i, value);
        }
    }
    triplet.to_csr()
}
