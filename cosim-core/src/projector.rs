//! Projectors between domain DOFs and interface DOFs.
//!
//! A projector `P` has one row per interface DOF and one column per domain
//! DOF. Origin projectors carry `+1` entries and destination projectors `-1`
//! entries, so that the two contributions cancel at equilibrium.
//!
//! Lagrange multipliers live on the destination interface. The origin
//! projector is therefore post-composed with the DOF-expanded mapping
//! matrix, which brings it into destination interface numbering.

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::kinematics::interface_id;
use crate::scheme::DofNumbering;
use crate::sparse::{self, CsrMatrix, TripletMatrix};

/// Which side of the coupling a projector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceSide {
    Origin,
    Destination,
}

impl InterfaceSide {
    /// Projector entry value.
    pub fn sign(self) -> f64 {
        match self {
            InterfaceSide::Origin => 1.0,
            InterfaceSide::Destination => -1.0,
        }
    }
}

/// Build the signed projector of a domain.
///
/// Interface node with interface id `k` and first domain DOF `j` gets the
/// side sign at `(dim*k + d, j + d)` for every component `d`.
pub fn compose_projector(
    domain: &Domain,
    numbering: &DofNumbering,
    side: InterfaceSide,
) -> Result<CsrMatrix> {
    let dim = domain.dimension();
    let n_interface = domain.n_interface_nodes();
    let n_dofs = numbering.n_dofs();
    let sign = side.sign();

    let mut triplet = TripletMatrix::with_capacity(n_interface * dim, n_dofs, n_interface * dim);
    for &idx in domain.interface() {
        let node = &domain.nodes()[idx];
        let k = interface_id(node, n_interface)?;
        let j = numbering.equation_id(idx, node)?.ok_or_else(|| {
            Error::Precondition(format!(
                "interface node {} of domain '{}' has no mass and therefore no equation id",
                node.id,
                domain.name()
            ))
        })?;
        if j + dim > n_dofs {
            return Err(Error::Precondition(format!(
                "interface node {} equation id {} exceeds the {} dofs of domain '{}'",
                node.id,
                j,
                n_dofs,
                domain.name()
            )));
        }

        for d in 0..dim {
            triplet.add(dim * k + d, j + d, sign);
        }
    }
    triplet.to_csr()
}

/// Bring an origin projector into destination interface numbering.
///
/// Only the conservative path is available: the projector is pre-multiplied
/// by the expanded displacement mapping matrix. A separate force mapping
/// matrix is rejected.
pub fn apply_mapping_to_projector(
    projector: &CsrMatrix,
    mapping: &CsrMatrix,
    force_mapping: Option<&CsrMatrix>,
    dim: usize,
) -> Result<CsrMatrix> {
    if force_mapping.is_some() {
        return Err(Error::Unsupported(
            "projecting through a separate force mapping matrix is not implemented".into(),
        ));
    }
    let expanded = sparse::expand_dofs(mapping, dim)?;
    sparse::spmm(&expanded, projector)
}
