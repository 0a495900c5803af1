//! Per-domain time integration strategy.
//!
//! Each coupled domain is advanced either by the implicit Newmark average
//! acceleration scheme or by the explicit central difference scheme. The
//! scheme decides three things for the coupling:
//!
//! - how domain DOFs are numbered ([`DofNumbering`]),
//! - how the domain responds to a unit interface load
//!   ([`TimeScheme::unit_response`]),
//! - how an acceleration correction propagates into velocity, displacement
//!   and, for central difference, the half-step velocity
//!   ([`TimeScheme::apply_correction`]).

use crate::domain::{Domain, Node};
use crate::error::{Error, Result};
use crate::response;
use crate::solver::SolverFactory;
use crate::sparse::CsrMatrix;
use crate::types::{NodalVariable, NUMERICAL_LIMIT};
use rayon::prelude::*;

/// Newmark-family scheme of one domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeScheme {
    /// Implicit average acceleration (`beta = 0.25`, `gamma = 0.5`).
    AverageAcceleration { beta: f64, gamma: f64 },
    /// Explicit central difference (`beta = 0`, `gamma = 0.5`).
    CentralDifference { gamma: f64 },
}

impl TimeScheme {
    /// Classify a Newmark `(beta, gamma)` pair.
    ///
    /// # Errors
    ///
    /// Returns error for any pair other than `(0.25, 0.5)` or `(0, 0.5)`.
    pub fn from_newmark(beta: f64, gamma: f64) -> Result<Self> {
        if beta != 0.0 && beta != 0.25 {
            return Err(Error::Config(format!(
                "newmark beta must be 0.0 or 0.25, got {}",
                beta
            )));
        }
        if gamma != 0.5 {
            return Err(Error::Config(format!(
                "newmark gamma must be 0.5, got {}",
                gamma
            )));
        }

        if beta > NUMERICAL_LIMIT {
            Ok(TimeScheme::AverageAcceleration { beta, gamma })
        } else {
            Ok(TimeScheme::CentralDifference { gamma })
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, TimeScheme::AverageAcceleration { .. })
    }

    pub fn beta(&self) -> f64 {
        match *self {
            TimeScheme::AverageAcceleration { beta, .. } => beta,
            TimeScheme::CentralDifference { .. } => 0.0,
        }
    }

    pub fn gamma(&self) -> f64 {
        match *self {
            TimeScheme::AverageAcceleration { gamma, .. } | TimeScheme::CentralDifference { gamma } => {
                gamma
            }
        }
    }

    /// Number the domain DOFs that interface loads act on.
    ///
    /// Implicit domains use the equation ids of their system matrix. Explicit
    /// domains get a fresh dense numbering over the nodes carrying mass, in
    /// node order; it is only valid for the current node set.
    pub fn numbering(&self, domain: &Domain) -> Result<DofNumbering> {
        match self {
            TimeScheme::AverageAcceleration { .. } => {
                let k = domain.system_matrix().ok_or_else(|| {
                    Error::Precondition(format!(
                        "implicit domain '{}' has no system matrix set",
                        domain.name()
                    ))
                })?;
                Ok(DofNumbering::System { n_dofs: k.nrows() })
            }
            TimeScheme::CentralDifference { .. } => {
                let dim = domain.dimension();
                let mut n_dofs = 0;
                let ids = domain
                    .nodes()
                    .iter()
                    .map(|node| {
                        (node.mass > NUMERICAL_LIMIT).then(|| {
                            let id = n_dofs;
                            n_dofs += dim;
                            id
                        })
                    })
                    .collect();
                Ok(DofNumbering::Explicit { ids, n_dofs })
            }
        }
    }

    /// Domain response (rows: domain DOFs) to a unit load on every row of
    /// `projector` (columns: interface DOFs).
    pub fn unit_response(
        &self,
        domain: &Domain,
        numbering: &DofNumbering,
        projector: &CsrMatrix,
        solver_factory: &dyn SolverFactory,
    ) -> Result<CsrMatrix> {
        match *self {
            TimeScheme::AverageAcceleration { beta, .. } => {
                let k = domain.system_matrix().ok_or_else(|| {
                    Error::Precondition(format!(
                        "implicit domain '{}' has no system matrix set",
                        domain.name()
                    ))
                })?;
                response::implicit_unit_response(k, beta, domain.delta_time(), projector, solver_factory)
            }
            TimeScheme::CentralDifference { .. } => {
                response::explicit_unit_response(domain, numbering, projector)
            }
        }
    }

    /// Push an acceleration correction (indexed by domain DOF) into the
    /// nodal kinematics.
    ///
    /// Average acceleration: `Δa`, `Δv = γ dt Δa`, `Δu = (γ dt)² Δa`.
    /// Central difference: `Δa`, `Δv = γ dt Δa`, `Δv½ = 2 γ dt Δa`,
    /// `Δu = 2 γ dt² Δa`.
    pub fn apply_correction(
        &self,
        domain: &mut Domain,
        numbering: &DofNumbering,
        mut correction: Vec<f64>,
    ) -> Result<()> {
        if correction.len() != numbering.n_dofs() {
            return Err(Error::Precondition(format!(
                "correction dof size {} does not match domain '{}' dof size {}",
                correction.len(),
                domain.name(),
                numbering.n_dofs()
            )));
        }

        let dt = domain.delta_time();
        let gamma = self.gamma();

        add_correction(domain, numbering, NodalVariable::Acceleration, &correction)?;

        scale_in_place(&mut correction, gamma * dt);
        add_correction(domain, numbering, NodalVariable::Velocity, &correction)?;

        match self {
            TimeScheme::AverageAcceleration { .. } => {
                scale_in_place(&mut correction, gamma * dt);
                add_correction(domain, numbering, NodalVariable::Displacement, &correction)?;
            }
            TimeScheme::CentralDifference { .. } => {
                scale_in_place(&mut correction, 2.0);
                add_correction(domain, numbering, NodalVariable::MiddleVelocity, &correction)?;

                scale_in_place(&mut correction, dt);
                add_correction(domain, numbering, NodalVariable::Displacement, &correction)?;
            }
        }
        Ok(())
    }
}

fn scale_in_place(values: &mut [f64], factor: f64) {
    values.iter_mut().for_each(|v| *v *= factor);
}

/// Domain DOF numbering used by projectors, unit responses and corrections.
#[derive(Debug, Clone, PartialEq)]
pub enum DofNumbering {
    /// Equation ids of the implicit system matrix.
    System { n_dofs: usize },
    /// Engine-owned numbering of explicit nodes: `ids[node position]` is the
    /// first of `dim` consecutive DOFs, `None` for nodes without mass.
    Explicit { ids: Vec<Option<usize>>, n_dofs: usize },
}

impl DofNumbering {
    /// Number of domain DOFs.
    pub fn n_dofs(&self) -> usize {
        match self {
            DofNumbering::System { n_dofs } | DofNumbering::Explicit { n_dofs, .. } => *n_dofs,
        }
    }

    /// First domain DOF of a node, `None` if the node carries no DOFs.
    pub fn equation_id(&self, node_idx: usize, node: &Node) -> Result<Option<usize>> {
        match self {
            DofNumbering::System { .. } => node.displacement_equation_id.map(Some).ok_or_else(|| {
                Error::Precondition(format!(
                    "node {} of an implicit domain has no displacement equation id",
                    node.id
                ))
            }),
            DofNumbering::Explicit { ids, .. } => Ok(ids.get(node_idx).copied().flatten()),
        }
    }

    /// Whether the numbering still describes this domain's node set.
    pub fn matches(&self, domain: &Domain) -> bool {
        match self {
            DofNumbering::System { n_dofs } => {
                domain.system_matrix().map(|k| k.nrows()) == Some(*n_dofs)
            }
            DofNumbering::Explicit { ids, .. } => {
                ids.len() == domain.n_nodes()
                    && ids
                        .iter()
                        .zip(domain.nodes())
                        .all(|(id, node)| id.is_some() == (node.mass > NUMERICAL_LIMIT))
            }
        }
    }
}

/// Add `correction[equation_id + d]` to component `d` of `variable` on every
/// numbered node. Each node is written by exactly one task.
fn add_correction(
    domain: &mut Domain,
    numbering: &DofNumbering,
    variable: NodalVariable,
    correction: &[f64],
) -> Result<()> {
    let dim = domain.dimension();

    domain
        .nodes_mut()
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(idx, node)| {
            let Some(equation_id) = numbering.equation_id(idx, node)? else {
                return Ok(());
            };
            if equation_id + dim > correction.len() {
                return Err(Error::Precondition(format!(
                    "node {} equation id {} exceeds correction size {}",
                    node.id,
                    equation_id,
                    correction.len()
                )));
            }

            let value = node.state.get_mut(variable);
            for d in 0..dim {
                value[d] += correction[equation_id + d];
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::TripletMatrix;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn explicit_domain(masses: &[f64]) -> Domain {
        let mut domain = Domain::new("explicit", 2, 0.1).unwrap();
        for (id, &m) in masses.iter().enumerate() {
            domain.add_node(Node::new(id).with_mass(m));
        }
        domain
    }

    #[test]
    fn test_classification() {
        assert!(TimeScheme::from_newmark(0.25, 0.5).unwrap().is_implicit());
        assert!(!TimeScheme::from_newmark(0.0, 0.5).unwrap().is_implicit());
        assert!(TimeScheme::from_newmark(0.3, 0.5).is_err());
        assert!(TimeScheme::from_newmark(0.25, 0.6).is_err());
    }

    #[test]
    fn test_explicit_numbering_skips_massless_nodes() {
        let domain = explicit_domain(&[1.0, 0.0, 2.0]);
        let scheme = TimeScheme::from_newmark(0.0, 0.5).unwrap();
        let numbering = scheme.numbering(&domain).unwrap();

        assert_eq!(numbering.n_dofs(), 4);
        let nodes = domain.nodes();
        assert_eq!(numbering.equation_id(0, &nodes[0]).unwrap(), Some(0));
        assert_eq!(numbering.equation_id(1, &nodes[1]).unwrap(), None);
        assert_eq!(numbering.equation_id(2, &nodes[2]).unwrap(), Some(2));
        assert!(numbering.matches(&domain));

        let mut changed = domain.clone();
        changed.node_mut(1).unwrap().mass = 1.0;
        assert!(!numbering.matches(&changed));
    }

    #[test]
    fn test_implicit_numbering_requires_system_matrix() {
        let mut domain = Domain::new("implicit", 1, 0.1).unwrap();
        domain.add_node(Node::new(0).with_displacement_equation_id(0));
        let scheme = TimeScheme::from_newmark(0.25, 0.5).unwrap();
        assert!(matches!(scheme.numbering(&domain), Err(Error::Precondition(_))));

        let mut k = TripletMatrix::new(1, 1);
        k.add(0, 0, 10.0);
        domain.set_system_matrix(k.to_csr().unwrap());
        assert_eq!(scheme.numbering(&domain).unwrap(), DofNumbering::System { n_dofs: 1 });
    }

    #[test]
    fn test_central_difference_correction() {
        let mut domain = explicit_domain(&[1.0, 0.0, 2.0]);
        let scheme = TimeScheme::from_newmark(0.0, 0.5).unwrap();
        let numbering = scheme.numbering(&domain).unwrap();

        scheme
            .apply_correction(&mut domain, &numbering, vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();

        let first = domain.node(0).unwrap().state;
        assert_eq!(first.acceleration, Vector3::new(1.0, 2.0, 0.0));
        assert_relative_eq!(first.velocity, Vector3::new(0.05, 0.1, 0.0), epsilon = 1e-15);
        assert_relative_eq!(first.middle_velocity, Vector3::new(0.1, 0.2, 0.0), epsilon = 1e-15);
        assert_relative_eq!(first.displacement, Vector3::new(0.01, 0.02, 0.0), epsilon = 1e-15);

        // massless node untouched
        assert_eq!(domain.node(1).unwrap().state, Default::default());
        assert_eq!(domain.node(2).unwrap().state.acceleration, Vector3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn test_average_acceleration_correction() {
        let mut domain = Domain::new("implicit", 1, 0.2).unwrap();
        domain.add_node(Node::new(0).with_displacement_equation_id(1));
        domain.add_node(Node::new(1).with_displacement_equation_id(0));
        let mut k = TripletMatrix::new(2, 2);
        k.add(0, 0, 1.0);
        k.add(1, 1, 1.0);
        domain.set_system_matrix(k.to_csr().unwrap());

        let scheme = TimeScheme::from_newmark(0.25, 0.5).unwrap();
        let numbering = scheme.numbering(&domain).unwrap();
        scheme.apply_correction(&mut domain, &numbering, vec![10.0, 20.0]).unwrap();

        let state = domain.node(0).unwrap().state;
        assert_relative_eq!(state.acceleration.x, 20.0);
        assert_relative_eq!(state.velocity.x, 2.0, epsilon = 1e-14);
        assert_relative_eq!(state.displacement.x, 0.2, epsilon = 1e-14);
        assert_eq!(state.middle_velocity, Vector3::zeros());
        assert_relative_eq!(domain.node(1).unwrap().state.acceleration.x, 10.0);
    }

    #[test]
    fn test_correction_size_mismatch() {
        let mut domain = explicit_domain(&[1.0, 1.0]);
        let scheme = TimeScheme::from_newmark(0.0, 0.5).unwrap();
        let numbering = scheme.numbering(&domain).unwrap();
        let result = scheme.apply_correction(&mut domain, &numbering, vec![1.0; 3]);
        assert!(matches!(result, Err(Error::Precondition(_))));
    }
}
