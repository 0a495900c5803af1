//! Physical domain data consumed by the coupling.
//!
//! A [`Domain`] is owned by whoever advances it in time. It carries the
//! working-space dimension, the time step, the nodes with their mass and
//! solution-step vectors, the interface node subset, and, for implicitly
//! integrated domains, the current system matrix.
//!
//! The coupling engine only ever holds [`SharedDomain`] handles and locks
//! them for the duration of one coupling call.

use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;
use crate::types::{NodalVariable, Vec3};
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to an externally owned domain.
pub type SharedDomain = Arc<RwLock<Domain>>;

/// Solution-step vector fields of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodalState {
    pub displacement: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub middle_velocity: Vec3,
    pub lagrange_multiplier: Vec3,
}

impl NodalState {
    /// Field value for a variable.
    pub fn get(&self, variable: NodalVariable) -> &Vec3 {
        match variable {
            NodalVariable::Displacement => &self.displacement,
            NodalVariable::Velocity => &self.velocity,
            NodalVariable::Acceleration => &self.acceleration,
            NodalVariable::MiddleVelocity => &self.middle_velocity,
            NodalVariable::VectorLagrangeMultiplier => &self.lagrange_multiplier,
        }
    }

    /// Mutable field value for a variable.
    pub fn get_mut(&mut self, variable: NodalVariable) -> &mut Vec3 {
        match variable {
            NodalVariable::Displacement => &mut self.displacement,
            NodalVariable::Velocity => &mut self.velocity,
            NodalVariable::Acceleration => &mut self.acceleration,
            NodalVariable::MiddleVelocity => &mut self.middle_velocity,
            NodalVariable::VectorLagrangeMultiplier => &mut self.lagrange_multiplier,
        }
    }
}

/// A domain node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// External node id (informational).
    pub id: usize,
    /// Lumped nodal mass. Only read for explicit domains.
    pub mass: f64,
    /// Dense 0-based interface position, assigned by the mapper.
    pub interface_equation_id: Option<usize>,
    /// Global equation id of the x-displacement DOF (implicit domains);
    /// the remaining components follow consecutively.
    pub displacement_equation_id: Option<usize>,
    pub state: NodalState,
}

impl Node {
    /// Create an untagged node with zero mass and zero kinematics.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            mass: 0.0,
            interface_equation_id: None,
            displacement_equation_id: None,
            state: NodalState::default(),
        }
    }

    /// Set the lumped nodal mass.
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// Set the global x-displacement equation id.
    pub fn with_displacement_equation_id(mut self, equation_id: usize) -> Self {
        self.displacement_equation_id = Some(equation_id);
        self
    }
}

/// One physical subsystem taking part in the coupling.
#[derive(Debug, Clone)]
pub struct Domain {
    name: String,
    dimension: usize,
    delta_time: f64,
    nodes: Vec<Node>,
    /// Positions into `nodes` of the interface nodes.
    interface: Vec<usize>,
    system_matrix: Option<CsrMatrix>,
}

impl Domain {
    /// Create an empty domain.
    ///
    /// # Errors
    ///
    /// Returns error if the dimension is not 1, 2 or 3, or the time step is
    /// not positive.
    pub fn new(name: impl Into<String>, dimension: usize, delta_time: f64) -> Result<Self> {
        if !(1..=3).contains(&dimension) {
            return Err(Error::Precondition(format!(
                "working space dimension must be 1, 2 or 3, got {}",
                dimension
            )));
        }
        let mut domain = Self {
            name: name.into(),
            dimension,
            delta_time: 0.0,
            nodes: Vec::new(),
            interface: Vec::new(),
            system_matrix: None,
        };
        domain.set_delta_time(delta_time)?;
        Ok(domain)
    }

    /// Wrap into a shared handle.
    pub fn into_shared(self) -> SharedDomain {
        Arc::new(RwLock::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Working-space dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn set_delta_time(&mut self, delta_time: f64) -> Result<()> {
        if delta_time.is_nan() || delta_time <= 0.0 {
            return Err(Error::Precondition(format!(
                "domain '{}': time step must be positive, got {}",
                self.name, delta_time
            )));
        }
        self.delta_time = delta_time;
        Ok(())
    }

    /// Add a node, returning its position.
    pub fn add_node(&mut self, node: Node) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(node);
        idx
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.nodes.get_mut(idx)
    }

    /// Declare the interface node subset, by node position.
    pub fn set_interface(&mut self, node_indices: Vec<usize>) -> Result<()> {
        if let Some(&bad) = node_indices.iter().find(|&&i| i >= self.nodes.len()) {
            return Err(Error::Precondition(format!(
                "domain '{}': interface node index {} out of bounds ({} nodes)",
                self.name,
                bad,
                self.nodes.len()
            )));
        }
        self.interface = node_indices;
        Ok(())
    }

    /// Interface node positions.
    pub fn interface(&self) -> &[usize] {
        &self.interface
    }

    /// Number of interface nodes.
    pub fn n_interface_nodes(&self) -> usize {
        self.interface.len()
    }

    /// Interface nodes in interface order.
    pub fn interface_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.interface.iter().map(move |&i| &self.nodes[i])
    }

    /// Tag interface nodes with dense ids in their declared order, as a
    /// mapper would.
    pub fn number_interface_nodes(&mut self) {
        for (k, &i) in self.interface.iter().enumerate() {
            self.nodes[i].interface_equation_id = Some(k);
        }
    }

    /// Current system matrix, present for implicitly integrated domains.
    pub fn system_matrix(&self) -> Option<&CsrMatrix> {
        self.system_matrix.as_ref()
    }

    /// Hand over the effective system matrix of the latest solve.
    pub fn set_system_matrix(&mut self, matrix: CsrMatrix) {
        self.system_matrix = Some(matrix);
    }

    pub fn clear_system_matrix(&mut self) {
        self.system_matrix = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_domain_creation() {
        let mut domain = Domain::new("structure", 3, 0.01).unwrap();
        let a = domain.add_node(Node::new(1).with_mass(2.0));
        let b = domain.add_node(Node::new(2));
        assert_eq!((a, b), (0, 1));
        assert_eq!(domain.n_nodes(), 2);
        assert_eq!(domain.dimension(), 3);
        assert_eq!(domain.node(0).unwrap().mass, 2.0);
        assert!(domain.system_matrix().is_none());
    }

    #[test]
    fn test_invalid_domain() {
        assert!(Domain::new("d", 0, 0.1).is_err());
        assert!(Domain::new("d", 4, 0.1).is_err());
        assert!(Domain::new("d", 2, 0.0).is_err());
        assert!(Domain::new("d", 2, f64::NAN).is_err());
    }

    #[test]
    fn test_interface_numbering() {
        let mut domain = Domain::new("d", 2, 0.1).unwrap();
        for id in 0..4 {
            domain.add_node(Node::new(id));
        }
        assert!(domain.set_interface(vec![3, 7]).is_err());
        domain.set_interface(vec![3, 1]).unwrap();
        domain.number_interface_nodes();

        let ids: Vec<_> = domain.interface_nodes().map(|n| (n.id, n.interface_equation_id)).collect();
        assert_eq!(ids, vec![(3, Some(0)), (1, Some(1))]);
        assert_eq!(domain.node(0).unwrap().interface_equation_id, None);
    }

    #[test]
    fn test_nodal_state_access() {
        let mut state = NodalState::default();
        *state.get_mut(NodalVariable::MiddleVelocity) = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(state.middle_velocity, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(*state.get(NodalVariable::Velocity), Vector3::zeros());
    }
}
