//! Interface kinematics extraction.
//!
//! Interface vectors are ordered by the interface equation id the mapper
//! assigned to each node: component `d` of node `k` sits at `dim*k + d`.

use crate::domain::{Domain, Node};
use crate::error::{Error, Result};
use crate::types::NodalVariable;
use rayon::prelude::*;

/// Interface equation id of a node, checked against the interface size.
pub(crate) fn interface_id(node: &Node, n_interface: usize) -> Result<usize> {
    let id = node.interface_equation_id.ok_or_else(|| {
        Error::Precondition(format!(
            "interface node {} has no interface equation id. This is created by the mapper",
            node.id
        ))
    })?;
    if id >= n_interface {
        return Err(Error::Precondition(format!(
            "interface node {} has equation id {} but the interface has {} nodes",
            node.id, id, n_interface
        )));
    }
    Ok(id)
}

/// Gather `(interface id, value)` pairs in parallel and scatter them into a
/// dense vector of `n_interface * width` entries.
fn gather<T, F>(domain: &Domain, width: usize, value: F) -> Result<Vec<f64>>
where
    T: AsRef<[f64]> + Send,
    F: Fn(&Node) -> T + Sync,
{
    let n_interface = domain.n_interface_nodes();
    let nodes = domain.nodes();

    let entries = domain
        .interface()
        .par_iter()
        .map(|&i| {
            let node = &nodes[i];
            Ok((interface_id(node, n_interface)?, value(node)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out = vec![0.0; n_interface * width];
    let mut seen = vec![false; n_interface];
    for (id, v) in entries {
        if std::mem::replace(&mut seen[id], true) {
            return Err(Error::Precondition(format!(
                "interface equation id {} is assigned to more than one node of domain '{}'",
                id,
                domain.name()
            )));
        }
        out[width * id..width * (id + 1)].copy_from_slice(&v.as_ref()[..width]);
    }
    Ok(out)
}

/// Read a vector field on the interface, `dim` components per node.
pub fn interface_quantity(domain: &Domain, variable: NodalVariable) -> Result<Vec<f64>> {
    let dim = domain.dimension();
    gather(domain, dim, |node| {
        let v = node.state.get(variable);
        [v.x, v.y, v.z]
    })
}

/// Read a scalar nodal quantity on the interface, one entry per node.
pub fn interface_scalar_quantity<F>(domain: &Domain, value: F) -> Result<Vec<f64>>
where
    F: Fn(&Node) -> f64 + Sync,
{
    gather(domain, 1, |node| [value(node)])
}
