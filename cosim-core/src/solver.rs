//! Linear system solvers.
//!
//! The coupling solves two kinds of systems: one effective-mass system per
//! interface DOF for every implicit domain, and the condensed interface
//! system for the Lagrange multipliers.
//!
//! # Solver Backends
//!
//! - [`FaerLUSolver`]: Sparse LU factorization using the faer library. The
//!   default direct solver; it is general, so it handles the sign-negated
//!   (negative definite) condensation matrix as well as the effective mass
//!   matrices of large implicit domains.
//! - [`DenseLUSolver`]: nalgebra dense LU with partial pivoting. Cubic in the
//!   system size; only for small systems.
//! - [`FaerCholeskySolver`]: Sparse Cholesky factorization using the faer
//!   library. Only valid for symmetric positive definite matrices, so it is
//!   an opt-in for large implicit effective-mass solves.
//!
//! Solvers are created through a [`SolverFactory`] so that every parallel
//! column solve owns an independent instance.

use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;
use faer::linalg::cholesky::llt::factor::LltError;
use faer::linalg::solvers::Solve;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, Lu, SymbolicLlt, SymbolicLu};
use faer::sparse::linalg::{LltError as SparseLltError, LuError as SparseLuError};
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use serde::{Deserialize, Serialize};

/// Linear solver interface.
pub trait Solver: Send + Sync {
    /// Solve the linear system Ax = b.
    ///
    /// # Arguments
    ///
    /// * `matrix` - System matrix (A)
    /// * `rhs` - Right-hand side vector (b)
    ///
    /// # Returns
    ///
    /// Solution vector (x)
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

/// Produces independent solver instances on request.
pub trait SolverFactory: Send + Sync {
    /// Create a fresh solver.
    fn create(&self) -> Box<dyn Solver>;
}

/// Solver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverType {
    /// Sparse direct LU factorization.
    #[default]
    #[serde(alias = "skyline_lu_factorization")]
    SparseLu,
    /// Dense LU factorization (small systems only).
    DenseLu,
    /// Sparse Cholesky (SPD matrices only).
    SparseCholesky,
}

/// Linear solver settings (`linear_solver_settings`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Solver type to use. Missing means the default direct solver.
    #[serde(default)]
    pub solver_type: SolverType,
}

impl SolverConfig {
    /// Settings selecting the given solver.
    pub fn new(solver_type: SolverType) -> Self {
        Self { solver_type }
    }
}

impl SolverFactory for SolverConfig {
    fn create(&self) -> Box<dyn Solver> {
        select_solver(self)
    }
}

/// Select solver based on configuration.
pub fn select_solver(config: &SolverConfig) -> Box<dyn Solver> {
    match config.solver_type {
        SolverType::SparseLu => Box::new(FaerLUSolver::new()),
        SolverType::DenseLu => Box::new(DenseLUSolver::new()),
        SolverType::SparseCholesky => Box::new(FaerCholeskySolver::new()),
    }
}

fn check_system(matrix: &CsrMatrix, rhs: &[f64]) -> Result<()> {
    if matrix.nrows() != matrix.ncols() {
        return Err(Error::Solver(format!(
            "Matrix must be square, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }

    if matrix.nrows() != rhs.len() {
        return Err(Error::Solver(format!(
            "RHS size mismatch: matrix has {} rows, RHS has {} entries",
            matrix.nrows(),
            rhs.len()
        )));
    }
    Ok(())
}

/// Direct solver using nalgebra dense LU factorization.
///
/// Converts the matrix to dense storage and factorizes it in O(n³). Fine for
/// interface-sized systems, far too slow for domain effective masses.
pub struct DenseLUSolver;

impl DenseLUSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DenseLUSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for DenseLUSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        use nalgebra::{DMatrix, DVector};

        check_system(matrix, rhs)?;
        if matrix.nrows() == 0 {
            return Ok(vec![]);
        }

        let dense = DMatrix::from(matrix);
        let b = DVector::from_column_slice(rhs);

        let lu = dense.lu();
        let solution = lu
            .solve(&b)
            .ok_or_else(|| Error::SingularMatrix("LU factorization failed".into()))?;

        Ok(solution.as_slice().to_vec())
    }

    fn name(&self) -> &str {
        "Dense LU"
    }
}

/// Convert nalgebra-sparse CSR matrix to faer SparseColMat (CSC format).
fn csr_to_faer_csc(csr: &CsrMatrix) -> SparseColMat<usize, f64> {
    let nrows = csr.nrows();
    let ncols = csr.ncols();

    let row_offsets = csr.row_offsets();
    let col_indices = csr.col_indices();
    let values = csr.values();

    let mut col_counts = vec![0usize; ncols];
    for &col in col_indices {
        col_counts[col] += 1;
    }

    let mut col_offsets = vec![0usize; ncols + 1];
    for i in 0..ncols {
        col_offsets[i + 1] = col_offsets[i] + col_counts[i];
    }

    // Scatter each CSR row into the CSC columns; rows are visited in order so
    // row indices stay sorted within every column.
    let nnz = values.len();
    let mut csc_row_indices = vec![0usize; nnz];
    let mut csc_values = vec![0.0f64; nnz];
    let mut col_positions = col_offsets[..ncols].to_vec();

    for row in 0..nrows {
        for idx in row_offsets[row]..row_offsets[row + 1] {
            let col = col_indices[idx];
            let pos = col_positions[col];
            csc_row_indices[pos] = row;
            csc_values[pos] = values[idx];
            col_positions[col] += 1;
        }
    }

    // SAFETY: offsets are monotone, row indices are in bounds and sorted per column.
    unsafe {
        SparseColMat::new(
            SymbolicSparseColMat::new_unchecked(nrows, ncols, col_offsets, None, csc_row_indices),
            csc_values,
        )
    }
}

fn collect_solution(x: &faer::Mat<f64>, n: usize) -> Result<Vec<f64>> {
    let solution: Vec<f64> = (0..n).map(|i| x[(i, 0)]).collect();
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularMatrix(
            "factorization produced a non-finite solution".into(),
        ));
    }
    Ok(solution)
}

/// Sparse LU solver using the faer library.
///
/// General square matrices, with partial pivoting. A zero pivot shows up as
/// a non-finite solution and is reported as singular.
pub struct FaerLUSolver;

impl FaerLUSolver {
    /// Create a new sparse LU solver.
    pub fn new() -> Self {
        Self
    }
}

impl Default for FaerLUSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for FaerLUSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        check_system(matrix, rhs)?;
        let n = matrix.nrows();
        if n == 0 {
            return Ok(vec![]);
        }

        let csc = csr_to_faer_csc(matrix);
        let csc_ref = csc.as_ref();

        let symbolic = SymbolicLu::try_new(csc_ref.symbolic())
            .map_err(|e| Error::Solver(format!("Symbolic LU analysis failed: {:?}", e)))?;

        let lu = Lu::try_new_with_symbolic(symbolic, csc_ref).map_err(|e| match e {
            SparseLuError::Generic(err) => Error::Solver(format!("Sparse LU error: {:?}", err)),
            SparseLuError::SymbolicSingular { index } => Error::SingularMatrix(format!(
                "Matrix is structurally singular at column {}",
                index
            )),
        })?;

        let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
        lu.solve_in_place(x.as_mut());

        collect_solution(&x, n)
    }

    fn name(&self) -> &str {
        "faer Sparse LU"
    }
}

/// Sparse Cholesky solver using the faer library.
///
/// Suitable for the effective mass `K * dt^2 * beta` of an implicit domain
/// once its constraints are applied. The condensation matrix is negative
/// definite and must not be handed to this solver.
pub struct FaerCholeskySolver;

impl FaerCholeskySolver {
    /// Create a new sparse Cholesky solver.
    pub fn new() -> Self {
        Self
    }
}

impl Default for FaerCholeskySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for FaerCholeskySolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        check_system(matrix, rhs)?;
        let n = matrix.nrows();
        if n == 0 {
            return Ok(vec![]);
        }

        let csc = csr_to_faer_csc(matrix);
        let csc_ref = csc.as_ref();

        let symbolic = SymbolicLlt::try_new(csc_ref.symbolic(), faer::Side::Lower)
            .map_err(|_| Error::Solver("Symbolic Cholesky analysis failed".into()))?;

        let llt = Llt::try_new_with_symbolic(symbolic, csc_ref, faer::Side::Lower).map_err(
            |e| match e {
                SparseLltError::Generic(err) => {
                    Error::Solver(format!("Sparse Cholesky error: {:?}", err))
                }
                SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                    Error::SingularMatrix(format!(
                        "Matrix is not positive definite at pivot {}",
                        index
                    ))
                }
            },
        )?;

        let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
        llt.solve_in_place(x.as_mut());

        collect_solution(&x, n)
    }

    fn name(&self) -> &str {
        "faer Sparse Cholesky (LLᵀ)"
    }
}
