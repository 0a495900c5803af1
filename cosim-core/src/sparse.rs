//! Sparse matrix operations.
//!
//! Uses CSR (Compressed Sparse Row) format for projectors, unit responses,
//! mapping and condensation matrices. The kernels here are the handful of
//! products the coupling needs; they go through the triplet builder so
//! duplicate entries are summed and column indices come out sorted.

use crate::error::{Error, Result};
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Builder for assembling a sparse matrix from triplets (COO format).
///
/// Accumulates (row, col, value) triplets and converts to CSR when complete.
pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    /// Create a new triplet matrix builder.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rows: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Create with estimated capacity.
    pub fn with_capacity(n_rows: usize, n_cols: usize, nnz_estimate: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rows: Vec::with_capacity(nnz_estimate),
            cols: Vec::with_capacity(nnz_estimate),
            values: Vec::with_capacity(nnz_estimate),
        }
    }

    /// Add a value at (row, col). Duplicates are summed during conversion.
    ///
    /// Exact zeros are skipped; small but non-zero responses of stiff
    /// domains are kept.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "Row index out of bounds");
        debug_assert!(col < self.n_cols, "Column index out of bounds");

        if value != 0.0 {
            self.rows.push(row);
            self.cols.push(col);
            self.values.push(value);
        }
    }

    /// Number of stored triplets.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Convert to CSR format, summing duplicate entries.
    pub fn to_csr(self) -> Result<CsrMatrix> {
        use nalgebra_sparse::coo::CooMatrix;

        let (n_rows, n_cols) = (self.n_rows, self.n_cols);
        let coo = CooMatrix::try_from_triplets(n_rows, n_cols, self.rows, self.cols, self.values)
            .map_err(|e| {
                Error::Precondition(format!(
                    "invalid triplet data for {}x{} matrix: {}",
                    n_rows, n_cols, e
                ))
            })?;

        Ok(CsrMatrix::from(&coo))
    }
}

/// Sparse matrix - dense vector product `A x`.
pub fn spmv(matrix: &CsrMatrix, x: &[f64]) -> Result<Vec<f64>> {
    if matrix.ncols() != x.len() {
        return Err(Error::Precondition(format!(
            "matrix-vector size mismatch: {} columns, vector of length {}",
            matrix.ncols(),
            x.len()
        )));
    }

    Ok(matrix
        .row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &v)| v * x[j])
                .sum()
        })
        .collect())
}

/// Sparse - sparse product `A B`.
pub fn spmm(a: &CsrMatrix, b: &CsrMatrix) -> Result<CsrMatrix> {
    if a.ncols() != b.nrows() {
        return Err(Error::Precondition(format!(
            "matrix product size mismatch: ({}x{}) * ({}x{})",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )));
    }

    let mut triplet = TripletMatrix::with_capacity(a.nrows(), b.ncols(), a.nnz().max(b.nnz()));
    for (i, row) in a.row_iter().enumerate() {
        for (&k, &a_ik) in row.col_indices().iter().zip(row.values()) {
            let b_row = b.row(k);
            for (&j, &b_kj) in b_row.col_indices().iter().zip(b_row.values()) {
                triplet.add(i, j, a_ik * b_kj);
            }
        }
    }
    triplet.to_csr()
}

/// Element-wise sum `A + B`.
pub fn add(a: &CsrMatrix, b: &CsrMatrix) -> Result<CsrMatrix> {
    if a.nrows() != b.nrows() || a.ncols() != b.ncols() {
        return Err(Error::Precondition(format!(
            "matrix sum size mismatch: ({}x{}) + ({}x{})",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )));
    }

    let mut triplet = TripletMatrix::with_capacity(a.nrows(), a.ncols(), a.nnz() + b.nnz());
    for (i, j, &v) in a.triplet_iter().chain(b.triplet_iter()) {
        triplet.add(i, j, v);
    }
    triplet.to_csr()
}

/// Scale all stored entries in place.
pub fn scale(matrix: &mut CsrMatrix, factor: f64) {
    for v in matrix.values_mut() {
        *v *= factor;
    }
}

/// Dense copy of row `i`.
pub fn dense_row(matrix: &CsrMatrix, i: usize) -> Vec<f64> {
    let mut out = vec![0.0; matrix.ncols()];
    let row = matrix.row(i);
    for (&j, &v) in row.col_indices().iter().zip(row.values()) {
        out[j] = v;
    }
    out
}

/// Expand a node-to-node operator to act on `dim` interleaved components.
///
/// Entry `(i, j)` of the scalar operator lands at `(dim*i + d, dim*j + d)`
/// for every component `d`, i.e. one block-diagonal copy per dimension.
pub fn expand_dofs(matrix: &CsrMatrix, dim: usize) -> Result<CsrMatrix> {
    let mut triplet =
        TripletMatrix::with_capacity(matrix.nrows() * dim, matrix.ncols() * dim, matrix.nnz() * dim);
    for d in 0..dim {
        for (i, j, &v) in matrix.triplet_iter() {
            triplet.add(dim * i + d, dim * j + d, v);
        }
    }
    triplet.to_csr()
}

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
