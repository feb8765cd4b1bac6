use faer::sparse::{Pair, SparseColMat, SymbolicSparseColMat};

use crate::error::{SolverError, SolverResult};

/// Per-block reservation budget: number of (row, col) slots a block will
/// ever touch in `F`, `E`, and each of the two `D = ∂C/∂y, ∂C/∂ẏ` matrices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TripletBudget {
    pub f: usize,
    pub e: usize,
    pub d: usize,
}

impl std::ops::AddAssign for TripletBudget {
    fn add_assign(&mut self, rhs: Self) {
        self.f += rhs.f;
        self.e += rhs.e;
        self.d += rhs.d;
    }
}

/// A column-compressed matrix whose sparsity pattern is fixed once (during
/// `reserve`'s dry run) and thereafter only has its values overwritten.
/// Mirrors Eigen's reserve-then-`coeffRef` assembly pattern.
#[derive(Debug, Default)]
pub struct SparseMat {
    n: usize,
    recording: Option<Vec<(usize, usize)>>,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMat {
    fn recording(n: usize) -> Self {
        Self {
            n,
            recording: Some(Vec::new()),
            col_ptr: Vec::new(),
            row_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Writes (overwrites) a value at `(row, col)`. During the recording
    /// phase, only the position is remembered; once the pattern is fixed,
    /// the slot is located by binary search within the column.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if let Some(rec) = &mut self.recording {
            rec.push((row, col));
            return;
        }
        let slot = self.slot_of(row, col);
        self.values[slot] = value;
    }

    /// Accumulates into an existing slot.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        if let Some(rec) = &mut self.recording {
            rec.push((row, col));
            return;
        }
        let slot = self.slot_of(row, col);
        self.values[slot] += value;
    }

    fn slot_of(&self, row: usize, col: usize) -> usize {
        let start = self.col_ptr[col];
        let end = self.col_ptr[col + 1];
        let local = self.row_idx[start..end]
            .binary_search(&row)
            .unwrap_or_else(|_| {
                panic!("sparse write to unreserved slot ({row}, {col}): reservation pass missed this position")
            });
        start + local
    }

    fn finalize_pattern(&mut self) {
        let mut positions = self.recording.take().expect("pattern already finalized");
        positions.sort_unstable_by_key(|&(r, c)| (c, r));
        positions.dedup();

        let mut col_ptr = vec![0usize; self.n + 1];
        for &(_, c) in &positions {
            col_ptr[c + 1] += 1;
        }
        for c in 0..self.n {
            col_ptr[c + 1] += col_ptr[c];
        }
        let row_idx: Vec<usize> = positions.iter().map(|&(r, _)| r).collect();
        let values = vec![0.0; row_idx.len()];

        self.col_ptr = col_ptr;
        self.row_idx = row_idx;
        self.values = values;
    }

    pub fn zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn col_ptr(&self) -> &[usize] {
        &self.col_ptr
    }

    pub fn row_idx(&self) -> &[usize] {
        &self.row_idx
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// All distinct `(row, col)` positions, in column-major order.
    fn positions(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.nnz());
        for col in 0..self.n {
            for &row in &self.row_idx[self.col_ptr[col]..self.col_ptr[col + 1]] {
                out.push((row, col));
            }
        }
        out
    }
}

/// Maps every nonzero slot of a source matrix to its slot in the unioned
/// Jacobian pattern, so `update_jacobian` is a flat accumulate with no
/// per-call binary search.
#[derive(Debug, Default)]
struct SlotMap(Vec<usize>);

fn build_slot_map(source: &SparseMat, union: &SparseMat) -> SlotMap {
    let mut map = Vec::with_capacity(source.nnz());
    for col in 0..source.n {
        for &row in &source.row_idx[source.col_ptr[col]..source.col_ptr[col + 1]] {
            map.push(union.slot_of(row, col));
        }
    }
    SlotMap(map)
}

/// Owns `F`, `E`, `∂C/∂y`, `∂C/∂ẏ`, `C`, the assembled Jacobian, the
/// residual, and `dydot`. Performs symbolic-then-numeric sparse LU.
pub struct SparseSystem {
    n: usize,
    pub f: SparseMat,
    pub e: SparseMat,
    pub dc_dy: SparseMat,
    pub dc_dydot: SparseMat,
    pub c: Vec<f64>,
    pub residual: Vec<f64>,
    pub dydot: Vec<f64>,
    jacobian: SparseMat,
    map_e: SlotMap,
    map_dcdydot: SlotMap,
    map_f: SlotMap,
    map_dcdy: SlotMap,
    symbolic: Option<SymbolicSparseColMat<usize>>,
    reserved: bool,
}

impl SparseSystem {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            f: SparseMat::recording(n),
            e: SparseMat::recording(n),
            dc_dy: SparseMat::recording(n),
            dc_dydot: SparseMat::recording(n),
            c: vec![0.0; n],
            residual: vec![0.0; n],
            dydot: vec![0.0; n],
            jacobian: SparseMat::default(),
            map_e: SlotMap::default(),
            map_dcdydot: SlotMap::default(),
            map_f: SlotMap::default(),
            map_dcdy: SlotMap::default(),
            symbolic: None,
            reserved: false,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Fixes the sparsity pattern of `F`, `E`, `∂C/∂y`, `∂C/∂ẏ`, forms the
    /// unioned Jacobian pattern, and performs one symbolic LU analysis
    /// that is reused for every subsequent numeric refactorization.
    ///
    /// Call exactly once, after every block's dry-run writes (dummy
    /// `update_constant` + `update_time(0)` + `update_solution(1, 1)`)
    /// have been recorded.
    pub fn reserve(&mut self) -> SolverResult<()> {
        self.f.finalize_pattern();
        self.e.finalize_pattern();
        self.dc_dy.finalize_pattern();
        self.dc_dydot.finalize_pattern();

        let mut union_positions: Vec<(usize, usize)> = Vec::new();
        union_positions.extend(self.f.positions());
        union_positions.extend(self.e.positions());
        union_positions.extend(self.dc_dy.positions());
        union_positions.extend(self.dc_dydot.positions());
        union_positions.sort_unstable_by_key(|&(r, c)| (c, r));
        union_positions.dedup();

        let mut jacobian = SparseMat::recording(self.n);
        jacobian.recording = Some(union_positions);
        jacobian.finalize_pattern();

        self.map_e = build_slot_map(&self.e, &jacobian);
        self.map_dcdydot = build_slot_map(&self.dc_dydot, &jacobian);
        self.map_f = build_slot_map(&self.f, &jacobian);
        self.map_dcdy = build_slot_map(&self.dc_dy, &jacobian);

        let pairs: Vec<Pair<usize, usize>> = jacobian
            .positions()
            .into_iter()
            .map(|(row, col)| Pair::new(row, col))
            .collect();
        let (symbolic, _argsort) = SymbolicSparseColMat::try_new_from_indices(self.n, self.n, &pairs)
            .map_err(|_| SolverError::ConfigInvalid("failed to build Jacobian sparsity pattern".into()))?;

        self.jacobian = jacobian;
        self.symbolic = Some(symbolic);
        self.reserved = true;
        Ok(())
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// `residual <- -C - E.ydot - F.y`
    pub fn update_residual(&mut self, y: &[f64], ydot: &[f64]) {
        self.residual.copy_from_slice(&self.c);
        for r in self.residual.iter_mut() {
            *r = -*r;
        }
        for col in 0..self.n {
            for idx in self.e.col_ptr[col]..self.e.col_ptr[col + 1] {
                let row = self.e.row_idx[idx];
                self.residual[row] -= self.e.values[idx] * ydot[col];
            }
            for idx in self.f.col_ptr[col]..self.f.col_ptr[col + 1] {
                let row = self.f.row_idx[idx];
                self.residual[row] -= self.f.values[idx] * y[col];
            }
        }
    }

    /// `jacobian <- (E + dC/dydot)*c_ydot + (F + dC/dy)*c_y`
    pub fn update_jacobian(&mut self, c_ydot: f64, c_y: f64) {
        self.jacobian.zero();
        for (slot, &target) in self.map_e.0.iter().enumerate() {
            self.jacobian.values[target] += self.e.values[slot] * c_ydot;
        }
        for (slot, &target) in self.map_dcdydot.0.iter().enumerate() {
            self.jacobian.values[target] += self.dc_dydot.values[slot] * c_ydot;
        }
        for (slot, &target) in self.map_f.0.iter().enumerate() {
            self.jacobian.values[target] += self.f.values[slot] * c_y;
        }
        for (slot, &target) in self.map_dcdy.0.iter().enumerate() {
            self.jacobian.values[target] += self.dc_dy.values[slot] * c_y;
        }
    }

    /// Numeric LU factorization of the current Jacobian (reusing the
    /// symbolic factor from `reserve`), then `dydot <- jacobian^-1 * residual`.
    pub fn solve(&mut self) -> SolverResult<()> {
        let symbolic = self
            .symbolic
            .as_ref()
            .expect("reserve() must be called before solve()");

        let mat = SparseColMat::new(symbolic.clone(), self.jacobian.values.clone());

        let lu = faer::sparse::linalg::solvers::Lu::try_new_with_symbolic(
            symbolic.clone(),
            mat.as_ref(),
        )
        .map_err(|_| SolverError::NumericSingular)?;

        let mut rhs = faer::Mat::from_fn(self.n, 1, |i, _| self.residual[i]);
        lu.solve_in_place(rhs.as_mut());
        for i in 0..self.n {
            self.dydot[i] = rhs[(i, 0)];
        }
        Ok(())
    }
}
