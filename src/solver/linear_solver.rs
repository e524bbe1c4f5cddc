use crate::error::{ChanError, Result};
use crate::solver::fields::{dot, norm};
use serde::Deserialize;
use wide::f64x4;

/// Convergence controls for one linear solve. The solve stops as soon as the
/// residual norm drops below `tolerance` or below `rel_tol` times the initial
/// residual; exhausting `max_iter` without reaching either is an error.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SolveControls {
    pub tolerance: f64,
    #[serde(default)]
    pub rel_tol: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
}

fn default_max_iter() -> usize {
    1000
}

#[derive(Clone, Copy, Debug)]
pub struct SolveStats {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
}

impl SolveControls {
    #[inline]
    fn converged(&self, resid: f64, init_resid: f64) -> bool {
        resid < self.tolerance || resid < self.rel_tol * init_resid
    }
}

#[derive(Clone, Debug)]
pub struct SparseMatrix {
    pub values: Vec<f64>,
    pub col_indices: Vec<usize>,
    pub row_offsets: Vec<usize>,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl SparseMatrix {
    /// Build CSR from (row, col, value) triplets. Repeated (row, col) entries
    /// are summed, so assembly loops may push coefficient increments freely.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut row_counts = vec![0usize; n_rows];
        for &(r, _, _) in triplets {
            row_counts[r] += 1;
        }
        let mut starts = vec![0usize; n_rows + 1];
        for i in 0..n_rows {
            starts[i + 1] = starts[i] + row_counts[i];
        }

        let mut cols = vec![0usize; triplets.len()];
        let mut vals = vec![0.0; triplets.len()];
        let mut cursor = starts.clone();
        for &(r, c, v) in triplets {
            cols[cursor[r]] = c;
            vals[cursor[r]] = v;
            cursor[r] += 1;
        }

        let mut values = Vec::with_capacity(triplets.len());
        let mut col_indices = Vec::with_capacity(triplets.len());
        let mut row_offsets = vec![0usize; n_rows + 1];
        let mut scratch: Vec<(usize, f64)> = Vec::new();
        for r in 0..n_rows {
            scratch.clear();
            scratch.extend(
                cols[starts[r]..starts[r + 1]]
                    .iter()
                    .copied()
                    .zip(vals[starts[r]..starts[r + 1]].iter().copied()),
            );
            scratch.sort_unstable_by_key(|&(c, _)| c);
            let mut k = 0;
            while k < scratch.len() {
                let (c, mut v) = scratch[k];
                k += 1;
                while k < scratch.len() && scratch[k].0 == c {
                    v += scratch[k].1;
                    k += 1;
                }
                col_indices.push(c);
                values.push(v);
            }
            row_offsets[r + 1] = values.len();
        }

        Self {
            values,
            col_indices,
            row_offsets,
            n_rows,
            n_cols,
        }
    }

    pub fn mat_vec_mul(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.n_cols);
        assert_eq!(y.len(), self.n_rows);
        for i in 0..self.n_rows {
            let mut sum = 0.0;
            for j in self.row_offsets[i]..self.row_offsets[i + 1] {
                sum += self.values[j] * x[self.col_indices[j]];
            }
            y[i] = sum;
        }
    }

    pub fn diag(&self) -> Vec<f64> {
        let mut d = vec![0.0; self.n_rows];
        for i in 0..self.n_rows {
            for j in self.row_offsets[i]..self.row_offsets[i + 1] {
                if self.col_indices[j] == i {
                    d[i] = self.values[j];
                    break;
                }
            }
        }
        d
    }

    /// Mutable access to the diagonal entry of `row`, if stored.
    pub fn diag_entry_mut(&mut self, row: usize) -> Option<&mut f64> {
        for j in self.row_offsets[row]..self.row_offsets[row + 1] {
            if self.col_indices[j] == row {
                return Some(&mut self.values[j]);
            }
        }
        None
    }
}

/// r = b - A x
fn residual(a: &SparseMatrix, b: &[f64], x: &[f64], r: &mut [f64]) {
    a.mat_vec_mul(x, r);
    let n = b.len();
    let mut i = 0;
    while i + 4 <= n {
        let vb = f64x4::from(&b[i..i + 4]);
        let vr = f64x4::from(&r[i..i + 4]);
        let res = vb - vr;
        let arr: [f64; 4] = res.into();
        r[i..i + 4].copy_from_slice(&arr);
        i += 4;
    }
    while i < n {
        r[i] = b[i] - r[i];
        i += 1;
    }
}

/// BiCGStab for the non-symmetric momentum systems.
pub fn solve_bicgstab(
    a: &SparseMatrix,
    b: &[f64],
    x: &mut [f64],
    ctl: &SolveControls,
    field: &'static str,
) -> Result<SolveStats> {
    let n = b.len();
    let mut r = vec![0.0; n];
    residual(a, b, x, &mut r);

    let init_resid = norm(&r);
    if init_resid < ctl.tolerance {
        return Ok(SolveStats {
            iterations: 0,
            initial_residual: init_resid,
            final_residual: init_resid,
        });
    }

    let r0 = r.clone();
    let mut rho_old = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut v = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut resid = init_resid;

    for iter in 0..ctl.max_iter {
        let rho_new = dot(&r0, &r);
        if rho_new.is_nan() {
            return Err(ChanError::SolveBreakdown {
                field,
                reason: "rho is NaN",
            });
        }
        if rho_new.abs() < 1e-30 {
            return Err(ChanError::SolveBreakdown {
                field,
                reason: "rho breakdown",
            });
        }

        if iter == 0 {
            p.copy_from_slice(&r);
        } else {
            let beta = (rho_new / rho_old) * (alpha / omega);
            let v_beta = f64x4::splat(beta);
            let v_omega = f64x4::splat(omega);
            let mut i = 0;
            while i + 4 <= n {
                let vr = f64x4::from(&r[i..i + 4]);
                let vp = f64x4::from(&p[i..i + 4]);
                let vv = f64x4::from(&v[i..i + 4]);
                let res = vr + v_beta * (vp - v_omega * vv);
                let arr: [f64; 4] = res.into();
                p[i..i + 4].copy_from_slice(&arr);
                i += 4;
            }
            while i < n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
                i += 1;
            }
        }

        a.mat_vec_mul(&p, &mut v);
        let r0_v = dot(&r0, &v);
        if r0_v.abs() < 1e-30 {
            return Err(ChanError::SolveBreakdown {
                field,
                reason: "r0.v breakdown",
            });
        }
        alpha = rho_new / r0_v;

        let v_alpha = f64x4::splat(alpha);
        let mut i = 0;
        while i + 4 <= n {
            let vr = f64x4::from(&r[i..i + 4]);
            let vv = f64x4::from(&v[i..i + 4]);
            let res = vr - v_alpha * vv;
            let arr: [f64; 4] = res.into();
            s[i..i + 4].copy_from_slice(&arr);
            i += 4;
        }
        while i < n {
            s[i] = r[i] - alpha * v[i];
            i += 1;
        }

        let s_norm = norm(&s);
        if ctl.converged(s_norm, init_resid) {
            let mut i = 0;
            while i + 4 <= n {
                let vx = f64x4::from(&x[i..i + 4]);
                let vp = f64x4::from(&p[i..i + 4]);
                let res = vx + v_alpha * vp;
                let arr: [f64; 4] = res.into();
                x[i..i + 4].copy_from_slice(&arr);
                i += 4;
            }
            while i < n {
                x[i] += alpha * p[i];
                i += 1;
            }
            return Ok(SolveStats {
                iterations: iter + 1,
                initial_residual: init_resid,
                final_residual: s_norm,
            });
        }

        a.mat_vec_mul(&s, &mut t);
        let t_t = dot(&t, &t);
        omega = if t_t.abs() < 1e-30 {
            0.0
        } else {
            dot(&t, &s) / t_t
        };

        let v_omega = f64x4::splat(omega);
        let mut i = 0;
        while i + 4 <= n {
            let vx = f64x4::from(&x[i..i + 4]);
            let vp = f64x4::from(&p[i..i + 4]);
            let vs = f64x4::from(&s[i..i + 4]);
            let vt = f64x4::from(&t[i..i + 4]);
            let res_x = vx + v_alpha * vp + v_omega * vs;
            let res_r = vs - v_omega * vt;
            let arr_x: [f64; 4] = res_x.into();
            let arr_r: [f64; 4] = res_r.into();
            x[i..i + 4].copy_from_slice(&arr_x);
            r[i..i + 4].copy_from_slice(&arr_r);
            i += 4;
        }
        while i < n {
            x[i] += alpha * p[i] + omega * s[i];
            r[i] = s[i] - omega * t[i];
            i += 1;
        }

        resid = norm(&r);
        if resid.is_nan() || resid > 1e10 * init_resid.max(1.0) {
            return Err(ChanError::SolveDiverged {
                field,
                iterations: iter + 1,
                residual: resid,
            });
        }
        if ctl.converged(resid, init_resid) {
            return Ok(SolveStats {
                iterations: iter + 1,
                initial_residual: init_resid,
                final_residual: resid,
            });
        }
        if omega.abs() < 1e-30 {
            return Err(ChanError::SolveBreakdown {
                field,
                reason: "omega breakdown",
            });
        }
        rho_old = rho_new;
    }

    Err(ChanError::SolveDiverged {
        field,
        iterations: ctl.max_iter,
        residual: resid,
    })
}

/// Conjugate gradients for the symmetric positive-definite pressure systems.
pub fn solve_cg(
    a: &SparseMatrix,
    b: &[f64],
    x: &mut [f64],
    ctl: &SolveControls,
    field: &'static str,
) -> Result<SolveStats> {
    let n = b.len();
    let mut r = vec![0.0; n];
    residual(a, b, x, &mut r);

    let init_resid = norm(&r);
    if init_resid < ctl.tolerance {
        return Ok(SolveStats {
            iterations: 0,
            initial_residual: init_resid,
            final_residual: init_resid,
        });
    }

    let mut p = r.clone();
    let mut rsold = dot(&r, &r);
    let mut q = vec![0.0; n];

    for iter in 0..ctl.max_iter {
        a.mat_vec_mul(&p, &mut q);
        let p_q = dot(&p, &q);
        if p_q.is_nan() || p_q.abs() < 1e-300 {
            return Err(ChanError::SolveBreakdown {
                field,
                reason: "p.Ap breakdown",
            });
        }
        let alpha = rsold / p_q;

        let v_alpha = f64x4::splat(alpha);
        let mut i = 0;
        while i + 4 <= n {
            let vx = f64x4::from(&x[i..i + 4]);
            let vp = f64x4::from(&p[i..i + 4]);
            let vr = f64x4::from(&r[i..i + 4]);
            let vq = f64x4::from(&q[i..i + 4]);
            let res_x = vx + v_alpha * vp;
            let res_r = vr - v_alpha * vq;
            let arr_x: [f64; 4] = res_x.into();
            let arr_r: [f64; 4] = res_r.into();
            x[i..i + 4].copy_from_slice(&arr_x);
            r[i..i + 4].copy_from_slice(&arr_r);
            i += 4;
        }
        while i < n {
            x[i] += alpha * p[i];
            r[i] -= alpha * q[i];
            i += 1;
        }

        let rsnew = dot(&r, &r);
        let resid = rsnew.sqrt();
        if resid.is_nan() {
            return Err(ChanError::SolveBreakdown {
                field,
                reason: "residual is NaN",
            });
        }
        if ctl.converged(resid, init_resid) {
            return Ok(SolveStats {
                iterations: iter + 1,
                initial_residual: init_resid,
                final_residual: resid,
            });
        }

        let beta = rsnew / rsold;
        let v_beta = f64x4::splat(beta);
        let mut i = 0;
        while i + 4 <= n {
            let vr = f64x4::from(&r[i..i + 4]);
            let vp = f64x4::from(&p[i..i + 4]);
            let res = vr + v_beta * vp;
            let arr: [f64; 4] = res.into();
            p[i..i + 4].copy_from_slice(&arr);
            i += 4;
        }
        while i < n {
            p[i] = r[i] + beta * p[i];
            i += 1;
        }
        rsold = rsnew;
    }

    Err(ChanError::SolveDiverged {
        field,
        iterations: ctl.max_iter,
        residual: rsold.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controls(tol: f64) -> SolveControls {
        SolveControls {
            tolerance: tol,
            rel_tol: 0.0,
            max_iter: 500,
        }
    }

    #[test]
    fn from_triplets_merges_duplicates() {
        let m = SparseMatrix::from_triplets(
            2,
            2,
            &[(0, 0, 1.0), (0, 0, 2.0), (0, 1, -1.0), (1, 1, 4.0)],
        );
        assert_eq!(m.diag(), vec![3.0, 4.0]);
        let mut y = vec![0.0; 2];
        m.mat_vec_mul(&[1.0, 1.0], &mut y);
        assert_eq!(y, vec![2.0, 4.0]);
    }

    #[test]
    fn cg_solves_spd_laplacian() {
        // 1-D Dirichlet Laplacian, 5 unknowns
        let n = 5;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        let a = SparseMatrix::from_triplets(n, n, &triplets);
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let stats = solve_cg(&a, &b, &mut x, &controls(1e-10), "p").unwrap();
        assert!(stats.final_residual < 1e-10);
        let mut ax = vec![0.0; n];
        a.mat_vec_mul(&x, &mut ax);
        for i in 0..n {
            assert!((ax[i] - b[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn bicgstab_solves_nonsymmetric() {
        // Convection-diffusion-like rows with upwind bias
        let n = 6;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 3.0));
            if i > 0 {
                triplets.push((i, i - 1, -2.0));
            }
            if i + 1 < n {
                triplets.push((i, i + 1, -0.5));
            }
        }
        let a = SparseMatrix::from_triplets(n, n, &triplets);
        let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let mut x = vec![0.0; n];
        let stats = solve_bicgstab(&a, &b, &mut x, &controls(1e-10), "U").unwrap();
        let mut ax = vec![0.0; n];
        a.mat_vec_mul(&x, &mut ax);
        for i in 0..n {
            assert!((ax[i] - b[i]).abs() < 1e-7, "row {}: {} vs {}", i, ax[i], b[i]);
        }
        assert!(stats.iterations > 0);
    }

    #[test]
    fn max_iter_exhaustion_is_an_error() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)]);
        // Singular system with incompatible RHS cannot converge.
        let b = vec![1.0, 2.0];
        let mut x = vec![0.0; 2];
        let ctl = SolveControls {
            tolerance: 1e-14,
            rel_tol: 0.0,
            max_iter: 20,
        };
        assert!(solve_bicgstab(&a, &b, &mut x, &ctl, "U").is_err());
    }
}
