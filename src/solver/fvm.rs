use crate::error::{ChanError, Result};
use crate::solver::fields::{ScalarField, VectorField};
use crate::solver::les::StressContribution;
use crate::solver::linear_solver::SparseMatrix;
use crate::solver::mesh::{Boundary, Mesh};
use nalgebra::Vector2;
use wide::f64x4;

/// Cell-centered velocity-gradient tensor, Green-Gauss.
/// Convention: `xy = d(u_x)/dy`, `yx = d(u_y)/dx`.
pub struct TensorField {
    pub xx: Vec<f64>,
    pub xy: Vec<f64>,
    pub yx: Vec<f64>,
    pub yy: Vec<f64>,
}

/// Discretized momentum operator `ddt(U) + div(phi, U) + divDevBeff(U)`.
///
/// Both components share one coefficient matrix: the channel walls impose the
/// same fixed-value condition on u_x and u_y, so only the right-hand sides
/// differ (old-time values, body force, explicit stress).
pub struct MomentumSystem {
    pub matrix: SparseMatrix,
    pub rhs_x: Vec<f64>,
    pub rhs_y: Vec<f64>,
}

impl MomentumSystem {
    /// Diagonal coefficient per unit volume, `A` in the segregated-solver
    /// sense: `1/A` is the pressure-gradient sensitivity of the cell.
    pub fn a_field(&self, mesh: &Mesh) -> ScalarField {
        let diag = self.matrix.diag();
        let values = diag
            .iter()
            .zip(&mesh.cell_vol)
            .map(|(d, v)| d / v)
            .collect();
        ScalarField::from_values(values)
    }

    /// Off-diagonal and source contribution per unit volume, `H` in the
    /// segregated-solver sense: at a solution of the system, `u == H/A`
    /// up to the dropped pressure term.
    pub fn h_field(&self, mesh: &Mesh, u: &VectorField) -> VectorField {
        let n = mesh.num_cells();
        let diag = self.matrix.diag();
        let mut ax = vec![0.0; n];
        let mut ay = vec![0.0; n];
        self.matrix.mat_vec_mul(&u.vx, &mut ax);
        self.matrix.mat_vec_mul(&u.vy, &mut ay);
        let mut h = VectorField::new(n, Vector2::zeros());
        for i in 0..n {
            let v = mesh.cell_vol[i];
            h.vx[i] = (self.rhs_x[i] - (ax[i] - diag[i] * u.vx[i])) / v;
            h.vy[i] = (self.rhs_y[i] - (ay[i] - diag[i] * u.vy[i])) / v;
        }
        h
    }
}

/// Pressure-correction equation `laplacian(rAU, p) == div(phi)`, assembled in
/// negated form so the matrix is symmetric positive definite for CG.
pub struct PressureSystem {
    pub matrix: SparseMatrix,
    pub rhs: Vec<f64>,
    face_coeff: Vec<f64>,
}

impl PressureSystem {
    /// Pin the floating pressure level: all boundaries are zero-gradient, so
    /// the system is singular up to a constant until one cell is referenced.
    /// The existing diagonal is added to itself and the matching source
    /// contribution added, which keeps the matrix SPD.
    pub fn set_reference(&mut self, cell: usize, value: f64) {
        if let Some(d) = self.matrix.diag_entry_mut(cell) {
            let diag = *d;
            *d = 2.0 * diag;
            self.rhs[cell] += diag * value;
        }
    }

    /// Face flux of the solved equation, positive owner -> neighbor.
    /// Subtracting this from `phi` makes the flux field consistent with the
    /// new pressure, up to the linear-solver residual.
    pub fn flux(&self, p: &ScalarField, mesh: &Mesh) -> Vec<f64> {
        let mut out = vec![0.0; mesh.num_faces()];
        for f in 0..mesh.num_faces() {
            if let Some(n) = mesh.face_neighbor[f] {
                let o = mesh.face_owner[f];
                out[f] = self.face_coeff[f] * (p.values[n] - p.values[o]);
            }
        }
        out
    }
}

pub struct ContinuityReport {
    pub sum_local: f64,
    pub global: f64,
    pub cumulative: f64,
}

pub struct Fvm;

impl Fvm {
    /// Green-Gauss gradient with zero-gradient boundary extrapolation
    /// (the pressure boundary configuration).
    pub fn gradient(mesh: &Mesh, field: &ScalarField) -> VectorField {
        let n_cells = mesh.num_cells();
        let mut gx = vec![0.0; n_cells];
        let mut gy = vec![0.0; n_cells];

        for f in 0..mesh.num_faces() {
            let o = mesh.face_owner[f];
            let val = match mesh.face_neighbor[f] {
                Some(n) => {
                    let w = mesh.face_w[f];
                    field.values[o] + w * (field.values[n] - field.values[o])
                }
                None => field.values[o],
            };
            let s = val * mesh.face_area[f];
            gx[o] += s * mesh.face_nx[f];
            gy[o] += s * mesh.face_ny[f];
            if let Some(n) = mesh.face_neighbor[f] {
                gx[n] -= s * mesh.face_nx[f];
                gy[n] -= s * mesh.face_ny[f];
            }
        }

        let mut i = 0;
        while i + 4 <= n_cells {
            let v_vol = f64x4::from(&mesh.cell_vol[i..i + 4]);
            let v_gx = f64x4::from(&gx[i..i + 4]);
            let v_gy = f64x4::from(&gy[i..i + 4]);
            let rx: [f64; 4] = (v_gx / v_vol).into();
            let ry: [f64; 4] = (v_gy / v_vol).into();
            gx[i..i + 4].copy_from_slice(&rx);
            gy[i..i + 4].copy_from_slice(&ry);
            i += 4;
        }
        while i < n_cells {
            gx[i] /= mesh.cell_vol[i];
            gy[i] /= mesh.cell_vol[i];
            i += 1;
        }

        VectorField { vx: gx, vy: gy }
    }

    /// Green-Gauss gradient of the velocity field; boundary faces take the
    /// boundary values, so the wall shear layer is resolved.
    pub fn vector_gradient(mesh: &Mesh, u: &VectorField, u_b: &[Vector2<f64>]) -> TensorField {
        let n_cells = mesh.num_cells();
        let mut g = TensorField {
            xx: vec![0.0; n_cells],
            xy: vec![0.0; n_cells],
            yx: vec![0.0; n_cells],
            yy: vec![0.0; n_cells],
        };

        for f in 0..mesh.num_faces() {
            let o = mesh.face_owner[f];
            let uf = match mesh.face_neighbor[f] {
                Some(n) => {
                    let w = mesh.face_w[f];
                    u.get(o) + (u.get(n) - u.get(o)) * w
                }
                None => u_b[mesh.face_bindex[f].expect("boundary face")],
            };
            let sx = mesh.face_nx[f] * mesh.face_area[f];
            let sy = mesh.face_ny[f] * mesh.face_area[f];
            g.xx[o] += uf.x * sx;
            g.xy[o] += uf.x * sy;
            g.yx[o] += uf.y * sx;
            g.yy[o] += uf.y * sy;
            if let Some(n) = mesh.face_neighbor[f] {
                g.xx[n] -= uf.x * sx;
                g.xy[n] -= uf.x * sy;
                g.yx[n] -= uf.y * sx;
                g.yy[n] -= uf.y * sy;
            }
        }

        for i in 0..n_cells {
            let v = mesh.cell_vol[i];
            g.xx[i] /= v;
            g.xy[i] /= v;
            g.yx[i] /= v;
            g.yy[i] /= v;
        }
        g
    }

    /// Volumetric face flux from linear interpolation: `interpolate(U) . Sf`.
    pub fn interpolate_flux(mesh: &Mesh, u: &VectorField, u_b: &[Vector2<f64>]) -> Vec<f64> {
        let mut phi = vec![0.0; mesh.num_faces()];
        for f in 0..mesh.num_faces() {
            let o = mesh.face_owner[f];
            let uf = match mesh.face_neighbor[f] {
                Some(n) => {
                    let w = mesh.face_w[f];
                    u.get(o) + (u.get(n) - u.get(o)) * w
                }
                None => u_b[mesh.face_bindex[f].expect("boundary face")],
            };
            phi[f] = (uf.x * mesh.face_nx[f] + uf.y * mesh.face_ny[f]) * mesh.face_area[f];
        }
        phi
    }

    /// Transient flux correction for the collocated reconstruction: restores
    /// the part of the old-time face flux that linear interpolation of the
    /// cell velocities cannot see, which is what suppresses odd-even pressure
    /// decoupling on this grid arrangement.
    pub fn ddt_phi_corr(
        mesh: &Mesh,
        r_au: &ScalarField,
        u_old: &VectorField,
        phi_old: &[f64],
        dt: f64,
    ) -> Vec<f64> {
        let mut corr = vec![0.0; mesh.num_faces()];
        for f in 0..mesh.num_faces() {
            let n = match mesh.face_neighbor[f] {
                Some(n) => n,
                None => continue,
            };
            let o = mesh.face_owner[f];
            let w = mesh.face_w[f];
            let r_au_f = r_au.values[o] + w * (r_au.values[n] - r_au.values[o]);
            let uf = u_old.get(o) + (u_old.get(n) - u_old.get(o)) * w;
            let phi_u_old = (uf.x * mesh.face_nx[f] + uf.y * mesh.face_ny[f]) * mesh.face_area[f];
            corr[f] = r_au_f * (phi_old[f] - phi_u_old) / dt;
        }
        corr
    }

    /// Global flux balance ahead of the elliptic pressure solve. The channel
    /// has no adjustable outflow (walls and periodic pairs only), so a net
    /// boundary imbalance cannot be removed and is reported as a continuity
    /// failure instead.
    pub fn adjust_phi(mesh: &Mesh, phi: &[f64]) -> Result<()> {
        let mut mass_in = 0.0;
        let mut mass_out = 0.0;
        for &f in &mesh.boundary_faces {
            let q = phi[f];
            if q > 0.0 {
                mass_out += q;
            } else {
                mass_in -= q;
            }
        }
        let net = mass_out - mass_in;
        let scale = mass_in.max(mass_out).max(1e-12);
        if net.abs() > 1e-10 * scale && net.abs() > 1e-14 {
            return Err(ChanError::continuity(format!(
                "net boundary flux {:.3e} cannot be removed by adjusting the outflow",
                net
            )));
        }
        Ok(())
    }

    /// Signed face-flux sum per cell (the divergence integrated over the
    /// cell volume).
    pub fn divergence(mesh: &Mesh, phi: &[f64]) -> Vec<f64> {
        let mut div = vec![0.0; mesh.num_cells()];
        for f in 0..mesh.num_faces() {
            div[mesh.face_owner[f]] += phi[f];
            if let Some(n) = mesh.face_neighbor[f] {
                div[n] -= phi[f];
            }
        }
        div
    }

    /// Courant number statistics (max, volume-weighted mean) from the face
    /// fluxes and the fixed step size. Reporting only.
    pub fn courant_number(mesh: &Mesh, phi: &[f64], dt: f64) -> (f64, f64) {
        let n_cells = mesh.num_cells();
        let mut sum_phi = vec![0.0; n_cells];
        for f in 0..mesh.num_faces() {
            let a = phi[f].abs();
            sum_phi[mesh.face_owner[f]] += a;
            if let Some(n) = mesh.face_neighbor[f] {
                sum_phi[n] += a;
            }
        }
        let mut co_max: f64 = 0.0;
        let mut total_phi = 0.0;
        for i in 0..n_cells {
            co_max = co_max.max(sum_phi[i] / mesh.cell_vol[i]);
            total_phi += sum_phi[i];
        }
        let co_max = 0.5 * co_max * dt;
        let co_mean = 0.5 * total_phi / mesh.total_volume() * dt;
        (co_max, co_mean)
    }

    /// Time-step continuity error report; the cumulative accumulator is
    /// carried across the whole run and never reset.
    pub fn continuity_errors(
        mesh: &Mesh,
        phi: &[f64],
        dt: f64,
        cumulative: &mut f64,
    ) -> ContinuityReport {
        let div = Self::divergence(mesh, phi);
        let total_vol = mesh.total_volume();
        let mut sum_abs = 0.0;
        let mut sum = 0.0;
        for d in &div {
            sum_abs += d.abs();
            sum += d;
        }
        let sum_local = dt * sum_abs / total_vol;
        let global = dt * sum / total_vol;
        *cumulative += global;
        ContinuityReport {
            sum_local,
            global,
            cumulative: *cumulative,
        }
    }

    /// Momentum operator assembly. Convection is implicit upwind against the
    /// given face fluxes, the closure's effective viscosity enters the
    /// implicit Laplacian, and its explicit deviatoric part plus the uniform
    /// body force land on the right-hand sides. The unsteady term is built
    /// against `u_old`.
    pub fn assemble_momentum(
        mesh: &Mesh,
        u_old: &VectorField,
        u_b: &[Vector2<f64>],
        phi: &[f64],
        stress: &StressContribution,
        dt: f64,
        body: Vector2<f64>,
    ) -> MomentumSystem {
        let n_cells = mesh.num_cells();
        let mut triplets = Vec::with_capacity(n_cells + 2 * mesh.num_faces());
        let mut rhs_x = vec![0.0; n_cells];
        let mut rhs_y = vec![0.0; n_cells];

        // Unsteady term and volume sources
        let mut i = 0;
        let v_dt = f64x4::splat(dt);
        let v_bx = f64x4::splat(body.x);
        let v_by = f64x4::splat(body.y);
        while i + 4 <= n_cells {
            let v_vol = f64x4::from(&mesh.cell_vol[i..i + 4]);
            let v_ux = f64x4::from(&u_old.vx[i..i + 4]);
            let v_uy = f64x4::from(&u_old.vy[i..i + 4]);
            let v_sx = f64x4::from(&stress.explicit.vx[i..i + 4]);
            let v_sy = f64x4::from(&stress.explicit.vy[i..i + 4]);
            let coeff = v_vol / v_dt;
            let rx: [f64; 4] = (coeff * v_ux + v_bx * v_vol + v_sx).into();
            let ry: [f64; 4] = (coeff * v_uy + v_by * v_vol + v_sy).into();
            rhs_x[i..i + 4].copy_from_slice(&rx);
            rhs_y[i..i + 4].copy_from_slice(&ry);
            i += 4;
        }
        while i < n_cells {
            let coeff = mesh.cell_vol[i] / dt;
            rhs_x[i] = coeff * u_old.vx[i] + body.x * mesh.cell_vol[i] + stress.explicit.vx[i];
            rhs_y[i] = coeff * u_old.vy[i] + body.y * mesh.cell_vol[i] + stress.explicit.vy[i];
            i += 1;
        }

        for i in 0..n_cells {
            triplets.push((i, i, mesh.cell_vol[i] / dt));

            let start = mesh.cell_face_offsets[i];
            let end = mesh.cell_face_offsets[i + 1];
            for k in start..end {
                let f = mesh.cell_faces[k];
                let is_owner = mesh.face_owner[f] == i;
                let neighbor = if is_owner {
                    mesh.face_neighbor[f]
                } else {
                    Some(mesh.face_owner[f])
                };

                // Convection, flux out of cell i
                let flux = if is_owner { phi[f] } else { -phi[f] };
                if flux > 0.0 {
                    triplets.push((i, i, flux));
                } else if let Some(n) = neighbor {
                    triplets.push((i, n, flux));
                } else {
                    // Boundary inflow at fixed value
                    let b = u_b[mesh.face_bindex[f].expect("boundary face")];
                    rhs_x[i] -= flux * b.x;
                    rhs_y[i] -= flux * b.y;
                }

                // Diffusion with the closure's effective viscosity; the face
                // value is a face property, interpolated owner -> neighbor.
                let fo = mesh.face_owner[f];
                match neighbor {
                    Some(n) => {
                        let fnb = mesh.face_neighbor[f].unwrap_or(i);
                        let w = mesh.face_w[f];
                        let nu_f = stress.nu_eff[fo]
                            + w * (stress.nu_eff[fnb] - stress.nu_eff[fo]);
                        let d = nu_f * mesh.face_area[f] / mesh.face_dist[f];
                        triplets.push((i, i, d));
                        triplets.push((i, n, -d));
                    }
                    None => match mesh.face_boundary[f] {
                        Some(Boundary::Wall) => {
                            let b = u_b[mesh.face_bindex[f].expect("boundary face")];
                            let d = stress.nu_eff[fo] * mesh.face_area[f] / mesh.face_dist[f];
                            triplets.push((i, i, d));
                            rhs_x[i] += d * b.x;
                            rhs_y[i] += d * b.y;
                        }
                        None => unreachable!("boundary face without condition"),
                    },
                }
            }
        }

        MomentumSystem {
            matrix: SparseMatrix::from_triplets(n_cells, n_cells, &triplets),
            rhs_x,
            rhs_y,
        }
    }

    /// Pressure-correction assembly against the current flux field. The
    /// over-relaxed non-orthogonal correction is evaluated from the current
    /// pressure gradient and folded into the source, which is why the
    /// non-orthogonal loop re-assembles each pass.
    pub fn assemble_pressure(
        mesh: &Mesh,
        r_au: &ScalarField,
        phi: &[f64],
        p: &ScalarField,
    ) -> PressureSystem {
        let n_cells = mesh.num_cells();
        let mut triplets = Vec::with_capacity(4 * mesh.num_faces());
        let mut face_coeff = vec![0.0; mesh.num_faces()];
        let mut rhs = Self::divergence(mesh, phi);
        for v in rhs.iter_mut() {
            *v = -*v;
        }

        let grad_p = Self::gradient(mesh, p);

        for f in 0..mesh.num_faces() {
            let n = match mesh.face_neighbor[f] {
                Some(n) => n,
                None => continue, // zero-gradient boundary: no coefficient
            };
            let o = mesh.face_owner[f];
            let w = mesh.face_w[f];
            let r_au_f = r_au.values[o] + w * (r_au.values[n] - r_au.values[o]);
            let area = mesh.face_area[f];
            let dist = mesh.face_dist[f];
            let c = r_au_f * area / dist;
            face_coeff[f] = c;
            triplets.push((o, o, c));
            triplets.push((o, n, -c));
            triplets.push((n, n, c));
            triplets.push((n, o, -c));

            // Over-relaxed non-orthogonal correction: k = S - d |S|/|d|,
            // zero on an orthogonal mesh.
            let kx = mesh.face_nx[f] * area - mesh.face_dx[f] * (area / dist);
            let ky = mesh.face_ny[f] * area - mesh.face_dy[f] * (area / dist);
            if kx != 0.0 || ky != 0.0 {
                let gfx = grad_p.vx[o] + w * (grad_p.vx[n] - grad_p.vx[o]);
                let gfy = grad_p.vy[o] + w * (grad_p.vy[n] - grad_p.vy[o]);
                let corr = r_au_f * (gfx * kx + gfy * ky);
                rhs[o] += corr;
                rhs[n] -= corr;
            }
        }

        PressureSystem {
            matrix: SparseMatrix::from_triplets(n_cells, n_cells, &triplets),
            rhs,
            face_coeff,
        }
    }
}
