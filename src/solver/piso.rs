use crate::case::controls::{PisoControls, SolverSet};
use crate::case::grad_p::DrivingForce;
use crate::case::transport::TransportProperties;
use crate::error::{ChanError, Result};
use crate::solver::fields::{ScalarField, VectorField};
use crate::solver::fvm::{ContinuityReport, Fvm};
use crate::solver::les::TurbulenceModel;
use crate::solver::linear_solver::{solve_bicgstab, solve_cg};
use crate::solver::mesh::{Boundary, Mesh};
use nalgebra::Vector2;
use wide::f64x4;

/// Per-step diagnostics returned by the controller.
pub struct StepReport {
    pub co_max: f64,
    pub co_mean: f64,
    pub mag_ubar_star: f64,
    pub grad_p: f64,
    pub continuity: ContinuityReport,
    pub pressure_solves: usize,
    pub final_pressure_solves: usize,
}

/// Segregated pressure-velocity solver for the flow-rate-controlled channel.
///
/// Owns the fields, the turbulence closure and the driving-force state; each
/// `step` runs the fixed stage sequence: Courant report, closure update,
/// momentum predictor, `nCorrectors` pressure corrections with
/// `nNonOrthogonalCorrectors + 1` passes each, continuity accounting, then
/// the proportional flow-rate correction of the body force.
pub struct PisoSolver {
    pub mesh: Mesh,
    pub p: ScalarField,
    pub u: VectorField,
    pub phi: Vec<f64>,
    pub u_boundary: Vec<Vector2<f64>>,
    pub turbulence: Box<dyn TurbulenceModel>,
    pub transport: TransportProperties,
    pub driving_force: DrivingForce,
    pub p_ref_cell: usize,
    pub p_ref_value: f64,
    u_old: VectorField,
    phi_old: Vec<f64>,
    cumulative_cont_err: f64,
}

impl PisoSolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mesh: Mesh,
        p: ScalarField,
        u: VectorField,
        phi_checkpoint: Option<Vec<f64>>,
        transport: TransportProperties,
        turbulence: Box<dyn TurbulenceModel>,
        driving_force: DrivingForce,
        p_ref_cell: usize,
        p_ref_value: f64,
    ) -> Result<Self> {
        ChanError::check_size("p", mesh.num_cells(), p.len())?;
        ChanError::check_size("U", mesh.num_cells(), u.len())?;
        if p_ref_cell >= mesh.num_cells() {
            return Err(ChanError::config(
                "fvSolution.piso.pRefCell",
                format!("cell {} outside mesh of {} cells", p_ref_cell, mesh.num_cells()),
            ));
        }

        let u_boundary = vec![Vector2::zeros(); mesh.num_boundary_faces()];
        // A checkpointed flux restores the exact pre-restart state; without
        // one the flux is derived from the velocity by face interpolation.
        let phi = match phi_checkpoint {
            Some(phi) => {
                ChanError::check_size("phi", mesh.num_faces(), phi.len())?;
                phi
            }
            None => Fvm::interpolate_flux(&mesh, &u, &u_boundary),
        };
        let u_old = u.clone();
        let phi_old = phi.clone();
        Ok(Self {
            mesh,
            p,
            u,
            phi,
            u_boundary,
            turbulence,
            transport,
            driving_force,
            p_ref_cell,
            p_ref_value,
            u_old,
            phi_old,
            cumulative_cont_err: 0.0,
        })
    }

    /// Re-apply the velocity boundary conditions after a correction of the
    /// cell values.
    fn correct_boundary_velocity(&mut self) {
        for (k, &f) in self.mesh.boundary_faces.iter().enumerate() {
            match self.mesh.face_boundary[f] {
                Some(Boundary::Wall) => self.u_boundary[k] = Vector2::zeros(),
                None => {}
            }
        }
    }

    pub fn step(
        &mut self,
        dt: f64,
        piso: &PisoControls,
        solvers: &SolverSet,
    ) -> Result<StepReport> {
        piso.validate()?;
        let n_cells = self.mesh.num_cells();

        // Old-time state for the unsteady term and the flux reconstruction
        self.u_old.vx.copy_from_slice(&self.u.vx);
        self.u_old.vy.copy_from_slice(&self.u.vy);
        self.phi_old.copy_from_slice(&self.phi);

        let (co_max, co_mean) = Fvm::courant_number(&self.mesh, &self.phi, dt);
        log::info!("Courant Number mean: {:.6} max: {:.6}", co_mean, co_max);
        if co_max > 1.0 {
            log::warn!("Courant number {:.3} exceeds 1 at fixed time step", co_max);
        }

        self.turbulence
            .correct(&self.mesh, &self.u, &self.u_boundary, &self.phi);
        let stress = self
            .turbulence
            .div_dev_b_eff(&self.mesh, &self.u, &self.u_boundary);

        // ddt(U) + div(phi, U) + divDevBeff(U) == flowDirection * gradP
        let body = self.transport.flow_direction * self.driving_force.value;
        let ueqn = Fvm::assemble_momentum(
            &self.mesh,
            &self.u_old,
            &self.u_boundary,
            &self.phi,
            &stress,
            dt,
            body,
        );

        if piso.momentum_predictor {
            // Solve UEqn == -grad(p) for an initial guess
            let grad_p = Fvm::gradient(&self.mesh, &self.p);
            let mut rhs_x = ueqn.rhs_x.clone();
            let mut rhs_y = ueqn.rhs_y.clone();
            let mut i = 0;
            while i + 4 <= n_cells {
                let v_vol = f64x4::from(&self.mesh.cell_vol[i..i + 4]);
                let v_gx = f64x4::from(&grad_p.vx[i..i + 4]);
                let v_gy = f64x4::from(&grad_p.vy[i..i + 4]);
                let v_rx = f64x4::from(&rhs_x[i..i + 4]);
                let v_ry = f64x4::from(&rhs_y[i..i + 4]);
                let rx: [f64; 4] = (v_rx - v_gx * v_vol).into();
                let ry: [f64; 4] = (v_ry - v_gy * v_vol).into();
                rhs_x[i..i + 4].copy_from_slice(&rx);
                rhs_y[i..i + 4].copy_from_slice(&ry);
                i += 4;
            }
            while i < n_cells {
                rhs_x[i] -= grad_p.vx[i] * self.mesh.cell_vol[i];
                rhs_y[i] -= grad_p.vy[i] * self.mesh.cell_vol[i];
                i += 1;
            }
            solve_bicgstab(&ueqn.matrix, &rhs_x, &mut self.u.vx, &solvers.u, "Ux")?;
            solve_bicgstab(&ueqn.matrix, &rhs_y, &mut self.u.vy, &solvers.u, "Uy")?;
            self.correct_boundary_velocity();
        }

        let a = ueqn.a_field(&self.mesh);
        let r_au = ScalarField::from_values(a.values.iter().map(|v| 1.0 / v).collect());

        let mut pressure_solves = 0;
        let mut final_pressure_solves = 0;
        let mut continuity = ContinuityReport {
            sum_local: 0.0,
            global: 0.0,
            cumulative: self.cumulative_cont_err,
        };

        for corr in 0..piso.n_correctors {
            // Momentum solved with the pressure term dropped: U = rAU * H
            let h = ueqn.h_field(&self.mesh, &self.u);
            let mut i = 0;
            while i + 4 <= n_cells {
                let v_r = f64x4::from(&r_au.values[i..i + 4]);
                let v_hx = f64x4::from(&h.vx[i..i + 4]);
                let v_hy = f64x4::from(&h.vy[i..i + 4]);
                let rx: [f64; 4] = (v_r * v_hx).into();
                let ry: [f64; 4] = (v_r * v_hy).into();
                self.u.vx[i..i + 4].copy_from_slice(&rx);
                self.u.vy[i..i + 4].copy_from_slice(&ry);
                i += 4;
            }
            while i < n_cells {
                self.u.vx[i] = r_au.values[i] * h.vx[i];
                self.u.vy[i] = r_au.values[i] * h.vy[i];
                i += 1;
            }

            // Flux reconstruction with the transient correction, then the
            // global balance check ahead of the elliptic solve
            let mut phi = Fvm::interpolate_flux(&self.mesh, &self.u, &self.u_boundary);
            let ddt_corr =
                Fvm::ddt_phi_corr(&self.mesh, &r_au, &self.u_old, &self.phi_old, dt);
            for f in 0..phi.len() {
                phi[f] += ddt_corr[f];
            }
            Fvm::adjust_phi(&self.mesh, &phi)?;

            for non_orth in 0..=piso.n_non_orthogonal_correctors {
                let mut peqn = Fvm::assemble_pressure(&self.mesh, &r_au, &phi, &self.p);
                peqn.set_reference(self.p_ref_cell, self.p_ref_value);

                let last_pass = corr + 1 == piso.n_correctors
                    && non_orth == piso.n_non_orthogonal_correctors;
                if last_pass {
                    solve_cg(&peqn.matrix, &peqn.rhs, &mut self.p.values, &solvers.p_final, "pFinal")?;
                    final_pressure_solves += 1;
                } else {
                    solve_cg(&peqn.matrix, &peqn.rhs, &mut self.p.values, &solvers.p, "p")?;
                }
                pressure_solves += 1;

                if non_orth == piso.n_non_orthogonal_correctors {
                    // Make the flux mass-consistent with the new pressure
                    let flux = peqn.flux(&self.p, &self.mesh);
                    for f in 0..phi.len() {
                        phi[f] -= flux[f];
                    }
                }
            }
            self.phi = phi;

            continuity =
                Fvm::continuity_errors(&self.mesh, &self.phi, dt, &mut self.cumulative_cont_err);
            log::info!(
                "time step continuity errors : sum local = {:.6e}, global = {:.6e}, cumulative = {:.6e}",
                continuity.sum_local,
                continuity.global,
                continuity.cumulative
            );

            // U -= rAU * grad(p), boundary conditions re-applied
            let grad_p = Fvm::gradient(&self.mesh, &self.p);
            let mut i = 0;
            while i + 4 <= n_cells {
                let v_r = f64x4::from(&r_au.values[i..i + 4]);
                let v_gx = f64x4::from(&grad_p.vx[i..i + 4]);
                let v_gy = f64x4::from(&grad_p.vy[i..i + 4]);
                let v_ux = f64x4::from(&self.u.vx[i..i + 4]);
                let v_uy = f64x4::from(&self.u.vy[i..i + 4]);
                let rx: [f64; 4] = (v_ux - v_r * v_gx).into();
                let ry: [f64; 4] = (v_uy - v_r * v_gy).into();
                self.u.vx[i..i + 4].copy_from_slice(&rx);
                self.u.vy[i..i + 4].copy_from_slice(&ry);
                i += 4;
            }
            while i < n_cells {
                self.u.vx[i] -= r_au.values[i] * grad_p.vx[i];
                self.u.vy[i] -= r_au.values[i] * grad_p.vy[i];
                i += 1;
            }
            self.correct_boundary_velocity();
        }

        // Correct the driving force for a constant mass flow rate: a
        // proportional step that restores the target bulk velocity under the
        // linearized momentum balance.
        let dir = self.transport.flow_direction;
        let mag_ubar_star = self
            .u
            .weighted_average_along(dir, &self.mesh.cell_vol);
        let r_au_avg = r_au.weighted_average(&self.mesh.cell_vol);
        let grad_p_plus = (self.transport.mag_ubar - mag_ubar_star) / r_au_avg;

        let v_dx = f64x4::splat(dir.x * grad_p_plus);
        let v_dy = f64x4::splat(dir.y * grad_p_plus);
        let mut i = 0;
        while i + 4 <= n_cells {
            let v_r = f64x4::from(&r_au.values[i..i + 4]);
            let v_ux = f64x4::from(&self.u.vx[i..i + 4]);
            let v_uy = f64x4::from(&self.u.vy[i..i + 4]);
            let rx: [f64; 4] = (v_ux + v_r * v_dx).into();
            let ry: [f64; 4] = (v_uy + v_r * v_dy).into();
            self.u.vx[i..i + 4].copy_from_slice(&rx);
            self.u.vy[i..i + 4].copy_from_slice(&ry);
            i += 4;
        }
        while i < n_cells {
            self.u.vx[i] += r_au.values[i] * dir.x * grad_p_plus;
            self.u.vy[i] += r_au.values[i] * dir.y * grad_p_plus;
            i += 1;
        }

        self.driving_force.value += grad_p_plus;
        log::info!(
            "Uncorrected Ubar = {:.8} pressure gradient = {:.8}",
            mag_ubar_star,
            self.driving_force.value
        );

        Ok(StepReport {
            co_max,
            co_mean,
            mag_ubar_star,
            grad_p: self.driving_force.value,
            continuity,
            pressure_solves,
            final_pressure_solves,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::les::{Laminar, Smagorinsky};
    use crate::solver::linear_solver::SolveControls;
    use crate::solver::mesh::channel_mesh;

    fn solver_set() -> SolverSet {
        let tight = SolveControls {
            tolerance: 1e-10,
            rel_tol: 0.0,
            max_iter: 2000,
        };
        SolverSet {
            p: SolveControls {
                tolerance: 1e-8,
                rel_tol: 0.01,
                max_iter: 2000,
            },
            p_final: tight,
            u: SolveControls {
                tolerance: 1e-9,
                rel_tol: 0.0,
                max_iter: 2000,
            },
        }
    }

    fn make_solver(nx: usize, ny: usize, nu: f64) -> PisoSolver {
        let mesh = channel_mesh(nx, ny, 2.0, 1.0);
        let n = mesh.num_cells();
        let transport =
            TransportProperties::from_parts(nu, Vector2::new(1.0, 0.0)).unwrap();
        let p = ScalarField::new(n, 0.0);
        let u = VectorField::new(n, Vector2::zeros());
        let turbulence = Box::new(Laminar::new(nu));
        PisoSolver::new(
            mesh,
            p,
            u,
            None,
            transport,
            turbulence,
            DrivingForce { value: 0.0 },
            0,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn rest_start_pushes_flow_toward_target() {
        // From U = 0 and gradP = 0 with target magUbar = 1: the uncorrected
        // bulk velocity is zero, the gradient increment is positive, and the
        // flow gains a positive streamwise component.
        let mut solver = make_solver(8, 6, 0.01);
        let piso = PisoControls::default();
        let report = solver.step(0.01, &piso, &solver_set()).unwrap();

        assert!(report.mag_ubar_star.abs() < 1e-12);
        assert!(report.grad_p > 0.0);
        assert!(solver.driving_force.value > 0.0);
        for i in 0..solver.mesh.num_cells() {
            assert!(solver.u.vx[i] > 0.0, "cell {} not accelerated", i);
        }
    }

    #[test]
    fn corrector_pass_counts_follow_controls() {
        let mut solver = make_solver(6, 4, 0.01);
        let mut piso = PisoControls::default();
        piso.n_correctors = 2;
        piso.n_non_orthogonal_correctors = 1;
        let report = solver.step(0.01, &piso, &solver_set()).unwrap();
        assert_eq!(report.pressure_solves, 2 * (1 + 1));
        assert_eq!(report.final_pressure_solves, 1);

        piso.n_correctors = 3;
        piso.n_non_orthogonal_correctors = 0;
        let report = solver.step(0.01, &piso, &solver_set()).unwrap();
        assert_eq!(report.pressure_solves, 3);
        assert_eq!(report.final_pressure_solves, 1);
    }

    #[test]
    fn invalid_controls_are_rejected() {
        let mut solver = make_solver(4, 4, 0.01);
        let mut piso = PisoControls::default();
        piso.n_correctors = 0;
        assert!(solver.step(0.01, &piso, &solver_set()).is_err());
    }

    #[test]
    fn flow_rate_converges_toward_target() {
        let mut solver = make_solver(8, 6, 0.05);
        let mut piso = PisoControls::default();
        piso.n_correctors = 2;
        let solvers = solver_set();

        let mut errors = Vec::new();
        for _ in 0..6 {
            let report = solver.step(0.02, &piso, &solvers).unwrap();
            errors.push((solver.transport.mag_ubar - report.mag_ubar_star).abs());
        }
        // Spin-up from rest overshoots once while the accumulated gradient
        // finds the friction balance, then the uncorrected bulk velocity
        // settles onto the target.
        assert!(errors[2] < 0.1 * errors[0], "errors: {:?}", errors);
        assert!(errors[5] < 0.02 * errors[0], "errors: {:?}", errors);
        assert!(errors[5] <= errors[2] + 1e-12, "errors: {:?}", errors);
        let final_avg = solver
            .u
            .weighted_average_along(solver.transport.flow_direction, &solver.mesh.cell_vol);
        assert!((final_avg - solver.transport.mag_ubar).abs() < 1e-9);
    }

    #[test]
    fn corrected_flux_is_mass_consistent() {
        let mut solver = make_solver(8, 6, 0.01);
        let mut piso = PisoControls::default();
        piso.n_correctors = 2;
        solver.step(0.01, &piso, &solver_set()).unwrap();
        solver.step(0.01, &piso, &solver_set()).unwrap();

        let div = Fvm::divergence(&solver.mesh, &solver.phi);
        for (i, d) in div.iter().enumerate() {
            if i != solver.p_ref_cell {
                assert!(d.abs() < 1e-7, "cell {}: divergence {}", i, d);
            }
        }
    }

    #[test]
    fn smagorinsky_closure_runs_in_the_loop() {
        let mesh = channel_mesh(8, 6, 2.0, 1.0);
        let n = mesh.num_cells();
        let nu = 0.005;
        let transport =
            TransportProperties::from_parts(nu, Vector2::new(1.0, 0.0)).unwrap();
        let mut solver = PisoSolver::new(
            mesh,
            ScalarField::new(n, 0.0),
            VectorField::new(n, Vector2::zeros()),
            None,
            transport,
            Box::new(Smagorinsky::new(nu, 0.17, n)),
            DrivingForce { value: 0.0 },
            0,
            0.0,
        )
        .unwrap();
        let piso = PisoControls::default();
        for _ in 0..3 {
            solver.step(0.01, &piso, &solver_set()).unwrap();
        }
        let avg = solver
            .u
            .weighted_average_along(solver.transport.flow_direction, &solver.mesh.cell_vol);
        assert!(avg > 0.5, "bulk velocity did not develop: {}", avg);
    }
}
