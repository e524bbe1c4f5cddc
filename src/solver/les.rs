use crate::error::{ChanError, Result};
use crate::solver::fields::VectorField;
use crate::solver::fvm::Fvm;
use crate::solver::mesh::Mesh;
use nalgebra::Vector2;
use serde::Deserialize;

/// Sub-grid stress contribution handed to the momentum assembly.
///
/// `nu_eff` enters the implicit Laplacian; `explicit` is the deviatoric
/// transpose-gradient divergence, integrated over each cell volume and added
/// to the right-hand side.
pub struct StressContribution {
    pub nu_eff: Vec<f64>,
    pub explicit: VectorField,
}

/// Turbulence closure contract: `correct` updates internal model state from
/// the resolved fields, `div_dev_b_eff` yields the effective-stress
/// divergence contribution for the momentum operator. The fields are passed
/// explicitly at each call so ownership stays with the time-step controller.
pub trait TurbulenceModel: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn correct(&mut self, mesh: &Mesh, u: &VectorField, u_b: &[Vector2<f64>], phi: &[f64]);

    fn div_dev_b_eff(
        &self,
        mesh: &Mesh,
        u: &VectorField,
        u_b: &[Vector2<f64>],
    ) -> StressContribution;
}

/// Turbulence selection dictionary (`constant/turbulenceProperties.json`).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurbulenceProperties {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_cs")]
    pub cs: f64,
}

fn default_model() -> String {
    "Smagorinsky".to_string()
}

fn default_cs() -> f64 {
    0.17
}

impl Default for TurbulenceProperties {
    fn default() -> Self {
        Self {
            model: default_model(),
            cs: default_cs(),
        }
    }
}

pub fn make_model(
    props: &TurbulenceProperties,
    nu: f64,
    n_cells: usize,
) -> Result<Box<dyn TurbulenceModel>> {
    match props.model.as_str() {
        "Smagorinsky" => Ok(Box::new(Smagorinsky::new(nu, props.cs, n_cells))),
        "laminar" => Ok(Box::new(Laminar::new(nu))),
        other => Err(ChanError::config(
            "turbulenceProperties.model",
            format!("unknown model '{}'", other),
        )),
    }
}

/// Smagorinsky sub-grid model: `nu_sgs = (Cs d)^2 |S|` with the filter width
/// `d = sqrt(V)` and `|S| = sqrt(2 S:S)` of the resolved strain rate.
#[derive(Debug)]
pub struct Smagorinsky {
    nu: f64,
    cs: f64,
    nu_sgs: Vec<f64>,
}

impl Smagorinsky {
    pub fn new(nu: f64, cs: f64, n_cells: usize) -> Self {
        Self {
            nu,
            cs,
            nu_sgs: vec![0.0; n_cells],
        }
    }

    pub fn nu_sgs(&self) -> &[f64] {
        &self.nu_sgs
    }
}

impl TurbulenceModel for Smagorinsky {
    fn name(&self) -> &'static str {
        "Smagorinsky"
    }

    fn correct(&mut self, mesh: &Mesh, u: &VectorField, u_b: &[Vector2<f64>], _phi: &[f64]) {
        let g = Fvm::vector_gradient(mesh, u, u_b);
        for i in 0..mesh.num_cells() {
            let sxx = g.xx[i];
            let syy = g.yy[i];
            let sxy = 0.5 * (g.xy[i] + g.yx[i]);
            let s_mag = (2.0 * (sxx * sxx + syy * syy + 2.0 * sxy * sxy)).sqrt();
            let delta = mesh.cell_vol[i].sqrt();
            self.nu_sgs[i] = (self.cs * delta).powi(2) * s_mag;
        }
    }

    fn div_dev_b_eff(
        &self,
        mesh: &Mesh,
        u: &VectorField,
        u_b: &[Vector2<f64>],
    ) -> StressContribution {
        let nu_eff: Vec<f64> = self.nu_sgs.iter().map(|s| self.nu + s).collect();
        let explicit = dev_grad_transpose_div(mesh, u, u_b, &nu_eff);
        StressContribution { nu_eff, explicit }
    }
}

/// Molecular transport only; the closure seam stays in place with
/// `nu_eff == nu` and no explicit stress.
#[derive(Debug)]
pub struct Laminar {
    nu: f64,
}

impl Laminar {
    pub fn new(nu: f64) -> Self {
        Self { nu }
    }
}

impl TurbulenceModel for Laminar {
    fn name(&self) -> &'static str {
        "laminar"
    }

    fn correct(&mut self, _mesh: &Mesh, _u: &VectorField, _u_b: &[Vector2<f64>], _phi: &[f64]) {}

    fn div_dev_b_eff(
        &self,
        mesh: &Mesh,
        u: &VectorField,
        u_b: &[Vector2<f64>],
    ) -> StressContribution {
        let nu_eff = vec![self.nu; mesh.num_cells()];
        let explicit = dev_grad_transpose_div(mesh, u, u_b, &nu_eff);
        StressContribution { nu_eff, explicit }
    }
}

/// Convenience for tests and assembly checks: a laminar stress contribution
/// for the current velocity state.
pub fn laminar_stress(mesh: &Mesh, nu: f64) -> StressContribution {
    let n = mesh.num_cells();
    StressContribution {
        nu_eff: vec![nu; n],
        explicit: VectorField::new(n, Vector2::zeros()),
    }
}

/// Explicit part of the effective-stress divergence:
/// `div(nu_eff dev((grad U)^T))`, integrated over each cell.
///
/// The trace subtraction uses the 2-D deviator; the resolved field is close
/// to solenoidal after pressure correction, so this term is small but keeps
/// the stress tensor traceless.
fn dev_grad_transpose_div(
    mesh: &Mesh,
    u: &VectorField,
    u_b: &[Vector2<f64>],
    nu_eff: &[f64],
) -> VectorField {
    let g = Fvm::vector_gradient(mesh, u, u_b);
    let n_cells = mesh.num_cells();

    // Cell stress tensor S_ij = nu_eff (d(u_i)/dx_j - delta_ij tr/2),
    // i.e. the deviatoric transpose of the velocity gradient.
    let mut sxx = vec![0.0; n_cells];
    let mut sxy = vec![0.0; n_cells];
    let mut syx = vec![0.0; n_cells];
    let mut syy = vec![0.0; n_cells];
    for i in 0..n_cells {
        let tr = 0.5 * (g.xx[i] + g.yy[i]);
        sxx[i] = nu_eff[i] * (g.xx[i] - tr);
        sxy[i] = nu_eff[i] * g.yx[i];
        syx[i] = nu_eff[i] * g.xy[i];
        syy[i] = nu_eff[i] * (g.yy[i] - tr);
    }

    let mut out = VectorField::new(n_cells, Vector2::zeros());
    for f in 0..mesh.num_faces() {
        let o = mesh.face_owner[f];
        let (fxx, fxy, fyx, fyy) = match mesh.face_neighbor[f] {
            Some(n) => {
                let w = mesh.face_w[f];
                (
                    sxx[o] + w * (sxx[n] - sxx[o]),
                    sxy[o] + w * (sxy[n] - sxy[o]),
                    syx[o] + w * (syx[n] - syx[o]),
                    syy[o] + w * (syy[n] - syy[o]),
                )
            }
            None => (sxx[o], sxy[o], syx[o], syy[o]),
        };
        let snx = mesh.face_nx[f] * mesh.face_area[f];
        let sny = mesh.face_ny[f] * mesh.face_area[f];
        let tx = fxx * snx + fxy * sny;
        let ty = fyx * snx + fyy * sny;
        out.vx[o] += tx;
        out.vy[o] += ty;
        if let Some(n) = mesh.face_neighbor[f] {
            out.vx[n] -= tx;
            out.vy[n] -= ty;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::channel_mesh;

    fn wall_values(mesh: &Mesh) -> Vec<Vector2<f64>> {
        vec![Vector2::zeros(); mesh.num_boundary_faces()]
    }

    #[test]
    fn zero_strain_gives_molecular_viscosity() {
        let mesh = channel_mesh(4, 4, 1.0, 1.0);
        let nu = 2e-5;
        let mut model = Smagorinsky::new(nu, 0.17, mesh.num_cells());
        let u = VectorField::new(mesh.num_cells(), Vector2::zeros());
        let phi = vec![0.0; mesh.num_faces()];
        model.correct(&mesh, &u, &wall_values(&mesh), &phi);
        let stress = model.div_dev_b_eff(&mesh, &u, &wall_values(&mesh));
        for v in &stress.nu_eff {
            assert!((v - nu).abs() < 1e-18);
        }
        for i in 0..mesh.num_cells() {
            assert!(stress.explicit.vx[i].abs() < 1e-15);
            assert!(stress.explicit.vy[i].abs() < 1e-15);
        }
    }

    #[test]
    fn shear_produces_eddy_viscosity() {
        let mesh = channel_mesh(4, 8, 1.0, 1.0);
        let nu = 1e-5;
        let mut model = Smagorinsky::new(nu, 0.17, mesh.num_cells());
        // Couette-like profile u_x = y: |S| = 1 in the interior
        let mut u = VectorField::new(mesh.num_cells(), Vector2::zeros());
        let mut u_b = wall_values(&mesh);
        for i in 0..mesh.num_cells() {
            u.vx[i] = mesh.cell_cy[i];
        }
        for (k, &f) in mesh.boundary_faces.iter().enumerate() {
            u_b[k] = Vector2::new(mesh.face_cy[f], 0.0);
        }
        let phi = vec![0.0; mesh.num_faces()];
        model.correct(&mesh, &u, &u_b, &phi);

        let delta = mesh.cell_vol[0].sqrt();
        let expect = (0.17 * delta) * (0.17 * delta);
        for &s in model.nu_sgs() {
            assert!((s - expect).abs() < 1e-10 * expect.max(1.0), "{} vs {}", s, expect);
        }
    }

    #[test]
    fn laminar_model_is_inert() {
        let mesh = channel_mesh(4, 4, 1.0, 1.0);
        let nu = 3e-4;
        let mut model = Laminar::new(nu);
        let u = VectorField::new(mesh.num_cells(), Vector2::new(0.5, 0.0));
        let phi = vec![0.0; mesh.num_faces()];
        model.correct(&mesh, &u, &wall_values(&mesh), &phi);
        let stress = model.div_dev_b_eff(&mesh, &u, &wall_values(&mesh));
        assert!(stress.nu_eff.iter().all(|&v| v == nu));
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        let props = TurbulenceProperties {
            model: "kEpsilon".into(),
            cs: 0.17,
        };
        let err = make_model(&props, 1e-5, 4).unwrap_err();
        assert!(err.to_string().contains("kEpsilon"));
    }
}
