use crate::error::{ChanError, Result};
use crate::solver::linear_solver::SolveControls;
use serde::Deserialize;

/// Time control (`system/controlDict.json`): fixed-step operation, output
/// every `writeInterval` steps.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDict {
    pub end_time: f64,
    pub delta_t: f64,
    #[serde(default = "default_write_interval")]
    pub write_interval: u64,
}

fn default_write_interval() -> u64 {
    1
}

impl ControlDict {
    pub fn validate(&self) -> Result<()> {
        if !(self.delta_t > 0.0) {
            return Err(ChanError::config(
                "controlDict.deltaT",
                format!("must be positive, got {}", self.delta_t),
            ));
        }
        if !self.end_time.is_finite() {
            return Err(ChanError::config("controlDict.endTime", "must be finite"));
        }
        if self.write_interval == 0 {
            return Err(ChanError::config(
                "controlDict.writeInterval",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Channel mesh parameters (`constant/mesh.json`).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshDict {
    pub nx: usize,
    pub ny: usize,
    pub length: f64,
    pub height: f64,
}

impl MeshDict {
    pub fn validate(&self) -> Result<()> {
        if self.nx < 2 || self.ny < 2 {
            return Err(ChanError::config(
                "mesh.nx/ny",
                "channel mesh needs at least 2 cells per direction",
            ));
        }
        if !(self.length > 0.0 && self.height > 0.0) {
            return Err(ChanError::config(
                "mesh.length/height",
                "domain extents must be positive",
            ));
        }
        Ok(())
    }
}

/// Per-step PISO control snapshot, re-read from `system/fvSolution.json` at
/// the top of every time step and never cached across steps.
///
/// `nOuterCorrectors` and `transonic` are read and validated with the rest of
/// the dictionary but do not drive loop bounds in this solver variant.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PisoControls {
    #[serde(default = "default_n_correctors")]
    pub n_correctors: usize,
    #[serde(default)]
    pub n_non_orthogonal_correctors: usize,
    #[serde(default = "default_momentum_predictor")]
    pub momentum_predictor: bool,
    #[serde(default)]
    pub transonic: bool,
    #[serde(default = "default_n_outer_correctors")]
    pub n_outer_correctors: usize,
    #[serde(default)]
    pub p_ref_cell: usize,
    #[serde(default)]
    pub p_ref_value: f64,
}

fn default_n_correctors() -> usize {
    1
}

fn default_momentum_predictor() -> bool {
    true
}

fn default_n_outer_correctors() -> usize {
    1
}

impl Default for PisoControls {
    fn default() -> Self {
        Self {
            n_correctors: default_n_correctors(),
            n_non_orthogonal_correctors: 0,
            momentum_predictor: default_momentum_predictor(),
            transonic: false,
            n_outer_correctors: default_n_outer_correctors(),
            p_ref_cell: 0,
            p_ref_value: 0.0,
        }
    }
}

impl PisoControls {
    pub fn validate(&self) -> Result<()> {
        if self.n_correctors < 1 {
            return Err(ChanError::config(
                "fvSolution.piso.nCorrectors",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Linear-solver controls per field; `pFinal` is the stricter configuration
/// used on the very last pressure pass of a step.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SolverSet {
    pub p: SolveControls,
    #[serde(rename = "pFinal")]
    pub p_final: SolveControls,
    #[serde(rename = "U")]
    pub u: SolveControls,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct FvSolution {
    #[serde(default)]
    pub piso: PisoControls,
    pub solvers: SolverSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piso_defaults_are_valid() {
        let piso = PisoControls::default();
        assert!(piso.validate().is_ok());
        assert_eq!(piso.n_correctors, 1);
        assert_eq!(piso.n_non_orthogonal_correctors, 0);
    }

    #[test]
    fn zero_correctors_rejected() {
        let mut piso = PisoControls::default();
        piso.n_correctors = 0;
        let err = piso.validate().unwrap_err();
        assert!(err.to_string().contains("nCorrectors"));
    }

    #[test]
    fn fv_solution_parses_reference_keys() {
        let json = r#"{
            "piso": {
                "nCorrectors": 2,
                "nNonOrthogonalCorrectors": 1,
                "momentumPredictor": true,
                "pRefCell": 0,
                "pRefValue": 0.0
            },
            "solvers": {
                "p": { "tolerance": 1e-6, "relTol": 0.05 },
                "pFinal": { "tolerance": 1e-6, "relTol": 0.0 },
                "U": { "tolerance": 1e-5, "relTol": 0.0 }
            }
        }"#;
        let fv: FvSolution = serde_json::from_str(json).unwrap();
        assert_eq!(fv.piso.n_correctors, 2);
        assert_eq!(fv.piso.n_non_orthogonal_correctors, 1);
        assert!(fv.solvers.p.rel_tol > 0.0);
        assert_eq!(fv.solvers.p_final.rel_tol, 0.0);
    }

    #[test]
    fn negative_corrector_counts_fail_to_parse() {
        let json = r#"{ "nNonOrthogonalCorrectors": -1 }"#;
        assert!(serde_json::from_str::<PisoControls>(json).is_err());
    }
}
