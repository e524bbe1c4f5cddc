use crate::case::Case;
use crate::error::{ChanError, Result};
use nalgebra::Vector2;
use serde::Deserialize;

#[derive(Deserialize)]
struct TransportDict {
    nu: Option<f64>,
    #[serde(rename = "Ubar")]
    ubar: Option<[f64; 2]>,
}

/// Read-once physical constants, with the derived flow-direction data
/// computed here and held for the lifetime of the run.
#[derive(Clone, Copy, Debug)]
pub struct TransportProperties {
    pub nu: f64,
    pub ubar: Vector2<f64>,
    pub mag_ubar: f64,
    pub flow_direction: Vector2<f64>,
}

impl TransportProperties {
    pub fn read(case: &Case) -> Result<Self> {
        log::info!("Reading transportProperties");
        let dict: TransportDict = case.read_json("constant/transportProperties.json")?;
        let nu = dict
            .nu
            .ok_or_else(|| ChanError::config("transportProperties.nu", "missing"))?;
        if !(nu > 0.0) {
            return Err(ChanError::config(
                "transportProperties.nu",
                format!("must be positive, got {}", nu),
            ));
        }
        let ubar = dict
            .ubar
            .map(|v| Vector2::new(v[0], v[1]))
            .ok_or_else(|| ChanError::config("transportProperties.Ubar", "missing"))?;
        Self::from_parts(nu, ubar)
    }

    pub fn from_parts(nu: f64, ubar: Vector2<f64>) -> Result<Self> {
        let mag_ubar = ubar.norm();
        if mag_ubar <= 0.0 {
            return Err(ChanError::config(
                "transportProperties.Ubar",
                "must be nonzero to define a flow direction",
            ));
        }
        Ok(Self {
            nu,
            ubar,
            mag_ubar,
            flow_direction: ubar / mag_ubar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_direction_is_unit_length() {
        let t = TransportProperties::from_parts(1e-5, Vector2::new(3.0, 4.0)).unwrap();
        assert!((t.flow_direction.norm() - 1.0).abs() < 1e-15);
        assert!((t.mag_ubar - 5.0).abs() < 1e-12);
    }

    #[test]
    fn zero_ubar_is_rejected() {
        let err = TransportProperties::from_parts(1e-5, Vector2::zeros()).unwrap_err();
        assert!(err.to_string().contains("Ubar"));
    }
}
