use crate::error::{ChanError, Result};
use std::path::Path;

/// Streamwise driving-force state: the uniform pressure-gradient magnitude
/// that sustains the target flow rate, persisted per time directory in a
/// side channel separate from the field checkpoints.
#[derive(Clone, Copy, Debug)]
pub struct DrivingForce {
    pub value: f64,
}

impl DrivingForce {
    /// Load the checkpoint for `time_dir`. A missing or unopenable file is
    /// the expected fresh-run state and defaults to zero; unparseable content
    /// in an existing file is a configuration error.
    pub fn load(time_dir: &Path) -> Result<Self> {
        let path = time_dir.join("uniform").join("gradP.raw");
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let value: f64 = text.trim().parse().map_err(|_| {
                    ChanError::config(
                        path.display().to_string(),
                        "gradP checkpoint is not a scalar",
                    )
                })?;
                log::info!("Reading average pressure gradient");
                Ok(Self { value })
            }
            Err(_) => {
                log::info!("Initializing with 0 pressure gradient");
                Ok(Self { value: 0.0 })
            }
        }
    }

    /// Persist the current value for `time_dir`. The driving force is
    /// load-bearing restart state: a write failure would silently
    /// desynchronize the checkpoint record from the run, so the process
    /// aborts with the failed path instead of continuing.
    pub fn store(&self, time_dir: &Path) {
        let dir = time_dir.join("uniform");
        let path = dir.join("gradP.raw");
        let result = std::fs::create_dir_all(&dir)
            .and_then(|_| std::fs::write(&path, format!("{}\n", self.value)));
        if let Err(e) = result {
            log::error!("Cannot open file {}: {}", path.display(), e);
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkpoint_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        // Repeated loads with no file present always yield the default.
        for _ in 0..3 {
            let g = DrivingForce::load(dir.path()).unwrap();
            assert_eq!(g.value, 0.0);
        }
    }

    #[test]
    fn store_load_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let value = 0.1234567890123456789_f64;
        DrivingForce { value }.store(dir.path());
        let back = DrivingForce::load(dir.path()).unwrap();
        assert_eq!(back.value, value);
    }

    #[test]
    fn garbage_checkpoint_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uniform")).unwrap();
        std::fs::write(dir.path().join("uniform").join("gradP.raw"), "not a number").unwrap();
        assert!(DrivingForce::load(dir.path()).is_err());
    }
}
