pub mod controls;
pub mod field_io;
pub mod grad_p;
pub mod time;
pub mod transport;

use crate::error::{ChanError, Result};
use crate::solver::les::TurbulenceProperties;
use controls::{ControlDict, FvSolution, MeshDict};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Handle to the on-disk case: dictionaries under `constant/` and `system/`,
/// field checkpoints in time directories, and the driving-force side channel
/// under `<time>/uniform/`.
pub struct Case {
    root: PathBuf,
}

impl Case {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn time_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<T> {
        let path = self.root.join(rel);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChanError::MissingDict { path: path.clone() }
            } else {
                ChanError::io(format!("reading {}", path.display()), e)
            }
        })?;
        serde_json::from_str(&text)
            .map_err(|e| ChanError::config(rel, format!("malformed dictionary: {}", e)))
    }

    pub fn control_dict(&self) -> Result<ControlDict> {
        let ctrl: ControlDict = self.read_json("system/controlDict.json")?;
        ctrl.validate()?;
        Ok(ctrl)
    }

    /// Solution controls are re-read on every call; the time-step controller
    /// fetches a fresh snapshot each step so the case stays live-tunable.
    pub fn fv_solution(&self) -> Result<FvSolution> {
        let fv: FvSolution = self.read_json("system/fvSolution.json")?;
        fv.piso.validate()?;
        Ok(fv)
    }

    pub fn mesh_dict(&self) -> Result<MeshDict> {
        let dict: MeshDict = self.read_json("constant/mesh.json")?;
        dict.validate()?;
        Ok(dict)
    }

    pub fn turbulence_properties(&self) -> Result<TurbulenceProperties> {
        match self.read_json("constant/turbulenceProperties.json") {
            Ok(props) => Ok(props),
            Err(ChanError::MissingDict { .. }) => Ok(TurbulenceProperties::default()),
            Err(e) => Err(e),
        }
    }

    /// Most recent time directory holding both primary field checkpoints.
    /// The run restarts from here; having none is fatal (the primary fields
    /// are must-read state).
    pub fn latest_time(&self) -> Result<(String, f64)> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| ChanError::io(format!("reading case root {}", self.root.display()), e))?;
        let mut best: Option<(String, f64)> = None;
        for entry in entries {
            let entry = entry
                .map_err(|e| ChanError::io(format!("listing {}", self.root.display()), e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let value: f64 = match name.parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            if !entry.path().join("p.json").is_file() || !entry.path().join("U.json").is_file() {
                continue;
            }
            match &best {
                Some((_, v)) if *v >= value => {}
                _ => best = Some((name, value)),
            }
        }
        best.ok_or_else(|| ChanError::NoTimeDirectory {
            root: self.root.clone(),
        })
    }
}
