use crate::case::Case;
use crate::error::{ChanError, Result};
use crate::solver::fields::{ScalarField, VectorField};
use std::path::PathBuf;

impl Case {
    fn field_path(&self, time: &str, name: &str) -> PathBuf {
        self.time_dir(time).join(format!("{}.json", name))
    }

    /// Must-read startup semantics: a missing or malformed checkpoint is
    /// fatal, with the offending path in the diagnostic.
    pub fn read_scalar_field(&self, time: &str, name: &str) -> Result<ScalarField> {
        let path = self.field_path(time, name);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ChanError::field_read(name, &path, e.to_string()))?;
        let values: Vec<f64> = serde_json::from_str(&text)
            .map_err(|e| ChanError::field_read(name, &path, e.to_string()))?;
        Ok(ScalarField::from_values(values))
    }

    /// Read-if-present semantics for derived fields (the face flux): absence
    /// is fine, a present-but-malformed checkpoint is still fatal.
    pub fn read_scalar_field_if_present(
        &self,
        time: &str,
        name: &str,
    ) -> Result<Option<ScalarField>> {
        if !self.field_path(time, name).is_file() {
            return Ok(None);
        }
        self.read_scalar_field(time, name).map(Some)
    }

    pub fn read_vector_field(&self, time: &str, name: &str) -> Result<VectorField> {
        let path = self.field_path(time, name);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ChanError::field_read(name, &path, e.to_string()))?;
        let pairs: Vec<[f64; 2]> = serde_json::from_str(&text)
            .map_err(|e| ChanError::field_read(name, &path, e.to_string()))?;
        let mut field = VectorField {
            vx: Vec::with_capacity(pairs.len()),
            vy: Vec::with_capacity(pairs.len()),
        };
        for [x, y] in pairs {
            field.vx.push(x);
            field.vy.push(y);
        }
        Ok(field)
    }

    pub fn write_scalar_field(&self, time: &str, name: &str, field: &ScalarField) -> Result<()> {
        let path = self.field_path(time, name);
        let dir = self.time_dir(time);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ChanError::io(format!("creating {}", dir.display()), e))?;
        let text = serde_json::to_string(&field.values)
            .map_err(|e| ChanError::config(name, format!("serializing field: {}", e)))?;
        std::fs::write(&path, text)
            .map_err(|e| ChanError::io(format!("writing {}", path.display()), e))
    }

    pub fn write_vector_field(&self, time: &str, name: &str, field: &VectorField) -> Result<()> {
        let path = self.field_path(time, name);
        let dir = self.time_dir(time);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ChanError::io(format!("creating {}", dir.display()), e))?;
        let pairs: Vec<[f64; 2]> = field
            .vx
            .iter()
            .zip(&field.vy)
            .map(|(&x, &y)| [x, y])
            .collect();
        let text = serde_json::to_string(&pairs)
            .map_err(|e| ChanError::config(name, format!("serializing field: {}", e)))?;
        std::fs::write(&path, text)
            .map_err(|e| ChanError::io(format!("writing {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn scalar_field_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let field = ScalarField::from_values(vec![0.1, -2.5, 1e-17, 3.0f64.sqrt()]);
        case.write_scalar_field("0.2", "p", &field).unwrap();
        let back = case.read_scalar_field("0.2", "p").unwrap();
        assert_eq!(field.values, back.values);
    }

    #[test]
    fn vector_field_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let mut field = VectorField::new(3, Vector2::zeros());
        field.set(0, Vector2::new(1.0, -1.0));
        field.set(2, Vector2::new(0.5f64.sqrt(), 2e-30));
        case.write_vector_field("1", "U", &field).unwrap();
        let back = case.read_vector_field("1", "U").unwrap();
        assert_eq!(field.vx, back.vx);
        assert_eq!(field.vy, back.vy);
    }

    #[test]
    fn missing_field_is_fatal_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let err = case.read_scalar_field("0", "p").unwrap_err();
        assert!(err.to_string().contains("p.json"));
    }
}
