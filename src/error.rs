use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChanError>;

/// Crate-wide error type.
///
/// Configuration and startup-field errors are unrecoverable by design: they
/// name the offending key or path and the caller terminates the run.
#[derive(Debug, Error)]
pub enum ChanError {
    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dictionary not found: {path}")]
    MissingDict { path: PathBuf },

    #[error("configuration error: key '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("cannot read field '{name}' from {path}: {reason}")]
    FieldRead {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("size mismatch for {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("no time directory with required fields found under {root}")]
    NoTimeDirectory { root: PathBuf },

    #[error("linear solve for {field} did not converge: {iterations} iterations, residual {residual:.3e}")]
    SolveDiverged {
        field: &'static str,
        iterations: usize,
        residual: f64,
    },

    #[error("linear solve for {field} broke down: {reason}")]
    SolveBreakdown {
        field: &'static str,
        reason: &'static str,
    },

    #[error("continuity error: {message}")]
    Continuity { message: String },
}

impl ChanError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn field_read(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::FieldRead {
            name: name.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn continuity(message: impl Into<String>) -> Self {
        Self::Continuity {
            message: message.into(),
        }
    }

    #[inline]
    pub fn check_size(name: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            Err(Self::SizeMismatch {
                name,
                expected,
                actual,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_key() {
        let err = ChanError::config("Ubar", "missing");
        assert!(err.to_string().contains("Ubar"));
    }

    #[test]
    fn check_size() {
        assert!(ChanError::check_size("p", 10, 10).is_ok());
        assert!(ChanError::check_size("p", 10, 5).is_err());
    }
}
