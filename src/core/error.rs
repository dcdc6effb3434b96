//! SF-004: Error taxonomy.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure while loading or running one definition file.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("cannot read definition {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}{}: {message}", .path.display(), line_suffix(.line))]
    Parse {
        path: PathBuf,
        /// 1-based; `None` when the format does not report positions
        line: Option<usize>,
        message: String,
    },
    #[error("evaluation of {} exceeded {}ms", .path.display(), .limit.as_millis())]
    Timeout { path: PathBuf, limit: Duration },
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(":{}", l)).unwrap_or_default()
}

impl EvaluationError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } | Self::Parse { path, .. } | Self::Timeout { path, .. } => path,
        }
    }

    /// True when the file disappeared between listing and reading.
    pub(crate) fn is_missing_file(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result of looking an application up by caller-supplied name.
///
/// `Internal` displays a generic message; the underlying
/// [`EvaluationError`] is reachable through `source()` for server-side logs.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("application not found")]
    NotFound,
    #[error("internal error while loading application definition")]
    Internal(#[source] EvaluationError),
}

/// Failure loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_sf004_internal_display_is_generic() {
        let inner = EvaluationError::Parse {
            path: PathBuf::from("/srv/sushi/apps/SecretApp.rb"),
            line: Some(3),
            message: "unexpected token".to_string(),
        };
        let err = LookupError::Internal(inner);
        let shown = err.to_string();
        assert!(!shown.contains("/srv"));
        assert!(!shown.contains("unexpected"));
        let source = err.source().unwrap().to_string();
        assert!(source.contains("SecretApp.rb:3"));
    }

    #[test]
    fn test_sf004_parse_without_line() {
        let err = EvaluationError::Parse {
            path: PathBuf::from("CountQCApp.yaml"),
            line: None,
            message: "class_name must not be empty".to_string(),
        };
        assert_eq!(err.to_string(), "CountQCApp.yaml: class_name must not be empty");
    }

    #[test]
    fn test_sf004_missing_file_detection() {
        let err = EvaluationError::Io {
            path: PathBuf::from("x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.is_missing_file());
        let err = EvaluationError::Io {
            path: PathBuf::from("x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
        };
        assert!(!err.is_missing_file());
    }

    #[test]
    fn test_sf004_timeout_message() {
        let err = EvaluationError::Timeout {
            path: PathBuf::from("SlowApp.rb"),
            limit: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "evaluation of SlowApp.rb exceeded 250ms");
    }
}
