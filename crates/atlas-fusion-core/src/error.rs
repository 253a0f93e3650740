//! Error taxonomy for atlas-fusion.
//!
//! Only fatal startup conditions and genuine I/O problems surface as
//! [`AtlasFusionError`]. Collaborator processes that exit without their
//! expected output are not errors at this layer; see [`crate::toolkit::ToolRun`].

use std::path::PathBuf;

/// atlas-fusion errors.
#[derive(Debug, thiserror::Error)]
pub enum AtlasFusionError {
    #[error("malformed manifest {path}:{line}: {reason}")]
    Manifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing required tool(s): {}", .tools.join(", "))]
    MissingDependency { tools: Vec<String> },

    #[error("naming error: {0}")]
    Naming(String),

    #[error("tool {tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtlasFusionError {
    /// Construct a manifest error for `path` at 1-based `line`.
    pub fn manifest(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the run before any subject is processed.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            Self::Manifest { .. }
                | Self::InvalidArgument(_)
                | Self::InvalidConfig(_)
                | Self::MissingDependency { .. }
                | Self::Naming(_)
        )
    }
}

/// Result type for atlas-fusion operations.
pub type Result<T> = std::result::Result<T, AtlasFusionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_display() {
        let err = AtlasFusionError::manifest("subjects.txt", 3, "age is not an integer");
        assert_eq!(
            err.to_string(),
            "malformed manifest subjects.txt:3: age is not an integer"
        );
    }

    #[test]
    fn test_missing_dependency_lists_every_tool() {
        let err = AtlasFusionError::MissingDependency {
            tools: vec!["ImageMath".to_string(), "pvc_correct".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing required tool(s): ImageMath, pvc_correct"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AtlasFusionError::InvalidArgument("x".into()).is_fatal_startup());
        assert!(!AtlasFusionError::Io(std::io::Error::other("disk")).is_fatal_startup());
        assert!(!AtlasFusionError::Tool {
            tool: "ImageMath".into(),
            reason: "boom".into()
        }
        .is_fatal_startup());
    }
}
