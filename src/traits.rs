use crate::model::{DependencyNode, Ecosystem};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result of resolving a project: either a dependency list or the expected
/// absence of the ecosystem's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Vec<DependencyNode>),
    NotFound { manifest: String },
}

impl Resolution {
    /// Plain-language error for the not-found case.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Resolution::Found(_) => None,
            Resolution::NotFound { manifest } => Some(format!("No {} found", manifest)),
        }
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        match self {
            Resolution::Found(nodes) => nodes,
            Resolution::NotFound { .. } => &[],
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed {file}: {reason}")]
    Malformed { file: String, reason: String },
}

impl ResolveError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ResolveError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(file: &str, reason: impl ToString) -> Self {
        ResolveError::Malformed {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait EcosystemResolver: Send + Sync {
    /// Returns the ecosystem this resolver handles.
    fn ecosystem(&self) -> Ecosystem;

    /// Builds the normalized dependency list for the project rooted at `root`.
    ///
    /// A missing manifest is reported as [`Resolution::NotFound`]; unreadable or
    /// structurally invalid manifests are errors. Individual bad entries are skipped.
    async fn resolve(&self, root: &Path) -> Result<Resolution, ResolveError>;
}

/// Reads a file, mapping "not found" to `Ok(None)`.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<String>, ResolveError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ResolveError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let res = Resolution::NotFound {
            manifest: "go.mod".to_string(),
        };
        assert_eq!(res.error_message().as_deref(), Some("No go.mod found"));
        assert!(res.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_read_optional_missing() {
        let dir = tempfile::tempdir().unwrap();
        let res = read_optional(&dir.path().join("nope.txt")).await.unwrap();
        assert!(res.is_none());
    }
}
