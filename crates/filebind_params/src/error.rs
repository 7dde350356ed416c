//! Error taxonomy for parameter handling.

use filebind_protocol::NameError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::listener::TaskListener;

/// Errors raised while creating, persisting or materializing parameters.
#[derive(Debug, Error)]
pub enum ParamError {
    /// Bad identifier, missing parameter, wrong parameter type. Never retried.
    #[error("{0}")]
    Configuration(String),

    /// The upload stream or multipart body could not be read.
    #[error("Upload failed: {0}")]
    Transport(String),

    /// Local disk or stash backend failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Execution was cancelled while the operation was in progress.
    #[error("Interrupted while {0}")]
    Interrupted(String),

    /// The parameter type does not implement this capability hook.
    #[error("{0} is not implemented by this parameter type")]
    Unsupported(&'static str),
}

impl ParamError {
    pub fn config(message: impl Into<String>) -> Self {
        ParamError::Configuration(message.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ParamError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ParamError::Interrupted(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ParamError::Configuration(_))
    }
}

impl From<NameError> for ParamError {
    fn from(err: NameError) -> Self {
        ParamError::Configuration(err.to_string())
    }
}

/// A best-effort deletion that did not succeed.
///
/// Reported to the build log and tracing, never turned into a failure.
#[derive(Debug)]
pub struct CleanupWarning {
    pub resource: PathBuf,
    /// Build or task the resource belonged to, plus the parameter if known.
    pub owner: String,
    pub source: io::Error,
}

impl CleanupWarning {
    /// Log to tracing only; for paths with no build log at hand.
    pub fn log(&self) {
        tracing::warn!(
            resource = %self.resource.display(),
            owner = %self.owner,
            error = %self.source,
            "cleanup failed"
        );
    }

    pub fn report(&self, listener: &dyn TaskListener) {
        self.log();
        listener.line(&format!("WARNING: {}", self));
    }
}

/// Remove `dir` recursively. A directory that is already gone counts as
/// removed; any other failure comes back as a warning owned by `owner`.
pub(crate) fn remove_tree(dir: &Path, owner: impl FnOnce() -> String) -> Option<CleanupWarning> {
    match fs::remove_dir_all(dir) {
        Ok(()) => None,
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(source) => Some(CleanupWarning {
            resource: dir.to_path_buf(),
            owner: owner(),
            source,
        }),
    }
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to delete {} for {}: {}",
            self.resource.display(),
            self.owner,
            self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_errors_become_configuration_errors() {
        let err: ParamError = filebind_protocol::check_good_name("a/b").unwrap_err().into();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("a/b"));
    }

    #[test]
    fn io_error_keeps_context() {
        let err = ParamError::io(
            "copying FILE",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(err.to_string(), "copying FILE: disk full");
    }

    #[test]
    fn remove_tree_outcomes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("upload");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/FILE"), "x").unwrap();
        assert!(remove_tree(&dir, || "myjob#1".into()).is_none());
        assert!(!dir.exists());
        assert!(remove_tree(&dir, || "myjob#1".into()).is_none());

        // Not a directory: the failure is handed back, not swallowed.
        let file = tmp.path().join("plain");
        fs::write(&file, "x").unwrap();
        let warning = remove_tree(&file, || "myjob#1 parameter FILE".into()).unwrap();
        assert_eq!(warning.resource, file);
        assert_eq!(warning.owner, "myjob#1 parameter FILE");
        assert!(warning.to_string().starts_with("Failed to delete"));
    }
}
