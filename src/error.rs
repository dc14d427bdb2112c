use std::path::PathBuf;

use anyhow::Error as AnyhowError;
use thiserror::Error;

/// Failure kinds raised by the composition layer.
///
/// Library functions return `anyhow::Result`; these variants travel inside it
/// and can be recovered with `err.downcast_ref::<PipeminError>()`.
#[derive(Debug, Error)]
pub enum PipeminError {
    #[error("Configuration layers cannot be merged at '{path}': expected {expected}, found {found}")]
    ConfigurationMerge {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Task '{task}' depends on '{dependency}', which is not registered")]
    DanglingTaskDependency { task: String, dependency: String },

    #[error("Task '{name}' is not registered")]
    UnknownTask { name: String },

    #[error("Fragment '{fragment}' failed: {source}")]
    FragmentExecution {
        fragment: String,
        #[source]
        source: AnyhowError,
    },

    #[error("Filesystem operation failed for '{}': {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipeminError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipeminError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PipeminError::Configuration {
            message: message.into(),
        }
    }
}
