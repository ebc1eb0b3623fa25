use crate::checksum::Checksum;
use crate::exec::ExecutionError;
use crate::fetch::FetchError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(
        "Operation already in progress for {name}\n\
         Another active process is already using {name}.\n\
         Please wait for it to finish or terminate it to continue."
    )]
    OperationInProgress { name: String },

    #[error(
        "{} mismatch\nExpected: {}\n  Actual: {}\n    File: {}\n\
         To retry an incomplete download, remove the file above.",
        .expected.algorithm().as_str().to_uppercase(),
        .expected.digest(),
        .actual.digest(),
        .path.display()
    )]
    ChecksumMismatch {
        expected: Checksum,
        actual: Checksum,
        path: PathBuf,
    },

    #[error(
        "The following formula cannot be installed from a bottle and must be\n\
         built from source.\n  {name}\n\
         Install a C compiler toolchain (e.g. the Command Line Tools) to build it."
    )]
    BuildTools { name: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("{name}: formulae require at least a URL")]
    IncompleteSpec { name: String },

    #[error("No available formula with the name \"{name}\".{}", suggestion_hint(.suggestion))]
    FormulaNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Empty installation: {0}")]
    EmptyInstallation(String),

    #[error("No such keg: {0}")]
    NotInstalled(String),

    #[error("Refusing to uninstall {name} because it is required by {}", .dependents.join(", "))]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" Did you mean {}?", s),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
