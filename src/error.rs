//! Error types for bundling and unbundling operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for bundler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bundler error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error with no associated file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error while opening, reading or writing a named file
    #[error("{}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unknown value passed for the input files type
    #[error("'{0}': invalid file type specified")]
    InvalidFilesType(String),

    /// Structural damage in a static-library archive
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The external object-copy tool exited with a nonzero status
    #[error("'{tool}' tool failed with exit code {code}")]
    ToolFailure { tool: String, code: i32 },

    /// Requested targets with no bundle in the container
    #[error("{}", missing_bundles_message(.0))]
    MissingBundles(Vec<String>),

    /// A host bundle was requested but none was found
    #[error("Can't find bundle for the host target")]
    MissingHost,

    /// An archive held no code object compatible with the requested target
    #[error(
        "no compatible code object found for the target '{target}' in \
         heterogeneous archive library: {archive}"
    )]
    NoCompatibleForTarget { target: String, archive: String },

    /// Programming error (state machine misuse, impossible input)
    #[error("internal error: {0}")]
    Internal(String),
}

/// "Can't find bundles for A, B, and C" with the list already sorted.
fn missing_bundles_message(targets: &[String]) -> String {
    let mut msg = String::from("Can't find bundles for");
    let last = targets.len().saturating_sub(1);
    for (i, target) in targets.iter().enumerate() {
        if i != 0 && last > 1 {
            msg.push(',');
        }
        msg.push(' ');
        if i == last && i != 0 {
            msg.push_str("and ");
        }
        msg.push_str(target);
    }
    msg
}
