//! CLI errors.

use pollstore_core::Fault;
use thiserror::Error;

/// Errors surfaced to the user by the `pollstore` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// A backend could not complete an operation.
    #[error(transparent)]
    Backend(#[from] Fault),

    /// The requested operation is not available in this build or for this backend.
    #[error("{0}")]
    Unsupported(String),

    /// Every selected backend was skipped.
    #[error("no backend was reachable")]
    NothingRan,
}
