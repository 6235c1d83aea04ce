//! Fatal pipeline errors.
//!
//! Only the variants here abort a run early. Extraction, enrichment, and
//! publish-step failures degrade in place and are carried as values, not
//! errors (see `pipeline`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Sender does not match the configured authorized identity. Rejected
    /// before any file or database side effect.
    #[error("unauthorized sender: {0}")]
    UnauthorizedSender(i64),

    /// Raw storage write failed. No partial artifact remains and no later
    /// stage runs — in particular, no enrichment call is made.
    #[error("raw storage write failed: {0}")]
    StorageWrite(String),

    /// Metadata could not be committed. The raw file stays on disk and is
    /// picked up by startup reconciliation.
    #[error("metadata persistence failed: {0}")]
    MetadataPersist(String),
}
