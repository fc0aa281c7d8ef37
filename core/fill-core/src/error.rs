//! Error types for fill-core operations.
//!
//! A missing OTP field is not an error: detection misses are reported through
//! [`crate::FillOutcome`]. These variants cover pages that cannot be read or
//! refuse a scripted write.

use crate::page::ElementId;

#[derive(Debug, thiserror::Error)]
pub enum FillError {
    // ─────────────────────────────────────────────────────────────────────
    // Snapshot Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Page snapshot is invalid: {0}")]
    InvalidSnapshot(String),

    #[error("Page snapshot could not be parsed: {source}")]
    SnapshotJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("Page is not reachable: {0}")]
    PageUnavailable(String),

    // ─────────────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Element not found on page: {0}")]
    UnknownElement(ElementId),

    #[error("Page rejected write to {element}: {reason}")]
    WriteRejected { element: ElementId, reason: String },
}

pub type Result<T> = std::result::Result<T, FillError>;
