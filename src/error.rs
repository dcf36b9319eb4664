//! Error types for the imgmill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] — **Fatal**: the batch cannot be dispatched at all
//!   (no storage collaborator configured, empty hash seed).
//!   Returned as `Err(BatchError)` from [`crate::batch::advance`].
//!
//! * [`ImageError`] — **Non-fatal**: a single image failed (fetch timeout,
//!   undecodable bytes, storage write error) but all other images are fine.
//!   Carried inside [`crate::event::ImageOutcome`] so the orchestrator can
//!   aggregate partial success rather than losing the whole batch to one
//!   bad URL.
//!
//! The separation mirrors the retry model: an `ImageError` leaves the job's
//! `success` flag unset and is recovered by the *next* invocation of the
//! batch; a `BatchError` means there is nothing a re-invocation could fix.

use thiserror::Error;

/// All fatal errors returned by the imgmill library.
///
/// Per-image failures use [`ImageError`] and are stored in
/// [`crate::event::ImageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    /// No [`crate::storage::ObjectStore`] was injected into the config.
    #[error("No object storage configured.\nInject one with BatchConfig::builder().storage(...).")]
    StorageNotConfigured,

    /// Builder or event validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The event payload is missing its batch-wide hash seed.
    #[error("Batch event has an empty cacheKey; urlHash derivation needs a non-empty seed")]
    MissingCacheKey,
}

/// A non-fatal error for a single image.
///
/// Swallowed at the per-image pipeline boundary, logged with the offending
/// URL, and converted into a failed [`crate::event::ImageOutcome`]. The
/// batch continues; the job is retried on the next invocation.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// The per-image request carried neither `image.url` nor `imageUrl`.
    #[error("No image URL provided in request")]
    MissingUrl,

    /// The fetcher could not retrieve the image (timeout, non-200 status,
    /// transport error — all collapsed to not-found by design).
    #[error("Could not fetch '{url}'")]
    FetchFailed { url: String },

    /// The fetched bytes are not a decodable image.
    #[error("Decode failed for '{url}': {detail}")]
    Decode { url: String, detail: String },

    /// Re-encoding the transformed image failed.
    #[error("Encode failed for '{url}': {detail}")]
    Encode { url: String, detail: String },

    /// A storage write or probe failed on the transport level.
    #[error("Storage operation failed for key '{key}': {detail}")]
    Storage { key: String, detail: String },

    /// The spawned pipeline task panicked; treated like any other
    /// per-image failure so one bug cannot crash the batch.
    #[error("Pipeline task panicked for '{url}'")]
    TaskPanicked { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failed_display_includes_url() {
        let e = ImageError::FetchFailed {
            url: "http://cdn.example.com/a.jpg".into(),
        };
        assert!(e.to_string().contains("cdn.example.com/a.jpg"));
    }

    #[test]
    fn storage_display_includes_key() {
        let e = ImageError::Storage {
            key: "70/70/abc".into(),
            detail: "connection reset".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("70/70/abc"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn missing_cache_key_display() {
        let e = BatchError::MissingCacheKey;
        assert!(e.to_string().contains("cacheKey"));
    }
}
