//! # imgmill
//!
//! Batch image derivative pipeline: fetch remote images, deduplicate them by
//! content-addressed hash, and upload a fixed set of resized/cropped
//! derivatives to object storage — as a retryable, bounded-concurrency batch
//! job.
//!
//! ## Why a batch event, not a queue?
//!
//! The job keeps no state between invocations. The [`BatchEvent`] passed in
//! is mutated and returned; the caller re-invokes with the returned event
//! until every job succeeds or a retry ceiling (25 invocations) is reached.
//! Jobs that already succeeded short-circuit idempotently, so a partially
//! failed batch is resubmitted wholesale and only the failing tail redoes
//! work. The event *is* the checkpoint — no database, no side channel.
//!
//! ## Pipeline Overview
//!
//! ```text
//! BatchEvent
//!  │
//!  ├─ 1. Dispatch  one per-image pipeline per job, bounded by `concurrency`
//!  ├─ 2. Gate      HMAC-SHA1 urlHash; head the canonical derivative key
//!  ├─ 3. Fetch     GET with 60 s timeout and http/https 404 fallback
//!  ├─ 4. Original  upload source bytes under original/{urlHash}
//!  ├─ 5. Fan-out   resize/crop each target spec concurrently (Lanczos3)
//!  └─ 6. Aggregate flip success flags, update failures / retryWait
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imgmill::{advance, BatchConfig, BatchEvent, FsStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .storage(Arc::new(FsStore::new("./derivatives")))
//!         .build()?;
//!
//!     let mut event = BatchEvent::new(
//!         "batch-secret",
//!         vec!["https://cdn.example.com/a.jpg".to_string()],
//!     );
//!
//!     // One turn of the retry loop; the host decides whether to re-invoke.
//!     event = advance(event, &config).await?;
//!     println!("pending: {}", event.pending());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgmill` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! imgmill = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod progress;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::advance;
pub use config::{
    BatchConfig, BatchConfigBuilder, DEFAULT_TARGETS, DERIVATIVE_CACHE_CONTROL,
    ORIGINAL_CACHE_CONTROL,
};
pub use error::{BatchError, ImageError};
pub use event::{
    BatchEvent, ImageJob, ImageOutcome, ImageRef, ImageRequest, ImageStatus, DEFAULT_CONCURRENCY,
    RETRY_WAIT_STEP_SECS,
};
pub use pipeline::fetch::{ContentFetcher, FetchedImage, HttpFetcher};
pub use pipeline::geometry::{CropBox, ResolvedGeometry, SourceSize, TargetSpec};
pub use pipeline::process::{process_image, PipelineContext};
pub use progress::BatchProgressCallback;
pub use storage::{FsStore, MemoryStore, ObjectMeta, ObjectPut, ObjectStore, StorageError};
