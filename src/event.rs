//! The batch event: wire contract between imgmill and its retry harness.
//!
//! ## Why the event *is* the checkpoint
//!
//! The batch job keeps no state of its own between invocations. The caller
//! passes a [`BatchEvent`] in, gets a mutated [`BatchEvent`] back, and
//! re-submits it verbatim until every job carries `success: true` or a retry
//! ceiling is hit. Jobs that already succeeded are skipped idempotently, so a
//! partially-failed batch can be resubmitted wholesale — only the failing
//! tail redoes work. No queue, no database, no side channel.
//!
//! Field names are serialised in camelCase to stay byte-compatible with the
//! JSON payloads produced by existing event producers (`cacheKey`,
//! `urlHash`, `retryWait`).

use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// Seconds of recommended wait per accumulated failure (linear backoff).
pub const RETRY_WAIT_STEP_SECS: u64 = 5;

/// Default number of simultaneously in-flight per-image pipelines.
pub const DEFAULT_CONCURRENCY: usize = 10;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One element of the batch: a source URL plus its retry bookkeeping.
///
/// Mutable across invocations: `url_hash` is written back once derived (so
/// later invocations reuse it instead of re-deriving) and `success` flips to
/// `true` exactly once, after which the job is never reprocessed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageJob {
    /// Source image URL. May be protocol-relative or missing a scheme;
    /// normalised at fetch time, never rewritten in the payload.
    pub url: String,

    /// HMAC-SHA1 hex digest of `url` keyed by the batch `cacheKey`.
    /// Deterministic, so absent simply means "not derived yet".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_hash: Option<String>,

    /// Set once all uploads for this job completed in some invocation.
    /// Omitted from JSON while false to keep payloads minimal.
    #[serde(default, skip_serializing_if = "is_false")]
    pub success: bool,
}

impl ImageJob {
    /// A fresh, unprocessed job for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            url_hash: None,
            success: false,
        }
    }
}

/// The full batch payload: unit of work *and* of returned state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEvent {
    /// Jobs in producer order. Order is preserved across invocations; the
    /// orchestrator dispatches all of them (successful ones short-circuit).
    pub images: Vec<ImageJob>,

    /// Maximum simultaneous per-image pipelines. Defaults to 10.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Batch-wide secret seeding the urlHash namespace. Changing it
    /// invalidates every previously stored derivative for this batch.
    pub cache_key: String,

    /// Count of consecutive invocations that ended with ≥1 unsuccessful
    /// job. Absent means zero; cleared on a fully successful invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<u32>,

    /// Seconds the retry harness should wait before re-invoking.
    /// Derived (`5 × failures`), never authoritative input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_wait: Option<u64>,
}

impl BatchEvent {
    /// Build an event over `urls` with the given hash seed and defaults.
    pub fn new(cache_key: impl Into<String>, urls: impl IntoIterator<Item = String>) -> Self {
        Self {
            images: urls.into_iter().map(ImageJob::new).collect(),
            concurrency: DEFAULT_CONCURRENCY,
            cache_key: cache_key.into(),
            failures: None,
            retry_wait: None,
        }
    }

    /// True when no job remains unsuccessful — the harness stops re-invoking.
    pub fn is_complete(&self) -> bool {
        self.images.iter().all(|j| j.success)
    }

    /// Number of jobs still awaiting success.
    pub fn pending(&self) -> usize {
        self.images.iter().filter(|j| !j.success).count()
    }

    /// Record the aggregate result of one invocation.
    ///
    /// Any failure bumps `failures` and recomputes the linear backoff;
    /// a clean invocation clears both fields so they vanish from the JSON.
    pub fn record_invocation(&mut self, had_failure: bool) {
        if had_failure {
            let failures = self.failures.unwrap_or(0) + 1;
            self.failures = Some(failures);
            self.retry_wait = Some(RETRY_WAIT_STEP_SECS * u64::from(failures));
        } else {
            self.failures = None;
            self.retry_wait = None;
        }
    }
}

/// Reference to one image inside the nested request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_hash: Option<String>,
}

/// Per-image input accepted by the pipeline entry point.
///
/// Two wire shapes resolve identically: the current nested form
/// `{"image": {"url": ..., "urlHash": ...}}` and the legacy flat form
/// `{"imageUrl": ...}`. Kept as an untagged enum so existing producers of
/// either shape keep working unchanged.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageRequest {
    Nested { image: ImageRef },
    #[serde(rename_all = "camelCase")]
    Legacy { image_url: String },
}

impl ImageRequest {
    /// Build the nested shape from job fields.
    pub fn from_job(job: &ImageJob) -> Self {
        ImageRequest::Nested {
            image: ImageRef {
                url: job.url.clone(),
                url_hash: job.url_hash.clone(),
            },
        }
    }

    /// The source URL, whichever shape carried it.
    pub fn url(&self) -> &str {
        match self {
            ImageRequest::Nested { image } => &image.url,
            ImageRequest::Legacy { image_url } => image_url,
        }
    }

    /// A pre-derived urlHash, if the producer supplied one.
    pub fn url_hash(&self) -> Option<&str> {
        match self {
            ImageRequest::Nested { image } => image.url_hash.as_deref(),
            ImageRequest::Legacy { .. } => None,
        }
    }
}

/// Terminal state of one per-image pipeline run.
#[derive(Debug, Clone)]
pub enum ImageStatus {
    /// All uploads completed in this invocation.
    Done,
    /// Canonical derivative already existed; nothing fetched or written.
    Skipped,
    /// Pipeline failed; the job stays unsuccessful for the next invocation.
    Failed(ImageError),
}

/// Result of one per-image pipeline, threaded back to the orchestrator
/// instead of an exception crossing the task boundary.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    /// The (un-normalised) source URL, for diagnostics.
    pub url: String,
    /// The derived or reused hash; absent only when the request had no URL.
    pub url_hash: Option<String>,
    pub status: ImageStatus,
}

impl ImageOutcome {
    /// Both `Done` and `Skipped` count as success for batch aggregation.
    pub fn is_success(&self) -> bool {
        !matches!(self.status, ImageStatus::Failed(_))
    }
}
