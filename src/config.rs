//! Configuration for batch processing.
//!
//! Everything the pipeline consumes beyond the event itself lives in one
//! [`BatchConfig`]: the target spec list, cache-header strings, the fetch
//! timeout, and the injected collaborators (storage, fetcher, progress).
//! Built via [`BatchConfig::builder()`] so callers set only what they care
//! about; the defaults reproduce the canonical five-derivative layout.
//!
//! Note what is *not* here: `concurrency` and `cacheKey` travel in the
//! [`crate::event::BatchEvent`], because they are per-batch wire state
//! owned by the event producer, not deployment configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BatchError;
use crate::pipeline::fetch::{ContentFetcher, HttpFetcher, FETCH_TIMEOUT_SECS};
use crate::pipeline::geometry::TargetSpec;
use crate::progress::BatchProgressCallback;
use crate::storage::ObjectStore;

/// The canonical derivative set, in order. The first entry is the
/// existence-probe key for the dedup gate.
pub const DEFAULT_TARGETS: [TargetSpec; 5] = [
    TargetSpec::new(70, 70, true),
    TargetSpec::new(125, 125, true),
    TargetSpec::new(250, 250, true),
    TargetSpec::new(360, 240, true),
    TargetSpec::new(720, 480, true),
];

/// `Cache-Control` stored with canonical originals (one year).
pub const ORIGINAL_CACHE_CONTROL: &str = "max-age=31536000";

/// `Cache-Control` stored with derivatives (thirty days).
pub const DERIVATIVE_CACHE_CONTROL: &str = "max-age=2592000";

/// Configuration for a batch run.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use imgmill::{BatchConfig, MemoryStore};
///
/// let config = BatchConfig::builder()
///     .storage(Arc::new(MemoryStore::new()))
///     .fetch_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Ordered derivative specs produced per image. The first is the
    /// canonical existence-check key. Default: [`DEFAULT_TARGETS`].
    pub targets: Vec<TargetSpec>,

    /// Per-request fetch timeout in seconds. Default: 60.
    pub fetch_timeout_secs: u64,

    /// Cache header for the stored original. Default: one year.
    pub original_cache_control: String,

    /// Cache header for stored derivatives. Default: thirty days.
    pub derivative_cache_control: String,

    /// The storage collaborator. Required; `advance` fails fatally without
    /// it.
    pub storage: Option<Arc<dyn ObjectStore>>,

    /// Content fetcher override. `None` builds an [`HttpFetcher`] with
    /// `fetch_timeout_secs` at dispatch time; tests inject stubs here.
    pub fetcher: Option<Arc<dyn ContentFetcher>>,

    /// Optional per-image progress events.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            targets: DEFAULT_TARGETS.to_vec(),
            fetch_timeout_secs: FETCH_TIMEOUT_SECS,
            original_cache_control: ORIGINAL_CACHE_CONTROL.to_string(),
            derivative_cache_control: DERIVATIVE_CACHE_CONTROL.to_string(),
            storage: None,
            fetcher: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("targets", &self.targets)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("original_cache_control", &self.original_cache_control)
            .field("derivative_cache_control", &self.derivative_cache_control)
            .field("storage", &self.storage.as_ref().map(|_| "<dyn ObjectStore>"))
            .field("fetcher", &self.fetcher.as_ref().map(|_| "<dyn ContentFetcher>"))
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured storage, or the fatal error `advance` reports.
    pub(crate) fn require_storage(&self) -> Result<Arc<dyn ObjectStore>, BatchError> {
        self.storage
            .as_ref()
            .cloned()
            .ok_or(BatchError::StorageNotConfigured)
    }

    /// The configured fetcher, or a fresh [`HttpFetcher`] with this
    /// config's timeout.
    pub(crate) fn resolve_fetcher(&self) -> Arc<dyn ContentFetcher> {
        self.fetcher.as_ref().cloned().unwrap_or_else(|| {
            Arc::new(HttpFetcher::with_timeout(Duration::from_secs(
                self.fetch_timeout_secs,
            )))
        })
    }
}

/// Builder for [`BatchConfig`].
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn targets(mut self, targets: Vec<TargetSpec>) -> Self {
        self.config.targets = targets;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn original_cache_control(mut self, value: impl Into<String>) -> Self {
        self.config.original_cache_control = value.into();
        self
    }

    pub fn derivative_cache_control(mut self, value: impl Into<String>) -> Self {
        self.config.derivative_cache_control = value.into();
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ObjectStore>) -> Self {
        self.config.storage = Some(storage);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.config.fetcher = Some(fetcher);
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        if self.config.targets.is_empty() {
            return Err(BatchError::InvalidConfig(
                "at least one target spec is required (the first doubles as the dedup key)"
                    .into(),
            ));
        }
        Ok(self.config)
    }
}
