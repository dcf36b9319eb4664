//! Per-image pipeline: gate → fetch → upload original → derivative fan-out.
//!
//! One invocation of [`process_image`] drives a single image from request to
//! terminal state:
//!
//! ```text
//! request ──▶ hash ──▶ gate ──▶ fetch ──▶ put original ──▶ probe size
//!                  (skip on hit)                              │
//!                              ┌───────── fan-out ────────────┤
//!                              ▼            ▼                 ▼
//!                         transform     transform   …    transform
//!                              ▼            ▼                 ▼
//!                        put 70/70    put 125/125   …   put 720/480
//! ```
//!
//! Steps are strictly sequential except the derivative fan-out, which runs
//! all specs concurrently with no ordering or partial-set visibility
//! guarantee. Every error is converted to a failed [`ImageOutcome`] at this
//! boundary — nothing propagates to sibling images or the batch join. The
//! returned outcome, not an exception, is the contract.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::ImageError;
use crate::event::{ImageOutcome, ImageRequest, ImageStatus};
use crate::pipeline::{fetch, geometry, hash, transform};
use crate::storage::{ObjectPut, ObjectStore, StorageError};

/// Collaborators and knobs shared by every pipeline in one batch.
///
/// Cheap to clone: everything heavy sits behind an `Arc`.
#[derive(Clone)]
pub struct PipelineContext {
    pub storage: Arc<dyn ObjectStore>,
    pub fetcher: Arc<dyn fetch::ContentFetcher>,
    pub config: Arc<BatchConfig>,
    /// Batch-wide hash seed from the event.
    pub cache_key: String,
}

/// Drive one image to a terminal state. Never panics outward, never errors:
/// all failure modes land in the returned outcome.
pub async fn process_image(ctx: &PipelineContext, request: ImageRequest) -> ImageOutcome {
    let url = request.url().to_string();
    if url.is_empty() {
        warn!("No image URL provided");
        return ImageOutcome {
            url,
            url_hash: None,
            status: ImageStatus::Failed(ImageError::MissingUrl),
        };
    }

    // Reuse a producer-supplied hash; otherwise derive. Derivation is
    // deterministic, so retries land on the same keys either way.
    let url_hash = match request.url_hash() {
        Some(h) => h.to_string(),
        None => hash::url_hash(&ctx.cache_key, &url),
    };

    let status = match run_pipeline(ctx, &url, &url_hash).await {
        Ok(status) => status,
        Err(e) => {
            warn!("Error processing {url}: {e}");
            ImageStatus::Failed(e)
        }
    };

    ImageOutcome {
        url,
        url_hash: Some(url_hash),
        status,
    }
}

/// The fallible middle of the pipeline; errors are caught by the caller.
async fn run_pipeline(
    ctx: &PipelineContext,
    url: &str,
    url_hash: &str,
) -> Result<ImageStatus, ImageError> {
    // ── Dedup gate ───────────────────────────────────────────────────────
    // The first spec's key stands proxy for the full derivative set having
    // been written by a prior run.
    if let Some(canonical) = hash::canonical_key(&ctx.config.targets, url_hash) {
        if head(&ctx.storage, &canonical).await?.is_some() {
            info!("Skipping {url} because {url_hash} already exists");
            return Ok(ImageStatus::Skipped);
        }
    }

    info!("Processing {url}");

    // ── Fetch ────────────────────────────────────────────────────────────
    let normalized = fetch::normalize_url(url);
    let fetched = ctx
        .fetcher
        .fetch(&normalized)
        .await
        .ok_or_else(|| ImageError::FetchFailed {
            url: normalized.clone(),
        })?;

    // ── Upload original ──────────────────────────────────────────────────
    let original_key = hash::original_key(url_hash);
    put(
        &ctx.storage,
        ObjectPut {
            key: original_key,
            body: fetched.bytes.clone(),
            cache_control: ctx.config.original_cache_control.clone(),
            content_type: fetched.content_type.clone(),
        },
    )
    .await?;

    // ── Geometry input ───────────────────────────────────────────────────
    let source = transform::probe_size(&fetched.bytes, &normalized)?;
    let format = transform::infer_format(&normalized);
    debug!(
        "Source {normalized} is {}x{} ({:?})",
        source.width, source.height, format
    );

    // ── Derivative fan-out ───────────────────────────────────────────────
    // All specs run concurrently; each owns its own decode. No partial-set
    // visibility guarantee is made to concurrent readers mid-flight.
    let uploads = ctx.config.targets.iter().map(|&spec| {
        let bytes = fetched.bytes.clone();
        let content_type = fetched.content_type.clone();
        let normalized = normalized.clone();
        async move {
            produce_derivative(ctx, bytes, format, source, spec, &normalized, url_hash, content_type)
                .await
        }
    });
    try_join_all(uploads).await?;

    Ok(ImageStatus::Done)
}

/// Transform one spec and upload the result under its resolved dimensions.
#[allow(clippy::too_many_arguments)]
async fn produce_derivative(
    ctx: &PipelineContext,
    bytes: Vec<u8>,
    format: image::ImageFormat,
    source: geometry::SourceSize,
    spec: geometry::TargetSpec,
    url: &str,
    url_hash: &str,
    content_type: Option<String>,
) -> Result<(), ImageError> {
    let resolved = geometry::resolve(source, spec);
    let body = transform::transform(bytes, format, source, spec, url).await?;
    let key = hash::derivative_key(resolved.output_width, resolved.output_height, url_hash);
    put(
        &ctx.storage,
        ObjectPut {
            key,
            body,
            cache_control: ctx.config.derivative_cache_control.clone(),
            content_type,
        },
    )
    .await
}

async fn head(
    storage: &Arc<dyn ObjectStore>,
    key: &str,
) -> Result<Option<crate::storage::ObjectMeta>, ImageError> {
    storage
        .head_object(key)
        .await
        .map_err(|e| storage_error(key, e))
}

async fn put(storage: &Arc<dyn ObjectStore>, request: ObjectPut) -> Result<(), ImageError> {
    let key = request.key.clone();
    storage
        .put_object(request)
        .await
        .map_err(|e| storage_error(&key, e))
}

fn storage_error(key: &str, e: StorageError) -> ImageError {
    ImageError::Storage {
        key: key.to_string(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ImageRef;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([10, 20, 30]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .expect("encode fixture");
        buf
    }

    /// Serves one fixed image for every URL, counting calls.
    struct StubFetcher {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn jpeg(width: u32, height: u32) -> Self {
            Self {
                bytes: jpeg_fixture(width, height),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl fetch::ContentFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> Option<fetch::FetchedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(fetch::FetchedImage {
                bytes: self.bytes.clone(),
                content_type: Some("image/jpeg".into()),
            })
        }
    }

    /// Always returns not-found.
    struct FailingFetcher;

    #[async_trait]
    impl fetch::ContentFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> Option<fetch::FetchedImage> {
            None
        }
    }

    fn context(
        store: Arc<MemoryStore>,
        fetcher: Arc<dyn fetch::ContentFetcher>,
    ) -> PipelineContext {
        PipelineContext {
            storage: store,
            fetcher,
            config: Arc::new(BatchConfig::default()),
            cache_key: "test-seed".to_string(),
        }
    }

    fn request(url: &str) -> ImageRequest {
        ImageRequest::Nested {
            image: ImageRef {
                url: url.to_string(),
                url_hash: None,
            },
        }
    }

    #[tokio::test]
    async fn full_pipeline_writes_original_and_all_derivatives() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::jpeg(800, 600));
        let ctx = context(store.clone(), fetcher.clone());

        let outcome = process_image(&ctx, request("http://cdn.example.com/a.jpg")).await;
        assert!(matches!(outcome.status, ImageStatus::Done));

        let h = outcome.url_hash.unwrap();
        assert!(store.contains(&format!("original/{h}")));
        for spec in &ctx.config.targets {
            assert!(
                store.contains(&hash::derivative_key(spec.width, spec.height, &h)),
                "missing {}x{}",
                spec.width,
                spec.height
            );
        }
        // 1 original + 5 derivatives
        assert_eq!(store.put_calls(), 6);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_before_fetch() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::jpeg(800, 600));
        let ctx = context(store.clone(), fetcher.clone());

        let h = hash::url_hash("test-seed", "http://cdn.example.com/a.jpg");
        store.seed(&format!("70/70/{h}"), vec![1, 2, 3]);

        let outcome = process_image(&ctx, request("http://cdn.example.com/a.jpg")).await;
        assert!(matches!(outcome.status, ImageStatus::Skipped));
        assert_eq!(fetcher.calls(), 0, "fetcher must not be called on a hit");
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_a_failed_outcome() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), Arc::new(FailingFetcher));

        let outcome = process_image(&ctx, request("http://cdn.example.com/gone.jpg")).await;
        match outcome.status {
            ImageStatus::Failed(ImageError::FetchFailed { url }) => {
                assert!(url.contains("gone.jpg"));
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn undecodable_body_fails_after_original_upload() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher {
            bytes: b"not an image".to_vec(),
            calls: AtomicUsize::new(0),
        });
        let ctx = context(store.clone(), fetcher);

        let outcome = process_image(&ctx, request("http://cdn.example.com/bad.jpg")).await;
        assert!(matches!(
            outcome.status,
            ImageStatus::Failed(ImageError::Decode { .. })
        ));
        // The original was uploaded before decoding was attempted.
        assert_eq!(store.put_calls(), 1);
    }

    #[tokio::test]
    async fn supplied_hash_is_reused_not_rederived() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::jpeg(100, 100));
        let ctx = context(store.clone(), fetcher);

        let outcome = process_image(
            &ctx,
            ImageRequest::Nested {
                image: ImageRef {
                    url: "http://cdn.example.com/a.jpg".into(),
                    url_hash: Some("feedbeef".into()),
                },
            },
        )
        .await;
        assert_eq!(outcome.url_hash.as_deref(), Some("feedbeef"));
        assert!(store.contains("original/feedbeef"));
    }

    #[tokio::test]
    async fn scheme_less_url_is_normalized_for_fetch() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::jpeg(100, 100));
        let ctx = context(store.clone(), fetcher);

        let outcome = process_image(&ctx, request("//cdn.example.com/a.jpg")).await;
        assert!(matches!(outcome.status, ImageStatus::Done));
        // The outcome reports the original, un-rewritten URL.
        assert_eq!(outcome.url, "//cdn.example.com/a.jpg");
    }
}
