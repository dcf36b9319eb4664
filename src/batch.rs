//! Batch orchestration: bounded fan-out over all images in one event.
//!
//! ## The invocation model
//!
//! [`advance`] is one turn of the external retry loop: it takes the event,
//! dispatches a per-image pipeline for every job under a single concurrency
//! bound, waits for the full join, and returns the mutated event. It never
//! sleeps and never re-invokes itself — computing `retryWait` is as far as
//! it goes; honouring it (and the 25-attempt ceiling) belongs to the host
//! loop, which keeps this function trivially drivable from tests.
//!
//! ## Why spawn each pipeline?
//!
//! Per-image futures are wrapped in `tokio::spawn` before being driven
//! through `buffer_unordered`. The spawn buys panic isolation: a panicking
//! pipeline surfaces as a `JoinError`, which is converted into a failed
//! outcome for that one image instead of unwinding through the batch join.
//! `buffer_unordered` still bounds how many spawned pipelines are in flight
//! at once, so `concurrency` remains the primary knob.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::BatchConfig;
use crate::error::{BatchError, ImageError};
use crate::event::{BatchEvent, ImageOutcome, ImageRequest, ImageStatus};
use crate::pipeline::process::{process_image, PipelineContext};

/// Run one invocation over `event`, returning the mutated event for the
/// external retry orchestrator.
///
/// Jobs flip to `success: true` as their pipelines complete; derived
/// `urlHash` values are written back so later invocations reuse them. If
/// any image failed, `failures` is incremented and `retryWait` set to
/// `5 × failures` seconds; a clean run clears both.
///
/// # Errors
/// Only configuration-level problems are fatal: a missing storage
/// collaborator or an empty `cacheKey`. Every per-image failure is
/// absorbed into the returned event.
pub async fn advance(mut event: BatchEvent, config: &BatchConfig) -> Result<BatchEvent, BatchError> {
    if event.cache_key.is_empty() {
        return Err(BatchError::MissingCacheKey);
    }

    let ctx = PipelineContext {
        storage: config.require_storage()?,
        fetcher: config.resolve_fetcher(),
        config: Arc::new(config.clone()),
        cache_key: event.cache_key.clone(),
    };

    let total = event.images.len();
    let pending = event.pending();
    let concurrency = event.concurrency.max(1);
    info!("Batch start: {total} images ({pending} pending), concurrency {concurrency}");

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total, pending);
    }

    // One task per job, already-successful ones included — those return
    // immediately and keep the index bookkeeping uniform.
    let outcomes: Vec<(usize, Option<ImageOutcome>)> = stream::iter(
        event
            .images
            .iter()
            .enumerate()
            .map(|(idx, job)| {
                let ctx = ctx.clone();
                let already_done = job.success;
                let request = ImageRequest::from_job(job);
                let url = job.url.clone();
                async move {
                    if already_done {
                        return (idx, None);
                    }
                    let outcome = match tokio::spawn(async move {
                        process_image(&ctx, request).await
                    })
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            error!("Pipeline task for {url} panicked: {join_err}");
                            ImageOutcome {
                                url: url.clone(),
                                url_hash: None,
                                status: ImageStatus::Failed(ImageError::TaskPanicked { url }),
                            }
                        }
                    };
                    (idx, Some(outcome))
                }
            })
            .collect::<Vec<_>>(),
    )
    .buffer_unordered(concurrency)
    .collect()
    .await;

    // Apply results after the full join — the event is the only shared
    // mutable state and it has exactly one writer: this function.
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for (idx, outcome) in outcomes {
        let Some(outcome) = outcome else {
            succeeded += 1; // short-circuited idempotent re-entry
            continue;
        };
        if let Some(ref cb) = config.progress_callback {
            cb.on_image_done(&outcome);
        }
        let job = &mut event.images[idx];
        if job.url_hash.is_none() {
            job.url_hash = outcome.url_hash.clone();
        }
        if outcome.is_success() {
            job.success = true;
            succeeded += 1;
        } else {
            failed += 1;
        }
    }

    event.record_invocation(failed > 0);
    info!(
        "Batch complete: {succeeded} succeeded, {failed} failed{}",
        event
            .retry_wait
            .map(|w| format!(", retry in {w}s"))
            .unwrap_or_default()
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(succeeded, failed);
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ImageJob;
    use crate::pipeline::fetch::{ContentFetcher, FetchedImage};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn jpeg_fixture() -> Vec<u8> {
        let img =
            DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, image::Rgb([200, 100, 50])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .expect("encode fixture");
        buf
    }

    /// Fails URLs containing "bad", serves a fixture otherwise.
    struct SelectiveFetcher {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl ContentFetcher for SelectiveFetcher {
        async fn fetch(&self, url: &str) -> Option<FetchedImage> {
            if url.contains("bad") {
                None
            } else {
                Some(FetchedImage {
                    bytes: self.bytes.clone(),
                    content_type: Some("image/jpeg".into()),
                })
            }
        }
    }

    fn config_with(store: Arc<MemoryStore>) -> BatchConfig {
        BatchConfig::builder()
            .storage(store)
            .fetcher(Arc::new(SelectiveFetcher {
                bytes: jpeg_fixture(),
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn clean_run_clears_bookkeeping_and_marks_all() {
        let store = Arc::new(MemoryStore::new());
        let config = config_with(store);
        let event = BatchEvent::new(
            "seed",
            vec![
                "http://a/1.jpg".to_string(),
                "http://a/2.jpg".to_string(),
            ],
        );

        let event = advance(event, &config).await.unwrap();
        assert!(event.is_complete());
        assert_eq!(event.failures, None);
        assert_eq!(event.retry_wait, None);
        assert!(event.images.iter().all(|j| j.url_hash.is_some()));
    }

    #[tokio::test]
    async fn partial_failure_bumps_failures_and_backoff() {
        let store = Arc::new(MemoryStore::new());
        let config = config_with(store);
        let event = BatchEvent::new(
            "seed",
            vec![
                "http://a/ok.jpg".to_string(),
                "http://a/bad.jpg".to_string(),
            ],
        );

        let event = advance(event, &config).await.unwrap();
        assert!(event.images[0].success);
        assert!(!event.images[1].success);
        assert_eq!(event.failures, Some(1));
        assert_eq!(event.retry_wait, Some(5));

        // Second invocation: only the failing job redoes work; failure
        // count keeps climbing linearly.
        let event = advance(event, &config).await.unwrap();
        assert_eq!(event.failures, Some(2));
        assert_eq!(event.retry_wait, Some(10));
    }

    #[tokio::test]
    async fn successful_jobs_are_never_reprocessed() {
        let store = Arc::new(MemoryStore::new());
        let config = config_with(store.clone());
        let mut event = BatchEvent::new("seed", vec!["http://a/1.jpg".to_string()]);
        event.images[0].success = true;

        let event = advance(event, &config).await.unwrap();
        assert!(event.is_complete());
        assert_eq!(store.head_calls(), 0, "no storage traffic for done jobs");
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn empty_cache_key_is_fatal() {
        let config = config_with(Arc::new(MemoryStore::new()));
        let event = BatchEvent::new("", vec!["http://a/1.jpg".to_string()]);
        assert!(matches!(
            advance(event, &config).await,
            Err(BatchError::MissingCacheKey)
        ));
    }

    #[tokio::test]
    async fn missing_storage_is_fatal() {
        let config = BatchConfig::builder().build().unwrap();
        let event = BatchEvent::new("seed", vec!["http://a/1.jpg".to_string()]);
        assert!(matches!(
            advance(event, &config).await,
            Err(BatchError::StorageNotConfigured)
        ));
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped_not_stalled() {
        let store = Arc::new(MemoryStore::new());
        let config = config_with(store);
        let mut event = BatchEvent::new("seed", vec!["http://a/1.jpg".to_string()]);
        event.concurrency = 0;

        let event = advance(event, &config).await.unwrap();
        assert!(event.is_complete());
    }

    #[tokio::test]
    async fn empty_batch_is_trivially_complete() {
        let config = config_with(Arc::new(MemoryStore::new()));
        let event = BatchEvent::new("seed", Vec::<String>::new());
        let event = advance(event, &config).await.unwrap();
        assert!(event.is_complete());
        assert_eq!(event.failures, None);
    }
}
