//! Progress-callback trait for per-image batch events.
//!
//! Inject an `Arc<dyn BatchProgressCallback>` via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! real-time events as the orchestrator works through a batch — the CLI
//! wires this to a terminal progress bar, embedders can forward events to
//! channels, metrics, or logs without the library knowing how.
//!
//! Images complete in arbitrary order under concurrency, so implementations
//! must be `Send + Sync` and protect any shared mutable state. All methods
//! default to no-ops; override only what you need.

use crate::event::ImageOutcome;

/// Called by the batch orchestrator as images complete.
pub trait BatchProgressCallback: Send + Sync {
    /// Fired once per invocation, before any pipeline is dispatched.
    /// `total` is the full job count, `pending` the not-yet-successful part.
    fn on_batch_start(&self, total: usize, pending: usize) {
        let _ = (total, pending);
    }

    /// Fired as each per-image pipeline reaches a terminal state
    /// (done, skipped, or failed). Completion order is arbitrary.
    fn on_image_done(&self, outcome: &ImageOutcome) {
        let _ = outcome;
    }

    /// Fired once after the join, with the aggregate of this invocation.
    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}
