//! Progress-callback trait for service and per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionOptions::progress_callback`] to receive events
//! as the service starts and each file is converted. The CLI drives its
//! spinner from these; nothing in the library depends on what a callback
//! does, so a slow or noisy implementation cannot change conversion order
//! or results.
//!
//! # Example
//!
//! ```rust
//! use mdify::{BatchProgressCallback, ConversionOptions};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, input: &Path, content_len: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{index}/{total}] {} ({content_len} chars)", input.display());
//!     }
//! }
//!
//! let options = ConversionOptions {
//!     progress_callback: Some(Arc::new(CountingCallback { done: AtomicUsize::new(0) })),
//!     ..ConversionOptions::default()
//! };
//! ```

use crate::output::BatchSummary;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Receives lifecycle and batch events. All methods default to no-ops.
///
/// `index` is 1-based. Events for one file always arrive in the order
/// start → complete | error; skipped files get only `on_file_skipped`.
pub trait BatchProgressCallback: Send + Sync {
    /// The manager is about to sweep stale instances and launch `image`.
    fn on_service_starting(&self, image: &str) {
        let _ = image;
    }

    /// `/health` answered 200 after `elapsed`.
    fn on_service_ready(&self, elapsed: Duration) {
        let _ = elapsed;
    }

    /// Called once before the first file.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before the file is uploaded.
    fn on_file_start(&self, index: usize, total: usize, input: &Path) {
        let _ = (index, total, input);
    }

    /// The output already existed and overwrite is off.
    fn on_file_skipped(&self, index: usize, total: usize, input: &Path) {
        let _ = (index, total, input);
    }

    /// Markdown written; `content_len` is its byte length.
    fn on_file_complete(&self, index: usize, total: usize, input: &Path, content_len: usize) {
        let _ = (index, total, input, content_len);
    }

    /// The file failed; the batch continues.
    fn on_file_error(&self, index: usize, total: usize, input: &Path, error: &str) {
        let _ = (index, total, input, error);
    }

    /// Called once after the last file.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in
/// [`crate::config::ConversionOptions`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
