//! Sequential batch conversion against a running service.
//!
//! Files are converted strictly one after another, in the order given. For
//! each [`FileJob`]:
//!
//! 1. skip it if the output exists and `overwrite` is off,
//! 2. create the output's parent directory,
//! 3. convert through [`ConversionClient`] (sync or async-task mode),
//! 4. write the Markdown atomically (temp file + rename),
//! 5. record a [`FileReport`].
//!
//! Nothing a single file does can stop the batch: HTTP errors, malformed
//! responses, unreadable inputs and unwritable outputs are all recorded as a
//! failed [`ConversionResult`] for that file. Cancellation is the caller's
//! business (see [`crate::service::ServiceManager::run_scoped`]); files
//! already written stay written. A run cancelled between the temp write and
//! the rename leaves a `<stem>.md.tmp` next to the output; a failed write or
//! rename removes it.

use crate::client::ConversionClient;
use crate::config::{ConversionMode, ConversionOptions};
use crate::error::MdifyError;
use crate::output::{BatchSummary, ConversionRequest, ConversionResult, FileJob, FileReport};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Convert every job in order against `base_url`.
pub async fn convert_batch(
    client: &ConversionClient,
    base_url: &str,
    jobs: &[FileJob],
    options: &ConversionOptions,
) -> BatchSummary {
    let batch_start = Instant::now();
    let total = jobs.len();
    let cb = options.progress_callback.as_ref();
    info!("Converting {} file(s) via {}", total, base_url);

    if let Some(cb) = cb {
        cb.on_batch_start(total);
    }

    let mut reports = Vec::with_capacity(total);
    for (i, job) in jobs.iter().enumerate() {
        let index = i + 1;

        if !options.overwrite && tokio::fs::try_exists(&job.output).await.unwrap_or(false) {
            info!("[{}/{}] Skipped (exists): {}", index, total, job.output.display());
            if let Some(cb) = cb {
                cb.on_file_skipped(index, total, &job.input);
            }
            reports.push(FileReport {
                input: job.input.clone(),
                output: job.output.clone(),
                result: None,
                duration_ms: 0,
            });
            continue;
        }

        if let Some(cb) = cb {
            cb.on_file_start(index, total, &job.input);
        }
        let file_start = Instant::now();
        let result = convert_one(client, base_url, job, options).await;
        let duration_ms = file_start.elapsed().as_millis() as u64;

        if result.success {
            info!("[{}/{}] {} ✓ ({}ms)", index, total, job.input.display(), duration_ms);
            if let Some(cb) = cb {
                cb.on_file_complete(index, total, &job.input, result.content.len());
            }
        } else {
            let msg = result.error.as_deref().unwrap_or("Unknown error");
            warn!("[{}/{}] {} ✗ {}", index, total, job.input.display(), msg);
            if let Some(cb) = cb {
                cb.on_file_error(index, total, &job.input, msg);
            }
        }

        reports.push(FileReport {
            input: job.input.clone(),
            output: job.output.clone(),
            result: Some(result),
            duration_ms,
        });
    }

    let summary = BatchSummary {
        reports,
        total_duration_ms: batch_start.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {} succeeded, {} skipped, {} failed in {}ms",
        summary.succeeded(),
        summary.skipped(),
        summary.failed(),
        summary.total_duration_ms
    );
    if let Some(cb) = cb {
        cb.on_batch_complete(&summary);
    }
    summary
}

/// Convert and persist one file. Every error ends up in the result.
async fn convert_one(
    client: &ConversionClient,
    base_url: &str,
    job: &FileJob,
    options: &ConversionOptions,
) -> ConversionResult {
    let request = ConversionRequest::new(&job.input)
        .with_format(options.to_format.clone())
        .with_ocr(options.do_ocr);

    let converted = match options.mode {
        ConversionMode::Sync => client.convert_file(base_url, &request).await,
        ConversionMode::AsyncTask => {
            client
                .convert_via_task(
                    base_url,
                    &request,
                    Duration::from_millis(options.task_poll_interval_ms),
                    Duration::from_secs(options.task_timeout_secs),
                )
                .await
        }
    };

    let result = match converted {
        Ok(result) => result,
        Err(e) => return ConversionResult::failure(&request.to_format, e.to_string()),
    };
    if !result.success {
        return result;
    }

    match write_atomic(&job.output, &result.content).await {
        Ok(()) => result,
        Err(e) => ConversionResult::failure(&result.format, e.to_string()),
    }
}

/// Write `content` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, content: &str) -> Result<(), MdifyError> {
    let write_failed = |source| MdifyError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
    }

    let tmp_path = path.with_extension("md.tmp");
    let written = match tokio::fs::write(&tmp_path, content).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            debug!("Could not remove {}: {}", tmp_path.display(), cleanup);
        }
        return Err(write_failed(e));
    }
    Ok(())
}
