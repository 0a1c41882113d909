//! HTTP client for the docling-serve REST API.
//!
//! All calls take the service base URL explicitly so the same client can be
//! pointed at a managed container, an already-running service, or a mock in
//! tests.
//!
//! ## Failure policy
//!
//! | Condition | `convert_file` / `fetch_result` | `submit_async` / `poll_status` |
//! |-----------|----------------------------------|--------------------------------|
//! | transport (refused, reset, timeout) | `Ok(failed result)` | `Err(Transport)` |
//! | non-200 | `Err(Http)` | `Err(Http)` |
//! | 200, body not JSON or a scalar | `Err(MalformedResponse)` | `Err(MalformedResponse)` |
//! | 200, no `task_id` | n/a | `Err(MalformedResponse)` |
//!
//! Transport failures on the conversion calls come back as data so one dead
//! request does not abort a batch; the task calls have no result to carry
//! the failure in, so they raise.

pub mod extract;

use crate::error::MdifyError;
use crate::output::{AsyncTaskHandle, ConversionRequest, ConversionResult, TaskStatus};
use extract::{extract_content, extract_format, Extracted};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::error::Error as _;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const HEALTH_PATH: &str = "/health";
const CONVERT_PATH: &str = "/v1/convert/file";
const CONVERT_ASYNC_PATH: &str = "/v1/convert/file/async";
const STATUS_PATH: &str = "/v1/status/poll";
const RESULT_PATH: &str = "/v1/result";

/// Client for one docling-serve API surface.
#[derive(Debug, Clone)]
pub struct ConversionClient {
    http: reqwest::Client,
    health_timeout: Duration,
}

impl ConversionClient {
    /// Client with no overall request timeout; conversions of large files
    /// are bounded by the service's own `DOCLING_SERVE_MAX_SYNC_WAIT`.
    pub fn new() -> Result<Self, MdifyError> {
        Self::with_request_timeout(None)
    }

    /// Client whose conversion requests give up after `timeout`.
    pub fn with_request_timeout(timeout: Option<Duration>) -> Result<Self, MdifyError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder
            .build()
            .map_err(|e| MdifyError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            health_timeout: Duration::from_secs(5),
        })
    }

    /// Per-probe timeout for [`check_health`](Self::check_health). Default: 5s.
    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// `GET /health`; true only on HTTP 200. Never fails.
    pub async fn check_health(&self, base_url: &str) -> bool {
        let url = endpoint(base_url, HEALTH_PATH);
        match self.http.get(&url).timeout(self.health_timeout).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!("Health probe {} failed: {}", url, error_chain(&e));
                false
            }
        }
    }

    /// Upload one file to the synchronous conversion endpoint.
    ///
    /// # Errors
    /// - [`MdifyError::FileRead`] if the input cannot be read
    /// - [`MdifyError::Http`] on a non-200 answer
    /// - [`MdifyError::MalformedResponse`] if a 200 body is not JSON or is a
    ///   bare scalar
    ///
    /// Transport failures return `Ok` with `success == false`.
    pub async fn convert_file(
        &self,
        base_url: &str,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, MdifyError> {
        let url = endpoint(base_url, CONVERT_PATH);
        let form = build_form(request).await?;
        debug!("POST {} ({})", url, request.path.display());

        let sent = self.http.post(&url).multipart(form).send().await;
        let body = match read_json(&url, sent, "Conversion failed").await {
            Ok(body) => body,
            Err(MdifyError::Transport { detail, .. }) => {
                warn!("Conversion of {} failed: {}", request.path.display(), detail);
                return Ok(ConversionResult::failure(&request.to_format, detail));
            }
            Err(e) => return Err(e),
        };

        match extract_content(&body) {
            Extracted::Content(content) => {
                if content.is_empty() {
                    debug!("{}: 200 response carried no content", request.path.display());
                }
                Ok(ConversionResult::success(content, &request.to_format))
            }
            Extracted::Unrecognized => Err(unexpected_shape(&url, &body)),
        }
    }

    /// Upload one file to the async endpoint and return its task handle.
    pub async fn submit_async(
        &self,
        base_url: &str,
        request: &ConversionRequest,
    ) -> Result<AsyncTaskHandle, MdifyError> {
        let url = endpoint(base_url, CONVERT_ASYNC_PATH);
        let form = build_form(request).await?;
        debug!("POST {} ({})", url, request.path.display());

        let sent = self.http.post(&url).multipart(form).send().await;
        let body = read_json(&url, sent, "Async conversion failed").await?;

        let task_id = match body.get("task_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(MdifyError::MalformedResponse {
                    url,
                    detail: format!("No task_id in response: {body}"),
                })
            }
        };
        debug!("Submitted {} as task {}", request.path.display(), task_id);
        Ok(AsyncTaskHandle::pending(task_id))
    }

    /// `GET /v1/status/poll/{task_id}`.
    pub async fn poll_status(
        &self,
        base_url: &str,
        task_id: &str,
    ) -> Result<AsyncTaskHandle, MdifyError> {
        let url = endpoint(base_url, &format!("{STATUS_PATH}/{task_id}"));
        let sent = self.http.get(&url).send().await;
        let body = read_json(&url, sent, "Status poll failed").await?;

        let status = body
            .get("status")
            .or_else(|| body.get("task_status"))
            .and_then(Value::as_str)
            .map(TaskStatus::parse)
            .unwrap_or_else(|| TaskStatus::Unknown("unknown".to_string()));
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(AsyncTaskHandle {
            task_id: task_id.to_string(),
            status,
            error,
        })
    }

    /// `GET /v1/result/{task_id}`, with the same extraction as
    /// [`convert_file`](Self::convert_file). The format comes from the
    /// response's `format` field, defaulting to `md`.
    pub async fn fetch_result(
        &self,
        base_url: &str,
        task_id: &str,
    ) -> Result<ConversionResult, MdifyError> {
        let url = endpoint(base_url, &format!("{RESULT_PATH}/{task_id}"));
        let sent = self.http.get(&url).send().await;
        let body = match read_json(&url, sent, "Result retrieval failed").await {
            Ok(body) => body,
            Err(MdifyError::Transport { detail, .. }) => {
                return Ok(ConversionResult::failure("md", detail));
            }
            Err(e) => return Err(e),
        };

        let format = extract_format(&body).unwrap_or_else(|| "md".to_string());
        match extract_content(&body) {
            Extracted::Content(content) => Ok(ConversionResult::success(content, format)),
            Extracted::Unrecognized => Err(unexpected_shape(&url, &body)),
        }
    }

    /// Submit, poll every `poll_interval` until the task settles, then fetch.
    ///
    /// # Errors
    /// Everything [`submit_async`](Self::submit_async) and
    /// [`poll_status`](Self::poll_status) raise, plus
    /// [`MdifyError::TaskFailed`] and [`MdifyError::TaskTimeout`].
    pub async fn convert_via_task(
        &self,
        base_url: &str,
        request: &ConversionRequest,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ConversionResult, MdifyError> {
        let handle = self.submit_async(base_url, request).await?;
        let started = Instant::now();

        loop {
            let polled = self.poll_status(base_url, &handle.task_id).await?;
            if polled.status.is_terminal() {
                if polled.status == TaskStatus::Failed {
                    return Err(MdifyError::TaskFailed {
                        task_id: handle.task_id,
                        detail: polled
                            .error
                            .unwrap_or_else(|| "no error detail".to_string()),
                    });
                }
                break;
            }
            debug!("Task {}: {:?}", handle.task_id, polled.status);
            if started.elapsed() >= timeout {
                return Err(MdifyError::TaskTimeout {
                    task_id: handle.task_id,
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }

        self.fetch_result(base_url, &handle.task_id).await
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Content type guessed from the extension, `application/octet-stream` otherwise.
fn mime_for(request: &ConversionRequest) -> String {
    mime_guess::from_path(&request.path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Multipart form: `files`, `to_formats`, `do_ocr`.
async fn build_form(request: &ConversionRequest) -> Result<Form, MdifyError> {
    let bytes = tokio::fs::read(&request.path)
        .await
        .map_err(|source| MdifyError::FileRead {
            path: request.path.clone(),
            source,
        })?;
    let part = Part::bytes(bytes)
        .file_name(request.file_name())
        .mime_str(&mime_for(request))
        .map_err(|e| MdifyError::Internal(format!("Invalid MIME type: {e}")))?;

    Ok(Form::new()
        .part("files", part)
        .text("to_formats", request.to_format.clone())
        .text("do_ocr", request.do_ocr.to_string()))
}

/// Turn a send result into a parsed JSON body.
///
/// Transport failures (on send or while reading the body) become
/// [`MdifyError::Transport`]; callers decide whether that is data or an error.
async fn read_json(
    url: &str,
    sent: reqwest::Result<reqwest::Response>,
    fallback: &str,
) -> Result<Value, MdifyError> {
    let transport = |e: reqwest::Error| MdifyError::Transport {
        url: url.to_string(),
        detail: error_chain(&e),
    };

    let response = sent.map_err(transport)?;
    let status = response.status();
    let text = response.text().await.map_err(transport)?;

    if status != reqwest::StatusCode::OK {
        let body = if text.trim().is_empty() {
            fallback.to_string()
        } else {
            text
        };
        return Err(MdifyError::Http {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&text).map_err(|e| MdifyError::MalformedResponse {
        url: url.to_string(),
        detail: format!("response is not JSON ({e}): {}", snippet(&text)),
    })
}

fn unexpected_shape(url: &str, body: &Value) -> MdifyError {
    MdifyError::MalformedResponse {
        url: url.to_string(),
        detail: format!("Unexpected response format: {}", snippet(&body.to_string())),
    }
}

/// reqwest's top-level message hides the cause ("error sending request");
/// append the source chain so "connection refused" reaches the user.
fn error_chain(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &text[..end])
}
