//! Value types exchanged between the client, the batch driver and callers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file to convert, plus what to ask the service for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub path: PathBuf,
    pub to_format: String,
    pub do_ocr: bool,
}

impl ConversionRequest {
    /// Markdown with OCR enabled.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            to_format: "md".to_string(),
            do_ocr: true,
        }
    }

    pub fn with_format(mut self, to_format: impl Into<String>) -> Self {
        self.to_format = to_format.into();
        self
    }

    pub fn with_ocr(mut self, do_ocr: bool) -> Self {
        self.do_ocr = do_ocr;
        self
    }

    /// File name sent in the multipart part; falls back to `document`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Outcome of converting one file.
///
/// `success == true` with empty `content` is a legitimate result: the
/// service answered 200 with a recognised shape but no text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    pub content: String,
    pub format: String,
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn success(content: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            format: format.into(),
            error: None,
        }
    }

    pub fn failure(format: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            format: format.into(),
            error: Some(error.into()),
        }
    }
}

/// Status reported by `GET /v1/status/poll/{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Started,
    Completed,
    Failed,
    /// Anything this client does not recognise, kept verbatim.
    Unknown(String),
}

impl TaskStatus {
    /// Map the service's status string. docling-serve has used both
    /// `completed`/`failed` and `success`/`failure` over time.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => TaskStatus::Pending,
            "started" | "running" => TaskStatus::Started,
            "completed" | "success" => TaskStatus::Completed,
            "failed" | "failure" => TaskStatus::Failed,
            _ => TaskStatus::Unknown(raw.to_string()),
        }
    }

    /// True once polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A conversion submitted to the async endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncTaskHandle {
    pub task_id: String,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl AsyncTaskHandle {
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            error: None,
        }
    }
}

/// An input document and where its Markdown should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl FileJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// `<out_dir>/<input stem>.md`.
    pub fn into_dir(input: impl Into<PathBuf>, out_dir: &Path) -> Self {
        let input = input.into();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let output = out_dir.join(format!("{stem}.md"));
        Self { input, output }
    }
}

/// What happened to one [`FileJob`].
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `None` when the file was skipped because its output already existed.
    pub result: Option<ConversionResult>,
    pub duration_ms: u64,
}

impl FileReport {
    pub fn is_skipped(&self) -> bool {
        self.result.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.success)
    }

    pub fn is_failure(&self) -> bool {
        self.result.as_ref().is_some_and(|r| !r.success)
    }
}

/// Totals for one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub reports: Vec<FileReport>,
    pub total_duration_ms: u64,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().filter(|r| r.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failure()).count()
    }

    /// Results of every file that was actually sent to the service.
    pub fn results(&self) -> impl Iterator<Item = &ConversionResult> {
        self.reports.iter().filter_map(|r| r.result.as_ref())
    }

    /// 1 if anything failed, else 0 (all converted or only skipped).
    pub fn exit_code(&self) -> u8 {
        if self.failed() > 0 {
            1
        } else {
            0
        }
    }
}
