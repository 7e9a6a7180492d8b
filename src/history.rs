//! Step and task history.
//!
//! The agent reports to a [`HistorySink`] fire-and-forget: a sink that fails
//! to persist something logs it and moves on.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One executed loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub task_id: String,
    pub number: usize,
    pub thinking: String,
    pub action: String,
    pub success: bool,
    pub message: Option<String>,
    /// Base64 JPEG of the screen the decision was made on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_image: Option<String>,
    pub timestamp: DateTime<Local>,
}

/// A finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub goal: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub steps: usize,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Note,
    CallApi,
}

/// Free-form content the model asked to keep (`Note`, `Call_API`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: Local::now(),
        }
    }
}

/// Receiver of history records.
pub trait HistorySink: Send + Sync {
    fn record_step(&self, step: &StepRecord);
    fn record_task(&self, task: &TaskRecord);
    fn record_annotation(&self, annotation: &Annotation);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistorySink;

impl HistorySink for NullHistorySink {
    fn record_step(&self, _step: &StepRecord) {}
    fn record_task(&self, _task: &TaskRecord) {}
    fn record_annotation(&self, _annotation: &Annotation) {}
}

/// One line of the JSONL file; `record` names the line type.
#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum HistoryLine<'a> {
    Step(&'a StepRecord),
    Task(&'a TaskRecord),
    Annotation(&'a Annotation),
}

/// Appends one JSON object per line to a session file.
#[derive(Debug)]
pub struct JsonlHistorySink {
    path: PathBuf,
    include_images: bool,
    lock: Mutex<()>,
}

impl JsonlHistorySink {
    /// Default history directory in the platform data dir.
    pub fn default_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "device-agent", "device-agent")
            .map(|dirs| dirs.data_dir().join("history"))
    }

    /// Create a new session file in `dir`.
    pub fn create_in(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("session_{}_{}.jsonl", timestamp, std::process::id()));
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            include_images: false,
            lock: Mutex::new(()),
        })
    }

    /// Keep screenshots in step records. Off by default; they are large.
    pub fn with_images(mut self, include: bool) -> Self {
        self.include_images = include;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: HistoryLine<'_>) {
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("failed to serialize history record: {}", e);
                return;
            }
        };

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let written = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", json));
        if let Err(e) = written {
            tracing::warn!(path = %self.path.display(), "failed to write history: {}", e);
        }
    }
}

impl HistorySink for JsonlHistorySink {
    fn record_step(&self, step: &StepRecord) {
        if self.include_images {
            self.append(HistoryLine::Step(step));
        } else {
            let stripped = StepRecord {
                before_image: None,
                after_image: None,
                ..step.clone()
            };
            self.append(HistoryLine::Step(&stripped));
        }
    }

    fn record_task(&self, task: &TaskRecord) {
        self.append(HistoryLine::Task(task));
    }

    fn record_annotation(&self, annotation: &Annotation) {
        self.append(HistoryLine::Annotation(annotation));
    }
}
