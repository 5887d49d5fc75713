use std::path::{Path, PathBuf};
use std::sync::Arc;

use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::FileSnapshot;
use crate::models::report::RunReport;

/// Content of a submitted file, or the reason it could not be read.
#[derive(Debug, Clone)]
pub enum FileSource {
    Loaded(Arc<str>),
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct SubmittedFile {
    pub path: PathBuf,
    pub source: FileSource,
}

impl SubmittedFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Arc<str>>) -> Self {
        Self {
            path: path.into(),
            source: FileSource::Loaded(content.into()),
        }
    }

    /// Read a file from disk. Invalid UTF-8 is replaced rather than rejected;
    /// I/O errors are kept so the job can be reported as invalid input.
    pub async fn read(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source = match tokio::fs::read(&path).await {
            Ok(bytes) => FileSource::Loaded(String::from_utf8_lossy(&bytes).into()),
            Err(e) => FileSource::Unreadable(e.to_string()),
        };
        Self { path, source }
    }

    /// Capture the immutable snapshot sent to the analyzer.
    pub fn snapshot(&self) -> Result<FileSnapshot, InputError> {
        match &self.source {
            FileSource::Unreadable(reason) => Err(InputError::Unreadable {
                path: self.path.clone(),
                reason: reason.clone(),
            }),
            FileSource::Loaded(content) => {
                let snapshot = FileSnapshot::new(self.path.clone(), content.clone());
                if snapshot.is_blank() {
                    Err(InputError::Empty {
                        path: self.path.clone(),
                    })
                } else {
                    Ok(snapshot)
                }
            }
        }
    }
}

/// A file that must never reach the analyzer.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("cannot read {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("{} is empty", path.display())]
    Empty { path: PathBuf },
}

/// Ordered set of files to audit against one rule-set version.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub rule_set_version: String,
    pub extra_criteria: Option<String>,
    pub files: Vec<SubmittedFile>,
}

impl Submission {
    pub fn new(rule_set_version: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_set_version: rule_set_version.into(),
            extra_criteria: None,
            files: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_extra_criteria(mut self, criteria: impl Into<String>) -> Self {
        let criteria = criteria.into();
        self.extra_criteria = (!criteria.trim().is_empty()).then_some(criteria);
        self
    }

    /// Append a file, ignoring paths that were already submitted.
    pub fn push(&mut self, file: SubmittedFile) -> bool {
        if self.files.iter().any(|f| f.path == file.path) {
            return false;
        }
        self.files.push(file);
        true
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Case-insensitive extension check; an empty allow-list accepts everything.
pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            allowed
                .iter()
                .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Request body for `POST /api/v1/runs`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRunRequest {
    #[garde(length(min = 1, max = 100))]
    pub rule_set_version: Option<String>,

    #[garde(length(max = 4000))]
    pub extra_criteria: Option<String>,

    #[garde(length(min = 1, max = 500), dive)]
    pub files: Vec<SubmitFile>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitFile {
    #[garde(length(min = 1, max = 4096))]
    pub path: String,

    #[garde(skip)]
    pub content: String,
}

/// Response after submitting a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRunResponse {
    pub run_id: Uuid,
    pub status: String,
    pub total_jobs: usize,
}

/// Response for querying a run.
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub status: String,
    pub completed_jobs: usize,
    pub total_jobs: usize,
    pub report: Option<RunReport>,
}
