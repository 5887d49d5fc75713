use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString, IntoStaticStr};

/// Identifier of a job within one submission (its submission index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an analysis job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }
}

/// File content captured at submission time.
///
/// The content is shared and never mutated, so later edits to the file on
/// disk cannot race with an in-flight analysis.
#[derive(Debug, Clone, Serialize)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub file_name: String,
    #[serde(skip_serializing)]
    pub content: Arc<str>,
    pub size_bytes: usize,
    pub lines: usize,
    pub sha256: String,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Arc<str>>) -> Self {
        let path = path.into();
        let content: Arc<str> = content.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            file_name,
            size_bytes: content.len(),
            lines: content.lines().count(),
            sha256: format!("{:x}", Sha256::digest(content.as_bytes())),
            content,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when there is nothing worth sending to the analyzer.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// One request to analyze a single file against a rule-set.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisJob {
    pub id: JobId,
    pub file: FileSnapshot,
    pub rule_set_version: String,
    pub state: JobState,
    pub attempts: u32,
}

impl AnalysisJob {
    pub fn new(id: JobId, file: FileSnapshot, rule_set_version: impl Into<String>) -> Self {
        Self {
            id,
            file,
            rule_set_version: rule_set_version.into(),
            state: JobState::Pending,
            attempts: 0,
        }
    }

    /// Move to `Running` and count the attempt.
    pub fn start_attempt(&mut self) {
        debug_assert!(matches!(self.state, JobState::Pending));
        self.state = JobState::Running;
        self.attempts += 1;
    }
}
