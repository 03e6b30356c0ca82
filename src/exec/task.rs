// src/exec/task.rs

//! Tasks: single externally executed commands and their results.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;

/// One command invocation underlying a job.
///
/// Built by a job, handed to a `TaskBackend` (which alone writes the result
/// fields) and handed back once `done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Script name.
    pub execute: String,
    /// Arguments with values already substituted and escaped.
    pub arguments: String,
    pub stdout_file: Option<PathBuf>,
    pub stderr_file: Option<PathBuf>,
    /// Replacement values the task was rendered with.
    pub context: Context,
    pub wants_output: bool,

    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub finished_timestamp: Option<DateTime<Utc>>,
    pub done: bool,
}

impl Task {
    pub fn new(job_id: Uuid, execute: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            execute: execute.into(),
            arguments: arguments.into(),
            stdout_file: None,
            stderr_file: None,
            context: Context::new(),
            wants_output: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            finished_timestamp: None,
            done: false,
        }
    }

    pub fn with_capture_files(
        mut self,
        stdout_file: Option<PathBuf>,
        stderr_file: Option<PathBuf>,
    ) -> Self {
        self.stdout_file = stdout_file;
        self.stderr_file = stderr_file;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_wants_output(mut self, wants_output: bool) -> Self {
        self.wants_output = wants_output;
        self
    }

    /// Serialized form sent to the dispatcher.
    pub fn to_request(&self) -> TaskRequest {
        TaskRequest {
            id: self.id,
            execute: self.execute.clone(),
            arguments: self.arguments.clone(),
            stdout_file: self.stdout_file.clone(),
            stderr_file: self.stderr_file.clone(),
            wants_output: self.wants_output,
            context: self.context.clone(),
        }
    }

    /// Write back a result from the dispatcher and mark the task done.
    pub fn apply_result(&mut self, result: TaskResult) {
        self.exit_code = Some(result.exit_code);
        self.stdout = result.stdout;
        self.stderr = result.stderr;
        self.finished_timestamp = Some(result.finished_timestamp);
        self.done = true;
    }

    /// Mark the task failed (exit code 1) with `diagnostic` as its stderr.
    pub fn fail(&mut self, diagnostic: impl Into<String>) {
        self.apply_result(TaskResult::failed(diagnostic));
    }
}

/// Serialized task as it travels inside a batch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: Uuid,
    pub execute: String,
    pub arguments: String,
    #[serde(default)]
    pub stdout_file: Option<PathBuf>,
    #[serde(default)]
    pub stderr_file: Option<PathBuf>,
    #[serde(default)]
    pub wants_output: bool,
    #[serde(default)]
    pub context: Context,
}

/// Result of one task as reported by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub finished_timestamp: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            finished_timestamp: Utc::now(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self::new(1, String::new(), diagnostic)
    }
}
