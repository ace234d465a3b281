// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{StatusParseError, TestStatus};
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A backend-issued run identifier.
///
/// Run identifiers are opaque strings. They are always produced by the
/// execution backend, never by `xctr` or the run store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a new run identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// The status of a recorded run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run was started and has not been completed.
    Running,
    /// Every test and target passed.
    Passed,
    /// At least one test or target failed.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

impl RunStatus {
    const VARIANTS: &'static [&'static str] = &["running", "passed", "failed", "cancelled"];

    /// Returns the lowercase string form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StatusParseError::new("run status", other, Self::VARIANTS)),
        }
    }
}

/// Whether a single target passed, as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    /// The canonical target key.
    pub key: String,
    /// Whether the target passed.
    pub success: bool,
}

/// The durable record of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The backend-issued run identifier.
    pub id: RunId,
    /// Current status. `Running` until the completion update.
    pub status: RunStatus,
    /// The project directory the run was started for.
    pub project_path: Utf8PathBuf,
    /// The project identifier, if the caller tracks projects.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Human-readable summary of what the run covered.
    pub scope: String,
    /// When the run started.
    pub started_at: DateTime<FixedOffset>,
    /// When the run finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<FixedOffset>>,
    /// Wall-clock duration.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Number of collected test results.
    #[serde(default)]
    pub total_tests: u32,
    /// Number of passed tests.
    #[serde(default)]
    pub passed_tests: u32,
    /// Number of failed tests.
    #[serde(default)]
    pub failed_tests: u32,
    /// Number of skipped tests.
    #[serde(default)]
    pub skipped_tests: u32,
    /// The captured output of the run. Stderr lines are prefixed `[stderr] `.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_log: Option<String>,
    /// Per-target outcomes, in completion order.
    #[serde(default)]
    pub target_results: Option<Vec<TargetResult>>,
}

impl RunRecord {
    /// Creates the initial record for a run that has just started.
    pub fn started(
        id: RunId,
        project_path: Utf8PathBuf,
        project_id: Option<String>,
        scope: impl Into<String>,
        started_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id,
            status: RunStatus::Running,
            project_path,
            project_id,
            scope: scope.into(),
            started_at,
            finished_at: None,
            duration_ms: None,
            total_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            skipped_tests: 0,
            raw_log: None,
            target_results: None,
        }
    }

    /// Applies the terminal update to this record.
    pub fn apply_completion(&mut self, completion: &RunCompletion) {
        self.status = completion.status;
        self.finished_at = Some(completion.finished_at);
        self.duration_ms = Some(completion.duration_ms);
        self.total_tests = completion.total_tests;
        self.passed_tests = completion.passed_tests;
        self.failed_tests = completion.failed_tests;
        self.skipped_tests = completion.skipped_tests;
        self.raw_log.clone_from(&completion.raw_log);
        self.target_results.clone_from(&completion.target_results);
    }
}

/// The terminal update applied once to a [`RunRecord`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCompletion {
    /// The run being completed.
    pub id: RunId,
    /// The terminal status.
    pub status: RunStatus,
    /// When the run finished.
    pub finished_at: DateTime<FixedOffset>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Number of collected test results.
    pub total_tests: u32,
    /// Number of passed tests.
    pub passed_tests: u32,
    /// Number of failed tests.
    pub failed_tests: u32,
    /// Number of skipped tests.
    pub skipped_tests: u32,
    /// The captured output of the run.
    pub raw_log: Option<String>,
    /// Per-target outcomes, or `None` if no target reported.
    pub target_results: Option<Vec<TargetResult>>,
}

/// The durable record of a single test case in a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    /// The run this test case belongs to.
    pub run_id: RunId,
    /// The suite (test class) name.
    pub suite_name: String,
    /// The test name.
    pub test_name: String,
    /// The outcome.
    pub status: TestStatus,
    /// Wall-clock duration.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// The failure message, if the backend reported one.
    #[serde(default)]
    pub failure_message: Option<String>,
}
