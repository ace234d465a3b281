// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{RunId, StatusParseError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// An event streamed by an execution backend while a run is in progress.
///
/// Serialized with an internal `type` tag, for example
/// `{"type":"Stdout","line":"Compiling…"}`. Unknown fields are ignored while
/// deserializing, so backends may attach extra data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TestRunEvent {
    /// The backend accepted the plan and assigned a run identifier.
    ///
    /// This is the only source of run identifiers.
    RunStarted {
        /// The backend-issued run identifier.
        run_id: RunId,
    },

    /// A line written to standard output by the test tooling.
    Stdout {
        /// The line, without its trailing newline.
        line: String,
    },

    /// A line written to standard error by the test tooling.
    Stderr {
        /// The line, without its trailing newline.
        line: String,
    },

    /// A single test case finished.
    TestCompleted {
        /// The test name, e.g. `testLogin`.
        name: String,
        /// The suite (test class) the test belongs to.
        suite: String,
        /// The outcome.
        status: TestStatus,
        /// Wall-clock duration of the test case.
        duration_ms: u64,
    },

    /// Progress counters. Each event replaces the previous values.
    Progress {
        /// Number of tests that have finished.
        tests_run: u32,
        /// Total number of tests, or 0 if the backend does not know.
        tests_total: u32,
    },

    /// A target finished. `key` is the canonical target key.
    TargetCompleted {
        /// The target key, as produced by [`SchemeTarget::key`](crate::SchemeTarget::key),
        /// [`TestPlanRun::key`](crate::TestPlanRun::key) or
        /// [`PackageTarget::key`](crate::PackageTarget::key).
        key: String,
        /// Whether the target passed.
        success: bool,
    },

    /// The run is over. No further events follow.
    RunFinished {},

    /// A non-fatal error reported by the backend.
    Error {
        /// A human-readable description.
        message: String,
    },
}

impl TestRunEvent {
    /// Returns the name of this event's variant, as used in the `type` tag.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RunStarted",
            Self::Stdout { .. } => "Stdout",
            Self::Stderr { .. } => "Stderr",
            Self::TestCompleted { .. } => "TestCompleted",
            Self::Progress { .. } => "Progress",
            Self::TargetCompleted { .. } => "TargetCompleted",
            Self::RunFinished {} => "RunFinished",
            Self::Error { .. } => "Error",
        }
    }
}

/// The outcome of a single test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The test passed.
    Passed,
    /// The test failed.
    Failed,
    /// The test was skipped.
    Skipped,
}

impl TestStatus {
    const VARIANTS: &'static [&'static str] = &["passed", "failed", "skipped"];

    /// Returns the lowercase string form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(StatusParseError::new("test status", other, Self::VARIANTS)),
        }
    }
}
