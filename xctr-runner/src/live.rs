// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live state of the currently active run.
//!
//! [`LiveRunState`] is owned by the caller and passed by mutable reference to
//! the [`RunController`](crate::session::RunController), which is the only
//! thing that should drive its transitions while a run is active. At most one
//! run is live: starting a run discards whatever the previous run left behind.
//!
//! Per-target statuses only move forward: `pending → running → passed|failed`.

use chrono::{DateTime, FixedOffset, Local};
use indexmap::IndexMap;
use tracing::{debug, warn};
use xctr_metadata::{RunId, TestStatus};

/// The stream a line of output came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Standard output of the test tooling.
    Stdout,
    /// Standard error of the test tooling, and backend errors.
    Stderr,
    /// Lines produced by xctr itself.
    System,
}

/// A single line of live output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLine {
    /// When the line was received.
    pub timestamp: DateTime<FixedOffset>,
    /// The line text, without a trailing newline.
    pub text: String,
    /// Where the line came from.
    pub kind: OutputKind,
}

/// A test case result as shown while the run is in progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveTestResult {
    /// The test name.
    pub name: String,
    /// The suite the test belongs to.
    pub suite: String,
    /// The outcome.
    pub status: TestStatus,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// The status of one target within the live run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetRunStatus {
    /// Not started yet.
    Pending,
    /// Currently running.
    Running,
    /// Finished successfully.
    Passed,
    /// Finished with a failure.
    Failed,
}

impl TargetRunStatus {
    /// Returns true if the target has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    fn from_success(success: bool) -> Self {
        if success { Self::Passed } else { Self::Failed }
    }
}

/// Observable state of the currently active run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveRunState {
    is_running: bool,
    run_id: Option<RunId>,
    output_lines: Vec<OutputLine>,
    live_results: Vec<LiveTestResult>,
    tests_run: u32,
    tests_total: u32,
    target_keys: Vec<String>,
    target_statuses: IndexMap<String, TargetRunStatus>,
}

impl LiveRunState {
    /// Creates an idle, empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a run is active.
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Returns the backend-issued id of the current or last run.
    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// Returns the output received so far.
    pub fn output_lines(&self) -> &[OutputLine] {
        &self.output_lines
    }

    /// Returns test results received so far, in arrival order.
    pub fn live_results(&self) -> &[LiveTestResult] {
        &self.live_results
    }

    /// Returns the latest `(tests_run, tests_total)` progress counters.
    pub fn progress(&self) -> (u32, u32) {
        (self.tests_run, self.tests_total)
    }

    /// Returns the canonical ordered target keys of the active run.
    pub fn target_keys(&self) -> &[String] {
        &self.target_keys
    }

    /// Returns the status of a target in the active run.
    pub fn target_status(&self, key: &str) -> Option<TargetRunStatus> {
        self.target_statuses.get(key).copied()
    }

    /// Returns every tracked target status.
    pub fn target_statuses(&self) -> &IndexMap<String, TargetRunStatus> {
        &self.target_statuses
    }

    /// Enters the running state for a new run.
    ///
    /// Discards all prior live state. The first key is marked running and the
    /// rest pending.
    pub fn start_run(&mut self, run_id: RunId, target_keys: Vec<String>) {
        self.reset();

        self.target_statuses = target_keys
            .iter()
            .enumerate()
            .map(|(idx, key)| {
                let status = if idx == 0 {
                    TargetRunStatus::Running
                } else {
                    TargetRunStatus::Pending
                };
                (key.clone(), status)
            })
            .collect();
        self.target_keys = target_keys;
        self.is_running = true;
        self.append_output(format!("Run started: {run_id}"), OutputKind::System);
        self.run_id = Some(run_id);
    }

    /// Records a target completion and advances to the next target.
    ///
    /// A repeated completion of a finished target is ignored. A key outside
    /// the run's target list is recorded but does not advance anything. The
    /// next target is only started if it is still pending, so a completion
    /// delivered out of order never moves a finished target backwards.
    pub fn set_target_completed(&mut self, key: &str, success: bool) {
        if !self.is_running {
            warn!("ignoring completion of target `{key}`: no run is active");
            return;
        }

        let status = TargetRunStatus::from_success(success);
        let Some(idx) = self.target_keys.iter().position(|k| k == key) else {
            warn!("backend reported completion of unknown target `{key}`");
            self.target_statuses.insert(key.to_owned(), status);
            return;
        };

        match self.target_statuses.get(key) {
            Some(current) if current.is_terminal() => {
                warn!("ignoring repeated completion of target `{key}` (already {current:?})");
                return;
            }
            _ => {}
        }
        debug!("target `{key}` finished: {status:?}");
        self.target_statuses.insert(key.to_owned(), status);

        if let Some(next) = self.target_keys.get(idx + 1)
            && let Some(next_status) = self.target_statuses.get_mut(next)
            && *next_status == TargetRunStatus::Pending
        {
            *next_status = TargetRunStatus::Running;
        }
    }

    /// Appends a line of output.
    pub fn append_output(&mut self, text: impl Into<String>, kind: OutputKind) {
        self.output_lines.push(OutputLine {
            timestamp: Local::now().fixed_offset(),
            text: text.into(),
            kind,
        });
    }

    /// Appends a test result.
    pub fn add_test_result(&mut self, result: LiveTestResult) {
        self.live_results.push(result);
    }

    /// Overwrites the progress counters.
    pub fn set_progress(&mut self, tests_run: u32, tests_total: u32) {
        self.tests_run = tests_run;
        self.tests_total = tests_total;
    }

    /// Leaves the running state.
    ///
    /// Output, results and progress stay visible until the next run starts.
    /// Target tracking is cleared.
    pub fn finish_run(&mut self) {
        self.is_running = false;
        self.target_keys.clear();
        self.target_statuses.clear();
    }

    /// Restores the initial empty state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
