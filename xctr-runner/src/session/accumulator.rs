// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, FixedOffset};
use debug_ignore::DebugIgnore;
use xctr_metadata::{
    RunCompletion, RunId, RunStatus, TargetResult, TestCaseRecord, TestStatus,
};

/// Everything about a run that gets persisted, collected as events arrive.
///
/// Kept separately from the live state, which is cleared when the run
/// finishes and may be reset by the caller at any time.
#[derive(Debug, Default)]
pub(super) struct ShadowAccumulator {
    log_lines: DebugIgnore<Vec<String>>,
    results: Vec<ShadowTestResult>,
    target_results: Vec<TargetResult>,
}

#[derive(Debug)]
struct ShadowTestResult {
    suite: String,
    name: String,
    status: TestStatus,
    duration_ms: u64,
}

/// Test counts derived from the collected results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct TestCounts {
    pub(super) total: u32,
    pub(super) passed: u32,
    pub(super) failed: u32,
    pub(super) skipped: u32,
}

impl ShadowAccumulator {
    pub(super) fn push_stdout(&mut self, line: &str) {
        self.log_lines.push(line.to_owned());
    }

    pub(super) fn push_stderr(&mut self, line: &str) {
        self.log_lines.push(format!("[stderr] {line}"));
    }

    pub(super) fn push_test_result(
        &mut self,
        suite: &str,
        name: &str,
        status: TestStatus,
        duration_ms: u64,
    ) {
        self.results.push(ShadowTestResult {
            suite: suite.to_owned(),
            name: name.to_owned(),
            status,
            duration_ms,
        });
    }

    pub(super) fn push_target_result(&mut self, key: &str, success: bool) {
        self.target_results.push(TargetResult {
            key: key.to_owned(),
            success,
        });
    }

    pub(super) fn counts(&self) -> TestCounts {
        let mut counts = TestCounts {
            total: u32::try_from(self.results.len()).unwrap_or(u32::MAX),
            ..TestCounts::default()
        };
        for result in &self.results {
            match result.status {
                TestStatus::Passed => counts.passed += 1,
                TestStatus::Failed => counts.failed += 1,
                TestStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Returns the terminal status: cancelled wins, then any failed test or
    /// target, then passed.
    pub(super) fn status(&self, cancelled: bool) -> RunStatus {
        if cancelled {
            RunStatus::Cancelled
        } else if self.counts().failed > 0 || self.target_results.iter().any(|t| !t.success) {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        }
    }

    /// Builds the terminal update for the run.
    pub(super) fn completion(
        &self,
        run_id: RunId,
        cancelled: bool,
        finished_at: DateTime<FixedOffset>,
        duration_ms: u64,
    ) -> RunCompletion {
        let counts = self.counts();
        RunCompletion {
            id: run_id,
            status: self.status(cancelled),
            finished_at,
            duration_ms,
            total_tests: counts.total,
            passed_tests: counts.passed,
            failed_tests: counts.failed,
            skipped_tests: counts.skipped,
            raw_log: (!self.log_lines.is_empty()).then(|| self.log_lines.join("\n")),
            target_results: (!self.target_results.is_empty())
                .then(|| self.target_results.clone()),
        }
    }

    /// Builds one test case row per collected result, in arrival order.
    pub(super) fn test_cases(&self, run_id: &RunId) -> Vec<TestCaseRecord> {
        self.results
            .iter()
            .map(|result| TestCaseRecord {
                run_id: run_id.clone(),
                suite_name: result.suite.clone(),
                test_name: result.name.clone(),
                status: result.status,
                duration_ms: Some(result.duration_ms),
                failure_message: None,
            })
            .collect()
    }
}
