// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal display of a run in progress.

use crate::output::Styles;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use swrite::{SWrite, swrite};
use xctr_metadata::{RunCompletion, RunStatus, TestRunEvent, TestStatus};
use xctr_runner::live::{LiveRunState, TargetRunStatus};

/// Writes one line per interesting event.
///
/// Tool output is only shown with `verbose`. The first write error is kept
/// and returned by [`Self::finish`]; later events are dropped.
pub(crate) struct RunReporter<W> {
    writer: W,
    styles: Styles,
    verbose: bool,
    error: Option<io::Error>,
}

impl<W: Write> RunReporter<W> {
    pub(crate) fn new(writer: W, styles: Styles, verbose: bool) -> Self {
        Self {
            writer,
            styles,
            verbose,
            error: None,
        }
    }

    /// Reports an event that has already been applied to `live`.
    pub(crate) fn report(&mut self, event: &TestRunEvent, live: &LiveRunState) {
        if self.error.is_some() {
            return;
        }
        if let Some(line) = self.format_event(event, live) {
            let res = self
                .writer
                .write_all(line.as_bytes())
                .and_then(|()| self.writer.flush());
            if let Err(error) = res {
                self.error = Some(error);
            }
        }
    }

    /// Writes the summary line and returns the writer.
    pub(crate) fn finish(mut self, completion: &RunCompletion) -> io::Result<W> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let styles = &self.styles;
        let status_style = match completion.status {
            RunStatus::Passed => styles.pass,
            RunStatus::Failed | RunStatus::Cancelled => styles.fail,
            RunStatus::Running => styles.running,
        };
        writeln!(self.writer, "------------")?;
        writeln!(
            self.writer,
            "{:>12} [{:>8.3}s] {} {} run: {} passed, {} failed, {} skipped",
            "Summary".style(status_style),
            completion.duration_ms as f64 / 1000.0,
            completion.total_tests.style(styles.count),
            plural_tests(completion.total_tests),
            completion.passed_tests.style(styles.count),
            completion.failed_tests.style(styles.count),
            completion.skipped_tests.style(styles.count),
        )?;
        writeln!(
            self.writer,
            "{:>12} run {} {}",
            "Recorded".style(styles.bold),
            completion.id,
            completion.status.style(status_style),
        )?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn format_event(&self, event: &TestRunEvent, live: &LiveRunState) -> Option<String> {
        let styles = &self.styles;
        let mut out = String::new();
        match event {
            TestRunEvent::RunStarted { run_id } => {
                let count = live.target_keys().len();
                swrite!(
                    out,
                    "{:>12} {} {} (run {})\n",
                    "Starting".style(styles.pass),
                    count.style(styles.count),
                    if count == 1 { "target" } else { "targets" },
                    run_id,
                );
                self.write_running(&mut out, live);
            }
            TestRunEvent::Stdout { line } if self.verbose => {
                swrite!(out, "{line}\n");
            }
            TestRunEvent::Stderr { line } if self.verbose => {
                swrite!(out, "{}\n", line.style(styles.dimmed));
            }
            TestRunEvent::Stdout { .. } | TestRunEvent::Stderr { .. } => return None,
            TestRunEvent::TestCompleted {
                name,
                suite,
                status,
                duration_ms,
            } => {
                let (heading, style) = match status {
                    TestStatus::Passed => ("PASS", styles.pass),
                    TestStatus::Failed => ("FAIL", styles.fail),
                    TestStatus::Skipped => ("SKIP", styles.skip),
                };
                swrite!(
                    out,
                    "{:>12} [{:>8.3}s] {}.{}\n",
                    heading.style(style),
                    *duration_ms as f64 / 1000.0,
                    suite.style(styles.bold),
                    name,
                );
            }
            TestRunEvent::Progress { .. } | TestRunEvent::RunFinished {} => return None,
            TestRunEvent::TargetCompleted { key, success } => {
                let (heading, style) = if *success {
                    ("TARGET OK", styles.pass)
                } else {
                    ("TARGET FAIL", styles.fail)
                };
                swrite!(out, "{:>12} {key}\n", heading.style(style));
                self.write_running(&mut out, live);
            }
            TestRunEvent::Error { message } => {
                swrite!(out, "{:>12} {message}\n", "ERROR".style(styles.fail));
            }
        }
        Some(out)
    }

    fn write_running(&self, out: &mut String, live: &LiveRunState) {
        let running = live
            .target_statuses()
            .iter()
            .find(|(_, status)| **status == TargetRunStatus::Running);
        if let Some((key, _)) = running {
            swrite!(out, "{:>12} {key}\n", "RUNNING".style(self.styles.running));
        }
    }
}

fn plural_tests(count: u32) -> &'static str {
    if count == 1 { "test" } else { "tests" }
}
