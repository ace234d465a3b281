// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Display of stored runs.

use crate::output::Styles;
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};
use xctr_metadata::{RunRecord, RunStatus, TestCaseRecord, TestStatus};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn status_style(status: RunStatus, styles: &Styles) -> Style {
    match status {
        RunStatus::Running => styles.running,
        RunStatus::Passed => styles.pass,
        RunStatus::Failed | RunStatus::Cancelled => styles.fail,
    }
}

/// Writes one line per run, newest first as given.
pub(crate) fn write_run_list(
    runs: &[RunRecord],
    styles: &Styles,
    mut writer: impl Write,
) -> io::Result<()> {
    if runs.is_empty() {
        writeln!(writer, "no runs recorded")?;
        return writer.flush();
    }

    let id_width = runs.iter().map(|run| run.id.as_str().len()).max().unwrap_or(0);
    for run in runs {
        writeln!(
            writer,
            "{:<id_width$}  {:>9}  {}  {:>4}/{:<4}  {}",
            run.id.as_str().style(styles.bold),
            run.status.as_str().style(status_style(run.status, styles)),
            run.started_at.format(TIME_FORMAT),
            run.passed_tests,
            run.total_tests,
            run.scope,
        )?;
    }
    writer.flush()
}

/// Writes a run and its test cases, and the raw log if `show_log` is set.
pub(crate) fn write_run_details(
    run: &RunRecord,
    test_cases: &[TestCaseRecord],
    show_log: bool,
    styles: &Styles,
    mut writer: impl Write,
) -> io::Result<()> {
    writeln!(writer, "{} {}", "run".style(styles.bold), run.id)?;
    writeln!(
        writer,
        "  status:   {}",
        run.status.style(status_style(run.status, styles))
    )?;
    writeln!(writer, "  project:  {}", run.project_path)?;
    if let Some(project_id) = &run.project_id {
        writeln!(writer, "  id:       {project_id}")?;
    }
    writeln!(writer, "  scope:    {}", run.scope)?;
    writeln!(writer, "  started:  {}", run.started_at.format(TIME_FORMAT))?;
    if let Some(duration_ms) = run.duration_ms {
        writeln!(
            writer,
            "  duration: {:.3}s",
            duration_ms as f64 / 1000.0
        )?;
    }
    writeln!(
        writer,
        "  tests:    {} run, {} passed, {} failed, {} skipped",
        run.total_tests, run.passed_tests, run.failed_tests, run.skipped_tests
    )?;

    if let Some(target_results) = &run.target_results {
        writeln!(writer, "{}", "targets".style(styles.bold))?;
        for target in target_results {
            let (heading, style) = if target.success {
                ("ok", styles.pass)
            } else {
                ("FAIL", styles.fail)
            };
            writeln!(writer, "  {:>4} {}", heading.style(style), target.key)?;
        }
    }

    if !test_cases.is_empty() {
        writeln!(writer, "{}", "test cases".style(styles.bold))?;
        for test_case in test_cases {
            let (heading, style) = match test_case.status {
                TestStatus::Passed => ("PASS", styles.pass),
                TestStatus::Failed => ("FAIL", styles.fail),
                TestStatus::Skipped => ("SKIP", styles.skip),
            };
            write!(
                writer,
                "  {} {}.{}",
                heading.style(style),
                test_case.suite_name,
                test_case.test_name
            )?;
            if let Some(duration_ms) = test_case.duration_ms {
                write!(writer, " ({:.3}s)", duration_ms as f64 / 1000.0)?;
            }
            writeln!(writer)?;
            if let Some(message) = &test_case.failure_message {
                writeln!(writer, "       {}", message.style(styles.dimmed))?;
            }
        }
    }

    if show_log {
        match &run.raw_log {
            Some(raw_log) => {
                writeln!(writer, "{}", "log".style(styles.bold))?;
                writeln!(writer, "{raw_log}")?;
            }
            None => writeln!(writer, "(no log recorded)")?,
        }
    }
    writer.flush()
}
