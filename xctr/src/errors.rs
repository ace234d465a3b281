// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, Styles};
use owo_colors::OwoColorize;
use std::{error::Error, path::PathBuf};
use thiserror::Error;
use tracing::error;
use xctr_metadata::{RunId, XctrExitCode};
use xctr_runner::errors::{
    BackendError, ConfigParseError, PlanValidationError, RunStoreError, RunTestsError,
};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are printed with
// display_to_stderr, which colorizes them.

/// An error that `xctr` knows how to report, with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        error: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirNotUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("failed to start the async runtime")]
    RuntimeBuildFailed {
        #[source]
        error: std::io::Error,
    },
    #[error("run store error")]
    RunStoreError {
        #[from]
        err: RunStoreError,
    },
    #[error("run not found")]
    RunNotFound { run_id: RunId },
    #[error("nothing to run")]
    NothingToRun {
        #[source]
        err: PlanValidationError,
    },
    #[error("execution backend failed")]
    BackendFailed {
        #[source]
        err: BackendError,
    },
    #[error("failed to persist run")]
    PersistenceFailed {
        run_id: RunId,
        #[source]
        err: RunStoreError,
    },
    #[error("test run failed")]
    TestRunFailed,
    #[error("run abandoned after a second interrupt")]
    RunAbandoned,
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirNotUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::RuntimeBuildFailed { .. }
            | Self::RunStoreError { .. } => XctrExitCode::SETUP_ERROR,
            Self::RunNotFound { .. } => XctrExitCode::RUN_NOT_FOUND,
            Self::NothingToRun { .. } => XctrExitCode::NO_TESTS_RUN,
            Self::BackendFailed { .. } => XctrExitCode::BACKEND_FAILED,
            Self::PersistenceFailed { .. } => XctrExitCode::PERSISTENCE_FAILED,
            Self::TestRunFailed | Self::RunAbandoned => XctrExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } => XctrExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &Styles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::CurrentDirNotUtf8 { path } => {
                error!(
                    "current directory is not valid UTF-8: {}",
                    path.display().style(styles.bold),
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::RuntimeBuildFailed { error } => {
                error!("failed to start the async runtime");
                Some(error as &dyn Error)
            }
            Self::RunStoreError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RunNotFound { run_id } => {
                error!(
                    "run `{}` not found",
                    run_id.style(styles.bold)
                );
                None
            }
            Self::NothingToRun { err } => {
                error!("{err}");
                None
            }
            Self::BackendFailed { err } => {
                error!("execution backend failed");
                Some(err as &dyn Error)
            }
            Self::PersistenceFailed { run_id, err } => {
                error!(
                    "run `{}` finished but could not be recorded",
                    run_id.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::RunAbandoned => {
                error!("interrupted twice, exiting without recording the run's outcome");
                None
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

impl From<RunTestsError> for ExpectedError {
    fn from(err: RunTestsError) -> Self {
        match err {
            RunTestsError::Validation(err) => Self::NothingToRun { err },
            RunTestsError::Submission(err) => Self::BackendFailed { err },
            RunTestsError::Persistence { run_id, error } => Self::PersistenceFailed {
                run_id,
                err: error,
            },
        }
    }
}
