// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by xctr-runner.

use crate::plan::PlanOrigin;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::io;
use thiserror::Error;
use xctr_metadata::RunId;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse xctr config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// A plan was rejected before anything was submitted to the backend.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PlanValidationError {
    /// Running by targets, but the plan has no scheme or package targets.
    #[error("{}", .origin.no_targets_message())]
    NoRunnableTargets {
        /// Where the empty target list came from.
        origin: PlanOrigin,
    },

    /// Running by test plans, but the plan has no test plan entries.
    #[error("{}", .origin.no_test_plans_message())]
    NoTestPlansSelected {
        /// Where the empty test plan list came from.
        origin: PlanOrigin,
    },
}

/// An error returned by an execution backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The directory for result bundles could not be created.
    #[error("failed to create result bundle directory `{path}`")]
    ResultDirCreate {
        /// The directory that could not be created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The event stream ended without a `RunStarted` event.
    #[error("execution backend closed the event stream without reporting a run id")]
    RunIdMissing,

    /// A cancellation was requested, but nothing is running.
    #[error("no active run to cancel")]
    NoActiveRun,

    /// The backend refused the request.
    #[error("execution backend rejected the request: {message}")]
    Rejected {
        /// The reason given by the backend.
        message: String,
    },
}

/// An error that occurred while reading from or writing to a run store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunStoreError {
    /// The store directory could not be created.
    #[error("error creating store directory `{path}`")]
    StoreDirCreate {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The run list lock file could not be opened or locked.
    #[error("error acquiring lock on `{path}`")]
    FileLock {
        /// The path to the lock file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The run list lock was held by another process for too long.
    #[error("timed out after {timeout_secs}s waiting for lock on `{path}`")]
    FileLockTimeout {
        /// The path to the lock file.
        path: Utf8PathBuf,

        /// How long the store waited.
        timeout_secs: u64,
    },

    /// The list of runs could not be read.
    #[error("error reading run list from `{path}`")]
    RunListRead {
        /// The path to the run list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The list of runs could not be deserialized.
    #[error("error deserializing run list from `{path}`")]
    RunListDeserialize {
        /// The path to the run list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The list of runs could not be serialized.
    #[error("error serializing run list to `{path}`")]
    RunListSerialize {
        /// The path to the run list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The list of runs could not be written.
    #[error("error writing run list to `{path}`")]
    RunListWrite {
        /// The path to the run list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },

    /// A run with this id was already inserted.
    #[error("run `{run_id}` already exists in the store")]
    DuplicateRun {
        /// The run id.
        run_id: RunId,
    },

    /// The run id is empty and cannot name a run directory.
    #[error("run id `{run_id}` cannot name a run directory")]
    InvalidRunId {
        /// The run id.
        run_id: RunId,
    },

    /// The run does not exist in the store.
    #[error("run `{run_id}` not found in the store")]
    RunNotFound {
        /// The run id.
        run_id: RunId,
    },

    /// The directory for a run could not be created.
    #[error("error creating run directory `{path}`")]
    RunDirCreate {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The directory for a run could not be removed.
    #[error("error removing run directory `{path}`")]
    RunDirRemove {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The raw log for a run could not be written.
    #[error("error writing run log to `{path}`")]
    RunLogWrite {
        /// The path to the log.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The raw log for a run could not be read.
    #[error("error reading run log from `{path}`")]
    RunLogRead {
        /// The path to the log.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A test case could not be serialized.
    #[error("error serializing test case for run `{run_id}`")]
    TestCaseSerialize {
        /// The run the test case belongs to.
        run_id: RunId,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A test case could not be appended.
    #[error("error appending test case to `{path}`")]
    TestCaseWrite {
        /// The path to the test case file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Test cases could not be read.
    #[error("error reading test cases from `{path}`")]
    TestCaseRead {
        /// The path to the test case file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A test case row could not be deserialized.
    #[error("error deserializing test case at `{path}` line {line}")]
    TestCaseDeserialize {
        /// The path to the test case file.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line: usize,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error returned by [`RunController::run_tests`](crate::session::RunController::run_tests).
#[derive(Debug, Error)]
pub enum RunTestsError {
    /// The plan was empty. Nothing was submitted.
    #[error(transparent)]
    Validation(#[from] PlanValidationError),

    /// The backend could not start the run, or never reported a run id.
    #[error("execution backend failed")]
    Submission(#[source] BackendError),

    /// The run finished but could not be committed to the store.
    #[error("failed to persist run `{run_id}`")]
    Persistence {
        /// The backend-issued run id.
        run_id: RunId,

        /// The underlying error.
        #[source]
        error: RunStoreError,
    },
}
