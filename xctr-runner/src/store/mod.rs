// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage of runs and their test cases.
//!
//! A run is inserted once with status `running` when the backend reports its
//! id, updated exactly once with its terminal state, and then has its test
//! cases inserted one row at a time. Run ids always come from the backend.

mod json;
mod memory;
mod retention;

pub use json::JsonRunStore;
pub use memory::InMemoryRunStore;
pub use retention::RetentionPolicy;

use crate::errors::RunStoreError;
use tokio::sync::broadcast;
use tracing::debug;
use xctr_metadata::{RunCompletion, RunId, RunRecord, TestCaseRecord};

/// The number of runs returned by [`RunQuery::default`].
pub const DEFAULT_RUN_LIST_LIMIT: usize = 50;

/// Storage for run records and test case records.
///
/// Implementations use interior mutability, so a store can be shared between
/// the controller and readers.
pub trait RunStore {
    /// Inserts a new run. Fails if a run with the same id exists.
    fn insert_run(&self, run: &RunRecord) -> Result<(), RunStoreError>;

    /// Applies the terminal update to an existing run.
    fn update_run_completion(&self, completion: &RunCompletion) -> Result<(), RunStoreError>;

    /// Inserts a single test case row for an existing run.
    fn insert_test_case(&self, test_case: &TestCaseRecord) -> Result<(), RunStoreError>;

    /// Returns runs matching the query, newest first.
    ///
    /// Records returned here may omit the raw log; use [`Self::run`] to get it.
    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>, RunStoreError>;

    /// Returns a single run, including its raw log.
    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RunStoreError>;

    /// Returns the test cases of a run, ordered by suite and then test name.
    fn test_cases(&self, run_id: &RunId) -> Result<Vec<TestCaseRecord>, RunStoreError>;

    /// Deletes runs and their test cases. Unknown ids are skipped.
    ///
    /// Returns the number of runs deleted.
    fn delete_runs(&self, run_ids: &[RunId]) -> Result<usize, RunStoreError>;
}

impl<S: RunStore + ?Sized> RunStore for &S {
    fn insert_run(&self, run: &RunRecord) -> Result<(), RunStoreError> {
        (**self).insert_run(run)
    }

    fn update_run_completion(&self, completion: &RunCompletion) -> Result<(), RunStoreError> {
        (**self).update_run_completion(completion)
    }

    fn insert_test_case(&self, test_case: &TestCaseRecord) -> Result<(), RunStoreError> {
        (**self).insert_test_case(test_case)
    }

    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        (**self).runs(query)
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RunStoreError> {
        (**self).run(run_id)
    }

    fn test_cases(&self, run_id: &RunId) -> Result<Vec<TestCaseRecord>, RunStoreError> {
        (**self).test_cases(run_id)
    }

    fn delete_runs(&self, run_ids: &[RunId]) -> Result<usize, RunStoreError> {
        (**self).delete_runs(run_ids)
    }
}

/// Filters for [`RunStore::runs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunQuery {
    /// Only return runs for this project.
    pub project_id: Option<String>,
    /// Maximum number of runs to return.
    pub limit: usize,
}

impl RunQuery {
    /// A query matching every run.
    pub fn all() -> Self {
        Self {
            project_id: None,
            limit: usize::MAX,
        }
    }

    pub(crate) fn apply(&self, mut runs: Vec<RunRecord>) -> Vec<RunRecord> {
        runs.retain(|run| match &self.project_id {
            Some(project_id) => run.project_id.as_ref() == Some(project_id),
            None => true,
        });
        // Stable sort: runs started at the same instant keep insertion order,
        // reversed.
        runs.reverse();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(self.limit);
        runs
    }
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            project_id: None,
            limit: DEFAULT_RUN_LIST_LIMIT,
        }
    }
}

/// A view of stored runs that must be refreshed after a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunViewKind {
    /// The list of runs.
    Runs,
    /// Per-test history across runs.
    History,
}

/// Broadcasts invalidations of run views.
#[derive(Clone, Debug)]
pub struct RunViews {
    sender: broadcast::Sender<RunViewKind>,
}

impl RunViews {
    /// Creates a new set of views with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Subscribes to invalidations.
    pub fn subscribe(&self) -> broadcast::Receiver<RunViewKind> {
        self.sender.subscribe()
    }

    /// Signals that `kind` must be refreshed.
    pub fn invalidate(&self, kind: RunViewKind) {
        // An error only means nobody is listening.
        if self.sender.send(kind).is_err() {
            debug!("no subscribers for {kind:?} invalidation");
        }
    }
}

impl Default for RunViews {
    fn default() -> Self {
        Self::new()
    }
}
