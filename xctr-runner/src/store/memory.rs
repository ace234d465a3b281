// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RunQuery, RunStore};
use crate::errors::RunStoreError;
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use xctr_metadata::{RunCompletion, RunId, RunRecord, TestCaseRecord};

/// A run store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: IndexMap<RunId, RunRecord>,
    test_cases: IndexMap<RunId, Vec<TestCaseRecord>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation is a single insert or assignment, so a poisoned lock
        // still guards consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunStore for InMemoryRunStore {
    fn insert_run(&self, run: &RunRecord) -> Result<(), RunStoreError> {
        let mut inner = self.lock();
        if inner.runs.contains_key(&run.id) {
            return Err(RunStoreError::DuplicateRun {
                run_id: run.id.clone(),
            });
        }
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn update_run_completion(&self, completion: &RunCompletion) -> Result<(), RunStoreError> {
        let mut inner = self.lock();
        let record = inner
            .runs
            .get_mut(&completion.id)
            .ok_or_else(|| RunStoreError::RunNotFound {
                run_id: completion.id.clone(),
            })?;
        record.apply_completion(completion);
        Ok(())
    }

    fn insert_test_case(&self, test_case: &TestCaseRecord) -> Result<(), RunStoreError> {
        let mut inner = self.lock();
        if !inner.runs.contains_key(&test_case.run_id) {
            return Err(RunStoreError::RunNotFound {
                run_id: test_case.run_id.clone(),
            });
        }
        inner
            .test_cases
            .entry(test_case.run_id.clone())
            .or_default()
            .push(test_case.clone());
        Ok(())
    }

    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        let runs = self.lock().runs.values().cloned().collect();
        Ok(query.apply(runs))
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RunStoreError> {
        Ok(self.lock().runs.get(run_id).cloned())
    }

    fn test_cases(&self, run_id: &RunId) -> Result<Vec<TestCaseRecord>, RunStoreError> {
        let mut test_cases = self
            .lock()
            .test_cases
            .get(run_id)
            .cloned()
            .unwrap_or_default();
        test_cases.sort_by(|a, b| {
            (&a.suite_name, &a.test_name).cmp(&(&b.suite_name, &b.test_name))
        });
        Ok(test_cases)
    }

    fn delete_runs(&self, run_ids: &[RunId]) -> Result<usize, RunStoreError> {
        let mut inner = self.lock();
        let mut deleted = 0;
        for run_id in run_ids {
            if inner.runs.shift_remove(run_id).is_some() {
                deleted += 1;
            }
            inner.test_cases.shift_remove(run_id);
        }
        Ok(deleted)
    }
}
