// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted backends and instrumented stores for controller tests.

use crate::{
    backend::{EventReceiver, ExecutionBackend},
    errors::{BackendError, RunStoreError},
    store::{InMemoryRunStore, RunQuery, RunStore},
};
use std::{
    future::Future,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;
use xctr_metadata::{
    RunCompletion, RunId, RunRecord, RunTestsRequest, TestCaseRecord, TestRunEvent,
};

/// A backend that replays a fixed list of events for every submission.
#[derive(Debug, Default)]
pub(crate) struct ScriptedBackend {
    events: Vec<TestRunEvent>,
    reject: Option<String>,
    submitted: Mutex<Vec<RunTestsRequest>>,
    cancels: AtomicUsize,
    finished_before_cancel: bool,
}

impl ScriptedBackend {
    pub(crate) fn new(events: Vec<TestRunEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub(crate) fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_owned()),
            ..Self::default()
        }
    }

    /// Replays `events`, but reports no active run to `cancel`, as if the
    /// last target finished before the request arrived.
    pub(crate) fn finished_before_cancel(events: Vec<TestRunEvent>) -> Self {
        Self {
            events,
            finished_before_cancel: true,
            ..Self::default()
        }
    }

    pub(crate) fn submitted(&self) -> Vec<RunTestsRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn submit(
        &self,
        request: RunTestsRequest,
    ) -> impl Future<Output = Result<EventReceiver, BackendError>> + Send {
        self.submitted.lock().unwrap().push(request);
        let result = match &self.reject {
            Some(message) => Err(BackendError::Rejected {
                message: message.clone(),
            }),
            None => {
                let (sender, receiver) = mpsc::unbounded_channel();
                for event in &self.events {
                    sender.send(event.clone()).unwrap();
                }
                Ok(receiver)
            }
        };
        std::future::ready(result)
    }

    fn cancel(&self) -> Result<(), BackendError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.finished_before_cancel {
            return Err(BackendError::NoActiveRun);
        }
        Ok(())
    }
}

/// Which store operation should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailOn {
    InsertRun,
    UpdateRunCompletion,
    InsertTestCase,
}

/// An in-memory store that records every call and can be told to fail.
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    inner: InMemoryRunStore,
    calls: Mutex<Vec<&'static str>>,
    fail_on: Option<FailOn>,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(fail_on: FailOn) -> Self {
        Self {
            fail_on: Some(fail_on),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str, op: FailOn, run_id: &RunId) -> Result<(), RunStoreError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(op) {
            return Err(RunStoreError::RunNotFound {
                run_id: run_id.clone(),
            });
        }
        Ok(())
    }
}

impl RunStore for RecordingStore {
    fn insert_run(&self, run: &RunRecord) -> Result<(), RunStoreError> {
        self.record("insert_run", FailOn::InsertRun, &run.id)?;
        self.inner.insert_run(run)
    }

    fn update_run_completion(&self, completion: &RunCompletion) -> Result<(), RunStoreError> {
        self.record(
            "update_run_completion",
            FailOn::UpdateRunCompletion,
            &completion.id,
        )?;
        self.inner.update_run_completion(completion)
    }

    fn insert_test_case(&self, test_case: &TestCaseRecord) -> Result<(), RunStoreError> {
        self.record("insert_test_case", FailOn::InsertTestCase, &test_case.run_id)?;
        self.inner.insert_test_case(test_case)
    }

    fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        self.inner.runs(query)
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RunStoreError> {
        self.inner.run(run_id)
    }

    fn test_cases(&self, run_id: &RunId) -> Result<Vec<TestCaseRecord>, RunStoreError> {
        self.inner.test_cases(run_id)
    }

    fn delete_runs(&self, run_ids: &[RunId]) -> Result<usize, RunStoreError> {
        self.inner.delete_runs(run_ids)
    }
}
