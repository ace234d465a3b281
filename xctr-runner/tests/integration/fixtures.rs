// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    future::Future,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;
use xctr_metadata::{RunId, RunTestsRequest, TestRunEvent};
use xctr_runner::{
    backend::{EventReceiver, ExecutionBackend},
    errors::BackendError,
};

/// A backend that replays events parsed from JSON lines.
///
/// Each submission gets a fresh run id, `run-1`, `run-2` and so on, emitted
/// as the first event.
#[derive(Debug)]
pub(crate) struct JsonLinesBackend {
    script: Vec<TestRunEvent>,
    next_id: AtomicUsize,
    pub(crate) requests: Mutex<Vec<RunTestsRequest>>,
}

impl JsonLinesBackend {
    pub(crate) fn new(script: &str) -> Self {
        let script = script
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("valid event JSON"))
            .collect();
        Self {
            script,
            next_id: AtomicUsize::new(1),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ExecutionBackend for JsonLinesBackend {
    fn submit(
        &self,
        request: RunTestsRequest,
    ) -> impl Future<Output = Result<EventReceiver, BackendError>> + Send {
        self.requests.lock().unwrap().push(request);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        sender
            .send(TestRunEvent::RunStarted {
                run_id: RunId::new(format!("run-{id}")),
            })
            .unwrap();
        for event in &self.script {
            sender.send(event.clone()).unwrap();
        }
        std::future::ready(Ok(receiver))
    }

    fn cancel(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
