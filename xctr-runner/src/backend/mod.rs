// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution backends: the things that actually run tests.
//!
//! A backend accepts a [`RunTestsRequest`] and streams [`TestRunEvent`]s back.
//! The stream always starts with `RunStarted`, carrying the backend-issued run
//! id, and should end with `RunFinished`. Targets run in canonical order:
//! scheme targets, then test plan runs, then packages.

mod command;
mod parse;
mod process;

pub use process::ProcessBackend;

use crate::errors::BackendError;
use std::future::Future;
use tokio::sync::mpsc;
use xctr_metadata::{RunTestsRequest, TestRunEvent};

/// The receiving end of a backend's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TestRunEvent>;

/// Something that can run a [`RunTestsRequest`].
pub trait ExecutionBackend {
    /// Starts running `request` and returns its event stream.
    ///
    /// Returns an error if the run could not be started at all. Failures of
    /// individual targets are reported in the stream instead.
    fn submit(
        &self,
        request: RunTestsRequest,
    ) -> impl Future<Output = Result<EventReceiver, BackendError>> + Send;

    /// Requests cancellation of the active run.
    ///
    /// Cancellation is advisory: the stream keeps going until the backend
    /// stops the current target and emits `RunFinished`.
    fn cancel(&self) -> Result<(), BackendError>;
}
