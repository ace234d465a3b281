// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running a plan end to end.
//!
//! A [`RunController`] resolves and validates the plan, submits it to an
//! [`ExecutionBackend`](crate::backend::ExecutionBackend), applies the event
//! stream to a [`LiveRunState`](crate::live::LiveRunState), and commits the
//! outcome to a [`RunStore`](crate::store::RunStore).

mod accumulator;
mod controller;

pub use controller::*;
