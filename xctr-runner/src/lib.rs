// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for `xctr`: turning a target selection into an
//! execution plan, driving a single run against an execution backend, tracking
//! its live state, and committing the finished run to a run store.
//!
//! The basic flow is:
//!
//! 1. A [`SelectionModel`](selection::SelectionModel) holds what the user
//!    picked.
//! 2. The [`plan`] module turns it into a deduplicated
//!    [`ExecutionPlan`](plan::ExecutionPlan) and the canonical target key order.
//! 3. A [`RunController`](session::RunController) submits the plan to an
//!    [`ExecutionBackend`](backend::ExecutionBackend), applies each streamed
//!    event to a [`LiveRunState`](live::LiveRunState), and commits the run to a
//!    [`RunStore`](store::RunStore) once the stream ends.

pub mod backend;
pub mod config;
pub mod errors;
pub mod live;
pub mod plan;
pub mod selection;
pub mod session;
mod stopwatch;
pub mod store;
#[cfg(test)]
mod test_helpers;
