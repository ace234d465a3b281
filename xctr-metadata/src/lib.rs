// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured types exchanged between `xctr` and execution backends, and the
//! records `xctr` commits to its run store.
//!
//! * [`TestRunEvent`] is the event union an execution backend streams while a
//!   run is in progress.
//! * [`RunTestsRequest`] is the plan submitted to a backend.
//! * [`RunRecord`] and [`TestCaseRecord`] are the durable records of a run.
//!
//! All types serialize to JSON with `snake_case` field names, so backends
//! written in other languages can produce and consume them.

mod errors;
mod events;
mod exit_codes;
mod records;
mod request;

pub use errors::*;
pub use events::*;
pub use exit_codes::*;
pub use records::*;
pub use request::*;
