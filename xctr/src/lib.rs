// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run Xcode schemes, test plans and Swift packages from the command line,
//! and keep a history of every run.
//!
//! The library half of the `xctr` binary. The orchestration itself lives in
//! [`xctr_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod history;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, Styles};
