// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `xctr` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum XctrExitCode {}

impl XctrExitCode {
    /// No errors occurred and the run passed.
    pub const OK: i32 = 0;

    /// No targets or test plans were selected to run.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests or targets failed, or the run was cancelled.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The execution backend could not be started or never reported a run.
    pub const BACKEND_FAILED: i32 = 101;

    /// The run finished but could not be committed to the run store.
    pub const PERSISTENCE_FAILED: i32 = 102;

    /// A requested run was not found in the run store.
    pub const RUN_NOT_FOUND: i32 = 103;

    /// A user issue happened while setting up an `xctr` invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
