// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recognizing XCTest case results in tool output.

use regex::Regex;
use std::sync::LazyLock;
use xctr_metadata::{TestRunEvent, TestStatus};

// Test Case '-[SuiteName testMethod]' passed (0.001 seconds).
static XCODEBUILD_TEST_CASE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Test Case '-\[(\S+)\s+(\S+)\]' (passed|failed|skipped) \((\d+\.\d+) seconds\)\.")
        .unwrap()
});

// Test Case 'SuiteName.testMethod' passed (0.001 seconds)
static SWIFT_TEST_CASE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Test Case '([^.]+)\.(\S+)' (passed|failed|skipped) \((\d+\.\d+) seconds\)")
        .unwrap()
});

/// Parses a line of `xcodebuild` or `swift test` output into a
/// `TestCompleted` event, if it reports a finished test case.
pub(crate) fn parse_test_case(line: &str) -> Option<TestRunEvent> {
    let caps = XCODEBUILD_TEST_CASE_REGEX
        .captures(line)
        .or_else(|| SWIFT_TEST_CASE_REGEX.captures(line))?;

    let suite = caps[1].to_owned();
    let name = caps[2].to_owned();
    let status = caps[3].parse::<TestStatus>().ok()?;
    let seconds: f64 = caps[4].parse().ok()?;

    Some(TestRunEvent::TestCompleted {
        name,
        suite,
        status,
        duration_ms: (seconds * 1000.0).round() as u64,
    })
}
