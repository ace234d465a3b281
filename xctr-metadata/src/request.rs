// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Separates a scheme or package path from a single target in a target key.
pub const TARGET_KEY_SEPARATOR: char = '|';

/// Prefix of the derived key used for test plan runs.
pub const PLAN_KEY_PREFIX: &str = "plan:";

/// The plan submitted to an execution backend.
///
/// Backends run entries in this order: every scheme target, then every test
/// plan run, then every package. That order matches the canonical target key
/// order used for progress tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTestsRequest {
    /// The project directory (containing the `.xcodeproj` or `.xcworkspace`).
    pub project_path: Utf8PathBuf,

    /// Schemes to test, optionally narrowed to one target each.
    pub scheme_targets: Vec<SchemeTarget>,

    /// Swift packages to test, optionally filtered to one target each.
    pub packages: Vec<PackageTarget>,

    /// Stop after the first failing target.
    pub stop_on_first_failure: bool,

    /// Test plans to run, each under a scheme.
    pub test_plan_runs: Vec<TestPlanRun>,

    /// Destination passed to `xcodebuild`: a destination specifier or a
    /// simulator UDID.
    pub destination: Option<String>,
}

/// A scheme to test, optionally restricted to a single test target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemeTarget {
    /// The scheme name.
    pub scheme: String,
    /// If set, only this test target is run (`-only-testing:<target>`).
    pub only_testing_target: Option<String>,
}

impl SchemeTarget {
    /// Returns the canonical key: `scheme|target`, or just `scheme`.
    pub fn key(&self) -> String {
        match &self.only_testing_target {
            Some(target) => format!("{}{TARGET_KEY_SEPARATOR}{}", self.scheme, target),
            None => self.scheme.clone(),
        }
    }
}

/// A Swift package to test, optionally filtered to a single target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageTarget {
    /// The package directory.
    pub path: String,
    /// If set, passed as `swift test --filter <filter>`.
    pub filter: Option<String>,
}

impl PackageTarget {
    /// Returns the canonical key: `path|target`, or just `path`.
    pub fn key(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{}{TARGET_KEY_SEPARATOR}{}", self.path, filter),
            None => self.path.clone(),
        }
    }
}

/// A named test plan, run under a scheme.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestPlanRun {
    /// The scheme the plan is run under.
    pub scheme: String,
    /// The test plan name.
    pub test_plan_name: String,
}

impl TestPlanRun {
    /// Returns the derived key `plan:<scheme>:<plan>`.
    ///
    /// This key is only used for display and ordering; it is never parsed
    /// back.
    pub fn key(&self) -> String {
        format!("{PLAN_KEY_PREFIX}{}:{}", self.scheme, self.test_plan_name)
    }
}
