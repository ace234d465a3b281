// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The user's current target and test plan selection.
//!
//! [`SelectionModel`] is plain state: every operation is synchronous, total and
//! idempotent under repeated identical toggles. Sets keep insertion order so
//! that the plan built from them is deterministic.

use indexmap::IndexSet;

/// Which part of the selection is meaningful for the next run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Run the selected scheme and package targets. Test plan selection is
    /// ignored for execution.
    #[default]
    Targets,

    /// Run the selected test plans. Target selection is ignored for execution.
    TestPlans,
}

impl RunMode {
    /// Returns the string form of this mode, as used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Targets => "targets",
            Self::TestPlans => "test-plans",
        }
    }
}

/// Target keys and test plan names selected for the next run.
///
/// Scheme keys are `"<scheme>"` or `"<scheme>|<target>"`; package keys are
/// `"<path>"` or `"<path>|<target>"`; test plan keys are plan names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionModel {
    scheme_targets: IndexSet<String>,
    package_targets: IndexSet<String>,
    test_plans: IndexSet<String>,
    run_mode: RunMode,
}

impl SelectionModel {
    /// Creates an empty selection in [`RunMode::Targets`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the selected scheme keys, in insertion order.
    pub fn scheme_targets(&self) -> &IndexSet<String> {
        &self.scheme_targets
    }

    /// Returns the selected package keys, in insertion order.
    pub fn package_targets(&self) -> &IndexSet<String> {
        &self.package_targets
    }

    /// Returns the selected test plan names, in insertion order.
    pub fn test_plans(&self) -> &IndexSet<String> {
        &self.test_plans
    }

    /// Returns the current run mode.
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// Sets the run mode. Neither selection is cleared.
    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.run_mode = mode;
    }

    /// Adds the scheme key if absent, removes it if present.
    pub fn toggle_scheme_target(&mut self, key: impl Into<String>) {
        toggle(&mut self.scheme_targets, key.into());
    }

    /// Adds the package key if absent, removes it if present.
    pub fn toggle_package_target(&mut self, key: impl Into<String>) {
        toggle(&mut self.package_targets, key.into());
    }

    /// Adds the test plan if absent, removes it if present.
    pub fn toggle_test_plan(&mut self, key: impl Into<String>) {
        toggle(&mut self.test_plans, key.into());
    }

    /// Replaces both target selections wholesale.
    pub fn select_all_targets<S, P>(&mut self, scheme_keys: S, package_keys: P)
    where
        S: IntoIterator,
        S::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        self.scheme_targets = scheme_keys.into_iter().map(Into::into).collect();
        self.package_targets = package_keys.into_iter().map(Into::into).collect();
    }

    /// Replaces the test plan selection wholesale.
    pub fn select_all_test_plans<I>(&mut self, plan_keys: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.test_plans = plan_keys.into_iter().map(Into::into).collect();
    }

    /// Clears every selection. The run mode is kept.
    pub fn clear_all(&mut self) {
        self.clear_targets();
        self.clear_test_plans();
    }

    /// Clears the scheme and package selections.
    pub fn clear_targets(&mut self) {
        self.scheme_targets.clear();
        self.package_targets.clear();
    }

    /// Clears the test plan selection.
    pub fn clear_test_plans(&mut self) {
        self.test_plans.clear();
    }
}

fn toggle(set: &mut IndexSet<String>, key: String) {
    // shift_remove keeps the remaining keys in insertion order.
    if !set.shift_remove(&key) {
        set.insert(key);
    }
}
