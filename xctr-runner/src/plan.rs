// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building execution plans from target keys.
//!
//! Everything here is pure. The builders never fail: an empty input yields an
//! empty plan, and emptiness is checked by [`ExecutionPlan::validate`].

use crate::{
    errors::PlanValidationError,
    selection::{RunMode, SelectionModel},
};
use camino::Utf8PathBuf;
use indexmap::IndexSet;
use xctr_metadata::{
    PackageTarget, RunTestsRequest, SchemeTarget, TARGET_KEY_SEPARATOR, TestPlanRun,
};

/// Where the plan's entries came from. Only used to word validation errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Everything discovered for the project (`mode = all`).
    Discovered,
    /// The user's selection or an explicit override.
    Selected,
}

impl PlanOrigin {
    pub(crate) fn no_targets_message(self) -> &'static str {
        match self {
            Self::Discovered => {
                "no runnable schemes or Swift packages were discovered for this project"
            }
            Self::Selected => "no targets selected",
        }
    }

    pub(crate) fn no_test_plans_message(self) -> &'static str {
        match self {
            Self::Discovered => "no test plans were discovered",
            Self::Selected => "no test plans selected",
        }
    }
}

/// Whether to run the current selection or everything discovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlanMode {
    /// Run the selection (or explicit overrides).
    #[default]
    Selected,
    /// Run everything discovered, as supplied in the `all_*` lists.
    All,
}

/// Inputs that take priority over the selection when resolving a plan.
///
/// For each category, the first present source wins: the `override_*` list,
/// then the `all_*` list if `mode` is [`PlanMode::All`], then the
/// [`SelectionModel`].
#[derive(Clone, Debug, Default)]
pub struct PlanInputs {
    /// Selected or all.
    pub mode: PlanMode,
    /// Every discovered scheme key, used with [`PlanMode::All`].
    pub all_scheme_targets: Option<Vec<String>>,
    /// Every discovered package key, used with [`PlanMode::All`].
    pub all_package_targets: Option<Vec<String>>,
    /// Every discovered test plan run, used with [`PlanMode::All`].
    pub all_test_plan_runs: Option<Vec<TestPlanRun>>,
    /// Explicit scheme keys, e.g. when running a saved suite.
    pub override_scheme_targets: Option<Vec<String>>,
    /// Explicit package keys, e.g. when running a saved suite.
    pub override_package_targets: Option<Vec<String>>,
    /// Explicit test plan runs, e.g. when running one specific plan.
    pub override_test_plan_runs: Option<Vec<TestPlanRun>>,
    /// The scheme selected test plans are run under.
    pub default_scheme_for_test_plans: Option<String>,
}

/// A structured, deduplicated plan for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    run_mode: RunMode,
    origin: Option<PlanOrigin>,
    scheme_targets: Vec<SchemeTarget>,
    packages: Vec<PackageTarget>,
    test_plan_runs: Vec<TestPlanRun>,
}

impl ExecutionPlan {
    /// Resolves a plan from the selection and the given inputs.
    ///
    /// Only the entries meaningful for the selection's run mode are kept: in
    /// [`RunMode::Targets`] the plan has no test plan runs, and in
    /// [`RunMode::TestPlans`] it has no scheme or package targets. The plan
    /// therefore always matches exactly what is submitted to the backend.
    pub fn resolve(selection: &SelectionModel, inputs: &PlanInputs) -> Self {
        let run_mode = selection.run_mode();
        let all = inputs.mode == PlanMode::All;

        let (scheme_targets, packages, test_plan_runs) = match run_mode {
            RunMode::Targets => {
                let scheme_targets = if let Some(keys) = &inputs.override_scheme_targets {
                    build_scheme_targets(keys)
                } else if let (true, Some(keys)) = (all, &inputs.all_scheme_targets) {
                    build_scheme_targets(keys)
                } else {
                    build_scheme_targets(selection.scheme_targets())
                };
                let packages = if let Some(keys) = &inputs.override_package_targets {
                    build_package_targets(keys)
                } else if let (true, Some(keys)) = (all, &inputs.all_package_targets) {
                    build_package_targets(keys)
                } else {
                    build_package_targets(selection.package_targets())
                };
                (scheme_targets, packages, Vec::new())
            }
            RunMode::TestPlans => {
                let test_plan_runs = if let Some(runs) = &inputs.override_test_plan_runs {
                    dedup_test_plan_runs(runs.iter().cloned())
                } else if let (true, Some(runs)) = (all, &inputs.all_test_plan_runs) {
                    dedup_test_plan_runs(runs.iter().cloned())
                } else {
                    let scheme = inputs
                        .default_scheme_for_test_plans
                        .clone()
                        .unwrap_or_default();
                    dedup_test_plan_runs(selection.test_plans().iter().map(|plan| TestPlanRun {
                        scheme: scheme.clone(),
                        test_plan_name: plan.clone(),
                    }))
                };
                (Vec::new(), Vec::new(), test_plan_runs)
            }
        };

        Self {
            run_mode,
            origin: Some(if all {
                PlanOrigin::Discovered
            } else {
                PlanOrigin::Selected
            }),
            scheme_targets,
            packages,
            test_plan_runs,
        }
    }

    /// Creates a plan directly from its parts.
    pub fn from_parts(
        run_mode: RunMode,
        scheme_targets: Vec<SchemeTarget>,
        packages: Vec<PackageTarget>,
        test_plan_runs: Vec<TestPlanRun>,
    ) -> Self {
        Self {
            run_mode,
            origin: None,
            scheme_targets,
            packages,
            test_plan_runs,
        }
    }

    /// Returns the run mode this plan was resolved for.
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// Returns the scheme targets.
    pub fn scheme_targets(&self) -> &[SchemeTarget] {
        &self.scheme_targets
    }

    /// Returns the package targets.
    pub fn packages(&self) -> &[PackageTarget] {
        &self.packages
    }

    /// Returns the test plan runs.
    pub fn test_plan_runs(&self) -> &[TestPlanRun] {
        &self.test_plan_runs
    }

    /// Returns true if the plan has at least one scheme or package target.
    pub fn has_targets(&self) -> bool {
        !self.scheme_targets.is_empty() || !self.packages.is_empty()
    }

    /// Returns true if the plan has at least one test plan run.
    pub fn has_test_plans(&self) -> bool {
        !self.test_plan_runs.is_empty()
    }

    /// Checks that the plan has something to run for its run mode.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        let origin = self.origin.unwrap_or(PlanOrigin::Selected);
        match self.run_mode {
            RunMode::Targets if !self.has_targets() => {
                Err(PlanValidationError::NoRunnableTargets { origin })
            }
            RunMode::TestPlans if !self.has_test_plans() => {
                Err(PlanValidationError::NoTestPlansSelected { origin })
            }
            _ => Ok(()),
        }
    }

    /// Returns the derived scope label for this plan.
    pub fn scope_label(&self) -> &'static str {
        let has_schemes = !self.scheme_targets.is_empty();
        let has_packages = !self.packages.is_empty();

        if self.has_targets() && self.has_test_plans() {
            "Both"
        } else if self.has_test_plans() {
            "Test plans"
        } else if has_schemes && has_packages {
            "Both"
        } else if has_schemes {
            "Project"
        } else {
            "Packages"
        }
    }

    /// Returns the canonical ordered target keys for this plan.
    pub fn target_keys(&self) -> Vec<String> {
        build_target_keys_for_run(&self.scheme_targets, &self.test_plan_runs, &self.packages)
    }

    /// Converts this plan into a backend request.
    pub fn to_request(
        &self,
        project_path: Utf8PathBuf,
        stop_on_first_failure: bool,
        destination: Option<String>,
    ) -> RunTestsRequest {
        RunTestsRequest {
            project_path,
            scheme_targets: self.scheme_targets.clone(),
            packages: self.packages.clone(),
            stop_on_first_failure,
            test_plan_runs: self.test_plan_runs.clone(),
            destination,
        }
    }
}

/// Builds scheme targets from keys of the form `scheme` or `scheme|target`.
///
/// Whole schemes come first, in first-seen order, one entry each. Single
/// targets follow in input order, except those whose scheme is also selected
/// whole: running the whole scheme already covers them.
pub fn build_scheme_targets<I>(keys: I) -> Vec<SchemeTarget>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let (whole, pairs) = partition_keys(keys);
    whole
        .into_iter()
        .map(|scheme| SchemeTarget {
            scheme,
            only_testing_target: None,
        })
        .chain(pairs.into_iter().map(|(scheme, target)| SchemeTarget {
            scheme,
            only_testing_target: Some(target),
        }))
        .collect()
}

/// Builds package targets from keys of the form `path` or `path|target`.
///
/// Follows the same ordering and dedup rule as [`build_scheme_targets`].
pub fn build_package_targets<I>(keys: I) -> Vec<PackageTarget>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let (whole, pairs) = partition_keys(keys);
    whole
        .into_iter()
        .map(|path| PackageTarget { path, filter: None })
        .chain(
            pairs
                .into_iter()
                .map(|(path, filter)| PackageTarget {
                    path,
                    filter: Some(filter),
                }),
        )
        .collect()
}

/// Builds the canonical ordered list of target keys for a run.
///
/// The order is fixed: scheme targets, then test plan runs, then packages.
/// Backends run targets in this same order, and the live state advances
/// through it one target at a time.
pub fn build_target_keys_for_run(
    scheme_targets: &[SchemeTarget],
    test_plan_runs: &[TestPlanRun],
    packages: &[PackageTarget],
) -> Vec<String> {
    scheme_targets
        .iter()
        .map(SchemeTarget::key)
        .chain(test_plan_runs.iter().map(TestPlanRun::key))
        .chain(packages.iter().map(PackageTarget::key))
        .collect()
}

/// Splits keys at the first separator into whole names and `(name, target)`
/// pairs, dropping pairs whose name is whole-selected.
fn partition_keys<I>(keys: I) -> (IndexSet<String>, IndexSet<(String, String)>)
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut whole = IndexSet::new();
    let mut pairs = IndexSet::new();
    for key in keys {
        match key.as_ref().split_once(TARGET_KEY_SEPARATOR) {
            None => {
                whole.insert(key.as_ref().to_owned());
            }
            Some((name, target)) => {
                pairs.insert((name.to_owned(), target.to_owned()));
            }
        }
    }
    pairs.retain(|(name, _)| !whole.contains(name));
    (whole, pairs)
}

fn dedup_test_plan_runs(runs: impl IntoIterator<Item = TestPlanRun>) -> Vec<TestPlanRun> {
    runs.into_iter().collect::<IndexSet<_>>().into_iter().collect()
}
