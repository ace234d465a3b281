// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building `xcodebuild` and `swift test` invocations for a request.

use crate::config::BackendConfig;
use camino::{Utf8Path, Utf8PathBuf};
use xctr_metadata::{RunTestsRequest, SchemeTarget, TestPlanRun};

/// A single tool invocation, tied to the target key it reports completion for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub(crate) key: String,
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) cwd: Utf8PathBuf,
}

impl Invocation {
    /// Wraps this invocation in `script -q /dev/null`, giving the tool a
    /// terminal so that it line-buffers its output.
    fn wrap_in_pty(self) -> Self {
        let mut args = vec![
            "-q".to_owned(),
            "/dev/null".to_owned(),
            "--".to_owned(),
            self.program,
        ];
        args.extend(self.args);
        Self {
            key: self.key,
            program: "script".to_owned(),
            args,
            cwd: self.cwd,
        }
    }
}

/// Builds every invocation for `request`, in canonical target order: scheme
/// targets, then test plan runs, then packages.
pub(crate) fn build_invocations(
    request: &RunTestsRequest,
    config: &BackendConfig,
    result_dir: &Utf8Path,
) -> Vec<Invocation> {
    let container = find_project_container(&request.project_path);
    let destination = request.destination.as_deref().filter(|d| !d.is_empty());
    let mut bundle_index = 0usize;
    let mut next_bundle_path = |scheme: &str| {
        bundle_index += 1;
        result_dir.join(format!("{bundle_index}-{scheme}.xcresult"))
    };

    let schemes = request.scheme_targets.iter().map(|target| {
        let SchemeTarget {
            scheme,
            only_testing_target,
        } = target;
        let bundle_path = next_bundle_path(scheme.as_str());
        let args = XcodebuildArgs {
            scheme,
            result_bundle_path: &bundle_path,
            container: container.as_ref(),
            test_plan: None,
            only_testing_target: only_testing_target.as_deref(),
            destination,
        }
        .build();
        (target.key(), config.xcodebuild.clone(), args, request.project_path.clone())
    });
    let schemes: Vec<_> = schemes.collect();

    let plans: Vec<_> = request
        .test_plan_runs
        .iter()
        .map(|run| {
            let TestPlanRun {
                scheme,
                test_plan_name,
            } = run;
            let bundle_path = next_bundle_path(scheme.as_str());
            let args = XcodebuildArgs {
                scheme,
                result_bundle_path: &bundle_path,
                container: container.as_ref(),
                test_plan: Some(test_plan_name.as_str()),
                only_testing_target: None,
                destination,
            }
            .build();
            (run.key(), config.xcodebuild.clone(), args, request.project_path.clone())
        })
        .collect();

    let packages = request.packages.iter().map(|package| {
        let package_path = request.project_path.join(&package.path);
        let mut args = vec![
            "test".to_owned(),
            "--package-path".to_owned(),
            package_path.to_string(),
        ];
        if let Some(filter) = &package.filter {
            args.extend(["--filter".to_owned(), filter.clone()]);
        }
        (package.key(), config.swift.clone(), args, package_path)
    });

    let wrap = config.wrap_in_pty && cfg!(target_os = "macos");
    schemes
        .into_iter()
        .chain(plans)
        .chain(packages)
        .map(|(key, program, args, cwd)| {
            let invocation = Invocation {
                key,
                program,
                args,
                cwd,
            };
            if wrap {
                invocation.wrap_in_pty()
            } else {
                invocation
            }
        })
        .collect()
}

/// The `.xcworkspace` or `.xcodeproj` an `xcodebuild` invocation should use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ProjectContainer {
    Workspace(Utf8PathBuf),
    Project(Utf8PathBuf),
}

/// Finds the container in `dir`, preferring a workspace over a project.
///
/// If neither is found, `xcodebuild` picks one itself.
pub(crate) fn find_project_container(dir: &Utf8Path) -> Option<ProjectContainer> {
    let mut entries: Vec<Utf8PathBuf> = dir
        .read_dir_utf8()
        .ok()?
        .flatten()
        .map(|entry| entry.into_path())
        .collect();
    entries.sort();

    let find = |ext: &str| entries.iter().find(|p| p.extension() == Some(ext)).cloned();
    find("xcworkspace")
        .map(ProjectContainer::Workspace)
        .or_else(|| find("xcodeproj").map(ProjectContainer::Project))
}

struct XcodebuildArgs<'a> {
    scheme: &'a str,
    result_bundle_path: &'a Utf8Path,
    container: Option<&'a ProjectContainer>,
    test_plan: Option<&'a str>,
    only_testing_target: Option<&'a str>,
    destination: Option<&'a str>,
}

impl XcodebuildArgs<'_> {
    fn build(&self) -> Vec<String> {
        let mut args = vec![
            "test".to_owned(),
            "-scheme".to_owned(),
            self.scheme.to_owned(),
            "-resultBundlePath".to_owned(),
            self.result_bundle_path.to_string(),
        ];
        match self.container {
            Some(ProjectContainer::Workspace(path)) => {
                args.extend(["-workspace".to_owned(), path.to_string()]);
            }
            Some(ProjectContainer::Project(path)) => {
                args.extend(["-project".to_owned(), path.to_string()]);
            }
            None => {}
        }
        if let Some(plan) = self.test_plan {
            args.extend(["-testPlan".to_owned(), plan.to_owned()]);
        }
        if let Some(target) = self.only_testing_target {
            args.push(format!("-only-testing:{target}"));
        }
        if let Some(destination) = self.destination {
            let value = if looks_like_udid(destination) {
                format!("id={destination}")
            } else {
                destination.to_owned()
            };
            args.extend(["-destination".to_owned(), value]);
        }
        args
    }
}

/// Returns true if `s` looks like a simulator UDID: 36 characters, four of them
/// dashes, the rest hex digits.
pub(crate) fn looks_like_udid(s: &str) -> bool {
    s.len() == 36
        && s.chars().filter(|&c| c == '-').count() == 4
        && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}
