// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod fixtures;

use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use fixtures::JsonLinesBackend;
use indoc::indoc;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use xctr_metadata::{PackageTarget, RunId, RunStatus, TestStatus};
use xctr_runner::{
    live::LiveRunState,
    plan::{PlanInputs, PlanMode},
    selection::SelectionModel,
    session::{RunController, RunTestsOptions, RunTestsParams},
    store::{JsonRunStore, RetentionPolicy, RunQuery, RunStore},
};

static MIXED_RUN: &str = indoc! {r#"
    {"type":"Stdout","line":"Test Suite 'All tests' started"}
    {"type":"TestCompleted","name":"testLogin","suite":"LoginTests","status":"passed","duration_ms":120}
    {"type":"TestCompleted","name":"testLogout","suite":"LoginTests","status":"failed","duration_ms":45}
    {"type":"Progress","tests_run":2,"tests_total":3}
    {"type":"TargetCompleted","key":"App|LoginTests","success":false}
    {"type":"Stderr","line":"warning: unused variable"}
    {"type":"TestCompleted","name":"testParse","suite":"CoreTests","status":"skipped","duration_ms":0}
    {"type":"TargetCompleted","key":"Packages/Core","success":true}
    {"type":"RunFinished"}
"#};

fn params(project: &Utf8TempDir) -> RunTestsParams {
    RunTestsParams {
        project_path: project.path().to_owned(),
        stop_on_first_failure: false,
        project_id: Some("app".to_owned()),
        destination: Some("platform=iOS Simulator,name=iPhone 16".to_owned()),
    }
}

fn mixed_selection() -> SelectionModel {
    let mut selection = SelectionModel::new();
    selection.toggle_scheme_target("App|LoginTests");
    selection.toggle_package_target("Packages/Core");
    selection
}

#[tokio::test]
async fn run_is_committed_to_disk() -> Result<()> {
    let project = Utf8TempDir::new()?;
    let store_dir = Utf8TempDir::new()?;
    let controller = RunController::new(
        JsonLinesBackend::new(MIXED_RUN),
        JsonRunStore::new(store_dir.path())?,
    );
    let mut live = LiveRunState::new();

    let completion = controller
        .run_tests(
            &mut live,
            &mixed_selection(),
            &params(&project),
            &RunTestsOptions::default(),
            |_, _| {},
        )
        .await?;
    assert_eq!(completion.status, RunStatus::Failed);

    let requests = controller.backend().requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].packages,
        [PackageTarget {
            path: "Packages/Core".to_owned(),
            filter: None,
        }]
    );
    assert_eq!(
        requests[0].destination.as_deref(),
        Some("platform=iOS Simulator,name=iPhone 16")
    );

    // Reopen the store to read back what was written.
    let store = JsonRunStore::new(store_dir.path())?;
    let run = store
        .run(&RunId::new("run-1"))?
        .expect("run-1 was committed");
    assert_eq!(run.scope, "Both");
    assert_eq!(
        (
            run.total_tests,
            run.passed_tests,
            run.failed_tests,
            run.skipped_tests
        ),
        (3, 1, 1, 1)
    );
    assert_eq!(
        run.raw_log.as_deref(),
        Some("Test Suite 'All tests' started\n[stderr] warning: unused variable")
    );
    let target_results: BTreeMap<_, _> = run
        .target_results
        .unwrap_or_default()
        .into_iter()
        .map(|result| (result.key, result.success))
        .collect();
    assert_eq!(
        target_results,
        btreemap! {
            "App|LoginTests".to_owned() => false,
            "Packages/Core".to_owned() => true,
        }
    );

    let statuses: BTreeMap<_, _> = store
        .test_cases(&RunId::new("run-1"))?
        .into_iter()
        .map(|test_case| (test_case.test_name, test_case.status))
        .collect();
    assert_eq!(
        statuses,
        btreemap! {
            "testLogin".to_owned() => TestStatus::Passed,
            "testLogout".to_owned() => TestStatus::Failed,
            "testParse".to_owned() => TestStatus::Skipped,
        }
    );

    // The run list never carries raw logs.
    let listed = store.runs(&RunQuery::default())?;
    ensure!(listed.len() == 1, "expected one listed run, got {listed:?}");
    assert_eq!(listed[0].raw_log, None);

    Ok(())
}

#[tokio::test]
async fn run_all_then_prune() -> Result<()> {
    let project = Utf8TempDir::new()?;
    let store_dir = Utf8TempDir::new()?;
    let controller = RunController::new(
        JsonLinesBackend::new(r#"{"type":"RunFinished"}"#),
        JsonRunStore::new(store_dir.path())?,
    );
    let options = RunTestsOptions {
        plan: PlanInputs {
            mode: PlanMode::All,
            all_scheme_targets: Some(vec!["App".to_owned(), "Widgets".to_owned()]),
            ..PlanInputs::default()
        },
        scope_label: None,
    };

    for _ in 0..3 {
        let completion = controller
            .run_tests(
                &mut LiveRunState::new(),
                &SelectionModel::new(),
                &params(&project),
                &options,
                |_, _| {},
            )
            .await?;
        assert_eq!(completion.status, RunStatus::Passed);
    }

    let requests = controller.backend().requests.lock().unwrap().clone();
    let schemes: Vec<_> = requests[0]
        .scheme_targets
        .iter()
        .map(|target| target.scheme.as_str())
        .collect();
    assert_eq!(schemes, ["App", "Widgets"]);

    let store = controller.store();
    assert_eq!(store.runs(&RunQuery::all())?.len(), 3);

    let deleted = RetentionPolicy::from_retain_last_runs(2).prune(store)?;
    assert_eq!(deleted.len(), 1);
    let remaining = store.runs(&RunQuery::all())?;
    assert_eq!(remaining.len(), 2);
    ensure!(
        remaining.iter().all(|run| !deleted.contains(&run.id)),
        "pruned run still listed"
    );
    assert_eq!(store.run(&deleted[0])?, None);

    Ok(())
}
