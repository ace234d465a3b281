// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::accumulator::ShadowAccumulator;
use crate::{
    backend::ExecutionBackend,
    errors::{BackendError, RunStoreError, RunTestsError},
    live::{LiveRunState, LiveTestResult, OutputKind},
    plan::{ExecutionPlan, PlanInputs},
    selection::SelectionModel,
    stopwatch::{StopwatchStart, stopwatch},
    store::{RunStore, RunViewKind, RunViews},
};
use camino::Utf8PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use xctr_metadata::{RunCompletion, RunId, RunRecord, TestRunEvent};

/// Where and how to run.
#[derive(Clone, Debug, Default)]
pub struct RunTestsParams {
    /// The project directory.
    pub project_path: Utf8PathBuf,
    /// Stop after the first failing target.
    pub stop_on_first_failure: bool,
    /// The project identifier recorded with the run.
    pub project_id: Option<String>,
    /// The `xcodebuild` destination or simulator UDID.
    pub destination: Option<String>,
}

/// What to run, beyond the selection.
#[derive(Clone, Debug, Default)]
pub struct RunTestsOptions {
    /// Overrides and "run all" inputs for plan resolution.
    pub plan: PlanInputs,
    /// An explicit scope label. Derived from the plan if unset.
    pub scope_label: Option<String>,
}

/// Drives one run at a time from plan to durable record.
///
/// The controller does not lock against concurrent [`Self::run_tests`] calls:
/// callers run one session at a time.
#[derive(Debug)]
pub struct RunController<B, S> {
    backend: B,
    store: S,
    views: RunViews,
    cancel_requested: AtomicBool,
}

impl<B: ExecutionBackend, S: RunStore> RunController<B, S> {
    /// Creates a new controller.
    pub fn new(backend: B, store: S) -> Self {
        Self {
            backend,
            store,
            views: RunViews::new(),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the views invalidated after every committed run.
    pub fn views(&self) -> &RunViews {
        &self.views
    }

    /// Runs the tests described by `selection` and `options`.
    ///
    /// Every event is applied to `live` and then passed to `on_update`. On
    /// success, returns the terminal update committed to the store.
    pub async fn run_tests<F>(
        &self,
        live: &mut LiveRunState,
        selection: &SelectionModel,
        params: &RunTestsParams,
        options: &RunTestsOptions,
        mut on_update: F,
    ) -> Result<RunCompletion, RunTestsError>
    where
        F: FnMut(&TestRunEvent, &LiveRunState),
    {
        let plan = ExecutionPlan::resolve(selection, &options.plan);
        if let Err(error) = plan.validate() {
            live.append_output(error.to_string(), OutputKind::System);
            return Err(error.into());
        }

        let scope = options
            .scope_label
            .clone()
            .unwrap_or_else(|| plan.scope_label().to_owned());
        let target_keys = plan.target_keys();
        let request = plan.to_request(
            params.project_path.clone(),
            params.stop_on_first_failure,
            params.destination.clone(),
        );

        self.cancel_requested.store(false, Ordering::SeqCst);
        let start = stopwatch();
        debug!(
            "submitting {} targets for {} (scope: {scope})",
            target_keys.len(),
            params.project_path,
        );
        let mut receiver = match self.backend.submit(request).await {
            Ok(receiver) => receiver,
            Err(error) => {
                live.finish_run();
                return Err(RunTestsError::Submission(error));
            }
        };

        let mut session = Session {
            params,
            scope,
            target_keys,
            start,
            run_id: None,
            insert_error: None,
            finished: false,
            acc: ShadowAccumulator::default(),
        };

        while let Some(event) = receiver.recv().await {
            session.apply(&self.store, live, &event);
            on_update(&event, live);
            if session.finished {
                break;
            }
        }

        if !session.finished {
            warn!("event stream closed without RunFinished");
            live.finish_run();
        }

        self.commit(session)
    }

    /// Requests cancellation of the active run.
    ///
    /// Live state is not touched: the run ends when the backend closes the
    /// stream, and is then recorded as cancelled. If the backend has no
    /// active run, nothing is marked and the run keeps its derived status.
    pub fn cancel_run(&self) -> Result<(), BackendError> {
        self.backend.cancel()?;
        self.cancel_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self, session: Session<'_>) -> Result<RunCompletion, RunTestsError> {
        let Some(run_id) = session.run_id else {
            return Err(RunTestsError::Submission(BackendError::RunIdMissing));
        };
        let persistence = |error: RunStoreError| RunTestsError::Persistence {
            run_id: run_id.clone(),
            error,
        };

        if let Some(error) = session.insert_error {
            return Err(persistence(error));
        }

        let snapshot = session.start.snapshot();
        let completion = session.acc.completion(
            run_id.clone(),
            self.cancel_requested.load(Ordering::SeqCst),
            snapshot.end_time(),
            snapshot.duration_ms(),
        );
        self.store
            .update_run_completion(&completion)
            .map_err(persistence)?;
        for test_case in session.acc.test_cases(&run_id) {
            self.store
                .insert_test_case(&test_case)
                .map_err(persistence)?;
        }

        info!(
            "run {run_id} {}: {} tests, {} passed, {} failed, {} skipped",
            completion.status,
            completion.total_tests,
            completion.passed_tests,
            completion.failed_tests,
            completion.skipped_tests,
        );
        self.views.invalidate(RunViewKind::Runs);
        self.views.invalidate(RunViewKind::History);
        Ok(completion)
    }
}

/// Per-run state of a single `run_tests` call.
struct Session<'a> {
    params: &'a RunTestsParams,
    scope: String,
    target_keys: Vec<String>,
    start: StopwatchStart,
    run_id: Option<RunId>,
    insert_error: Option<RunStoreError>,
    finished: bool,
    acc: ShadowAccumulator,
}

impl Session<'_> {
    fn apply<S: RunStore>(&mut self, store: &S, live: &mut LiveRunState, event: &TestRunEvent) {
        match event {
            TestRunEvent::RunStarted { run_id } => {
                if let Some(current) = &self.run_id {
                    warn!("ignoring RunStarted for {run_id}: run {current} already started");
                    return;
                }
                debug!("run {run_id} started");
                self.run_id = Some(run_id.clone());
                live.start_run(run_id.clone(), self.target_keys.clone());

                let record = RunRecord::started(
                    run_id.clone(),
                    self.params.project_path.clone(),
                    self.params.project_id.clone(),
                    self.scope.clone(),
                    self.start.start_time(),
                );
                if let Err(error) = store.insert_run(&record) {
                    warn!("failed to record start of run {run_id}: {error}");
                    self.insert_error = Some(error);
                }
            }
            TestRunEvent::Stdout { line } => {
                live.append_output(line.clone(), OutputKind::Stdout);
                self.acc.push_stdout(line);
            }
            TestRunEvent::Stderr { line } => {
                live.append_output(line.clone(), OutputKind::Stderr);
                self.acc.push_stderr(line);
            }
            TestRunEvent::TestCompleted {
                name,
                suite,
                status,
                duration_ms,
            } => {
                live.add_test_result(LiveTestResult {
                    name: name.clone(),
                    suite: suite.clone(),
                    status: *status,
                    duration_ms: *duration_ms,
                });
                self.acc
                    .push_test_result(suite, name, *status, *duration_ms);
            }
            TestRunEvent::Progress {
                tests_run,
                tests_total,
            } => {
                live.set_progress(*tests_run, *tests_total);
            }
            TestRunEvent::TargetCompleted { key, success } => {
                live.set_target_completed(key, *success);
                self.acc.push_target_result(key, *success);
            }
            TestRunEvent::RunFinished {} => {
                live.finish_run();
                self.finished = true;
            }
            TestRunEvent::Error { message } => {
                live.append_output(format!("Error: {message}"), OutputKind::Stderr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::PlanValidationError,
        live::TargetRunStatus,
        plan::{PlanMode, PlanOrigin},
        selection::RunMode,
        test_helpers::{FailOn, RecordingStore, ScriptedBackend},
    };
    use pretty_assertions::assert_eq;
    use xctr_metadata::{RunStatus, SchemeTarget, TestPlanRun, TestStatus};

    fn params() -> RunTestsParams {
        RunTestsParams {
            project_path: "/work/App".into(),
            stop_on_first_failure: false,
            project_id: Some("p1".to_owned()),
            destination: None,
        }
    }

    fn started(id: &str) -> TestRunEvent {
        TestRunEvent::RunStarted {
            run_id: RunId::new(id),
        }
    }

    fn stdout(line: &str) -> TestRunEvent {
        TestRunEvent::Stdout {
            line: line.to_owned(),
        }
    }

    fn test_completed(suite: &str, name: &str, status: TestStatus, duration_ms: u64) -> TestRunEvent {
        TestRunEvent::TestCompleted {
            name: name.to_owned(),
            suite: suite.to_owned(),
            status,
            duration_ms,
        }
    }

    fn target_completed(key: &str, success: bool) -> TestRunEvent {
        TestRunEvent::TargetCompleted {
            key: key.to_owned(),
            success,
        }
    }

    fn foo_bar_selection() -> SelectionModel {
        let mut selection = SelectionModel::new();
        selection.toggle_scheme_target("Foo|BarTests");
        selection
    }

    fn foo_bar_events() -> Vec<TestRunEvent> {
        vec![
            started("r1"),
            stdout("Testing started"),
            test_completed("BarTests", "testX", TestStatus::Passed, 120),
            TestRunEvent::Progress {
                tests_run: 1,
                tests_total: 1,
            },
            target_completed("Foo|BarTests", true),
            TestRunEvent::RunFinished {},
        ]
    }

    #[tokio::test]
    async fn single_target_end_to_end() {
        let controller = RunController::new(
            ScriptedBackend::new(foo_bar_events()),
            RecordingStore::new(),
        );
        let mut views = controller.views().subscribe();
        let mut live = LiveRunState::new();
        let mut seen = Vec::new();

        let completion = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |event, live| {
                    if let TestRunEvent::RunStarted { .. } = event {
                        assert_eq!(
                            live.target_status("Foo|BarTests"),
                            Some(TargetRunStatus::Running)
                        );
                    }
                    seen.push(event.kind_str());
                },
            )
            .await
            .unwrap();

        assert_eq!(seen.len(), 6);
        assert_eq!(
            controller.backend().submitted()[0].scheme_targets,
            [SchemeTarget {
                scheme: "Foo".to_owned(),
                only_testing_target: Some("BarTests".to_owned()),
            }]
        );

        assert_eq!(completion.status, RunStatus::Passed);
        let run = controller.store().run(&RunId::new("r1")).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Passed);
        assert_eq!(
            (run.total_tests, run.passed_tests, run.failed_tests),
            (1, 1, 0)
        );
        assert_eq!(run.scope, "Project");
        assert_eq!(run.project_id.as_deref(), Some("p1"));
        assert_eq!(run.raw_log.as_deref(), Some("Testing started"));
        assert_eq!(
            run.target_results.unwrap()[0].key,
            "Foo|BarTests".to_owned()
        );
        assert!(run.finished_at.unwrap() >= run.started_at);

        let test_cases = controller.store().test_cases(&RunId::new("r1")).unwrap();
        assert_eq!(test_cases.len(), 1);
        assert_eq!(
            (
                test_cases[0].suite_name.as_str(),
                test_cases[0].test_name.as_str(),
                test_cases[0].status,
                test_cases[0].duration_ms,
            ),
            ("BarTests", "testX", TestStatus::Passed, Some(120))
        );

        assert_eq!(
            controller.store().calls(),
            ["insert_run", "update_run_completion", "insert_test_case"]
        );
        assert_eq!(views.recv().await.unwrap(), RunViewKind::Runs);
        assert_eq!(views.recv().await.unwrap(), RunViewKind::History);

        assert!(!live.is_running());
        assert!(live.target_keys().is_empty());
        assert_eq!(live.live_results().len(), 1);
        assert_eq!(live.progress(), (1, 1));
    }

    #[tokio::test]
    async fn empty_plan_makes_no_calls() {
        let controller =
            RunController::new(ScriptedBackend::new(foo_bar_events()), RecordingStore::new());
        let mut live = LiveRunState::new();

        let error = controller
            .run_tests(
                &mut live,
                &SelectionModel::new(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| panic!("no events expected"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RunTestsError::Validation(PlanValidationError::NoRunnableTargets {
                origin: PlanOrigin::Selected
            })
        ));
        assert!(controller.backend().submitted().is_empty());
        assert!(controller.store().calls().is_empty());
        assert_eq!(live.output_lines().len(), 1);
        assert_eq!(live.output_lines()[0].text, "no targets selected");
        assert_eq!(live.output_lines()[0].kind, OutputKind::System);
    }

    #[tokio::test]
    async fn empty_discovered_test_plans_are_rejected() {
        let controller =
            RunController::new(ScriptedBackend::new(foo_bar_events()), RecordingStore::new());
        let mut selection = SelectionModel::new();
        selection.toggle_test_plan("Smoke");
        selection.set_run_mode(RunMode::TestPlans);
        let options = RunTestsOptions {
            plan: PlanInputs {
                mode: PlanMode::All,
                all_test_plan_runs: Some(vec![]),
                ..PlanInputs::default()
            },
            scope_label: None,
        };

        let error = controller
            .run_tests(&mut LiveRunState::new(), &selection, &params(), &options, |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "no test plans were discovered");
        assert!(controller.backend().submitted().is_empty());
    }

    #[tokio::test]
    async fn test_plan_run_uses_plan_keys() {
        let events = vec![
            started("r2"),
            target_completed("plan:App:Smoke", false),
            TestRunEvent::RunFinished {},
        ];
        let controller = RunController::new(ScriptedBackend::new(events), RecordingStore::new());
        let mut selection = foo_bar_selection();
        selection.toggle_test_plan("Smoke");
        selection.set_run_mode(RunMode::TestPlans);
        let options = RunTestsOptions {
            plan: PlanInputs {
                default_scheme_for_test_plans: Some("App".to_owned()),
                ..PlanInputs::default()
            },
            scope_label: Some("Smoke suite".to_owned()),
        };

        let mut statuses = Vec::new();
        let completion = controller
            .run_tests(
                &mut LiveRunState::new(),
                &selection,
                &params(),
                &options,
                |_, live| statuses.push(live.target_status("plan:App:Smoke")),
            )
            .await
            .unwrap();

        let request = &controller.backend().submitted()[0];
        assert!(request.scheme_targets.is_empty());
        assert_eq!(
            request.test_plan_runs,
            [TestPlanRun {
                scheme: "App".to_owned(),
                test_plan_name: "Smoke".to_owned(),
            }]
        );
        assert_eq!(
            statuses,
            [
                Some(TargetRunStatus::Running),
                Some(TargetRunStatus::Failed),
                None,
            ]
        );
        // A failed target fails the run even without test results.
        assert_eq!(completion.status, RunStatus::Failed);
        let run = controller.store().run(&RunId::new("r2")).unwrap().unwrap();
        assert_eq!(run.scope, "Smoke suite");
        assert_eq!(run.raw_log, None);
    }

    #[tokio::test]
    async fn stream_errors_are_logged_but_not_fatal() {
        let events = vec![
            started("r1"),
            TestRunEvent::Error {
                message: "simulator crashed".to_owned(),
            },
            TestRunEvent::Stderr {
                line: "xcodebuild: error".to_owned(),
            },
            started("r9"),
            target_completed("Foo|BarTests", true),
            TestRunEvent::RunFinished {},
        ];
        let controller = RunController::new(ScriptedBackend::new(events), RecordingStore::new());
        let mut live = LiveRunState::new();

        let completion = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| {},
            )
            .await
            .unwrap();

        assert_eq!(completion.id, RunId::new("r1"));
        assert_eq!(completion.status, RunStatus::Passed);
        assert_eq!(completion.raw_log.as_deref(), Some("[stderr] xcodebuild: error"));
        let texts: Vec<_> = live
            .output_lines()
            .iter()
            .map(|line| (line.kind, line.text.as_str()))
            .collect();
        assert_eq!(
            texts,
            [
                (OutputKind::System, "Run started: r1"),
                (OutputKind::Stderr, "Error: simulator crashed"),
                (OutputKind::Stderr, "xcodebuild: error"),
            ]
        );
        // The duplicate RunStarted is not inserted.
        assert_eq!(
            controller.store().calls(),
            ["insert_run", "update_run_completion"]
        );
    }

    #[tokio::test]
    async fn missing_run_id_is_a_submission_error() {
        let events = vec![stdout("no id here"), TestRunEvent::RunFinished {}];
        let controller = RunController::new(ScriptedBackend::new(events), RecordingStore::new());
        let mut live = LiveRunState::new();

        let error = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            RunTestsError::Submission(BackendError::RunIdMissing)
        ));
        assert!(controller.store().calls().is_empty());
        assert!(!live.is_running());
    }

    #[tokio::test]
    async fn rejected_submission_finishes_live_state() {
        let controller = RunController::new(
            ScriptedBackend::rejecting("busy"),
            RecordingStore::new(),
        );
        let mut live = LiveRunState::new();
        let error = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            RunTestsError::Submission(BackendError::Rejected { .. })
        ));
        assert!(!live.is_running());
        assert!(controller.store().calls().is_empty());
    }

    #[tokio::test]
    async fn closed_stream_without_finish_is_still_committed() {
        let events = vec![started("r1"), target_completed("Foo|BarTests", true)];
        let controller = RunController::new(ScriptedBackend::new(events), RecordingStore::new());
        let mut live = LiveRunState::new();

        let completion = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| {},
            )
            .await
            .unwrap();
        assert_eq!(completion.status, RunStatus::Passed);
        assert!(!live.is_running());
        assert!(live.target_statuses().is_empty());
    }

    #[tokio::test]
    async fn update_failure_is_a_persistence_error() {
        let controller = RunController::new(
            ScriptedBackend::new(foo_bar_events()),
            RecordingStore::failing_on(FailOn::UpdateRunCompletion),
        );
        let mut live = LiveRunState::new();

        let error = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| {},
            )
            .await
            .unwrap_err();
        match error {
            RunTestsError::Persistence { run_id, .. } => assert_eq!(run_id, RunId::new("r1")),
            other => panic!("expected a persistence error, got {other:?}"),
        }
        // No test cases are written after the update fails.
        assert_eq!(
            controller.store().calls(),
            ["insert_run", "update_run_completion"]
        );
        assert!(!live.is_running());
        assert_eq!(live.live_results().len(), 1);
    }

    #[tokio::test]
    async fn insert_failure_drains_stream_then_fails() {
        let controller = RunController::new(
            ScriptedBackend::new(foo_bar_events()),
            RecordingStore::failing_on(FailOn::InsertRun),
        );
        let mut live = LiveRunState::new();
        let mut count = 0;

        let error = controller
            .run_tests(
                &mut live,
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| count += 1,
            )
            .await
            .unwrap_err();
        assert!(matches!(error, RunTestsError::Persistence { .. }));
        assert_eq!(count, 6);
        assert_eq!(controller.store().calls(), ["insert_run"]);
        assert!(!live.is_running());
    }

    #[tokio::test]
    async fn cancelled_run_is_recorded_as_cancelled() {
        let events = vec![
            started("r1"),
            test_completed("BarTests", "testX", TestStatus::Failed, 3),
            target_completed("Foo|BarTests", false),
            TestRunEvent::RunFinished {},
        ];
        let controller = RunController::new(ScriptedBackend::new(events), RecordingStore::new());

        let completion = controller
            .run_tests(
                &mut LiveRunState::new(),
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |event, _| {
                    if let TestRunEvent::RunStarted { .. } = event {
                        controller.cancel_run().unwrap();
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(controller.backend().cancel_count(), 1);
        assert_eq!(completion.status, RunStatus::Cancelled);
        assert_eq!(completion.failed_tests, 1);
    }

    #[tokio::test]
    async fn cancel_after_backend_finished_keeps_status() {
        let controller = RunController::new(
            ScriptedBackend::finished_before_cancel(foo_bar_events()),
            RecordingStore::new(),
        );

        let completion = controller
            .run_tests(
                &mut LiveRunState::new(),
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |event, _| {
                    if let TestRunEvent::TargetCompleted { .. } = event {
                        assert!(matches!(
                            controller.cancel_run(),
                            Err(BackendError::NoActiveRun)
                        ));
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(controller.backend().cancel_count(), 1);
        assert_eq!(completion.status, RunStatus::Passed);
    }

    #[tokio::test]
    async fn test_case_failure_is_a_persistence_error() {
        let controller = RunController::new(
            ScriptedBackend::new(foo_bar_events()),
            RecordingStore::failing_on(FailOn::InsertTestCase),
        );
        let mut views = controller.views().subscribe();

        let error = controller
            .run_tests(
                &mut LiveRunState::new(),
                &foo_bar_selection(),
                &params(),
                &RunTestsOptions::default(),
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(error, RunTestsError::Persistence { .. }));
        assert_eq!(
            controller.store().calls(),
            ["insert_run", "update_run_completion", "insert_test_case"]
        );
        // Views are only invalidated after a full commit.
        assert!(views.try_recv().is_err());
    }
}
