// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    EventReceiver, ExecutionBackend,
    command::{Invocation, build_invocations},
    parse::parse_test_case,
};
use crate::{config::BackendConfig, errors::BackendError};
use camino::Utf8PathBuf;
use std::{
    future::Future,
    process::Stdio,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::{mpsc, watch},
};
use tracing::{debug, info};
use uuid::Uuid;
use xctr_metadata::{RunId, RunTestsRequest, TestRunEvent};

/// Runs tests by spawning `xcodebuild` and `swift test`.
///
/// Targets run one at a time. Result bundles are written to
/// `<result_root>/<run-id>/`.
#[derive(Debug)]
pub struct ProcessBackend {
    config: BackendConfig,
    result_root: Utf8PathBuf,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

#[derive(Debug)]
struct ActiveRun {
    run_id: RunId,
    cancel: watch::Sender<bool>,
}

impl ProcessBackend {
    /// Creates a new backend writing result bundles under `result_root`.
    pub fn new(config: BackendConfig, result_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config,
            result_root: result_root.into(),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the id of the run currently executing, if any.
    pub fn active_run_id(&self) -> Option<RunId> {
        lock(&self.active).as_ref().map(|active| active.run_id.clone())
    }
}

impl ExecutionBackend for ProcessBackend {
    fn submit(
        &self,
        request: RunTestsRequest,
    ) -> impl Future<Output = Result<EventReceiver, BackendError>> + Send {
        let config = self.config.clone();
        let result_root = self.result_root.clone();
        let active = self.active.clone();

        async move {
            let run_id = RunId::new(Uuid::new_v4().to_string());
            let result_dir = result_root.join(run_id.as_str());
            tokio::fs::create_dir_all(&result_dir)
                .await
                .map_err(|error| BackendError::ResultDirCreate {
                    path: result_dir.clone(),
                    error,
                })?;

            let invocations = build_invocations(&request, &config, &result_dir);
            let (cancel_sender, cancel_receiver) = watch::channel(false);
            *lock(&active) = Some(ActiveRun {
                run_id: run_id.clone(),
                cancel: cancel_sender,
            });

            let (sender, receiver) = mpsc::unbounded_channel();
            _ = sender.send(TestRunEvent::RunStarted {
                run_id: run_id.clone(),
            });
            debug!(
                "run {run_id}: starting {} invocations, results in {result_dir}",
                invocations.len(),
            );

            tokio::spawn(
                RunTask {
                    run_id,
                    invocations,
                    stop_on_first_failure: request.stop_on_first_failure,
                    sender,
                    cancel_receiver,
                    active,
                }
                .run(),
            );

            Ok(receiver)
        }
    }

    fn cancel(&self) -> Result<(), BackendError> {
        match lock(&self.active).as_ref() {
            Some(active) => {
                debug!("run {}: cancellation requested", active.run_id);
                active.cancel.send_replace(true);
                Ok(())
            }
            None => Err(BackendError::NoActiveRun),
        }
    }
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RunTask {
    run_id: RunId,
    invocations: Vec<Invocation>,
    stop_on_first_failure: bool,
    sender: mpsc::UnboundedSender<TestRunEvent>,
    cancel_receiver: watch::Receiver<bool>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl RunTask {
    async fn run(mut self) {
        let mut tests_run = 0u32;
        let invocations = std::mem::take(&mut self.invocations);

        for invocation in invocations {
            if *self.cancel_receiver.borrow_and_update() {
                debug!("run {}: cancelled, skipping `{}`", self.run_id, invocation.key);
                break;
            }

            let success = self.run_invocation(&invocation, &mut tests_run).await;
            debug!("run {}: target `{}` success={success}", self.run_id, invocation.key);
            self.send(TestRunEvent::TargetCompleted {
                key: invocation.key,
                success,
            });

            if !success && self.stop_on_first_failure {
                info!("stopping run {} after first failed target", self.run_id);
                break;
            }
        }

        self.send(TestRunEvent::RunFinished {});

        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|a| a.run_id == self.run_id) {
            *active = None;
        }
    }

    async fn run_invocation(&mut self, invocation: &Invocation, tests_run: &mut u32) -> bool {
        let mut child = match Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                self.send(TestRunEvent::Error {
                    message: format!("failed to spawn `{}`: {error}", invocation.program),
                });
                return false;
            }
        };

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
        let mut watching_cancel = true;
        let mut cancelled = false;

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => self.forward_line(line, false, tests_run),
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => self.forward_line(line, true, tests_run),
                    None => stderr = None,
                },
                changed = self.cancel_receiver.changed(), if watching_cancel => {
                    if changed.is_err() {
                        watching_cancel = false;
                    } else if *self.cancel_receiver.borrow_and_update() {
                        debug!("run {}: killing `{}`", self.run_id, invocation.key);
                        _ = child.start_kill();
                        // Grandchildren may still hold the pipes open, so stop
                        // reading instead of waiting for EOF.
                        stdout = None;
                        stderr = None;
                        watching_cancel = false;
                        cancelled = true;
                    }
                }
            }
        }

        match child.wait().await {
            Ok(status) => !cancelled && status.success(),
            Err(error) => {
                self.send(TestRunEvent::Error {
                    message: format!("failed to wait for `{}`: {error}", invocation.program),
                });
                false
            }
        }
    }

    fn forward_line(&self, line: String, is_stderr: bool, tests_run: &mut u32) {
        let test_case = parse_test_case(&line);
        self.send(if is_stderr {
            TestRunEvent::Stderr { line }
        } else {
            TestRunEvent::Stdout { line }
        });

        if let Some(event) = test_case {
            *tests_run += 1;
            self.send(event);
            self.send(TestRunEvent::Progress {
                tests_run: *tests_run,
                // The total is not known up front.
                tests_total: 0,
            });
        }
    }

    fn send(&self, event: TestRunEvent) {
        // The consumer may have gone away; the run still finishes cleanly.
        _ = self.sender.send(event);
    }
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        // A read error ends the stream just like EOF.
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use xctr_metadata::{PackageTarget, TestStatus};

    /// Sets up packages whose `swift` is `sh`: `sh test --package-path ...`
    /// then runs the script named `test` in the package directory.
    fn project_with_packages(packages: &[(&str, &str)]) -> Utf8TempDir {
        let dir = Utf8TempDir::new().unwrap();
        for (name, script) in packages {
            let package_dir = dir.path().join(name);
            std::fs::create_dir_all(&package_dir).unwrap();
            std::fs::write(package_dir.join("test"), script).unwrap();
        }
        dir
    }

    fn backend(result_root: &Utf8TempDir) -> ProcessBackend {
        let config = BackendConfig {
            wrap_in_pty: false,
            xcodebuild: "xcodebuild".to_owned(),
            swift: "sh".to_owned(),
        };
        ProcessBackend::new(config, result_root.path())
    }

    fn request(project: &Utf8TempDir, packages: &[&str], stop: bool) -> RunTestsRequest {
        RunTestsRequest {
            project_path: project.path().to_owned(),
            scheme_targets: vec![],
            packages: packages
                .iter()
                .map(|path| PackageTarget {
                    path: (*path).to_owned(),
                    filter: None,
                })
                .collect(),
            stop_on_first_failure: stop,
            test_plan_runs: vec![],
            destination: None,
        }
    }

    async fn collect(mut receiver: EventReceiver) -> Vec<TestRunEvent> {
        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn streams_output_and_test_cases() {
        let project = project_with_packages(&[(
            "Core",
            "echo \"Test Case 'CoreTests.testParse' passed (0.002 seconds)\"\n\
             echo 'warning: slow' >&2\n\
             exit 0\n",
        )]);
        let results = Utf8TempDir::new().unwrap();
        let backend = backend(&results);

        let receiver = backend
            .submit(request(&project, &["Core"], false))
            .await
            .unwrap();
        let events = collect(receiver).await;

        let TestRunEvent::RunStarted { run_id } = &events[0] else {
            panic!("first event should be RunStarted, got {:?}", events[0]);
        };
        assert!(results.path().join(run_id.as_str()).is_dir());
        assert!(events.contains(&TestRunEvent::TestCompleted {
            name: "testParse".to_owned(),
            suite: "CoreTests".to_owned(),
            status: TestStatus::Passed,
            duration_ms: 2,
        }));
        assert!(events.contains(&TestRunEvent::Progress {
            tests_run: 1,
            tests_total: 0,
        }));
        assert!(events.contains(&TestRunEvent::Stderr {
            line: "warning: slow".to_owned(),
        }));

        let n = events.len();
        assert_eq!(
            &events[n - 2..],
            [
                TestRunEvent::TargetCompleted {
                    key: "Core".to_owned(),
                    success: true,
                },
                TestRunEvent::RunFinished {},
            ]
        );
        assert_eq!(backend.active_run_id(), None);
    }

    #[tokio::test]
    async fn stop_on_first_failure_skips_remaining_targets() {
        let project = project_with_packages(&[("A", "exit 1\n"), ("B", "exit 0\n")]);
        let results = Utf8TempDir::new().unwrap();
        let backend = backend(&results);

        let completed = |events: &[TestRunEvent]| -> Vec<(String, bool)> {
            events
                .iter()
                .filter_map(|event| match event {
                    TestRunEvent::TargetCompleted { key, success } => {
                        Some((key.clone(), *success))
                    }
                    _ => None,
                })
                .collect()
        };

        let receiver = backend
            .submit(request(&project, &["A", "B"], true))
            .await
            .unwrap();
        let events = collect(receiver).await;
        assert_eq!(completed(&events), [("A".to_owned(), false)]);
        assert_eq!(events.last(), Some(&TestRunEvent::RunFinished {}));

        let receiver = backend
            .submit(request(&project, &["A", "B"], false))
            .await
            .unwrap();
        let events = collect(receiver).await;
        assert_eq!(
            completed(&events),
            [("A".to_owned(), false), ("B".to_owned(), true)]
        );
    }

    #[tokio::test]
    async fn missing_package_dir_reports_error_and_fails_target() {
        let project = project_with_packages(&[]);
        let results = Utf8TempDir::new().unwrap();
        let backend = backend(&results);

        let receiver = backend
            .submit(request(&project, &["Missing"], false))
            .await
            .unwrap();
        let events = collect(receiver).await;
        assert!(events.iter().any(|event| matches!(
            event,
            TestRunEvent::Error { message } if message.contains("failed to spawn")
        )));
        assert!(events.contains(&TestRunEvent::TargetCompleted {
            key: "Missing".to_owned(),
            success: false,
        }));
    }

    #[tokio::test]
    async fn cancel_kills_running_target() {
        let project = project_with_packages(&[("Slow", "exec sleep 30\n"), ("Next", "exit 0\n")]);
        let results = Utf8TempDir::new().unwrap();
        let backend = backend(&results);

        assert!(matches!(backend.cancel(), Err(BackendError::NoActiveRun)));

        let mut receiver = backend
            .submit(request(&project, &["Slow", "Next"], false))
            .await
            .unwrap();
        assert!(matches!(
            receiver.recv().await,
            Some(TestRunEvent::RunStarted { .. })
        ));
        // Give the child a moment to start.
        tokio::time::sleep(Duration::from_millis(100)).await;
        backend.cancel().unwrap();

        let events = tokio::time::timeout(Duration::from_secs(10), collect(receiver))
            .await
            .expect("run should finish promptly after cancel");
        // Depending on timing, `Slow` is either killed or never started. Either
        // way `Next` is skipped.
        for event in &events {
            if let TestRunEvent::TargetCompleted { key, success } = event {
                assert_eq!((key.as_str(), *success), ("Slow", false));
            }
        }
        assert_eq!(events.last(), Some(&TestRunEvent::RunFinished {}));
        assert_eq!(backend.active_run_id(), None);
    }

    #[tokio::test]
    async fn cancel_does_not_wait_for_grandchildren() {
        // Without `exec`, `sleep` is a grandchild that keeps the output pipes
        // open after `sh` is killed.
        let project = project_with_packages(&[("Slow", "sleep 6\necho done\n")]);
        let results = Utf8TempDir::new().unwrap();
        let backend = backend(&results);

        let mut receiver = backend
            .submit(request(&project, &["Slow"], false))
            .await
            .unwrap();
        assert!(matches!(
            receiver.recv().await,
            Some(TestRunEvent::RunStarted { .. })
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        backend.cancel().unwrap();

        let events = tokio::time::timeout(Duration::from_secs(3), collect(receiver))
            .await
            .expect("run should finish without waiting for `sleep`");
        assert!(!events.contains(&TestRunEvent::Stdout {
            line: "done".to_owned(),
        }));
        assert!(events.contains(&TestRunEvent::TargetCompleted {
            key: "Slow".to_owned(),
            success: false,
        }));
        assert_eq!(events.last(), Some(&TestRunEvent::RunFinished {}));
    }
}
