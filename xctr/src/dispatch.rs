// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    history::{write_run_details, write_run_list},
    output::{OutputContext, OutputOpts, clap_styles},
    reporter::RunReporter,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{
    future::Future,
    io::{self, BufWriter},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xctr_metadata::{RunId, RunStatus, XctrExitCode};
use xctr_runner::{
    backend::ProcessBackend,
    config::XctrConfig,
    live::LiveRunState,
    plan::PlanInputs,
    selection::{RunMode, SelectionModel},
    session::{RunController, RunTestsOptions, RunTestsParams},
    store::{JsonRunStore, RunQuery, RunStore},
};

/// Run Xcode schemes, test plans and Swift packages, and keep a history of
/// every run.
#[derive(Debug, Parser)]
#[command(version, name = "xctr", styles = clap_styles::style())]
pub struct XctrApp {
    /// Project directory [default: current directory]
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl XctrApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let project_root = match self.project {
            Some(project) => project,
            None => current_dir()?,
        };
        let config = self.config_opts.make_config(&project_root)?;

        match self.command {
            Command::Run(run_opts) => run_opts.exec(&config, output),
            Command::Runs { command } => command.exec(&config, output),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: project-root/.config/xctr.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, project_root: &Utf8Path) -> Result<XctrConfig> {
        XctrConfig::from_sources(project_root, self.config_file.as_deref())
            .map_err(ExpectedError::from)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests and record the run
    ///
    /// Targets are run in order: schemes, then test plans, then Swift
    /// packages. Press Ctrl-C to cancel; the run is still recorded.
    Run(RunOpts),

    /// Inspect and manage recorded runs
    Runs {
        #[clap(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RunModeOpt {
    Targets,
    TestPlans,
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Scheme to test, as `SCHEME` or `SCHEME|TARGET`
    #[arg(long = "scheme", value_name = "KEY")]
    schemes: Vec<String>,

    /// Swift package to test, as `PATH` or `PATH|TARGET`
    #[arg(long = "package", value_name = "KEY")]
    packages: Vec<String>,

    /// Test plan to run
    #[arg(long = "test-plan", value_name = "NAME")]
    test_plans: Vec<String>,

    /// Scheme to run test plans under
    #[arg(long, value_name = "SCHEME")]
    plan_scheme: Option<String>,

    /// What to run [default: test-plans if only test plans are given]
    #[arg(long, value_enum)]
    run_mode: Option<RunModeOpt>,

    /// Stop after the first failing target
    #[arg(long)]
    stop_on_first_failure: bool,

    /// Destination passed to xcodebuild, or a simulator UDID
    #[arg(long, value_name = "DEST")]
    destination: Option<String>,

    /// Label recorded with the run [default: derived from the targets]
    #[arg(long, value_name = "LABEL")]
    scope: Option<String>,

    /// Project identifier recorded with the run
    #[arg(long, value_name = "ID")]
    project_id: Option<String>,
}

impl RunOpts {
    fn selection(&self) -> SelectionModel {
        let mut selection = SelectionModel::new();
        selection.select_all_targets(&self.schemes, &self.packages);
        selection.select_all_test_plans(&self.test_plans);

        let only_test_plans = self.schemes.is_empty() && self.packages.is_empty();
        let run_mode = match self.run_mode {
            Some(RunModeOpt::Targets) => RunMode::Targets,
            Some(RunModeOpt::TestPlans) => RunMode::TestPlans,
            None if only_test_plans && !self.test_plans.is_empty() => RunMode::TestPlans,
            None => RunMode::Targets,
        };
        selection.set_run_mode(run_mode);
        selection
    }

    fn exec(self, config: &XctrConfig, output: OutputContext) -> Result<i32> {
        let selection = self.selection();
        let params = RunTestsParams {
            project_path: config.project_root().to_owned(),
            stop_on_first_failure: self.stop_on_first_failure
                || config.run().stop_on_first_failure,
            project_id: self.project_id,
            destination: self
                .destination
                .or_else(|| config.run().destination.clone()),
        };
        let options = RunTestsOptions {
            plan: PlanInputs {
                default_scheme_for_test_plans: self.plan_scheme,
                ..PlanInputs::default()
            },
            scope_label: self.scope,
        };

        let store_dir = config.store_dir();
        let store = JsonRunStore::new(&store_dir)?;
        let result_root = result_root(&store_dir);
        debug!("writing result bundles to {result_root}");
        let backend = ProcessBackend::new(config.backend().clone(), result_root);
        let controller = RunController::new(backend, store);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|error| ExpectedError::RuntimeBuildFailed { error })?;

        let mut live = LiveRunState::new();
        let mut reporter = RunReporter::new(
            BufWriter::new(io::stdout()),
            output.stdout_styles(),
            output.verbose,
        );
        let (signal_sender, signals) = mpsc::unbounded_channel();
        runtime.spawn(forward_ctrl_c(signal_sender));

        let result = runtime.block_on(drive_with_interrupts(
            controller.run_tests(&mut live, &selection, &params, &options, |event, live| {
                reporter.report(event, live)
            }),
            signals,
            || {
                warn!("cancelling run (waiting for the current target to stop, Ctrl-C again to exit)");
                if let Err(error) = controller.cancel_run() {
                    warn!("failed to cancel run: {error}");
                }
            },
        ));
        let Some(result) = result else {
            return Err(ExpectedError::RunAbandoned);
        };

        let completion = result?;
        reporter
            .finish(&completion)
            .map_err(ExpectedError::write_output)?;

        prune(config, controller.store());

        match completion.status {
            RunStatus::Passed => Ok(XctrExitCode::OK),
            _ => Err(ExpectedError::TestRunFailed),
        }
    }
}

#[derive(Debug, Subcommand)]
enum RunsCommand {
    /// List recorded runs, newest first
    List {
        /// Only list runs with this project identifier
        #[arg(long, value_name = "ID")]
        project_id: Option<String>,

        /// Maximum number of runs to list
        #[arg(long, default_value_t = xctr_runner::store::DEFAULT_RUN_LIST_LIMIT)]
        limit: usize,
    },

    /// Show a recorded run and its test cases
    Show {
        /// The run to show
        run_id: String,

        /// Also print the captured log
        #[arg(long)]
        log: bool,
    },

    /// Delete runs beyond `store.retain-last-runs`
    Prune,
}

impl RunsCommand {
    fn exec(self, config: &XctrConfig, output: OutputContext) -> Result<i32> {
        let store = JsonRunStore::new(&config.store_dir())?;
        let styles = output.stdout_styles();
        let stdout = BufWriter::new(io::stdout());

        match self {
            Self::List { project_id, limit } => {
                let runs = store.runs(&RunQuery { project_id, limit })?;
                write_run_list(&runs, &styles, stdout).map_err(ExpectedError::write_output)?;
            }
            Self::Show { run_id, log } => {
                let run_id = RunId::new(run_id);
                let Some(run) = store.run(&run_id)? else {
                    return Err(ExpectedError::RunNotFound { run_id });
                };
                let test_cases = store.test_cases(&run_id)?;
                write_run_details(&run, &test_cases, log, &styles, stdout)
                    .map_err(ExpectedError::write_output)?;
            }
            Self::Prune => {
                let deleted = config.retention_policy().prune(&store)?;
                if deleted.is_empty() {
                    info!("no runs to prune");
                }
            }
        }
        Ok(XctrExitCode::OK)
    }
}

/// Sends one message per Ctrl-C until the receiver goes away.
async fn forward_ctrl_c(sender: mpsc::UnboundedSender<()>) {
    loop {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!("unable to listen for Ctrl-C: {error}");
            return;
        }
        if sender.send(()).is_err() {
            return;
        }
    }
}

/// Drives `run` to completion, calling `on_first` on the first interrupt.
///
/// Returns `None` if a second interrupt arrives first; `run` is then dropped.
async fn drive_with_interrupts<T>(
    run: impl Future<Output = T>,
    mut signals: mpsc::UnboundedReceiver<()>,
    mut on_first: impl FnMut(),
) -> Option<T> {
    tokio::pin!(run);
    let mut listening = true;
    let mut interrupted = false;
    loop {
        tokio::select! {
            result = &mut run => return Some(result),
            signal = signals.recv(), if listening => match signal {
                Some(()) if interrupted => return None,
                Some(()) => {
                    interrupted = true;
                    on_first();
                }
                None => listening = false,
            },
        }
    }
}

/// Prunes old runs after a run. Failures are reported but do not fail the run.
fn prune(config: &XctrConfig, store: &JsonRunStore) {
    if let Err(error) = config.retention_policy().prune(store) {
        warn!("failed to prune old runs: {error}");
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|error| ExpectedError::CurrentDirFailed { error })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirNotUtf8 {
        path: err.into_path_buf(),
    })
}

/// Result bundles go under the system temp dir, or under the store if the
/// temp dir is not valid UTF-8.
fn result_root(store_dir: &Utf8Path) -> Utf8PathBuf {
    match Utf8PathBuf::try_from(std::env::temp_dir()) {
        Ok(temp_dir) => temp_dir.join("xctr"),
        Err(_) => store_dir.join("results"),
    }
}
