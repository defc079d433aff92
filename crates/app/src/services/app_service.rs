use crate::adapters::{
    EnvCredentials, FileConfigStore, FixedAnswer, Git2Engine, LoggingRefresher, StdinConfirmation,
};
use crate::cli::{CliArgs, Command};
use crate::services::EventLogger;
use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Receiver};
use gitweave_core::app::{Completion, Controller, OperationHandle, OperationScheduler};
use gitweave_core::domain::{
    FetchOutcome, PullMode, PullOutcome, PullResult, ResolveOutcome, StashApplyOutcome,
    StatusSnapshot,
};
use gitweave_core::error::OperationError;
use gitweave_core::ports::{
    AppConfig, ConfigStore, ConfirmationPrompt, CredentialsProvider, VcsEngine,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

type OnResult<T> = Box<dyn FnOnce(T) + Send>;
type OnError = Box<dyn FnOnce(OperationError) + Send>;

/// What a command printed and whether it reached the state the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub message: String,
    pub success: bool,
}

impl CommandReport {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// Wires the adapters into a [`Controller`] and runs CLI commands through it.
///
/// Every command is submitted to the controller's worker; the caller's thread only waits on
/// the handle and collects the callback's value.
pub struct AppService {
    config: AppConfig,
    controller: Controller,
    credentials: Arc<dyn CredentialsProvider>,
}

impl AppService {
    pub fn new(
        config: AppConfig,
        confirmation: Arc<dyn ConfirmationPrompt>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Self {
        let scheduler =
            OperationScheduler::with_shutdown_timeout(config.scheduler.shutdown_timeout());
        let controller = Controller::new(scheduler, confirmation, Arc::new(LoggingRefresher));
        controller.add_listener(Arc::new(EventLogger));
        Self {
            config,
            controller,
            credentials,
        }
    }

    /// Loads the config file and lets CLI flags override it.
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let store = match &args.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new()?,
        };
        let mut config = store.load()?;
        debug!("Loaded config from {}", store.path().display());

        if let Some(repo) = &args.repo {
            config.repository = Some(repo.clone());
        }

        let confirmation: Arc<dyn ConfirmationPrompt> = if args.yes {
            Arc::new(FixedAnswer(true))
        } else {
            Arc::new(StdinConfirmation)
        };
        Ok(Self::new(
            config,
            confirmation,
            Arc::new(EnvCredentials::from_env()),
        ))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Opens `path`, or the configured repository, or the current directory.
    pub fn open(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path.or(self.config.repository.as_deref()) {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let remote = self.config.remote.name.clone();
        let workdir = self.call(|ok, err| {
            self.controller.async_open(
                move || {
                    let engine = Git2Engine::open(&path, &remote)?;
                    Ok(Box::new(engine) as Box<dyn VcsEngine>)
                },
                ok,
                err,
            )
        })?;
        info!("Working copy {}", workdir.display());
        Ok(workdir)
    }

    pub fn execute(&self, command: Command) -> Result<CommandReport> {
        let workdir = self
            .controller
            .workdir()
            .ok_or(OperationError::NoRepository)?;

        match command {
            Command::Status => {
                let status = self.call(|ok, err| self.controller.async_status(ok, err))?;
                Ok(CommandReport::ok(describe_status(&status)))
            }
            Command::Fetch => {
                let creds = Arc::clone(&self.credentials);
                let outcome = self.call(|ok, err| self.controller.async_fetch(creds, ok, err))?;
                Ok(match outcome {
                    FetchOutcome::Ok => CommandReport::ok("Fetched"),
                    FetchOutcome::LockFailed(failure) => CommandReport::failed(failure.message()),
                })
            }
            Command::Pull { rebase, submodules } => {
                let mode = if rebase {
                    PullMode::Rebase
                } else {
                    self.config.pull.mode
                };
                let update_submodules = submodules || self.config.pull.update_submodules;
                let creds = Arc::clone(&self.credentials);
                let result = self.call(|ok, err| {
                    self.controller
                        .async_pull(mode, update_submodules, creds, ok, err)
                })?;
                Ok(describe_pull_result(&result))
            }
            Command::Push => {
                let creds = Arc::clone(&self.credentials);
                let outcome = self.call(|ok, err| self.controller.async_push(creds, ok, err))?;
                Ok(CommandReport {
                    success: !outcome.is_rejected(),
                    message: outcome.message,
                })
            }
            Command::Commit { message } => {
                let id =
                    self.call(|ok, err| self.controller.async_commit(message, ok, err))?;
                Ok(CommandReport::ok(format!("Committed {}", id)))
            }
            Command::Stage { paths } => {
                let files = relative_to(&workdir, &paths);
                let count = files.len();
                self.call_unit(|err| self.controller.async_stage(files, err))?;
                Ok(CommandReport::ok(format!("Staged {} file(s)", count)))
            }
            Command::Unstage { paths } => {
                let files = relative_to(&workdir, &paths);
                let count = files.len();
                self.call_unit(|err| self.controller.async_unstage(files, err))?;
                Ok(CommandReport::ok(format!("Unstaged {} file(s)", count)))
            }
            Command::StashSave { message, untracked } => {
                let id = self.call(|ok, err| {
                    self.controller
                        .async_stash_create(message, untracked, ok, err)
                })?;
                Ok(CommandReport::ok(match id {
                    Some(id) => format!("Saved {}", id),
                    None => "No local changes to save".to_string(),
                }))
            }
            Command::StashList => {
                let entries = self.call(|ok, err| self.controller.async_stash_list(ok, err))?;
                let lines: Vec<String> = entries
                    .iter()
                    .map(|entry| format!("stash@{{{}}}: {}", entry.index, entry.message))
                    .collect();
                Ok(CommandReport::ok(lines.join("\n")))
            }
            Command::StashApply { index, pop } => {
                let outcome = self.call(|ok, err| {
                    self.controller.async_stash_apply(index, pop, ok, err)
                })?;
                Ok(CommandReport {
                    success: outcome.was_applied(),
                    message: describe_stash_apply(outcome).to_string(),
                })
            }
            Command::MergeRestart => {
                let creds = Arc::clone(&self.credentials);
                let outcome = self.call(|ok, err| {
                    self.controller.async_merge_restart(creds, ok, err)
                })?;
                Ok(describe_pull_result(&PullResult::new(outcome)))
            }
            Command::AbortMerge => {
                self.call_unit(|err| self.controller.async_abort_merge(err))?;
                Ok(CommandReport::ok("Merge aborted"))
            }
            Command::AbortRebase => {
                self.call_unit(|err| self.controller.async_abort_rebase(err))?;
                Ok(CommandReport::ok("Rebase aborted"))
            }
            Command::ContinueRebase => {
                let outcome =
                    self.call(|ok, err| self.controller.async_continue_rebase(ok, err))?;
                Ok(describe_pull_result(&PullResult::new(outcome)))
            }
            Command::ResolveMine { paths } => {
                let files = relative_to(&workdir, &paths);
                let outcome = self.call(|ok, err| {
                    self.controller.async_resolve_using_mine(files, ok, err)
                })?;
                Ok(describe_resolve(outcome))
            }
            Command::ResolveTheirs { paths } => {
                let files = relative_to(&workdir, &paths);
                let outcome = self.call(|ok, err| {
                    self.controller.async_resolve_using_theirs(files, ok, err)
                })?;
                Ok(describe_resolve(outcome))
            }
            Command::Tag { name, rev, message } => {
                let report = format!("Tagged {} as {}", rev, name);
                self.call_unit(|err| self.controller.async_tag(name, rev, message, err))?;
                Ok(CommandReport::ok(report))
            }
        }
    }

    /// Waits for queued work to finish and stops the worker.
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }

    /// Submits through `submit` and blocks until its callback delivered a value or an error.
    fn call<T, S>(&self, submit: S) -> Result<T>
    where
        T: Send + 'static,
        S: FnOnce(OnResult<T>, OnError) -> OperationHandle,
    {
        let (tx, rx) = bounded(1);
        let err_tx = tx.clone();
        let handle = submit(
            Box::new(move |value: T| {
                let _ = tx.send(Ok(value));
            }),
            Box::new(move |err: OperationError| {
                let _ = err_tx.send(Err(err));
            }),
        );
        settle(&handle)?;
        receive(&rx)
    }

    /// Like `call` for operations that report only failure.
    fn call_unit<S>(&self, submit: S) -> Result<()>
    where
        S: FnOnce(OnError) -> OperationHandle,
    {
        let (tx, rx) = bounded(1);
        let handle = submit(Box::new(move |err: OperationError| {
            let _ = tx.send(err);
        }));
        settle(&handle)?;
        match rx.try_recv() {
            Ok(err) => Err(err.into()),
            Err(_) => Ok(()),
        }
    }
}

impl Drop for AppService {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

fn settle(handle: &OperationHandle) -> Result<()> {
    match handle.wait() {
        Completion::Completed | Completion::Failed => Ok(()),
        Completion::Cancelled => Err(OperationError::Cancelled.into()),
        Completion::CallbackPanicked(message) => bail!("Result callback panicked: {}", message),
    }
}

fn receive<T>(rx: &Receiver<std::result::Result<T, OperationError>>) -> Result<T> {
    match rx.try_recv() {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(_) => Err(anyhow!("Operation finished without reporting a result")),
    }
}

/// Paths as given on the command line, made relative to the working directory.
fn relative_to(workdir: &Path, paths: &[PathBuf]) -> Vec<PathBuf> {
    let cwd = std::env::current_dir().ok();
    paths
        .iter()
        .map(|path| {
            let absolute = match &cwd {
                Some(cwd) if path.is_relative() => cwd.join(path),
                _ => path.clone(),
            };
            match absolute.strip_prefix(workdir) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => path.clone(),
            }
        })
        .collect()
}

fn describe_status(status: &StatusSnapshot) -> String {
    if status.is_clean() {
        return "Working copy clean".to_string();
    }
    let mut lines = Vec::new();
    for (label, paths) in [
        ("conflicted", &status.conflicts),
        ("staged", &status.staged),
        ("modified", &status.unstaged),
        ("untracked", &status.untracked),
    ] {
        for path in paths {
            lines.push(format!("{:>10}  {}", label, path.display()));
        }
    }
    lines.join("\n")
}

fn describe_pull_result(result: &PullResult) -> CommandReport {
    let mut message = match &result.outcome {
        PullOutcome::Ok => "Pulled".to_string(),
        PullOutcome::UpToDate => "Already up to date".to_string(),
        PullOutcome::Conflicts(files) => {
            let mut lines = vec![format!("Conflicts in {} file(s):", files.len())];
            lines.extend(files.iter().map(|f| format!("  {}", f.display())));
            lines.join("\n")
        }
        PullOutcome::LockFailed(failure) => failure.message(),
        other => other.to_string(),
    };
    if let Some(err) = &result.submodule_error {
        message.push_str(&format!("\nSubmodule update failed: {}", err));
    }
    CommandReport {
        success: result.outcome.is_success() && result.submodule_error.is_none(),
        message,
    }
}

fn describe_stash_apply(outcome: StashApplyOutcome) -> &'static str {
    match outcome {
        StashApplyOutcome::AppliedSuccessfully => "Stash applied",
        StashApplyOutcome::AppliedSuccessfullyWithConflicts => {
            "Stash applied with conflicts; resolve them before committing"
        }
        StashApplyOutcome::CannotStartApplyBecauseConflicts => {
            "Resolve the existing conflicts before applying a stash"
        }
        StashApplyOutcome::CannotStartApplyBecauseUncommittedFiles => {
            "Local changes to files touched by the stash would be overwritten"
        }
        StashApplyOutcome::CannotStartBecauseStagedFiles => {
            "Commit or unstage staged files before applying a stash"
        }
        StashApplyOutcome::NotAppliedUnknownCause => "Stash was not applied",
    }
}

fn describe_resolve(outcome: ResolveOutcome) -> CommandReport {
    match outcome {
        ResolveOutcome::Resolved => CommandReport::ok("Resolved"),
        ResolveOutcome::Declined => CommandReport::ok("Left unresolved"),
    }
}
