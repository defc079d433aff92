//! Repository access façade.
//!
//! A [`RepositorySession`] owns the engine for the one open working copy. It fires
//! start/success/failure notifications around every mutating operation and turns the engine's
//! native results into the outcome types callers act on.

use crate::app::listeners::ListenerRegistry;
use crate::domain::{
    EventInfo, FetchOutcome, OperationKind, PullMode, PullOutcome, PullResult, PushOutcome,
    PushStatus, RepoState, ResetMode, ResolveStage, RevertOutcome, StashApplyOutcome,
    StashEntry, StatusSnapshot,
};
use crate::error::{OperationError, Result};
use crate::ports::{
    CredentialsProvider, FileRefresher, Integration, MergeStatus, PushReport, RebaseStatus,
    RevertStatus, StashApplyStatus, VcsEngine,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct RepositorySession {
    engine: Box<dyn VcsEngine>,
    listeners: Arc<ListenerRegistry>,
    refresher: Arc<dyn FileRefresher>,
}

impl std::fmt::Debug for RepositorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySession")
            .field("workdir", &self.engine.workdir())
            .finish_non_exhaustive()
    }
}

impl RepositorySession {
    pub fn new(
        engine: Box<dyn VcsEngine>,
        listeners: Arc<ListenerRegistry>,
        refresher: Arc<dyn FileRefresher>,
    ) -> Self {
        Self {
            engine,
            listeners,
            refresher,
        }
    }

    pub fn workdir(&self) -> &Path {
        self.engine.workdir()
    }

    /// Runs `op` between an about-to-start and a succeeded/failed notification.
    fn bracket<T, F>(&mut self, info: EventInfo, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let listeners = Arc::clone(&self.listeners);
        listeners.fire_about_to_start(&info);
        match op(self) {
            Ok(value) => {
                listeners.fire_succeeded(&info);
                Ok(value)
            }
            Err(err) => {
                error!("{} failed: {}", info, err);
                listeners.fire_failed(&info, &err);
                Err(err)
            }
        }
    }

    pub fn status(&self) -> Result<StatusSnapshot> {
        Ok(self.engine.status()?)
    }

    pub fn state(&self) -> Result<RepoState> {
        Ok(self.engine.state()?)
    }

    pub fn stage(&mut self, files: &[PathBuf]) -> Result<()> {
        self.bracket(EventInfo::with_files(OperationKind::Stage, files), |s| {
            Ok(s.engine.stage(files)?)
        })
    }

    pub fn unstage(&mut self, files: &[PathBuf]) -> Result<()> {
        self.bracket(EventInfo::with_files(OperationKind::Unstage, files), |s| {
            Ok(s.engine.unstage(files)?)
        })
    }

    pub fn discard(&mut self, files: &[PathBuf]) -> Result<()> {
        self.bracket(EventInfo::with_files(OperationKind::Discard, files), |s| {
            Ok(s.engine.discard(files)?)
        })
    }

    /// Commits the index and returns the new commit id.
    pub fn commit(&mut self, message: &str) -> Result<String> {
        self.bracket(EventInfo::new(OperationKind::Commit), |s| {
            if message.trim().is_empty() {
                return Err(OperationError::invalid_state("commit message is empty"));
            }
            Ok(s.engine.commit(message)?)
        })
    }

    pub fn checkout(&mut self, branch: &str) -> Result<()> {
        self.bracket(EventInfo::with_branch(OperationKind::Checkout, branch), |s| {
            Ok(s.engine.checkout_branch(branch)?)
        })
    }

    pub fn create_branch(&mut self, name: &str, start: Option<&str>) -> Result<()> {
        self.bracket(EventInfo::with_branch(OperationKind::CreateBranch, name), |s| {
            Ok(s.engine.create_branch(name, start)?)
        })
    }

    pub fn delete_branch(&mut self, name: &str) -> Result<()> {
        self.bracket(EventInfo::with_branch(OperationKind::DeleteBranch, name), |s| {
            Ok(s.engine.delete_branch(name)?)
        })
    }

    pub fn checkout_file(&mut self, rev: &str, files: &[PathBuf]) -> Result<()> {
        self.bracket(EventInfo::with_files(OperationKind::CheckoutFile, files), |s| {
            Ok(s.engine.checkout_paths(rev, files)?)
        })
    }

    pub fn reset_to_commit(&mut self, rev: &str, mode: ResetMode) -> Result<()> {
        self.bracket(EventInfo::new(OperationKind::ResetToCommit), |s| {
            Ok(s.engine.reset(rev, mode)?)
        })
    }

    pub fn revert_commit(&mut self, rev: &str) -> Result<RevertOutcome> {
        self.bracket(EventInfo::new(OperationKind::RevertCommit), |s| {
            match s.engine.revert(rev)? {
                RevertStatus::Reverted(id) => Ok(RevertOutcome::Reverted(id)),
                RevertStatus::Conflicts => {
                    Ok(RevertOutcome::Conflicts(s.engine.status()?.conflicts))
                }
            }
        })
    }

    pub fn fetch(&mut self, credentials: &dyn CredentialsProvider) -> Result<FetchOutcome> {
        let report = self.engine.fetch(credentials)?;
        match report.lock_failures.into_iter().next() {
            Some(failure) => {
                warn!("Fetch could not update a tracking ref: {}", failure);
                Ok(FetchOutcome::LockFailed(failure))
            }
            None => Ok(FetchOutcome::Ok),
        }
    }

    /// Fetches the upstream of the current branch and merges or rebases onto it.
    pub fn pull(
        &mut self,
        mode: PullMode,
        credentials: &dyn CredentialsProvider,
        update_submodules: bool,
    ) -> Result<PullResult> {
        let status = self.engine.status()?;
        if status.has_conflicts() {
            info!(
                "Pull skipped: {} files are still conflicted",
                status.conflicts.len()
            );
            return Ok(PullResult::new(PullOutcome::RepositoryHasConflicts));
        }

        self.engine.reset_index()?;
        let before = self.engine.head_tree()?;

        let report = self.engine.pull(mode, credentials)?;
        if let Some(failure) = report.fetch.lock_failures.into_iter().next() {
            warn!("Pull could not update a tracking ref: {}", failure);
            return Ok(PullResult::new(PullOutcome::LockFailed(failure)));
        }

        let after = self.engine.head_tree()?;
        self.refresh_changed(before.as_deref(), after.as_deref())?;

        let outcome = match report.integration {
            Integration::Rebase(status) => self.classify_rebase(status)?,
            Integration::Merge(status) => self.classify_merge(status)?,
            Integration::None => {
                return Err(OperationError::invalid_state(
                    "fetch failed without reporting a cause",
                ))
            }
        };
        info!("Pull ({:?}) finished: {}", mode, outcome);

        let mut result = PullResult::new(outcome);
        if update_submodules && result.outcome.is_success() {
            if let Err(err) = self.engine.update_submodules(credentials) {
                warn!("Submodule update failed after pull: {:#}", err);
                result.submodule_error = Some(format!("{:#}", err));
            }
        }
        Ok(result)
    }

    fn refresh_changed(&self, before: Option<&str>, after: Option<&str>) -> Result<()> {
        if before == after {
            return Ok(());
        }
        let workdir = self.engine.workdir();
        let directories: BTreeSet<PathBuf> = self
            .engine
            .changed_paths(before, after)?
            .iter()
            .map(|path| {
                workdir
                    .join(path)
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| workdir.to_path_buf())
            })
            .collect();
        if !directories.is_empty() {
            self.refresher.refresh(&directories);
        }
        Ok(())
    }

    fn classify_rebase(&self, status: RebaseStatus) -> Result<PullOutcome> {
        Ok(match status {
            RebaseStatus::UpToDate => PullOutcome::UpToDate,
            RebaseStatus::Ok | RebaseStatus::FastForward => PullOutcome::Ok,
            RebaseStatus::Stopped => PullOutcome::Conflicts(self.engine.status()?.conflicts),
            RebaseStatus::Conflicts(paths) => PullOutcome::RebaseConflicts(paths),
            RebaseStatus::UncommittedChanges(paths) => PullOutcome::UncommittedChanges(paths),
        })
    }

    fn classify_merge(&self, status: MergeStatus) -> Result<PullOutcome> {
        Ok(match status {
            MergeStatus::AlreadyUpToDate => PullOutcome::UpToDate,
            MergeStatus::FastForward | MergeStatus::Merged => PullOutcome::Ok,
            MergeStatus::Conflicting => PullOutcome::Conflicts(self.engine.status()?.conflicts),
            MergeStatus::Failed(paths) => PullOutcome::CheckoutConflict(paths),
        })
    }

    /// Pushes the current branch after checking it can succeed.
    pub fn push(&mut self, credentials: &dyn CredentialsProvider) -> Result<PushOutcome> {
        if self.engine.state()?.blocks_push() {
            return Ok(PushOutcome::new(
                PushStatus::RejectedResolveConflicts,
                "Resolve conflicts and finish the merge, rebase or revert before pushing",
            ));
        }

        if let Some(counts) = self.engine.ahead_behind()? {
            if counts.behind > 0 {
                return Ok(PushOutcome::new(
                    PushStatus::RejectedNonFastForward,
                    format!(
                        "The local branch is {} commit(s) behind its upstream; pull before pushing",
                        counts.behind
                    ),
                ));
            }
            if counts.ahead == 0 {
                return Ok(PushOutcome::new(PushStatus::UpToDate, "Everything up-to-date"));
            }
        }

        let report = self.engine.push(credentials)?;
        let outcome = classify_push(&report);
        info!("Push to {}: {}", report.remote, outcome.message);

        if outcome.status == PushStatus::Ok && self.engine.upstream()?.is_none() {
            let upstream = format!("{}/{}", report.remote, report.branch);
            self.engine.set_upstream(&upstream)?;
            info!("Recorded {} as upstream of {}", upstream, report.branch);
        }
        Ok(outcome)
    }

    pub fn push_tag(
        &mut self,
        name: &str,
        credentials: &dyn CredentialsProvider,
    ) -> Result<PushOutcome> {
        let report = self.engine.push_tag(name, credentials)?;
        Ok(classify_push(&report))
    }

    pub fn merge(&mut self, rev: &str) -> Result<PullOutcome> {
        self.bracket(EventInfo::with_branch(OperationKind::Merge, rev), |s| {
            let status = s.engine.merge(rev)?;
            s.classify_merge(status)
        })
    }

    /// Retries an interrupted merge or rebase from a clean slate.
    ///
    /// A failed rebase step is aborted and the pull re-issued in rebase mode. A plain merge is
    /// reset hard and merged again against the same MERGE_HEAD. With neither in progress this
    /// is a no-op reporting `UpToDate`.
    pub fn merge_restart(&mut self, credentials: &dyn CredentialsProvider) -> Result<PullOutcome> {
        self.bracket(EventInfo::new(OperationKind::MergeRestart), |s| {
            if s.engine.state()?.is_rebase_merge() {
                s.abort_rebase()?;
                return Ok(s.pull(PullMode::Rebase, credentials, false)?.outcome);
            }

            let Some(merge_head) = s.engine.merge_head()? else {
                info!("Merge restart requested with no merge in progress");
                return Ok(PullOutcome::UpToDate);
            };

            s.engine.clean()?;
            s.engine.reset("HEAD", ResetMode::Hard)?;
            let status = s.engine.merge(&merge_head)?;
            s.classify_merge(status)
        })
    }

    pub fn abort_merge(&mut self) -> Result<()> {
        self.bracket(EventInfo::new(OperationKind::AbortMerge), |s| {
            Ok(s.engine.abort_merge()?)
        })
    }

    pub fn abort_rebase(&mut self) -> Result<()> {
        self.bracket(EventInfo::new(OperationKind::AbortRebase), |s| {
            Ok(s.engine.abort_rebase()?)
        })
    }

    pub fn continue_rebase(&mut self) -> Result<PullOutcome> {
        self.bracket(EventInfo::new(OperationKind::ContinueRebase), |s| {
            let status = s.engine.continue_rebase()?;
            s.classify_rebase(status)
        })
    }

    /// Drops the current rebase step and carries on with the next one.
    pub fn skip_rebase(&mut self) -> Result<PullOutcome> {
        self.bracket(EventInfo::new(OperationKind::ContinueRebase), |s| {
            let status = s.engine.skip_rebase()?;
            s.classify_rebase(status)
        })
    }

    pub fn stash_create(&mut self, message: &str, include_untracked: bool) -> Result<Option<String>> {
        self.bracket(EventInfo::new(OperationKind::StashCreate), |s| {
            Ok(s.engine.stash_create(message, include_untracked)?)
        })
    }

    pub fn stash_list(&mut self) -> Result<Vec<StashEntry>> {
        Ok(self.engine.stash_list()?)
    }

    pub fn stash_apply(&mut self, index: usize) -> Result<StashApplyOutcome> {
        self.bracket(EventInfo::new(OperationKind::StashApply), |s| {
            s.apply_stash(index)
        })
    }

    /// Applies the stash and drops it once its content reached the working copy.
    pub fn stash_pop(&mut self, index: usize) -> Result<StashApplyOutcome> {
        self.bracket(EventInfo::new(OperationKind::StashApply), |s| {
            let outcome = s.apply_stash(index)?;
            if outcome.was_applied() {
                s.stash_drop(index)?;
            }
            Ok(outcome)
        })
    }

    pub fn stash_drop(&mut self, index: usize) -> Result<()> {
        self.bracket(EventInfo::new(OperationKind::StashDrop), |s| {
            Ok(s.engine.stash_drop(index)?)
        })
    }

    fn apply_stash(&mut self, index: usize) -> Result<StashApplyOutcome> {
        let touched = self.engine.stash_paths(index)?;
        let status = self.engine.status()?;

        if status.has_conflicts() {
            return Ok(StashApplyOutcome::CannotStartApplyBecauseConflicts);
        }
        if touched.iter().any(|path| status.is_unstaged(path)) {
            return Ok(StashApplyOutcome::CannotStartApplyBecauseUncommittedFiles);
        }
        // any staged file blocks, overlapping or not
        if !status.staged.is_empty() {
            return Ok(StashApplyOutcome::CannotStartBecauseStagedFiles);
        }

        Ok(match self.engine.stash_apply(index)? {
            StashApplyStatus::Applied => {
                if self.engine.status()?.has_conflicts() {
                    StashApplyOutcome::AppliedSuccessfullyWithConflicts
                } else {
                    StashApplyOutcome::AppliedSuccessfully
                }
            }
            StashApplyStatus::Conflicts => StashApplyOutcome::AppliedSuccessfullyWithConflicts,
            StashApplyStatus::Failed(reason) => {
                warn!("Stash {} was not applied: {}", index, reason);
                StashApplyOutcome::NotAppliedUnknownCause
            }
        })
    }

    pub fn tag_commit(&mut self, name: &str, rev: &str, message: Option<&str>) -> Result<()> {
        self.bracket(EventInfo::new(OperationKind::TagCommit), |s| {
            Ok(s.engine.tag(name, rev, message)?)
        })
    }

    pub fn tag_delete(&mut self, name: &str) -> Result<()> {
        self.bracket(EventInfo::new(OperationKind::TagDelete), |s| {
            Ok(s.engine.tag_delete(name)?)
        })
    }

    /// Keeps the HEAD side ("ours") of each conflicted file and stages it.
    pub fn resolve_using_mine(&mut self, files: &[PathBuf]) -> Result<()> {
        self.bracket(EventInfo::with_files(OperationKind::Stage, files), |s| {
            Ok(s.engine.resolve(files, ResolveStage::Ours)?)
        })
    }

    /// Keeps the incoming side ("theirs") of each conflicted file and stages it.
    pub fn resolve_using_theirs(&mut self, files: &[PathBuf]) -> Result<()> {
        self.bracket(EventInfo::with_files(OperationKind::Stage, files), |s| {
            Ok(s.engine.resolve(files, ResolveStage::Theirs)?)
        })
    }
}

fn classify_push(report: &PushReport) -> PushOutcome {
    if report.updates.is_empty() {
        return PushOutcome::new(
            PushStatus::RejectedUnknown,
            format!("{} reported no ref updates", report.remote),
        );
    }
    if let Some((refname, reason)) = report
        .updates
        .iter()
        .find_map(|u| u.status.as_ref().map(|reason| (&u.refname, reason)))
    {
        return PushOutcome::new(
            PushStatus::RejectedRemote(reason.clone()),
            format!("{} rejected {}: {}", report.remote, refname, reason),
        );
    }
    let refs: Vec<&str> = report.updates.iter().map(|u| u.refname.as_str()).collect();
    PushOutcome::new(
        PushStatus::Ok,
        format!("Pushed {} to {}", refs.join(", "), report.remote),
    )
}
