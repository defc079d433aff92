use super::git::Git2Engine;
use anyhow::{anyhow, Result};
use git2::build::CheckoutBuilder;
use git2::{
    CheckoutNotificationType, ErrorCode, Oid, Rebase, RebaseOptions, Repository,
    RepositoryState, ResetType, Signature,
};
use gitweave_core::ports::{MergeStatus, RebaseStatus, VcsEngine};
use std::cell::RefCell;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// How far a rebase got before returning control
enum Progress {
    Finished,
    /// A step left conflicts in the index
    Stopped,
    /// A checkout would have overwritten local files
    Blocked,
}

fn is_checkout_conflict(err: &git2::Error) -> bool {
    err.code() == ErrorCode::Conflict
}

/// The notify callback records every path that blocks a checkout.
fn notifying_checkout(blocked: &RefCell<Vec<PathBuf>>) -> CheckoutBuilder<'_> {
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    checkout.notify_on(CheckoutNotificationType::CONFLICT);
    checkout.notify(move |_, path, _, _, _| {
        if let Some(path) = path {
            blocked.borrow_mut().push(path.to_path_buf());
        }
        true
    });
    checkout
}

/// Commits the current step, treating an already-applied patch as done.
fn commit_step(rebase: &mut Rebase<'_>, signature: &Signature<'_>) -> Result<()> {
    match rebase.commit(None, signature, None) {
        Ok(oid) => {
            debug!("Rebased step as {}", oid);
            Ok(())
        }
        Err(e) if e.code() == ErrorCode::Applied => {
            debug!("Step already applied upstream, skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn drive(repo: &Repository, rebase: &mut Rebase<'_>, signature: &Signature<'_>) -> Result<Progress> {
    while let Some(step) = rebase.next() {
        match step {
            Ok(_) => {}
            Err(e) if is_checkout_conflict(&e) => {
                rebase.abort()?;
                return Ok(Progress::Blocked);
            }
            Err(e) => return Err(e.into()),
        }
        if repo.index()?.has_conflicts() {
            return Ok(Progress::Stopped);
        }
        commit_step(rebase, signature)?;
    }
    rebase.finish(Some(signature))?;
    Ok(Progress::Finished)
}

impl Git2Engine {
    /// Checks out `target` and moves the current branch to it.
    ///
    /// Returns the blocking paths when local changes would be overwritten; nothing moves then.
    fn fast_forward(&self, target: Oid) -> Result<Option<Vec<PathBuf>>> {
        let commit = self.repo.find_commit(target)?;
        let blocked = RefCell::new(Vec::new());
        let checked_out = {
            let mut checkout = notifying_checkout(&blocked);
            self.repo.checkout_tree(commit.as_object(), Some(&mut checkout))
        };
        match checked_out {
            Ok(()) => {}
            Err(e) if is_checkout_conflict(&e) => return Ok(Some(blocked.into_inner())),
            Err(e) => return Err(e.into()),
        }

        let head = self.repo.find_reference("HEAD")?;
        let branch = head
            .symbolic_target()
            .ok_or_else(|| anyhow!("HEAD is detached"))?
            .to_string();
        self.repo
            .reference(&branch, target, true, &format!("fast-forward to {}", target))?;
        info!("Fast-forwarded {} to {}", branch, target);
        Ok(None)
    }

    pub(crate) fn merge_commit(&mut self, target: Oid) -> Result<MergeStatus> {
        let annotated = self.repo.find_annotated_commit(target)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeStatus::AlreadyUpToDate);
        }
        if analysis.is_fast_forward() || analysis.is_unborn() {
            return Ok(match self.fast_forward(target)? {
                None => MergeStatus::FastForward,
                Some(paths) => MergeStatus::Failed(paths),
            });
        }

        let blocked = RefCell::new(Vec::new());
        let merged = {
            let mut checkout = notifying_checkout(&blocked);
            checkout.allow_conflicts(true).conflict_style_merge(true);
            self.repo.merge(&[&annotated], None, Some(&mut checkout))
        };
        match merged {
            Ok(()) => {}
            Err(e) if is_checkout_conflict(&e) => {
                self.repo.cleanup_state()?;
                let mut paths = blocked.into_inner();
                // the workdir check runs before checkout, so nothing was notified
                if paths.is_empty() {
                    paths = self.tracked_changes()?;
                }
                warn!("Merge blocked by local changes to {} file(s)", paths.len());
                return Ok(MergeStatus::Failed(paths));
            }
            Err(e) => return Err(e.into()),
        }

        if self.repo.index()?.has_conflicts() {
            return Ok(MergeStatus::Conflicting);
        }

        let message = format!("Merge commit '{}'", target);
        drop(annotated);
        self.commit(&message)?;
        Ok(MergeStatus::Merged)
    }

    pub(crate) fn rebase_onto(&mut self, target: Oid) -> Result<RebaseStatus> {
        let dirty = self.tracked_changes()?;
        if !dirty.is_empty() {
            return Ok(RebaseStatus::UncommittedChanges(dirty));
        }

        let upstream = self.repo.find_annotated_commit(target)?;
        let (analysis, _) = self.repo.merge_analysis(&[&upstream])?;
        if analysis.is_up_to_date() {
            return Ok(RebaseStatus::UpToDate);
        }
        if analysis.is_fast_forward() || analysis.is_unborn() {
            return Ok(match self.fast_forward(target)? {
                None => RebaseStatus::FastForward,
                Some(paths) => RebaseStatus::Conflicts(paths),
            });
        }

        let original_head = self
            .repo
            .head()?
            .name()
            .ok_or_else(|| anyhow!("HEAD name is not valid UTF-8"))?
            .to_string();
        let signature = self.repo.signature()?;
        let blocked = RefCell::new(Vec::new());
        let progress = {
            let mut options = RebaseOptions::new();
            options.checkout_options(notifying_checkout(&blocked));
            match self.repo.rebase(None, Some(&upstream), None, Some(&mut options)) {
                Ok(mut rebase) => drive(&self.repo, &mut rebase, &signature),
                Err(e) if is_checkout_conflict(&e) => Ok(Progress::Blocked),
                Err(e) => Err(e.into()),
            }
        }?;

        match progress {
            Progress::Finished => {
                info!("Rebased onto {}", target);
                Ok(RebaseStatus::Ok)
            }
            Progress::Stopped => Ok(RebaseStatus::Stopped),
            Progress::Blocked => {
                self.restore_after_blocked_rebase(&original_head)?;
                Ok(RebaseStatus::Conflicts(blocked.into_inner()))
            }
        }
    }

    /// Leaves the branch where it was when a rebase could not even start.
    fn restore_after_blocked_rebase(&self, original_head: &str) -> Result<()> {
        if self.repo.state() != RepositoryState::Clean {
            if let Ok(mut rebase) = self.repo.open_rebase(None) {
                rebase.abort()?;
            }
            self.repo.cleanup_state()?;
        }
        let current = self.repo.head()?.name().map(str::to_string);
        if current.as_deref() != Some(original_head) {
            self.repo.set_head(original_head)?;
        }
        Ok(())
    }

    /// Continues a stopped rebase. With `skip` the current step is dropped instead of committed.
    pub(crate) fn resume_rebase(&mut self, skip: bool) -> Result<RebaseStatus> {
        if skip {
            let head = self
                .head_commit()?
                .ok_or_else(|| anyhow!("Rebase has no HEAD"))?
                .into_object();
            self.repo.reset(&head, ResetType::Hard, None)?;
        } else if self.repo.index()?.has_conflicts() {
            return Ok(RebaseStatus::Stopped);
        }

        let signature = self.repo.signature()?;
        let blocked = RefCell::new(Vec::new());
        let progress = {
            let mut options = RebaseOptions::new();
            options.checkout_options(notifying_checkout(&blocked));
            let mut rebase = self.repo.open_rebase(Some(&mut options))?;
            if !skip {
                commit_step(&mut rebase, &signature)?;
            }
            drive(&self.repo, &mut rebase, &signature)?
        };

        Ok(match progress {
            Progress::Finished => RebaseStatus::Ok,
            Progress::Stopped => RebaseStatus::Stopped,
            // drive() already aborted the whole rebase
            Progress::Blocked => RebaseStatus::Conflicts(blocked.into_inner()),
        })
    }
}
