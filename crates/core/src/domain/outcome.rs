//! Outcomes of pull, push, stash and merge/rebase operations.
//!
//! Everything a caller can recover from is a variant here rather than an error, so that
//! the presentation layer can route the user to the right resolution action.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// A ref update that failed because its lock file could not be taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFailure {
    pub ref_name: String,
    /// Absolute path of the `.lock` file
    pub lock_path: PathBuf,
    /// Whether the lock file was present when the failure was inspected
    pub exists: bool,
}

impl LockFailure {
    pub fn message(&self) -> String {
        if self.exists {
            format!(
                "Cannot lock {}: lock file {} already exists. If no other git process is running, delete it and retry.",
                self.ref_name,
                self.lock_path.display()
            )
        } else {
            format!(
                "Cannot lock {}: lock file {} could not be created",
                self.ref_name,
                self.lock_path.display()
            )
        }
    }
}

impl fmt::Display for LockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Result of pull, merge, continue-rebase and merge-restart.
///
/// `Ok`, `UpToDate`, `Conflicts`, `RepositoryHasConflicts` and `LockFailed` are the terminal
/// pull states; the remaining variants report merge or rebase attempts that stopped before
/// changing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullOutcome {
    Ok,
    UpToDate,
    /// Integration ran and left these files conflicted
    Conflicts(BTreeSet<PathBuf>),
    /// The repository had conflicts before the pull started; nothing was contacted
    RepositoryHasConflicts,
    LockFailed(LockFailure),
    /// The rebase could not start on these paths; no rebase step was applied
    RebaseConflicts(Vec<PathBuf>),
    /// Local uncommitted changes to these paths block the rebase
    UncommittedChanges(Vec<PathBuf>),
    /// The merge checkout would overwrite these paths
    CheckoutConflict(Vec<PathBuf>),
}

impl PullOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PullOutcome::Ok | PullOutcome::UpToDate)
    }

    pub fn conflicts(&self) -> Option<&BTreeSet<PathBuf>> {
        match self {
            PullOutcome::Conflicts(files) => Some(files),
            _ => None,
        }
    }
}

impl fmt::Display for PullOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullOutcome::Ok => write!(f, "ok"),
            PullOutcome::UpToDate => write!(f, "up to date"),
            PullOutcome::Conflicts(files) => write!(f, "conflicts in {} files", files.len()),
            PullOutcome::RepositoryHasConflicts => {
                write!(f, "repository has unresolved conflicts")
            }
            PullOutcome::LockFailed(failure) => write!(f, "lock failed: {}", failure),
            PullOutcome::RebaseConflicts(paths) => {
                write!(f, "rebase cannot start, conflicting paths: {}", join_paths(paths))
            }
            PullOutcome::UncommittedChanges(paths) => {
                write!(f, "uncommitted changes block the rebase: {}", join_paths(paths))
            }
            PullOutcome::CheckoutConflict(paths) => {
                write!(f, "checkout conflict on: {}", join_paths(paths))
            }
        }
    }
}

/// A pull outcome plus the result of the optional submodule update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub outcome: PullOutcome,
    /// Set when the submodule update failed after a successful pull
    pub submodule_error: Option<String>,
}

impl PullResult {
    pub fn new(outcome: PullOutcome) -> Self {
        Self {
            outcome,
            submodule_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchOutcome {
    Ok,
    LockFailed(LockFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushStatus {
    Ok,
    UpToDate,
    RejectedResolveConflicts,
    RejectedNonFastForward,
    /// The remote refused an update with this reason
    RejectedRemote(String),
    /// The engine returned no per-ref update record
    RejectedUnknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub status: PushStatus,
    pub message: String,
}

impl PushOutcome {
    pub fn new(status: PushStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        !matches!(self.status, PushStatus::Ok | PushStatus::UpToDate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StashApplyOutcome {
    AppliedSuccessfully,
    AppliedSuccessfullyWithConflicts,
    CannotStartApplyBecauseConflicts,
    CannotStartApplyBecauseUncommittedFiles,
    CannotStartBecauseStagedFiles,
    NotAppliedUnknownCause,
}

impl StashApplyOutcome {
    /// Whether the stash content reached the working copy.
    pub fn was_applied(&self) -> bool {
        matches!(
            self,
            StashApplyOutcome::AppliedSuccessfully
                | StashApplyOutcome::AppliedSuccessfullyWithConflicts
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertOutcome {
    Reverted(String),
    Conflicts(BTreeSet<PathBuf>),
}

/// Result of a mine/theirs conflict resolution request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    /// The user declined after being told the sides are reversed
    Declined,
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
