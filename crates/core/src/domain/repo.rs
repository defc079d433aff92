use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// In-progress operation recorded in the repository's control directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepoState {
    Clean,
    Merging,
    Reverting,
    CherryPicking,
    Bisecting,
    /// `rebase-apply` style rebase
    Rebasing,
    /// A rebase driven step by step through merges (`rebase-merge`)
    RebasingMerge,
    RebasingInteractive,
    ApplyingMailbox,
}

impl RepoState {
    /// Whether a push has to wait until the user finishes resolving.
    pub fn blocks_push(&self) -> bool {
        matches!(
            self,
            RepoState::Merging
                | RepoState::Reverting
                | RepoState::CherryPicking
                | RepoState::Rebasing
                | RepoState::RebasingMerge
                | RepoState::RebasingInteractive
                | RepoState::ApplyingMailbox
        )
    }

    /// In this state the engine's "ours" side is the upstream branch.
    pub fn is_rebase_merge(&self) -> bool {
        matches!(
            self,
            RepoState::RebasingMerge | RepoState::RebasingInteractive
        )
    }

    pub fn is_rebasing(&self) -> bool {
        matches!(
            self,
            RepoState::Rebasing | RepoState::RebasingMerge | RepoState::RebasingInteractive
        )
    }
}

/// Working copy status, paths relative to the working directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub staged: BTreeSet<PathBuf>,
    pub unstaged: BTreeSet<PathBuf>,
    pub untracked: BTreeSet<PathBuf>,
    pub conflicts: BTreeSet<PathBuf>,
}

impl StatusSnapshot {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        !self.staged.is_empty() || !self.unstaged.is_empty() || !self.conflicts.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.has_uncommitted_changes() && self.untracked.is_empty()
    }

    /// Unstaged or untracked, i.e. present only in the working directory.
    pub fn is_unstaged(&self, path: &Path) -> bool {
        self.unstaged.contains(path) || self.untracked.contains(path)
    }
}

/// Commit counts of the local branch against its upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    pub ahead: usize,
    pub behind: usize,
}

/// How pull integrates fetched commits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullMode {
    /// Fast-forward when possible, merge otherwise
    #[default]
    Merge,
    Rebase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

/// A side of a conflict, named from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictSide {
    /// The user's own change
    Local,
    /// The branch being integrated (the remote during a pull)
    Upstream,
}

impl ConflictSide {
    pub fn opposite(self) -> Self {
        match self {
            ConflictSide::Local => ConflictSide::Upstream,
            ConflictSide::Upstream => ConflictSide::Local,
        }
    }
}

/// Which stage of a conflicted index entry to keep, named the way the engine does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Ours,
    Theirs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    pub index: usize,
    pub message: String,
    pub id: String,
}
