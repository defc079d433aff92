use crate::domain::{
    AheadBehind, LockFailure, PullMode, RepoState, ResetMode, ResolveStage, StashEntry,
    StatusSnapshot,
};
use crate::ports::CredentialsProvider;
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What a fetch did to the tracking refs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub lock_failures: Vec<LockFailure>,
}

/// Native result of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    FastForward,
    Merged,
    AlreadyUpToDate,
    /// Merged into the index with conflicts; the merge state is left in place
    Conflicting,
    /// Checkout would overwrite these local paths; nothing was changed
    Failed(Vec<PathBuf>),
}

/// Native result of a rebase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseStatus {
    Ok,
    FastForward,
    UpToDate,
    /// A step stopped on conflicting lines; the rebase state is left in place
    Stopped,
    /// The rebase could not start on these paths and was rolled back
    Conflicts(Vec<PathBuf>),
    UncommittedChanges(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integration {
    Merge(MergeStatus),
    Rebase(RebaseStatus),
    /// Fetch failed before anything could be integrated
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub fetch: FetchReport,
    pub integration: Integration,
}

/// Per-ref result of a push. `status` is `None` when the remote accepted the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub refname: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub remote: String,
    /// Local branch that was pushed, short name
    pub branch: String,
    pub updates: Vec<RefUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashApplyStatus {
    Applied,
    Conflicts,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertStatus {
    Reverted(String),
    Conflicts,
}

/// Port for the underlying version-control engine.
///
/// All calls are blocking; the scheduler keeps them off the caller's thread. Paths are
/// relative to [`VcsEngine::workdir`].
pub trait VcsEngine: Send {
    fn workdir(&self) -> &Path;

    fn state(&self) -> Result<RepoState>;

    fn status(&self) -> Result<StatusSnapshot>;

    /// Tree id of HEAD, `None` on an unborn branch
    fn head_tree(&self) -> Result<Option<String>>;

    /// Paths that differ between two trees
    fn changed_paths(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<PathBuf>>;

    /// Make the index match HEAD without touching the working directory
    fn reset_index(&mut self) -> Result<()>;

    fn stage(&mut self, paths: &[PathBuf]) -> Result<()>;

    fn unstage(&mut self, paths: &[PathBuf]) -> Result<()>;

    /// Throw away working directory and index changes to these paths
    fn discard(&mut self, paths: &[PathBuf]) -> Result<()>;

    fn commit(&mut self, message: &str) -> Result<String>;

    fn checkout_branch(&mut self, name: &str) -> Result<()>;

    fn create_branch(&mut self, name: &str, start: Option<&str>) -> Result<()>;

    fn delete_branch(&mut self, name: &str) -> Result<()>;

    fn checkout_paths(&mut self, rev: &str, paths: &[PathBuf]) -> Result<()>;

    fn reset(&mut self, rev: &str, mode: ResetMode) -> Result<()>;

    fn revert(&mut self, rev: &str) -> Result<RevertStatus>;

    fn fetch(&mut self, credentials: &dyn CredentialsProvider) -> Result<FetchReport>;

    /// Fetch the upstream of the current branch and integrate it
    fn pull(&mut self, mode: PullMode, credentials: &dyn CredentialsProvider)
        -> Result<PullReport>;

    fn push(&mut self, credentials: &dyn CredentialsProvider) -> Result<PushReport>;

    fn push_tag(&mut self, name: &str, credentials: &dyn CredentialsProvider)
        -> Result<PushReport>;

    /// `None` when the current branch has no upstream
    fn ahead_behind(&self) -> Result<Option<AheadBehind>>;

    /// Upstream of the current branch, e.g. `origin/main`
    fn upstream(&self) -> Result<Option<String>>;

    fn set_upstream(&mut self, upstream: &str) -> Result<()>;

    fn merge(&mut self, rev: &str) -> Result<MergeStatus>;

    /// Commit recorded in MERGE_HEAD
    fn merge_head(&self) -> Result<Option<String>>;

    /// Hard reset to HEAD and drop the merge state
    fn abort_merge(&mut self) -> Result<()>;

    /// Remove untracked files and directories
    fn clean(&mut self) -> Result<()>;

    fn continue_rebase(&mut self) -> Result<RebaseStatus>;

    fn skip_rebase(&mut self) -> Result<RebaseStatus>;

    fn abort_rebase(&mut self) -> Result<()>;

    /// `None` when there was nothing to stash
    fn stash_create(&mut self, message: &str, include_untracked: bool) -> Result<Option<String>>;

    fn stash_list(&mut self) -> Result<Vec<StashEntry>>;

    /// Paths the stash at `index` would write
    fn stash_paths(&mut self, index: usize) -> Result<BTreeSet<PathBuf>>;

    fn stash_apply(&mut self, index: usize) -> Result<StashApplyStatus>;

    fn stash_drop(&mut self, index: usize) -> Result<()>;

    fn tag(&mut self, name: &str, rev: &str, message: Option<&str>) -> Result<()>;

    fn tag_delete(&mut self, name: &str) -> Result<()>;

    /// Write the given conflict stage to the working directory and stage it
    fn resolve(&mut self, paths: &[PathBuf], stage: ResolveStage) -> Result<()>;

    /// Initialise and update submodules, recursively
    fn update_submodules(&mut self, credentials: &dyn CredentialsProvider) -> Result<()>;
}
