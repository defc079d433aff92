use anyhow::{anyhow, bail, Context, Result};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, ErrorCode, ObjectType, Oid, Repository, RepositoryState, ResetType,
    StashApplyOptions, StashFlags, Status, StatusOptions, Tree, TreeWalkMode, TreeWalkResult,
};
use gitweave_core::domain::{
    AheadBehind, PullMode, RepoState, ResetMode, ResolveStage, StashEntry, StatusSnapshot,
};
use gitweave_core::ports::{
    CredentialsProvider, FetchReport, MergeStatus, PullReport, PushReport, RebaseStatus,
    RevertStatus, StashApplyStatus, VcsEngine,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const STAGED: Status = Status::INDEX_NEW
    .union(Status::INDEX_MODIFIED)
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_RENAMED)
    .union(Status::INDEX_TYPECHANGE);

const MODIFIED: Status = Status::WT_MODIFIED
    .union(Status::WT_DELETED)
    .union(Status::WT_TYPECHANGE)
    .union(Status::WT_RENAMED);

/// `VcsEngine` backed by libgit2 through git2
pub struct Git2Engine {
    pub(crate) repo: Repository,
    workdir: PathBuf,
    /// Remote used when the current branch has no upstream
    pub(crate) default_remote: String,
}

impl Git2Engine {
    pub fn open<P: AsRef<Path>>(path: P, default_remote: &str) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .with_context(|| format!("Failed to open git repository at {}", path.display()))?;
        Self::from_repository(repo, default_remote)
    }

    pub fn from_repository(repo: Repository, default_remote: &str) -> Result<Self> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| anyhow!("Repository at {} has no working copy", repo.path().display()))?
            .to_path_buf();
        debug!("Opened {} (git dir {})", workdir.display(), repo.path().display());
        Ok(Self {
            repo,
            workdir,
            default_remote: default_remote.to_string(),
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn head_commit(&self) -> Result<Option<Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Short name of the checked-out branch
    pub(crate) fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().context("HEAD does not point at a commit")?;
        if !head.is_branch() {
            bail!("HEAD is detached");
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Branch name is not valid UTF-8"))
    }

    fn find_tree(&self, id: &str) -> Result<Tree<'_>> {
        let oid = Oid::from_str(id).with_context(|| format!("Invalid tree id {}", id))?;
        Ok(self.repo.find_tree(oid)?)
    }

    fn paths_between(&self, from: Option<&Tree<'_>>, to: Option<&Tree<'_>>) -> Result<BTreeSet<PathBuf>> {
        let diff = self.repo.diff_tree_to_tree(from, to, None)?;
        let mut paths = BTreeSet::new();
        for delta in diff.deltas() {
            for file in [delta.old_file(), delta.new_file()] {
                if let Some(path) = file.path() {
                    paths.insert(path.to_path_buf());
                }
            }
        }
        Ok(paths)
    }

    /// Tracked files with staged or unstaged modifications
    pub(crate) fn tracked_changes(&self) -> Result<Vec<PathBuf>> {
        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status().intersects(STAGED | MODIFIED | Status::CONFLICTED))
            .filter_map(|entry| entry.path().map(PathBuf::from))
            .collect())
    }

    pub(crate) fn merge_head_oid(&self) -> Result<Option<Oid>> {
        let path = self.repo.path().join("MERGE_HEAD");
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match contents.lines().next() {
            Some(line) => Ok(Some(Oid::from_str(line.trim())?)),
            None => Ok(None),
        }
    }

    fn stash_oid(&mut self, index: usize) -> Result<Oid> {
        let mut found = None;
        self.repo.stash_foreach(|i, _, oid| {
            if i == index {
                found = Some(*oid);
                return false;
            }
            true
        })?;
        found.ok_or_else(|| anyhow!("No stash at index {}", index))
    }

    fn write_blob(&self, path: &Path, blob_id: Oid) -> Result<()> {
        let blob = self.repo.find_blob(blob_id)?;
        let target = self.workdir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&target, blob.content())
            .with_context(|| format!("Failed to write {}", target.display()))
    }
}

impl VcsEngine for Git2Engine {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn state(&self) -> Result<RepoState> {
        Ok(match self.repo.state() {
            RepositoryState::Clean => RepoState::Clean,
            RepositoryState::Merge => RepoState::Merging,
            RepositoryState::Revert | RepositoryState::RevertSequence => RepoState::Reverting,
            RepositoryState::CherryPick | RepositoryState::CherryPickSequence => {
                RepoState::CherryPicking
            }
            RepositoryState::Bisect => RepoState::Bisecting,
            RepositoryState::Rebase => RepoState::Rebasing,
            RepositoryState::RebaseInteractive => RepoState::RebasingInteractive,
            RepositoryState::RebaseMerge => RepoState::RebasingMerge,
            RepositoryState::ApplyMailbox | RepositoryState::ApplyMailboxOrRebase => {
                RepoState::ApplyingMailbox
            }
        })
    }

    fn status(&self) -> Result<StatusSnapshot> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = self
            .repo
            .statuses(Some(&mut options))
            .context("Failed to get git status")?;

        let mut snapshot = StatusSnapshot::default();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let path = PathBuf::from(path);
            let status = entry.status();
            if status.contains(Status::CONFLICTED) {
                snapshot.conflicts.insert(path);
                continue;
            }
            if status.intersects(STAGED) {
                snapshot.staged.insert(path.clone());
            }
            if status.contains(Status::WT_NEW) {
                snapshot.untracked.insert(path);
            } else if status.intersects(MODIFIED) {
                snapshot.unstaged.insert(path);
            }
        }
        Ok(snapshot)
    }

    fn head_tree(&self) -> Result<Option<String>> {
        Ok(self
            .head_commit()?
            .map(|commit| commit.tree_id().to_string()))
    }

    fn changed_paths(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<PathBuf>> {
        let from = from.map(|id| self.find_tree(id)).transpose()?;
        let to = to.map(|id| self.find_tree(id)).transpose()?;
        Ok(self
            .paths_between(from.as_ref(), to.as_ref())?
            .into_iter()
            .collect())
    }

    fn reset_index(&mut self) -> Result<()> {
        let mut index = self.repo.index()?;
        match self.head_commit()? {
            Some(commit) => index.read_tree(&commit.tree()?)?,
            None => index.clear()?,
        }
        index.write()?;
        Ok(())
    }

    fn stage(&mut self, paths: &[PathBuf]) -> Result<()> {
        let mut index = self.repo.index()?;
        for path in paths {
            let staged = if self.workdir.join(path).exists() {
                index.add_path(path)
            } else {
                index.remove_path(path)
            };
            staged.with_context(|| format!("Failed to stage {}", path.display()))?;
        }
        index.write()?;
        Ok(())
    }

    fn unstage(&mut self, paths: &[PathBuf]) -> Result<()> {
        match self.head_commit()? {
            Some(commit) => {
                self.repo
                    .reset_default(Some(commit.as_object()), paths.iter().map(PathBuf::as_path))?;
            }
            None => {
                let mut index = self.repo.index()?;
                for path in paths {
                    index.remove_path(path)?;
                }
                index.write()?;
            }
        }
        Ok(())
    }

    fn discard(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.unstage(paths)?;

        let mut tracked = Vec::new();
        for path in paths {
            let status = self.repo.status_file(path)?;
            if status.contains(Status::WT_NEW) {
                let full = self.workdir.join(path);
                fs::remove_file(&full)
                    .with_context(|| format!("Failed to remove {}", full.display()))?;
            } else {
                tracked.push(path);
            }
        }
        if tracked.is_empty() {
            return Ok(());
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        for path in tracked {
            checkout.path(path.as_path());
        }
        self.repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;
        let signature = self.repo.signature()?;

        let mut parents: Vec<Commit<'_>> = self.head_commit()?.into_iter().collect();
        let merging = self.merge_head_oid()?;
        if let Some(oid) = merging {
            parents.push(self.repo.find_commit(oid)?);
        }
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parent_refs,
        )?;
        if merging.is_some() {
            self.repo.cleanup_state()?;
        }
        info!("Created commit {}", oid);
        Ok(oid.to_string())
    }

    fn checkout_branch(&mut self, name: &str) -> Result<()> {
        let branch = match self.repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(e) if e.code() == ErrorCode::NotFound => {
                // start a local branch tracking the remote one of the same name
                let remote_name = format!("{}/{}", self.default_remote, name);
                let remote = self
                    .repo
                    .find_branch(&remote_name, BranchType::Remote)
                    .with_context(|| format!("No local or remote branch named {}", name))?;
                let commit = remote.get().peel_to_commit()?;
                let mut local = self.repo.branch(name, &commit, false)?;
                local.set_upstream(Some(&remote_name))?;
                local
            }
            Err(e) => return Err(e.into()),
        };

        let target = branch.get().peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(target.as_object(), Some(&mut checkout))
            .with_context(|| format!("Failed to check out {}", name))?;

        let refname = branch
            .get()
            .name()
            .ok_or_else(|| anyhow!("Branch name is not valid UTF-8"))?;
        self.repo.set_head(refname)?;
        Ok(())
    }

    fn create_branch(&mut self, name: &str, start: Option<&str>) -> Result<()> {
        let commit = match start {
            Some(rev) => self.repo.revparse_single(rev)?.peel_to_commit()?,
            None => self
                .head_commit()?
                .ok_or_else(|| anyhow!("Cannot branch from an unborn HEAD"))?,
        };
        self.repo.branch(name, &commit, false)?;
        Ok(())
    }

    fn delete_branch(&mut self, name: &str) -> Result<()> {
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        if branch.is_head() {
            bail!("Cannot delete the checked-out branch {}", name);
        }
        branch.delete()?;
        Ok(())
    }

    fn checkout_paths(&mut self, rev: &str, paths: &[PathBuf]) -> Result<()> {
        let tree = self.repo.revparse_single(rev)?.peel_to_tree()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        for path in paths {
            checkout.path(path.as_path());
        }
        self.repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;
        Ok(())
    }

    fn reset(&mut self, rev: &str, mode: ResetMode) -> Result<()> {
        let target = self.repo.revparse_single(rev)?.peel(ObjectType::Commit)?;
        let kind = match mode {
            ResetMode::Soft => ResetType::Soft,
            ResetMode::Mixed => ResetType::Mixed,
            ResetMode::Hard => ResetType::Hard,
        };
        self.repo.reset(&target, kind, None)?;
        if mode == ResetMode::Hard {
            self.repo.cleanup_state()?;
        }
        Ok(())
    }

    fn revert(&mut self, rev: &str) -> Result<RevertStatus> {
        let commit = self.repo.revparse_single(rev)?.peel_to_commit()?;
        self.repo.revert(&commit, None)?;
        if self.repo.index()?.has_conflicts() {
            return Ok(RevertStatus::Conflicts);
        }
        let message = format!(
            "Revert \"{}\"\n\nThis reverts commit {}.\n",
            commit.summary().unwrap_or_default(),
            commit.id()
        );
        drop(commit);
        let id = self.commit(&message)?;
        self.repo.cleanup_state()?;
        Ok(RevertStatus::Reverted(id))
    }

    fn fetch(&mut self, credentials: &dyn CredentialsProvider) -> Result<FetchReport> {
        let (remote, tracking) = self.upstream_refs()?;
        self.fetch_remote(&remote, &tracking, credentials)
    }

    fn pull(&mut self, mode: PullMode, credentials: &dyn CredentialsProvider) -> Result<PullReport> {
        self.pull_upstream(mode, credentials)
    }

    fn push(&mut self, credentials: &dyn CredentialsProvider) -> Result<PushReport> {
        self.push_branch(credentials)
    }

    fn push_tag(&mut self, name: &str, credentials: &dyn CredentialsProvider) -> Result<PushReport> {
        self.push_tag_ref(name, credentials)
    }

    fn ahead_behind(&self) -> Result<Option<AheadBehind>> {
        let Ok(name) = self.current_branch() else {
            return Ok(None);
        };
        let branch = self.repo.find_branch(&name, BranchType::Local)?;
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (Some(local), Some(remote)) = (branch.get().target(), upstream.get().target()) else {
            return Ok(None);
        };
        let (ahead, behind) = self
            .repo
            .graph_ahead_behind(local, remote)
            .context("Failed to calculate ahead/behind counts")?;
        Ok(Some(AheadBehind { ahead, behind }))
    }

    fn upstream(&self) -> Result<Option<String>> {
        let Ok(name) = self.current_branch() else {
            return Ok(None);
        };
        let branch = self.repo.find_branch(&name, BranchType::Local)?;
        match branch.upstream() {
            Ok(upstream) => Ok(upstream.name()?.map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_upstream(&mut self, upstream: &str) -> Result<()> {
        let name = self.current_branch()?;
        let mut branch = self.repo.find_branch(&name, BranchType::Local)?;
        branch
            .set_upstream(Some(upstream))
            .with_context(|| format!("Failed to set upstream of {} to {}", name, upstream))?;
        Ok(())
    }

    fn merge(&mut self, rev: &str) -> Result<MergeStatus> {
        let target = self.repo.revparse_single(rev)?.peel_to_commit()?.id();
        self.merge_commit(target)
    }

    fn merge_head(&self) -> Result<Option<String>> {
        Ok(self.merge_head_oid()?.map(|oid| oid.to_string()))
    }

    fn abort_merge(&mut self) -> Result<()> {
        self.reset("HEAD", ResetMode::Hard)
    }

    fn clean(&mut self) -> Result<()> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let untracked: Vec<PathBuf> = self
            .repo
            .statuses(Some(&mut options))?
            .iter()
            .filter(|entry| entry.status().contains(Status::WT_NEW))
            .filter_map(|entry| entry.path().map(|p| self.workdir.join(p)))
            .collect();
        let mut parents = BTreeSet::new();
        for path in untracked {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            let mut dir = path.parent();
            while let Some(parent) = dir.filter(|d| *d != self.workdir && d.starts_with(&self.workdir)) {
                parents.insert(parent.to_path_buf());
                dir = parent.parent();
            }
        }
        // deepest first, so a directory is only checked after its children
        for dir in parents.iter().rev() {
            let empty = fs::read_dir(dir)
                .with_context(|| format!("Failed to read {}", dir.display()))?
                .next()
                .is_none();
            if empty {
                fs::remove_dir(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
                debug!("Removed empty directory {}", dir.display());
            }
        }
        Ok(())
    }

    fn continue_rebase(&mut self) -> Result<RebaseStatus> {
        self.resume_rebase(false)
    }

    fn skip_rebase(&mut self) -> Result<RebaseStatus> {
        self.resume_rebase(true)
    }

    fn abort_rebase(&mut self) -> Result<()> {
        let mut rebase = self.repo.open_rebase(None).context("No rebase in progress")?;
        rebase.abort()?;
        info!("Rebase aborted");
        Ok(())
    }

    fn stash_create(&mut self, message: &str, include_untracked: bool) -> Result<Option<String>> {
        let signature = self.repo.signature()?;
        let flags = if include_untracked {
            StashFlags::INCLUDE_UNTRACKED
        } else {
            StashFlags::DEFAULT
        };
        match self.repo.stash_save(&signature, message, Some(flags)) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn stash_list(&mut self) -> Result<Vec<StashEntry>> {
        let mut entries = Vec::new();
        self.repo.stash_foreach(|index, message, oid| {
            entries.push(StashEntry {
                index,
                message: message.to_string(),
                id: oid.to_string(),
            });
            true
        })?;
        Ok(entries)
    }

    fn stash_paths(&mut self, index: usize) -> Result<BTreeSet<PathBuf>> {
        let oid = self.stash_oid(index)?;
        let stash = self.repo.find_commit(oid)?;
        let base = stash.parent(0)?.tree()?;

        let mut paths = self.paths_between(Some(&base), Some(&stash.tree()?))?;
        if let Ok(staged) = stash.parent(1) {
            paths.extend(self.paths_between(Some(&base), Some(&staged.tree()?))?);
        }
        if let Ok(untracked) = stash.parent(2) {
            untracked
                .tree()?
                .walk(TreeWalkMode::PreOrder, |root, entry| {
                    if entry.kind() == Some(ObjectType::Blob) {
                        if let Some(name) = entry.name() {
                            paths.insert(PathBuf::from(format!("{}{}", root, name)));
                        }
                    }
                    TreeWalkResult::Ok
                })?;
        }
        Ok(paths)
    }

    fn stash_apply(&mut self, index: usize) -> Result<StashApplyStatus> {
        let mut options = StashApplyOptions::new();
        match self.repo.stash_apply(index, Some(&mut options)) {
            Ok(()) if self.repo.index()?.has_conflicts() => Ok(StashApplyStatus::Conflicts),
            Ok(()) => Ok(StashApplyStatus::Applied),
            Err(e) if e.code() == ErrorCode::Conflict || e.code() == ErrorCode::MergeConflict => {
                Ok(StashApplyStatus::Failed(e.message().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stash_drop(&mut self, index: usize) -> Result<()> {
        self.repo.stash_drop(index)?;
        Ok(())
    }

    fn tag(&mut self, name: &str, rev: &str, message: Option<&str>) -> Result<()> {
        let target = self.repo.revparse_single(rev)?;
        match message {
            Some(message) => {
                let signature = self.repo.signature()?;
                self.repo.tag(name, &target, &signature, message, false)?;
            }
            None => {
                self.repo.tag_lightweight(name, &target, false)?;
            }
        }
        Ok(())
    }

    fn tag_delete(&mut self, name: &str) -> Result<()> {
        self.repo.tag_delete(name)?;
        Ok(())
    }

    fn resolve(&mut self, paths: &[PathBuf], stage: ResolveStage) -> Result<()> {
        let mut index = self.repo.index()?;

        for path in paths {
            let key = path.to_string_lossy();
            let conflict = index
                .conflicts()?
                .filter_map(|c| c.ok())
                .find(|c| {
                    [&c.ancestor, &c.our, &c.their]
                        .into_iter()
                        .flatten()
                        .any(|entry| entry.path == key.as_bytes())
                });

            let side = match (conflict, stage) {
                (Some(conflict), ResolveStage::Ours) => conflict.our.map(|e| e.id),
                (Some(conflict), ResolveStage::Theirs) => conflict.their.map(|e| e.id),
                (None, ResolveStage::Ours) => {
                    // nothing conflicted: drop local divergence from HEAD
                    let head = self
                        .head_commit()?
                        .ok_or_else(|| anyhow!("{} has no HEAD version", path.display()))?;
                    Some(head.tree()?.get_path(path)?.id())
                }
                (None, ResolveStage::Theirs) => {
                    bail!("{} has no conflict to resolve", path.display())
                }
            };

            match side {
                Some(blob) => {
                    self.write_blob(path, blob)?;
                    index.add_path(path)?;
                }
                None => {
                    let full = self.workdir.join(path);
                    if full.exists() {
                        fs::remove_file(&full)
                            .with_context(|| format!("Failed to remove {}", full.display()))?;
                    }
                    index.remove_path(path)?;
                }
            }
            debug!("Resolved {} using {:?}", path.display(), stage);
        }

        index.write()?;
        Ok(())
    }

    fn update_submodules(&mut self, credentials: &dyn CredentialsProvider) -> Result<()> {
        super::remote::update_submodules(&self.repo, credentials)
    }
}
