//! Scripted engine and listener used by the core unit tests.

use crate::app::listeners::OperationListener;
use crate::domain::{
    AheadBehind, EventInfo, PullMode, RepoState, ResetMode, ResolveStage, StashEntry,
    StatusSnapshot,
};
use crate::error::OperationError;
use crate::ports::{
    CredentialsProvider, FetchReport, Integration, MergeStatus, PullReport, PushReport,
    RebaseStatus, RevertStatus, StashApplyStatus, VcsEngine,
};
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared log of the engine calls made by a test.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub(crate) fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, call: &str) -> bool {
        self.0.lock().unwrap().iter().any(|c| c == call)
    }
}

/// Pops scripted values in order, repeating the last one once the script runs out.
#[derive(Debug, Default)]
struct Script<T>(Mutex<VecDeque<T>>);

impl<T: Clone + Default> Script<T> {
    fn push(&mut self, value: T) {
        self.0.get_mut().unwrap().push_back(value);
    }

    fn next(&self) -> T {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

pub(crate) struct StubEngine {
    workdir: PathBuf,
    state: RepoState,
    statuses: Script<StatusSnapshot>,
    head_trees: Script<Option<String>>,
    changed: Vec<PathBuf>,
    fetch: FetchReport,
    pull: Option<PullReport>,
    push: Option<PushReport>,
    ahead_behind: Option<AheadBehind>,
    upstream: Option<String>,
    merge: Option<MergeStatus>,
    merge_head: Option<String>,
    stash_paths: BTreeSet<PathBuf>,
    stash_apply: Option<StashApplyStatus>,
    revert: Option<RevertStatus>,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    calls: CallLog,
}

impl StubEngine {
    pub(crate) fn new() -> Self {
        Self {
            workdir: PathBuf::from("/stub"),
            state: RepoState::Clean,
            statuses: Script::default(),
            head_trees: Script::default(),
            changed: Vec::new(),
            fetch: FetchReport::default(),
            pull: None,
            push: None,
            ahead_behind: None,
            upstream: None,
            merge: None,
            merge_head: None,
            stash_paths: BTreeSet::new(),
            stash_apply: None,
            revert: None,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            calls: CallLog::default(),
        }
    }

    pub(crate) fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub(crate) fn with_workdir(mut self, workdir: &str) -> Self {
        self.workdir = PathBuf::from(workdir);
        self
    }

    pub(crate) fn with_state(mut self, state: RepoState) -> Self {
        self.state = state;
        self
    }

    /// Each call scripts the next `status()` answer.
    pub(crate) fn with_status(mut self, status: StatusSnapshot) -> Self {
        self.statuses.push(status);
        self
    }

    pub(crate) fn with_head_trees(mut self, trees: Vec<Option<&str>>) -> Self {
        for tree in trees {
            self.head_trees.push(tree.map(str::to_string));
        }
        self
    }

    pub(crate) fn with_changed(mut self, paths: Vec<&str>) -> Self {
        self.changed = paths.into_iter().map(PathBuf::from).collect();
        self
    }

    pub(crate) fn with_fetch(mut self, report: FetchReport) -> Self {
        self.fetch = report;
        self
    }

    pub(crate) fn with_pull(mut self, report: PullReport) -> Self {
        self.pull = Some(report);
        self
    }

    pub(crate) fn with_push(mut self, report: PushReport) -> Self {
        self.push = Some(report);
        self
    }

    pub(crate) fn with_ahead_behind(mut self, counts: AheadBehind) -> Self {
        self.ahead_behind = Some(counts);
        self
    }

    pub(crate) fn with_upstream(mut self, upstream: &str) -> Self {
        self.upstream = Some(upstream.to_string());
        self
    }

    pub(crate) fn with_merge(mut self, status: MergeStatus) -> Self {
        self.merge = Some(status);
        self
    }

    pub(crate) fn with_merge_head(mut self, head: &str) -> Self {
        self.merge_head = Some(head.to_string());
        self
    }

    pub(crate) fn with_stash_paths(mut self, paths: &[&str]) -> Self {
        self.stash_paths = paths.iter().map(PathBuf::from).collect();
        self
    }

    pub(crate) fn with_stash_apply(mut self, status: StashApplyStatus) -> Self {
        self.stash_apply = Some(status);
        self
    }

    pub(crate) fn with_revert(mut self, status: RevertStatus) -> Self {
        self.revert = Some(status);
        self
    }

    /// Makes the named engine call return an error.
    pub(crate) fn failing(mut self, call: &'static str) -> Self {
        self.failing.insert(call);
        self
    }

    /// Makes the named engine call panic, as an engine bug would.
    pub(crate) fn panicking_on(mut self, call: &'static str) -> Self {
        self.panicking.insert(call);
        self
    }

    fn call(&self, name: &'static str, detail: Option<String>) -> Result<()> {
        match detail {
            Some(detail) => self.calls.push(format!("{}:{}", name, detail)),
            None => self.calls.push(name),
        }
        if self.panicking.contains(name) {
            panic!("{} reached the engine", name);
        }
        if self.failing.contains(name) {
            return Err(anyhow!("stub failure in {}", name));
        }
        Ok(())
    }
}

impl VcsEngine for StubEngine {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn state(&self) -> Result<RepoState> {
        self.call("state", None)?;
        Ok(self.state)
    }

    fn status(&self) -> Result<StatusSnapshot> {
        self.call("status", None)?;
        Ok(self.statuses.next())
    }

    fn head_tree(&self) -> Result<Option<String>> {
        self.call("head_tree", None)?;
        Ok(self.head_trees.next())
    }

    fn changed_paths(&self, _from: Option<&str>, _to: Option<&str>) -> Result<Vec<PathBuf>> {
        self.call("changed_paths", None)?;
        Ok(self.changed.clone())
    }

    fn reset_index(&mut self) -> Result<()> {
        self.call("reset_index", None)
    }

    fn stage(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.call("stage", Some(paths.len().to_string()))
    }

    fn unstage(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.call("unstage", Some(paths.len().to_string()))
    }

    fn discard(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.call("discard", Some(paths.len().to_string()))
    }

    fn commit(&mut self, _message: &str) -> Result<String> {
        self.call("commit", None)?;
        Ok("c0ffee".to_string())
    }

    fn checkout_branch(&mut self, name: &str) -> Result<()> {
        self.call("checkout_branch", Some(name.to_string()))
    }

    fn create_branch(&mut self, name: &str, _start: Option<&str>) -> Result<()> {
        self.call("create_branch", Some(name.to_string()))
    }

    fn delete_branch(&mut self, name: &str) -> Result<()> {
        self.call("delete_branch", Some(name.to_string()))
    }

    fn checkout_paths(&mut self, rev: &str, _paths: &[PathBuf]) -> Result<()> {
        self.call("checkout_paths", Some(rev.to_string()))
    }

    fn reset(&mut self, rev: &str, mode: ResetMode) -> Result<()> {
        self.call("reset", Some(format!("{}:{:?}", rev, mode)))
    }

    fn revert(&mut self, rev: &str) -> Result<RevertStatus> {
        self.call("revert", Some(rev.to_string()))?;
        Ok(self
            .revert
            .clone()
            .unwrap_or_else(|| RevertStatus::Reverted("rev3rt".to_string())))
    }

    fn fetch(&mut self, _credentials: &dyn CredentialsProvider) -> Result<FetchReport> {
        self.call("fetch", None)?;
        Ok(self.fetch.clone())
    }

    fn pull(
        &mut self,
        mode: PullMode,
        _credentials: &dyn CredentialsProvider,
    ) -> Result<PullReport> {
        self.call("pull", Some(format!("{:?}", mode)))?;
        Ok(self.pull.clone().unwrap_or(PullReport {
            fetch: FetchReport::default(),
            integration: match mode {
                PullMode::Merge => Integration::Merge(MergeStatus::AlreadyUpToDate),
                PullMode::Rebase => Integration::Rebase(RebaseStatus::UpToDate),
            },
        }))
    }

    fn push(&mut self, _credentials: &dyn CredentialsProvider) -> Result<PushReport> {
        self.call("push", None)?;
        self.push.clone().ok_or_else(|| anyhow!("no push scripted"))
    }

    fn push_tag(
        &mut self,
        name: &str,
        _credentials: &dyn CredentialsProvider,
    ) -> Result<PushReport> {
        self.call("push_tag", Some(name.to_string()))?;
        self.push.clone().ok_or_else(|| anyhow!("no push scripted"))
    }

    fn ahead_behind(&self) -> Result<Option<AheadBehind>> {
        self.call("ahead_behind", None)?;
        Ok(self.ahead_behind)
    }

    fn upstream(&self) -> Result<Option<String>> {
        self.call("upstream", None)?;
        Ok(self.upstream.clone())
    }

    fn set_upstream(&mut self, upstream: &str) -> Result<()> {
        self.call("set_upstream", Some(upstream.to_string()))
    }

    fn merge(&mut self, rev: &str) -> Result<MergeStatus> {
        self.call("merge", Some(rev.to_string()))?;
        Ok(self.merge.clone().unwrap_or(MergeStatus::AlreadyUpToDate))
    }

    fn merge_head(&self) -> Result<Option<String>> {
        self.call("merge_head", None)?;
        Ok(self.merge_head.clone())
    }

    fn abort_merge(&mut self) -> Result<()> {
        self.call("abort_merge", None)
    }

    fn clean(&mut self) -> Result<()> {
        self.call("clean", None)
    }

    fn continue_rebase(&mut self) -> Result<RebaseStatus> {
        self.call("continue_rebase", None)?;
        Ok(RebaseStatus::Ok)
    }

    fn skip_rebase(&mut self) -> Result<RebaseStatus> {
        self.call("skip_rebase", None)?;
        Ok(RebaseStatus::Ok)
    }

    fn abort_rebase(&mut self) -> Result<()> {
        self.call("abort_rebase", None)
    }

    fn stash_create(&mut self, message: &str, _include_untracked: bool) -> Result<Option<String>> {
        self.call("stash_create", Some(message.to_string()))?;
        Ok(Some("5ta5h".to_string()))
    }

    fn stash_list(&mut self) -> Result<Vec<StashEntry>> {
        self.call("stash_list", None)?;
        Ok(Vec::new())
    }

    fn stash_paths(&mut self, index: usize) -> Result<BTreeSet<PathBuf>> {
        self.call("stash_paths", Some(index.to_string()))?;
        Ok(self.stash_paths.clone())
    }

    fn stash_apply(&mut self, index: usize) -> Result<StashApplyStatus> {
        self.call("stash_apply", Some(index.to_string()))?;
        Ok(self.stash_apply.clone().unwrap_or(StashApplyStatus::Applied))
    }

    fn stash_drop(&mut self, index: usize) -> Result<()> {
        self.call("stash_drop", Some(index.to_string()))
    }

    fn tag(&mut self, name: &str, _rev: &str, _message: Option<&str>) -> Result<()> {
        self.call("tag", Some(name.to_string()))
    }

    fn tag_delete(&mut self, name: &str) -> Result<()> {
        self.call("tag_delete", Some(name.to_string()))
    }

    fn resolve(&mut self, paths: &[PathBuf], stage: ResolveStage) -> Result<()> {
        let files: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        self.call("resolve", Some(format!("{:?}:{}", stage, files.join(","))))
    }

    fn update_submodules(&mut self, _credentials: &dyn CredentialsProvider) -> Result<()> {
        self.call("update_submodules", None)
    }
}

/// Records every notification as `start:<kind>`, `ok:<kind>` or `failed:<kind>`.
#[derive(Debug, Default)]
pub(crate) struct RecordingListener(Mutex<Vec<String>>);

impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl OperationListener for RecordingListener {
    fn about_to_start(&self, info: &EventInfo) {
        self.0.lock().unwrap().push(format!("start:{}", info.kind));
    }

    fn succeeded(&self, info: &EventInfo) {
        self.0.lock().unwrap().push(format!("ok:{}", info.kind));
    }

    fn failed(&self, info: &EventInfo, _cause: &OperationError) {
        self.0.lock().unwrap().push(format!("failed:{}", info.kind));
    }
}
