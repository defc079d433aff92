//! Event-bracketing controller.
//!
//! Every asynchronous entry point submits its work to the scheduler against the current
//! [`RepositorySession`]. A priority listener keeps a stack of started-but-unclosed events; when
//! a unit fails before the session closed them (an engine panic, say), the stack is drained and a
//! failure is fired for each entry, innermost first.

use crate::app::listeners::{ListenerRegistry, OperationListener};
use crate::app::scheduler::{OperationHandle, OperationScheduler};
use crate::app::session::RepositorySession;
use crate::domain::{
    ConflictSide, EventInfo, FetchOutcome, OperationKind, PullMode, PullOutcome, PullResult,
    PushOutcome, ResetMode, ResolveOutcome, ResolveStage, RevertOutcome, StashApplyOutcome,
    StashEntry, StatusSnapshot,
};
use crate::error::{OperationError, Result};
use crate::ports::{ConfirmationPrompt, CredentialsProvider, FileRefresher, VcsEngine};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// The open session, plus its workdir so getters never wait behind a running operation
#[derive(Default)]
struct Slot {
    session: Mutex<Option<RepositorySession>>,
    workdir: RwLock<Option<PathBuf>>,
}

type SessionSlot = Arc<Slot>;

/// Stack of events that were announced but not yet closed.
#[derive(Debug, Default)]
pub struct PendingEvents {
    stack: Mutex<Vec<EventInfo>>,
    suspended: AtomicBool,
}

impl PendingEvents {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<EventInfo>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracking(&self) -> bool {
        !self.suspended.load(Ordering::SeqCst)
    }

    /// Fires a failure for every pending event, most recent first. Returns how many were closed.
    pub fn consume(&self, listeners: &ListenerRegistry, cause: &OperationError) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.suspended.store(true, Ordering::SeqCst);
        let mut closed = 0;
        loop {
            // the guard must not be held while listeners run
            let next = self.lock().pop();
            let Some(info) = next else {
                break;
            };
            debug!("Closing unfinished {} after: {}", info, cause);
            listeners.fire_failed(&info, cause);
            closed += 1;
        }
        self.suspended.store(false, Ordering::SeqCst);
        warn!("Closed {} unfinished operation event(s) after: {}", closed, cause);
        closed
    }
}

impl OperationListener for PendingEvents {
    fn about_to_start(&self, info: &EventInfo) {
        if self.tracking() {
            self.lock().push(info.clone());
        }
    }

    fn succeeded(&self, _info: &EventInfo) {
        if self.tracking() {
            self.lock().pop();
        }
    }

    fn failed(&self, _info: &EventInfo, _cause: &OperationError) {
        if self.tracking() {
            self.lock().pop();
        }
    }
}

pub struct Controller {
    scheduler: OperationScheduler,
    listeners: Arc<ListenerRegistry>,
    pending: Arc<PendingEvents>,
    session: SessionSlot,
    confirmation: Arc<dyn ConfirmationPrompt>,
    refresher: Arc<dyn FileRefresher>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("scheduler", &self.scheduler)
            .field("listeners", &self.listeners)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        scheduler: OperationScheduler,
        confirmation: Arc<dyn ConfirmationPrompt>,
        refresher: Arc<dyn FileRefresher>,
    ) -> Self {
        let listeners = Arc::new(ListenerRegistry::new());
        let pending = Arc::new(PendingEvents::default());
        listeners.add_priority_listener(pending.clone());
        Self {
            scheduler,
            listeners,
            pending,
            session: Arc::new(Slot::default()),
            confirmation,
            refresher,
        }
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn OperationListener>) {
        self.listeners.add_listener(listener);
    }

    pub fn add_priority_listener(&self, listener: Arc<dyn OperationListener>) {
        self.listeners.add_priority_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn OperationListener>) {
        self.listeners.remove_listener(listener);
    }

    /// Removes every caller listener; event tracking stays registered.
    pub fn clear_listeners(&self) {
        self.listeners.clear();
        self.listeners.add_priority_listener(self.pending.clone());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Closes every pending event with `cause`.
    pub fn consume_events(&self, cause: &OperationError) -> usize {
        self.pending.consume(&self.listeners, cause)
    }

    /// Does not wait for a running operation, so listeners may call it.
    pub fn is_open(&self) -> bool {
        self.workdir().is_some()
    }

    pub fn workdir(&self) -> Option<PathBuf> {
        self.session
            .workdir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens a working copy on the caller's thread. Meant for startup, before work is queued.
    pub fn open_sync(&self, engine: Box<dyn VcsEngine>) -> Result<PathBuf> {
        let result = open_into(&self.session, &self.listeners, &self.refresher, || Ok(engine));
        if let Err(err) = &result {
            self.consume_events(err);
        }
        result
    }

    /// Runs `op` on the caller's thread against the current session.
    ///
    /// Callers must not overlap this with queued work.
    pub fn run_sync<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut RepositorySession) -> Result<T>,
    {
        let result = with_session(&self.session, op);
        if let Err(err) = &result {
            self.consume_events(err);
        }
        result
    }

    /// Submits arbitrary work against the current session.
    pub fn schedule<T, W, R, E>(&self, work: W, on_result: R, on_error: E) -> OperationHandle
    where
        T: Send + 'static,
        W: FnOnce(&mut RepositorySession) -> Result<T> + Send + 'static,
        R: FnOnce(T) + Send + 'static,
        E: FnOnce(OperationError) + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        self.submit(move || with_session(&session, work), on_result, on_error)
    }

    fn submit<T, W, R, E>(&self, work: W, on_result: R, on_error: E) -> OperationHandle
    where
        T: Send + 'static,
        W: FnOnce() -> Result<T> + Send + 'static,
        R: FnOnce(T) + Send + 'static,
        E: FnOnce(OperationError) + Send + 'static,
    {
        let pending = Arc::clone(&self.pending);
        let listeners = Arc::clone(&self.listeners);
        self.scheduler.schedule_with(work, on_result, move |err| {
            pending.consume(&listeners, &err);
            on_error(err);
        })
    }

    /// Replaces the current session with one built by `open` on the worker.
    pub fn async_open<F>(
        &self,
        open: F,
        on_result: impl FnOnce(PathBuf) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle
    where
        F: FnOnce() -> anyhow::Result<Box<dyn VcsEngine>> + Send + 'static,
    {
        let slot = Arc::clone(&self.session);
        let listeners = Arc::clone(&self.listeners);
        let refresher = Arc::clone(&self.refresher);
        self.submit(
            move || open_into(&slot, &listeners, &refresher, open),
            on_result,
            on_error,
        )
    }

    pub fn async_close(&self) -> OperationHandle {
        let slot = Arc::clone(&self.session);
        self.submit(
            move || {
                if let Some(session) = replace_session(&slot, None) {
                    info!("Closed working copy {}", session.workdir().display());
                }
                Ok(())
            },
            |()| {},
            |err| warn!("Closing the working copy failed: {}", err),
        )
    }

    pub fn async_status(
        &self,
        on_result: impl FnOnce(StatusSnapshot) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(|s| s.status(), on_result, on_error)
    }

    pub fn async_fetch(
        &self,
        credentials: Arc<dyn CredentialsProvider>,
        on_result: impl FnOnce(FetchOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.fetch(&*credentials), on_result, on_error)
    }

    pub fn async_pull(
        &self,
        mode: PullMode,
        update_submodules: bool,
        credentials: Arc<dyn CredentialsProvider>,
        on_result: impl FnOnce(PullResult) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(
            move |s| s.pull(mode, &*credentials, update_submodules),
            on_result,
            on_error,
        )
    }

    pub fn async_push(
        &self,
        credentials: Arc<dyn CredentialsProvider>,
        on_result: impl FnOnce(PushOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.push(&*credentials), on_result, on_error)
    }

    pub fn async_push_tag(
        &self,
        name: String,
        credentials: Arc<dyn CredentialsProvider>,
        on_result: impl FnOnce(PushOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.push_tag(&name, &*credentials), on_result, on_error)
    }

    pub fn async_commit(
        &self,
        message: String,
        on_result: impl FnOnce(String) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.commit(&message), on_result, on_error)
    }

    pub fn async_stage(
        &self,
        files: Vec<PathBuf>,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.stage(&files), |()| {}, on_error)
    }

    pub fn async_unstage(
        &self,
        files: Vec<PathBuf>,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.unstage(&files), |()| {}, on_error)
    }

    pub fn async_discard(
        &self,
        files: Vec<PathBuf>,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.discard(&files), |()| {}, on_error)
    }

    pub fn async_checkout(
        &self,
        branch: String,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.checkout(&branch), |()| {}, on_error)
    }

    pub fn async_create_branch(
        &self,
        name: String,
        start: Option<String>,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(
            move |s| s.create_branch(&name, start.as_deref()),
            |()| {},
            on_error,
        )
    }

    pub fn async_delete_branch(
        &self,
        name: String,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.delete_branch(&name), |()| {}, on_error)
    }

    pub fn async_checkout_file(
        &self,
        rev: String,
        files: Vec<PathBuf>,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.checkout_file(&rev, &files), |()| {}, on_error)
    }

    pub fn async_merge(
        &self,
        rev: String,
        on_result: impl FnOnce(PullOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.merge(&rev), on_result, on_error)
    }

    pub fn async_merge_restart(
        &self,
        credentials: Arc<dyn CredentialsProvider>,
        on_result: impl FnOnce(PullOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.merge_restart(&*credentials), on_result, on_error)
    }

    pub fn async_abort_merge(
        &self,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(|s| s.abort_merge(), |()| {}, on_error)
    }

    pub fn async_abort_rebase(
        &self,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(|s| s.abort_rebase(), |()| {}, on_error)
    }

    pub fn async_continue_rebase(
        &self,
        on_result: impl FnOnce(PullOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(|s| s.continue_rebase(), on_result, on_error)
    }

    pub fn async_skip_rebase(
        &self,
        on_result: impl FnOnce(PullOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(|s| s.skip_rebase(), on_result, on_error)
    }

    pub fn async_reset(
        &self,
        rev: String,
        mode: ResetMode,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.reset_to_commit(&rev, mode), |()| {}, on_error)
    }

    pub fn async_revert(
        &self,
        rev: String,
        on_result: impl FnOnce(RevertOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.revert_commit(&rev), on_result, on_error)
    }

    pub fn async_stash_create(
        &self,
        message: String,
        include_untracked: bool,
        on_result: impl FnOnce(Option<String>) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(
            move |s| s.stash_create(&message, include_untracked),
            on_result,
            on_error,
        )
    }

    pub fn async_stash_list(
        &self,
        on_result: impl FnOnce(Vec<StashEntry>) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(|s| s.stash_list(), on_result, on_error)
    }

    /// Applies stash `index`, dropping it afterwards when `pop` is set.
    pub fn async_stash_apply(
        &self,
        index: usize,
        pop: bool,
        on_result: impl FnOnce(StashApplyOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(
            move |s| {
                if pop {
                    s.stash_pop(index)
                } else {
                    s.stash_apply(index)
                }
            },
            on_result,
            on_error,
        )
    }

    pub fn async_stash_drop(
        &self,
        index: usize,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.stash_drop(index), |()| {}, on_error)
    }

    pub fn async_tag(
        &self,
        name: String,
        rev: String,
        message: Option<String>,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(
            move |s| s.tag_commit(&name, &rev, message.as_deref()),
            |()| {},
            on_error,
        )
    }

    pub fn async_tag_delete(
        &self,
        name: String,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        self.schedule(move |s| s.tag_delete(&name), |()| {}, on_error)
    }

    /// Keeps the user's own version of each file.
    ///
    /// During a rebase the user's side is the engine's "theirs", so the prompt is asked first
    /// and told that the upstream side is what "mine" keeps.
    pub fn async_resolve_using_mine(
        &self,
        files: Vec<PathBuf>,
        on_result: impl FnOnce(ResolveOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        let confirmation = Arc::clone(&self.confirmation);
        self.schedule(
            move |s| resolve(s, &*confirmation, &files, ResolveStage::Ours),
            on_result,
            on_error,
        )
    }

    pub fn async_resolve_using_theirs(
        &self,
        files: Vec<PathBuf>,
        on_result: impl FnOnce(ResolveOutcome) + Send + 'static,
        on_error: impl FnOnce(OperationError) + Send + 'static,
    ) -> OperationHandle {
        let confirmation = Arc::clone(&self.confirmation);
        self.schedule(
            move |s| resolve(s, &*confirmation, &files, ResolveStage::Theirs),
            on_result,
            on_error,
        )
    }

    /// Lets queued work drain and stops the worker. A later submission starts a new one.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

fn lock_slot(slot: &SessionSlot) -> std::sync::MutexGuard<'_, Option<RepositorySession>> {
    slot.session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Swaps the open session, keeping the cached workdir in step. Returns the previous one.
fn replace_session(
    slot: &SessionSlot,
    session: Option<RepositorySession>,
) -> Option<RepositorySession> {
    let workdir = session.as_ref().map(|s| s.workdir().to_path_buf());
    let mut guard = lock_slot(slot);
    let previous = std::mem::replace(&mut *guard, session);
    *slot.workdir.write().unwrap_or_else(PoisonError::into_inner) = workdir;
    previous
}

fn with_session<T, F>(slot: &SessionSlot, op: F) -> Result<T>
where
    F: FnOnce(&mut RepositorySession) -> Result<T>,
{
    let mut guard = lock_slot(slot);
    let session = guard.as_mut().ok_or(OperationError::NoRepository)?;
    op(session)
}

fn open_into<F>(
    slot: &SessionSlot,
    listeners: &Arc<ListenerRegistry>,
    refresher: &Arc<dyn FileRefresher>,
    open: F,
) -> Result<PathBuf>
where
    F: FnOnce() -> anyhow::Result<Box<dyn VcsEngine>>,
{
    let event = EventInfo::new(OperationKind::OpenWorkingCopy);
    listeners.fire_about_to_start(&event);
    match open() {
        Ok(engine) => {
            let session =
                RepositorySession::new(engine, Arc::clone(listeners), Arc::clone(refresher));
            let workdir = session.workdir().to_path_buf();
            replace_session(slot, Some(session));
            info!("Opened working copy {}", workdir.display());
            listeners.fire_succeeded(&event);
            Ok(workdir)
        }
        Err(source) => {
            let err = OperationError::from(source);
            listeners.fire_failed(&event, &err);
            Err(err)
        }
    }
}

fn resolve(
    session: &mut RepositorySession,
    confirmation: &dyn ConfirmationPrompt,
    files: &[PathBuf],
    stage: ResolveStage,
) -> Result<ResolveOutcome> {
    if session.state()?.is_rebase_merge() {
        // the engine's ours is the upstream branch while rebasing
        let kept = match stage {
            ResolveStage::Ours => ConflictSide::Upstream,
            ResolveStage::Theirs => ConflictSide::Local,
        };
        if !confirmation.confirm_reversed_resolution(kept, files) {
            info!("Resolution of {} file(s) declined", files.len());
            return Ok(ResolveOutcome::Declined);
        }
    }
    match stage {
        ResolveStage::Ours => session.resolve_using_mine(files)?,
        ResolveStage::Theirs => session.resolve_using_theirs(files)?,
    }
    Ok(ResolveOutcome::Resolved)
}
