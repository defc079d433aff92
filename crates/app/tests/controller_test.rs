mod common;

use anyhow::Result;
use common::*;
use crossbeam_channel::unbounded;
use gitweave::adapters::{FixedAnswer, Git2Engine};
use gitweave_core::app::{Completion, Controller, OperationListener, OperationScheduler};
use gitweave_core::domain::{EventInfo, StashApplyOutcome};
use gitweave_core::error::OperationError;
use gitweave_core::ports::{NoRefresh, VcsEngine};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl OperationListener for Recorder {
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

fn controller() -> (Controller, Arc<Recorder>) {
    let controller = Controller::new(
        OperationScheduler::new(),
        Arc::new(FixedAnswer(true)),
        Arc::new(NoRefresh),
    );
    let recorder = Arc::new(Recorder::default());
    controller.add_listener(recorder.clone());
    (controller, recorder)
}

#[test]
fn test_async_open_and_commit_bracket_events() -> Result<()> {
    let fixture = Fixture::new(&[("a.txt", "a\n")])?;
    let local = fixture.clone_as("local")?;
    let (controller, recorder) = controller();

    let (tx, rx) = unbounded();
    let path = local.clone();
    controller.async_open(
        move || Ok(Box::new(Git2Engine::open(&path, "origin")?) as Box<dyn VcsEngine>),
        move |workdir| tx.send(workdir).unwrap(),
        |err| panic!("open failed: {}", err),
    );

    write_file(&local, "a.txt", "edited\n")?;
    controller.async_stage(vec![PathBuf::from("a.txt")], |err| {
        panic!("stage failed: {}", err)
    });
    let (commit_tx, commit_rx) = unbounded();
    let handle = controller.async_commit(
        "Edit a".to_string(),
        move |id| commit_tx.send(id).unwrap(),
        |err| panic!("commit failed: {}", err),
    );
    assert_eq!(handle.wait(), Completion::Completed);

    let workdir = rx.recv()?;
    assert_eq!(
        workdir.canonicalize()?,
        local.canonicalize()?
    );
    assert_eq!(commit_rx.recv()?, head_id(&local)?.to_string());
    assert_eq!(
        recorder.events(),
        vec![
            "start:open-working-copy",
            "ok:open-working-copy",
            "start:stage",
            "ok:stage",
            "start:commit",
            "ok:commit",
        ]
    );
    assert_eq!(controller.pending_count(), 0);
    Ok(())
}

#[test]
fn test_engine_failure_closes_pending_events_before_error_callback() -> Result<()> {
    let fixture = Fixture::new(&[("a.txt", "a\n")])?;
    let local = fixture.clone_as("local")?;
    let (controller, recorder) = controller();
    controller.open_sync(Box::new(engine(&local)?))?;

    let (tx, rx) = unbounded();
    let observed = recorder.clone();
    let handle = controller.async_checkout("no-such-branch".to_string(), move |err| {
        tx.send((err.to_string(), observed.events())).unwrap();
    });
    assert_eq!(handle.wait(), Completion::Failed);

    let (message, events_at_callback) = rx.recv()?;
    assert!(message.contains("no-such-branch"));
    assert_eq!(
        events_at_callback[2..],
        ["start:checkout".to_string(), "failed:checkout".to_string()]
    );
    assert_eq!(controller.pending_count(), 0);
    Ok(())
}

#[test]
fn test_stash_pop_nests_drop_inside_apply() -> Result<()> {
    let fixture = Fixture::new(&[("a.txt", "a\n")])?;
    let local = fixture.clone_as("local")?;
    let (controller, recorder) = controller();
    controller.open_sync(Box::new(engine(&local)?))?;

    write_file(&local, "a.txt", "stashed\n")?;
    controller.async_stash_create(
        "wip".to_string(),
        false,
        |_| {},
        |err| panic!("stash failed: {}", err),
    );
    let (tx, rx) = unbounded();
    controller
        .async_stash_apply(
            0,
            true,
            move |outcome| tx.send(outcome).unwrap(),
            |err| panic!("pop failed: {}", err),
        )
        .wait();

    assert_eq!(rx.recv()?, StashApplyOutcome::AppliedSuccessfully);
    assert_eq!(
        recorder.events()[2..],
        [
            "start:stash-create",
            "ok:stash-create",
            "start:stash-apply",
            "start:stash-drop",
            "ok:stash-drop",
            "ok:stash-apply",
        ]
        .map(String::from)
    );
    Ok(())
}

#[test]
fn test_failed_open_keeps_current_working_copy() -> Result<()> {
    let fixture = Fixture::new(&[("a.txt", "a\n")])?;
    let local = fixture.clone_as("local")?;
    let (controller, _recorder) = controller();
    let opened = controller.open_sync(Box::new(engine(&local)?))?;

    let missing = local.join("does-not-exist");
    let (tx, rx) = unbounded();
    controller
        .async_open(
            move || Ok(Box::new(Git2Engine::open(&missing, "origin")?) as Box<dyn VcsEngine>),
            |_| panic!("opening a missing path succeeded"),
            move |err| tx.send(err.to_string()).unwrap(),
        )
        .wait();

    assert!(rx.recv()?.contains("Failed to open git repository"));
    assert_eq!(controller.workdir(), Some(opened));
    Ok(())
}
