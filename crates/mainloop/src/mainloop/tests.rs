use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{MainloopError, Resource, TaskError, TaskResult};
use crate::handle::{LoopState, MainloopHandle};
use crate::mainloop::Mainloop;
use crate::task::{TaskId, TaskSelector};
use crate::timing::{Clock, ManualClock, Millis};
use crate::MainloopConfig;

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Test context: appends its label to a shared log when run.
struct Recorder {
    label: &'static str,
    log: Log,
}

fn record(p: &Recorder) -> TaskResult {
    p.log.lock().unwrap().push(p.label);
    Ok(())
}

fn other_record(p: &Recorder) -> TaskResult {
    if p.label.is_empty() {
        return Err(TaskError::failed("unlabelled recorder"));
    }
    record(p)
}

fn fail(p: &Recorder) -> TaskResult {
    record(p)?;
    Err(TaskError::failed("sensor offline"))
}

fn explode(p: &Recorder) -> TaskResult {
    record(p)?;
    panic!("callback blew up");
}

struct Harness {
    ml: Mainloop,
    handle: MainloopHandle,
    clock: Arc<ManualClock>,
    log: Log,
}

impl Harness {
    fn new(max_tasks: usize, idle_interval_ms: u32) -> Self {
        Self::with_config(MainloopConfig::new("test", max_tasks, idle_interval_ms))
    }

    fn with_config(config: MainloopConfig) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let ml = Mainloop::with_clock(config, clock.clone()).unwrap();
        let handle = ml.handle();
        Self {
            ml,
            handle,
            clock,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn recorder(&self, label: &'static str) -> Arc<Recorder> {
        Arc::new(Recorder {
            label,
            log: Arc::clone(&self.log),
        })
    }

    /// Set the clock and run everything runnable at that instant.
    fn at(&mut self, t: Millis) -> Vec<&'static str> {
        self.clock.set(t);
        let before = self.log.lock().unwrap().len();
        while self.ml.run_once().unwrap().is_some() {}
        self.log.lock().unwrap()[before..].to_vec()
    }
}

#[test]
fn scenario_one_shot_and_periodic_trace() {
    let mut h = Harness::new(4, 100);
    h.handle
        .add_one_shot_task("A", record, h.recorder("A"), 1, 10)
        .unwrap();
    h.handle
        .add_periodic_task("B", record, h.recorder("B"), 2, 20, 0)
        .unwrap();
    h.handle.start().unwrap();

    assert_eq!(h.at(0), vec!["B"]);
    assert_eq!(h.at(5), Vec::<&str>::new());
    assert_eq!(h.at(10), vec!["A"]);
    assert_eq!(h.at(20), vec!["B"]);
    assert_eq!(h.at(40), vec!["B"]);

    h.handle.stop().unwrap();
    assert_eq!(h.at(60), Vec::<&str>::new());
    assert_eq!(h.ml.state(), LoopState::Stopped);
}

#[test]
fn simultaneously_due_tasks_run_in_priority_order() {
    let mut h = Harness::new(8, 100);
    h.handle.add_one_shot_task("low", record, h.recorder("low"), 7, 0).unwrap();
    h.handle.add_one_shot_task("high", record, h.recorder("high"), 0, 0).unwrap();
    h.handle.add_one_shot_task("mid", record, h.recorder("mid"), 3, 0).unwrap();
    h.handle.start().unwrap();

    assert_eq!(h.at(0), vec!["high", "mid", "low"]);
    assert!(h.ml.table().is_empty());
    assert_eq!(h.handle.task_count(), 0);
}

#[test]
fn equal_priority_is_fifo_over_cycles() {
    let mut h = Harness::new(8, 1000);
    h.handle.add_periodic_task("first", record, h.recorder("first"), 4, 10, 0).unwrap();
    h.handle.add_periodic_task("second", record, h.recorder("second"), 4, 10, 0).unwrap();
    h.handle.start().unwrap();

    for cycle in 0..5 {
        assert_eq!(h.at(cycle * 10), vec!["first", "second"], "cycle {cycle}");
    }
}

#[test]
fn periodic_initial_delay_then_period() {
    let mut h = Harness::new(4, 1000);
    h.handle.add_periodic_task("p", record, h.recorder("p"), 1, 20, 5).unwrap();
    h.handle.start().unwrap();

    assert!(h.at(0).is_empty());
    assert!(h.at(4).is_empty());
    assert_eq!(h.at(5), vec!["p"]);
    assert!(h.at(24).is_empty());
    assert_eq!(h.at(25), vec!["p"]);
}

#[test]
fn late_periodic_fires_once_then_rebases() {
    let mut h = Harness::new(4, 1000);
    h.handle.add_periodic_task("p", record, h.recorder("p"), 1, 20, 0).unwrap();
    h.handle.start().unwrap();
    assert_eq!(h.at(0), vec!["p"]);

    // blocked for several periods: exactly one catch-up firing
    assert_eq!(h.at(95), vec!["p"]);
    assert!(h.at(114).is_empty());
    assert_eq!(h.at(115), vec!["p"]);
}

#[test]
fn add_beyond_capacity_fails_synchronously() {
    let mut h = Harness::new(2, 100);
    h.handle.add_periodic_task("a", record, h.recorder("a"), 1, 10, 0).unwrap();
    h.handle.add_idle_task("b", record, 1, h.recorder("b")).unwrap();

    let err = h
        .handle
        .add_one_shot_task("c", record, h.recorder("c"), 0, 0)
        .unwrap_err();
    assert!(matches!(
        err,
        MainloopError::CapacityExceeded { resource: Resource::TaskTable, capacity: 2 }
    ));

    h.handle.start().unwrap();
    h.at(0);
    let names: Vec<&str> = h.ml.table().iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn full_queue_rejects_and_frees_slot() {
    let mut config = MainloopConfig::new("test", 8, 100);
    config.queue_capacity = 1;
    let h = Harness::with_config(config);

    h.handle.add_one_shot_task("a", record, h.recorder("a"), 1, 0).unwrap();
    let err = h
        .handle
        .add_one_shot_task("b", record, h.recorder("b"), 1, 0)
        .unwrap_err();
    assert!(matches!(
        err,
        MainloopError::CapacityExceeded { resource: Resource::MutationQueue, .. }
    ));
    assert_eq!(h.handle.task_count(), 1);
}

#[test]
fn zero_period_is_rejected() {
    let h = Harness::new(4, 100);
    let err = h
        .handle
        .add_periodic_task("spin", record, h.recorder("spin"), 1, 0, 0)
        .unwrap_err();
    assert!(matches!(err, MainloopError::InvalidArgument(_)));
    assert_eq!(h.handle.task_count(), 0);
}

#[test]
fn removed_before_due_never_runs() {
    let mut h = Harness::new(8, 1000);
    let id = h.handle.add_one_shot_task("late", record, h.recorder("late"), 1, 50).unwrap();
    h.handle.start().unwrap();
    assert!(h.at(10).is_empty());

    h.handle.remove_task(id).unwrap();
    assert!(h.at(100).is_empty());
    assert_eq!(h.handle.task_count(), 0);
    assert_eq!(h.ml.stats().removals, 1);
}

#[test]
fn remove_and_due_in_same_safepoint_never_runs() {
    let mut h = Harness::new(8, 1000);
    h.handle.add_periodic_task("p", record, h.recorder("p"), 1, 10, 0).unwrap();
    h.handle.start().unwrap();
    assert_eq!(h.at(0), vec!["p"]);

    // due again at 10, but the removal lands at the same safepoint
    h.handle.remove_periodic_task("p").unwrap();
    assert!(h.at(10).is_empty());
}

#[test]
fn remove_by_callback_and_context() {
    let mut h = Harness::new(8, 1000);
    let ctx = h.recorder("ctx");
    h.handle.add_periodic_task("a", record, h.recorder("a"), 1, 10, 0).unwrap();
    h.handle.add_periodic_task("b", other_record, h.recorder("b"), 1, 10, 0).unwrap();
    h.handle.add_periodic_task("c", record, Arc::clone(&ctx), 1, 10, 0).unwrap();

    h.handle.remove_periodic_task(TaskSelector::callback(other_record)).unwrap();
    h.handle.remove_periodic_task(TaskSelector::context(&ctx)).unwrap();
    h.handle.start().unwrap();

    assert_eq!(h.at(0), vec!["a"]);
}

#[test]
fn remove_wrong_kind_or_unknown_is_silent() {
    let mut h = Harness::new(8, 1000);
    h.handle.add_periodic_task("p", record, h.recorder("p"), 1, 10, 0).unwrap();
    h.handle.remove_idle_task("p").unwrap();
    h.handle.remove_one_shot_task("nobody").unwrap();
    h.handle.start().unwrap();

    assert_eq!(h.at(0), vec!["p"]);
    assert_eq!(h.ml.stats().unmatched_removals, 2);
}

struct SelfRemover {
    handle: MainloopHandle,
    runs: AtomicUsize,
}

fn remove_self(ctx: &SelfRemover) -> TaskResult {
    ctx.handle.remove_periodic_task("quitter")?;
    ctx.runs.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[test]
fn removal_from_own_callback_completes_current_run() {
    let mut h = Harness::new(4, 1000);
    let ctx = Arc::new(SelfRemover {
        handle: h.handle.clone(),
        runs: AtomicUsize::new(0),
    });
    h.handle.add_periodic_task("quitter", remove_self, Arc::clone(&ctx), 1, 10, 0).unwrap();
    h.handle.start().unwrap();

    h.at(0);
    h.at(10);
    h.at(20);
    assert_eq!(ctx.runs.load(Ordering::SeqCst), 1);
    assert!(h.ml.table().is_empty());
}

#[test]
fn idle_waits_for_quiet_period() {
    let mut h = Harness::new(4, 100);
    let busy = h.handle.add_periodic_task("busy", record, h.recorder("busy"), 1, 50, 0).unwrap();
    h.handle.add_idle_task("idle", record, 9, h.recorder("idle")).unwrap();
    h.handle.start().unwrap();

    // periodic activity every 50ms keeps the idle task from ever firing
    for t in (0..=200).step_by(50) {
        assert_eq!(h.at(t), vec!["busy"], "t={t}");
    }

    h.handle.remove_task(busy).unwrap();
    assert!(h.at(299).is_empty());
    assert_eq!(h.at(300), vec!["idle"]);
    // never back to back faster than the interval
    assert!(h.at(399).is_empty());
    assert_eq!(h.at(400), vec!["idle"]);
}

#[test]
fn execute_task_jumps_the_queue_once() {
    let mut h = Harness::new(8, 1000);
    h.handle.add_one_shot_task("timed", record, h.recorder("timed"), 0, 0).unwrap();
    h.handle.execute_task("now", record, 200, h.recorder("now")).unwrap();
    h.handle.start().unwrap();

    assert_eq!(h.at(0), vec!["now", "timed"]);
    assert!(h.at(100).is_empty());
}

#[test]
fn callback_faults_do_not_stop_the_loop() {
    let mut h = Harness::new(4, 1000);
    h.handle.add_periodic_task("fail", fail, h.recorder("fail"), 1, 10, 0).unwrap();
    h.handle.add_periodic_task("panic", explode, h.recorder("panic"), 2, 10, 0).unwrap();
    h.handle.start().unwrap();

    assert_eq!(h.at(0), vec!["fail", "panic"]);
    assert_eq!(h.at(10), vec!["fail", "panic"]);
    assert_eq!(h.ml.stats().faults, 4);
    assert_eq!(h.ml.table().len(), 2);
}

#[test]
fn created_loop_does_not_execute() {
    let mut h = Harness::new(4, 100);
    h.handle.add_one_shot_task("a", record, h.recorder("a"), 1, 0).unwrap();

    assert!(h.at(10).is_empty());
    // registrations are still applied while created
    assert_eq!(h.ml.table().len(), 1);

    h.handle.start().unwrap();
    assert_eq!(h.at(10), vec!["a"]);
}

#[test]
fn start_and_stop_are_idempotent() {
    let h = Harness::new(4, 100);
    h.handle.start().unwrap();
    h.handle.start().unwrap();
    assert_eq!(h.handle.state(), LoopState::Running);

    h.handle.stop().unwrap();
    h.handle.stop().unwrap();
    h.handle.start().unwrap();
    assert_eq!(h.handle.state(), LoopState::Stopped);
}

#[test]
fn run_returns_after_stop_and_cannot_rerun() {
    let mut h = Harness::new(4, 100);
    h.handle.add_periodic_task("p", record, h.recorder("p"), 1, 10, 0).unwrap();
    h.handle.stop().unwrap();

    h.ml.run(true).unwrap();
    assert!(h.log.lock().unwrap().is_empty());
    // pending registrations were applied on the way out
    assert_eq!(h.ml.table().len(), 1);

    assert!(matches!(h.ml.run(true), Err(MainloopError::InvalidState(_))));
    assert!(matches!(h.ml.run_once(), Err(MainloopError::InvalidState(_))));
}

#[test]
fn unregister_bridge_on_full_queue_keeps_registration() {
    let mut config = MainloopConfig::new("test", 8, 1000);
    config.queue_capacity = 2;
    let mut h = Harness::with_config(config);
    h.handle.start().unwrap();
    let link = h.handle.register_bridge("wifi", 2).unwrap();
    h.at(0);

    h.handle.add_one_shot_task("x", record, h.recorder("x"), 1, 0).unwrap();
    h.handle.add_one_shot_task("y", record, h.recorder("y"), 1, 0).unwrap();
    let err = h.handle.unregister_bridge(&link).unwrap_err();
    assert!(matches!(
        err,
        MainloopError::CapacityExceeded { resource: Resource::MutationQueue, .. }
    ));
    assert!(link.is_open());

    assert_eq!(h.at(1), vec!["x", "y"]);
    assert_eq!(h.ml.table().len(), 1);
    assert_eq!(h.handle.task_count(), 1);

    h.handle.unregister_bridge(&link).unwrap();
    assert!(!link.is_open());
    h.at(2);
    assert!(h.ml.table().is_empty());
    assert_eq!(h.handle.task_count(), 0);
}

#[test]
fn exit_when_idle_returns_once_table_drains() {
    let mut config = MainloopConfig::new("test", 4, 100);
    config.exit_when_idle = true;
    let mut h = Harness::with_config(config);
    h.handle.add_one_shot_task("only", record, h.recorder("only"), 1, 0).unwrap();

    h.ml.run(true).unwrap();
    assert_eq!(*h.log.lock().unwrap(), vec!["only"]);
    assert_eq!(h.ml.state(), LoopState::Stopped);
}

#[test]
fn bridged_dispatch_dropped_after_unregister() {
    let mut h = Harness::new(8, 1000);
    h.handle.start().unwrap();
    let link = h.handle.register_bridge("wifi", 2).unwrap();
    h.at(0);

    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = Arc::clone(&hits);
    h.handle
        .dispatch_bridged(&link, "wifi", 2, move || {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    h.handle.unregister_bridge(&link).unwrap();
    assert!(h.handle.dispatch_bridged(&link, "wifi", 2, || Ok(())).is_err());

    h.at(1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(h.ml.stats().dropped_dispatches, 1);
    assert!(h.ml.table().is_empty());
    assert_eq!(h.handle.task_count(), 0);
}

#[test]
fn bridged_dispatch_runs_once_while_registered() {
    let mut h = Harness::new(8, 1000);
    h.handle.start().unwrap();
    let link = h.handle.register_bridge("wifi", 2).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let hits = Arc::clone(&hits);
        h.handle
            .dispatch_bridged(&link, "wifi", 2, move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }
    h.at(0);
    h.at(50);

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // only the anchor remains
    assert_eq!(h.ml.table().len(), 1);
    assert_eq!(h.ml.table().iter().next().map(|t| t.id()), Some(link.id()));
}

#[test]
fn dropped_mainloop_rejects_submissions() {
    let h = Harness::new(4, 100);
    let handle = h.handle.clone();
    let late = h.recorder("late");
    drop(h);

    assert_eq!(handle.state(), LoopState::Stopped);
    let err = handle.add_one_shot_task("late", record, late, 1, 0).unwrap_err();
    assert!(matches!(err, MainloopError::InvalidState(_)));
    assert_eq!(handle.task_count(), 0);
}

#[test]
fn task_ids_follow_submission_order() {
    let h = Harness::new(4, 100);
    let a = h.handle.add_idle_task("a", record, 1, h.recorder("a")).unwrap();
    let b = h.handle.add_idle_task("b", record, 1, h.recorder("b")).unwrap();
    assert!(a < b);
    assert_ne!(a, TaskId::new(0));
    assert_eq!(h.clock.now_ms(), 0);
}
