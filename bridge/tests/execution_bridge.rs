//! Integration tests for lane dispatch, context continuity and background
//! work on a live reactor.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use execution_bridge::domain::{
    AmbientContext, Error, ErrorKind, ExecutionUnit, TraceContext, UnitOrigin, in_transaction,
};
use execution_bridge::runtime::{self, ExecutionBridge, Lane, Reactor, ReactorConfig, WorkQueue};
use execution_bridge::telemetry::add_to_log_context;
use execution_bridge::test_support::{ConnectionEvent, MemoryConnectionSource, yield_single};
use rstest::{fixture, rstest};

const WAIT: Duration = Duration::from_secs(5);

#[fixture]
fn reactor() -> Reactor {
    let config = ReactorConfig::default()
        .with_compute_threads(2)
        .with_blocking_threads(2);
    Reactor::new(&config).expect("reactor starts")
}

fn thread_name() -> String {
    thread::current().name().unwrap_or_default().to_owned()
}

fn explode() -> Result<(), Error> {
    panic!("handler exploded")
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[rstest]
fn steps_after_blocking_dispatch_resume_on_the_compute_lane(reactor: Reactor) {
    let (before, inside, after) = yield_single(&reactor, async {
        let before = (thread_name(), Lane::current());
        let inside = runtime::blocking(|| Ok((thread_name(), Lane::current()))).await?;
        let after = (thread_name(), Lane::current());
        Ok::<_, Error>((before, inside, after))
    })
    .expect("computation succeeds");

    assert!(before.0.starts_with("bridge-compute-"), "{}", before.0);
    assert_eq!(before.1, Some(Lane::Compute));
    assert!(inside.0.starts_with("bridge-blocking-"), "{}", inside.0);
    assert_eq!(inside.1, Some(Lane::Blocking));
    assert!(after.0.starts_with("bridge-compute-"), "{}", after.0);
    assert_eq!(after.1, Some(Lane::Compute));
}

#[rstest]
fn context_is_identical_across_a_blocking_round_trip(reactor: Reactor) {
    let source = MemoryConnectionSource::new();
    let continuous = yield_single(&reactor, async move {
        let logged = add_to_log_context("tenant", "acme");
        AmbientContext::scope(logged, async {
            in_transaction(&source, || async {
                let before = AmbientContext::capture();
                let unit_before = ExecutionUnit::current();
                let (inside, unit_inside) = runtime::blocking(|| {
                    Ok((AmbientContext::capture(), ExecutionUnit::current()))
                })
                .await?;
                let after = AmbientContext::capture();
                Ok::<_, Error>(
                    before.ptr_eq(&inside)
                        && before.ptr_eq(&after)
                        && before.transaction().is_some()
                        && unit_before == unit_inside
                        && unit_before == ExecutionUnit::current(),
                )
            })
            .await
        })
        .await
    })
    .expect("computation succeeds");

    assert!(continuous);
}

#[rstest]
fn each_run_gets_a_fresh_request_unit(reactor: Reactor) {
    let bridge = reactor.bridge();
    let first = reactor
        .block_on(bridge.run(AmbientContext::empty(), async {
            Ok(ExecutionUnit::current())
        }))
        .expect("first run")
        .expect("unit active");
    let second = reactor
        .block_on(bridge.run(AmbientContext::empty(), async {
            Ok(ExecutionUnit::current())
        }))
        .expect("second run")
        .expect("unit active");

    assert_eq!(first.origin(), UnitOrigin::Request);
    assert_ne!(first.id(), second.id());
}

#[rstest]
fn failures_and_panics_are_delivered_through_the_deferred(reactor: Reactor) {
    let failed = yield_single::<(), _>(&reactor, async { Err(Error::not_found("no booking")) })
        .expect_err("failure resolves the deferred");
    assert_eq!(failed.kind(), ErrorKind::NotFound);

    let panicked = yield_single(&reactor, async { explode() })
        .expect_err("panic resolves the deferred");
    assert_eq!(panicked.kind(), ErrorKind::Internal);
    assert!(panicked.message().contains("handler exploded"));

    let blocking_panic = yield_single::<(), _>(&reactor, async {
        runtime::blocking(|| -> Result<(), Error> { panic!("blocking exploded") }).await
    })
    .expect_err("blocking panic resolves the deferred");
    assert!(blocking_panic.message().contains("blocking exploded"));
}

#[rstest]
fn forked_units_inherit_the_trace_but_not_the_transaction(reactor: Reactor) {
    let source = MemoryConnectionSource::new();
    let (parent, parent_unit, child, child_unit) = yield_single(&reactor, async move {
        in_transaction(&source, || async {
            let bridge = ExecutionBridge::current().expect("running on a bridge");
            let parent = AmbientContext::capture();
            let parent_unit = ExecutionUnit::current().expect("request unit");
            let (child, child_unit) = bridge
                .fork(async { Ok((AmbientContext::capture(), ExecutionUnit::current())) })
                .await?;
            Ok::<_, Error>((parent, parent_unit, child, child_unit))
        })
        .await
    })
    .expect("computation succeeds");

    let child_unit = child_unit.expect("background unit");
    assert_eq!(child_unit.origin(), UnitOrigin::Background);
    assert_ne!(child_unit.id(), parent_unit.id());
    assert_eq!(child.trace(), parent.trace());
    assert!(parent.transaction().is_some());
    assert!(child.transaction().is_none());
}

#[rstest]
fn queued_jobs_run_under_the_submitting_context(reactor: Reactor) {
    let (sender, receiver) = mpsc::channel();
    let source = MemoryConnectionSource::new();
    let expected = yield_single(&reactor, async move {
        let queue = WorkQueue::start(&ExecutionBridge::current().expect("bridge"), 2);
        let ctx = add_to_log_context("job", "reindex");
        AmbientContext::scope(ctx, async {
            in_transaction(&source, || async {
                queue.submit(async move {
                    let observed = (AmbientContext::capture(), ExecutionUnit::current());
                    sender.send(observed).ok();
                    Ok(())
                })?;
                Ok::<_, Error>(AmbientContext::capture())
            })
            .await
        })
        .await
    })
    .expect("submission succeeds");

    let (observed, unit) = receiver.recv_timeout(WAIT).expect("job runs");
    assert_eq!(unit.map(|u| u.origin()), Some(UnitOrigin::Queued));
    assert_eq!(observed.trace(), expected.trace());
    assert_eq!(observed.fields().get("job"), Some("reindex"));
    assert!(expected.transaction().is_some());
    assert!(observed.transaction().is_none());
}

#[rstest]
fn a_full_queue_refuses_further_jobs(reactor: Reactor) {
    let queue = WorkQueue::with_capacity(&reactor.bridge(), 1, 1);

    // One job runs, one waits in the dispatcher and one fills the backlog.
    let refused = (0..4)
        .map(|_| queue.submit(std::future::pending::<Result<(), Error>>()))
        .find_map(Result::err)
        .expect("backlog fills up");

    assert_eq!(refused.kind(), ErrorKind::TooManyRequests);
    assert_eq!(refused.message(), "work queue is full");
}

#[rstest]
fn cancelling_a_unit_rolls_back_its_open_transaction(reactor: Reactor) {
    let source = MemoryConnectionSource::new();
    let (entered, entered_rx) = mpsc::channel();
    let (resumed, resumed_rx) = mpsc::channel::<()>();

    let deferred = reactor.bridge().run(AmbientContext::new(TraceContext::root()), {
        let source = source.clone();
        async move {
            in_transaction(&source, || async {
                source.insert(1).await?;
                entered.send(()).ok();
                std::future::pending::<()>().await;
                resumed.send(()).ok();
                Ok::<_, Error>(())
            })
            .await
        }
    });

    entered_rx.recv_timeout(WAIT).expect("transaction opened");
    deferred.cancel();
    let outcome = reactor.block_on(deferred);

    assert_eq!(
        outcome.expect_err("cancelled unit fails").kind(),
        ErrorKind::Internal
    );
    assert!(wait_until(|| {
        source.count(|event| matches!(event, ConnectionEvent::Released(_))) == 1
    }));
    assert_eq!(
        source.count(|event| matches!(event, ConnectionEvent::RolledBack(_))),
        1
    );
    assert!(source.committed().is_empty());
    assert!(resumed_rx.try_recv().is_err());
}
