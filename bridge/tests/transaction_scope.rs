//! Integration tests for the reentrant transaction scope over the in-memory
//! connection source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use execution_bridge::domain::{Error, ErrorKind, in_transaction, with_connection};
use execution_bridge::runtime::{ExecutionBridge, Reactor, ReactorConfig};
use execution_bridge::test_support::{
    ConnectionEvent, MemoryConnection, MemoryConnectionSource, yield_single,
};
use futures_util::FutureExt;
use rstest::{fixture, rstest};

#[fixture]
fn source() -> MemoryConnectionSource {
    MemoryConnectionSource::new()
}

fn began(source: &MemoryConnectionSource) -> usize {
    source.count(|event| matches!(event, ConnectionEvent::Began(_)))
}

fn committed(source: &MemoryConnectionSource) -> usize {
    source.count(|event| matches!(event, ConnectionEvent::Committed(_)))
}

fn rolled_back(source: &MemoryConnectionSource) -> usize {
    source.count(|event| matches!(event, ConnectionEvent::RolledBack(_)))
}

#[rstest]
#[tokio::test]
async fn a_failing_second_write_leaves_no_effects(source: MemoryConnectionSource) {
    let outcome: Result<(), Error> = in_transaction(&source, || async {
        source.insert(1).await?;
        source.insert(2).await?;
        Err(Error::conflict("second write rejected"))
    })
    .await;

    assert_eq!(outcome.expect_err("block fails").kind(), ErrorKind::Conflict);
    assert!(source.values().await.expect("read back").is_empty());
    assert_eq!(
        source.events(),
        vec![
            ConnectionEvent::Acquired(1),
            ConnectionEvent::Began(1),
            ConnectionEvent::RolledBack(1),
            ConnectionEvent::Released(1),
            ConnectionEvent::Acquired(2),
            ConnectionEvent::Released(2),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn nested_scopes_share_one_physical_transaction(source: MemoryConnectionSource) {
    in_transaction(&source, || async {
        in_transaction(&source, || source.insert(1)).await?;
        in_transaction(&source, || async {
            in_transaction(&source, || source.insert(2)).await
        })
        .await
    })
    .await
    .expect("outer scope commits");

    assert_eq!(source.committed(), vec![1, 2]);
    assert_eq!(began(&source), 1);
    assert_eq!(committed(&source), 1);
    assert_eq!(rolled_back(&source), 0);
}

#[rstest]
#[tokio::test]
async fn an_inner_failure_rolls_back_the_outer_writes(source: MemoryConnectionSource) {
    let outcome: Result<(), Error> = in_transaction(&source, || async {
        source.insert(1).await?;
        in_transaction(&source, || async {
            source.insert(2).await?;
            Err(Error::unprocessable_entity("inner rejected"))
        })
        .await
    })
    .await;

    let err = outcome.expect_err("inner failure propagates");
    assert_eq!(err.kind(), ErrorKind::UnprocessableEntity);
    assert_eq!(err.message(), "inner rejected");
    assert!(source.committed().is_empty());
    assert_eq!(began(&source), 1);
    assert_eq!(rolled_back(&source), 1);
}

#[rstest]
#[tokio::test]
async fn reads_observe_earlier_writes_in_the_same_scope(source: MemoryConnectionSource) {
    let seen = in_transaction(&source, || async {
        source.insert(1).await?;
        let inside = source.values().await?;
        Ok::<_, Error>((inside, source.committed()))
    })
    .await
    .expect("scope commits");

    assert_eq!(seen, (vec![1], Vec::new()));
    assert_eq!(source.committed(), vec![1]);
}

#[rstest]
fn failures_after_the_block_keep_its_commit(source: MemoryConnectionSource) {
    let reactor = Reactor::new(&ReactorConfig::default().with_compute_threads(1))
        .expect("reactor starts");
    let scoped = source.clone();
    let outcome = yield_single(&reactor, async move {
        in_transaction(&scoped, || async {
            scoped.insert(1).await?;
            scoped.insert(2).await
        })
        .await?;
        Err::<(), _>(Error::forbidden("caller may not see the result"))
    });

    assert_eq!(outcome.expect_err("handler fails").kind(), ErrorKind::Forbidden);
    assert_eq!(source.committed(), vec![1, 2]);
    assert_eq!(rolled_back(&source), 0);
}

#[rstest]
#[tokio::test]
async fn a_failed_rollback_surfaces_the_original_failure() {
    let source = MemoryConnectionSource::new().failing_rollback();
    let outcome: Result<(), Error> = in_transaction(&source, || async {
        source.insert(1).await?;
        Err(Error::conflict("original failure"))
    })
    .await;

    let err = outcome.expect_err("block fails");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.message(), "original failure");
    assert!(source.committed().is_empty());
    assert_eq!(
        source.count(|event| matches!(event, ConnectionEvent::Released(_))),
        1
    );
}

#[rstest]
#[tokio::test]
async fn acquisition_failures_are_internal_errors() {
    let source = MemoryConnectionSource::new().failing_acquire();
    let ran = AtomicBool::new(false);
    let outcome: Result<(), Error> = in_transaction(&source, || async {
        ran.store(true, Ordering::SeqCst);
        Ok(())
    })
    .await;

    let err = outcome.expect_err("acquire fails");
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.message().contains("acquire"));
    assert!(!ran.load(Ordering::SeqCst));
}

#[rstest]
#[tokio::test]
async fn writes_outside_a_scope_autocommit(source: MemoryConnectionSource) {
    source.insert(5).await.expect("autocommit write");

    assert_eq!(source.committed(), vec![5]);
    assert_eq!(began(&source), 0);
    assert_eq!(
        source.events(),
        vec![ConnectionEvent::Acquired(1), ConnectionEvent::Released(1)]
    );
}

#[rstest]
fn forked_units_do_not_share_the_open_transaction(source: MemoryConnectionSource) {
    let reactor = Reactor::new(&ReactorConfig::default().with_compute_threads(2))
        .expect("reactor starts");
    let scoped = source.clone();
    let outcome = yield_single(&reactor, async move {
        in_transaction(&scoped, || async {
            scoped.insert(1).await?;
            let background = scoped.clone();
            ExecutionBridge::current()
                .expect("running on a bridge")
                .fork(async move { background.insert(2).await })
                .await?;
            Err::<(), _>(Error::conflict("request rejected"))
        })
        .await
    });

    assert_eq!(outcome.expect_err("request fails").kind(), ErrorKind::Conflict);
    assert_eq!(source.committed(), vec![2]);
    assert_eq!(began(&source), 1);
    assert_eq!(rolled_back(&source), 1);
}

fn released(source: &MemoryConnectionSource) -> usize {
    source.count(|event| matches!(event, ConnectionEvent::Released(_)))
}

#[rstest]
#[tokio::test]
async fn scopes_on_different_sources_are_independent() {
    let orders = MemoryConnectionSource::new();
    let audit = MemoryConnectionSource::new();

    in_transaction(&orders, || async {
        orders.insert(1).await?;
        in_transaction(&audit, || async {
            audit.insert(2).await?;
            orders.insert(3).await
        })
        .await
    })
    .await
    .expect("both scopes commit");

    assert_eq!(orders.committed(), vec![1, 3]);
    assert_eq!(audit.committed(), vec![2]);
    assert_eq!(
        audit.events(),
        vec![
            ConnectionEvent::Acquired(1),
            ConnectionEvent::Began(1),
            ConnectionEvent::Committed(1),
            ConnectionEvent::Released(1),
        ]
    );
    assert_eq!(
        orders.count(|event| matches!(event, ConnectionEvent::Acquired(_))),
        1
    );
}

#[rstest]
#[tokio::test]
async fn an_outer_failure_only_rolls_back_its_own_source() {
    let orders = MemoryConnectionSource::new();
    let audit = MemoryConnectionSource::new();

    let outcome: Result<(), Error> = in_transaction(&orders, || async {
        orders.insert(1).await?;
        in_transaction(&audit, || audit.insert(2)).await?;
        Err(Error::conflict("order rejected"))
    })
    .await;

    assert_eq!(outcome.expect_err("outer fails").kind(), ErrorKind::Conflict);
    assert!(orders.committed().is_empty());
    assert_eq!(rolled_back(&orders), 1);
    assert_eq!(audit.committed(), vec![2]);
    assert_eq!(rolled_back(&audit), 0);
}

#[rstest]
#[tokio::test]
async fn reusing_a_lent_connection_fails_instead_of_waiting(source: MemoryConnectionSource) {
    let scope = in_transaction(&source, || async {
        with_connection(&source, |conn: &mut MemoryConnection| {
            let nested = source.clone();
            async move {
                conn.insert(1);
                nested.values().await
            }
            .boxed()
        })
        .await
    });
    let outcome: Result<Vec<i64>, Error> = tokio::time::timeout(Duration::from_secs(5), scope)
        .await
        .expect("nested use returns promptly");

    let err = outcome.expect_err("connection is lent out");
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.message().contains("already in use"));
    assert!(source.committed().is_empty());
    assert_eq!(rolled_back(&source), 1);
}

#[rstest]
#[tokio::test]
async fn concurrent_writes_in_one_scope_take_turns(source: MemoryConnectionSource) {
    in_transaction(&source, || async {
        let (first, second) = tokio::join!(source.insert(1), source.insert(2));
        first.and(second)
    })
    .await
    .expect("both writes land");

    let mut committed = source.committed();
    committed.sort_unstable();
    assert_eq!(committed, vec![1, 2]);
    assert_eq!(began(&source), 1);
}

#[rstest]
#[tokio::test]
async fn cancelling_during_commit_still_rolls_back() {
    let source = MemoryConnectionSource::new().with_commit_delay(Duration::from_secs(30));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        in_transaction(&source, || source.insert(1)),
    )
    .await;
    assert!(cancelled.is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while released(&source) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("abandoned transaction is released");

    assert!(source.committed().is_empty());
    assert_eq!(committed(&source), 0);
    assert_eq!(rolled_back(&source), 1);
    assert_eq!(released(&source), 1);
}
