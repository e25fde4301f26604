mod common;

use std::time::Duration;

use common::harness;
use recycle_pool::{CloseReason, PoolConfig, PoolError, ShutdownReport, Timeouts};

#[tokio::test]
async fn shutdown_closes_idle_connections_once_and_rejects_acquire() {
    let h = harness(PoolConfig::new(3)).await;
    let a = h.pool.acquire().await.unwrap();
    let b = h.pool.acquire().await.unwrap();
    h.pool.release(a).await.unwrap();
    h.pool.release(b).await.unwrap();

    let report = h.pool.shutdown().await;
    assert_eq!(
        report,
        ShutdownReport {
            closed_idle: 2,
            closed_returned: 0,
            abandoned: 0,
        }
    );
    assert_eq!(h.pool.manager().closed(), 2);
    assert!(h
        .recorder
        .closes()
        .iter()
        .all(|(_, reason)| *reason == CloseReason::Shutdown));

    assert!(matches!(
        h.pool.acquire().await.unwrap_err(),
        PoolError::PoolClosed
    ));
    assert!(h.pool.is_closed());

    assert_eq!(h.pool.shutdown().await, ShutdownReport::default());
    assert_eq!(h.pool.manager().closed(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_wakes_waiters_and_waits_for_checked_out_connections() {
    let h = harness(PoolConfig::new(1)).await;
    let held = h.pool.acquire().await.unwrap();
    let id = held.id();

    let waiter = tokio::spawn({
        let pool = h.pool.clone();
        async move { pool.acquire().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let shutdown = tokio::spawn({
        let pool = h.pool.clone();
        async move { pool.shutdown().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(matches!(
        waiter.await.unwrap().unwrap_err(),
        PoolError::PoolClosed
    ));
    assert!(!shutdown.is_finished());

    h.pool.release(held).await.unwrap();
    let report = shutdown.await.unwrap();

    assert_eq!(report.closed_returned, 1);
    assert_eq!(report.abandoned, 0);
    assert_eq!(h.recorder.closes(), vec![(id, CloseReason::Shutdown)]);
    assert_eq!(h.pool.status().size, 0);
}

#[tokio::test(start_paused = true)]
async fn connections_held_past_the_grace_period_are_abandoned() {
    let config = PoolConfig::new(2)
        .with_timeouts(Timeouts::default().with_shutdown_grace(Some(Duration::from_secs(1))));
    let h = harness(config).await;
    let held = h.pool.acquire().await.unwrap();

    let report = h.pool.shutdown().await;
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.closed_returned, 0);
    assert_eq!(h.pool.status().size, 0);
    assert_eq!(h.pool.manager().closed(), 0);

    // closed as soon as its holder gives it back
    h.pool.release(held).await.unwrap();
    assert_eq!(h.pool.manager().closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_connection_returned_during_shutdown_is_reported_as_broken() {
    let h = harness(PoolConfig::new(1)).await;
    let mut held = h.pool.acquire().await.unwrap();
    let id = held.id();
    held.mark_broken();

    let shutdown = tokio::spawn({
        let pool = h.pool.clone();
        async move { pool.shutdown().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.pool.release(held).await.unwrap();
    let report = shutdown.await.unwrap();

    assert_eq!(report.closed_returned, 1);
    assert_eq!(h.recorder.closes(), vec![(id, CloseReason::Broken)]);
    assert_eq!(h.pool.metrics().broken_on_release, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_connections_still_being_opened() {
    let h = harness(PoolConfig::new(1)).await;
    h.pool.manager().slow_connect(Duration::from_secs(1));

    let opening = tokio::spawn({
        let pool = h.pool.clone();
        async move { pool.acquire().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.pool.status().pending, 1);

    let report = h.pool.shutdown().await;
    assert_eq!(
        report,
        ShutdownReport {
            closed_idle: 0,
            closed_returned: 1,
            abandoned: 0,
        }
    );

    assert!(matches!(
        opening.await.unwrap().unwrap_err(),
        PoolError::PoolClosed
    ));
    assert_eq!(h.pool.manager().opened(), 1);
    assert_eq!(h.pool.manager().closed(), 1);
    assert_eq!(h.pool.status().size, 0);
}
