use super::*;
use crate::{
    Error, WorkerResult,
    mock::{MockRequest, MockResponse, MockStats, MockTransport, ProtocolError, Reply},
};
use core::time::Duration;
use futures::future::join_all;
use portable_atomic::Ordering;
use std::{io, sync::Arc};
use tokio::{task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;

type MockPool = WorkerPool<MockTransport>;
type Outcome = crate::Result<WorkerResult<MockResponse>>;

const LIMIT: Duration = Duration::from_secs(5);

fn started_pool(workers: usize) -> (Arc<MockPool>, Arc<MockStats>) {
    let transport = MockTransport::new();
    let stats = Arc::clone(&transport.stats);
    let pool = WorkerPool::new(transport, workers).unwrap();
    pool.start_workers().unwrap();
    (Arc::new(pool), stats)
}

fn spawn_execute(pool: &Arc<MockPool>, request: MockRequest) -> tokio::task::JoinHandle<Outcome> {
    let pool = Arc::clone(pool);
    tokio::spawn(async move { pool.execute(request).await })
}

fn io_kind(outcome: &Outcome) -> Option<io::ErrorKind> {
    outcome
        .as_ref()
        .ok()
        .and_then(WorkerResult::error)
        .map(io::Error::kind)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_runs_more_than_n_calls_at_once() {
    let (pool, stats) = started_pool(3);

    let results = join_all((0..30).map(|i| pool.execute(MockRequest::respond_after(i, 10)))).await;

    assert!(results.iter().all(|r| matches!(r, Ok(r) if r.is_success())));
    assert!(stats.max_inflight() <= 3);
    assert!(stats.max_inflight() >= 1);
    drop(results);
    assert_eq!(stats.open_responses(), 0);
    assert_eq!(stats.opened(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_waiters_never_leak_responses() {
    let (pool, stats) = started_pool(4);

    let mut waiters = JoinSet::new();
    for i in 0..10_000 {
        let reply = if i % 3 == 0 {
            Reply::RespondIgnoringCancel(Duration::from_millis(2))
        } else {
            Reply::Respond(Duration::from_millis(1))
        };
        let pool = Arc::clone(&pool);
        waiters.spawn(async move { pool.execute(MockRequest::new(i, reply)).await });
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    waiters.shutdown().await;
    pool.close(true);

    timeout(LIMIT, pool.terminated()).await.unwrap();
    stats.wait_quiescent().await;

    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(stats.open_responses(), 0, "every opened response must be closed");
    assert!(stats.max_inflight() <= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_task_does_not_disturb_the_next() {
    let (pool, stats) = started_pool(1);

    let first = spawn_execute(&pool, MockRequest::respond_after(0, 5));
    let second = spawn_execute(
        &pool,
        MockRequest::new(1, Reply::Fail(Duration::from_millis(5), io::ErrorKind::ConnectionReset)),
    );
    let third = spawn_execute(&pool, MockRequest::respond_after(2, 5));

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    let third = third.await.unwrap();

    assert_eq!(first.unwrap().response().map(|r| r.id), Some(0));
    assert_eq!(io_kind(&second), Some(io::ErrorKind::ConnectionReset));
    assert_eq!(third.unwrap().response().map(|r| r.id), Some(2));
    assert_eq!(stats.open_responses(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abrupt_close_cancels_every_waiter() {
    let (pool, stats) = started_pool(2);

    let handles: Vec<_> = (0..10)
        .map(|i| pool.submit(MockRequest::new(i, Reply::Hang), -1).unwrap())
        .collect();
    stats.wait_started(2).await;

    pool.close(true);

    for handle in handles {
        let outcome = timeout(LIMIT, handle).await.unwrap();
        assert_eq!(outcome.unwrap_err(), Error::Cancelled);
    }
    timeout(LIMIT, pool.terminated()).await.unwrap();

    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(stats.started(), 2, "queued tasks must not reach the transport");
    assert_eq!(stats.cancels.load(Ordering::Acquire), 2);
    assert_eq!(pool.queued(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_close_runs_queued_tasks() {
    let (pool, stats) = started_pool(1);

    let handles: Vec<_> = (0..5)
        .map(|i| pool.submit(MockRequest::respond_after(i, 5), -1).unwrap())
        .collect();
    pool.close(false);
    assert_eq!(pool.state(), PoolState::Closing);

    for (i, handle) in handles.into_iter().enumerate() {
        let result = timeout(LIMIT, handle).await.unwrap().unwrap();
        assert_eq!(result.response().map(|r| r.id), Some(i));
    }
    timeout(LIMIT, pool.terminated()).await.unwrap();

    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(stats.open_responses(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_is_idempotent_and_can_escalate() {
    let (pool, stats) = started_pool(1);

    let waiter = spawn_execute(&pool, MockRequest::new(0, Reply::Hang));
    stats.wait_started(1).await;

    pool.close(false);
    pool.close(false);
    assert_eq!(pool.state(), PoolState::Closing);

    pool.close(true);
    pool.close(true);

    let outcome = timeout(LIMIT, waiter).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap_err(), Error::Cancelled);
    timeout(LIMIT, pool.terminated()).await.unwrap();
    assert_eq!(pool.state(), PoolState::Closed);
}

#[tokio::test]
async fn closed_pool_rejects_work() {
    let (pool, stats) = started_pool(1);
    pool.close(false);

    let outcome = pool.execute(MockRequest::respond_after(0, 0)).await;
    assert_eq!(outcome.unwrap_err(), Error::PoolClosed);
    assert!(matches!(
        pool.submit(MockRequest::respond_after(1, 0), -1),
        Err(Error::PoolClosed)
    ));
    assert_eq!(stats.calls_created.load(Ordering::Acquire), 0);
}

#[tokio::test]
async fn start_workers_is_single_use() {
    let pool = WorkerPool::new(MockTransport::new(), 2).unwrap();
    pool.start_workers().unwrap();
    assert_eq!(pool.start_workers(), Err(Error::AlreadyStarted));

    let closed = WorkerPool::new(MockTransport::new(), 2).unwrap();
    closed.close(false);
    assert_eq!(closed.start_workers(), Err(Error::PoolClosed));
    assert_eq!(closed.state(), PoolState::Closed);
}

#[test]
fn invalid_configuration_is_rejected() {
    assert!(matches!(
        WorkerPool::new(MockTransport::new(), 0),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        WorkerPool::with_config(MockTransport::new(), PoolConfig::new(1).with_queue_capacity(0)),
        Err(Error::InvalidConfig { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_starts_tasks_in_submission_order() {
    let transport = MockTransport::new();
    let stats = Arc::clone(&transport.stats);
    let pool = WorkerPool::new(transport, 1).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| pool.submit(MockRequest::respond_after(i, 1), -1).unwrap())
        .collect();
    assert_eq!(pool.queued(), 10);
    pool.start_workers().unwrap();

    for handle in handles {
        assert!(timeout(LIMIT, handle).await.unwrap().unwrap().is_success());
    }
    assert_eq!(*stats.start_order.lock(), (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn positive_timeout_overrides_the_default() {
    let (pool, stats) = started_pool(1);
    let slow = || MockRequest::new(0, Reply::Respond(Duration::from_millis(500)));

    let timed_out = pool.execute_with_timeout(slow(), 20).await;
    assert_eq!(io_kind(&timed_out), Some(io::ErrorKind::TimedOut));

    let quick = pool
        .execute_with_timeout(MockRequest::respond_after(1, 1), 0)
        .await;
    assert!(quick.unwrap().is_success());
    let quick = pool
        .execute_with_timeout(MockRequest::respond_after(2, 1), -5)
        .await;
    assert!(quick.unwrap().is_success());

    assert_eq!(
        *stats.timeouts.lock(),
        vec![Some(Duration::from_millis(20)), None, None]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_panics_become_failures_and_the_worker_survives() {
    let (pool, stats) = started_pool(1);

    let on_create = pool.execute(MockRequest::new(0, Reply::PanicOnCreate)).await;
    let on_enqueue = pool.execute(MockRequest::new(1, Reply::PanicOnEnqueue)).await;
    let after = pool.execute(MockRequest::respond_after(2, 1)).await;

    let create_err = on_create.unwrap().into_io_result().unwrap_err();
    assert_eq!(create_err.kind(), io::ErrorKind::Other);
    assert!(create_err.to_string().contains("mock client is shut down"));

    let enqueue_err = on_enqueue.unwrap().into_io_result().unwrap_err();
    assert!(enqueue_err.to_string().contains("mock dispatcher rejected"));

    assert!(after.unwrap().is_success());
    assert_eq!(stats.open_responses(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_failures_are_wrapped_as_io_errors() {
    let (pool, _stats) = started_pool(1);

    let outcome = pool.execute(MockRequest::new(0, Reply::FailForeign)).await;
    let err = outcome.unwrap().into_io_result().unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::Other);
    assert!(err.get_ref().is_some_and(|source| source.is::<ProtocolError>()));
}

#[tokio::test]
async fn bounded_queue_rejects_when_full() {
    let config = PoolConfig::new(1).with_queue_capacity(2);
    let pool = WorkerPool::with_config(MockTransport::new(), config).unwrap();

    let _a = pool.submit(MockRequest::respond_after(0, 0), -1).unwrap();
    let _b = pool.submit(MockRequest::respond_after(1, 0), -1).unwrap();
    assert!(matches!(
        pool.submit(MockRequest::respond_after(2, 0), -1),
        Err(Error::QueueFull { capacity: 2 })
    ));
    assert_eq!(pool.queued(), 2);
    assert_eq!(pool.config().queue_capacity, Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_escalates_after_the_grace_period() {
    let (pool, stats) = started_pool(1);

    let hanging = pool.submit(MockRequest::new(0, Reply::Hang), -1).unwrap();
    let queued = pool.submit(MockRequest::respond_after(1, 1), -1).unwrap();
    stats.wait_started(1).await;

    timeout(LIMIT, pool.shutdown(Duration::from_millis(50)))
        .await
        .unwrap();

    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(hanging.await.unwrap_err(), Error::Cancelled);
    assert_eq!(queued.await.unwrap_err(), Error::Cancelled);
    assert_eq!(stats.started(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_within_grace_delivers_results() {
    let (pool, stats) = started_pool(2);

    let handles: Vec<_> = (0..4)
        .map(|i| pool.submit(MockRequest::respond_after(i, 5), -1).unwrap())
        .collect();
    let waiters: Vec<_> = handles.into_iter().map(|h| tokio::spawn(h.wait())).collect();
    stats.wait_started(1).await;

    timeout(LIMIT, pool.shutdown(Duration::from_secs(2)))
        .await
        .unwrap();

    for waiter in waiters {
        assert!(waiter.await.unwrap().unwrap().is_success());
    }
    assert_eq!(stats.open_responses(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_tasks_are_skipped() {
    let (pool, stats) = started_pool(1);

    let first = spawn_execute(&pool, MockRequest::respond_after(0, 30));
    stats.wait_started(1).await;
    drop(pool.submit(MockRequest::respond_after(1, 1), -1).unwrap());
    let third = pool.execute(MockRequest::respond_after(2, 1)).await;

    assert!(first.await.unwrap().unwrap().is_success());
    assert!(third.unwrap().is_success());
    assert_eq!(stats.calls_created.load(Ordering::Acquire), 2);
    assert_eq!(*stats.start_order.lock(), vec![0, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_call_keeps_its_worker_until_it_reports() {
    let (pool, stats) = started_pool(1);

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let reply = Reply::RespondIgnoringCancel(Duration::from_millis(40));
            pool.submit(MockRequest::new(i, reply), -1).unwrap()
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        timeout(LIMIT, stats.wait_started(i + 1)).await.unwrap();
        drop(handle);
    }

    timeout(LIMIT, async {
        while stats.closed() < 5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(stats.max_inflight(), 1);
    assert_eq!(stats.cancels.load(Ordering::Acquire), 5);
    assert_eq!(stats.opened(), 5);
    assert_eq!(stats.open_responses(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_cancellation_cancels_the_call() {
    let (pool, stats) = started_pool(1);
    let token = CancellationToken::new();

    let waiter = tokio::spawn({
        let pool = Arc::clone(&pool);
        let token = token.clone();
        async move {
            pool.execute_with_cancellation(MockRequest::new(0, Reply::Hang), -1, &token)
                .await
        }
    });
    stats.wait_started(1).await;
    token.cancel();

    assert_eq!(waiter.await.unwrap().unwrap_err(), Error::Cancelled);
    timeout(LIMIT, async {
        while stats.cancels.load(Ordering::Acquire) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    // The worker is free again.
    assert!(
        pool.execute(MockRequest::respond_after(1, 1))
            .await
            .unwrap()
            .is_success()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_pool_drains_gracefully() {
    let (pool, stats) = started_pool(1);

    let handles: Vec<_> = (0..3)
        .map(|i| pool.submit(MockRequest::respond_after(i, 2), -1).unwrap())
        .collect();
    drop(pool);

    for handle in handles {
        assert!(timeout(LIMIT, handle).await.unwrap().unwrap().is_success());
    }
    stats.wait_quiescent().await;
    assert_eq!(stats.opened(), 3);
    assert_eq!(stats.closed(), 3);
}
