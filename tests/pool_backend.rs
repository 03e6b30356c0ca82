use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use packflow::errors::PackflowError;
use packflow::exec::{PoolTaskBackend, Task, TaskBackend};
use packflow_test_utils::{FakeDispatcher, init_tracing, with_timeout};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

fn backend(dispatcher: FakeDispatcher, batch_size: usize) -> (Arc<FakeDispatcher>, PoolTaskBackend) {
    let dispatcher = Arc::new(dispatcher);
    let backend = PoolTaskBackend::new(dispatcher.clone(), batch_size, Duration::from_secs(1));
    (dispatcher, backend)
}

#[tokio::test]
async fn partial_batch_is_sealed_on_wait() -> TestResult {
    init_tracing();
    let (dispatcher, backend) = backend(FakeDispatcher::new(), 2);
    let job_id = Uuid::new_v4();

    for name in ["a", "b", "c"] {
        backend.submit_task(job_id, Task::new(job_id, name, ""))?;
    }
    let tasks = with_timeout(backend.wait_for_results(job_id)).await?;

    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.done && t.finished_timestamp.is_some()));
    assert_eq!(dispatcher.batch_sizes(), vec![2, 1]);
    Ok(())
}

#[tokio::test]
async fn full_batches_leave_before_wait() -> TestResult {
    let (dispatcher, backend) = backend(FakeDispatcher::new(), 2);
    let job_id = Uuid::new_v4();

    backend.submit_task(job_id, Task::new(job_id, "a", ""))?;
    backend.submit_task(job_id, Task::new(job_id, "b", ""))?;

    packflow_test_utils::wait_until(|| dispatcher.batch_sizes() == vec![2]).await;
    let tasks = with_timeout(backend.wait_for_results(job_id)).await?;
    assert_eq!(tasks.len(), 2);
    Ok(())
}

#[tokio::test]
async fn exit_codes_come_from_the_dispatcher() -> TestResult {
    let (_, backend) = backend(FakeDispatcher::new().with_exit_code("bad", 3), 8);
    let job_id = Uuid::new_v4();

    backend.submit_task(job_id, Task::new(job_id, "good", ""))?;
    backend.submit_task(job_id, Task::new(job_id, "bad", ""))?;
    let tasks = with_timeout(backend.wait_for_results(job_id)).await?;

    let code_of = |name: &str| tasks.iter().find(|t| t.execute == name).and_then(|t| t.exit_code);
    assert_eq!(code_of("good"), Some(0));
    assert_eq!(code_of("bad"), Some(3));
    Ok(())
}

#[tokio::test]
async fn dispatch_error_fails_every_task_of_the_batch() -> TestResult {
    let (_, backend) = backend(FakeDispatcher::failing("boom"), 8);
    let job_id = Uuid::new_v4();

    backend.submit_task(job_id, Task::new(job_id, "a", ""))?;
    backend.submit_task(job_id, Task::new(job_id, "b", ""))?;
    let tasks = with_timeout(backend.wait_for_results(job_id)).await?;

    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert!(task.done);
        assert_eq!(task.exit_code, Some(1));
        assert!(task.stderr.contains("boom"), "stderr: {}", task.stderr);
    }
    Ok(())
}

#[tokio::test]
async fn dispatcher_panic_fails_tasks_and_keeps_worker_alive() -> TestResult {
    let (_, backend) = backend(FakeDispatcher::panicking(), 8);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    backend.submit_task(first, Task::new(first, "a", ""))?;
    let tasks = with_timeout(backend.wait_for_results(first)).await?;
    assert_eq!(tasks[0].exit_code, Some(1));

    backend.submit_task(second, Task::new(second, "b", ""))?;
    let tasks = with_timeout(backend.wait_for_results(second)).await?;
    assert_eq!(tasks[0].exit_code, Some(1));
    Ok(())
}

#[tokio::test]
async fn jobs_are_batched_separately() -> TestResult {
    let (dispatcher, backend) = backend(FakeDispatcher::new(), 4);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    backend.submit_task(a, Task::new(a, "x", ""))?;
    backend.submit_task(b, Task::new(b, "y", ""))?;
    backend.submit_task(a, Task::new(a, "x", ""))?;

    let from_a = with_timeout(backend.wait_for_results(a)).await?;
    let from_b = with_timeout(backend.wait_for_results(b)).await?;

    assert_eq!(from_a.len(), 2);
    assert!(from_a.iter().all(|t| t.job_id == a));
    assert_eq!(from_b.len(), 1);
    assert!(dispatcher.batches().iter().all(|batch| {
        let expected = batch.job_id;
        batch.tasks.len() <= 4 && (expected == a || expected == b)
    }));
    Ok(())
}

#[tokio::test]
async fn waiting_without_submissions_returns_nothing() -> TestResult {
    let (dispatcher, backend) = backend(FakeDispatcher::new(), 4);
    let tasks = with_timeout(backend.wait_for_results(Uuid::new_v4())).await?;
    assert!(tasks.is_empty());
    assert!(dispatcher.batches().is_empty());
    Ok(())
}

#[tokio::test]
async fn submit_after_shutdown_is_refused() -> TestResult {
    let (_, backend) = backend(FakeDispatcher::new(), 4);
    with_timeout(backend.shutdown(true)).await;

    let job_id = Uuid::new_v4();
    let err = backend.submit_task(job_id, Task::new(job_id, "a", "")).unwrap_err();
    assert!(matches!(err, PackflowError::BackendShutDown));
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_batches() -> TestResult {
    let (_, backend) = backend(FakeDispatcher::new().with_delay(Duration::from_millis(50)), 1);
    let job_id = Uuid::new_v4();

    backend.submit_task(job_id, Task::new(job_id, "slow", ""))?;
    with_timeout(backend.shutdown(true)).await;

    let tasks = with_timeout(backend.wait_for_results(job_id)).await?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].exit_code, Some(0));
    Ok(())
}
