use std::sync::Arc;
use std::time::Duration;

use batchd_core::{Job, Procedure, Task, TaskState};
use batchd_head::{HeadEngine, HeadEngineConfig, LocalHeadClient};
use batchd_infrastructure::InMemoryTaskStore;
use batchd_worker::{ShellProcessFactory, WorkerService, WorkerServiceConfig};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

fn head() -> Arc<HeadEngine> {
    Arc::new(HeadEngine::new(
        Arc::new(InMemoryTaskStore::new()),
        vec![
            Procedure::shell("ok", r#"test "$MODE" = fast"#),
            Procedure::shell("exit4", "exit 4"),
            Procedure::shell("sleepy", "exec sleep 30"),
            Procedure::shell("nap", "sleep 1"),
        ],
        HeadEngineConfig {
            default_task_timeout: Duration::from_secs(60),
            session_timeout: Duration::from_secs(30),
            max_wait_timeout: Duration::from_secs(5),
        },
    ))
}

fn worker(engine: &Arc<HeadEngine>, name: &str) -> Arc<WorkerService> {
    Arc::new(WorkerService::new(
        WorkerServiceConfig {
            name: name.to_string(),
            resources: Default::default(),
            claim_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(50),
            retry_delay: Duration::from_millis(10),
        },
        Arc::new(LocalHeadClient::new(Arc::clone(engine))),
        Arc::new(ShellProcessFactory::new("/bin/sh", 2)),
    ))
}

fn start(service: &Arc<WorkerService>) -> (broadcast::Sender<()>, JoinHandle<()>) {
    let (tx, rx) = broadcast::channel(1);
    let service = Arc::clone(service);
    let handle = tokio::spawn(async move {
        service.run(rx).await.unwrap();
    });
    (tx, handle)
}

async fn stop(tx: broadcast::Sender<()>, handle: JoinHandle<()>) {
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

async fn wait_for_state(engine: &HeadEngine, task_id: &str, state: TaskState) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut task = engine.show_task(task_id).await.unwrap();
    while task.state != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {task_id} stuck in {}",
            task.state
        );
        task = engine
            .wait_task(task_id, Some(task.fingerprint), Duration::from_millis(500))
            .await
            .unwrap();
    }
    task
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_runs_job_to_done() {
    let engine = head();
    let service = worker(&engine, "w1");
    let (tx, handle) = start(&service);

    let task_id = engine
        .submit(Job::new("j1", "ok").with_setting("MODE", "fast"))
        .await
        .unwrap()
        .task_id;

    let task = wait_for_state(&engine, &task_id, TaskState::Done).await;
    assert_eq!(task.return_code, 0);
    assert!(task.is_owned_by("w1", service.session()));

    stop(tx, handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_zero_exit_is_failed() {
    let engine = head();
    let service = worker(&engine, "w1");
    let (tx, handle) = start(&service);

    let task_id = engine.submit(Job::new("j1", "exit4")).await.unwrap().task_id;
    let task = wait_for_state(&engine, &task_id, TaskState::Failed).await;
    assert_eq!(task.return_code, 4);
    assert_eq!(task.message, "process exited with code 4");

    stop(tx, handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_reaches_running_process() {
    let engine = head();
    let service = worker(&engine, "w1");
    let (tx, handle) = start(&service);

    let task_id = engine.submit(Job::new("j1", "sleepy")).await.unwrap().task_id;
    wait_for_state(&engine, &task_id, TaskState::Running).await;

    let status = engine.cancel_task(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Running);

    let task = wait_for_state(&engine, &task_id, TaskState::Failed).await;
    assert_eq!(task.return_code, -1);
    assert_eq!(task.message, "terminated by signal 15");

    stop(tx, handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restarted_worker_zombifies_unfinished_task() {
    let engine = head();

    let first = worker(&engine, "w1");
    let (tx, handle) = start(&first);
    let task_id = engine.submit(Job::new("j1", "nap")).await.unwrap().task_id;
    wait_for_state(&engine, &task_id, TaskState::Running).await;
    stop(tx, handle).await;

    let second = worker(&engine, "w1");
    assert_eq!(second.register().await.unwrap(), 1);
    assert_eq!(second.pool().task_ids().await, vec![task_id.clone()]);

    // the placeholder is held until the head has zombified the task
    second.heartbeat_once().await.unwrap();
    assert_eq!(second.pool().task_ids().await, vec![task_id.clone()]);
    assert_eq!(
        second.pool().status(&task_id).await.unwrap().state,
        TaskState::Zombie
    );
    assert_eq!(
        engine.show_task(&task_id).await.unwrap().state,
        TaskState::Running
    );

    engine.sweep().await.unwrap();
    let task = engine.show_task(&task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Zombie);
    assert_eq!(task.return_code, -1);
    assert_eq!(task.message, "worker restarted");

    second.heartbeat_once().await.unwrap();
    assert!(second.pool().task_ids().await.is_empty());

    // the orphaned process finishing later does not resurrect the task
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(
        engine.show_task(&task_id).await.unwrap().state,
        TaskState::Zombie
    );
}
