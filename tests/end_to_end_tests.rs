//! Head、Worker和控制客户端通过真实HTTP连接的端到端测试

use std::sync::Arc;
use std::time::Duration;

use batchd::{build_worker, start_head, ShutdownManager};
use batchd_api::HttpHeadClient;
use batchd_core::{AppConfig, ControlClient, Job, Procedure, Signal, Task, TaskState};

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.head.bind_address = "127.0.0.1:0".to_string();
    config.head.sweep_interval_ms = 100;
    config.head.procedures = vec![
        Procedure::shell("check", "test \"$MODE\" = ok || exit 3"),
        Procedure::shell("sleeper", "exec sleep 30"),
        Procedure::shell("gpu-only", "true").with_requirement("gpu >= 1"),
    ];
    config.worker.name = "e2e-worker".to_string();
    config.worker.claim_timeout_ms = 500;
    config.worker.heartbeat_interval_seconds = 1;
    config.worker.report_retry_delay_ms = 50;
    config.worker.resources.insert("cpu".to_string(), 4);
    config
}

async fn wait_terminal(client: &HttpHeadClient, task_id: &str) -> Task {
    let mut known = None;
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let task = client
                .wait_task(task_id, known, Duration::from_secs(5))
                .await
                .unwrap();
            if task.state.is_terminal() {
                return task;
            }
            known = Some(task.fingerprint);
        }
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jobs_run_through_http_worker() {
    let shutdown = ShutdownManager::new();
    let mut config = config();

    let head = start_head(&config, &shutdown.subscribe().await).await.unwrap();
    config.worker.head_url = format!("http://{}", head.local_addr);

    let worker_client = Arc::new(HttpHeadClient::new(&config.worker.head_url).unwrap());
    let worker = build_worker(&config, worker_client);
    let worker_handle = tokio::spawn(worker.run(shutdown.subscribe().await));

    let client = HttpHeadClient::new(&config.worker.head_url).unwrap();

    let ok = client
        .send_event(Job::new("ok", "check").with_setting("MODE", "ok"))
        .await
        .unwrap();
    let bad = client
        .send_event(Job::new("bad", "check").with_setting("MODE", "nope"))
        .await
        .unwrap();
    // never eligible on this worker
    let starved = client
        .send_event(Job::new("starved", "gpu-only").with_timeout_seconds(1))
        .await
        .unwrap();

    let task = wait_terminal(&client, &ok.task_id).await;
    assert_eq!(task.state, TaskState::Done);
    assert_eq!(task.return_code, 0);

    let task = wait_terminal(&client, &bad.task_id).await;
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.return_code, 3);
    assert_eq!(task.message, "process exited with code 3");

    let task = wait_terminal(&client, &starved.task_id).await;
    assert_eq!(task.state, TaskState::Timeout);
    assert_eq!(task.return_code, -1);

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), worker_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), head.join())
        .await
        .unwrap();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_signal_reaches_remote_process() {
    let shutdown = ShutdownManager::new();
    let mut config = config();

    let head = start_head(&config, &shutdown.subscribe().await).await.unwrap();
    config.worker.head_url = format!("http://{}", head.local_addr);

    let worker = build_worker(
        &config,
        Arc::new(HttpHeadClient::new(&config.worker.head_url).unwrap()),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.subscribe().await));

    let client = HttpHeadClient::new(&config.worker.head_url).unwrap();
    let run = client.send_event(Job::new("s", "sleeper")).await.unwrap();

    let running = tokio::time::timeout(Duration::from_secs(10), async {
        let mut known = None;
        loop {
            let task = client
                .wait_task(&run.task_id, known, Duration::from_secs(5))
                .await
                .unwrap();
            if task.state == TaskState::Running {
                return task;
            }
            known = Some(task.fingerprint);
        }
    })
    .await
    .unwrap();
    assert_eq!(
        running.owner.as_ref().map(|owner| owner.worker.as_str()),
        Some("e2e-worker")
    );

    let status = client
        .signal_task(Signal {
            task_id: run.task_id.clone(),
            signal: "KILL".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.state, TaskState::Running);

    let task = wait_terminal(&client, &run.task_id).await;
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.message, "terminated by signal 9");

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), worker_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    head.join().await;
}
