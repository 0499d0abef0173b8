use std::sync::Arc;
use std::time::Duration;

use batchd_api::{create_app, HttpHeadClient};
use batchd_core::{
    ClaimRequest, ControlClient, HeadClient, Heartbeat, Job, JobStatusWorker, Procedure,
    RegisterRequest, SchedulerError, Signal, StatusReport, TaskState,
};
use batchd_head::{HeadEngine, HeadEngineConfig};
use batchd_infrastructure::InMemoryTaskStore;
use tokio::net::TcpListener;

async fn spawn_head() -> HttpHeadClient {
    let engine = Arc::new(HeadEngine::new(
        Arc::new(InMemoryTaskStore::new()),
        vec![
            Procedure::shell("build", "make"),
            Procedure::shell("render", "render.sh").with_requirement("gpu >= 1"),
        ],
        HeadEngineConfig::default(),
    ));
    let app = create_app(engine);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    HttpHeadClient::new(address).unwrap()
}

#[tokio::test]
async fn test_control_and_worker_flow_over_http() {
    let client = spawn_head().await;

    let run = client.send_event(Job::new("j1", "build")).await.unwrap();
    let task = client
        .wait_task(&run.task_id, None, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Waiting);

    let registered = client
        .register(RegisterRequest {
            worker: "w1".to_string(),
            session: "s1".to_string(),
        })
        .await
        .unwrap();
    assert!(registered.orphaned.is_empty());

    let claimed = client
        .claim(ClaimRequest {
            worker: "w1".to_string(),
            session: "s1".to_string(),
            resources: Default::default(),
            timeout_ms: 500,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.task_id, run.task_id);

    let status = client
        .signal_task(Signal {
            task_id: run.task_id.clone(),
            signal: "int".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.state, TaskState::Running);

    let heartbeat = client
        .heartbeat(Heartbeat {
            worker: "w1".to_string(),
            session: "s1".to_string(),
            tasks: vec![run.task_id.clone()],
        })
        .await
        .unwrap();
    assert_eq!(heartbeat.signals.len(), 1);
    assert_eq!(heartbeat.signals[0].signal, "INT");

    // waiter blocked on the running fingerprint wakes on the report
    let waiter = {
        let client = client.clone();
        let task_id = run.task_id.clone();
        let fingerprint = client.show_task(&task_id).await.unwrap().fingerprint;
        tokio::spawn(async move {
            client
                .wait_task(&task_id, Some(fingerprint), Duration::from_secs(10))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .report(StatusReport {
            worker: "w1".to_string(),
            session: "s1".to_string(),
            status: JobStatusWorker::done(&run.task_id),
        })
        .await
        .unwrap();

    let done = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(done.state, TaskState::Done);

    assert_eq!(client.show_tasks().await.unwrap().len(), 1);
    assert_eq!(client.procedures().await.unwrap().ids, vec!["build", "render"]);
}

#[tokio::test]
async fn test_errors_survive_the_wire() {
    let client = spawn_head().await;

    let err = client
        .send_event(Job::new("j1", "build").with_requirement("gpu >= "))
        .await
        .unwrap_err();
    match err {
        SchedulerError::InvalidRequirement { expr, .. } => assert_eq!(expr, "gpu >= "),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = client.send_event(Job::new("j1", "deploy")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownProcedure { id } if id == "deploy"));

    let err = client.show_task("missing").await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { id } if id == "missing"));

    let claim = client
        .claim(ClaimRequest {
            worker: "w1".to_string(),
            session: "s1".to_string(),
            resources: Default::default(),
            timeout_ms: 50,
        })
        .await
        .unwrap();
    assert!(claim.is_none());
}

#[tokio::test]
async fn test_unreachable_head_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = HttpHeadClient::new(address).unwrap();
    let err = client.show_tasks().await.unwrap_err();
    assert!(err.is_retryable());
}
