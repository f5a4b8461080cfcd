//! Lifecycle integration tests against the in-process runtime

use futures::StreamExt;
use nodefleet::models::*;
use nodefleet::runtime::memory::RuntimeOp;
use nodefleet::runtime::{ContainerSpec, ContainerStatus, LogOptions, LogTail, MemoryRuntime};
use nodefleet::{ContainerRuntime, Error, Manager, ManagerConfig, Reconciler, RuntimeError, Store};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Manager, MemoryRuntime) {
    setup_with(Store::in_memory().unwrap(), ManagerConfig::default())
}

fn setup_with(store: Store, config: ManagerConfig) -> (Manager, MemoryRuntime) {
    let runtime = MemoryRuntime::new();
    let manager = Manager::new(store, config);
    manager
        .add_host(NewHost::new("local", "memory"), Arc::new(runtime.clone()))
        .unwrap();
    (manager, runtime)
}

fn val(name: &str, port: u16) -> CreateNodeRequest {
    CreateNodeRequest::new(name, "avax:latest", port)
}

fn assert_container_invariant(manager: &Manager) {
    for node in manager.list_all_nodes().unwrap() {
        assert_eq!(
            node.container_id.is_some(),
            node.status.holds_container(),
            "node {} is {} with container {:?}",
            node.id,
            node.status,
            node.container_id
        );
    }
}

fn count_events(manager: &Manager, id: i64, kind: EventKind) -> usize {
    kinds_oldest_first(manager, id)
        .into_iter()
        .filter(|k| *k == kind)
        .count()
}

fn kinds_oldest_first(manager: &Manager, id: i64) -> Vec<EventKind> {
    manager
        .list_node_events(id, EventLimit::new(1000))
        .unwrap()
        .into_iter()
        .rev()
        .map(|e| e.kind)
        .collect()
}

#[tokio::test]
async fn test_val1_full_lifecycle() {
    let (manager, runtime) = setup();

    let node = manager.create_node(val("val-1", 9651)).unwrap();
    assert_eq!(node.status, NodeStatus::Created);
    assert!(node.container_id.is_none());
    assert_eq!(runtime.container_count(), 0);

    let node = manager.start_node(node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Running);
    let container = node.container_id.clone().unwrap();
    assert_eq!(runtime.status_of(&container), ContainerStatus::Running);
    assert_eq!(
        runtime.container_name(&container).as_deref(),
        Some("nodefleet-val-1")
    );
    assert_container_invariant(&manager);

    let node = manager.stop_node(node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Stopped);
    assert_eq!(node.container_id.as_deref(), Some(container.as_str()));
    assert_eq!(runtime.status_of(&container), ContainerStatus::Exited);

    let node = manager.delete_node(node.id, true).await.unwrap();
    assert_eq!(node.status, NodeStatus::Deleted);
    assert!(node.container_id.is_none());
    assert_eq!(runtime.container_count(), 0);
    assert!(!runtime.volume_exists("nodefleet-1-data"));

    // Soft delete: the record stays readable
    let fetched = manager.get_node(node.id).unwrap();
    assert_eq!(fetched.status, NodeStatus::Deleted);
    assert!(manager.list_nodes().unwrap().is_empty());

    assert_eq!(
        kinds_oldest_first(&manager, node.id),
        vec![
            EventKind::Created,
            EventKind::Started,
            EventKind::Stopped,
            EventKind::Deleted
        ]
    );
    assert_container_invariant(&manager);
}

#[tokio::test]
async fn test_delete_keeps_volume_by_default() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(node.id).await.unwrap();

    manager.delete_node(node.id, false).await.unwrap();
    assert_eq!(runtime.container_count(), 0);
    assert!(runtime.volume_exists("nodefleet-1-data"));
}

#[tokio::test]
async fn test_delete_with_stale_reference_removes_volume() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    let node = manager.start_node(node.id).await.unwrap();
    let node = manager.stop_node(node.id).await.unwrap();
    let volume = manager.config().volume_name(node.id);

    // Removed behind the manager's back, leaving the cached id stale
    runtime.purge(node.container_id.as_deref().unwrap());
    assert!(runtime.volume_exists(&volume));

    let deleted = manager.delete_node(node.id, true).await.unwrap();
    assert_eq!(deleted.status, NodeStatus::Deleted);
    assert!(!runtime.volume_exists(&volume));
    assert_eq!(runtime.call_count(RuntimeOp::FindByLabel), 2);
}

#[tokio::test]
async fn test_delete_with_stale_reference_removes_relabelled_container() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    let node = manager.start_node(node.id).await.unwrap();
    let node = manager.stop_node(node.id).await.unwrap();

    // Someone recreated the node's container under a new id
    runtime.purge(node.container_id.as_deref().unwrap());
    let mut spec = manager.container_spec(&node);
    spec.name = "nodefleet-val-1-recreated".to_string();
    let replacement = runtime.create_container(&spec).await.unwrap();

    manager.delete_node(node.id, false).await.unwrap();
    assert_eq!(runtime.status_of(&replacement), ContainerStatus::Missing);
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn test_foreign_container_with_same_node_label_is_ignored() {
    let (manager, runtime) = setup();
    let foreign = runtime
        .create_container(
            &ContainerSpec::new("otherfleet-db", "postgres:16")
                .label("managed-node", "1")
                .label("managed-by", "otherfleet")
                .volume("otherfleet-1-data", "/var/lib/postgresql/data"),
        )
        .await
        .unwrap();

    let node = manager.create_node(val("val-1", 9651)).unwrap();
    assert_eq!(node.id, 1);
    let node = manager.start_node(node.id).await.unwrap();
    let ours = node.container_id.clone().unwrap();
    assert_ne!(ours, foreign);
    assert_eq!(runtime.container_name(&ours).as_deref(), Some("nodefleet-val-1"));

    manager.delete_node(node.id, true).await.unwrap();
    assert_eq!(runtime.status_of(&foreign), ContainerStatus::Exited);
    assert!(runtime.volume_exists("otherfleet-1-data"));
}

#[tokio::test]
async fn test_start_unknown_node_leaves_no_trace() {
    let (manager, runtime) = setup();
    let before = manager.store().counts().unwrap();

    let err = manager.start_node(4242).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(manager.store().counts().unwrap(), before);
    assert_eq!(runtime.call_count(RuntimeOp::Create), 0);
}

#[tokio::test]
async fn test_double_delete_is_invalid_transition() {
    let (manager, _runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(node.id).await.unwrap();
    manager.delete_node(node.id, true).await.unwrap();

    let err = manager.delete_node(node.id, true).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_ne!(err.kind(), nodefleet::ErrorKind::Runtime);
}

#[tokio::test]
async fn test_start_running_node_is_invalid() {
    let (manager, _runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(node.id).await.unwrap();

    let err = manager.start_node(node.id).await.unwrap_err();
    assert_eq!(err.to_string(), format!("Cannot start node {}: node is running", node.id));
    assert_eq!(
        kinds_oldest_first(&manager, node.id),
        vec![EventKind::Created, EventKind::Started]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_and_stop_exactly_one_succeeds() {
    let (manager, runtime) = setup();
    runtime.set_latency(Duration::from_millis(5));

    for i in 0..10u16 {
        let node = manager
            .create_node(val(&format!("val-{}", i), 9651 + i))
            .unwrap();

        let (start, stop) = tokio::join!(manager.start_node(node.id), manager.stop_node(node.id));
        let successes = [start.is_ok(), stop.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1, "start: {:?}, stop: {:?}", start, stop);

        let failure = start.err().or(stop.err()).unwrap();
        assert!(
            matches!(failure, Error::InvalidTransition { .. }),
            "unexpected failure: {}",
            failure
        );

        let node = manager.get_node(node.id).unwrap();
        assert!(matches!(node.status, NodeStatus::Running | NodeStatus::Stopped));
    }
    assert_container_invariant(&manager);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_of_running_node_stop_once() {
    let (manager, runtime) = setup();
    runtime.set_latency(Duration::from_millis(5));

    for i in 0..10u16 {
        let node = manager
            .create_node(val(&format!("val-{}", i), 9651 + i))
            .unwrap();
        manager.start_node(node.id).await.unwrap();

        let (first, second) =
            tokio::join!(manager.stop_node(node.id), manager.stop_node(node.id));
        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "first: {:?}, second: {:?}",
            first,
            second
        );
        let failure = first.err().or(second.err()).unwrap();
        assert!(matches!(failure, Error::InvalidTransition { .. }), "{}", failure);

        assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Stopped);
        assert_eq!(count_events(&manager, node.id, EventKind::Stopped), 1);
    }
    assert_container_invariant(&manager);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_stop_reports_stop_in_progress() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(node.id).await.unwrap();

    // Into error with the container still alive, so stop must look it up first
    runtime.fail_next(RuntimeOp::Stop, RuntimeError::Api("engine busy".into()));
    manager.stop_node(node.id).await.unwrap_err();
    assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Error);

    runtime.set_latency(Duration::from_millis(50));
    let winner = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.stop_node(node.id).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let err = manager.stop_node(node.id).await.unwrap_err();

    match err {
        Error::InvalidTransition {
            current, detail, ..
        } => {
            assert_eq!(current, NodeStatus::Error);
            assert_eq!(detail.as_deref(), Some("stop in progress"));
        }
        other => panic!("unexpected error: {}", other),
    }
    let node = winner.await.unwrap().unwrap();
    assert_eq!(node.status, NodeStatus::Stopped);
    assert_eq!(count_events(&manager, node.id, EventKind::Stopped), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconciler_races_lifecycle_without_lost_updates() {
    let (manager, runtime) = setup();
    runtime.set_latency(Duration::from_micros(200));

    let mut ids = Vec::new();
    for i in 0..4u16 {
        ids.push(
            manager
                .create_node(val(&format!("val-{}", i), 9651 + i))
                .unwrap()
                .id,
        );
    }

    let reconciler = Reconciler::new(manager.clone(), Duration::from_secs(60));
    let reconcile = tokio::spawn(async move {
        let mut corrected = 0;
        for _ in 0..100 {
            corrected += reconciler.run_once().await.corrected;
            tokio::task::yield_now().await;
        }
        corrected
    });

    let mut workers = Vec::new();
    for id in ids.clone() {
        let manager = manager.clone();
        workers.push(tokio::spawn(async move {
            let (mut starts, mut stops) = (0usize, 0usize);
            for _ in 0..25 {
                manager.start_node(id).await.unwrap();
                starts += 1;
                manager.stop_node(id).await.unwrap();
                stops += 1;
            }
            (starts, stops)
        }));
    }

    let mut total = (0, 0);
    for worker in workers {
        let (starts, stops) = worker.await.unwrap();
        total.0 += starts;
        total.1 += stops;
    }
    let corrected = reconcile.await.unwrap();

    assert_eq!(total, (100, 100));
    assert_eq!(corrected, 0);

    let events = manager.list_events(EventLimit::new(10_000)).unwrap();
    let count = |kind: EventKind| events.iter().filter(|e| e.kind == kind).count();
    assert_eq!(count(EventKind::Started), 100);
    assert_eq!(count(EventKind::Stopped), 100);
    assert_eq!(count(EventKind::DriftCorrected), 0);
    assert_eq!(count(EventKind::Error), 0);

    for id in ids {
        let node = manager.get_node(id).unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
        assert_eq!(
            runtime.status_of(node.container_id.as_deref().unwrap()),
            ContainerStatus::Exited
        );
    }
    assert_container_invariant(&manager);
}

#[tokio::test(start_paused = true)]
async fn test_hung_runtime_call_times_out_into_error() {
    let config = ManagerConfig::builder().runtime_timeout_secs(5).build();
    let (manager, runtime) = setup_with(Store::in_memory().unwrap(), config);
    let node = manager.create_node(val("val-1", 9651)).unwrap();

    runtime.hang_next(RuntimeOp::Start);
    let err = manager.start_node(node.id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Runtime(RuntimeError::Timeout { ref operation, .. }) if operation == "start_container"
    ));

    let stored = manager.get_node(node.id).unwrap();
    assert_eq!(stored.status, NodeStatus::Error);
    assert!(stored.container_id.is_none());
    assert_eq!(
        kinds_oldest_first(&manager, node.id),
        vec![EventKind::Created, EventKind::Error]
    );

    // The labelled container is adopted on retry instead of created again
    let node = manager.start_node(node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Running);
    assert_eq!(runtime.call_count(RuntimeOp::Create), 1);
    assert_eq!(runtime.container_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_does_not_abandon_start() {
    let (manager, runtime) = setup();
    runtime.set_latency(Duration::from_secs(1));
    let node = manager.create_node(val("val-1", 9651)).unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), manager.start_node(node.id)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let node = manager.get_node(node.id).unwrap();
    assert_eq!(node.status, NodeStatus::Running);
    assert_container_invariant(&manager);
}

#[tokio::test]
async fn test_stop_failure_moves_to_error_and_recovers() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(node.id).await.unwrap();

    runtime.fail_next(RuntimeOp::Stop, RuntimeError::Api("engine busy".into()));
    let err = manager.stop_node(node.id).await.unwrap_err();
    assert_eq!(err.kind(), nodefleet::ErrorKind::Runtime);
    assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Error);

    // From error, stop rediscovers the container by label
    let node = manager.stop_node(node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Stopped);
    assert_container_invariant(&manager);
}

#[tokio::test]
async fn test_crashing_workload_fails_start() {
    let (manager, runtime) = setup();
    runtime.set_exit_on_start(true);
    let node = manager.create_node(val("val-1", 9651)).unwrap();

    let err = manager.start_node(node.id).await.unwrap_err();
    assert!(err.to_string().contains("did not reach running"));
    assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Error);
}

#[tokio::test]
async fn test_logs_stream_tail() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    let node = manager.start_node(node.id).await.unwrap();
    let container = node.container_id.clone().unwrap();
    for line in ["boot\n", "bootstrapping\n", "healthy\n"] {
        runtime.push_log(&container, line);
    }

    let options = LogOptions::default().tail(LogTail::Last(2));
    let chunks: Vec<_> = manager
        .node_logs(node.id, options)
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    let text: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
    assert_eq!(String::from_utf8(text).unwrap(), "bootstrapping\nhealthy\n");
}

#[tokio::test]
async fn test_logs_of_deleted_node_not_found() {
    let (manager, _runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(node.id).await.unwrap();
    manager.delete_node(node.id, false).await.unwrap();

    let result = manager.node_logs(node.id, LogOptions::default()).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_list_events_newest_first() {
    let (manager, _runtime) = setup();
    let a = manager.create_node(val("val-a", 9651)).unwrap();
    let b = manager.create_node(val("val-b", 9652)).unwrap();
    manager.start_node(a.id).await.unwrap();

    let events = manager.list_events(manager.event_limit(Some("2"))).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::Started);
    assert_eq!(events[0].node_id, Some(a.id));
    assert_eq!(events[1].node_id, Some(b.id));
    assert!(events[0].id > events[1].id);

    // Lenient limit
    let events = manager.list_events(manager.event_limit(Some("zero"))).unwrap();
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn test_drift_detected_after_out_of_band_kill() {
    let (manager, runtime) = setup();
    let node = manager.create_node(val("val-1", 9651)).unwrap();
    let node = manager.start_node(node.id).await.unwrap();
    runtime.kill(node.container_id.as_deref().unwrap());

    let report = Reconciler::from_config(manager.clone()).run_once().await;
    assert_eq!(report.corrected, 1);
    assert_eq!(manager.get_node(node.id).unwrap().status, NodeStatus::Stopped);
    assert_eq!(
        kinds_oldest_first(&manager, node.id).last(),
        Some(&EventKind::DriftCorrected)
    );

    // Stopped is a valid start source
    let node = manager.start_node(node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Running);
}

#[tokio::test]
async fn test_state_survives_restart_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nodefleet.db");
    let runtime = MemoryRuntime::new();

    let id = {
        let manager = Manager::new(Store::open(&path).unwrap(), ManagerConfig::default());
        manager
            .add_host(NewHost::new("local", "memory"), Arc::new(runtime.clone()))
            .unwrap();
        let node = manager
            .create_node(val("val-1", 9651).with_l1(L1Request::new("subnet-a")))
            .unwrap();
        manager.start_node(node.id).await.unwrap();
        node.id
    };

    let manager = Manager::new(Store::open(&path).unwrap(), ManagerConfig::default());
    let host = manager.list_hosts().unwrap().remove(0);
    manager.attach_runtime(host.id, Arc::new(runtime.clone())).unwrap();

    assert_eq!(manager.recover_interrupted().unwrap(), 0);
    assert_eq!(manager.get_node(id).unwrap().status, NodeStatus::Running);
    assert_eq!(manager.list_l1_bindings(id).unwrap().len(), 1);

    let node = manager.stop_node(id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Stopped);
}

#[tokio::test]
async fn test_name_reusable_after_delete() {
    let (manager, _runtime) = setup();
    let first = manager.create_node(val("val-1", 9651)).unwrap();
    manager.start_node(first.id).await.unwrap();
    manager.delete_node(first.id, true).await.unwrap();

    let second = manager.create_node(val("val-1", 9651)).unwrap();
    let second = manager.start_node(second.id).await.unwrap();
    assert_eq!(second.status, NodeStatus::Running);
    assert_eq!(manager.list_all_nodes().unwrap().len(), 2);
}
