use kubestate::kubestate::builder::Builder;
use kubestate::kubestate::client::memory::MemoryObjectStore;
use kubestate::kubestate::config::Options;
use kubestate::kubestate::k8s::pod::{Pod, PodCondition, PodSpec, PodStatus, POD_READY};
use kubestate::kubestate::k8s::{ObjectMeta, ResourceKind, ResourceObject};
use kubestate::kubestate::store::pod::POD_STATUS_READY_TIME;
use kubestate::kubestate::sync::{ListWatch, Reflector, ReflectorConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const UPDATES: usize = 500;

/// Two internally consistent revisions of the same pod. A torn read would
/// pair the phase of one with the node or ready time of the other.
fn revision(generation: usize) -> Pod {
    let (phase, node, ready_at) = if generation % 2 == 0 {
        ("Running", "node-even", "2023-01-01T00:00:00Z")
    } else {
        ("Pending", "node-odd", "2023-01-02T00:00:00Z")
    };
    Pod::new(
        ObjectMeta::named(Some("ns1"), "x", "uid-x"),
        PodSpec {
            node_name: Some(node.to_string()),
            ..PodSpec::default()
        },
    )
    .with_status(PodStatus {
        phase: Some(phase.to_string()),
        conditions: vec![PodCondition::new(POD_READY, "True", Some(ready_at))],
        ..PodStatus::default()
    })
}

fn is_consistent(object: &ResourceObject) -> bool {
    let phase = object.field("status.phase");
    let node = object.field("spec.nodeName");
    let ready = match object {
        ResourceObject::Pod(pod) => pod
            .conditions()
            .first()
            .and_then(|condition| condition.last_transition_time.clone()),
        _ => None,
    };
    matches!(
        (phase, node, ready.as_deref()),
        (Some("Running"), Some("node-even"), Some("2023-01-01T00:00:00Z"))
            | (Some("Pending"), Some("node-odd"), Some("2023-01-02T00:00:00Z"))
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_partial_updates() {
    let store = MemoryObjectStore::new();
    store.upsert(revision(0));
    let list_watch = ListWatch::new(Arc::new(store.clone()), ResourceKind::Pod, None, None);
    let handle = Reflector::new(Arc::new(list_watch), ReflectorConfig::default()).spawn();
    assert!(timeout(Duration::from_secs(5), handle.wait_for_sync())
        .await
        .expect("synced in time"));

    let mirror = handle.mirror();
    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let mirror = Arc::clone(&mirror);
        let done = Arc::clone(&done);
        let reads = Arc::clone(&reads);
        readers.push(tokio::spawn(async move {
            while !done.load(Ordering::Acquire) {
                let object = mirror.get("ns1/x").expect("object stays mirrored");
                assert!(is_consistent(&object), "torn read: {object:?}");
                reads.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }));
    }

    for generation in 1..=UPDATES {
        store.upsert(revision(generation));
        if generation % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }
    let final_version = store.resource_version().to_string();
    timeout(Duration::from_secs(10), async {
        while handle.status().resource_version.as_deref() != Some(final_version.as_str()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all updates applied");

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.await.expect("reader finished cleanly");
    }
    assert!(reads.load(Ordering::Relaxed) > 0);
    let last = mirror.get("ns1/x").expect("object mirrored");
    assert_eq!(last.field("status.phase"), Some("Running"));
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn collection_during_updates_and_after_shutdown() {
    let store = MemoryObjectStore::new();
    store.upsert(revision(0));
    let options = Options {
        resources: vec![ResourceKind::Pod],
        ..Options::default()
    };
    let mut handler = Builder::new(Arc::new(store.clone()), options)
        .build()
        .expect("handler builds");
    handler.start();
    assert!(timeout(Duration::from_secs(5), handler.wait_for_sync())
        .await
        .expect("synced in time"));
    let handler = Arc::new(handler);

    let collector = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let mut values = Vec::new();
            for _ in 0..200 {
                let families = handler.collect();
                let ready = families
                    .iter()
                    .find(|family| family.name == POD_STATUS_READY_TIME)
                    .expect("ready family present");
                assert_eq!(ready.metrics.len(), 1);
                values.push(ready.metrics[0].value);
                tokio::task::yield_now().await;
            }
            values
        })
    };
    for generation in 1..=UPDATES {
        store.upsert(revision(generation));
    }
    let values = collector.await.expect("collector finished");
    assert!(values
        .iter()
        .all(|value| *value == 1_672_531_200.0 || *value == 1_672_617_600.0));

    timeout(Duration::from_secs(1), handler.shutdown())
        .await
        .expect("shutdown is prompt");
    let after = handler.collect();
    assert_eq!(after[0].metrics.len(), 1, "last known state keeps serving");
}
