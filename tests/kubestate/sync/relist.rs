use kubestate::kubestate::client::memory::MemoryObjectStore;
use kubestate::kubestate::client::{
    ListFuture, ListOptions, ObjectStoreClient, WatchEventType, WatchFuture,
};
use kubestate::kubestate::k8s::pod::{Pod, PodSpec, PodStatus};
use kubestate::kubestate::k8s::{ObjectMeta, ResourceKind};
use kubestate::kubestate::sync::{
    ListWatch, ListerWatcher, MirrorEvent, Reflector, ReflectorConfig, ReflectorHandle,
    SyncState,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;

fn pod(name: &str, phase: &str) -> Pod {
    Pod::new(ObjectMeta::named(Some("ns1"), name, name), PodSpec::default()).with_status(
        PodStatus {
            phase: Some(phase.to_string()),
            ..PodStatus::default()
        },
    )
}

fn fast_config() -> ReflectorConfig {
    ReflectorConfig {
        page_size: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(40),
        ..ReflectorConfig::default()
    }
}

fn start(store: &MemoryObjectStore) -> ReflectorHandle {
    let list_watch = ListWatch::new(Arc::new(store.clone()), ResourceKind::Pod, Some("ns1"), None);
    Reflector::new(Arc::new(list_watch), fast_config()).spawn()
}

async fn listed_keys(store: &MemoryObjectStore) -> Vec<String> {
    let list = store
        .list(
            ResourceKind::Pod,
            ListOptions {
                namespace: Some("ns1".to_string()),
                ..ListOptions::default()
            },
        )
        .await
        .expect("fresh list");
    let mut keys: Vec<String> = list.items.iter().map(|item| item.key()).collect();
    keys.sort();
    keys
}

/// Key to resource version for a fresh, unpaginated list of ns1 pods.
async fn listed_versions(store: &MemoryObjectStore) -> BTreeMap<String, String> {
    store
        .list(
            ResourceKind::Pod,
            ListOptions {
                namespace: Some("ns1".to_string()),
                ..ListOptions::default()
            },
        )
        .await
        .expect("fresh list")
        .items
        .iter()
        .map(|item| (item.key(), item.resource_version().unwrap_or_default().to_string()))
        .collect()
}

/// Writes on both sides of the cursor after the first page of "p0".."p5".
fn churn(store: &MemoryObjectStore) {
    store.delete(ResourceKind::Pod, "ns1/p0");
    store.upsert(pod("p1", "Succeeded"));
    store.upsert(pod("a", "Pending"));
    store.delete(ResourceKind::Pod, "ns1/p3");
    store.upsert(pod("p2", "Failed"));
    store.upsert(pod("z", "Pending"));
}

/// Lister that runs [`churn`] once, right after serving a non-final page.
struct ChurnBetweenPages {
    inner: ListWatch,
    store: MemoryObjectStore,
    fired: AtomicBool,
}

impl ListerWatcher for ChurnBetweenPages {
    fn kind(&self) -> ResourceKind {
        self.inner.kind()
    }

    fn namespace(&self) -> Option<&str> {
        self.inner.namespace()
    }

    fn list(&self, options: ListOptions) -> ListFuture<'_> {
        Box::pin(async move {
            let page = self.inner.list(options).await;
            if let Ok(page) = &page {
                let more = page.metadata.continue_token.is_some();
                if more && !self.fired.swap(true, Ordering::SeqCst) {
                    churn(&self.store);
                }
            }
            page
        })
    }

    fn watch(&self, options: ListOptions) -> WatchFuture<'_> {
        self.inner.watch(options)
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn broken_watch_recovers_through_relist() {
    let store = MemoryObjectStore::new();
    for name in ["a", "b", "c"] {
        store.upsert(pod(name, "Running"));
    }
    let handle = start(&store);
    assert!(timeout(Duration::from_secs(5), handle.wait_for_sync())
        .await
        .expect("synced in time"));
    let mirror = handle.mirror();

    // N events delivered over the first watch session.
    store.upsert(pod("d", "Pending"));
    store.upsert(pod("a", "Succeeded"));
    wait_for("watch events", || {
        mirror.len() == 4
            && mirror
                .get("ns1/a")
                .and_then(|object| object.field("status.phase").map(str::to_string))
                .as_deref()
                == Some("Succeeded")
    })
    .await;

    // Break the stream, then change the collection and keep the next
    // lists failing so recovery has to go through backoff.
    store.disconnect_watches();
    store.delete(ResourceKind::Pod, "ns1/b");
    store.upsert(pod("e", "Running"));
    store.upsert(pod("c", "Failed"));
    let expected = listed_keys(&store).await;
    store.fail_next_lists(3);

    wait_for("relist", || mirror.keys() == expected).await;
    assert!(mirror.get("ns1/b").is_none(), "stale object retained");
    assert_eq!(
        mirror
            .get("ns1/c")
            .and_then(|object| object.field("status.phase").map(str::to_string)),
        Some("Failed".to_string())
    );

    let status = handle.status();
    assert!(status.relists >= 1);
    wait_for("watching again", || handle.status().state == SyncState::Watching).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn deletions_missed_while_disconnected_are_announced() {
    let store = MemoryObjectStore::new();
    store.upsert(pod("a", "Running"));
    let handle = start(&store);
    assert!(handle.wait_for_sync().await);
    let mirror = handle.mirror();
    let mut changes = mirror.changes();

    store.fail_next_lists(1);
    store.disconnect_watches();
    store.delete(ResourceKind::Pod, "ns1/a");
    store.upsert(pod("b", "Running"));
    store.compact();

    wait_for("relisted mirror", || mirror.keys() == vec!["ns1/b".to_string()]).await;
    timeout(Duration::from_secs(5), async {
        while let Some(change) = changes.next().await {
            if let Ok(MirrorEvent::Deleted(object)) = change {
                if object.key() == "ns1/a" {
                    return;
                }
            }
        }
        panic!("change stream ended before the deletion");
    })
    .await
    .expect("deletion announced");
    handle.shutdown().await;
}

#[tokio::test]
async fn paginated_list_reports_one_snapshot_version() {
    let store = MemoryObjectStore::new();
    for index in 0..7 {
        store.upsert(pod(&format!("p{index}"), "Running"));
    }
    let handle = start(&store);
    assert!(handle.wait_for_sync().await);
    assert_eq!(handle.mirror().len(), 7);
    assert_eq!(handle.status().resource_version.as_deref(), Some("7"));
    handle.shutdown().await;
    assert_eq!(handle.status().state, SyncState::Stopped);
}

#[tokio::test]
async fn pages_and_watch_from_their_version_converge_despite_concurrent_writes() {
    let store = MemoryObjectStore::new();
    for index in 0..6 {
        store.upsert(pod(&format!("p{index}"), "Running"));
    }

    let mut mirrored: BTreeMap<String, String> = BTreeMap::new();
    let mut snapshot_version: Option<String> = None;
    let mut continue_token = None;
    let mut pages = 0;
    loop {
        let page = store
            .list(
                ResourceKind::Pod,
                ListOptions {
                    namespace: Some("ns1".to_string()),
                    limit: Some(2),
                    continue_token: continue_token.take(),
                    ..ListOptions::default()
                },
            )
            .await
            .expect("page");
        pages += 1;
        let version = page.metadata.resource_version.clone().expect("page version");
        match &snapshot_version {
            Some(first) => assert_eq!(&version, first, "page {pages} left the snapshot"),
            None => snapshot_version = Some(version),
        }
        for item in &page.items {
            let version = item.resource_version().unwrap_or_default().to_string();
            mirrored.insert(item.key(), version);
        }
        if pages == 1 {
            churn(&store);
        }
        match page.metadata.continue_token {
            Some(token) => continue_token = Some(token),
            None => break,
        }
    }
    assert!(pages >= 3);
    assert_eq!(snapshot_version.as_deref(), Some("6"));

    let mut stream = store
        .watch(
            ResourceKind::Pod,
            ListOptions {
                namespace: Some("ns1".to_string()),
                resource_version: snapshot_version,
                ..ListOptions::default()
            },
        )
        .await
        .expect("watch from the list version");
    let target = store.resource_version().to_string();
    timeout(Duration::from_secs(5), async {
        while let Some(event) = stream.next().await {
            let event = event.expect("watch event");
            let key = event.object.key();
            let version = event.object.resource_version().unwrap_or_default().to_string();
            match event.event_type {
                WatchEventType::Added | WatchEventType::Modified => {
                    mirrored.insert(key, version.clone());
                }
                WatchEventType::Deleted => {
                    mirrored.remove(&key);
                }
                WatchEventType::Bookmark => {}
            }
            if version == target {
                break;
            }
        }
    })
    .await
    .expect("watch caught up");

    assert_eq!(mirrored, listed_versions(&store).await);
}

#[tokio::test]
async fn reflector_converges_when_the_collection_changes_between_pages() {
    let store = MemoryObjectStore::new();
    for index in 0..6 {
        store.upsert(pod(&format!("p{index}"), "Running"));
    }
    let lister = ChurnBetweenPages {
        inner: ListWatch::new(Arc::new(store.clone()), ResourceKind::Pod, Some("ns1"), None),
        store: store.clone(),
        fired: AtomicBool::new(false),
    };
    let handle = Reflector::new(Arc::new(lister), fast_config()).spawn();
    assert!(timeout(Duration::from_secs(5), handle.wait_for_sync())
        .await
        .expect("synced in time"));

    let expected = listed_versions(&store).await;
    let mirror = handle.mirror();
    wait_for("mirror to match a fresh list", || {
        let current: BTreeMap<String, String> = mirror
            .snapshot()
            .iter()
            .map(|object| {
                let version = object.resource_version().unwrap_or_default().to_string();
                (object.key(), version)
            })
            .collect();
        current == expected
    })
    .await;
    assert!(mirror.get("ns1/p0").is_none());
    assert_eq!(
        mirror
            .get("ns1/p2")
            .and_then(|object| object.field("status.phase").map(str::to_string)),
        Some("Failed".to_string())
    );
    handle.shutdown().await;
}
