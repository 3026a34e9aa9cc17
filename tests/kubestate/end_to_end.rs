use kubestate::kubestate::builder::Builder;
use kubestate::kubestate::client::memory::MemoryObjectStore;
use kubestate::kubestate::config::Options;
use kubestate::kubestate::k8s::pod::{Pod, PodCondition, PodSpec, PodStatus, POD_READY};
use kubestate::kubestate::k8s::{ObjectMeta, ResourceKind};
use kubestate::kubestate::metric::{Family, MetricType};
use kubestate::kubestate::store::pod::{POD_STATUS_CONTAINERS_READY_TIME, POD_STATUS_READY_TIME};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn ready_pod(namespace: &str, name: &str, uid: &str, ready_at: Option<&str>) -> Pod {
    let conditions = ready_at
        .map(|time| vec![PodCondition::new(POD_READY, "True", Some(time))])
        .unwrap_or_default();
    Pod::new(ObjectMeta::named(Some(namespace), name, uid), PodSpec::default()).with_status(
        PodStatus {
            phase: Some("Running".to_string()),
            conditions,
            ..PodStatus::default()
        },
    )
}

fn family<'a>(families: &'a [Family], name: &str) -> &'a Family {
    families
        .iter()
        .find(|family| family.name == name)
        .unwrap_or_else(|| panic!("family {name} missing"))
}

#[tokio::test]
async fn ready_time_flows_from_store_to_collection() {
    let store = MemoryObjectStore::new();
    store.upsert(ready_pod("ns1", "p1", "abc", Some("2023-01-01T00:00:00Z")));

    let mut handler = Builder::new(Arc::new(store.clone()), Options::default())
        .build()
        .expect("handler builds");
    handler.start();
    assert!(timeout(Duration::from_secs(5), handler.wait_for_sync())
        .await
        .expect("initial sync in time"));

    let families = handler.collect();
    let ready = family(&families, POD_STATUS_READY_TIME);
    assert_eq!(ready.metric_type, MetricType::Gauge);
    assert_eq!(ready.metrics.len(), 1);
    let metric = &ready.metrics[0];
    assert_eq!(metric.label_keys, vec!["namespace", "pod", "uid"]);
    assert_eq!(metric.label_values, vec!["ns1", "p1", "abc"]);
    assert_eq!(metric.value, 1_672_531_200.0);

    assert!(family(&families, POD_STATUS_CONTAINERS_READY_TIME).is_empty());
    handler.shutdown().await;
}

#[tokio::test]
async fn watch_updates_reach_the_next_collection() {
    let store = MemoryObjectStore::new();
    store.upsert(ready_pod("ns1", "p1", "abc", None));

    let mut handler = Builder::new(Arc::new(store.clone()), Options::default())
        .build()
        .expect("handler builds");
    handler.start();
    assert!(timeout(Duration::from_secs(5), handler.wait_for_sync())
        .await
        .expect("initial sync in time"));
    assert!(family(&handler.collect(), POD_STATUS_READY_TIME).is_empty());

    store.upsert(ready_pod("ns1", "p1", "abc", Some("2023-06-01T12:00:00Z")));
    let value = timeout(Duration::from_secs(5), async {
        loop {
            let families = handler.collect();
            if let Some(metric) = family(&families, POD_STATUS_READY_TIME).metrics.first() {
                return metric.value;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("update observed");
    assert_eq!(value, 1_685_620_800.0);

    store.delete(ResourceKind::Pod, "ns1/p1");
    timeout(Duration::from_secs(5), async {
        while !family(&handler.collect(), POD_STATUS_READY_TIME).is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deletion observed");
    handler.shutdown().await;
}

#[tokio::test]
async fn namespace_scope_limits_collected_objects() {
    let store = MemoryObjectStore::new();
    store.upsert(ready_pod("ns1", "p1", "a", Some("2023-01-01T00:00:00Z")));
    store.upsert(ready_pod("ns2", "p2", "b", Some("2023-01-01T00:00:00Z")));
    let options = Options {
        resources: vec![ResourceKind::Pod],
        namespaces: vec!["ns2".to_string()],
        ..Options::default()
    };

    let mut handler = Builder::new(Arc::new(store), options)
        .build()
        .expect("handler builds");
    handler.start();
    assert!(timeout(Duration::from_secs(5), handler.wait_for_sync())
        .await
        .expect("initial sync in time"));

    let families = handler.collect();
    let ready = family(&families, POD_STATUS_READY_TIME);
    assert_eq!(ready.metrics.len(), 1);
    assert_eq!(ready.metrics[0].label("namespace"), Some("ns2"));
    handler.shutdown().await;
}
