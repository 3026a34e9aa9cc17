use kubestate::kubestate::client::memory::MemoryObjectStore;
use kubestate::kubestate::generator::{adapt, FamilyGenerator, GeneratorRegistry};
use kubestate::kubestate::k8s::node::Node;
use kubestate::kubestate::k8s::pod::{Pod, PodSpec};
use kubestate::kubestate::k8s::{ObjectMeta, ResourceKind};
use kubestate::kubestate::metric::{Metric, MetricType};
use kubestate::kubestate::observability::health::{
    readiness_report, HealthStatus, LIST_FAILURE_THRESHOLD,
};
use kubestate::kubestate::store::pod::{pod_registry, POD_CREATED};
use kubestate::kubestate::store::MetricsStore;
use kubestate::kubestate::sync::{ListWatch, Reflector, ReflectorConfig, ReflectorHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn pod(name: &str) -> Pod {
    let mut metadata = ObjectMeta::named(Some("ns1"), name, &format!("uid-{name}"));
    metadata.creation_timestamp = Some("2023-01-01T00:00:00Z".to_string());
    Pod::new(metadata, PodSpec::default())
}

fn fast_config() -> ReflectorConfig {
    ReflectorConfig {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        ..ReflectorConfig::default()
    }
}

async fn synced(
    store: &MemoryObjectStore,
    kind: ResourceKind,
    field_selector: Option<&str>,
) -> ReflectorHandle {
    let list_watch = ListWatch::new(Arc::new(store.clone()), kind, None, field_selector);
    let handle = Reflector::new(Arc::new(list_watch), fast_config()).spawn();
    assert!(timeout(Duration::from_secs(5), handle.wait_for_sync())
        .await
        .expect("synced in time"));
    handle
}

#[tokio::test]
async fn colliding_labels_only_drop_the_offending_object() {
    let store = MemoryObjectStore::new();
    for name in ["a", "b", "c"] {
        store.upsert(pod(name));
    }
    let handle = synced(&store, ResourceKind::Pod, None).await;

    let mut registry = GeneratorRegistry::for_resource::<Pod>().expect("registry");
    registry
        .register(FamilyGenerator::new(
            "kube_pod_probe",
            "Emits a colliding label for one pod.",
            MetricType::Gauge,
            "",
            adapt(|pod: &Pod| {
                if pod.metadata.name.as_deref() == Some("b") {
                    vec![Metric::with_labels(["pod"], ["shadow"], 1.0)]
                } else {
                    vec![Metric::new(1.0)]
                }
            }),
        ))
        .expect("family registers");
    let metrics_store = MetricsStore::new(registry, vec![handle.mirror()]);

    let families = metrics_store.collect();
    assert_eq!(families.len(), 1);
    let pods: Vec<&str> = families[0]
        .metrics
        .iter()
        .filter_map(|metric| metric.label("pod"))
        .collect();
    assert_eq!(pods, vec!["a", "c"]);
    handle.shutdown().await;
}

#[tokio::test]
async fn objects_of_another_kind_are_skipped() {
    let store = MemoryObjectStore::new();
    store.upsert(pod("a"));
    store.upsert(Node::new(ObjectMeta::named(None, "n1", "uid-n1")));
    let pods = synced(&store, ResourceKind::Pod, None).await;
    let nodes = synced(&store, ResourceKind::Node, None).await;

    let registry = pod_registry(&[], &[]).expect("pod registry");
    let metrics_store = MetricsStore::new(registry, vec![pods.mirror(), nodes.mirror()]);
    let families = metrics_store.collect();
    let created = families
        .iter()
        .find(|family| family.name == POD_CREATED)
        .expect("created family");
    assert_eq!(created.metrics.len(), 1);
    assert_eq!(created.metrics[0].label("pod"), Some("a"));
    assert_eq!(created.metrics[0].value, 1_672_531_200.0);

    pods.shutdown().await;
    nodes.shutdown().await;
}

#[tokio::test]
async fn failing_kind_does_not_block_the_others() {
    let store = MemoryObjectStore::new();
    store.upsert(pod("a"));
    store.upsert(Node::new(ObjectMeta::named(None, "n1", "uid-n1")));

    let pods = synced(&store, ResourceKind::Pod, None).await;
    let broken = ListWatch::new(
        Arc::new(store.clone()),
        ResourceKind::Node,
        None,
        Some("bogus=1"),
    );
    let nodes = Reflector::new(Arc::new(broken), fast_config()).spawn();

    timeout(Duration::from_secs(5), async {
        while nodes.status().consecutive_list_failures < LIST_FAILURE_THRESHOLD {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node lists keep failing");

    let statuses = vec![pods.status(), nodes.status()];
    let report = readiness_report(&statuses);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(!nodes.status().synced);
    assert!(pods.status().synced);

    let registry = pod_registry(&[], &[]).expect("pod registry");
    let metrics_store = MetricsStore::new(registry, vec![pods.mirror()]);
    let created = metrics_store
        .collect()
        .into_iter()
        .find(|family| family.name == POD_CREATED)
        .expect("created family");
    assert_eq!(created.metrics.len(), 1);

    store.upsert(pod("b"));
    timeout(Duration::from_secs(5), async {
        while pods.mirror().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pod reflector keeps following");

    pods.shutdown().await;
    nodes.shutdown().await;
}
