/*
 * Copyright (C) 2024 The Kubestate Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */


//! Node metric families. Nodes are cluster-scoped, so their identity labels
//! are `node` and `uid` only.

use crate::kubestate::client::ObjectStoreClient;
use crate::kubestate::generator::{adapt, FamilyGenerator, GeneratorRegistry, RegistryError};
use crate::kubestate::k8s::node::{Node, NODE_READY};
use crate::kubestate::k8s::ResourceKind;
use crate::kubestate::metric::labels::allowed_kube_labels;
use crate::kubestate::metric::{Metric, MetricType};
use crate::kubestate::store::unix_timestamp;
use crate::kubestate::sync::ListWatch;

use std::sync::Arc;

pub const NODE_CREATED: &str = "kube_node_created";
pub const NODE_STATUS_READY_TIME: &str = "kube_node_status_ready_time";
pub const NODE_LABELS: &str = "kube_node_labels";

pub fn node_metric_families(allow_labels: &[String]) -> Vec<FamilyGenerator> {
    let mut families = vec![
        FamilyGenerator::new(
            NODE_CREATED,
            "Unix creation timestamp",
            MetricType::Gauge,
            "",
            adapt(|node: &Node| {
                unix_timestamp(node.metadata.creation_timestamp.as_deref())
                    .map(Metric::new)
                    .into_iter()
                    .collect()
            }),
        ),
        FamilyGenerator::new(
            NODE_STATUS_READY_TIME,
            "Time in unix timestamp when the node last changed its Ready condition.",
            MetricType::Gauge,
            "",
            adapt(|node: &Node| {
                node.conditions()
                    .iter()
                    .filter(|condition| condition.condition_type == NODE_READY)
                    .filter_map(|condition| {
                        unix_timestamp(condition.last_transition_time.as_deref())
                    })
                    .map(Metric::new)
                    .collect()
            }),
        ),
    ];
    if !allow_labels.is_empty() {
        let allow_labels = allow_labels.to_vec();
        families.push(FamilyGenerator::new(
            NODE_LABELS,
            "Kubernetes labels converted to Prometheus labels.",
            MetricType::Gauge,
            "",
            adapt(move |node: &Node| {
                let (keys, values) =
                    allowed_kube_labels("label", &node.metadata.labels, &allow_labels);
                vec![Metric::with_labels(keys, values, 1.0)]
            }),
        ));
    }
    families
}

pub fn node_registry(allow_labels: &[String]) -> Result<GeneratorRegistry, RegistryError> {
    let mut registry = GeneratorRegistry::for_resource::<Node>()?;
    registry.register_all(node_metric_families(allow_labels))?;
    Ok(registry)
}

/// Nodes have no namespace; only the field selector scopes the collection.
pub fn create_node_list_watch(
    client: Arc<dyn ObjectStoreClient>,
    field_selector: Option<&str>,
) -> ListWatch {
    ListWatch::new(client, ResourceKind::Node, None, field_selector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubestate::k8s::node::{NodeCondition, NodeStatus};
    use crate::kubestate::k8s::{ObjectMeta, ResourceObject};

    fn node() -> Node {
        let mut metadata = ObjectMeta::named(None, "worker-1", "n-uid");
        metadata.creation_timestamp = Some("2023-01-01T00:00:00Z".to_string());
        metadata.labels.insert(
            "kubernetes.io/hostname".to_string(),
            "worker-1".to_string(),
        );
        let mut node = Node::new(metadata);
        node.status = Some(NodeStatus {
            conditions: vec![NodeCondition {
                condition_type: NODE_READY.to_string(),
                status: "True".to_string(),
                last_transition_time: Some("2023-01-01T00:05:00Z".to_string()),
            }],
        });
        node
    }

    #[test]
    fn identity_labels_omit_namespace() {
        let registry = node_registry(&["*".to_string()]).unwrap();
        let object: ResourceObject = node().into();
        let families: Vec<_> = registry
            .generators()
            .iter()
            .map(|generator| {
                generator
                    .generate(&object, registry.default_labels())
                    .expect("node extraction")
            })
            .collect();

        assert_eq!(families.len(), 3);
        let created = &families[0].metrics[0];
        assert_eq!(created.label_keys, vec!["node", "uid"]);
        assert_eq!(created.label_values, vec!["worker-1", "n-uid"]);
        assert_eq!(created.value, 1_672_531_200.0);
        assert_eq!(families[1].metrics[0].value, 1_672_531_500.0);
        assert_eq!(
            families[2].metrics[0].label("label_kubernetes_io_hostname"),
            Some("worker-1")
        );
    }

    #[test]
    fn pods_are_rejected_by_node_families() {
        use crate::kubestate::k8s::pod::{Pod, PodSpec};

        let registry = node_registry(&[]).unwrap();
        let pod: ResourceObject =
            Pod::new(ObjectMeta::named(Some("ns"), "p", "u"), PodSpec::default()).into();
        let err = registry.generators()[0]
            .generate(&pod, registry.default_labels())
            .unwrap_err();
        assert_eq!(err.reason(), "type_mismatch");
    }
}
