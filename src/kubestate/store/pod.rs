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


//! Pod metric families.

use crate::kubestate::client::ObjectStoreClient;
use crate::kubestate::generator::{adapt, FamilyGenerator, GeneratorRegistry, RegistryError};
use crate::kubestate::k8s::pod::{Pod, CONTAINERS_READY, POD_READY};
use crate::kubestate::k8s::ResourceKind;
use crate::kubestate::metric::labels::allowed_kube_labels;
use crate::kubestate::metric::{Metric, MetricType};
use crate::kubestate::store::unix_timestamp;
use crate::kubestate::sync::ListWatch;

use std::sync::Arc;

pub const POD_STATUS_READY_TIME: &str = "kube_pod_status_ready_time";
pub const POD_STATUS_CONTAINERS_READY_TIME: &str = "kube_pod_status_containers_ready_time";
pub const POD_CREATED: &str = "kube_pod_created";
pub const POD_LABELS: &str = "kube_pod_labels";
pub const POD_ANNOTATIONS: &str = "kube_pod_annotations";

/// Pod generators. The label and annotation families are only included
/// when their allow-list is non-empty.
pub fn pod_metric_families(
    allow_annotations: &[String],
    allow_labels: &[String],
) -> Vec<FamilyGenerator> {
    let mut families = vec![
        status_ready_time_family(),
        status_containers_ready_time_family(),
        created_family(),
    ];
    if !allow_annotations.is_empty() {
        families.push(annotations_family(allow_annotations.to_vec()));
    }
    if !allow_labels.is_empty() {
        families.push(labels_family(allow_labels.to_vec()));
    }
    families
}

/// Registry holding every pod family under the pod identity labels.
pub fn pod_registry(
    allow_annotations: &[String],
    allow_labels: &[String],
) -> Result<GeneratorRegistry, RegistryError> {
    let mut registry = GeneratorRegistry::for_resource::<Pod>()?;
    registry.register_all(pod_metric_families(allow_annotations, allow_labels))?;
    Ok(registry)
}

pub fn create_pod_list_watch(
    client: Arc<dyn ObjectStoreClient>,
    namespace: Option<&str>,
    field_selector: Option<&str>,
) -> ListWatch {
    ListWatch::new(client, ResourceKind::Pod, namespace, field_selector)
}

fn condition_time_metrics(pod: &Pod, condition_type: &str) -> Vec<Metric> {
    pod.conditions()
        .iter()
        .filter(|condition| condition.condition_type == condition_type)
        .filter_map(|condition| unix_timestamp(condition.last_transition_time.as_deref()))
        .map(Metric::new)
        .collect()
}

fn status_ready_time_family() -> FamilyGenerator {
    FamilyGenerator::new(
        POD_STATUS_READY_TIME,
        "Readiness achieved time in unix timestamp for a pod.",
        MetricType::Gauge,
        "",
        adapt(|pod: &Pod| condition_time_metrics(pod, POD_READY)),
    )
}

fn status_containers_ready_time_family() -> FamilyGenerator {
    FamilyGenerator::new(
        POD_STATUS_CONTAINERS_READY_TIME,
        "Readiness achieved time in unix timestamp for a pod containers.",
        MetricType::Gauge,
        "",
        adapt(|pod: &Pod| condition_time_metrics(pod, CONTAINERS_READY)),
    )
}

fn created_family() -> FamilyGenerator {
    FamilyGenerator::new(
        POD_CREATED,
        "Unix creation timestamp",
        MetricType::Gauge,
        "",
        adapt(|pod: &Pod| {
            unix_timestamp(pod.metadata.creation_timestamp.as_deref())
                .map(Metric::new)
                .into_iter()
                .collect()
        }),
    )
}

fn annotations_family(allow_annotations: Vec<String>) -> FamilyGenerator {
    FamilyGenerator::new(
        POD_ANNOTATIONS,
        "Kubernetes annotations converted to Prometheus labels.",
        MetricType::Gauge,
        "",
        adapt(move |pod: &Pod| {
            let (keys, values) =
                allowed_kube_labels("annotation", &pod.metadata.annotations, &allow_annotations);
            vec![Metric::with_labels(keys, values, 1.0)]
        }),
    )
}

fn labels_family(allow_labels: Vec<String>) -> FamilyGenerator {
    FamilyGenerator::new(
        POD_LABELS,
        "Kubernetes labels converted to Prometheus labels.",
        MetricType::Gauge,
        "",
        adapt(move |pod: &Pod| {
            let (keys, values) = allowed_kube_labels("label", &pod.metadata.labels, &allow_labels);
            vec![Metric::with_labels(keys, values, 1.0)]
        }),
    )
}
