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

use crate::kubestate::k8s::object::{ObjectMeta, Resource, ResourceKind, ResourceObject};

use serde::{Deserialize, Serialize};

pub const POD_READY: &str = "Ready";
pub const CONTAINERS_READY: &str = "ContainersReady";

fn default_api_version() -> String {
    "v1".to_string()
}

/// Minimal container specification derived from Kubernetes `Container`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Pod specification fields relevant to metric extraction and filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerSpec>,
    #[serde(rename = "nodeName", skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

impl Pod {
    pub fn new(metadata: ObjectMeta, spec: PodSpec) -> Self {
        Self {
            api_version: default_api_version(),
            metadata,
            spec,
            status: None,
        }
    }

    pub fn with_status(mut self, status: PodStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn conditions(&self) -> &[PodCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }
}

impl Resource for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;
    const DEFAULT_LABELS: &'static [&'static str] = &["namespace", "pod", "uid"];

    fn narrow(object: &ResourceObject) -> Option<&Self> {
        match object {
            ResourceObject::Pod(pod) => Some(pod),
            _ => None,
        }
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn identity_values(&self) -> Vec<String> {
        vec![
            self.metadata.namespace.clone().unwrap_or_default(),
            self.metadata.name.clone().unwrap_or_default(),
            self.metadata.uid.clone().unwrap_or_default(),
        ]
    }
}

impl From<Pod> for ResourceObject {
    fn from(pod: Pod) -> Self {
        ResourceObject::Pod(pod)
    }
}

/// Runtime status snapshot for the pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PodStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(rename = "conditions", default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PodCondition>,
    #[serde(
        rename = "containerStatuses",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(rename = "restartCount", default)]
    pub restart_count: u32,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PodCondition {
    pub fn new(condition_type: &str, status: &str, last_transition_time: Option<&str>) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            last_transition_time: last_transition_time.map(|value| value.to_string()),
            reason: None,
            message: None,
        }
    }
}
