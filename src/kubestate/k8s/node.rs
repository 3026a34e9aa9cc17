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

//! Cluster-scoped node objects. Their identity label set has no namespace.

use crate::kubestate::k8s::object::{ObjectMeta, Resource, ResourceKind, ResourceObject};

use serde::{Deserialize, Serialize};

pub const NODE_READY: &str = "Ready";

fn default_api_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "is_false")]
    pub unschedulable: bool,
    #[serde(rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

const fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<NodeCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

impl Node {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: default_api_version(),
            metadata,
            spec: NodeSpec::default(),
            status: None,
        }
    }

    pub fn conditions(&self) -> &[NodeCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }
}

impl Resource for Node {
    const KIND: ResourceKind = ResourceKind::Node;
    const DEFAULT_LABELS: &'static [&'static str] = &["node", "uid"];

    fn narrow(object: &ResourceObject) -> Option<&Self> {
        match object {
            ResourceObject::Node(node) => Some(node),
            _ => None,
        }
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn identity_values(&self) -> Vec<String> {
        vec![
            self.metadata.name.clone().unwrap_or_default(),
            self.metadata.uid.clone().unwrap_or_default(),
        ]
    }
}

impl From<Node> for ResourceObject {
    fn from(node: Node) -> Self {
        ResourceObject::Node(node)
    }
}
