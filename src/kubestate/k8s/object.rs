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

use crate::kubestate::k8s::node::Node;
use crate::kubestate::k8s::pod::Pod;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Minimal representation of Kubernetes object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: Option<String>,
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "resourceVersion", skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(rename = "creationTimestamp", skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

impl ObjectMeta {
    pub fn named(namespace: Option<&str>, name: &str, uid: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            namespace: namespace.map(|ns| ns.to_string()),
            uid: Some(uid.to_string()),
            ..Self::default()
        }
    }
}

/// Metadata included with list responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListMeta {
    #[serde(rename = "resourceVersion", skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    #[serde(rename = "remainingItemCount", skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Node,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Node => "Node",
        }
    }

    /// Lowercase plural used in configuration and metric labels.
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Node => "nodes",
        }
    }

    pub fn from_plural(value: &str) -> Option<Self> {
        match value.trim() {
            "pods" => Some(ResourceKind::Pod),
            "nodes" => Some(ResourceKind::Node),
            _ => None,
        }
    }

    pub fn is_namespaced(self) -> bool {
        matches!(self, ResourceKind::Pod)
    }

    /// Identity label keys declared by the typed resource of this kind.
    pub fn default_labels(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Pod => Pod::DEFAULT_LABELS,
            ResourceKind::Node => Node::DEFAULT_LABELS,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped object as delivered by the synchronization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResourceObject {
    Pod(Pod),
    Node(Node),
}

impl ResourceObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceObject::Pod(_) => ResourceKind::Pod,
            ResourceObject::Node(_) => ResourceKind::Node,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ResourceObject::Pod(pod) => &pod.metadata,
            ResourceObject::Node(node) => &node.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ResourceObject::Pod(pod) => &mut pod.metadata,
            ResourceObject::Node(node) => &mut node.metadata,
        }
    }

    /// `<namespace>/<name>` for namespaced objects, `<name>` otherwise.
    pub fn key(&self) -> String {
        object_key(self.metadata())
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    /// Resolves a field path understood by field selectors.
    pub fn field(&self, path: &str) -> Option<&str> {
        let metadata = self.metadata();
        match (path, self) {
            ("metadata.name", _) => metadata.name.as_deref(),
            ("metadata.namespace", _) => metadata.namespace.as_deref(),
            ("spec.nodeName", ResourceObject::Pod(pod)) => pod.spec.node_name.as_deref(),
            ("status.phase", ResourceObject::Pod(pod)) => pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref()),
            _ => None,
        }
    }
}

pub fn object_key(metadata: &ObjectMeta) -> String {
    let name = metadata.name.as_deref().unwrap_or_default();
    match metadata.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_string(),
    }
}

/// Typed view over one variant of [`ResourceObject`].
pub trait Resource: Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Identity label keys for this kind, in the order values are produced.
    const DEFAULT_LABELS: &'static [&'static str];

    fn narrow(object: &ResourceObject) -> Option<&Self>;

    fn metadata(&self) -> &ObjectMeta;

    /// Identity label values aligned with [`Resource::DEFAULT_LABELS`].
    fn identity_values(&self) -> Vec<String>;
}

/// Builds the immutable identity label set injected into a registry.
pub fn default_label_keys<R: Resource>() -> Arc<[String]> {
    R::DEFAULT_LABELS
        .iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatchError {
    pub expected: ResourceKind,
    pub actual: ResourceKind,
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} object but received {}",
            self.expected, self.actual
        )
    }
}

impl Error for TypeMismatchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubestate::k8s::node::Node;
    use crate::kubestate::k8s::pod::{Pod, PodSpec};

    #[test]
    fn keys_omit_namespace_for_cluster_scoped_objects() {
        let pod = ResourceObject::Pod(Pod::new(
            ObjectMeta::named(Some("ns1"), "p1", "abc"),
            PodSpec::default(),
        ));
        let node = ResourceObject::Node(Node::new(ObjectMeta::named(None, "n1", "def")));

        assert_eq!(pod.key(), "ns1/p1");
        assert_eq!(node.key(), "n1");
        assert_eq!(pod.kind(), ResourceKind::Pod);
        assert_eq!(node.kind(), ResourceKind::Node);
    }

    #[test]
    fn objects_round_trip_through_kind_tag() {
        let raw = r#"{
            "kind": "Pod",
            "apiVersion": "v1",
            "metadata": {"name": "p1", "namespace": "ns1", "uid": "abc"},
            "spec": {"nodeName": "n1"},
            "status": {"phase": "Running"}
        }"#;
        let object: ResourceObject = serde_json::from_str(raw).expect("pod decodes");
        assert_eq!(object.kind(), ResourceKind::Pod);
        assert_eq!(object.field("spec.nodeName"), Some("n1"));
        assert_eq!(object.field("status.phase"), Some("Running"));
        assert_eq!(object.field("status.podIP"), None);
    }

    #[test]
    fn kinds_parse_from_plural_names() {
        assert_eq!(ResourceKind::from_plural("pods"), Some(ResourceKind::Pod));
        assert_eq!(ResourceKind::from_plural(" nodes "), Some(ResourceKind::Node));
        assert_eq!(ResourceKind::from_plural("secrets"), None);
        assert!(!ResourceKind::Node.is_namespaced());
    }
}
