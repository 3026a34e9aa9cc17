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

use crate::kubestate::generator::ExtractError;
use crate::kubestate::k8s::{Resource, ResourceObject, TypeMismatchError};
use crate::kubestate::metric::labels::{merge_key_values, LabelCollisionError};
use crate::kubestate::metric::Metric;

use std::sync::Arc;

/// Untyped extraction: object plus identity label keys to composed metrics.
pub type GenerateFn =
    Arc<dyn Fn(&ResourceObject, &[String]) -> Result<Vec<Metric>, ExtractError> + Send + Sync>;

/// Adapts a typed extraction function to untyped store objects.
///
/// The object is narrowed to `R` (a [`TypeMismatchError`] otherwise), the
/// extraction runs against the borrowed snapshot, and every returned metric
/// gets the identity labels of `R` merged in front of its own labels. A
/// collision fails the whole object so no partial family leaks out.
pub fn adapt<R, F>(extract: F) -> GenerateFn
where
    R: Resource,
    F: Fn(&R) -> Vec<Metric> + Send + Sync + 'static,
{
    Arc::new(
        move |object: &ResourceObject,
              default_keys: &[String]|
              -> Result<Vec<Metric>, ExtractError> {
            let resource = R::narrow(object).ok_or(TypeMismatchError {
                expected: R::KIND,
                actual: object.kind(),
            })?;

            let identity = identity_by_key(resource, default_keys)?;
            extract(resource)
                .into_iter()
                .map(|metric| -> Result<Metric, ExtractError> {
                    let (label_keys, label_values) = merge_key_values(
                        default_keys,
                        &identity,
                        &metric.label_keys,
                        &metric.label_values,
                    )?;
                    Ok(Metric {
                        label_keys,
                        label_values,
                        value: metric.value,
                    })
                })
                .collect()
        },
    )
}

/// Identity values of `resource` in the order of `keys`, looked up by name.
fn identity_by_key<R: Resource>(
    resource: &R,
    keys: &[String],
) -> Result<Vec<String>, LabelCollisionError> {
    let values = resource.identity_values();
    keys.iter()
        .map(|key| {
            R::DEFAULT_LABELS
                .iter()
                .position(|declared| *declared == key.as_str())
                .and_then(|index| values.get(index).cloned())
                .ok_or_else(|| LabelCollisionError::UnknownIdentity(key.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubestate::k8s::node::Node;
    use crate::kubestate::k8s::object::default_label_keys;
    use crate::kubestate::k8s::pod::{Pod, PodSpec};
    use crate::kubestate::k8s::{ObjectMeta, ResourceKind};

    fn pod_object() -> ResourceObject {
        ResourceObject::Pod(Pod::new(
            ObjectMeta::named(Some("ns1"), "p1", "abc"),
            PodSpec::default(),
        ))
    }

    #[test]
    fn identity_labels_lead_metric_labels() {
        let generate = adapt(|_: &Pod| {
            vec![Metric::with_labels(["condition"], ["Ready"], 1.0)]
        });
        let keys = default_label_keys::<Pod>();
        let metrics = generate(&pod_object(), &keys).expect("extraction succeeds");

        assert_eq!(metrics.len(), 1);
        assert_eq!(
            metrics[0].label_keys,
            vec!["namespace", "pod", "uid", "condition"]
        );
        assert_eq!(metrics[0].label_values, vec!["ns1", "p1", "abc", "Ready"]);
    }

    #[test]
    fn identity_values_follow_key_names_not_positions() {
        let generate = adapt(|_: &Pod| vec![Metric::new(1.0)]);
        let keys: Vec<String> = ["pod", "namespace", "uid"]
            .iter()
            .map(|key| key.to_string())
            .collect();
        let metrics = generate(&pod_object(), &keys).expect("extraction succeeds");
        assert_eq!(metrics[0].label("pod"), Some("p1"));
        assert_eq!(metrics[0].label("namespace"), Some("ns1"));
        assert_eq!(metrics[0].label_values, vec!["p1", "ns1", "abc"]);
    }

    #[test]
    fn keys_outside_the_identity_set_fail_the_object() {
        let generate = adapt(|_: &Pod| vec![Metric::new(1.0)]);
        let keys = vec!["namespace".to_string(), "node".to_string()];
        let err = generate(&pod_object(), &keys).unwrap_err();
        assert_eq!(
            err,
            ExtractError::Labels(LabelCollisionError::UnknownIdentity("node".to_string()))
        );
    }

    #[test]
    fn wrong_kind_is_a_type_mismatch() {
        let generate = adapt(|_: &Pod| vec![Metric::new(1.0)]);
        let node = ResourceObject::Node(Node::new(ObjectMeta::named(None, "n1", "u")));
        let err = generate(&node, &default_label_keys::<Pod>()).unwrap_err();
        assert_eq!(
            err,
            ExtractError::TypeMismatch(TypeMismatchError {
                expected: ResourceKind::Pod,
                actual: ResourceKind::Node,
            })
        );
    }

    #[test]
    fn dynamic_label_collision_fails_the_object() {
        let generate = adapt(|_: &Pod| {
            vec![
                Metric::new(1.0),
                Metric::with_labels(["uid"], ["spoofed"], 2.0),
            ]
        });
        let err = generate(&pod_object(), &default_label_keys::<Pod>()).unwrap_err();
        assert_eq!(
            err,
            ExtractError::Labels(LabelCollisionError::Overlap("uid".to_string()))
        );
    }

    #[test]
    fn adapting_twice_yields_identical_content() {
        let generate = adapt(|pod: &Pod| {
            vec![Metric::with_labels(
                ["phase"],
                [pod.metadata.name.clone().unwrap_or_default()],
                3.0,
            )]
        });
        let object = pod_object();
        let keys = default_label_keys::<Pod>();
        let first = generate(&object, &keys).unwrap();
        let second = generate(&object, &keys).unwrap();
        assert_eq!(first, second);
        assert_eq!(object, pod_object());
    }
}
