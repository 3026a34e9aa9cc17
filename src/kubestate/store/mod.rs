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


//! Per-kind metric family sets and the collection pass over local mirrors.

pub mod metrics_store;
pub mod node;
pub mod pod;

pub use metrics_store::MetricsStore;

use crate::kubestate::generator::GeneratorRegistry;
use crate::kubestate::k8s::ResourceObject;
use crate::kubestate::logger::log_warn;
use crate::kubestate::metric::Family;
use crate::kubestate::observability::metrics;
use crate::kubestate::sync::Mirror;

use chrono::DateTime;
use std::sync::Arc;

/// Runs every generator of `registry` over the objects held by `mirrors`.
///
/// Returns one family per generator in registration order; objects are
/// visited in key order. An object whose extraction fails is logged and
/// skipped for that family only. Reads never wait on synchronization.
pub fn collect(registry: &GeneratorRegistry, mirrors: &[Arc<Mirror>]) -> Vec<Family> {
    let objects = snapshot_all(mirrors);
    registry
        .generators()
        .iter()
        .map(|generator| {
            let mut family = Family::new(
                generator.name(),
                generator.help(),
                generator.metric_type(),
            );
            for object in &objects {
                match generator.generate(object, registry.default_labels()) {
                    Ok(generated) => family.metrics.extend(generated.metrics),
                    Err(err) => {
                        let key = object.key();
                        let message = err.to_string();
                        log_warn(
                            "store",
                            "Skipping object for metric family",
                            &[
                                ("family", generator.name()),
                                ("object", key.as_str()),
                                ("reason", err.reason()),
                                ("error", message.as_str()),
                            ],
                        );
                        metrics::record_extraction_error(generator.name(), err.reason());
                    }
                }
            }
            family
        })
        .collect()
}

fn snapshot_all(mirrors: &[Arc<Mirror>]) -> Vec<Arc<ResourceObject>> {
    let mut objects: Vec<(String, Arc<ResourceObject>)> = mirrors
        .iter()
        .flat_map(|mirror| mirror.snapshot())
        .map(|object| (object.key(), object))
        .collect();
    objects.sort_by(|a, b| a.0.cmp(&b.0));
    objects.into_iter().map(|(_, object)| object).collect()
}

/// Seconds since the Unix epoch for an RFC 3339 timestamp. Absent or
/// unparsable input yields `None` so no metric is emitted.
pub(crate) fn unix_timestamp(raw: Option<&str>) -> Option<f64> {
    let parsed = DateTime::parse_from_rfc3339(raw?.trim()).ok()?;
    Some(parsed.timestamp() as f64)
}
