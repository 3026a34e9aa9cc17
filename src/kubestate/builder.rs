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


//! Wires an object store client and [`Options`] into reflectors and stores.

use crate::kubestate::client::ObjectStoreClient;
use crate::kubestate::config::Options;
use crate::kubestate::generator::{GeneratorRegistry, RegistryError};
use crate::kubestate::k8s::ResourceKind;
use crate::kubestate::logger::{log_info, log_warn, set_log_format};
use crate::kubestate::metric::Family;
use crate::kubestate::observability::health::{readiness_report, HealthReport};
use crate::kubestate::store::node::{create_node_list_watch, node_registry};
use crate::kubestate::store::pod::{create_pod_list_watch, pod_registry};
use crate::kubestate::store::MetricsStore;
use crate::kubestate::sync::{
    ListWatch, Reflector, ReflectorConfig, ReflectorHandle, ReflectorStatus,
};
use crate::kubestate::util::error::{new_error, with_context, BoxError};

use std::sync::Arc;

pub struct Builder {
    client: Arc<dyn ObjectStoreClient>,
    options: Options,
    reflector_config: ReflectorConfig,
}

impl Builder {
    pub fn new(client: Arc<dyn ObjectStoreClient>, options: Options) -> Self {
        let reflector_config = ReflectorConfig {
            resync_period: options.resync_period,
            ..ReflectorConfig::default()
        };
        Self {
            client,
            options,
            reflector_config,
        }
    }

    /// Overrides paging and backoff settings. The resync period always
    /// comes from the options.
    pub fn with_reflector_config(mut self, config: ReflectorConfig) -> Self {
        self.reflector_config = ReflectorConfig {
            resync_period: self.options.resync_period,
            ..config
        };
        self
    }

    pub fn build(self) -> Result<MetricsHandler, BoxError> {
        if self.options.resources.is_empty() {
            return Err(new_error("no resources enabled"));
        }
        set_log_format(self.options.log_format);
        let filter = self
            .options
            .family_filter()
            .map_err(|err| with_context(err, "loading metric family filter"))?;

        let mut stores = Vec::with_capacity(self.options.resources.len());
        let mut reflectors = Vec::new();
        for &kind in &self.options.resources {
            let registry = self
                .registry_for(kind)
                .map_err(|err| {
                    with_context(err, format!("building {} metric families", kind.plural()))
                })?
                .filter(&filter);

            let mut mirrors = Vec::new();
            for namespace in self.options.namespace_scopes(kind) {
                let list_watch = self.list_watch_for(kind, namespace.as_deref());
                let reflector =
                    Reflector::new(Arc::new(list_watch), self.reflector_config.clone());
                mirrors.push(reflector.mirror());
                reflectors.push(reflector);
            }

            let families = registry.len().to_string();
            let scopes = mirrors.len().to_string();
            log_info(
                "builder",
                "Configured metric store",
                &[
                    ("resource", kind.plural()),
                    ("families", families.as_str()),
                    ("scopes", scopes.as_str()),
                ],
            );
            stores.push(MetricsStore::new(registry, mirrors));
        }

        Ok(MetricsHandler {
            stores,
            pending: reflectors,
            handles: Vec::new(),
        })
    }

    fn registry_for(&self, kind: ResourceKind) -> Result<GeneratorRegistry, RegistryError> {
        match kind {
            ResourceKind::Pod => pod_registry(
                self.options.allowed_annotations(kind),
                self.options.allowed_labels(kind),
            ),
            ResourceKind::Node => {
                if !self.options.allowed_annotations(kind).is_empty() {
                    log_warn(
                        "builder",
                        "Ignoring annotation allow-list for resource without annotation metrics",
                        &[("resource", kind.plural())],
                    );
                }
                node_registry(self.options.allowed_labels(kind))
            }
        }
    }

    fn list_watch_for(&self, kind: ResourceKind, namespace: Option<&str>) -> ListWatch {
        let client = Arc::clone(&self.client);
        let field_selector = self.options.field_selector(kind);
        match kind {
            ResourceKind::Pod => create_pod_list_watch(client, namespace, field_selector),
            ResourceKind::Node => create_node_list_watch(client, field_selector),
        }
    }
}

/// Running set of reflectors plus the stores reading their mirrors.
pub struct MetricsHandler {
    stores: Vec<MetricsStore>,
    pending: Vec<Reflector>,
    handles: Vec<ReflectorHandle>,
}

impl MetricsHandler {
    /// Spawns every reflector that has not been started yet.
    pub fn start(&mut self) {
        for reflector in self.pending.drain(..) {
            self.handles.push(reflector.spawn());
        }
    }

    pub fn stores(&self) -> &[MetricsStore] {
        &self.stores
    }

    /// Current families of every enabled resource, in configured order.
    pub fn collect(&self) -> Vec<Family> {
        self.stores.iter().flat_map(MetricsStore::collect).collect()
    }

    pub fn statuses(&self) -> Vec<ReflectorStatus> {
        let started = self.handles.iter().map(ReflectorHandle::status);
        let pending = self.pending.iter().map(|reflector| {
            let mirror = reflector.mirror();
            ReflectorStatus::new(mirror.kind(), mirror.namespace())
        });
        started.chain(pending).collect()
    }

    pub fn readiness(&self) -> HealthReport {
        readiness_report(&self.statuses())
    }

    /// Waits until every started reflector has completed its first list.
    pub async fn wait_for_sync(&self) -> bool {
        for handle in &self.handles {
            if !handle.wait_for_sync().await {
                return false;
            }
        }
        self.pending.is_empty()
    }

    /// Stops every reflector. Collection keeps serving the last mirror state.
    pub async fn shutdown(&self) {
        for handle in &self.handles {
            handle.shutdown().await;
        }
    }
}
