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


use crate::kubestate::generator::GeneratorRegistry;
use crate::kubestate::k8s::ResourceKind;
use crate::kubestate::metric::Family;
use crate::kubestate::store::collect;
use crate::kubestate::sync::Mirror;

use std::sync::Arc;

/// Generator set of one resource kind bound to the mirrors feeding it.
#[derive(Clone, Debug)]
pub struct MetricsStore {
    registry: GeneratorRegistry,
    mirrors: Vec<Arc<Mirror>>,
}

impl MetricsStore {
    pub fn new(registry: GeneratorRegistry, mirrors: Vec<Arc<Mirror>>) -> Self {
        Self { registry, mirrors }
    }

    pub fn kind(&self) -> ResourceKind {
        self.registry.kind()
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    pub fn mirrors(&self) -> &[Arc<Mirror>] {
        &self.mirrors
    }

    pub fn object_count(&self) -> usize {
        self.mirrors.iter().map(|mirror| mirror.len()).sum()
    }

    pub fn collect(&self) -> Vec<Family> {
        collect(&self.registry, &self.mirrors)
    }
}
