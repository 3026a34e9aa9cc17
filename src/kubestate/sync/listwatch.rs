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


use crate::kubestate::client::{ListFuture, ListOptions, ObjectStoreClient, WatchFuture};
use crate::kubestate::k8s::ResourceKind;

use std::fmt;
use std::sync::Arc;

/// List and watch capabilities for one resource collection scope. Holds no
/// mutable state, so the synchronizer may re-invoke it for every session.
pub trait ListerWatcher: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Namespace scope, `None` when the collection spans the cluster.
    fn namespace(&self) -> Option<&str>;

    fn list(&self, options: ListOptions) -> ListFuture<'_>;

    fn watch(&self, options: ListOptions) -> WatchFuture<'_>;
}

/// [`ListerWatcher`] scoped by an optional namespace and field selector.
#[derive(Clone)]
pub struct ListWatch {
    client: Arc<dyn ObjectStoreClient>,
    kind: ResourceKind,
    namespace: Option<String>,
    field_selector: Option<String>,
}

impl ListWatch {
    /// The namespace is ignored for cluster-scoped kinds; blank values mean
    /// "unscoped".
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        kind: ResourceKind,
        namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Self {
        let namespace = namespace
            .map(str::trim)
            .filter(|ns| !ns.is_empty() && kind.is_namespaced())
            .map(str::to_string);
        let field_selector = field_selector
            .map(str::trim)
            .filter(|selector| !selector.is_empty())
            .map(str::to_string);
        Self {
            client,
            kind,
            namespace,
            field_selector,
        }
    }

    pub fn field_selector(&self) -> Option<&str> {
        self.field_selector.as_deref()
    }

    fn scoped(&self, mut options: ListOptions) -> ListOptions {
        options.namespace = self.namespace.clone();
        options.field_selector = self.field_selector.clone();
        options
    }
}

impl ListerWatcher for ListWatch {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn list(&self, options: ListOptions) -> ListFuture<'_> {
        self.client.list(self.kind, self.scoped(options))
    }

    fn watch(&self, options: ListOptions) -> WatchFuture<'_> {
        self.client.watch(self.kind, self.scoped(options))
    }
}

impl fmt::Debug for ListWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListWatch")
            .field("kind", &self.kind)
            .field("namespace", &self.namespace)
            .field("field_selector", &self.field_selector)
            .finish_non_exhaustive()
    }
}
