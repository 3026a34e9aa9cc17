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


//! Local mirror of one resource collection scope.
//!
//! Entries are immutable `Arc` snapshots replaced wholesale on every write,
//! so a reader holding an entry never observes a partially applied update.
//! Only the owning reflector mutates the mirror.

use crate::kubestate::client::{WatchEvent, WatchEventType};
use crate::kubestate::k8s::{ResourceKind, ResourceObject};
use crate::kubestate::observability::metrics;

use futures_core::Stream;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq)]
pub enum MirrorEvent {
    Added(Arc<ResourceObject>),
    Updated {
        old: Arc<ResourceObject>,
        new: Arc<ResourceObject>,
    },
    Deleted(Arc<ResourceObject>),
    /// Periodic re-announcement of an unchanged object.
    Resync(Arc<ResourceObject>),
}

impl MirrorEvent {
    pub fn object(&self) -> &Arc<ResourceObject> {
        match self {
            MirrorEvent::Added(object)
            | MirrorEvent::Deleted(object)
            | MirrorEvent::Resync(object) => object,
            MirrorEvent::Updated { new, .. } => new,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStreamError {
    /// The subscriber fell behind and missed this many notifications.
    Lagged(u64),
}

impl fmt::Display for ChangeStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStreamError::Lagged(count) => {
                write!(f, "mirror subscriber lagged by {count} notifications")
            }
        }
    }
}

impl Error for ChangeStreamError {}

pub type ChangeStream =
    Pin<Box<dyn Stream<Item = Result<MirrorEvent, ChangeStreamError>> + Send>>;

/// Differences applied by a relist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug)]
pub struct Mirror {
    kind: ResourceKind,
    namespace: Option<String>,
    objects: RwLock<HashMap<String, Arc<ResourceObject>>>,
    events: broadcast::Sender<MirrorEvent>,
}

impl Mirror {
    pub fn new(kind: ResourceKind, namespace: Option<&str>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            objects: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResourceObject>> {
        self.read().get(key).cloned()
    }

    /// Point-in-time copy of every entry, ordered by object key.
    pub fn snapshot(&self) -> Vec<Arc<ResourceObject>> {
        let mut entries: Vec<(String, Arc<ResourceObject>)> = self
            .read()
            .iter()
            .map(|(key, object)| (key.clone(), Arc::clone(object)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, object)| object).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Change notifications. Slow subscribers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }

    /// Change notifications as a stream. The stream ends once the mirror is
    /// dropped; a lagging consumer gets one `Lagged` item and continues.
    pub fn changes(&self) -> ChangeStream {
        let stream = BroadcastStream::new(self.events.subscribe()).map(|result| match result {
            Ok(event) => Ok(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                Err(ChangeStreamError::Lagged(skipped))
            }
        });
        Box::pin(stream)
    }

    /// Applies one watch event. Returns `false` for bookmarks and deletes of
    /// unknown objects.
    pub(crate) fn apply(&self, event: WatchEvent) -> bool {
        let key = event.object.key();
        let notification = {
            let mut objects = self.write();
            match event.event_type {
                WatchEventType::Added | WatchEventType::Modified => {
                    let object = Arc::new(event.object);
                    match objects.insert(key, Arc::clone(&object)) {
                        Some(old) => MirrorEvent::Updated { old, new: object },
                        None => MirrorEvent::Added(object),
                    }
                }
                WatchEventType::Deleted => match objects.remove(&key) {
                    Some(old) => MirrorEvent::Deleted(old),
                    None => return false,
                },
                WatchEventType::Bookmark => return false,
            }
        };
        self.publish_size();
        let _ = self.events.send(notification);
        true
    }

    /// Swaps in a fresh list snapshot, notifying only the differences.
    /// Entries missing from `objects` are deleted.
    pub(crate) fn replace(&self, objects: Vec<ResourceObject>) -> ReplaceSummary {
        let mut summary = ReplaceSummary::default();
        let mut notifications = Vec::new();
        {
            let mut current = self.write();
            let mut next: HashMap<String, Arc<ResourceObject>> =
                HashMap::with_capacity(objects.len());
            for object in objects {
                let key = object.key();
                let object = Arc::new(object);
                match current.remove(&key) {
                    Some(old) if *old == *object => {
                        next.insert(key, old);
                    }
                    Some(old) => {
                        summary.updated += 1;
                        notifications.push(MirrorEvent::Updated {
                            old,
                            new: Arc::clone(&object),
                        });
                        next.insert(key, object);
                    }
                    None => {
                        summary.added += 1;
                        notifications.push(MirrorEvent::Added(Arc::clone(&object)));
                        next.insert(key, object);
                    }
                }
            }
            let mut stale: Vec<(String, Arc<ResourceObject>)> = current.drain().collect();
            stale.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, old) in stale {
                summary.deleted += 1;
                notifications.push(MirrorEvent::Deleted(old));
            }
            *current = next;
        }
        self.publish_size();
        for notification in notifications {
            let _ = self.events.send(notification);
        }
        summary
    }

    /// Re-announces every entry and returns how many were sent.
    pub(crate) fn resync(&self) -> usize {
        let snapshot = self.snapshot();
        let count = snapshot.len();
        for object in snapshot {
            let _ = self.events.send(MirrorEvent::Resync(object));
        }
        count
    }

    fn publish_size(&self) {
        metrics::set_mirror_objects(self.kind.plural(), self.namespace(), self.len());
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ResourceObject>>> {
        self.objects.read().expect("mirror lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ResourceObject>>> {
        self.objects.write().expect("mirror lock poisoned")
    }
}
