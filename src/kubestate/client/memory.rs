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


//! In-process object store with list/watch semantics.
//!
//! Every write bumps a store-wide resource version and is recorded in a
//! bounded history plus a broadcast channel. Watches replay the history after
//! the requested version and then follow the channel. A watch that starts
//! before the oldest retained event fails with [`SyncError::Expired`].

use crate::kubestate::client::{
    ListFuture, ListOptions, ObjectList, ObjectStoreClient, SyncError, WatchEvent,
    WatchEventType, WatchFuture, WatchStream,
};
use crate::kubestate::k8s::node::Node;
use crate::kubestate::k8s::object::ListMeta;
use crate::kubestate::k8s::pagination::{decode_continue_token, encode_continue_token, paginate};
use crate::kubestate::k8s::pod::{Pod, PodSpec};
use crate::kubestate::k8s::selector::FieldSelector;
use crate::kubestate::k8s::{ObjectMeta, ResourceKind, ResourceObject};

use futures_util::stream;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const WATCH_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_HISTORY_LIMIT: usize = 1024;

#[derive(Clone, Debug)]
struct StoredEvent {
    version: u64,
    kind: ResourceKind,
    event_type: WatchEventType,
    object: ResourceObject,
    /// State before a modification, used to translate selector transitions.
    previous: Option<ResourceObject>,
}

#[derive(Clone, Debug)]
enum Signal {
    Event(StoredEvent),
    Disconnect,
}

#[derive(Default)]
struct StoreState {
    version: u64,
    objects: HashMap<ResourceKind, BTreeMap<String, ResourceObject>>,
    history: VecDeque<StoredEvent>,
    /// Highest version no longer present in `history`.
    floor: u64,
}

struct Inner {
    state: Mutex<StoreState>,
    sender: broadcast::Sender<Signal>,
    history_limit: usize,
    pending_list_failures: AtomicU32,
}

/// Shared handle; clones observe the same objects.
#[derive(Clone)]
pub struct MemoryObjectStore {
    inner: Arc<Inner>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                sender,
                history_limit: history_limit.max(1),
                pending_list_failures: AtomicU32::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .expect("memory object store lock poisoned")
    }

    /// Current store-wide resource version.
    pub fn resource_version(&self) -> u64 {
        self.lock().version
    }

    /// Creates or replaces an object, returning the stored copy with its new
    /// resource version.
    pub fn upsert(&self, object: impl Into<ResourceObject>) -> ResourceObject {
        let mut object = object.into();
        let kind = object.kind();
        let key = object.key();

        let mut state = self.lock();
        state.version += 1;
        let version = state.version;
        object.metadata_mut().resource_version = Some(version.to_string());
        let previous = state
            .objects
            .entry(kind)
            .or_default()
            .insert(key, object.clone());
        let event_type = if previous.is_some() {
            WatchEventType::Modified
        } else {
            WatchEventType::Added
        };
        self.record(
            &mut state,
            StoredEvent {
                version,
                kind,
                event_type,
                object: object.clone(),
                previous,
            },
        );
        object
    }

    /// Removes the object stored under `key`, if any.
    pub fn delete(&self, kind: ResourceKind, key: &str) -> Option<ResourceObject> {
        let mut state = self.lock();
        let mut removed = state.objects.get_mut(&kind)?.remove(key)?;
        state.version += 1;
        let version = state.version;
        removed.metadata_mut().resource_version = Some(version.to_string());
        self.record(
            &mut state,
            StoredEvent {
                version,
                kind,
                event_type: WatchEventType::Deleted,
                object: removed.clone(),
                previous: None,
            },
        );
        Some(removed)
    }

    /// Emits a progress notification carrying the current version.
    pub fn bookmark(&self, kind: ResourceKind) {
        let state = self.lock();
        let version = state.version;
        let object = placeholder(kind, version);
        let signal = Signal::Event(StoredEvent {
            version,
            kind,
            event_type: WatchEventType::Bookmark,
            object,
            previous: None,
        });
        // Bookmarks are not replayed, so they bypass the history.
        let _ = self.inner.sender.send(signal);
        drop(state);
    }

    /// Makes the next `count` list calls fail.
    pub fn fail_next_lists(&self, count: u32) {
        self.inner
            .pending_list_failures
            .store(count, Ordering::SeqCst);
    }

    /// Breaks every open watch stream with a stream error.
    pub fn disconnect_watches(&self) {
        let _ = self.inner.sender.send(Signal::Disconnect);
    }

    /// Drops the event history; watches from any earlier version expire.
    pub fn compact(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.floor = state.version;
    }

    fn record(&self, state: &mut StoreState, event: StoredEvent) {
        state.history.push_back(event.clone());
        while state.history.len() > self.inner.history_limit {
            if let Some(dropped) = state.history.pop_front() {
                state.floor = dropped.version;
            }
        }
        // Sent under the lock so receivers observe versions in order.
        let _ = self.inner.sender.send(Signal::Event(event));
    }

    fn take_list_failure(&self) -> bool {
        self.inner
            .pending_list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .is_ok()
    }

    fn list_page(&self, kind: ResourceKind, options: ListOptions) -> Result<ObjectList, SyncError> {
        if self.take_list_failure() {
            return Err(SyncError::List("injected list failure".to_string()));
        }
        let filter = WatchFilter::new(kind, &options).map_err(SyncError::List)?;
        let cursor = match options.continue_token.as_deref() {
            Some(token) if !token.is_empty() => Some(
                decode_continue_token(token, kind)
                    .map_err(|err| SyncError::List(err.to_string()))?,
            ),
            _ => None,
        };

        let (entries, current_version) = {
            let state = self.lock();
            let entries: Vec<(String, ResourceObject)> = state
                .objects
                .get(&kind)
                .map(|objects| {
                    objects
                        .iter()
                        .filter(|(_, object)| filter.matches(object))
                        .map(|(key, object)| (key.clone(), object.clone()))
                        .collect()
                })
                .unwrap_or_default();
            (entries, state.version)
        };

        let snapshot_version = cursor
            .as_ref()
            .and_then(|cursor| cursor.resource_version.clone())
            .unwrap_or_else(|| current_version.to_string());
        let page = paginate(kind, entries, cursor.as_ref(), options.limit)
            .map_err(|err| SyncError::List(err.to_string()))?;
        let continue_token = page.next_cursor.map(|mut cursor| {
            cursor.resource_version = Some(snapshot_version.clone());
            encode_continue_token(&cursor)
        });
        let remaining_item_count = u32::try_from(page.remaining)
            .ok()
            .filter(|remaining| *remaining > 0);

        Ok(ObjectList {
            metadata: ListMeta {
                resource_version: Some(snapshot_version),
                continue_token,
                remaining_item_count,
            },
            items: page.items,
        })
    }

    fn open_watch(&self, kind: ResourceKind, options: ListOptions) -> Result<WatchStream, SyncError> {
        let filter = WatchFilter::new(kind, &options).map_err(SyncError::Stream)?;
        let state = self.lock();
        let since = match options.resource_version.as_deref() {
            Some(raw) if !raw.is_empty() => raw.parse::<u64>().map_err(|_| {
                SyncError::Stream(format!("resource version '{raw}' is not an integer"))
            })?,
            _ => state.version,
        };
        if since < state.floor {
            return Err(SyncError::Expired(since.to_string()));
        }

        let receiver = self.inner.sender.subscribe();
        let mut watch = WatchState {
            receiver,
            store: self.clone(),
            filter,
            backlog: VecDeque::new(),
            last_version: since,
            finished: false,
        };
        let replay: Vec<StoredEvent> = state
            .history
            .iter()
            .filter(|event| event.version > since)
            .cloned()
            .collect();
        drop(state);
        watch.enqueue(replay);

        let stream = stream::unfold(watch, |mut watch| async move {
            let item = watch.next().await?;
            Some((item, watch))
        });
        Ok(Box::pin(stream))
    }

    fn replay_since(&self, since: u64) -> Result<Vec<StoredEvent>, SyncError> {
        let state = self.lock();
        if since < state.floor {
            return Err(SyncError::Expired(since.to_string()));
        }
        Ok(state
            .history
            .iter()
            .filter(|event| event.version > since)
            .cloned()
            .collect())
    }
}

impl ObjectStoreClient for MemoryObjectStore {
    fn list(&self, kind: ResourceKind, options: ListOptions) -> ListFuture<'_> {
        Box::pin(async move { self.list_page(kind, options) })
    }

    fn watch(&self, kind: ResourceKind, options: ListOptions) -> WatchFuture<'_> {
        Box::pin(async move { self.open_watch(kind, options) })
    }
}

fn placeholder(kind: ResourceKind, version: u64) -> ResourceObject {
    let metadata = ObjectMeta {
        resource_version: Some(version.to_string()),
        ..ObjectMeta::default()
    };
    match kind {
        ResourceKind::Pod => Pod::new(metadata, PodSpec::default()).into(),
        ResourceKind::Node => Node::new(metadata).into(),
    }
}

#[derive(Clone, Debug)]
struct WatchFilter {
    kind: ResourceKind,
    namespace: Option<String>,
    selector: Option<FieldSelector>,
}

impl WatchFilter {
    fn new(kind: ResourceKind, options: &ListOptions) -> Result<Self, String> {
        let selector = FieldSelector::parse_optional(options.field_selector.as_deref())
            .map_err(|err| err.to_string())?;
        let namespace = options
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty() && kind.is_namespaced())
            .map(str::to_string);
        Ok(Self {
            kind,
            namespace,
            selector,
        })
    }

    fn matches(&self, object: &ResourceObject) -> bool {
        if object.kind() != self.kind {
            return false;
        }
        if let Some(namespace) = self.namespace.as_deref() {
            if object.metadata().namespace.as_deref() != Some(namespace) {
                return false;
            }
        }
        self.selector
            .as_ref()
            .map(|selector| selector.matches(object))
            .unwrap_or(true)
    }

    /// Translates a stored event into what this watcher observes. An object
    /// leaving the filtered set is reported as deleted, one entering it as
    /// added.
    fn project(&self, event: &StoredEvent) -> Option<WatchEvent> {
        if event.kind != self.kind {
            return None;
        }
        let event_type = match event.event_type {
            WatchEventType::Bookmark => WatchEventType::Bookmark,
            WatchEventType::Added | WatchEventType::Deleted => {
                if !self.matches(&event.object) {
                    return None;
                }
                event.event_type
            }
            WatchEventType::Modified => {
                let now = self.matches(&event.object);
                let before = event
                    .previous
                    .as_ref()
                    .map(|previous| self.matches(previous))
                    .unwrap_or(false);
                match (before, now) {
                    (true, true) => WatchEventType::Modified,
                    (false, true) => WatchEventType::Added,
                    (true, false) => WatchEventType::Deleted,
                    (false, false) => return None,
                }
            }
        };
        Some(WatchEvent {
            event_type,
            object: event.object.clone(),
        })
    }
}

struct WatchState {
    receiver: broadcast::Receiver<Signal>,
    store: MemoryObjectStore,
    filter: WatchFilter,
    backlog: VecDeque<WatchEvent>,
    last_version: u64,
    finished: bool,
}

impl WatchState {
    fn enqueue(&mut self, events: Vec<StoredEvent>) {
        for event in events {
            if event.version <= self.last_version {
                continue;
            }
            self.last_version = event.version;
            if let Some(projected) = self.filter.project(&event) {
                self.backlog.push_back(projected);
            }
        }
    }

    async fn next(&mut self) -> Option<Result<WatchEvent, SyncError>> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(Ok(event));
            }
            match self.receiver.recv().await {
                Ok(Signal::Event(event)) => {
                    if event.event_type == WatchEventType::Bookmark {
                        if event.version >= self.last_version {
                            if let Some(projected) = self.filter.project(&event) {
                                return Some(Ok(projected));
                            }
                        }
                        continue;
                    }
                    self.enqueue(vec![event]);
                }
                Ok(Signal::Disconnect) => {
                    self.finished = true;
                    return Some(Err(SyncError::Stream(
                        "watch connection reset".to_string(),
                    )));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    match self.store.replay_since(self.last_version) {
                        Ok(events) => self.enqueue(events),
                        Err(err) => {
                            self.finished = true;
                            return Some(Err(err));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}
