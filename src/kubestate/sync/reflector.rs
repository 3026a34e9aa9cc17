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


//! List/watch synchronizer.
//!
//! A reflector owns one [`Mirror`] and runs on its own task:
//!
//! ```text
//! Uninitialized -> Listing -> Watching -> (stream error / EOF) -> Relisting -> Watching ...
//! ```
//!
//! Every failure is retried after an exponential backoff. The loop only
//! terminates when its cancellation token fires, after which the status
//! reports [`SyncState::Stopped`].

use crate::kubestate::client::{ListOptions, SyncError, WatchEventType};
use crate::kubestate::k8s::{ResourceKind, ResourceObject};
use crate::kubestate::logger::{log_debug, log_info, log_warn};
use crate::kubestate::observability::health::LIST_FAILURE_THRESHOLD;
use crate::kubestate::observability::metrics::{self, ListResult};
use crate::kubestate::observability::tracing::with_span;
use crate::kubestate::sync::listwatch::ListerWatcher;
use crate::kubestate::sync::mirror::Mirror;

use futures_util::future::pending;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Objects requested per list page.
pub const LIST_PAGE_SIZE: u32 = 500;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const COMPONENT: &str = "reflector";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Uninitialized,
    Listing,
    Watching,
    Relisting,
    Stopped,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::Listing => "listing",
            SyncState::Watching => "watching",
            SyncState::Relisting => "relisting",
            SyncState::Stopped => "stopped",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReflectorStatus {
    pub resource: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub state: SyncState,
    /// Set after the first successful list and never cleared.
    pub synced: bool,
    #[serde(rename = "resourceVersion", skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    pub consecutive_list_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub relists: u64,
}

impl ReflectorStatus {
    pub fn new(resource: ResourceKind, namespace: Option<&str>) -> Self {
        Self {
            resource,
            namespace: namespace.map(str::to_string),
            state: SyncState::Uninitialized,
            synced: false,
            resource_version: None,
            consecutive_list_failures: 0,
            last_error: None,
            relists: 0,
        }
    }

    /// `pods/<namespace>` for namespace-scoped reflectors, `pods` otherwise.
    pub fn scope(&self) -> String {
        match self.namespace.as_deref() {
            Some(namespace) => format!("{}/{}", self.resource.plural(), namespace),
            None => self.resource.plural().to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReflectorConfig {
    /// Periodic re-announcement of every mirrored object; `None` disables it.
    pub resync_period: Option<Duration>,
    pub page_size: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            resync_period: None,
            page_size: LIST_PAGE_SIZE,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// Doubling delay capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            Some(current) => current.saturating_mul(2).min(self.max),
            None => self.initial,
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

enum WatchOutcome {
    Cancelled,
    Ended { error: SyncError, delivered: usize },
}

pub struct Reflector {
    lister: Arc<dyn ListerWatcher>,
    mirror: Arc<Mirror>,
    config: ReflectorConfig,
}

impl Reflector {
    pub fn new(lister: Arc<dyn ListerWatcher>, config: ReflectorConfig) -> Self {
        let mirror = Arc::new(Mirror::new(lister.kind(), lister.namespace()));
        Self {
            lister,
            mirror,
            config,
        }
    }

    pub fn mirror(&self) -> Arc<Mirror> {
        Arc::clone(&self.mirror)
    }

    /// Starts the synchronization loop on a new task.
    pub fn spawn(self) -> ReflectorHandle {
        let cancellation = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ReflectorStatus::new(
            self.lister.kind(),
            self.lister.namespace(),
        ));
        let mirror = self.mirror();
        let token = cancellation.clone();
        let join = tokio::spawn(async move {
            self.run(token, status_tx).await;
        });
        ReflectorHandle {
            mirror,
            status: status_rx,
            cancellation,
            join: Mutex::new(Some(join)),
        }
    }

    /// Runs until `cancellation` fires. Status changes are published on `status`.
    pub async fn run(self, cancellation: CancellationToken, status: watch::Sender<ReflectorStatus>) {
        let scope = status.borrow().scope();
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut resync = self.config.resync_period.map(|period| {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        transition(&status, SyncState::Listing);
        loop {
            let listed = tokio::select! {
                _ = cancellation.cancelled() => break,
                result = with_span(COMPONENT, format!("list {scope}"), self.list_all()) => result,
            };

            let version = match listed {
                Ok((items, version)) => {
                    let recovering = status.borrow().consecutive_list_failures > 0;
                    if recovering {
                        backoff.reset();
                    }
                    let count = items.len();
                    let summary = self.mirror.replace(items);
                    status.send_modify(|current| {
                        current.synced = true;
                        current.consecutive_list_failures = 0;
                        current.last_error = None;
                        current.resource_version = Some(version.clone());
                    });
                    let count = count.to_string();
                    let added = summary.added.to_string();
                    let updated = summary.updated.to_string();
                    let deleted = summary.deleted.to_string();
                    log_info(
                        COMPONENT,
                        "Listed resource snapshot",
                        &[
                            ("scope", scope.as_str()),
                            ("objects", count.as_str()),
                            ("added", added.as_str()),
                            ("updated", updated.as_str()),
                            ("deleted", deleted.as_str()),
                            ("resource_version", version.as_str()),
                        ],
                    );
                    version
                }
                Err(err) => {
                    let message = err.to_string();
                    status.send_modify(|current| {
                        current.consecutive_list_failures += 1;
                        current.last_error = Some(message.clone());
                    });
                    let failures = status.borrow().consecutive_list_failures;
                    let failures_text = failures.to_string();
                    log_warn(
                        COMPONENT,
                        "List failed; retrying",
                        &[
                            ("scope", scope.as_str()),
                            ("error", message.as_str()),
                            ("consecutive_failures", failures_text.as_str()),
                        ],
                    );
                    if failures == LIST_FAILURE_THRESHOLD {
                        log_warn(
                            COMPONENT,
                            "Reflector degraded after repeated list failures",
                            &[("scope", scope.as_str())],
                        );
                    }
                    if !sleep_or_cancel(&cancellation, backoff.next_delay()).await {
                        break;
                    }
                    continue;
                }
            };

            transition(&status, SyncState::Watching);
            let outcome = with_span(
                COMPONENT,
                format!("watch {scope}"),
                self.watch_session(version, &cancellation, &status, &mut resync),
            )
            .await;

            match outcome {
                WatchOutcome::Cancelled => break,
                WatchOutcome::Ended { error, delivered } => {
                    let resource = self.lister.kind().plural();
                    metrics::record_watch_restart(resource, error.reason());
                    let message = error.to_string();
                    let delivered_text = delivered.to_string();
                    let fields = [
                        ("scope", scope.as_str()),
                        ("reason", error.reason()),
                        ("error", message.as_str()),
                        ("delivered", delivered_text.as_str()),
                    ];
                    match error {
                        SyncError::Closed | SyncError::Expired(_) => {
                            log_info(COMPONENT, "Watch ended; relisting", &fields)
                        }
                        SyncError::List(_) | SyncError::Stream(_) => {
                            log_warn(COMPONENT, "Watch failed; relisting", &fields)
                        }
                    }
                    if delivered > 0 {
                        backoff.reset();
                    }
                    status.send_modify(|current| current.relists += 1);
                    transition(&status, SyncState::Relisting);
                    if !sleep_or_cancel(&cancellation, backoff.next_delay()).await {
                        break;
                    }
                }
            }
        }
        transition(&status, SyncState::Stopped);
    }

    /// Fetches every page and returns the items with the snapshot version.
    async fn list_all(&self) -> Result<(Vec<ResourceObject>, String), SyncError> {
        let resource = self.lister.kind().plural();
        let started = Instant::now();
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let options = ListOptions {
                limit: Some(self.config.page_size),
                continue_token: continue_token.take(),
                ..ListOptions::default()
            };
            let page = match self.lister.list(options).await {
                Ok(page) => page,
                Err(err) => {
                    metrics::record_list(resource, ListResult::Error, started.elapsed());
                    return Err(err);
                }
            };
            items.extend(page.items);
            match page.metadata.continue_token.filter(|token| !token.is_empty()) {
                Some(token) => continue_token = Some(token),
                None => {
                    metrics::record_list(resource, ListResult::Success, started.elapsed());
                    let version = page.metadata.resource_version.unwrap_or_default();
                    return Ok((items, version));
                }
            }
        }
    }

    async fn watch_session(
        &self,
        version: String,
        cancellation: &CancellationToken,
        status: &watch::Sender<ReflectorStatus>,
        resync: &mut Option<Interval>,
    ) -> WatchOutcome {
        let resource = self.lister.kind().plural();
        let options = ListOptions {
            resource_version: Some(version),
            ..ListOptions::default()
        };
        let opened = tokio::select! {
            _ = cancellation.cancelled() => return WatchOutcome::Cancelled,
            opened = self.lister.watch(options) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => return WatchOutcome::Ended { error, delivered: 0 },
        };

        let mut delivered = 0;
        loop {
            let next = tokio::select! {
                _ = cancellation.cancelled() => return WatchOutcome::Cancelled,
                _ = next_tick(resync) => {
                    let count = self.mirror.resync().to_string();
                    log_debug(COMPONENT, "Resynced mirror", &[("objects", count.as_str())]);
                    continue;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    metrics::record_watch_event(resource, event.event_type.as_label());
                    if event.event_type != WatchEventType::Bookmark {
                        delivered += 1;
                    }
                    if let Some(version) = event.object.resource_version() {
                        let version = version.to_string();
                        status.send_modify(|current| current.resource_version = Some(version));
                    }
                    self.mirror.apply(event);
                }
                Some(Err(error)) => return WatchOutcome::Ended { error, delivered },
                None => {
                    return WatchOutcome::Ended {
                        error: SyncError::Closed,
                        delivered,
                    }
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Sleeps for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(cancellation: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancellation.cancelled() => false,
        _ = time::sleep(delay) => true,
    }
}

fn transition(status: &watch::Sender<ReflectorStatus>, next: SyncState) {
    let (previous, scope) = {
        let current = status.borrow();
        (current.state, current.scope())
    };
    if previous == next {
        return;
    }
    status.send_modify(|current| current.state = next);
    log_info(
        COMPONENT,
        "Reflector state changed",
        &[
            ("scope", scope.as_str()),
            ("from", previous.as_str()),
            ("to", next.as_str()),
        ],
    );
}

/// Owner handle for a spawned reflector. Dropping it cancels the task.
pub struct ReflectorHandle {
    mirror: Arc<Mirror>,
    status: watch::Receiver<ReflectorStatus>,
    cancellation: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ReflectorHandle {
    pub fn mirror(&self) -> Arc<Mirror> {
        Arc::clone(&self.mirror)
    }

    pub fn status(&self) -> ReflectorStatus {
        self.status.borrow().clone()
    }

    /// Waits for the first successful list. Returns `false` if the reflector
    /// stopped before syncing.
    pub async fn wait_for_sync(&self) -> bool {
        let mut receiver = self.status.clone();
        loop {
            {
                let current = receiver.borrow_and_update();
                if current.synced {
                    return true;
                }
                if current.state == SyncState::Stopped {
                    return false;
                }
            }
            if receiver.changed().await.is_err() {
                return receiver.borrow().synced;
            }
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Cancels the loop and waits for its task to exit. The mirror stays
    /// readable with its last state.
    pub async fn shutdown(&self) {
        self.cancel();
        let join = self
            .join
            .lock()
            .expect("reflector join lock poisoned")
            .take();
        if let Some(join) = join {
            if let Err(err) = join.await {
                let message = err.to_string();
                let scope = self.status.borrow().scope();
                log_warn(
                    COMPONENT,
                    "Reflector task ended abnormally",
                    &[("scope", scope.as_str()), ("error", message.as_str())],
                );
            }
        }
    }
}

impl Drop for ReflectorHandle {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
