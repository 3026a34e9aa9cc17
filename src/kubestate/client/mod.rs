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

//! Object store client interface consumed by the synchronizer.
//!
//! The core only relies on two capabilities: a (paginated) list returning a
//! snapshot with its resource version, and a watch that streams changes
//! committed after a given resource version.

pub mod memory;

use crate::kubestate::k8s::object::ListMeta;
use crate::kubestate::k8s::{ResourceKind, ResourceObject};

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub namespace: Option<String>,
    pub field_selector: Option<String>,
    /// For watches: only changes committed after this version are sent.
    pub resource_version: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectList {
    pub metadata: ListMeta,
    pub items: Vec<ResourceObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    /// Progress notification; only the resource version is meaningful.
    Bookmark,
}

impl WatchEventType {
    pub fn as_label(self) -> &'static str {
        match self {
            WatchEventType::Added => "added",
            WatchEventType::Modified => "modified",
            WatchEventType::Deleted => "deleted",
            WatchEventType::Bookmark => "bookmark",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: ResourceObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A list call failed (permission, connectivity, bad request).
    List(String),
    /// The watch stream broke mid-session.
    Stream(String),
    /// The requested resource version is older than the server retains.
    Expired(String),
    /// The watch stream ended without an error.
    Closed,
}

impl SyncError {
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::List(_) => "list_failed",
            SyncError::Stream(_) => "stream_error",
            SyncError::Expired(_) => "expired",
            SyncError::Closed => "closed",
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::List(msg) => write!(f, "list failed: {msg}"),
            SyncError::Stream(msg) => write!(f, "watch stream error: {msg}"),
            SyncError::Expired(version) => {
                write!(f, "resource version {version} is too old")
            }
            SyncError::Closed => write!(f, "watch stream closed"),
        }
    }
}

impl Error for SyncError {}

pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, SyncError>> + Send>>;
pub type ListFuture<'a> = Pin<Box<dyn Future<Output = Result<ObjectList, SyncError>> + Send + 'a>>;
pub type WatchFuture<'a> = Pin<Box<dyn Future<Output = Result<WatchStream, SyncError>> + Send + 'a>>;

pub trait ObjectStoreClient: Send + Sync {
    /// Fetches one page of objects of `kind` matching `options`.
    fn list(&self, kind: ResourceKind, options: ListOptions) -> ListFuture<'_>;

    /// Opens a change stream for `kind` starting after `options.resource_version`.
    fn watch(&self, kind: ResourceKind, options: ListOptions) -> WatchFuture<'_>;
}
