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


//! Incremental list/watch synchronization into local mirrors.

pub mod listwatch;
pub mod mirror;
pub mod reflector;

pub use listwatch::{ListWatch, ListerWatcher};
pub use mirror::{ChangeStream, ChangeStreamError, Mirror, MirrorEvent};
pub use reflector::{Reflector, ReflectorConfig, ReflectorHandle, ReflectorStatus, SyncState};
