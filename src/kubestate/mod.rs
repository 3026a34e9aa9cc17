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


//! Cluster state metrics core.
//!
//! Resource objects are mirrored locally by list/watch reflectors
//! ([`sync`]) and turned into metric families on demand by per-kind
//! generator registries ([`generator`], [`store`]).

pub mod builder;
pub mod client;
pub mod config;
pub mod generator;
pub mod k8s;
pub mod logger;
pub mod metric;
pub mod observability;
pub mod store;
pub mod sync;
pub mod util;
