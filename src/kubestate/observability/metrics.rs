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

//! Internal instrumentation of the synchronization and extraction paths.
//! These series describe kubestate itself, not the mirrored resources.

use std::error::Error;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static LIST_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static LIST_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static WATCH_RESTARTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static WATCH_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static MIRROR_OBJECTS: OnceLock<IntGaugeVec> = OnceLock::new();
static EXTRACTION_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("kubestate".to_string()), None)
            .expect("failed to initialise kubestate metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register kubestate metric collector");
    collector
}

fn list_total() -> &'static IntCounterVec {
    LIST_TOTAL.get_or_init(|| {
        let opts = Opts::new("list_total", "List calls grouped by resource and result")
            .subsystem("reflector");
        let counter = IntCounterVec::new(opts, &["resource", "result"])
            .expect("failed to build reflector list counter");
        register_collector(counter)
    })
}

fn list_duration() -> &'static HistogramVec {
    LIST_DURATION.get_or_init(|| {
        let opts = HistogramOpts::new(
            "list_duration_seconds",
            "Latency of full list snapshots including every page",
        )
        .subsystem("reflector")
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]);
        let histogram = HistogramVec::new(opts, &["resource"])
            .expect("failed to build reflector list histogram");
        register_collector(histogram)
    })
}

fn watch_restarts_total() -> &'static IntCounterVec {
    WATCH_RESTARTS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "watch_restarts_total",
            "Watch sessions that ended and forced a relist, grouped by reason",
        )
        .subsystem("reflector");
        let counter = IntCounterVec::new(opts, &["resource", "reason"])
            .expect("failed to build watch restart counter");
        register_collector(counter)
    })
}

fn watch_events_total() -> &'static IntCounterVec {
    WATCH_EVENTS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "watch_events_total",
            "Watch events applied to the local mirror grouped by type",
        )
        .subsystem("reflector");
        let counter = IntCounterVec::new(opts, &["resource", "type"])
            .expect("failed to build watch event counter");
        register_collector(counter)
    })
}

fn mirror_objects() -> &'static IntGaugeVec {
    MIRROR_OBJECTS.get_or_init(|| {
        let opts = Opts::new("objects", "Objects currently held by the local mirror")
            .subsystem("mirror");
        let gauge = IntGaugeVec::new(opts, &["resource", "scope"])
            .expect("failed to build mirror object gauge");
        register_collector(gauge)
    })
}

fn extraction_errors_total() -> &'static IntCounterVec {
    EXTRACTION_ERRORS_TOTAL.get_or_init(|| {
        let opts = Opts::new(
            "extraction_errors_total",
            "Objects skipped while building a metric family, grouped by reason",
        );
        let counter = IntCounterVec::new(opts, &["family", "reason"])
            .expect("failed to build extraction error counter");
        register_collector(counter)
    })
}

#[derive(Copy, Clone, Debug)]
pub enum ListResult {
    Success,
    Error,
}

impl ListResult {
    fn as_label(self) -> &'static str {
        match self {
            ListResult::Success => "success",
            ListResult::Error => "error",
        }
    }
}

fn scope_label(namespace: Option<&str>) -> &str {
    match namespace {
        Some(ns) if !ns.is_empty() => ns,
        _ => "cluster",
    }
}

pub fn record_list(resource: &str, result: ListResult, elapsed: Duration) {
    list_total()
        .with_label_values(&[resource, result.as_label()])
        .inc();
    if matches!(result, ListResult::Success) {
        list_duration()
            .with_label_values(&[resource])
            .observe(elapsed.as_secs_f64());
    }
}

pub fn record_watch_restart(resource: &str, reason: &str) {
    watch_restarts_total()
        .with_label_values(&[resource, reason])
        .inc();
}

pub fn record_watch_event(resource: &str, event_type: &str) {
    watch_events_total()
        .with_label_values(&[resource, event_type])
        .inc();
}

pub fn set_mirror_objects(resource: &str, namespace: Option<&str>, count: usize) {
    mirror_objects()
        .with_label_values(&[resource, scope_label(namespace)])
        .set(count as i64);
}

pub fn record_extraction_error(family: &str, reason: &str) {
    extraction_errors_total()
        .with_label_values(&[family, reason])
        .inc();
}

/// Encodes the internal metrics using the Prometheus text exposition format.
pub fn gather() -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
    let metric_families = registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| Box::new(err) as Box<dyn Error + Send + Sync>)?;
    Ok(buffer)
}
