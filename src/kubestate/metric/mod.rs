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

//! In-memory metric model produced by family generators.
//!
//! A [`Family`] groups [`Metric`] samples under one name, help text and
//! type. Label keys and values are kept as parallel ordered vectors so the
//! identity labels injected by the object adapter always lead.

pub mod labels;

use serde::Serialize;
use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Info,
    StateSet,
    /// Untyped samples, exposed as `unknown`.
    Unknown,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Info => "info",
            MetricType::StateSet => "stateset",
            MetricType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation: parallel label keys/values plus a value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub label_keys: Vec<String>,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Metric {
    pub fn new(value: f64) -> Self {
        Self {
            label_keys: Vec::new(),
            label_values: Vec::new(),
            value,
        }
    }

    pub fn with_labels<K, V>(keys: K, values: V, value: f64) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self {
            label_keys: keys.into_iter().map(Into::into).collect(),
            label_values: values.into_iter().map(Into::into).collect(),
            value,
        }
    }

    /// Returns the value of `key`, if the metric carries it.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.label_keys
            .iter()
            .position(|candidate| candidate == key)
            .and_then(|index| self.label_values.get(index))
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Family {
    pub name: String,
    pub help: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}

impl Family {
    pub fn new(name: impl Into<String>, help: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            metric_type,
            metrics: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_lookup_follows_key_position() {
        let metric = Metric::with_labels(["namespace", "pod"], ["ns1", "p1"], 1.0);
        assert_eq!(metric.label("pod"), Some("p1"));
        assert_eq!(metric.label("namespace"), Some("ns1"));
        assert_eq!(metric.label("uid"), None);
    }

    #[test]
    fn metric_type_names_match_exposition() {
        assert_eq!(MetricType::Gauge.to_string(), "gauge");
        assert_eq!(MetricType::StateSet.as_str(), "stateset");
        assert_eq!(MetricType::Unknown.as_str(), "unknown");
    }
}
