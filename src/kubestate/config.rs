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


use crate::kubestate::generator::FamilyFilter;
use crate::kubestate::k8s::selector::FieldSelector;
use crate::kubestate::k8s::ResourceKind;
use crate::kubestate::logger::LogFormat;

use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Enum for supported configuration parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Config {
    Resources,
    Namespaces,
    FieldSelector,
    AllowLabels,
    AllowAnnotations,
    MetricAllowlist,
    MetricDenylist,
    ResyncSeconds,
    LogFormat,
}

impl Config {
    /// Returns the associated environment variable for the config parameter.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::Resources => "KUBESTATE_RESOURCES",
            Config::Namespaces => "KUBESTATE_NAMESPACES",
            Config::FieldSelector => "KUBESTATE_FIELD_SELECTOR",
            Config::AllowLabels => "KUBESTATE_ALLOW_LABELS",
            Config::AllowAnnotations => "KUBESTATE_ALLOW_ANNOTATIONS",
            Config::MetricAllowlist => "KUBESTATE_METRIC_ALLOWLIST",
            Config::MetricDenylist => "KUBESTATE_METRIC_DENYLIST",
            Config::ResyncSeconds => "KUBESTATE_RESYNC_SECONDS",
            Config::LogFormat => "KUBESTATE_LOG_FORMAT",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Config::Resources => "pods,nodes",
            Config::ResyncSeconds => "0",
            Config::LogFormat => "text",
            Config::Namespaces
            | Config::FieldSelector
            | Config::AllowLabels
            | Config::AllowAnnotations
            | Config::MetricAllowlist
            | Config::MetricDenylist => "",
        }
    }

    /// Returns the effective value, either from environment or default.
    pub fn get(&self) -> String {
        env::var(self.env_var()).unwrap_or_else(|_| self.default_value().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    variable: &'static str,
    message: String,
}

impl ConfigError {
    fn new(config: Config, message: impl Into<String>) -> Self {
        Self {
            variable: config.env_var(),
            message: message.into(),
        }
    }

    /// Environment variable holding the rejected value.
    pub fn variable(&self) -> &'static str {
        self.variable
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.variable, self.message)
    }
}

impl Error for ConfigError {}

/// Parsed, immutable configuration snapshot consumed by the builder.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// Enabled resource kinds, in collection order.
    pub resources: Vec<ResourceKind>,
    /// Namespaces to mirror; empty means all namespaces.
    pub namespaces: Vec<String>,
    pub field_selectors: HashMap<ResourceKind, String>,
    pub allow_labels: HashMap<ResourceKind, Vec<String>>,
    pub allow_annotations: HashMap<ResourceKind, Vec<String>>,
    pub metric_allowlist: Vec<String>,
    pub metric_denylist: Vec<String>,
    pub resync_period: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            resources: vec![ResourceKind::Pod, ResourceKind::Node],
            namespaces: Vec::new(),
            field_selectors: HashMap::new(),
            allow_labels: HashMap::new(),
            allow_annotations: HashMap::new(),
            metric_allowlist: Vec::new(),
            metric_denylist: Vec::new(),
            resync_period: None,
            log_format: LogFormat::Text,
        }
    }
}

impl Options {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|config| config.get())
    }

    /// Builds options from `lookup`, which returns the raw value (or the
    /// default) for each setting.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(Config) -> String,
    {
        let options = Self {
            resources: parse_resources(&lookup(Config::Resources))?,
            namespaces: parse_list(&lookup(Config::Namespaces)),
            field_selectors: parse_field_selectors(&lookup(Config::FieldSelector))?,
            allow_labels: parse_allow_list(Config::AllowLabels, &lookup(Config::AllowLabels))?,
            allow_annotations: parse_allow_list(
                Config::AllowAnnotations,
                &lookup(Config::AllowAnnotations),
            )?,
            metric_allowlist: parse_list(&lookup(Config::MetricAllowlist)),
            metric_denylist: parse_list(&lookup(Config::MetricDenylist)),
            resync_period: parse_resync(&lookup(Config::ResyncSeconds))?,
            log_format: lookup(Config::LogFormat)
                .parse::<LogFormat>()
                .map_err(|message| ConfigError::new(Config::LogFormat, message))?,
        };
        options.family_filter()?;
        Ok(options)
    }

    pub fn allowed_labels(&self, kind: ResourceKind) -> &[String] {
        self.allow_labels
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn allowed_annotations(&self, kind: ResourceKind) -> &[String] {
        self.allow_annotations
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn field_selector(&self, kind: ResourceKind) -> Option<&str> {
        self.field_selectors.get(&kind).map(String::as_str)
    }

    /// Namespace scopes to run a reflector for. Cluster-scoped kinds and an
    /// empty namespace list yield a single unscoped entry.
    pub fn namespace_scopes(&self, kind: ResourceKind) -> Vec<Option<String>> {
        if !kind.is_namespaced() || self.namespaces.is_empty() {
            return vec![None];
        }
        self.namespaces.iter().cloned().map(Some).collect()
    }

    pub fn family_filter(&self) -> Result<FamilyFilter, ConfigError> {
        FamilyFilter::new(&self.metric_allowlist, &[])
            .map_err(|err| ConfigError::new(Config::MetricAllowlist, err.to_string()))?;
        FamilyFilter::new(&[], &self.metric_denylist)
            .map_err(|err| ConfigError::new(Config::MetricDenylist, err.to_string()))?;
        FamilyFilter::new(&self.metric_allowlist, &self.metric_denylist)
            .map_err(|err| ConfigError::new(Config::MetricAllowlist, err.to_string()))
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for value in raw.split(',').map(str::trim).filter(|value| !value.is_empty()) {
        if !values.iter().any(|existing| existing == value) {
            values.push(value.to_string());
        }
    }
    values
}

fn parse_resources(raw: &str) -> Result<Vec<ResourceKind>, ConfigError> {
    let mut kinds = Vec::new();
    for name in parse_list(raw) {
        let kind = ResourceKind::from_plural(&name).ok_or_else(|| {
            ConfigError::new(Config::Resources, format!("unknown resource '{name}'"))
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(ConfigError::new(
            Config::Resources,
            "at least one resource must be enabled",
        ));
    }
    Ok(kinds)
}

/// `pods:spec.nodeName=n1;nodes:metadata.name=n1`
fn parse_field_selectors(raw: &str) -> Result<HashMap<ResourceKind, String>, ConfigError> {
    let mut selectors = HashMap::new();
    for entry in raw.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (resource, selector) = entry.split_once(':').ok_or_else(|| {
            ConfigError::new(
                Config::FieldSelector,
                format!("expected <resource>:<selector>, got '{entry}'"),
            )
        })?;
        let kind = ResourceKind::from_plural(resource).ok_or_else(|| {
            ConfigError::new(
                Config::FieldSelector,
                format!("unknown resource '{}'", resource.trim()),
            )
        })?;
        let selector = selector.trim();
        FieldSelector::parse(selector)
            .map_err(|err| ConfigError::new(Config::FieldSelector, err.to_string()))?;
        if !selector.is_empty() {
            selectors.insert(kind, selector.to_string());
        }
    }
    Ok(selectors)
}

/// `pods=[app,team],nodes=[*]`
fn parse_allow_list(
    config: Config,
    raw: &str,
) -> Result<HashMap<ResourceKind, Vec<String>>, ConfigError> {
    let malformed = |detail: &str| ConfigError::new(config, format!("{detail} in '{raw}'"));
    let mut allow: HashMap<ResourceKind, Vec<String>> = HashMap::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let (resource, after) = rest
            .split_once('=')
            .ok_or_else(|| malformed("expected <resource>=[...]"))?;
        let kind = ResourceKind::from_plural(resource).ok_or_else(|| {
            ConfigError::new(config, format!("unknown resource '{}'", resource.trim()))
        })?;
        let after = after
            .trim_start()
            .strip_prefix('[')
            .ok_or_else(|| malformed("expected '['"))?;
        let (keys, remainder) = after
            .split_once(']')
            .ok_or_else(|| malformed("missing ']'"))?;

        let entry = allow.entry(kind).or_default();
        for key in parse_list(keys) {
            if !entry.contains(&key) {
                entry.push(key);
            }
        }

        rest = remainder.trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(malformed("expected ',' between resources"));
        }
    }
    Ok(allow)
}

fn parse_resync(raw: &str) -> Result<Option<Duration>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let seconds = raw.parse::<u64>().map_err(|_| {
        ConfigError::new(
            Config::ResyncSeconds,
            format!("expected a whole number of seconds, got '{raw}'"),
        )
    })?;
    Ok((seconds > 0).then(|| Duration::from_secs(seconds)))
}
