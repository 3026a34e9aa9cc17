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


//! Readiness derived from reflector status snapshots.

use crate::kubestate::sync::reflector::ReflectorStatus;

use serde::Serialize;

/// Consecutive list failures after which a reflector reports degraded.
pub const LIST_FAILURE_THRESHOLD: u32 = 5;

const DETAIL_MAX_LEN: usize = 240;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn is_ready(&self) -> bool {
        self.status == HealthStatus::Ready
    }
}

impl ComponentHealth {
    fn ready(name: String) -> Self {
        ComponentHealth {
            name,
            status: HealthStatus::Ready,
            detail: None,
        }
    }

    fn degraded(name: String, detail: impl ToString) -> Self {
        let mut message = detail.to_string();
        if message.len() > DETAIL_MAX_LEN {
            let mut end = DETAIL_MAX_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        ComponentHealth {
            name,
            status: HealthStatus::Degraded,
            detail: Some(message),
        }
    }
}

fn component_health(status: &ReflectorStatus) -> ComponentHealth {
    let name = status.scope();
    if status.consecutive_list_failures >= LIST_FAILURE_THRESHOLD {
        let failures = status.consecutive_list_failures;
        return match status.last_error.as_deref() {
            Some(error) => {
                ComponentHealth::degraded(name, format!("{failures} consecutive list failures: {error}"))
            }
            None => ComponentHealth::degraded(name, format!("{failures} consecutive list failures")),
        };
    }
    if !status.synced {
        return ComponentHealth::degraded(
            name,
            format!("initial list pending ({})", status.state.as_str()),
        );
    }
    ComponentHealth::ready(name)
}

/// Ready only when every reflector has synced and none is failing to list.
pub fn readiness_report(statuses: &[ReflectorStatus]) -> HealthReport {
    let components: Vec<ComponentHealth> = statuses.iter().map(component_health).collect();
    let status = if components
        .iter()
        .all(|component| component.status == HealthStatus::Ready)
    {
        HealthStatus::Ready
    } else {
        HealthStatus::Degraded
    };
    HealthReport { status, components }
}
