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

use crate::kubestate::k8s::object::ResourceObject;

use std::error::Error;
use std::fmt;

const SUPPORTED_FIELDS: &[&str] = &[
    "metadata.name",
    "metadata.namespace",
    "spec.nodeName",
    "status.phase",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError(String);

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid field selector: {}", self.0)
    }
}

impl Error for SelectorError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FieldOperator {
    Equals,
    NotEquals,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct FieldRequirement {
    path: String,
    operator: FieldOperator,
    value: String,
}

impl FieldRequirement {
    fn matches(&self, object: &ResourceObject) -> bool {
        let actual = object.field(&self.path).unwrap_or_default();
        match self.operator {
            FieldOperator::Equals => actual == self.value,
            FieldOperator::NotEquals => actual != self.value,
        }
    }
}

/// Server-side filter expressed as a conjunction of `path=value` /
/// `path!=value` terms.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn parse(raw: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for expr in raw.split(',').map(str::trim).filter(|expr| !expr.is_empty()) {
            let (operator, left, right) = parse_field_equality(expr).ok_or_else(|| {
                SelectorError(format!("expected key=value or key!=value, got '{expr}'"))
            })?;

            let path = left.trim();
            if path.is_empty() {
                return Err(SelectorError(format!("missing key in '{expr}'")));
            }
            if !SUPPORTED_FIELDS.contains(&path) {
                return Err(SelectorError(format!("unsupported key '{path}'")));
            }

            requirements.push(FieldRequirement {
                path: path.to_string(),
                operator,
                value: normalize_value(right),
            });
        }
        Ok(Self { requirements })
    }

    /// Parses an optional selector, treating blank input as "match everything".
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, SelectorError> {
        match raw {
            Some(raw) => {
                let selector = Self::parse(raw)?;
                Ok(if selector.is_empty() { None } else { Some(selector) })
            }
            None => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, object: &ResourceObject) -> bool {
        self.requirements
            .iter()
            .all(|requirement| requirement.matches(object))
    }
}

fn parse_field_equality(expr: &str) -> Option<(FieldOperator, &str, &str)> {
    if let Some((left, right)) = expr.split_once("!=") {
        return Some((FieldOperator::NotEquals, left, right));
    }
    if let Some((left, right)) = expr.split_once("==") {
        return Some((FieldOperator::Equals, left, right));
    }
    expr.split_once('=')
        .map(|(left, right)| (FieldOperator::Equals, left, right))
}

fn normalize_value(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(stripped) = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        return stripped.to_string();
    }
    if let Some(stripped) = trimmed
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
    {
        return stripped.to_string();
    }
    trimmed.to_string()
}
