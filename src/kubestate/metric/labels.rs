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

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelCollisionError {
    /// The key is both an identity label and a metric-specific label.
    Overlap(String),
    /// The key appears twice within one key set.
    Duplicate(String),
    LengthMismatch { keys: usize, values: usize },
    /// The key is not an identity label of the resource.
    UnknownIdentity(String),
}

impl fmt::Display for LabelCollisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelCollisionError::Overlap(key) => {
                write!(f, "label '{key}' collides with an identity label")
            }
            LabelCollisionError::Duplicate(key) => write!(f, "label '{key}' is declared twice"),
            LabelCollisionError::LengthMismatch { keys, values } => {
                write!(f, "{keys} label keys but {values} label values")
            }
            LabelCollisionError::UnknownIdentity(key) => {
                write!(f, "label '{key}' is not an identity label of the resource")
            }
        }
    }
}

impl Error for LabelCollisionError {}

/// Merges identity labels with metric-specific labels.
///
/// Identity entries come first, then the extra entries, each group in input
/// order. Nothing is returned on failure.
pub fn merge_key_values(
    default_keys: &[String],
    default_values: &[String],
    keys: &[String],
    values: &[String],
) -> Result<(Vec<String>, Vec<String>), LabelCollisionError> {
    if default_keys.len() != default_values.len() {
        return Err(LabelCollisionError::LengthMismatch {
            keys: default_keys.len(),
            values: default_values.len(),
        });
    }
    if keys.len() != values.len() {
        return Err(LabelCollisionError::LengthMismatch {
            keys: keys.len(),
            values: values.len(),
        });
    }

    ensure_unique(default_keys)?;
    let defaults: HashSet<&str> = default_keys.iter().map(String::as_str).collect();
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if defaults.contains(key.as_str()) {
            return Err(LabelCollisionError::Overlap(key.clone()));
        }
        if !seen.insert(key.as_str()) {
            return Err(LabelCollisionError::Duplicate(key.clone()));
        }
    }

    let mut merged_keys = Vec::with_capacity(default_keys.len() + keys.len());
    merged_keys.extend_from_slice(default_keys);
    merged_keys.extend_from_slice(keys);

    let mut merged_values = Vec::with_capacity(default_values.len() + values.len());
    merged_values.extend_from_slice(default_values);
    merged_values.extend_from_slice(values);

    Ok((merged_keys, merged_values))
}

/// Fails with [`LabelCollisionError::Duplicate`] on the first repeated key.
pub fn ensure_unique(keys: &[String]) -> Result<(), LabelCollisionError> {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key.as_str()) {
            return Err(LabelCollisionError::Duplicate(key.clone()));
        }
    }
    Ok(())
}

/// Fails with [`LabelCollisionError::Overlap`] when `keys` reuse an identity key.
pub fn ensure_disjoint(default_keys: &[String], keys: &[String]) -> Result<(), LabelCollisionError> {
    ensure_unique(default_keys)?;
    ensure_unique(keys)?;
    match keys.iter().find(|key| default_keys.contains(key)) {
        Some(key) => Err(LabelCollisionError::Overlap(key.clone())),
        None => Ok(()),
    }
}

/// Maps a Kubernetes label or annotation key onto a valid metric label name.
pub fn sanitize_label_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Builds `<prefix>_<sanitized key>` label pairs for the allow-listed entries
/// of `source`. A `*` entry allows every key. Output is sorted by key.
pub fn allowed_kube_labels(
    prefix: &str,
    source: &HashMap<String, String>,
    allow_list: &[String],
) -> (Vec<String>, Vec<String>) {
    let allow_all = allow_list.iter().any(|entry| entry == "*");
    let mut selected: Vec<(&String, &String)> = source
        .iter()
        .filter(|(key, _)| allow_all || allow_list.iter().any(|entry| entry == *key))
        .collect();
    selected.sort_by(|a, b| a.0.cmp(b.0));

    let mut keys = Vec::with_capacity(selected.len());
    let mut values = Vec::with_capacity(selected.len());
    for (key, value) in selected {
        let name = format!("{}_{}", prefix, sanitize_label_name(key));
        // Two source keys can sanitize to the same name; keep the first.
        if keys.contains(&name) {
            continue;
        }
        keys.push(name);
        values.push(value.clone());
    }
    (keys, values)
}
