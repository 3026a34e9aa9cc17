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

//! Continue-token pagination for list calls.

use crate::kubestate::k8s::object::ResourceKind;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    pub kind: ResourceKind,
    /// Last object key handed out on the previous page.
    pub key: String,
    /// Resource version of the snapshot the first page was served from.
    #[serde(
        rename = "resourceVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    InvalidContinue(String),
    InvalidLimit(String),
}

impl fmt::Display for PaginationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginationError::InvalidContinue(msg) => write!(f, "{msg}"),
            PaginationError::InvalidLimit(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for PaginationError {}

#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<ListCursor>,
    pub remaining: usize,
}

pub fn encode_continue_token(cursor: &ListCursor) -> String {
    let payload = serde_json::to_vec(cursor).unwrap_or_default();
    BASE64_ENGINE.encode(payload)
}

pub fn decode_continue_token(
    token: &str,
    expected_kind: ResourceKind,
) -> Result<ListCursor, PaginationError> {
    let decoded = BASE64_ENGINE.decode(token).map_err(|_| {
        PaginationError::InvalidContinue("continue token is not valid base64".to_string())
    })?;
    let cursor: ListCursor = serde_json::from_slice(&decoded).map_err(|_| {
        PaginationError::InvalidContinue("continue token payload is not valid JSON".to_string())
    })?;
    if cursor.kind != expected_kind {
        return Err(PaginationError::InvalidContinue(format!(
            "continue token was issued for '{}', not '{}'",
            cursor.kind, expected_kind
        )));
    }
    Ok(cursor)
}

/// Slices key-sorted entries into one page starting after `cursor`.
///
/// The cursor key does not need to exist anymore: objects deleted between
/// pages must not break an in-flight list.
pub fn paginate<T>(
    kind: ResourceKind,
    mut entries: Vec<(String, T)>,
    cursor: Option<&ListCursor>,
    limit: Option<u32>,
) -> Result<Page<T>, PaginationError> {
    if limit == Some(0) {
        return Err(PaginationError::InvalidLimit(
            "limit must be greater than 0".to_string(),
        ));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let start_index = match cursor {
        Some(cursor) => entries.partition_point(|(key, _)| key.as_str() <= cursor.key.as_str()),
        None => 0,
    };

    let total_after_start = entries.len() - start_index;
    let take_count = match limit {
        Some(limit) => std::cmp::min(limit as usize, total_after_start),
        None => total_after_start,
    };

    let mut items = Vec::with_capacity(take_count);
    let mut last_key = None;
    for (key, value) in entries.into_iter().skip(start_index).take(take_count) {
        last_key = Some(key);
        items.push(value);
    }

    let remaining = total_after_start - items.len();
    let next_cursor = if remaining > 0 {
        last_key.map(|key| ListCursor {
            kind,
            key,
            resource_version: None,
        })
    } else {
        None
    };

    Ok(Page {
        items,
        next_cursor,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&str]) -> Vec<(String, usize)> {
        keys.iter()
            .enumerate()
            .map(|(index, key)| (key.to_string(), index))
            .collect()
    }

    #[test]
    fn without_limit_returns_everything() {
        let page = paginate(ResourceKind::Pod, entries(&["a/2", "a/1"]), None, None).unwrap();
        assert_eq!(page.items, vec![1, 0]);
        assert!(page.next_cursor.is_none());
        assert_eq!(page.remaining, 0);
    }

    #[test]
    fn limit_sets_cursor_and_next_page_resumes() {
        let all = entries(&["a/1", "a/2", "a/3"]);
        let first = paginate(ResourceKind::Pod, all.clone(), None, Some(2)).unwrap();
        assert_eq!(first.items, vec![0, 1]);
        assert_eq!(first.remaining, 1);
        let cursor = first.next_cursor.expect("cursor expected");
        assert_eq!(cursor.key, "a/2");

        let second = paginate(ResourceKind::Pod, all, Some(&cursor), Some(2)).unwrap();
        assert_eq!(second.items, vec![2]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn deleted_cursor_key_still_resumes() {
        let cursor = ListCursor {
            kind: ResourceKind::Pod,
            key: "a/2".to_string(),
            resource_version: None,
        };
        let page = paginate(ResourceKind::Pod, entries(&["a/1", "a/3"]), Some(&cursor), None)
            .unwrap();
        assert_eq!(page.items, vec![1]);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = paginate(ResourceKind::Node, entries(&["n1"]), None, Some(0)).unwrap_err();
        match err {
            PaginationError::InvalidLimit(msg) => assert!(msg.contains("greater than 0")),
            _ => panic!("expected InvalidLimit"),
        }
    }

    #[test]
    fn tokens_are_bound_to_a_kind() {
        let token = encode_continue_token(&ListCursor {
            kind: ResourceKind::Pod,
            key: "ns/p".to_string(),
            resource_version: Some("7".to_string()),
        });
        let cursor = decode_continue_token(&token, ResourceKind::Pod).unwrap();
        assert_eq!(cursor.key, "ns/p");
        assert_eq!(cursor.resource_version.as_deref(), Some("7"));
        assert!(decode_continue_token(&token, ResourceKind::Node).is_err());
        match decode_continue_token("not-base64!", ResourceKind::Pod).unwrap_err() {
            PaginationError::InvalidContinue(msg) => assert!(msg.contains("base64")),
            PaginationError::InvalidLimit(_) => panic!("expected invalid continue error"),
        }
    }
}
