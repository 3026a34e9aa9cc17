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

use regex::Regex;

/// Allow/deny list over family names. Entries are anchored regular
/// expressions, so plain names match exactly. Deny wins over allow.
#[derive(Clone, Debug, Default)]
pub struct FamilyFilter {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl FamilyFilter {
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn is_included(&self, name: &str) -> bool {
        if self.deny.iter().any(|pattern| pattern.is_match(name)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|pattern| pattern.is_match(name))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
        .collect()
}
