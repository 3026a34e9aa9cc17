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

//! Declarative metric family generators.
//!
//! A [`FamilyGenerator`] binds a family name, help text and type to a pure
//! extraction function. Extraction functions only emit metric-specific
//! labels; identity labels are injected by the adapter in [`adapter`] using
//! the default label set owned by the [`GeneratorRegistry`], so the same
//! generator can be reused under differently scoped identity labels.

pub mod adapter;
pub mod filter;
pub mod registry;

pub use adapter::{adapt, GenerateFn};
pub use filter::FamilyFilter;
pub use registry::{GeneratorRegistry, RegistryError};

use crate::kubestate::k8s::{ResourceObject, TypeMismatchError};
use crate::kubestate::metric::labels::LabelCollisionError;
use crate::kubestate::metric::{Family, MetricType};

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    TypeMismatch(TypeMismatchError),
    Labels(LabelCollisionError),
}

impl ExtractError {
    /// Short label used when counting extraction failures.
    pub fn reason(&self) -> &'static str {
        match self {
            ExtractError::TypeMismatch(_) => "type_mismatch",
            ExtractError::Labels(_) => "label_collision",
        }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::TypeMismatch(err) => write!(f, "{err}"),
            ExtractError::Labels(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ExtractError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExtractError::TypeMismatch(err) => Some(err),
            ExtractError::Labels(err) => Some(err),
        }
    }
}

impl From<TypeMismatchError> for ExtractError {
    fn from(err: TypeMismatchError) -> Self {
        ExtractError::TypeMismatch(err)
    }
}

impl From<LabelCollisionError> for ExtractError {
    fn from(err: LabelCollisionError) -> Self {
        ExtractError::Labels(err)
    }
}

#[derive(Clone)]
pub struct FamilyGenerator {
    name: String,
    help: String,
    metric_type: MetricType,
    deprecated_version: String,
    label_keys: Vec<String>,
    generate: GenerateFn,
}

impl FamilyGenerator {
    /// `deprecated_version` is empty for stable families.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        metric_type: MetricType,
        deprecated_version: impl Into<String>,
        generate: GenerateFn,
    ) -> Self {
        let deprecated_version = deprecated_version.into();
        let help = help.into();
        let help = if deprecated_version.is_empty() {
            help
        } else {
            format!("(Deprecated since {deprecated_version}) {help}")
        };
        Self {
            name: name.into(),
            help,
            metric_type,
            deprecated_version,
            label_keys: Vec::new(),
            generate,
        }
    }

    /// Declares the static metric-specific label keys so collisions with the
    /// identity labels are caught at registration.
    pub fn with_label_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn deprecated_version(&self) -> Option<&str> {
        if self.deprecated_version.is_empty() {
            None
        } else {
            Some(&self.deprecated_version)
        }
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    /// Produces this family for one object with identity labels applied.
    pub fn generate(
        &self,
        object: &ResourceObject,
        default_keys: &[String],
    ) -> Result<Family, ExtractError> {
        let metrics = (self.generate)(object, default_keys)?;
        Ok(Family {
            name: self.name.clone(),
            help: self.help.clone(),
            metric_type: self.metric_type,
            metrics,
        })
    }
}

impl fmt::Debug for FamilyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyGenerator")
            .field("name", &self.name)
            .field("metric_type", &self.metric_type)
            .field("deprecated_version", &self.deprecated_version)
            .field("label_keys", &self.label_keys)
            .finish_non_exhaustive()
    }
}
