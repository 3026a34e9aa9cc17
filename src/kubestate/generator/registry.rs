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

use crate::kubestate::generator::{FamilyFilter, FamilyGenerator};
use crate::kubestate::k8s::object::default_label_keys;
use crate::kubestate::k8s::{Resource, ResourceKind};
use crate::kubestate::logger::log_error;
use crate::kubestate::metric::labels::{ensure_disjoint, ensure_unique, LabelCollisionError};

use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    EmptyName,
    /// The identity label keys are not the set declared for the kind.
    IdentityLabels {
        kind: ResourceKind,
        keys: Vec<String>,
    },
    DuplicateName(String),
    Labels {
        family: String,
        source: LabelCollisionError,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::EmptyName => write!(f, "metric family name must not be empty"),
            RegistryError::IdentityLabels { kind, keys } => write!(
                f,
                "identity labels [{}] do not match [{}] declared for {}",
                keys.join(", "),
                kind.default_labels().join(", "),
                kind.plural()
            ),
            RegistryError::DuplicateName(name) => {
                write!(f, "metric family '{name}' is already registered")
            }
            RegistryError::Labels { family, source } => {
                write!(f, "metric family '{family}' has invalid labels: {source}")
            }
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegistryError::Labels { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Ordered set of family generators for one resource kind, together with
/// the identity label keys injected into every family.
#[derive(Clone, Debug)]
pub struct GeneratorRegistry {
    kind: ResourceKind,
    default_labels: Arc<[String]>,
    generators: Vec<FamilyGenerator>,
}

impl GeneratorRegistry {
    pub fn new(kind: ResourceKind, default_labels: Arc<[String]>) -> Result<Self, RegistryError> {
        ensure_unique(&default_labels).map_err(|source| RegistryError::Labels {
            family: String::new(),
            source,
        })?;
        let declared = kind.default_labels();
        let same_set = default_labels.len() == declared.len()
            && default_labels
                .iter()
                .all(|key| declared.contains(&key.as_str()));
        if !same_set {
            return Err(RegistryError::IdentityLabels {
                kind,
                keys: default_labels.to_vec(),
            });
        }
        Ok(Self {
            kind,
            default_labels,
            generators: Vec::new(),
        })
    }

    /// Registry using the identity labels declared by `R`.
    pub fn for_resource<R: Resource>() -> Result<Self, RegistryError> {
        Self::new(R::KIND, default_label_keys::<R>())
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn default_labels(&self) -> &[String] {
        &self.default_labels
    }

    pub fn generators(&self) -> &[FamilyGenerator] {
        &self.generators
    }

    pub fn names(&self) -> Vec<&str> {
        self.generators.iter().map(FamilyGenerator::name).collect()
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn register(&mut self, generator: FamilyGenerator) -> Result<(), RegistryError> {
        let result = self.validate(&generator);
        if let Err(err) = &result {
            let kind = self.kind.plural();
            let message = err.to_string();
            log_error(
                "generator",
                "Rejected metric family registration",
                &[
                    ("resource", kind),
                    ("family", generator.name()),
                    ("error", message.as_str()),
                ],
            );
        }
        result?;
        self.generators.push(generator);
        Ok(())
    }

    pub fn register_all<I>(&mut self, generators: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = FamilyGenerator>,
    {
        for generator in generators {
            self.register(generator)?;
        }
        Ok(())
    }

    /// Keeps only the generators admitted by `filter`, preserving order.
    pub fn filter(mut self, filter: &FamilyFilter) -> Self {
        self.generators
            .retain(|generator| filter.is_included(generator.name()));
        self
    }

    fn validate(&self, generator: &FamilyGenerator) -> Result<(), RegistryError> {
        if generator.name().trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self
            .generators
            .iter()
            .any(|existing| existing.name() == generator.name())
        {
            return Err(RegistryError::DuplicateName(generator.name().to_string()));
        }
        ensure_disjoint(&self.default_labels, generator.label_keys()).map_err(|source| {
            RegistryError::Labels {
                family: generator.name().to_string(),
                source,
            }
        })
    }
}
