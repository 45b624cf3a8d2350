//! Model registry
//!
//! A [`ModelRef`] names a schema and knows how to turn a raw JSON mapping into
//! a typed value. Registries hand out model references by name; the query
//! engine never requires one, since many schemas are queried without a
//! registered model.

use super::record::TypedRecord;
use crate::config::ConfigError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A record did not match its model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {index} does not match model '{model}': {message}")]
pub struct ValidationError {
    pub model: String,
    pub index: usize,
    pub message: String,
}

/// How a cast failure affects a running query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CastPolicy {
    /// The failure ends the stream with a `ValidationError`
    #[default]
    Strict,
    /// The record is skipped, logged and counted
    Lenient,
}

/// Model domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Domain {
    #[default]
    Common,
    Native,
}

impl FromStr for Domain {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "common" => Ok(Domain::Common),
            "native" => Ok(Domain::Native),
            other => Err(ConfigError::Invalid(format!(
                "domain must be 'common' or 'native', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Common => f.write_str("common"),
            Domain::Native => f.write_str("native"),
        }
    }
}

type CastFn = dyn Fn(&Value) -> Result<Box<dyn Any + Send + Sync>, String> + Send + Sync;

/// Reference to a typed model
#[derive(Clone)]
pub struct ModelRef {
    name: Arc<str>,
    domain: Domain,
    cast: Arc<CastFn>,
}

impl ModelRef {
    /// Model backed by a serde type
    pub fn of<T>(name: impl Into<String>, domain: Domain) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let cast = |raw: &Value| {
            T::deserialize(raw)
                .map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
                .map_err(|e| e.to_string())
        };
        Self {
            name: Arc::from(name.into()),
            domain,
            cast: Arc::new(cast),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Cast one raw record; `index` is its position in the result sequence
    pub fn cast(&self, raw: Value, index: usize) -> Result<TypedRecord, ValidationError> {
        match (self.cast)(&raw) {
            Ok(value) => Ok(TypedRecord::new(self.name(), raw, value)),
            Err(message) => Err(ValidationError {
                model: self.name().to_string(),
                index,
                message,
            }),
        }
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRef")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .finish()
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain
    }
}

/// Lookup of typed models by name
pub trait ModelRegistry: Send + Sync {
    fn resolve(&self, name: &str, domain: Domain) -> Option<ModelRef>;

    /// Registered model names in a domain, sorted
    fn names(&self, domain: Domain) -> Vec<String>;

    fn cast(
        &self,
        raw: Value,
        model: &ModelRef,
        index: usize,
    ) -> Result<TypedRecord, ValidationError> {
        model.cast(raw, index)
    }
}

/// In-memory registry
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    models: BTreeMap<(Domain, String), ModelRef>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serde-backed model under `name`
    pub fn register<T>(mut self, name: &str, domain: Domain) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.insert(ModelRef::of::<T>(name, domain));
        self
    }

    pub fn insert(&mut self, model: ModelRef) {
        self.models
            .insert((model.domain(), model.name().to_string()), model);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelRegistry for StaticRegistry {
    fn resolve(&self, name: &str, domain: Domain) -> Option<ModelRef> {
        self.models.get(&(domain, name.to_string())).cloned()
    }

    fn names(&self, domain: Domain) -> Vec<String> {
        self.models
            .keys()
            .filter(|(d, _)| *d == domain)
            .map(|(_, name)| name.clone())
            .collect()
    }
}
