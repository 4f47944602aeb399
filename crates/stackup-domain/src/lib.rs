use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod config;
mod report;

pub use config::{ConfigOverrides, EnvironmentConfig, VpcCidr};
pub use report::{
    DeploymentPlan, DeploymentReport, FailureKind, StateCounts, UnitFailure, UnitReport, UnitState,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("unit id must not be empty")]
    EmptyUnitId,
    #[error("registry key must not be empty")]
    EmptyRegistryKey,
    #[error("registry key \"{key}\" contains an empty segment")]
    EmptyKeySegment { key: String },
    #[error("registry key \"{key}\" must not contain whitespace")]
    WhitespaceInKey { key: String },
    #[error("invalid IPv4 CIDR \"{cidr}\": {reason}")]
    InvalidCidr { cidr: String, reason: &'static str },
    #[error("pipeline document \"{name}\" is declared more than once")]
    DuplicateDocument { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

impl UnitId {
    /// Create a unit identifier, rejecting blank names.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` is empty after trimming.
    pub fn new(id: String) -> Result<Self, DomainValidationError> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            Err(DomainValidationError::EmptyUnitId)
        } else if trimmed.len() == id.len() {
            Ok(Self(id))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UnitId {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for UnitId {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for UnitId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<UnitId> for String {
    fn from(value: UnitId) -> Self {
        value.0
    }
}

/// Namespaced registry key such as `network.vpc.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistryKey(String);

impl RegistryKey {
    /// Create a registry key, rejecting blank keys, whitespace and empty
    /// dot-separated segments.
    ///
    /// # Errors
    ///
    /// Returns an error when `key` is not a well-formed dotted key.
    pub fn new(key: String) -> Result<Self, DomainValidationError> {
        if key.trim().is_empty() {
            return Err(DomainValidationError::EmptyRegistryKey);
        }
        if key.chars().any(char::is_whitespace) {
            return Err(DomainValidationError::WhitespaceInKey { key });
        }
        if key.split('.').any(str::is_empty) {
            return Err(DomainValidationError::EmptyKeySegment { key });
        }
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First dot-separated segment, by convention the producing unit.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Last dot-separated segment.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or_default()
    }
}

impl TryFrom<String> for RegistryKey {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RegistryKey {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for RegistryKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for RegistryKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<RegistryKey> for String {
    fn from(value: RegistryKey) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportValue {
    Scalar(String),
    List(Vec<String>),
}

impl From<String> for ExportValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<&str> for ExportValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for ExportValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl fmt::Display for ExportValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => value.fmt(formatter),
            Self::List(values) => write!(formatter, "[{}]", values.join(", ")),
        }
    }
}

pub type UnitOutputs = BTreeMap<RegistryKey, ExportValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub key: RegistryKey,
    pub value: ExportValue,
    pub producer: UnitId,
    pub published_at_ms: u64,
    #[serde(default)]
    pub imported: bool,
}

/// Data-only description of a deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub id: UnitId,
    pub dependencies: Vec<UnitId>,
    pub outputs: BTreeSet<RegistryKey>,
}

impl UnitSpec {
    #[must_use]
    pub const fn new(id: UnitId) -> Self {
        Self {
            id,
            dependencies: Vec::new(),
            outputs: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: UnitId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn publishes(mut self, key: RegistryKey) -> Self {
        self.outputs.insert(key);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDocument {
    pub name: String,
    pub body: String,
}

impl TemplateDocument {
    #[must_use]
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}
