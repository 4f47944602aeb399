use std::io;
use std::path::PathBuf;

use stackup_domain::{DomainValidationError, FailureKind, RegistryKey, UnitId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("configuration field `{field}` must not be empty")]
    EmptyField { field: &'static str },
    #[error("configuration field `node_count` must be at least 1, got {value}")]
    NodeCountTooSmall { value: u32 },
    #[error("configuration field `vpc_cidr` is invalid")]
    InvalidVpcCidr {
        #[source]
        source: DomainValidationError,
    },
    #[error("configuration field `environment` names an unknown environment \"{environment}\" (known: {known})")]
    UnknownEnvironment { environment: String, known: String },
}

impl ConfigError {
    /// Name of the configuration field the error refers to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyField { field } => *field,
            Self::NodeCountTooSmall { .. } => "node_count",
            Self::InvalidVpcCidr { .. } => "vpc_cidr",
            Self::UnknownEnvironment { .. } => "environment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry key {key} was already published by {existing_producer}")]
    DuplicateKey {
        key: RegistryKey,
        existing_producer: UnitId,
    },
    #[error("registry key {key} has not been published")]
    UnresolvedKey { key: RegistryKey },
    #[error("registry key {key} holds a list and cannot be read as a single value")]
    TypeMismatch { key: RegistryKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate unit id: {id}")]
    DuplicateUnit { id: UnitId },
    #[error("dependency graph references unknown units:\n  - {details}")]
    UnknownDependency {
        missing: Vec<UnitId>,
        details: String,
    },
    #[error("output key {key} is declared by both {first} and {second}")]
    DuplicateOutput {
        key: RegistryKey,
        first: UnitId,
        second: UnitId,
    },
    #[error("dependency cycle detected among: {}", join_ids(remaining))]
    CycleDetected { remaining: Vec<UnitId> },
    #[error("target unit {target} is not part of the deployment")]
    UnknownTarget { target: UnitId },
}

fn join_ids(ids: &[UnitId]) -> String {
    ids.iter()
        .map(UnitId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("placeholder ${{{token}}} in {document} has no registry binding")]
    UnboundPlaceholder { document: String, token: String },
    #[error("placeholder ${{{token}}} in {document} could not be resolved")]
    UnresolvedPlaceholder {
        document: String,
        token: String,
        #[source]
        source: RegistryError,
    },
}

impl TemplateError {
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::UnboundPlaceholder { token, .. } | Self::UnresolvedPlaceholder { token, .. } => {
                token
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("provisioning {unit} failed: {cause}")]
    Failed { unit: UnitId, cause: String },
}

/// Error raised at a unit boundary; recorded as that unit's failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("{unit} published {}", describe_mismatch(missing, unexpected))]
    OutputMismatch {
        unit: UnitId,
        missing: Vec<RegistryKey>,
        unexpected: Vec<RegistryKey>,
    },
}

fn describe_mismatch(missing: &[RegistryKey], unexpected: &[RegistryKey]) -> String {
    let list = |keys: &[RegistryKey]| {
        keys.iter()
            .map(RegistryKey::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };
    match (missing.is_empty(), unexpected.is_empty()) {
        (false, false) => format!(
            "an output set that differs from its declaration (missing: {}; unexpected: {})",
            list(missing),
            list(unexpected)
        ),
        (false, true) => format!("fewer outputs than declared (missing: {})", list(missing)),
        (true, false) => format!(
            "outputs it did not declare (unexpected: {})",
            list(unexpected)
        ),
        (true, true) => "its declared outputs".to_string(),
    }
}

impl UnitError {
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Registry(RegistryError::DuplicateKey { .. }) => FailureKind::DuplicateKey,
            Self::Registry(RegistryError::UnresolvedKey { .. }) => FailureKind::UnresolvedKey,
            Self::Registry(RegistryError::TypeMismatch { .. }) => FailureKind::TypeMismatch,
            Self::Template(_) => FailureKind::UnresolvedPlaceholder,
            Self::Provision(_) => FailureKind::Provisioning,
            Self::OutputMismatch { .. } => FailureKind::OutputMismatch,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("pipeline directory does not exist: {root}")]
    RootDoesNotExist { root: PathBuf },
    #[error("pipeline directory must be a directory: {root}")]
    RootIsNotDirectory { root: PathBuf },
    #[error("no pipeline documents found under {root} (expected files ending with .yaml or .yml)")]
    NoDocuments { root: PathBuf },
    #[error("pipeline documents {first} and {second} both map to the name \"{name}\"")]
    DuplicateDocument {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("failed while walking pipeline directory")]
    Walk {
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read pipeline document: {path}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Run-level error: nothing was applied.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("internal orchestration error: {message}")]
    Invariant { message: String },
}
