use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid unit selection")]
    InvalidUnit {
        #[source]
        source: stackup_domain::DomainValidationError,
    },
    #[error("pipeline documents cannot be published as registry keys")]
    Catalog {
        #[source]
        source: stackup_domain::DomainValidationError,
    },
    #[error(transparent)]
    Discovery(#[from] stackup_engine::DiscoveryError),
    #[error(transparent)]
    Deployment(#[from] stackup_engine::DeploymentError),
    #[error("failed to read published outputs: {path}")]
    PublishedRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse published outputs: {path}")]
    PublishedParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Report(#[from] stackup_report::ReportError),
}
