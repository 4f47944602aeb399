use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use stackup_domain::{
    EnvironmentConfig, ExportValue, RegistryKey, TemplateDocument, UnitId, UnitOutputs,
};

use crate::error::ProvisionError;

const AVAILABILITY_ZONES: [&str; 3] = ["a", "b", "c"];

/// A rendered payload document submitted alongside a provisioning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub name: String,
    pub body: String,
}

impl RenderedDocument {
    #[must_use]
    pub fn new(document: &TemplateDocument, body: String) -> Self {
        Self {
            name: document.name.clone(),
            body,
        }
    }
}

/// Everything the platform needs to create or update one unit.
#[derive(Debug, Clone)]
pub struct ProvisionRequest<'a> {
    pub unit: &'a UnitId,
    pub config: &'a EnvironmentConfig,
    pub inputs: BTreeMap<RegistryKey, ExportValue>,
    pub documents: Vec<RenderedDocument>,
    pub outputs: &'a BTreeSet<RegistryKey>,
}

/// External provisioning collaborator. Calls are made at most once per unit
/// per run; retries are the implementation's concern.
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create or update the unit and return its published outputs.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisionError`] carrying a human-readable cause.
    fn provision(&self, request: &ProvisionRequest<'_>)
    -> std::result::Result<UnitOutputs, ProvisionError>;
}

/// Durable store of outputs published by earlier runs.
pub trait OutputStore: Send + Sync {
    fn published_outputs(&self, unit: &UnitId) -> Option<UnitOutputs>;
}

/// Provisioner that fabricates deterministic outputs instead of calling a
/// cloud API. Identifiers are derived from a SHA-256 digest of environment,
/// region, unit and key, so repeated runs agree with each other.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvisioner {
    failing: BTreeSet<UnitId>,
    published: BTreeMap<UnitId, UnitOutputs>,
}

impl SimulatedProvisioner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(mut self, unit: UnitId) -> Self {
        self.failing.insert(unit);
        self
    }

    #[must_use]
    pub fn with_published(mut self, published: BTreeMap<UnitId, UnitOutputs>) -> Self {
        self.published.extend(published);
        self
    }

    fn synthesize(config: &EnvironmentConfig, unit: &UnitId, key: &RegistryKey) -> ExportValue {
        let digest = short_digest(&[
            config.environment.as_str(),
            config.region.as_str(),
            unit.as_str(),
            key.as_str(),
        ]);
        let leaf = key.leaf();
        let region = &config.region;

        if let Some(kind) = leaf.strip_suffix("_ids") {
            return ExportValue::List(
                AVAILABILITY_ZONES
                    .iter()
                    .map(|zone| format!("{kind}-{digest}{zone}"))
                    .collect(),
            );
        }
        if leaf == "host" {
            return ExportValue::Scalar(format!("{digest}.{unit}.{region}.stackup.internal"));
        }
        if leaf == "endpoint" && key.as_str().contains(".prometheus.") {
            // Workspace endpoints end in `/`; remote-write paths are appended directly.
            return ExportValue::Scalar(format!(
                "https://aps-workspaces.{region}.stackup.internal/workspaces/ws-{digest}/"
            ));
        }
        if leaf == "endpoint" || leaf.ends_with("_url") || leaf == "url" {
            return ExportValue::Scalar(format!(
                "https://{digest}.{unit}.{region}.stackup.internal"
            ));
        }
        if leaf == "arn" {
            let account = config.account.as_deref().unwrap_or("000000000000");
            let resource = key.as_str().replace('.', "/");
            return ExportValue::Scalar(format!("arn:aws:iam::{account}:role/{resource}-{digest}"));
        }
        if leaf == "name" {
            return ExportValue::Scalar(format!("{}-{unit}", config.environment));
        }
        if leaf == "cidr"
            && let Some(cidr) = config.vpc_cidr
        {
            return ExportValue::Scalar(cidr.to_string());
        }
        ExportValue::Scalar(format!("{}-{digest}", key.namespace()))
    }
}

impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn provision(
        &self,
        request: &ProvisionRequest<'_>,
    ) -> std::result::Result<UnitOutputs, ProvisionError> {
        if self.failing.contains(request.unit) {
            return Err(ProvisionError::Failed {
                unit: request.unit.clone(),
                cause: "simulated failure requested".to_string(),
            });
        }

        log::debug!(
            "simulating {} with {} input(s) and {} document(s)",
            request.unit,
            request.inputs.len(),
            request.documents.len()
        );

        Ok(request
            .outputs
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    Self::synthesize(request.config, request.unit, key),
                )
            })
            .collect())
    }
}

impl OutputStore for SimulatedProvisioner {
    fn published_outputs(&self, unit: &UnitId) -> Option<UnitOutputs> {
        self.published.get(unit).cloned()
    }
}

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    digest[..6].iter().map(|byte| format!("{byte:02x}")).collect()
}
