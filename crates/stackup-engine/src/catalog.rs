use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use stackup_domain::{
    DomainValidationError, ExportValue, RegistryKey, TemplateDocument, UnitId, UnitSpec,
};

use crate::provisioner::{ProvisionRequest, Provisioner, RenderedDocument};
use crate::registry::RegistryView;
use crate::template::{TemplateResolver, TokenBinding};
use crate::unit::Unit;

pub const NETWORK: &str = "network";
pub const CLUSTER: &str = "cluster";
pub const OBSERVABILITY: &str = "observability";
pub const PIPELINES: &str = "pipelines";

const VPC_ID: &str = "network.vpc.id";
const VPC_CIDR: &str = "network.vpc.cidr";
const PRIVATE_SUBNETS: &str = "network.subnets.private_ids";
const PUBLIC_SUBNETS: &str = "network.subnets.public_ids";
const CLUSTER_NAME: &str = "cluster.name";
const CLUSTER_ENDPOINT: &str = "cluster.endpoint";
const CLUSTER_OIDC_ARN: &str = "cluster.oidc_provider.arn";
const CLUSTER_NODE_ROLE_ARN: &str = "cluster.node_role.arn";
const PROMETHEUS_WORKSPACE: &str = "observability.prometheus.workspace_id";
const PROMETHEUS_ENDPOINT: &str = "observability.prometheus.endpoint";
const GRAFANA_ENDPOINT: &str = "observability.grafana.endpoint";
const OPENSEARCH_HOST: &str = "observability.opensearch.host";
const PIPELINE_ROLE_ARN: &str = "observability.pipeline_role.arn";

const BUILTIN_PIPELINES: [(&str, &str); 3] = [
    ("traces", include_str!("../pipelines/traces.yaml")),
    ("logs", include_str!("../pipelines/logs.yaml")),
    ("metrics", include_str!("../pipelines/metrics.yaml")),
];

type CatalogResult<T> = std::result::Result<T, DomainValidationError>;

/// Pipeline documents shipped with the binary.
#[must_use]
pub fn builtin_pipeline_documents() -> Vec<TemplateDocument> {
    BUILTIN_PIPELINES
        .iter()
        .map(|(name, body)| TemplateDocument::new(*name, *body))
        .collect()
}

/// Token bindings available to every pipeline document.
///
/// # Errors
///
/// Fails only if a built-in registry key is malformed.
pub fn pipeline_bindings() -> CatalogResult<TemplateResolver> {
    Ok(TemplateResolver::default()
        .bind(
            "OPENSEARCH_ENDPOINT",
            TokenBinding::key(key(OPENSEARCH_HOST)?).with_prefix("https://"),
        )
        .bind(
            "PROMETHEUS_ENDPOINT",
            TokenBinding::key(key(PROMETHEUS_ENDPOINT)?),
        )
        .bind("PIPELINE_ROLE_ARN", TokenBinding::key(key(PIPELINE_ROLE_ARN)?))
        .bind("CLUSTER_NAME", TokenBinding::key(key(CLUSTER_NAME)?))
        .bind(
            "PRIVATE_SUBNET_IDS",
            TokenBinding::key(key(PRIVATE_SUBNETS)?).joined(","),
        ))
}

/// The standard deployment: network, cluster, observability and the
/// telemetry pipelines rendered from `documents`.
///
/// # Errors
///
/// Returns an error when a document name cannot form a registry key
/// segment or two documents share a name.
pub fn builtin_units(
    provisioner: &Arc<dyn Provisioner>,
    documents: Vec<TemplateDocument>,
) -> CatalogResult<Vec<Unit>> {
    let network = UnitBuilder::new(NETWORK)?.publishes(&[
        VPC_ID,
        VPC_CIDR,
        PRIVATE_SUBNETS,
        PUBLIC_SUBNETS,
    ])?;

    let cluster = UnitBuilder::new(CLUSTER)?
        .depends_on(&[NETWORK])?
        .reads(VPC_ID, Read::Scalar)?
        .reads(PRIVATE_SUBNETS, Read::List)?
        .publishes(&[
            CLUSTER_NAME,
            CLUSTER_ENDPOINT,
            CLUSTER_OIDC_ARN,
            CLUSTER_NODE_ROLE_ARN,
        ])?;

    let observability = UnitBuilder::new(OBSERVABILITY)?
        .depends_on(&[NETWORK, CLUSTER])?
        .reads(CLUSTER_NAME, Read::Scalar)?
        .publishes(&[
            PROMETHEUS_WORKSPACE,
            PROMETHEUS_ENDPOINT,
            GRAFANA_ENDPOINT,
            OPENSEARCH_HOST,
            PIPELINE_ROLE_ARN,
        ])?;

    let mut names = BTreeSet::new();
    for document in &documents {
        if !names.insert(document.name.as_str()) {
            return Err(DomainValidationError::DuplicateDocument {
                name: document.name.clone(),
            });
        }
    }
    let pipeline_outputs: Vec<String> = names
        .iter()
        .map(|name| format!("{PIPELINES}.{name}.url"))
        .collect();
    let pipelines = UnitBuilder::new(PIPELINES)?
        .depends_on(&[CLUSTER, OBSERVABILITY])?
        .publishes(
            &pipeline_outputs
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        )?
        .renders(documents, pipeline_bindings()?);

    Ok([network, cluster, observability, pipelines]
        .into_iter()
        .map(|builder| builder.build(Arc::clone(provisioner)))
        .collect())
}

fn key(value: &str) -> CatalogResult<RegistryKey> {
    RegistryKey::try_from(value)
}

#[derive(Debug, Clone, Copy)]
enum Read {
    Scalar,
    List,
}

struct UnitBuilder {
    spec: UnitSpec,
    reads: Vec<(RegistryKey, Read)>,
    documents: Vec<TemplateDocument>,
    templates: TemplateResolver,
}

impl UnitBuilder {
    fn new(id: &str) -> CatalogResult<Self> {
        Ok(Self {
            spec: UnitSpec::new(UnitId::try_from(id)?),
            reads: Vec::new(),
            documents: Vec::new(),
            templates: TemplateResolver::default(),
        })
    }

    fn depends_on(mut self, dependencies: &[&str]) -> CatalogResult<Self> {
        for dependency in dependencies {
            self.spec = self.spec.depends_on(UnitId::try_from(*dependency)?);
        }
        Ok(self)
    }

    fn reads(mut self, input: &str, read: Read) -> CatalogResult<Self> {
        self.reads.push((key(input)?, read));
        Ok(self)
    }

    fn publishes(mut self, outputs: &[&str]) -> CatalogResult<Self> {
        for output in outputs {
            self.spec = self.spec.publishes(key(output)?);
        }
        Ok(self)
    }

    fn renders(mut self, documents: Vec<TemplateDocument>, templates: TemplateResolver) -> Self {
        self.documents = documents;
        self.templates = templates;
        self
    }

    fn build(self, provisioner: Arc<dyn Provisioner>) -> Unit {
        let Self {
            spec,
            reads,
            documents,
            templates,
        } = self;
        let declared = spec.outputs.clone();
        let id = spec.id.clone();

        Unit::new(spec, move |config, registry| {
            let inputs = read_inputs(&reads, registry)?;
            let rendered = documents
                .iter()
                .map(|document| {
                    templates
                        .render_document(document, registry)
                        .map(|body| RenderedDocument::new(document, body))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let request = ProvisionRequest {
                unit: &id,
                config,
                inputs,
                documents: rendered,
                outputs: &declared,
            };
            log::debug!("{} provisioning via {}", id, provisioner.name());
            Ok(provisioner.provision(&request)?)
        })
    }
}

fn read_inputs(
    reads: &[(RegistryKey, Read)],
    registry: &RegistryView<'_>,
) -> std::result::Result<BTreeMap<RegistryKey, ExportValue>, crate::error::RegistryError> {
    reads
        .iter()
        .map(|(input, read)| {
            let value = match read {
                Read::Scalar => ExportValue::Scalar(registry.resolve(input)?),
                Read::List => ExportValue::List(registry.resolve_list(input)?),
            };
            Ok((input.clone(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use std::sync::{Arc, Mutex};

    use stackup_domain::{
        ConfigOverrides, DomainValidationError, ExportValue, FailureKind, RegistryKey, TemplateDocument, UnitId,
        UnitOutputs, UnitState,
    };

    use super::{builtin_pipeline_documents, builtin_units, pipeline_bindings};
    use crate::error::ProvisionError;
    use crate::orchestrator::{Orchestrator, RunOptions, RunRequest};
    use crate::provisioner::{ProvisionRequest, Provisioner, SimulatedProvisioner};
    use crate::template::placeholders;

    fn key(value: &str) -> RegistryKey {
        RegistryKey::try_from(value).expect("key")
    }

    fn deploy(
        provisioner: Arc<dyn Provisioner>,
        documents: Vec<TemplateDocument>,
    ) -> stackup_domain::DeploymentReport {
        let units = builtin_units(&provisioner, documents).expect("catalog");
        let overrides = ConfigOverrides::default();
        Orchestrator::default()
            .run(
                RunRequest {
                    environment: "dev",
                    region: "us-west-2",
                    overrides: &overrides,
                },
                &units,
                &RunOptions::default(),
            )
            .expect("run")
    }

    /// Records rendered documents so tests can inspect substitutions.
    struct CapturingProvisioner {
        inner: SimulatedProvisioner,
        documents: Mutex<Vec<(String, String)>>,
    }

    impl Provisioner for CapturingProvisioner {
        fn name(&self) -> &'static str {
            "capturing"
        }

        fn provision(
            &self,
            request: &ProvisionRequest<'_>,
        ) -> std::result::Result<UnitOutputs, ProvisionError> {
            self.documents.lock().expect("documents").extend(
                request
                    .documents
                    .iter()
                    .map(|document| (document.name.clone(), document.body.clone())),
            );
            self.inner.provision(request)
        }
    }

    #[test]
    fn builtin_documents_only_use_bound_tokens() {
        let bindings = pipeline_bindings().expect("bindings");
        for document in builtin_pipeline_documents() {
            for token in placeholders(&document.body) {
                assert!(
                    bindings.bindings().contains_key(&token),
                    "{} uses unbound token {token}",
                    document.name
                );
            }
        }
    }

    #[test]
    fn standard_deployment_publishes_everything() {
        let report = deploy(
            Arc::new(SimulatedProvisioner::new()),
            builtin_pipeline_documents(),
        );

        let order: Vec<&str> = report.order.iter().map(UnitId::as_str).collect();
        assert_eq!(order, ["network", "cluster", "observability", "pipelines"]);
        assert!(!report.has_failures());
        assert_eq!(report.counts().published, 4);
        assert_eq!(
            report.unit("pipelines").expect("pipelines").published,
            vec![
                key("pipelines.logs.url"),
                key("pipelines.metrics.url"),
                key("pipelines.traces.url"),
            ]
        );
    }

    #[test]
    fn rendered_documents_carry_registry_values() {
        let provisioner = Arc::new(CapturingProvisioner {
            inner: SimulatedProvisioner::new(),
            documents: Mutex::new(Vec::new()),
        });
        let report = deploy(
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            vec![TemplateDocument::new(
                "capture",
                "hosts: ${OPENSEARCH_ENDPOINT}\ncluster: ${CLUSTER_NAME}\nsubnets: ${PRIVATE_SUBNET_IDS}\n",
            )],
        );
        assert!(!report.has_failures());

        let documents = provisioner.documents.lock().expect("documents").clone();
        let (name, body) = documents.first().expect("rendered document");
        assert_eq!(name, "capture");
        assert!(body.contains("hosts: https://"), "{body}");
        assert!(!body.contains("https://https://"), "{body}");
        assert!(body.contains("cluster: dev-cluster"), "{body}");
        let subnets = report
            .exports
            .iter()
            .find(|entry| entry.key == key("network.subnets.private_ids"))
            .expect("subnets");
        let ExportValue::List(ids) = &subnets.value else {
            panic!("subnets are published as a list");
        };
        assert!(body.contains(&format!("subnets: {}", ids.join(","))), "{body}");
    }

    #[test]
    fn unbound_token_fails_only_the_pipelines_unit() {
        let report = deploy(
            Arc::new(SimulatedProvisioner::new()),
            vec![TemplateDocument::new("custom", "sink: ${NOT_PUBLISHED}")],
        );

        assert_eq!(
            report.unit("observability").expect("observability").state,
            UnitState::Published
        );
        let pipelines = report.unit("pipelines").expect("pipelines");
        assert_eq!(pipelines.state, UnitState::Failed);
        let failure = pipelines.failure.as_ref().expect("failure");
        assert_eq!(failure.kind, FailureKind::UnresolvedPlaceholder);
        assert!(failure.message.contains("NOT_PUBLISHED"), "{}", failure.message);
    }

    #[test]
    fn cluster_failure_skips_observability_and_pipelines() {
        let report = deploy(
            Arc::new(
                SimulatedProvisioner::new().failing(UnitId::try_from("cluster").expect("id")),
            ),
            builtin_pipeline_documents(),
        );

        assert_eq!(report.unit("network").expect("network").state, UnitState::Published);
        assert_eq!(report.unit("cluster").expect("cluster").state, UnitState::Failed);
        for skipped in ["observability", "pipelines"] {
            let unit = report.unit(skipped).expect("unit");
            assert_eq!(unit.state, UnitState::Skipped);
            assert_eq!(unit.blocked_by.as_ref().map(UnitId::as_str), Some("cluster"));
        }
    }

    #[test]
    fn builtin_metrics_document_renders_a_remote_write_url() {
        let provisioner = Arc::new(CapturingProvisioner {
            inner: SimulatedProvisioner::new(),
            documents: Mutex::new(Vec::new()),
        });
        let report = deploy(
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            builtin_pipeline_documents(),
        );
        assert!(!report.has_failures());

        let documents = provisioner.documents.lock().expect("documents").clone();
        let (_, body) = documents
            .iter()
            .find(|(name, _)| name == "metrics")
            .expect("metrics document");
        let url = body
            .lines()
            .find_map(|line| line.trim().strip_prefix("url: "))
            .expect("url line")
            .trim_matches('"');

        let endpoint = report
            .exports
            .iter()
            .find(|entry| entry.key == key("observability.prometheus.endpoint"))
            .expect("prometheus endpoint");
        assert_eq!(url, format!("{}api/v1/remote_write", endpoint.value));
        assert!(url.starts_with("https://"), "{url}");
        assert!(url.contains("/workspaces/"), "{url}");
        assert!(url.ends_with("/api/v1/remote_write"), "{url}");
        assert!(!url.contains("//api"), "{url}");
    }

    #[test]
    fn duplicate_document_names_are_rejected() {
        let provisioner: Arc<dyn Provisioner> = Arc::new(SimulatedProvisioner::new());
        let result = builtin_units(
            &provisioner,
            vec![
                TemplateDocument::new("traces", "a: ${CLUSTER_NAME}"),
                TemplateDocument::new("traces", "b: ${CLUSTER_NAME}"),
            ],
        );
        assert!(matches!(
            result,
            Err(DomainValidationError::DuplicateDocument { name }) if name == "traces"
        ));
    }

    #[test]
    fn document_names_with_whitespace_are_rejected() {
        let provisioner: Arc<dyn Provisioner> = Arc::new(SimulatedProvisioner::new());
        let result = builtin_units(
            &provisioner,
            vec![TemplateDocument::new("bad name", "x: 1")],
        );
        assert!(result.is_err());
    }
}
