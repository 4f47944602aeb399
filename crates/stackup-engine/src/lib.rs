mod catalog;
mod config;
mod discovery;
mod error;
mod graph;
mod orchestrator;
mod provisioner;
mod registry;
mod template;
mod unit;

pub use catalog::{
    CLUSTER, NETWORK, OBSERVABILITY, PIPELINES, builtin_pipeline_documents, builtin_units,
    pipeline_bindings,
};
pub use config::{
    ConfigResolver, DEFAULT_PLATFORM_VERSION, DEFAULTS_TABLE, EnvironmentDefaults,
    FALLBACK_ENVIRONMENT, FALLBACK_REGION, ResolvedConfig, UnknownEnvironmentPolicy,
};
pub use discovery::discover_pipeline_documents;
pub use error::{
    ConfigError, DeploymentError, DiscoveryError, GraphError, ProvisionError, RegistryError,
    TemplateError, UnitError,
};
pub use graph::{DependencyGraph, build_application_order, dependency_closure};
pub use orchestrator::{Orchestrator, RunOptions, RunRequest};
pub use provisioner::{
    OutputStore, ProvisionRequest, Provisioner, RenderedDocument, SimulatedProvisioner,
};
pub use registry::{ExportRegistry, RegistryView};
pub use template::{TemplateResolver, TokenBinding, placeholders};
pub use unit::{ApplyFn, Unit, verify_outputs};
