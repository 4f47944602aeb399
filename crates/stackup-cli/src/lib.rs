// Target-specific transitive dependency split (mio/crossterm stack) is accepted for now.
#![allow(clippy::multiple_crate_versions)]

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use minus::{ExitStrategy, Pager, page_all};
use stackup_domain::{ConfigOverrides, TemplateDocument, UnitId, UnitOutputs};
use stackup_engine::{
    ConfigResolver, Orchestrator, Provisioner, RunOptions, RunRequest, SimulatedProvisioner,
    UnknownEnvironmentPolicy, builtin_pipeline_documents, builtin_units,
    discover_pipeline_documents,
};
use stackup_report::{ColorChoice, OutputFormat, RenderOptions, render_deployment, render_plan};

mod error;

pub use error::CliError;

#[derive(Debug, Parser)]
#[command(
    name = "stackup",
    version,
    about = "Dependency-ordered deployment of a cloud environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply every unit (or one unit and its dependencies) in dependency order.
    Deploy {
        #[command(flatten)]
        selection: SelectionFlags,
        #[command(flatten)]
        render: RenderFlags,
        /// Apply independent units concurrently.
        #[arg(long)]
        parallel: bool,
        /// JSON file of outputs published by an earlier run, keyed by unit.
        /// Only consulted for the dependencies of `--unit`.
        #[arg(long, value_name = "FILE", requires = "unit")]
        published: Option<PathBuf>,
        #[arg(long = "simulate-failure", value_name = "UNIT", hide = true)]
        simulate_failure: Vec<String>,
    },
    /// Show the resolved configuration and application order without applying.
    Plan {
        #[command(flatten)]
        selection: SelectionFlags,
        #[command(flatten)]
        render: RenderFlags,
    },
}

#[derive(Debug, Clone, Args)]
struct SelectionFlags {
    #[arg(long, default_value = "dev")]
    environment: String,
    /// Defaults to the environment's region.
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    account: Option<String>,
    /// Restrict the run to this unit and its dependencies.
    #[arg(long, value_name = "UNIT")]
    unit: Option<String>,
    #[arg(long)]
    node_count: Option<u32>,
    #[arg(long)]
    instance_class: Option<String>,
    #[arg(long)]
    vpc_cidr: Option<String>,
    #[arg(long)]
    platform_version: Option<String>,
    /// Directory of pipeline documents (*.yaml, *.yml) replacing the built-in set.
    #[arg(long, value_name = "DIR")]
    pipelines: Option<PathBuf>,
    /// Reject environments that have no defaults instead of falling back.
    #[arg(long)]
    strict_environment: bool,
}

impl SelectionFlags {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            vpc_cidr: self.vpc_cidr.clone(),
            platform_version: self.platform_version.clone(),
            instance_class: self.instance_class.clone(),
            node_count: self.node_count,
            account: self.account.clone(),
        }
    }

    fn resolver(&self) -> ConfigResolver<'static> {
        let policy = if self.strict_environment {
            UnknownEnvironmentPolicy::Reject
        } else {
            UnknownEnvironmentPolicy::FallBack
        };
        ConfigResolver::default().with_policy(policy)
    }

    fn target(&self) -> std::result::Result<Option<UnitId>, CliError> {
        self.unit
            .as_deref()
            .map(UnitId::try_from)
            .transpose()
            .map_err(|source| CliError::InvalidUnit { source })
    }

    fn documents(&self) -> std::result::Result<Vec<TemplateDocument>, CliError> {
        match &self.pipelines {
            Some(root) => Ok(discover_pipeline_documents(root)?),
            None => Ok(builtin_pipeline_documents()),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Args)]
struct RenderFlags {
    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,
    #[arg(long, value_enum, default_value_t = ColorArg::Auto)]
    color: ColorArg,
    #[arg(long)]
    verbose: bool,
}

impl RenderFlags {
    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            color: self.color.into(),
            verbose: self.verbose,
        }
    }
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

impl From<ColorArg> for ColorChoice {
    fn from(value: ColorArg) -> Self {
        match value {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Run the CLI using process arguments.
///
/// # Errors
///
/// Returns an error when configuration, the dependency graph, pipeline
/// documents or the published-outputs file are invalid, or rendering fails.
pub fn run() -> std::result::Result<i32, CliError> {
    run_from(std::env::args_os())
}

fn run_from<I, T>(args: I) -> std::result::Result<i32, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => {
                let _ = error.print();
                return Ok(1);
            }
        },
    };

    match cli.command {
        Commands::Deploy {
            selection,
            render,
            parallel,
            published,
            simulate_failure,
        } => {
            init_logging(render.verbose);
            let mut provisioner = SimulatedProvisioner::new();
            for unit in simulate_failure {
                let unit = UnitId::try_from(unit).map_err(|source| CliError::InvalidUnit { source })?;
                provisioner = provisioner.failing(unit);
            }
            if let Some(path) = &published {
                provisioner = provisioner.with_published(read_published(path)?);
            }

            let documents = selection.documents()?;
            let provisioner = Arc::new(provisioner);
            let shared: Arc<dyn Provisioner> = Arc::clone(&provisioner) as Arc<dyn Provisioner>;
            let units = builtin_units(&shared, documents)
                .map_err(|source| CliError::Catalog { source })?;

            let overrides = selection.overrides();
            let resolver = selection.resolver();
            let region = region_for(&selection, &resolver);
            let options = RunOptions {
                parallel,
                target: selection.target()?,
                cancel: None,
            };
            let report = Orchestrator::new(resolver)
                .with_output_store(provisioner.as_ref())
                .run(
                    RunRequest {
                        environment: &selection.environment,
                        region: &region,
                        overrides: &overrides,
                    },
                    &units,
                    &options,
                )?;

            let output_format: OutputFormat = render.format.into();
            let rendered = render_deployment(&report, output_format, &render.render_options())?;
            emit_output(&rendered, output_format);
            Ok(i32::from(report.has_failures()))
        }
        Commands::Plan { selection, render } => {
            init_logging(render.verbose);
            let documents = selection.documents()?;
            let provisioner: Arc<dyn Provisioner> = Arc::new(SimulatedProvisioner::new());
            let units = builtin_units(&provisioner, documents)
                .map_err(|source| CliError::Catalog { source })?;

            let overrides = selection.overrides();
            let resolver = selection.resolver();
            let region = region_for(&selection, &resolver);
            let target = selection.target()?;
            let plan = Orchestrator::new(resolver).plan(
                RunRequest {
                    environment: &selection.environment,
                    region: &region,
                    overrides: &overrides,
                },
                &units,
                target.as_ref(),
            )?;

            let output_format: OutputFormat = render.format.into();
            let rendered = render_plan(&plan, output_format, &render.render_options())?;
            emit_output(&rendered, output_format);
            Ok(0)
        }
    }
}

fn region_for(selection: &SelectionFlags, resolver: &ConfigResolver<'_>) -> String {
    selection.region.clone().unwrap_or_else(|| {
        resolver
            .default_region(&selection.environment)
            .to_string()
    })
}

fn read_published(path: &Path) -> std::result::Result<BTreeMap<UnitId, UnitOutputs>, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::PublishedRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::PublishedParse {
        path: path.to_path_buf(),
        source,
    })
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
}

fn emit_output(rendered: &str, format: OutputFormat) {
    if format == OutputFormat::Text && should_use_pager() && page_output(rendered).is_ok() {
        return;
    }

    if rendered.ends_with('\n') {
        print!("{rendered}");
    } else {
        println!("{rendered}");
    }
}

fn should_use_pager() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_PAGER").is_none()
}

fn page_output(rendered: &str) -> std::result::Result<(), minus::MinusError> {
    let pager = Pager::new();
    pager.set_exit_strategy(ExitStrategy::PagerQuit)?;
    pager.set_text(rendered)?;
    page_all(pager)
}
