use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use stackup_domain::{
    ConfigOverrides, DeploymentPlan, DeploymentReport, EnvironmentConfig, RegistryKey,
    UnitFailure, UnitId, UnitReport, UnitSpec, UnitState,
};

use crate::config::ConfigResolver;
use crate::error::{DeploymentError, UnitError};
use crate::graph::DependencyGraph;
use crate::provisioner::OutputStore;
use crate::registry::ExportRegistry;
use crate::unit::Unit;

type DeploymentResult<T> = std::result::Result<T, DeploymentError>;

/// Raw inputs the configuration is resolved from.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub environment: &'a str,
    pub region: &'a str,
    pub overrides: &'a ConfigOverrides,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Apply independent branches concurrently, one dependency wave at a time.
    pub parallel: bool,
    /// Restrict the run to this unit and its transitive dependencies.
    pub target: Option<UnitId>,
    /// Checked before each unit (or wave) is started.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RunOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

pub struct Orchestrator<'a> {
    resolver: ConfigResolver<'a>,
    output_store: Option<&'a dyn OutputStore>,
}

impl Default for Orchestrator<'static> {
    fn default() -> Self {
        Self::new(ConfigResolver::default())
    }
}

impl<'a> Orchestrator<'a> {
    #[must_use]
    pub const fn new(resolver: ConfigResolver<'a>) -> Self {
        Self {
            resolver,
            output_store: None,
        }
    }

    /// Source of previously published outputs used by targeted runs.
    #[must_use]
    pub fn with_output_store<'b>(self, store: &'b dyn OutputStore) -> Orchestrator<'b>
    where
        'a: 'b,
    {
        Orchestrator {
            resolver: self.resolver,
            output_store: Some(store),
        }
    }

    /// Resolve configuration and application order without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error when configuration is invalid, the graph is malformed,
    /// or `target` is not declared.
    pub fn plan(
        &self,
        request: RunRequest<'_>,
        units: &[Unit],
        target: Option<&UnitId>,
    ) -> DeploymentResult<DeploymentPlan> {
        let specs = unit_specs(units);
        let prepared = self.prepare(request, &specs, target)?;
        Ok(DeploymentPlan {
            order: prepared.order_ids(&specs),
            units: prepared
                .order
                .iter()
                .map(|&position| specs[position].clone())
                .collect(),
            config: prepared.config,
            target: target.cloned(),
            warnings: prepared.warnings,
        })
    }

    /// Apply `units` in dependency order and report every unit's final state.
    ///
    /// Configuration and graph errors abort before anything is applied.
    /// Failures inside a unit are recorded on that unit; its dependents are
    /// skipped while independent branches continue.
    ///
    /// # Errors
    ///
    /// Returns an error when configuration is invalid, the graph is malformed,
    /// the target is unknown, or an internal state invariant is violated.
    pub fn run(
        &self,
        request: RunRequest<'_>,
        units: &[Unit],
        options: &RunOptions,
    ) -> DeploymentResult<DeploymentReport> {
        let specs = unit_specs(units);
        let prepared = self.prepare(request, &specs, options.target.as_ref())?;
        let graph = DependencyGraph::new(&specs)?;
        let registry = ExportRegistry::new();
        let mut run = RunState::new(&specs, &graph);
        let mut warnings = prepared.warnings.clone();

        log::info!(
            "deploying {} unit(s) to {}/{}",
            prepared.order.len(),
            prepared.config.environment,
            prepared.config.region
        );

        if let Some(target) = &options.target {
            self.import_dependencies(&prepared, units, target, &registry, &mut run, &mut warnings)?;
        }

        let cancelled = if options.parallel {
            apply_in_waves(&prepared, units, &registry, &mut run, options)?
        } else {
            apply_in_order(&prepared, units, &registry, &mut run, options)?
        };

        if cancelled {
            log::warn!("deployment cancelled; units not yet started remain pending");
        }

        Ok(DeploymentReport {
            order: prepared.order_ids(&specs),
            units: run.into_reports(&prepared.order),
            exports: registry.snapshot(),
            config: prepared.config,
            target: options.target.clone(),
            cancelled,
            warnings,
        })
    }

    fn prepare(
        &self,
        request: RunRequest<'_>,
        specs: &[UnitSpec],
        target: Option<&UnitId>,
    ) -> DeploymentResult<Prepared> {
        let resolved = self
            .resolver
            .resolve(request.environment, request.region, request.overrides)?;
        let graph = DependencyGraph::new(specs)?;
        let mut order = graph.order_positions()?;
        if let Some(target) = target {
            let closure = graph.closure_positions(target)?;
            order.retain(|position| closure.contains(position));
        }
        Ok(Prepared {
            config: resolved.config,
            warnings: resolved.warnings,
            order,
        })
    }

    fn import_dependencies(
        &self,
        prepared: &Prepared,
        units: &[Unit],
        target: &UnitId,
        registry: &ExportRegistry,
        run: &mut RunState,
        warnings: &mut Vec<String>,
    ) -> DeploymentResult<()> {
        let Some(store) = self.output_store else {
            return Ok(());
        };

        for &position in &prepared.order {
            let unit = &units[position];
            if unit.id() == target {
                continue;
            }
            let Some(outputs) = store.published_outputs(unit.id()) else {
                continue;
            };

            let stored: BTreeSet<&RegistryKey> = outputs.keys().collect();
            let declared: BTreeSet<&RegistryKey> = unit.spec().outputs.iter().collect();
            if stored != declared {
                warnings.push(format!(
                    "stored outputs for {} do not match its declaration; applying it again",
                    unit.id()
                ));
                continue;
            }

            let keys: Vec<RegistryKey> = outputs.keys().cloned().collect();
            match registry.import(unit.id(), outputs) {
                Ok(()) => {
                    log::info!("{} imported from previous run", unit.id());
                    let report = run.transition(position, UnitState::Published)?;
                    report.published = keys;
                    report.imported = true;
                }
                Err(error) => {
                    warnings.push(format!(
                        "could not import outputs for {}: {error}; applying it again",
                        unit.id()
                    ));
                }
            }
        }
        Ok(())
    }
}

struct Prepared {
    config: EnvironmentConfig,
    warnings: Vec<String>,
    /// Declaration indices in application order, restricted to the target
    /// closure when one was given.
    order: Vec<usize>,
}

impl Prepared {
    fn order_ids(&self, specs: &[UnitSpec]) -> Vec<UnitId> {
        self.order
            .iter()
            .map(|&position| specs[position].id.clone())
            .collect()
    }
}

fn unit_specs(units: &[Unit]) -> Vec<UnitSpec> {
    units.iter().map(|unit| unit.spec().clone()).collect()
}

enum Readiness {
    Ready,
    Waiting,
    /// A dependency failed or was skipped; carries the root failed unit.
    Blocked(UnitId),
}

struct RunState {
    reports: Vec<UnitReport>,
    dependencies: Vec<Vec<usize>>,
}

impl RunState {
    fn new(specs: &[UnitSpec], graph: &DependencyGraph<'_>) -> Self {
        Self {
            reports: specs
                .iter()
                .map(|spec| UnitReport::pending(spec.id.clone(), spec.dependencies.clone()))
                .collect(),
            dependencies: (0..specs.len())
                .map(|position| graph.dependencies_of(position).to_vec())
                .collect(),
        }
    }

    fn state(&self, position: usize) -> UnitState {
        self.reports[position].state
    }

    fn transition(
        &mut self,
        position: usize,
        next: UnitState,
    ) -> DeploymentResult<&mut UnitReport> {
        let report = &mut self.reports[position];
        if !report.state.can_transition_to(next) {
            return Err(DeploymentError::Invariant {
                message: format!(
                    "{} cannot move from {} to {}",
                    report.unit,
                    report.state.as_str(),
                    next.as_str()
                ),
            });
        }
        report.state = next;
        Ok(report)
    }

    fn readiness(&self, position: usize) -> Readiness {
        let mut waiting = false;
        for &dependency in &self.dependencies[position] {
            let report = &self.reports[dependency];
            match report.state {
                UnitState::Published => {}
                UnitState::Failed => return Readiness::Blocked(report.unit.clone()),
                UnitState::Skipped => {
                    return Readiness::Blocked(
                        report
                            .blocked_by
                            .clone()
                            .unwrap_or_else(|| report.unit.clone()),
                    );
                }
                UnitState::Pending | UnitState::Applying => waiting = true,
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    fn skip(&mut self, position: usize, root: UnitId) -> DeploymentResult<()> {
        log::warn!(
            "{} skipped: dependency {root} failed",
            self.reports[position].unit
        );
        let report = self.transition(position, UnitState::Skipped)?;
        report.blocked_by = Some(root);
        Ok(())
    }

    fn start(&mut self, position: usize) -> DeploymentResult<()> {
        log::info!("{} applying", self.reports[position].unit);
        self.transition(position, UnitState::Applying).map(|_| ())
    }

    fn finish(&mut self, position: usize, outcome: UnitOutcome) -> DeploymentResult<()> {
        match outcome.result {
            Ok(published) => {
                log::info!(
                    "{} published {} output(s)",
                    self.reports[position].unit,
                    published.len()
                );
                let report = self.transition(position, UnitState::Published)?;
                report.published = published;
                report.elapsed_ms = outcome.elapsed_ms;
            }
            Err(error) => {
                let message = error_chain(&error);
                log::warn!("{} failed: {message}", self.reports[position].unit);
                let report = self.transition(position, UnitState::Failed)?;
                report.failure = Some(UnitFailure {
                    kind: error.kind(),
                    message,
                });
                report.elapsed_ms = outcome.elapsed_ms;
            }
        }
        Ok(())
    }

    fn into_reports(self, order: &[usize]) -> Vec<UnitReport> {
        let mut slots: Vec<Option<UnitReport>> = self.reports.into_iter().map(Some).collect();
        order
            .iter()
            .filter_map(|&position| slots.get_mut(position).and_then(Option::take))
            .collect()
    }
}

struct UnitOutcome {
    result: std::result::Result<Vec<RegistryKey>, UnitError>,
    elapsed_ms: u64,
}

/// Run one unit's provisioning step and publish its outputs.
fn execute(unit: &Unit, config: &EnvironmentConfig, registry: &ExportRegistry) -> UnitOutcome {
    let started = Instant::now();
    let result = unit.apply(config, &registry.view()).and_then(|outputs| {
        let keys = outputs.keys().cloned().collect();
        registry.publish_all(unit.id(), outputs)?;
        Ok(keys)
    });
    UnitOutcome {
        result,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

/// Returns whether the run was cancelled.
fn apply_in_order(
    prepared: &Prepared,
    units: &[Unit],
    registry: &ExportRegistry,
    run: &mut RunState,
    options: &RunOptions,
) -> DeploymentResult<bool> {
    for &position in &prepared.order {
        if run.state(position).is_terminal() {
            continue;
        }
        if options.cancelled() {
            return Ok(true);
        }
        match run.readiness(position) {
            Readiness::Blocked(root) => run.skip(position, root)?,
            Readiness::Ready => {
                run.start(position)?;
                let outcome = execute(&units[position], &prepared.config, registry);
                run.finish(position, outcome)?;
            }
            Readiness::Waiting => {
                return Err(DeploymentError::Invariant {
                    message: format!(
                        "{} reached before its dependencies were applied",
                        units[position].id()
                    ),
                });
            }
        }
    }
    Ok(false)
}

/// Returns whether the run was cancelled.
fn apply_in_waves(
    prepared: &Prepared,
    units: &[Unit],
    registry: &ExportRegistry,
    run: &mut RunState,
    options: &RunOptions,
) -> DeploymentResult<bool> {
    let mut remaining: Vec<usize> = prepared
        .order
        .iter()
        .copied()
        .filter(|&position| !run.state(position).is_terminal())
        .collect();

    while !remaining.is_empty() {
        if options.cancelled() {
            return Ok(true);
        }

        let mut wave = Vec::new();
        let mut waiting = Vec::new();
        // `remaining` is in application order, so a skip marked here is
        // already visible to later entries of the same pass.
        for position in remaining {
            match run.readiness(position) {
                Readiness::Blocked(root) => run.skip(position, root)?,
                Readiness::Ready => wave.push(position),
                Readiness::Waiting => waiting.push(position),
            }
        }

        if wave.is_empty() {
            if let Some(&stuck) = waiting.first() {
                return Err(DeploymentError::Invariant {
                    message: format!("{} can never become ready", units[stuck].id()),
                });
            }
            break;
        }

        for &position in &wave {
            run.start(position)?;
        }
        log::debug!("applying wave of {} unit(s)", wave.len());
        let outcomes: Vec<(usize, UnitOutcome)> = wave
            .par_iter()
            .map(|&position| {
                (
                    position,
                    execute(&units[position], &prepared.config, registry),
                )
            })
            .collect();
        for (position, outcome) in outcomes {
            run.finish(position, outcome)?;
        }

        remaining = waiting;
    }
    Ok(false)
}

fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        message.push_str(": ");
        message.push_str(&source.to_string());
        current = source.source();
    }
    message
}
