use std::collections::{BTreeSet, HashMap, HashSet};

use stackup_domain::{RegistryKey, UnitId, UnitSpec};

use crate::error::GraphError;

type GraphResult<T> = std::result::Result<T, GraphError>;

/// Validated "depends on" relation over a fixed set of units, indexed by
/// declaration position.
#[derive(Debug, Clone)]
pub struct DependencyGraph<'a> {
    units: &'a [UnitSpec],
    index: HashMap<&'a UnitId, usize>,
    /// `dependencies[i]` = distinct declaration indices unit `i` depends on.
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]` = declaration indices that depend on unit `i`.
    dependents: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build and validate the graph.
    ///
    /// # Errors
    ///
    /// Returns an error when unit ids repeat, two units declare the same
    /// output key, or a dependency names a unit that is not declared.
    pub fn new(units: &'a [UnitSpec]) -> GraphResult<Self> {
        let mut index = HashMap::with_capacity(units.len());
        for (position, unit) in units.iter().enumerate() {
            if index.insert(&unit.id, position).is_some() {
                return Err(GraphError::DuplicateUnit {
                    id: unit.id.clone(),
                });
            }
        }

        let mut declared_outputs: HashMap<&RegistryKey, &UnitId> = HashMap::new();
        for unit in units {
            for key in &unit.outputs {
                if let Some(first) = declared_outputs.insert(key, &unit.id) {
                    return Err(GraphError::DuplicateOutput {
                        key: key.clone(),
                        first: first.clone(),
                        second: unit.id.clone(),
                    });
                }
            }
        }

        let mut missing = Vec::new();
        let mut details = Vec::new();
        let mut dependencies = vec![Vec::new(); units.len()];
        let mut dependents = vec![Vec::new(); units.len()];
        for (position, unit) in units.iter().enumerate() {
            let mut seen = HashSet::new();
            for dependency in &unit.dependencies {
                let Some(&target) = index.get(dependency) else {
                    details.push(format!("{} depends on unknown unit {dependency}", unit.id));
                    missing.push(dependency.clone());
                    continue;
                };
                if seen.insert(target) {
                    dependencies[position].push(target);
                    dependents[target].push(position);
                }
            }
        }

        if !missing.is_empty() {
            return Err(GraphError::UnknownDependency {
                missing,
                details: details.join("\n  - "),
            });
        }

        Ok(Self {
            units,
            index,
            dependencies,
            dependents,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    #[must_use]
    pub fn position(&self, id: &UnitId) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn unit(&self, position: usize) -> Option<&'a UnitSpec> {
        self.units.get(position)
    }

    #[must_use]
    pub fn dependencies_of(&self, position: usize) -> &[usize] {
        self.dependencies.get(position).map_or(&[], Vec::as_slice)
    }

    /// Topological order as declaration indices; among units that are ready
    /// at the same time the earliest declared goes first.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] listing every unit that could not
    /// be ordered.
    pub fn order_positions(&self) -> GraphResult<Vec<usize>> {
        let mut indegree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter_map(|(position, count)| (*count == 0).then_some(position))
            .collect();

        let mut order = Vec::with_capacity(self.units.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &self.dependents[next] {
                let entry = &mut indegree[dependent];
                *entry = entry.saturating_sub(1);
                if *entry == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.units.len() {
            let remaining = indegree
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(position, _)| self.units[position].id.clone())
                .collect();
            return Err(GraphError::CycleDetected { remaining });
        }

        Ok(order)
    }

    /// Topological order as unit ids.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] when the graph is cyclic.
    pub fn order(&self) -> GraphResult<Vec<UnitId>> {
        Ok(self
            .order_positions()?
            .into_iter()
            .map(|position| self.units[position].id.clone())
            .collect())
    }

    /// Declaration indices of `target` and everything it transitively
    /// depends on.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTarget`] when `target` is not declared.
    pub fn closure_positions(&self, target: &UnitId) -> GraphResult<BTreeSet<usize>> {
        let start = self
            .position(target)
            .ok_or_else(|| GraphError::UnknownTarget {
                target: target.clone(),
            })?;
        let mut closure = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(position) = stack.pop() {
            if closure.insert(position) {
                stack.extend(self.dependencies_of(position).iter().copied());
            }
        }
        Ok(closure)
    }
}

/// Deterministic application order for `units`.
///
/// # Errors
///
/// Returns an error when a dependency is unknown, ids or outputs repeat, or
/// the graph contains a cycle.
pub fn build_application_order(units: &[UnitSpec]) -> GraphResult<Vec<UnitId>> {
    if units.is_empty() {
        return Ok(Vec::new());
    }
    DependencyGraph::new(units)?.order()
}

/// `target` plus its transitive dependencies, in application order.
///
/// # Errors
///
/// Returns an error when the graph is invalid or `target` is not declared.
pub fn dependency_closure(units: &[UnitSpec], target: &UnitId) -> GraphResult<Vec<UnitId>> {
    let graph = DependencyGraph::new(units)?;
    let closure = graph.closure_positions(target)?;
    Ok(graph
        .order_positions()?
        .into_iter()
        .filter(|position| closure.contains(position))
        .map(|position| units[position].id.clone())
        .collect())
}
