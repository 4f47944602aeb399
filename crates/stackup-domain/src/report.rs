use serde::{Deserialize, Serialize};

use crate::{EnvironmentConfig, ExportEntry, RegistryKey, UnitId, UnitSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Applying,
    Published,
    Failed,
    Skipped,
}

impl UnitState {
    /// Whether a unit in this state may move to `next`.
    ///
    /// `Pending -> Published` is only taken by units whose outputs were
    /// imported from a previous run instead of being applied.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applying | Self::Skipped | Self::Published)
                | (Self::Applying, Self::Published | Self::Failed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnresolvedKey,
    DuplicateKey,
    TypeMismatch,
    UnresolvedPlaceholder,
    OutputMismatch,
    Provisioning,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnresolvedKey => "unresolved key",
            Self::DuplicateKey => "duplicate key",
            Self::TypeMismatch => "type mismatch",
            Self::UnresolvedPlaceholder => "unresolved placeholder",
            Self::OutputMismatch => "output mismatch",
            Self::Provisioning => "provisioning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: UnitId,
    pub state: UnitState,
    pub dependencies: Vec<UnitId>,
    pub published: Vec<RegistryKey>,
    pub failure: Option<UnitFailure>,
    /// Root failed unit that caused this unit to be skipped.
    pub blocked_by: Option<UnitId>,
    pub imported: bool,
    pub elapsed_ms: u64,
}

impl UnitReport {
    #[must_use]
    pub const fn pending(unit: UnitId, dependencies: Vec<UnitId>) -> Self {
        Self {
            unit,
            state: UnitState::Pending,
            dependencies,
            published: Vec::new(),
            failure: None,
            blocked_by: None,
            imported: false,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub config: EnvironmentConfig,
    pub order: Vec<UnitId>,
    pub units: Vec<UnitReport>,
    pub exports: Vec<ExportEntry>,
    pub target: Option<UnitId>,
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

impl DeploymentReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.units
            .iter()
            .any(|unit| unit.state == UnitState::Failed)
    }

    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&UnitReport> {
        self.units.iter().find(|unit| unit.unit.as_str() == id)
    }

    #[must_use]
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for unit in &self.units {
            match unit.state {
                UnitState::Published => counts.published += 1,
                UnitState::Failed => counts.failed += 1,
                UnitState::Skipped => counts.skipped += 1,
                UnitState::Pending | UnitState::Applying => counts.pending += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub config: EnvironmentConfig,
    pub order: Vec<UnitId>,
    pub units: Vec<UnitSpec>,
    pub target: Option<UnitId>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::UnitState;

    #[test]
    fn state_machine_allows_documented_transitions() {
        assert!(UnitState::Pending.can_transition_to(UnitState::Applying));
        assert!(UnitState::Pending.can_transition_to(UnitState::Skipped));
        assert!(UnitState::Applying.can_transition_to(UnitState::Published));
        assert!(UnitState::Applying.can_transition_to(UnitState::Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [UnitState::Published, UnitState::Failed, UnitState::Skipped] {
            assert!(terminal.is_terminal());
            for next in [
                UnitState::Pending,
                UnitState::Applying,
                UnitState::Published,
                UnitState::Failed,
                UnitState::Skipped,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn applying_cannot_be_skipped() {
        assert!(!UnitState::Applying.can_transition_to(UnitState::Skipped));
        assert!(!UnitState::Pending.can_transition_to(UnitState::Failed));
    }
}
