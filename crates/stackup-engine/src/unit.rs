use std::fmt;

use stackup_domain::{EnvironmentConfig, RegistryKey, UnitId, UnitOutputs, UnitSpec};

use crate::error::UnitError;
use crate::registry::RegistryView;

pub type ApplyFn = Box<
    dyn Fn(&EnvironmentConfig, &RegistryView<'_>) -> std::result::Result<UnitOutputs, UnitError>
        + Send
        + Sync,
>;

/// A deployable unit: its declaration plus the step that provisions it.
pub struct Unit {
    spec: UnitSpec,
    apply: ApplyFn,
}

impl Unit {
    #[must_use]
    pub fn new<F>(spec: UnitSpec, apply: F) -> Self
    where
        F: Fn(&EnvironmentConfig, &RegistryView<'_>) -> std::result::Result<UnitOutputs, UnitError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            spec,
            apply: Box::new(apply),
        }
    }

    #[must_use]
    pub const fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    #[must_use]
    pub const fn id(&self) -> &UnitId {
        &self.spec.id
    }

    /// Run the provisioning step and verify it returned exactly the declared
    /// output keys.
    ///
    /// # Errors
    ///
    /// Returns the step's own error, or [`UnitError::OutputMismatch`] when the
    /// returned key set differs from the declaration.
    pub fn apply(
        &self,
        config: &EnvironmentConfig,
        registry: &RegistryView<'_>,
    ) -> std::result::Result<UnitOutputs, UnitError> {
        let outputs = (self.apply)(config, registry)?;
        verify_outputs(&self.spec, &outputs)?;
        Ok(outputs)
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Unit")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Check that `outputs` carries exactly the keys `spec` declares.
///
/// # Errors
///
/// Returns [`UnitError::OutputMismatch`] listing missing and unexpected keys.
pub fn verify_outputs(
    spec: &UnitSpec,
    outputs: &UnitOutputs,
) -> std::result::Result<(), UnitError> {
    let missing: Vec<RegistryKey> = spec
        .outputs
        .iter()
        .filter(|key| !outputs.contains_key(*key))
        .cloned()
        .collect();
    let unexpected: Vec<RegistryKey> = outputs
        .keys()
        .filter(|key| !spec.outputs.contains(*key))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(UnitError::OutputMismatch {
            unit: spec.id.clone(),
            missing,
            unexpected,
        })
    }
}
