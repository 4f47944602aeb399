use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use stackup_domain::{ExportEntry, ExportValue, RegistryKey, UnitId, UnitOutputs};

use crate::error::RegistryError;

type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Write-once mapping from namespaced keys to published values.
///
/// All mutation goes through [`ExportRegistry::publish`],
/// [`ExportRegistry::publish_all`] or [`ExportRegistry::import`], which share
/// one lock. Units only ever see a [`RegistryView`].
#[derive(Debug, Default)]
pub struct ExportRegistry {
    entries: Mutex<BTreeMap<RegistryKey, ExportEntry>>,
}

impl ExportRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RegistryKey, ExportEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a single value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateKey`] when `key` already has a value.
    pub fn publish(
        &self,
        producer: &UnitId,
        key: RegistryKey,
        value: impl Into<ExportValue>,
    ) -> RegistryResult<()> {
        let mut entries = self.lock();
        match entries.entry(key) {
            Entry::Occupied(existing) => Err(RegistryError::DuplicateKey {
                key: existing.key().clone(),
                existing_producer: existing.get().producer.clone(),
            }),
            Entry::Vacant(slot) => {
                log::debug!("{producer} published {}", slot.key());
                let entry = new_entry(producer, slot.key().clone(), value.into(), false);
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Publish a unit's whole output set: either every key is inserted or,
    /// when any key already exists, none is.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateKey`] for the first key that is
    /// already published.
    pub fn publish_all(&self, producer: &UnitId, outputs: UnitOutputs) -> RegistryResult<()> {
        self.insert_all(producer, outputs, false)
    }

    /// Seed values that a previous run already published through the
    /// external output store.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateKey`] when any key is already present.
    pub fn import(&self, producer: &UnitId, outputs: UnitOutputs) -> RegistryResult<()> {
        self.insert_all(producer, outputs, true)
    }

    fn insert_all(
        &self,
        producer: &UnitId,
        outputs: UnitOutputs,
        imported: bool,
    ) -> RegistryResult<()> {
        let mut entries = self.lock();
        if let Some((key, existing)) = outputs
            .keys()
            .find_map(|key| entries.get(key).map(|existing| (key, existing)))
        {
            return Err(RegistryError::DuplicateKey {
                key: key.clone(),
                existing_producer: existing.producer.clone(),
            });
        }

        for (key, value) in outputs {
            log::debug!(
                "{producer} {} {key}",
                if imported { "imported" } else { "published" }
            );
            let entry = new_entry(producer, key.clone(), value, imported);
            entries.insert(key, entry);
        }
        Ok(())
    }

    /// Read a single value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnresolvedKey`] when `key` was never published
    /// and [`RegistryError::TypeMismatch`] when it holds a list.
    pub fn resolve(&self, key: &RegistryKey) -> RegistryResult<String> {
        match self.lock().get(key).map(|entry| &entry.value) {
            Some(ExportValue::Scalar(value)) => Ok(value.clone()),
            Some(ExportValue::List(_)) => Err(RegistryError::TypeMismatch { key: key.clone() }),
            None => Err(RegistryError::UnresolvedKey { key: key.clone() }),
        }
    }

    /// Read a multi-valued export. A scalar is returned as a one-element list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnresolvedKey`] when `key` was never published.
    pub fn resolve_list(&self, key: &RegistryKey) -> RegistryResult<Vec<String>> {
        match self.lock().get(key).map(|entry| &entry.value) {
            Some(ExportValue::Scalar(value)) => Ok(vec![value.clone()]),
            Some(ExportValue::List(values)) => Ok(values.clone()),
            None => Err(RegistryError::UnresolvedKey { key: key.clone() }),
        }
    }

    #[must_use]
    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.lock().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All entries, sorted by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ExportEntry> {
        self.lock().values().cloned().collect()
    }

    #[must_use]
    pub const fn view(&self) -> RegistryView<'_> {
        RegistryView { registry: self }
    }
}

fn new_entry(
    producer: &UnitId,
    key: RegistryKey,
    value: ExportValue,
    imported: bool,
) -> ExportEntry {
    ExportEntry {
        key,
        value,
        producer: producer.clone(),
        published_at_ms: now_ms(),
        imported,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Read-only borrow of the registry handed to units and templates.
#[derive(Debug, Clone, Copy)]
pub struct RegistryView<'a> {
    registry: &'a ExportRegistry,
}

impl RegistryView<'_> {
    /// See [`ExportRegistry::resolve`].
    ///
    /// # Errors
    ///
    /// Returns an error when `key` is unpublished or holds a list.
    pub fn resolve(&self, key: &RegistryKey) -> RegistryResult<String> {
        self.registry.resolve(key)
    }

    /// See [`ExportRegistry::resolve_list`].
    ///
    /// # Errors
    ///
    /// Returns an error when `key` is unpublished.
    pub fn resolve_list(&self, key: &RegistryKey) -> RegistryResult<Vec<String>> {
        self.registry.resolve_list(key)
    }

    #[must_use]
    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.registry.contains(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<RegistryKey> {
        self.registry.lock().keys().cloned().collect()
    }
}
