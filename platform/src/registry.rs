//! Extension Registry
//!
//! Append-only log of registry entries plus an index of the active entry
//! per `(base object, extension type)` slot. Deactivation flips a flag on
//! the entry, history is never rewritten.
//!
//! Invariants:
//! - at most one active entry per slot
//! - an instance belongs to exactly one base object, forever
//! - a base object's category never changes once enrolled

use std::collections::HashMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use tokenforge_common::{crypto::Address, time::TimestampSeconds};

use crate::{
    access::{AccessControl, Capability},
    catalog::{BaseCategory, ExtensionType},
    error::{PlatformError, PlatformResult},
};

type Slot = (Address, ExtensionType);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub base_object: Address,
    pub extension_type: ExtensionType,
    pub instance: Address,
    pub registrant: Address,
    pub registered_at: TimestampSeconds,
    pub active: bool,
    pub deactivated_at: Option<TimestampSeconds>,
}

pub struct ExtensionRegistry {
    address: Address,
    access: AccessControl,
    categories: HashMap<Address, BaseCategory>,
    entries: Vec<RegistryEntry>,
    // slot -> index of its active entry
    active: HashMap<Slot, usize>,
    // instance -> base object
    owners: HashMap<Address, Address>,
    generations: HashMap<Slot, u64>,
}

impl ExtensionRegistry {
    pub fn new(address: Address, admin: Address) -> Self {
        Self {
            address,
            access: AccessControl::new(admin),
            categories: HashMap::new(),
            entries: Vec::new(),
            active: HashMap::new(),
            owners: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn grant(
        &mut self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> PlatformResult<bool> {
        self.access.grant(caller, capability, account)
    }

    pub fn revoke(
        &mut self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> PlatformResult<bool> {
        self.access.revoke(caller, capability, account)
    }

    /// Bind a base object to its category
    ///
    /// Enrolling again with the same category is a no-op.
    pub fn enroll_base_object(
        &mut self,
        caller: &Address,
        base_object: &Address,
        category: BaseCategory,
    ) -> PlatformResult<()> {
        self.access.require(Capability::Registrar, caller)?;
        if base_object.is_zero() {
            return Err(PlatformError::ZeroAddress("base object"));
        }

        match self.categories.get(base_object) {
            Some(existing) if *existing != category => Err(PlatformError::CategoryMismatch {
                base_object: base_object.clone(),
                expected: *existing,
                actual: category,
            }),
            Some(_) => Ok(()),
            None => {
                debug!("Enrolled {} base object {}", category, base_object.short());
                self.categories.insert(base_object.clone(), category);
                Ok(())
            }
        }
    }

    pub fn category_of(&self, base_object: &Address) -> Option<BaseCategory> {
        self.categories.get(base_object).copied()
    }

    /// Check that a slot could accept a new registration, without an instance yet
    ///
    /// Factories call this before deploying anything.
    pub fn check_slot(&self, base_object: &Address, extension_type: ExtensionType) -> PlatformResult<()> {
        if base_object.is_zero() {
            return Err(PlatformError::ZeroAddress("base object"));
        }

        let category = self
            .category_of(base_object)
            .ok_or_else(|| PlatformError::UnknownBaseObject(base_object.clone()))?;
        if !category.supports(extension_type) {
            return Err(PlatformError::TypeIncompatible {
                base_object: base_object.clone(),
                extension_type,
                category,
            });
        }

        if let Some(existing) = self.lookup(base_object, extension_type) {
            return Err(PlatformError::DuplicateExtensionType {
                base_object: base_object.clone(),
                extension_type,
                existing: existing.clone(),
            });
        }
        Ok(())
    }

    /// Pre-flight for `register`, minus the capability check
    pub fn can_register(
        &self,
        base_object: &Address,
        extension_type: ExtensionType,
        instance: &Address,
    ) -> PlatformResult<()> {
        if instance.is_zero() {
            return Err(PlatformError::ZeroAddress("extension instance"));
        }
        self.check_slot(base_object, extension_type)?;

        match self.owners.get(instance) {
            Some(owner) if owner != base_object => Err(PlatformError::InstanceAlreadyOwned {
                instance: instance.clone(),
                owner: owner.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Register an instance in a free slot, returns the entry index
    ///
    /// All checks run before any write so a rejected registration leaves
    /// the registry untouched.
    pub fn register(
        &mut self,
        caller: &Address,
        base_object: &Address,
        extension_type: ExtensionType,
        instance: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<usize> {
        self.access.require(Capability::Registrar, caller)?;
        self.can_register(base_object, extension_type, instance)?;

        let index = self.entries.len();
        self.entries.push(RegistryEntry {
            base_object: base_object.clone(),
            extension_type,
            instance: instance.clone(),
            registrant: caller.clone(),
            registered_at: now,
            active: true,
            deactivated_at: None,
        });

        let slot = (base_object.clone(), extension_type);
        self.active.insert(slot.clone(), index);
        *self.generations.entry(slot).or_default() += 1;
        self.owners.insert(instance.clone(), base_object.clone());

        info!(
            "Registered {} extension {} for {}",
            extension_type,
            instance.short(),
            base_object.short()
        );
        Ok(index)
    }

    /// Deactivate the active entry of a slot, freeing it, returns its instance
    pub fn deactivate(
        &mut self,
        caller: &Address,
        base_object: &Address,
        extension_type: ExtensionType,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        self.access.require(Capability::Registrar, caller)?;

        let slot = (base_object.clone(), extension_type);
        let index = self
            .active
            .remove(&slot)
            .ok_or_else(|| PlatformError::ExtensionNotFound {
                base_object: base_object.clone(),
                extension_type,
            })?;

        let entry = &mut self.entries[index];
        entry.active = false;
        entry.deactivated_at = Some(now);

        info!(
            "Deactivated {} extension {} for {}",
            extension_type,
            entry.instance.short(),
            base_object.short()
        );
        Ok(entry.instance.clone())
    }

    pub fn lookup(&self, base_object: &Address, extension_type: ExtensionType) -> Option<&Address> {
        self.entry(base_object, extension_type)
            .map(|entry| &entry.instance)
    }

    /// Active entry of a slot
    pub fn entry(&self, base_object: &Address, extension_type: ExtensionType) -> Option<&RegistryEntry> {
        self.active
            .get(&(base_object.clone(), extension_type))
            .and_then(|index| self.entries.get(*index))
    }

    /// Snapshot of the active extensions of a base object, in registration order
    pub fn list_active(&self, base_object: &Address) -> Vec<(ExtensionType, Address)> {
        self.entries
            .iter()
            .filter(|entry| entry.active && entry.base_object == *base_object)
            .map(|entry| (entry.extension_type, entry.instance.clone()))
            .collect()
    }

    /// Every entry ever written for a base object, oldest first
    pub fn history(&self, base_object: &Address) -> Vec<&RegistryEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.base_object == *base_object)
            .collect()
    }

    pub fn owner_of(&self, instance: &Address) -> Option<&Address> {
        self.owners.get(instance)
    }

    /// Number of entries ever created for a slot
    pub fn generation(&self, base_object: &Address, extension_type: ExtensionType) -> u64 {
        self.generations
            .get(&(base_object.clone(), extension_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }
}
