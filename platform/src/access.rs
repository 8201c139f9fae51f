//! Capability Access Control
//!
//! Explicit, revocable capabilities checked at each entrypoint.
//! Each stateful component owns its own capability table, the same way
//! every contract keeps its own role table.

use std::collections::HashMap;

use indexmap::IndexSet;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

use tokenforge_common::crypto::Address;

use crate::error::{PlatformError, PlatformResult};

/// A grantable permission to perform a class of mutating operations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Can grant/revoke capabilities and perform administrative actions
    Admin,
    /// Can write registry entries
    Registrar,
    /// Can propose and approve upgrades
    Upgrader,
}

/// Capability map: capability -> holders
///
/// Holders are kept in grant order so listings are stable.
#[derive(Clone, Debug, Default)]
pub struct AccessControl {
    members: HashMap<Capability, IndexSet<Address>>,
}

impl AccessControl {
    /// Create a table with a single administrator
    pub fn new(admin: Address) -> Self {
        let mut members = HashMap::new();
        let mut admins = IndexSet::new();
        admins.insert(admin);
        members.insert(Capability::Admin, admins);
        Self { members }
    }

    pub fn has(&self, capability: Capability, account: &Address) -> bool {
        self.members
            .get(&capability)
            .is_some_and(|holders| holders.contains(account))
    }

    /// Fail with `NotAuthorized` unless `account` holds `capability`
    pub fn require(&self, capability: Capability, account: &Address) -> PlatformResult<()> {
        if self.has(capability, account) {
            Ok(())
        } else {
            debug!("{} rejected: missing capability {}", account.short(), capability);
            Err(PlatformError::NotAuthorized {
                caller: account.clone(),
                capability,
            })
        }
    }

    /// Grant a capability
    ///
    /// Returns false when the account already held it.
    pub fn grant(
        &mut self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> PlatformResult<bool> {
        self.require(Capability::Admin, caller)?;
        if account.is_zero() {
            return Err(PlatformError::ZeroAddress("account"));
        }

        Ok(self
            .members
            .entry(capability)
            .or_default()
            .insert(account.clone()))
    }

    /// Revoke a capability
    ///
    /// Returns false when the account did not hold it.
    pub fn revoke(
        &mut self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> PlatformResult<bool> {
        self.require(Capability::Admin, caller)?;

        let Some(holders) = self.members.get_mut(&capability) else {
            return Ok(false);
        };

        if capability == Capability::Admin && holders.len() == 1 && holders.contains(account) {
            return Err(PlatformError::CannotRevokeLastAdmin);
        }

        Ok(holders.shift_remove(account))
    }

    /// Holders of a capability, in grant order
    pub fn members(&self, capability: Capability) -> Vec<Address> {
        self.members
            .get(&capability)
            .map(|holders| holders.iter().cloned().collect())
            .unwrap_or_default()
    }
}
