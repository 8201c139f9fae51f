//! Beacon
//!
//! A single versioned reference cell holding the current implementation
//! shared by every instance bound to it. Exactly one writer (the authority)
//! may retarget it, and the authority itself can be handed over.

use indexmap::IndexSet;
use log::info;
use serde::{Deserialize, Serialize};

use tokenforge_common::{crypto::Address, time::TimestampSeconds};

use crate::{
    error::{PlatformError, PlatformResult},
    governor::ProposalId,
};

/// One entry of the beacon history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRevision {
    pub version: u64,
    pub implementation: Address,
    pub retargeted_at: TimestampSeconds,
}

#[derive(Clone, Debug)]
pub struct Beacon {
    address: Address,
    implementation: Address,
    authority: Address,
    version: u64,
    /// Open governor proposals targeting this beacon, oldest first
    pending_proposals: IndexSet<ProposalId>,
    created_at: TimestampSeconds,
    revisions: Vec<BeaconRevision>,
}

impl Beacon {
    pub fn new(
        address: Address,
        implementation: Address,
        authority: Address,
        created_at: TimestampSeconds,
    ) -> Self {
        let revisions = vec![BeaconRevision {
            version: 1,
            implementation: implementation.clone(),
            retargeted_at: created_at,
        }];

        Self {
            address,
            implementation,
            authority,
            version: 1,
            pending_proposals: IndexSet::new(),
            created_at,
            revisions,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn current_implementation(&self) -> &Address {
        &self.implementation
    }

    pub fn authority(&self) -> &Address {
        &self.authority
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Oldest open proposal targeting this beacon, if any
    pub fn pending_proposal(&self) -> Option<&ProposalId> {
        self.pending_proposals.first()
    }

    pub fn pending_proposals(&self) -> &IndexSet<ProposalId> {
        &self.pending_proposals
    }

    #[inline]
    pub fn has_pending_upgrade(&self) -> bool {
        !self.pending_proposals.is_empty()
    }

    pub fn created_at(&self) -> TimestampSeconds {
        self.created_at
    }

    /// Every implementation this beacon ever pointed at, oldest first
    pub fn revisions(&self) -> &[BeaconRevision] {
        &self.revisions
    }

    pub fn ensure_authority(&self, caller: &Address) -> PlatformResult<()> {
        if *caller == self.authority {
            Ok(())
        } else {
            Err(PlatformError::Unauthorized {
                caller: caller.clone(),
                target: self.address.clone(),
            })
        }
    }

    /// Point the beacon at a new implementation
    ///
    /// The caller is expected to have verified that `new_implementation` is
    /// deployed code. Returns the previous implementation.
    pub fn retarget(
        &mut self,
        caller: &Address,
        new_implementation: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        self.ensure_authority(caller)?;
        if new_implementation.is_zero() {
            return Err(PlatformError::ZeroAddress("implementation"));
        }

        let old = std::mem::replace(&mut self.implementation, new_implementation.clone());
        self.version += 1;
        self.revisions.push(BeaconRevision {
            version: self.version,
            implementation: new_implementation.clone(),
            retargeted_at: now,
        });

        info!(
            "Beacon {} retargeted {} -> {} (version {})",
            self.address.short(),
            old.short(),
            new_implementation.short(),
            self.version
        );
        Ok(old)
    }

    /// Hand the writer role to another identity, returns the previous authority
    pub fn transfer_authority(
        &mut self,
        caller: &Address,
        new_authority: &Address,
    ) -> PlatformResult<Address> {
        self.ensure_authority(caller)?;
        if new_authority.is_zero() {
            return Err(PlatformError::ZeroAddress("authority"));
        }
        Ok(std::mem::replace(&mut self.authority, new_authority.clone()))
    }

    pub(crate) fn add_pending_proposal(&mut self, proposal: ProposalId) -> bool {
        self.pending_proposals.insert(proposal)
    }

    /// Drop a proposal that was executed or cancelled
    pub(crate) fn remove_pending_proposal(&mut self, proposal: &ProposalId) -> bool {
        self.pending_proposals.shift_remove(proposal)
    }
}
