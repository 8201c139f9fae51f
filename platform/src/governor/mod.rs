//! Upgrade Governor
//!
//! Multi-party, timelocked control over every upgrade in the platform.
//!
//! # Proposal states
//!
//! ```text
//! Created -> Approving -> Executed
//!    |           |
//!    +-----------+------> Cancelled
//! ```
//!
//! - `propose` requires the upgrader capability, the proposer is the first approval
//! - `approve` inserts the caller in the approval set (at most once per identity)
//! - `execute` requires `approvals >= required_approvals` and `now >= proposed_at + timelock`
//! - `cancel` requires the admin capability
//!
//! Handing the governor's upgrade rights to someone else is itself an
//! [`UpgradeTarget::Authority`] proposal, gated the same way.
//!
//! Executed and cancelled are terminal and mutually exclusive.

mod proposal;

use std::collections::BTreeMap;

use indexmap::IndexSet;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use tokenforge_common::{
    config::{
        DEFAULT_REQUIRED_APPROVALS, DEFAULT_TIMELOCK_DURATION, MAX_CALL_DATA_LENGTH,
        MAX_DESCRIPTION_LENGTH, MIN_REQUIRED_APPROVALS,
    },
    crypto::Address,
    time::TimestampSeconds,
};

use crate::{
    access::{AccessControl, Capability},
    error::{PlatformError, PlatformResult},
};

pub use proposal::{ProposalId, ProposalStatus, UpgradeProposal, UpgradeTarget};

/// Governor parameters
///
/// The timelock is fixed once the governor exists, the quorum can be
/// adjusted by an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernorConfig {
    pub required_approvals: u32,
    /// Seconds between proposal creation and earliest execution
    pub timelock_duration: TimestampSeconds,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            required_approvals: DEFAULT_REQUIRED_APPROVALS,
            timelock_duration: DEFAULT_TIMELOCK_DURATION,
        }
    }
}

impl GovernorConfig {
    pub fn validate(&self) -> PlatformResult<()> {
        if self.required_approvals < MIN_REQUIRED_APPROVALS {
            return Err(PlatformError::InvalidQuorum(self.required_approvals));
        }
        Ok(())
    }
}

/// Applies an approved upgrade to its target
///
/// Returns the implementation that was replaced.
pub trait UpgradeExecutor {
    fn apply_upgrade(
        &mut self,
        governor: &Address,
        target: &UpgradeTarget,
        new_implementation: &Address,
        call_data: &[u8],
        now: TimestampSeconds,
    ) -> PlatformResult<Address>;
}

pub struct UpgradeGovernor {
    address: Address,
    access: AccessControl,
    config: GovernorConfig,
    proposals: BTreeMap<ProposalId, UpgradeProposal>,
    next_id: u64,
}

impl UpgradeGovernor {
    pub fn new(address: Address, admin: Address, config: GovernorConfig) -> PlatformResult<Self> {
        config.validate()?;
        Ok(Self {
            address,
            access: AccessControl::new(admin),
            config,
            proposals: BTreeMap::new(),
            next_id: 0,
        })
    }

    /// Identity the governor acts as when it upgrades a target
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
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

    /// Change the quorum, returns the previous value
    ///
    /// Applies to pending proposals as well, since approvals are only
    /// compared against the quorum at execution time.
    pub fn set_required_approvals(&mut self, caller: &Address, required: u32) -> PlatformResult<u32> {
        self.access.require(Capability::Admin, caller)?;
        if required < MIN_REQUIRED_APPROVALS {
            return Err(PlatformError::InvalidQuorum(required));
        }

        let previous = std::mem::replace(&mut self.config.required_approvals, required);
        info!("Governor quorum changed from {} to {}", previous, required);
        Ok(previous)
    }

    pub fn propose(
        &mut self,
        caller: &Address,
        target: UpgradeTarget,
        new_implementation: Address,
        call_data: Vec<u8>,
        description: String,
        now: TimestampSeconds,
    ) -> PlatformResult<ProposalId> {
        self.access.require(Capability::Upgrader, caller)?;

        if target.address().is_zero() {
            return Err(PlatformError::ZeroAddress("target"));
        }
        if new_implementation.is_zero() {
            return Err(PlatformError::ZeroAddress("implementation"));
        }
        if call_data.len() > MAX_CALL_DATA_LENGTH {
            return Err(PlatformError::InvalidParams(format!(
                "call data too large: {} > {}",
                call_data.len(),
                MAX_CALL_DATA_LENGTH
            )));
        }
        if description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(PlatformError::InvalidParams(format!(
                "description too long: {} > {}",
                description.len(),
                MAX_DESCRIPTION_LENGTH
            )));
        }
        if !matches!(target, UpgradeTarget::BaseObject(_)) && !call_data.is_empty() {
            return Err(PlatformError::InvalidParams(format!(
                "only base object upgrades carry call data, not {}",
                target
            )));
        }

        let id = ProposalId::new(self.next_id);
        self.next_id += 1;

        let mut approvals = IndexSet::new();
        approvals.insert(caller.clone());

        let proposal = UpgradeProposal {
            id,
            target,
            new_implementation,
            call_data,
            description,
            proposer: caller.clone(),
            proposed_at: now,
            ready_at: now.saturating_add(self.config.timelock_duration),
            approvals,
            executed_at: None,
            cancelled_at: None,
        };

        info!(
            "Proposal {} created by {}: {} -> {}",
            id,
            caller.short(),
            proposal.target,
            proposal.new_implementation.short()
        );
        self.proposals.insert(id, proposal);
        Ok(id)
    }

    /// Approve a proposal, returns the new approval count
    pub fn approve(&mut self, caller: &Address, id: ProposalId) -> PlatformResult<usize> {
        self.access.require(Capability::Upgrader, caller)?;
        let proposal = self.open_proposal_mut(id)?;

        if !proposal.approvals.insert(caller.clone()) {
            return Err(PlatformError::AlreadyApproved {
                proposal: id,
                approver: caller.clone(),
            });
        }

        let count = proposal.approval_count();
        info!("Proposal {} approved by {} ({} approvals)", id, caller.short(), count);
        Ok(count)
    }

    /// Execute a proposal through `executor`, returns the replaced implementation
    ///
    /// The proposal is only marked executed once the executor succeeded, a
    /// failing upgrade leaves the proposal open.
    pub fn execute(
        &mut self,
        caller: &Address,
        id: ProposalId,
        now: TimestampSeconds,
        executor: &mut dyn UpgradeExecutor,
    ) -> PlatformResult<Address> {
        self.access.require(Capability::Upgrader, caller)?;

        let required = self.config.required_approvals;
        let proposal = self.open_proposal(id)?;
        Self::check_executable(proposal, required, now)?;

        let old = executor.apply_upgrade(
            &self.address,
            &proposal.target,
            &proposal.new_implementation,
            &proposal.call_data,
            now,
        )?;

        let proposal = self.open_proposal_mut(id)?;
        proposal.executed_at = Some(now);
        info!(
            "Proposal {} executed by {}: {} now at {}",
            id,
            caller.short(),
            proposal.target,
            proposal.new_implementation.short()
        );
        Ok(old)
    }

    pub fn cancel(&mut self, caller: &Address, id: ProposalId, now: TimestampSeconds) -> PlatformResult<()> {
        self.access.require(Capability::Admin, caller)?;
        let proposal = self.open_proposal_mut(id)?;
        proposal.cancelled_at = Some(now);
        info!("Proposal {} cancelled by {}", id, caller.short());
        Ok(())
    }

    /// Pre-flight for `execute`: whether it would pass the quorum and timelock
    /// checks right now, and why not otherwise
    pub fn can_execute(&self, id: ProposalId, now: TimestampSeconds) -> (bool, String) {
        let result = self
            .open_proposal(id)
            .and_then(|proposal| Self::check_executable(proposal, self.config.required_approvals, now));

        match result {
            Ok(()) => (true, "ready".to_string()),
            Err(e) => {
                debug!("Proposal {} not executable: {}", id, e);
                (false, e.to_string())
            }
        }
    }

    pub fn proposal(&self, id: ProposalId) -> Option<&UpgradeProposal> {
        self.proposals.get(&id)
    }

    /// All proposals in creation order
    pub fn proposals(&self) -> impl Iterator<Item = &UpgradeProposal> {
        self.proposals.values()
    }

    /// Proposals neither executed nor cancelled
    pub fn pending_proposals(&self) -> Vec<&UpgradeProposal> {
        self.proposals
            .values()
            .filter(|proposal| !proposal.status().is_terminal())
            .collect()
    }

    fn check_executable(
        proposal: &UpgradeProposal,
        required: u32,
        now: TimestampSeconds,
    ) -> PlatformResult<()> {
        let approvals = proposal.approval_count();
        if approvals < required as usize {
            return Err(PlatformError::InsufficientApprovals {
                proposal: proposal.id,
                approvals,
                required,
            });
        }
        if !proposal.is_ready(now) {
            return Err(PlatformError::TimeLockActive {
                proposal: proposal.id,
                ready_at: proposal.ready_at,
                now,
            });
        }
        Ok(())
    }

    fn open_proposal(&self, id: ProposalId) -> PlatformResult<&UpgradeProposal> {
        let proposal = self
            .proposals
            .get(&id)
            .ok_or(PlatformError::ProposalNotFound(id))?;
        Self::ensure_open(proposal)?;
        Ok(proposal)
    }

    fn open_proposal_mut(&mut self, id: ProposalId) -> PlatformResult<&mut UpgradeProposal> {
        let proposal = self
            .proposals
            .get_mut(&id)
            .ok_or(PlatformError::ProposalNotFound(id))?;
        Self::ensure_open(proposal)?;
        Ok(proposal)
    }

    fn ensure_open(proposal: &UpgradeProposal) -> PlatformResult<()> {
        match proposal.status() {
            ProposalStatus::Executed => Err(PlatformError::AlreadyExecuted(proposal.id)),
            ProposalStatus::Cancelled => Err(PlatformError::AlreadyCancelled(proposal.id)),
            ProposalStatus::Created | ProposalStatus::Approving => Ok(()),
        }
    }
}
