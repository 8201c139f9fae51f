use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use tokenforge_common::{crypto::Address, time::TimestampSeconds};

/// Sequential proposal identifier, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(u64);

impl ProposalId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a proposal upgrades
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "kebab-case")]
pub enum UpgradeTarget {
    /// Retarget a shared beacon, affecting every bound instance
    Beacon(Address),
    /// Swap the fixed implementation of a single base object
    BaseObject(Address),
    /// Hand the upgrade rights over a beacon or base object to another
    /// identity, named by the proposal's `new_implementation`
    Authority(Address),
}

impl UpgradeTarget {
    pub fn address(&self) -> &Address {
        match self {
            Self::Beacon(address) | Self::BaseObject(address) | Self::Authority(address) => address,
        }
    }
}

impl fmt::Display for UpgradeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beacon(address) => write!(f, "beacon {}", address),
            Self::BaseObject(address) => write!(f, "base object {}", address),
            Self::Authority(address) => write!(f, "authority of {}", address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalStatus {
    /// Only the proposer approved so far
    Created,
    /// At least one co-signer approved
    Approving,
    Executed,
    Cancelled,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Approving => "approving",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProposal {
    pub id: ProposalId,
    pub target: UpgradeTarget,
    pub new_implementation: Address,
    /// Forwarded to the new implementation after a base object upgrade
    #[serde(with = "hex")]
    pub call_data: Vec<u8>,
    pub description: String,
    pub proposer: Address,
    pub proposed_at: TimestampSeconds,
    /// Earliest execution time
    pub ready_at: TimestampSeconds,
    /// Distinct approvers in approval order, the proposer first
    pub approvals: IndexSet<Address>,
    pub executed_at: Option<TimestampSeconds>,
    pub cancelled_at: Option<TimestampSeconds>,
}

impl UpgradeProposal {
    pub fn status(&self) -> ProposalStatus {
        if self.executed_at.is_some() {
            ProposalStatus::Executed
        } else if self.cancelled_at.is_some() {
            ProposalStatus::Cancelled
        } else if self.approvals.len() > 1 {
            ProposalStatus::Approving
        } else {
            ProposalStatus::Created
        }
    }

    #[inline]
    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    pub fn has_approved(&self, account: &Address) -> bool {
        self.approvals.contains(account)
    }

    #[inline]
    pub fn is_ready(&self, now: TimestampSeconds) -> bool {
        now >= self.ready_at
    }
}
