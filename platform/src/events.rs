//! Audit trail
//!
//! Events are appended only once the operation producing them succeeded,
//! so the log never mentions a state that was rolled back.

use log::{debug, log_enabled, Level};
use serde::{Deserialize, Serialize};

use tokenforge_common::{crypto::Address, time::TimestampSeconds};

use crate::{
    access::Capability,
    catalog::{BaseCategory, ExtensionType},
    governor::{ProposalId, UpgradeTarget},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PlatformEvent {
    BaseObjectDeployed {
        base_object: Address,
        category: BaseCategory,
        implementation: Address,
        controller: Address,
    },
    ExtensionDeployed {
        base_object: Address,
        extension_type: ExtensionType,
        instance: Address,
        deployer: Address,
        beacon: Address,
    },
    ExtensionDeactivated {
        base_object: Address,
        extension_type: ExtensionType,
        instance: Address,
        caller: Address,
    },
    BeaconInstalled {
        factory: Address,
        extension_type: ExtensionType,
        beacon: Address,
        implementation: Address,
        authority: Address,
    },
    BeaconRetargeted {
        beacon: Address,
        old_implementation: Address,
        new_implementation: Address,
        version: u64,
    },
    BeaconAuthorityTransferred {
        beacon: Address,
        old_authority: Address,
        new_authority: Address,
    },
    BaseObjectUpgraded {
        base_object: Address,
        old_implementation: Address,
        new_implementation: Address,
    },
    UpgradeAuthorityTransferred {
        base_object: Address,
        old_authority: Address,
        new_authority: Address,
    },
    FactoryAdded {
        factory: Address,
        category: BaseCategory,
    },
    ProposalCreated {
        proposal: ProposalId,
        proposer: Address,
        target: UpgradeTarget,
        new_implementation: Address,
    },
    ProposalApproved {
        proposal: ProposalId,
        approver: Address,
        approvals: usize,
    },
    ProposalExecuted {
        proposal: ProposalId,
        executor: Address,
    },
    ProposalCancelled {
        proposal: ProposalId,
        canceller: Address,
    },
    QuorumUpdated {
        previous: u32,
        required: u32,
    },
    CapabilityGranted {
        component: Address,
        capability: Capability,
        account: Address,
    },
    CapabilityRevoked {
        component: Address,
        capability: Capability,
        account: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: TimestampSeconds,
    #[serde(flatten)]
    pub event: PlatformEvent,
}

#[derive(Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, returns its sequence number
    pub fn emit(&mut self, timestamp: TimestampSeconds, event: PlatformEvent) -> u64 {
        let sequence = self.records.len() as u64;
        if log_enabled!(Level::Debug) {
            debug!(
                "Event {}: {}",
                sequence,
                serde_json::to_string(&event).unwrap_or_else(|e| e.to_string())
            );
        }

        self.records.push(EventRecord {
            sequence,
            timestamp,
            event,
        });
        sequence
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.last()
    }

    /// Records with a sequence number of at least `sequence`
    pub fn since(&self, sequence: u64) -> &[EventRecord] {
        let start = usize::try_from(sequence)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }

    /// One JSON object per line, for indexers
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
