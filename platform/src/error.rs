//! Platform Error Codes
//!
//! Range: 0x0100 - 0x07FF
//! Format: PLATFORM_ERROR_<CATEGORY>_<SPECIFIC>

use thiserror::Error;

use tokenforge_common::{crypto::Address, time::TimestampSeconds};

use crate::{
    access::Capability,
    catalog::{BaseCategory, ExtensionType},
    governor::ProposalId,
};

// ===== Authorization Errors (0x0100 - 0x01FF) =====

pub const PLATFORM_ERROR_NOT_AUTHORIZED: u64 = 0x0100;
pub const PLATFORM_ERROR_UNAUTHORIZED: u64 = 0x0101;
pub const PLATFORM_ERROR_NOT_CONTROLLER: u64 = 0x0102;
pub const PLATFORM_ERROR_CANNOT_REVOKE_LAST_ADMIN: u64 = 0x0103;

// ===== Invariant Errors (0x0200 - 0x02FF) =====

pub const PLATFORM_ERROR_DUPLICATE_EXTENSION_TYPE: u64 = 0x0200;
pub const PLATFORM_ERROR_TYPE_INCOMPATIBLE: u64 = 0x0201;
pub const PLATFORM_ERROR_ZERO_ADDRESS: u64 = 0x0202;
pub const PLATFORM_ERROR_INVALID_IMPLEMENTATION: u64 = 0x0203;
pub const PLATFORM_ERROR_UNKNOWN_BASE_OBJECT: u64 = 0x0204;
pub const PLATFORM_ERROR_EXTENSION_NOT_FOUND: u64 = 0x0205;
pub const PLATFORM_ERROR_INSTANCE_ALREADY_OWNED: u64 = 0x0206;
pub const PLATFORM_ERROR_CATEGORY_MISMATCH: u64 = 0x0207;
pub const PLATFORM_ERROR_INVALID_QUORUM: u64 = 0x0208;
pub const PLATFORM_ERROR_INVALID_PARAMS: u64 = 0x0209;
pub const PLATFORM_ERROR_INVALID_TARGET: u64 = 0x020A;
pub const PLATFORM_ERROR_BEACON_NOT_INSTALLED: u64 = 0x020B;
pub const PLATFORM_ERROR_BEACON_ALREADY_INSTALLED: u64 = 0x020C;
pub const PLATFORM_ERROR_DIRECT_RETARGET_DISABLED: u64 = 0x020D;
pub const PLATFORM_ERROR_OBJECT_NOT_FOUND: u64 = 0x020E;

// ===== Lifecycle Errors (0x0300 - 0x03FF) =====

pub const PLATFORM_ERROR_PROPOSAL_NOT_FOUND: u64 = 0x0300;
pub const PLATFORM_ERROR_ALREADY_APPROVED: u64 = 0x0301;
pub const PLATFORM_ERROR_ALREADY_EXECUTED: u64 = 0x0302;
pub const PLATFORM_ERROR_ALREADY_CANCELLED: u64 = 0x0303;

// ===== Timing Errors (0x0400 - 0x04FF) =====

pub const PLATFORM_ERROR_INSUFFICIENT_APPROVALS: u64 = 0x0400;
pub const PLATFORM_ERROR_TIME_LOCK_ACTIVE: u64 = 0x0401;

// ===== External Collaborator Errors (0x0500 - 0x05FF) =====

pub const PLATFORM_ERROR_POLICY_DENIED: u64 = 0x0500;

// ===== Deployment Errors (0x0600 - 0x06FF) =====

pub const PLATFORM_ERROR_DEPLOYMENT_FAILED: u64 = 0x0600;
pub const PLATFORM_ERROR_INDIRECTION_FAILED: u64 = 0x0601;

// ===== Execution Errors (0x0700 - 0x07FF) =====

pub const PLATFORM_ERROR_CALL_FAILED: u64 = 0x0700;

/// Taxonomy of failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller lacks the required capability, never retried automatically
    Authorization,
    /// The transition would violate a data-model invariant
    Invariant,
    /// The proposal reached (or never had) the requested state
    Lifecycle,
    /// Valid but premature, poll `can_execute` instead of retrying blindly
    Timing,
    /// An external collaborator refused the action
    External,
    /// Fatal for the call, nothing was deployed
    Deployment,
    /// A forwarded call failed inside an implementation
    Execution,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    // Authorization
    #[error("{caller} lacks the {capability} capability")]
    NotAuthorized {
        caller: Address,
        capability: Capability,
    },

    #[error("{caller} is not the upgrade authority of {target}")]
    Unauthorized { caller: Address, target: Address },

    #[error("{caller} does not control base object {base_object}")]
    NotController { caller: Address, base_object: Address },

    #[error("Cannot revoke the last administrator")]
    CannotRevokeLastAdmin,

    // Invariant
    #[error("Extension {extension_type} already active for {base_object} at {existing}")]
    DuplicateExtensionType {
        base_object: Address,
        extension_type: ExtensionType,
        existing: Address,
    },

    #[error("Extension {extension_type} is not valid for {category} base object {base_object}")]
    TypeIncompatible {
        base_object: Address,
        extension_type: ExtensionType,
        category: BaseCategory,
    },

    #[error("{0} cannot be the zero address")]
    ZeroAddress(&'static str),

    #[error("{0} has no deployed code")]
    InvalidImplementation(Address),

    #[error("Base object {0} is not enrolled")]
    UnknownBaseObject(Address),

    #[error("No active {extension_type} extension for {base_object}")]
    ExtensionNotFound {
        base_object: Address,
        extension_type: ExtensionType,
    },

    #[error("Instance {instance} already belongs to base object {owner}")]
    InstanceAlreadyOwned { instance: Address, owner: Address },

    #[error("Base object {base_object} is {actual}, expected {expected}")]
    CategoryMismatch {
        base_object: Address,
        expected: BaseCategory,
        actual: BaseCategory,
    },

    #[error("Invalid quorum {0}: at least one approval is required")]
    InvalidQuorum(u32),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0} is not an upgradeable target")]
    InvalidTarget(Address),

    #[error("No beacon installed for {0}")]
    BeaconNotInstalled(ExtensionType),

    #[error("Beacon for {extension_type} already installed at {beacon}")]
    BeaconAlreadyInstalled {
        extension_type: ExtensionType,
        beacon: Address,
    },

    #[error("Factory {0} is governed: beacon retargets must go through the upgrade governor")]
    DirectRetargetDisabled(Address),

    #[error("No object at {0}")]
    ObjectNotFound(Address),

    // Lifecycle
    #[error("Proposal {0} not found")]
    ProposalNotFound(ProposalId),

    #[error("{approver} already approved proposal {proposal}")]
    AlreadyApproved {
        proposal: ProposalId,
        approver: Address,
    },

    #[error("Proposal {0} already executed")]
    AlreadyExecuted(ProposalId),

    #[error("Proposal {0} already cancelled")]
    AlreadyCancelled(ProposalId),

    // Timing
    #[error("Proposal {proposal} has {approvals} approvals, {required} required")]
    InsufficientApprovals {
        proposal: ProposalId,
        approvals: usize,
        required: u32,
    },

    #[error("Proposal {proposal} is time locked until {ready_at} (now {now})")]
    TimeLockActive {
        proposal: ProposalId,
        ready_at: TimestampSeconds,
        now: TimestampSeconds,
    },

    // External collaborator
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    // Deployment
    #[error("Deployment at {address} failed: {reason}")]
    DeploymentFailed { address: Address, reason: String },

    #[error("{0} is not a beacon")]
    IndirectionFailed(Address),

    // Execution
    #[error("Call failed: {0}")]
    CallFailed(String),
}

impl PlatformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthorized { .. }
            | Self::Unauthorized { .. }
            | Self::NotController { .. }
            | Self::CannotRevokeLastAdmin => ErrorKind::Authorization,

            Self::DuplicateExtensionType { .. }
            | Self::TypeIncompatible { .. }
            | Self::ZeroAddress(_)
            | Self::InvalidImplementation(_)
            | Self::UnknownBaseObject(_)
            | Self::ExtensionNotFound { .. }
            | Self::InstanceAlreadyOwned { .. }
            | Self::CategoryMismatch { .. }
            | Self::InvalidQuorum(_)
            | Self::InvalidParams(_)
            | Self::InvalidTarget(_)
            | Self::BeaconNotInstalled(_)
            | Self::BeaconAlreadyInstalled { .. }
            | Self::DirectRetargetDisabled(_)
            | Self::ObjectNotFound(_) => ErrorKind::Invariant,

            Self::ProposalNotFound(_)
            | Self::AlreadyApproved { .. }
            | Self::AlreadyExecuted(_)
            | Self::AlreadyCancelled(_) => ErrorKind::Lifecycle,

            Self::InsufficientApprovals { .. } | Self::TimeLockActive { .. } => ErrorKind::Timing,

            Self::PolicyDenied(_) => ErrorKind::External,

            Self::DeploymentFailed { .. } | Self::IndirectionFailed(_) => ErrorKind::Deployment,

            Self::CallFailed(_) => ErrorKind::Execution,
        }
    }

    /// Convert error to u64 error code
    pub fn to_code(&self) -> u64 {
        match self {
            Self::NotAuthorized { .. } => PLATFORM_ERROR_NOT_AUTHORIZED,
            Self::Unauthorized { .. } => PLATFORM_ERROR_UNAUTHORIZED,
            Self::NotController { .. } => PLATFORM_ERROR_NOT_CONTROLLER,
            Self::CannotRevokeLastAdmin => PLATFORM_ERROR_CANNOT_REVOKE_LAST_ADMIN,

            Self::DuplicateExtensionType { .. } => PLATFORM_ERROR_DUPLICATE_EXTENSION_TYPE,
            Self::TypeIncompatible { .. } => PLATFORM_ERROR_TYPE_INCOMPATIBLE,
            Self::ZeroAddress(_) => PLATFORM_ERROR_ZERO_ADDRESS,
            Self::InvalidImplementation(_) => PLATFORM_ERROR_INVALID_IMPLEMENTATION,
            Self::UnknownBaseObject(_) => PLATFORM_ERROR_UNKNOWN_BASE_OBJECT,
            Self::ExtensionNotFound { .. } => PLATFORM_ERROR_EXTENSION_NOT_FOUND,
            Self::InstanceAlreadyOwned { .. } => PLATFORM_ERROR_INSTANCE_ALREADY_OWNED,
            Self::CategoryMismatch { .. } => PLATFORM_ERROR_CATEGORY_MISMATCH,
            Self::InvalidQuorum(_) => PLATFORM_ERROR_INVALID_QUORUM,
            Self::InvalidParams(_) => PLATFORM_ERROR_INVALID_PARAMS,
            Self::InvalidTarget(_) => PLATFORM_ERROR_INVALID_TARGET,
            Self::BeaconNotInstalled(_) => PLATFORM_ERROR_BEACON_NOT_INSTALLED,
            Self::BeaconAlreadyInstalled { .. } => PLATFORM_ERROR_BEACON_ALREADY_INSTALLED,
            Self::DirectRetargetDisabled(_) => PLATFORM_ERROR_DIRECT_RETARGET_DISABLED,
            Self::ObjectNotFound(_) => PLATFORM_ERROR_OBJECT_NOT_FOUND,

            Self::ProposalNotFound(_) => PLATFORM_ERROR_PROPOSAL_NOT_FOUND,
            Self::AlreadyApproved { .. } => PLATFORM_ERROR_ALREADY_APPROVED,
            Self::AlreadyExecuted(_) => PLATFORM_ERROR_ALREADY_EXECUTED,
            Self::AlreadyCancelled(_) => PLATFORM_ERROR_ALREADY_CANCELLED,

            Self::InsufficientApprovals { .. } => PLATFORM_ERROR_INSUFFICIENT_APPROVALS,
            Self::TimeLockActive { .. } => PLATFORM_ERROR_TIME_LOCK_ACTIVE,

            Self::PolicyDenied(_) => PLATFORM_ERROR_POLICY_DENIED,

            Self::DeploymentFailed { .. } => PLATFORM_ERROR_DEPLOYMENT_FAILED,
            Self::IndirectionFailed(_) => PLATFORM_ERROR_INDIRECTION_FAILED,

            Self::CallFailed(_) => PLATFORM_ERROR_CALL_FAILED,
        }
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;
