#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod access;
pub mod beacon;
pub mod catalog;
pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod factory;
pub mod governor;
pub mod policy;
pub mod registry;

mod platform;

pub use platform::{Platform, SharedPlatform};

pub use access::{AccessControl, Capability};
pub use catalog::{BaseCategory, ExtensionParams, ExtensionType};
pub use error::{ErrorKind, PlatformError, PlatformResult};
pub use governor::{GovernorConfig, ProposalId, ProposalStatus, UpgradeProposal, UpgradeTarget};
