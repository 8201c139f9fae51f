//! Extension Type Catalog
//!
//! Closed enumeration of base-object categories and the extension types
//! each of them accepts, plus the initialization shape of every extension type.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

use tokenforge_common::{
    config::{MAX_BASIS_POINTS, MAX_INIT_ARGS_LENGTH},
    crypto::{Address, Hash},
};

use crate::error::{PlatformError, PlatformResult};

/// Category of a base object (the token standard it implements)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "snake_case")]
pub enum BaseCategory {
    /// ERC20
    Fungible,
    /// ERC721
    NonFungible,
    /// ERC1155
    MultiToken,
    /// ERC3525
    SemiFungible,
    /// ERC4626
    Vault,
}

/// Kind of extension module attachable to a base object
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, Display, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtensionType {
    Compliance,
    Vesting,
    Royalty,
    Fees,
    Voting,
    Rental,
    FlashMint,
    AsyncVault,
    Permit,
}

impl ExtensionType {
    /// Stable tag used when deriving salts
    pub fn tag(&self) -> u8 {
        match self {
            Self::Compliance => 0x01,
            Self::Vesting => 0x02,
            Self::Royalty => 0x03,
            Self::Fees => 0x04,
            Self::Voting => 0x05,
            Self::Rental => 0x06,
            Self::FlashMint => 0x07,
            Self::AsyncVault => 0x08,
            Self::Permit => 0x09,
        }
    }
}

impl BaseCategory {
    /// Extension types valid for this category
    pub fn supported_extensions(&self) -> &'static [ExtensionType] {
        use ExtensionType::*;
        match self {
            Self::Fungible => &[Compliance, Vesting, Fees, Voting, FlashMint, Permit],
            Self::NonFungible => &[Compliance, Royalty, Rental, Voting],
            Self::MultiToken => &[Compliance, Royalty, Fees],
            Self::SemiFungible => &[Compliance, Vesting, Royalty, Fees],
            Self::Vault => &[Compliance, Fees, AsyncVault],
        }
    }

    #[inline]
    pub fn supports(&self, extension_type: ExtensionType) -> bool {
        self.supported_extensions().contains(&extension_type)
    }

    /// Stable tag used when deriving salts
    pub fn tag(&self) -> u8 {
        match self {
            Self::Fungible => 0x01,
            Self::NonFungible => 0x02,
            Self::MultiToken => 0x03,
            Self::SemiFungible => 0x04,
            Self::Vault => 0x05,
        }
    }
}

/// Initialization parameters, one shape per extension type
///
/// The business logic consuming these lives in the extension implementations;
/// only the shape and basic sanity are checked here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExtensionParams {
    Compliance {
        /// Identity of the rule set the module evaluates
        rule_set: Hash,
    },
    Vesting {
        beneficiary: Address,
        start: u64,
        duration: u64,
    },
    Royalty {
        receiver: Address,
        basis_points: u16,
    },
    Fees {
        collector: Address,
        basis_points: u16,
    },
    Voting {
        voting_period: u64,
        quorum_basis_points: u16,
    },
    Rental {
        max_duration: u64,
    },
    FlashMint {
        max_loan: u64,
        fee_basis_points: u16,
    },
    AsyncVault {
        settlement_delay: u64,
    },
    Permit {
        domain_name: String,
    },
}

impl ExtensionParams {
    /// The registry slot these parameters initialize
    pub fn extension_type(&self) -> ExtensionType {
        match self {
            Self::Compliance { .. } => ExtensionType::Compliance,
            Self::Vesting { .. } => ExtensionType::Vesting,
            Self::Royalty { .. } => ExtensionType::Royalty,
            Self::Fees { .. } => ExtensionType::Fees,
            Self::Voting { .. } => ExtensionType::Voting,
            Self::Rental { .. } => ExtensionType::Rental,
            Self::FlashMint { .. } => ExtensionType::FlashMint,
            Self::AsyncVault { .. } => ExtensionType::AsyncVault,
            Self::Permit { .. } => ExtensionType::Permit,
        }
    }

    pub fn validate(&self) -> PlatformResult<()> {
        let invalid = |reason: &str| {
            Err(PlatformError::InvalidParams(format!(
                "{}: {}",
                self.extension_type(),
                reason
            )))
        };

        match self {
            Self::Vesting {
                beneficiary,
                duration,
                ..
            } => {
                if beneficiary.is_zero() {
                    return Err(PlatformError::ZeroAddress("beneficiary"));
                }
                if *duration == 0 {
                    return invalid("duration cannot be zero");
                }
            }
            Self::Royalty {
                receiver,
                basis_points,
            } => {
                if receiver.is_zero() {
                    return Err(PlatformError::ZeroAddress("receiver"));
                }
                if *basis_points > MAX_BASIS_POINTS {
                    return invalid("basis points above 10000");
                }
            }
            Self::Fees {
                collector,
                basis_points,
            } => {
                if collector.is_zero() {
                    return Err(PlatformError::ZeroAddress("collector"));
                }
                if *basis_points > MAX_BASIS_POINTS {
                    return invalid("basis points above 10000");
                }
            }
            Self::Voting {
                voting_period,
                quorum_basis_points,
            } => {
                if *voting_period == 0 {
                    return invalid("voting period cannot be zero");
                }
                if *quorum_basis_points > MAX_BASIS_POINTS {
                    return invalid("quorum above 10000 basis points");
                }
            }
            Self::FlashMint {
                fee_basis_points, ..
            } => {
                if *fee_basis_points > MAX_BASIS_POINTS {
                    return invalid("fee above 10000 basis points");
                }
            }
            Self::Permit { domain_name } => {
                if domain_name.is_empty() {
                    return invalid("domain name cannot be empty");
                }
            }
            Self::Compliance { .. } | Self::Rental { .. } | Self::AsyncVault { .. } => {}
        }

        Ok(())
    }

    /// Initialization arguments handed to the implementation
    pub fn encode(&self) -> PlatformResult<Vec<u8>> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| PlatformError::InvalidParams(e.to_string()))?;
        if bytes.len() > MAX_INIT_ARGS_LENGTH {
            return Err(PlatformError::InvalidParams(format!(
                "init args too large: {} > {}",
                bytes.len(),
                MAX_INIT_ARGS_LENGTH
            )));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> PlatformResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PlatformError::InvalidParams(e.to_string()))
    }
}
