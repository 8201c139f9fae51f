//! Platform configuration file
//!
//! ```json
//! {
//!   "governor": { "requiredApprovals": 2, "timelockDuration": 172800 },
//!   "factories": [
//!     { "category": "fungible" },
//!     { "category": "vault", "retargetMode": "direct" }
//!   ]
//! }
//! ```
//!
//! Every field is optional, missing ones take their default.

use std::{collections::HashSet, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{catalog::BaseCategory, factory::RetargetMode, governor::GovernorConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryConfig {
    pub category: BaseCategory,
    #[serde(default)]
    pub retarget_mode: RetargetMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformConfig {
    pub governor: GovernorConfig,
    pub factories: Vec<FactoryConfig>,
}

impl Default for PlatformConfig {
    // One governed factory per category
    fn default() -> Self {
        Self {
            governor: GovernorConfig::default(),
            factories: BaseCategory::iter()
                .map(|category| FactoryConfig {
                    category,
                    retarget_mode: RetargetMode::Governed,
                })
                .collect(),
        }
    }
}

impl PlatformConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse platform config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read platform config: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid platform config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.governor
            .validate()
            .context("Invalid governor configuration")?;

        let mut seen = HashSet::new();
        for factory in &self.factories {
            if !seen.insert(factory.category) {
                bail!("Duplicate factory for category {}", factory.category);
            }
        }
        Ok(())
    }

    /// Factories allowed to retarget their beacons without the governor
    pub fn direct_factories(&self) -> Vec<BaseCategory> {
        self.factories
            .iter()
            .filter(|factory| factory.retarget_mode == RetargetMode::Direct)
            .map(|factory| factory.category)
            .collect()
    }
}
