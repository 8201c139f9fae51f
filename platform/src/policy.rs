//! Policy engine seam
//!
//! Factories ask an optional external engine whether an extension deployment
//! may proceed. Only the verdict matters here, rule content lives elsewhere.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use tokenforge_common::crypto::Address;

use crate::{
    catalog::{ExtensionParams, ExtensionType},
    error::{PlatformError, PlatformResult},
};

/// What the engine is asked to judge
#[derive(Debug, Clone, Copy)]
pub struct ActionDescriptor<'a> {
    pub actor: &'a Address,
    pub base_object: &'a Address,
    pub extension_type: ExtensionType,
    pub params: &'a ExtensionParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub reason: String,
}

impl PolicyVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, action: &ActionDescriptor<'_>) -> PolicyVerdict;
}

/// Engine that never objects
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyEngine for AllowAll {
    fn evaluate(&self, _action: &ActionDescriptor<'_>) -> PolicyVerdict {
        PolicyVerdict::allow()
    }
}

/// Engines evaluated in order, the first denial wins
#[derive(Clone, Default)]
pub struct PolicyChain {
    engines: Vec<Arc<dyn PolicyEngine>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, engine: Arc<dyn PolicyEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl PolicyEngine for PolicyChain {
    fn evaluate(&self, action: &ActionDescriptor<'_>) -> PolicyVerdict {
        self.engines
            .iter()
            .map(|engine| engine.evaluate(action))
            .find(|verdict| !verdict.allowed)
            .unwrap_or_else(PolicyVerdict::allow)
    }
}

/// Apply an optional engine: absent means allowed, a denial carries its reason verbatim
pub fn enforce(engine: Option<&dyn PolicyEngine>, action: &ActionDescriptor<'_>) -> PlatformResult<()> {
    let Some(engine) = engine else {
        return Ok(());
    };

    let verdict = engine.evaluate(action);
    if verdict.allowed {
        Ok(())
    } else {
        debug!(
            "Policy denied {} for {} by {}: {}",
            action.extension_type,
            action.base_object.short(),
            action.actor.short(),
            verdict.reason
        );
        Err(PlatformError::PolicyDenied(verdict.reason))
    }
}
