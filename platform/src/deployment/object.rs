use std::{collections::BTreeMap, fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use tokenforge_common::{
    crypto::{compute_code_identity, Address, Hash},
    time::TimestampSeconds,
};

use crate::{
    beacon::Beacon,
    catalog::{BaseCategory, ExtensionType},
    error::PlatformResult,
};

/// Key/value state owned by an instance
///
/// Survives implementation swaps, the logic lives in the implementation.
pub type InstanceStorage = BTreeMap<Vec<u8>, Vec<u8>>;

/// Everything an implementation sees while serving a call
pub struct CallContext<'a> {
    /// Who called the instance
    pub caller: &'a Address,
    /// The instance being called
    pub this: &'a Address,
    /// The implementation resolved at call entry
    pub implementation: &'a Address,
    pub timestamp: TimestampSeconds,
    pub storage: &'a mut InstanceStorage,
}

/// Behavior of a deployed implementation
pub trait CallHandler: Send + Sync {
    /// Run once when an instance bound to this implementation is created
    fn initialize(&self, _ctx: &mut CallContext<'_>, _init_args: &[u8]) -> PlatformResult<()> {
        Ok(())
    }

    fn call(&self, ctx: &mut CallContext<'_>, input: &[u8]) -> PlatformResult<Vec<u8>>;
}

/// Deployable code: its bytecode gives it an identity, its handler gives it behavior
#[derive(Clone)]
pub struct Code {
    bytecode: Vec<u8>,
    handler: Arc<dyn CallHandler>,
}

impl Code {
    pub fn new(bytecode: Vec<u8>, handler: Arc<dyn CallHandler>) -> Self {
        Self { bytecode, handler }
    }

    pub fn identity(&self) -> Hash {
        compute_code_identity(&self.bytecode)
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn handler(&self) -> Arc<dyn CallHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Code")
            .field("identity", &self.identity())
            .field("size", &self.bytecode.len())
            .finish()
    }
}

/// A deployed implementation
#[derive(Clone, Debug)]
pub struct CodeObject {
    pub address: Address,
    pub code: Code,
    pub deployer: Address,
    pub created_at: TimestampSeconds,
}

/// How an instance resolves its implementation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Binding {
    /// Whatever the beacon currently points at
    Beacon(Address),
    /// A fixed implementation, only changed through `authorize_upgrade`
    Fixed(Address),
}

/// Base-object specific state
#[derive(Clone, Debug)]
pub struct BaseObjectInfo {
    /// Party allowed to attach extensions
    pub controller: Address,
    pub category: BaseCategory,
    /// The only identity allowed to change the implementation
    pub upgrade_authority: Address,
    /// Acknowledged extensions
    pub extensions: IndexMap<ExtensionType, Address>,
}

/// An addressable forwarding shell
#[derive(Clone, Debug)]
pub struct DeployedInstance {
    pub address: Address,
    pub binding: Binding,
    pub deployer: Address,
    pub created_at: TimestampSeconds,
    pub active: bool,
    pub storage: InstanceStorage,
    /// Set when the instance is a base object
    pub base: Option<BaseObjectInfo>,
}

impl DeployedInstance {
    pub fn is_base_object(&self) -> bool {
        self.base.is_some()
    }
}

#[derive(Clone, Debug)]
pub enum DeployedObject {
    Code(CodeObject),
    Beacon(Beacon),
    Instance(DeployedInstance),
}

impl DeployedObject {
    pub fn address(&self) -> &Address {
        match self {
            Self::Code(code) => &code.address,
            Self::Beacon(beacon) => beacon.address(),
            Self::Instance(instance) => &instance.address,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Code(_) => "code",
            Self::Beacon(_) => "beacon",
            Self::Instance(instance) if instance.is_base_object() => "base-object",
            Self::Instance(_) => "instance",
        }
    }
}
