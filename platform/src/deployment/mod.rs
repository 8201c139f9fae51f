//! Deployment primitives and proxy indirection
//!
//! Every object lives at an address derived CREATE2-style from
//! `(deployer, salt, code_identity)`, so addresses can be predicted before
//! anything is deployed. Instances carry state only; behavior is resolved
//! at call entry through their binding (a beacon or a fixed implementation).

mod object;

use std::collections::HashMap;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::{debug, info, trace};

use tokenforge_common::{
    config::{BASE_OBJECT_PROXY_CODE, BEACON_CODE, BEACON_PROXY_CODE, MAX_INIT_ARGS_LENGTH},
    crypto::{compute_code_identity, compute_deterministic_address, Address, Hash},
    time::TimestampSeconds,
};

use crate::{
    beacon::Beacon,
    catalog::{BaseCategory, ExtensionType},
    error::{PlatformError, PlatformResult},
    governor::{ProposalId, UpgradeExecutor, UpgradeTarget},
};

pub use object::{
    BaseObjectInfo, Binding, CallContext, CallHandler, Code, CodeObject, DeployedInstance,
    DeployedObject, InstanceStorage,
};

lazy_static! {
    /// Code identity shared by every beacon
    pub static ref BEACON_CODE_IDENTITY: Hash = compute_code_identity(BEACON_CODE);
}

/// Code identity of an instance forwarding through `beacon`
///
/// The beacon is part of the proxy creation code, so two beacons never
/// share instance addresses even with identical salts.
pub fn beacon_proxy_identity(beacon: &Address) -> Hash {
    let mut bytecode = Vec::with_capacity(BEACON_PROXY_CODE.len() + 32);
    bytecode.extend_from_slice(BEACON_PROXY_CODE);
    bytecode.extend_from_slice(beacon.as_bytes());
    compute_code_identity(&bytecode)
}

/// Code identity of a base object proxy created with `implementation`
pub fn base_object_proxy_identity(implementation: &Address) -> Hash {
    let mut bytecode = Vec::with_capacity(BASE_OBJECT_PROXY_CODE.len() + 32);
    bytecode.extend_from_slice(BASE_OBJECT_PROXY_CODE);
    bytecode.extend_from_slice(implementation.as_bytes());
    compute_code_identity(&bytecode)
}

/// Parameters of a new base object
#[derive(Debug, Clone)]
pub struct BaseObjectSpec {
    pub implementation: Address,
    pub controller: Address,
    pub category: BaseCategory,
    pub upgrade_authority: Address,
}

/// Address-indexed arena of every deployed object
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<Address, DeployedObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure address prediction, equal to what the matching deploy call produces
    #[inline]
    pub fn predict_address(deployer: &Address, salt: &Hash, code_identity: &Hash) -> Address {
        compute_deterministic_address(deployer, salt, code_identity)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.objects.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&DeployedObject> {
        self.objects.get(address)
    }

    pub fn code(&self, address: &Address) -> Option<&CodeObject> {
        match self.objects.get(address)? {
            DeployedObject::Code(code) => Some(code),
            _ => None,
        }
    }

    #[inline]
    pub fn has_code(&self, address: &Address) -> bool {
        self.code(address).is_some()
    }

    pub fn beacon(&self, address: &Address) -> Option<&Beacon> {
        match self.objects.get(address)? {
            DeployedObject::Beacon(beacon) => Some(beacon),
            _ => None,
        }
    }

    fn beacon_mut(&mut self, address: &Address) -> Option<&mut Beacon> {
        match self.objects.get_mut(address)? {
            DeployedObject::Beacon(beacon) => Some(beacon),
            _ => None,
        }
    }

    pub fn instance(&self, address: &Address) -> Option<&DeployedInstance> {
        match self.objects.get(address)? {
            DeployedObject::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    fn instance_mut(&mut self, address: &Address) -> Option<&mut DeployedInstance> {
        match self.objects.get_mut(address)? {
            DeployedObject::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn base_object(&self, address: &Address) -> Option<&BaseObjectInfo> {
        self.instance(address)?.base.as_ref()
    }

    fn base_object_mut(&mut self, address: &Address) -> PlatformResult<&mut BaseObjectInfo> {
        self.instance_mut(address)
            .and_then(|instance| instance.base.as_mut())
            .ok_or_else(|| PlatformError::ObjectNotFound(address.clone()))
    }

    fn ensure_vacant(&self, address: &Address) -> PlatformResult<()> {
        if let Some(existing) = self.objects.get(address) {
            return Err(PlatformError::DeploymentFailed {
                address: address.clone(),
                reason: format!("address already holds a {}", existing.kind()),
            });
        }
        Ok(())
    }

    /// Deploy an implementation
    pub fn deploy_at(
        &mut self,
        deployer: &Address,
        salt: &Hash,
        code: Code,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        let address = Self::predict_address(deployer, salt, &code.identity());
        self.ensure_vacant(&address)?;
        if code.bytecode().is_empty() {
            return Err(PlatformError::DeploymentFailed {
                address,
                reason: "deployed object has no code".to_string(),
            });
        }

        debug!("Deploying code {} at {}", code.identity().short(), address.short());
        self.objects.insert(
            address.clone(),
            DeployedObject::Code(CodeObject {
                address: address.clone(),
                code,
                deployer: deployer.clone(),
                created_at: now,
            }),
        );
        Ok(address)
    }

    /// Deploy a beacon pointing at an already deployed implementation
    pub fn deploy_beacon(
        &mut self,
        deployer: &Address,
        salt: &Hash,
        implementation: &Address,
        authority: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        if authority.is_zero() {
            return Err(PlatformError::ZeroAddress("authority"));
        }
        if !self.has_code(implementation) {
            return Err(PlatformError::InvalidImplementation(implementation.clone()));
        }

        let address = Self::predict_address(deployer, salt, &BEACON_CODE_IDENTITY);
        self.ensure_vacant(&address)?;

        info!(
            "Beacon deployed at {} -> {} (authority {})",
            address.short(),
            implementation.short(),
            authority.short()
        );
        let beacon = Beacon::new(address.clone(), implementation.clone(), authority.clone(), now);
        self.objects.insert(address.clone(), DeployedObject::Beacon(beacon));
        Ok(address)
    }

    /// Deploy an instance forwarding through `beacon`
    pub fn deploy_via_beacon(
        &mut self,
        deployer: &Address,
        beacon: &Address,
        salt: &Hash,
        init_args: &[u8],
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        if self.beacon(beacon).is_none() {
            return Err(PlatformError::IndirectionFailed(beacon.clone()));
        }

        let address = Self::predict_address(deployer, salt, &beacon_proxy_identity(beacon));
        let instance = DeployedInstance {
            address: address.clone(),
            binding: Binding::Beacon(beacon.clone()),
            deployer: deployer.clone(),
            created_at: now,
            active: true,
            storage: InstanceStorage::new(),
            base: None,
        };
        self.install_instance(instance, init_args)?;

        info!("Instance {} deployed through beacon {}", address.short(), beacon.short());
        Ok(address)
    }

    /// Deploy a base object bound to a fixed implementation
    pub fn deploy_base_object(
        &mut self,
        deployer: &Address,
        salt: &Hash,
        spec: BaseObjectSpec,
        init_args: &[u8],
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        if spec.controller.is_zero() {
            return Err(PlatformError::ZeroAddress("controller"));
        }
        if spec.upgrade_authority.is_zero() {
            return Err(PlatformError::ZeroAddress("upgrade authority"));
        }
        if !self.has_code(&spec.implementation) {
            return Err(PlatformError::InvalidImplementation(spec.implementation));
        }

        let address =
            Self::predict_address(deployer, salt, &base_object_proxy_identity(&spec.implementation));
        let instance = DeployedInstance {
            address: address.clone(),
            binding: Binding::Fixed(spec.implementation.clone()),
            deployer: deployer.clone(),
            created_at: now,
            active: true,
            storage: InstanceStorage::new(),
            base: Some(BaseObjectInfo {
                controller: spec.controller,
                category: spec.category,
                upgrade_authority: spec.upgrade_authority,
                extensions: IndexMap::new(),
            }),
        };
        self.install_instance(instance, init_args)?;

        info!("{} base object deployed at {}", spec.category, address.short());
        Ok(address)
    }

    // Run the initializer against the staged instance and only insert it on success
    fn install_instance(&mut self, mut instance: DeployedInstance, init_args: &[u8]) -> PlatformResult<()> {
        self.ensure_vacant(&instance.address)?;
        if init_args.len() > MAX_INIT_ARGS_LENGTH {
            return Err(PlatformError::DeploymentFailed {
                address: instance.address,
                reason: format!("init args too large: {} > {}", init_args.len(), MAX_INIT_ARGS_LENGTH),
            });
        }

        let implementation = self.resolve_binding(&instance.binding)?;
        let code = self
            .code(&implementation)
            .ok_or_else(|| PlatformError::InvalidImplementation(implementation.clone()))?;

        let handler = code.code.handler();
        let mut ctx = CallContext {
            caller: &instance.deployer,
            this: &instance.address,
            implementation: &implementation,
            timestamp: instance.created_at,
            storage: &mut instance.storage,
        };
        handler
            .initialize(&mut ctx, init_args)
            .map_err(|e| PlatformError::DeploymentFailed {
                address: instance.address.clone(),
                reason: format!("initializer failed: {}", e),
            })?;

        self.objects
            .insert(instance.address.clone(), DeployedObject::Instance(instance));
        Ok(())
    }

    fn resolve_binding(&self, binding: &Binding) -> PlatformResult<Address> {
        match binding {
            Binding::Fixed(implementation) => Ok(implementation.clone()),
            Binding::Beacon(beacon) => self
                .beacon(beacon)
                .map(|beacon| beacon.current_implementation().clone())
                .ok_or_else(|| PlatformError::IndirectionFailed(beacon.clone())),
        }
    }

    /// The implementation a call to `address` would run right now
    pub fn resolve_implementation(&self, address: &Address) -> PlatformResult<Address> {
        let instance = self
            .instance(address)
            .ok_or_else(|| PlatformError::ObjectNotFound(address.clone()))?;
        self.resolve_binding(&instance.binding)
    }

    /// Forward a call to whatever the instance resolves to at entry
    ///
    /// The implementation is resolved exactly once. If the handler fails,
    /// the instance storage is restored.
    pub fn call(
        &mut self,
        caller: &Address,
        address: &Address,
        input: &[u8],
        now: TimestampSeconds,
    ) -> PlatformResult<Vec<u8>> {
        let instance = self
            .instance(address)
            .ok_or_else(|| PlatformError::ObjectNotFound(address.clone()))?;
        if !instance.active {
            return Err(PlatformError::CallFailed(format!("instance {} is inactive", address)));
        }

        let implementation = self.resolve_binding(&instance.binding)?;
        let handler = self
            .code(&implementation)
            .map(|code| code.code.handler())
            .ok_or_else(|| PlatformError::InvalidImplementation(implementation.clone()))?;

        trace!("Call {} -> {}", address.short(), implementation.short());

        let instance = self
            .instance_mut(address)
            .ok_or_else(|| PlatformError::ObjectNotFound(address.clone()))?;
        let snapshot = instance.storage.clone();
        let mut ctx = CallContext {
            caller,
            this: address,
            implementation: &implementation,
            timestamp: now,
            storage: &mut instance.storage,
        };

        match handler.call(&mut ctx, input) {
            Ok(output) => Ok(output),
            Err(e) => {
                instance.storage = snapshot;
                Err(e)
            }
        }
    }

    /// Retarget a beacon on behalf of its authority, returns the previous implementation
    pub fn retarget_beacon(
        &mut self,
        caller: &Address,
        beacon: &Address,
        new_implementation: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        let has_code = self.has_code(new_implementation);
        let cell = self
            .beacon_mut(beacon)
            .ok_or_else(|| PlatformError::IndirectionFailed(beacon.clone()))?;

        cell.ensure_authority(caller)?;
        if !has_code {
            return Err(PlatformError::InvalidImplementation(new_implementation.clone()));
        }
        cell.retarget(caller, new_implementation, now)
    }

    pub fn transfer_beacon_authority(
        &mut self,
        caller: &Address,
        beacon: &Address,
        new_authority: &Address,
    ) -> PlatformResult<Address> {
        self.beacon_mut(beacon)
            .ok_or_else(|| PlatformError::IndirectionFailed(beacon.clone()))?
            .transfer_authority(caller, new_authority)
    }

    /// Hand the upgrade authority of a base object to another identity
    ///
    /// Only the current authority may call this, returns the previous one.
    pub fn transfer_upgrade_authority(
        &mut self,
        caller: &Address,
        base_object: &Address,
        new_authority: &Address,
    ) -> PlatformResult<Address> {
        if new_authority.is_zero() {
            return Err(PlatformError::ZeroAddress("authority"));
        }
        let instance = self
            .instance_mut(base_object)
            .ok_or_else(|| PlatformError::ObjectNotFound(base_object.clone()))?;
        let Some(info) = instance.base.as_mut() else {
            return Err(PlatformError::InvalidTarget(base_object.clone()));
        };
        if info.upgrade_authority != *caller {
            return Err(PlatformError::Unauthorized {
                caller: caller.clone(),
                target: base_object.clone(),
            });
        }

        let old = std::mem::replace(&mut info.upgrade_authority, new_authority.clone());
        info!(
            "Upgrade authority of base object {} moved {} -> {}",
            base_object.short(),
            old.short(),
            new_authority.short()
        );
        Ok(old)
    }

    /// Whoever may upgrade `address`: a beacon's authority or a base object's upgrade authority
    pub fn upgrade_authority_of(&self, address: &Address) -> Option<&Address> {
        match self.objects.get(address)? {
            DeployedObject::Beacon(beacon) => Some(beacon.authority()),
            DeployedObject::Instance(instance) => instance.base.as_ref().map(|info| &info.upgrade_authority),
            DeployedObject::Code(_) => None,
        }
    }

    pub(crate) fn mark_beacon_pending(&mut self, beacon: &Address, proposal: ProposalId) -> PlatformResult<()> {
        self.beacon_mut(beacon)
            .ok_or_else(|| PlatformError::IndirectionFailed(beacon.clone()))?
            .add_pending_proposal(proposal);
        Ok(())
    }

    pub(crate) fn clear_beacon_pending(&mut self, beacon: &Address, proposal: &ProposalId) {
        if let Some(cell) = self.beacon_mut(beacon) {
            if cell.remove_pending_proposal(proposal) {
                debug!("Proposal {} no longer pending on beacon {}", proposal, beacon.short());
            }
        }
    }

    /// Instances currently forwarding through `beacon`
    pub fn instances_bound_to(&self, beacon: &Address) -> Vec<Address> {
        let target = Binding::Beacon(beacon.clone());
        let mut bound: Vec<Address> = self
            .objects
            .values()
            .filter_map(|object| match object {
                DeployedObject::Instance(instance) if instance.binding == target => {
                    Some(instance.address.clone())
                }
                _ => None,
            })
            .collect();
        bound.sort();
        bound
    }

    /// Base object acknowledgment of an attached extension
    pub fn attach_extension(
        &mut self,
        base_object: &Address,
        extension_type: ExtensionType,
        instance: &Address,
    ) -> PlatformResult<()> {
        if instance.is_zero() {
            return Err(PlatformError::ZeroAddress("extension"));
        }
        let info = self.base_object_mut(base_object)?;
        info.extensions.insert(extension_type, instance.clone());
        Ok(())
    }

    pub fn detach_extension(
        &mut self,
        base_object: &Address,
        extension_type: ExtensionType,
    ) -> PlatformResult<Option<Address>> {
        let info = self.base_object_mut(base_object)?;
        Ok(info.extensions.shift_remove(&extension_type))
    }

    pub fn set_active(&mut self, address: &Address, active: bool) -> PlatformResult<()> {
        let instance = self
            .instance_mut(address)
            .ok_or_else(|| PlatformError::ObjectNotFound(address.clone()))?;
        instance.active = active;
        Ok(())
    }

    /// Swap the implementation of a base object
    ///
    /// Only the upgrade authority may call this. Non-empty `call_data` is
    /// forwarded to the new implementation and the swap is rolled back if
    /// that call fails.
    pub fn authorize_upgrade(
        &mut self,
        caller: &Address,
        base_object: &Address,
        new_implementation: &Address,
        call_data: &[u8],
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        let has_code = self.has_code(new_implementation);
        let instance = self
            .instance_mut(base_object)
            .ok_or_else(|| PlatformError::ObjectNotFound(base_object.clone()))?;
        let Some(info) = instance.base.as_ref() else {
            return Err(PlatformError::InvalidTarget(base_object.clone()));
        };
        if info.upgrade_authority != *caller {
            return Err(PlatformError::Unauthorized {
                caller: caller.clone(),
                target: base_object.clone(),
            });
        }
        if !has_code {
            return Err(PlatformError::InvalidImplementation(new_implementation.clone()));
        }

        let previous = std::mem::replace(
            &mut instance.binding,
            Binding::Fixed(new_implementation.clone()),
        );

        if !call_data.is_empty() {
            if let Err(e) = self.call(caller, base_object, call_data, now) {
                if let Some(instance) = self.instance_mut(base_object) {
                    instance.binding = previous;
                }
                return Err(e);
            }
        }

        let old = match previous {
            Binding::Fixed(implementation) => implementation,
            Binding::Beacon(beacon) => beacon,
        };
        info!(
            "Base object {} upgraded {} -> {}",
            base_object.short(),
            old.short(),
            new_implementation.short()
        );
        Ok(old)
    }
}

impl UpgradeExecutor for ObjectStore {
    fn apply_upgrade(
        &mut self,
        governor: &Address,
        target: &UpgradeTarget,
        new_implementation: &Address,
        call_data: &[u8],
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        match target {
            UpgradeTarget::Beacon(beacon) => {
                self.retarget_beacon(governor, beacon, new_implementation, now)
            }
            UpgradeTarget::BaseObject(base_object) => {
                self.authorize_upgrade(governor, base_object, new_implementation, call_data, now)
            }
            // The new authority travels in the implementation slot
            UpgradeTarget::Authority(address) => {
                if self.beacon(address).is_some() {
                    self.transfer_beacon_authority(governor, address, new_implementation)
                } else {
                    self.transfer_upgrade_authority(governor, address, new_implementation)
                }
            }
        }
    }
}
