//! Composition root
//!
//! `Platform` owns every component and exposes each operation with an
//! explicit caller. A `&mut Platform` (or the write half of a
//! [`SharedPlatform`]) is one atomic step: a multi-component operation either
//! completes or returns an error with prior state intact.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use log::info;

use tokenforge_common::{
    config::{FACTORY_CODE, GOVERNOR_CODE, REGISTRY_CODE, SALT_DOMAIN_SYSTEM},
    crypto::{compute_code_identity, derive_salt, Address, Hash},
    time::{Clock, SystemClock, TimestampSeconds},
};

use crate::{
    access::Capability,
    catalog::{BaseCategory, ExtensionParams, ExtensionType},
    config::{FactoryConfig, PlatformConfig},
    deployment::{Code, ObjectStore},
    error::{PlatformError, PlatformResult},
    events::{EventLog, PlatformEvent},
    factory::{DeployEnv, ExtensionFactory},
    governor::{ProposalId, UpgradeExecutor, UpgradeGovernor, UpgradeTarget},
    policy::PolicyEngine,
    registry::{ExtensionRegistry, RegistryEntry},
};

/// Multi-caller handle, every operation takes the write lock for one step
pub type SharedPlatform = Arc<RwLock<Platform>>;

// System components live at addresses derived from the administrator,
// so the same admin gets the same layout in every environment
fn system_address(admin: &Address, code: &[u8], parts: &[&[u8]]) -> Address {
    ObjectStore::predict_address(
        admin,
        &derive_salt(SALT_DOMAIN_SYSTEM, parts),
        &compute_code_identity(code),
    )
}

// Build a factory at its system address and give it the registrar capability.
// The flag tells whether the capability was newly granted.
fn onboard_factory(
    admin: &Address,
    granter: &Address,
    governor: &Address,
    registry: &mut ExtensionRegistry,
    config: &FactoryConfig,
) -> PlatformResult<(ExtensionFactory, bool)> {
    let address = system_address(admin, FACTORY_CODE, &[&[config.category.tag()]]);
    let granted = registry.grant(granter, Capability::Registrar, &address)?;
    let factory = ExtensionFactory::new(
        address,
        config.category,
        granter.clone(),
        governor.clone(),
        config.retarget_mode,
    );
    Ok((factory, granted))
}

pub struct Platform {
    /// Founding administrator, system addresses derive from it
    admin: Address,
    clock: Arc<dyn Clock>,
    store: ObjectStore,
    registry: ExtensionRegistry,
    governor: UpgradeGovernor,
    factories: IndexMap<BaseCategory, ExtensionFactory>,
    events: EventLog,
}

impl Platform {
    pub fn new(admin: Address, config: &PlatformConfig, clock: Arc<dyn Clock>) -> PlatformResult<Self> {
        if admin.is_zero() {
            return Err(PlatformError::ZeroAddress("admin"));
        }

        let governor_address = system_address(&admin, GOVERNOR_CODE, &[]);
        let registry_address = system_address(&admin, REGISTRY_CODE, &[]);

        let governor = UpgradeGovernor::new(governor_address.clone(), admin.clone(), config.governor)?;
        let mut registry = ExtensionRegistry::new(registry_address, admin.clone());

        let mut factories = IndexMap::new();
        for factory_config in &config.factories {
            let category = factory_config.category;
            if factories.contains_key(&category) {
                return Err(PlatformError::InvalidParams(format!(
                    "duplicate factory for {}",
                    category
                )));
            }

            let (factory, _) = onboard_factory(&admin, &admin, &governor_address, &mut registry, factory_config)?;
            factories.insert(category, factory);
        }

        info!(
            "Platform ready: governor {}, registry {}, {} factories, quorum {}, timelock {}s",
            governor_address.short(),
            registry.address().short(),
            factories.len(),
            config.governor.required_approvals,
            config.governor.timelock_duration
        );

        Ok(Self {
            admin,
            clock,
            store: ObjectStore::new(),
            registry,
            governor,
            factories,
            events: EventLog::new(),
        })
    }

    pub fn with_system_clock(admin: Address, config: &PlatformConfig) -> PlatformResult<Self> {
        Self::new(admin, config, Arc::new(SystemClock))
    }

    pub fn into_shared(self) -> SharedPlatform {
        Arc::new(RwLock::new(self))
    }

    #[inline]
    pub fn now(&self) -> TimestampSeconds {
        self.clock.now()
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn governor(&self) -> &UpgradeGovernor {
        &self.governor
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn factory(&self, category: BaseCategory) -> Option<&ExtensionFactory> {
        self.factories.get(&category)
    }

    pub fn factories(&self) -> impl Iterator<Item = &ExtensionFactory> {
        self.factories.values()
    }

    /// Onboard a factory for a category that has none yet
    ///
    /// Registry admins only. The new factory gets the registrar capability
    /// and the caller becomes its admin.
    pub fn add_factory(&mut self, caller: &Address, config: &FactoryConfig) -> PlatformResult<Address> {
        self.registry.access().require(Capability::Admin, caller)?;
        if self.factories.contains_key(&config.category) {
            return Err(PlatformError::InvalidParams(format!(
                "duplicate factory for {}",
                config.category
            )));
        }

        let (factory, granted) = onboard_factory(
            &self.admin,
            caller,
            self.governor.address(),
            &mut self.registry,
            config,
        )?;
        let address = factory.address().clone();
        info!("{} factory {} onboarded by {}", config.category, address.short(), caller.short());
        self.factories.insert(config.category, factory);

        let now = self.now();
        self.events.emit(
            now,
            PlatformEvent::FactoryAdded {
                factory: address.clone(),
                category: config.category,
            },
        );
        if granted {
            let component = self.registry.address().clone();
            self.emit_capability(component, Capability::Registrar, &address, true);
        }
        Ok(address)
    }

    fn factory_for(&self, category: BaseCategory) -> PlatformResult<&ExtensionFactory> {
        self.factories
            .get(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))
    }

    fn factory_for_mut(&mut self, category: BaseCategory) -> PlatformResult<&mut ExtensionFactory> {
        self.factories
            .get_mut(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))
    }

    fn category_of(&self, base_object: &Address) -> PlatformResult<BaseCategory> {
        if base_object.is_zero() {
            return Err(PlatformError::ZeroAddress("base object"));
        }
        self.registry
            .category_of(base_object)
            .ok_or_else(|| PlatformError::UnknownBaseObject(base_object.clone()))
    }

    // ===== Deployment =====

    /// Address `deploy_code` would give `code` for this deployer and salt
    pub fn predict_code_address(deployer: &Address, salt: &Hash, code: &Code) -> Address {
        ObjectStore::predict_address(deployer, salt, &code.identity())
    }

    /// Deploy an implementation, anyone may do so
    pub fn deploy_code(&mut self, caller: &Address, salt: &Hash, code: Code) -> PlatformResult<Address> {
        let now = self.now();
        self.store.deploy_at(caller, salt, code, now)
    }

    pub fn deploy_base_object(
        &mut self,
        caller: &Address,
        category: BaseCategory,
        implementation: &Address,
        salt: &Hash,
        init_args: &[u8],
    ) -> PlatformResult<Address> {
        let now = self.now();
        let factory = self
            .factories
            .get(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))?;
        let env = DeployEnv {
            store: &mut self.store,
            registry: &mut self.registry,
            events: &mut self.events,
            now,
        };
        factory.deploy_base_object(env, caller, implementation, salt, init_args)
    }

    pub fn install_beacon(
        &mut self,
        caller: &Address,
        category: BaseCategory,
        extension_type: ExtensionType,
        implementation: &Address,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let factory = self
            .factories
            .get_mut(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))?;
        factory.install_beacon(
            caller,
            &mut self.store,
            &mut self.events,
            extension_type,
            implementation,
            now,
        )
    }

    pub fn set_policy(
        &mut self,
        caller: &Address,
        category: BaseCategory,
        policy: Option<Arc<dyn PolicyEngine>>,
    ) -> PlatformResult<()> {
        self.factory_for_mut(category)?.set_policy(caller, policy)
    }

    pub fn deploy_extension(
        &mut self,
        caller: &Address,
        base_object: &Address,
        params: &ExtensionParams,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let category = self.category_of(base_object)?;
        let factory = self
            .factories
            .get(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))?;
        let env = DeployEnv {
            store: &mut self.store,
            registry: &mut self.registry,
            events: &mut self.events,
            now,
        };
        factory.deploy_extension(env, caller, base_object, params)
    }

    pub fn predict_extension_address(
        &self,
        base_object: &Address,
        extension_type: ExtensionType,
    ) -> PlatformResult<Address> {
        let category = self.category_of(base_object)?;
        self.factory_for(category)?
            .predict_extension_address(&self.registry, base_object, extension_type)
    }

    pub fn deactivate_extension(
        &mut self,
        caller: &Address,
        base_object: &Address,
        extension_type: ExtensionType,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let category = self.category_of(base_object)?;
        let factory = self
            .factories
            .get(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))?;
        let env = DeployEnv {
            store: &mut self.store,
            registry: &mut self.registry,
            events: &mut self.events,
            now,
        };
        factory.deactivate_extension(env, caller, base_object, extension_type)
    }

    /// Direct beacon retarget through a factory, bypassing the governor
    pub fn upgrade_beacon(
        &mut self,
        caller: &Address,
        category: BaseCategory,
        extension_type: ExtensionType,
        new_implementation: &Address,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let factory = self
            .factories
            .get(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))?;
        factory.upgrade_beacon(
            caller,
            &mut self.store,
            &mut self.events,
            extension_type,
            new_implementation,
            now,
        )
    }

    /// Move a factory-owned beacon under the governor
    pub fn hand_over_beacon_to_governor(
        &mut self,
        caller: &Address,
        category: BaseCategory,
        extension_type: ExtensionType,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let governor = self.governor.address().clone();
        let factory = self
            .factories
            .get(&category)
            .ok_or_else(|| PlatformError::InvalidParams(format!("no factory configured for {}", category)))?;
        factory.hand_over_beacon(
            caller,
            &mut self.store,
            &mut self.events,
            extension_type,
            &governor,
            now,
        )
    }

    /// Forward a call to an instance or base object
    pub fn call(&mut self, caller: &Address, address: &Address, input: &[u8]) -> PlatformResult<Vec<u8>> {
        let now = self.now();
        self.store.call(caller, address, input, now)
    }

    // ===== Upgrade authority =====
    //
    // Entrypoints for whoever holds the upgrade rights of a beacon or base
    // object directly. Rights held by the governor only move through an
    // `UpgradeTarget::Authority` proposal.

    /// Retarget a beacon as its authority, returns the previous implementation
    pub fn retarget_beacon(
        &mut self,
        caller: &Address,
        beacon: &Address,
        new_implementation: &Address,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let old = self.store.retarget_beacon(caller, beacon, new_implementation, now)?;
        let version = self.store.beacon(beacon).map(|b| b.version()).unwrap_or_default();
        self.events.emit(
            now,
            PlatformEvent::BeaconRetargeted {
                beacon: beacon.clone(),
                old_implementation: old.clone(),
                new_implementation: new_implementation.clone(),
                version,
            },
        );
        Ok(old)
    }

    /// Swap a base object's implementation as its upgrade authority
    pub fn upgrade_base_object(
        &mut self,
        caller: &Address,
        base_object: &Address,
        new_implementation: &Address,
        call_data: &[u8],
    ) -> PlatformResult<Address> {
        let now = self.now();
        let old = self
            .store
            .authorize_upgrade(caller, base_object, new_implementation, call_data, now)?;
        self.events.emit(
            now,
            PlatformEvent::BaseObjectUpgraded {
                base_object: base_object.clone(),
                old_implementation: old.clone(),
                new_implementation: new_implementation.clone(),
            },
        );
        Ok(old)
    }

    /// Hand the upgrade rights of a beacon or base object to `new_authority`
    pub fn transfer_upgrade_authority(
        &mut self,
        caller: &Address,
        target: &Address,
        new_authority: &Address,
    ) -> PlatformResult<Address> {
        let now = self.now();
        let transfer = UpgradeTarget::Authority(target.clone());
        let old = self.store.apply_upgrade(caller, &transfer, new_authority, &[], now)?;
        let event = self.authority_event(target, old.clone(), new_authority.clone());
        self.events.emit(now, event);
        Ok(old)
    }

    fn authority_event(&self, target: &Address, old_authority: Address, new_authority: Address) -> PlatformEvent {
        if self.store.beacon(target).is_some() {
            PlatformEvent::BeaconAuthorityTransferred {
                beacon: target.clone(),
                old_authority,
                new_authority,
            }
        } else {
            PlatformEvent::UpgradeAuthorityTransferred {
                base_object: target.clone(),
                old_authority,
                new_authority,
            }
        }
    }

    // ===== Registry =====

    pub fn lookup(&self, base_object: &Address, extension_type: ExtensionType) -> Option<&Address> {
        self.registry.lookup(base_object, extension_type)
    }

    pub fn list_active(&self, base_object: &Address) -> Vec<(ExtensionType, Address)> {
        self.registry.list_active(base_object)
    }

    pub fn history(&self, base_object: &Address) -> Vec<&RegistryEntry> {
        self.registry.history(base_object)
    }

    pub fn grant_registrar(&mut self, caller: &Address, account: &Address) -> PlatformResult<bool> {
        let granted = self.registry.grant(caller, Capability::Registrar, account)?;
        if granted {
            let component = self.registry.address().clone();
            self.emit_capability(component, Capability::Registrar, account, true);
        }
        Ok(granted)
    }

    pub fn revoke_registrar(&mut self, caller: &Address, account: &Address) -> PlatformResult<bool> {
        let revoked = self.registry.revoke(caller, Capability::Registrar, account)?;
        if revoked {
            let component = self.registry.address().clone();
            self.emit_capability(component, Capability::Registrar, account, false);
        }
        Ok(revoked)
    }

    // ===== Governance =====

    pub fn grant_upgrader(&mut self, caller: &Address, account: &Address) -> PlatformResult<bool> {
        let granted = self.governor.grant(caller, Capability::Upgrader, account)?;
        if granted {
            let component = self.governor.address().clone();
            self.emit_capability(component, Capability::Upgrader, account, true);
        }
        Ok(granted)
    }

    pub fn revoke_upgrader(&mut self, caller: &Address, account: &Address) -> PlatformResult<bool> {
        let revoked = self.governor.revoke(caller, Capability::Upgrader, account)?;
        if revoked {
            let component = self.governor.address().clone();
            self.emit_capability(component, Capability::Upgrader, account, false);
        }
        Ok(revoked)
    }

    fn emit_capability(&mut self, component: Address, capability: Capability, account: &Address, granted: bool) {
        let now = self.now();
        let account = account.clone();
        let event = if granted {
            PlatformEvent::CapabilityGranted {
                component,
                capability,
                account,
            }
        } else {
            PlatformEvent::CapabilityRevoked {
                component,
                capability,
                account,
            }
        };
        self.events.emit(now, event);
    }

    pub fn set_required_approvals(&mut self, caller: &Address, required: u32) -> PlatformResult<u32> {
        let previous = self.governor.set_required_approvals(caller, required)?;
        let now = self.now();
        self.events
            .emit(now, PlatformEvent::QuorumUpdated { previous, required });
        Ok(previous)
    }

    // The target must be something the governor can actually upgrade
    fn check_upgrade_target(&self, target: &UpgradeTarget, new_implementation: &Address) -> PlatformResult<()> {
        let governor = self.governor.address();
        let governed = match target {
            UpgradeTarget::Beacon(beacon) => self
                .store
                .beacon(beacon)
                .is_some_and(|cell| cell.authority() == governor),
            UpgradeTarget::BaseObject(base_object) => self
                .store
                .base_object(base_object)
                .is_some_and(|info| info.upgrade_authority == *governor),
            UpgradeTarget::Authority(address) => self.store.upgrade_authority_of(address) == Some(governor),
        };
        if !governed {
            return Err(PlatformError::InvalidTarget(target.address().clone()));
        }

        if let UpgradeTarget::Authority(_) = target {
            if new_implementation.is_zero() {
                return Err(PlatformError::ZeroAddress("authority"));
            }
            if new_implementation == governor {
                return Err(PlatformError::InvalidParams(
                    "upgrade rights already belong to the governor".to_string(),
                ));
            }
        } else if !self.store.has_code(new_implementation) {
            return Err(PlatformError::InvalidImplementation(new_implementation.clone()));
        }
        Ok(())
    }

    // Beacon whose pending marker tracks proposals on `target`
    fn marked_beacon(&self, target: &UpgradeTarget) -> Option<Address> {
        match target {
            UpgradeTarget::Beacon(beacon) => Some(beacon.clone()),
            UpgradeTarget::Authority(address) if self.store.beacon(address).is_some() => Some(address.clone()),
            UpgradeTarget::Authority(_) | UpgradeTarget::BaseObject(_) => None,
        }
    }

    pub fn propose(
        &mut self,
        caller: &Address,
        target: UpgradeTarget,
        new_implementation: &Address,
        call_data: Vec<u8>,
        description: String,
    ) -> PlatformResult<ProposalId> {
        let now = self.now();
        // Capability first, so outsiders learn nothing about targets
        self.governor.access().require(Capability::Upgrader, caller)?;
        self.check_upgrade_target(&target, new_implementation)?;

        let id = self.governor.propose(
            caller,
            target.clone(),
            new_implementation.clone(),
            call_data,
            description,
            now,
        )?;
        if let Some(beacon) = self.marked_beacon(&target) {
            self.store.mark_beacon_pending(&beacon, id)?;
        }

        self.events.emit(
            now,
            PlatformEvent::ProposalCreated {
                proposal: id,
                proposer: caller.clone(),
                target,
                new_implementation: new_implementation.clone(),
            },
        );
        Ok(id)
    }

    pub fn approve(&mut self, caller: &Address, id: ProposalId) -> PlatformResult<usize> {
        let now = self.now();
        let approvals = self.governor.approve(caller, id)?;
        self.events.emit(
            now,
            PlatformEvent::ProposalApproved {
                proposal: id,
                approver: caller.clone(),
                approvals,
            },
        );
        Ok(approvals)
    }

    /// Execute a ready proposal, returns the replaced implementation
    pub fn execute(&mut self, caller: &Address, id: ProposalId) -> PlatformResult<Address> {
        let now = self.now();
        let old = self.governor.execute(caller, id, now, &mut self.store)?;

        let Some(proposal) = self.governor.proposal(id) else {
            return Err(PlatformError::ProposalNotFound(id));
        };
        let target = proposal.target.clone();
        let new_implementation = proposal.new_implementation.clone();
        if let Some(beacon) = self.marked_beacon(&target) {
            self.store.clear_beacon_pending(&beacon, &id);
        }

        self.events.emit(
            now,
            PlatformEvent::ProposalExecuted {
                proposal: id,
                executor: caller.clone(),
            },
        );
        let upgrade = match target {
            UpgradeTarget::Beacon(beacon) => {
                let version = self.store.beacon(&beacon).map(|b| b.version()).unwrap_or_default();
                PlatformEvent::BeaconRetargeted {
                    beacon,
                    old_implementation: old.clone(),
                    new_implementation,
                    version,
                }
            }
            UpgradeTarget::BaseObject(base_object) => PlatformEvent::BaseObjectUpgraded {
                base_object,
                old_implementation: old.clone(),
                new_implementation,
            },
            UpgradeTarget::Authority(address) => self.authority_event(&address, old.clone(), new_implementation),
        };
        self.events.emit(now, upgrade);
        Ok(old)
    }

    pub fn cancel(&mut self, caller: &Address, id: ProposalId) -> PlatformResult<()> {
        let now = self.now();
        self.governor.cancel(caller, id, now)?;

        if let Some(target) = self.governor.proposal(id).map(|p| p.target.clone()) {
            if let Some(beacon) = self.marked_beacon(&target) {
                self.store.clear_beacon_pending(&beacon, &id);
            }
        }

        self.events.emit(
            now,
            PlatformEvent::ProposalCancelled {
                proposal: id,
                canceller: caller.clone(),
            },
        );
        Ok(())
    }

    pub fn can_execute(&self, id: ProposalId) -> (bool, String) {
        self.governor.can_execute(id, self.now())
    }
}
