//! Extension Factories
//!
//! One factory per base category. It owns the shared beacon of every
//! extension type the category offers and turns a typed
//! [`ExtensionParams`] into a registered, attached extension instance.
//!
//! Deployment is register-or-nothing: every check that could reject the
//! registration runs before the instance is created.

use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use tokenforge_common::{
    config::{SALT_DOMAIN_BASE_OBJECT, SALT_DOMAIN_BEACON, SALT_DOMAIN_EXTENSION},
    crypto::{derive_salt, Address, Hash},
    time::TimestampSeconds,
};

use crate::{
    access::{AccessControl, Capability},
    catalog::{BaseCategory, ExtensionParams, ExtensionType},
    deployment::{base_object_proxy_identity, beacon_proxy_identity, BaseObjectSpec, ObjectStore},
    error::{PlatformError, PlatformResult},
    events::{EventLog, PlatformEvent},
    policy::{self, ActionDescriptor, PolicyEngine},
    registry::ExtensionRegistry,
};

/// Who may retarget the beacons of a factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetargetMode {
    /// Beacons are owned by the upgrade governor
    #[default]
    Governed,
    /// Beacons are owned by the factory and its admin may retarget them at will
    Direct,
}

/// Mutable state a deployment touches, borrowed from the platform for one step
pub struct DeployEnv<'a> {
    pub store: &'a mut ObjectStore,
    pub registry: &'a mut ExtensionRegistry,
    pub events: &'a mut EventLog,
    pub now: TimestampSeconds,
}

pub struct ExtensionFactory {
    address: Address,
    category: BaseCategory,
    access: AccessControl,
    governor: Address,
    beacons: IndexMap<ExtensionType, Address>,
    policy: Option<Arc<dyn PolicyEngine>>,
    retarget_mode: RetargetMode,
}

impl ExtensionFactory {
    pub fn new(
        address: Address,
        category: BaseCategory,
        admin: Address,
        governor: Address,
        retarget_mode: RetargetMode,
    ) -> Self {
        if retarget_mode == RetargetMode::Direct {
            warn!(
                "{} factory {} allows direct beacon retargeting, upgrades bypass the governor",
                category,
                address.short()
            );
        }

        Self {
            address,
            category,
            access: AccessControl::new(admin),
            governor,
            beacons: IndexMap::new(),
            policy: None,
            retarget_mode,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn category(&self) -> BaseCategory {
        self.category
    }

    pub fn retarget_mode(&self) -> RetargetMode {
        self.retarget_mode
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn beacon(&self, extension_type: ExtensionType) -> Option<&Address> {
        self.beacons.get(&extension_type)
    }

    /// Installed beacons in installation order
    pub fn beacons(&self) -> impl Iterator<Item = (&ExtensionType, &Address)> {
        self.beacons.iter()
    }

    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    /// Authority given to the beacons this factory installs
    pub fn beacon_authority(&self) -> &Address {
        match self.retarget_mode {
            RetargetMode::Governed => &self.governor,
            RetargetMode::Direct => &self.address,
        }
    }

    pub fn grant(
        &mut self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> PlatformResult<bool> {
        self.access.grant(caller, capability, account)
    }

    pub fn revoke(
        &mut self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> PlatformResult<bool> {
        self.access.revoke(caller, capability, account)
    }

    /// Install or remove the policy engine consulted before each deployment
    pub fn set_policy(
        &mut self,
        caller: &Address,
        policy: Option<Arc<dyn PolicyEngine>>,
    ) -> PlatformResult<()> {
        self.access.require(Capability::Admin, caller)?;
        self.policy = policy;
        Ok(())
    }

    fn beacon_salt(&self, extension_type: ExtensionType) -> Hash {
        derive_salt(
            SALT_DOMAIN_BEACON,
            &[&[self.category.tag()], &[extension_type.tag()]],
        )
    }

    /// Deploy the shared beacon of an extension type
    pub fn install_beacon(
        &mut self,
        caller: &Address,
        store: &mut ObjectStore,
        events: &mut EventLog,
        extension_type: ExtensionType,
        implementation: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        self.access.require(Capability::Admin, caller)?;
        if !self.category.supports(extension_type) {
            return Err(PlatformError::InvalidParams(format!(
                "{} extensions are not offered for {} base objects",
                extension_type, self.category
            )));
        }
        if let Some(beacon) = self.beacons.get(&extension_type) {
            return Err(PlatformError::BeaconAlreadyInstalled {
                extension_type,
                beacon: beacon.clone(),
            });
        }

        let authority = self.beacon_authority().clone();
        let salt = self.beacon_salt(extension_type);
        let beacon = store.deploy_beacon(&self.address, &salt, implementation, &authority, now)?;
        self.beacons.insert(extension_type, beacon.clone());

        events.emit(
            now,
            PlatformEvent::BeaconInstalled {
                factory: self.address.clone(),
                extension_type,
                beacon: beacon.clone(),
                implementation: implementation.clone(),
                authority,
            },
        );
        Ok(beacon)
    }

    fn base_object_salt(controller: &Address, salt: &Hash) -> Hash {
        derive_salt(SALT_DOMAIN_BASE_OBJECT, &[controller.as_bytes(), salt.as_bytes()])
    }

    /// Address `deploy_base_object` would use for this controller and salt
    pub fn predict_base_object_address(
        &self,
        controller: &Address,
        implementation: &Address,
        salt: &Hash,
    ) -> Address {
        ObjectStore::predict_address(
            &self.address,
            &Self::base_object_salt(controller, salt),
            &base_object_proxy_identity(implementation),
        )
    }

    /// Deploy a base object of this factory's category, controlled by the caller
    ///
    /// Its upgrade authority is always the governor, whatever the retarget mode.
    pub fn deploy_base_object(
        &self,
        env: DeployEnv<'_>,
        caller: &Address,
        implementation: &Address,
        salt: &Hash,
        init_args: &[u8],
    ) -> PlatformResult<Address> {
        env.registry
            .access()
            .require(Capability::Registrar, &self.address)?;

        let predicted = self.predict_base_object_address(caller, implementation, salt);
        if env.registry.category_of(&predicted).is_some() {
            return Err(PlatformError::DeploymentFailed {
                address: predicted,
                reason: "address already enrolled".to_string(),
            });
        }

        let spec = BaseObjectSpec {
            implementation: implementation.clone(),
            controller: caller.clone(),
            category: self.category,
            upgrade_authority: self.governor.clone(),
        };
        let base_object = env.store.deploy_base_object(
            &self.address,
            &Self::base_object_salt(caller, salt),
            spec,
            init_args,
            env.now,
        )?;
        env.registry
            .enroll_base_object(&self.address, &base_object, self.category)?;

        env.events.emit(
            env.now,
            PlatformEvent::BaseObjectDeployed {
                base_object: base_object.clone(),
                category: self.category,
                implementation: implementation.clone(),
                controller: caller.clone(),
            },
        );
        Ok(base_object)
    }

    fn extension_salt(
        base_object: &Address,
        extension_type: ExtensionType,
        generation: u64,
    ) -> Hash {
        derive_salt(
            SALT_DOMAIN_EXTENSION,
            &[
                base_object.as_bytes(),
                &[extension_type.tag()],
                &generation.to_le_bytes(),
            ],
        )
    }

    /// Address the next deployment into this slot would occupy
    pub fn predict_extension_address(
        &self,
        registry: &ExtensionRegistry,
        base_object: &Address,
        extension_type: ExtensionType,
    ) -> PlatformResult<Address> {
        let beacon = self
            .beacons
            .get(&extension_type)
            .ok_or(PlatformError::BeaconNotInstalled(extension_type))?;
        let generation = registry.generation(base_object, extension_type);

        Ok(ObjectStore::predict_address(
            &self.address,
            &Self::extension_salt(base_object, extension_type, generation),
            &beacon_proxy_identity(beacon),
        ))
    }

    /// Deploy, register and attach an extension for a base object
    pub fn deploy_extension(
        &self,
        env: DeployEnv<'_>,
        caller: &Address,
        base_object: &Address,
        params: &ExtensionParams,
    ) -> PlatformResult<Address> {
        let extension_type = params.extension_type();

        // Caller must control a base object of our category
        if base_object.is_zero() {
            return Err(PlatformError::ZeroAddress("base object"));
        }
        let info = env
            .store
            .base_object(base_object)
            .ok_or_else(|| PlatformError::UnknownBaseObject(base_object.clone()))?;
        if info.controller != *caller {
            return Err(PlatformError::NotController {
                caller: caller.clone(),
                base_object: base_object.clone(),
            });
        }
        if info.category != self.category {
            return Err(PlatformError::CategoryMismatch {
                base_object: base_object.clone(),
                expected: self.category,
                actual: info.category,
            });
        }
        params.validate()?;

        let action = ActionDescriptor {
            actor: caller,
            base_object,
            extension_type,
            params,
        };
        policy::enforce(self.policy.as_deref(), &action)?;

        // Everything that could make the registration fail is checked up front
        env.registry
            .access()
            .require(Capability::Registrar, &self.address)?;
        env.registry.check_slot(base_object, extension_type)?;
        let beacon = self
            .beacons
            .get(&extension_type)
            .ok_or(PlatformError::BeaconNotInstalled(extension_type))?;

        let init_args = params.encode()?;
        let generation = env.registry.generation(base_object, extension_type);
        let salt = Self::extension_salt(base_object, extension_type, generation);
        let instance = env
            .store
            .deploy_via_beacon(&self.address, beacon, &salt, &init_args, env.now)?;

        if let Err(e) = env
            .registry
            .register(&self.address, base_object, extension_type, &instance, env.now)
        {
            warn!(
                "Registration of {} for {} failed after deployment: {}",
                instance.short(),
                base_object.short(),
                e
            );
            if let Err(inner) = env.store.set_active(&instance, false) {
                error!("Could not deactivate orphan instance {}: {}", instance.short(), inner);
            }
            return Err(e);
        }
        env.store
            .attach_extension(base_object, extension_type, &instance)?;

        info!(
            "{} extension {} deployed for {} by {}",
            extension_type,
            instance.short(),
            base_object.short(),
            caller.short()
        );
        env.events.emit(
            env.now,
            PlatformEvent::ExtensionDeployed {
                base_object: base_object.clone(),
                extension_type,
                instance: instance.clone(),
                deployer: caller.clone(),
                beacon: beacon.clone(),
            },
        );
        Ok(instance)
    }

    /// Detach the active extension of a slot
    ///
    /// Allowed for the base object controller and the factory admins.
    pub fn deactivate_extension(
        &self,
        env: DeployEnv<'_>,
        caller: &Address,
        base_object: &Address,
        extension_type: ExtensionType,
    ) -> PlatformResult<Address> {
        let info = env
            .store
            .base_object(base_object)
            .ok_or_else(|| PlatformError::UnknownBaseObject(base_object.clone()))?;
        if info.controller != *caller && !self.access.has(Capability::Admin, caller) {
            return Err(PlatformError::NotController {
                caller: caller.clone(),
                base_object: base_object.clone(),
            });
        }
        if info.category != self.category {
            return Err(PlatformError::CategoryMismatch {
                base_object: base_object.clone(),
                expected: self.category,
                actual: info.category,
            });
        }

        let instance = env
            .registry
            .deactivate(&self.address, base_object, extension_type, env.now)?;
        env.store.set_active(&instance, false)?;
        env.store.detach_extension(base_object, extension_type)?;

        env.events.emit(
            env.now,
            PlatformEvent::ExtensionDeactivated {
                base_object: base_object.clone(),
                extension_type,
                instance: instance.clone(),
                caller: caller.clone(),
            },
        );
        Ok(instance)
    }

    /// Retarget a beacon without the governor
    ///
    /// Only available to `Direct` factories.
    pub fn upgrade_beacon(
        &self,
        caller: &Address,
        store: &mut ObjectStore,
        events: &mut EventLog,
        extension_type: ExtensionType,
        new_implementation: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        self.access.require(Capability::Admin, caller)?;
        if self.retarget_mode != RetargetMode::Direct {
            return Err(PlatformError::DirectRetargetDisabled(self.address.clone()));
        }
        let beacon = self
            .beacons
            .get(&extension_type)
            .ok_or(PlatformError::BeaconNotInstalled(extension_type))?;

        warn!(
            "Direct retarget of {} beacon {} by {}, bypassing the governor",
            extension_type,
            beacon.short(),
            caller.short()
        );
        let old = store.retarget_beacon(&self.address, beacon, new_implementation, now)?;
        let version = store.beacon(beacon).map(|b| b.version()).unwrap_or_default();

        events.emit(
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

    /// Hand a factory-owned beacon over to another authority
    ///
    /// This is how a `Direct` factory's beacons are moved under governance.
    pub fn hand_over_beacon(
        &self,
        caller: &Address,
        store: &mut ObjectStore,
        events: &mut EventLog,
        extension_type: ExtensionType,
        new_authority: &Address,
        now: TimestampSeconds,
    ) -> PlatformResult<Address> {
        self.access.require(Capability::Admin, caller)?;
        let beacon = self
            .beacons
            .get(&extension_type)
            .ok_or(PlatformError::BeaconNotInstalled(extension_type))?;

        let old = store.transfer_beacon_authority(&self.address, beacon, new_authority)?;
        debug!("Beacon {} handed over to {}", beacon.short(), new_authority.short());

        events.emit(
            now,
            PlatformEvent::BeaconAuthorityTransferred {
                beacon: beacon.clone(),
                old_authority: old.clone(),
                new_authority: new_authority.clone(),
            },
        );
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        deployment::{CallContext, CallHandler, Code},
        policy::PolicyVerdict,
    };

    struct Noop;

    impl CallHandler for Noop {
        fn call(&self, _ctx: &mut CallContext<'_>, _input: &[u8]) -> PlatformResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct DenyAll;

    impl PolicyEngine for DenyAll {
        fn evaluate(&self, _action: &ActionDescriptor<'_>) -> PolicyVerdict {
            PolicyVerdict::deny("closed for maintenance")
        }
    }

    const ADMIN: u8 = 1;
    const CONTROLLER: u8 = 2;
    const GOVERNOR: u8 = 0xF0;

    fn addr(byte: u8) -> Address {
        Hash::new([byte; 32])
    }

    struct Fixture {
        store: ObjectStore,
        registry: ExtensionRegistry,
        events: EventLog,
        factory: ExtensionFactory,
        base: Address,
        implementation: Address,
    }

    impl Fixture {
        fn new(mode: RetargetMode) -> Self {
            let mut store = ObjectStore::new();
            let mut registry = ExtensionRegistry::new(addr(0xEE), addr(ADMIN));
            let mut events = EventLog::new();
            let mut factory =
                ExtensionFactory::new(addr(0xFA), BaseCategory::Fungible, addr(ADMIN), addr(GOVERNOR), mode);
            registry
                .grant(&addr(ADMIN), Capability::Registrar, factory.address())
                .unwrap();

            let implementation = store
                .deploy_at(&addr(ADMIN), &Hash::zero(), Code::new(b"ext-v1".to_vec(), Arc::new(Noop)), 0)
                .unwrap();
            let token = store
                .deploy_at(&addr(ADMIN), &Hash::zero(), Code::new(b"erc20".to_vec(), Arc::new(Noop)), 0)
                .unwrap();
            for extension_type in [ExtensionType::Compliance, ExtensionType::Vesting] {
                factory
                    .install_beacon(&addr(ADMIN), &mut store, &mut events, extension_type, &implementation, 0)
                    .unwrap();
            }

            let base = factory
                .deploy_base_object(
                    DeployEnv {
                        store: &mut store,
                        registry: &mut registry,
                        events: &mut events,
                        now: 0,
                    },
                    &addr(CONTROLLER),
                    &token,
                    &Hash::zero(),
                    &[],
                )
                .unwrap();

            Self {
                store,
                registry,
                events,
                factory,
                base,
                implementation,
            }
        }

        fn deploy(&mut self, caller: u8, params: &ExtensionParams) -> PlatformResult<Address> {
            let base = self.base.clone();
            let env = DeployEnv {
                store: &mut self.store,
                registry: &mut self.registry,
                events: &mut self.events,
                now: 10,
            };
            self.factory.deploy_extension(env, &addr(caller), &base, params)
        }
    }

    fn compliance() -> ExtensionParams {
        ExtensionParams::Compliance {
            rule_set: Hash::new([7; 32]),
        }
    }

    #[test]
    fn test_deploy_registers_and_attaches() {
        let mut fixture = Fixture::new(RetargetMode::Governed);
        let predicted = fixture
            .factory
            .predict_extension_address(&fixture.registry, &fixture.base, ExtensionType::Compliance)
            .unwrap();

        let instance = fixture.deploy(CONTROLLER, &compliance()).unwrap();
        assert_eq!(instance, predicted);
        assert_eq!(
            fixture.registry.lookup(&fixture.base, ExtensionType::Compliance),
            Some(&instance)
        );
        assert_eq!(
            fixture.store.base_object(&fixture.base).unwrap().extensions.get(&ExtensionType::Compliance),
            Some(&instance)
        );
        assert!(matches!(
            fixture.events.last().map(|record| &record.event),
            Some(PlatformEvent::ExtensionDeployed { .. })
        ));
    }

    #[test]
    fn test_only_controller_deploys() {
        let mut fixture = Fixture::new(RetargetMode::Governed);
        let objects = fixture.store.len();
        assert!(matches!(
            fixture.deploy(ADMIN, &compliance()),
            Err(PlatformError::NotController { .. })
        ));
        assert_eq!(fixture.store.len(), objects);
    }

    #[test]
    fn test_missing_beacon_and_incompatible_type() {
        let mut fixture = Fixture::new(RetargetMode::Governed);
        let fees = ExtensionParams::Fees {
            collector: addr(9),
            basis_points: 30,
        };
        assert_eq!(
            fixture.deploy(CONTROLLER, &fees).unwrap_err(),
            PlatformError::BeaconNotInstalled(ExtensionType::Fees)
        );

        let royalty = ExtensionParams::Royalty {
            receiver: addr(9),
            basis_points: 500,
        };
        assert!(matches!(
            fixture.deploy(CONTROLLER, &royalty),
            Err(PlatformError::TypeIncompatible { .. })
        ));
    }

    #[test]
    fn test_policy_denial_deploys_nothing() {
        let mut fixture = Fixture::new(RetargetMode::Governed);
        fixture
            .factory
            .set_policy(&addr(ADMIN), Some(Arc::new(DenyAll)))
            .unwrap();

        let objects = fixture.store.len();
        assert_eq!(
            fixture.deploy(CONTROLLER, &compliance()).unwrap_err(),
            PlatformError::PolicyDenied("closed for maintenance".to_string())
        );
        assert_eq!(fixture.store.len(), objects);
        assert!(fixture.registry.entries().is_empty());
    }

    #[test]
    fn test_deactivate_then_redeploy_uses_fresh_address() {
        let mut fixture = Fixture::new(RetargetMode::Governed);
        let first = fixture.deploy(CONTROLLER, &compliance()).unwrap();

        let base = fixture.base.clone();
        let env = DeployEnv {
            store: &mut fixture.store,
            registry: &mut fixture.registry,
            events: &mut fixture.events,
            now: 11,
        };
        // Factory admins may deactivate as well as the controller
        let removed = fixture
            .factory
            .deactivate_extension(env, &addr(ADMIN), &base, ExtensionType::Compliance)
            .unwrap();
        assert_eq!(removed, first);
        assert!(fixture
            .store
            .base_object(&base)
            .unwrap()
            .extensions
            .get(&ExtensionType::Compliance)
            .is_none());
        assert!(!fixture.store.instance(&first).unwrap().active);

        let second = fixture.deploy(CONTROLLER, &compliance()).unwrap();
        assert_ne!(first, second);
        assert_eq!(fixture.registry.lookup(&base, ExtensionType::Compliance), Some(&second));
    }

    #[test]
    fn test_governed_factory_rejects_direct_retarget() {
        let mut fixture = Fixture::new(RetargetMode::Governed);
        let err = fixture
            .factory
            .upgrade_beacon(
                &addr(ADMIN),
                &mut fixture.store,
                &mut fixture.events,
                ExtensionType::Compliance,
                &fixture.implementation,
                20,
            )
            .unwrap_err();
        assert_eq!(err, PlatformError::DirectRetargetDisabled(addr(0xFA)));

        let beacon = fixture.factory.beacon(ExtensionType::Compliance).unwrap();
        assert_eq!(fixture.store.beacon(beacon).unwrap().authority(), &addr(GOVERNOR));
    }

    #[test]
    fn test_direct_factory_retargets_and_hands_over() {
        let mut fixture = Fixture::new(RetargetMode::Direct);
        let v2 = fixture
            .store
            .deploy_at(&addr(ADMIN), &Hash::zero(), Code::new(b"ext-v2".to_vec(), Arc::new(Noop)), 0)
            .unwrap();

        assert!(matches!(
            fixture.factory.upgrade_beacon(
                &addr(CONTROLLER),
                &mut fixture.store,
                &mut fixture.events,
                ExtensionType::Vesting,
                &v2,
                20
            ),
            Err(PlatformError::NotAuthorized { .. })
        ));

        let old = fixture
            .factory
            .upgrade_beacon(&addr(ADMIN), &mut fixture.store, &mut fixture.events, ExtensionType::Vesting, &v2, 20)
            .unwrap();
        assert_eq!(old, fixture.implementation);

        fixture
            .factory
            .hand_over_beacon(
                &addr(ADMIN),
                &mut fixture.store,
                &mut fixture.events,
                ExtensionType::Vesting,
                &addr(GOVERNOR),
                21,
            )
            .unwrap();
        // The factory no longer owns the beacon
        assert!(matches!(
            fixture.factory.upgrade_beacon(
                &addr(ADMIN),
                &mut fixture.store,
                &mut fixture.events,
                ExtensionType::Vesting,
                &v2,
                22
            ),
            Err(PlatformError::Unauthorized { .. })
        ));
    }
}
