// Extension deployment through the factories: slot uniqueness, category
// compatibility, policy checks and deterministic addresses.

#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;

use common::*;
use tokenforge_common::crypto::Hash;
use tokenforge_platform::{
    catalog::ExtensionParams,
    config::{FactoryConfig, PlatformConfig},
    events::PlatformEvent,
    factory::RetargetMode,
    policy::{ActionDescriptor, PolicyEngine, PolicyVerdict},
    BaseCategory, Capability, ExtensionType, PlatformError,
};

struct DenyType {
    denied: ExtensionType,
    reason: &'static str,
}

impl PolicyEngine for DenyType {
    fn evaluate(&self, action: &ActionDescriptor<'_>) -> PolicyVerdict {
        if action.extension_type == self.denied {
            PolicyVerdict::deny(self.reason)
        } else {
            PolicyVerdict::allow()
        }
    }
}

fn royalty_params() -> ExtensionParams {
    ExtensionParams::Royalty {
        receiver: account(0x50),
        basis_points: 250,
    }
}

#[test]
fn test_one_active_extension_per_type() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);
    let controller = account(CONTROLLER);

    let compliance = t
        .platform
        .deploy_extension(&controller, &token, &compliance_params())
        .unwrap();
    assert_eq!(
        t.platform.lookup(&token, ExtensionType::Compliance),
        Some(&compliance)
    );

    let err = t
        .platform
        .deploy_extension(&controller, &token, &compliance_params())
        .unwrap_err();
    assert_eq!(
        err,
        PlatformError::DuplicateExtensionType {
            base_object: token.clone(),
            extension_type: ExtensionType::Compliance,
            existing: compliance.clone(),
        }
    );

    let vesting = t
        .platform
        .deploy_extension(&controller, &token, &vesting_params())
        .unwrap();
    assert_ne!(vesting, compliance);

    assert_eq!(
        t.platform.list_active(&token),
        vec![
            (ExtensionType::Compliance, compliance.clone()),
            (ExtensionType::Vesting, vesting.clone())
        ]
    );

    // The base object links its extensions
    let info = t.platform.store().base_object(&token).unwrap();
    assert_eq!(info.extensions.get(&ExtensionType::Compliance), Some(&compliance));
    assert_eq!(info.extensions.get(&ExtensionType::Vesting), Some(&vesting));
    assert_eq!(t.platform.registry().owner_of(&vesting), Some(&token));
}

#[test]
fn test_incompatible_type_leaves_registry_untouched() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);
    let objects = t.platform.store().len();
    let entries = t.platform.registry().entries().len();

    let err = t
        .platform
        .deploy_extension(&account(CONTROLLER), &token, &royalty_params())
        .unwrap_err();
    assert_eq!(
        err,
        PlatformError::TypeIncompatible {
            base_object: token.clone(),
            extension_type: ExtensionType::Royalty,
            category: BaseCategory::Fungible,
        }
    );

    assert_eq!(t.platform.store().len(), objects);
    assert_eq!(t.platform.registry().entries().len(), entries);
    assert!(t.platform.list_active(&token).is_empty());
}

#[test]
fn test_royalty_on_non_fungible() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::NonFungible);
    let collection = t.base_object(BaseCategory::NonFungible, CONTROLLER);

    let royalty = t
        .platform
        .deploy_extension(&account(CONTROLLER), &collection, &royalty_params())
        .unwrap();
    assert_eq!(
        t.platform.lookup(&collection, ExtensionType::Royalty),
        Some(&royalty)
    );
}

#[test]
fn test_predicted_address_matches_deployment() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);

    let predicted = t
        .platform
        .predict_extension_address(&token, ExtensionType::Compliance)
        .unwrap();
    assert!(!t.platform.store().contains(&predicted));

    let deployed = t
        .platform
        .deploy_extension(&account(CONTROLLER), &token, &compliance_params())
        .unwrap();
    assert_eq!(predicted, deployed);
}

#[test]
fn test_only_controller_deploys() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);

    let err = t
        .platform
        .deploy_extension(&account(OUTSIDER), &token, &compliance_params())
        .unwrap_err();
    assert_eq!(
        err,
        PlatformError::NotController {
            caller: account(OUTSIDER),
            base_object: token.clone(),
        }
    );

    let unknown = account(0x66);
    assert_eq!(
        t.platform
            .deploy_extension(&account(CONTROLLER), &unknown, &compliance_params())
            .unwrap_err(),
        PlatformError::UnknownBaseObject(unknown)
    );
}

#[test]
fn test_invalid_params_rejected_before_deployment() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);
    let objects = t.platform.store().len();

    let params = ExtensionParams::Vesting {
        beneficiary: account(0x40),
        start: START_TIME,
        duration: 0,
    };
    assert!(matches!(
        t.platform.deploy_extension(&account(CONTROLLER), &token, &params),
        Err(PlatformError::InvalidParams(_))
    ));
    assert_eq!(t.platform.store().len(), objects);
}

#[test]
fn test_missing_beacon() {
    let mut t = TestPlatform::new();
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);

    assert_eq!(
        t.platform
            .deploy_extension(&account(CONTROLLER), &token, &compliance_params())
            .unwrap_err(),
        PlatformError::BeaconNotInstalled(ExtensionType::Compliance)
    );
}

#[test]
fn test_policy_denial_carries_reason() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);
    let admin = t.admin.clone();

    let policy = Arc::new(DenyType {
        denied: ExtensionType::Vesting,
        reason: "vesting requires a licensed issuer",
    });
    t.platform
        .set_policy(&admin, BaseCategory::Fungible, Some(policy))
        .unwrap();
    assert!(t
        .platform
        .factory(BaseCategory::Fungible)
        .unwrap()
        .has_policy());

    let objects = t.platform.store().len();
    assert_eq!(
        t.platform
            .deploy_extension(&account(CONTROLLER), &token, &vesting_params())
            .unwrap_err(),
        PlatformError::PolicyDenied("vesting requires a licensed issuer".to_string())
    );
    assert_eq!(t.platform.store().len(), objects);
    assert!(t.platform.lookup(&token, ExtensionType::Vesting).is_none());

    // Other types pass the same engine
    assert!(t
        .platform
        .deploy_extension(&account(CONTROLLER), &token, &compliance_params())
        .is_ok());

    // Only admins change the policy
    assert!(t
        .platform
        .set_policy(&account(CONTROLLER), BaseCategory::Fungible, None)
        .is_err());
    t.platform.set_policy(&admin, BaseCategory::Fungible, None).unwrap();
    assert!(t
        .platform
        .deploy_extension(&account(CONTROLLER), &token, &vesting_params())
        .is_ok());
}

#[test]
fn test_redeploy_after_deactivation() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);
    let controller = account(CONTROLLER);

    let first = t
        .platform
        .deploy_extension(&controller, &token, &compliance_params())
        .unwrap();

    // Outsiders cannot detach
    assert!(matches!(
        t.platform
            .deactivate_extension(&account(OUTSIDER), &token, ExtensionType::Compliance),
        Err(PlatformError::NotController { .. })
    ));

    t.warp(60);
    assert_eq!(
        t.platform
            .deactivate_extension(&controller, &token, ExtensionType::Compliance)
            .unwrap(),
        first
    );
    assert!(t.platform.lookup(&token, ExtensionType::Compliance).is_none());
    assert!(matches!(
        t.platform.call(&controller, &first, VERSION_CALL),
        Err(PlatformError::CallFailed(_))
    ));
    assert!(matches!(
        t.platform
            .deactivate_extension(&controller, &token, ExtensionType::Compliance),
        Err(PlatformError::ExtensionNotFound { .. })
    ));

    let second = t
        .platform
        .deploy_extension(&controller, &token, &compliance_params())
        .unwrap();
    assert_ne!(first, second);

    let history = t.platform.history(&token);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].instance, first);
    assert!(!history[0].active);
    assert_eq!(history[0].deactivated_at, Some(START_TIME + 60));
    assert_eq!(history[1].instance, second);
    assert!(history[1].active);
}

#[test]
fn test_instance_receives_init_args() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);

    let params = vesting_params();
    let instance = t
        .platform
        .deploy_extension(&account(CONTROLLER), &token, &params)
        .unwrap();

    let stored = t.platform.call(&account(OUTSIDER), &instance, INIT_CALL).unwrap();
    assert_eq!(ExtensionParams::decode(&stored).unwrap(), params);
    assert_eq!(
        t.platform.call(&account(OUTSIDER), &instance, VERSION_CALL).unwrap(),
        vec![1]
    );
}

#[test]
fn test_deployment_event() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let token = t.base_object(BaseCategory::Fungible, CONTROLLER);
    let beacon = t
        .platform
        .factory(BaseCategory::Fungible)
        .and_then(|factory| factory.beacon(ExtensionType::Compliance))
        .cloned()
        .unwrap();

    let instance = t
        .platform
        .deploy_extension(&account(CONTROLLER), &token, &compliance_params())
        .unwrap();

    let record = t.platform.events().last().unwrap();
    assert_eq!(record.timestamp, START_TIME);
    assert_eq!(
        record.event,
        PlatformEvent::ExtensionDeployed {
            base_object: token,
            extension_type: ExtensionType::Compliance,
            instance,
            deployer: account(CONTROLLER),
            beacon,
        }
    );
}

#[test]
fn test_zero_base_object_rejected() {
    let mut t = TestPlatform::new();
    t.install_beacons(BaseCategory::Fungible);
    let controller = account(CONTROLLER);

    assert_eq!(
        t.platform
            .deploy_extension(&controller, &Hash::zero(), &compliance_params())
            .unwrap_err(),
        PlatformError::ZeroAddress("base object")
    );
    assert_eq!(
        t.platform
            .deactivate_extension(&controller, &Hash::zero(), ExtensionType::Compliance)
            .unwrap_err(),
        PlatformError::ZeroAddress("base object")
    );
    assert_eq!(
        t.platform
            .predict_extension_address(&Hash::zero(), ExtensionType::Compliance)
            .unwrap_err(),
        PlatformError::ZeroAddress("base object")
    );
}

#[test]
fn test_factory_onboarded_at_runtime() {
    let config = PlatformConfig {
        factories: vec![FactoryConfig {
            category: BaseCategory::Fungible,
            retarget_mode: RetargetMode::Governed,
        }],
        ..Default::default()
    };
    let mut t = TestPlatform::with_config(config);
    let admin = t.admin.clone();
    let vault_factory = FactoryConfig {
        category: BaseCategory::Vault,
        retarget_mode: RetargetMode::Governed,
    };
    assert!(t.platform.factory(BaseCategory::Vault).is_none());

    assert!(matches!(
        t.platform.add_factory(&account(OUTSIDER), &vault_factory),
        Err(PlatformError::NotAuthorized {
            capability: Capability::Admin,
            ..
        })
    ));
    let start = t.platform.events().len() as u64;
    let factory = t.platform.add_factory(&admin, &vault_factory).unwrap();
    assert!(t
        .platform
        .registry()
        .access()
        .has(Capability::Registrar, &factory));
    assert_eq!(
        t.platform
            .events()
            .since(start)
            .iter()
            .map(|record| record.event.clone())
            .collect::<Vec<_>>(),
        vec![
            PlatformEvent::FactoryAdded {
                factory: factory.clone(),
                category: BaseCategory::Vault,
            },
            PlatformEvent::CapabilityGranted {
                component: t.platform.registry().address().clone(),
                capability: Capability::Registrar,
                account: factory.clone(),
            },
        ]
    );
    assert!(matches!(
        t.platform.add_factory(&admin, &vault_factory),
        Err(PlatformError::InvalidParams(_))
    ));

    // The new factory deploys and registers like the configured ones
    t.install_beacons(BaseCategory::Vault);
    let vault = t.base_object(BaseCategory::Vault, CONTROLLER);
    let fees = ExtensionParams::Fees {
        collector: account(0x41),
        basis_points: 50,
    };
    let instance = t
        .platform
        .deploy_extension(&account(CONTROLLER), &vault, &fees)
        .unwrap();
    assert_eq!(t.platform.lookup(&vault, ExtensionType::Fees), Some(&instance));
    assert_eq!(t.platform.history(&vault)[0].registrant, factory);

    // Registrar rights can be withdrawn and given back
    t.platform
        .deactivate_extension(&account(CONTROLLER), &vault, ExtensionType::Fees)
        .unwrap();
    assert!(t.platform.revoke_registrar(&admin, &factory).unwrap());
    assert_eq!(
        t.platform
            .deploy_extension(&account(CONTROLLER), &vault, &fees)
            .unwrap_err(),
        PlatformError::NotAuthorized {
            caller: factory.clone(),
            capability: Capability::Registrar,
        }
    );
    assert!(t.platform.grant_registrar(&admin, &factory).unwrap());
    assert!(t
        .platform
        .deploy_extension(&account(CONTROLLER), &vault, &fees)
        .is_ok());
}
