// Common fixtures for platform integration tests
//
// Builds a platform on a manual clock so tests can warp past the timelock,
// plus a versioned implementation whose answers reveal which code ran.

#![allow(dead_code)]

use std::sync::Arc;

use tokenforge_common::{
    config::SECONDS_PER_DAY,
    crypto::{Address, Hash},
    time::{Clock, ManualClock},
};
use tokenforge_platform::{
    config::PlatformConfig,
    deployment::{CallContext, CallHandler, Code},
    BaseCategory, ExtensionParams, Platform, PlatformError, PlatformResult, SharedPlatform,
};

pub const ADMIN: u8 = 0x01;
pub const CONTROLLER: u8 = 0x02;
pub const OUTSIDER: u8 = 0x03;
pub const UPGRADERS: [u8; 3] = [0x10, 0x11, 0x12];

pub const START_TIME: u64 = 1_700_000_000;
pub const TIMELOCK: u64 = 2 * SECONDS_PER_DAY;

pub const VERSION_CALL: &[u8] = b"version";
pub const INIT_CALL: &[u8] = b"init-args";
pub const BUMP_CALL: &[u8] = b"bump";
pub const FAIL_CALL: &[u8] = b"fail";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn account(byte: u8) -> Address {
    Hash::new([byte; 32])
}

/// Implementation answering with its version
///
/// - `version` returns `[version]`
/// - `init-args` returns what the initializer stored
/// - `bump` increments a counter kept in instance storage and returns it
/// - `fail` always fails
pub struct VersionedLogic {
    pub version: u8,
}

impl CallHandler for VersionedLogic {
    fn initialize(&self, ctx: &mut CallContext<'_>, init_args: &[u8]) -> PlatformResult<()> {
        ctx.storage.insert(INIT_CALL.to_vec(), init_args.to_vec());
        Ok(())
    }

    fn call(&self, ctx: &mut CallContext<'_>, input: &[u8]) -> PlatformResult<Vec<u8>> {
        if input == VERSION_CALL {
            Ok(vec![self.version])
        } else if input == INIT_CALL {
            Ok(ctx.storage.get(INIT_CALL).cloned().unwrap_or_default())
        } else if input == BUMP_CALL {
            let current = ctx
                .storage
                .get(BUMP_CALL)
                .and_then(|value| value.first().copied())
                .unwrap_or(0);
            let next = current.wrapping_add(1);
            ctx.storage.insert(BUMP_CALL.to_vec(), vec![next]);
            Ok(vec![next])
        } else if input == FAIL_CALL {
            Err(PlatformError::CallFailed(format!("v{} refused", self.version)))
        } else {
            Err(PlatformError::CallFailed(format!("unknown call {}", hex::encode(input))))
        }
    }
}

pub fn versioned_code(tag: &str, version: u8) -> Code {
    Code::new(
        format!("{}-v{}", tag, version).into_bytes(),
        Arc::new(VersionedLogic { version }),
    )
}

pub struct TestPlatform {
    pub platform: Platform,
    pub clock: ManualClock,
    pub admin: Address,
    next_salt: u8,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self::with_config(PlatformConfig::default())
    }

    pub fn with_config(config: PlatformConfig) -> Self {
        init_logger();
        let clock = ManualClock::new(START_TIME);
        let admin = account(ADMIN);
        let platform = Platform::new(admin.clone(), &config, Arc::new(clock.clone()))
            .expect("platform config should be valid");

        Self {
            platform,
            clock,
            admin,
            next_salt: 0,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn warp(&self, seconds: u64) {
        self.clock.advance(seconds);
    }

    pub fn deploy_impl(&mut self, tag: &str, version: u8) -> Address {
        let admin = self.admin.clone();
        self.platform
            .deploy_code(&admin, &Hash::zero(), versioned_code(tag, version))
            .expect("implementation deploys")
    }

    /// Deploy a base object controlled by `controller`
    pub fn base_object(&mut self, category: BaseCategory, controller: u8) -> Address {
        let implementation = self.token_implementation(category);
        self.next_salt += 1;
        let salt = Hash::new([self.next_salt; 32]);
        self.platform
            .deploy_base_object(&account(controller), category, &implementation, &salt, &[])
            .expect("base object deploys")
    }

    fn token_implementation(&mut self, category: BaseCategory) -> Address {
        let code = versioned_code(&format!("token-{}", category), 1);
        let address = Platform::predict_code_address(&self.admin, &Hash::zero(), &code);
        if self.platform.store().has_code(&address) {
            return address;
        }
        let admin = self.admin.clone();
        self.platform
            .deploy_code(&admin, &Hash::zero(), code)
            .expect("token implementation deploys")
    }

    /// Deploy a v1 implementation and install a beacon for every type of the category
    pub fn install_beacons(&mut self, category: BaseCategory) -> Address {
        let implementation = self.deploy_impl(&format!("ext-{}", category), 1);
        let admin = self.admin.clone();
        for extension_type in category.supported_extensions() {
            self.platform
                .install_beacon(&admin, category, *extension_type, &implementation)
                .expect("beacon installs");
        }
        implementation
    }

    /// Hand the platform over to multiple callers, keeping the clock handle
    pub fn into_shared(self) -> (SharedPlatform, ManualClock) {
        (self.platform.into_shared(), self.clock)
    }

    pub fn grant_upgraders(&mut self) {
        let admin = self.admin.clone();
        for upgrader in UPGRADERS {
            self.platform
                .grant_upgrader(&admin, &account(upgrader))
                .expect("admin grants upgrader");
        }
    }
}

pub fn compliance_params() -> ExtensionParams {
    ExtensionParams::Compliance {
        rule_set: Hash::new([0xC0; 32]),
    }
}

pub fn vesting_params() -> ExtensionParams {
    ExtensionParams::Vesting {
        beneficiary: account(0x40),
        start: START_TIME,
        duration: 365 * SECONDS_PER_DAY,
    }
}
