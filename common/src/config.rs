use crate::time::TimestampSeconds;

// ===== Time =====

pub const SECONDS_PER_HOUR: TimestampSeconds = 3600;
pub const SECONDS_PER_DAY: TimestampSeconds = 24 * SECONDS_PER_HOUR;

// ===== Governance =====

// Minimum delay between a proposal and its execution
pub const DEFAULT_TIMELOCK_DURATION: TimestampSeconds = 2 * SECONDS_PER_DAY;
// A quorum can never be lowered below a single approval
pub const MIN_REQUIRED_APPROVALS: u32 = 1;
pub const DEFAULT_REQUIRED_APPROVALS: u32 = 2;

// ===== Size limits =====

// Maximum auxiliary call data carried by an upgrade proposal (16 KB)
pub const MAX_CALL_DATA_LENGTH: usize = 16384;
// Maximum proposal description length (1 KB)
pub const MAX_DESCRIPTION_LENGTH: usize = 1024;
// Maximum initialization arguments for a deployed instance (16 KB)
pub const MAX_INIT_ARGS_LENGTH: usize = 16384;
// 100% expressed in basis points
pub const MAX_BASIS_POINTS: u16 = 10_000;

// ===== Deterministic deployment =====

// CREATE2 prefix byte
pub const CREATE2_PREFIX: u8 = 0xff;

// Domain separators for derived salts
pub const SALT_DOMAIN_EXTENSION: &[u8] = b"TOKENFORGE_EXTENSION_SALT";
pub const SALT_DOMAIN_BEACON: &[u8] = b"TOKENFORGE_BEACON_SALT";
pub const SALT_DOMAIN_BASE_OBJECT: &[u8] = b"TOKENFORGE_BASE_OBJECT_SALT";
pub const SALT_DOMAIN_SYSTEM: &[u8] = b"TOKENFORGE_SYSTEM_SALT";

// Built-in code, their identities are the blake3 of these bytes
pub const BEACON_CODE: &[u8] = b"TOKENFORGE_BEACON_V1";
pub const BEACON_PROXY_CODE: &[u8] = b"TOKENFORGE_BEACON_PROXY_V1";
pub const BASE_OBJECT_PROXY_CODE: &[u8] = b"TOKENFORGE_BASE_PROXY_V1";
pub const GOVERNOR_CODE: &[u8] = b"TOKENFORGE_UPGRADE_GOVERNOR_V1";
pub const REGISTRY_CODE: &[u8] = b"TOKENFORGE_EXTENSION_REGISTRY_V1";
pub const FACTORY_CODE: &[u8] = b"TOKENFORGE_EXTENSION_FACTORY_V1";
