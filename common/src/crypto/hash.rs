use blake3::hash as blake3_hash;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryInto,
    fmt::{Display, Error, Formatter},
    hash::Hasher,
    str::FromStr,
};

use crate::config::CREATE2_PREFIX;

pub const HASH_SIZE: usize = 32; // 32 bytes / 256 bits

#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug)]
pub struct Hash([u8; HASH_SIZE]);

/// Identity of a deployed object or of a caller.
/// The all-zero value is the null address.
pub type Address = Hash;

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash::new([0; HASH_SIZE])
    }

    pub const fn max() -> Self {
        Hash::new([u8::MAX; HASH_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl FromStr for Hash {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| "Invalid hash")?;
        Ok(Hash::new(bytes))
    }
}

// Hash a byte array using the blake3 algorithm
#[inline(always)]
pub fn hash(value: &[u8]) -> Hash {
    let result: [u8; HASH_SIZE] = blake3_hash(value).into();
    Hash(result)
}

impl std::hash::Hash for Hash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl AsRef<Hash> for Hash {
    fn as_ref(&self) -> &Hash {
        self
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != HASH_SIZE * 2 {
            return Err(SerdeError::custom("Invalid hex length"));
        }

        let decoded_hex = hex::decode(hex).map_err(SerdeError::custom)?;
        let bytes: [u8; 32] = decoded_hex
            .try_into()
            .map_err(|_| SerdeError::custom("Could not transform hex to bytes array for Hash"))?;
        Ok(Hash::new(bytes))
    }
}

/// Compute the identity of a piece of code
///
/// Two code objects with the same bytecode share an identity.
pub fn compute_code_identity(bytecode: &[u8]) -> Hash {
    hash(bytecode)
}

/// Compute deterministic object address (CREATE2-style)
///
/// Formula: address = blake3(0xff || deployer || salt || code_identity)
///
/// The address only depends on its three inputs and is known before deployment.
///
/// # Arguments
/// * `deployer` - Identity of the deploying party
/// * `salt` - Caller-chosen 32-byte salt
/// * `code_identity` - Identity of the code being deployed
///
/// # Example
/// ```
/// use tokenforge_common::crypto::{compute_code_identity, compute_deterministic_address, Hash};
///
/// let deployer = Hash::new([1u8; 32]);
/// let salt = Hash::new([2u8; 32]);
/// let code = compute_code_identity(b"implementation bytecode");
/// let address = compute_deterministic_address(&deployer, &salt, &code);
/// assert_eq!(address, compute_deterministic_address(&deployer, &salt, &code));
/// ```
pub fn compute_deterministic_address(deployer: &Address, salt: &Hash, code_identity: &Hash) -> Address {
    let mut data = Vec::with_capacity(1 + HASH_SIZE * 3);
    data.push(CREATE2_PREFIX);
    data.extend_from_slice(deployer.as_bytes());
    data.extend_from_slice(salt.as_bytes());
    data.extend_from_slice(code_identity.as_bytes());

    hash(&data)
}

/// Derive a salt from a domain separator and a list of parts
///
/// Each part is length-prefixed so that ("a", "bc") and ("ab", "c") never collide.
pub fn derive_salt(domain: &[u8], parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let result: [u8; HASH_SIZE] = hasher.finalize().into();
    Hash(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_address_computation() {
        let deployer = Hash::new([1u8; 32]);
        let salt = Hash::new([7u8; 32]);
        let code = compute_code_identity(b"test contract bytecode");

        // Same inputs = same address (deterministic)
        let addr1 = compute_deterministic_address(&deployer, &salt, &code);
        let addr2 = compute_deterministic_address(&deployer, &salt, &code);
        assert_eq!(addr1, addr2);

        // Different deployer = different address
        let other_deployer = Hash::new([2u8; 32]);
        assert_ne!(
            addr1,
            compute_deterministic_address(&other_deployer, &salt, &code)
        );

        // Different salt = different address
        let other_salt = Hash::new([8u8; 32]);
        assert_ne!(
            addr1,
            compute_deterministic_address(&deployer, &other_salt, &code)
        );

        // Different code = different address
        let other_code = compute_code_identity(b"other bytecode");
        assert_ne!(
            addr1,
            compute_deterministic_address(&deployer, &salt, &other_code)
        );
    }

    #[test]
    fn test_derive_salt_is_length_prefixed() {
        let a = derive_salt(b"TEST", &[b"a", b"bc"]);
        let b = derive_salt(b"TEST", &[b"ab", b"c"]);
        assert_ne!(a, b);

        let c = derive_salt(b"OTHER", &[b"a", b"bc"]);
        assert_ne!(a, c);
        assert_eq!(a, derive_salt(b"TEST", &[b"a", b"bc"]));
    }

    #[test]
    fn test_hash_hex_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let value = hash(b"roundtrip");
        let parsed: Hash = value.to_hex().parse()?;
        assert_eq!(value, parsed);

        let json = serde_json::to_string(&value)?;
        let decoded: Hash = serde_json::from_str(&json)?;
        assert_eq!(value, decoded);
        Ok(())
    }

    #[test]
    fn test_zero_address() {
        assert!(Hash::zero().is_zero());
        assert!(!Hash::max().is_zero());
        assert!("zz".parse::<Hash>().is_err());
    }
}
