//! BIP32 hierarchical deterministic keys.

use crate::types::Network;
use crate::{PsetError, Result};
use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

const BIP32_MASTER_KEY: &[u8] = b"Bitcoin seed";
const BIP32_HARDENED_KEY_LIMIT: u32 = 0x8000_0000;

/// Chain code for BIP32 key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainCode(pub [u8; 32]);

impl ChainCode {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Key fingerprint (first 4 bytes of HASH160 of the public key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 4]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = Sha256::digest(public_key.serialize());
        let ripemd = Ripemd160::digest(hash);
        let mut fingerprint = [0u8; 4];
        fingerprint.copy_from_slice(&ripemd[0..4]);
        Fingerprint(fingerprint)
    }
}

/// Ordered sequence of child numbers, hardened or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DerivationPath {
    path: Vec<u32>,
}

impl DerivationPath {
    pub fn new(path: Vec<u32>) -> Self {
        DerivationPath { path }
    }

    pub fn master() -> Self {
        DerivationPath { path: Vec::new() }
    }

    pub fn path(&self) -> &[u32] {
        &self.path
    }

    pub fn is_hardened(child_number: u32) -> bool {
        child_number >= BIP32_HARDENED_KEY_LIMIT
    }

    pub fn hardened(index: u32) -> u32 {
        index + BIP32_HARDENED_KEY_LIMIT
    }

    pub fn depth(&self) -> u8 {
        self.path.len() as u8
    }

    pub fn child(&self, child_number: u32) -> DerivationPath {
        let mut new_path = self.path.clone();
        new_path.push(child_number);
        DerivationPath::new(new_path)
    }
}

impl FromStr for DerivationPath {
    type Err = PsetError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "m" {
            return Ok(DerivationPath::master());
        }

        // Accept both "m/84'/1'/0'" and a bare "84'/1'/0'"
        let path_str = s.strip_prefix("m/").unwrap_or(s);
        if path_str.is_empty() {
            return Ok(DerivationPath::master());
        }

        let mut path = Vec::new();
        for component in path_str.split('/') {
            if component.is_empty() {
                return Err(PsetError::KeyDerivation("empty path component".to_string()));
            }

            let (index_str, is_hardened) =
                if component.ends_with('\'') || component.ends_with('h') {
                    (&component[..component.len() - 1], true)
                } else {
                    (component, false)
                };

            let index: u32 = index_str.parse().map_err(|_| {
                PsetError::KeyDerivation(format!("invalid path component: {}", component))
            })?;

            if index >= BIP32_HARDENED_KEY_LIMIT {
                return Err(PsetError::KeyDerivation(format!(
                    "path component index too large: {}",
                    index
                )));
            }

            path.push(if is_hardened {
                DerivationPath::hardened(index)
            } else {
                index
            });
        }

        Ok(DerivationPath::new(path))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for &child_number in &self.path {
            if DerivationPath::is_hardened(child_number) {
                write!(f, "/{}'", child_number - BIP32_HARDENED_KEY_LIMIT)?;
            } else {
                write!(f, "/{}", child_number)?;
            }
        }
        Ok(())
    }
}

/// Extended private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPrivateKey {
    pub network: Network,
    pub depth: u8,
    pub parent_fingerprint: Fingerprint,
    pub child_number: u32,
    pub private_key: SecretKey,
    pub chain_code: ChainCode,
}

impl ExtendedPrivateKey {
    /// Create a new master key from a seed.
    pub fn new_master_from_seed(seed: &[u8], network: Network) -> Result<Self> {
        let mut mac = Hmac::<Sha512>::new_from_slice(BIP32_MASTER_KEY)
            .expect("HMAC accepts any key length");
        mac.update(seed);
        let result = mac.finalize().into_bytes();

        let (key_bytes, chain_code_bytes) = result.split_at(32);

        let private_key = SecretKey::from_slice(key_bytes)
            .map_err(|e| PsetError::KeyDerivation(format!("invalid key from seed: {}", e)))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(chain_code_bytes);

        Ok(ExtendedPrivateKey {
            network,
            depth: 0,
            parent_fingerprint: Fingerprint([0; 4]),
            child_number: 0,
            private_key,
            chain_code: ChainCode(chain_code),
        })
    }

    /// Derive a child private key.
    pub fn derive_child(&self, child_number: u32) -> Result<ExtendedPrivateKey> {
        let secp = Secp256k1::new();
        let public_key = self.private_key.public_key(&secp);

        let mut mac = Hmac::<Sha512>::new_from_slice(&self.chain_code.0)
            .expect("HMAC accepts any key length");

        if DerivationPath::is_hardened(child_number) {
            mac.update(&[0]);
            mac.update(&self.private_key.secret_bytes());
        } else {
            mac.update(&public_key.serialize());
        }

        mac.update(&child_number.to_be_bytes());
        let result = mac.finalize().into_bytes();

        let (key_bytes, chain_code_bytes) = result.split_at(32);

        let scalar = SecretKey::from_slice(key_bytes)
            .map_err(|e| PsetError::KeyDerivation(format!("invalid scalar: {}", e)))?;

        let child_private_key = self
            .private_key
            .add_tweak(&secp256k1::Scalar::from(scalar))
            .map_err(|e| PsetError::KeyDerivation(format!("invalid child key: {}", e)))?;

        let mut child_chain_code = [0u8; 32];
        child_chain_code.copy_from_slice(chain_code_bytes);

        Ok(ExtendedPrivateKey {
            network: self.network,
            depth: self.depth + 1,
            parent_fingerprint: Fingerprint::from_public_key(&public_key),
            child_number,
            private_key: child_private_key,
            chain_code: ChainCode(child_chain_code),
        })
    }

    /// Derive a key from a derivation path.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<ExtendedPrivateKey> {
        let mut current_key = self.clone();
        for &child_number in path.path() {
            current_key = current_key.derive_child(child_number)?;
        }
        Ok(current_key)
    }

    /// Get the corresponding extended public key.
    pub fn extended_public_key(&self) -> ExtendedPublicKey {
        let secp = Secp256k1::new();
        ExtendedPublicKey {
            network: self.network,
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_number: self.child_number,
            public_key: self.private_key.public_key(&secp),
            chain_code: self.chain_code,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        self.private_key.public_key(&secp)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(&self.public_key())
    }

    /// Serialize to extended private key format (xprv/tprv).
    pub fn to_base58(&self) -> String {
        let mut data = Vec::with_capacity(78);
        data.extend_from_slice(&self.network.private_version_bytes());
        data.push(self.depth);
        data.extend_from_slice(self.parent_fingerprint.as_bytes());
        data.extend_from_slice(&self.child_number.to_be_bytes());
        data.extend_from_slice(self.chain_code.as_bytes());
        data.push(0x00);
        data.extend_from_slice(&self.private_key.secret_bytes());
        base58check_encode(&data)
    }
}

impl FromStr for ExtendedPrivateKey {
    type Err = PsetError;

    fn from_str(s: &str) -> Result<Self> {
        let data = base58check_decode(s, 78)?;

        let version = [data[0], data[1], data[2], data[3]];
        let network = network_from_private_version(version)?;

        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&data[5..9]);

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[13..45]);

        if data[45] != 0x00 {
            return Err(PsetError::KeyDerivation(
                "invalid private key prefix".to_string(),
            ));
        }

        let private_key = SecretKey::from_slice(&data[46..78])
            .map_err(|e| PsetError::KeyDerivation(format!("invalid private key: {}", e)))?;

        Ok(ExtendedPrivateKey {
            network,
            depth: data[4],
            parent_fingerprint: Fingerprint(parent_fingerprint),
            child_number: u32::from_be_bytes([data[9], data[10], data[11], data[12]]),
            private_key,
            chain_code: ChainCode(chain_code),
        })
    }
}

impl fmt::Display for ExtendedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// Extended public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedPublicKey {
    pub network: Network,
    pub depth: u8,
    pub parent_fingerprint: Fingerprint,
    pub child_number: u32,
    pub public_key: PublicKey,
    pub chain_code: ChainCode,
}

impl ExtendedPublicKey {
    /// Derive a child public key. Hardened children cannot be derived from a
    /// public-only key; asking for one is a capability violation.
    pub fn derive_child(&self, child_number: u32) -> Result<ExtendedPublicKey> {
        if DerivationPath::is_hardened(child_number) {
            return Err(PsetError::KeyDerivation(
                "cannot derive hardened child from public key".to_string(),
            ));
        }

        let secp = Secp256k1::new();
        let mut mac = Hmac::<Sha512>::new_from_slice(&self.chain_code.0)
            .expect("HMAC accepts any key length");

        mac.update(&self.public_key.serialize());
        mac.update(&child_number.to_be_bytes());
        let result = mac.finalize().into_bytes();

        let (key_bytes, chain_code_bytes) = result.split_at(32);

        let derived_secret = SecretKey::from_slice(key_bytes)
            .map_err(|e| PsetError::KeyDerivation(format!("invalid derived key: {}", e)))?;

        let child_public_key = self
            .public_key
            .combine(&derived_secret.public_key(&secp))
            .map_err(|e| PsetError::KeyDerivation(format!("failed to combine keys: {}", e)))?;

        let mut child_chain_code = [0u8; 32];
        child_chain_code.copy_from_slice(chain_code_bytes);

        Ok(ExtendedPublicKey {
            network: self.network,
            depth: self.depth + 1,
            parent_fingerprint: Fingerprint::from_public_key(&self.public_key),
            child_number,
            public_key: child_public_key,
            chain_code: ChainCode(child_chain_code),
        })
    }

    /// Derive along a path; fails on any hardened segment.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<ExtendedPublicKey> {
        let mut current_key = self.clone();
        for &child_number in path.path() {
            current_key = current_key.derive_child(child_number)?;
        }
        Ok(current_key)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(&self.public_key)
    }

    /// Serialize to extended public key format (xpub/tpub).
    pub fn to_base58(&self) -> String {
        let mut data = Vec::with_capacity(78);
        data.extend_from_slice(&self.network.public_version_bytes());
        data.push(self.depth);
        data.extend_from_slice(self.parent_fingerprint.as_bytes());
        data.extend_from_slice(&self.child_number.to_be_bytes());
        data.extend_from_slice(self.chain_code.as_bytes());
        data.extend_from_slice(&self.public_key.serialize());
        base58check_encode(&data)
    }
}

impl FromStr for ExtendedPublicKey {
    type Err = PsetError;

    fn from_str(s: &str) -> Result<Self> {
        let data = base58check_decode(s, 78)?;

        let version = [data[0], data[1], data[2], data[3]];
        let network = network_from_public_version(version)?;

        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&data[5..9]);

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[13..45]);

        let public_key = PublicKey::from_slice(&data[45..78])
            .map_err(|e| PsetError::KeyDerivation(format!("invalid public key: {}", e)))?;

        Ok(ExtendedPublicKey {
            network,
            depth: data[4],
            parent_fingerprint: Fingerprint(parent_fingerprint),
            child_number: u32::from_be_bytes([data[9], data[10], data[11], data[12]]),
            public_key,
            chain_code: ChainCode(chain_code),
        })
    }
}

impl fmt::Display for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

fn network_from_private_version(version: [u8; 4]) -> Result<Network> {
    if version == Network::Liquid.private_version_bytes() {
        Ok(Network::Liquid)
    } else if version == Network::LiquidTestnet.private_version_bytes() {
        Ok(Network::LiquidTestnet)
    } else {
        Err(PsetError::KeyDerivation("invalid version bytes".to_string()))
    }
}

fn network_from_public_version(version: [u8; 4]) -> Result<Network> {
    if version == Network::Liquid.public_version_bytes() {
        Ok(Network::Liquid)
    } else if version == Network::LiquidTestnet.public_version_bytes() {
        Ok(Network::LiquidTestnet)
    } else {
        Err(PsetError::KeyDerivation("invalid version bytes".to_string()))
    }
}

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = payload.to_vec();
    let checksum = Sha256::digest(Sha256::digest(&data));
    data.extend_from_slice(&checksum[..4]);

    let mut num = data.iter().fold(num_bigint::BigUint::from(0u32), |acc, &byte| {
        (acc << 8) + num_bigint::BigUint::from(byte)
    });

    let mut encoded = Vec::new();
    while num > num_bigint::BigUint::from(0u32) {
        let remainder = &num % 58u32;
        let digit = remainder.to_u32_digits().first().copied().unwrap_or(0);
        encoded.push(BASE58_ALPHABET[digit as usize]);
        num /= 58u32;
    }

    for &byte in data.iter() {
        if byte == 0 {
            encoded.push(b'1');
        } else {
            break;
        }
    }

    encoded.reverse();
    String::from_utf8(encoded).expect("alphabet is ASCII")
}

fn base58check_decode(s: &str, payload_len: usize) -> Result<Vec<u8>> {
    let mut num = num_bigint::BigUint::from(0u32);
    for &ch in s.as_bytes() {
        let digit = BASE58_ALPHABET
            .iter()
            .position(|&c| c == ch)
            .ok_or_else(|| PsetError::KeyDerivation("invalid base58 character".to_string()))?;
        num = num * 58u32 + num_bigint::BigUint::from(digit);
    }

    let mut bytes = if num == num_bigint::BigUint::from(0u32) {
        Vec::new()
    } else {
        num.to_bytes_be()
    };

    for &ch in s.as_bytes() {
        if ch == b'1' {
            bytes.insert(0, 0);
        } else {
            break;
        }
    }

    if bytes.len() != payload_len + 4 {
        return Err(PsetError::KeyDerivation(format!(
            "invalid extended key length: {} expected {}",
            bytes.len(),
            payload_len + 4
        )));
    }

    let (payload, checksum) = bytes.split_at(payload_len);
    let computed = Sha256::digest(Sha256::digest(payload));
    if checksum != &computed[..4] {
        return Err(PsetError::KeyDerivation("invalid checksum".to_string()));
    }

    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bip32_master_from_seed() {
        // BIP32 test vector 1
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let xprv = ExtendedPrivateKey::new_master_from_seed(&seed, Network::Liquid).unwrap();

        assert_eq!(
            hex::encode(xprv.private_key.secret_bytes()),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            hex::encode(xprv.chain_code.0),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );
        assert_eq!(xprv.depth, 0);
        assert_eq!(xprv.parent_fingerprint.0, [0; 4]);
    }

    #[test]
    fn test_bip32_serialization_vector() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedPrivateKey::new_master_from_seed(&seed, Network::Liquid).unwrap();

        assert_eq!(
            master.to_base58(),
            "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
        );
        assert_eq!(
            master.extended_public_key().to_base58(),
            "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8"
        );
    }

    #[test]
    fn test_derivation_path_parsing() {
        let path = DerivationPath::from_str("m").unwrap();
        assert_eq!(path.path(), &[] as &[u32]);

        let path = DerivationPath::from_str("m/84'/1'/0'").unwrap();
        assert_eq!(
            path.path(),
            &[
                DerivationPath::hardened(84),
                DerivationPath::hardened(1),
                DerivationPath::hardened(0)
            ]
        );
        assert_eq!(path.to_string(), "m/84'/1'/0'");

        // 'h' suffix and missing "m/" prefix are accepted
        let path = DerivationPath::from_str("84h/1h/0h").unwrap();
        assert_eq!(path.to_string(), "m/84'/1'/0'");

        assert!(DerivationPath::from_str("m//0").is_err());
        assert!(DerivationPath::from_str("m/abc").is_err());
        assert!(DerivationPath::from_str("m/2147483648").is_err());
    }

    #[test]
    fn test_path_derivation_matches_stepwise() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedPrivateKey::new_master_from_seed(&seed, Network::Liquid).unwrap();

        let path = DerivationPath::from_str("m/84'/1'/0'/0/0").unwrap();
        let derived = master.derive_path(&path).unwrap();

        let stepwise = master
            .derive_child(DerivationPath::hardened(84))
            .unwrap()
            .derive_child(DerivationPath::hardened(1))
            .unwrap()
            .derive_child(DerivationPath::hardened(0))
            .unwrap()
            .derive_child(0)
            .unwrap()
            .derive_child(0)
            .unwrap();

        assert_eq!(
            derived.private_key.secret_bytes(),
            stepwise.private_key.secret_bytes()
        );
        assert_eq!(derived.chain_code.0, stepwise.chain_code.0);
        assert_eq!(derived.depth, 5);
    }

    #[test]
    fn test_public_derivation_matches_private() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master_priv = ExtendedPrivateKey::new_master_from_seed(&seed, Network::Liquid).unwrap();
        let master_pub = master_priv.extended_public_key();

        let child_priv = master_priv.derive_child(0).unwrap();
        let child_pub = master_pub.derive_child(0).unwrap();

        assert_eq!(
            child_priv.extended_public_key().public_key.serialize(),
            child_pub.public_key.serialize()
        );
        assert_eq!(child_priv.chain_code.0, child_pub.chain_code.0);
    }

    #[test]
    fn test_public_key_hardened_derivation_fails() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master_pub = ExtendedPrivateKey::new_master_from_seed(&seed, Network::Liquid)
            .unwrap()
            .extended_public_key();

        let result = master_pub.derive_child(DerivationPath::hardened(0));
        assert!(matches!(result, Err(PsetError::KeyDerivation(_))));
    }

    #[test]
    fn test_extended_key_string_roundtrip() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master =
            ExtendedPrivateKey::new_master_from_seed(&seed, Network::LiquidTestnet).unwrap();

        let serialized = master.to_base58();
        assert!(serialized.starts_with("tprv"));
        let deserialized = ExtendedPrivateKey::from_str(&serialized).unwrap();
        assert_eq!(
            master.private_key.secret_bytes(),
            deserialized.private_key.secret_bytes()
        );

        let master_pub = master.extended_public_key();
        let pub_serialized = master_pub.to_base58();
        assert!(pub_serialized.starts_with("tpub"));
        let pub_deserialized = ExtendedPublicKey::from_str(&pub_serialized).unwrap();
        assert_eq!(
            master_pub.public_key.serialize(),
            pub_deserialized.public_key.serialize()
        );

        assert!(ExtendedPrivateKey::from_str("invalid").is_err());
    }

    #[test]
    fn test_fingerprint_propagation() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedPrivateKey::new_master_from_seed(&seed, Network::Liquid).unwrap();
        let child = master.derive_child(0).unwrap();

        assert_eq!(child.parent_fingerprint.0, master.fingerprint().0);
    }
}
