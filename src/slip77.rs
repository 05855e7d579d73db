//! SLIP-77 deterministic blinding key derivation.
//!
//! One master blinding key per seed, one blinding key per locking script.
//! The binding is deterministic so blinding material never needs storage:
//! the same seed always reproduces the keys that opened past outputs.

use crate::primitives::script::Script;
use crate::{PsetError, Result};
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use sha2::Sha512;

const DOMAIN_SEED: &[u8] = b"Symmetric key seed";
const DOMAIN_LABEL: &[u8] = b"SLIP-0077";

/// The wallet-wide blinding secret derived once from the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterBlindingKey([u8; 32]);

impl MasterBlindingKey {
    /// Derive the master blinding key from a seed.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut mac =
            Hmac::<Sha512>::new_from_slice(DOMAIN_SEED).expect("HMAC accepts any key length");
        mac.update(seed);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result[32..]);
        MasterBlindingKey(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the blinding secret for a locking script.
    pub fn blinding_key(&self, script: &Script) -> Result<SecretKey> {
        let mut mac =
            Hmac::<Sha512>::new_from_slice(&self.0).expect("HMAC accepts any key length");
        mac.update(DOMAIN_LABEL);
        mac.update(script.as_bytes());
        let result = mac.finalize().into_bytes();

        SecretKey::from_slice(&result[32..])
            .map_err(|e| PsetError::KeyDerivation(format!("script blinding key: {}", e)))
    }

    /// The public half of the script's blinding key, as embedded in a
    /// confidential address.
    pub fn blinding_pubkey<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        script: &Script,
    ) -> Result<PublicKey> {
        Ok(self.blinding_key(script)?.public_key(secp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let seed = [0x5au8; 64];
        let a = MasterBlindingKey::from_seed(&seed);
        let b = MasterBlindingKey::from_seed(&seed);
        assert_eq!(a, b);

        let script = Script::new_p2wpkh(&[0x12u8; 20]);
        assert_eq!(
            a.blinding_key(&script).unwrap().secret_bytes(),
            b.blinding_key(&script).unwrap().secret_bytes()
        );
    }

    #[test]
    fn test_distinct_scripts_distinct_keys() {
        let mbk = MasterBlindingKey::from_seed(&[0x5au8; 64]);
        let key_a = mbk.blinding_key(&Script::new_p2wpkh(&[0x01u8; 20])).unwrap();
        let key_b = mbk.blinding_key(&Script::new_p2wpkh(&[0x02u8; 20])).unwrap();
        assert_ne!(key_a.secret_bytes(), key_b.secret_bytes());
    }

    #[test]
    fn test_distinct_seeds_distinct_masters() {
        let a = MasterBlindingKey::from_seed(&[0x01u8; 64]);
        let b = MasterBlindingKey::from_seed(&[0x02u8; 64]);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
