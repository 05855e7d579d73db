//! BIP39 mnemonic to seed derivation.
//!
//! Only the KDF half of BIP39 lives here: the pipeline treats the mnemonic
//! as an opaque caller-held secret and never generates or validates word
//! lists.

use crate::{PsetError, Result};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::Sha512;

const PBKDF2_ROUNDS: u32 = 2048;

/// A 64-byte BIP39 seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed(pub [u8; 64]);

impl Seed {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Derive the BIP39 seed for a mnemonic sentence and optional passphrase.
pub fn mnemonic_to_seed(mnemonic: &str, passphrase: Option<&str>) -> Result<Seed> {
    let salt = format!("mnemonic{}", passphrase.unwrap_or(""));
    let mut seed = [0u8; 64];
    pbkdf2::<Hmac<Sha512>>(
        mnemonic.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ROUNDS,
        &mut seed,
    )
    .map_err(|e| PsetError::KeyDerivation(format!("pbkdf2: {}", e)))?;
    Ok(Seed(seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_bip39_vector() {
        // Trezor reference vector for the all-abandon mnemonic with the
        // "TREZOR" passphrase
        let seed = mnemonic_to_seed(TEST_MNEMONIC, Some("TREZOR")).unwrap();
        assert_eq!(
            hex::encode(seed.as_bytes()),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
        );
    }

    #[test]
    fn test_passphrase_changes_seed() {
        let plain = mnemonic_to_seed(TEST_MNEMONIC, None).unwrap();
        let salted = mnemonic_to_seed(TEST_MNEMONIC, Some("x")).unwrap();
        assert_ne!(plain.as_bytes(), salted.as_bytes());
    }
}
