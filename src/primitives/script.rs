//! Locking scripts and the recognition helpers the signer needs.

use super::encode::{read_bytes, write_bytes, Decodable, Encodable};
use super::hash::{hash160, Hash160};
use crate::Result;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A locking script. The pipeline only ever constructs and recognizes
/// witness-v0 single-key scripts; everything else is carried opaquely.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    /// Create a new empty script
    pub fn new() -> Self {
        Script(Vec::new())
    }

    /// Create a script from bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    /// Get the script bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if this is a P2WPKH script pattern
    pub fn is_p2wpkh(&self) -> bool {
        self.0.len() == 22 &&
        self.0[0] == 0x00 && // OP_0
        self.0[1] == 0x14 // Push 20 bytes
    }

    /// Extract the 20-byte program of a P2WPKH script
    pub fn wpkh_hash(&self) -> Option<Hash160> {
        if self.is_p2wpkh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&self.0[2..22]);
            Some(hash)
        } else {
            None
        }
    }

    /// Create a P2WPKH script for the given hash160
    pub fn new_p2wpkh(hash160: &Hash160) -> Self {
        let mut script = Vec::with_capacity(22);
        script.push(0x00); // OP_0
        script.push(0x14); // Push 20 bytes
        script.extend_from_slice(hash160);
        Script(script)
    }

    /// Create a P2WPKH script locking to the given public key
    pub fn new_p2wpkh_for_key(public_key: &PublicKey) -> Self {
        Self::new_p2wpkh(&hash160(&public_key.serialize()))
    }

    /// The BIP143 script-code for a P2WPKH program: the corresponding
    /// P2PKH script.
    pub fn p2wpkh_script_code(&self) -> Option<Script> {
        let hash = self.wpkh_hash()?;
        let mut script = Vec::with_capacity(25);
        script.push(0x76); // OP_DUP
        script.push(0xa9); // OP_HASH160
        script.push(0x14); // Push 20 bytes
        script.extend_from_slice(&hash);
        script.push(0x88); // OP_EQUALVERIFY
        script.push(0xac); // OP_CHECKSIG
        Some(Script(script))
    }

    /// Check whether this script locks to the given public key as P2WPKH.
    pub fn is_wpkh_for_key(&self, public_key: &PublicKey) -> bool {
        self.wpkh_hash()
            .map(|h| h == hash160(&public_key.serialize()))
            .unwrap_or(false)
    }
}

impl Encodable for Script {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        write_bytes(writer, &self.0)
    }
}

impl Decodable for Script {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Script(read_bytes(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};

    #[test]
    fn test_p2wpkh_recognition() {
        let script = Script::new_p2wpkh(&[0x12u8; 20]);
        assert!(script.is_p2wpkh());
        assert_eq!(script.wpkh_hash(), Some([0x12u8; 20]));
        assert_eq!(script.len(), 22);

        assert!(!Script::new().is_p2wpkh());
        assert!(Script::from_bytes(vec![0x6a]).wpkh_hash().is_none());
    }

    #[test]
    fn test_script_code_is_p2pkh_form() {
        let script = Script::new_p2wpkh(&[0x34u8; 20]);
        let code = script.p2wpkh_script_code().unwrap();
        assert_eq!(code.len(), 25);
        assert_eq!(code.as_bytes()[0], 0x76);
        assert_eq!(code.as_bytes()[24], 0xac);
        assert_eq!(&code.as_bytes()[3..23], &[0x34u8; 20]);
    }

    #[test]
    fn test_key_binding() {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&[7u8; 32]).unwrap().public_key(&secp);
        let script = Script::new_p2wpkh_for_key(&key);
        assert!(script.is_wpkh_for_key(&key));

        let other = SecretKey::from_slice(&[8u8; 32]).unwrap().public_key(&secp);
        assert!(!script.is_wpkh_for_key(&other));
    }
}
