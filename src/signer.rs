//! Rangeproof-aware transaction signing.
//!
//! The sighash follows the BIP143 witness-v0 structure with the spent value
//! replaced by its confidential serialization. When the rangeproof flag is
//! set, a digest of every output's proof data enters the preimage, so a
//! signature also pins the proofs: swapping rangeproof bytes after signing
//! invalidates the signature.

use crate::primitives::encode::Encodable;
use crate::primitives::hash::{sha256d, Hash256};
use crate::primitives::pset::Pset;
use crate::primitives::script::Script;
use crate::primitives::bip32::ExtendedPrivateKey;
use crate::{PsetError, Result};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

const SIGHASH_ALL: u32 = 0x01;
const SIGHASH_RANGEPROOF: u32 = 0x40;

/// Sighash flag set. The base commit-to-all-outputs bit is mandatory; the
/// rangeproof bit additionally commits the signature to output proof data.
///
/// Omitting the rangeproof bit while signing a confidential container is a
/// policy violation, not a stylistic choice: it would let proof bytes be
/// swapped after signing without invalidating the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SighashFlags(u32);

impl SighashFlags {
    /// `SIGHASH_ALL` alone.
    pub fn all() -> Self {
        SighashFlags(SIGHASH_ALL)
    }

    /// `SIGHASH_ALL | SIGHASH_RANGEPROOF`.
    pub fn all_with_rangeproof() -> Self {
        SighashFlags(SIGHASH_ALL | SIGHASH_RANGEPROOF)
    }

    /// Parse a raw flag word; the base bit is not optional.
    pub fn from_u32(raw: u32) -> Result<Self> {
        if raw & SIGHASH_ALL == 0 {
            return Err(PsetError::SigningPolicy(
                "sighash flags must include the commit-to-all-outputs bit".to_string(),
            ));
        }
        Ok(SighashFlags(raw))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_u8(&self) -> u8 {
        self.0 as u8
    }

    pub fn commits_to_rangeproofs(&self) -> bool {
        self.0 & SIGHASH_RANGEPROOF != 0
    }
}

impl Default for SighashFlags {
    fn default() -> Self {
        SighashFlags::all()
    }
}

/// Per-wallet signer over an exclusively owned extended key.
pub struct Signer {
    secp: Secp256k1<All>,
}

impl Signer {
    pub fn new() -> Self {
        Signer {
            secp: Secp256k1::new(),
        }
    }

    /// Sign every input addressable by `key` and attach the signatures.
    ///
    /// Inputs the key cannot address are skipped; a partially signed
    /// container is a valid intermediate state for multi-party flows.
    /// Re-signing an input overwrites the previous signature for the same
    /// public key.
    pub fn sign_with(
        &self,
        mut pset: Pset,
        key: &ExtendedPrivateKey,
        flags: SighashFlags,
    ) -> Result<Pset> {
        self.check_rangeproof_policy(&pset, flags)?;

        let fingerprint = key.fingerprint();
        let mut signed = 0usize;

        for index in 0..pset.inputs.len() {
            let Some(utxo) = pset.inputs[index].witness_utxo.clone() else {
                log::debug!("input {} has no witness utxo, skipping", index);
                continue;
            };

            let Some(secret) = self.addressable_key(&pset, index, key, &fingerprint, &utxo.script_pubkey)?
            else {
                continue;
            };
            let pubkey = secret.public_key(&self.secp);

            let script_code = utxo.script_pubkey.p2wpkh_script_code().ok_or_else(|| {
                PsetError::InvalidInput(format!("input {} is not a p2wpkh output", index))
            })?;

            let sighash = sighash(&pset, index, &script_code, flags)?;
            let message = Message::from_digest_slice(&sighash)?;
            let signature = self.secp.sign_ecdsa(&message, &secret);

            let mut sig_bytes = signature.serialize_der().to_vec();
            sig_bytes.push(flags.as_u8());

            let input = &mut pset.inputs[index];
            input.partial_sigs.insert(pubkey, sig_bytes);
            input.sighash_type = Some(flags.as_u32());
            signed += 1;
        }

        log::info!("signed {} of {} inputs", signed, pset.inputs.len());
        Ok(pset)
    }

    /// The rangeproof bit is required whenever the container carries
    /// confidential outputs, and signing against proofs that do not exist
    /// yet is a sequencing error.
    fn check_rangeproof_policy(&self, pset: &Pset, flags: SighashFlags) -> Result<()> {
        let confidential_outputs: Vec<usize> = pset
            .global
            .tx
            .output
            .iter()
            .enumerate()
            .filter(|(_, txout)| txout.is_confidential())
            .map(|(i, _)| i)
            .collect();

        if confidential_outputs.is_empty() {
            return Ok(());
        }

        if !flags.commits_to_rangeproofs() {
            return Err(PsetError::SigningPolicy(
                "confidential outputs require the rangeproof sighash bit".to_string(),
            ));
        }

        for index in confidential_outputs {
            if pset.global.tx.output[index].witness.range_proof.is_empty() {
                return Err(PsetError::PrematureSign(format!(
                    "output {} has no range proof; blind before signing",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Resolve the secret key that addresses input `index`, if any: either
    /// the wallet key itself or a child named by the input's derivation map.
    fn addressable_key(
        &self,
        pset: &Pset,
        index: usize,
        key: &ExtendedPrivateKey,
        fingerprint: &crate::primitives::bip32::Fingerprint,
        script: &Script,
    ) -> Result<Option<SecretKey>> {
        if script.is_wpkh_for_key(&key.public_key()) {
            return Ok(Some(key.private_key));
        }

        for (pubkey, source) in &pset.inputs[index].bip32_derivation {
            if source.fingerprint != *fingerprint {
                continue;
            }
            let derived = key.derive_path(&source.path)?;
            if derived.public_key() == *pubkey && script.is_wpkh_for_key(pubkey) {
                return Ok(Some(derived.private_key));
            }
        }

        Ok(None)
    }

    /// Verify an attached signature against the recomputed sighash.
    pub fn verify_input_signature(
        &self,
        pset: &Pset,
        index: usize,
        pubkey: &PublicKey,
    ) -> Result<bool> {
        let input = pset
            .inputs
            .get(index)
            .ok_or_else(|| PsetError::InvalidInput(format!("no input {}", index)))?;
        let Some(sig_bytes) = input.partial_sigs.get(pubkey) else {
            return Ok(false);
        };
        let Some((flag_byte, der)) = sig_bytes.split_last() else {
            return Ok(false);
        };
        let flags = SighashFlags::from_u32(*flag_byte as u32)?;

        let utxo = input.witness_utxo.as_ref().ok_or_else(|| {
            PsetError::InvalidInput(format!("input {} missing witness utxo", index))
        })?;
        let script_code = utxo.script_pubkey.p2wpkh_script_code().ok_or_else(|| {
            PsetError::InvalidInput(format!("input {} is not a p2wpkh output", index))
        })?;

        let digest = sighash(pset, index, &script_code, flags)?;
        let message = Message::from_digest_slice(&digest)?;
        let signature = secp256k1::ecdsa::Signature::from_der(der)?;
        Ok(self.secp.verify_ecdsa(&message, &signature, pubkey).is_ok())
    }
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the signature digest for one input.
pub fn sighash(
    pset: &Pset,
    input_index: usize,
    script_code: &Script,
    flags: SighashFlags,
) -> Result<Hash256> {
    let tx = pset.tx();
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| PsetError::InvalidInput(format!("no input {}", input_index)))?;
    let utxo = pset.inputs[input_index].witness_utxo.as_ref().ok_or_else(|| {
        PsetError::InvalidInput(format!("input {} missing witness utxo", input_index))
    })?;

    let mut preimage = Vec::new();

    // nVersion
    preimage.extend_from_slice(&tx.version.to_le_bytes());

    // hashPrevouts
    let mut prevouts = Vec::new();
    for txin in &tx.input {
        txin.previous_output.consensus_encode(&mut prevouts)?;
    }
    preimage.extend_from_slice(&sha256d(&prevouts));

    // hashSequence
    let mut sequences = Vec::new();
    for txin in &tx.input {
        sequences.extend_from_slice(&txin.sequence.to_le_bytes());
    }
    preimage.extend_from_slice(&sha256d(&sequences));

    // outpoint
    input.previous_output.consensus_encode(&mut preimage)?;

    // scriptCode
    script_code.consensus_encode(&mut preimage)?;

    // value, in its confidential serialization
    utxo.value.consensus_encode(&mut preimage)?;

    // nSequence
    preimage.extend_from_slice(&input.sequence.to_le_bytes());

    // hashOutputs
    let mut outputs = Vec::new();
    for txout in &tx.output {
        txout.consensus_encode(&mut outputs)?;
    }
    preimage.extend_from_slice(&sha256d(&outputs));

    // hashRangeproofs, only when the signature commits to proof data
    if flags.commits_to_rangeproofs() {
        let mut proofs = Vec::new();
        for txout in &tx.output {
            txout.witness.consensus_encode(&mut proofs)?;
        }
        preimage.extend_from_slice(&sha256d(&proofs));
    }

    // nLockTime and flags
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&flags.as_u32().to_le_bytes());

    Ok(sha256d(&preimage))
}
