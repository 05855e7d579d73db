//! Confidential value and asset encodings, commitments and proof material.
//!
//! Commitments are Pedersen-style points on secp256k1: an asset maps to a
//! deterministic generator, a blinded entry commits to
//! `vbf*G + value*(H(asset) + abf*G)` and explicit entries verify as
//! `value*H(asset)`. Balance therefore reduces to comparing point sums, and
//! the blinder can solve the final blinding factor so the sums telescope.
//!
//! The rangeproof here is not a zero-knowledge range argument; it is the
//! rewindable envelope of one: the entry's secrets travel inside it,
//! encrypted to the ECDH secret of the output's ephemeral nonce key and the
//! owner's blinding key, and rewinding verifies the opening against both
//! commitments before accepting it.

use super::encode::{read_bytes, write_bytes, Decodable, Encodable};
use super::hash::sha256;
use crate::{PsetError, Result};
use hmac::{Hmac, Mac};
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Verification};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::Sha256;
use std::fmt;
use std::io::{Read, Write};

/// A 32-byte asset tag.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    pub fn new(bytes: [u8; 32]) -> Self {
        AssetId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PsetError::InvalidInput("asset id must be 32 bytes".to_string()))?;
        Ok(AssetId(arr))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Encodable for AssetId {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for AssetId {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(AssetId(<[u8; 32]>::consensus_decode(reader)?))
    }
}

/// Value blinding factor: the secret scalar behind a value commitment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueBlindingFactor(pub [u8; 32]);

/// Asset blinding factor: the secret scalar tweaking the asset generator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetBlindingFactor(pub [u8; 32]);

macro_rules! impl_blinding_factor {
    ($name:ident) => {
        impl $name {
            pub fn new(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            /// Sample a factor from the supplied entropy source. Rejection
            /// sampling keeps the result a valid non-zero scalar.
            pub fn random<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
                loop {
                    let mut bytes = [0u8; 32];
                    rng.fill_bytes(&mut bytes);
                    if SecretKey::from_slice(&bytes).is_ok() {
                        return $name(bytes);
                    }
                }
            }

            pub fn zero() -> Self {
                $name([0u8; 32])
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }
    };
}

impl_blinding_factor!(ValueBlindingFactor);
impl_blinding_factor!(AssetBlindingFactor);

/// Confidential asset: either an explicit tag or a blinded generator point.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ConfidentialAsset {
    Explicit(AssetId),
    Confidential(#[serde_as(as = "Bytes")] [u8; 33]),
}

impl ConfidentialAsset {
    pub fn is_explicit(&self) -> bool {
        matches!(self, ConfidentialAsset::Explicit(_))
    }

    pub fn is_confidential(&self) -> bool {
        matches!(self, ConfidentialAsset::Confidential(_))
    }

    pub fn explicit_asset(&self) -> Option<&AssetId> {
        match self {
            ConfidentialAsset::Explicit(asset_id) => Some(asset_id),
            _ => None,
        }
    }

    pub fn commitment(&self) -> Option<&[u8; 33]> {
        match self {
            ConfidentialAsset::Confidential(c) => Some(c),
            _ => None,
        }
    }
}

impl Encodable for ConfidentialAsset {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        match self {
            ConfidentialAsset::Explicit(asset_id) => {
                let mut written = writer.write(&[0x01])?;
                written += asset_id.consensus_encode(writer)?;
                Ok(written)
            }
            ConfidentialAsset::Confidential(commitment) => {
                // Prefix 0x0a/0x0b carries the point parity
                let prefix = if commitment[0] & 1 == 0 { 0x0a } else { 0x0b };
                let mut written = writer.write(&[prefix])?;
                written += writer.write(&commitment[1..])?;
                Ok(written)
            }
        }
    }
}

impl Decodable for ConfidentialAsset {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; 1];
        reader.read_exact(&mut prefix)?;

        match prefix[0] {
            0x01 => Ok(ConfidentialAsset::Explicit(AssetId::consensus_decode(reader)?)),
            0x0a | 0x0b => {
                let mut commitment = [0u8; 33];
                commitment[0] = if prefix[0] == 0x0a { 0x02 } else { 0x03 };
                reader.read_exact(&mut commitment[1..])?;
                Ok(ConfidentialAsset::Confidential(commitment))
            }
            p => Err(PsetError::Encode(format!("invalid asset prefix: {:#x}", p))),
        }
    }
}

/// Confidential value: either an explicit satoshi amount or a commitment.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ConfidentialValue {
    Explicit(u64),
    Confidential(#[serde_as(as = "Bytes")] [u8; 33]),
}

impl ConfidentialValue {
    pub fn is_explicit(&self) -> bool {
        matches!(self, ConfidentialValue::Explicit(_))
    }

    pub fn is_confidential(&self) -> bool {
        matches!(self, ConfidentialValue::Confidential(_))
    }

    pub fn explicit_value(&self) -> Option<u64> {
        match self {
            ConfidentialValue::Explicit(value) => Some(*value),
            _ => None,
        }
    }

    pub fn commitment(&self) -> Option<&[u8; 33]> {
        match self {
            ConfidentialValue::Confidential(c) => Some(c),
            _ => None,
        }
    }
}

impl Encodable for ConfidentialValue {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        match self {
            ConfidentialValue::Explicit(value) => {
                let mut written = writer.write(&[0x01])?;
                written += value.consensus_encode(writer)?;
                Ok(written)
            }
            ConfidentialValue::Confidential(commitment) => {
                let prefix = if commitment[0] & 1 == 0 { 0x08 } else { 0x09 };
                let mut written = writer.write(&[prefix])?;
                written += writer.write(&commitment[1..])?;
                Ok(written)
            }
        }
    }
}

impl Decodable for ConfidentialValue {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; 1];
        reader.read_exact(&mut prefix)?;

        match prefix[0] {
            0x01 => Ok(ConfidentialValue::Explicit(u64::consensus_decode(reader)?)),
            0x08 | 0x09 => {
                let mut commitment = [0u8; 33];
                commitment[0] = if prefix[0] == 0x08 { 0x02 } else { 0x03 };
                reader.read_exact(&mut commitment[1..])?;
                Ok(ConfidentialValue::Confidential(commitment))
            }
            p => Err(PsetError::Encode(format!("invalid value prefix: {:#x}", p))),
        }
    }
}

/// Confidential nonce: the blinder's ephemeral public key, or null for
/// explicit outputs.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfidentialNonce {
    #[default]
    Null,
    Confidential(#[serde_as(as = "Bytes")] [u8; 33]),
}

impl ConfidentialNonce {
    pub fn from_pubkey(key: &PublicKey) -> Self {
        ConfidentialNonce::Confidential(key.serialize())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfidentialNonce::Null)
    }

    pub fn pubkey(&self) -> Result<PublicKey> {
        match self {
            ConfidentialNonce::Null => {
                Err(PsetError::InvalidInput("null nonce has no key".to_string()))
            }
            ConfidentialNonce::Confidential(bytes) => Ok(PublicKey::from_slice(bytes)?),
        }
    }
}

impl Encodable for ConfidentialNonce {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        match self {
            ConfidentialNonce::Null => Ok(writer.write(&[0x00])?),
            ConfidentialNonce::Confidential(commitment) => {
                let mut written = writer.write(&[commitment[0]])?;
                written += writer.write(&commitment[1..])?;
                Ok(written)
            }
        }
    }
}

impl Decodable for ConfidentialNonce {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut prefix = [0u8; 1];
        reader.read_exact(&mut prefix)?;

        match prefix[0] {
            0x00 => Ok(ConfidentialNonce::Null),
            0x02 | 0x03 => {
                let mut commitment = [0u8; 33];
                commitment[0] = prefix[0];
                reader.read_exact(&mut commitment[1..])?;
                Ok(ConfidentialNonce::Confidential(commitment))
            }
            p => Err(PsetError::Encode(format!("invalid nonce prefix: {:#x}", p))),
        }
    }
}

/// Rewindable range proof blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeProof(pub Vec<u8>);

/// Surjection proof blob binding an output asset commitment to the inputs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SurjectionProof(pub Vec<u8>);

macro_rules! impl_proof_blob {
    ($name:ident) => {
        impl $name {
            pub fn new(proof: Vec<u8>) -> Self {
                $name(proof)
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }
        }

        impl Encodable for $name {
            fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
                write_bytes(writer, &self.0)
            }
        }

        impl Decodable for $name {
            fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
                Ok($name(read_bytes(reader)?))
            }
        }
    };
}

impl_proof_blob!(RangeProof);
impl_proof_blob!(SurjectionProof);

/// The recovered opening of a blinded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutSecrets {
    pub asset: AssetId,
    pub value: u64,
    pub value_bf: ValueBlindingFactor,
    pub asset_bf: AssetBlindingFactor,
}

const GENERATOR_TAG: &[u8] = b"pset/asset-generator/v1";
const RANGE_PROOF_TAG: &[u8] = b"rp1";
const SURJECTION_PROOF_TAG: &[u8] = b"sj1";
const REWIND_MSG_LEN: usize = 32 + 32 + 32 + 8;

/// Deterministic try-and-increment hash-to-point for an asset tag.
pub fn asset_base_generator(asset: &AssetId) -> PublicKey {
    let mut counter = 0u32;
    loop {
        let mut data = Vec::with_capacity(GENERATOR_TAG.len() + 36);
        data.extend_from_slice(GENERATOR_TAG);
        data.extend_from_slice(asset.as_bytes());
        data.extend_from_slice(&counter.to_le_bytes());
        let digest = sha256(&data);

        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return point;
        }
        counter += 1;
    }
}

/// The blinded asset generator `H(asset) + abf*G`.
pub fn asset_generator<C: Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    asset: &AssetId,
    abf: &AssetBlindingFactor,
) -> Result<PublicKey> {
    let base = asset_base_generator(asset);
    if abf.is_zero() {
        return Ok(base);
    }
    let tweak = SecretKey::from_slice(abf.as_bytes())?;
    let tweak_point = tweak.public_key(secp);
    Ok(base.combine(&tweak_point)?)
}

/// Serialized asset commitment for a blinded entry.
pub fn asset_commitment<C: Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    asset: &AssetId,
    abf: &AssetBlindingFactor,
) -> Result<[u8; 33]> {
    Ok(asset_generator(secp, asset, abf)?.serialize())
}

fn value_scalar(value: u64) -> Result<Scalar> {
    if value == 0 {
        return Err(PsetError::InvalidInput(
            "cannot commit to a zero value".to_string(),
        ));
    }
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    Scalar::from_be_bytes(bytes)
        .map_err(|_| PsetError::InvalidInput("value out of scalar range".to_string()))
}

/// Pedersen-style value commitment `vbf*G + value*(H(asset) + abf*G)`.
pub fn value_commitment<C: Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    value: u64,
    asset: &AssetId,
    abf: &AssetBlindingFactor,
    vbf: &ValueBlindingFactor,
) -> Result<[u8; 33]> {
    let generator = asset_generator(secp, asset, abf)?;
    let value_term = generator.mul_tweak(secp, &value_scalar(value)?)?;
    if vbf.is_zero() {
        return Ok(value_term.serialize());
    }
    let blind_term = SecretKey::from_slice(vbf.as_bytes())?.public_key(secp);
    Ok(value_term.combine(&blind_term)?.serialize())
}

/// Accumulator over secp256k1 scalars; the zero sum is representable even
/// though `SecretKey` itself cannot hold it.
pub(crate) struct ScalarSum(Option<SecretKey>);

impl ScalarSum {
    pub fn zero() -> Self {
        ScalarSum(None)
    }

    fn merge(&mut self, term: SecretKey) {
        self.0 = match self.0 {
            None => Some(term),
            // add_tweak only fails here when the sum cancels to zero
            Some(acc) => acc.add_tweak(&Scalar::from(term)).ok(),
        };
    }

    pub fn add(&mut self, factor: &[u8; 32]) -> Result<()> {
        if factor != &[0u8; 32] {
            self.merge(SecretKey::from_slice(factor)?);
        }
        Ok(())
    }

    pub fn sub(&mut self, factor: &[u8; 32]) -> Result<()> {
        if factor != &[0u8; 32] {
            self.merge(SecretKey::from_slice(factor)?.negate());
        }
        Ok(())
    }

    /// Add `factor * value`.
    pub fn add_weighted(&mut self, factor: &[u8; 32], value: u64) -> Result<()> {
        if factor != &[0u8; 32] && value != 0 {
            let term = SecretKey::from_slice(factor)?.mul_tweak(&value_scalar(value)?)?;
            self.merge(term);
        }
        Ok(())
    }

    /// Subtract `factor * value`.
    pub fn sub_weighted(&mut self, factor: &[u8; 32], value: u64) -> Result<()> {
        if factor != &[0u8; 32] && value != 0 {
            let term = SecretKey::from_slice(factor)?.mul_tweak(&value_scalar(value)?)?;
            self.merge(term.negate());
        }
        Ok(())
    }

    pub fn into_bytes(self) -> [u8; 32] {
        match self.0 {
            None => [0u8; 32],
            Some(sk) => sk.secret_bytes(),
        }
    }
}

/// Solve the final output's value blinding factor so that the commitment
/// sums telescope: the blinded scalar mass of the inputs must equal that of
/// the outputs.
///
/// Entries are `(value, abf, vbf)`; the final output contributes only its
/// value and asset blinding factor since its `vbf` is the unknown.
pub fn last_value_blinding_factor(
    inputs: &[(u64, AssetBlindingFactor, ValueBlindingFactor)],
    outputs: &[(u64, AssetBlindingFactor, ValueBlindingFactor)],
    last_value: u64,
    last_abf: &AssetBlindingFactor,
) -> Result<ValueBlindingFactor> {
    let mut sum = ScalarSum::zero();
    for (value, abf, vbf) in inputs {
        sum.add(vbf.as_bytes())?;
        sum.add_weighted(abf.as_bytes(), *value)?;
    }
    for (value, abf, vbf) in outputs {
        sum.sub(vbf.as_bytes())?;
        sum.sub_weighted(abf.as_bytes(), *value)?;
    }
    sum.sub_weighted(last_abf.as_bytes(), last_value)?;
    Ok(ValueBlindingFactor(sum.into_bytes()))
}

/// One side of a balance equation: an already-committed entry or an explicit
/// (value, asset) pair.
#[derive(Debug, Clone)]
pub enum BalanceTerm {
    Explicit { value: u64, asset: AssetId },
    Commitment([u8; 33]),
}

struct PointSum(Option<PublicKey>);

impl PointSum {
    fn zero() -> Self {
        PointSum(None)
    }

    fn add(&mut self, point: PublicKey) {
        self.0 = match self.0 {
            None => Some(point),
            // combine only fails when the points cancel to infinity
            Some(acc) => acc.combine(&point).ok(),
        };
    }
}

/// Verify that input commitments balance output commitments plus the fee in
/// the policy asset, under homomorphic point addition.
pub fn verify_commitment_balance<C: Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    inputs: &[BalanceTerm],
    outputs: &[BalanceTerm],
    fee: u64,
    policy_asset: &AssetId,
) -> Result<bool> {
    let term_point = |term: &BalanceTerm| -> Result<Option<PublicKey>> {
        match term {
            BalanceTerm::Explicit { value: 0, .. } => Ok(None),
            BalanceTerm::Explicit { value, asset } => Ok(Some(
                asset_base_generator(asset).mul_tweak(secp, &value_scalar(*value)?)?,
            )),
            BalanceTerm::Commitment(bytes) => Ok(Some(PublicKey::from_slice(bytes)?)),
        }
    };

    let mut lhs = PointSum::zero();
    for term in inputs {
        if let Some(point) = term_point(term)? {
            lhs.add(point);
        }
    }

    let mut rhs = PointSum::zero();
    for term in outputs {
        if let Some(point) = term_point(term)? {
            rhs.add(point);
        }
    }
    if fee > 0 {
        rhs.add(asset_base_generator(policy_asset).mul_tweak(secp, &value_scalar(fee)?)?);
    }

    Ok(lhs.0 == rhs.0)
}

fn rewind_keystream(shared: &[u8; 32], len: usize) -> Vec<u8> {
    let mut stream = Vec::with_capacity(len + 32);
    let mut counter = 0u32;
    while stream.len() < len {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(shared);
        data.extend_from_slice(&counter.to_le_bytes());
        stream.extend_from_slice(&sha256(&data));
        counter += 1;
    }
    stream.truncate(len);
    stream
}

fn proof_mac(shared: &[u8; 32], commitments: (&[u8; 33], &[u8; 33]), ciphertext: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(shared).expect("HMAC accepts any key length");
    mac.update(commitments.0);
    mac.update(commitments.1);
    mac.update(ciphertext);
    mac.finalize().into_bytes().into()
}

/// Build the rewindable range proof for a blinded output.
///
/// `ephemeral_key` is the secret half of the output's nonce;
/// `blinding_pubkey` is the owner's confidentiality key for the locking
/// script. Only the holder of the matching secret can rewind.
pub fn create_range_proof(
    secrets: &TxOutSecrets,
    value_commitment: &[u8; 33],
    asset_commitment: &[u8; 33],
    ephemeral_key: &SecretKey,
    blinding_pubkey: &PublicKey,
) -> RangeProof {
    let shared = SharedSecret::new(blinding_pubkey, ephemeral_key).secret_bytes();

    let mut message = Vec::with_capacity(REWIND_MSG_LEN);
    message.extend_from_slice(secrets.asset.as_bytes());
    message.extend_from_slice(secrets.asset_bf.as_bytes());
    message.extend_from_slice(secrets.value_bf.as_bytes());
    message.extend_from_slice(&secrets.value.to_le_bytes());

    let keystream = rewind_keystream(&shared, REWIND_MSG_LEN);
    for (byte, pad) in message.iter_mut().zip(keystream.iter()) {
        *byte ^= pad;
    }

    let mut proof = Vec::with_capacity(RANGE_PROOF_TAG.len() + REWIND_MSG_LEN + 32);
    proof.extend_from_slice(RANGE_PROOF_TAG);
    proof.extend_from_slice(&message);
    proof.extend_from_slice(&proof_mac(&shared, (value_commitment, asset_commitment), &message));
    RangeProof(proof)
}

/// Rewind a range proof with the owning blinding key, recovering and
/// verifying the entry's secrets.
pub fn rewind_range_proof<C: Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    proof: &RangeProof,
    value_commitment: &[u8; 33],
    asset_commitment: &[u8; 33],
    nonce: &ConfidentialNonce,
    blinding_key: &SecretKey,
) -> Result<TxOutSecrets> {
    let rewind_err = |reason: &str| PsetError::ProofRewind {
        entry: "range proof".to_string(),
        reason: reason.to_string(),
    };

    let bytes = proof.as_bytes();
    if bytes.len() != RANGE_PROOF_TAG.len() + REWIND_MSG_LEN + 32
        || &bytes[..RANGE_PROOF_TAG.len()] != RANGE_PROOF_TAG
    {
        return Err(rewind_err("malformed proof"));
    }

    let ephemeral_pubkey = nonce
        .pubkey()
        .map_err(|_| rewind_err("output carries no nonce"))?;
    let shared = SharedSecret::new(&ephemeral_pubkey, blinding_key).secret_bytes();

    let ciphertext = &bytes[RANGE_PROOF_TAG.len()..RANGE_PROOF_TAG.len() + REWIND_MSG_LEN];
    let mac = &bytes[RANGE_PROOF_TAG.len() + REWIND_MSG_LEN..];
    if proof_mac(&shared, (value_commitment, asset_commitment), ciphertext) != mac[..] {
        return Err(rewind_err("proof not addressed to this key"));
    }

    let keystream = rewind_keystream(&shared, REWIND_MSG_LEN);
    let mut message = ciphertext.to_vec();
    for (byte, pad) in message.iter_mut().zip(keystream.iter()) {
        *byte ^= pad;
    }

    let mut asset = [0u8; 32];
    asset.copy_from_slice(&message[0..32]);
    let mut abf = [0u8; 32];
    abf.copy_from_slice(&message[32..64]);
    let mut vbf = [0u8; 32];
    vbf.copy_from_slice(&message[64..96]);
    let value = u64::from_le_bytes(message[96..104].try_into().expect("fixed layout"));

    let secrets = TxOutSecrets {
        asset: AssetId(asset),
        value,
        value_bf: ValueBlindingFactor(vbf),
        asset_bf: AssetBlindingFactor(abf),
    };

    // The opening must reproduce both commitments, otherwise the proof was
    // corrupted or keyed to someone else.
    let expect_asset = asset_commitment_or_err(secp, &secrets)?;
    if &expect_asset != asset_commitment {
        return Err(rewind_err("asset commitment mismatch"));
    }
    let expect_value = crate::primitives::confidential::value_commitment(secp, value, &secrets.asset, &secrets.asset_bf, &secrets.value_bf)
        .map_err(|_| rewind_err("invalid recovered opening"))?;
    if &expect_value != value_commitment {
        return Err(rewind_err("value commitment mismatch"));
    }

    Ok(secrets)
}

fn asset_commitment_or_err<C: Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    secrets: &TxOutSecrets,
) -> Result<[u8; 33]> {
    asset_commitment(secp, &secrets.asset, &secrets.asset_bf).map_err(|_| PsetError::ProofRewind {
        entry: "range proof".to_string(),
        reason: "invalid recovered asset blinding factor".to_string(),
    })
}

/// Build the surjection proof binding an output asset commitment to the set
/// of input asset commitments. Public data only.
pub fn create_surjection_proof(
    output_asset_commitment: &[u8; 33],
    input_asset_commitments: &[[u8; 33]],
) -> SurjectionProof {
    let mut proof = Vec::new();
    proof.extend_from_slice(SURJECTION_PROOF_TAG);
    proof.push(input_asset_commitments.len() as u8);
    for commitment in input_asset_commitments {
        proof.extend_from_slice(commitment);
    }

    let mut challenge = Vec::new();
    challenge.extend_from_slice(output_asset_commitment);
    for commitment in input_asset_commitments {
        challenge.extend_from_slice(commitment);
    }
    proof.extend_from_slice(&sha256(&challenge));
    SurjectionProof(proof)
}

/// Check a surjection proof against the output and input commitments.
pub fn verify_surjection_proof(
    proof: &SurjectionProof,
    output_asset_commitment: &[u8; 33],
    input_asset_commitments: &[[u8; 33]],
) -> bool {
    let expected = create_surjection_proof(output_asset_commitment, input_asset_commitments);
    proof == &expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn secp() -> Secp256k1<secp256k1::All> {
        Secp256k1::new()
    }

    fn test_asset() -> AssetId {
        AssetId::new([0x11u8; 32])
    }

    #[test]
    fn test_asset_generator_deterministic() {
        let secp = secp();
        let abf = AssetBlindingFactor::new([3u8; 32]);
        let a = asset_commitment(&secp, &test_asset(), &abf).unwrap();
        let b = asset_commitment(&secp, &test_asset(), &abf).unwrap();
        assert_eq!(a, b);

        let other = asset_commitment(&secp, &AssetId::new([0x22u8; 32]), &abf).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_value_commitment_hides_value() {
        let secp = secp();
        let abf = AssetBlindingFactor::new([3u8; 32]);
        let vbf = ValueBlindingFactor::new([5u8; 32]);
        let c1 = value_commitment(&secp, 1000, &test_asset(), &abf, &vbf).unwrap();
        let c2 = value_commitment(&secp, 2000, &test_asset(), &abf, &vbf).unwrap();
        assert_ne!(c1, c2);
        assert!(value_commitment(&secp, 0, &test_asset(), &abf, &vbf).is_err());
    }

    #[test]
    fn test_balance_telescopes_with_solved_factor() {
        let secp = secp();
        let mut rng = StdRng::seed_from_u64(7);
        let asset = test_asset();
        let fee = 500u64;

        // One blinded input of 100_000 funding a blinded 60_000 output and a
        // blinded change output; the change vbf is solved, not sampled.
        let in_abf = AssetBlindingFactor::random(&mut rng);
        let in_vbf = ValueBlindingFactor::random(&mut rng);
        let out_abf = AssetBlindingFactor::random(&mut rng);
        let out_vbf = ValueBlindingFactor::random(&mut rng);
        let change_abf = AssetBlindingFactor::random(&mut rng);

        let change_value = 100_000 - 60_000 - fee;
        let change_vbf = last_value_blinding_factor(
            &[(100_000, in_abf, in_vbf)],
            &[(60_000, out_abf, out_vbf)],
            change_value,
            &change_abf,
        )
        .unwrap();

        let input_c = value_commitment(&secp, 100_000, &asset, &in_abf, &in_vbf).unwrap();
        let out_c = value_commitment(&secp, 60_000, &asset, &out_abf, &out_vbf).unwrap();
        let change_c =
            value_commitment(&secp, change_value, &asset, &change_abf, &change_vbf).unwrap();

        let balanced = verify_commitment_balance(
            &secp,
            &[BalanceTerm::Commitment(input_c)],
            &[BalanceTerm::Commitment(out_c), BalanceTerm::Commitment(change_c)],
            fee,
            &asset,
        )
        .unwrap();
        assert!(balanced);

        // Tampering with a value breaks the balance.
        let bad_c = value_commitment(&secp, 60_001, &asset, &out_abf, &out_vbf).unwrap();
        let balanced = verify_commitment_balance(
            &secp,
            &[BalanceTerm::Commitment(input_c)],
            &[BalanceTerm::Commitment(bad_c), BalanceTerm::Commitment(change_c)],
            fee,
            &asset,
        )
        .unwrap();
        assert!(!balanced);
    }

    #[test]
    fn test_range_proof_rewind_roundtrip() {
        let secp = secp();
        let mut rng = StdRng::seed_from_u64(11);

        let secrets = TxOutSecrets {
            asset: test_asset(),
            value: 12_345,
            value_bf: ValueBlindingFactor::random(&mut rng),
            asset_bf: AssetBlindingFactor::random(&mut rng),
        };
        let asset_c = asset_commitment(&secp, &secrets.asset, &secrets.asset_bf).unwrap();
        let value_c = value_commitment(
            &secp,
            secrets.value,
            &secrets.asset,
            &secrets.asset_bf,
            &secrets.value_bf,
        )
        .unwrap();

        let blinding_sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let blinding_pk = blinding_sk.public_key(&secp);
        let ephemeral = SecretKey::from_slice(&[13u8; 32]).unwrap();
        let nonce = ConfidentialNonce::from_pubkey(&ephemeral.public_key(&secp));

        let proof = create_range_proof(&secrets, &value_c, &asset_c, &ephemeral, &blinding_pk);
        let recovered =
            rewind_range_proof(&secp, &proof, &value_c, &asset_c, &nonce, &blinding_sk).unwrap();
        assert_eq!(recovered, secrets);

        // A foreign key must not open the proof.
        let wrong_sk = SecretKey::from_slice(&[10u8; 32]).unwrap();
        let err = rewind_range_proof(&secp, &proof, &value_c, &asset_c, &nonce, &wrong_sk);
        assert!(matches!(err, Err(PsetError::ProofRewind { .. })));
    }

    #[test]
    fn test_surjection_proof_verification() {
        let out_c = [0x02u8; 33];
        let in_c = [[0x03u8; 33], [0x02u8; 33]];
        let proof = create_surjection_proof(&out_c, &in_c);
        assert!(verify_surjection_proof(&proof, &out_c, &in_c));
        assert!(!verify_surjection_proof(&proof, &[0x03u8; 33], &in_c));
    }

    #[test]
    fn test_confidential_encodings_roundtrip() {
        let value = ConfidentialValue::Explicit(42);
        let decoded =
            ConfidentialValue::consensus_decode_from_slice(&value.consensus_encode_to_vec().unwrap())
                .unwrap();
        assert_eq!(value, decoded);

        let secp = secp();
        let commitment = SecretKey::from_slice(&[4u8; 32])
            .unwrap()
            .public_key(&secp)
            .serialize();
        let conf = ConfidentialValue::Confidential(commitment);
        let decoded =
            ConfidentialValue::consensus_decode_from_slice(&conf.consensus_encode_to_vec().unwrap())
                .unwrap();
        assert_eq!(conf, decoded);

        let asset = ConfidentialAsset::Confidential(commitment);
        let decoded =
            ConfidentialAsset::consensus_decode_from_slice(&asset.consensus_encode_to_vec().unwrap())
                .unwrap();
        assert_eq!(asset, decoded);

        let nonce = ConfidentialNonce::Confidential(commitment);
        let decoded =
            ConfidentialNonce::consensus_decode_from_slice(&nonce.consensus_encode_to_vec().unwrap())
                .unwrap();
        assert_eq!(nonce, decoded);
    }
}
