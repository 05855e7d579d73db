//! The partially-signed confidential transaction container.
//!
//! The container is the unit of work of the whole pipeline: it is built from
//! a funding request, blinded, signed and finalized, each stage consuming it
//! by value and returning the next state. Serialization follows the
//! BIP-174 shape (magic, key-value maps, separators) extended with the
//! confidential fields; the string form is base64.

use super::bip32::{DerivationPath, Fingerprint};
use super::confidential::{AssetBlindingFactor, AssetId, ValueBlindingFactor};
use super::encode::{read_varint, write_varint, Decodable, Encodable};
use super::script::Script;
use super::transaction::{Transaction, TxOut};
use crate::{PsetError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;

const PSET_MAGIC: &[u8] = b"pset";
const PSET_SEPARATOR: u8 = 0xff;

const PSET_GLOBAL_TX: u8 = 0x00;
const PSET_GLOBAL_FEE: u8 = 0x01;
const PSET_GLOBAL_VERSION: u8 = 0xfb;

const PSET_IN_WITNESS_UTXO: u8 = 0x01;
const PSET_IN_PARTIAL_SIG: u8 = 0x02;
const PSET_IN_SIGHASH_TYPE: u8 = 0x03;
const PSET_IN_BIP32_DERIVATION: u8 = 0x06;
const PSET_IN_FINAL_SCRIPTSIG: u8 = 0x07;
const PSET_IN_FINAL_SCRIPTWITNESS: u8 = 0x08;
const PSET_IN_EXPLICIT_VALUE: u8 = 0x11;
const PSET_IN_EXPLICIT_ASSET: u8 = 0x12;
const PSET_IN_VALUE_BLINDER: u8 = 0x13;
const PSET_IN_ASSET_BLINDER: u8 = 0x14;

const PSET_OUT_BIP32_DERIVATION: u8 = 0x02;
const PSET_OUT_BLINDING_PUBKEY: u8 = 0x10;
const PSET_OUT_EXPLICIT_VALUE: u8 = 0x11;
const PSET_OUT_EXPLICIT_ASSET: u8 = 0x12;
const PSET_OUT_VALUE_BLINDER: u8 = 0x13;
const PSET_OUT_ASSET_BLINDER: u8 = 0x14;

/// BIP32 origin of a key appearing in a container map.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeySource {
    pub fingerprint: Fingerprint,
    pub path: DerivationPath,
}

/// Global container data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PsetGlobal {
    pub tx: Transaction,
    pub version: Option<u32>,
    /// Fee in the policy asset. Kept global rather than as a synthetic
    /// output so explicit balance checks stay one subtraction.
    pub fee: u64,
    pub unknown: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Per-input container data. The four optional clear fields are only ever
/// populated by unblinding; the commitments they open live on the input's
/// `witness_utxo`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PsetInput {
    pub witness_utxo: Option<TxOut>,
    pub partial_sigs: BTreeMap<PublicKey, Vec<u8>>,
    pub sighash_type: Option<u32>,
    pub bip32_derivation: BTreeMap<PublicKey, KeySource>,
    pub final_script_sig: Option<Script>,
    pub final_script_witness: Option<Vec<Vec<u8>>>,
    pub value: Option<u64>,
    pub asset: Option<AssetId>,
    pub value_bf: Option<ValueBlindingFactor>,
    pub asset_bf: Option<AssetBlindingFactor>,
    pub unknown: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Per-output container data; the commitments live on the transaction
/// output with the same index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PsetOutput {
    pub blinding_pubkey: Option<PublicKey>,
    pub bip32_derivation: BTreeMap<PublicKey, KeySource>,
    pub value: Option<u64>,
    pub asset: Option<AssetId>,
    pub value_bf: Option<ValueBlindingFactor>,
    pub asset_bf: Option<AssetBlindingFactor>,
    pub unknown: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl PsetInput {
    fn clear_fields_populated(&self) -> usize {
        [
            self.value.is_some(),
            self.asset.is_some(),
            self.value_bf.is_some(),
            self.asset_bf.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    fn strip_clear_fields(&mut self) {
        self.value = None;
        self.asset = None;
        self.value_bf = None;
        self.asset_bf = None;
    }
}

impl PsetOutput {
    fn clear_fields_populated(&self) -> usize {
        [
            self.value.is_some(),
            self.asset.is_some(),
            self.value_bf.is_some(),
            self.asset_bf.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    fn strip_clear_fields(&mut self) {
        self.value = None;
        self.asset = None;
        self.value_bf = None;
        self.asset_bf = None;
    }
}

/// The blinding state of a single input or output.
///
/// An entry is either fully explicit, blinded with an unknown opening, or
/// blinded with a locally-known opening. Any other population of the clear
/// fields is a container invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlindingState {
    Explicit {
        value: u64,
        asset: AssetId,
    },
    Blinded,
    UnblindedLocal {
        value: u64,
        asset: AssetId,
        value_bf: ValueBlindingFactor,
        asset_bf: AssetBlindingFactor,
    },
}

/// A partially signed confidential transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pset {
    pub global: PsetGlobal,
    pub inputs: Vec<PsetInput>,
    pub outputs: Vec<PsetOutput>,
}

impl Pset {
    /// Create a container around an unsigned transaction.
    pub fn from_tx(tx: Transaction, fee: u64) -> Self {
        let inputs = vec![PsetInput::default(); tx.input.len()];
        let outputs = vec![PsetOutput::default(); tx.output.len()];
        Pset {
            global: PsetGlobal {
                tx,
                version: None,
                fee,
                unknown: BTreeMap::new(),
            },
            inputs,
            outputs,
        }
    }

    pub fn tx(&self) -> &Transaction {
        &self.global.tx
    }

    pub fn fee(&self) -> u64 {
        self.global.fee
    }

    /// Classify the blinding state of input `index`.
    pub fn input_blinding_state(&self, index: usize) -> Result<BlindingState> {
        let input = self
            .inputs
            .get(index)
            .ok_or_else(|| PsetError::InvalidInput(format!("no input {}", index)))?;
        let utxo = input.witness_utxo.as_ref().ok_or_else(|| {
            PsetError::InvalidInput(format!("input {} missing witness utxo", index))
        })?;

        entry_state(
            format!("input {}", index),
            utxo,
            input.clear_fields_populated(),
            input.value,
            input.asset,
            input.value_bf,
            input.asset_bf,
        )
    }

    /// Classify the blinding state of output `index`.
    pub fn output_blinding_state(&self, index: usize) -> Result<BlindingState> {
        let output = self
            .outputs
            .get(index)
            .ok_or_else(|| PsetError::InvalidInput(format!("no output {}", index)))?;
        let txout = self
            .global
            .tx
            .output
            .get(index)
            .ok_or_else(|| PsetError::InvalidInput(format!("no tx output {}", index)))?;

        entry_state(
            format!("output {}", index),
            txout,
            output.clear_fields_populated(),
            output.value,
            output.asset,
            output.value_bf,
            output.asset_bf,
        )
    }

    /// Reduce the container to the form any compliant decoder can parse:
    /// every locally-recovered clear field of a blinded entry is erased.
    /// Commitments, proofs, scripts and signatures are untouched, so the
    /// operation is idempotent.
    pub fn to_canonical_form(mut self) -> Result<Pset> {
        // Classify everything first; a malformed entry aborts the whole
        // redaction rather than producing a half-stripped container.
        for index in 0..self.inputs.len() {
            self.input_blinding_state(index)?;
        }
        for index in 0..self.outputs.len() {
            self.output_blinding_state(index)?;
        }

        for input in self.inputs.iter_mut() {
            if let Some(utxo) = &input.witness_utxo {
                if utxo.is_confidential() {
                    input.strip_clear_fields();
                }
            }
        }
        for (output, txout) in self.outputs.iter_mut().zip(self.global.tx.output.iter()) {
            if txout.is_confidential() {
                output.strip_clear_fields();
            }
        }

        Ok(self)
    }

    /// Check if every input carries final unlocking data.
    pub fn is_complete(&self) -> bool {
        self.inputs
            .iter()
            .all(|input| input.final_script_sig.is_some() || input.final_script_witness.is_some())
    }

    /// Extract the final transaction once the container is complete.
    pub fn extract_tx(&self) -> Result<Transaction> {
        if !self.is_complete() {
            return Err(PsetError::InvalidInput(
                "container is not complete".to_string(),
            ));
        }

        let mut tx = self.global.tx.clone();
        for (i, input) in self.inputs.iter().enumerate() {
            if let Some(ref script_sig) = input.final_script_sig {
                tx.input[i].script_sig = script_sig.clone();
            }
            if let Some(ref witness) = input.final_script_witness {
                tx.input[i].witness = witness.clone();
            }
        }
        Ok(tx)
    }

    /// Merge another container's metadata into this one. Both must wrap the
    /// same unsigned transaction; partial signature sets from independent
    /// signers accumulate.
    pub fn combine(&mut self, other: &Pset) -> Result<()> {
        if self.global.tx.txid()? != other.global.tx.txid()? {
            return Err(PsetError::InvalidInput(
                "cannot combine containers for different transactions".to_string(),
            ));
        }

        for (input, other_input) in self.inputs.iter_mut().zip(other.inputs.iter()) {
            if input.witness_utxo.is_none() {
                input.witness_utxo = other_input.witness_utxo.clone();
            }
            for (pubkey, sig) in &other_input.partial_sigs {
                input.partial_sigs.insert(*pubkey, sig.clone());
            }
            if input.sighash_type.is_none() {
                input.sighash_type = other_input.sighash_type;
            }
            for (pubkey, source) in &other_input.bip32_derivation {
                input.bip32_derivation.insert(*pubkey, source.clone());
            }
            if input.final_script_sig.is_none() {
                input.final_script_sig = other_input.final_script_sig.clone();
            }
            if input.final_script_witness.is_none() {
                input.final_script_witness = other_input.final_script_witness.clone();
            }
        }

        for (output, other_output) in self.outputs.iter_mut().zip(other.outputs.iter()) {
            if output.blinding_pubkey.is_none() {
                output.blinding_pubkey = other_output.blinding_pubkey;
            }
            for (pubkey, source) in &other_output.bip32_derivation {
                output.bip32_derivation.insert(*pubkey, source.clone());
            }
        }

        Ok(())
    }

    /// Validate the structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.len() != self.global.tx.input.len() {
            return Err(PsetError::InvalidInput(
                "input metadata count does not match transaction".to_string(),
            ));
        }
        if self.outputs.len() != self.global.tx.output.len() {
            return Err(PsetError::InvalidInput(
                "output metadata count does not match transaction".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize the container to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(PSET_MAGIC);
        buf.push(PSET_SEPARATOR);

        self.serialize_global(&mut buf)?;
        for input in &self.inputs {
            Self::serialize_input(input, &mut buf)?;
        }
        for output in &self.outputs {
            Self::serialize_output(output, &mut buf)?;
        }
        Ok(buf)
    }

    /// Deserialize a container from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != PSET_MAGIC {
            return Err(PsetError::Encode("invalid container magic".to_string()));
        }
        let mut separator = [0u8; 1];
        cursor.read_exact(&mut separator)?;
        if separator[0] != PSET_SEPARATOR {
            return Err(PsetError::Encode("invalid container separator".to_string()));
        }

        let global = Self::deserialize_global(&mut cursor)?;

        let mut inputs = Vec::with_capacity(global.tx.input.len());
        for _ in 0..global.tx.input.len() {
            inputs.push(Self::deserialize_input(&mut cursor)?);
        }
        let mut outputs = Vec::with_capacity(global.tx.output.len());
        for _ in 0..global.tx.output.len() {
            outputs.push(Self::deserialize_output(&mut cursor)?);
        }

        let pset = Pset {
            global,
            inputs,
            outputs,
        };
        pset.validate()?;
        Ok(pset)
    }

    fn serialize_global(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_key_value(
            buf,
            &[PSET_GLOBAL_TX],
            &self.global.tx.consensus_encode_to_vec()?,
        )?;
        write_key_value(buf, &[PSET_GLOBAL_FEE], &self.global.fee.to_le_bytes())?;
        if let Some(version) = self.global.version {
            write_key_value(buf, &[PSET_GLOBAL_VERSION], &version.to_le_bytes())?;
        }
        for (key, value) in &self.global.unknown {
            write_key_value(buf, key, value)?;
        }
        buf.push(0x00);
        Ok(())
    }

    fn serialize_input(input: &PsetInput, buf: &mut Vec<u8>) -> Result<()> {
        if let Some(ref utxo) = input.witness_utxo {
            let mut encoded = utxo.consensus_encode_to_vec()?;
            // The utxo's own proofs ride along so rewinding survives a
            // round-trip through the wire form.
            utxo.witness.consensus_encode(&mut encoded)?;
            write_key_value(buf, &[PSET_IN_WITNESS_UTXO], &encoded)?;
        }
        for (pubkey, sig) in &input.partial_sigs {
            let mut key = vec![PSET_IN_PARTIAL_SIG];
            key.extend_from_slice(&pubkey.serialize());
            write_key_value(buf, &key, sig)?;
        }
        if let Some(sighash_type) = input.sighash_type {
            write_key_value(buf, &[PSET_IN_SIGHASH_TYPE], &sighash_type.to_le_bytes())?;
        }
        for (pubkey, source) in &input.bip32_derivation {
            let mut key = vec![PSET_IN_BIP32_DERIVATION];
            key.extend_from_slice(&pubkey.serialize());
            write_key_value(buf, &key, &encode_key_source(source))?;
        }
        if let Some(ref script) = input.final_script_sig {
            write_key_value(buf, &[PSET_IN_FINAL_SCRIPTSIG], script.as_bytes())?;
        }
        if let Some(ref witness) = input.final_script_witness {
            write_key_value(buf, &[PSET_IN_FINAL_SCRIPTWITNESS], &encode_witness(witness)?)?;
        }
        if let Some(value) = input.value {
            write_key_value(buf, &[PSET_IN_EXPLICIT_VALUE], &value.to_le_bytes())?;
        }
        if let Some(ref asset) = input.asset {
            write_key_value(buf, &[PSET_IN_EXPLICIT_ASSET], asset.as_bytes())?;
        }
        if let Some(ref bf) = input.value_bf {
            write_key_value(buf, &[PSET_IN_VALUE_BLINDER], bf.as_bytes())?;
        }
        if let Some(ref bf) = input.asset_bf {
            write_key_value(buf, &[PSET_IN_ASSET_BLINDER], bf.as_bytes())?;
        }
        for (key, value) in &input.unknown {
            write_key_value(buf, key, value)?;
        }
        buf.push(0x00);
        Ok(())
    }

    fn serialize_output(output: &PsetOutput, buf: &mut Vec<u8>) -> Result<()> {
        if let Some(ref pubkey) = output.blinding_pubkey {
            write_key_value(buf, &[PSET_OUT_BLINDING_PUBKEY], &pubkey.serialize())?;
        }
        for (pubkey, source) in &output.bip32_derivation {
            let mut key = vec![PSET_OUT_BIP32_DERIVATION];
            key.extend_from_slice(&pubkey.serialize());
            write_key_value(buf, &key, &encode_key_source(source))?;
        }
        if let Some(value) = output.value {
            write_key_value(buf, &[PSET_OUT_EXPLICIT_VALUE], &value.to_le_bytes())?;
        }
        if let Some(ref asset) = output.asset {
            write_key_value(buf, &[PSET_OUT_EXPLICIT_ASSET], asset.as_bytes())?;
        }
        if let Some(ref bf) = output.value_bf {
            write_key_value(buf, &[PSET_OUT_VALUE_BLINDER], bf.as_bytes())?;
        }
        if let Some(ref bf) = output.asset_bf {
            write_key_value(buf, &[PSET_OUT_ASSET_BLINDER], bf.as_bytes())?;
        }
        for (key, value) in &output.unknown {
            write_key_value(buf, key, value)?;
        }
        buf.push(0x00);
        Ok(())
    }

    fn deserialize_global(cursor: &mut Cursor<&[u8]>) -> Result<PsetGlobal> {
        let mut tx = None;
        let mut version = None;
        let mut fee = 0u64;
        let mut unknown = BTreeMap::new();

        while let Some((key, value)) = read_key_value(cursor)? {
            match key[0] {
                PSET_GLOBAL_TX if key.len() == 1 => {
                    let mut tx_cursor = Cursor::new(value.as_slice());
                    let decoded = Transaction::consensus_decode(&mut tx_cursor)?;
                    tx = Some(decoded);
                }
                PSET_GLOBAL_FEE if key.len() == 1 => {
                    fee = u64::from_le_bytes(fixed_bytes(&value)?);
                }
                PSET_GLOBAL_VERSION if key.len() == 1 => {
                    version = Some(u32::from_le_bytes(fixed_bytes(&value)?));
                }
                _ => {
                    unknown.insert(key, value);
                }
            }
        }

        Ok(PsetGlobal {
            tx: tx.ok_or_else(|| {
                PsetError::Encode("container missing unsigned transaction".to_string())
            })?,
            version,
            fee,
            unknown,
        })
    }

    fn deserialize_input(cursor: &mut Cursor<&[u8]>) -> Result<PsetInput> {
        let mut input = PsetInput::default();

        while let Some((key, value)) = read_key_value(cursor)? {
            match key[0] {
                PSET_IN_WITNESS_UTXO if key.len() == 1 => {
                    let mut utxo_cursor = Cursor::new(value.as_slice());
                    let mut utxo = TxOut::consensus_decode(&mut utxo_cursor)?;
                    utxo.witness = super::transaction::TxOutWitness::consensus_decode(
                        &mut utxo_cursor,
                    )?;
                    input.witness_utxo = Some(utxo);
                }
                PSET_IN_PARTIAL_SIG if key.len() == 34 => {
                    input.partial_sigs.insert(pubkey_from_key(&key)?, value);
                }
                PSET_IN_SIGHASH_TYPE if key.len() == 1 => {
                    input.sighash_type = Some(u32::from_le_bytes(fixed_bytes(&value)?));
                }
                PSET_IN_BIP32_DERIVATION if key.len() == 34 => {
                    input
                        .bip32_derivation
                        .insert(pubkey_from_key(&key)?, decode_key_source(&value)?);
                }
                PSET_IN_FINAL_SCRIPTSIG if key.len() == 1 => {
                    input.final_script_sig = Some(Script::from_bytes(value));
                }
                PSET_IN_FINAL_SCRIPTWITNESS if key.len() == 1 => {
                    input.final_script_witness = Some(decode_witness(&value)?);
                }
                PSET_IN_EXPLICIT_VALUE if key.len() == 1 => {
                    input.value = Some(u64::from_le_bytes(fixed_bytes(&value)?));
                }
                PSET_IN_EXPLICIT_ASSET if key.len() == 1 => {
                    input.asset = Some(AssetId::new(fixed_bytes(&value)?));
                }
                PSET_IN_VALUE_BLINDER if key.len() == 1 => {
                    input.value_bf = Some(ValueBlindingFactor::new(fixed_bytes(&value)?));
                }
                PSET_IN_ASSET_BLINDER if key.len() == 1 => {
                    input.asset_bf = Some(AssetBlindingFactor::new(fixed_bytes(&value)?));
                }
                _ => {
                    input.unknown.insert(key, value);
                }
            }
        }

        Ok(input)
    }

    fn deserialize_output(cursor: &mut Cursor<&[u8]>) -> Result<PsetOutput> {
        let mut output = PsetOutput::default();

        while let Some((key, value)) = read_key_value(cursor)? {
            match key[0] {
                PSET_OUT_BLINDING_PUBKEY if key.len() == 1 => {
                    output.blinding_pubkey = Some(PublicKey::from_slice(&value)?);
                }
                PSET_OUT_BIP32_DERIVATION if key.len() == 34 => {
                    output
                        .bip32_derivation
                        .insert(pubkey_from_key(&key)?, decode_key_source(&value)?);
                }
                PSET_OUT_EXPLICIT_VALUE if key.len() == 1 => {
                    output.value = Some(u64::from_le_bytes(fixed_bytes(&value)?));
                }
                PSET_OUT_EXPLICIT_ASSET if key.len() == 1 => {
                    output.asset = Some(AssetId::new(fixed_bytes(&value)?));
                }
                PSET_OUT_VALUE_BLINDER if key.len() == 1 => {
                    output.value_bf = Some(ValueBlindingFactor::new(fixed_bytes(&value)?));
                }
                PSET_OUT_ASSET_BLINDER if key.len() == 1 => {
                    output.asset_bf = Some(AssetBlindingFactor::new(fixed_bytes(&value)?));
                }
                _ => {
                    output.unknown.insert(key, value);
                }
            }
        }

        Ok(output)
    }
}

impl fmt::Display for Pset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.serialize().map_err(|_| fmt::Error)?;
        write!(f, "{}", BASE64.encode(bytes))
    }
}

impl FromStr for Pset {
    type Err = PsetError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| PsetError::Encode(format!("invalid base64: {}", e)))?;
        Pset::deserialize(&bytes)
    }
}

fn entry_state(
    entry: String,
    txout: &TxOut,
    populated: usize,
    value: Option<u64>,
    asset: Option<AssetId>,
    value_bf: Option<ValueBlindingFactor>,
    asset_bf: Option<AssetBlindingFactor>,
) -> Result<BlindingState> {
    if txout.is_explicit() {
        if populated != 0 {
            return Err(PsetError::InconsistentBlindingState { entry });
        }
        let value = txout.value.explicit_value().expect("explicit txout");
        let asset = *txout.asset.explicit_asset().expect("explicit txout");
        return Ok(BlindingState::Explicit { value, asset });
    }

    match populated {
        0 => Ok(BlindingState::Blinded),
        4 => Ok(BlindingState::UnblindedLocal {
            value: value.expect("populated"),
            asset: asset.expect("populated"),
            value_bf: value_bf.expect("populated"),
            asset_bf: asset_bf.expect("populated"),
        }),
        _ => Err(PsetError::InconsistentBlindingState { entry }),
    }
}

fn write_key_value(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) -> Result<()> {
    write_varint(buf, key.len() as u64)?;
    buf.extend_from_slice(key);
    write_varint(buf, value.len() as u64)?;
    buf.extend_from_slice(value);
    Ok(())
}

fn read_key_value(cursor: &mut Cursor<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let key_len = read_varint(cursor)?;
    if key_len == 0 {
        return Ok(None);
    }
    let mut key = vec![0u8; key_len as usize];
    cursor.read_exact(&mut key)?;

    let value_len = read_varint(cursor)?;
    let mut value = vec![0u8; value_len as usize];
    cursor.read_exact(&mut value)?;

    Ok(Some((key, value)))
}

fn pubkey_from_key(key: &[u8]) -> Result<PublicKey> {
    Ok(PublicKey::from_slice(&key[1..34])?)
}

fn fixed_bytes<const N: usize>(value: &[u8]) -> Result<[u8; N]> {
    value
        .try_into()
        .map_err(|_| PsetError::Encode(format!("expected {} byte field, got {}", N, value.len())))
}

fn encode_key_source(source: &KeySource) -> Vec<u8> {
    let mut value = Vec::with_capacity(4 + source.path.path().len() * 4);
    value.extend_from_slice(source.fingerprint.as_bytes());
    for &component in source.path.path() {
        value.extend_from_slice(&component.to_le_bytes());
    }
    value
}

fn decode_key_source(value: &[u8]) -> Result<KeySource> {
    if value.len() < 4 || (value.len() - 4) % 4 != 0 {
        return Err(PsetError::Encode("invalid key source length".to_string()));
    }
    let mut fingerprint = [0u8; 4];
    fingerprint.copy_from_slice(&value[0..4]);

    let path = value[4..]
        .chunks(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(KeySource {
        fingerprint: Fingerprint(fingerprint),
        path: DerivationPath::new(path),
    })
}

fn encode_witness(witness: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    write_varint(&mut data, witness.len() as u64)?;
    for item in witness {
        write_varint(&mut data, item.len() as u64)?;
        data.extend_from_slice(item);
    }
    Ok(data)
}

fn decode_witness(value: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut cursor = Cursor::new(value);
    let count = read_varint(&mut cursor)?;
    let mut witness = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let item_len = read_varint(&mut cursor)?;
        let mut item = vec![0u8; item_len as usize];
        cursor.read_exact(&mut item)?;
        witness.push(item);
    }
    Ok(witness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::confidential::{
        ConfidentialAsset, ConfidentialNonce, ConfidentialValue, RangeProof, SurjectionProof,
    };
    use crate::primitives::transaction::{OutPoint, TxIn, TxOutWitness};

    fn explicit_txout(value: u64) -> TxOut {
        TxOut::explicit(
            AssetId::new([0x11u8; 32]),
            value,
            Script::new_p2wpkh(&[0x22u8; 20]),
        )
    }

    fn confidential_txout() -> TxOut {
        TxOut {
            asset: ConfidentialAsset::Confidential([0x02u8; 33]),
            value: ConfidentialValue::Confidential([0x02u8; 33]),
            nonce: ConfidentialNonce::Confidential([0x02u8; 33]),
            script_pubkey: Script::new_p2wpkh(&[0x22u8; 20]),
            witness: TxOutWitness::new(
                SurjectionProof::new(vec![1, 2]),
                RangeProof::new(vec![3, 4, 5]),
            ),
        }
    }

    fn sample_pset() -> Pset {
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn::new(OutPoint::new([1u8; 32], 0))],
            output: vec![explicit_txout(9_000), confidential_txout()],
        };
        let mut pset = Pset::from_tx(tx, 1_000);
        pset.inputs[0].witness_utxo = Some(confidential_txout());
        pset
    }

    #[test]
    fn test_container_roundtrip() {
        let mut pset = sample_pset();
        pset.outputs[1].value = Some(5_000);
        pset.outputs[1].asset = Some(AssetId::new([0x11u8; 32]));
        pset.outputs[1].value_bf = Some(ValueBlindingFactor::new([6u8; 32]));
        pset.outputs[1].asset_bf = Some(AssetBlindingFactor::new([7u8; 32]));

        let bytes = pset.serialize().unwrap();
        let decoded = Pset::deserialize(&bytes).unwrap();
        assert_eq!(pset, decoded);

        // String (base64) form round-trips too
        let string = pset.to_string();
        let decoded = Pset::from_str(&string).unwrap();
        assert_eq!(pset, decoded);
    }

    #[test]
    fn test_blinding_state_classification() {
        let mut pset = sample_pset();

        assert_eq!(
            pset.output_blinding_state(0).unwrap(),
            BlindingState::Explicit {
                value: 9_000,
                asset: AssetId::new([0x11u8; 32])
            }
        );
        assert_eq!(pset.output_blinding_state(1).unwrap(), BlindingState::Blinded);
        assert_eq!(pset.input_blinding_state(0).unwrap(), BlindingState::Blinded);

        pset.outputs[1].value = Some(5_000);
        pset.outputs[1].asset = Some(AssetId::new([0x11u8; 32]));
        pset.outputs[1].value_bf = Some(ValueBlindingFactor::new([6u8; 32]));
        pset.outputs[1].asset_bf = Some(AssetBlindingFactor::new([7u8; 32]));
        assert!(matches!(
            pset.output_blinding_state(1).unwrap(),
            BlindingState::UnblindedLocal { value: 5_000, .. }
        ));
    }

    #[test]
    fn test_partial_population_is_inconsistent() {
        let mut pset = sample_pset();
        pset.outputs[1].value = Some(5_000);
        pset.outputs[1].asset = Some(AssetId::new([0x11u8; 32]));

        let err = pset.output_blinding_state(1);
        assert!(matches!(
            err,
            Err(PsetError::InconsistentBlindingState { .. })
        ));

        // Canonicalization surfaces the same violation.
        let err = pset.to_canonical_form();
        assert!(matches!(
            err,
            Err(PsetError::InconsistentBlindingState { .. })
        ));
    }

    #[test]
    fn test_canonical_form_strips_and_is_idempotent() {
        let mut pset = sample_pset();
        pset.inputs[0].value = Some(10_000);
        pset.inputs[0].asset = Some(AssetId::new([0x11u8; 32]));
        pset.inputs[0].value_bf = Some(ValueBlindingFactor::new([6u8; 32]));
        pset.inputs[0].asset_bf = Some(AssetBlindingFactor::new([7u8; 32]));
        pset.outputs[1].value = Some(5_000);
        pset.outputs[1].asset = Some(AssetId::new([0x11u8; 32]));
        pset.outputs[1].value_bf = Some(ValueBlindingFactor::new([8u8; 32]));
        pset.outputs[1].asset_bf = Some(AssetBlindingFactor::new([9u8; 32]));

        let canonical = pset.clone().to_canonical_form().unwrap();
        assert_eq!(canonical.inputs[0].value, None);
        assert_eq!(canonical.outputs[1].value, None);
        // Commitments and proofs survive untouched
        assert_eq!(canonical.global.tx.output[1], pset.global.tx.output[1]);
        assert_eq!(
            canonical.inputs[0].witness_utxo,
            pset.inputs[0].witness_utxo
        );

        let twice = canonical.clone().to_canonical_form().unwrap();
        assert_eq!(canonical, twice);
    }

    #[test]
    fn test_combine_accumulates_signatures() {
        let secp = secp256k1::Secp256k1::new();
        let key1 = secp256k1::SecretKey::from_slice(&[1u8; 32])
            .unwrap()
            .public_key(&secp);
        let key2 = secp256k1::SecretKey::from_slice(&[2u8; 32])
            .unwrap()
            .public_key(&secp);

        let mut a = sample_pset();
        let mut b = sample_pset();
        a.inputs[0].partial_sigs.insert(key1, vec![0x30, 0x01]);
        b.inputs[0].partial_sigs.insert(key2, vec![0x30, 0x02]);

        a.combine(&b).unwrap();
        assert_eq!(a.inputs[0].partial_sigs.len(), 2);

        let mut different = sample_pset();
        different.global.tx.lock_time = 99;
        assert!(a.combine(&different).is_err());
    }

    #[test]
    fn test_extract_requires_completion() {
        let mut pset = sample_pset();
        assert!(pset.extract_tx().is_err());

        pset.inputs[0].final_script_witness = Some(vec![vec![0x30], vec![0x02; 33]]);
        let tx = pset.extract_tx().unwrap();
        assert_eq!(tx.input[0].witness.len(), 2);
    }
}
