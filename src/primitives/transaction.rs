//! Confidential transaction data structures and their wire codec.

use super::confidential::{
    AssetId, ConfidentialAsset, ConfidentialNonce, ConfidentialValue, RangeProof, SurjectionProof,
};
use super::encode::{read_varint, write_varint, Decodable, Encodable};
use super::hash::{sha256d, Hash256};
use super::script::Script;
use crate::{PsetError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        OutPoint { txid, vout }
    }
}

impl Encodable for OutPoint {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = self.txid.consensus_encode(writer)?;
        written += self.vout.consensus_encode(writer)?;
        Ok(written)
    }
}

impl Decodable for OutPoint {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let txid = <[u8; 32]>::consensus_decode(reader)?;
        let vout = u32::consensus_decode(reader)?;
        Ok(OutPoint { txid, vout })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Input witness stack; populated only once finalized.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn new(previous_output: OutPoint) -> Self {
        TxIn {
            previous_output,
            script_sig: Script::new(),
            sequence: 0xffffffff,
            witness: Vec::new(),
        }
    }

    pub fn has_witness(&self) -> bool {
        !self.witness.is_empty()
    }
}

impl Encodable for TxIn {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = self.previous_output.consensus_encode(writer)?;
        written += self.script_sig.consensus_encode(writer)?;
        written += self.sequence.consensus_encode(writer)?;
        Ok(written)
    }
}

impl Decodable for TxIn {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let previous_output = OutPoint::consensus_decode(reader)?;
        let script_sig = Script::consensus_decode(reader)?;
        let sequence = u32::consensus_decode(reader)?;
        Ok(TxIn {
            previous_output,
            script_sig,
            sequence,
            witness: Vec::new(),
        })
    }
}

/// Witness data for a confidential transaction output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOutWitness {
    pub surjection_proof: SurjectionProof,
    pub range_proof: RangeProof,
}

impl TxOutWitness {
    pub fn new(surjection_proof: SurjectionProof, range_proof: RangeProof) -> Self {
        TxOutWitness {
            surjection_proof,
            range_proof,
        }
    }

    pub fn empty() -> Self {
        TxOutWitness::default()
    }

    pub fn is_empty(&self) -> bool {
        self.surjection_proof.is_empty() && self.range_proof.is_empty()
    }
}

impl Encodable for TxOutWitness {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = self.surjection_proof.consensus_encode(writer)?;
        written += self.range_proof.consensus_encode(writer)?;
        Ok(written)
    }
}

impl Decodable for TxOutWitness {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let surjection_proof = SurjectionProof::consensus_decode(reader)?;
        let range_proof = RangeProof::consensus_decode(reader)?;
        Ok(TxOutWitness {
            surjection_proof,
            range_proof,
        })
    }
}

/// A confidential transaction output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub asset: ConfidentialAsset,
    pub value: ConfidentialValue,
    pub nonce: ConfidentialNonce,
    pub script_pubkey: Script,
    pub witness: TxOutWitness,
}

impl TxOut {
    /// Create an explicit (unblinded) output.
    pub fn explicit(asset_id: AssetId, value: u64, script_pubkey: Script) -> Self {
        TxOut {
            asset: ConfidentialAsset::Explicit(asset_id),
            value: ConfidentialValue::Explicit(value),
            nonce: ConfidentialNonce::Null,
            script_pubkey,
            witness: TxOutWitness::empty(),
        }
    }

    pub fn is_explicit(&self) -> bool {
        self.asset.is_explicit() && self.value.is_explicit()
    }

    pub fn is_confidential(&self) -> bool {
        !self.is_explicit()
    }
}

impl Encodable for TxOut {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = self.asset.consensus_encode(writer)?;
        written += self.value.consensus_encode(writer)?;
        written += self.nonce.consensus_encode(writer)?;
        written += self.script_pubkey.consensus_encode(writer)?;
        Ok(written)
    }
}

impl Decodable for TxOut {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let asset = ConfidentialAsset::consensus_decode(reader)?;
        let value = ConfidentialValue::consensus_decode(reader)?;
        let nonce = ConfidentialNonce::consensus_decode(reader)?;
        let script_pubkey = Script::consensus_decode(reader)?;

        Ok(TxOut {
            asset,
            value,
            nonce,
            script_pubkey,
            // Output witness travels in the witness section
            witness: TxOutWitness::empty(),
        })
    }
}

/// A confidential transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub lock_time: u32,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            version: 2,
            lock_time: 0,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn has_witness(&self) -> bool {
        self.input.iter().any(|input| input.has_witness())
            || self.output.iter().any(|output| !output.witness.is_empty())
    }

    /// Transaction id: double-SHA256 of the witness-stripped encoding.
    pub fn txid(&self) -> Result<Hash256> {
        Ok(sha256d(&self.encode_without_witness()?))
    }

    /// Witness transaction id over the full encoding.
    pub fn wtxid(&self) -> Result<Hash256> {
        if self.has_witness() {
            Ok(sha256d(&self.consensus_encode_to_vec()?))
        } else {
            self.txid()
        }
    }

    /// Encode without any input or output witness data.
    pub fn encode_without_witness(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.version.consensus_encode(&mut buf)?;
        self.input.consensus_encode(&mut buf)?;
        self.output.consensus_encode(&mut buf)?;
        self.lock_time.consensus_encode(&mut buf)?;
        Ok(buf)
    }

    fn encode_input_witness<W: Write>(witness: &[Vec<u8>], writer: &mut W) -> Result<usize> {
        let mut written = write_varint(writer, witness.len() as u64)?;
        for item in witness {
            written += write_varint(writer, item.len() as u64)?;
            written += writer.write(item)?;
        }
        Ok(written)
    }

    fn decode_input_witness<R: Read>(reader: &mut R) -> Result<Vec<Vec<u8>>> {
        let len = read_varint(reader)?;
        let mut witness = Vec::with_capacity(len.min(64) as usize);
        for _ in 0..len {
            let item_len = read_varint(reader)?;
            let mut item = vec![0u8; item_len as usize];
            reader.read_exact(&mut item)?;
            witness.push(item);
        }
        Ok(witness)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Encodable for Transaction {
    fn consensus_encode<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut written = self.version.consensus_encode(writer)?;

        if self.has_witness() {
            // marker (0x00) + flag (0x01), BIP141-style
            written += writer.write(&[0x00, 0x01])?;
        }

        written += self.input.consensus_encode(writer)?;
        written += self.output.consensus_encode(writer)?;

        if self.has_witness() {
            for input in &self.input {
                written += Self::encode_input_witness(&input.witness, writer)?;
            }
            for output in &self.output {
                written += output.witness.consensus_encode(writer)?;
            }
        }

        written += self.lock_time.consensus_encode(writer)?;
        Ok(written)
    }
}

impl Decodable for Transaction {
    fn consensus_decode<R: Read>(reader: &mut R) -> Result<Self> {
        let version = i32::consensus_decode(reader)?;

        let mut first_byte = [0u8; 1];
        reader.read_exact(&mut first_byte)?;

        let (mut input, has_witness) = if first_byte[0] == 0x00 {
            let mut flag = [0u8; 1];
            reader.read_exact(&mut flag)?;
            if flag[0] != 0x01 {
                return Err(PsetError::Encode("invalid witness flag".to_string()));
            }
            (Vec::<TxIn>::consensus_decode(reader)?, true)
        } else {
            // first_byte starts the input-count varint of a legacy encoding
            let input_count = match first_byte[0] {
                n if n < 0xfd => n as u64,
                0xfd => {
                    let mut buf = [0u8; 2];
                    reader.read_exact(&mut buf)?;
                    u16::from_le_bytes(buf) as u64
                }
                0xfe => {
                    let mut buf = [0u8; 4];
                    reader.read_exact(&mut buf)?;
                    u32::from_le_bytes(buf) as u64
                }
                _ => {
                    let mut buf = [0u8; 8];
                    reader.read_exact(&mut buf)?;
                    u64::from_le_bytes(buf)
                }
            };

            let mut input = Vec::with_capacity(input_count.min(64) as usize);
            for _ in 0..input_count {
                input.push(TxIn::consensus_decode(reader)?);
            }
            (input, false)
        };

        let mut output = Vec::<TxOut>::consensus_decode(reader)?;

        if has_witness {
            for input in &mut input {
                input.witness = Self::decode_input_witness(reader)?;
            }
            for output in &mut output {
                output.witness = TxOutWitness::consensus_decode(reader)?;
            }
        }

        let lock_time = u32::consensus_decode(reader)?;

        Ok(Transaction {
            version,
            lock_time,
            input,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn::new(OutPoint::new([1u8; 32], 0))],
            output: vec![TxOut::explicit(
                AssetId::new([0x11u8; 32]),
                10_000_000,
                Script::new_p2wpkh(&[0x22u8; 20]),
            )],
        }
    }

    #[test]
    fn test_legacy_roundtrip() {
        let tx = sample_tx();
        assert!(!tx.has_witness());
        let bytes = tx.consensus_encode_to_vec().unwrap();
        let decoded = Transaction::consensus_decode_from_slice(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_witness_roundtrip() {
        let mut tx = sample_tx();
        tx.input[0].witness = vec![vec![0x30, 0x45], vec![0x02; 33]];
        tx.output[0].witness = TxOutWitness::new(
            SurjectionProof::new(vec![1, 2, 3]),
            RangeProof::new(vec![4, 5, 6, 7]),
        );
        assert!(tx.has_witness());

        let bytes = tx.consensus_encode_to_vec().unwrap();
        let decoded = Transaction::consensus_decode_from_slice(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_txid_ignores_witness() {
        let tx = sample_tx();
        let mut with_witness = tx.clone();
        with_witness.input[0].witness = vec![vec![0xaa]];

        assert_eq!(tx.txid().unwrap(), with_witness.txid().unwrap());
        assert_ne!(with_witness.txid().unwrap(), with_witness.wtxid().unwrap());
    }
}
