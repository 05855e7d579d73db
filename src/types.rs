//! Crate configuration and shared parameter types.

use crate::primitives::confidential::AssetId;
use crate::primitives::script::Script;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// Directory for diagnostic container dumps. If None, nothing is
    /// written to disk.
    #[serde(rename = "datadir")]
    pub data_dir: Option<PathBuf>,
    /// File name prefix for the dumps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_prefix: Option<String>,
}

/// Network parameters the pipeline needs: extended-key version bytes and the
/// policy (fee) asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Network {
    /// Liquid mainnet.
    Liquid,
    /// Liquid testnet.
    LiquidTestnet,
    /// Local Elements regtest chain.
    ElementsRegtest,
}

// Liquid reuses the Bitcoin extended-key serialization.
const MAINNET_PRIVATE_VERSION: [u8; 4] = [0x04, 0x88, 0xAD, 0xE4]; // xprv
const MAINNET_PUBLIC_VERSION: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E]; // xpub
const TESTNET_PRIVATE_VERSION: [u8; 4] = [0x04, 0x35, 0x83, 0x94]; // tprv
const TESTNET_PUBLIC_VERSION: [u8; 4] = [0x04, 0x35, 0x87, 0xCF]; // tpub

impl Network {
    pub fn private_version_bytes(&self) -> [u8; 4] {
        match self {
            Network::Liquid => MAINNET_PRIVATE_VERSION,
            Network::LiquidTestnet | Network::ElementsRegtest => TESTNET_PRIVATE_VERSION,
        }
    }

    pub fn public_version_bytes(&self) -> [u8; 4] {
        match self {
            Network::Liquid => MAINNET_PUBLIC_VERSION,
            Network::LiquidTestnet | Network::ElementsRegtest => TESTNET_PUBLIC_VERSION,
        }
    }

    /// The asset fees are paid in.
    pub fn policy_asset(&self) -> AssetId {
        match self {
            // L-BTC on Liquid mainnet
            Network::Liquid => AssetId::new([
                0x6f, 0x0e, 0x7e, 0x58, 0x94, 0x1b, 0xc2, 0x20, 0x8e, 0xb6, 0xcc, 0x21, 0xb3,
                0x42, 0xc3, 0xea, 0x4f, 0x9a, 0x5a, 0x0f, 0x1b, 0x2a, 0x0b, 0x82, 0x2f, 0x9c,
                0x4e, 0x64, 0x8f, 0x80, 0xc8, 0x14,
            ]),
            // tL-BTC
            Network::LiquidTestnet => AssetId::new([
                0x49, 0x9a, 0x81, 0x85, 0x45, 0xf6, 0xba, 0xe3, 0x9f, 0xc0, 0x3b, 0x63, 0x7f,
                0x2a, 0x4e, 0x1e, 0x64, 0xe5, 0x90, 0xca, 0xc1, 0xbc, 0x3a, 0x6f, 0x6d, 0x71,
                0xaa, 0x44, 0x43, 0x65, 0x4c, 0x14,
            ]),
            // Regtest bitcoin asset as created by a fresh elementsd chain
            Network::ElementsRegtest => AssetId::new([
                0x5a, 0xc9, 0xf6, 0x5c, 0x0e, 0xfc, 0xc4, 0x77, 0x5e, 0x0b, 0xae, 0xc4, 0xec,
                0x03, 0xab, 0xdd, 0xe2, 0x24, 0x73, 0xcd, 0x3c, 0xf3, 0x3c, 0x04, 0x19, 0xca,
                0x29, 0x0e, 0x07, 0x51, 0xb2, 0x25,
            ]),
        }
    }
}

/// One requested payment: where the funds go and under which key the output
/// is to be blinded. A recipient without a blinding key receives an explicit
/// output.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub script_pubkey: Script,
    pub blinding_pubkey: Option<PublicKey>,
    pub asset: AssetId,
    pub amount: u64,
}

/// A funding request handed to the ledger node: desired outputs plus a
/// fee-rate hint in sat/vb.
#[derive(Debug, Clone)]
pub struct FundingRequest {
    pub recipients: Vec<Recipient>,
    pub fee_rate: f64,
}

/// Whether the pipeline blinds the container locally or delegates to the
/// node wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlindingMode {
    #[default]
    Local,
    Delegated,
}
