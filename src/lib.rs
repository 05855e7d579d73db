//! # pset-rs
//!
//! A pure Rust confidential-transaction construction pipeline for
//! Elements/Liquid-style UTXO ledgers.
//!
//! The crate takes an unblinded, fee-estimated transaction skeleton and
//! carries it through key derivation, value/asset blinding, canonical
//! redaction, rangeproof-aware signing and two-tier finalization before
//! broadcast. Node process management, coin selection and wallet
//! bookkeeping are deliberately out of scope: the ledger node is an
//! external collaborator behind the narrow [`rpc::LedgerNode`] interface.
//!
//! ## Pipeline
//!
//! ```text
//! fund -> unblind -> blind -> sign -> finalize -> broadcast
//! ```
//!
//! Every stage consumes its container by value and returns the next state;
//! no stage holds a reference after handing the container on, so separate
//! transactions can run on separate threads without any shared state.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pset_rs::{init, Config, Network, Pipeline};
//! use pset_rs::rpc::ElementsRpc;
//! use pset_rs::types::{FundingRequest, Recipient};
//! use pset_rs::bip39::mnemonic_to_seed;
//!
//! fn main() -> pset_rs::Result<()> {
//!     let config = Config::default();
//!     init(&config)?;
//!
//!     let node = ElementsRpc::new("http://127.0.0.1:18555", "liquid", "secret")
//!         .wallet("wallet");
//!     let pipeline = Pipeline::new(node, Network::ElementsRegtest, config);
//!
//!     let seed = mnemonic_to_seed("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about", None)?;
//!     let request = FundingRequest {
//!         recipients: vec![/* ... */],
//!         fee_rate: 0.3,
//!     };
//!     let txid = pipeline.send(&request, seed.as_bytes())?;
//!     println!("broadcast {}", txid);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`primitives`]: confidential transaction, container and key primitives
//! - [`slip77`]: deterministic blinding key derivation
//! - [`blind`]: blinding and proof rewinding
//! - [`signer`]: rangeproof-aware sighash and signing
//! - [`finalize`]: delegated/self-assembled finalization
//! - [`rpc`]: the ledger-node collaborator interface
//! - [`pipeline`]: the orchestrator
//!
//! All public APIs return [`Result<T, PsetError>`](error::PsetError); the
//! per-stage failure modes are documented on the error variants.

pub mod error;
pub mod types;
pub mod primitives;
pub mod bip39;
pub mod slip77;
pub mod blind;
pub mod signer;
pub mod finalize;
pub mod rpc;
pub mod pipeline;

pub use error::{PsetError, Result};
pub use finalize::FinalizationResult;
pub use pipeline::Pipeline;
pub use primitives::pset::Pset;
pub use types::{Config, Network};

use std::fs;

/// Initialize the library: set up logging and create the dump directory if
/// one is configured. Safe to call more than once.
pub fn init(config: &Config) -> Result<()> {
    // It's ok if this fails, it just means logging was already initialized.
    let _ = env_logger::try_init();

    if let Some(data_dir) = &config.data_dir {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir)?;
            log::info!("created data directory at {:?}", data_dir);
        }
    }

    log::debug!("initialized with config: {:?}", config);
    Ok(())
}
