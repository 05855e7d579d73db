//! End-to-end orchestration of the construction pipeline.
//!
//! Stages run strictly forward, each consuming the container by value:
//! fund, unblind, blind, sign, finalize, broadcast. The orchestrator owns
//! nothing but the node handle and the wallet seed passed per call; a
//! cancelled pipeline simply drops its container.

use crate::blind::Blinder;
use crate::finalize::{finalize, FinalizationResult};
use crate::primitives::bip32::ExtendedPrivateKey;
use crate::rpc::LedgerNode;
use crate::signer::{SighashFlags, Signer};
use crate::slip77::MasterBlindingKey;
use crate::types::{BlindingMode, Config, FundingRequest, Network};
use crate::{PsetError, Result};
use rand::{CryptoRng, RngCore};
use std::fs;
use std::path::PathBuf;

/// Pipeline orchestrator bound to one ledger node.
pub struct Pipeline<N: LedgerNode> {
    node: N,
    network: Network,
    config: Config,
    blinding_mode: BlindingMode,
}

impl<N: LedgerNode> Pipeline<N> {
    pub fn new(node: N, network: Network, config: Config) -> Self {
        Pipeline {
            node,
            network,
            config,
            blinding_mode: BlindingMode::default(),
        }
    }

    pub fn with_blinding_mode(mut self, mode: BlindingMode) -> Self {
        self.blinding_mode = mode;
        self
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    /// Run the construction pipeline up to finalization: fund the request,
    /// recover input openings, blind, sign and finalize. Broadcast is left
    /// to the caller so the finalized bytes can be inspected first.
    pub fn build_and_sign(
        &self,
        request: &FundingRequest,
        seed: &[u8],
    ) -> Result<FinalizationResult> {
        self.build_and_sign_with_entropy(request, seed, &mut rand::thread_rng())
    }

    /// Same as [`build_and_sign`](Self::build_and_sign) with an explicit
    /// entropy source, so a blinding run can be reproduced in tests.
    pub fn build_and_sign_with_entropy<R: RngCore + CryptoRng>(
        &self,
        request: &FundingRequest,
        seed: &[u8],
        rng: &mut R,
    ) -> Result<FinalizationResult> {
        let root = ExtendedPrivateKey::new_master_from_seed(seed, self.network)?;
        let mbk = MasterBlindingKey::from_seed(seed);
        let blinder = Blinder::new(self.network);

        let pset = self.node.create_funded_pset(request)?;
        self.dump("unblinded.pset", pset.to_string().as_bytes())?;

        // Recover the openings of our own inputs; foreign entries stay as
        // they are.
        let pset = blinder.unblind(pset, &mbk)?;

        let pset = match self.blinding_mode {
            BlindingMode::Local => blinder.blind(pset, rng)?,
            BlindingMode::Delegated => {
                let blinded = self.node.process_pset(&pset.clone().to_canonical_form()?)?;
                // Rewind what the node blinded so the full container keeps
                // its local clear fields.
                blinder.unblind(blinded, &mbk)?
            }
        };
        self.dump("blinded.pset", pset.to_string().as_bytes())?;

        let signed = Signer::new().sign_with(pset, &root, SighashFlags::all_with_rangeproof())?;
        self.dump(
            "signed.pset",
            signed.clone().to_canonical_form()?.to_string().as_bytes(),
        )?;
        self.dump("signed_full.pset", signed.to_string().as_bytes())?;

        let result = finalize(&self.node, &signed)?;
        if let FinalizationResult::Complete(bytes) = &result {
            self.dump("final.tx", hex::encode(bytes).as_bytes())?;
        }
        Ok(result)
    }

    /// Full pipeline including broadcast; returns the txid.
    ///
    /// A rejected transaction surfaces as [`PsetError::BroadcastRejected`];
    /// the caller still holds the request and seed, so the attempt can be
    /// rebuilt with a higher fee.
    pub fn send(&self, request: &FundingRequest, seed: &[u8]) -> Result<String> {
        let result = self.build_and_sign(request, seed)?;
        self.broadcast(&result)
    }

    /// Broadcast a finalization result produced by this pipeline.
    pub fn broadcast(&self, result: &FinalizationResult) -> Result<String> {
        let bytes = match result {
            FinalizationResult::Complete(bytes) => bytes,
            FinalizationResult::Incomplete(reason) => {
                // Never hand the node a container that did not finalize.
                return Err(PsetError::InvalidInput(format!(
                    "refusing to broadcast incomplete container: {}",
                    reason
                )));
            }
        };
        let tx_hex = hex::encode(bytes);

        if !self.node.test_mempool_accept(&tx_hex)? {
            return Err(PsetError::BroadcastRejected(
                "mempool pre-acceptance check failed".to_string(),
            ));
        }

        let txid = self.node.broadcast(&tx_hex).map_err(|e| match e {
            // A node verdict on the final bytes; transport errors pass through.
            PsetError::Rpc { code, message } => {
                PsetError::BroadcastRejected(format!("{} ({})", message, code))
            }
            other => other,
        })?;
        log::info!("broadcast transaction {}", txid);
        Ok(txid)
    }

    /// Advance a development chain.
    pub fn mine(&self, blocks: u32, address: &str) -> Result<()> {
        self.node.generate_to_address(blocks, address)
    }

    fn dump(&self, suffix: &str, contents: &[u8]) -> Result<()> {
        let Some(dir) = &self.config.data_dir else {
            return Ok(());
        };
        let prefix = self.config.dump_prefix.as_deref().unwrap_or("pset");
        let path: PathBuf = dir.join(format!("{}_{}", prefix, suffix));
        fs::write(&path, contents)?;
        log::info!("wrote {}", path.display());
        Ok(())
    }
}
