//! Two-tier finalization: delegated to the node, then self-assembled.
//!
//! Independent implementations of the container format have disagreed on
//! which fields a "complete" container must carry before script assembly,
//! so finalization is an explicit two-state machine rather than exception
//! driven control flow: try the node on the canonical form, and on a
//! deterministic Incomplete verdict (or a protocol-level RPC error) run
//! local assembly once on the full container. Transport failures are not a
//! format disagreement and propagate immediately. The terminal failure is
//! reported with both verdicts and never retried: finalization is
//! deterministic for a fixed input, so repeating it cannot help.

use crate::primitives::encode::Encodable;
use crate::primitives::pset::Pset;
use crate::primitives::script::Script;
use crate::rpc::LedgerNode;
use crate::{PsetError, Result};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a finalization attempt. Created once by the
/// finalizer, consumed once by the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizationResult {
    /// Fully unlocked transaction bytes, ready for broadcast.
    Complete(Vec<u8>),
    /// The container could not be completed; the reason is the strategy's
    /// own verdict.
    Incomplete(String),
}

impl FinalizationResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, FinalizationResult::Complete(_))
    }
}

/// Which strategy produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStrategy {
    Delegated,
    SelfAssembled,
}

/// Assemble final unlocking data locally from the signatures and scripts
/// the container already holds. Only single-key witness-v0 inputs are
/// assembled; that is the one output type this wallet produces.
pub fn finalize_local(pset: &Pset) -> Result<FinalizationResult> {
    let mut completed = pset.clone();

    for (index, input) in pset.inputs.iter().enumerate() {
        let Some(utxo) = input.witness_utxo.as_ref() else {
            return Ok(FinalizationResult::Incomplete(format!(
                "input {} has no witness utxo",
                index
            )));
        };
        if !utxo.script_pubkey.is_p2wpkh() {
            return Ok(FinalizationResult::Incomplete(format!(
                "input {} is not a p2wpkh output",
                index
            )));
        }

        // Pick the signature whose key matches the locking script.
        let matching = input
            .partial_sigs
            .iter()
            .find(|(pubkey, _)| utxo.script_pubkey.is_wpkh_for_key(pubkey));
        let Some((pubkey, signature)) = matching else {
            return Ok(FinalizationResult::Incomplete(format!(
                "input {} has no usable signature",
                index
            )));
        };

        let finalized = &mut completed.inputs[index];
        finalized.final_script_witness =
            Some(vec![signature.clone(), pubkey.serialize().to_vec()]);
        finalized.final_script_sig = Some(Script::new());
        finalized.partial_sigs.clear();
    }

    let tx = completed.extract_tx()?;
    Ok(FinalizationResult::Complete(tx.consensus_encode_to_vec()?))
}

/// Run the fallback state machine against a ledger node.
///
/// The delegated attempt sees the canonical (clear-fields-stripped) form;
/// self-assembly sees the full container, since canonicalization discards
/// exactly the material local assembly may still need.
pub fn finalize<N: LedgerNode + ?Sized>(node: &N, pset: &Pset) -> Result<FinalizationResult> {
    let canonical = pset.clone().to_canonical_form()?;

    let delegated_verdict = match node.finalize_pset(&canonical) {
        Ok(FinalizationResult::Complete(bytes)) => {
            log::info!("delegated finalization complete");
            return Ok(FinalizationResult::Complete(bytes));
        }
        Ok(FinalizationResult::Incomplete(reason)) => {
            log::warn!("delegated finalization incomplete: {}", reason);
            reason
        }
        // The node answered but refused the container: a format
        // disagreement, which is what self-assembly exists for.
        Err(PsetError::Rpc { code, message }) => {
            log::warn!("delegated finalization rejected ({}): {}", code, message);
            format!("rpc error {}: {}", code, message)
        }
        // Anything else is a transport failure; falling back would mask it.
        Err(e) => return Err(e),
    };

    match finalize_local(pset)? {
        FinalizationResult::Complete(bytes) => {
            log::info!("self-assembled finalization complete");
            Ok(FinalizationResult::Complete(bytes))
        }
        FinalizationResult::Incomplete(manual_verdict) => Err(PsetError::FinalizationFailed {
            delegated: delegated_verdict,
            manual: manual_verdict,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::bip32::ExtendedPrivateKey;
    use crate::primitives::confidential::AssetId;
    use crate::primitives::encode::Decodable;
    use crate::primitives::pset::Pset;
    use crate::primitives::transaction::{OutPoint, Transaction, TxIn, TxOut};
    use crate::signer::{Signer, SighashFlags};
    use crate::types::{FundingRequest, Network};
    use std::cell::RefCell;

    /// Scripted node: returns a fixed finalization response and counts calls.
    struct ScriptedNode {
        response: Result<FinalizationResult>,
        calls: RefCell<usize>,
    }

    impl ScriptedNode {
        fn new(response: Result<FinalizationResult>) -> Self {
            ScriptedNode {
                response,
                calls: RefCell::new(0),
            }
        }
    }

    impl LedgerNode for ScriptedNode {
        fn create_funded_pset(&self, _request: &FundingRequest) -> Result<Pset> {
            unreachable!("not used in finalizer tests")
        }

        fn process_pset(&self, _pset: &Pset) -> Result<Pset> {
            unreachable!("not used in finalizer tests")
        }

        fn finalize_pset(&self, _pset: &Pset) -> Result<FinalizationResult> {
            *self.calls.borrow_mut() += 1;
            match &self.response {
                Ok(result) => Ok(result.clone()),
                Err(PsetError::Rpc { code, message }) => Err(PsetError::Rpc {
                    code: *code,
                    message: message.clone(),
                }),
                Err(PsetError::Network(msg)) => Err(PsetError::Network(msg.clone())),
                Err(_) => unreachable!("unsupported scripted error"),
            }
        }

        fn test_mempool_accept(&self, _tx_hex: &str) -> Result<bool> {
            Ok(true)
        }

        fn broadcast(&self, _tx_hex: &str) -> Result<String> {
            unreachable!("not used in finalizer tests")
        }

        fn generate_to_address(&self, _blocks: u32, _address: &str) -> Result<()> {
            Ok(())
        }
    }

    fn signed_pset() -> Pset {
        let key =
            ExtendedPrivateKey::new_master_from_seed(&[0x55u8; 64], Network::LiquidTestnet)
                .unwrap();
        let script = Script::new_p2wpkh_for_key(&key.public_key());

        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn::new(OutPoint::new([1u8; 32], 0))],
            output: vec![TxOut::explicit(
                AssetId::new([0x11u8; 32]),
                49_000,
                Script::new_p2wpkh(&[0x33u8; 20]),
            )],
        };
        let mut pset = Pset::from_tx(tx, 1_000);
        pset.inputs[0].witness_utxo = Some(TxOut::explicit(
            AssetId::new([0x11u8; 32]),
            50_000,
            script,
        ));

        Signer::new()
            .sign_with(pset, &key, SighashFlags::all())
            .unwrap()
    }

    #[test]
    fn test_delegated_success_short_circuits() {
        let node = ScriptedNode::new(Ok(FinalizationResult::Complete(vec![0xde, 0xad])));
        let result = finalize(&node, &signed_pset()).unwrap();
        assert_eq!(result, FinalizationResult::Complete(vec![0xde, 0xad]));
        assert_eq!(*node.calls.borrow(), 1);
    }

    #[test]
    fn test_incomplete_verdict_falls_back_to_self_assembly() {
        let node = ScriptedNode::new(Ok(FinalizationResult::Incomplete(
            "unknown field layout".to_string(),
        )));
        let result = finalize(&node, &signed_pset()).unwrap();
        assert!(result.is_complete());
        // Delegation is attempted exactly once, never re-tried.
        assert_eq!(*node.calls.borrow(), 1);
    }

    #[test]
    fn test_protocol_error_falls_back() {
        let node = ScriptedNode::new(Err(PsetError::Rpc {
            code: -22,
            message: "TX decode failed".to_string(),
        }));
        let result = finalize(&node, &signed_pset()).unwrap();
        assert!(result.is_complete());
    }

    #[test]
    fn test_transport_error_fails_fast() {
        let node = ScriptedNode::new(Err(PsetError::Network("connection refused".to_string())));
        let err = finalize(&node, &signed_pset());
        assert!(matches!(err, Err(PsetError::Network(_))));
    }

    #[test]
    fn test_both_strategies_exhausted_is_terminal() {
        let node = ScriptedNode::new(Ok(FinalizationResult::Incomplete("no".to_string())));
        // Strip the signature so self-assembly cannot complete either.
        let mut pset = signed_pset();
        pset.inputs[0].partial_sigs.clear();

        let err = finalize(&node, &pset);
        match err {
            Err(PsetError::FinalizationFailed { delegated, manual }) => {
                assert_eq!(delegated, "no");
                assert!(manual.contains("no usable signature"));
            }
            other => panic!("expected FinalizationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_local_assembly_builds_witness() {
        let pset = signed_pset();
        let result = finalize_local(&pset).unwrap();
        let FinalizationResult::Complete(bytes) = result else {
            panic!("expected completion");
        };

        let tx = Transaction::consensus_decode_from_slice(&bytes).unwrap();
        assert_eq!(tx.input[0].witness.len(), 2);
        // Second witness item is the compressed public key
        assert_eq!(tx.input[0].witness[1].len(), 33);
    }

    #[test]
    fn test_local_assembly_reports_missing_material() {
        let mut pset = signed_pset();
        pset.inputs[0].witness_utxo = None;
        let result = finalize_local(&pset).unwrap();
        assert!(matches!(result, FinalizationResult::Incomplete(_)));
    }
}
