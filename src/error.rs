use thiserror::Error;

/// Crate-wide error type.
///
/// The confidential-pipeline variants mirror the failure modes of the
/// individual stages; ambient variants wrap the usual I/O, encoding and RPC
/// failures.
#[derive(Error, Debug)]
pub enum PsetError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// A commitment did not open under the derived blinding key. Non-fatal
    /// per entry; callers collect these and keep going.
    #[error("Proof rewind failed for {entry}: {reason}")]
    ProofRewind { entry: String, reason: String },

    #[error("Unbalanced transaction for asset {asset}: inputs {inputs}, outputs {outputs}, fee {fee}")]
    UnbalancedTransaction {
        asset: String,
        inputs: u64,
        outputs: u64,
        fee: u64,
    },

    /// An input or output mixes commitment and clear-field population in a
    /// way the container invariant forbids.
    #[error("Inconsistent blinding state for {entry}")]
    InconsistentBlindingState { entry: String },

    /// Signing was attempted while required proof material is absent.
    #[error("Premature sign: {0}")]
    PrematureSign(String),

    /// The requested sighash flags violate signing policy for this container.
    #[error("Signing policy violation: {0}")]
    SigningPolicy(String),

    /// Both finalization strategies were attempted and neither produced a
    /// complete transaction.
    #[error("Finalization failed; delegated: {delegated}, manual: {manual}")]
    FinalizationFailed { delegated: String, manual: String },

    /// The node rejected the final transaction bytes. The container and its
    /// signatures are left intact so the caller can inspect or fee-bump.
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    /// Transport-level RPC failure (connection refused, timeout, bad HTTP).
    #[error("Network error: {0}")]
    Network(String),

    /// Protocol-level RPC failure: the node answered with an error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
}

pub type Result<T> = std::result::Result<T, PsetError>;
