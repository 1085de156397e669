use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

const ALREADY_PROCESSED_MARKER: &str = "already been processed";

/// Ledger-facing error taxonomy
///
/// Every failure the transport, confirmation or subscription layers can
/// surface is mapped onto one of these variants. Variants that carry program
/// execution logs expose them through [`LedgerError::logs`] so the caller can
/// decide whether a rebuild makes sense.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Network or RPC failure; retryable at the transport layer only
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// The transaction's blockhash expired before it was confirmed.
    /// Requires a full rebuild with a fresh blockhash, never a resend.
    #[error("Blockhash expired before confirmation (signature: {signature:?})")]
    BlockhashExpired { signature: Option<Signature> },

    /// The node already holds this exact transaction: an earlier send was
    /// delivered even though its response was lost. Not a failure.
    #[error("Transaction already processed (signature: {signature:?})")]
    AlreadyProcessed { signature: Option<Signature> },

    /// Pre-flight rejection with program logs attached
    #[error("Simulation failed: {message}")]
    Simulation { message: String, logs: Vec<String> },

    /// The transaction landed but failed on-chain
    #[error("Transaction {signature} failed: {message}")]
    TransactionFailed {
        signature: Signature,
        message: String,
        logs: Vec<String>,
    },

    /// Lookup table referenced or fetched before it became visible
    #[error("Lookup table {table} is not visible yet")]
    TableNotReady { table: Pubkey },

    /// Event stream registration or decode failure
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// A bounded wait ran out
    #[error("Timed out after {elapsed_ms}ms waiting for {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Test credit requested against a production cluster
    #[error("Airdrop refused: {0}")]
    AirdropRefused(String),

    /// Malformed input or response
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Whether the same operation may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::TableNotReady { .. } => true,
            LedgerError::Timeout { .. } => true,

            // Needs a rebuild, not a retry
            LedgerError::BlockhashExpired { .. } => false,
            LedgerError::AlreadyProcessed { .. } => false,
            LedgerError::Simulation { .. } => false,
            LedgerError::TransactionFailed { .. } => false,
            LedgerError::Subscription(_) => false,
            LedgerError::AirdropRefused(_) => false,
            LedgerError::Validation(_) => false,
        }
    }

    /// Whether the failure is cured by rebuilding with a fresh blockhash
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, LedgerError::BlockhashExpired { .. })
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            LedgerError::Transport { .. } => "transport",
            LedgerError::BlockhashExpired { .. } => "blockhash",
            LedgerError::AlreadyProcessed { .. } => "already_processed",
            LedgerError::Simulation { .. } => "simulation",
            LedgerError::TransactionFailed { .. } => "execution",
            LedgerError::TableNotReady { .. } => "table_not_ready",
            LedgerError::Subscription(_) => "subscription",
            LedgerError::Timeout { .. } => "timeout",
            LedgerError::AirdropRefused(_) => "airdrop",
            LedgerError::Validation(_) => "validation",
        }
    }

    /// Program execution logs attached to the failure, if any
    pub fn logs(&self) -> &[String] {
        match self {
            LedgerError::Simulation { logs, .. } => logs,
            LedgerError::TransactionFailed { logs, .. } => logs,
            _ => &[],
        }
    }

    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        LedgerError::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Classify a `ClientError` coming out of the RPC client
    ///
    /// Pre-flight failures keep the simulation logs returned by the node.
    /// A resend of an already landed transaction maps to `AlreadyProcessed`.
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        if let ClientErrorKind::RpcError(RpcError::RpcResponseError { message, data, .. }) =
            err.kind()
        {
            if let RpcResponseErrorData::SendTransactionPreflightFailure(result) = data {
                let logs = result.logs.clone().unwrap_or_default();
                let lowered = message.to_lowercase();
                let already_processed = result
                    .err
                    .as_ref()
                    .is_some_and(|e| format!("{:?}", e).contains("AlreadyProcessed"));
                if already_processed || lowered.contains(ALREADY_PROCESSED_MARKER) {
                    return LedgerError::AlreadyProcessed { signature: None };
                }
                if lowered.contains("blockhash not found") {
                    return LedgerError::BlockhashExpired { signature: None };
                }
                return LedgerError::Simulation {
                    message: message.clone(),
                    logs,
                };
            }
        }

        let err_str = err.to_string().to_lowercase();
        if err_str.contains(ALREADY_PROCESSED_MARKER) {
            LedgerError::AlreadyProcessed { signature: None }
        } else if err_str.contains("blockhash not found")
            || err_str.contains("block height exceeded")
            || err_str.contains("transaction expired")
        {
            LedgerError::BlockhashExpired { signature: None }
        } else if err_str.contains("airdrop") && err_str.contains("limit") {
            LedgerError::AirdropRefused(err.to_string())
        } else {
            LedgerError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::transaction::TransactionError;

    #[test]
    fn test_error_is_retryable() {
        assert!(LedgerError::transport("http://localhost:8899", "connection reset").is_retryable());
        assert!(LedgerError::TableNotReady {
            table: Pubkey::new_unique()
        }
        .is_retryable());

        assert!(!LedgerError::BlockhashExpired { signature: None }.is_retryable());
        assert!(!LedgerError::Simulation {
            message: "custom program error: 0x1771".to_string(),
            logs: vec![],
        }
        .is_retryable());
        assert!(!LedgerError::Subscription("bad discriminator".to_string()).is_retryable());
    }

    #[test]
    fn test_blockhash_needs_rebuild() {
        assert!(LedgerError::BlockhashExpired { signature: None }.needs_rebuild());
        assert!(!LedgerError::transport("x", "y").needs_rebuild());
    }

    #[test]
    fn test_logs_are_exposed() {
        let err = LedgerError::TransactionFailed {
            signature: Signature::default(),
            message: "InstructionError(2, Custom(6001))".to_string(),
            logs: vec!["Program log: Invalid amount".to_string()],
        };
        assert_eq!(err.logs().len(), 1);
        assert_eq!(err.category(), "execution");
        assert!(LedgerError::Validation("x".to_string()).logs().is_empty());
    }

    fn rpc_error(message: &str, data: RpcResponseErrorData) -> ClientError {
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code: -32002,
            message: message.to_string(),
            data,
        })
        .into()
    }

    #[test]
    fn test_resend_of_landed_transaction_is_not_a_rejection() {
        let preflight = rpc_error(
            "Transaction simulation failed: This transaction has already been processed",
            RpcResponseErrorData::Empty,
        );
        let err = LedgerError::from_client_error(preflight, "http://localhost:8899");
        assert!(matches!(err, LedgerError::AlreadyProcessed { signature: None }));
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "already_processed");

        let direct: ClientError =
            ClientErrorKind::TransactionError(TransactionError::AlreadyProcessed).into();
        assert!(matches!(
            LedgerError::from_client_error(direct, "http://localhost:8899"),
            LedgerError::AlreadyProcessed { .. }
        ));
    }

    #[test]
    fn test_unrelated_rpc_error_stays_transport() {
        let err = LedgerError::from_client_error(
            rpc_error("Node is behind by 42 slots", RpcResponseErrorData::Empty),
            "http://localhost:8899",
        );
        assert!(matches!(err, LedgerError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = LedgerError::timeout("lookup table visibility", std::time::Duration::from_millis(1500));
        assert_eq!(
            err.to_string(),
            "Timed out after 1500ms waiting for lookup table visibility"
        );
    }
}
