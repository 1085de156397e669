use crate::ledger::LedgerError;
use crate::tx_builder::TransactionBuilderError;
use solana_sdk::{clock::Slot, pubkey::Pubkey};
use thiserror::Error;

/// Lookup table lifecycle failures
#[derive(Debug, Error)]
pub enum LookupTableError {
    /// The reference slot was rejected on-chain; recreate with a fresher one
    #[error("Reference slot {slot} is not a recent slot")]
    StaleSlot { slot: Slot },

    #[error("Table {table} cannot take {requested} more addresses ({available} slots left)")]
    CapacityExceeded {
        table: Pubkey,
        requested: usize,
        available: usize,
    },

    /// Extend chunk failed after its retry budget
    #[error("Extend chunk {index} failed: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: TransactionBuilderError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Builder(#[from] TransactionBuilderError),
}

impl LookupTableError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::StaleSlot { .. } => "stale_slot",
            Self::CapacityExceeded { .. } => "capacity",
            Self::ChunkFailed { .. } => "chunk_failed",
            Self::Ledger(err) => err.category(),
            Self::Builder(err) => err.category(),
        }
    }
}

/// Retry decision for an extend chunk: transient or cured by a rebuild
pub(crate) fn chunk_retryable(err: &TransactionBuilderError) -> bool {
    match err {
        TransactionBuilderError::Ledger(inner) => inner.is_retryable() || inner.needs_rebuild(),
        other => other.is_retryable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_retry_classification() {
        assert!(chunk_retryable(&LedgerError::BlockhashExpired { signature: None }.into()));
        assert!(chunk_retryable(&LedgerError::transport("mock", "reset").into()));
        assert!(!chunk_retryable(
            &LedgerError::Validation("bad account".to_string()).into()
        ));
        assert!(!chunk_retryable(&TransactionBuilderError::Signing("missing".to_string())));
    }

    #[test]
    fn test_category_passthrough() {
        let err = LookupTableError::from(LedgerError::TableNotReady {
            table: Pubkey::new_unique(),
        });
        assert_eq!(err.category(), "table_not_ready");
        assert_eq!(LookupTableError::StaleSlot { slot: 4 }.category(), "stale_slot");
    }
}
