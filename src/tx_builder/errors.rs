//! Error types for the transaction builder
//!
//! Covers instruction planning, message compilation against lookup tables,
//! signing and the post-compile invariant checks. Ledger failures (blockhash
//! retrieval) are wrapped rather than flattened so their classification
//! survives.

use crate::ledger::LedgerError;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Error type for all transaction builder operations
#[derive(Error, Debug)]
pub enum TransactionBuilderError {
    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program ID that failed to build an instruction
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// v0 message compilation failed (account key overflow, bad lookup)
    #[error("Message compile error: {0}")]
    Compile(String),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Compute budget directives missing, duplicated or misplaced
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// An address loaded through a lookup table also appears as a static key
    #[error("Static account {account} is also loaded through lookup table {table}")]
    StaticAccountOverlap { account: Pubkey, table: Pubkey },

    /// Configuration or validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ledger access failed while building (blockhash retrieval)
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl TransactionBuilderError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_retryable(),

            Self::InstructionBuild { .. } => false,
            Self::Compile(_) => false,
            Self::Signing(_) => false,
            Self::InvalidInstructionOrder(_) => false,
            Self::StaticAccountOverlap { .. } => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstructionBuild { .. } => "instruction",
            Self::Compile(_) => "compile",
            Self::Signing(_) => "signing",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::StaticAccountOverlap { .. } => "validation",
            Self::Configuration(_) => "config",
            Self::Ledger(err) => err.category(),
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::InstructionBuild {
            program: "aggregator".to_string(),
            reason: "empty account list".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=aggregator): empty account list"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(TransactionBuilderError::from(LedgerError::transport("x", "reset")).is_retryable());
        assert!(!TransactionBuilderError::Signing("missing keypair".to_string()).is_retryable());
        assert!(!TransactionBuilderError::Compile("too many keys".to_string()).is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TransactionBuilderError::invalid_order("budget after domain").category(),
            "validation"
        );
        assert_eq!(
            TransactionBuilderError::from(LedgerError::BlockhashExpired { signature: None }).category(),
            "blockhash"
        );
    }
}
