//! Transaction build output
//!
//! `TxBuildOutput` holds a signed v0 transaction together with the metadata
//! the submitter needs later: the blockhash it was compiled against (for
//! expiry detection), the block height past which it can no longer land,
//! and the lookup tables it references.

use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};

/// Signed transaction ready for submission
///
/// The signature is fixed at build time. Resending the same output never
/// changes its identity; a fresh blockhash requires a new build.
#[derive(Debug, Clone)]
pub struct TxBuildOutput {
    /// The signed transaction
    pub tx: VersionedTransaction,

    /// First signature (transaction identity)
    pub signature: Signature,

    /// Blockhash the message was compiled against
    pub blockhash: Hash,

    /// Last block height at which `blockhash` is accepted
    pub last_valid_block_height: u64,

    /// Lookup tables referenced by the message
    pub lookup_tables: Vec<Pubkey>,

    /// Number of static account keys in the compiled message
    pub static_account_count: usize,

    /// Addresses loaded through lookups
    pub loaded_account_count: usize,

    /// Signers required by the message header
    pub required_signers: Vec<Pubkey>,
}

impl TxBuildOutput {
    /// Wrap a signed transaction, extracting signers and account counts
    pub fn new(tx: VersionedTransaction, blockhash: Hash, last_valid_block_height: u64) -> Self {
        let required_signers = crate::compat::get_required_signers(&tx.message).to_vec();
        let static_account_count = crate::compat::get_static_account_keys(&tx.message).len();
        let loaded_account_count = crate::compat::count_lookup_addresses(&tx.message);
        let lookup_tables = crate::compat::get_address_table_lookups(&tx.message)
            .iter()
            .map(|lookup| lookup.account_key)
            .collect();
        let signature = tx.signatures.first().copied().unwrap_or_default();

        Self {
            tx,
            signature,
            blockhash,
            last_valid_block_height,
            lookup_tables,
            static_account_count,
            loaded_account_count,
            required_signers,
        }
    }

    pub fn tx_ref(&self) -> &VersionedTransaction {
        &self.tx
    }

    pub fn into_tx(self) -> VersionedTransaction {
        self.tx
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        &self.required_signers
    }

    /// Serialized wire size in bytes
    pub fn wire_size(&self) -> usize {
        bincode::serialized_size(&self.tx).map(|n| n as usize).unwrap_or(0)
    }
}
