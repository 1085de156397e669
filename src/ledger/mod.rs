//! Ledger access layer
//!
//! The thin RPC surface every other component talks through. Production code
//! uses [`RpcLedger`]; tests swap in the in-memory ledger from `test_utils`.

use async_trait::async_trait;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    clock::Slot,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use tokio::sync::{mpsc, oneshot};

pub mod errors;
pub mod retry;
pub mod rpc;

pub use errors::{LedgerError, LedgerResult};
pub use retry::{poll_until, retry_with_backoff, PollPolicy, RetryPolicy};
pub use rpc::RpcLedger;

/// Maximum number of addresses a lookup table can hold
pub const LOOKUP_TABLE_CAPACITY: usize = 256;

/// Options forwarded to `sendTransaction`
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Rebroadcast attempts performed by the RPC node
    pub max_retries: usize,
    /// Skip the node's own pre-flight checks
    pub skip_preflight: bool,
    /// Commitment used by the node for pre-flight checks
    pub preflight_commitment: CommitmentConfig,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            skip_preflight: false,
            preflight_commitment: CommitmentConfig::confirmed(),
        }
    }
}

/// Status of a submitted signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: Slot,
    /// Execution error, if the transaction failed on-chain
    pub err: Option<String>,
    /// Whether the requested commitment level has been reached
    pub reached_commitment: bool,
}

/// Outcome of a diagnostic simulation
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

impl SimulationReport {
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

/// Resolved on-chain lookup table
///
/// Only the ledger clients in this crate produce one, from an account read
/// that saw the table. Outside the crate it comes from
/// `LookupTableManager::fetch_table` or `wait_until_visible`.
///
/// ```compile_fail
/// use vault_orchestrator::ledger::LookupTableState;
/// use vault_orchestrator::Pubkey;
///
/// let _ = LookupTableState::new(Pubkey::new_unique(), None, vec![]);
/// ```
///
/// ```compile_fail
/// use vault_orchestrator::ledger::LookupTableState;
/// use vault_orchestrator::Pubkey;
///
/// let _ = LookupTableState {
///     address: Pubkey::new_unique(),
///     authority: None,
///     addresses: vec![],
///     capacity: 256,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct LookupTableState {
    pub address: Pubkey,
    pub authority: Option<Pubkey>,
    pub addresses: Vec<Pubkey>,
    pub capacity: usize,
}

impl LookupTableState {
    pub(crate) fn new(address: Pubkey, authority: Option<Pubkey>, addresses: Vec<Pubkey>) -> Self {
        Self {
            address,
            authority,
            addresses,
            capacity: LOOKUP_TABLE_CAPACITY,
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.addresses.len())
    }

    pub fn contains(&self, key: &Pubkey) -> bool {
        self.addresses.contains(key)
    }

    /// View used by the v0 message compiler
    pub fn to_account(&self) -> AddressLookupTableAccount {
        AddressLookupTableAccount {
            key: self.address,
            addresses: self.addresses.clone(),
        }
    }
}

/// One program-log notification from the live stream
#[derive(Debug, Clone)]
pub struct LogNotification {
    pub signature: Signature,
    pub slot: Slot,
    pub err: Option<String>,
    pub logs: Vec<String>,
}

/// Live program-log stream
///
/// Dropping the subscription (or calling [`LogSubscription::cancel`]) stops the
/// background stream; notifications already queued stay readable.
#[derive(Debug)]
pub struct LogSubscription {
    pub notifications: mpsc::UnboundedReceiver<LogNotification>,
    cancel: Option<oneshot::Sender<()>>,
}

impl LogSubscription {
    pub fn new(
        notifications: mpsc::UnboundedReceiver<LogNotification>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            notifications,
            cancel: Some(cancel),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Split into the receiver and a cancel guard
    pub fn into_parts(mut self) -> (mpsc::UnboundedReceiver<LogNotification>, LogCancelGuard) {
        let cancel = self.cancel.take();
        let (tx, rx) = mpsc::unbounded_channel();
        let notifications = std::mem::replace(&mut self.notifications, rx);
        drop(tx);
        (notifications, LogCancelGuard { cancel })
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Stops the underlying log stream when dropped
#[derive(Debug)]
pub struct LogCancelGuard {
    cancel: Option<oneshot::Sender<()>>,
}

impl LogCancelGuard {
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for LogCancelGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Transport surface required by the orchestration components
///
/// Every method is a suspension point: callers do not proceed until the
/// result or failure is available.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Endpoint label used in logs and errors
    fn endpoint(&self) -> &str;

    /// Latest blockhash and the last block height at which it is valid
    async fn get_latest_blockhash(&self) -> LedgerResult<(Hash, u64)>;

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> LedgerResult<bool>;

    async fn get_slot(&self, commitment: CommitmentConfig) -> LedgerResult<Slot>;

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64>;

    /// Raw token amount (base units) of an SPL token account
    async fn get_token_account_balance(&self, address: &Pubkey) -> LedgerResult<u64>;

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SendOptions,
    ) -> LedgerResult<Signature>;

    /// `None` until the signature is known to the cluster
    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> LedgerResult<Option<SignatureStatus>>;

    /// Execution logs of a landed transaction
    async fn get_transaction_logs(&self, signature: &Signature) -> LedgerResult<Vec<String>>;

    async fn simulate_transaction(&self, tx: &VersionedTransaction) -> LedgerResult<SimulationReport>;

    /// `None` while the table is not visible to this endpoint
    async fn get_lookup_table(&self, address: &Pubkey) -> LedgerResult<Option<LookupTableState>>;

    /// Test networks only
    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> LedgerResult<Signature>;

    /// Stream of logs for transactions mentioning `program_id`
    async fn subscribe_program_logs(&self, program_id: &Pubkey) -> LedgerResult<LogSubscription>;
}
