//! Address lookup table lifecycle
//!
//! create → wait until visible → extend in chunks → wait for the final
//! length → fetch. Every step goes through the shared builder/submitter, so
//! table transactions get the same retry and confirmation behavior as the
//! domain transactions.
//!
//! Visibility is eventual: a confirmed create or extend may not be readable
//! from the RPC node for a while. Callers never sleep for a fixed time; they
//! use [`LookupTableManager::wait_until_visible`] with a bound.

use crate::config::LookupTableConfig;
use crate::ledger::{poll_until, LedgerClient, LedgerError, LookupTableState};
use crate::metrics::{metrics, Timer};
use crate::submitter::TxSubmitter;
use crate::tx_builder::{TransactionBuilderError, TxBuilder};
use solana_sdk::{
    address_lookup_table::instruction::{create_lookup_table, extend_lookup_table},
    clock::Slot,
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

mod errors;

pub use errors::LookupTableError;

/// Log fragment of the lookup table program for a rejected reference slot
const STALE_SLOT_MARKER: &str = "is not a recent slot";

/// Result of a chunked extend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendReport {
    /// Extend transactions confirmed, one per chunk
    pub chunks: usize,
    pub addresses_sent: usize,
    /// Chunk resubmissions after a retryable failure
    pub retries: usize,
    pub signatures: Vec<Signature>,
}

/// Index ranges of the extend chunks for `len` addresses
pub fn plan_chunks(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch = batch_size.max(1);
    (0..len)
        .step_by(batch)
        .map(|start| start..(start + batch).min(len))
        .collect()
}

pub struct LookupTableManager {
    ledger: Arc<dyn LedgerClient>,
    builder: Arc<TxBuilder>,
    submitter: Arc<TxSubmitter>,
    payer: Arc<Keypair>,
    config: LookupTableConfig,
}

impl LookupTableManager {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        builder: Arc<TxBuilder>,
        submitter: Arc<TxSubmitter>,
        payer: Arc<Keypair>,
        config: LookupTableConfig,
    ) -> Self {
        Self {
            ledger,
            builder,
            submitter,
            payer,
            config,
        }
    }

    pub fn config(&self) -> &LookupTableConfig {
        &self.config
    }

    /// Reference slot for a new table, read at `finalized`
    pub async fn recent_slot(&self) -> Result<Slot, LookupTableError> {
        Ok(self.ledger.get_slot(CommitmentConfig::finalized()).await?)
    }

    /// Submit the create instruction and return the derived table address
    ///
    /// The table is not guaranteed to be readable when this returns.
    #[instrument(skip_all, fields(authority = %authority.pubkey(), slot = reference_slot))]
    pub async fn create_table(
        &self,
        authority: &Keypair,
        reference_slot: Slot,
    ) -> Result<Pubkey, LookupTableError> {
        let (ix, table) = create_lookup_table(authority.pubkey(), self.payer.pubkey(), reference_slot);
        let output = self.builder.build_plain(ix, &self.payer, &[authority]).await?;

        match self.submitter.submit(&output).await {
            Ok(confirmation) => {
                info!(table = %table, signature = %confirmation.signature, "Lookup table created");
                Ok(table)
            }
            Err(err) if is_stale_slot(&err) => Err(LookupTableError::StaleSlot {
                slot: reference_slot,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Append `addresses` in order, one transaction per chunk
    ///
    /// The table must already be visible. Capacity is checked against the
    /// visible length before anything is sent.
    #[instrument(skip_all, fields(table = %table, count = addresses.len()))]
    pub async fn extend_table(
        &self,
        table: &Pubkey,
        authority: &Keypair,
        addresses: &[Pubkey],
    ) -> Result<ExtendReport, LookupTableError> {
        let current = self.fetch_table(table).await?;
        if addresses.len() > current.remaining_capacity() {
            return Err(LookupTableError::CapacityExceeded {
                table: *table,
                requested: addresses.len(),
                available: current.remaining_capacity(),
            });
        }

        let chunks = plan_chunks(addresses.len(), self.config.batch_size);
        let mut report = ExtendReport::default();

        for (index, range) in chunks.iter().enumerate() {
            if index > 0 {
                sleep(self.config.settle_delay()).await;
            }
            let chunk = &addresses[range.clone()];
            let (signature, retries) = self.extend_chunk(index, table, authority, chunk).await?;

            report.chunks += 1;
            report.addresses_sent += chunk.len();
            report.retries += retries;
            report.signatures.push(signature);
            metrics().alt_chunks_sent.inc();
            metrics().alt_addresses_added.inc_by(chunk.len() as u64);
            debug!(chunk = index, of = chunks.len(), size = chunk.len(), "Extend chunk confirmed");
        }

        info!(chunks = report.chunks, addresses = report.addresses_sent, "Lookup table extended");
        Ok(report)
    }

    /// One chunk, rebuilt with a fresh blockhash on every attempt
    async fn extend_chunk(
        &self,
        index: usize,
        table: &Pubkey,
        authority: &Keypair,
        chunk: &[Pubkey],
    ) -> Result<(Signature, usize), LookupTableError> {
        let policy = &self.config.chunk_retry;
        let mut attempt = 0u32;

        loop {
            let ix = extend_lookup_table(
                *table,
                authority.pubkey(),
                Some(self.payer.pubkey()),
                chunk.to_vec(),
            );
            let result: Result<Signature, TransactionBuilderError> = async {
                let output = self.builder.build_plain(ix, &self.payer, &[authority]).await?;
                Ok(self.submitter.submit(&output).await?.signature)
            }
            .await;

            let err = match result {
                Ok(signature) => return Ok((signature, attempt as usize)),
                Err(err) => err,
            };

            match policy.calculate_delay(attempt) {
                Some(delay) if errors::chunk_retryable(&err) => {
                    warn!(
                        chunk = index,
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Extend chunk failed, rebuilding"
                    );
                    metrics().alt_chunk_retries.inc();
                    sleep(delay).await;
                    attempt += 1;
                }
                _ => return Err(LookupTableError::ChunkFailed { index, source: err }),
            }
        }
    }

    /// Current on-chain view; `TableNotReady` while not visible
    pub async fn fetch_table(&self, table: &Pubkey) -> Result<LookupTableState, LookupTableError> {
        self.ledger
            .get_lookup_table(table)
            .await?
            .ok_or(LookupTableError::Ledger(LedgerError::TableNotReady { table: *table }))
    }

    /// Poll until the table is readable and holds at least `min_len` addresses
    ///
    /// Bounded by `timeout`; dropping the future cancels the wait.
    pub async fn wait_until_visible(
        &self,
        table: &Pubkey,
        min_len: usize,
        timeout: Duration,
    ) -> Result<LookupTableState, LookupTableError> {
        let timer = Timer::new();
        let ledger = &self.ledger;

        let state = poll_until(
            "lookup table visibility",
            &self.config.visibility_poll,
            Some(timeout),
            || async move {
                Ok(ledger
                    .get_lookup_table(table)
                    .await?
                    .filter(|state| state.len() >= min_len))
            },
        )
        .await?;

        timer.observe_duration(&metrics().table_visibility_wait);
        debug!(table = %table, len = state.len(), "Lookup table visible");
        Ok(state)
    }

    /// Full lifecycle for a fresh table holding `addresses`
    ///
    /// A rejected reference slot is retried once with a newer one.
    pub async fn create_and_extend(
        &self,
        authority: &Keypair,
        addresses: &[Pubkey],
    ) -> Result<LookupTableState, LookupTableError> {
        let slot = self.recent_slot().await?;
        let table = match self.create_table(authority, slot).await {
            Err(LookupTableError::StaleSlot { slot }) => {
                warn!(slot, "Reference slot rejected, recreating with a fresher one");
                let fresh = self.recent_slot().await?;
                self.create_table(authority, fresh).await?
            }
            other => other?,
        };

        let timeout = self.config.visibility_timeout();
        self.wait_until_visible(&table, 0, timeout).await?;
        self.extend_table(&table, authority, addresses).await?;
        self.wait_until_visible(&table, addresses.len(), timeout).await
    }
}

fn is_stale_slot(err: &LedgerError) -> bool {
    err.logs().iter().any(|line| line.contains(STALE_SLOT_MARKER))
        || err.to_string().contains(STALE_SLOT_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComputeBudgetConfig, SubmitConfig};
    use crate::test_utils::MockLedger;
    use proptest::prelude::*;

    fn manager(ledger: Arc<MockLedger>, config: LookupTableConfig) -> (LookupTableManager, Arc<Keypair>) {
        let payer = Arc::new(Keypair::new());
        let builder = Arc::new(TxBuilder::new(ledger.clone(), ComputeBudgetConfig::default()));
        let submitter = Arc::new(TxSubmitter::new(
            ledger.clone(),
            SubmitConfig::default(),
            CommitmentConfig::confirmed(),
        ));
        (
            LookupTableManager::new(ledger, builder, submitter, payer.clone(), config),
            payer,
        )
    }

    fn addresses(n: usize) -> Vec<Pubkey> {
        (0..n).map(|_| Pubkey::new_unique()).collect()
    }

    #[test]
    fn test_plan_chunks_shape() {
        assert_eq!(plan_chunks(0, 20), Vec::<Range<usize>>::new());
        assert_eq!(plan_chunks(45, 20), vec![0..20, 20..40, 40..45]);
        assert_eq!(plan_chunks(3, 0), vec![0..1, 1..2, 2..3]);
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_input_in_order(len in 0usize..300, batch in 1usize..=30) {
            let chunks = plan_chunks(len, batch);
            prop_assert_eq!(chunks.len(), len.div_ceil(batch));
            let mut next = 0;
            for range in &chunks {
                prop_assert_eq!(range.start, next);
                prop_assert!(range.len() <= batch && !range.is_empty());
                next = range.end;
            }
            prop_assert_eq!(next, len);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_extend_lifecycle() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_table_visibility_delay(Duration::from_secs(2));
        let (manager, payer) = manager(ledger.clone(), LookupTableConfig::default());

        let wanted = addresses(45);
        let state = manager.create_and_extend(&payer, &wanted).await.unwrap();

        assert_eq!(state.addresses, wanted);
        assert_eq!(state.authority, Some(payer.pubkey()));
        assert_eq!(ledger.extend_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_rejects_over_capacity_before_sending() {
        let ledger = Arc::new(MockLedger::new());
        let (manager, payer) = manager(ledger.clone(), LookupTableConfig::default());

        let slot = manager.recent_slot().await.unwrap();
        let table = manager.create_table(&payer, slot).await.unwrap();
        manager
            .wait_until_visible(&table, 0, Duration::from_secs(5))
            .await
            .unwrap();
        let sent_before = ledger.sent_count();

        let err = manager
            .extend_table(&table, &payer, &addresses(257))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupTableError::CapacityExceeded { requested: 257, .. }));
        assert_eq!(ledger.sent_count(), sent_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reference_slot() {
        let ledger = Arc::new(MockLedger::new());
        let (manager, payer) = manager(ledger, LookupTableConfig::default());

        let slot = manager.recent_slot().await.unwrap();
        let err = manager.create_table(&payer, slot - 10_000).await.unwrap_err();
        assert!(matches!(err, LookupTableError::StaleSlot { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_retried_after_transport_failure() {
        let ledger = Arc::new(MockLedger::new());
        let (manager, payer) = manager(ledger.clone(), LookupTableConfig::default());
        let slot = manager.recent_slot().await.unwrap();
        let table = manager.create_table(&payer, slot).await.unwrap();
        manager
            .wait_until_visible(&table, 0, Duration::from_secs(5))
            .await
            .unwrap();

        // Exhausts the submitter's own send attempts for the first chunk
        ledger.fail_next_sends(SubmitConfig::default().send_attempts as usize);
        let report = manager.extend_table(&table, &payer, &addresses(25)).await.unwrap();

        assert_eq!(report.chunks, 2);
        assert_eq!(report.retries, 1);
        assert_eq!(manager.fetch_table(&table).await.unwrap().len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_before_visible_is_not_ready() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_table_visibility_delay(Duration::from_secs(60));
        let (manager, payer) = manager(ledger, LookupTableConfig::default());

        let slot = manager.recent_slot().await.unwrap();
        let table = manager.create_table(&payer, slot).await.unwrap();
        let err = manager.fetch_table(&table).await.unwrap_err();
        assert!(matches!(
            err,
            LookupTableError::Ledger(LedgerError::TableNotReady { .. })
        ));

        let err = manager
            .wait_until_visible(&table, 0, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupTableError::Ledger(LedgerError::Timeout { .. })));
    }
}
