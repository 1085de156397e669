//! Transaction submission and confirmation
//!
//! A submitted transaction is never rebuilt here. Transport failures while
//! sending resend the *same* signed bytes, so the signature never changes;
//! anything that needs a fresh blockhash is surfaced as
//! [`LedgerError::BlockhashExpired`] for the caller to decide on.
//!
//! Confirmation polls the signature status at the configured commitment.
//! While the signature is unknown the blockhash validity is checked too: once
//! the blockhash is no longer valid the transaction cannot land anymore.

use crate::config::SubmitConfig;
use crate::ledger::{
    poll_until, retry_with_backoff, LedgerClient, LedgerError, LedgerResult, LookupTableState,
    PollPolicy, RetryPolicy, SendOptions, SimulationReport,
};
use crate::metrics::{metrics, Timer};
use crate::tx_builder::{TransactionBuilderError, TxBuildOutput, TxBuilder};
use solana_sdk::{
    clock::Slot, commitment_config::CommitmentConfig, instruction::Instruction,
    signature::{Keypair, Signature},
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Confirmed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub signature: Signature,
    pub slot: Slot,
}

enum StatusProbe {
    /// Not known to the cluster
    Unknown,
    /// Landed, commitment not reached yet
    Landed,
    Reached(Slot),
}

/// Sends signed transactions and waits for them to reach a commitment level
pub struct TxSubmitter {
    ledger: Arc<dyn LedgerClient>,
    config: SubmitConfig,
    commitment: CommitmentConfig,
}

impl TxSubmitter {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: SubmitConfig, commitment: CommitmentConfig) -> Self {
        Self {
            ledger,
            config,
            commitment,
        }
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    fn send_options(&self) -> SendOptions {
        SendOptions {
            max_retries: self.config.max_retries,
            skip_preflight: self.config.skip_preflight,
            preflight_commitment: self.commitment,
        }
    }

    /// Diagnostic simulation, never part of the default send path
    pub async fn simulate(&self, output: &TxBuildOutput) -> LedgerResult<SimulationReport> {
        let report = self.ledger.simulate_transaction(&output.tx).await?;
        debug!(
            signature = %output.signature,
            ok = report.is_ok(),
            units = ?report.units_consumed,
            "Simulation finished"
        );
        Ok(report)
    }

    /// Send and block until confirmed or failed
    #[instrument(skip_all, fields(signature = %output.signature))]
    pub async fn submit(&self, output: &TxBuildOutput) -> LedgerResult<Confirmation> {
        let result = self.submit_inner(output).await;
        if let Err(err) = &result {
            metrics().record_failure(err.category());
            if !err.logs().is_empty() {
                error!(error = %err, "Submission failed, program logs follow");
                for line in err.logs() {
                    error!("  {}", line);
                }
            } else {
                warn!(error = %err, "Submission failed");
            }
        }
        result
    }

    async fn submit_inner(&self, output: &TxBuildOutput) -> LedgerResult<Confirmation> {
        if self.config.preflight_simulation {
            let report = self.simulate(output).await?;
            if let Some(message) = report.err {
                return Err(LedgerError::Simulation {
                    message,
                    logs: report.logs,
                });
            }
        }

        let timer = Timer::new();
        let signature = self.send(output).await?;
        let slot = self.confirm(output).await?;
        timer.observe_duration(&metrics().confirm_latency);
        metrics().tx_confirmed.inc();

        info!(
            signature = %signature,
            slot,
            elapsed_ms = (timer.elapsed_secs() * 1000.0) as u64,
            "Transaction confirmed"
        );
        Ok(Confirmation { signature, slot })
    }

    /// Bounded transport retries with the same signed bytes
    async fn send(&self, output: &TxBuildOutput) -> LedgerResult<Signature> {
        let policy = RetryPolicy {
            max_attempts: self.config.send_attempts,
            ..RetryPolicy::default()
        };
        let options = self.send_options();
        let mut attempts = 0u64;

        let result = retry_with_backoff("send_transaction", &policy, || {
            attempts += 1;
            self.ledger.send_transaction(&output.tx, options)
        })
        .await;

        if attempts > 1 {
            metrics().send_retries.inc_by(attempts - 1);
        }

        match result {
            Ok(signature) => {
                metrics().tx_submitted.inc();
                if signature != output.signature {
                    warn!(
                        expected = %output.signature,
                        returned = %signature,
                        "Node returned an unexpected signature"
                    );
                }
                Ok(output.signature)
            }
            // An earlier attempt was delivered and its response lost
            Err(LedgerError::AlreadyProcessed { .. }) => {
                metrics().tx_submitted.inc();
                info!(
                    signature = %output.signature,
                    attempts,
                    "Transaction already delivered, confirming"
                );
                Ok(output.signature)
            }
            Err(LedgerError::BlockhashExpired { .. }) => Err(LedgerError::BlockhashExpired {
                signature: Some(output.signature),
            }),
            Err(err) => Err(err),
        }
    }

    /// Poll until the commitment is reached, the transaction fails, the
    /// blockhash expires or the configured timeout runs out
    async fn confirm(&self, output: &TxBuildOutput) -> LedgerResult<Slot> {
        let policy = PollPolicy::fixed(self.config.confirm_poll());
        let signature = output.signature;

        poll_until("confirmation", &policy, self.config.confirm_timeout(), || async move {
            match self.check_status(&signature).await? {
                StatusProbe::Reached(slot) => return Ok(Some(slot)),
                StatusProbe::Landed => return Ok(None),
                StatusProbe::Unknown => {}
            }
            if self.ledger.is_blockhash_valid(&output.blockhash).await? {
                return Ok(None);
            }
            // It may have landed between the two reads
            match self.check_status(&signature).await? {
                StatusProbe::Reached(slot) => Ok(Some(slot)),
                StatusProbe::Landed => Ok(None),
                StatusProbe::Unknown => Err(LedgerError::BlockhashExpired {
                    signature: Some(signature),
                }),
            }
        })
        .await
    }

    /// Failure carries the transaction's logs
    async fn check_status(&self, signature: &Signature) -> LedgerResult<StatusProbe> {
        let Some(status) = self.ledger.get_signature_status(signature, self.commitment).await? else {
            return Ok(StatusProbe::Unknown);
        };

        if let Some(message) = status.err {
            let logs = match self.ledger.get_transaction_logs(signature).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Could not fetch logs of failed transaction");
                    Vec::new()
                }
            };
            return Err(LedgerError::TransactionFailed {
                signature: *signature,
                message,
                logs,
            });
        }

        Ok(if status.reached_commitment {
            StatusProbe::Reached(status.slot)
        } else {
            StatusProbe::Landed
        })
    }

    /// Build with `builder`, submit and wait for confirmation
    pub async fn send_and_confirm(
        &self,
        builder: &TxBuilder,
        ix: Instruction,
        fee_payer: &Keypair,
        extra_signers: &[&Keypair],
        lookup_tables: &[LookupTableState],
    ) -> Result<Confirmation, TransactionBuilderError> {
        let timer = Timer::new();
        let output = builder.build(ix, fee_payer, extra_signers, lookup_tables).await?;
        timer.observe_duration(&metrics().build_latency);
        metrics().tx_built.inc();
        Ok(self.submit(&output).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputeBudgetConfig;
    use crate::test_utils::MockLedger;
    use solana_sdk::{
        instruction::AccountMeta,
        pubkey::Pubkey,
        signer::Signer,
    };
    use std::time::Duration;

    fn memo_ix(payer: &Keypair) -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            b"noop",
            vec![AccountMeta::new(payer.pubkey(), true)],
        )
    }

    fn components(ledger: Arc<MockLedger>, config: SubmitConfig) -> (TxBuilder, TxSubmitter) {
        (
            TxBuilder::new(ledger.clone(), ComputeBudgetConfig::default()),
            TxSubmitter::new(ledger, config, CommitmentConfig::confirmed()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_confirms() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let (builder, submitter) = components(ledger.clone(), SubmitConfig::default());

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        let confirmation = submitter.submit(&output).await.unwrap();
        assert_eq!(confirmation.signature, output.signature);
        assert_eq!(ledger.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retry_resends_same_bytes() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_next_sends(2);
        let payer = Keypair::new();
        let (builder, submitter) = components(ledger.clone(), SubmitConfig::default());

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        let confirmation = submitter.submit(&output).await.unwrap();

        assert_eq!(confirmation.signature, output.signature);
        let attempts = ledger.send_attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|sig| *sig == output.signature));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_blockhash_rejected_at_send() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let (builder, submitter) = components(ledger.clone(), SubmitConfig::default());

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        ledger.expire_blockhash(&output.blockhash);

        let err = submitter.submit(&output).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::BlockhashExpired { signature: Some(sig) } if sig == output.signature
        ));
        assert!(ledger.get_signature_status(&output.signature, CommitmentConfig::confirmed())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_blockhash_detected_while_confirming() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_landing_delay(Duration::from_secs(3600));
        let payer = Keypair::new();
        let config = SubmitConfig {
            skip_preflight: true,
            ..SubmitConfig::default()
        };
        let (builder, submitter) = components(ledger.clone(), config);

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        let blockhash = output.blockhash;
        let expirer = ledger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            expirer.expire_blockhash(&blockhash);
        });

        let err = submitter.submit(&output).await.unwrap_err();
        assert!(err.needs_rebuild());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_landing_delay(Duration::from_secs(3600));
        let payer = Keypair::new();
        let config = SubmitConfig {
            confirm_timeout_secs: 10,
            ..SubmitConfig::default()
        };
        let (builder, submitter) = components(ledger, config);

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        let err = submitter.submit(&output).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_response_then_already_processed_confirms() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let (builder, submitter) = components(ledger.clone(), SubmitConfig::default());
        ledger.lose_next_responses(1);

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        let confirmation = submitter.submit(&output).await.unwrap();

        assert_eq!(confirmation.signature, output.signature);
        // One lost answer, then the node reports the duplicate
        assert_eq!(ledger.sent_count(), 2);
        assert_eq!(ledger.landed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_simulation_toggle() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let config = SubmitConfig {
            preflight_simulation: true,
            ..SubmitConfig::default()
        };
        let (builder, submitter) = components(ledger.clone(), config);

        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        submitter.submit(&output).await.unwrap();
        assert_eq!(ledger.simulation_count(), 1);

        let (builder, submitter) = components(ledger.clone(), SubmitConfig::default());
        let output = builder.build(memo_ix(&payer), &payer, &[], &[]).await.unwrap();
        submitter.submit(&output).await.unwrap();
        assert_eq!(ledger.simulation_count(), 1);
    }
}
