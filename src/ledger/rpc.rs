//! `LedgerClient` backed by a Solana JSON-RPC + WebSocket endpoint

use super::{
    LedgerClient, LedgerError, LedgerResult, LogNotification, LogSubscription, LookupTableState,
    SendOptions, SignatureStatus, SimulationReport,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig,
    RpcTransactionLogsConfig, RpcTransactionLogsFilter,
};
use solana_sdk::{
    address_lookup_table::state::AddressLookupTable,
    clock::Slot,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::{option_serializer::OptionSerializer, UiTransactionEncoding};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

/// JSON-RPC ledger client
pub struct RpcLedger {
    rpc_url: String,
    ws_url: String,
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    allow_airdrop: bool,
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .field("commitment", &self.commitment)
            .field("allow_airdrop", &self.allow_airdrop)
            .finish_non_exhaustive()
    }
}

impl RpcLedger {
    pub fn new(rpc_url: String, ws_url: String, commitment: CommitmentConfig, allow_airdrop: bool) -> Self {
        let client = Arc::new(RpcClient::new_with_commitment(rpc_url.clone(), commitment));
        Self {
            rpc_url,
            ws_url,
            client,
            commitment,
            allow_airdrop,
        }
    }

    fn map_err(&self, err: solana_client::client_error::ClientError) -> LedgerError {
        LedgerError::from_client_error(err, &self.rpc_url)
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    async fn get_latest_blockhash(&self) -> LedgerResult<(Hash, u64)> {
        self.client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> LedgerResult<bool> {
        self.client
            .is_blockhash_valid(blockhash, self.commitment)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn get_slot(&self, commitment: CommitmentConfig) -> LedgerResult<Slot> {
        self.client
            .get_slot_with_commitment(commitment)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        self.client.get_balance(address).await.map_err(|e| self.map_err(e))
    }

    async fn get_token_account_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        let ui_amount = self
            .client
            .get_token_account_balance(address)
            .await
            .map_err(|e| self.map_err(e))?;
        ui_amount.amount.parse::<u64>().map_err(|e| {
            LedgerError::Validation(format!(
                "token balance of {} is not an integer ({}): {}",
                address, ui_amount.amount, e
            ))
        })
    }

    #[instrument(skip(self, tx), fields(signature = %tx.signatures[0]))]
    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SendOptions,
    ) -> LedgerResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(options.preflight_commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(options.max_retries),
            min_context_slot: None,
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> LedgerResult<Option<SignatureStatus>> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(response.value.into_iter().next().flatten().map(|status| SignatureStatus {
            slot: status.slot,
            reached_commitment: status.satisfies_commitment(commitment),
            err: status.err.map(|e| format!("{e:?}")),
        }))
    }

    async fn get_transaction_logs(&self, signature: &Signature) -> LedgerResult<Vec<String>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let tx = self
            .client
            .get_transaction_with_config(signature, config)
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(match tx.transaction.meta.map(|meta| meta.log_messages) {
            Some(OptionSerializer::Some(logs)) => logs,
            _ => Vec::new(),
        })
    }

    async fn simulate_transaction(&self, tx: &VersionedTransaction) -> LedgerResult<SimulationReport> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: true,
            commitment: Some(self.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..Default::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(SimulationReport {
            err: response.value.err.map(|e| format!("{e:?}")),
            logs: response.value.logs.unwrap_or_default(),
            units_consumed: response.value.units_consumed,
        })
    }

    async fn get_lookup_table(&self, address: &Pubkey) -> LedgerResult<Option<LookupTableState>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?;

        let Some(account) = response.value else {
            return Ok(None);
        };

        let table = AddressLookupTable::deserialize(&account.data).map_err(|e| {
            LedgerError::Validation(format!("account {} is not a lookup table: {}", address, e))
        })?;

        Ok(Some(LookupTableState::new(
            *address,
            table.meta.authority,
            table.addresses.to_vec(),
        )))
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> LedgerResult<Signature> {
        if !self.allow_airdrop {
            return Err(LedgerError::AirdropRefused(format!(
                "airdrops are disabled for {}",
                self.rpc_url
            )));
        }
        self.client
            .request_airdrop(address, lamports)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn subscribe_program_logs(&self, program_id: &Pubkey) -> LedgerResult<LogSubscription> {
        info!("Subscribing to program logs: {} via {}", program_id, self.ws_url);

        let client = PubsubClient::new(&self.ws_url)
            .await
            .map(Arc::new)
            .map_err(|e| LedgerError::Subscription(format!("connect {}: {}", self.ws_url, e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<LedgerResult<()>>();
        let commitment = self.commitment;
        let program_id = *program_id;

        tokio::spawn(async move {
            let (mut notifications, unsubscribe) = match client
                .logs_subscribe(
                    RpcTransactionLogsFilter::Mentions(vec![program_id.to_string()]),
                    RpcTransactionLogsConfig {
                        commitment: Some(commitment),
                    },
                )
                .await
            {
                Ok(result) => {
                    let _ = ready_tx.send(Ok(()));
                    result
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(LedgerError::Subscription(format!(
                        "logsSubscribe for {}: {}",
                        program_id, e
                    ))));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("Log subscription for {} cancelled", program_id);
                        break;
                    }
                    next = notifications.next() => {
                        let Some(response) = next else {
                            warn!("Log stream for {} ended", program_id);
                            break;
                        };
                        let value = response.value;
                        let Ok(signature) = Signature::from_str(&value.signature) else {
                            warn!("Dropping log notification with bad signature: {}", value.signature);
                            continue;
                        };
                        let notification = LogNotification {
                            signature,
                            slot: response.context.slot,
                            err: value.err.map(|e| format!("{e:?}")),
                            logs: value.logs,
                        };
                        if tx.send(notification).is_err() {
                            break;
                        }
                    }
                }
            }
            unsubscribe().await;
        });

        ready_rx
            .await
            .map_err(|_| LedgerError::Subscription("subscription task exited early".to_string()))??;

        Ok(LogSubscription::new(rx, cancel_tx))
    }
}
