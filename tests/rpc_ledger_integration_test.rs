use solana_sdk::commitment_config::CommitmentConfig;
use std::time::Duration;
use vault_orchestrator::ledger::{LedgerClient, RpcLedger};

const RPC: &str = "https://api.devnet.solana.com";
const WS: &str = "wss://api.devnet.solana.com";

fn ledger() -> RpcLedger {
    RpcLedger::new(RPC.to_string(), WS.to_string(), CommitmentConfig::confirmed(), false)
}

#[tokio::test]
#[ignore] // Requires network access
async fn test_devnet_reads() {
    let ledger = ledger();

    let (blockhash, last_valid) = ledger.get_latest_blockhash().await.expect("blockhash");
    assert!(last_valid > 0);
    assert!(ledger.is_blockhash_valid(&blockhash).await.unwrap());

    let confirmed = ledger.get_slot(CommitmentConfig::confirmed()).await.unwrap();
    let finalized = ledger.get_slot(CommitmentConfig::finalized()).await.unwrap();
    assert!(finalized <= confirmed);
}

#[tokio::test]
#[ignore] // Requires network access
async fn test_devnet_log_subscription() {
    let program = spl_token::id();
    let mut subscription = ledger()
        .subscribe_program_logs(&program)
        .await
        .expect("subscription registered");

    // The token program is busy enough to produce traffic within a few seconds
    let received = tokio::time::timeout(Duration::from_secs(20), subscription.notifications.recv()).await;
    assert!(matches!(received, Ok(Some(_))));
    subscription.cancel();
}

#[tokio::test]
async fn test_airdrop_refused_when_disabled() {
    let wallet = solana_sdk::pubkey::Pubkey::new_unique();
    assert!(ledger().request_airdrop(&wallet, 1).await.is_err());
}
