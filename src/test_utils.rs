//! Test Utilities Module
//!
//! In-memory [`LedgerClient`] used by the unit and scenario tests.
//!
//! `MockLedger` models the behaviors the orchestration layer has to cope with:
//! - transactions land after a configurable delay, and only while their
//!   blockhash is still valid
//! - lookup table writes become readable after a configurable delay
//! - the lookup table program (create / extend) and the aggregator program
//!   are emulated, including `Program data:` event logs
//! - program-log subscribers receive a notification per landed transaction
//!
//! Only compiled when running tests or when the `test_utils` feature is
//! enabled. Timing uses `tokio::time`, so paused-clock tests run instantly.

#![cfg(any(test, feature = "test_utils"))]

use crate::compat;
use crate::events::{
    AllocationUpdateEvent, DepositEvent, ProgramEvent, RebalanceEvent, ViewEvent, WithdrawEvent,
};
use crate::ledger::{
    LedgerClient, LedgerError, LedgerResult, LogNotification, LogSubscription, LookupTableState,
    SendOptions, SignatureStatus, SimulationReport, LOOKUP_TABLE_CAPACITY,
};
use crate::program::{AggregatorInstruction, BPS_BASE};
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    address_lookup_table::{self, instruction::derive_lookup_table_address},
    clock::Slot,
    commitment_config::CommitmentConfig,
    compute_budget,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Slots between the processed tip and the finalized slot
const FINALITY_LAG: Slot = 32;
/// Oldest reference slot the lookup table program still accepts
const RECENT_SLOT_WINDOW: Slot = 512;
const BLOCKHASH_VALIDITY_BLOCKS: u64 = 150;

#[derive(Debug, Clone)]
struct MockTable {
    authority: Pubkey,
    /// Every write with the instant it becomes readable
    versions: Vec<(Instant, Vec<Pubkey>)>,
}

impl MockTable {
    fn latest(&self) -> &[Pubkey] {
        self.versions.last().map(|(_, a)| a.as_slice()).unwrap_or(&[])
    }

    fn visible_at(&self, now: Instant) -> Option<&[Pubkey]> {
        self.versions
            .iter()
            .rev()
            .find(|(at, _)| *at <= now)
            .map(|(_, a)| a.as_slice())
    }
}

#[derive(Debug, Clone, Default)]
struct AggregatorState {
    initialized: bool,
    allocation_bps: u16,
    total_deposits: u64,
    total_shares: u64,
    balance_a: u64,
    balance_b: u64,
}

impl AggregatorState {
    fn rebalance(&mut self) -> RebalanceEvent {
        let a = (self.total_deposits as u128 * self.allocation_bps as u128 / BPS_BASE as u128) as u64;
        self.balance_a = a;
        self.balance_b = self.total_deposits - a;
        RebalanceEvent {
            balance_a: self.balance_a,
            balance_b: self.balance_b,
        }
    }

    fn shares_for_deposit(&self, amount: u64) -> u64 {
        if self.total_shares == 0 || self.total_deposits == 0 {
            amount
        } else {
            (amount as u128 * self.total_shares as u128 / self.total_deposits as u128) as u64
        }
    }

    fn value_of_shares(&self, shares: u64) -> u64 {
        if self.total_shares == 0 {
            0
        } else {
            (shares as u128 * self.total_deposits as u128 / self.total_shares as u128) as u64
        }
    }
}

/// Mutable on-chain state; executed against a copy and committed on success
#[derive(Debug, Clone, Default)]
struct Bank {
    tables: HashMap<Pubkey, MockTable>,
    token_balances: HashMap<Pubkey, u64>,
    aggregator: AggregatorState,
    extend_count: usize,
}

#[derive(Debug)]
struct Pending {
    tx: VersionedTransaction,
    land_at: Instant,
}

#[derive(Debug, Clone)]
struct Landed {
    slot: Slot,
    err: Option<String>,
    logs: Vec<String>,
}

struct Subscriber {
    program: Pubkey,
    sender: mpsc::UnboundedSender<LogNotification>,
    cancel: oneshot::Receiver<()>,
}

impl Subscriber {
    fn cancelled(&mut self) -> bool {
        !matches!(self.cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

struct MockState {
    blockhash: Hash,
    issued: HashSet<Hash>,
    expired: HashSet<Hash>,
    block_height: u64,
    slot: Slot,

    landing_delay: Duration,
    table_visibility_delay: Duration,
    fail_sends: usize,
    lose_responses: usize,
    refuse_airdrops: bool,
    fail_subscriptions: bool,

    send_attempts: Vec<Signature>,
    simulation_count: usize,
    pending: Vec<Pending>,
    landed: HashMap<Signature, Landed>,

    bank: Bank,
    lamports: HashMap<Pubkey, u64>,
    aggregator_program: Option<Pubkey>,
    subscribers: Vec<Subscriber>,
}

/// In-memory ledger with eventual visibility
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        let blockhash = Hash::new_unique();
        Self {
            state: Mutex::new(MockState {
                blockhash,
                issued: HashSet::from([blockhash]),
                expired: HashSet::new(),
                block_height: 200_000,
                slot: 250_000,
                landing_delay: Duration::ZERO,
                table_visibility_delay: Duration::ZERO,
                fail_sends: 0,
                lose_responses: 0,
                refuse_airdrops: false,
                fail_subscriptions: false,
                send_attempts: Vec::new(),
                simulation_count: 0,
                pending: Vec::new(),
                landed: HashMap::new(),
                bank: Bank::default(),
                lamports: HashMap::new(),
                aggregator_program: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Emulate the aggregator program at `program_id`
    pub fn with_aggregator(self, program_id: Pubkey) -> Self {
        self.state.lock().aggregator_program = Some(program_id);
        self
    }

    pub fn set_landing_delay(&self, delay: Duration) {
        self.state.lock().landing_delay = delay;
    }

    pub fn set_table_visibility_delay(&self, delay: Duration) {
        self.state.lock().table_visibility_delay = delay;
    }

    /// The next `count` sends fail with a transport error
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().fail_sends = count;
    }

    /// The next `count` accepted sends are delivered but answered with a
    /// transport error
    pub fn lose_next_responses(&self, count: usize) {
        self.state.lock().lose_responses = count;
    }

    pub fn refuse_airdrops(&self) {
        self.state.lock().refuse_airdrops = true;
    }

    pub fn fail_subscriptions(&self) {
        self.state.lock().fail_subscriptions = true;
    }

    /// Issue a new latest blockhash; older ones stay valid
    pub fn advance_blockhash(&self) -> Hash {
        let mut state = self.state.lock();
        let next = Hash::new_unique();
        state.blockhash = next;
        state.issued.insert(next);
        state.block_height += 1;
        next
    }

    /// Invalidate `blockhash`; a fresh latest blockhash is issued if needed
    pub fn expire_blockhash(&self, blockhash: &Hash) {
        let mut state = self.state.lock();
        state.expired.insert(*blockhash);
        if state.blockhash == *blockhash {
            let next = Hash::new_unique();
            state.blockhash = next;
            state.issued.insert(next);
        }
    }

    pub fn set_token_balance(&self, account: &Pubkey, amount: u64) {
        self.state.lock().bank.token_balances.insert(*account, amount);
    }

    pub fn token_balance(&self, account: &Pubkey) -> Option<u64> {
        self.state.lock().bank.token_balances.get(account).copied()
    }

    /// Every send call, including the ones that failed
    pub fn send_attempts(&self) -> Vec<Signature> {
        self.state.lock().send_attempts.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().send_attempts.len()
    }

    pub fn simulation_count(&self) -> usize {
        self.state.lock().simulation_count
    }

    /// Extend instructions that executed successfully
    pub fn extend_count(&self) -> usize {
        self.process_pending();
        self.state.lock().bank.extend_count
    }

    pub fn landed_count(&self) -> usize {
        self.process_pending();
        self.state.lock().landed.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain_mut(|s| !s.cancelled());
        state.subscribers.len()
    }

    /// Push a raw notification to the subscribers of `program`
    pub fn inject_logs(&self, program: &Pubkey, signature: Signature, err: Option<String>, logs: Vec<String>) {
        let mut state = self.state.lock();
        let notification = LogNotification {
            signature,
            slot: state.slot,
            err,
            logs,
        };
        notify(&mut state.subscribers, &[*program], &notification);
    }

    fn process_pending(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Instant::now();
        if state.pending.iter().all(|p| p.land_at > now) {
            return;
        }

        let (due, waiting): (Vec<Pending>, Vec<Pending>) =
            std::mem::take(&mut state.pending).into_iter().partition(|p| p.land_at <= now);
        state.pending = waiting;

        for Pending { tx, .. } in due {
            let blockhash = *tx.message.recent_blockhash();
            if !state.blockhash_valid(&blockhash) {
                // Expired before inclusion: the cluster drops it silently
                continue;
            }

            state.slot += 1;
            state.block_height += 1;
            let slot = state.slot;
            let mut bank = state.bank.clone();
            let (err, logs) = execute(&mut bank, state.aggregator_program, slot, now, state.table_visibility_delay, &tx);
            if err.is_none() {
                state.bank = bank;
            }

            let signature = tx.signatures[0];
            let keys = compat::get_static_account_keys(&tx.message).to_vec();
            let notification = LogNotification {
                signature,
                slot,
                err: err.clone(),
                logs: logs.clone(),
            };
            notify(&mut state.subscribers, &keys, &notification);
            state.landed.insert(signature, Landed { slot, err, logs });

            // Every block brings a new latest blockhash
            let next = Hash::new_unique();
            state.blockhash = next;
            state.issued.insert(next);
        }
    }
}

impl MockState {
    fn blockhash_valid(&self, blockhash: &Hash) -> bool {
        self.issued.contains(blockhash) && !self.expired.contains(blockhash)
    }

    fn visible_tables(&self, now: Instant) -> Vec<LookupTableState> {
        self.bank
            .tables
            .iter()
            .filter_map(|(address, table)| {
                table
                    .visible_at(now)
                    .map(|a| LookupTableState::new(*address, Some(table.authority), a.to_vec()))
            })
            .collect()
    }
}

fn notify(subscribers: &mut Vec<Subscriber>, keys: &[Pubkey], notification: &LogNotification) {
    subscribers.retain_mut(|sub| {
        if sub.cancelled() {
            return false;
        }
        if keys.contains(&sub.program) {
            return sub.sender.send(notification.clone()).is_ok();
        }
        true
    });
}

/// Run every instruction of `tx` against `bank`; `(error, logs)`
fn execute(
    bank: &mut Bank,
    aggregator_program: Option<Pubkey>,
    slot: Slot,
    now: Instant,
    visibility_delay: Duration,
    tx: &VersionedTransaction,
) -> (Option<String>, Vec<String>) {
    let mut logs = Vec::new();

    let tables: Vec<LookupTableState> = bank
        .tables
        .iter()
        .filter_map(|(address, table)| {
            table
                .visible_at(now)
                .map(|a| LookupTableState::new(*address, Some(table.authority), a.to_vec()))
        })
        .collect();
    let keys = match compat::resolve_account_keys(&tx.message, &tables) {
        Ok(keys) => keys,
        Err(table) => {
            return (Some(format!("AddressLookupTableNotFound: {}", table)), logs);
        }
    };

    for (index, ix) in tx.message.instructions().iter().enumerate() {
        let Some(program) = keys.get(ix.program_id_index as usize).copied() else {
            return (Some(format!("Error processing Instruction {}: invalid program index", index)), logs);
        };
        let accounts: Vec<Pubkey> = ix
            .accounts
            .iter()
            .filter_map(|i| keys.get(*i as usize).copied())
            .collect();

        logs.push(format!("Program {} invoke [1]", program));
        let result = if program == compute_budget::id() {
            Ok(())
        } else if program == address_lookup_table::program::id() {
            execute_lookup_table(bank, slot, now + visibility_delay, &accounts, &ix.data, &mut logs)
        } else if Some(program) == aggregator_program {
            execute_aggregator(bank, &accounts, &ix.data, &mut logs)
        } else {
            Ok(())
        };

        match result {
            Ok(()) => logs.push(format!("Program {} success", program)),
            Err(message) => {
                logs.push(format!("Program {} failed: {}", program, message));
                return (
                    Some(format!("Error processing Instruction {}: {}", index, message)),
                    logs,
                );
            }
        }
    }

    (None, logs)
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_le_bytes(data.get(at..at + 8)?.try_into().ok()?))
}

fn execute_lookup_table(
    bank: &mut Bank,
    slot: Slot,
    visible_at: Instant,
    accounts: &[Pubkey],
    data: &[u8],
    logs: &mut Vec<String>,
) -> Result<(), String> {
    let (Some(&table), Some(&authority)) = (accounts.first(), accounts.get(1)) else {
        return Err("NotEnoughAccountKeys".to_string());
    };

    match read_u32(data, 0) {
        // CreateLookupTable { recent_slot, bump_seed }
        Some(0) => {
            let recent_slot = read_u64(data, 4).ok_or("invalid instruction data")?;
            if recent_slot > slot || slot - recent_slot > RECENT_SLOT_WINDOW {
                logs.push(format!("Program log: {} is not a recent slot", recent_slot));
                return Err("invalid instruction data".to_string());
            }
            let (derived, _) = derive_lookup_table_address(&authority, recent_slot);
            if derived != table {
                return Err("invalid argument".to_string());
            }
            if bank.tables.contains_key(&table) {
                return Err("account already initialized".to_string());
            }
            bank.tables.insert(
                table,
                MockTable {
                    authority,
                    versions: vec![(visible_at, Vec::new())],
                },
            );
            Ok(())
        }
        // ExtendLookupTable { new_addresses }
        Some(2) => {
            let count = read_u64(data, 4).ok_or("invalid instruction data")? as usize;
            let body = data.get(12..12 + count * 32).ok_or("invalid instruction data")?;
            let new_addresses = body.chunks_exact(32).map(|c| {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(c);
                Pubkey::new_from_array(bytes)
            });

            let entry = bank.tables.get_mut(&table).ok_or("uninitialized account")?;
            if entry.authority != authority {
                return Err("incorrect authority".to_string());
            }
            let mut addresses = entry.latest().to_vec();
            for address in new_addresses {
                // Re-sent chunks are absorbed
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
            if addresses.len() > LOOKUP_TABLE_CAPACITY {
                logs.push("Program log: Extended lookup table length would exceed max capacity".to_string());
                return Err("invalid instruction data".to_string());
            }
            entry.versions.push((visible_at, addresses));
            bank.extend_count += 1;
            Ok(())
        }
        _ => Err("unsupported lookup table instruction".to_string()),
    }
}

fn account(accounts: &[Pubkey], index: usize) -> Result<Pubkey, String> {
    accounts
        .get(index)
        .copied()
        .ok_or_else(|| "NotEnoughAccountKeys".to_string())
}

fn program_error(name: &str) -> String {
    format!("custom program error: {}", name)
}

fn execute_aggregator(
    bank: &mut Bank,
    accounts: &[Pubkey],
    data: &[u8],
    logs: &mut Vec<String>,
) -> Result<(), String> {
    let ix = AggregatorInstruction::decode(data).ok_or("InstructionFallbackNotFound")?;
    logs.push(format!("Program log: Instruction: {}", ix.name()));

    let agg = &mut bank.aggregator;
    if !matches!(ix, AggregatorInstruction::InitAggregatorConfig { .. }) && !agg.initialized {
        return Err(program_error("AccountNotInitialized"));
    }

    let mut events = Vec::new();
    match ix {
        AggregatorInstruction::InitAggregatorConfig { allocation_bps } => {
            if agg.initialized {
                return Err("account already in use".to_string());
            }
            if allocation_bps > BPS_BASE {
                return Err(program_error("InvalidAllocation"));
            }
            agg.initialized = true;
            agg.allocation_bps = allocation_bps;
        }
        AggregatorInstruction::Deposit { amount } => {
            let user = account(accounts, 0)?;
            let user_usdc = account(accounts, 2)?;
            let user_shares = account(accounts, 3)?;
            if amount == 0 {
                return Err(program_error("InvalidAmount"));
            }
            let balance = bank.token_balances.get(&user_usdc).copied().unwrap_or(0);
            if balance < amount {
                return Err(program_error("InsufficientBalance"));
            }

            let minted = agg.shares_for_deposit(amount);
            bank.token_balances.insert(user_usdc, balance - amount);
            *bank.token_balances.entry(user_shares).or_default() += minted;
            agg.total_deposits += amount;
            agg.total_shares += minted;

            events.push(ProgramEvent::Rebalance(agg.rebalance()));
            events.push(ProgramEvent::Deposit(DepositEvent {
                user,
                amount,
                minted_amount: minted,
            }));
        }
        AggregatorInstruction::Withdraw { amount } => {
            let user = account(accounts, 1)?;
            let user_usdc = account(accounts, 2)?;
            let user_shares = account(accounts, 3)?;
            if amount == 0 {
                return Err(program_error("InvalidAmount"));
            }
            let shares = bank.token_balances.get(&user_shares).copied().unwrap_or(0);
            if shares < amount {
                return Err(program_error("InsufficientBalance"));
            }

            let returned = agg.value_of_shares(amount);
            if returned > agg.total_deposits {
                return Err(program_error("InsufficientLiquidity"));
            }
            bank.token_balances.insert(user_shares, shares - amount);
            *bank.token_balances.entry(user_usdc).or_default() += returned;
            agg.total_deposits -= returned;
            agg.total_shares -= amount;
            agg.rebalance();

            events.push(ProgramEvent::Withdraw(WithdrawEvent {
                user,
                burned_amount: amount,
                returned_amount: returned,
            }));
        }
        AggregatorInstruction::UpdateStrategy { allocation_bps } => {
            if allocation_bps > BPS_BASE {
                return Err(program_error("InvalidAllocation"));
            }
            agg.allocation_bps = allocation_bps;
            events.push(ProgramEvent::AllocationUpdate(AllocationUpdateEvent {
                bps_a: allocation_bps,
                bps_b: BPS_BASE - allocation_bps,
            }));
        }
        AggregatorInstruction::Rebalance => {
            events.push(ProgramEvent::Rebalance(agg.rebalance()));
        }
        AggregatorInstruction::View => {
            let authority = account(accounts, 0)?;
            let user_shares = account(accounts, 2)?;
            let shares = bank.token_balances.get(&user_shares).copied().unwrap_or(0);
            events.push(ProgramEvent::View(ViewEvent {
                user: authority,
                yield_value: agg.value_of_shares(shares),
            }));
        }
    }

    for event in events {
        logs.push(event.to_log_line().map_err(|e| e.to_string())?);
    }
    Ok(())
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn endpoint(&self) -> &str {
        "mock://ledger"
    }

    async fn get_latest_blockhash(&self) -> LedgerResult<(Hash, u64)> {
        let state = self.state.lock();
        Ok((state.blockhash, state.block_height + BLOCKHASH_VALIDITY_BLOCKS))
    }

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> LedgerResult<bool> {
        Ok(self.state.lock().blockhash_valid(blockhash))
    }

    async fn get_slot(&self, commitment: CommitmentConfig) -> LedgerResult<Slot> {
        self.process_pending();
        let slot = self.state.lock().slot;
        Ok(if commitment.is_finalized() {
            slot.saturating_sub(FINALITY_LAG)
        } else {
            slot
        })
    }

    async fn get_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        Ok(self.state.lock().lamports.get(address).copied().unwrap_or(0))
    }

    async fn get_token_account_balance(&self, address: &Pubkey) -> LedgerResult<u64> {
        self.process_pending();
        self.token_balance(address)
            .ok_or_else(|| LedgerError::Validation(format!("could not find account {}", address)))
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
        options: SendOptions,
    ) -> LedgerResult<Signature> {
        let signature = tx.signatures.first().copied().unwrap_or_default();
        self.process_pending();
        let now = Instant::now();
        let mut state = self.state.lock();
        state.send_attempts.push(signature);

        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(LedgerError::transport("mock://ledger", "connection reset"));
        }

        if !options.skip_preflight {
            if state.landed.contains_key(&signature) {
                return Err(LedgerError::AlreadyProcessed { signature: None });
            }
            if !state.blockhash_valid(tx.message.recent_blockhash()) {
                return Err(LedgerError::BlockhashExpired { signature: None });
            }
            if !tx.verify_with_results().iter().all(|ok| *ok) {
                return Err(LedgerError::Validation("signature verification failed".to_string()));
            }
            let tables = state.visible_tables(now);
            if let Err(table) = compat::load_lookup_addresses(&tx.message, &tables) {
                return Err(LedgerError::Simulation {
                    message: format!("AddressLookupTableNotFound: {}", table),
                    logs: Vec::new(),
                });
            }
        }

        let known = state.landed.contains_key(&signature)
            || state.pending.iter().any(|p| p.tx.signatures.first() == Some(&signature));
        if !known {
            let land_at = now + state.landing_delay;
            state.pending.push(Pending {
                tx: tx.clone(),
                land_at,
            });
        }
        if state.lose_responses > 0 {
            state.lose_responses -= 1;
            return Err(LedgerError::transport("mock://ledger", "response lost"));
        }
        Ok(signature)
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        _commitment: CommitmentConfig,
    ) -> LedgerResult<Option<SignatureStatus>> {
        self.process_pending();
        Ok(self.state.lock().landed.get(signature).map(|landed| SignatureStatus {
            slot: landed.slot,
            err: landed.err.clone(),
            reached_commitment: true,
        }))
    }

    async fn get_transaction_logs(&self, signature: &Signature) -> LedgerResult<Vec<String>> {
        self.process_pending();
        self.state
            .lock()
            .landed
            .get(signature)
            .map(|landed| landed.logs.clone())
            .ok_or_else(|| LedgerError::Validation(format!("transaction {} not found", signature)))
    }

    async fn simulate_transaction(&self, tx: &VersionedTransaction) -> LedgerResult<SimulationReport> {
        self.process_pending();
        let mut state = self.state.lock();
        state.simulation_count += 1;

        if !state.blockhash_valid(tx.message.recent_blockhash()) {
            return Ok(SimulationReport {
                err: Some("BlockhashNotFound".to_string()),
                ..SimulationReport::default()
            });
        }

        let mut bank = state.bank.clone();
        let (err, logs) = execute(
            &mut bank,
            state.aggregator_program,
            state.slot + 1,
            Instant::now(),
            state.table_visibility_delay,
            tx,
        );
        Ok(SimulationReport {
            err,
            logs,
            units_consumed: Some(5_000),
        })
    }

    async fn get_lookup_table(&self, address: &Pubkey) -> LedgerResult<Option<LookupTableState>> {
        self.process_pending();
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state.bank.tables.get(address).and_then(|table| {
            table
                .visible_at(now)
                .map(|a| LookupTableState::new(*address, Some(table.authority), a.to_vec()))
        }))
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> LedgerResult<Signature> {
        let mut state = self.state.lock();
        if state.refuse_airdrops {
            return Err(LedgerError::AirdropRefused("faucet disabled".to_string()));
        }
        *state.lamports.entry(*address).or_default() += lamports;
        Ok(Signature::new_unique())
    }

    async fn subscribe_program_logs(&self, program_id: &Pubkey) -> LedgerResult<LogSubscription> {
        let mut state = self.state.lock();
        if state.fail_subscriptions {
            return Err(LedgerError::Subscription("logsSubscribe rejected".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.subscribers.push(Subscriber {
            program: *program_id,
            sender,
            cancel: cancel_rx,
        });
        Ok(LogSubscription::new(receiver, cancel_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{decode_logs, EventKind};
    use solana_sdk::{
        instruction::{AccountMeta, Instruction},
        message::{v0, VersionedMessage},
        signature::Keypair,
        signer::Signer,
    };

    fn signed(payer: &Keypair, ix: Instruction, blockhash: Hash) -> VersionedTransaction {
        let message = v0::Message::try_compile(&payer.pubkey(), &[ix], &[], blockhash).unwrap();
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[payer]).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_tx_dropped_when_blockhash_expires() {
        let ledger = MockLedger::new();
        ledger.set_landing_delay(Duration::from_secs(10));
        let payer = Keypair::new();
        let (blockhash, _) = ledger.get_latest_blockhash().await.unwrap();
        let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[], vec![AccountMeta::new(payer.pubkey(), true)]);
        let tx = signed(&payer, ix, blockhash);

        let sig = ledger.send_transaction(&tx, SendOptions::default()).await.unwrap();
        ledger.expire_blockhash(&blockhash);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(ledger
            .get_signature_status(&sig, CommitmentConfig::confirmed())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lost_response_still_lands_and_resend_is_rejected() {
        let ledger = MockLedger::new();
        let payer = Keypair::new();
        let (blockhash, _) = ledger.get_latest_blockhash().await.unwrap();
        let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[], vec![AccountMeta::new(payer.pubkey(), true)]);
        let tx = signed(&payer, ix, blockhash);
        ledger.lose_next_responses(1);

        let err = ledger.send_transaction(&tx, SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Transport { .. }));
        assert_eq!(ledger.landed_count(), 1);

        let err = ledger.send_transaction(&tx, SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
        // Without preflight the node just acknowledges the duplicate
        let skip = SendOptions {
            skip_preflight: true,
            ..SendOptions::default()
        };
        assert_eq!(ledger.send_transaction(&tx, skip).await.unwrap(), tx.signatures[0]);
        assert_eq!(ledger.landed_count(), 1);

        let (latest, _) = ledger.get_latest_blockhash().await.unwrap();
        assert_ne!(latest, blockhash);
    }

    #[tokio::test]
    async fn test_aggregator_deposit_emits_rebalance_then_deposit() {
        let program_id = Pubkey::new_unique();
        let ledger = MockLedger::new().with_aggregator(program_id);
        let payer = Keypair::new();
        let user_usdc = Pubkey::new_unique();
        let user_shares = Pubkey::new_unique();
        ledger.set_token_balance(&user_usdc, 500);

        let (blockhash, _) = ledger.get_latest_blockhash().await.unwrap();
        let init = Instruction::new_with_bytes(
            program_id,
            &AggregatorInstruction::InitAggregatorConfig { allocation_bps: 6_000 }.data(),
            vec![AccountMeta::new(payer.pubkey(), true)],
        );
        ledger
            .send_transaction(&signed(&payer, init, blockhash), SendOptions::default())
            .await
            .unwrap();

        let deposit = Instruction::new_with_bytes(
            program_id,
            &AggregatorInstruction::Deposit { amount: 200 }.data(),
            vec![
                AccountMeta::new(payer.pubkey(), true),
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new(user_usdc, false),
                AccountMeta::new(user_shares, false),
            ],
        );
        let sig = ledger
            .send_transaction(&signed(&payer, deposit, blockhash), SendOptions::default())
            .await
            .unwrap();

        let (events, errors) = decode_logs(&ledger.get_transaction_logs(&sig).await.unwrap());
        assert!(errors.is_empty());
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::Rebalance, EventKind::Deposit]);
        assert_eq!(
            events[0],
            ProgramEvent::Rebalance(RebalanceEvent { balance_a: 120, balance_b: 80 })
        );
        assert_eq!(ledger.token_balance(&user_usdc), Some(300));
        assert_eq!(ledger.token_balance(&user_shares), Some(200));
    }

    #[tokio::test]
    async fn test_failed_instruction_rolls_back() {
        let program_id = Pubkey::new_unique();
        let ledger = MockLedger::new().with_aggregator(program_id);
        let payer = Keypair::new();
        let (blockhash, _) = ledger.get_latest_blockhash().await.unwrap();

        let rebalance = Instruction::new_with_bytes(
            program_id,
            &AggregatorInstruction::Rebalance.data(),
            vec![AccountMeta::new(payer.pubkey(), true)],
        );
        let sig = ledger
            .send_transaction(&signed(&payer, rebalance, blockhash), SendOptions::default())
            .await
            .unwrap();

        let status = ledger
            .get_signature_status(&sig, CommitmentConfig::confirmed())
            .await
            .unwrap()
            .unwrap();
        assert!(status.err.unwrap().contains("AccountNotInitialized"));
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_is_pruned() {
        let ledger = MockLedger::new();
        let program = Pubkey::new_unique();
        let subscription = ledger.subscribe_program_logs(&program).await.unwrap();
        assert_eq!(ledger.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(ledger.subscriber_count(), 0);
    }
}
