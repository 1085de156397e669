//! End-to-end scenario
//!
//! setup (airdrops, lookup table) → init → deposit → update-strategy →
//! rebalance → view → withdraw → report.
//!
//! Each domain step is one v0 transaction. Steps that carry the lending
//! bundles compile against the lookup table, which is created lazily the
//! first time one of them runs. After every confirmation the driver waits for
//! the matching program event instead of sleeping.

use crate::config::{Config, EventConfig, ScenarioConfig};
use crate::events::{
    DepositEvent, EventCorrelator, EventKind, EventLog, EventRecord, ProgramEvent, SubscriptionHandle,
    WithdrawEvent,
};
use crate::ledger::{poll_until, LedgerClient, LookupTableState, PollPolicy};
use crate::lookup_table::LookupTableManager;
use crate::observability::{RunContext, RunSummary};
use crate::program;
use crate::registry::AccountRegistry;
use crate::submitter::{Confirmation, TxSubmitter};
use crate::tx_builder::TxBuilder;
use crate::wallet::WalletManager;
use anyhow::{ensure, Context, Result};
use clap::ValueEnum;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};

const AIRDROP_TIMEOUT: Duration = Duration::from_secs(60);
const QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Scenario steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Step {
    Airdrop,
    Init,
    Deposit,
    UpdateStrategy,
    Rebalance,
    View,
    Withdraw,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Airdrop,
        Step::Init,
        Step::Deposit,
        Step::UpdateStrategy,
        Step::Rebalance,
        Step::View,
        Step::Withdraw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Airdrop => "airdrop",
            Step::Init => "init",
            Step::Deposit => "deposit",
            Step::UpdateStrategy => "update-strategy",
            Step::Rebalance => "rebalance",
            Step::View => "view",
            Step::Withdraw => "withdraw",
        }
    }
}

/// Components shared by every step, wired from configuration
pub struct Components {
    pub ledger: Arc<dyn LedgerClient>,
    pub builder: Arc<TxBuilder>,
    pub submitter: Arc<TxSubmitter>,
    pub tables: LookupTableManager,
    pub events: EventCorrelator,
    pub registry: AccountRegistry,
}

impl Components {
    pub fn new(
        config: &Config,
        ledger: Arc<dyn LedgerClient>,
        user: &WalletManager,
        log: Arc<EventLog>,
    ) -> Result<Self> {
        let registry = AccountRegistry::from_config(&config.program, &config.protocols)
            .context("Failed to resolve program accounts")?;
        let submit_commitment = crate::config::parse_commitment(&config.submit.commitment)
            .context("Invalid submit commitment")?;

        let builder = Arc::new(TxBuilder::new(ledger.clone(), config.compute_budget.clone()));
        let submitter = Arc::new(TxSubmitter::new(
            ledger.clone(),
            config.submit.clone(),
            submit_commitment,
        ));
        let tables = LookupTableManager::new(
            ledger.clone(),
            builder.clone(),
            submitter.clone(),
            user.keypair_arc(),
            config.lookup_table.clone(),
        );
        let events = EventCorrelator::new(ledger.clone(), registry.program_id, log);

        Ok(Self {
            ledger,
            builder,
            submitter,
            tables,
            events,
            registry,
        })
    }
}

/// What a finished run produced
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub summary: RunSummary,
    pub report: String,
    pub records: Vec<EventRecord>,
    pub deposit: Option<DepositEvent>,
    pub withdraw: Option<WithdrawEvent>,
}

pub struct ScenarioDriver {
    components: Components,
    owner: WalletManager,
    user: WalletManager,
    scenario: ScenarioConfig,
    event_config: EventConfig,
    existing_table: Option<Pubkey>,
    table: Option<LookupTableState>,
    ctx: RunContext,
    deposit: Option<DepositEvent>,
    withdraw: Option<WithdrawEvent>,
}

impl ScenarioDriver {
    pub fn new(components: Components, owner: WalletManager, user: WalletManager, config: &Config) -> Result<Self> {
        let existing_table = config
            .lookup_table
            .existing_table
            .as_deref()
            .map(|t| crate::config::parse_pubkey("lookup_table.existing_table", t))
            .transpose()?;

        Ok(Self {
            components,
            owner,
            user,
            scenario: config.scenario.clone(),
            event_config: config.events.clone(),
            existing_table,
            table: None,
            ctx: RunContext::new(),
            deposit: None,
            withdraw: None,
        })
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.components.registry
    }

    pub fn run_context(&self) -> &RunContext {
        &self.ctx
    }

    fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.event_config.settle_timeout_ms)
    }

    /// Run `steps` in scenario order, then settle events and render the report
    pub async fn run(&mut self, steps: &[Step]) -> Result<ScenarioOutcome> {
        info!(
            run_id = %self.ctx.run_id(),
            user = %self.user.pubkey(),
            program = %self.components.registry.program_id,
            "Starting scenario"
        );

        self.components
            .events
            .start()
            .await
            .context("Failed to start event stream")?;
        let handles: Vec<SubscriptionHandle> = EventKind::ALL
            .iter()
            .map(|kind| self.components.events.subscribe(*kind))
            .collect();

        let result = self.run_steps(steps).await;

        let log = self.components.events.log().clone();
        let buffered = log.wait_quiescent(QUIET_PERIOD, self.settle_timeout()).await;
        for handle in &handles {
            self.components.events.unsubscribe(handle);
        }
        self.components.events.shutdown().await;
        result?;

        let records = log.snapshot();
        let report = self.components.events.report(self.event_config.report_truncate);
        info!(events = buffered, "Scenario finished");

        Ok(ScenarioOutcome {
            summary: self.ctx.summary(records.len()),
            report,
            records,
            deposit: self.deposit.clone(),
            withdraw: self.withdraw.clone(),
        })
    }

    async fn run_steps(&mut self, steps: &[Step]) -> Result<()> {
        for step in Step::ALL.into_iter().filter(|s| steps.contains(s)) {
            let span = self.ctx.span(step.name());
            let result = match step {
                Step::Airdrop => self.airdrop().instrument(span).await,
                Step::Init => self.init().instrument(span).await,
                Step::Deposit => self.deposit().instrument(span).await,
                Step::UpdateStrategy => self.update_strategy().instrument(span).await,
                Step::Rebalance => self.rebalance().instrument(span).await,
                Step::View => self.view().instrument(span).await,
                Step::Withdraw => self.withdraw().instrument(span).await,
            };
            result.with_context(|| format!("Step '{}' failed", step.name()))?;
        }
        Ok(())
    }

    /// Fund both wallets concurrently and wait until the credit is readable
    pub async fn airdrop(&mut self) -> Result<()> {
        let started = self.ctx.start_step();
        let ledger = &self.components.ledger;
        let lamports = self.scenario.airdrop_lamports;
        let user = self.user.pubkey();
        let owner = self.owner.pubkey();

        futures::future::try_join(
            ledger.request_airdrop(&user, lamports),
            ledger.request_airdrop(&owner, lamports),
        )
        .await
        .context("Airdrop request failed")?;

        let policy = PollPolicy::default();
        for wallet in [user, owner] {
            poll_until("airdrop balance", &policy, Some(AIRDROP_TIMEOUT), || async move {
                Ok((ledger.get_balance(&wallet).await? > 0).then_some(()))
            })
            .await
            .with_context(|| format!("Airdrop to {} never became visible", wallet))?;
        }

        info!(user = %user, owner = %owner, lamports, "Wallets funded");
        self.ctx.record("airdrop", started, None, None);
        Ok(())
    }

    /// Lookup table holding every address the domain transactions touch
    pub async fn ensure_table(&mut self) -> Result<LookupTableState> {
        if let Some(table) = &self.table {
            return Ok(table.clone());
        }
        let started = self.ctx.start_step();
        let wanted = self.components.registry.lookup_table_addresses(&self.user.pubkey());
        let tables = &self.components.tables;
        let timeout = tables.config().visibility_timeout();

        let state = match self.existing_table {
            Some(address) => {
                let current = tables
                    .wait_until_visible(&address, 0, timeout)
                    .await
                    .context("Configured lookup table is not visible")?;
                let missing: Vec<Pubkey> = wanted
                    .iter()
                    .filter(|a| !current.contains(a))
                    .copied()
                    .collect();
                if missing.is_empty() {
                    current
                } else {
                    tables
                        .extend_table(&address, self.user.keypair(), &missing)
                        .await
                        .context("Failed to extend configured lookup table")?;
                    tables
                        .wait_until_visible(&address, current.len() + missing.len(), timeout)
                        .await?
                }
            }
            None => tables
                .create_and_extend(self.user.keypair(), &wanted)
                .await
                .context("Failed to build lookup table")?,
        };

        info!(table = %state.address, addresses = state.len(), "Lookup table ready");
        self.ctx.record("lookup-table", started, None, None);
        self.table = Some(state.clone());
        Ok(state)
    }

    async fn send(&mut self, step: &str, ix: Instruction, with_table: bool) -> Result<Confirmation> {
        let tables = if with_table {
            vec![self.ensure_table().await?]
        } else {
            Vec::new()
        };
        let started = self.ctx.start_step();
        let confirmation = self
            .components
            .submitter
            .send_and_confirm(&self.components.builder, ix, self.user.keypair(), &[], &tables)
            .await
            .with_context(|| format!("{} transaction failed", step))?;

        self.ctx.record(
            step,
            started,
            Some(confirmation.signature.to_string()),
            Some(confirmation.slot),
        );
        Ok(confirmation)
    }

    async fn await_event(&self, kind: EventKind, confirmation: &Confirmation) -> Result<ProgramEvent> {
        let record = self
            .components
            .events
            .log()
            .wait_for_signature(kind, &confirmation.signature, self.settle_timeout())
            .await
            .with_context(|| format!("{} not observed for {}", kind, confirmation.signature))?;
        Ok(record.event)
    }

    pub async fn init(&mut self) -> Result<()> {
        if self.scenario.skip_init {
            info!("Skipping initialization");
            return Ok(());
        }
        let ix = program::init_aggregator_config(
            &self.components.registry,
            &self.user.pubkey(),
            self.scenario.initial_allocation_bps,
        );
        let confirmation = self.send("init", ix, false).await?;
        info!(
            signature = %confirmation.signature,
            config = %self.components.registry.config,
            bps = self.scenario.initial_allocation_bps,
            "Aggregator initialized"
        );
        Ok(())
    }

    pub async fn deposit(&mut self) -> Result<()> {
        let amount = self.scenario.deposit_amount;
        let user_accounts = self.components.registry.user_accounts(&self.user.pubkey());
        let balance = self
            .components
            .ledger
            .get_token_account_balance(&user_accounts.usdc)
            .await
            .with_context(|| format!("Deposit account {} is not readable", user_accounts.usdc))?;
        ensure!(
            balance >= amount,
            "Deposit account {} holds {} but {} is required",
            user_accounts.usdc,
            balance,
            amount
        );

        let ix = program::deposit(&self.components.registry, &self.user.pubkey(), amount);
        let confirmation = self.send("deposit", ix, true).await?;

        let ProgramEvent::Deposit(event) = self.await_event(EventKind::Deposit, &confirmation).await? else {
            anyhow::bail!("unexpected event for deposit");
        };
        ensure!(event.amount == amount, "Deposit event reports {} instead of {}", event.amount, amount);
        ensure!(event.minted_amount > 0, "Deposit minted no shares");
        info!(amount, minted = event.minted_amount, "Deposit confirmed");
        self.deposit = Some(event);
        Ok(())
    }

    pub async fn update_strategy(&mut self) -> Result<()> {
        let bps = self.scenario.updated_allocation_bps;
        let ix = program::update_strategy(&self.components.registry, &self.user.pubkey(), bps);
        let confirmation = self.send("update-strategy", ix, false).await?;
        if let ProgramEvent::AllocationUpdate(event) =
            self.await_event(EventKind::AllocationUpdate, &confirmation).await?
        {
            info!(bps_a = event.bps_a, bps_b = event.bps_b, "Allocation updated");
        }
        Ok(())
    }

    pub async fn rebalance(&mut self) -> Result<()> {
        let ix = program::rebalance(&self.components.registry, &self.user.pubkey());
        let confirmation = self.send("rebalance", ix, true).await?;
        if let ProgramEvent::Rebalance(event) = self.await_event(EventKind::Rebalance, &confirmation).await? {
            info!(balance_a = event.balance_a, balance_b = event.balance_b, "Rebalanced");
        }
        Ok(())
    }

    pub async fn view(&mut self) -> Result<()> {
        let ix = program::view(&self.components.registry, &self.user.pubkey());
        let confirmation = self.send("view", ix, true).await?;
        if let ProgramEvent::View(event) = self.await_event(EventKind::View, &confirmation).await? {
            info!(yield_value = event.yield_value, "Position valued");
        }
        Ok(())
    }

    /// Redeem the whole share balance
    pub async fn withdraw(&mut self) -> Result<()> {
        let user_accounts = self.components.registry.user_accounts(&self.user.pubkey());
        let shares = self
            .components
            .ledger
            .get_token_account_balance(&user_accounts.shares)
            .await
            .context("Share account is not readable")?;
        if shares == 0 {
            warn!(account = %user_accounts.shares, "No shares to withdraw");
            anyhow::bail!("share balance is zero");
        }

        let ix = program::withdraw(&self.components.registry, &self.user.pubkey(), shares);
        let confirmation = self.send("withdraw", ix, true).await?;

        let ProgramEvent::Withdraw(event) = self.await_event(EventKind::Withdraw, &confirmation).await? else {
            anyhow::bail!("unexpected event for withdraw");
        };
        ensure!(event.returned_amount > 0, "Withdraw returned nothing");
        info!(burned = event.burned_amount, returned = event.returned_amount, "Withdraw confirmed");
        self.withdraw = Some(event);
        Ok(())
    }
}
