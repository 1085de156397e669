//! Configuration module for the vault orchestrator
//!
//! This module handles configuration loading from TOML files and
//! environment variables. Protocol addresses and batch sizes live here,
//! never in code.

use crate::ledger::{PollPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, instruction::AccountMeta, pubkey::Pubkey};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint configuration
    pub rpc: RpcConfig,

    /// Wallet configuration
    pub wallet: WalletConfig,

    /// Compute budget directives prepended to every domain instruction
    #[serde(default)]
    pub compute_budget: ComputeBudgetConfig,

    /// Lookup table lifecycle
    #[serde(default)]
    pub lookup_table: LookupTableConfig,

    /// Submission and confirmation
    #[serde(default)]
    pub submit: SubmitConfig,

    /// Event capture
    #[serde(default)]
    pub events: EventConfig,

    /// Aggregator program wiring
    pub program: ProgramConfig,

    /// Opaque lending protocol account bundles
    pub protocols: ProtocolsConfig,

    /// Scenario parameters
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint
    pub url: String,

    /// WebSocket endpoint used for log subscriptions
    pub ws_url: String,

    /// Default commitment for reads and confirmations
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Allow test-credit requests (never enable against mainnet)
    #[serde(default)]
    pub allow_airdrop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Funding wallet; receives the second airdrop
    pub keypair_path: String,

    /// Scenario user (fee payer, ALT authority, depositor). A fresh keypair
    /// is generated when unset.
    #[serde(default)]
    pub user_keypair_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeBudgetConfig {
    /// Compute unit ceiling
    #[serde(default = "default_cu_limit")]
    pub unit_limit: u32,

    /// Compute unit price in micro-lamports
    #[serde(default = "default_cu_price")]
    pub unit_price_micro_lamports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupTableConfig {
    /// Addresses per extend instruction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between extend chunks, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Upper bound when waiting for the table to become visible
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Backoff while waiting for visibility
    #[serde(default)]
    pub visibility_poll: PollPolicy,

    /// Retries for a single failed chunk
    #[serde(default)]
    pub chunk_retry: RetryPolicy,

    /// Reuse an existing table instead of creating one
    #[serde(default)]
    pub existing_table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    /// Rebroadcast count handed to the RPC node
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Client-side send attempts on transport failure (same signed bytes)
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,

    /// Skip the node's pre-flight checks
    #[serde(default)]
    pub skip_preflight: bool,

    /// Run a diagnostic simulation before every send
    #[serde(default)]
    pub preflight_simulation: bool,

    /// Confirmation target
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Interval between signature status polls, in milliseconds
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,

    /// Upper bound on the confirmation wait; 0 disables the bound
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Upper bound for the post-scenario settle wait, in milliseconds
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// Maximum characters of a long scalar shown in the report
    #[serde(default = "default_report_truncate")]
    pub report_truncate: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Aggregator program id
    pub program_id: String,

    /// Deposit asset mint
    pub usdc_mint: String,

    /// Token program owning the deposit asset and share mint
    #[serde(default = "default_token_program")]
    pub token_program: String,
}

/// One account of an opaque lending bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleAccount {
    pub address: String,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolsConfig {
    /// First lending protocol bundle (placed first in remaining accounts)
    pub bundle_a: Vec<BundleAccount>,

    /// Second lending protocol bundle
    pub bundle_b: Vec<BundleAccount>,

    /// Extra addresses to place in the lookup table
    #[serde(default)]
    pub extra_table_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Allocation to protocol A at initialization, basis points
    #[serde(default = "default_bps")]
    pub initial_allocation_bps: u16,

    /// Allocation to protocol A after update-strategy, basis points
    #[serde(default = "default_bps")]
    pub updated_allocation_bps: u16,

    /// Deposit amount in base units
    #[serde(default = "default_deposit_amount")]
    pub deposit_amount: u64,

    /// Lamports requested per airdrop
    #[serde(default = "default_airdrop_lamports")]
    pub airdrop_lamports: u64,

    /// Skip initialization when the config account already exists
    #[serde(default)]
    pub skip_init: bool,
}

// Default value functions
fn default_commitment() -> String { "confirmed".to_string() }
fn default_cu_limit() -> u32 { 1_400_000 }
fn default_cu_price() -> u64 { 1 }
fn default_batch_size() -> usize { 20 }
fn default_settle_delay_ms() -> u64 { 500 }
fn default_visibility_timeout_secs() -> u64 { 30 }
fn default_max_retries() -> usize { 3 }
fn default_send_attempts() -> u32 { 3 }
fn default_confirm_poll_ms() -> u64 { 500 }
fn default_confirm_timeout_secs() -> u64 { 90 }
fn default_settle_timeout_ms() -> u64 { 3000 }
fn default_report_truncate() -> usize { 60 }
fn default_token_program() -> String { spl_token::id().to_string() }
fn default_bps() -> u16 { 10_000 }
fn default_deposit_amount() -> u64 { 100_000_000 }
fn default_airdrop_lamports() -> u64 { 1_000 * 1_000_000_000 }

/// Largest chunk an extend transaction can carry under the packet size limit
pub const MAX_EXTEND_BATCH: usize = 30;

impl Default for ComputeBudgetConfig {
    fn default() -> Self {
        Self {
            unit_limit: default_cu_limit(),
            unit_price_micro_lamports: default_cu_price(),
        }
    }
}

impl Default for LookupTableConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            settle_delay_ms: default_settle_delay_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            visibility_poll: PollPolicy::default(),
            chunk_retry: RetryPolicy::default(),
            existing_table: None,
        }
    }
}

impl LookupTableConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            send_attempts: default_send_attempts(),
            skip_preflight: false,
            preflight_simulation: false,
            commitment: default_commitment(),
            confirm_poll_ms: default_confirm_poll_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

impl SubmitConfig {
    pub fn confirm_timeout(&self) -> Option<Duration> {
        (self.confirm_timeout_secs > 0).then(|| Duration::from_secs(self.confirm_timeout_secs))
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: default_settle_timeout_ms(),
            report_truncate: default_report_truncate(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            initial_allocation_bps: default_bps(),
            updated_allocation_bps: default_bps(),
            deposit_amount: default_deposit_amount(),
            airdrop_lamports: default_airdrop_lamports(),
            skip_init: false,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Parse a commitment name (`processed`, `confirmed`, `finalized`)
pub fn parse_commitment(name: &str) -> Result<CommitmentConfig, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(ConfigError::Validation(format!("Unknown commitment level: {}", other))),
    }
}

pub fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value.trim())
        .map_err(|e| ConfigError::Validation(format!("{}: invalid address '{}': {}", field, value, e)))
}

impl BundleAccount {
    pub fn to_account_meta(&self) -> Result<AccountMeta, ConfigError> {
        let field = self.label.as_deref().unwrap_or("bundle account");
        let pubkey = parse_pubkey(field, &self.address)?;
        Ok(if self.writable {
            AccountMeta::new(pubkey, false)
        } else {
            AccountMeta::new_readonly(pubkey, false)
        })
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read config file {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration with `.env` and environment variable overrides
    ///
    /// Recognised overrides: `ORCH_RPC_URL`, `ORCH_WS_URL`, `ORCH_KEYPAIR`.
    pub fn from_file_with_env(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ORCH_RPC_URL") {
            self.rpc.url = url;
        }
        if let Ok(url) = std::env::var("ORCH_WS_URL") {
            self.rpc.ws_url = url;
        }
        if let Ok(path) = std::env::var("ORCH_KEYPAIR") {
            self.wallet.keypair_path = path;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [("rpc.url", &self.rpc.url), ("rpc.ws_url", &self.rpc.ws_url)] {
            let ok = if name == "rpc.url" {
                url.starts_with("http://") || url.starts_with("https://")
            } else {
                url.starts_with("ws://") || url.starts_with("wss://")
            };
            if !ok {
                return Err(ConfigError::Validation(format!("Invalid URL format for {}: {}", name, url)));
            }
        }

        if self.rpc.allow_airdrop && self.rpc.url.contains("mainnet") {
            return Err(ConfigError::Validation(
                "Airdrops cannot be enabled against a mainnet endpoint".to_string(),
            ));
        }

        parse_commitment(&self.rpc.commitment)?;
        parse_commitment(&self.submit.commitment)?;

        if self.lookup_table.batch_size == 0 || self.lookup_table.batch_size > MAX_EXTEND_BATCH {
            return Err(ConfigError::Validation(format!(
                "lookup_table.batch_size must be within 1..={}, got {}",
                MAX_EXTEND_BATCH, self.lookup_table.batch_size
            )));
        }

        if self.submit.send_attempts == 0 {
            return Err(ConfigError::Validation("submit.send_attempts must be > 0".to_string()));
        }

        for (name, bps) in [
            ("scenario.initial_allocation_bps", self.scenario.initial_allocation_bps),
            ("scenario.updated_allocation_bps", self.scenario.updated_allocation_bps),
        ] {
            if bps > 10_000 {
                return Err(ConfigError::Validation(format!("{} must be <= 10000, got {}", name, bps)));
            }
        }

        parse_pubkey("program.program_id", &self.program.program_id)?;
        parse_pubkey("program.usdc_mint", &self.program.usdc_mint)?;
        parse_pubkey("program.token_program", &self.program.token_program)?;

        if self.protocols.bundle_a.is_empty() || self.protocols.bundle_b.is_empty() {
            return Err(ConfigError::Validation(
                "Both protocol bundles must list at least one account".to_string(),
            ));
        }
        for account in self.protocols.bundle_a.iter().chain(&self.protocols.bundle_b) {
            account.to_account_meta()?;
        }
        for address in &self.protocols.extra_table_addresses {
            parse_pubkey("protocols.extra_table_addresses", address)?;
        }
        if let Some(table) = &self.lookup_table.existing_table {
            parse_pubkey("lookup_table.existing_table", table)?;
        }

        Ok(())
    }

    pub fn commitment(&self) -> CommitmentConfig {
        parse_commitment(&self.rpc.commitment).unwrap_or_else(|_| CommitmentConfig::confirmed())
    }
}
