//! Vault orchestrator library
//!
//! Client-side orchestration for the yield-aggregator program: address lookup
//! table lifecycle, v0 transaction building, submission with confirmation,
//! and correlation of program events.
//!
//! ## Layout
//!
//! - [`ledger`]: the `LedgerClient` transport trait, the RPC implementation
//!   and the retry / polling primitives
//! - [`lookup_table`]: create, extend, fetch and wait-until-visible
//! - [`tx_builder`]: compute budget plan, v0 compilation and signing
//! - [`submitter`]: send, confirm, surface logs
//! - [`events`]: decoding, subscriptions, event log and report
//! - [`registry`] and [`program`]: account derivation and instruction encoding
//! - [`scenario`]: the end-to-end sequence driven by the binary

pub mod compat;
pub mod config;
pub mod events;
pub mod ledger;
pub mod lookup_table;
pub mod metrics;
pub mod observability;
pub mod program;
pub mod registry;
pub mod scenario;
pub mod submitter;
pub mod tx_builder;
pub mod wallet;

pub mod test_utils;


// Re-export commonly used types
pub use config::Config;
pub use ledger::{LedgerClient, LedgerError, RpcLedger};
pub use solana_sdk::{message::VersionedMessage, pubkey::Pubkey, signature::Signature};
