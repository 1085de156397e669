//! Transaction builder
//!
//! Assembles signed v0 transactions for the aggregator program:
//!
//! - **errors**: error taxonomy with retryability and metric categories
//! - **instructions**: compute budget planning and order validation
//! - **builder**: blockhash fetch, v0 compile against lookup tables, signing
//! - **output**: signed transaction plus submission metadata
//!
//! ## Instruction layout
//!
//! Domain transactions always carry `[SetComputeUnitLimit, SetComputeUnitPrice,
//! domain_ix]`. Lookup table program calls go through [`TxBuilder::build_plain`]
//! and carry just the one instruction.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use vault_orchestrator::config::ComputeBudgetConfig;
//! # use vault_orchestrator::ledger::{LedgerClient, LookupTableState};
//! # use vault_orchestrator::tx_builder::{TxBuilder, TransactionBuilderError};
//! # use solana_sdk::{instruction::Instruction, signature::Keypair};
//! # async fn example(
//! #     ledger: Arc<dyn LedgerClient>,
//! #     ix: Instruction,
//! #     payer: Keypair,
//! #     table: LookupTableState,
//! # ) -> Result<(), TransactionBuilderError> {
//! let builder = TxBuilder::new(ledger, ComputeBudgetConfig::default());
//! let output = builder.build(ix, &payer, &[], &[table]).await?;
//! println!("built {} ({} bytes)", output.signature, output.wire_size());
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub use errors::TransactionBuilderError;

mod builder;
mod instructions;
mod output;

pub use builder::{check_static_lookup_disjoint, TxBuilder};
pub use instructions::{
    plan_domain_instructions, plan_plain_instructions, sanity_check_ix_order, InstructionPlan,
};
pub use output::TxBuildOutput;
