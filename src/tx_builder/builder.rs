//! Core TxBuilder implementation
//!
//! Pipeline per transaction:
//! 1. plan instructions (budget directives + one domain instruction)
//! 2. fetch the latest blockhash, immediately before compiling
//! 3. compile a v0 message against the supplied lookup tables
//! 4. check the compiled message (order, static/lookup disjointness)
//! 5. sign with exactly the required signer set

use crate::compat;
use crate::config::ComputeBudgetConfig;
use crate::ledger::{LedgerClient, LookupTableState};
use crate::tx_builder::errors::TransactionBuilderError;
use crate::tx_builder::instructions::{
    plan_domain_instructions, plan_plain_instructions, sanity_check_ix_order, InstructionPlan,
};
use crate::tx_builder::output::TxBuildOutput;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Builds signed v0 transactions
pub struct TxBuilder {
    ledger: Arc<dyn LedgerClient>,
    compute_budget: ComputeBudgetConfig,
}

impl TxBuilder {
    pub fn new(ledger: Arc<dyn LedgerClient>, compute_budget: ComputeBudgetConfig) -> Self {
        Self {
            ledger,
            compute_budget,
        }
    }

    pub fn compute_budget(&self) -> &ComputeBudgetConfig {
        &self.compute_budget
    }

    /// Build a domain transaction: `[cu_limit, cu_price, domain_ix]`
    ///
    /// `lookup_tables` must come from a visibility-checked fetch; a table
    /// that is not yet visible makes the transaction invalid on-chain.
    #[instrument(skip_all, fields(program = %domain_ix.program_id, tables = lookup_tables.len()))]
    pub async fn build(
        &self,
        domain_ix: Instruction,
        fee_payer: &Keypair,
        extra_signers: &[&Keypair],
        lookup_tables: &[LookupTableState],
    ) -> Result<TxBuildOutput, TransactionBuilderError> {
        let plan = plan_domain_instructions(
            self.compute_budget.unit_limit,
            self.compute_budget.unit_price_micro_lamports,
            domain_ix,
        )?;
        self.compile_and_sign(plan, fee_payer, extra_signers, lookup_tables)
            .await
    }

    /// Build a single-instruction transaction without budget directives
    /// or lookup tables (lookup table program calls)
    pub async fn build_plain(
        &self,
        ix: Instruction,
        fee_payer: &Keypair,
        extra_signers: &[&Keypair],
    ) -> Result<TxBuildOutput, TransactionBuilderError> {
        let plan = plan_plain_instructions(ix);
        self.compile_and_sign(plan, fee_payer, extra_signers, &[]).await
    }

    async fn compile_and_sign(
        &self,
        plan: InstructionPlan,
        fee_payer: &Keypair,
        extra_signers: &[&Keypair],
        lookup_tables: &[LookupTableState],
    ) -> Result<TxBuildOutput, TransactionBuilderError> {
        sanity_check_ix_order(&plan)?;

        let table_accounts: Vec<AddressLookupTableAccount> =
            lookup_tables.iter().map(LookupTableState::to_account).collect();

        let (blockhash, last_valid_block_height) = self.ledger.get_latest_blockhash().await?;

        let message = v0::Message::try_compile(
            &fee_payer.pubkey(),
            &plan.instructions,
            &table_accounts,
            blockhash,
        )
        .map_err(|e| TransactionBuilderError::Compile(e.to_string()))?;
        let message = VersionedMessage::V0(message);

        check_static_lookup_disjoint(&message, lookup_tables)?;

        let signers = select_signers(&message, fee_payer, extra_signers)?;
        let tx = VersionedTransaction::try_new(message, signers.as_slice())
            .map_err(|e| TransactionBuilderError::Signing(e.to_string()))?;

        let output = TxBuildOutput::new(tx, blockhash, last_valid_block_height);
        debug!(
            signature = %output.signature,
            static_accounts = output.static_account_count,
            loaded_accounts = output.loaded_account_count,
            size = output.wire_size(),
            "Transaction built"
        );
        Ok(output)
    }
}

/// Reject messages whose static keys repeat an address loaded from a table
pub fn check_static_lookup_disjoint(
    message: &VersionedMessage,
    lookup_tables: &[LookupTableState],
) -> Result<(), TransactionBuilderError> {
    let static_keys: HashSet<&Pubkey> = compat::get_static_account_keys(message).iter().collect();

    for lookup in compat::get_address_table_lookups(message) {
        let table = lookup_tables
            .iter()
            .find(|t| t.address == lookup.account_key)
            .ok_or_else(|| {
                TransactionBuilderError::Compile(format!(
                    "message references unknown lookup table {}",
                    lookup.account_key
                ))
            })?;

        for index in lookup.writable_indexes.iter().chain(&lookup.readonly_indexes) {
            let account = table.addresses.get(*index as usize).ok_or_else(|| {
                TransactionBuilderError::Compile(format!(
                    "lookup index {} out of range for table {}",
                    index, table.address
                ))
            })?;
            if static_keys.contains(account) {
                return Err(TransactionBuilderError::StaticAccountOverlap {
                    account: *account,
                    table: table.address,
                });
            }
        }
    }

    Ok(())
}

/// Pick exactly the keypairs the message header requires
fn select_signers<'a>(
    message: &VersionedMessage,
    fee_payer: &'a Keypair,
    extra_signers: &[&'a Keypair],
) -> Result<Vec<&'a Keypair>, TransactionBuilderError> {
    let available: Vec<&'a Keypair> = std::iter::once(fee_payer)
        .chain(extra_signers.iter().copied())
        .collect();

    compat::get_required_signers(message)
        .iter()
        .map(|required| {
            available
                .iter()
                .copied()
                .find(|kp| kp.pubkey() == *required)
                .ok_or_else(|| {
                    TransactionBuilderError::Signing(format!("missing keypair for signer {}", required))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedger;
    use solana_sdk::instruction::AccountMeta;

    fn builder(ledger: Arc<MockLedger>) -> TxBuilder {
        TxBuilder::new(ledger, ComputeBudgetConfig::default())
    }

    #[tokio::test]
    async fn test_build_places_table_accounts_out_of_static_list() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let program_id = Pubkey::new_unique();

        let in_table: Vec<Pubkey> = (0..12).map(|_| Pubkey::new_unique()).collect();
        let not_in_table: Vec<Pubkey> = (0..3).map(|_| Pubkey::new_unique()).collect();
        let table = LookupTableState::new(Pubkey::new_unique(), Some(payer.pubkey()), in_table.clone());

        let mut metas = vec![AccountMeta::new(payer.pubkey(), true)];
        metas.extend(in_table.iter().map(|k| AccountMeta::new(*k, false)));
        metas.extend(not_in_table.iter().map(|k| AccountMeta::new_readonly(*k, false)));
        let ix = Instruction::new_with_bytes(program_id, &[9], metas);

        let output = builder(ledger).build(ix, &payer, &[], &[table.clone()]).await.unwrap();

        // payer + 3 non-table accounts + aggregator program + compute budget program
        assert_eq!(output.static_account_count, 1 + not_in_table.len() + 2);
        assert_eq!(output.loaded_account_count, in_table.len());
        assert_eq!(output.lookup_tables, vec![table.address]);

        let static_keys = compat::get_static_account_keys(&output.tx.message);
        for key in &in_table {
            assert!(!static_keys.contains(key));
        }
    }

    #[tokio::test]
    async fn test_build_signs_with_required_set_only() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let co_signer = Keypair::new();
        let unrelated = Keypair::new();

        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![
                AccountMeta::new(payer.pubkey(), true),
                AccountMeta::new_readonly(co_signer.pubkey(), true),
            ],
        );

        let output = builder(ledger)
            .build(ix, &payer, &[&co_signer, &unrelated, &payer], &[])
            .await
            .unwrap();
        assert_eq!(output.required_signers(), &[payer.pubkey(), co_signer.pubkey()]);
        assert!(output.tx.verify_with_results().iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn test_build_fails_without_required_signer() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let authority = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![AccountMeta::new_readonly(authority, true)],
        );

        let err = builder(ledger).build(ix, &payer, &[], &[]).await.unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Signing(_)));
    }

    #[tokio::test]
    async fn test_build_uses_fresh_blockhash() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let ix = || {
            Instruction::new_with_bytes(
                Pubkey::new_unique(),
                &[1],
                vec![AccountMeta::new(payer.pubkey(), true)],
            )
        };
        let builder = builder(ledger.clone());

        let first = builder.build(ix(), &payer, &[], &[]).await.unwrap();
        ledger.advance_blockhash();
        let second = builder.build(ix(), &payer, &[], &[]).await.unwrap();
        assert_ne!(first.blockhash, second.blockhash);
        assert_ne!(first.signature, second.signature);
    }

    #[test]
    fn test_disjoint_check_flags_overlap() {
        let payer = Keypair::new();
        let shared = Pubkey::new_unique();
        let table = LookupTableState::new(Pubkey::new_unique(), None, vec![shared]);

        // Hand-built message with `shared` both static and loaded
        let message = VersionedMessage::V0(v0::Message {
            header: solana_sdk::message::MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 0,
            },
            account_keys: vec![payer.pubkey(), shared],
            recent_blockhash: Default::default(),
            instructions: vec![],
            address_table_lookups: vec![v0::MessageAddressTableLookup {
                account_key: table.address,
                writable_indexes: vec![0],
                readonly_indexes: vec![],
            }],
        });

        assert!(matches!(
            check_static_lookup_disjoint(&message, &[table]),
            Err(TransactionBuilderError::StaticAccountOverlap { .. })
        ));
    }
}
