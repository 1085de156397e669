//! Instruction builders with the program's fixed account order

use super::AggregatorInstruction;
use crate::registry::AccountRegistry;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

fn instruction(
    registry: &AccountRegistry,
    ix: AggregatorInstruction,
    mut accounts: Vec<AccountMeta>,
    with_tail: bool,
) -> Instruction {
    if with_tail {
        accounts.extend(registry.remaining_accounts());
    }
    Instruction {
        program_id: registry.program_id,
        accounts,
        data: ix.data(),
    }
}

pub fn init_aggregator_config(
    registry: &AccountRegistry,
    authority: &Pubkey,
    allocation_bps: u16,
) -> Instruction {
    let accounts = vec![
        AccountMeta::new(*authority, true),
        AccountMeta::new(registry.config, false),
        AccountMeta::new_readonly(registry.usdc_mint, false),
        AccountMeta::new(registry.share_mint, false),
        AccountMeta::new(registry.vault_usdc, false),
        AccountMeta::new_readonly(registry.token_program, false),
        AccountMeta::new_readonly(registry.associated_token_program, false),
        AccountMeta::new_readonly(registry.system_program, false),
    ];
    instruction(
        registry,
        AggregatorInstruction::InitAggregatorConfig { allocation_bps },
        accounts,
        false,
    )
}

pub fn deposit(registry: &AccountRegistry, user: &Pubkey, amount: u64) -> Instruction {
    let user_accounts = registry.user_accounts(user);
    let accounts = vec![
        AccountMeta::new(*user, true),
        AccountMeta::new(registry.config, false),
        AccountMeta::new(user_accounts.usdc, false),
        AccountMeta::new(user_accounts.shares, false),
        AccountMeta::new(registry.vault_usdc, false),
        AccountMeta::new(registry.share_mint, false),
        AccountMeta::new_readonly(registry.usdc_mint, false),
        AccountMeta::new_readonly(registry.token_program, false),
        AccountMeta::new_readonly(registry.associated_token_program, false),
        AccountMeta::new_readonly(registry.system_program, false),
        AccountMeta::new_readonly(registry.rent_sysvar, false),
    ];
    instruction(registry, AggregatorInstruction::Deposit { amount }, accounts, true)
}

/// `shares` is the amount of share tokens to burn
pub fn withdraw(registry: &AccountRegistry, user: &Pubkey, shares: u64) -> Instruction {
    let user_accounts = registry.user_accounts(user);
    let accounts = vec![
        AccountMeta::new(registry.config, false),
        AccountMeta::new(*user, true),
        AccountMeta::new(user_accounts.usdc, false),
        AccountMeta::new(user_accounts.shares, false),
        AccountMeta::new(registry.vault_usdc, false),
        AccountMeta::new(registry.share_mint, false),
        AccountMeta::new_readonly(registry.usdc_mint, false),
        AccountMeta::new_readonly(registry.token_program, false),
        AccountMeta::new_readonly(registry.associated_token_program, false),
        AccountMeta::new_readonly(registry.system_program, false),
        AccountMeta::new_readonly(registry.rent_sysvar, false),
    ];
    instruction(registry, AggregatorInstruction::Withdraw { amount: shares }, accounts, true)
}

pub fn rebalance(registry: &AccountRegistry, authority: &Pubkey) -> Instruction {
    let accounts = vec![
        AccountMeta::new(registry.config, false),
        AccountMeta::new_readonly(*authority, true),
        AccountMeta::new(registry.vault_usdc, false),
        AccountMeta::new(registry.share_mint, false),
        AccountMeta::new_readonly(registry.usdc_mint, false),
        AccountMeta::new_readonly(registry.token_program, false),
        AccountMeta::new_readonly(registry.associated_token_program, false),
        AccountMeta::new_readonly(registry.system_program, false),
        AccountMeta::new_readonly(registry.rent_sysvar, false),
    ];
    instruction(registry, AggregatorInstruction::Rebalance, accounts, true)
}

pub fn update_strategy(registry: &AccountRegistry, authority: &Pubkey, allocation_bps: u16) -> Instruction {
    let accounts = vec![
        AccountMeta::new(registry.config, false),
        AccountMeta::new_readonly(*authority, true),
        AccountMeta::new(registry.vault_usdc, false),
        AccountMeta::new_readonly(registry.usdc_mint, false),
    ];
    instruction(
        registry,
        AggregatorInstruction::UpdateStrategy { allocation_bps },
        accounts,
        false,
    )
}

/// Reports the yield of `authority`'s share position
pub fn view(registry: &AccountRegistry, authority: &Pubkey) -> Instruction {
    let user_accounts = registry.user_accounts(authority);
    let accounts = vec![
        AccountMeta::new_readonly(*authority, true),
        AccountMeta::new(registry.config, false),
        AccountMeta::new_readonly(user_accounts.shares, false),
        AccountMeta::new(registry.share_mint, false),
    ];
    instruction(registry, AggregatorInstruction::View, accounts, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AccountRegistry {
        AccountRegistry::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            spl_token::id(),
            vec![AccountMeta::new(Pubkey::new_unique(), false); 13],
            vec![AccountMeta::new_readonly(Pubkey::new_unique(), false); 31],
            vec![],
        )
    }

    #[test]
    fn test_deposit_account_order() {
        let registry = registry();
        let user = Pubkey::new_unique();
        let ix = deposit(&registry, &user, 100_000_000);

        assert_eq!(ix.program_id, registry.program_id);
        assert_eq!(ix.accounts.len(), 11 + 44);
        assert_eq!(ix.accounts[0], AccountMeta::new(user, true));
        assert_eq!(ix.accounts[1].pubkey, registry.config);
        assert_eq!(ix.accounts[10].pubkey, registry.rent_sysvar);
        assert_eq!(&ix.accounts[11..], registry.remaining_accounts().as_slice());
        assert_eq!(
            AggregatorInstruction::decode(&ix.data),
            Some(AggregatorInstruction::Deposit { amount: 100_000_000 })
        );
    }

    #[test]
    fn test_withdraw_places_config_first() {
        let registry = registry();
        let user = Pubkey::new_unique();
        let ix = withdraw(&registry, &user, 5);
        assert_eq!(ix.accounts[0].pubkey, registry.config);
        assert_eq!(ix.accounts[1], AccountMeta::new(user, true));
    }

    #[test]
    fn test_tail_only_where_required() {
        let registry = registry();
        let authority = Pubkey::new_unique();
        assert_eq!(init_aggregator_config(&registry, &authority, 10_000).accounts.len(), 8);
        assert_eq!(update_strategy(&registry, &authority, 5_000).accounts.len(), 4);
        assert_eq!(rebalance(&registry, &authority).accounts.len(), 9 + 44);
        assert_eq!(view(&registry, &authority).accounts.len(), 4 + 44);
    }
}
