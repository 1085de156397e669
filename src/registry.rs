//! Account registry
//!
//! Pure data: every address the scenario touches, derived once from
//! configuration. PDAs come from the program id, token accounts from the
//! associated token program. The two lending bundles are kept as given.

use crate::config::{parse_pubkey, ConfigError, ProgramConfig, ProtocolsConfig};
use solana_sdk::{instruction::AccountMeta, pubkey::Pubkey, system_program, sysvar};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::collections::HashSet;

pub const CONFIG_SEED: &[u8] = b"config";
pub const SHARE_MINT_SEED: &[u8] = b"cusdc-mint";

/// Token accounts owned by one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAccounts {
    pub wallet: Pubkey,
    /// Deposit asset account
    pub usdc: Pubkey,
    /// Share token account
    pub shares: Pubkey,
}

#[derive(Debug, Clone)]
pub struct AccountRegistry {
    pub program_id: Pubkey,
    pub usdc_mint: Pubkey,
    pub token_program: Pubkey,
    pub associated_token_program: Pubkey,
    pub system_program: Pubkey,
    pub rent_sysvar: Pubkey,

    /// Config PDA (`["config"]`)
    pub config: Pubkey,
    /// Share mint PDA (`["cusdc-mint"]`)
    pub share_mint: Pubkey,
    /// Deposit asset account owned by the config PDA
    pub vault_usdc: Pubkey,

    bundle_a: Vec<AccountMeta>,
    bundle_b: Vec<AccountMeta>,
    extra_table_addresses: Vec<Pubkey>,
}

impl AccountRegistry {
    pub fn new(
        program_id: Pubkey,
        usdc_mint: Pubkey,
        token_program: Pubkey,
        bundle_a: Vec<AccountMeta>,
        bundle_b: Vec<AccountMeta>,
        extra_table_addresses: Vec<Pubkey>,
    ) -> Self {
        let (config, _) = Pubkey::find_program_address(&[CONFIG_SEED], &program_id);
        let (share_mint, _) = Pubkey::find_program_address(&[SHARE_MINT_SEED], &program_id);
        let vault_usdc = get_associated_token_address_with_program_id(&config, &usdc_mint, &token_program);

        Self {
            program_id,
            usdc_mint,
            token_program,
            associated_token_program: spl_associated_token_account::id(),
            system_program: system_program::id(),
            rent_sysvar: sysvar::rent::id(),
            config,
            share_mint,
            vault_usdc,
            bundle_a,
            bundle_b,
            extra_table_addresses,
        }
    }

    pub fn from_config(program: &ProgramConfig, protocols: &ProtocolsConfig) -> Result<Self, ConfigError> {
        let metas = |accounts: &[crate::config::BundleAccount]| {
            accounts
                .iter()
                .map(|a| a.to_account_meta())
                .collect::<Result<Vec<_>, _>>()
        };
        let extra = protocols
            .extra_table_addresses
            .iter()
            .map(|a| parse_pubkey("protocols.extra_table_addresses", a))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(
            parse_pubkey("program.program_id", &program.program_id)?,
            parse_pubkey("program.usdc_mint", &program.usdc_mint)?,
            parse_pubkey("program.token_program", &program.token_program)?,
            metas(&protocols.bundle_a)?,
            metas(&protocols.bundle_b)?,
            extra,
        ))
    }

    pub fn user_accounts(&self, wallet: &Pubkey) -> UserAccounts {
        UserAccounts {
            wallet: *wallet,
            usdc: get_associated_token_address_with_program_id(wallet, &self.usdc_mint, &self.token_program),
            shares: get_associated_token_address_with_program_id(
                wallet,
                &self.share_mint,
                &self.token_program,
            ),
        }
    }

    pub fn bundle_a(&self) -> &[AccountMeta] {
        &self.bundle_a
    }

    pub fn bundle_b(&self) -> &[AccountMeta] {
        &self.bundle_b
    }

    /// Remaining-accounts tail: bundle A then bundle B, order preserved
    pub fn remaining_accounts(&self) -> Vec<AccountMeta> {
        self.bundle_a.iter().chain(&self.bundle_b).cloned().collect()
    }

    /// Addresses to place in the lookup table for `wallet`'s transactions
    ///
    /// Fixed accounts first, then both bundles, then extras; duplicates are
    /// dropped keeping the first occurrence.
    pub fn lookup_table_addresses(&self, wallet: &Pubkey) -> Vec<Pubkey> {
        let user = self.user_accounts(wallet);
        let fixed = [
            *wallet,
            self.config,
            user.usdc,
            user.shares,
            self.vault_usdc,
            self.share_mint,
            self.usdc_mint,
            self.token_program,
            self.associated_token_program,
            self.system_program,
            self.rent_sysvar,
        ];

        dedup_preserving_order(
            fixed
                .into_iter()
                .chain(self.bundle_a.iter().map(|m| m.pubkey))
                .chain(self.bundle_b.iter().map(|m| m.pubkey))
                .chain(self.extra_table_addresses.iter().copied()),
        )
    }
}

pub fn dedup_preserving_order(addresses: impl IntoIterator<Item = Pubkey>) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    addresses.into_iter().filter(|a| seen.insert(*a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(n: usize) -> Vec<AccountMeta> {
        (0..n).map(|_| AccountMeta::new(Pubkey::new_unique(), false)).collect()
    }

    #[test]
    fn test_pdas_are_deterministic() {
        let program_id = Pubkey::new_unique();
        let usdc = Pubkey::new_unique();
        let a = AccountRegistry::new(program_id, usdc, spl_token::id(), vec![], vec![], vec![]);
        let b = AccountRegistry::new(program_id, usdc, spl_token::id(), vec![], vec![], vec![]);
        assert_eq!(a.config, b.config);
        assert_eq!(a.share_mint, b.share_mint);
        assert_eq!(a.vault_usdc, b.vault_usdc);
        assert_ne!(a.config, a.share_mint);
    }

    #[test]
    fn test_remaining_accounts_order() {
        let a = bundle(13);
        let b = bundle(31);
        let registry = AccountRegistry::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            spl_token::id(),
            a.clone(),
            b.clone(),
            vec![],
        );
        let tail = registry.remaining_accounts();
        assert_eq!(tail.len(), 44);
        assert_eq!(tail[0], a[0]);
        assert_eq!(tail[13], b[0]);
        assert_eq!(tail[43], b[30]);
    }

    #[test]
    fn test_lookup_addresses_dedup() {
        let shared = Pubkey::new_unique();
        let mut a = bundle(3);
        a.push(AccountMeta::new_readonly(shared, false));
        let mut b = bundle(2);
        b.push(AccountMeta::new_readonly(shared, false));
        b.push(AccountMeta::new_readonly(spl_token::id(), false));

        let registry = AccountRegistry::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            spl_token::id(),
            a,
            b,
            vec![shared],
        );
        let wallet = Pubkey::new_unique();
        let addresses = registry.lookup_table_addresses(&wallet);

        assert_eq!(addresses.len(), 11 + 4 + 2);
        assert_eq!(addresses[0], wallet);
        assert_eq!(addresses.iter().filter(|a| **a == shared).count(), 1);
    }
}
