//! Versioned message inspection helpers
//!
//! Uniform access to static keys, lookup references and the fully resolved
//! account list of a `VersionedMessage`, whether it is Legacy or V0.
//!
//! ## Resolution order
//!
//! For V0 messages the runtime orders accounts as:
//! 1. static keys
//! 2. writable addresses loaded from every lookup, in lookup order
//! 3. readonly addresses loaded from every lookup, in lookup order
//!
//! [`resolve_account_keys`] reproduces that order so instruction account
//! indexes can be mapped back to addresses.

use crate::ledger::LookupTableState;
use solana_sdk::{
    message::{v0::MessageAddressTableLookup, MessageHeader, VersionedMessage},
    pubkey::Pubkey,
};

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Static account keys embedded directly in the message
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Lookup references of a V0 message (empty for Legacy)
#[inline]
#[must_use]
pub fn get_address_table_lookups(message: &VersionedMessage) -> &[MessageAddressTableLookup] {
    match message {
        VersionedMessage::Legacy(_) => &[],
        VersionedMessage::V0(v0_msg) => &v0_msg.address_table_lookups,
    }
}

/// Signers required by the message, in signature order
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let count = get_message_header(message).num_required_signatures as usize;
    let keys = get_static_account_keys(message);
    &keys[..count.min(keys.len())]
}

/// Addresses loaded through lookups, split into (writable, readonly)
///
/// Returns `Err(table)` when a lookup points at a table that is not supplied
/// or at an index past its end.
pub fn load_lookup_addresses(
    message: &VersionedMessage,
    tables: &[LookupTableState],
) -> Result<(Vec<Pubkey>, Vec<Pubkey>), Pubkey> {
    let mut writable = Vec::new();
    let mut readonly = Vec::new();

    for lookup in get_address_table_lookups(message) {
        let table = tables
            .iter()
            .find(|t| t.address == lookup.account_key)
            .ok_or(lookup.account_key)?;

        for &index in &lookup.writable_indexes {
            writable.push(*table.addresses.get(index as usize).ok_or(lookup.account_key)?);
        }
        for &index in &lookup.readonly_indexes {
            readonly.push(*table.addresses.get(index as usize).ok_or(lookup.account_key)?);
        }
    }

    Ok((writable, readonly))
}

/// Full account list in runtime order (static, loaded writable, loaded readonly)
pub fn resolve_account_keys(
    message: &VersionedMessage,
    tables: &[LookupTableState],
) -> Result<Vec<Pubkey>, Pubkey> {
    let (writable, readonly) = load_lookup_addresses(message, tables)?;
    let mut keys = get_static_account_keys(message).to_vec();
    keys.extend(writable);
    keys.extend(readonly);
    Ok(keys)
}

/// Number of addresses the message loads through lookups
pub fn count_lookup_addresses(message: &VersionedMessage) -> usize {
    get_address_table_lookups(message)
        .iter()
        .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        message::{v0, Message},
        signature::Keypair,
        signer::Signer,
    };

    #[test]
    fn test_legacy_message_has_no_lookups() {
        let payer = Keypair::new();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![AccountMeta::new(payer.pubkey(), true)],
        );
        let message = VersionedMessage::Legacy(Message::new(&[ix], Some(&payer.pubkey())));

        assert!(get_address_table_lookups(&message).is_empty());
        assert_eq!(get_required_signers(&message), &[payer.pubkey()]);
        assert_eq!(count_lookup_addresses(&message), 0);
    }

    #[test]
    fn test_resolve_account_keys_runtime_order() {
        let payer = Keypair::new();
        let program_id = Pubkey::new_unique();
        let writable = Pubkey::new_unique();
        let readonly = Pubkey::new_unique();
        let table = LookupTableState::new(Pubkey::new_unique(), None, vec![readonly, writable]);

        let ix = Instruction::new_with_bytes(
            program_id,
            &[0],
            vec![
                AccountMeta::new(payer.pubkey(), true),
                AccountMeta::new_readonly(readonly, false),
                AccountMeta::new(writable, false),
            ],
        );
        let message = VersionedMessage::V0(
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[table.to_account()], Hash::default())
                .unwrap(),
        );

        let keys = resolve_account_keys(&message, &[table.clone()]).unwrap();
        assert_eq!(keys, vec![payer.pubkey(), program_id, writable, readonly]);
        assert_eq!(count_lookup_addresses(&message), 2);
    }

    #[test]
    fn test_missing_table_is_reported() {
        let payer = Keypair::new();
        let loaded = Pubkey::new_unique();
        let table = LookupTableState::new(Pubkey::new_unique(), None, vec![loaded]);
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[0],
            vec![AccountMeta::new(loaded, false)],
        );
        let message = VersionedMessage::V0(
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[table.to_account()], Hash::default())
                .unwrap(),
        );

        assert_eq!(resolve_account_keys(&message, &[]), Err(table.address));
    }
}
