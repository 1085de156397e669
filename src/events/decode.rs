//! Anchor event decoding
//!
//! The aggregator program emits events as `Program data: <base64>` log
//! lines. The payload starts with an 8-byte discriminator,
//! `sha256("event:<EventName>")[..8]`, followed by the Borsh-encoded
//! fields. Every field here is fixed width, so bincode's little-endian
//! fixed-int layout is byte-identical to Borsh.

use super::EventError;
use crate::program::anchor_discriminator;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// Log line prefix used by `emit!`
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Deposit,
    Withdraw,
    Rebalance,
    AllocationUpdate,
    View,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Deposit,
        EventKind::Withdraw,
        EventKind::Rebalance,
        EventKind::AllocationUpdate,
        EventKind::View,
    ];

    /// On-chain struct name
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Deposit => "DepositEvent",
            EventKind::Withdraw => "WithdrawEvent",
            EventKind::Rebalance => "RebalanceEvent",
            EventKind::AllocationUpdate => "AllocationUpdateEvent",
            EventKind::View => "ViewEvent",
        }
    }

    pub fn discriminator(&self) -> [u8; 8] {
        anchor_discriminator("event", self.name())
    }

    pub fn from_discriminator(disc: &[u8]) -> Option<EventKind> {
        Self::ALL.into_iter().find(|kind| kind.discriminator() == disc)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub user: Pubkey,
    pub amount: u64,
    pub minted_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawEvent {
    pub user: Pubkey,
    pub burned_amount: u64,
    pub returned_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub balance_a: u64,
    pub balance_b: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationUpdateEvent {
    pub bps_a: u16,
    pub bps_b: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub user: Pubkey,
    pub yield_value: u64,
}

/// Any event the aggregator program emits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramEvent {
    Deposit(DepositEvent),
    Withdraw(WithdrawEvent),
    Rebalance(RebalanceEvent),
    AllocationUpdate(AllocationUpdateEvent),
    View(ViewEvent),
}

impl ProgramEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProgramEvent::Deposit(_) => EventKind::Deposit,
            ProgramEvent::Withdraw(_) => EventKind::Withdraw,
            ProgramEvent::Rebalance(_) => EventKind::Rebalance,
            ProgramEvent::AllocationUpdate(_) => EventKind::AllocationUpdate,
            ProgramEvent::View(_) => EventKind::View,
        }
    }

    /// Discriminator followed by the field bytes
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        let body = match self {
            ProgramEvent::Deposit(e) => bincode::serialize(e),
            ProgramEvent::Withdraw(e) => bincode::serialize(e),
            ProgramEvent::Rebalance(e) => bincode::serialize(e),
            ProgramEvent::AllocationUpdate(e) => bincode::serialize(e),
            ProgramEvent::View(e) => bincode::serialize(e),
        }
        .map_err(|e| EventError::decode(self.kind(), e.to_string()))?;

        let mut out = self.kind().discriminator().to_vec();
        out.extend(body);
        Ok(out)
    }

    /// The `Program data:` line the program would log for this event
    pub fn to_log_line(&self) -> Result<String, EventError> {
        Ok(format!("{}{}", PROGRAM_DATA_PREFIX, STANDARD.encode(self.encode()?)))
    }
}

/// Decode one raw payload
///
/// `Ok(None)` for payloads that are not aggregator events (other programs
/// in the same transaction also log `Program data:` lines).
pub fn decode_event(payload: &[u8]) -> Result<Option<ProgramEvent>, EventError> {
    if payload.len() < 8 {
        return Ok(None);
    }
    let (disc, body) = payload.split_at(8);
    let Some(kind) = EventKind::from_discriminator(disc) else {
        return Ok(None);
    };

    let err = |e: bincode::Error| EventError::decode(kind, e.to_string());
    let event = match kind {
        EventKind::Deposit => ProgramEvent::Deposit(bincode::deserialize(body).map_err(err)?),
        EventKind::Withdraw => ProgramEvent::Withdraw(bincode::deserialize(body).map_err(err)?),
        EventKind::Rebalance => ProgramEvent::Rebalance(bincode::deserialize(body).map_err(err)?),
        EventKind::AllocationUpdate => {
            ProgramEvent::AllocationUpdate(bincode::deserialize(body).map_err(err)?)
        }
        EventKind::View => ProgramEvent::View(bincode::deserialize(body).map_err(err)?),
    };
    Ok(Some(event))
}

/// Decode one log line; lines without the data prefix are `Ok(None)`
pub fn decode_log_line(line: &str) -> Result<Option<ProgramEvent>, EventError> {
    let Some(encoded) = line.strip_prefix(PROGRAM_DATA_PREFIX) else {
        return Ok(None);
    };
    let Ok(payload) = STANDARD.decode(encoded.trim()) else {
        return Ok(None);
    };
    decode_event(&payload)
}

/// Decode every event in a transaction's logs, in log order
pub fn decode_logs(logs: &[String]) -> (Vec<ProgramEvent>, Vec<EventError>) {
    let mut events = Vec::new();
    let mut errors = Vec::new();
    for line in logs {
        match decode_log_line(line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    (events, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminators_are_distinct() {
        let mut discs: Vec<[u8; 8]> = EventKind::ALL.iter().map(|k| k.discriminator()).collect();
        discs.sort();
        discs.dedup();
        assert_eq!(discs.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_deposit_layout_matches_borsh() {
        let user = Pubkey::new_unique();
        let event = ProgramEvent::Deposit(DepositEvent {
            user,
            amount: 100_000_000,
            minted_amount: 99_000_000,
        });
        let bytes = event.encode().unwrap();

        assert_eq!(bytes.len(), 8 + 32 + 8 + 8);
        assert_eq!(&bytes[8..40], user.as_ref());
        assert_eq!(&bytes[40..48], &100_000_000u64.to_le_bytes());
        assert_eq!(&bytes[48..56], &99_000_000u64.to_le_bytes());
    }

    #[test]
    fn test_decode_log_line() {
        let event = ProgramEvent::AllocationUpdate(AllocationUpdateEvent {
            bps_a: 6000,
            bps_b: 4000,
        });
        let line = event.to_log_line().unwrap();
        assert_eq!(decode_log_line(&line).unwrap(), Some(event));
    }

    #[test]
    fn test_unrelated_lines_are_skipped() {
        assert_eq!(decode_log_line("Program log: Minting CUSDC").unwrap(), None);
        assert_eq!(decode_log_line("Program data: !!!not base64").unwrap(), None);

        let foreign = format!("{}{}", PROGRAM_DATA_PREFIX, STANDARD.encode([7u8; 24]));
        assert_eq!(decode_log_line(&foreign).unwrap(), None);
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let mut payload = EventKind::Withdraw.discriminator().to_vec();
        payload.extend_from_slice(&[1u8; 12]);
        let line = format!("{}{}", PROGRAM_DATA_PREFIX, STANDARD.encode(payload));

        let err = decode_log_line(&line).unwrap_err();
        assert!(matches!(err, EventError::Decode { kind: EventKind::Withdraw, .. }));
    }

    #[test]
    fn test_decode_logs_keeps_order() {
        let logs = vec![
            "Program GBtJHkAivArkwUsA5HBH2Wv16gMqYQPpRCzH3uRRigKC invoke [1]".to_string(),
            ProgramEvent::Rebalance(RebalanceEvent { balance_a: 5, balance_b: 0 })
                .to_log_line()
                .unwrap(),
            ProgramEvent::Deposit(DepositEvent {
                user: Pubkey::new_unique(),
                amount: 5,
                minted_amount: 5,
            })
            .to_log_line()
            .unwrap(),
        ];
        let (events, errors) = decode_logs(&logs);
        assert!(errors.is_empty());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::Rebalance);
        assert_eq!(events[1].kind(), EventKind::Deposit);
    }
}
