//! Append-only event sink
//!
//! Single writer (the delivery task), many readers. Readers take snapshots;
//! the `watch` channel carries the sequence of the last appended record so
//! waiters wake on every append without polling.

use super::{EventError, EventKind, ProgramEvent, SubscriptionId};
use parking_lot::RwLock;
use solana_sdk::{clock::Slot, signature::Signature};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// One buffered delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Position in arrival order, starting at 1
    pub sequence: u64,
    /// Subscription the record was delivered to
    pub subscription: SubscriptionId,
    pub event: ProgramEvent,
    pub slot: Slot,
    pub signature: Signature,
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

#[derive(Debug)]
pub struct EventLog {
    records: RwLock<Vec<EventRecord>>,
    sequence: watch::Sender<u64>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        let (sequence, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            sequence,
        }
    }

    pub(crate) fn append(
        &self,
        subscription: SubscriptionId,
        event: ProgramEvent,
        slot: Slot,
        signature: Signature,
    ) -> u64 {
        let sequence = {
            let mut records = self.records.write();
            let sequence = records.len() as u64 + 1;
            records.push(EventRecord {
                sequence,
                subscription,
                event,
                slot,
                signature,
            });
            sequence
        };
        self.sequence.send_replace(sequence);
        sequence
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records in arrival order
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.read().clone()
    }

    pub fn records_of(&self, kind: EventKind) -> Vec<EventRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn by_signature(&self, signature: &Signature) -> Vec<EventRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.signature == signature)
            .cloned()
            .collect()
    }

    /// Wait until `predicate` holds over the buffered records
    ///
    /// Returns the snapshot the predicate accepted. Cancel by dropping the
    /// future.
    pub async fn settle<F>(&self, mut predicate: F, timeout: Duration) -> Result<Vec<EventRecord>, EventError>
    where
        F: FnMut(&[EventRecord]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut rx = self.sequence.subscribe();

        loop {
            let _ = rx.borrow_and_update();
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return Ok(snapshot);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(EventError::Closed),
                Err(_) => {
                    return Err(EventError::Timeout {
                        waited_ms: timeout.as_millis() as u64,
                        buffered: snapshot.len(),
                    })
                }
            }
        }
    }

    /// Wait for the first record of `kind` carrying `signature`
    pub async fn wait_for_signature(
        &self,
        kind: EventKind,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<EventRecord, EventError> {
        let matches = |r: &EventRecord| r.kind() == kind && &r.signature == signature;
        let snapshot = self
            .settle(|records| records.iter().any(|r| matches(r)), timeout)
            .await?;
        snapshot
            .into_iter()
            .find(|r| matches(r))
            .ok_or(EventError::Closed)
    }

    /// Wait until no record has been appended for `quiet`, bounded by `timeout`
    ///
    /// Unlike a fixed sleep this returns as soon as the stream goes quiet.
    pub async fn wait_quiescent(&self, quiet: Duration, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut rx = self.sequence.subscribe();
        loop {
            let _ = rx.borrow_and_update();
            let quiet_until = (Instant::now() + quiet).min(deadline);
            match tokio::time::timeout_at(quiet_until, rx.changed()).await {
                Ok(Ok(())) if Instant::now() < deadline => continue,
                _ => return self.len(),
            }
        }
    }
}
