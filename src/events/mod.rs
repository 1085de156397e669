//! Program event capture and correlation
//!
//! The correlator owns one program-log stream and a single delivery task.
//! Each log notification is decoded into typed events which are appended to
//! the injected [`EventLog`] once per active subscription of that kind,
//! tagged with the originating slot and signature.
//!
//! ## Guarantees
//!
//! - records appear in arrival order; no ordering across kinds is implied
//! - unsubscribing stops later deliveries and never retracts buffered records
//! - notifications already queued when the stream shuts down are still drained

use crate::ledger::{LedgerClient, LedgerError, LogCancelGuard, LogNotification};
use crate::metrics::metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod decode;
mod log;
mod report;

pub use decode::{
    decode_event, decode_log_line, decode_logs, AllocationUpdateEvent,
    DepositEvent, EventKind, ProgramEvent, RebalanceEvent, ViewEvent, WithdrawEvent,
    PROGRAM_DATA_PREFIX,
};
pub use self::log::{EventLog, EventRecord};
pub use report::{render_report, truncate_display};

#[derive(Debug, Error)]
pub enum EventError {
    /// Known discriminator, undecodable payload
    #[error("Failed to decode {kind}: {message}")]
    Decode { kind: EventKind, message: String },

    /// Stream registration failed
    #[error("Event subscription failed: {0}")]
    Subscription(#[from] LedgerError),

    #[error("Stream already started")]
    AlreadyStarted,

    #[error("Timed out after {waited_ms}ms ({buffered} records buffered)")]
    Timeout { waited_ms: u64, buffered: usize },

    #[error("Event log closed")]
    Closed,
}

impl EventError {
    pub fn decode(kind: EventKind, message: impl Into<String>) -> Self {
        EventError::Decode {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Caller-owned registration for one event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub kind: EventKind,
}

struct StreamTask {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
    cancel: LogCancelGuard,
}

pub struct EventCorrelator {
    ledger: Arc<dyn LedgerClient>,
    program_id: Pubkey,
    log: Arc<EventLog>,
    subscriptions: Arc<DashMap<SubscriptionId, EventKind>>,
    next_id: AtomicU64,
    task: Mutex<Option<StreamTask>>,
}

impl EventCorrelator {
    pub fn new(ledger: Arc<dyn LedgerClient>, program_id: Pubkey, log: Arc<EventLog>) -> Self {
        Self {
            ledger,
            program_id,
            log,
            subscriptions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            task: Mutex::new(None),
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Register the program-log stream and spawn the delivery task
    ///
    /// Registration failures surface immediately.
    pub async fn start(&self) -> Result<(), EventError> {
        if self.task.lock().is_some() {
            return Err(EventError::AlreadyStarted);
        }

        let subscription = self.ledger.subscribe_program_logs(&self.program_id).await?;
        let (notifications, cancel) = subscription.into_parts();
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(deliver(
            notifications,
            stop_rx,
            self.subscriptions.clone(),
            self.log.clone(),
        ));

        let mut task = self.task.lock();
        if task.is_some() {
            handle.abort();
            return Err(EventError::AlreadyStarted);
        }
        *task = Some(StreamTask {
            handle,
            stop: stop_tx,
            cancel,
        });
        info!(program = %self.program_id, "Event stream started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn subscribe(&self, kind: EventKind) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.insert(id, kind);
        metrics().active_subscriptions.inc();
        debug!(subscription = %id, kind = %kind, "Subscribed");
        SubscriptionHandle { id, kind }
    }

    /// Returns whether the handle was still active; repeated calls are no-ops
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.subscriptions.remove(&handle.id).is_some();
        if removed {
            metrics().active_subscriptions.dec();
            debug!(subscription = %handle.id, kind = %handle.kind, "Unsubscribed");
        }
        removed
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stop the stream, draining notifications that already arrived
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        let _ = task.stop.send(());
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Event delivery task ended abnormally");
        }
        drop(task.cancel);
        info!(buffered = self.log.len(), "Event stream stopped");
    }

    /// Render the buffered records
    pub fn report(&self, max_scalar: usize) -> String {
        render_report(&self.log.snapshot(), max_scalar)
    }
}

async fn deliver(
    mut notifications: mpsc::UnboundedReceiver<LogNotification>,
    mut stop: oneshot::Receiver<()>,
    subscriptions: Arc<DashMap<SubscriptionId, EventKind>>,
    log: Arc<EventLog>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                while let Ok(notification) = notifications.try_recv() {
                    dispatch(&notification, &subscriptions, &log);
                }
                break;
            }
            next = notifications.recv() => match next {
                Some(notification) => dispatch(&notification, &subscriptions, &log),
                None => {
                    debug!("Log stream closed");
                    break;
                }
            },
        }
    }
}

fn dispatch(
    notification: &LogNotification,
    subscriptions: &DashMap<SubscriptionId, EventKind>,
    log: &EventLog,
) {
    if let Some(err) = &notification.err {
        debug!(signature = %notification.signature, error = %err, "Skipping events of failed transaction");
        return;
    }

    let (events, errors) = decode_logs(&notification.logs);
    for err in errors {
        metrics().event_decode_errors.inc();
        warn!(signature = %notification.signature, error = %err, "Dropping undecodable event");
    }

    for event in events {
        let kind = event.kind();
        // Snapshot matching ids so no map guard is held while appending
        let targets: Vec<SubscriptionId> = subscriptions
            .iter()
            .filter(|entry| *entry.value() == kind)
            .map(|entry| *entry.key())
            .collect();

        for id in targets {
            log.append(id, event.clone(), notification.slot, notification.signature);
            metrics().record_event(kind.name());
        }
    }
}
