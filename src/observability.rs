//! Run correlation and step bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::clock::Slot;
use std::time::Instant;
use tracing::{info_span, Span};
use uuid::Uuid;

/// Identifies one scenario run across every log line it produces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one scenario step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub step: String,
    pub signature: Option<String>,
    pub slot: Option<Slot>,
    pub elapsed_ms: u64,
}

/// Serializable summary printed at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub events_captured: usize,
}

#[derive(Debug)]
pub struct RunContext {
    run_id: RunId,
    started_at: DateTime<Utc>,
    steps: Vec<StepRecord>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Span carrying the run id and step name
    pub fn span(&self, step: &str) -> Span {
        info_span!("step", run_id = %self.run_id, step)
    }

    pub fn start_step(&self) -> Instant {
        Instant::now()
    }

    pub fn record(&mut self, step: &str, started: Instant, signature: Option<String>, slot: Option<Slot>) {
        self.steps.push(StepRecord {
            step: step.to_string(),
            signature,
            slot,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn summary(&self, events_captured: usize) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            steps: self.steps.clone(),
            events_captured,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_summary_serializes_steps() {
        let mut ctx = RunContext::new();
        let started = ctx.start_step();
        ctx.record("deposit", started, Some("sig".to_string()), Some(12));

        let summary = ctx.summary(3);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["steps"][0]["step"], "deposit");
        assert_eq!(json["steps"][0]["slot"], 12);
        assert_eq!(json["events_captured"], 3);
        assert_eq!(json["run_id"], ctx.run_id().as_str());
    }
}
