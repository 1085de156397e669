//! Human-readable event report
//!
//! Pure rendering over a snapshot; never touches the log itself.

use super::{EventRecord, ProgramEvent};
use std::fmt::Write as _;

const WIDTH: usize = 78;

/// Cut `value` to `max` characters, marking the cut with `...`
pub fn truncate_display(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max).collect();
    out.push_str("...");
    out
}

fn row(out: &mut String, content: &str) {
    let _ = writeln!(out, "│ {:<width$} │", content, width = WIDTH - 2);
}

fn event_rows(event: &ProgramEvent, max: usize) -> Vec<String> {
    match event {
        ProgramEvent::Deposit(e) => vec![
            format!("  User: {}", truncate_display(&e.user.to_string(), max)),
            format!("  Amount: {}", e.amount),
            format!("  Shares minted: {}", e.minted_amount),
        ],
        ProgramEvent::Withdraw(e) => vec![
            format!("  User: {}", truncate_display(&e.user.to_string(), max)),
            format!("  Shares burned: {}", e.burned_amount),
            format!("  Returned: {}", e.returned_amount),
        ],
        ProgramEvent::Rebalance(e) => vec![
            format!("  Protocol A balance: {}", e.balance_a),
            format!("  Protocol B balance: {}", e.balance_b),
        ],
        ProgramEvent::AllocationUpdate(e) => vec![
            format!("  Protocol A bps: {}", e.bps_a),
            format!("  Protocol B bps: {}", e.bps_b),
        ],
        ProgramEvent::View(e) => vec![
            format!("  User: {}", truncate_display(&e.user.to_string(), max)),
            format!("  Yield: {}", e.yield_value),
        ],
    }
}

/// Render every record in arrival order
///
/// `max_scalar` bounds the displayed length of signatures and addresses.
pub fn render_report(records: &[EventRecord], max_scalar: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(WIDTH + 2));
    let _ = writeln!(out, "Captured events: {}", records.len());

    for (idx, record) in records.iter().enumerate() {
        let _ = writeln!(out, "┌{}┐", "─".repeat(WIDTH));
        row(&mut out, &format!("Event #{}", idx + 1));
        let _ = writeln!(out, "├{}┤", "─".repeat(WIDTH));
        row(&mut out, &format!("Type: {}", record.kind()));
        row(&mut out, &format!("Slot: {}", record.slot));
        row(
            &mut out,
            &format!(
                "Signature: {}",
                truncate_display(&record.signature.to_string(), max_scalar)
            ),
        );
        let _ = writeln!(out, "├{}┤", "─".repeat(WIDTH));
        for line in event_rows(&record.event, max_scalar.saturating_sub(3)) {
            row(&mut out, &line);
        }
        let _ = writeln!(out, "└{}┘", "─".repeat(WIDTH));
    }

    let _ = writeln!(out, "{}", "=".repeat(WIDTH + 2));
    out
}
