// crates/fierce-sim/src/output.rs
//
// Output formatting utilities for the simulator.
// Supports table and JSON output modes.

use serde::Serialize;
use tabled::{Table, Tabled};

use fierce_ledger::Units;

use crate::runner::Report;

/// Output format for simulator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table output (default).
    Table,
    /// JSON output for machine consumption.
    Json,
}

/// Format a slice of Tabled items as a table string.
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).to_string()
}

/// Format a serializable value as a pretty-printed JSON string.
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("JSON serialization error: {}", e))
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct AccountRow {
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Balance")]
    balance: String,
    #[tabled(rename = "Pool Stake")]
    pool_stake: String,
    #[tabled(rename = "Lock Stake")]
    lock_stake: String,
    #[tabled(rename = "Pool Rewards")]
    pool_rewards: String,
    #[tabled(rename = "Lock Rewards")]
    lock_rewards: String,
    #[tabled(rename = "Commissions")]
    commissions: String,
    #[tabled(rename = "Vested")]
    vested: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Count")]
    count: usize,
}

#[derive(Tabled)]
struct RejectedRow {
    #[tabled(rename = "Step")]
    step: u64,
    #[tabled(rename = "Action")]
    action: &'static str,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn units(amount: u128) -> String {
    Units(amount).to_string()
}

/// Render a run report in the requested format.
pub fn render_report(report: &Report, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return format_json(report);
    }

    let pool = &report.pool;
    let metrics = vec![
        MetricRow { metric: "End step", value: report.end_step.to_string() },
        MetricRow { metric: "Distributor", value: report.distributor_design.clone() },
        MetricRow { metric: "Total staked", value: units(pool.total_staked) },
        MetricRow { metric: "Acc reward/share", value: pool.acc_reward_per_share.to_string() },
        MetricRow { metric: "Emitted", value: units(pool.total_emitted) },
        MetricRow { metric: "Distributed", value: units(pool.total_distributed) },
        MetricRow { metric: "Missed emission", value: units(pool.missed_emission) },
        MetricRow { metric: "Funded", value: units(pool.total_funded) },
        MetricRow { metric: "Paid", value: units(pool.total_paid) },
        MetricRow { metric: "Forfeited", value: units(pool.forfeited_rewards) },
        MetricRow { metric: "Lock reward pool", value: units(report.lock_reward_pool) },
    ];
    let accounts: Vec<AccountRow> = report
        .accounts
        .iter()
        .map(|a| AccountRow {
            account: a.account.clone(),
            balance: units(a.balance),
            pool_stake: units(a.pool_stake),
            lock_stake: units(a.lock_stake),
            pool_rewards: units(a.pool_rewards),
            lock_rewards: units(a.lock_rewards),
            commissions: a.commissions.to_string(),
            vested: units(a.vested),
        })
        .collect();
    let events: Vec<EventRow> = report
        .events
        .iter()
        .map(|(event, count)| EventRow { event: event.clone(), count: *count })
        .collect();

    let mut out = String::new();
    out.push_str(&format_table(&metrics));
    out.push_str("\n\n");
    out.push_str(&format_table(&accounts));
    if !events.is_empty() {
        out.push_str("\n\n");
        out.push_str(&format_table(&events));
    }
    let rejected: Vec<RejectedRow> = report
        .actions
        .iter()
        .filter(|a| !a.ok)
        .map(|a| RejectedRow { step: a.step, action: a.action, reason: a.detail.clone() })
        .collect();
    if !rejected.is_empty() {
        out.push_str("\n\nRejected actions:\n");
        out.push_str(&format_table(&rejected));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled, Serialize)]
    struct Row {
        name: String,
        amount: u128,
    }

    #[test]
    fn test_table_and_json() {
        let rows = vec![Row { name: "a".to_string(), amount: u128::MAX }];
        let table = format_table(&rows);
        assert!(table.contains("name"));
        let json = format_json(&rows);
        assert!(json.contains(&u128::MAX.to_string()));
    }
}
