//! Text rendering of a snapshot for the terminal.

use chrono::{DateTime, Utc};
use prettytable::{format, row, Table};

use crate::snapshot::Snapshot;
use crate::stats::{self, WalletReport};

/// Rows shown in the recent winners table.
const RECENT_WINNERS_LIMIT: usize = 20;
/// Wallets shown in the hall of fame.
const HALL_OF_FAME_LIMIT: usize = 10;

fn new_table() -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table
}

pub fn render_recent_winners(snapshot: &Snapshot, now: DateTime<Utc>) -> String {
    if snapshot.race_wins().next().is_none() {
        return "Waiting for race data...\n".to_string();
    }

    let mut table = new_table();
    table.set_titles(row!["#", "Winner", "Prize", "When", "TX"]);
    for (index, win) in snapshot.race_wins().take(RECENT_WINNERS_LIMIT).enumerate() {
        table.add_row(row![
            format!("{} {}", stats::medal(index), win.id).trim(),
            stats::short_address(&win.winner_address, 6, 4),
            format!("{:.3} SOL", win.prize_amount),
            stats::time_ago(win.timestamp_utc(), now),
            win.tx_hash
                .as_deref()
                .map(|h| stats::short_address(h, 8, 4))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table.to_string()
}

pub fn render_stats(snapshot: &Snapshot, now: DateTime<Utc>) -> String {
    let global = stats::global_stats(snapshot, now);
    let mut table = new_table();
    table.add_row(row!["Total races", global.total_races]);
    table.add_row(row!["Total prizes", format!("{:.4} SOL", global.total_prizes)]);
    table.add_row(row!["Unique winners", global.unique_winners]);
    table.add_row(row!["Races today", global.races_today]);
    table.add_row(row!["Next race in", stats::next_race_countdown(now)]);
    table.to_string()
}

pub fn render_hall_of_fame(snapshot: &Snapshot) -> String {
    let fame = stats::hall_of_fame(snapshot, HALL_OF_FAME_LIMIT);
    if fame.is_empty() {
        return "No winners yet...\n".to_string();
    }

    let mut table = new_table();
    for (index, entry) in fame.iter().enumerate() {
        let rank = match stats::medal(index) {
            "" => format!("#{}", index + 1),
            medal => medal.to_string(),
        };
        table.add_row(row![
            rank,
            stats::short_address(&entry.wallet, 8, 4),
            format!("{} wins", entry.wins),
        ]);
    }
    table.to_string()
}

pub fn render_holders(snapshot: &Snapshot) -> String {
    let mut table = new_table();
    table.set_titles(row!["Rank", "Holder", "Balance", "%"]);
    for (index, holder) in snapshot.holders().enumerate() {
        let rank = holder.rank.map(|r| r as usize).unwrap_or(index + 1);
        table.add_row(row![
            rank,
            stats::short_address(&holder.address, 6, 4),
            format!("{:.2}", holder.balance),
            format!("{:.2}", holder.percentage),
        ]);
    }
    table.to_string()
}

/// Full dashboard: stats, recent winners, hall of fame and holders (when
/// the snapshot has any).
pub fn render_dashboard(snapshot: &Snapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("== Global stats ==\n");
    out.push_str(&render_stats(snapshot, now));
    out.push_str("\n== Recent winners ==\n");
    out.push_str(&render_recent_winners(snapshot, now));
    out.push_str("\n== Hall of fame ==\n");
    out.push_str(&render_hall_of_fame(snapshot));
    if snapshot.holders().next().is_some() {
        out.push_str("\n== Holders ==\n");
        out.push_str(&render_holders(snapshot));
    }
    if let Some(update) = &snapshot.last_update {
        out.push_str(&format!("\nLast update: {}\n", update));
    }
    out
}

pub fn render_wallet_report(report: &WalletReport, now: DateTime<Utc>) -> String {
    match report {
        WalletReport::Winner(summary) => {
            let last_win = summary
                .last_win
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| stats::time_ago(Some(t.with_timezone(&Utc)), now))
                .unwrap_or_else(|| "N/A".to_string());
            let mut table = new_table();
            table.add_row(row!["Races won", summary.races_won]);
            table.add_row(row!["Total prizes", format!("{:.4} SOL", summary.total_prizes)]);
            table.add_row(row!["Last win", last_win]);
            format!("Wallet found in public records: {}\n{}", summary.address, table)
        }
        WalletReport::Holder => {
            "Active holder: this wallet holds the token but hasn't won any races yet.\n"
                .to_string()
        }
        WalletReport::NotFound => {
            "No race records found: this wallet has no recorded wins.\n".to_string()
        }
    }
}
