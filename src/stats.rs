//! Views derived from a snapshot: leaderboards, wallet lookup and the small
//! formatting helpers the dashboard shows next to them.

use chrono::{DateTime, Utc};

use crate::snapshot::{Snapshot, RACE_PRIZE_SOL};

/// A race starts every two minutes, aligned to the Unix epoch.
pub const RACE_INTERVAL_SECS: i64 = 120;

/// Aggregate numbers shown at the top of the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    pub total_races: u64,
    pub total_prizes: f64,
    pub unique_winners: usize,
    pub races_today: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HallOfFameEntry {
    pub wallet: String,
    pub wins: usize,
}

/// Race history of one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSummary {
    pub address: String,
    pub races_won: usize,
    pub total_prizes: f64,
    /// Timestamp of the most recent win.
    pub last_win: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletReport {
    /// The wallet appears in the race history.
    Winner(WalletSummary),
    /// No wins, but the holders API knows the wallet.
    Holder,
    NotFound,
}

pub fn global_stats(snapshot: &Snapshot, now: DateTime<Utc>) -> GlobalStats {
    GlobalStats {
        total_races: snapshot.total_count,
        total_prizes: snapshot.total_value,
        unique_winners: unique_winners(snapshot),
        races_today: races_on_day(snapshot, now),
    }
}

pub fn unique_winners(snapshot: &Snapshot) -> usize {
    let mut seen: Vec<&str> = Vec::new();
    for win in snapshot.race_wins() {
        let winner = win.winner_address.as_str();
        if !winner.is_empty() && !seen.contains(&winner) {
            seen.push(winner);
        }
    }
    seen.len()
}

/// Races held on the same UTC day as `now`.
pub fn races_on_day(snapshot: &Snapshot, now: DateTime<Utc>) -> usize {
    let today = now.date_naive();
    snapshot
        .race_wins()
        .filter_map(|win| win.timestamp_utc())
        .filter(|t| t.date_naive() == today)
        .count()
}

/// Wallets ranked by number of wins. Ties keep the order in which the
/// wallets first appear in the snapshot.
pub fn hall_of_fame(snapshot: &Snapshot, limit: usize) -> Vec<HallOfFameEntry> {
    let mut entries: Vec<HallOfFameEntry> = Vec::new();
    for win in snapshot.race_wins() {
        if win.winner_address.is_empty() {
            continue;
        }
        match entries.iter_mut().find(|e| e.wallet == win.winner_address) {
            Some(entry) => entry.wins += 1,
            None => entries.push(HallOfFameEntry {
                wallet: win.winner_address.clone(),
                wins: 1,
            }),
        }
    }
    // Stable sort.
    entries.sort_by(|a, b| b.wins.cmp(&a.wins));
    entries.truncate(limit);
    entries
}

/// Case-insensitive lookup of `address` in the race history.
pub fn wallet_summary(snapshot: &Snapshot, address: &str) -> Option<WalletSummary> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    let wins: Vec<_> = snapshot
        .race_wins()
        .filter(|win| win.winner_address.eq_ignore_ascii_case(address))
        .collect();
    let first = wins.first()?;

    Some(WalletSummary {
        address: first.winner_address.clone(),
        races_won: wins.len(),
        // Every race pays the same fixed prize; per-race amounts are not summed.
        total_prizes: wins.len() as f64 * RACE_PRIZE_SOL,
        // Race history is newest first.
        last_win: first.timestamp.clone(),
    })
}

/// `"12s ago"`, `"5m ago"`, `"3h ago"`, `"2d ago"` or `"4mo ago"`.
pub fn time_ago(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(timestamp) = timestamp else {
        return "Unknown".to_string();
    };
    let diff = (now - timestamp).num_seconds().max(0);
    match diff {
        d if d < 60 => format!("{}s ago", d),
        d if d < 3_600 => format!("{}m ago", d / 60),
        d if d < 86_400 => format!("{}h ago", d / 3_600),
        d if d < 2_592_000 => format!("{}d ago", d / 86_400),
        d => format!("{}mo ago", d / 2_592_000),
    }
}

/// Shorten a wallet address to `prefix...suffix`.
pub fn short_address(address: &str, prefix: usize, suffix: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= prefix + suffix {
        return address.to_string();
    }
    let head: String = chars[..prefix].iter().collect();
    let tail: String = chars[chars.len() - suffix..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Medal for the first three ranks (0-based).
pub fn medal(index: usize) -> &'static str {
    match index {
        0 => "🥇",
        1 => "🥈",
        2 => "🥉",
        _ => "",
    }
}

/// Time until the next race starts, as `m:ss`.
pub fn next_race_countdown(now: DateTime<Utc>) -> String {
    let elapsed = now.timestamp().rem_euclid(RACE_INTERVAL_SECS);
    let remaining = RACE_INTERVAL_SECS - elapsed;
    format!("{}:{:02}", remaining / 60, remaining % 60)
}
