//! Snapshot data model.
//!
//! A [`Snapshot`] is the single unit that is cached, persisted and rendered.
//! It is replaced wholesale on every committed refresh; the order of `items`
//! is the display (rank) order reported by the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Prize paid to every race winner, in SOL.
pub const RACE_PRIZE_SOL: f64 = 0.005;

fn default_race_prize() -> f64 {
    RACE_PRIZE_SOL
}

/// Reads an explicit `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One completed race-prize event attributed to a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceWin {
    pub id: u64,
    /// Wallet address of the winner. Empty when the server reports none.
    #[serde(rename = "winner", default, deserialize_with = "null_as_default")]
    pub winner_address: String,
    /// Prize in SOL. Older payloads omit it; every race pays the same prize.
    #[serde(rename = "prize", default = "default_race_prize")]
    pub prize_amount: f64,
    /// ISO 8601 timestamp of the race.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl RaceWin {
    /// Parsed race time, `None` when absent or not RFC 3339.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// A wallet address holding the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderEntry {
    pub address: String,
    pub balance: f64,
    /// Share of the total supply, in percent.
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

/// Discriminant of a [`Record`], used to group items per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    RaceWin,
    Holder,
}

/// One row of the snapshot.
///
/// Payloads carry no explicit tag; variants are told apart by their required
/// fields (`id` for a race win, `address` + `balance` for a holder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    RaceWin(RaceWin),
    Holder(HolderEntry),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::RaceWin(_) => RecordKind::RaceWin,
            Record::Holder(_) => RecordKind::Holder,
        }
    }
}

impl From<RaceWin> for Record {
    fn from(win: RaceWin) -> Self {
        Record::RaceWin(win)
    }
}

impl From<HolderEntry> for Record {
    fn from(holder: HolderEntry) -> Self {
        Record::Holder(holder)
    }
}

/// The cached and displayed dashboard state.
///
/// Always written as `items`; reading also accepts caches from earlier
/// dashboard builds, see `RawSnapshot`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawSnapshot")]
pub struct Snapshot {
    pub items: Vec<Record>,
    pub total_count: u64,
    pub total_value: f64,
    /// Server-reported time of the last data change. Compared verbatim.
    pub last_update: Option<String>,
}

/// On-disk shape accepted when reading a cache. Earlier builds stored
/// `races`, `holders` and `totalRaces`/`totalHolders`/`totalPrizes` next to
/// each other, so every key is read separately.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    items: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_default")]
    races: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_default")]
    holders: Vec<Record>,
    #[serde(default)]
    total_count: Option<u64>,
    #[serde(default)]
    total_races: Option<u64>,
    #[serde(default)]
    total_holders: Option<u64>,
    #[serde(default)]
    total_value: Option<f64>,
    #[serde(default)]
    total_prizes: Option<f64>,
    #[serde(default)]
    last_update: Option<String>,
}

impl From<RawSnapshot> for Snapshot {
    fn from(raw: RawSnapshot) -> Self {
        let mut items = raw.items;
        items.extend(raw.races);
        items.extend(raw.holders);
        Snapshot {
            items,
            total_count: raw
                .total_count
                .or(raw.total_races)
                .or(raw.total_holders)
                .unwrap_or(0),
            total_value: raw.total_value.or(raw.total_prizes).unwrap_or(0.0),
            last_update: raw.last_update,
        }
    }
}

impl Snapshot {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.last_update.is_none()
    }

    /// Race wins in display order.
    pub fn race_wins(&self) -> impl Iterator<Item = &RaceWin> {
        self.items.iter().filter_map(|r| match r {
            Record::RaceWin(win) => Some(win),
            Record::Holder(_) => None,
        })
    }

    /// Holders in display order.
    pub fn holders(&self) -> impl Iterator<Item = &HolderEntry> {
        self.items.iter().filter_map(|r| match r {
            Record::Holder(holder) => Some(holder),
            Record::RaceWin(_) => None,
        })
    }

    /// Items of one kind, cloned, preserving order.
    pub fn items_of(&self, kind: RecordKind) -> Vec<Record> {
        self.items
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_CACHE: &str = r#"{"races":[{"id":1,"winner":"ABC","timestamp":"2024-01-01T00:00:00Z"}],"lastUpdate":"2024-01-01T00:00:00Z"}"#;

    #[test]
    fn test_parse_legacy_cache() {
        let snapshot = Snapshot::from_json(LEGACY_CACHE).unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(
            snapshot.last_update.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );

        let win = snapshot.race_wins().next().unwrap();
        assert_eq!(win.id, 1);
        assert_eq!(win.winner_address, "ABC");
        assert_eq!(win.prize_amount, RACE_PRIZE_SOL);
        assert!(win.tx_hash.is_none());
        assert!(win.timestamp_utc().is_some());
    }

    #[test]
    fn test_legacy_totals_aliases() {
        let raw = r#"{"races":[],"totalRaces":42,"totalPrizes":0.21,"walletStats":{},"lastUpdate":null}"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        assert_eq!(snapshot.total_count, 42);
        assert!((snapshot.total_value - 0.21).abs() < 1e-9);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_legacy_cache_with_races_and_holders() {
        let raw = r#"{"races":[{"id":1,"winner":"ABC"}],"holders":[{"address":"H1","balance":1.0}],"lastUpdate":"t1"}"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[0].kind(), RecordKind::RaceWin);
        assert_eq!(snapshot.items[1].kind(), RecordKind::Holder);
        assert_eq!(snapshot.last_update.as_deref(), Some("t1"));

        let reloaded = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, snapshot);
    }

    #[test]
    fn test_null_totals_and_lists_read_as_empty() {
        let raw = r#"{"races":null,"holders":null,"totalRaces":null,"totalPrizes":null,"lastUpdate":"t1"}"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.total_count, 0);
        assert_eq!(snapshot.total_value, 0.0);
    }

    #[test]
    fn test_race_without_winner() {
        let raw = r#"{"items":[{"id":3},{"id":4,"winner":null}]}"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        let wins: Vec<_> = snapshot.race_wins().collect();
        assert_eq!(wins.len(), 2);
        assert!(wins.iter().all(|w| w.winner_address.is_empty()));
    }

    #[test]
    fn test_untagged_records_are_told_apart() {
        let raw = r#"{"items":[
            {"address":"H1","balance":1000.5,"percentage":12.5,"rank":1},
            {"id":7,"winner":"W1","prize":0.01,"txHash":"sig"}
        ]}"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        assert_eq!(snapshot.items[0].kind(), RecordKind::Holder);
        assert_eq!(snapshot.items[1].kind(), RecordKind::RaceWin);
        assert_eq!(snapshot.holders().count(), 1);
        assert_eq!(snapshot.items_of(RecordKind::RaceWin).len(), 1);
    }

    #[test]
    fn test_persisted_form_reloads() {
        let snapshot = Snapshot::from_json(LEGACY_CACHE).unwrap();
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"items\""));
        assert!(json.contains("\"winner\":\"ABC\""));
        assert_eq!(Snapshot::from_json(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(Snapshot::from_json("{not json").is_err());
        assert!(Snapshot::from_json(r#"{"items":[{"foo":1}]}"#).is_err());
    }

    #[test]
    fn test_bad_timestamp() {
        let win = RaceWin {
            id: 1,
            winner_address: "W".into(),
            prize_amount: RACE_PRIZE_SOL,
            timestamp: Some("yesterday".into()),
            tx_hash: None,
        };
        assert!(win.timestamp_utc().is_none());
    }
}
