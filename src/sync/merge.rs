//! Folding endpoint contributions into a new snapshot.

use crate::api::Contribution;
use crate::config::EndpointConfig;
use crate::error::Result;
use crate::snapshot::{RecordKind, Snapshot};

/// Result of merging one refresh round onto the held snapshot.
#[derive(Debug, Clone)]
pub struct Merged {
    pub snapshot: Snapshot,
    /// `lastUpdate` as reported by the server this round, if any endpoint
    /// reported one.
    pub reported_update: Option<String>,
}

/// Merge the settled `results` (one per entry of `endpoints`, same order)
/// onto `held`.
///
/// Scalars are overlaid in endpoint order. Items are grouped by record kind in
/// order of first appearance; a kind takes fresh items only when every
/// endpoint producing it succeeded, otherwise the held items of that kind are
/// kept as they were.
pub fn merge(
    held: &Snapshot,
    endpoints: &[EndpointConfig],
    results: &[Result<Contribution>],
) -> Merged {
    debug_assert_eq!(endpoints.len(), results.len());

    let mut kinds: Vec<RecordKind> = Vec::new();
    for endpoint in endpoints {
        if let Some(kind) = endpoint.kind.record_kind() {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }

    let mut items = Vec::new();
    for kind in kinds {
        let producers: Vec<&Result<Contribution>> = endpoints
            .iter()
            .zip(results)
            .filter(|(endpoint, _)| endpoint.kind.record_kind() == Some(kind))
            .map(|(_, result)| result)
            .collect();

        if producers.iter().all(|r| r.is_ok()) {
            for contribution in producers.into_iter().flatten() {
                if let Some(fresh) = &contribution.items {
                    items.extend(fresh.iter().cloned());
                }
            }
        } else {
            items.extend(held.items_of(kind));
        }
    }

    let mut snapshot = Snapshot {
        items,
        ..held.clone()
    };
    let mut reported_update = None;
    for contribution in results.iter().flatten() {
        if let Some(count) = contribution.total_count {
            snapshot.total_count = count;
        }
        if let Some(value) = contribution.total_value {
            snapshot.total_value = value;
        }
        if let Some(update) = &contribution.last_update {
            snapshot.last_update = Some(update.clone());
            reported_update = Some(update.clone());
        }
    }

    Merged {
        snapshot,
        reported_update,
    }
}

/// Whether `merged` should replace `held`.
///
/// With a server-reported `lastUpdate` only the marker is compared. Without
/// one, the content itself decides.
pub fn has_changed(held: &Snapshot, merged: &Merged) -> bool {
    match &merged.reported_update {
        Some(update) => held.last_update.as_deref() != Some(update.as_str()),
        None => merged.snapshot != *held,
    }
}
