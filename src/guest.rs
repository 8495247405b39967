//! Guest and event-configuration records, plus list presentation helpers.
//!
//! Persisted JSON uses camelCase field names and RFC 3339 timestamps to stay
//! readable by the documents the mobile shells already write.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::util;

// ---------------------------------------------------------------------------
// Guest
// ---------------------------------------------------------------------------

/// A single roster entry.
///
/// Invariants maintained by the ledger:
/// - `entered == true` iff `entered_at.is_some()`
/// - the four ticket fields (`ticket_code`, `qr_payload`, `qr_signature`,
///   `qr_issued_at`) are set and overwritten as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: Uuid,
    pub full_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub entered: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub entered_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub ticket_code: Option<String>,
    #[serde(default)]
    pub qr_payload: Option<String>,
    #[serde(default)]
    pub qr_signature: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub qr_issued_at: Option<OffsetDateTime>,
}

impl Guest {
    /// Fresh roster entry: new id, created now, not yet entered, no ticket.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.into(),
            created_at: OffsetDateTime::now_utc(),
            entered: false,
            entered_at: None,
            ticket_code: None,
            qr_payload: None,
            qr_signature: None,
            qr_issued_at: None,
        }
    }

    pub fn has_ticket(&self) -> bool {
        self.ticket_code.is_some()
    }
}

// ---------------------------------------------------------------------------
// Event configuration
// ---------------------------------------------------------------------------

/// Per-event configuration: identity plus the rotating ticket-signing secret.
///
/// `hmac_secret` changes only through explicit rotation, which must bump
/// `key_version` in the same update; the ledger enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    pub id: Uuid,
    pub event_name: String,
    pub event_id: Uuid,
    #[serde(with = "util::base64_bytes")]
    pub hmac_secret: Vec<u8>,
    pub key_version: u32,
    #[serde(default)]
    pub preferred_name_column: Option<String>,
}

impl EventConfig {
    /// First-run configuration: fresh event id, random secret, version 1.
    pub fn generate(event_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_name: event_name.into(),
            event_id: Uuid::new_v4(),
            hmac_secret: util::generate_hmac_secret(),
            key_version: 1,
            preferred_name_column: None,
        }
    }
}

// ---------------------------------------------------------------------------
// List presentation (sort / filter / stats)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuestSortMode {
    #[default]
    Az,
    Za,
    /// Most recently added first; insertion order breaks timestamp ties.
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuestFilter {
    #[default]
    All,
    Entered,
    NotEntered,
}

/// Counts shown in the roster header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RosterStats {
    pub total: usize,
    pub entered: usize,
}

pub fn stats(guests: &[Guest]) -> RosterStats {
    RosterStats {
        total: guests.len(),
        entered: guests.iter().filter(|g| g.entered).count(),
    }
}

/// Filter, search, and sort a snapshot of the roster for display.
///
/// The search term matches case-insensitively against the display name.
pub fn present(
    guests: &[Guest],
    filter: GuestFilter,
    search: &str,
    sort: GuestSortMode,
) -> Vec<Guest> {
    let needle = search.to_lowercase();
    let mut working: Vec<(usize, Guest)> = guests
        .iter()
        .enumerate()
        .filter(|(_, g)| match filter {
            GuestFilter::All => true,
            GuestFilter::Entered => g.entered,
            GuestFilter::NotEntered => !g.entered,
        })
        .filter(|(_, g)| needle.is_empty() || g.full_name.to_lowercase().contains(&needle))
        .map(|(i, g)| (i, g.clone()))
        .collect();

    match sort {
        GuestSortMode::Az => {
            working.sort_by(|(_, a), (_, b)| {
                a.full_name.to_lowercase().cmp(&b.full_name.to_lowercase())
            });
        }
        GuestSortMode::Za => {
            working.sort_by(|(_, a), (_, b)| {
                b.full_name.to_lowercase().cmp(&a.full_name.to_lowercase())
            });
        }
        GuestSortMode::Latest => {
            working.sort_by(|(ia, a), (ib, b)| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| ib.cmp(ia))
            });
        }
    }

    working.into_iter().map(|(_, g)| g).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn named(name: &str, created: OffsetDateTime) -> Guest {
        let mut g = Guest::new(name);
        g.created_at = created;
        g
    }

    #[test]
    fn new_guest_defaults() {
        let g = Guest::new("Maria Cruz");
        assert!(!g.entered);
        assert!(g.entered_at.is_none());
        assert!(!g.has_ticket());
    }

    #[test]
    fn guest_round_trips_through_camel_case_json() {
        let g = Guest::new("Ana García");
        let json = serde_json::to_string(&g).unwrap();
        assert!(json.contains("\"fullName\""));
        assert!(json.contains("\"createdAt\""));
        let back: Guest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn config_secret_persists_as_base64() {
        let cfg = EventConfig::generate("Launch Party");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"hmacSecret\""));
        let back: EventConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hmac_secret, cfg.hmac_secret);
        assert_eq!(back.key_version, 1);
    }

    #[test]
    fn sort_modes() {
        let t = datetime!(2024-05-01 12:00 UTC);
        let guests = vec![
            named("Carla", t),
            named("ana", t + time::Duration::minutes(1)),
            named("Bob", t + time::Duration::minutes(2)),
        ];
        let az = present(&guests, GuestFilter::All, "", GuestSortMode::Az);
        assert_eq!(az[0].full_name, "ana");
        let za = present(&guests, GuestFilter::All, "", GuestSortMode::Za);
        assert_eq!(za[0].full_name, "Carla");
        let latest = present(&guests, GuestFilter::All, "", GuestSortMode::Latest);
        assert_eq!(latest[0].full_name, "Bob");
    }

    #[test]
    fn latest_breaks_timestamp_ties_by_insertion_order() {
        let t = datetime!(2024-05-01 12:00 UTC);
        let guests = vec![named("First", t), named("Second", t)];
        let latest = present(&guests, GuestFilter::All, "", GuestSortMode::Latest);
        assert_eq!(latest[0].full_name, "Second");
    }

    #[test]
    fn filter_and_search() {
        let t = datetime!(2024-05-01 12:00 UTC);
        let mut entered = named("Ana García", t);
        entered.entered = true;
        entered.entered_at = Some(t);
        let guests = vec![entered, named("Jose Lopez", t)];

        let only_entered = present(&guests, GuestFilter::Entered, "", GuestSortMode::Az);
        assert_eq!(only_entered.len(), 1);
        assert_eq!(only_entered[0].full_name, "Ana García");

        let searched = present(&guests, GuestFilter::All, "lope", GuestSortMode::Az);
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].full_name, "Jose Lopez");

        let s = stats(&guests);
        assert_eq!(s.total, 2);
        assert_eq!(s.entered, 1);
    }
}
