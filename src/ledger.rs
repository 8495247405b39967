//! The guest ledger: the durable roster plus event configuration.
//!
//! The ledger is the system of record and the sole mutator of both
//! collections.  All mutating methods take `&mut self`, so a single owner
//! serializes every read-check-mutate-persist cycle; callers that share a
//! ledger across threads wrap it in a mutex held for the whole operation.
//! Every mutation is persist-then-acknowledge: the new state is written to
//! disk (temp file + atomic rename) before the in-memory collection is
//! updated, so a failed write leaves both memory and disk on the last good
//! state.

use std::path::{Path, PathBuf};

use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::error::{GatekeyError, Result, ResultExt as _};
use crate::guest::{EventConfig, Guest};
use crate::normalize;
use crate::util;

pub const GUESTS_FILE: &str = "guests.json";
pub const CONFIG_FILE: &str = "event_config.json";

/// How long a deleted guest stays recoverable by default.
pub const DEFAULT_UNDO_WINDOW: Duration = Duration::seconds(5);

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Result of a bulk import merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Guests appended to the roster, in candidate order.
    pub added: Vec<Guest>,
    /// Candidate names skipped as duplicates (of the ledger or of an
    /// earlier candidate in the same batch), as supplied.
    pub skipped: Vec<String>,
}

/// The one-slot undo buffer.  Only the most recent deletion is recoverable,
/// and only until `expires_at`; a subsequent delete overwrites the slot.
#[derive(Debug, Clone)]
struct PendingUndo {
    guest: Guest,
    expires_at: OffsetDateTime,
}

/// Observer hook invoked after every committed mutation.
pub type ChangeListener = Box<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct GuestLedger {
    guests: Vec<Guest>,
    event_config: EventConfig,
    pending_undo: Option<PendingUndo>,
    undo_window: Duration,
    guests_path: PathBuf,
    config_path: PathBuf,
    on_change: Option<ChangeListener>,
}

impl std::fmt::Debug for GuestLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestLedger")
            .field("guests", &self.guests.len())
            .field("event", &self.event_config.event_name)
            .field("key_version", &self.event_config.key_version)
            .finish_non_exhaustive()
    }
}

impl GuestLedger {
    /// Open (or initialize) the ledger stored under `data_dir`.
    ///
    /// A missing guest document yields an empty roster; a missing event
    /// configuration triggers first-run generation (fresh random secret,
    /// key version 1) persisted immediately.  A document that exists but
    /// cannot be parsed is a [`GatekeyError::Persistence`] error -- the
    /// store is never silently replaced.
    pub fn open(data_dir: &Path) -> Result<Self> {
        Self::open_with_undo_window(data_dir, DEFAULT_UNDO_WINDOW)
    }

    /// Same as [`open`](Self::open) with an explicit undo expiry window.
    /// Tests pass a zero window to exercise expiry without wall-clock waits.
    pub fn open_with_undo_window(data_dir: &Path, undo_window: Duration) -> Result<Self> {
        util::validate_path(data_dir, "data dir")?;
        let guests_path = data_dir.join(GUESTS_FILE);
        let config_path = data_dir.join(CONFIG_FILE);

        let guests: Vec<Guest> = match std::fs::read(&guests_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                GatekeyError::Persistence(format!(
                    "parse {}: {e} (refusing to overwrite; fix or remove the file)",
                    guests_path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(GatekeyError::Persistence(format!(
                    "read {}: {e}",
                    guests_path.display()
                )))
            }
        };

        let (event_config, first_run) = match std::fs::read(&config_path) {
            Ok(bytes) => (
                serde_json::from_slice(&bytes).map_err(|e| {
                    GatekeyError::Persistence(format!(
                        "parse {}: {e} (refusing to overwrite; fix or remove the file)",
                        config_path.display()
                    ))
                })?,
                false,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (EventConfig::generate("My Event"), true)
            }
            Err(e) => {
                return Err(GatekeyError::Persistence(format!(
                    "read {}: {e}",
                    config_path.display()
                )))
            }
        };

        let ledger = Self {
            guests,
            event_config,
            pending_undo: None,
            undo_window,
            guests_path,
            config_path,
            on_change: None,
        };

        if first_run {
            ledger.persist_config(&ledger.event_config)?;
            info!(event_id = %ledger.event_config.event_id, "event config initialized");
        }
        info!(guests = ledger.guests.len(), "ledger opened");
        Ok(ledger)
    }

    /// Register an observer invoked after every committed mutation.  This
    /// replaces the original apps' global notification bus with an explicit
    /// callback on the one ledger instance.
    pub fn set_on_change(&mut self, listener: ChangeListener) {
        self.on_change = Some(listener);
    }

    // -- reads ---------------------------------------------------------------

    pub fn guests(&self) -> &[Guest] {
        &self.guests
    }

    pub fn guest(&self, id: Uuid) -> Option<&Guest> {
        self.guests.iter().find(|g| g.id == id)
    }

    pub fn guest_for_ticket_code(&self, code: &str) -> Option<&Guest> {
        self.guests
            .iter()
            .find(|g| g.ticket_code.as_deref() == Some(code))
    }

    pub fn event_config(&self) -> &EventConfig {
        &self.event_config
    }

    /// Whether an unexpired deletion is waiting in the undo slot.
    pub fn undo_available(&self) -> bool {
        self.pending_undo
            .as_ref()
            .is_some_and(|p| OffsetDateTime::now_utc() < p.expires_at)
    }

    /// When the pending undo slot lapses, if one is occupied.
    pub fn undo_expires_at(&self) -> Option<OffsetDateTime> {
        self.pending_undo.as_ref().map(|p| p.expires_at)
    }

    // -- mutations -----------------------------------------------------------

    /// Add a guest by display name.  Fails with
    /// [`GatekeyError::DuplicateGuest`] if the normalized name collides with
    /// any existing guest.
    pub fn add(&mut self, full_name: &str) -> Result<Guest> {
        util::validate_guest_name(full_name)?;
        let key = normalize::normalize(full_name);
        if self
            .guests
            .iter()
            .any(|g| normalize::normalize(&g.full_name) == key)
        {
            return Err(GatekeyError::DuplicateGuest(full_name.trim().to_string()));
        }

        let guest = Guest::new(full_name.trim());
        let mut next = self.guests.clone();
        next.push(guest.clone());
        self.commit_guests(next)?;
        Ok(guest)
    }

    /// Rename a guest.  Fails with [`GatekeyError::DuplicateGuest`] if a
    /// *different* guest already holds the normalized name; unknown ids are
    /// a no-op.
    pub fn update(&mut self, id: Uuid, new_full_name: &str) -> Result<()> {
        util::validate_guest_name(new_full_name)?;
        let key = normalize::normalize(new_full_name);
        if self
            .guests
            .iter()
            .any(|g| g.id != id && normalize::normalize(&g.full_name) == key)
        {
            return Err(GatekeyError::DuplicateGuest(new_full_name.trim().to_string()));
        }
        let Some(idx) = self.guests.iter().position(|g| g.id == id) else {
            return Ok(());
        };

        let mut next = self.guests.clone();
        next[idx].full_name = new_full_name.trim().to_string();
        self.commit_guests(next)
    }

    /// Remove a guest, parking it in the one-slot undo buffer.  Returns the
    /// removed record, or `None` if the id is unknown.
    pub fn delete(&mut self, id: Uuid) -> Result<Option<Guest>> {
        let Some(idx) = self.guests.iter().position(|g| g.id == id) else {
            return Ok(None);
        };

        let mut next = self.guests.clone();
        let removed = next.remove(idx);
        self.commit_guests(next)?;
        // Overwrites any earlier pending deletion; only the most recent one
        // is ever recoverable.
        self.pending_undo = Some(PendingUndo {
            guest: removed.clone(),
            expires_at: OffsetDateTime::now_utc() + self.undo_window,
        });
        Ok(Some(removed))
    }

    /// Restore the most recently deleted guest, appending it at the end of
    /// the roster.  No-op if the slot is empty or the window has lapsed.
    pub fn undo_delete(&mut self) -> Result<()> {
        let Some(pending) = self.pending_undo.take() else {
            return Ok(());
        };
        if OffsetDateTime::now_utc() >= pending.expires_at {
            return Ok(());
        }

        let mut next = self.guests.clone();
        next.push(pending.guest.clone());
        if let Err(e) = self.commit_guests(next) {
            // Write failed: the deletion stays undoable.
            self.pending_undo = Some(pending);
            return Err(e);
        }
        Ok(())
    }

    /// Set a guest's entered flag.  An actual flip stamps or clears
    /// `entered_at`; re-setting the same value is a pure no-op (the original
    /// timestamp is preserved and nothing is persisted).  Unknown ids are a
    /// no-op.
    pub fn toggle_entered(&mut self, id: Uuid, entered: bool) -> Result<()> {
        let Some(idx) = self.guests.iter().position(|g| g.id == id) else {
            return Ok(());
        };
        if self.guests[idx].entered == entered {
            return Ok(());
        }

        let mut next = self.guests.clone();
        next[idx].entered = entered;
        next[idx].entered_at = entered.then(OffsetDateTime::now_utc);
        self.commit_guests(next)
    }

    /// Merge a batch of candidate names.  Each candidate is checked against
    /// the existing roster AND names accepted earlier in the same batch, so
    /// within-batch duplicates are skipped too.  Persists once for the whole
    /// batch, and only if anything was added.
    pub fn add_or_merge(&mut self, candidates: &[String]) -> Result<MergeOutcome> {
        let mut taken: std::collections::HashSet<String> = self
            .guests
            .iter()
            .map(|g| normalize::normalize(&g.full_name))
            .collect();

        let mut next = self.guests.clone();
        let mut outcome = MergeOutcome::default();
        for raw in candidates {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let key = normalize::normalize(trimmed);
            if taken.contains(&key) {
                outcome.skipped.push(raw.clone());
                continue;
            }
            let guest = Guest::new(trimmed);
            taken.insert(key);
            next.push(guest.clone());
            outcome.added.push(guest);
        }

        if !outcome.added.is_empty() {
            self.commit_guests(next)?;
            info!(
                added = outcome.added.len(),
                skipped = outcome.skipped.len(),
                "import merged"
            );
        }
        Ok(outcome)
    }

    /// Apply an in-place mutation to the event configuration and persist it.
    ///
    /// Secret rotation must happen in a single call that replaces the secret
    /// and strictly increments the key version together; a mutation that
    /// changes one without the other is rejected and nothing is persisted.
    pub fn update_event_config(&mut self, mutator: impl FnOnce(&mut EventConfig)) -> Result<()> {
        let mut next = self.event_config.clone();
        mutator(&mut next);

        if next.key_version < self.event_config.key_version {
            return Err(GatekeyError::Validation(
                "key version must never decrease".into(),
            ));
        }
        let secret_changed = next.hmac_secret != self.event_config.hmac_secret;
        let version_bumped = next.key_version > self.event_config.key_version;
        if secret_changed != version_bumped {
            return Err(GatekeyError::Validation(
                "secret and key version must rotate together".into(),
            ));
        }

        self.persist_config(&next)?;
        self.event_config = next;
        self.notify();
        Ok(())
    }

    /// Rotate the ticket-signing secret: fresh random bytes plus a key
    /// version bump, in one atomic update.  Every previously issued ticket
    /// becomes unverifiable; this is the revocation mechanism.
    pub fn rotate_secret(&mut self) -> Result<u32> {
        self.update_event_config(|cfg| {
            cfg.hmac_secret = util::generate_hmac_secret();
            cfg.key_version += 1;
        })?;
        info!(key_version = self.event_config.key_version, "secret rotated");
        Ok(self.event_config.key_version)
    }

    /// Wholesale roster replacement (used for "clear all data").  Clears the
    /// pending-undo slot too.
    pub fn replace_all(&mut self, guests: Vec<Guest>) -> Result<()> {
        self.commit_guests(guests)?;
        self.pending_undo = None;
        Ok(())
    }

    /// Write the four ticket fields onto a guest record as a unit,
    /// overwriting any prior ticket.  Unknown ids are a no-op.
    pub(crate) fn update_ticket_fields(
        &mut self,
        id: Uuid,
        code: &str,
        payload: &str,
        signature: &str,
        issued_at: OffsetDateTime,
    ) -> Result<()> {
        let Some(idx) = self.guests.iter().position(|g| g.id == id) else {
            return Ok(());
        };
        let mut next = self.guests.clone();
        next[idx].ticket_code = Some(code.to_string());
        next[idx].qr_payload = Some(payload.to_string());
        next[idx].qr_signature = Some(signature.to_string());
        next[idx].qr_issued_at = Some(issued_at);
        self.commit_guests(next)
    }

    // -- persistence ---------------------------------------------------------

    /// Persist a candidate roster, then commit it to memory.  On error the
    /// in-memory state is untouched.
    fn commit_guests(&mut self, guests: Vec<Guest>) -> Result<()> {
        let json = serde_json::to_vec_pretty(&guests).ctx_persist("serialize guests")?;
        util::write_atomic(&self.guests_path, &json)?;
        self.guests = guests;
        self.notify();
        Ok(())
    }

    fn persist_config(&self, config: &EventConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config).ctx_persist("serialize event config")?;
        util::write_atomic(&self.config_path, &json)
    }

    fn notify(&self) {
        if let Some(listener) = &self.on_change {
            listener();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
