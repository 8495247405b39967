//! Signed QR tickets: construction, wire encoding, and door-side verification.
//!
//! Wire format (bit-exact with the deployed apps):
//!
//! ```text
//! base64url(JSON{alg:"HS256",k}) . base64url(JSON{gid,e,iat,n,tc}) . base64url(HMAC-SHA256)
//! ```
//!
//! The HMAC is computed over `encodedHeader.encodedPayload` with the event's
//! *current* secret; rotating the secret invalidates every ticket signed
//! under earlier key versions.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq as _;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GatekeyError, Result};
use crate::guest::Guest;
use crate::ledger::GuestLedger;
use crate::util;

/// Only supported signing algorithm.
pub const TICKET_ALG: &str = "HS256";

/// Human-readable ticket code alphabet: uppercase letters and digits minus
/// the visually confusable I, O, 0, 1.  32 symbols, 6 positions.
const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketHeader {
    pub alg: String,
    /// Key version the signing secret belonged to at issuance.
    pub k: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketPayload {
    /// Guest id.
    pub gid: Uuid,
    /// Event id.
    pub e: Uuid,
    /// Issued-at, epoch seconds.
    pub iat: i64,
    /// Guest name snapshot at issuance (not live-linked).
    pub n: String,
    /// Human-readable ticket code.
    pub tc: String,
}

/// An issued ticket.  Derived from a guest plus the event config in effect
/// at issuance; persisted only as four scalar fields on the guest record.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// `encodedHeader.encodedPayload`, the signing input.
    pub payload: String,
    /// base64url HMAC-SHA256 over `payload`.
    pub signature: String,
    /// Display code shown next to the QR image.
    pub code: String,
    pub issued_at: OffsetDateTime,
}

impl Ticket {
    /// Canonical three-part string encoded into the QR image.
    pub fn wire_string(&self) -> String {
        format!("{}.{}", self.payload, self.signature)
    }
}

/// Outcome of a door-side scan that also marks the guest entered.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub guest: Guest,
    /// True when the guest had already been admitted; `guest.entered_at`
    /// still holds the original admission time.
    pub already_entered: bool,
}

// ---------------------------------------------------------------------------
// Issuance
// ---------------------------------------------------------------------------

/// Generate a random 6-character ticket code.  Codes are advisory display
/// labels, not the security boundary, so collisions against existing codes
/// are not checked.
pub fn generate_code() -> String {
    use rand::Rng as _;
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Issue a signed ticket for a guest, binding it to the ledger's current
/// secret and key version, and write the four ticket fields back onto the
/// guest record (reissue overwrites the previous ticket's fields).
pub fn issue(ledger: &mut GuestLedger, guest_id: Uuid) -> Result<Ticket> {
    let guest = ledger
        .guest(guest_id)
        .ok_or(GatekeyError::NotFound(guest_id))?
        .clone();
    let config = ledger.event_config();

    let issued_at = OffsetDateTime::now_utc();
    let code = generate_code();
    let header = TicketHeader {
        alg: TICKET_ALG.to_string(),
        k: config.key_version,
    };
    let payload = TicketPayload {
        gid: guest.id,
        e: config.event_id,
        iat: issued_at.unix_timestamp(),
        n: guest.full_name.clone(),
        tc: code.clone(),
    };

    let encoded_header = encode_json(&header)?;
    let encoded_payload = encode_json(&payload)?;
    let signing_input = format!("{encoded_header}.{encoded_payload}");
    let signature = sign(&signing_input, &config.hmac_secret);

    ledger.update_ticket_fields(guest.id, &code, &signing_input, &signature, issued_at)?;
    debug!(guest = %guest.id, key_version = header.k, "ticket issued");

    Ok(Ticket {
        payload: signing_input,
        signature,
        code,
        issued_at,
    })
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Authenticate a scanned ticket string and resolve it to a guest.
///
/// Fails with [`GatekeyError::MalformedTicket`] on structural problems,
/// [`GatekeyError::SignatureMismatch`] when the HMAC does not verify under
/// the current secret (tampering, or a ticket signed under a rotated-out
/// key), and [`GatekeyError::GuestNotFound`] when the payload references a
/// guest no longer in the ledger.  Marking the guest entered is the
/// caller's responsibility; see [`check_in`].
pub fn verify<'a>(ledger: &'a GuestLedger, wire: &str) -> Result<&'a Guest> {
    let mut parts = wire.splitn(3, '.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(GatekeyError::MalformedTicket(
            "expected three dot-separated segments".into(),
        ));
    };

    let header_bytes = util::b64url_decode(header_b64)?;
    let header: TicketHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| GatekeyError::MalformedTicket(format!("header: {e}")))?;
    if header.alg != TICKET_ALG {
        // Unknown algorithms are treated like any other failed signature so
        // the door UI reveals nothing about the reason.
        return Err(GatekeyError::SignatureMismatch);
    }

    let signing_input = format!("{header_b64}.{payload_b64}");
    let supplied = util::b64url_decode(signature_b64)?;
    let expected = hmac_sha256(
        signing_input.as_bytes(),
        &ledger.event_config().hmac_secret,
    );
    if expected.as_slice().ct_eq(supplied.as_slice()).unwrap_u8() != 1 {
        return Err(GatekeyError::SignatureMismatch);
    }

    let payload_bytes = util::b64url_decode(payload_b64)?;
    let payload: TicketPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| GatekeyError::MalformedTicket(format!("payload: {e}")))?;

    ledger.guest(payload.gid).ok_or(GatekeyError::GuestNotFound)
}

/// Verify a scanned ticket and admit the guest: the door flow.  Reports
/// "already entered" as a distinct outcome rather than an error; only a
/// first admission flips the entered flag.
pub fn check_in(ledger: &mut GuestLedger, wire: &str) -> Result<CheckIn> {
    let guest = verify(ledger, wire)?.clone();
    if guest.entered {
        return Ok(CheckIn {
            guest,
            already_entered: true,
        });
    }
    ledger.toggle_entered(guest.id, true)?;
    let guest = ledger
        .guest(guest.id)
        .ok_or(GatekeyError::GuestNotFound)?
        .clone();
    Ok(CheckIn {
        guest,
        already_entered: false,
    })
}

// ---------------------------------------------------------------------------
// Signing primitives
// ---------------------------------------------------------------------------

fn hmac_sha256(input: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
    mac.update(input);
    mac.finalize().into_bytes().to_vec()
}

fn sign(signing_input: &str, secret: &[u8]) -> String {
    util::b64url_encode(&hmac_sha256(signing_input.as_bytes(), secret))
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| GatekeyError::Other(format!("serialize ticket segment: {e}")))?;
    Ok(util::b64url_encode(&bytes))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::GuestLedger;
    use tempfile::tempdir;

    fn ledger_with(names: &[&str]) -> (tempfile::TempDir, GuestLedger) {
        let dir = tempdir().unwrap();
        let mut ledger = GuestLedger::open(dir.path()).unwrap();
        for name in names {
            ledger.add(name).unwrap();
        }
        (dir, ledger)
    }

    #[test]
    fn code_uses_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            for c in code.bytes() {
                assert!(CODE_ALPHABET.contains(&c), "unexpected symbol {c}");
                assert!(!b"IO01".contains(&c));
            }
        }
    }

    #[test]
    fn issue_writes_ticket_fields_onto_guest() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;

        let ticket = issue(&mut ledger, id).unwrap();
        let guest = ledger.guest(id).unwrap();
        assert_eq!(guest.ticket_code.as_deref(), Some(ticket.code.as_str()));
        assert_eq!(guest.qr_payload.as_deref(), Some(ticket.payload.as_str()));
        assert_eq!(
            guest.qr_signature.as_deref(),
            Some(ticket.signature.as_str())
        );
        assert!(guest.qr_issued_at.is_some());
    }

    #[test]
    fn issue_unknown_guest_fails() {
        let (_dir, mut ledger) = ledger_with(&[]);
        let err = issue(&mut ledger, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, GatekeyError::NotFound(_)));
    }

    #[test]
    fn round_trip_resolves_same_guest() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;

        let ticket = issue(&mut ledger, id).unwrap();
        let resolved = verify(&ledger, &ticket.wire_string()).unwrap();
        assert_eq!(resolved.id, id);
    }

    #[test]
    fn wire_segments_decode_to_expected_json() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;
        let ticket = issue(&mut ledger, id).unwrap();
        let wire = ticket.wire_string();
        let parts: Vec<&str> = wire.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: TicketHeader =
            serde_json::from_slice(&util::b64url_decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header.alg, "HS256");
        assert_eq!(header.k, 1);

        let payload: TicketPayload =
            serde_json::from_slice(&util::b64url_decode(parts[1]).unwrap()).unwrap();
        assert_eq!(payload.gid, id);
        assert_eq!(payload.e, ledger.event_config().event_id);
        assert_eq!(payload.n, "Ana García");
        assert_eq!(payload.tc, ticket.code);
        assert!(payload.iat > 0);
    }

    #[test]
    fn tampered_signature_rejected() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;
        let wire = issue(&mut ledger, id).unwrap().wire_string();

        // Flip each character of the signature segment in turn.
        let sig_start = wire.rfind('.').unwrap() + 1;
        for i in sig_start..wire.len() {
            let mut bytes = wire.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == wire {
                continue;
            }
            let err = verify(&ledger, &tampered).unwrap_err();
            assert!(err.is_invalid_ticket(), "position {i}: {err}");
        }
    }

    #[test]
    fn tampered_payload_rejected() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;
        let ticket = issue(&mut ledger, id).unwrap();

        // Re-encode the payload with a different name but keep the original
        // signature.
        let parts: Vec<&str> = ticket.payload.split('.').collect();
        let mut payload: TicketPayload =
            serde_json::from_slice(&util::b64url_decode(parts[1]).unwrap()).unwrap();
        payload.n = "Someone Else".into();
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            encode_json(&payload).unwrap(),
            ticket.signature
        );
        let err = verify(&ledger, &forged).unwrap_err();
        assert!(matches!(err, GatekeyError::SignatureMismatch));
    }

    #[test]
    fn key_rotation_invalidates_old_tickets() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;
        let wire = issue(&mut ledger, id).unwrap().wire_string();

        ledger.rotate_secret().unwrap();
        let err = verify(&ledger, &wire).unwrap_err();
        assert!(matches!(err, GatekeyError::SignatureMismatch));

        // A ticket issued under the new secret verifies.
        let fresh = issue(&mut ledger, id).unwrap().wire_string();
        assert!(verify(&ledger, &fresh).is_ok());
    }

    #[test]
    fn malformed_tickets_rejected() {
        let (_dir, ledger) = ledger_with(&[]);
        for wire in ["", "one", "one.two", "!!.??.##"] {
            let err = verify(&ledger, wire).unwrap_err();
            assert!(err.is_invalid_ticket(), "{wire:?}: {err}");
        }
    }

    #[test]
    fn non_hs256_header_rejected_as_signature_mismatch() {
        let (_dir, ledger) = ledger_with(&[]);
        let header = util::b64url_encode(br#"{"alg":"none","k":1}"#);
        let payload = util::b64url_encode(b"{}");
        let err = verify(&ledger, &format!("{header}.{payload}.AAAA")).unwrap_err();
        assert!(matches!(err, GatekeyError::SignatureMismatch));
    }

    #[test]
    fn deleted_guest_yields_guest_not_found() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;
        let wire = issue(&mut ledger, id).unwrap().wire_string();

        ledger.delete(id).unwrap();
        let err = verify(&ledger, &wire).unwrap_err();
        assert!(matches!(err, GatekeyError::GuestNotFound));
    }

    #[test]
    fn reissue_overwrites_fields_but_old_signature_still_verifies() {
        // Documented latent behavior: verification is signature-based, so a
        // prior ticket remains valid until the secret rotates.
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;

        let old = issue(&mut ledger, id).unwrap();
        let new = issue(&mut ledger, id).unwrap();
        assert_ne!(old.code, new.code);
        assert_eq!(
            ledger.guest(id).unwrap().ticket_code.as_deref(),
            Some(new.code.as_str())
        );
        assert!(verify(&ledger, &old.wire_string()).is_ok());
    }

    #[test]
    fn check_in_admits_then_reports_duplicate() {
        let (_dir, mut ledger) = ledger_with(&["Ana García"]);
        let id = ledger.guests()[0].id;
        let wire = issue(&mut ledger, id).unwrap().wire_string();

        let first = check_in(&mut ledger, &wire).unwrap();
        assert!(!first.already_entered);
        assert!(first.guest.entered);
        let stamp = first.guest.entered_at.unwrap();

        let second = check_in(&mut ledger, &wire).unwrap();
        assert!(second.already_entered);
        assert_eq!(second.guest.entered_at, Some(stamp));
    }
}
