//! Encoding helpers, secret generation, atomic file writes, and validation.

use std::io::Write as _;
use std::path::Path;

use base64::Engine as _;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{GatekeyError, Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Base64
// ---------------------------------------------------------------------------

/// base64url without padding: the ticket wire encoding.
pub fn b64url_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| GatekeyError::MalformedTicket(format!("invalid base64url: {e}")))
}

/// Standard base64, used for the persisted HMAC secret (matches how the
/// existing deployments serialize raw byte strings in JSON).
pub fn b64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| GatekeyError::Other(format!("invalid base64: {e}")))
}

/// Serde adapter for byte fields persisted as standard base64 strings.
pub mod base64_bytes {
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::b64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        super::b64_decode(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Length of a freshly generated event signing secret.
pub const HMAC_SECRET_LEN: usize = 32;

/// Generate a random 256-bit HMAC secret for a new event (or a rotation).
pub fn generate_hmac_secret() -> Vec<u8> {
    use rand::RngCore as _;
    let mut secret = vec![0u8; HMAC_SECRET_LEN];
    rand::rng().fill_bytes(&mut secret);
    secret
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

// ---------------------------------------------------------------------------
// Atomic file writes
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` via a temp file in the same directory followed by
/// an atomic rename, so a crash mid-write leaves the previous document
/// intact rather than a truncated one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .map_err(|e| GatekeyError::Persistence(format!("create dir {}: {e}", dir.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| GatekeyError::Persistence(format!("create temp file in {}: {e}", dir.display())))?;
    tmp.write_all(bytes).ctx_persist("write temp file")?;
    tmp.as_file().sync_all().ctx_persist("sync temp file")?;
    tmp.persist(path)
        .map_err(|e| GatekeyError::Persistence(format!("replace {}: {e}", path.display())))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Maximum accepted guest name length (code points, post-trim).
pub const MAX_NAME_LEN: usize = 200;

/// Validate a guest name for add/update: non-empty after trimming, within
/// the length cap, no control characters.
pub fn validate_guest_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GatekeyError::Validation("guest name must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(GatekeyError::Validation(format!(
            "guest name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(GatekeyError::Validation(
            "guest name contains control characters".into(),
        ));
    }
    Ok(())
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(GatekeyError::Validation(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(GatekeyError::Validation(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Maximum number of candidate names accepted from a single import file.
pub const MAX_IMPORT_ROWS: usize = 10_000;

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("GATEKEY_GIT_HASH");
pub const BUILD_TS: &str = env!("GATEKEY_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("Gatekey v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64url_round_trip() {
        let data = b"gatekey wire segment";
        let encoded = b64url_encode(data);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(b64url_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn b64url_known_vector() {
        // 0xfb 0xff maps to "-" and "_" in the url-safe alphabet.
        assert_eq!(b64url_encode(&[0xfb, 0xff]), "-_8");
    }

    #[test]
    fn b64url_decode_invalid() {
        assert!(b64url_decode("not!!valid!!").is_err());
    }

    #[test]
    fn secret_has_expected_length_and_varies() {
        let a = generate_hmac_secret();
        let b = generate_hmac_secret();
        assert_eq!(a.len(), HMAC_SECRET_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn valid_names() {
        assert!(validate_guest_name("Ana García").is_ok());
        assert!(validate_guest_name("  Jose Lopez  ").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_guest_name("").is_err());
        assert!(validate_guest_name("   ").is_err());
        assert!(validate_guest_name("bad\u{0007}name").is_err());
        let long = "A".repeat(MAX_NAME_LEN + 1);
        assert!(validate_guest_name(&long).is_err());
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("Gatekey"));
    }
}
