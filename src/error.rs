//! Structured error types for the Gatekey library.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! domain-specific [`GatekeyError`].  The FFI boundary converts these into
//! integer status codes via [`FfiErrorCode`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the Gatekey library.
#[derive(Error, Debug)]
pub enum GatekeyError {
    /// Adding or renaming a guest would collide with an existing guest's
    /// normalized name.  Recoverable: the user renames or cancels.
    #[error("duplicate guest: {0}")]
    DuplicateGuest(String),

    /// A lookup referenced a guest id that no longer exists.  Mutating
    /// operations treat unknown ids as no-ops instead of returning this.
    #[error("guest not found: {0}")]
    NotFound(uuid::Uuid),

    /// Scanned ticket string could not be parsed (too few segments,
    /// undecodable base64url, invalid JSON).
    #[error("ticket: malformed: {0}")]
    MalformedTicket(String),

    /// Recomputed HMAC does not match the supplied signature.  Covers both
    /// tampering and tickets signed under a rotated-out secret.
    #[error("ticket: signature mismatch")]
    SignatureMismatch,

    /// Signature verified but the payload's guest id is not in the ledger.
    #[error("ticket: guest not found")]
    GuestNotFound,

    /// I/O failure while persisting or loading the store.  The previous
    /// on-disk state is left intact; the in-memory mutation is rolled back.
    #[error("persistence: {0}")]
    Persistence(String),

    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    /// Catch-all for errors that do not fit a specific domain.
    #[error("{0}")]
    Other(String),
}

impl GatekeyError {
    /// True for the three verification failures that the scanning UI must
    /// collapse into a single "invalid ticket" message, so a forger learns
    /// nothing about why the forgery failed.
    pub fn is_invalid_ticket(&self) -> bool {
        matches!(
            self,
            Self::MalformedTicket(_) | Self::SignatureMismatch | Self::GuestNotFound
        )
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, GatekeyError>;

// ---------------------------------------------------------------------------
// FFI error codes
// ---------------------------------------------------------------------------

/// Integer status codes returned across the C-ABI boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidArgument = -1,
    DuplicateGuest = -2,
    NotFound = -3,
    InvalidTicket = -4,
    PersistenceError = -5,
    ConfigError = -6,
    InternalError = -99,
}

impl From<&GatekeyError> for FfiErrorCode {
    fn from(e: &GatekeyError) -> Self {
        match e {
            GatekeyError::DuplicateGuest(_) => Self::DuplicateGuest,
            GatekeyError::NotFound(_) => Self::NotFound,
            // The three verification failures map to one opaque code.
            GatekeyError::MalformedTicket(_)
            | GatekeyError::SignatureMismatch
            | GatekeyError::GuestNotFound => Self::InvalidTicket,
            GatekeyError::Persistence(_) => Self::PersistenceError,
            GatekeyError::Config(_) => Self::ConfigError,
            GatekeyError::Validation(_) => Self::InvalidArgument,
            GatekeyError::Other(_) => Self::InternalError,
        }
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds domain-specific context to any `Result<T, E>`.
///
/// Usage mirrors `anyhow::Context` but tags the error with the originating
/// subsystem so that callers (and the FFI boundary) can categorise failures.
///
/// ```ignore
/// std::fs::read(path).ctx_persist("read guest store")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_persist(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_ticket(self, msg: &str) -> Result<T>;
    fn ctx_import(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_persist(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatekeyError::Persistence(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatekeyError::Config(format!("{msg}: {e}")))
    }
    fn ctx_ticket(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatekeyError::MalformedTicket(format!("{msg}: {e}")))
    }
    fn ctx_import(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatekeyError::Other(format!("{msg}: {e}")))
    }
}
