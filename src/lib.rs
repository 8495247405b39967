//! Offline event check-in engine (Gatekey)
//!
//! This crate provides:
//! - A duplicate-resistant guest ledger with atomic JSON persistence and
//!   single-undo semantics
//! - Name normalization used for manual entry and bulk import dedup
//! - HMAC-SHA256 signed QR tickets bound to a per-event rotating secret
//! - Door-side ticket verification with replay/tamper detection
//! - C-ABI FFI exports for integration with the SwiftUI / React Native shells
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod guest;
pub mod import;
pub mod ledger;
pub mod normalize;
pub mod ticket;
pub mod util;

#[allow(unsafe_code)]
pub mod ffi;
