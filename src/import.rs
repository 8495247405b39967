//! Bulk-import reconciliation: partition candidate names into unique vs.
//! duplicate before they reach the ledger.
//!
//! File-format parsing stays at the boundary: the library consumes plain
//! candidate name strings, and the small CSV reader here only extracts a
//! single column of them for the CLI.

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{GatekeyError, Result, ResultExt as _};
use crate::ledger::GuestLedger;
use crate::normalize;
use crate::util;

/// How many unique names the preview shows.
const PREVIEW_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Candidates partitioned against the live roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// First-seen-wins, display-cased, trimmed; ready to add.
    pub unique: Vec<String>,
    /// Trimmed candidates that collide with the roster or with an earlier
    /// candidate in the same batch.
    pub duplicates: Vec<String>,
}

/// Normalize and partition `candidates`.  Whitespace-only entries are
/// discarded silently (neither unique nor duplicate).  Returns the original
/// display-cased strings, never normalization keys.
pub fn reconcile(ledger: &GuestLedger, candidates: &[String]) -> Reconciled {
    let mut taken: std::collections::HashSet<String> = ledger
        .guests()
        .iter()
        .map(|g| normalize::normalize(&g.full_name))
        .collect();

    let mut out = Reconciled::default();
    for raw in candidates {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = normalize::normalize(trimmed);
        if taken.contains(&key) {
            out.duplicates.push(trimmed.to_string());
        } else {
            taken.insert(key);
            out.unique.push(trimmed.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// Summary shown before the user confirms an import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    /// First few unique names, for display.
    pub sample: Vec<String>,
    pub total_count: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
}

pub fn preview(ledger: &GuestLedger, candidates: &[String]) -> ImportPreview {
    let reconciled = reconcile(ledger, candidates);
    ImportPreview {
        sample: reconciled.unique.iter().take(PREVIEW_LIMIT).cloned().collect(),
        total_count: candidates.len(),
        unique_count: reconciled.unique.len(),
        duplicate_count: reconciled.duplicates.len(),
    }
}

// ---------------------------------------------------------------------------
// CSV candidate extraction (CLI boundary)
// ---------------------------------------------------------------------------

/// Read candidate names from one CSV column.
///
/// `column` selects a header by name (case-insensitive); `None` means the
/// first column.  Files without a header row still work in first-column
/// mode because the header row itself is treated as a candidate.
pub fn read_names_csv(path: &Path, column: Option<&str>) -> Result<Vec<String>> {
    util::validate_path(path, "import csv")?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .ctx_import("open csv")?;
    let headers = rdr.headers().ctx_import("read csv headers")?.clone();

    let col_idx = match column {
        Some(name) => headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                GatekeyError::Validation(format!("csv has no column named '{name}'"))
            })?,
        None => 0,
    };

    let mut names = Vec::new();
    // In first-column mode the header row is itself a candidate: files from
    // the field are often plain name lists without a header.
    if column.is_none() {
        if let Some(first) = headers.get(0) {
            names.push(first.to_string());
        }
    }
    for record in rdr.records() {
        let record = record.ctx_import("parse csv row")?;
        if names.len() >= util::MAX_IMPORT_ROWS {
            return Err(GatekeyError::Validation(format!(
                "import exceeds maximum of {} rows",
                util::MAX_IMPORT_ROWS
            )));
        }
        if let Some(field) = record.get(col_idx) {
            names.push(field.to_string());
        }
    }
    info!(candidates = names.len(), path = %path.display(), "csv read");
    Ok(names)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
