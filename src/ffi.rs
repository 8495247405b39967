//! C-ABI FFI exports for the Gatekey core (`gatekey_core` cdylib).
//!
//! Every function returns an `i32` status code (0 = success, negative =
//! error, see [`FfiErrorCode`]).  Output is returned as a JSON string via a
//! `*mut *mut c_char` parameter; the caller must free it with
//! [`gatekey_free_string`].  Detailed error messages are available via
//! [`gatekey_last_error`].
//!
//! Calls are stateless: each opens the store under `data_dir`, performs one
//! operation, and persists before returning.  A process-wide lock serializes
//! calls for the full open-mutate-persist span, so two threads cannot
//! interleave their read-check-persist cycles and lose an update; callers in
//! separate processes must coordinate externally.  The in-memory undo buffer
//! does not survive across calls, so delete over FFI is not undoable; shells
//! that want undo keep the ledger in-process.
//!
//! # Safety
//! All functions that accept raw pointers are `unsafe`.  Callers must ensure
//! that string pointers are valid, null-terminated UTF-8.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::PathBuf;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{FfiErrorCode, GatekeyError, Result};
use crate::ledger::GuestLedger;
use crate::{import, ticket, util};

// ---------------------------------------------------------------------------
// Thread-local last error
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

/// Serializes every FFI call's open-mutate-persist span.  Without it, two
/// concurrent mutating calls would each load the store, each pass their
/// checks against their own snapshot, and the second rename would silently
/// discard the first acknowledged write.
static STORE_LOCK: Mutex<()> = Mutex::new(());

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg)
            .unwrap_or_else(|_| CString::new("unknown error (null byte in message)").unwrap());
    });
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

unsafe fn ptr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .ok()
        .map(str::to_owned)
}

fn string_to_ptr(s: String) -> *mut c_char {
    CString::new(s)
        .unwrap_or_else(|_| CString::new("").unwrap())
        .into_raw()
}

fn write_out(out: *mut *mut c_char, val: String) {
    if !out.is_null() {
        unsafe { *out = string_to_ptr(val) };
    }
}

fn invalid_argument(msg: &str) -> c_int {
    set_last_error(msg);
    FfiErrorCode::InvalidArgument as c_int
}

/// Run `body` under the store lock, catch panics, map errors to FFI codes.
fn ffi_run(
    out: *mut *mut c_char,
    body: impl FnOnce() -> Result<String> + std::panic::UnwindSafe,
) -> c_int {
    // A panic inside a previous call poisons the lock; the store itself is
    // still on its last good state, so keep serving.
    let _guard = STORE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    match std::panic::catch_unwind(body) {
        Ok(Ok(json)) => {
            write_out(out, json);
            0
        }
        Ok(Err(e)) => {
            let code = FfiErrorCode::from(&e) as c_int;
            set_last_error(&e.to_string());
            code
        }
        Err(_) => {
            set_last_error("internal panic");
            FfiErrorCode::InternalError as c_int
        }
    }
}

fn parse_guest_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| GatekeyError::Validation(format!("guest id: {e}")))
}

fn guest_json(ledger: &GuestLedger, id: Uuid) -> Result<String> {
    let guest = ledger.guest(id).ok_or(GatekeyError::NotFound(id))?;
    serde_json::to_string(guest).map_err(|e| GatekeyError::Other(e.to_string()))
}

// ---------------------------------------------------------------------------
// Public FFI functions
// ---------------------------------------------------------------------------

/// Retrieve the last error message.  Returns the number of bytes written
/// (excluding the null terminator).  If `buf` is null or `buf_len` is 0,
/// returns the required buffer size.
#[no_mangle]
pub unsafe extern "C" fn gatekey_last_error(buf: *mut u8, buf_len: usize) -> c_int {
    LAST_ERROR.with(|e| {
        let msg = e.borrow();
        let bytes = msg.as_bytes_with_nul();
        if buf.is_null() || buf_len == 0 {
            return bytes.len() as c_int;
        }
        let copy_len = bytes.len().min(buf_len);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, copy_len) };
        if copy_len < bytes.len() {
            // Ensure null termination.
            unsafe { *buf.add(copy_len - 1) = 0 };
        }
        (copy_len.saturating_sub(1)) as c_int
    })
}

/// Free a string previously returned through an `out` parameter.
#[no_mangle]
pub unsafe extern "C" fn gatekey_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Add a guest by display name.  `out` receives the new guest as JSON.
#[no_mangle]
pub unsafe extern "C" fn gatekey_add_guest(
    data_dir: *const c_char,
    full_name: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let (Some(dir), Some(name)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(full_name) })
    else {
        return invalid_argument("data_dir and full_name must be valid UTF-8");
    };
    ffi_run(out, move || {
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let guest = ledger.add(&name)?;
        serde_json::to_string(&guest).map_err(|e| GatekeyError::Other(e.to_string()))
    })
}

/// List the full roster.  `out` receives a JSON array of guests.
#[no_mangle]
pub unsafe extern "C" fn gatekey_list_guests(
    data_dir: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let Some(dir) = (unsafe { ptr_to_string(data_dir) }) else {
        return invalid_argument("data_dir must be valid UTF-8");
    };
    ffi_run(out, move || {
        let ledger = GuestLedger::open(&PathBuf::from(dir))?;
        serde_json::to_string(ledger.guests()).map_err(|e| GatekeyError::Other(e.to_string()))
    })
}

/// Delete a guest by id.  Not undoable across FFI calls.
#[no_mangle]
pub unsafe extern "C" fn gatekey_delete_guest(
    data_dir: *const c_char,
    guest_id: *const c_char,
) -> c_int {
    let (Some(dir), Some(id)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(guest_id) })
    else {
        return invalid_argument("data_dir and guest_id must be valid UTF-8");
    };
    ffi_run(std::ptr::null_mut(), move || {
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        ledger.delete(parse_guest_id(&id)?)?;
        Ok(String::new())
    })
}

/// Set a guest's entered flag (non-zero `entered` = true).
#[no_mangle]
pub unsafe extern "C" fn gatekey_toggle_entered(
    data_dir: *const c_char,
    guest_id: *const c_char,
    entered: c_int,
) -> c_int {
    let (Some(dir), Some(id)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(guest_id) })
    else {
        return invalid_argument("data_dir and guest_id must be valid UTF-8");
    };
    ffi_run(std::ptr::null_mut(), move || {
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        ledger.toggle_entered(parse_guest_id(&id)?, entered != 0)?;
        Ok(String::new())
    })
}

/// Merge a batch of candidate names supplied as a JSON array of strings.
/// `out` receives `{"added":[Guest...],"skipped":[...]}`.
#[no_mangle]
pub unsafe extern "C" fn gatekey_import_names(
    data_dir: *const c_char,
    names_json: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let (Some(dir), Some(json)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(names_json) })
    else {
        return invalid_argument("data_dir and names_json must be valid UTF-8");
    };
    ffi_run(out, move || {
        let names: Vec<String> = serde_json::from_str(&json)
            .map_err(|e| GatekeyError::Validation(format!("names_json: {e}")))?;
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let outcome = ledger.add_or_merge(&names)?;
        let body = serde_json::json!({
            "added": outcome.added,
            "skipped": outcome.skipped,
        });
        serde_json::to_string(&body).map_err(|e| GatekeyError::Other(e.to_string()))
    })
}

/// Reconcile candidates without mutating the store.  `out` receives the
/// import preview (sample names + counts).
#[no_mangle]
pub unsafe extern "C" fn gatekey_preview_import(
    data_dir: *const c_char,
    names_json: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let (Some(dir), Some(json)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(names_json) })
    else {
        return invalid_argument("data_dir and names_json must be valid UTF-8");
    };
    ffi_run(out, move || {
        let names: Vec<String> = serde_json::from_str(&json)
            .map_err(|e| GatekeyError::Validation(format!("names_json: {e}")))?;
        let ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let preview = import::preview(&ledger, &names);
        serde_json::to_string(&preview).map_err(|e| GatekeyError::Other(e.to_string()))
    })
}

/// Issue (or reissue) a signed ticket.  `out` receives
/// `{"code","payload","signature","wire"}`; the wire string is what goes
/// into the QR image.
#[no_mangle]
pub unsafe extern "C" fn gatekey_issue_ticket(
    data_dir: *const c_char,
    guest_id: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let (Some(dir), Some(id)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(guest_id) })
    else {
        return invalid_argument("data_dir and guest_id must be valid UTF-8");
    };
    ffi_run(out, move || {
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let t = ticket::issue(&mut ledger, parse_guest_id(&id)?)?;
        let body = serde_json::json!({
            "code": t.code,
            "payload": t.payload,
            "signature": t.signature,
            "wire": t.wire_string(),
        });
        serde_json::to_string(&body).map_err(|e| GatekeyError::Other(e.to_string()))
    })
}

/// Verify a scanned wire string without admitting anyone.  `out` receives
/// the resolved guest as JSON.
#[no_mangle]
pub unsafe extern "C" fn gatekey_verify_ticket(
    data_dir: *const c_char,
    wire: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let (Some(dir), Some(wire)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(wire) })
    else {
        return invalid_argument("data_dir and wire must be valid UTF-8");
    };
    ffi_run(out, move || {
        let ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let guest = ticket::verify(&ledger, &wire)?;
        let id = guest.id;
        guest_json(&ledger, id)
    })
}

/// Door flow: verify a scanned wire string and mark the guest entered.
/// `out` receives `{"guest":Guest,"alreadyEntered":bool}`.
#[no_mangle]
pub unsafe extern "C" fn gatekey_scan_ticket(
    data_dir: *const c_char,
    wire: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let (Some(dir), Some(wire)) =
        (unsafe { ptr_to_string(data_dir) }, unsafe { ptr_to_string(wire) })
    else {
        return invalid_argument("data_dir and wire must be valid UTF-8");
    };
    ffi_run(out, move || {
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let outcome = ticket::check_in(&mut ledger, &wire)?;
        let body = serde_json::json!({
            "guest": outcome.guest,
            "alreadyEntered": outcome.already_entered,
        });
        serde_json::to_string(&body).map_err(|e| GatekeyError::Other(e.to_string()))
    })
}

/// Rotate the event signing secret (invalidates all issued tickets).
/// `out` receives `{"keyVersion":N}`.
#[no_mangle]
pub unsafe extern "C" fn gatekey_rotate_secret(
    data_dir: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    let Some(dir) = (unsafe { ptr_to_string(data_dir) }) else {
        return invalid_argument("data_dir must be valid UTF-8");
    };
    ffi_run(out, move || {
        let mut ledger = GuestLedger::open(&PathBuf::from(dir))?;
        let version = ledger.rotate_secret()?;
        Ok(format!("{{\"keyVersion\":{version}}}"))
    })
}

/// Library version string.
#[no_mangle]
pub unsafe extern "C" fn gatekey_version(out: *mut *mut c_char) -> c_int {
    ffi_run(out, || Ok(util::version_string()))
}
