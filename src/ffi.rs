//! FFI bindings for Synheart Insight
//!
//! This module provides C-compatible functions for calling Insight from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `insight_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::NaiveDate;

use crate::error::InsightError;
use crate::pipeline::analyze_json;
use crate::schema::DailyRowAdapter;
use crate::weekly::{ReferencePopulation, WeeklyReport};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Return the string on success, or record the error and return NULL
fn finish(result: Result<String, InsightError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Batch API
// ============================================================================

/// Analyze daily rows and return `{"report": ..., "plan": ...}` JSON.
///
/// # Safety
/// - `rows_json` must be a valid null-terminated C string (JSON array or NDJSON).
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `insight_free_string`.
/// - Returns NULL on error; call `insight_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn insight_analyze(
    rows_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let rows = match cstr_to_string(rows_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid rows string pointer");
            return ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        None
    } else {
        match cstr_to_string(config_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid config string (not UTF-8)");
                return ptr::null_mut();
            }
        }
    };

    finish(analyze_json(&rows, config.as_deref()))
}

/// Build the weekly descriptive report for the week ending `week_end`.
///
/// # Safety
/// - `rows_json` and `week_end` (YYYY-MM-DD) must be valid null-terminated C strings.
/// - `references_json` may be NULL when no reference population is available.
/// - Returns a newly allocated string that must be freed with `insight_free_string`.
/// - Returns NULL on error; call `insight_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn insight_weekly_report(
    rows_json: *const c_char,
    references_json: *const c_char,
    week_end: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let rows = match cstr_to_string(rows_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid rows string pointer");
            return ptr::null_mut();
        }
    };

    let week_end = match cstr_to_string(week_end) {
        Some(s) => s,
        None => {
            set_last_error("Invalid week_end string pointer");
            return ptr::null_mut();
        }
    };

    let references = if references_json.is_null() {
        None
    } else {
        match cstr_to_string(references_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid references string (not UTF-8)");
                return ptr::null_mut();
            }
        }
    };

    finish(weekly_json(&rows, references.as_deref(), &week_end))
}

fn weekly_json(
    rows: &str,
    references: Option<&str>,
    week_end: &str,
) -> Result<String, InsightError> {
    let week_end = NaiveDate::parse_from_str(week_end, "%Y-%m-%d")
        .map_err(|e| InsightError::ParseError(format!("week_end '{week_end}': {e}")))?;
    let references = match references {
        Some(json) => ReferencePopulation::from_json(json)?,
        None => ReferencePopulation::new(),
    };
    let table = DailyRowAdapter::to_table(DailyRowAdapter::parse_auto(rows)?)?;
    WeeklyReport::build(&table, week_end, &references)?.to_json()
}

/// Free a string returned by Insight functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an Insight function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn insight_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Insight function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn insight_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Insight library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn insight_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> CString {
        let rows: Vec<String> = (1..=14)
            .map(|d| {
                format!(
                    r#"{{"date": "2024-03-{d:02}", "metrics": {{"steps_sum": {}, "rem_min": {}}}}}"#,
                    6000 + (d * 37 % 11) * 400,
                    80 + d % 5
                )
            })
            .collect();
        CString::new(rows.join("\n")).unwrap()
    }

    #[test]
    fn test_ffi_analyze() {
        let rows = sample_rows();
        unsafe {
            let result = insight_analyze(rows.as_ptr(), ptr::null());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("\"report\""));
            assert!(result_str.contains("\"plan\""));

            insight_free_string(result);
        }
    }

    #[test]
    fn test_ffi_weekly_report() {
        let rows = sample_rows();
        let refs = CString::new(r#"{"steps_sum": {"mean": 8000, "sd": 2000}}"#).unwrap();
        let week_end = CString::new("2024-03-14").unwrap();
        unsafe {
            let result = insight_weekly_report(rows.as_ptr(), refs.as_ptr(), week_end.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("percentile_vs_population"));
            insight_free_string(result);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            let result = insight_analyze(invalid.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = insight_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let rows = sample_rows();
            let bad_config = CString::new(r#"{"fdr_threshold": 2.0}"#).unwrap();
            let result = insight_analyze(rows.as_ptr(), bad_config.as_ptr());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(insight_last_error()).to_str().unwrap();
            assert!(error_str.contains("fdr_threshold"));
        }
    }

    #[test]
    fn test_ffi_bad_week_end() {
        let rows = sample_rows();
        let week_end = CString::new("14/03/2024").unwrap();
        unsafe {
            let result = insight_weekly_report(rows.as_ptr(), ptr::null(), week_end.as_ptr());
            assert!(result.is_null());
            assert!(!insight_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = insight_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
