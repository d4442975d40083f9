//! FFI bindings for Pagetrail
//!
//! C-compatible entry points for driving the collector from other languages.
//! All functions take null-terminated C strings and return allocated memory
//! that must be freed by the caller using `pagetrail_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::classifier::{Classifier, RuleClassifier};
use crate::config::CollectorConfig;
use crate::error::CollectorError;
use crate::sim::{parse_script, replay, SimulatedBrowser};

/// Location a replayed page starts on when the script does not navigate first
pub const REPLAY_START_LOCATION: &str = "https://localhost/";

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn run_replay(script: &str, config: &CollectorConfig) -> Result<String, CollectorError> {
    let steps = parse_script(script)?;
    let report = replay(config, SimulatedBrowser::new(REPLAY_START_LOCATION), &steps)?;
    Ok(serde_json::to_string(&report)?)
}

fn run_replay_with_config(script: &str, config_json: &str) -> Result<String, CollectorError> {
    let config: CollectorConfig = serde_json::from_str(config_json)?;
    run_replay(script, &config)
}

// ============================================================================
// Replay
// ============================================================================

/// Replay a script (JSON array or one step per line) against a simulated
/// browser and return the report as JSON.
///
/// # Safety
/// - `script` and `api_key` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `pagetrail_free_string`.
/// - Returns NULL on error; call `pagetrail_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pagetrail_replay(
    script: *const c_char,
    api_key: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let script_str = match cstr_to_string(script) {
        Some(s) => s,
        None => {
            set_last_error("Invalid script string pointer");
            return ptr::null_mut();
        }
    };

    let key = match cstr_to_string(api_key) {
        Some(s) => s,
        None => {
            set_last_error("Invalid api_key string pointer");
            return ptr::null_mut();
        }
    };

    match run_replay(&script_str, &CollectorConfig::new(key)) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Replay a script with a full collector configuration given as JSON
/// (`api_key` required; `server_url`, `variant`, `idle_minutes` optional).
///
/// # Safety
/// - `script` and `config_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `pagetrail_free_string`.
/// - Returns NULL on error; call `pagetrail_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pagetrail_replay_with_config(
    script: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let script_str = match cstr_to_string(script) {
        Some(s) => s,
        None => {
            set_last_error("Invalid script string pointer");
            return ptr::null_mut();
        }
    };

    let config_str = match cstr_to_string(config_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid config string pointer");
            return ptr::null_mut();
        }
    };

    match run_replay_with_config(&script_str, &config_str) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a user-agent string; returns the classification as JSON.
///
/// # Safety
/// - `user_agent` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `pagetrail_free_string`.
/// - Returns NULL on error; call `pagetrail_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pagetrail_classify(user_agent: *const c_char) -> *mut c_char {
    clear_last_error();

    let ua = match cstr_to_string(user_agent) {
        Some(s) => s,
        None => {
            set_last_error("Invalid user_agent string pointer");
            return ptr::null_mut();
        }
    };

    match serde_json::to_string(&RuleClassifier.classify(&ua)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Pagetrail functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Pagetrail function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pagetrail_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Pagetrail call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn pagetrail_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn pagetrail_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_script() -> CString {
        CString::new(
            r#"
{"at": 0, "op": "navigate", "url": "https://shop.test/"}
{"at": 0, "op": "init"}
{"at": 1000, "op": "event", "event": {"type": "key_down"}}
{"at": 2000, "op": "event", "event": {"type": "page_hide"}}
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_replay() {
        let script = sample_script();
        let key = CString::new("key-1").unwrap();

        unsafe {
            let result = pagetrail_replay(script.as_ptr(), key.as_ptr());
            assert!(!result.is_null());

            let report: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(report["final_state"], "ended");
            assert_eq!(report["init_outcomes"][0], "started");
            assert_eq!(report["requests"].as_array().unwrap().len(), 2);

            pagetrail_free_string(result);
        }
    }

    #[test]
    fn test_ffi_replay_with_config() {
        let script = sample_script();
        let config = CString::new(r#"{"api_key": "key-1", "variant": "beta"}"#).unwrap();

        unsafe {
            let result = pagetrail_replay_with_config(script.as_ptr(), config.as_ptr());
            assert!(!result.is_null());

            let text = CStr::from_ptr(result).to_str().unwrap();
            assert!(text.contains("/data/send-beta"));
            pagetrail_free_string(result);
        }
    }

    #[test]
    fn test_ffi_replay_with_invalid_config() {
        let script = sample_script();
        let config = CString::new(r#"{"variant": "beta"}"#).unwrap();

        unsafe {
            let result = pagetrail_replay_with_config(script.as_ptr(), config.as_ptr());
            assert!(result.is_null());

            let error_str = CStr::from_ptr(pagetrail_last_error()).to_str().unwrap();
            assert!(error_str.contains("api_key"));
        }
    }

    #[test]
    fn test_ffi_classify() {
        let ua = CString::new("Mozilla/5.0 (compatible; Googlebot/2.1)").unwrap();

        unsafe {
            let result = pagetrail_classify(ua.as_ptr());
            assert!(!result.is_null());

            let value: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(value["is_bot"], true);
            pagetrail_free_string(result);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let script = CString::new("not a script").unwrap();
        let key = CString::new("key-1").unwrap();

        unsafe {
            let result = pagetrail_replay(script.as_ptr(), key.as_ptr());
            assert!(result.is_null());

            let error = pagetrail_last_error();
            assert!(!error.is_null());

            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("Invalid replay script"));

            let ok = pagetrail_replay(sample_script().as_ptr(), key.as_ptr());
            assert!(pagetrail_last_error().is_null());
            pagetrail_free_string(ok);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = pagetrail_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
